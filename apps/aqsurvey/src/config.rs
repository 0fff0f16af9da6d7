//! # Experiment Configuration
//!
//! Settings come from `aqsurvey.toml`, then `AQSURVEY_*` environment
//! variables, then CLI flags (highest precedence).
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 8080
//!
//! [storage]
//! backend = "redb"
//! path = "aqsurvey.redb"
//!
//! [experiment]
//! definition = "surveys/air_pollution.toml"
//! group_size = 4
//!
//! [bonus]
//! completion_cents = 150
//! per_step_cents = 10
//! ```
//!
//! ## Environment Overrides
//!
//! | Variable | Setting |
//! |---|---|
//! | `AQSURVEY_HOST` | `server.host` |
//! | `AQSURVEY_PORT` | `server.port` |
//! | `AQSURVEY_RATE_LIMIT` | `server.rate_limit` (0 disables) |
//! | `AQSURVEY_PARTICIPANT_RATE_LIMIT` | `server.participant_rate_limit` |
//! | `AQSURVEY_CORS_ORIGINS` | `server.cors_origins` |
//! | `AQSURVEY_API_KEY` | `server.api_key` |
//! | `AQSURVEY_BACKEND` | `storage.backend` |
//! | `AQSURVEY_DB` | `storage.path` |
//! | `AQSURVEY_DEFINITION` | `experiment.definition` |
//! | `AQSURVEY_GROUP_SIZE` | `experiment.group_size` |

use aqsurvey_core::{
    DefinitionRegistry, Experiment, FlatBonus, ResponseRecorder, SurveyDefinition, SurveyError,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Config file looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "aqsurvey.toml";

/// Survey definitions and config files larger than this are refused.
const MAX_DOCUMENT_SIZE: u64 = 4 * 1024 * 1024;

/// Template written by `aqsurvey init`.
pub const CONFIG_TEMPLATE: &str = r#"# aqsurvey experiment configuration

[server]
host = "127.0.0.1"
port = 8080
# Requests per second across all clients (0 disables).
rate_limit = 100
# Requests per second for a single participant id.
participant_rate_limit = 20
# cors_origins = "http://localhost:3000"
# api_key = "change-me"

[storage]
# "memory" or "redb"
backend = "redb"
path = "aqsurvey.redb"

[experiment]
definition = "surveys/air_pollution.toml"
# Participants a SYNC step waits for.
group_size = 1

[bonus]
completion_cents = 150
per_step_cents = 10
"#;

// =============================================================================
// SECTIONS
// =============================================================================

/// Where response records and session snapshots live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Lost on exit.
    #[default]
    Memory,
    /// ACID redb file.
    Redb,
}

impl FromStr for Backend {
    type Err = SurveyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "redb" => Ok(Self::Redb),
            other => Err(SurveyError::InvalidDefinition(format!(
                "Unknown storage backend '{}' (expected memory or redb)",
                other
            ))),
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory => f.write_str("memory"),
            Self::Redb => f.write_str("redb"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub rate_limit: u32,
    pub participant_rate_limit: u32,
    /// `"*"` or a comma-separated origin list; localhost only when unset.
    pub cors_origins: Option<String>,
    /// Bearer key required on every route but `/health` when set.
    pub api_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            rate_limit: 100,
            participant_rate_limit: 20,
            cors_origins: None,
            api_key: None,
        }
    }
}

impl ServerConfig {
    #[must_use]
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    pub backend: Backend,
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Memory,
            path: PathBuf::from("aqsurvey.redb"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExperimentConfig {
    pub definition: Option<PathBuf>,
    pub group_size: usize,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            definition: None,
            group_size: 1,
        }
    }
}

/// The whole `aqsurvey.toml` document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub experiment: ExperimentConfig,
    pub bonus: FlatBonus,
}

// =============================================================================
// LOADING
// =============================================================================

impl AppConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, SurveyError> {
        toml::from_str(text)
            .map_err(|e| SurveyError::SerializationError(format!("Invalid config: {}", e)))
    }

    /// Load the config file and apply environment overrides.
    ///
    /// An explicit `path` must exist. Without one, `aqsurvey.toml` in the
    /// working directory is used when present, defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self, SurveyError> {
        let mut config = match path {
            Some(path) => Self::from_toml_str(&read_document(path)?)?,
            None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
                Self::from_toml_str(&read_document(Path::new(DEFAULT_CONFIG_FILE))?)?
            }
            None => Self::default(),
        };
        config.apply_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Apply `AQSURVEY_*` overrides read through `lookup`.
    ///
    /// Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), SurveyError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(host) = get("AQSURVEY_HOST") {
            self.server.host = host;
        }
        if let Some(port) = get("AQSURVEY_PORT") {
            self.server.port = parse_number("AQSURVEY_PORT", &port)?;
        }
        if let Some(rps) = get("AQSURVEY_RATE_LIMIT") {
            self.server.rate_limit = parse_number("AQSURVEY_RATE_LIMIT", &rps)?;
        }
        if let Some(rps) = get("AQSURVEY_PARTICIPANT_RATE_LIMIT") {
            self.server.participant_rate_limit =
                parse_number("AQSURVEY_PARTICIPANT_RATE_LIMIT", &rps)?;
        }
        if let Some(origins) = get("AQSURVEY_CORS_ORIGINS") {
            self.server.cors_origins = Some(origins);
        }
        if let Some(key) = get("AQSURVEY_API_KEY") {
            self.server.api_key = Some(key);
        }
        if let Some(backend) = get("AQSURVEY_BACKEND") {
            self.storage.backend = backend.parse()?;
        }
        if let Some(path) = get("AQSURVEY_DB") {
            self.storage.path = PathBuf::from(path);
        }
        if let Some(path) = get("AQSURVEY_DEFINITION") {
            self.experiment.definition = Some(PathBuf::from(path));
        }
        if let Some(size) = get("AQSURVEY_GROUP_SIZE") {
            self.experiment.group_size = parse_number("AQSURVEY_GROUP_SIZE", &size)?;
        }
        Ok(())
    }

    /// Open the configured recorder backend.
    pub fn recorder(&self) -> Result<ResponseRecorder, SurveyError> {
        match self.storage.backend {
            Backend::Memory => Ok(ResponseRecorder::new()),
            Backend::Redb => ResponseRecorder::with_redb(&self.storage.path),
        }
    }

    /// Load and validate the configured survey definition.
    pub fn registry(&self) -> Result<DefinitionRegistry, SurveyError> {
        let path = self.experiment.definition.as_deref().ok_or_else(|| {
            SurveyError::InvalidDefinition(
                "No survey definition configured (set experiment.definition or AQSURVEY_DEFINITION)"
                    .to_string(),
            )
        })?;
        load_definition(path)
    }

    /// Registry, recorder and restored sessions, ready to serve.
    pub fn experiment(&self) -> Result<Experiment, SurveyError> {
        let registry = self.registry()?;
        let recorder = self.recorder()?;
        Experiment::new(registry, self.experiment.group_size, recorder)
    }
}

// =============================================================================
// SURVEY DEFINITIONS
// =============================================================================

/// Parse a survey definition document.
///
/// `.json` files are read as JSON; everything else as TOML.
pub fn parse_definition(path: &Path, text: &str) -> Result<SurveyDefinition, SurveyError> {
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));

    if is_json {
        serde_json::from_str(text).map_err(|e| {
            SurveyError::SerializationError(format!("{}: {}", path.display(), e))
        })
    } else {
        toml::from_str(text).map_err(|e| {
            SurveyError::SerializationError(format!("{}: {}", path.display(), e))
        })
    }
}

/// Read, parse and build a survey definition into a registry.
pub fn load_definition(path: &Path) -> Result<DefinitionRegistry, SurveyError> {
    let text = read_document(path)?;
    let definition = parse_definition(path, &text)?;
    let registry = DefinitionRegistry::from_definition(definition)?;
    tracing::info!(
        survey = registry.name(),
        stages = registry.stage_count(),
        total_steps = registry.total_steps(),
        "survey definition loaded"
    );
    Ok(registry)
}

fn read_document(path: &Path) -> Result<String, SurveyError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| SurveyError::IoError(format!("Cannot read '{}': {}", path.display(), e)))?;
    if !metadata.is_file() {
        return Err(SurveyError::IoError(format!(
            "'{}' is not a regular file",
            path.display()
        )));
    }
    if metadata.len() > MAX_DOCUMENT_SIZE {
        return Err(SurveyError::SerializationError(format!(
            "'{}' is {} bytes, more than the {} allowed",
            path.display(),
            metadata.len(),
            MAX_DOCUMENT_SIZE
        )));
    }
    std::fs::read_to_string(path)
        .map_err(|e| SurveyError::IoError(format!("Cannot read '{}': {}", path.display(), e)))
}

fn parse_number<T: FromStr>(name: &str, value: &str) -> Result<T, SurveyError> {
    value.trim().parse().map_err(|_| {
        SurveyError::InvalidDefinition(format!("{} must be a number, got '{}'", name, value))
    })
}

// =============================================================================
// TESTS
// =============================================================================

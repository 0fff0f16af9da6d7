//! # CLI Command Implementations
//!
//! Commands that touch a redb store open it exclusively, so they cannot run
//! against the database of a live server.

use super::{ExportFormat, ExportLayout};
use crate::api::{self, AppState};
use crate::config::{AppConfig, CONFIG_TEMPLATE, DEFAULT_CONFIG_FILE};
use aqsurvey_core::{
    DefinitionRegistry, FieldKind, ParticipantId, ResponseRecord, StepDefinition, SurveyError,
    TimingRow, WideTable, long_rows, timing_rows,
};
use std::io::Write;
use std::path::{Path, PathBuf};

// =============================================================================
// PATH CHECKS
// =============================================================================

/// Resolve an output path against its canonical parent directory.
fn validate_output_path(path: &Path) -> Result<PathBuf, SurveyError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let canonical_parent = parent.canonicalize().map_err(|e| {
        SurveyError::IoError(format!(
            "Invalid output directory '{}': {}",
            parent.display(),
            e
        ))
    })?;
    if !canonical_parent.is_dir() {
        return Err(SurveyError::IoError(format!(
            "Output directory '{}' is not a directory",
            parent.display()
        )));
    }

    let filename = path
        .file_name()
        .ok_or_else(|| SurveyError::IoError("Output path has no filename".to_string()))?;
    Ok(canonical_parent.join(filename))
}

fn io_err(context: &str) -> impl Fn(std::io::Error) -> SurveyError + '_ {
    move |e| SurveyError::IoError(format!("{}: {}", context, e))
}

// =============================================================================
// SERVER COMMAND
// =============================================================================

pub async fn cmd_server(config: &AppConfig) -> Result<(), SurveyError> {
    let experiment = config.experiment()?;
    let registry = experiment.registry();

    println!("aqsurvey server starting...");
    println!();
    println!("Configuration:");
    println!("  Address:    {}", config.server.addr());
    println!("  Survey:     {}", registry.name());
    println!(
        "  Plan:       {} stages, {} steps",
        registry.stage_count(),
        registry.total_steps()
    );
    println!("  Group size: {}", config.experiment.group_size);
    println!("  Backend:    {}", config.storage.backend);
    if config.storage.backend == crate::config::Backend::Redb {
        println!("  Database:   {}", config.storage.path.display());
    }
    println!();
    println!("Endpoints:");
    println!("  POST /participants               - Enroll or resume");
    println!("  GET  /participants/{{id}}          - Current step");
    println!("  POST /participants/{{id}}/values   - Store a draft value");
    println!("  POST /participants/{{id}}/advance  - Leave the step");
    println!("  GET  /status                     - Experiment counters");
    println!("  GET  /health                     - Health check");
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let state = AppState::new(experiment, config.bonus);
    api::run_server(&config.server, state).await
}

// =============================================================================
// VALIDATE COMMAND
// =============================================================================

fn describe_kind(kind: &FieldKind) -> String {
    match kind {
        FieldKind::Text => "text".to_string(),
        FieldKind::Integer { min, max } => match (min, max) {
            (Some(min), Some(max)) => format!("integer {}..={}", min, max),
            (Some(min), None) => format!("integer >= {}", min),
            (None, Some(max)) => format!("integer <= {}", max),
            (None, None) => "integer".to_string(),
        },
        FieldKind::Choice {
            choices,
            select_multiple,
        } => match select_multiple {
            Some(n) => format!("choice of {} (up to {})", choices.len(), n),
            None => format!("choice of {}", choices.len()),
        },
    }
}

fn step_json(step: &StepDefinition, rule: aqsurvey_core::StepRule) -> serde_json::Value {
    serde_json::json!({
        "name": step.name,
        "rule": rule.to_string(),
        "fields": step.fields.iter().map(|f| f.id.as_str()).collect::<Vec<_>>(),
        "skippable": step.skip_when.is_some(),
    })
}

fn plan_json(registry: &DefinitionRegistry) -> serde_json::Value {
    let stages: Vec<serde_json::Value> = registry
        .stages_in_order()
        .iter()
        .enumerate()
        .map(|(index, stage)| {
            let steps: Vec<serde_json::Value> = stage
                .steps
                .iter()
                .enumerate()
                .map(|(i, step)| {
                    step_json(
                        step,
                        registry.rule_for(aqsurvey_core::Position::new(index, 0, i)),
                    )
                })
                .collect();
            serde_json::json!({
                "name": stage.name,
                "repeat": stage.repeat(),
                "skippable": stage.options.skip_when.is_some(),
                "steps": steps,
            })
        })
        .collect();

    serde_json::json!({
        "survey": registry.name(),
        "total_steps": registry.total_steps(),
        "stages": stages,
    })
}

/// Load the definition and print the stage/step plan it builds.
pub fn cmd_validate(config: &AppConfig, json_mode: bool, verbose: bool) -> Result<(), SurveyError> {
    let registry = config.registry()?;

    if json_mode {
        let output = serde_json::to_string_pretty(&plan_json(&registry))
            .map_err(|e| SurveyError::SerializationError(e.to_string()))?;
        println!("{}", output);
        return Ok(());
    }

    println!("Survey '{}' is valid", registry.name());
    println!("==================");
    for (index, stage) in registry.stages_in_order().iter().enumerate() {
        let repeat = match stage.repeat() {
            1 => String::new(),
            n => format!(" x{}", n),
        };
        let skip = if stage.options.skip_when.is_some() {
            " (skippable)"
        } else {
            ""
        };
        println!("{}. {}{}{}", index + 1, stage.name, repeat, skip);

        for (i, step) in stage.steps.iter().enumerate() {
            let rule = registry.rule_for(aqsurvey_core::Position::new(index, 0, i));
            let skip = if step.skip_when.is_some() { ", skippable" } else { "" };
            println!(
                "   - {} [{}{}] {} field(s)",
                step.name,
                rule,
                skip,
                step.fields.len()
            );
            if verbose {
                for field in &step.fields {
                    let hidden = if field.hidden { ", hidden" } else { "" };
                    let required = if field.required.is_required() {
                        ", required"
                    } else {
                        ""
                    };
                    println!(
                        "       {} ({}{}{})",
                        field.id,
                        describe_kind(&field.kind),
                        required,
                        hidden
                    );
                }
            }
        }
    }
    println!();
    println!("Total steps on a full path: {}", registry.total_steps());
    Ok(())
}

// =============================================================================
// STATUS COMMAND
// =============================================================================

pub fn cmd_status(config: &AppConfig, json_mode: bool) -> Result<(), SurveyError> {
    let experiment = config.experiment()?;
    let status = experiment.status()?;

    if json_mode {
        let output = serde_json::json!({
            "backend": config.storage.backend.to_string(),
            "database": config.storage.path.to_string_lossy(),
            "status": status,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&output).unwrap_or_default()
        );
        return Ok(());
    }

    println!("aqsurvey Experiment Status");
    println!("==========================");
    println!("Survey:       {}", status.survey);
    println!("Backend:      {}", config.storage.backend);
    if status.persistent {
        println!("Database:     {}", config.storage.path.display());
    }
    println!();
    println!("Stages:       {}", status.stages);
    println!("Steps:        {}", status.total_steps);
    println!("Group size:   {}", status.group_size);
    println!();
    println!("Participants: {}", status.participants);
    println!("  connected:  {}", status.connected);
    println!("  waiting:    {}", status.waiting);
    println!("  complete:   {}", status.complete);
    println!("Records:      {}", status.records);

    Ok(())
}

// =============================================================================
// EXPORT COMMAND
// =============================================================================

/// Collect records straight from the store; no survey definition needed.
fn collect_records(
    config: &AppConfig,
    participant: Option<String>,
) -> Result<Vec<ResponseRecord>, SurveyError> {
    let recorder = config.recorder()?;
    let mut records = match participant {
        Some(id) => recorder.export_for(&ParticipantId::new(id))?,
        None => {
            let mut all = Vec::new();
            for participant in recorder.participants()? {
                all.extend(recorder.export_for(&participant)?);
            }
            all
        }
    };
    records.sort_by_key(|r| r.sequence);
    Ok(records)
}

/// Step timings straight from the stored sessions.
fn collect_timings(
    config: &AppConfig,
    participant: Option<String>,
) -> Result<Vec<TimingRow>, SurveyError> {
    let recorder = config.recorder()?;
    let sessions = recorder.load_sessions()?;
    let wanted = participant.map(ParticipantId::new);
    Ok(timing_rows(
        sessions
            .iter()
            .filter(|s| wanted.as_ref().is_none_or(|p| s.participant_id() == p)),
    ))
}

/// Rows gathered for one export layout.
pub enum ExportData {
    Long(Vec<ResponseRecord>),
    Wide(Vec<ResponseRecord>),
    Times(Vec<TimingRow>),
}

impl ExportData {
    fn collect(
        config: &AppConfig,
        layout: ExportLayout,
        participant: Option<String>,
    ) -> Result<Self, SurveyError> {
        Ok(match layout {
            ExportLayout::Long => Self::Long(collect_records(config, participant)?),
            ExportLayout::Wide => Self::Wide(collect_records(config, participant)?),
            ExportLayout::Times => Self::Times(collect_timings(config, participant)?),
        })
    }

    /// Records or timed steps exported.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Long(records) | Self::Wide(records) => records.len(),
            Self::Times(rows) => rows.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Render in the requested format into `out`.
    pub fn write<W: Write>(&self, out: W, format: ExportFormat) -> Result<(), SurveyError> {
        let csv_err = |e: csv::Error| SurveyError::SerializationError(format!("CSV error: {}", e));
        let json_err = |e: serde_json::Error| SurveyError::SerializationError(e.to_string());

        match (format, self) {
            (ExportFormat::Json, Self::Long(records)) => {
                serde_json::to_writer_pretty(out, &long_rows(records)).map_err(json_err)
            }
            (ExportFormat::Json, Self::Wide(records)) => {
                serde_json::to_writer_pretty(out, &WideTable::from_records(records)).map_err(json_err)
            }
            (ExportFormat::Json, Self::Times(rows)) => {
                serde_json::to_writer_pretty(out, rows).map_err(json_err)
            }
            (ExportFormat::Csv, Self::Long(records)) => {
                let mut writer = csv::Writer::from_writer(out);
                for row in long_rows(records) {
                    writer.serialize(row).map_err(csv_err)?;
                }
                writer.flush().map_err(io_err("CSV flush failed"))
            }
            (ExportFormat::Csv, Self::Wide(records)) => {
                let table = WideTable::from_records(records);
                let mut writer = csv::Writer::from_writer(out);
                writer.write_record(table.header()).map_err(csv_err)?;
                for row in &table.rows {
                    writer.write_record(table.cells(row)).map_err(csv_err)?;
                }
                writer.flush().map_err(io_err("CSV flush failed"))
            }
            (ExportFormat::Csv, Self::Times(rows)) => {
                let mut writer = csv::Writer::from_writer(out);
                for row in rows {
                    writer.serialize(row).map_err(csv_err)?;
                }
                writer.flush().map_err(io_err("CSV flush failed"))
            }
        }
    }
}

pub fn cmd_export(
    config: &AppConfig,
    output: Option<&Path>,
    format: ExportFormat,
    layout: ExportLayout,
    participant: Option<String>,
) -> Result<(), SurveyError> {
    let data = ExportData::collect(config, layout, participant)?;

    match output {
        Some(path) => {
            let path = validate_output_path(path)?;
            let file = std::fs::File::create(&path).map_err(io_err("Cannot create output"))?;
            data.write(std::io::BufWriter::new(file), format)?;
            tracing::info!(
                rows = data.len(),
                layout = ?layout,
                path = %path.display(),
                "export written"
            );
            eprintln!("Exported {} row(s) to {}", data.len(), path.display());
        }
        None => {
            let stdout = std::io::stdout();
            data.write(stdout.lock(), format)?;
            println!();
        }
    }
    Ok(())
}

// =============================================================================
// INIT COMMAND
// =============================================================================

/// Write the starter config; an existing file is kept unless `force`.
pub fn cmd_init(path: Option<&Path>, force: bool) -> Result<(), SurveyError> {
    let path = path.unwrap_or(Path::new(DEFAULT_CONFIG_FILE));

    if path.exists() && !force {
        return Err(SurveyError::IoError(format!(
            "'{}' already exists. Use --force to overwrite.",
            path.display()
        )));
    }

    let path = validate_output_path(path)?;
    std::fs::write(&path, CONFIG_TEMPLATE).map_err(io_err("Cannot write config"))?;

    println!("Wrote {}", path.display());
    println!("Point experiment.definition at a survey file, then run `aqsurvey validate`.");
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================

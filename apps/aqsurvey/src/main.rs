//! # aqsurvey - Survey Experiment Server
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                  apps/aqsurvey (THE BINARY)                │
//! │                                                           │
//! │  ┌─────────────┐   ┌─────────────┐   ┌────────────────┐   │
//! │  │    CLI      │   │  HTTP API   │   │  aqsurvey.toml │   │
//! │  │   (clap)    │   │   (axum)    │   │    (config)    │   │
//! │  └──────┬──────┘   └──────┬──────┘   └───────┬────────┘   │
//! │         └─────────────────┼──────────────────┘            │
//! │                           ▼                               │
//! │                  ┌─────────────────┐                      │
//! │                  │  aqsurvey-core  │                      │
//! │                  │   (THE LOGIC)   │                      │
//! │                  └─────────────────┘                      │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! aqsurvey init
//! aqsurvey validate surveys/air_pollution.toml
//! aqsurvey server --port 8080
//! aqsurvey export --format csv --layout wide -o responses.csv
//! ```

use aqsurvey::cli;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // AQSURVEY_LOG_FORMAT=json switches to machine-parseable output.
    let log_format = std::env::var("AQSURVEY_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "aqsurvey=info,aqsurvey_core=info,tower_http=debug".into());

    let registry = tracing_subscriber::registry().with(filter);
    if log_format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    let cli = cli::Cli::parse();

    if !cli.quiet && !cli.json_mode {
        print_banner();
    }

    if let Err(e) = cli::execute(cli).await {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

fn print_banner() {
    eprintln!(
        r#"
   __ _  __ _ ___ _   _ _ ____   _____ _   _
  / _` |/ _` / __| | | | '__\ \ / / _ \ | | |
 | (_| | (_| \__ \ |_| | |   \ V /  __/ |_| |
  \__,_|\__, |___/\__,_|_|    \_/ \___|\__, |
           |_|                         |___/

  survey experiment server v{}
"#,
        env!("CARGO_PKG_VERSION")
    );
}

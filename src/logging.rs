//! Tracing subscriber setup.
//!
//! Console output goes to stderr so `stagehand boot` can print the composed
//! document on stdout. When a log directory is configured, a daily rolling
//! JSON file is written alongside.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub const LOG_FILE_PREFIX: &str = "stagehand.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Pretty => write!(f, "pretty"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => anyhow::bail!("Invalid log format '{}'. Valid values: pretty, json", s),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    pub verbose: bool,
    pub format: LogFormat,
    pub dir: Option<PathBuf>,
}

/// Filter directive used when `RUST_LOG` is unset.
pub fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "stagehand=debug,tower_http=debug"
    } else {
        "stagehand=info"
    }
}

fn build_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)))
}

/// Install the global subscriber. Hold the returned guard for the life of
/// the process so buffered file output is flushed on exit.
pub fn init(options: LogOptions) -> Result<Option<WorkerGuard>> {
    let (file_layer, guard) = match &options.dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory: {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().json().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let (pretty, json) = match options.format {
        LogFormat::Pretty => (
            Some(fmt::layer().with_target(false).with_writer(std::io::stderr)),
            None,
        ),
        LogFormat::Json => (None, Some(fmt::layer().json().with_writer(std::io::stderr))),
    };

    tracing_subscriber::registry()
        .with(build_filter(options.verbose))
        .with(pretty)
        .with(json)
        .with(file_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}

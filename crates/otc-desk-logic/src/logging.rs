//! Logging setup for desk binaries
//!
//! The destination comes from `LOG_DESTINATION=console|file` (plus `LOG_DIR`
//! and `LOG_FILE_PREFIX` for files); the filter from `RUST_LOG` unless
//! `--verbose` is given. Lifecycle decisions (landed checks, retries,
//! reconciliation) log from this crate, so its target is always part of the
//! filter.

use std::path::PathBuf;

use anyhow::{bail, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DESK_TARGET: &str = "otc_desk_logic";

/// Where log lines go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogDestination {
    Console,
    /// Daily-rolling files named `<prefix>.YYYY-MM-DD` under `dir`
    File { dir: PathBuf, prefix: String },
}

impl LogDestination {
    fn from_env(env: impl Fn(&str) -> Option<String>, default_prefix: &str) -> Result<Self> {
        let destination = env("LOG_DESTINATION").unwrap_or_default();
        let destination = destination.trim();
        if destination.is_empty() || destination.eq_ignore_ascii_case("console") {
            return Ok(LogDestination::Console);
        }
        if !destination.eq_ignore_ascii_case("file") {
            bail!("LOG_DESTINATION must be console or file, got {:?}", destination);
        }
        Ok(LogDestination::File {
            dir: env("LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./logs")),
            prefix: env("LOG_FILE_PREFIX").unwrap_or_else(|| default_prefix.to_string()),
        })
    }
}

/// Install the global subscriber.
///
/// `crate_names` are raised to debug with `verbose`, alongside this crate.
/// The returned guard flushes the file writer on drop; keep it alive for the
/// life of the process.
pub fn init_logging(verbose: bool, crate_names: &[&str], default_log_prefix: &str) -> Result<Option<WorkerGuard>> {
    let destination = LogDestination::from_env(|key| std::env::var(key).ok(), default_log_prefix)?;
    let filter = build_filter(verbose, crate_names);

    match destination {
        LogDestination::Console => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .init();
            Ok(None)
        }
        LogDestination::File { dir, prefix } => {
            let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(&dir, &prefix));
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(writer).with_ansi(false))
                .with(filter)
                .init();
            Ok(Some(guard))
        }
    }
}

fn build_filter(verbose: bool, crate_names: &[&str]) -> EnvFilter {
    if verbose {
        EnvFilter::new(directives(crate_names, "debug", "info"))
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(directives(crate_names, "info", "warn")))
    }
}

/// `otc_desk_logic=level,a=level,...,fallback`
fn directives(crate_names: &[&str], level: &str, fallback: &str) -> String {
    let mut targets = vec![DESK_TARGET.to_string()];
    for name in crate_names {
        let target = name.replace('-', "_");
        if !targets.contains(&target) {
            targets.push(target);
        }
    }
    let mut parts: Vec<String> = targets
        .into_iter()
        .map(|target| format!("{}={}", target, level))
        .collect();
    parts.push(fallback.to_string());
    parts.join(",")
}

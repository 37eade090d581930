//! Structured logging setup.
//!
//! Grounded on the teacher's `src/logger.rs` (tagged dual console/file output,
//! one log file per process start, retention-based cleanup of old files), but
//! rebuilt on the `log` facade with `fern` dispatch instead of hand-rolled
//! `println!` formatting — this is a headless ingestion tool, not a terminal
//! UI, so the emoji and fixed console-width alignment are dropped in favor of
//! a plain `[time LEVEL target] message` line.

use std::path::Path;

use colored::Colorize;

const LOG_RETENTION_HOURS: i64 = 24;
const MAX_LOG_FILES: usize = 7;

/// Module tags this crate logs under (SPEC_FULL §B), mirroring the teacher's
/// `LogTag` enum generalized from trading concerns to ingestion concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogTag {
    Provider,
    RateLimit,
    Circuit,
    Orchestrator,
    Normalize,
    Persistence,
    Lots,
    Pricing,
    Cli,
}

impl LogTag {
    pub fn target(&self) -> &'static str {
        match self {
            LogTag::Provider => "provider",
            LogTag::RateLimit => "ratelimit",
            LogTag::Circuit => "circuit",
            LogTag::Orchestrator => "orchestrator",
            LogTag::Normalize => "normalize",
            LogTag::Persistence => "persistence",
            LogTag::Lots => "lots",
            LogTag::Pricing => "pricing",
            LogTag::Cli => "cli",
        }
    }
}

/// Initializes the global logger: colored console output at `level`, plus an
/// optional rotated file sink (spec SPEC_FULL §B "file persistence with daily
/// rotation is kept"). Call once at process startup.
pub fn init(level: &str, log_file: Option<&str>) -> anyhow::Result<()> {
    let level_filter: log::LevelFilter = level.parse().unwrap_or(log::LevelFilter::Info);

    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                chrono::Local::now().format("%H:%M:%S"),
                colorize_level(record.level()),
                record.target(),
                message
            ))
        })
        .level(level_filter)
        .chain(std::io::stdout());

    if let Some(path) = log_file {
        let dated_path = rotate_and_open(path)?;
        dispatch = dispatch.chain(fern::log_file(dated_path)?);
    }

    dispatch.apply()?;
    Ok(())
}

fn colorize_level(level: log::Level) -> colored::ColoredString {
    match level {
        log::Level::Error => "ERROR".bright_red().bold(),
        log::Level::Warn => "WARN".bright_yellow().bold(),
        log::Level::Info => "INFO".bright_blue(),
        log::Level::Debug => "DEBUG".bright_black(),
        log::Level::Trace => "TRACE".white(),
    }
}

/// Picks a fresh dated log file path next to `base_path` and removes log
/// files older than the retention window or beyond the file count cap.
fn rotate_and_open(base_path: &str) -> anyhow::Result<String> {
    let path = Path::new(base_path);
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;

    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("chainledger").to_string();
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("log").to_string();

    cleanup_old_logs(dir, &stem, &ext)?;

    let timestamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S");
    let dated_name = format!("{stem}_{timestamp}.{ext}");
    Ok(dir.join(dated_name).to_string_lossy().into_owned())
}

fn cleanup_old_logs(dir: &Path, stem: &str, ext: &str) -> anyhow::Result<()> {
    let cutoff = chrono::Local::now() - chrono::Duration::hours(LOG_RETENTION_HOURS);
    let prefix = format!("{stem}_");
    let suffix = format!(".{ext}");

    let mut files: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            name.starts_with(&prefix) && name.ends_with(&suffix)
        })
        .collect();
    files.sort_by_key(|entry| {
        entry
            .metadata()
            .and_then(|m| m.modified())
            .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
    });

    for entry in &files {
        if let Ok(modified) = entry.metadata().and_then(|m| m.modified()) {
            let modified: chrono::DateTime<chrono::Local> = modified.into();
            if modified < cutoff {
                let _ = std::fs::remove_file(entry.path());
            }
        }
    }

    let remaining: Vec<_> = files.iter().filter(|entry| entry.path().exists()).collect();
    if remaining.len() > MAX_LOG_FILES {
        for entry in remaining.iter().take(remaining.len() - MAX_LOG_FILES) {
            let _ = std::fs::remove_file(entry.path());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn rotate_creates_a_dated_file_name() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("chainledger.log");
        let dated = rotate_and_open(base.to_str().unwrap()).unwrap();
        assert!(dated.contains("chainledger_"));
        assert!(dated.ends_with(".log"));
    }

    #[test]
    fn cleanup_enforces_max_file_count() {
        let dir = tempdir().unwrap();
        for i in 0..10 {
            std::fs::write(dir.path().join(format!("chainledger_run{i}.log")), "x").unwrap();
        }
        cleanup_old_logs(dir.path(), "chainledger", "log").unwrap();
        let remaining = std::fs::read_dir(dir.path()).unwrap().count();
        assert!(remaining <= MAX_LOG_FILES);
    }

    #[test]
    fn log_tag_targets_are_lowercase_identifiers() {
        assert_eq!(LogTag::RateLimit.target(), "ratelimit");
        assert_eq!(LogTag::Orchestrator.target(), "orchestrator");
    }
}

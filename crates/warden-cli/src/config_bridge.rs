//! Bridge from `warden_config::Config` to domain types.
//!
//! The config crate has no dependencies on other internal crates; this is
//! the one place where its plain values become audit and telemetry types.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use warden_audit::{BatchMode, ContentionPolicy, RedactionPolicy, RetentionPolicy};
use warden_config::Config;
use warden_telemetry::{FileRotation, LogConfig, LogFormat, LogTarget};

/// Directory of the persistent store: the configured path, or
/// `~/.warden/audit` when it is empty.
pub(crate) fn storage_path(cfg: &Config) -> Result<PathBuf> {
    if !cfg.storage.path.is_empty() {
        return Ok(PathBuf::from(&cfg.storage.path));
    }
    let home = warden_config::loader::default_warden_home()
        .context("cannot resolve the default storage directory")?;
    Ok(home.join("audit"))
}

/// Convert `[writes]` to a [`BatchMode`].
pub(crate) fn to_batch_mode(cfg: &Config) -> BatchMode {
    if cfg.writes.is_batched() {
        BatchMode::Debounced {
            delay: Duration::from_millis(cfg.writes.debounce_ms),
        }
    } else {
        BatchMode::Immediate
    }
}

/// Convert `[stats]` to a [`ContentionPolicy`].
pub(crate) fn to_contention_policy(cfg: &Config) -> ContentionPolicy {
    ContentionPolicy::new(
        cfg.stats.max_attempts,
        Duration::from_millis(cfg.stats.initial_backoff_ms),
        Duration::from_millis(cfg.stats.max_backoff_ms),
    )
}

/// Convert `[retention]` to a [`RetentionPolicy`].
pub(crate) fn to_retention_policy(cfg: &Config) -> RetentionPolicy {
    RetentionPolicy {
        max_age_days: cfg.retention.max_age_days,
        max_entries: cfg.retention.max_entries,
        min_entries: cfg.retention.min_entries,
    }
}

/// Convert `[redaction]` to a [`RedactionPolicy`].
pub(crate) fn to_redaction_policy(cfg: &Config) -> RedactionPolicy {
    RedactionPolicy::new(&cfg.redaction.fields, cfg.redaction.marker.clone())
}

/// Log directory for the file target: the configured one, or
/// `~/.warden/logs` when it is empty.
fn log_dir(cfg: &Config) -> Result<PathBuf> {
    if !cfg.logging.file_dir.is_empty() {
        return Ok(PathBuf::from(&cfg.logging.file_dir));
    }
    let home = warden_config::loader::default_warden_home()
        .context("cannot resolve the default log directory")?;
    Ok(home.join("logs"))
}

/// Convert `[logging]` to a [`LogConfig`]. Unknown formats and rotations
/// fall back to their defaults; the loader has already rejected them.
pub(crate) fn to_log_config(cfg: &Config) -> Result<LogConfig> {
    let format = cfg.logging.format.parse().unwrap_or(LogFormat::Compact);
    let mut log = LogConfig::new(cfg.logging.level.clone()).with_format(format);
    for directive in &cfg.logging.directives {
        log = log.with_directive(directive.clone());
    }

    match cfg.logging.target.as_str() {
        "stdout" => log = log.with_target(LogTarget::Stdout),
        "file" => {
            let rotation = cfg.logging.rotation.parse().unwrap_or(FileRotation::Daily);
            log = log
                .with_target(LogTarget::File {
                    directory: log_dir(cfg)?,
                    prefix: cfg.logging.file_prefix.clone(),
                    rotation,
                })
                .without_ansi();
        },
        _ => {},
    }
    Ok(log)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_maps_to_debounced_writes() {
        let cfg = Config::default();
        assert_eq!(to_batch_mode(&cfg), BatchMode::Debounced {
            delay: Duration::from_millis(100)
        });
    }

    #[test]
    fn test_sync_mode_maps_to_immediate() {
        let mut cfg = Config::default();
        cfg.writes.mode = "sync".into();
        assert_eq!(to_batch_mode(&cfg), BatchMode::Immediate);
    }

    #[test]
    fn test_retention_and_stats_are_carried_over() {
        let mut cfg = Config::default();
        cfg.retention.max_entries = Some(10);
        cfg.retention.min_entries = 2;
        cfg.stats.max_attempts = 7;

        let retention = to_retention_policy(&cfg);
        assert_eq!(retention.max_entries, Some(10));
        assert_eq!(retention.min_entries, 2);
        assert_eq!(to_contention_policy(&cfg).attempts(), 7);
    }

    #[test]
    fn test_redaction_fields_are_case_insensitive() {
        let mut cfg = Config::default();
        cfg.redaction.fields = vec!["SSN".into()];
        let policy = to_redaction_policy(&cfg);
        assert!(policy.is_sensitive("ssn"));
        assert!(!policy.is_sensitive("password"));
    }

    #[test]
    fn test_explicit_storage_path_wins() {
        let mut cfg = Config::default();
        cfg.storage.path = "/srv/warden".into();
        assert_eq!(storage_path(&cfg).unwrap(), PathBuf::from("/srv/warden"));
    }

    #[test]
    fn test_log_config_carries_directives() {
        let mut cfg = Config::default();
        cfg.logging.format = "json".into();
        cfg.logging.directives = vec!["warden_audit=debug".into()];
        let log = to_log_config(&cfg).unwrap();
        assert_eq!(log.format, LogFormat::Json);
        assert_eq!(log.directives, vec!["warden_audit=debug"]);
        assert_eq!(log.target, LogTarget::Stderr);
    }

    #[test]
    fn test_file_target_uses_rotation_and_drops_ansi() {
        let mut cfg = Config::default();
        cfg.logging.target = "file".into();
        cfg.logging.file_dir = "/var/log/warden".into();
        cfg.logging.file_prefix = "audit".into();
        cfg.logging.rotation = "hourly".into();

        let log = to_log_config(&cfg).unwrap();
        assert_eq!(log.target, LogTarget::File {
            directory: PathBuf::from("/var/log/warden"),
            prefix: "audit".into(),
            rotation: FileRotation::Hourly,
        });
        assert!(!log.ansi);
    }
}

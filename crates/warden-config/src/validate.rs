//! Post-merge configuration validation.
//!
//! Validates that deserialized [`Config`](crate::Config) values are within
//! acceptable ranges and that cross-field invariants hold.

use crate::error::{ConfigError, ConfigResult};
use crate::types::Config;

/// Validate a fully-merged and deserialized configuration.
///
/// # Errors
///
/// Returns the first validation error found.
pub fn validate(config: &Config) -> ConfigResult<()> {
    validate_writes(config)?;
    validate_redaction(config)?;
    validate_stats(config)?;
    validate_retention(config)?;
    validate_logging(config)?;
    Ok(())
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.to_owned(),
        message: message.into(),
    }
}

fn validate_writes(config: &Config) -> ConfigResult<()> {
    let w = &config.writes;
    if !matches!(w.mode.as_str(), "batched" | "sync") {
        return Err(invalid(
            "writes.mode",
            format!("unsupported mode '{}'; expected one of: batched, sync", w.mode),
        ));
    }
    if w.debounce_ms == 0 {
        return Err(invalid("writes.debounce_ms", "debounce_ms must be at least 1"));
    }
    if w.queue_capacity == 0 {
        return Err(invalid(
            "writes.queue_capacity",
            "queue_capacity must be at least 1",
        ));
    }
    Ok(())
}

fn validate_redaction(config: &Config) -> ConfigResult<()> {
    let r = &config.redaction;
    if r.marker.is_empty() {
        return Err(invalid("redaction.marker", "marker must not be empty"));
    }
    if r.fields.iter().any(|f| f.trim().is_empty()) {
        return Err(invalid("redaction.fields", "field names must not be empty"));
    }
    Ok(())
}

fn validate_stats(config: &Config) -> ConfigResult<()> {
    let s = &config.stats;
    if s.max_attempts == 0 {
        return Err(invalid("stats.max_attempts", "max_attempts must be at least 1"));
    }
    if s.initial_backoff_ms > s.max_backoff_ms {
        return Err(invalid(
            "stats.initial_backoff_ms",
            format!(
                "initial_backoff_ms ({}) must not exceed max_backoff_ms ({})",
                s.initial_backoff_ms, s.max_backoff_ms
            ),
        ));
    }
    Ok(())
}

fn validate_retention(config: &Config) -> ConfigResult<()> {
    let r = &config.retention;
    if r.max_age_days == Some(0) {
        return Err(invalid("retention.max_age_days", "max_age_days must be at least 1"));
    }
    if let Some(max) = r.max_entries
        && r.min_entries > max
    {
        return Err(invalid(
            "retention.min_entries",
            format!(
                "min_entries ({}) must not exceed max_entries ({max})",
                r.min_entries
            ),
        ));
    }
    if r.interval_secs == 0 {
        return Err(invalid("retention.interval_secs", "interval_secs must be at least 1"));
    }
    Ok(())
}

fn validate_logging(config: &Config) -> ConfigResult<()> {
    let l = &config.logging;
    if !matches!(
        l.level.as_str(),
        "trace" | "debug" | "info" | "warn" | "error"
    ) {
        return Err(invalid(
            "logging.level",
            format!(
                "unsupported level '{}'; expected one of: trace, debug, info, warn, error",
                l.level
            ),
        ));
    }
    if !matches!(l.format.as_str(), "pretty" | "compact" | "json" | "full") {
        return Err(invalid(
            "logging.format",
            format!(
                "unsupported format '{}'; expected one of: pretty, compact, json, full",
                l.format
            ),
        ));
    }
    if !matches!(l.target.as_str(), "stderr" | "stdout" | "file") {
        return Err(invalid(
            "logging.target",
            format!(
                "unsupported target '{}'; expected one of: stderr, stdout, file",
                l.target
            ),
        ));
    }
    if !matches!(l.rotation.as_str(), "daily" | "hourly" | "never") {
        return Err(invalid(
            "logging.rotation",
            format!(
                "unsupported rotation '{}'; expected one of: daily, hourly, never",
                l.rotation
            ),
        ));
    }
    if l.is_file_target() && l.file_prefix.trim().is_empty() {
        return Err(invalid(
            "logging.file_prefix",
            "file_prefix must not be empty when logging to files",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field_of(result: ConfigResult<()>) -> String {
        match result {
            Err(ConfigError::ValidationError { field, .. }) => field,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(validate(&Config::default()).is_ok());
    }

    #[test]
    fn test_rejects_zero_debounce_and_capacity() {
        let mut config = Config::default();
        config.writes.debounce_ms = 0;
        assert_eq!(field_of(validate(&config)), "writes.debounce_ms");

        let mut config = Config::default();
        config.writes.queue_capacity = 0;
        assert_eq!(field_of(validate(&config)), "writes.queue_capacity");
    }

    #[test]
    fn test_rejects_unknown_mode_and_format() {
        let mut config = Config::default();
        config.writes.mode = "eventual".into();
        assert_eq!(field_of(validate(&config)), "writes.mode");

        let mut config = Config::default();
        config.logging.format = "xml".into();
        assert_eq!(field_of(validate(&config)), "logging.format");
    }

    #[test]
    fn test_rejects_bad_log_target_settings() {
        let mut config = Config::default();
        config.logging.target = "syslog".into();
        assert_eq!(field_of(validate(&config)), "logging.target");

        let mut config = Config::default();
        config.logging.rotation = "weekly".into();
        assert_eq!(field_of(validate(&config)), "logging.rotation");

        let mut config = Config::default();
        config.logging.target = "file".into();
        config.logging.file_prefix = " ".into();
        assert_eq!(field_of(validate(&config)), "logging.file_prefix");

        config.logging.file_prefix = "audit".into();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_rejects_floor_above_ceiling() {
        let mut config = Config::default();
        config.retention.max_entries = Some(5);
        config.retention.min_entries = 6;
        assert_eq!(field_of(validate(&config)), "retention.min_entries");

        config.retention.min_entries = 5;
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_rejects_zero_age_attempts_and_marker() {
        let mut config = Config::default();
        config.retention.max_age_days = Some(0);
        assert_eq!(field_of(validate(&config)), "retention.max_age_days");

        let mut config = Config::default();
        config.stats.max_attempts = 0;
        assert_eq!(field_of(validate(&config)), "stats.max_attempts");

        let mut config = Config::default();
        config.redaction.marker.clear();
        assert_eq!(field_of(validate(&config)), "redaction.marker");
    }
}

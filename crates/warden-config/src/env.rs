//! `WARDEN_*` environment overrides.
//!
//! Environment variables are applied after every file layer, so they win
//! over any file. Values are coerced to the field's TOML type; a value that
//! does not parse is an error rather than being ignored.

use std::collections::HashMap;

use tracing::debug;

use crate::error::{ConfigError, ConfigResult};

#[derive(Debug, Clone, Copy)]
enum Kind {
    Str,
    Int,
    List,
}

/// Mapping from environment variable name to config field path.
struct EnvMapping {
    var_name: &'static str,
    field_path: &'static str,
    kind: Kind,
}

const ENV_MAPPINGS: &[EnvMapping] = &[
    EnvMapping {
        var_name: "WARDEN_STORAGE_PATH",
        field_path: "storage.path",
        kind: Kind::Str,
    },
    EnvMapping {
        var_name: "WARDEN_WRITE_MODE",
        field_path: "writes.mode",
        kind: Kind::Str,
    },
    EnvMapping {
        var_name: "WARDEN_DEBOUNCE_MS",
        field_path: "writes.debounce_ms",
        kind: Kind::Int,
    },
    EnvMapping {
        var_name: "WARDEN_QUEUE_CAPACITY",
        field_path: "writes.queue_capacity",
        kind: Kind::Int,
    },
    EnvMapping {
        var_name: "WARDEN_REDACTION_FIELDS",
        field_path: "redaction.fields",
        kind: Kind::List,
    },
    EnvMapping {
        var_name: "WARDEN_STATS_MAX_ATTEMPTS",
        field_path: "stats.max_attempts",
        kind: Kind::Int,
    },
    EnvMapping {
        var_name: "WARDEN_RETENTION_MAX_AGE_DAYS",
        field_path: "retention.max_age_days",
        kind: Kind::Int,
    },
    EnvMapping {
        var_name: "WARDEN_RETENTION_MAX_ENTRIES",
        field_path: "retention.max_entries",
        kind: Kind::Int,
    },
    EnvMapping {
        var_name: "WARDEN_RETENTION_MIN_ENTRIES",
        field_path: "retention.min_entries",
        kind: Kind::Int,
    },
    EnvMapping {
        var_name: "WARDEN_LOG_LEVEL",
        field_path: "logging.level",
        kind: Kind::Str,
    },
    EnvMapping {
        var_name: "WARDEN_LOG_FORMAT",
        field_path: "logging.format",
        kind: Kind::Str,
    },
    EnvMapping {
        var_name: "WARDEN_LOG_TARGET",
        field_path: "logging.target",
        kind: Kind::Str,
    },
    EnvMapping {
        var_name: "WARDEN_LOG_DIR",
        field_path: "logging.file_dir",
        kind: Kind::Str,
    },
];

/// Apply every set `WARDEN_*` variable to `merged`.
///
/// Returns the field paths that were overridden.
///
/// # Errors
///
/// Returns [`ConfigError::EnvError`] if a numeric variable does not parse.
pub fn apply_env_overrides<S: ::std::hash::BuildHasher>(
    merged: &mut toml::Value,
    env_vars: &HashMap<String, String, S>,
) -> ConfigResult<Vec<&'static str>> {
    let mut applied = Vec::new();
    for mapping in ENV_MAPPINGS {
        let Some(raw) = env_vars.get(mapping.var_name) else {
            continue;
        };
        let value = coerce(mapping, raw)?;
        debug!(
            var = mapping.var_name,
            field = mapping.field_path,
            "applying env var override"
        );
        set_field(merged, mapping.field_path, value);
        applied.push(mapping.field_path);
    }
    Ok(applied)
}

fn coerce(mapping: &EnvMapping, raw: &str) -> ConfigResult<toml::Value> {
    match mapping.kind {
        Kind::Str => Ok(toml::Value::String(raw.to_owned())),
        Kind::Int => raw
            .trim()
            .parse::<i64>()
            .map(toml::Value::Integer)
            .map_err(|e| ConfigError::EnvError {
                var_name: mapping.var_name.to_owned(),
                message: format!("expected an integer, got '{raw}': {e}"),
            }),
        Kind::List => Ok(toml::Value::Array(
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| toml::Value::String(s.to_owned()))
                .collect(),
        )),
    }
}

/// Set a dotted `path` in the TOML tree, creating intermediate tables.
fn set_field(root: &mut toml::Value, path: &str, value: toml::Value) {
    let Some((parents, leaf)) = path.rsplit_once('.') else {
        if let Some(table) = root.as_table_mut() {
            table.insert(path.to_owned(), value);
        }
        return;
    };

    let mut current = root;
    for segment in parents.split('.') {
        let Some(table) = current.as_table_mut() else {
            return;
        };
        current = table
            .entry(segment.to_owned())
            .or_insert_with(|| toml::Value::Table(toml::map::Map::new()));
    }
    if let Some(table) = current.as_table_mut() {
        table.insert(leaf.to_owned(), value);
    }
}

/// Collect all current environment variables into a map.
#[must_use]
pub fn collect_env_vars() -> HashMap<String, String> {
    std::env::vars().collect()
}

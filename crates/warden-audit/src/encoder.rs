//! Event normalization and redaction.
//!
//! [`EntryEncoder::encode`] is total: it assigns identity, stamps a
//! timestamp and masks sensitive values, and never fails.

use std::collections::BTreeSet;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, SubsecRound, Utc};
use serde_json::{Map, Value};
use tracing::warn;

use crate::record::{AuditEvent, AuditRecord, FieldChange, RecordId};

/// Replacement written in place of a sensitive value.
pub const DEFAULT_REDACTION_MARKER: &str = "[REDACTED]";

/// Field names masked unless configured otherwise.
pub const DEFAULT_SENSITIVE_FIELDS: &[&str] = &[
    "password",
    "token",
    "secret",
    "api_key",
    "apikey",
    "authorization",
    "cookie",
    "private_key",
];

/// Which field names are masked, and with what.
///
/// Names are compared case-insensitively. Matching applies to detail keys at
/// any depth and to the `field` of every [`FieldChange`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedactionPolicy {
    fields: BTreeSet<String>,
    marker: String,
}

impl RedactionPolicy {
    /// A policy masking `fields` with `marker`.
    #[must_use]
    pub fn new<I, S>(fields: I, marker: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            fields: fields
                .into_iter()
                .map(|f| f.as_ref().to_ascii_lowercase())
                .collect(),
            marker: marker.into(),
        }
    }

    /// A policy that masks nothing.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(std::iter::empty::<&str>(), DEFAULT_REDACTION_MARKER)
    }

    /// Whether `name` is sensitive.
    #[must_use]
    pub fn is_sensitive(&self, name: &str) -> bool {
        self.fields.contains(&name.to_ascii_lowercase())
    }

    /// The replacement marker.
    #[must_use]
    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// Mask a single value. `null` stays `null`.
    fn mask(&self, value: &mut Value) {
        if !value.is_null() {
            *value = Value::String(self.marker.clone());
        }
    }

    fn redact_map(&self, map: &mut Map<String, Value>) {
        for (key, value) in map.iter_mut() {
            if self.is_sensitive(key) {
                self.mask(value);
            } else {
                self.redact_value(value);
            }
        }
    }

    fn redact_value(&self, value: &mut Value) {
        match value {
            Value::Object(map) => self.redact_map(map),
            Value::Array(items) => items.iter_mut().for_each(|v| self.redact_value(v)),
            _ => {},
        }
    }

    fn redact_change(&self, change: &mut FieldChange) {
        if self.is_sensitive(&change.field) {
            if let Some(v) = change.old_value.as_mut() {
                self.mask(v);
            }
            if let Some(v) = change.new_value.as_mut() {
                self.mask(v);
            }
        } else {
            if let Some(v) = change.old_value.as_mut() {
                self.redact_value(v);
            }
            if let Some(v) = change.new_value.as_mut() {
                self.redact_value(v);
            }
        }
    }
}

impl Default for RedactionPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_SENSITIVE_FIELDS, DEFAULT_REDACTION_MARKER)
    }
}

/// Converts submitted events into canonical records.
///
/// Generated timestamps never go backwards for a given encoder, even if the
/// wall clock does. Every timestamp is truncated to microseconds, the
/// resolution of the index keys.
#[derive(Debug, Default)]
pub struct EntryEncoder {
    redaction: RedactionPolicy,
    last_timestamp: Mutex<Option<DateTime<Utc>>>,
}

impl EntryEncoder {
    /// An encoder using `redaction`.
    #[must_use]
    pub fn new(redaction: RedactionPolicy) -> Self {
        Self {
            redaction,
            last_timestamp: Mutex::new(None),
        }
    }

    /// Normalize and redact `event`.
    #[must_use]
    pub fn encode(&self, event: AuditEvent) -> AuditRecord {
        let AuditEvent {
            id,
            timestamp,
            category,
            action,
            user_id,
            username,
            ip_address,
            user_agent,
            resource,
            resource_id,
            mut details,
            mut changes,
            success,
            error,
        } = event;

        self.redaction.redact_map(&mut details);
        for change in &mut changes {
            self.redaction.redact_change(change);
        }

        AuditRecord {
            id: Self::accepted_id(id),
            timestamp: timestamp.map_or_else(|| self.next_timestamp(), |ts| ts.trunc_subsecs(6)),
            category,
            action,
            user_id,
            username,
            ip_address,
            user_agent,
            resource,
            resource_id,
            details,
            changes,
            success,
            error,
        }
    }

    fn accepted_id(id: Option<RecordId>) -> RecordId {
        match id {
            Some(id) if id.is_valid() => id,
            Some(id) => {
                warn!(id = ?id.as_str(), "Replacing unusable record id");
                RecordId::new()
            },
            None => RecordId::new(),
        }
    }

    fn next_timestamp(&self) -> DateTime<Utc> {
        let mut last = self
            .last_timestamp
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let now = Utc::now().trunc_subsecs(6);
        let stamped = match *last {
            Some(prev) if prev > now => prev,
            _ => now,
        };
        *last = Some(stamped);
        stamped
    }
}

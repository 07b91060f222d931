//! Audit record types.
//!
//! An [`AuditEvent`] is what callers submit; an [`AuditRecord`] is the
//! canonical, redacted, immutable form that gets committed.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Generates a string-backed vocabulary enum with an `Other` catch-all.
///
/// Unknown spellings round-trip unchanged through `Other`, so the store can
/// record actions it has never heard of.
macro_rules! vocabulary {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident => $text:literal, )+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(from = "String", into = "String")]
        pub enum $name {
            $( $(#[$vmeta])* $variant, )+
            /// A value outside the known vocabulary, kept verbatim.
            Other(String),
        }

        impl $name {
            /// The canonical spelling.
            #[must_use]
            pub fn as_str(&self) -> &str {
                match self {
                    $( Self::$variant => $text, )+
                    Self::Other(s) => s,
                }
            }

            /// Parse a spelling. Never fails: unknown values become `Other`.
            #[must_use]
            pub fn parse(s: &str) -> Self {
                match s {
                    $( $text => Self::$variant, )+
                    other => Self::Other(other.to_owned()),
                }
            }

            /// Whether this value is part of the known vocabulary.
            #[must_use]
            pub fn is_known(&self) -> bool {
                !matches!(self, Self::Other(_))
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self::parse(&s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self::parse(s)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                match value {
                    $name::Other(s) => s,
                    known => known.as_str().to_owned(),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

vocabulary! {
    /// Broad area an administrative action belongs to.
    pub enum AuditCategory {
        /// Authentication (login, logout, credentials).
        Auth => "auth",
        /// User account management.
        User => "user",
        /// Data records.
        Data => "data",
        /// Configuration changes.
        Config => "config",
        /// System lifecycle.
        System => "system",
        /// Security policy and incidents.
        Security => "security",
        /// Access control decisions.
        Access => "access",
        /// Data export.
        Export => "export",
        /// Data import.
        Import => "import",
    }
}

vocabulary! {
    /// What was done.
    pub enum AuditAction {
        /// Successful sign-in.
        Login => "login",
        /// Sign-out.
        Logout => "logout",
        /// Rejected sign-in attempt.
        LoginFailed => "login_failed",
        /// Password changed by its owner.
        PasswordChange => "password_change",
        /// Password reset by an administrator or recovery flow.
        PasswordReset => "password_reset",
        /// Resource created.
        Create => "create",
        /// Resource read.
        Read => "read",
        /// Resource updated.
        Update => "update",
        /// Resource deleted.
        Delete => "delete",
        /// Permission granted.
        PermissionGrant => "permission_grant",
        /// Permission revoked.
        PermissionRevoke => "permission_revoke",
        /// Role assignment changed.
        RoleChange => "role_change",
        /// Setting changed.
        SettingsChange => "settings_change",
        /// Data exported.
        Export => "export",
        /// Data imported.
        Import => "import",
        /// Backup taken.
        Backup => "backup",
        /// Backup restored.
        Restore => "restore",
        /// Request denied by access control.
        AccessDenied => "access_denied",
        /// API key issued.
        ApiKeyCreate => "api_key_create",
        /// API key revoked.
        ApiKeyRevoke => "api_key_revoke",
        /// Session forcibly ended.
        SessionRevoke => "session_revoke",
    }
}

/// Opaque unique identifier of an audit record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Generate a fresh random identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// The identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the id can be stored and found again through the indexes:
    /// non-empty and free of control characters.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.0.is_empty() && !self.0.chars().any(char::is_control)
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for RecordId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One field-level change carried by an update event.
///
/// A missing `old_value` / `new_value` means "no value", which is different
/// from an explicit JSON `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    /// Name of the changed field.
    pub field: String,
    /// Value before the change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<Value>,
    /// Value after the change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_value: Option<Value>,
}

impl FieldChange {
    /// A change from `old` to `new`.
    #[must_use]
    pub fn new(field: impl Into<String>, old: Option<Value>, new: Option<Value>) -> Self {
        Self {
            field: field.into(),
            old_value: old,
            new_value: new,
        }
    }
}

/// A committed, immutable audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Unique record identifier.
    pub id: RecordId,
    /// Commit time.
    pub timestamp: DateTime<Utc>,
    /// Category of the action.
    pub category: AuditCategory,
    /// The action performed.
    pub action: AuditAction,
    /// Acting user's identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Acting user's display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Client IP address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    /// Client user agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// Kind of resource acted on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    /// Identifier of the resource acted on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    /// Free-form details, already redacted.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub details: Map<String, Value>,
    /// Field-level changes, already redacted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub changes: Vec<FieldChange>,
    /// Whether the action succeeded.
    pub success: bool,
    /// Failure description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuditRecord {
    /// `(resource, resource_id)` when both are present.
    #[must_use]
    pub fn resource_ref(&self) -> Option<(&str, &str)> {
        match (&self.resource, &self.resource_id) {
            (Some(resource), Some(id)) => Some((resource, id)),
            _ => None,
        }
    }

    /// Short human-readable description.
    #[must_use]
    pub fn description(&self) -> String {
        match self.resource_ref() {
            Some((resource, id)) => format!("{}/{} {resource}:{id}", self.category, self.action),
            None => format!("{}/{}", self.category, self.action),
        }
    }
}

/// An event as submitted by a caller, before encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEvent {
    /// Pre-assigned identifier. Generated when absent.
    pub id: Option<RecordId>,
    /// Pre-assigned timestamp. Generated when absent.
    pub timestamp: Option<DateTime<Utc>>,
    /// Category of the action.
    pub category: AuditCategory,
    /// The action performed.
    pub action: AuditAction,
    /// Acting user's identifier.
    pub user_id: Option<String>,
    /// Acting user's display name.
    pub username: Option<String>,
    /// Client IP address.
    pub ip_address: Option<String>,
    /// Client user agent.
    pub user_agent: Option<String>,
    /// Kind of resource acted on.
    pub resource: Option<String>,
    /// Identifier of the resource acted on.
    pub resource_id: Option<String>,
    /// Free-form details.
    pub details: Map<String, Value>,
    /// Field-level changes.
    pub changes: Vec<FieldChange>,
    /// Whether the action succeeded.
    pub success: bool,
    /// Failure description.
    pub error: Option<String>,
}

impl AuditEvent {
    /// A successful event with no attribution.
    #[must_use]
    pub fn new(category: impl Into<AuditCategory>, action: impl Into<AuditAction>) -> Self {
        Self {
            id: None,
            timestamp: None,
            category: category.into(),
            action: action.into(),
            user_id: None,
            username: None,
            ip_address: None,
            user_agent: None,
            resource: None,
            resource_id: None,
            details: Map::new(),
            changes: Vec::new(),
            success: true,
            error: None,
        }
    }

    /// Attribute the event to a user id.
    #[must_use]
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Attach the acting user's display name.
    #[must_use]
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Attach the client IP address.
    #[must_use]
    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }

    /// Attach the client user agent.
    #[must_use]
    pub fn with_user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    /// Reference the resource acted on.
    #[must_use]
    pub fn with_resource(mut self, resource: impl Into<String>, id: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self.resource_id = Some(id.into());
        self
    }

    /// Add one detail entry.
    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Replace the details map.
    #[must_use]
    pub fn with_details(mut self, details: Map<String, Value>) -> Self {
        self.details = details;
        self
    }

    /// Append a field change.
    #[must_use]
    pub fn with_change(mut self, change: FieldChange) -> Self {
        self.changes.push(change);
        self
    }

    /// Mark the action as failed.
    #[must_use]
    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }

    /// Use a caller-chosen identifier.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<RecordId>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Use a caller-chosen timestamp.
    #[must_use]
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Copy actor attribution from a request context. Fields already set on
    /// the event are kept.
    #[must_use]
    pub fn with_context(mut self, context: &ActorContext) -> Self {
        if self.user_id.is_none() {
            self.user_id.clone_from(&context.user_id);
        }
        if self.username.is_none() {
            self.username.clone_from(&context.username);
        }
        if self.ip_address.is_none() {
            self.ip_address.clone_from(&context.ip);
        }
        if self.user_agent.is_none() {
            self.user_agent.clone_from(&context.user_agent);
        }
        self
    }
}

/// Actor attribution extracted from an incoming request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorContext {
    /// Authenticated user id.
    pub user_id: Option<String>,
    /// Authenticated user name.
    pub username: Option<String>,
    /// Client IP address.
    pub ip: Option<String>,
    /// Client user agent.
    pub user_agent: Option<String>,
}

impl ActorContext {
    /// Context for an authenticated user.
    #[must_use]
    pub fn user(user_id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            username: Some(username.into()),
            ..Self::default()
        }
    }

    /// Attach the client IP address.
    #[must_use]
    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    /// Attach the client user agent.
    #[must_use]
    pub fn with_user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }
}

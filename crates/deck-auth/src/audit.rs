//! Structured audit trail for security-relevant transitions.
//!
//! Events are emitted as JSON on the [`AUDIT_TARGET`] tracing target so a
//! subscriber can route them separately from operational logs. Events
//! recorded inside [`scope`] carry that request's id in their JSON. Events
//! never carry passwords or tokens.

use std::fmt;
use std::future::Future;

use serde::Serialize;

use crate::role::RoleSet;

/// Tracing target of audit events.
pub const AUDIT_TARGET: &str = "deck_auth::audit";

/// Request identifier for log correlation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Generate a new request ID.
    pub fn generate() -> Self {
        Self(crate::session::generate_secure_id("req"))
    }

    /// Create from an existing ID string, e.g. an inbound header.
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

tokio::task_local! {
    static REQUEST_ID: RequestId;
}

/// Run `fut` with `request_id` tagged onto every audit event it records.
pub async fn scope<F: Future>(request_id: RequestId, fut: F) -> F::Output {
    REQUEST_ID.scope(request_id, fut).await
}

/// Id of the request being handled; `None` outside [`scope`].
pub fn current_request_id() -> Option<RequestId> {
    REQUEST_ID.try_with(RequestId::clone).ok()
}

#[derive(Serialize)]
struct TaggedEvent<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    request_id: Option<&'a RequestId>,
    #[serde(flatten)]
    event: &'a AuditEvent,
}

/// A security-relevant transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    UserRegistered {
        user_id: String,
    },
    SessionStarted {
        session_id: String,
    },
    LoginSucceeded {
        user_id: String,
        session_id: String,
    },
    LoginFailed {
        email: String,
    },
    Unlocked {
        session_id: String,
        roles: RoleSet,
    },
    UnlockFailed {
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    RefreshAccepted {
        session_id: String,
    },
    RefreshRejected {
        reason: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    LoggedOut {
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    ForcedLogout {
        session_id: String,
    },
    SessionRolesChanged {
        session_id: String,
        roles: RoleSet,
    },
    UserRolesChanged {
        user_id: String,
        roles: RoleSet,
        sessions_affected: usize,
    },
    UserDeactivated {
        user_id: String,
        sessions_invalidated: usize,
    },
}

impl AuditEvent {
    /// Event name, as serialized in the `event` field.
    pub fn name(&self) -> &'static str {
        match self {
            AuditEvent::UserRegistered { .. } => "user_registered",
            AuditEvent::SessionStarted { .. } => "session_started",
            AuditEvent::LoginSucceeded { .. } => "login_succeeded",
            AuditEvent::LoginFailed { .. } => "login_failed",
            AuditEvent::Unlocked { .. } => "unlocked",
            AuditEvent::UnlockFailed { .. } => "unlock_failed",
            AuditEvent::RefreshAccepted { .. } => "refresh_accepted",
            AuditEvent::RefreshRejected { .. } => "refresh_rejected",
            AuditEvent::LoggedOut { .. } => "logged_out",
            AuditEvent::ForcedLogout { .. } => "forced_logout",
            AuditEvent::SessionRolesChanged { .. } => "session_roles_changed",
            AuditEvent::UserRolesChanged { .. } => "user_roles_changed",
            AuditEvent::UserDeactivated { .. } => "user_deactivated",
        }
    }

    /// Whether the event records a refused attempt.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            AuditEvent::LoginFailed { .. }
                | AuditEvent::UnlockFailed { .. }
                | AuditEvent::RefreshRejected { .. }
        )
    }

    /// Format as JSON string.
    pub fn to_json(&self) -> String {
        self.to_json_for(None)
    }

    /// Format as JSON string with a `request_id` field when one is given.
    pub fn to_json_for(&self, request_id: Option<&RequestId>) -> String {
        let tagged = TaggedEvent {
            request_id,
            event: self,
        };
        serde_json::to_string(&tagged).unwrap_or_else(|_| self.name().to_string())
    }
}

/// Emit an audit event, tagged with the current request id.
pub fn record(event: AuditEvent) {
    let request_id = current_request_id();
    let detail = event.to_json_for(request_id.as_ref());
    if event.is_failure() {
        tracing::warn!(target: AUDIT_TARGET, event = event.name(), %detail, "audit");
    } else {
        tracing::info!(target: AUDIT_TARGET, event = event.name(), %detail, "audit");
    }
}

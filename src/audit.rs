//! Audit trail sink.
//!
//! Every state transition in the login, session, and MFA flows is recorded
//! here, including rejected attempts for accounts that do not exist. The sink
//! is append-only; a breach-detection job consumes the same trail downstream.

use serde::Serialize;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditLevel {
    Info,
    Warn,
}

/// A single audit record. `action` is a stable tag, not display text.
#[derive(Clone, Debug, Serialize)]
pub struct AuditEvent {
    pub level: AuditLevel,
    pub action: String,
    pub user_id: Option<Uuid>,
    pub email: Option<String>,
    pub ip_address: Option<String>,
    pub admin_id: Option<Uuid>,
    pub detail: Option<String>,
}

impl AuditEvent {
    #[must_use]
    pub fn new(level: AuditLevel, action: &str) -> Self {
        Self {
            level,
            action: action.to_string(),
            user_id: None,
            email: None,
            ip_address: None,
            admin_id: None,
            detail: None,
        }
    }

    #[must_use]
    pub fn user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    #[must_use]
    pub fn email(mut self, email: &str) -> Self {
        self.email = Some(email.to_string());
        self
    }

    #[must_use]
    pub fn ip(mut self, ip: Option<&str>) -> Self {
        self.ip_address = ip.map(str::to_string);
        self
    }

    #[must_use]
    pub fn admin(mut self, admin_id: Uuid) -> Self {
        self.admin_id = Some(admin_id);
        self
    }

    #[must_use]
    pub fn detail(mut self, detail: &str) -> Self {
        self.detail = Some(detail.to_string());
        self
    }
}

/// Append-only audit sink.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Emits audit records as structured `tracing` events under the `audit` target.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        let user_id = event.user_id.map(|id| id.to_string());
        let admin_id = event.admin_id.map(|id| id.to_string());
        match event.level {
            AuditLevel::Info => tracing::info!(
                target: "audit",
                action = %event.action,
                user_id = user_id.as_deref(),
                email = event.email.as_deref(),
                ip = event.ip_address.as_deref(),
                admin_id = admin_id.as_deref(),
                detail = event.detail.as_deref(),
            ),
            AuditLevel::Warn => tracing::warn!(
                target: "audit",
                action = %event.action,
                user_id = user_id.as_deref(),
                email = event.email.as_deref(),
                ip = event.ip_address.as_deref(),
                admin_id = admin_id.as_deref(),
                detail = event.detail.as_deref(),
            ),
        }
    }
}

/// Captures events in memory so tests can assert on the trail.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().map(|events| events.clone()).unwrap_or_default()
    }

    pub fn actions(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .map(|event| event.action)
            .collect()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

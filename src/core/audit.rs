//! Audit sink implementations.
//!
//! Records admission decisions (queue, lock, release, hand-over, reserve) in a
//! bounded in-memory buffer for diagnostics and tests.

use std::collections::VecDeque;

use crate::util::clock::now_ms;

/// Audit event structure.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    /// Event identifier.
    pub event_id: String,
    /// Job or owner the action was taken for.
    pub subject: String,
    /// Resources affected, by name.
    pub resources: Vec<String>,
    /// Action taken (queue, lock, unlock, handover, reserve, unreserve, orphan).
    pub action: String,
    /// Timestamp milliseconds.
    pub created_at_ms: u128,
    /// Additional context.
    pub payload: Option<String>,
}

/// Audit sink abstraction.
pub trait AuditSink: Send {
    /// Record an audit event.
    fn record(&mut self, event: AuditEvent);
}

/// In-memory audit sink for testing and dev.
pub struct InMemoryAuditSink {
    events: VecDeque<AuditEvent>,
    max_events: usize,
}

impl InMemoryAuditSink {
    /// Create a new in-memory sink with a bounded buffer.
    pub fn new(max_events: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(max_events),
            max_events,
        }
    }

    /// Retrieve a snapshot of stored events.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.iter().cloned().collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&mut self, event: AuditEvent) {
        if self.events.len() >= self.max_events {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }
}

/// Shared handle so callers can inspect events recorded by a scheduler.
impl AuditSink for std::sync::Arc<parking_lot::Mutex<InMemoryAuditSink>> {
    fn record(&mut self, event: AuditEvent) {
        self.lock().record(event);
    }
}

/// Helper to build an audit event with a fresh identifier.
pub fn build_audit_event(
    subject: impl Into<String>,
    resources: &[String],
    action: impl Into<String>,
    payload: Option<String>,
) -> AuditEvent {
    AuditEvent {
        event_id: uuid::Uuid::new_v4().to_string(),
        subject: subject.into(),
        resources: resources.to_vec(),
        action: action.into(),
        created_at_ms: now_ms(),
        payload,
    }
}

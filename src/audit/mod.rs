use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

/// Which guard variant produced the decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    Role,
    AnyRole,
    Permission,
}

impl DecisionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Role => "role",
            Self::AnyRole => "any_role",
            Self::Permission => "permission",
        }
    }
}

/// Structured record of one authorization denial.
///
/// Produced synchronously by the guard; delivery to the external audit-log
/// writer is asynchronous and fire-and-forget.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub user_id: String,
    pub tenant_id: Uuid,
    pub roles_presented: Vec<String>,
    pub endpoint: String,
    pub decision_kind: DecisionKind,
    pub requirement: String,
    pub reason: String,
}

/// Single-sink interface the guard emits into. The core never waits for
/// durability.
pub trait AuditSink: Send + Sync {
    fn emit(&self, event: AuditEvent);
}

/// Default sink: an unbounded channel drained by a background writer task.
pub struct ChannelAuditSink {
    tx: mpsc::UnboundedSender<AuditEvent>,
}

impl ChannelAuditSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<AuditEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl AuditSink for ChannelAuditSink {
    fn emit(&self, event: AuditEvent) {
        // A closed receiver only means shutdown is in progress
        let _ = self.tx.send(event);
    }
}

/// Drain audit events into structured log output. The external transport
/// (the async audit-log writer) consumes the same channel in production.
pub fn spawn_log_writer(
    mut rx: mpsc::UnboundedReceiver<AuditEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            warn!(
                user_id = %event.user_id,
                tenant_id = %event.tenant_id,
                endpoint = %event.endpoint,
                decision_kind = event.decision_kind.as_str(),
                requirement = %event.requirement,
                roles = ?event.roles_presented,
                reason = %event.reason,
                "Authorization denied"
            );
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_sink_delivers_events() {
        let (sink, mut rx) = ChannelAuditSink::new();
        sink.emit(AuditEvent {
            timestamp: Utc::now(),
            user_id: "user-1".to_string(),
            tenant_id: Uuid::nil(),
            roles_presented: vec!["viewer".to_string()],
            endpoint: "/api/v1/documents".to_string(),
            decision_kind: DecisionKind::Permission,
            requirement: "upload_document".to_string(),
            reason: "no role grants permission".to_string(),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.requirement, "upload_document");
        assert_eq!(event.decision_kind, DecisionKind::Permission);
    }

    #[test]
    fn emit_after_receiver_drop_is_silent() {
        let (sink, rx) = ChannelAuditSink::new();
        drop(rx);
        sink.emit(AuditEvent {
            timestamp: Utc::now(),
            user_id: String::new(),
            tenant_id: Uuid::nil(),
            roles_presented: vec![],
            endpoint: String::new(),
            decision_kind: DecisionKind::Role,
            requirement: String::new(),
            reason: String::new(),
        });
    }
}

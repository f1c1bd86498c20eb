use commissions_core::audit::{AuditEvent, AuditOutcome, AuditSink};

/// Forwards audit events to the `tracing` pipeline under the `commissions::audit` target.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        let metadata = serde_json::to_string(&event.metadata).unwrap_or_default();
        let transaction_id = event.transaction_id.as_ref().map(|id| id.as_str()).unwrap_or("");
        let plan_id = event.plan_id.as_ref().map(|id| id.as_str()).unwrap_or("");

        match event.outcome {
            AuditOutcome::Success => tracing::info!(
                target: "commissions::audit",
                event_name = %event.event_type,
                event_id = %event.event_id,
                correlation_id = %event.correlation_id,
                category = ?event.category,
                actor = %event.actor,
                outcome = event.outcome.as_str(),
                transaction_id,
                plan_id,
                metadata = %metadata,
                "audit event"
            ),
            AuditOutcome::Rejected | AuditOutcome::Failed => tracing::warn!(
                target: "commissions::audit",
                event_name = %event.event_type,
                event_id = %event.event_id,
                correlation_id = %event.correlation_id,
                category = ?event.category,
                actor = %event.actor,
                outcome = event.outcome.as_str(),
                transaction_id,
                plan_id,
                metadata = %metadata,
                "audit event"
            ),
        }
    }
}

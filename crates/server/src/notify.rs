use std::collections::BTreeMap;

use grantflow_core::events::{ApprovalEvent, ApprovalEventSink};
use tracing::info;

/// Publishes approval events as structured log lines for the downstream
/// notification dispatcher to tail.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingEventSink;

impl ApprovalEventSink for TracingEventSink {
    fn emit(&self, event: ApprovalEvent) {
        info!(
            event_name = event.event_name(),
            correlation_id = %event.correlation_id,
            event_id = %event.event_id,
            org_id = %event.org_id.0,
            request_id = event.request_id.as_ref().map(|id| id.0.as_str()).unwrap_or("none"),
            workflow_id = event.workflow_id.as_ref().map(|id| id.0.as_str()).unwrap_or("none"),
            grant_id = event.grant_id.as_ref().map(|id| id.0.as_str()).unwrap_or("none"),
            actor = %event.actor,
            metadata = %render_metadata(&event.metadata),
            "approval event published"
        );
    }
}

fn render_metadata(metadata: &BTreeMap<String, String>) -> String {
    metadata.iter().map(|(key, value)| format!("{key}={value}")).collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use grantflow_core::domain::identity::OrgId;
    use grantflow_core::events::{ApprovalEvent, ApprovalEventKind, ApprovalEventSink};

    use super::{render_metadata, TracingEventSink};

    #[test]
    fn metadata_renders_in_key_order() {
        let metadata = BTreeMap::from([
            ("to_stage".to_string(), "submitted".to_string()),
            ("from_stage".to_string(), "drafting".to_string()),
        ]);

        assert_eq!(render_metadata(&metadata), "from_stage=drafting to_stage=submitted");
        assert_eq!(render_metadata(&BTreeMap::new()), "");
    }

    #[test]
    fn emitting_without_a_subscriber_is_a_no_op() {
        TracingEventSink.emit(ApprovalEvent::new(
            ApprovalEventKind::TransitionApplied,
            OrgId("org-1".to_string()),
            "corr-1",
            "u-writer",
        ));
    }
}

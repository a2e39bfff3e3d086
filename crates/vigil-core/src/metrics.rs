//! Hub instrumentation.
//!
//! Recorded through the `metrics` facade; nothing is exported unless the
//! embedding binary installs a recorder.

use metrics::{counter, gauge};

use crate::channel::ChannelKind;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "vigil_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "vigil_connections_active";
    pub const ADMISSIONS_REJECTED: &str = "vigil_admissions_rejected_total";
    pub const MESSAGES_DELIVERED: &str = "vigil_messages_delivered_total";
    pub const DELIVERY_FAILURES: &str = "vigil_delivery_failures_total";
    pub const PROTOCOL_ERRORS: &str = "vigil_protocol_errors_total";
    pub const EVICTIONS_TOTAL: &str = "vigil_evictions_total";
    pub const SUPERVISOR_PANICS: &str = "vigil_supervisor_panics_total";
}

/// Describe every metric with the installed recorder.
pub fn describe() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of admitted connections since start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Currently registered connections per channel"
    );
    metrics::describe_counter!(
        names::ADMISSIONS_REJECTED,
        "Admission attempts rejected, by close reason"
    );
    metrics::describe_counter!(
        names::MESSAGES_DELIVERED,
        "Messages accepted by a transport, by message type"
    );
    metrics::describe_counter!(names::DELIVERY_FAILURES, "Failed deliveries");
    metrics::describe_counter!(
        names::PROTOCOL_ERRORS,
        "Inbound frames answered with an error"
    );
    metrics::describe_counter!(names::EVICTIONS_TOTAL, "Connections evicted as stale");
    metrics::describe_counter!(
        names::SUPERVISOR_PANICS,
        "Supervisor iterations that panicked"
    );
}

pub(crate) fn record_admission(channel: ChannelKind) {
    counter!(names::CONNECTIONS_TOTAL, "channel" => channel.as_str()).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE, "channel" => channel.as_str()).increment(1.0);
}

pub(crate) fn record_retirement(channel: ChannelKind) {
    gauge!(names::CONNECTIONS_ACTIVE, "channel" => channel.as_str()).decrement(1.0);
}

pub(crate) fn record_rejection(reason: &'static str) {
    counter!(names::ADMISSIONS_REJECTED, "reason" => reason).increment(1);
}

pub(crate) fn record_delivery(message_type: &'static str, delivered: usize, failed: usize) {
    if delivered > 0 {
        counter!(names::MESSAGES_DELIVERED, "type" => message_type).increment(delivered as u64);
    }
    if failed > 0 {
        counter!(names::DELIVERY_FAILURES, "type" => message_type).increment(failed as u64);
    }
}

pub(crate) fn record_protocol_error() {
    counter!(names::PROTOCOL_ERRORS).increment(1);
}

pub(crate) fn record_evictions(count: usize) {
    counter!(names::EVICTIONS_TOTAL).increment(count as u64);
}

pub(crate) fn record_supervisor_panic(task: &'static str) {
    counter!(names::SUPERVISOR_PANICS, "task" => task).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder() {
        // No recorder installed: every call is a no-op
        describe();
        record_admission(ChannelKind::Violations);
        record_delivery("heartbeat", 3, 1);
        record_retirement(ChannelKind::Violations);
    }
}

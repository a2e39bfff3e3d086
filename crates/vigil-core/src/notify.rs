//! Domain notifications pushed by external producers.
//!
//! Each event maps to a server message and the channels it is published on.
//! Publishing is best-effort: undeliverable recipients are retired and the
//! producer only sees the report.

use serde_json::Value;
use tracing::info;
use vigil_protocol::ServerMessage;

use crate::broadcast::BroadcastReport;
use crate::channel::ChannelKind;
use crate::manager::ConnectionManager;

/// An event raised by the application.
#[derive(Debug, Clone, PartialEq)]
pub enum DomainEvent {
    /// A violation was recorded.
    NewViolation(Value),
    /// A camera changed status.
    CameraStatus(Value),
    /// An operational alert.
    SystemAlert(Value),
    /// Fresh analytics figures.
    AnalyticsUpdate(Value),
}

impl DomainEvent {
    /// Channels the event is published on.
    #[must_use]
    pub fn channels(&self) -> &'static [ChannelKind] {
        match self {
            DomainEvent::NewViolation(_) => &[ChannelKind::Violations],
            DomainEvent::CameraStatus(_) => &[ChannelKind::LiveFeed, ChannelKind::SystemStatus],
            DomainEvent::SystemAlert(_) => &[ChannelKind::SystemStatus],
            DomainEvent::AnalyticsUpdate(_) => &[ChannelKind::Analytics],
        }
    }

    /// The wire message for this event.
    #[must_use]
    pub fn into_message(self) -> ServerMessage {
        match self {
            DomainEvent::NewViolation(data) => ServerMessage::NewViolation { data },
            DomainEvent::CameraStatus(data) => ServerMessage::CameraStatusUpdate { data },
            DomainEvent::SystemAlert(data) => ServerMessage::SystemAlert { data },
            DomainEvent::AnalyticsUpdate(data) => ServerMessage::AnalyticsUpdate { data },
        }
    }
}

impl ConnectionManager {
    /// Publish a domain event to its channels.
    pub async fn publish(&self, event: DomainEvent) -> BroadcastReport {
        let channels = event.channels();
        let message = event.into_message();

        let mut total = BroadcastReport::default();
        for channel in channels {
            let report = self.broadcast_to_channel(*channel, &message).await;
            total.recipients += report.recipients;
            total.delivered += report.delivered;
            total.failed += report.failed;
        }

        info!(
            kind = message.type_name(),
            delivered = total.delivered,
            failed = total.failed,
            "Published event"
        );
        total
    }

    /// Publish a new violation.
    pub async fn new_violation(&self, violation: Value) -> BroadcastReport {
        self.publish(DomainEvent::NewViolation(violation)).await
    }

    /// Publish a camera status change to the live feed and system status channels.
    pub async fn camera_status_update(&self, camera: Value) -> BroadcastReport {
        self.publish(DomainEvent::CameraStatus(camera)).await
    }

    /// Publish an operational alert.
    pub async fn system_alert(&self, alert: Value) -> BroadcastReport {
        self.publish(DomainEvent::SystemAlert(alert)).await
    }

    /// Publish analytics figures.
    pub async fn analytics_update(&self, analytics: Value) -> BroadcastReport {
        self.publish(DomainEvent::AnalyticsUpdate(analytics)).await
    }
}

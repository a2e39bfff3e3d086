//! Channel definitions for Vigil.
//!
//! Channels are a fixed, closed set of partitions. Each channel carries a
//! whitelist of finer-grained topics a client may subscribe to.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::registry::RegistryError;

/// A channel identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// Live camera feeds.
    LiveFeed,
    /// Violation notifications.
    Violations,
    /// System health and alerts.
    SystemStatus,
    /// Analytics updates.
    Analytics,
}

impl ChannelKind {
    /// Every channel, in a stable order.
    pub const ALL: [ChannelKind; 4] = [
        ChannelKind::LiveFeed,
        ChannelKind::Violations,
        ChannelKind::SystemStatus,
        ChannelKind::Analytics,
    ];

    /// Get the channel name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ChannelKind::LiveFeed => "live_feed",
            ChannelKind::Violations => "violations",
            ChannelKind::SystemStatus => "system_status",
            ChannelKind::Analytics => "analytics",
        }
    }

    /// Topics a connection on this channel may subscribe to.
    #[must_use]
    pub const fn topics(self) -> &'static [&'static str] {
        match self {
            ChannelKind::LiveFeed => &["camera_feeds", "camera_status", "feed_quality"],
            ChannelKind::Violations => &["new_violations", "violation_updates", "violation_alerts"],
            ChannelKind::SystemStatus => &["camera_health", "system_metrics", "alerts"],
            ChannelKind::Analytics => &["real_time_stats", "trend_updates", "performance_metrics"],
        }
    }

    /// Check whether `topic` is on this channel's whitelist.
    #[must_use]
    pub fn is_valid_topic(self, topic: &str) -> bool {
        self.topics().contains(&topic)
    }

    /// Return the requested topics that are not on the whitelist, in request order.
    #[must_use]
    pub fn invalid_topics(self, requested: &[String]) -> Vec<String> {
        requested
            .iter()
            .filter(|topic| !self.is_valid_topic(topic))
            .cloned()
            .collect()
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelKind {
    type Err = RegistryError;

    /// Parse a channel name. The hyphenated path form (`live-feed`) is accepted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.replace('-', "_");
        ChannelKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| RegistryError::UnknownChannel(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_names_round_trip() {
        for kind in ChannelKind::ALL {
            assert_eq!(kind.as_str().parse::<ChannelKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_channel_accepts_path_form() {
        assert_eq!(
            "live-feed".parse::<ChannelKind>().unwrap(),
            ChannelKind::LiveFeed
        );
        assert_eq!(
            "system-status".parse::<ChannelKind>().unwrap(),
            ChannelKind::SystemStatus
        );
    }

    #[test]
    fn test_unknown_channel() {
        assert!(matches!(
            "chat".parse::<ChannelKind>(),
            Err(RegistryError::UnknownChannel(name)) if name == "chat"
        ));
        assert!("".parse::<ChannelKind>().is_err());
    }

    #[test]
    fn test_topic_whitelist() {
        assert!(ChannelKind::Violations.is_valid_topic("new_violations"));
        assert!(!ChannelKind::Violations.is_valid_topic("camera_feeds"));

        let requested = vec![
            "alerts".to_string(),
            "invalid_topic".to_string(),
            "camera_health".to_string(),
            "new_violations".to_string(),
        ];
        assert_eq!(
            ChannelKind::SystemStatus.invalid_topics(&requested),
            vec!["invalid_topic".to_string(), "new_violations".to_string()]
        );
    }

    #[test]
    fn test_channel_serializes_as_name() {
        let value = serde_json::to_value(ChannelKind::SystemStatus).unwrap();
        assert_eq!(value, "system_status");
    }
}

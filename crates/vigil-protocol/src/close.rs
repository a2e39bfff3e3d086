//! Close codes used when the server terminates a connection.

use std::fmt;

/// Why the server closed a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseReason {
    /// Connection retired after a disconnect or delivery failure.
    Normal,
    /// Server is shutting down.
    GoingAway,
    /// No heartbeat within the staleness threshold.
    Stale,
    /// Requested channel is not one of the fixed channels.
    InvalidChannel,
    /// Channel is at capacity.
    LimitExceeded,
    /// Bearer token failed verification.
    AuthenticationFailed,
}

impl CloseReason {
    /// The WebSocket close code.
    #[must_use]
    pub const fn code(self) -> u16 {
        match self {
            CloseReason::Normal => 1000,
            CloseReason::GoingAway => 1001,
            CloseReason::Stale => 4002,
            CloseReason::InvalidChannel => 4000,
            CloseReason::LimitExceeded => 4001,
            CloseReason::AuthenticationFailed => 4003,
        }
    }

    /// The human-readable close reason.
    #[must_use]
    pub const fn reason(self) -> &'static str {
        match self {
            CloseReason::Normal => "Connection closed",
            CloseReason::GoingAway => "Server shutting down",
            CloseReason::Stale => "Heartbeat timeout",
            CloseReason::InvalidChannel => "Invalid connection type",
            CloseReason::LimitExceeded => "Connection limit exceeded",
            CloseReason::AuthenticationFailed => "Authentication failed",
        }
    }
}

/// A close frame: code plus reason text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    pub code: u16,
    pub reason: String,
}

impl CloseFrame {
    /// Create a close frame.
    #[must_use]
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}

impl Default for CloseFrame {
    fn default() -> Self {
        CloseReason::Normal.into()
    }
}

impl From<CloseReason> for CloseFrame {
    fn from(reason: CloseReason) -> Self {
        Self::new(reason.code(), reason.reason())
    }
}

impl fmt::Display for CloseFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.code, self.reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admission_codes_are_distinct() {
        let codes = [
            CloseReason::AuthenticationFailed.code(),
            CloseReason::InvalidChannel.code(),
            CloseReason::LimitExceeded.code(),
        ];
        assert_eq!(codes, [4003, 4000, 4001]);
    }

    #[test]
    fn test_close_frame_from_reason() {
        let frame = CloseFrame::from(CloseReason::LimitExceeded);
        assert_eq!(frame.code, 4001);
        assert_eq!(frame.reason, "Connection limit exceeded");
        assert_eq!(frame.to_string(), "4001 (Connection limit exceeded)");
    }
}

//! Connection state and reconnect backoff

use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Lifecycle state of the live-data connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Terminal until the caller connects again
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "DISCONNECTED"),
            Self::Connecting => write!(f, "CONNECTING"),
            Self::Connected => write!(f, "CONNECTED"),
            Self::Reconnecting => write!(f, "RECONNECTING"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

/// Delay before reconnect attempt `attempt` (1-based): `min(base * 2^(attempt-1), max)`
pub fn backoff_delay(base: Duration, attempt: u32, max: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    base.saturating_mul(1u32 << exponent).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_growth_and_cap() {
        let base = Duration::from_millis(1000);
        let max = Duration::from_millis(30_000);
        let delays: Vec<u64> = (1..=7)
            .map(|n| backoff_delay(base, n, max).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000, 30000, 30000]);
    }

    #[test]
    fn test_backoff_large_attempts_do_not_overflow() {
        let delay = backoff_delay(Duration::from_secs(1), u32::MAX, Duration::from_secs(30));
        assert_eq!(delay, Duration::from_secs(30));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Reconnecting.to_string(), "RECONNECTING");
        assert_eq!(
            serde_json::to_string(&ConnectionState::Connected).unwrap(),
            "\"CONNECTED\""
        );
    }
}

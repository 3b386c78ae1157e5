//! Client tuning parsed from environment variables.

use std::time::Duration;

pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 1000;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Ack deadline policy for sent events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AckDeadline {
    /// Whatever the codec declares in `Codec::ACK_TIMEOUT`.
    #[default]
    Codec,
    /// Never reset the transport over a missing ack.
    Disabled,
    After(Duration),
}

impl AckDeadline {
    /// `None` defers to the codec and `0` disables the deadline.
    #[must_use]
    pub fn from_millis(ms: Option<u64>) -> Self {
        match ms {
            None => Self::Codec,
            Some(0) => Self::Disabled,
            Some(ms) => Self::After(Duration::from_millis(ms)),
        }
    }

    /// Effective deadline given the codec's own.
    #[must_use]
    pub fn resolve(self, codec: Option<Duration>) -> Option<Duration> {
        match self {
            Self::Codec => codec,
            Self::Disabled => None,
            Self::After(deadline) => Some(deadline),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientConfig {
    /// Pause before each resume attempt.
    pub reconnect_delay: Duration,
    pub ack_timeout: AckDeadline,
    /// Bound on each transport open.
    pub connect_timeout: Duration,
    /// Drop payloads whose sequence id does not advance the tracker.
    pub drop_stale_data: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
            ack_timeout: AckDeadline::Codec,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            drop_stale_data: false,
        }
    }
}

impl ClientConfig {
    /// Build config from environment variables.
    ///
    /// Optional:
    /// - `RELIABLE_RECONNECT_DELAY_MS`: default 1000
    /// - `RELIABLE_ACK_TIMEOUT_MS`: unset keeps the codec's deadline, `0`
    ///   disables it
    /// - `RELIABLE_CONNECT_TIMEOUT_SECS`: default 10
    /// - `RELIABLE_DROP_STALE_DATA`: `true`/`false`, default false
    #[must_use]
    pub fn from_env() -> Self {
        let ack_timeout = AckDeadline::from_millis(
            std::env::var("RELIABLE_ACK_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok()),
        );
        Self {
            reconnect_delay: Duration::from_millis(env_parse(
                "RELIABLE_RECONNECT_DELAY_MS",
                DEFAULT_RECONNECT_DELAY_MS,
            )),
            ack_timeout,
            connect_timeout: Duration::from_secs(env_parse(
                "RELIABLE_CONNECT_TIMEOUT_SECS",
                DEFAULT_CONNECT_TIMEOUT_SECS,
            )),
            drop_stale_data: env_parse("RELIABLE_DROP_STALE_DATA", false),
        }
    }

    #[must_use]
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = AckDeadline::After(timeout);
        self
    }

    #[must_use]
    pub fn without_ack_timeout(mut self) -> Self {
        self.ack_timeout = AckDeadline::Disabled;
        self
    }

    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;

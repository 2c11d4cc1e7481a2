//! Session states and the keep-alive policy

use std::fmt;
use std::time::Duration;

/// Broker idle-time quota; a longer keep-alive gets the session dropped
pub const MAX_KEEP_ALIVE_SECS: u64 = 1200;

/// Keep-alive used when the configured value is out of quota
pub const DEFAULT_KEEP_ALIVE_SECS: u64 = 1140;

/// Connection state of a [`Session`](super::Session)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Disconnecting => "disconnecting",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Clamp a configured keep-alive to the broker quota
///
/// Zero and anything above [`MAX_KEEP_ALIVE_SECS`] become
/// [`DEFAULT_KEEP_ALIVE_SECS`].
pub fn effective_keep_alive(configured_secs: u64) -> Duration {
    if configured_secs == 0 || configured_secs > MAX_KEEP_ALIVE_SECS {
        Duration::from_secs(DEFAULT_KEEP_ALIVE_SECS)
    } else {
        Duration::from_secs(configured_secs)
    }
}

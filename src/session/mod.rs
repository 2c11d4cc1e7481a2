//! Session management for the broker connection
//!
//! [`Session`] is the single owner of the device identity, the signing key,
//! the current token and the connection state. It drives a
//! [`Transport`](crate::transport::Transport) through the
//! `Disconnected -> Connecting -> Connected -> Disconnecting -> Disconnected`
//! cycle and surfaces broker traffic to four observer slots.
//!
//! Token refresh is never automatic. A typical loop:
//!
//! ```rust,no_run
//! # use iotcore_device::session::{Session, SessionError};
//! # use iotcore_device::transport::Transport;
//! # async fn run<T: Transport>(session: &mut Session<T>) -> Result<(), SessionError> {
//! loop {
//!     let now = session.clock().now();
//!     if session.token_expires_within(now, 300) {
//!         session.disconnect().await?;
//!         session.reissue_token(now)?;
//!         session.connect().await?;
//!         session.subscribe_to_config().await?;
//!     }
//!     session.pump().await?;
//! }
//! # }
//! ```

pub mod manager;
pub mod observers;
pub mod state;

pub use manager::{Session, DEFAULT_CONNECT_TIMEOUT, MQTT_USERNAME};
pub use observers::{CallbackError, CallbackResult, Observers, PendingAction, SessionContext};
pub use state::{effective_keep_alive, SessionState, DEFAULT_KEEP_ALIVE_SECS, MAX_KEEP_ALIVE_SECS};

use crate::auth::SignError;
use crate::protocol::TopicError;
use crate::time::{TimeError, Timestamp};
use crate::transport::TransportError;
use thiserror::Error;

/// Session errors
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session is not connected (state: {state})")]
    NotConnected { state: SessionState },

    #[error("Cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    #[error("Broker rejected the connection with code {0}")]
    BrokerRejected(u8),

    #[error("No token has been issued")]
    MissingToken,

    #[error("Token expired at {expires_at} (now {now})")]
    TokenExpired { expires_at: Timestamp, now: Timestamp },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Topic error: {0}")]
    Topic(#[from] TopicError),

    #[error("Token error: {0}")]
    Sign(#[from] SignError),

    #[error("Clock synchronization failed: {0}")]
    Time(#[from] TimeError),

    #[error("Observer callback failed: {0}")]
    Callback(#[source] CallbackError),
}

impl SessionError {
    /// Whether retrying with a fresh token is the expected remedy
    pub fn needs_new_token(&self) -> bool {
        matches!(
            self,
            SessionError::BrokerRejected(_)
                | SessionError::MissingToken
                | SessionError::TokenExpired { .. }
        )
    }
}

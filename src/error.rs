//! Crate-level error aggregate
//!
//! Each module owns a focused error enum. [`DeviceError`] gathers them for the
//! binary and classifies them by recovery strategy.

use crate::auth::SignError;
use crate::config::ConfigError;
use crate::protocol::TopicError;
use crate::session::SessionError;
use crate::time::TimeError;
use crate::transport::TransportError;
use thiserror::Error;

/// Main error type for device operations
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Clock synchronization error: {0}")]
    Time(#[from] TimeError),

    #[error("Token signing error: {0}")]
    Sign(#[from] SignError),

    #[error("Topic error: {0}")]
    Topic(#[from] TopicError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// How the caller should react to an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Surface and stop; retrying cannot help
    Fatal,
    /// Retry the same operation, with backoff
    Retry,
    /// Issue a new token, then reconnect
    Reauthenticate,
}

impl DeviceError {
    pub fn recovery(&self) -> Recovery {
        match self {
            DeviceError::Config(_) | DeviceError::Topic(_) | DeviceError::Io(_) => Recovery::Fatal,
            DeviceError::Time(_) | DeviceError::Transport(_) => Recovery::Retry,
            DeviceError::Sign(e) => sign_recovery(e),
            DeviceError::Session(e) => session_recovery(e),
        }
    }

    /// Process exit code used by the binary
    pub fn exit_code(&self) -> i32 {
        match self.recovery() {
            Recovery::Fatal => 2,
            Recovery::Retry | Recovery::Reauthenticate => 1,
        }
    }
}

fn sign_recovery(error: &SignError) -> Recovery {
    match error {
        // A clock that is not set yet may be after the next sync
        SignError::ClockNotSet { .. } => Recovery::Retry,
        _ => Recovery::Fatal,
    }
}

fn session_recovery(error: &SessionError) -> Recovery {
    match error {
        e if e.needs_new_token() => Recovery::Reauthenticate,
        SessionError::Sign(e) => sign_recovery(e),
        SessionError::Topic(_) | SessionError::InvalidState { .. } => Recovery::Fatal,
        _ => Recovery::Retry,
    }
}

/// Result type for device operations
pub type DeviceResult<T> = Result<T, DeviceError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::TopicKind;
    use crate::session::SessionState;

    #[test]
    fn test_config_errors_are_fatal() {
        let error = DeviceError::from(ConfigError::MissingCredentials(
            "AIO_KEY not set".to_string(),
        ));
        assert_eq!(error.recovery(), Recovery::Fatal);
        assert_eq!(error.exit_code(), 2);
    }

    #[test]
    fn test_time_errors_are_retryable() {
        let error = DeviceError::from(TimeError::MalformedResponse("garbage".to_string()));
        assert_eq!(error.recovery(), Recovery::Retry);
        assert_eq!(error.exit_code(), 1);
    }

    #[test]
    fn test_broker_rejection_needs_new_token() {
        let error = DeviceError::from(SessionError::BrokerRejected(5));
        assert_eq!(error.recovery(), Recovery::Reauthenticate);

        let expired = DeviceError::from(SessionError::TokenExpired {
            expires_at: 100,
            now: 200,
        });
        assert_eq!(expired.recovery(), Recovery::Reauthenticate);
    }

    #[test]
    fn test_unset_clock_is_retryable() {
        let error = DeviceError::from(SignError::ClockNotSet { now: 0, floor: 1 });
        assert_eq!(error.recovery(), Recovery::Retry);

        let nested = DeviceError::from(SessionError::Sign(SignError::ClockNotSet {
            now: 0,
            floor: 1,
        }));
        assert_eq!(nested.recovery(), Recovery::Retry);
    }

    #[test]
    fn test_caller_bugs_are_fatal() {
        let topic = DeviceError::from(SessionError::Topic(TopicError::SubfolderNotAllowed {
            kind: TopicKind::State,
        }));
        assert_eq!(topic.recovery(), Recovery::Fatal);

        let state = DeviceError::from(SessionError::InvalidState {
            operation: "connect",
            state: SessionState::Connected,
        });
        assert_eq!(state.recovery(), Recovery::Fatal);
    }

    #[test]
    fn test_error_display() {
        let error = DeviceError::from(SessionError::BrokerRejected(4));
        assert_eq!(
            error.to_string(),
            "Session error: Broker rejected the connection with code 4"
        );
    }
}

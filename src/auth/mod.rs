//! Device token issuance
//!
//! Devices authenticate to the broker with a short-lived JWT signed by their
//! RSA private key. This module owns key loading ([`SigningKey`]) and token
//! construction ([`issue_token`], [`TokenSigner`]).
//!
//! # Example
//!
//! ```no_run
//! use iotcore_device::auth::{issue_token, SigningKey};
//! use iotcore_device::protocol::DeviceIdentity;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let identity = DeviceIdentity::new("proj", "us-central1", "reg1", "dev1")?;
//! let key = SigningKey::from_pem(&std::fs::read("rsa_private.pem")?)?;
//! let token = issue_token(&identity, &key, 43200, 1_700_000_000)?;
//! assert_eq!(token.claims().aud, "proj");
//! # Ok(())
//! # }
//! ```

pub mod key;
pub mod token;

pub use key::SigningKey;
pub use token::{
    issue_token, Claims, Header, Token, TokenSigner, DEFAULT_EPOCH_FLOOR, DEFAULT_TOKEN_TTL_SECS,
};

use crate::time::Timestamp;
use thiserror::Error;

/// Token signing errors
#[derive(Debug, Error)]
pub enum SignError {
    #[error("Invalid signing key: {0}")]
    InvalidKey(String),
    #[error("Clock not set: now={now} is earlier than the epoch floor {floor}")]
    ClockNotSet { now: Timestamp, floor: Timestamp },
    #[error("Invalid token lifetime: {0} seconds")]
    InvalidTtl(u64),
    #[error("Failed to encode token segment")]
    Encoding(#[source] serde_json::Error),
    #[error("Malformed token: {0}")]
    MalformedToken(String),
}

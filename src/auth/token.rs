//! Compact JWT construction for device authentication
//!
//! A token is `b64(header).b64(claims).b64(signature)` where every segment is
//! base64url without padding, the header is fixed to RS256 and the signature
//! covers the first two encoded segments joined by a dot.

use super::key::SigningKey;
use super::SignError;
use crate::protocol::DeviceIdentity;
use crate::time::Timestamp;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Lowest `now` accepted by default. A zero clock is what an unsynchronized
/// device reports.
pub const DEFAULT_EPOCH_FLOOR: Timestamp = 1;

/// Default token lifetime: 12 hours.
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 43200;

/// Fixed token header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub alg: String,
    pub typ: String,
}

impl Header {
    pub fn rs256() -> Self {
        Self {
            alg: "RS256".to_string(),
            typ: "JWT".to_string(),
        }
    }
}

/// Claim set carried by every device token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Issued at (seconds since epoch)
    pub iat: Timestamp,
    /// Expiration time (seconds since epoch)
    pub exp: Timestamp,
    /// Audience, always the cloud project id
    pub aud: String,
}

/// Signed, immutable device token
#[derive(Clone, PartialEq, Eq)]
pub struct Token {
    encoded: String,
    claims: Claims,
}

impl Token {
    pub fn as_str(&self) -> &str {
        &self.encoded
    }

    pub fn claims(&self) -> &Claims {
        &self.claims
    }

    pub fn issued_at(&self) -> Timestamp {
        self.claims.iat
    }

    pub fn expires_at(&self) -> Timestamp {
        self.claims.exp
    }

    /// True once `now` has reached the expiry time
    pub fn is_stale(&self, now: Timestamp) -> bool {
        now >= self.claims.exp
    }

    /// The three encoded segments: header, claims, signature
    pub fn segments(&self) -> (&str, &str, &str) {
        let mut parts = self.encoded.splitn(3, '.');
        let header = parts.next().unwrap_or_default();
        let claims = parts.next().unwrap_or_default();
        let signature = parts.next().unwrap_or_default();
        (header, claims, signature)
    }

    /// Parse a compact token and decode its claims without verifying it
    pub fn parse(encoded: &str) -> Result<Self, SignError> {
        let parts: Vec<&str> = encoded.split('.').collect();
        if parts.len() != 3 || parts.iter().any(|p| p.is_empty()) {
            return Err(SignError::MalformedToken(
                "token must have 3 non-empty parts separated by dots".to_string(),
            ));
        }

        let claims_json = URL_SAFE_NO_PAD
            .decode(parts[1])
            .map_err(|e| SignError::MalformedToken(format!("claims are not base64url: {e}")))?;
        let claims: Claims = serde_json::from_slice(&claims_json)
            .map_err(|e| SignError::MalformedToken(format!("claims are not valid JSON: {e}")))?;

        Ok(Self {
            encoded: encoded.to_string(),
            claims,
        })
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encoded)
    }
}

// The encoded form is a bearer credential, keep it out of debug output.
impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("claims", &self.claims)
            .finish_non_exhaustive()
    }
}

/// Issue a token with the default epoch floor
pub fn issue_token(
    identity: &DeviceIdentity,
    key: &SigningKey,
    ttl_seconds: u64,
    now: Timestamp,
) -> Result<Token, SignError> {
    issue_token_with_floor(identity, key, ttl_seconds, now, DEFAULT_EPOCH_FLOOR)
}

fn issue_token_with_floor(
    identity: &DeviceIdentity,
    key: &SigningKey,
    ttl_seconds: u64,
    now: Timestamp,
    epoch_floor: Timestamp,
) -> Result<Token, SignError> {
    if now < epoch_floor {
        return Err(SignError::ClockNotSet {
            now,
            floor: epoch_floor,
        });
    }

    let exp = i64::try_from(ttl_seconds)
        .ok()
        .filter(|ttl| *ttl > 0)
        .and_then(|ttl| now.checked_add(ttl))
        .ok_or(SignError::InvalidTtl(ttl_seconds))?;

    let claims = Claims {
        iat: now,
        exp,
        aud: identity.project_id().to_string(),
    };

    let header_segment = encode_segment(&Header::rs256())?;
    let claims_segment = encode_segment(&claims)?;
    let signing_input = format!("{header_segment}.{claims_segment}");
    let signature_segment = key.sign_rs256(signing_input.as_bytes())?;

    debug!(
        iat = claims.iat,
        exp = claims.exp,
        aud = %claims.aud,
        "Issued device token"
    );

    Ok(Token {
        encoded: format!("{signing_input}.{signature_segment}"),
        claims,
    })
}

fn encode_segment<T: Serialize>(value: &T) -> Result<String, SignError> {
    let json = serde_json::to_vec(value).map_err(SignError::Encoding)?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}

/// Token issuer bound to one key, lifetime and epoch floor
#[derive(Debug)]
pub struct TokenSigner {
    key: SigningKey,
    ttl_seconds: u64,
    epoch_floor: Timestamp,
}

impl TokenSigner {
    pub fn new(key: SigningKey, ttl_seconds: u64) -> Self {
        Self {
            key,
            ttl_seconds,
            epoch_floor: DEFAULT_EPOCH_FLOOR,
        }
    }

    /// Reject `now` values below `floor`, e.g. the firmware build date
    pub fn with_epoch_floor(mut self, floor: Timestamp) -> Self {
        self.epoch_floor = floor;
        self
    }

    pub fn ttl_seconds(&self) -> u64 {
        self.ttl_seconds
    }

    pub fn issue(&self, identity: &DeviceIdentity, now: Timestamp) -> Result<Token, SignError> {
        issue_token_with_floor(identity, &self.key, self.ttl_seconds, now, self.epoch_floor)
    }
}

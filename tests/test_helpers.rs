//! Test helpers and utilities for integration tests

use iotcore_device::auth::{SigningKey, TokenSigner};
use iotcore_device::protocol::DeviceIdentity;
use iotcore_device::session::Session;
use iotcore_device::testing::MockTransport;
use iotcore_device::time::{ManualClock, Timestamp};
use std::sync::Arc;

#[allow(dead_code)]
pub const PRIVATE_PEM: &[u8] = include_bytes!("fixtures/rsa_private.pem");

#[allow(dead_code)]
pub const PUBLIC_PEM: &[u8] = include_bytes!("fixtures/rsa_public.pem");

/// Device path prefix of [`test_identity`]
#[allow(dead_code)]
pub const DEVICE_PATH: &str = "projects/proj/locations/us-central1/registries/reg1/devices/dev1";

#[allow(dead_code)]
pub fn test_identity() -> DeviceIdentity {
    DeviceIdentity::new("proj", "us-central1", "reg1", "dev1").unwrap()
}

#[allow(dead_code)]
pub fn test_key() -> SigningKey {
    SigningKey::from_pem(PRIVATE_PEM).unwrap()
}

#[allow(dead_code)]
pub fn test_signer() -> TokenSigner {
    TokenSigner::new(test_key(), 43200)
}

/// Session over `transport` with a manual clock reading `now`
#[allow(dead_code)]
pub fn test_session(transport: MockTransport, now: Timestamp) -> Session<MockTransport> {
    Session::new(
        test_identity(),
        test_signer(),
        transport,
        Arc::new(ManualClock::new(now)),
    )
}

/// Session already connected through an accepting broker
#[allow(dead_code)]
pub async fn connected_session(transport: MockTransport) -> Session<MockTransport> {
    let mut session = test_session(transport, 1000);
    session.reissue_token(1000).unwrap();
    session.connect().await.unwrap();
    session
}

//! Wall-clock synchronization
//!
//! Token timestamps are only meaningful once the device knows the real time.
//! [`TimeSource`] asks a remote time service for it and records the answer in
//! an injectable [`Clock`].

pub mod clock;
pub mod fetch;
pub mod service;

/// Whole seconds since the Unix epoch
pub type Timestamp = i64;

pub use clock::{Clock, ManualClock, SyncedClock};
pub use fetch::{BufferedResponse, FetchError, HttpFetch, HttpResponse, ReqwestFetch, ScopedResponse};
pub use service::{
    build_request_url, parse_time_response, redact_url, NetworkTime, TimeError, TimeServiceCredentials,
    TimeSource, DEFAULT_TIME_SERVICE_URL, TIME_FORMAT,
};

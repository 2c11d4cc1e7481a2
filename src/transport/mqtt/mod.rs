//! rumqttc implementation of the [`Transport`](crate::transport::Transport) trait
//!
//! # Architecture
//!
//! - [`connection`] - Pure endpoint and option configuration
//! - [`message_handler`] - Pure routing of rumqttc events
//! - [`client`] - Impure I/O driving the rumqttc event loop
//!
//! # Usage
//!
//! ```rust,no_run
//! use iotcore_device::transport::mqtt::{BrokerEndpoint, RumqttTransport};
//! use iotcore_device::transport::{ConnectParams, Transport};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let mut transport = RumqttTransport::new(BrokerEndpoint::new("mqtt.googleapis.com", 8883));
//! transport
//!     .connect(&ConnectParams {
//!         client_id: "projects/p/locations/us-central1/registries/r/devices/d".to_string(),
//!         username: "unused".to_string(),
//!         password: "<jwt>".to_string(),
//!         keep_alive: Duration::from_secs(1140),
//!     })
//!     .await?;
//! let events = transport.pump().await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod message_handler;

pub use client::RumqttTransport;
pub use connection::{configure_mqtt_options, connect_return_code, BrokerEndpoint};
pub use message_handler::{route_connection_error, route_mqtt_event, EventRoute};

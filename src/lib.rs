//! Wibeee Local Bridge Library
//!
//! This library polls a Circutor Wibeee energy meter over its local HTTP
//! API, normalizes the vendor XML/JSON dialects into one snapshot shape,
//! and runs a local relay server for device-pushed telemetry with optional
//! forwarding to the vendor cloud.

pub mod config;
pub mod decoder;
pub mod device_client;
pub mod error;
pub mod fetcher;
pub mod polling_loop;
pub mod proxy_registry;
pub mod push_relay;
pub mod scrubber;
pub mod sensor_catalog;

// Re-export commonly used types for easier access
pub use config::BridgeConfig;
pub use decoder::{decode, Snapshot};
pub use device_client::{DeviceClient, DeviceIdentity, Dialect};
pub use error::{BridgeError, Result};
pub use fetcher::RetryingFetcher;
pub use polling_loop::{PollingLoop, SensorSink, SOURCE_POLL, SOURCE_PUSH, UNAVAILABLE};
pub use proxy_registry::{ProxyRegistry, PushHandler, UpstreamPolicy};
pub use push_relay::PushRelay;
pub use sensor_catalog::{Phase, SensorType, StatusElement};

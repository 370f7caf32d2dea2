//! Client for the Wibeee local HTTP API.
//!
//! Discovery is a three-call sequence: fetch the device id, then the four
//! identity variables, then (at poll setup) the first measurement
//! snapshot. The firmware version decides once, at discovery time, which
//! status dialect every later fetch uses.

use std::time::Duration;

use tracing::info;

use crate::decoder::{decode, Snapshot};
use crate::error::{BridgeError, Result};
use crate::fetcher::RetryingFetcher;
use crate::scrubber::scrub_map;

/// First firmware generation that serves `values2.xml`.
const VALUES2_MIN_FIRMWARE: [u32; 3] = [4, 4, 171];

/// Identity variables that must all be present for a device to be usable.
const IDENTITY_VARS: [&str; 4] = ["macAddr", "softVersion", "model", "ipAddr"];

/// Vendor response shape served by a given firmware generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// `/en/status.xml` with `faseN_*` element names.
    LegacyStatus,
    /// `/services/user/values2.xml` with prefixed variable names.
    Values2,
}

/// Immutable identity of a discovered device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// Device ID (usually "WIBEEE").
    pub id: String,
    /// MAC address, 12 lowercase hex chars with colons stripped.
    pub mac: String,
    /// Firmware version string as reported by the device.
    pub firmware_version: String,
    /// Wibeee model (single or 3-phase, etc).
    pub model: String,
    /// IP address as reported by the device.
    pub ip_addr: String,
    /// Dialect derived from the firmware version, fixed for the session.
    pub dialect: Dialect,
}

impl DeviceIdentity {
    /// Display name shown for the device, e.g. "Wibeee 111111".
    pub fn display_name(&self) -> String {
        format!("Wibeee {}", short_mac(&self.mac))
    }
}

/// Strips colons and lowercases a MAC address.
pub fn normalize_mac(mac: &str) -> String {
    mac.replace(':', "").to_lowercase()
}

/// Last 6 chars of the MAC address, uppercased, for display names.
pub fn short_mac(mac: &str) -> String {
    let stripped = mac.replace(':', "");
    stripped[stripped.len().saturating_sub(6)..].to_uppercase()
}

/// Whether a firmware version is at or above the values2 threshold.
/// Compares dot-separated numeric components; exactly 4.4.171 qualifies.
pub fn firmware_uses_values2(version: &str) -> bool {
    let parts: Vec<u32> = version
        .split(|c: char| !c.is_ascii_digit())
        .filter(|part| !part.is_empty())
        .map(|part| part.parse().unwrap_or(0))
        .collect();
    parts.as_slice() >= &VALUES2_MIN_FIRMWARE[..]
}

fn quote_plus(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

/// Talks to one Wibeee device over its local HTTP API.
pub struct DeviceClient {
    host: String,
    fetcher: RetryingFetcher,
}

impl DeviceClient {
    pub fn new(host: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| BridgeError::Config(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            host: host.into(),
            fetcher: RetryingFetcher::new(client, timeout),
        })
    }

    /// Runs the full discovery sequence and returns the device identity.
    /// Any failure here means the device is not ready; the caller owns
    /// retrying setup as a whole.
    pub async fn discover(&self, retries: u32) -> Result<DeviceIdentity> {
        let device_id = self.discover_identity(retries).await?;
        self.discover_capabilities(&device_id, retries).await
    }

    /// Fetches the device id from `devices.xml`.
    pub async fn discover_identity(&self, retries: u32) -> Result<String> {
        let url = format!("http://{}/services/user/devices.xml", self.host);
        let body = self.fetcher.fetch(&url, retries).await?;
        let fields = decode(&body)?;
        fields
            .get("id")
            .filter(|id| !id.is_empty())
            .cloned()
            .ok_or_else(|| BridgeError::IncompleteData("device id missing from devices.xml".into()))
    }

    /// Fetches the four identity variables and builds a [`DeviceIdentity`].
    /// All-or-nothing: partial identity data is treated as absent.
    pub async fn discover_capabilities(&self, device_id: &str, retries: u32) -> Result<DeviceIdentity> {
        let vars: Vec<String> = IDENTITY_VARS
            .iter()
            .map(|name| format!("{}.{}", quote_plus(device_id), name))
            .collect();
        let url = format!(
            "http://{}/services/user/values.xml?var={}",
            self.host,
            vars.join("&")
        );
        let body = self.fetcher.fetch(&url, retries).await?;
        let values = decode(&body)?;

        let missing: Vec<&str> = IDENTITY_VARS
            .iter()
            .copied()
            .filter(|name| values.get(*name).map_or(true, |v| v.is_empty()))
            .collect();
        if !missing.is_empty() {
            return Err(BridgeError::IncompleteData(format!(
                "values.xml missing {}",
                missing.join(", ")
            )));
        }

        let firmware_version = values["softVersion"].clone();
        let dialect = if firmware_uses_values2(&firmware_version) {
            Dialect::Values2
        } else {
            Dialect::LegacyStatus
        };
        let identity = DeviceIdentity {
            id: device_id.to_string(),
            mac: normalize_mac(&values["macAddr"]),
            firmware_version,
            model: values["model"].clone(),
            ip_addr: values["ipAddr"].clone(),
            dialect,
        };
        info!(
            mac = %identity.mac,
            model = %identity.model,
            firmware = %identity.firmware_version,
            dialect = ?identity.dialect,
            "discovered device"
        );
        Ok(identity)
    }

    /// Fetches the current measurement snapshot using the dialect fixed at
    /// discovery time. Values2 responses are scrubbed of Wi-Fi secrets.
    pub async fn fetch_snapshot(&self, identity: &DeviceIdentity, retries: u32) -> Result<Snapshot> {
        match identity.dialect {
            Dialect::LegacyStatus => {
                let url = format!("http://{}/en/status.xml", self.host);
                let body = self.fetcher.fetch(&url, retries).await?;
                decode(&body)
            }
            Dialect::Values2 => {
                let url = format!(
                    "http://{}/services/user/values2.xml?id={}",
                    self.host,
                    quote_plus(&identity.id)
                );
                let body = self.fetcher.fetch(&url, retries).await?;
                let mut values = decode(&body)?;
                scrub_map(&mut values);
                Ok(values)
            }
        }
    }
}

//! Registry of devices that want their push traffic dispatched locally.
//!
//! Owned explicitly by the host wiring and shared by handle with the push
//! relay and each device's setup routine. Mutated only at device
//! setup/teardown, read on every push request.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::decoder::Snapshot;
use crate::device_client::normalize_mac;

/// Where push traffic for a device goes after the local sink has seen it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamPolicy {
    /// No relaying at all; the relay treats the device as unregistered
    /// for forwarding purposes.
    Disabled,
    /// Update local sinks, never contact the cloud.
    LocalOnly,
    /// Update local sinks and forward the original request to this URL.
    Url(String),
}

/// Callback invoked with each push snapshot for a registered device.
pub type PushHandler = Arc<dyn Fn(Snapshot) + Send + Sync>;

#[derive(Clone)]
pub struct ProxyRegistration {
    pub handler: PushHandler,
    pub policy: UpstreamPolicy,
}

/// Table mapping normalized MAC address to push registration. At most one
/// registration per identity; a later registration overwrites.
#[derive(Default)]
pub struct ProxyRegistry {
    entries: RwLock<HashMap<String, ProxyRegistration>>,
}

impl ProxyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, mac: &str, handler: PushHandler, policy: UpstreamPolicy) {
        let mac = normalize_mac(mac);
        debug!(%mac, ?policy, "registering push device");
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(mac, ProxyRegistration { handler, policy });
    }

    /// Removes a registration. Unregistering twice is a no-op.
    pub fn unregister(&self, mac: &str) {
        let mac = normalize_mac(mac);
        debug!(%mac, "unregistering push device");
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(&mac);
    }

    pub fn lookup(&self, mac: &str) -> Option<ProxyRegistration> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(&normalize_mac(mac)).cloned()
    }

    pub fn is_empty(&self) -> bool {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_handler() -> PushHandler {
        Arc::new(|_snapshot| {})
    }

    #[test]
    fn test_lookup_normalizes_mac() {
        let registry = ProxyRegistry::new();
        registry.register("AA:BB:CC:DD:EE:FF", noop_handler(), UpstreamPolicy::LocalOnly);

        assert!(registry.lookup("aabbccddeeff").is_some());
        assert!(registry.lookup("AABBCCDDEEFF").is_some());
        assert!(registry.lookup("112233445566").is_none());
    }

    #[test]
    fn test_later_registration_overwrites() {
        let registry = ProxyRegistry::new();
        registry.register("aabbccddeeff", noop_handler(), UpstreamPolicy::LocalOnly);
        registry.register(
            "aabbccddeeff",
            noop_handler(),
            UpstreamPolicy::Url("http://example.invalid".into()),
        );

        let registration = registry.lookup("aabbccddeeff").unwrap();
        assert_eq!(
            registration.policy,
            UpstreamPolicy::Url("http://example.invalid".into())
        );
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let registry = ProxyRegistry::new();
        registry.register("aabbccddeeff", noop_handler(), UpstreamPolicy::LocalOnly);
        registry.unregister("aabbccddeeff");
        registry.unregister("aabbccddeeff");

        assert!(registry.lookup("aabbccddeeff").is_none());
        assert!(registry.is_empty());
    }
}

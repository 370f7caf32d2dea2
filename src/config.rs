//! Bridge configuration from environment variables.

use std::env;
use std::net::IpAddr;
use std::time::Duration;

use crate::error::{BridgeError, Result};
use crate::proxy_registry::UpstreamPolicy;

pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(15);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_PROXY_PORT: u16 = 8600;
pub const MIN_SCAN_INTERVAL: Duration = Duration::from_secs(1);

/// Cloud ingestion services the relay knows by name.
pub const KNOWN_UPSTREAMS: &[(&str, &str)] = &[
    ("nest", "http://nest-ingest.wibeee.com"),
    ("iberdrola", "http://datosmonitorconsumo.iberdrola.es:8080"),
    ("solarprofit", "http://wdata.solarprofit.es:8080"),
];

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Address of the Wibeee device.
    pub host: String,
    pub scan_interval: Duration,
    pub timeout: Duration,
    /// Where push traffic goes; `Disabled` also disables the relay server.
    pub upstream: UpstreamPolicy,
    pub proxy_port: u16,
    /// Interface the relay binds. Deployments should pick a non-public one.
    pub proxy_bind: IpAddr,
    /// Whether sinks are labeled with MAC-derived unique ids.
    pub unique_ids: bool,
}

impl BridgeConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from a key lookup, so tests can avoid touching
    /// process-global environment state.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let host = get("WIBEEE_HOST")
            .filter(|host| !host.is_empty())
            .ok_or_else(|| BridgeError::Config("WIBEEE_HOST is required".into()))?;

        let scan_interval =
            parse_secs("WIBEEE_SCAN_INTERVAL", get("WIBEEE_SCAN_INTERVAL"), DEFAULT_SCAN_INTERVAL)?
                .max(MIN_SCAN_INTERVAL);
        let timeout = parse_secs("WIBEEE_TIMEOUT", get("WIBEEE_TIMEOUT"), DEFAULT_TIMEOUT)?;

        let upstream = parse_upstream(get("WIBEEE_UPSTREAM").as_deref().unwrap_or("disabled"))?;

        let proxy_port = match get("WIBEEE_PROXY_PORT") {
            None => DEFAULT_PROXY_PORT,
            Some(raw) => raw
                .parse()
                .map_err(|_| BridgeError::Config(format!("invalid WIBEEE_PROXY_PORT: {raw}")))?,
        };
        let proxy_bind: IpAddr = match get("WIBEEE_PROXY_BIND") {
            None => IpAddr::from([0, 0, 0, 0]),
            Some(raw) => raw
                .parse()
                .map_err(|_| BridgeError::Config(format!("invalid WIBEEE_PROXY_BIND: {raw}")))?,
        };
        let unique_ids = get("WIBEEE_UNIQUE_IDS")
            .map(|raw| raw.eq_ignore_ascii_case("true") || raw == "1")
            .unwrap_or(true);

        Ok(Self {
            host,
            scan_interval,
            timeout,
            upstream,
            proxy_port,
            proxy_bind,
            unique_ids,
        })
    }

    /// Per-attempt fetch timeout, capped by the scan interval so a slow
    /// device never causes two overlapping polls.
    pub fn fetch_timeout(&self) -> Duration {
        self.timeout.min(self.scan_interval)
    }
}

fn parse_secs(key: &str, value: Option<String>, default: Duration) -> Result<Duration> {
    match value {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map(Duration::from_secs)
            .map_err(|_| BridgeError::Config(format!("invalid {key}: {raw}"))),
    }
}

/// Parses the upstream choice: `disabled`, `local`, a known cloud name, or
/// a custom URL.
pub fn parse_upstream(value: &str) -> Result<UpstreamPolicy> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("disabled") {
        return Ok(UpstreamPolicy::Disabled);
    }
    if value.eq_ignore_ascii_case("local") {
        return Ok(UpstreamPolicy::LocalOnly);
    }
    if let Some((_, url)) = KNOWN_UPSTREAMS
        .iter()
        .find(|(name, _)| value.eq_ignore_ascii_case(name))
    {
        return Ok(UpstreamPolicy::Url((*url).to_string()));
    }
    if value.starts_with("http://") || value.starts_with("https://") {
        return Ok(UpstreamPolicy::Url(value.trim_end_matches('/').to_string()));
    }
    Err(BridgeError::Config(format!(
        "invalid WIBEEE_UPSTREAM: {value}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<BridgeConfig> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        BridgeConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[("WIBEEE_HOST", "1.2.3.4")]).unwrap();
        assert_eq!(config.host, "1.2.3.4");
        assert_eq!(config.scan_interval, DEFAULT_SCAN_INTERVAL);
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
        assert_eq!(config.upstream, UpstreamPolicy::Disabled);
        assert_eq!(config.proxy_port, DEFAULT_PROXY_PORT);
        assert!(config.unique_ids);
    }

    #[test]
    fn test_host_is_required() {
        assert!(matches!(config_from(&[]), Err(BridgeError::Config(_))));
    }

    #[test]
    fn test_scan_interval_has_a_floor() {
        let config = config_from(&[("WIBEEE_HOST", "h"), ("WIBEEE_SCAN_INTERVAL", "0")]).unwrap();
        assert_eq!(config.scan_interval, MIN_SCAN_INTERVAL);
    }

    #[test]
    fn test_fetch_timeout_is_capped_by_scan_interval() {
        let config = config_from(&[
            ("WIBEEE_HOST", "h"),
            ("WIBEEE_SCAN_INTERVAL", "5"),
            ("WIBEEE_TIMEOUT", "10"),
        ])
        .unwrap();
        assert_eq!(config.fetch_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_parse_upstream_choices() {
        assert_eq!(parse_upstream("disabled").unwrap(), UpstreamPolicy::Disabled);
        assert_eq!(parse_upstream("local").unwrap(), UpstreamPolicy::LocalOnly);
        assert_eq!(
            parse_upstream("nest").unwrap(),
            UpstreamPolicy::Url("http://nest-ingest.wibeee.com".into())
        );
        assert_eq!(
            parse_upstream("iberdrola").unwrap(),
            UpstreamPolicy::Url("http://datosmonitorconsumo.iberdrola.es:8080".into())
        );
        assert_eq!(
            parse_upstream("http://my-cloud.example:8080/").unwrap(),
            UpstreamPolicy::Url("http://my-cloud.example:8080".into())
        );
        assert!(parse_upstream("gopher://nope").is_err());
    }

    #[test]
    fn test_invalid_numbers_are_config_errors() {
        assert!(config_from(&[("WIBEEE_HOST", "h"), ("WIBEEE_SCAN_INTERVAL", "soon")]).is_err());
        assert!(config_from(&[("WIBEEE_HOST", "h"), ("WIBEEE_PROXY_PORT", "eighty")]).is_err());
    }
}

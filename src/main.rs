use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use wibeee_bridge::config::BridgeConfig;
use wibeee_bridge::device_client::DeviceClient;
use wibeee_bridge::polling_loop::{update_sinks, PollingLoop, SensorSink, SOURCE_PUSH};
use wibeee_bridge::proxy_registry::{ProxyRegistry, PushHandler, UpstreamPolicy};
use wibeee_bridge::push_relay::PushRelay;
use wibeee_bridge::sensor_catalog::present_elements;

/// Retries for each discovery call before giving up on setup.
const DISCOVERY_RETRIES: u32 = 5;

/// Stand-in sink that logs every value update. A host platform would
/// register its own entities here instead.
struct LogSink {
    label: String,
}

impl SensorSink for LogSink {
    fn update_value(&self, key: &str, value: &str, source: &str) {
        info!(sensor = %self.label, %key, %value, %source, "sensor updated");
    }

    fn is_enabled(&self) -> bool {
        true
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = BridgeConfig::from_env().context("invalid configuration")?;
    info!(host = %config.host, "starting Wibeee bridge");

    let client = DeviceClient::new(&config.host, config.fetch_timeout())?;
    let identity = client
        .discover(DISCOVERY_RETRIES)
        .await
        .context("Wibeee device not ready")?;

    // First fetch is fail-fast: a device that cannot produce a snapshot
    // now is not ready to be set up.
    let (mut polling, first_snapshot) =
        PollingLoop::initialize(client, identity.clone(), config.scan_interval)
            .await
            .context("first status fetch failed")?;

    // The sensor set is fixed by what the device reported this first time.
    let elements = present_elements(&identity, &first_snapshot);
    info!(sensors = elements.len(), device = %identity.display_name(), "sensor set derived");

    let mut push_sinks: Vec<(String, Arc<dyn SensorSink>)> = Vec::new();
    for element in &elements {
        let label = if config.unique_ids {
            element.unique_id(&identity.mac)
        } else {
            format!("{} {}", identity.display_name(), element.name())
        };
        let sink: Arc<dyn SensorSink> = Arc::new(LogSink { label });
        polling.add_sink(element.key.clone(), sink.clone());
        if let Some(push_key) = element.sensor.push_key(element.phase) {
            push_sinks.push((push_key, sink));
        }
    }
    polling.distribute(&first_snapshot);

    // The relay only runs when some device wants push data.
    let registry = Arc::new(ProxyRegistry::new());
    let relay = match &config.upstream {
        UpstreamPolicy::Disabled => None,
        policy => {
            let handler: PushHandler =
                Arc::new(move |snapshot| update_sinks(&push_sinks, &snapshot, SOURCE_PUSH));
            registry.register(&identity.mac, handler, policy.clone());
            let bind = SocketAddr::new(config.proxy_bind, config.proxy_port);
            Some(PushRelay::start(registry.clone(), bind).await?)
        }
    };

    let poll_task = polling.spawn();

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutting down");

    // Teardown in reverse acquisition order; every step is idempotent.
    poll_task.abort();
    if let Some(relay) = &relay {
        relay.shutdown();
    }
    registry.unregister(&identity.mac);

    Ok(())
}

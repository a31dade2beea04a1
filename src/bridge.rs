//! Republishes the snapshot cache to the MQTT broker.

use crate::config::MqttConfig;
use crate::discovery::{self, DiscoveryDescriptor};
use crate::error::{AppError, Result};
use crate::mqtt::{AsyncClient, LinkState, LinkStatus, QoS};
use crate::snapshot::Snapshot;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Destination for broker writes.
pub trait BrokerSink: Send + Sync {
    fn publish(
        &self,
        topic: &str,
        retain: bool,
        payload: Vec<u8>,
    ) -> impl Future<Output = Result<()>> + Send;
}

pub struct MqttSink {
    client: AsyncClient,
    qos: QoS,
}

impl MqttSink {
    pub fn new(client: AsyncClient, qos: QoS) -> Self {
        Self { client, qos }
    }
}

impl BrokerSink for MqttSink {
    async fn publish(&self, topic: &str, retain: bool, payload: Vec<u8>) -> Result<()> {
        self.client
            .publish(topic, self.qos, retain, payload)
            .await
            .map_err(|e| AppError::Broker(e.to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct BridgeSettings {
    pub state_topic: String,
    /// Discovery prefix and the descriptors registered under it; `None` disables discovery.
    pub discovery: Option<(String, Vec<DiscoveryDescriptor>)>,
    /// Pause after every broker write.
    pub pause: Duration,
}

impl BridgeSettings {
    pub fn from_config(cfg: &MqttConfig) -> Self {
        let discovery = cfg.discovery_prefix().map(|prefix| {
            (
                prefix.to_string(),
                discovery::descriptors(&cfg.address, &cfg.state_topic),
            )
        });
        Self {
            state_topic: cfg.state_topic.clone(),
            discovery,
            pause: Duration::from_millis(cfg.publish_pause_ms),
        }
    }
}

pub struct PublishBridge<S> {
    sink: S,
    settings: BridgeSettings,
    registered_epoch: Option<u64>,
}

impl<S: BrokerSink> PublishBridge<S> {
    pub fn new(sink: S, settings: BridgeSettings) -> Self {
        Self {
            sink,
            settings,
            registered_epoch: None,
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// React to a link status change; registers discovery once per connection.
    /// Returns the number of descriptors published.
    pub async fn on_link(&mut self, status: LinkStatus) -> usize {
        if status.state != LinkState::Connected || self.registered_epoch == Some(status.epoch) {
            return 0;
        }
        self.registered_epoch = Some(status.epoch);

        let Some((prefix, descriptors)) = &self.settings.discovery else {
            return 0;
        };
        let mut published = 0;
        for (index, descriptor) in descriptors.iter().enumerate() {
            let topic = discovery::config_topic(prefix, descriptor);
            let payload = match serde_json::to_vec(descriptor) {
                Ok(p) => p,
                Err(e) => {
                    warn!(topic = %topic, error = %e, "failed to encode discovery descriptor");
                    continue;
                }
            };
            info!(
                topic = %topic,
                index,
                payload = %String::from_utf8_lossy(&payload),
                "registering sensor"
            );
            match self.sink.publish(&topic, true, payload).await {
                Ok(()) => published += 1,
                Err(e) => warn!(topic = %topic, error = %e, "discovery registration failed"),
            }
            self.pace().await;
        }
        published
    }

    /// Publish a snapshot if it passes the validity filter.
    pub async fn publish_snapshot(&self, snapshot: &Snapshot) -> bool {
        if !snapshot.reading.is_publishable() {
            debug!(
                instant_power = %snapshot.reading.instant_power,
                life_meter = %snapshot.reading.life_meter,
                "reading below publish threshold; skipping"
            );
            return false;
        }
        let payload = match serde_json::to_vec(&snapshot.reading) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "failed to encode reading");
                return false;
            }
        };
        info!(
            topic = %self.settings.state_topic,
            payload = %String::from_utf8_lossy(&payload),
            "publishing reading"
        );
        let ok = match self
            .sink
            .publish(&self.settings.state_topic, false, payload)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(topic = %self.settings.state_topic, error = %e, "publish failed");
                false
            }
        };
        self.pace().await;
        ok
    }

    async fn pace(&self) {
        if !self.settings.pause.is_zero() {
            tokio::time::sleep(self.settings.pause).await;
        }
    }

    /// Serve link changes and snapshot updates until either channel closes.
    pub async fn run(
        mut self,
        mut snapshots: watch::Receiver<Arc<Snapshot>>,
        mut links: watch::Receiver<LinkStatus>,
    ) {
        let initial = *links.borrow_and_update();
        self.on_link(initial).await;

        loop {
            tokio::select! {
                changed = links.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let status = *links.borrow_and_update();
                    self.on_link(status).await;
                }
                changed = snapshots.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let snapshot = snapshots.borrow_and_update().clone();
                    self.publish_snapshot(&snapshot).await;
                }
            }
        }
        info!("publish bridge stopped");
    }
}

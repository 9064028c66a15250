//! Telemetry publishing over MQTT.
//!
//! Fire-and-forget: QoS 0, nothing retained, nothing queued while the
//! broker is unreachable.  The rumqttc event loop runs on its own task and
//! handles reconnection; publishes are skipped until it reports a ConnAck.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

pub trait Publisher {
    fn publish(&mut self, topic: &str, payload: &str) -> Result<()>;
}

pub struct MqttPublisher {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    event_loop: JoinHandle<()>,
}

impl MqttPublisher {
    /// Must be called from inside the runtime.
    pub fn start(host: &str, port: u16, client_id: &str) -> Self {
        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(Duration::from_secs(30));

        let (client, mut eventloop) = AsyncClient::new(options, 20);
        let connected = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&connected);
        let host = host.to_string();
        let event_loop = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!(%host, port, "mqtt connected");
                        flag.store(true, Ordering::Relaxed);
                    }
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        warn!("mqtt disconnected");
                        flag.store(false, Ordering::Relaxed);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        if flag.swap(false, Ordering::Relaxed) {
                            warn!(error = %e, "mqtt connection lost");
                        } else {
                            debug!(error = %e, "mqtt still unreachable");
                        }
                        sleep(Duration::from_secs(2)).await;
                    }
                }
            }
        });

        Self {
            client,
            connected,
            event_loop,
        }
    }
}

impl Publisher for MqttPublisher {
    fn publish(&mut self, topic: &str, payload: &str) -> Result<()> {
        if !self.connected.load(Ordering::Relaxed) {
            bail!("not connected");
        }
        self.client
            .try_publish(topic, QoS::AtMostOnce, false, payload.as_bytes().to_vec())?;
        Ok(())
    }
}

impl Drop for MqttPublisher {
    fn drop(&mut self) {
        self.event_loop.abort();
    }
}

/// Publish every pair, dropping failures with one warning per call.
/// Returns how many went out.
pub fn publish_all(publisher: &mut dyn Publisher, messages: &[(String, String)]) -> usize {
    let mut sent = 0;
    let mut first_error = None;
    for (topic, payload) in messages {
        match publisher.publish(topic, payload) {
            Ok(()) => sent += 1,
            Err(e) => {
                debug!(%topic, error = %e, "publish skipped");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
    }
    if let Some(e) = first_error {
        warn!(
            skipped = messages.len() - sent,
            total = messages.len(),
            error = %e,
            "broker: publish failed"
        );
    }
    sent
}

// ===========================================================================
// Tests
// ===========================================================================

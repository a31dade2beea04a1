use crate::config::MqttConfig;
use crate::error::{AppError, Result};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use rumqttc::{Event, Packet, Transport};

// Re-export types so the rest of the code can use these names
pub type MqttOptions = rumqttc::MqttOptions;
pub type AsyncClient = rumqttc::AsyncClient;
pub type EventLoop = rumqttc::EventLoop;
pub type QoS = rumqttc::QoS;

pub fn build_options(cfg: &MqttConfig) -> MqttOptions {
    let mut opts = MqttOptions::new(cfg.client_id.clone(), cfg.host.clone(), cfg.port);
    opts.set_keep_alive(Duration::from_secs(cfg.keep_alive_secs));
    opts.set_clean_session(true);
    if let (Some(u), Some(p)) = (&cfg.username, &cfg.password) {
        opts.set_credentials(u.clone(), p.clone());
    }
    if cfg.port == 8883 {
        opts.set_transport(Transport::tls_with_default_config());
    }
    opts
}

pub fn qos(v: u8) -> QoS {
    match v {
        2 => QoS::ExactlyOnce,
        1 => QoS::AtLeastOnce,
        _ => QoS::AtMostOnce,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

/// Broker link state; `epoch` counts connection establishments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkStatus {
    pub state: LinkState,
    pub epoch: u64,
}

impl LinkStatus {
    pub fn connected(epoch: u64) -> Self {
        Self {
            state: LinkState::Connected,
            epoch,
        }
    }
}

/// Exponential reconnect delay, doubling from `initial` up to `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    next: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.min(max);
        Self {
            initial,
            max,
            next: initial,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.next = self.initial;
    }
}

/// Create the client and wait for the broker's ConnAck.
///
/// Failure here is fatal to the caller; later losses are handled by [`supervise`].
pub async fn connect(opts: MqttOptions, timeout: Duration) -> Result<(AsyncClient, EventLoop)> {
    let (client, mut eventloop) = AsyncClient::new(opts, 50);
    let handshake = async {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
                Ok(_) => continue,
                Err(e) => return Err(AppError::Broker(e.to_string())),
            }
        }
    };
    tokio::time::timeout(timeout, handshake)
        .await
        .map_err(|_| AppError::Broker(format!("no ConnAck within {}s", timeout.as_secs())))??;
    Ok((client, eventloop))
}

/// Drive the event loop for the life of the process, reconnecting with backoff.
///
/// Starts from the already-connected `status` handed out by [`connect`].
pub async fn supervise(
    mut eventloop: EventLoop,
    status: watch::Sender<LinkStatus>,
    mut backoff: Backoff,
) {
    let mut epoch = status.borrow().epoch;
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                backoff.reset();
                epoch += 1;
                info!(epoch, "MQTT connected");
                status.send_replace(LinkStatus::connected(epoch));
            }
            Ok(_) => {}
            Err(e) => {
                let delay = backoff.next_delay();
                warn!("mqtt error: {e}; reconnecting in {}s", delay.as_secs_f32());
                status.send_replace(LinkStatus {
                    state: LinkState::Disconnected,
                    epoch,
                });
                tokio::time::sleep(delay).await;
                status.send_replace(LinkStatus {
                    state: LinkState::Connecting,
                    epoch,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::oneshot;

    const CONNACK: [u8; 4] = [0x20, 0x02, 0x00, 0x00];

    async fn read_connect(stream: &mut TcpStream) {
        let mut buf = [0u8; 256];
        let n = stream.read(&mut buf).await.unwrap();
        assert!(n > 0);
        assert_eq!(buf[0] >> 4, 1, "expected CONNECT");
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut b = Backoff::new(Duration::from_secs(1), Duration::from_secs(10));
        let delays: Vec<u64> = (0..6).map(|_| b.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 10, 10]);
    }

    #[test]
    fn test_backoff_reset() {
        let mut b = Backoff::new(Duration::from_secs(1), Duration::from_secs(10));
        b.next_delay();
        b.next_delay();
        b.reset();
        assert_eq!(b.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_backoff_initial_above_max_is_clamped() {
        let mut b = Backoff::new(Duration::from_secs(30), Duration::from_secs(10));
        assert_eq!(b.next_delay(), Duration::from_secs(10));
    }

    #[test]
    fn test_qos_mapping() {
        assert_eq!(qos(0), QoS::AtMostOnce);
        assert_eq!(qos(1), QoS::AtLeastOnce);
        assert_eq!(qos(2), QoS::ExactlyOnce);
        assert_eq!(qos(9), QoS::AtMostOnce);
    }

    #[test]
    fn test_build_options() {
        let cfg: MqttConfig =
            serde_yaml::from_str("host: broker\nusername: u\npassword: p").unwrap();
        let opts = build_options(&cfg);
        assert_eq!(opts.broker_address(), ("broker".to_string(), 1883));
        assert_eq!(opts.keep_alive(), Duration::from_secs(10));
        assert!(opts.clean_session());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_supervise_reconnects_with_new_epoch() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (drop_first_tx, drop_first_rx) = oneshot::channel::<()>();
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let broker = tokio::spawn(async move {
            let (mut first, _) = listener.accept().await.unwrap();
            read_connect(&mut first).await;
            first.write_all(&CONNACK).await.unwrap();
            drop_first_rx.await.unwrap();
            drop(first);

            let (mut second, _) = listener.accept().await.unwrap();
            read_connect(&mut second).await;
            release_rx.await.unwrap();
            second.write_all(&CONNACK).await.unwrap();
            std::future::pending::<()>().await;
        });

        let mut opts = MqttOptions::new("solaros-test", "127.0.0.1", port);
        opts.set_keep_alive(Duration::from_secs(60));
        let (_client, eventloop) = connect(opts, Duration::from_secs(5)).await.unwrap();

        let (tx, mut rx) = watch::channel(LinkStatus::connected(1));
        let backoff = Backoff::new(Duration::from_millis(300), Duration::from_millis(300));
        let supervisor = tokio::spawn(supervise(eventloop, tx, backoff));
        drop_first_tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(10), async {
            let status = *rx
                .wait_for(|s| s.state == LinkState::Disconnected)
                .await
                .unwrap();
            assert_eq!(status.epoch, 1);

            let status = *rx
                .wait_for(|s| s.state == LinkState::Connecting)
                .await
                .unwrap();
            assert_eq!(status.epoch, 1);

            release_tx.send(()).unwrap();
            let status = *rx
                .wait_for(|s| s.state == LinkState::Connected)
                .await
                .unwrap();
            assert_eq!(status, LinkStatus::connected(2));
        })
        .await
        .expect("supervisor did not reconnect");

        supervisor.abort();
        broker.abort();
    }
}

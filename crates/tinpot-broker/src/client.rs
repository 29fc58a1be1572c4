//! Connected MQTT client with acknowledgment tracking.

use crate::error::BrokerError;
use crate::router::{MessageHandler, Router};
use parking_lot::Mutex;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// How long to wait for a broker acknowledgment before giving up.
const ACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause between reconnection attempts after a connection error.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Capacity of the client's outgoing request queue.
const REQUEST_CAPACITY: usize = 128;

/// Hook invoked (on a fresh task) after every successful connect,
/// including reconnects. Announce-and-subscribe logic lives here.
pub type ConnectHook =
    Arc<dyn Fn(BrokerClient) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Broker acks are delivered in request order on a single connection,
/// so pending waiters are matched FIFO per packet kind.
#[derive(Default)]
struct AckQueues {
    suback: Mutex<VecDeque<oneshot::Sender<()>>>,
    unsuback: Mutex<VecDeque<oneshot::Sender<()>>>,
    puback: Mutex<VecDeque<oneshot::Sender<()>>>,
}

impl AckQueues {
    fn complete(queue: &Mutex<VecDeque<oneshot::Sender<()>>>) {
        if let Some(tx) = queue.lock().pop_front() {
            let _ = tx.send(());
        }
    }

    /// Drops every pending waiter; their receivers observe
    /// [`BrokerError::ConnectionLost`].
    fn fail_all(&self) {
        self.suback.lock().clear();
        self.unsuback.lock().clear();
        self.puback.lock().clear();
    }
}

/// Shared MQTT client used by both sides of the dispatch plane.
///
/// Cloning is cheap; all clones share one connection, one router and
/// one driver task. Connections use a clean session: the connect hook
/// is responsible for re-issuing subscriptions after a reconnect, and
/// retained announcements replay on resubscribe.
#[derive(Clone)]
pub struct BrokerClient {
    client: AsyncClient,
    router: Arc<Router>,
    connected: Arc<AtomicBool>,
    acks: Arc<AckQueues>,
}

impl BrokerClient {
    /// Connects to `url` and spawns the event-loop driver task.
    ///
    /// `on_connect` runs after every `CONNACK`. The returned client is
    /// usable immediately; operations issued before the connection is
    /// up are queued by the underlying client.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::InvalidUrl`] if `url` cannot be parsed.
    pub fn connect(
        url: &str,
        client_id: &str,
        on_connect: ConnectHook,
    ) -> Result<Self, BrokerError> {
        let (host, port) = parse_url(url)?;

        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(Duration::from_secs(30));
        options.set_clean_session(true);

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);

        let broker = Self {
            client,
            router: Arc::new(Router::new()),
            connected: Arc::new(AtomicBool::new(false)),
            acks: Arc::new(AckQueues::default()),
        };

        tokio::spawn(drive(eventloop, broker.clone(), on_connect));
        Ok(broker)
    }

    /// Returns whether the underlying connection is currently up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Publishes `payload` on `topic`.
    ///
    /// QoS 1 publishes resolve once the broker has sent `PUBACK`;
    /// QoS 0 resolves as soon as the request is queued.
    ///
    /// # Errors
    ///
    /// Returns an error if the request queue is full, the ack times
    /// out, or the connection drops while waiting.
    pub async fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retain: bool,
        payload: Vec<u8>,
    ) -> Result<(), BrokerError> {
        if matches!(qos, QoS::AtMostOnce) {
            return self
                .client
                .try_publish(topic, qos, retain, payload)
                .map_err(|e| BrokerError::Request(e.to_string()));
        }

        // Enqueue the waiter under the same lock as the request so the
        // FIFO pairing with incoming PUBACKs cannot be reordered by a
        // concurrent publish.
        let rx = {
            let mut queue = self.acks.puback.lock();
            self.client
                .try_publish(topic, qos, retain, payload)
                .map_err(|e| BrokerError::Request(e.to_string()))?;
            let (tx, rx) = oneshot::channel();
            queue.push_back(tx);
            rx
        };

        wait_ack(rx, "puback").await
    }

    /// Subscribes to `filter` and routes matching publishes to
    /// `handler`, resolving once the broker has sent `SUBACK`.
    ///
    /// The handler runs on the event-loop task: decode and enqueue,
    /// never block. Retained messages on matching topics arrive
    /// immediately after the ack.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be queued or the ack
    /// times out.
    pub async fn subscribe(
        &self,
        filter: &str,
        qos: QoS,
        handler: MessageHandler,
    ) -> Result<(), BrokerError> {
        // Route before subscribing so retained replays cannot race the
        // handler registration.
        self.router.insert(filter, handler);

        let rx = {
            let mut queue = self.acks.suback.lock();
            if let Err(e) = self.client.try_subscribe(filter, qos) {
                self.router.remove(filter);
                return Err(BrokerError::Request(e.to_string()));
            }
            let (tx, rx) = oneshot::channel();
            queue.push_back(tx);
            rx
        };

        wait_ack(rx, "suback").await
    }

    /// Unsubscribes from each filter and drops its handler.
    ///
    /// # Errors
    ///
    /// Returns the first request or ack failure; handlers are removed
    /// regardless so no further messages are dispatched locally.
    pub async fn unsubscribe(&self, filters: &[&str]) -> Result<(), BrokerError> {
        for filter in filters {
            self.router.remove(filter);
        }

        let mut pending = Vec::with_capacity(filters.len());
        {
            let mut queue = self.acks.unsuback.lock();
            for filter in filters {
                self.client
                    .try_unsubscribe(*filter)
                    .map_err(|e| BrokerError::Request(e.to_string()))?;
                let (tx, rx) = oneshot::channel();
                queue.push_back(tx);
                pending.push(rx);
            }
        }

        for rx in pending {
            wait_ack(rx, "unsuback").await?;
        }
        Ok(())
    }

    /// Sends a clean `DISCONNECT` to the broker.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be queued.
    pub async fn disconnect(&self) -> Result<(), BrokerError> {
        self.client
            .disconnect()
            .await
            .map_err(|e| BrokerError::Request(e.to_string()))
    }
}

async fn wait_ack(rx: oneshot::Receiver<()>, what: &'static str) -> Result<(), BrokerError> {
    match tokio::time::timeout(ACK_TIMEOUT, rx).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(_)) => Err(BrokerError::ConnectionLost),
        Err(_) => Err(BrokerError::AckTimeout(what)),
    }
}

/// Event-loop driver: routes publishes, completes ack waiters, tracks
/// connectivity, and re-enters the loop after errors (rumqttc
/// reconnects on the next poll).
async fn drive(mut eventloop: EventLoop, broker: BrokerClient, on_connect: ConnectHook) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(packet)) => match packet {
                Packet::ConnAck(_) => {
                    broker.connected.store(true, Ordering::Release);
                    info!("connected to broker");
                    // Run the hook on its own task: it subscribes and
                    // publishes, which needs this loop to keep polling.
                    tokio::spawn(on_connect(broker.clone()));
                }
                Packet::Publish(publish) => {
                    let routed = broker.router.dispatch(&publish.topic, &publish.payload);
                    if routed == 0 {
                        debug!(topic = %publish.topic, "publish with no matching handler");
                    }
                }
                Packet::SubAck(_) => AckQueues::complete(&broker.acks.suback),
                Packet::UnsubAck(_) => AckQueues::complete(&broker.acks.unsuback),
                Packet::PubAck(_) => AckQueues::complete(&broker.acks.puback),
                _ => {}
            },
            Ok(Event::Outgoing(_)) => {}
            Err(e) => {
                if broker.connected.swap(false, Ordering::AcqRel) {
                    warn!(error = %e, "broker connection lost, reconnecting");
                } else {
                    debug!(error = %e, "broker reconnect attempt failed");
                }
                broker.acks.fail_all();
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}

/// Parses `tcp://host:port` style broker URLs.
///
/// The scheme is optional and only `tcp`/`mqtt` are accepted; the port
/// defaults to 1883.
fn parse_url(url: &str) -> Result<(String, u16), BrokerError> {
    let rest = match url.split_once("://") {
        Some(("tcp" | "mqtt", rest)) => rest,
        Some((scheme, _)) => {
            return Err(BrokerError::InvalidUrl(format!(
                "unsupported scheme '{scheme}' in {url}"
            )))
        }
        None => url,
    };

    if rest.is_empty() {
        return Err(BrokerError::InvalidUrl(url.to_string()));
    }

    match rest.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| BrokerError::InvalidUrl(format!("bad port in {url}")))?;
            Ok((host.to_string(), port))
        }
        None => Ok((rest.to_string(), 1883)),
    }
}

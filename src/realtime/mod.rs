//! The single realtime connection to the backend.
//!
//! The channel remembers which rooms it was asked to join and re-joins them
//! after every transport-level reconnect, so callers never re-issue joins
//! themselves. Inbound envelopes are handed to registered listeners in arrival
//! order; the channel never touches ride state itself.

pub mod events;
pub mod listeners;
pub mod transport;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, error, info, warn};

use crate::models::chat::Sender;
use crate::observability::metrics::Metrics;
use crate::session::SessionStore;

use events::{Envelope, LocationPing, OutgoingChat, RoomRequest};
use listeners::{Handler, ListenerId, ListenerRegistry};
use transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    Disconnected,
}

/// Delay before reconnect attempt `n` is `initial_delay * 2^(n-1)`, capped at
/// `max_delay`. `max_attempts` bounds consecutive failures.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            max_attempts: Some(5),
        }
    }
}

impl ReconnectPolicy {
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 {
            return Some(Duration::ZERO);
        }
        if self.max_attempts.is_some_and(|max| attempt > max) {
            return None;
        }
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1).min(16));
        Some(self.initial_delay.saturating_mul(factor).min(self.max_delay))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomMembership {
    pub driver: Option<String>,
    pub ride: Option<String>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    session: Arc<dyn SessionStore>,
    policy: ReconnectPolicy,
    listeners: ListenerRegistry,
    rooms: Mutex<RoomMembership>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Envelope>>>,
    connected: AtomicBool,
    events_tx: broadcast::Sender<ConnectionEvent>,
    metrics: Metrics,
}

pub struct RealtimeChannel {
    inner: Arc<Inner>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl RealtimeChannel {
    pub fn new(
        transport: Arc<dyn Transport>,
        session: Arc<dyn SessionStore>,
        policy: ReconnectPolicy,
        event_buffer_size: usize,
        metrics: Metrics,
    ) -> Self {
        let (events_tx, _unused_rx) = broadcast::channel(event_buffer_size.max(1));

        Self {
            inner: Arc::new(Inner {
                transport,
                session,
                policy,
                listeners: ListenerRegistry::new(),
                rooms: Mutex::new(RoomMembership::default()),
                outbound: Mutex::new(None),
                connected: AtomicBool::new(false),
                events_tx,
                metrics,
            }),
            supervisor: Mutex::new(None),
        }
    }

    /// Starts the connection supervisor. Returns `false` without any attempt
    /// when no credential is stored.
    pub fn connect(&self) -> bool {
        let Some(token) = self.inner.session.token() else {
            info!("no stored credential; realtime channel not started");
            return false;
        };

        let mut supervisor = self.supervisor.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = supervisor.take() {
            previous.abort();
            self.inner.drop_link();
        }
        *supervisor = Some(tokio::spawn(supervise(self.inner.clone(), token)));
        true
    }

    /// Tears the channel down and forgets listeners and remembered rooms.
    pub fn disconnect(&self) {
        if let Some(handle) = self
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
        self.inner.drop_link();
        self.inner.listeners.clear();
        *self.inner.rooms() = RoomMembership::default();
        info!("realtime channel closed");
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    pub fn connection_events(&self) -> impl Stream<Item = ConnectionEvent> + Send + Unpin + use<> {
        BroadcastStream::new(self.inner.events_tx.subscribe()).filter_map(|event| event.ok())
    }

    pub fn rooms(&self) -> RoomMembership {
        self.inner.rooms().clone()
    }

    pub fn join_driver_room(&self, driver_id: &str) {
        self.inner.rooms().driver = Some(driver_id.to_string());
        self.inner.emit(events::JOIN_DRIVER, json!(driver_id));
    }

    pub fn join_ride_room(&self, ride_id: &str) {
        self.inner.rooms().ride = Some(ride_id.to_string());
        self.inner
            .emit(events::JOIN_RIDE_ROOM, to_value(&RoomRequest { trip_id: ride_id }));
    }

    pub fn leave_ride_room(&self, ride_id: &str) {
        {
            let mut rooms = self.inner.rooms();
            if rooms.ride.as_deref() == Some(ride_id) {
                rooms.ride = None;
            }
        }
        self.inner
            .emit(events::LEAVE_RIDE_ROOM, to_value(&RoomRequest { trip_id: ride_id }));
    }

    /// Best effort: dropped when not connected.
    pub fn emit(&self, event: &str, payload: Value) -> bool {
        self.inner.emit(event, payload)
    }

    pub fn update_location(&self, driver_id: &str, lat: f64, lng: f64) -> bool {
        self.inner.emit(
            events::UPDATE_LOCATION,
            to_value(&LocationPing { driver_id, lat, lng }),
        )
    }

    pub fn send_chat(&self, ride_id: &str, sender: Sender, text: &str, client_id: &str) -> bool {
        self.inner.emit(
            events::SEND_MESSAGE,
            to_value(&OutgoingChat {
                trip_id: ride_id,
                sender: sender.as_str(),
                text,
                client_id,
            }),
        )
    }

    pub fn on<F>(&self, event: &str, handler: F) -> ListenerId
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.inner.listeners.register(event, Arc::new(handler))
    }

    /// Registers a handler that receives the payload decoded as `T`.
    /// Payloads that fail to decode are logged and skipped.
    pub fn on_typed<T, F>(&self, event: &str, handler: F) -> ListenerId
    where
        T: DeserializeOwned + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        let name = event.to_string();
        let handler: Handler = Arc::new(move |payload: &Value| {
            match serde_json::from_value::<T>(payload.clone()) {
                Ok(decoded) => handler(decoded),
                Err(err) => warn!(event = %name, error = %err, "undecodable realtime payload"),
            }
        });
        self.inner.listeners.register(event, handler)
    }

    pub fn off(&self, event: &str, id: ListenerId) -> bool {
        self.inner.listeners.unregister(event, id)
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.inner.listeners.len(event)
    }

    /// Hands one inbound envelope to its listeners.
    pub fn deliver(&self, envelope: &Envelope) -> usize {
        self.inner.deliver(envelope)
    }
}

impl Drop for RealtimeChannel {
    fn drop(&mut self) {
        if let Some(handle) = self
            .supervisor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

impl Inner {
    fn rooms(&self) -> std::sync::MutexGuard<'_, RoomMembership> {
        self.rooms.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: &str, payload: Value) -> bool {
        let outbound = self.outbound.lock().unwrap_or_else(PoisonError::into_inner);
        match outbound.as_ref() {
            Some(tx) if self.connected.load(Ordering::SeqCst) => {
                tx.send(Envelope::new(event, payload)).is_ok()
            }
            _ => {
                debug!(event, "not connected; dropping outbound event");
                false
            }
        }
    }

    fn deliver(&self, envelope: &Envelope) -> usize {
        self.metrics
            .realtime_events_total
            .with_label_values(&[envelope.event.as_str()])
            .inc();
        let handled = self.listeners.dispatch(&envelope.event, &envelope.data);
        if handled == 0 {
            debug!(event = %envelope.event, "no listener for realtime event");
        }
        handled
    }

    fn on_connected(&self, outbound: mpsc::UnboundedSender<Envelope>) {
        *self.outbound.lock().unwrap_or_else(PoisonError::into_inner) = Some(outbound);
        self.connected.store(true, Ordering::SeqCst);
        info!("realtime channel connected");

        let rooms = self.rooms().clone();
        if let Some(driver_id) = rooms.driver.as_deref() {
            self.emit(events::JOIN_DRIVER, json!(driver_id));
        }
        if let Some(ride_id) = rooms.ride.as_deref() {
            self.emit(events::JOIN_RIDE_ROOM, to_value(&RoomRequest { trip_id: ride_id }));
        }
        debug!(?rooms, "room membership restored");

        let _ = self.events_tx.send(ConnectionEvent::Connected);
    }

    fn on_disconnected(&self) {
        let was_connected = self.connected.swap(false, Ordering::SeqCst);
        self.outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if was_connected {
            warn!("realtime channel disconnected");
            let _ = self.events_tx.send(ConnectionEvent::Disconnected);
        }
    }

    fn drop_link(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

async fn supervise(inner: Arc<Inner>, token: String) {
    let mut attempt: u32 = 0;

    loop {
        match inner.transport.open(&token).await {
            Ok(mut link) => {
                if attempt > 0 {
                    inner.metrics.reconnects_total.inc();
                }
                attempt = 0;
                inner.on_connected(link.outbound.clone());
                drop(link.outbound);

                while let Some(envelope) = link.inbound.recv().await {
                    inner.deliver(&envelope);
                }
                inner.on_disconnected();
            }
            Err(err) => {
                warn!(error = %err, attempt, "realtime connection attempt failed");
            }
        }

        attempt += 1;
        match inner.policy.delay_for(attempt) {
            Some(delay) => sleep(delay).await,
            None => {
                error!(attempts = attempt - 1, "giving up on realtime reconnection");
                break;
            }
        }
    }
}

fn to_value<T: Serialize>(payload: &T) -> Value {
    serde_json::to_value(payload).unwrap_or(Value::Null)
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use super::events::Envelope;
    use super::transport::{Link, Transport};
    use crate::error::{ClientError, ClientResult};

    /// Server side of an in-memory link.
    pub struct ServerEnd {
        pub received: mpsc::UnboundedReceiver<Envelope>,
        pub push: mpsc::UnboundedSender<Envelope>,
    }

    /// Hands out prepared links in order; fails when none are queued.
    #[derive(Default)]
    pub struct MemoryTransport {
        links: Mutex<VecDeque<Link>>,
    }

    impl MemoryTransport {
        pub fn prepare(&self) -> ServerEnd {
            let (client_out, server_in) = mpsc::unbounded_channel();
            let (server_out, client_in) = mpsc::unbounded_channel();
            self.links.lock().unwrap().push_back(Link {
                outbound: client_out,
                inbound: client_in,
            });
            ServerEnd {
                received: server_in,
                push: server_out,
            }
        }
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        async fn open(&self, _token: &str) -> ClientResult<Link> {
            self.links
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| ClientError::Network("connection refused".to_string()))
        }
    }
}

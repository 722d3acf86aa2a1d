//! Warns the driver when a ride outlives a realtime disconnect, and applies
//! backend cancellations caused by prolonged connection loss.

use std::future::pending;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::time::{Sleep, sleep};
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, info, warn};

use crate::alerts::{Alert, AlertCenter, AlertKind};
use crate::engine::store::StoreHandle;
use crate::models::ride::HistoryStatus;
use crate::observability::metrics::Metrics;
use crate::realtime::events::{self, RideCancelled};
use crate::realtime::listeners::ListenerId;
use crate::realtime::{ConnectionEvent, RealtimeChannel};

pub struct ConnectionWatchdog {
    store: StoreHandle,
    alerts: Arc<AlertCenter>,
    grace: Duration,
    metrics: Metrics,
}

impl ConnectionWatchdog {
    pub fn new(
        store: StoreHandle,
        alerts: Arc<AlertCenter>,
        grace: Duration,
        metrics: Metrics,
    ) -> Self {
        Self {
            store,
            alerts,
            grace,
            metrics,
        }
    }

    /// Follows connection transitions until the stream ends. A disconnect
    /// during a ride arms one timer; reconnecting disarms it. At most one
    /// warning is raised per disconnect episode.
    pub async fn run<S>(&self, mut transitions: S)
    where
        S: Stream<Item = ConnectionEvent> + Unpin,
    {
        let mut deadline: Option<Pin<Box<Sleep>>> = None;
        let mut warned = false;

        loop {
            tokio::select! {
                transition = transitions.next() => match transition {
                    Some(ConnectionEvent::Disconnected) => {
                        if deadline.is_none() && !warned && self.has_active_ride() {
                            debug!(grace_secs = self.grace.as_secs(), "ride in progress; disconnect timer armed");
                            deadline = Some(Box::pin(sleep(self.grace)));
                        }
                    }
                    Some(ConnectionEvent::Connected) => {
                        if deadline.take().is_some() {
                            debug!("reconnected; disconnect timer cleared");
                        }
                        warned = false;
                    }
                    None => break,
                },
                _ = expired(&mut deadline), if deadline.is_some() => {
                    deadline = None;
                    if self.has_active_ride() {
                        warned = true;
                        self.warn_connection_lost();
                    }
                }
            }
        }
    }

    /// Registers the handler for connection-loss cancellations.
    pub fn install(self: &Arc<Self>, channel: &Arc<RealtimeChannel>) -> ListenerId {
        let watchdog = Arc::downgrade(self);
        let channel_ref = Arc::downgrade(channel);

        channel.on_typed(events::RIDE_CANCELLED, move |cancel: RideCancelled| {
            if let Some(watchdog) = watchdog.upgrade() {
                watchdog.handle_cancellation(&cancel, &channel_ref);
            }
        })
    }

    fn handle_cancellation(&self, cancel: &RideCancelled, channel: &Weak<RealtimeChannel>) {
        if !cancel.is_connection_loss() {
            return;
        }

        let finalized = self.store.write(|store| {
            if store.active_ride_id() != Some(cancel.trip_id.as_str()) {
                return false;
            }
            store.finalize_ride(HistoryStatus::Cancelled, None, None);
            store.set_online(true);
            true
        });
        if !finalized {
            debug!(ride_id = %cancel.trip_id, "connection cancellation for an inactive ride");
            return;
        }

        info!(ride_id = %cancel.trip_id, "ride cancelled after connection loss");
        if let Some(channel) = channel.upgrade() {
            channel.leave_ride_room(&cancel.trip_id);
        }
        self.alerts.show(Alert::new(
            AlertKind::Error,
            "Ride Cancelled",
            "Your ride was cancelled due to a prolonged connection loss.",
        ));
    }

    fn has_active_ride(&self) -> bool {
        self.store.read(|store| store.active_ride().is_some())
    }

    fn warn_connection_lost(&self) {
        warn!(
            grace_secs = self.grace.as_secs(),
            "still disconnected with a ride in progress"
        );
        self.metrics.connection_warnings_total.inc();
        self.alerts.show(Alert::new(
            AlertKind::Warning,
            "Connection Lost",
            "Connection lost. If not restored soon, your ride may be cancelled.",
        ));
    }
}

async fn expired(deadline: &mut Option<Pin<Box<Sleep>>>) {
    match deadline {
        Some(timer) => timer.as_mut().await,
        None => pending().await,
    }
}

//! Sequences driver actions: backend call first, then the store update.
//!
//! A failed call leaves the store untouched and raises an error alert.
//! Inbound realtime events are applied through the same store mutators, so a
//! response that arrives after a cancellation is dropped by the ride-id guard.

use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::alerts::{Alert, AlertCenter, AlertKind};
use crate::api::gateway::RideGateway;
use crate::config::Config;
use crate::engine::location::LocationThrottle;
use crate::engine::offer_timer::OfferCountdown;
use crate::engine::store::StoreHandle;
use crate::error::{ClientError, ClientResult};
use crate::models::chat::{ChatMessage, ChatPayload, Sender};
use crate::models::driver::PresenceUpdate;
use crate::models::ride::{ActiveRide, Coordinates, HistoryStatus, RideHistory, RideOffer, RideStatus};
use crate::models::trip::{HistoryQuery, Trip, TripStatus};
use crate::realtime::RealtimeChannel;
use crate::realtime::events::{self, LocationEcho, RideCancelled, RideStatusUpdate};
use crate::realtime::listeners::ListenerId;
use crate::session::SessionStore;

const HISTORY_PAGE_SIZE: u32 = 50;

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub offer_window: Duration,
    pub commission_rate: f64,
    pub location_heartbeat: Duration,
    pub location_min_distance_m: f64,
    pub notification_poll_interval: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            offer_window: Duration::from_secs(30),
            commission_rate: 0.1,
            location_heartbeat: Duration::from_secs(5),
            location_min_distance_m: 2.0,
            notification_poll_interval: Duration::from_secs(300),
        }
    }
}

impl From<&Config> for ControllerSettings {
    fn from(config: &Config) -> Self {
        Self {
            offer_window: config.offer_window,
            commission_rate: config.commission_rate,
            location_heartbeat: config.location_heartbeat,
            location_min_distance_m: config.location_min_distance_m,
            notification_poll_interval: config.notification_poll_interval,
        }
    }
}

pub struct RideController {
    store: StoreHandle,
    gateway: Arc<dyn RideGateway>,
    channel: Arc<RealtimeChannel>,
    session: Arc<dyn SessionStore>,
    alerts: Arc<AlertCenter>,
    settings: ControllerSettings,
    countdown: OfferCountdown,
    throttle: Mutex<LocationThrottle>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl RideController {
    pub fn new(
        store: StoreHandle,
        gateway: Arc<dyn RideGateway>,
        channel: Arc<RealtimeChannel>,
        session: Arc<dyn SessionStore>,
        alerts: Arc<AlertCenter>,
        settings: ControllerSettings,
    ) -> Self {
        Self {
            countdown: OfferCountdown::new(settings.offer_window),
            throttle: Mutex::new(LocationThrottle::new(
                settings.location_min_distance_m,
                settings.location_heartbeat,
            )),
            store,
            gateway,
            channel,
            session,
            alerts,
            settings,
            poller: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    /// Registers the inbound ride and chat handlers on the channel.
    pub fn install(self: &Arc<Self>) -> Vec<ListenerId> {
        let mut ids = Vec::with_capacity(5);

        let controller = Arc::downgrade(self);
        ids.push(self.channel.on_typed(events::NEW_RIDE_REQUEST, move |trip: Trip| {
            if let Some(controller) = controller.upgrade() {
                controller.handle_ride_request(&trip);
            }
        }));

        let controller = Arc::downgrade(self);
        ids.push(self.channel.on_typed(events::RIDE_CANCELLED, move |cancel: RideCancelled| {
            if let Some(controller) = controller.upgrade() {
                controller.handle_ride_cancelled(&cancel);
            }
        }));

        let controller = Arc::downgrade(self);
        ids.push(self.channel.on_typed(
            events::RIDE_STATUS_UPDATE,
            move |update: RideStatusUpdate| {
                if let Some(controller) = controller.upgrade() {
                    controller.handle_status_update(&update);
                }
            },
        ));

        let controller = Arc::downgrade(self);
        ids.push(self.channel.on_typed(events::NEW_MESSAGE, move |payload: ChatPayload| {
            if let Some(controller) = controller.upgrade() {
                controller.handle_chat_message(payload);
            }
        }));

        let session = self.session.clone();
        ids.push(self.channel.on_typed(events::DRIVER_LOCATION, move |echo: LocationEcho| {
            if session.driver().is_some_and(|driver| driver.id == echo.driver_id) {
                debug!(lat = echo.lat, lng = echo.lng, "location acknowledged");
            }
        }));

        ids
    }

    pub async fn go_online(&self, location: Option<Coordinates>) -> ClientResult<()> {
        let update = PresenceUpdate {
            is_online: true,
            lat: location.map(|c| c.lat),
            lng: location.map(|c| c.lng),
        };
        self.gateway
            .update_presence(&update)
            .await
            .map_err(|err| self.report(err))?;

        self.store.write(|store| {
            store.set_online(true);
            if let Some(location) = location {
                store.set_location(location);
            }
        });
        if let Some(driver) = self.session.driver() {
            self.channel.join_driver_room(&driver.id);
        }
        info!("driver online");
        Ok(())
    }

    pub async fn go_offline(&self) -> ClientResult<()> {
        let location = self.store.read(|store| store.location());
        let update = PresenceUpdate {
            is_online: false,
            lat: location.map(|c| c.lat),
            lng: location.map(|c| c.lng),
        };
        self.gateway
            .update_presence(&update)
            .await
            .map_err(|err| self.report(err))?;

        self.countdown.cancel();
        self.store.write(|store| {
            store.set_online(false);
            store.decline_offer();
        });
        self.throttle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .reset();
        info!("driver offline");
        Ok(())
    }

    /// Returns `true` when the offer became the active ride. A failed call
    /// leaves the pending offer in place with its countdown still running.
    pub async fn accept_offer(&self) -> ClientResult<bool> {
        let Some(offer_id) = self.store.read(|store| store.offer().map(|o| o.id.clone())) else {
            warn!("accept pressed without a pending offer");
            return Ok(false);
        };

        let trip = self
            .gateway
            .accept_ride(&offer_id)
            .await
            .map_err(|err| self.report(err))?;
        if !trip.id.is_empty() && trip.id != offer_id {
            warn!(offer_id = %offer_id, returned = %trip.id, "backend accepted a different ride id");
        }

        let accepted = self.store.write(|store| {
            if store.offer().map(|o| o.id.as_str()) != Some(offer_id.as_str()) {
                warn!(offer_id = %offer_id, "offer withdrawn while accepting");
                return false;
            }
            store.accept_offer()
        });
        if accepted {
            if self.countdown.tracking().as_deref() == Some(offer_id.as_str()) {
                self.countdown.cancel();
            }
            self.channel.join_ride_room(&offer_id);
            info!(ride_id = %offer_id, "ride accepted");
        }
        Ok(accepted)
    }

    pub fn decline_offer(&self) {
        self.countdown.cancel();
        self.store.write(|store| store.decline_offer());
    }

    /// Moves the active ride one step forward. The final step completes the
    /// ride with its estimated fare.
    pub async fn advance_ride(&self) -> ClientResult<bool> {
        let Some((ride_id, next)) = self.next_step() else {
            warn!("no ride step to advance");
            return Ok(false);
        };
        if next == RideStatus::Completed {
            return self.complete_ride(None).await;
        }

        self.gateway
            .advance_ride_state(&ride_id, next.trip_status())
            .await
            .map_err(|err| self.report(err))?;

        Ok(self.store.write(|store| store.advance_ride_for(&ride_id, next)))
    }

    pub async fn complete_ride(&self, fare: Option<f64>) -> ClientResult<bool> {
        let Some((ride_id, next)) = self.next_step() else {
            return Ok(false);
        };
        if next != RideStatus::Completed {
            warn!(ride_id = %ride_id, ?next, "ride cannot be completed yet");
            return Ok(false);
        }

        let trip = self
            .gateway
            .advance_ride_state(&ride_id, TripStatus::Completed)
            .await
            .map_err(|err| self.report(err))?;
        let fare = fare.or_else(|| (trip.price > 0.0).then_some(trip.price));

        let row = self.store.write(|store| {
            if !store.advance_ride_for(&ride_id, RideStatus::Completed) {
                return None;
            }
            store.finalize_ride(HistoryStatus::Completed, fare, trip.rating)
        });
        let Some(row) = row else {
            return Ok(false);
        };

        self.channel.leave_ride_room(&ride_id);
        self.alerts.show(Alert::new(
            AlertKind::Success,
            "Ride Completed",
            format!("Fare collected: {}", row.fare),
        ));
        self.refresh_after_ride().await;
        Ok(true)
    }

    pub async fn cancel_ride(&self) -> ClientResult<bool> {
        let Some(ride_id) = self.store.read(|store| store.active_ride_id().map(str::to_string))
        else {
            return Ok(false);
        };

        self.gateway
            .advance_ride_state(&ride_id, TripStatus::Cancelled)
            .await
            .map_err(|err| self.report(err))?;

        let finalized = self.store.write(|store| {
            store.active_ride_id() == Some(ride_id.as_str())
                && store
                    .finalize_ride(HistoryStatus::Cancelled, None, None)
                    .is_some()
        });
        if finalized {
            self.channel.leave_ride_room(&ride_id);
            info!(ride_id = %ride_id, "ride cancelled by driver");
            self.refresh_after_ride().await;
        }
        Ok(finalized)
    }

    /// Pulls the active ride, recent history and earnings from the backend.
    /// Every successful part is applied; the first failure is returned.
    pub async fn refresh(&self) -> ClientResult<()> {
        let history_query = HistoryQuery::limit(HISTORY_PAGE_SIZE);
        let (active, history, earnings) = tokio::join!(
            self.gateway.fetch_active_ride(),
            self.gateway.fetch_ride_history(&history_query),
            self.gateway.fetch_earnings(),
        );

        let mut first_error = None;

        match active {
            Ok(Some(trip)) => self.restore_ride(&trip),
            Ok(None) => debug!("no active ride on the backend"),
            Err(err) => {
                warn!(error = %err, "failed to fetch active ride");
                first_error.get_or_insert(err);
            }
        }

        match history {
            Ok(page) => {
                let rate = self.settings.commission_rate;
                let rows: Vec<RideHistory> = page
                    .rides
                    .iter()
                    .filter_map(|trip| RideHistory::from_trip(trip, rate))
                    .collect();
                debug!(rides = rows.len(), total = page.total, "history refreshed");
                self.store.write(|store| store.replace_history(rows));
            }
            Err(err) => {
                warn!(error = %err, "failed to fetch ride history");
                first_error.get_or_insert(err);
            }
        }

        match earnings {
            Ok(summary) => self.store.write(|store| store.replace_stats(summary.into())),
            Err(err) => {
                warn!(error = %err, "failed to fetch earnings");
                first_error.get_or_insert(err);
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    /// Shows a provisional message and sends it over the channel.
    pub fn send_chat(&self, text: &str) -> bool {
        let text = text.trim();
        if text.is_empty() {
            return false;
        }
        let Some(ride_id) = self.store.read(|store| store.active_ride_id().map(str::to_string))
        else {
            warn!("chat message without an active ride");
            return false;
        };

        let message = ChatMessage::provisional(text, Utc::now());
        let client_id = message.id.clone();
        self.store.write(|store| store.append_chat_message(message));

        let sent = self
            .channel
            .send_chat(&ride_id, Sender::Driver, text, &client_id);
        if !sent {
            debug!(ride_id = %ride_id, "chat message kept locally; channel offline");
        }
        sent
    }

    pub async fn load_chat_history(&self) -> ClientResult<usize> {
        let Some(ride_id) = self.store.read(|store| store.active_ride_id().map(str::to_string))
        else {
            return Ok(0);
        };

        self.channel.join_ride_room(&ride_id);
        let payloads = self.gateway.fetch_chat_history(&ride_id).await?;
        let messages: Vec<ChatMessage> = payloads.into_iter().map(ChatMessage::from).collect();

        Ok(self.store.write(|store| {
            if store.active_ride_id() != Some(ride_id.as_str()) {
                return 0;
            }
            store.merge_chat_history(messages);
            store.chat().len()
        }))
    }

    /// Records the position and forwards it when the throttle allows.
    pub fn report_location(&self, position: Coordinates) -> bool {
        let tracking = self.store.write(|store| {
            store.set_location(position);
            store.is_online() || store.active_ride().is_some()
        });
        if !tracking {
            return false;
        }
        let Some(driver) = self.session.driver() else {
            return false;
        };

        let due = self
            .throttle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .should_send(position, Instant::now());
        due && self
            .channel
            .update_location(&driver.id, position.lat, position.lng)
    }

    /// Stores the number of notifications newer than the last read mark.
    pub async fn refresh_notifications(&self) -> ClientResult<usize> {
        let notifications = self.gateway.fetch_notifications().await?;
        Ok(self.store.write(|store| {
            let seen_at = store.notifications_seen_at();
            let unread = notifications
                .iter()
                .filter(|n| seen_at.is_none_or(|seen| n.created_at > seen))
                .count();
            store.set_unread_notifications(unread);
            unread
        }))
    }

    pub fn mark_notifications_read(&self) {
        self.store
            .write(|store| store.mark_notifications_read(Utc::now()));
    }

    /// Polls notifications at the configured interval. Realtime events remain
    /// the primary path; the poll only catches what they missed.
    pub fn start_notification_poll(self: &Arc<Self>) {
        let controller: Weak<Self> = Arc::downgrade(self);
        let period = self.settings.notification_poll_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(controller) = controller.upgrade() else {
                    break;
                };
                if let Err(err) = controller.refresh_notifications().await {
                    debug!(error = %err, "notification poll failed");
                }
            }
        });

        if let Some(previous) = self
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle)
        {
            previous.abort();
        }
    }

    pub fn shutdown(&self) {
        self.countdown.cancel();
        if let Some(poller) = self
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            poller.abort();
        }
    }

    fn handle_ride_request(&self, trip: &Trip) {
        let offer = RideOffer::from(trip);
        let offer_id = offer.id.clone();

        let accepted = self.store.write(|store| {
            if !store.is_online() {
                debug!(offer_id = %offer.id, "offline; ignoring ride request");
                return false;
            }
            if store.active_ride().is_some() {
                debug!(offer_id = %offer.id, "ride in progress; ignoring ride request");
                return false;
            }
            store.receive_offer(offer);
            true
        });
        if !accepted {
            return;
        }

        info!(offer_id = %offer_id, "ride offer received");
        let store = self.store.clone();
        let expiring = offer_id.clone();
        self.countdown.start(&offer_id, move || {
            store.write(|store| store.expire_offer(&expiring));
        });
    }

    fn handle_ride_cancelled(&self, cancel: &RideCancelled) {
        let withdrew_offer = self.store.write(|store| {
            if store.offer().is_some_and(|o| o.id == cancel.trip_id) {
                store.decline_offer();
                true
            } else {
                false
            }
        });
        if withdrew_offer {
            if self.countdown.tracking().as_deref() == Some(cancel.trip_id.as_str()) {
                self.countdown.cancel();
            }
            self.alerts.show(Alert::new(
                AlertKind::Info,
                "Request Cancelled",
                "The customer withdrew the ride request.",
            ));
            return;
        }

        if cancel.is_connection_loss() {
            return;
        }
        self.finalize_cancelled(&cancel.trip_id, "The customer cancelled the ride.");
    }

    fn handle_status_update(&self, update: &RideStatusUpdate) {
        if update.status == TripStatus::Cancelled {
            self.finalize_cancelled(&update.trip_id, "The ride was cancelled.");
            return;
        }
        let Some(status) = RideStatus::from_trip_status(update.status) else {
            return;
        };

        let outcome = self.store.write(|store| {
            let current = store
                .active_ride()
                .filter(|ride| ride.id() == update.trip_id)
                .map(|ride| ride.status)?;
            if current == status || current.next() != Some(status) {
                return Some(false);
            }
            store.advance_ride_for(&update.trip_id, status);
            if status == RideStatus::Completed {
                store.finalize_ride(HistoryStatus::Completed, None, None);
            }
            Some(true)
        });

        if outcome == Some(true) {
            debug!(ride_id = %update.trip_id, ?status, "applied backend status");
            if status == RideStatus::Completed {
                self.channel.leave_ride_room(&update.trip_id);
                self.spawn_refresh();
            }
        }
    }

    fn handle_chat_message(&self, payload: ChatPayload) {
        let ride_id = payload.trip_id.clone();
        let message = ChatMessage::from(payload);

        self.store.write(|store| {
            let Some(active) = store.active_ride_id() else {
                return;
            };
            if ride_id.as_deref().is_some_and(|id| id != active) {
                return;
            }
            let outcome = store.append_chat_message(message);
            debug!(?outcome, "chat message merged");
        });
    }

    fn finalize_cancelled(&self, ride_id: &str, message: &str) {
        let finalized = self.store.write(|store| {
            store.active_ride_id() == Some(ride_id)
                && store
                    .finalize_ride(HistoryStatus::Cancelled, None, None)
                    .is_some()
        });
        if !finalized {
            return;
        }

        info!(ride_id, "ride cancelled by backend");
        self.channel.leave_ride_room(ride_id);
        self.alerts
            .show(Alert::new(AlertKind::Warning, "Ride Cancelled", message));
        self.spawn_refresh();
    }

    fn restore_ride(&self, trip: &Trip) {
        let Some(ride) = ActiveRide::from_trip(trip) else {
            debug!(ride_id = %trip.id, status = trip.status.as_str(), "backend ride is not open");
            return;
        };
        let ride_id = ride.id().to_string();
        if self.store.write(|store| store.restore_active_ride(ride)) {
            self.channel.join_ride_room(&ride_id);
            info!(ride_id = %ride_id, "active ride restored");
        }
    }

    fn next_step(&self) -> Option<(String, RideStatus)> {
        self.store.read(|store| {
            let ride = store.active_ride()?;
            Some((ride.id().to_string(), ride.status.next()?))
        })
    }

    /// Stats and history are re-fetched after a ride ends; failures only log.
    async fn refresh_after_ride(&self) {
        let history_query = HistoryQuery::limit(HISTORY_PAGE_SIZE);
        let (history, earnings) = tokio::join!(
            self.gateway.fetch_ride_history(&history_query),
            self.gateway.fetch_earnings(),
        );

        match history {
            Ok(page) => {
                let rate = self.settings.commission_rate;
                let rows = page
                    .rides
                    .iter()
                    .filter_map(|trip| RideHistory::from_trip(trip, rate))
                    .collect();
                self.store.write(|store| store.replace_history(rows));
            }
            Err(err) => debug!(error = %err, "history refresh after ride failed"),
        }
        match earnings {
            Ok(summary) => self.store.write(|store| store.replace_stats(summary.into())),
            Err(err) => debug!(error = %err, "earnings refresh after ride failed"),
        }
    }

    fn spawn_refresh(&self) {
        let gateway = self.gateway.clone();
        let store = self.store.clone();
        let rate = self.settings.commission_rate;

        tokio::spawn(async move {
            let history_query = HistoryQuery::limit(HISTORY_PAGE_SIZE);
            if let Ok(page) = gateway.fetch_ride_history(&history_query).await {
                let rows = page
                    .rides
                    .iter()
                    .filter_map(|trip| RideHistory::from_trip(trip, rate))
                    .collect();
                store.write(|store| store.replace_history(rows));
            }
            if let Ok(summary) = gateway.fetch_earnings().await {
                store.write(|store| store.replace_stats(summary.into()));
            }
        });
    }

    fn report(&self, err: ClientError) -> ClientError {
        self.alerts.show(Alert::error(err.user_message()));
        err
    }
}

impl Drop for RideController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;

    use super::{ControllerSettings, RideController};
    use crate::alerts::{AlertCenter, AlertKind};
    use crate::api::gateway::RideGateway;
    use crate::engine::store::StoreHandle;
    use crate::error::{ClientError, ClientResult};
    use crate::models::chat::{ChatPayload, Sender};
    use crate::models::driver::{
        AuthResponse, Credentials, DriverProfile, Notification, PresenceUpdate,
    };
    use crate::models::ride::{Coordinates, HistoryStatus, RideStatus};
    use crate::models::stats::EarningsSummary;
    use crate::models::trip::{HistoryQuery, RidePage, Trip, TripStatus};
    use crate::observability::metrics::Metrics;
    use crate::realtime::events::{self, Envelope};
    use crate::realtime::testing::MemoryTransport;
    use crate::realtime::{RealtimeChannel, ReconnectPolicy};
    use crate::session::{MemorySessionStore, Session, SessionStore};

    #[derive(Default)]
    struct StubGateway {
        fail_with_network_error: bool,
        fail_reads: bool,
        active_ride: Option<Trip>,
        history: Vec<Trip>,
        state_calls: Mutex<Vec<(String, TripStatus)>>,
    }

    fn trip(value: serde_json::Value) -> Trip {
        serde_json::from_value(value).unwrap()
    }

    impl StubGateway {
        fn check(&self) -> ClientResult<()> {
            if self.fail_with_network_error {
                Err(ClientError::Network("connection reset".to_string()))
            } else {
                Ok(())
            }
        }

        fn check_read(&self) -> ClientResult<()> {
            if self.fail_reads {
                Err(ClientError::Timeout)
            } else {
                self.check()
            }
        }
    }

    #[async_trait]
    impl RideGateway for StubGateway {
        async fn login(&self, _credentials: &Credentials) -> ClientResult<AuthResponse> {
            Err(ClientError::Unauthorized)
        }

        async fn update_presence(&self, _update: &PresenceUpdate) -> ClientResult<()> {
            self.check()
        }

        async fn accept_ride(&self, ride_id: &str) -> ClientResult<Trip> {
            self.check()?;
            Ok(trip(json!({ "_id": ride_id, "status": "driver_assigned" })))
        }

        async fn advance_ride_state(&self, ride_id: &str, status: TripStatus) -> ClientResult<Trip> {
            self.check()?;
            self.state_calls
                .lock()
                .unwrap()
                .push((ride_id.to_string(), status));
            Ok(trip(json!({ "_id": ride_id, "status": status, "price": 13000 })))
        }

        async fn fetch_active_ride(&self) -> ClientResult<Option<Trip>> {
            self.check()?;
            Ok(self.active_ride.clone())
        }

        async fn fetch_ride_history(&self, _query: &HistoryQuery) -> ClientResult<RidePage> {
            self.check_read()?;
            Ok(RidePage {
                total: self.history.len() as u64,
                rides: self.history.clone(),
                page: 1,
                limit: 50,
            })
        }

        async fn fetch_earnings(&self) -> ClientResult<EarningsSummary> {
            self.check_read()?;
            Ok(EarningsSummary::default())
        }

        async fn fetch_chat_history(&self, _ride_id: &str) -> ClientResult<Vec<ChatPayload>> {
            self.check()?;
            Ok(Vec::new())
        }

        async fn fetch_notifications(&self) -> ClientResult<Vec<Notification>> {
            self.check()?;
            Ok(Vec::new())
        }
    }

    struct Fixture {
        controller: Arc<RideController>,
        channel: Arc<RealtimeChannel>,
        alerts: Arc<AlertCenter>,
    }

    fn fixture(gateway: StubGateway) -> Fixture {
        let session = Arc::new(MemorySessionStore::default());
        session
            .save(&Session {
                token: "t".to_string(),
                driver: serde_json::from_value::<DriverProfile>(json!({
                    "_id": "d1",
                    "name": "Eric"
                }))
                .unwrap(),
            })
            .unwrap();
        let channel = Arc::new(RealtimeChannel::new(
            Arc::new(MemoryTransport::default()),
            session.clone(),
            ReconnectPolicy::default(),
            16,
            Metrics::new(),
        ));
        let alerts = Arc::new(AlertCenter::default());
        let controller = Arc::new(RideController::new(
            StoreHandle::default(),
            Arc::new(gateway),
            channel.clone(),
            session,
            alerts.clone(),
            ControllerSettings::default(),
        ));
        controller.install();

        Fixture {
            controller,
            channel,
            alerts,
        }
    }

    fn push_offer(channel: &RealtimeChannel, id: &str) {
        channel.deliver(&Envelope::new(
            events::NEW_RIDE_REQUEST,
            json!({
                "_id": id,
                "client_id": { "_id": "c1", "name": "Aline", "phone": "+25761000000" },
                "pickup": { "address": "Rohero", "lat": -3.38, "lng": 29.36 },
                "destination": { "address": "Kinindo", "lat": -3.40, "lng": 29.35 },
                "distance": 4200,
                "price": 12500,
                "status": "request"
            }),
        ));
    }

    async fn online(fixture: &Fixture) {
        fixture.controller.go_online(None).await.unwrap();
    }

    #[tokio::test]
    async fn accepted_offer_becomes_the_active_ride() {
        let fixture = fixture(StubGateway::default());
        online(&fixture).await;
        push_offer(&fixture.channel, "o1");

        let offer = fixture
            .controller
            .store()
            .read(|s| s.offer().cloned())
            .unwrap();
        assert_eq!(offer.estimated_fare, 12_500.0);
        assert_eq!(offer.distance_km, 4.2);
        assert_eq!(offer.duration_min, 8);

        assert!(fixture.controller.accept_offer().await.unwrap());

        fixture.controller.store().read(|s| {
            let ride = s.active_ride().unwrap();
            assert_eq!(ride.id(), "o1");
            assert_eq!(ride.status, RideStatus::Accepted);
            assert!(s.offer().is_none());
        });
        assert_eq!(fixture.channel.rooms().ride.as_deref(), Some("o1"));
    }

    #[tokio::test]
    async fn failed_accept_leaves_the_store_untouched() {
        let fixture = fixture(StubGateway {
            fail_with_network_error: true,
            ..StubGateway::default()
        });
        fixture.controller.store().write(|s| s.set_online(true));
        push_offer(&fixture.channel, "o1");
        let before = fixture.controller.store().read(|s| s.offer().cloned());

        let err = fixture.controller.accept_offer().await.unwrap_err();

        assert!(matches!(err, ClientError::Network(_)));
        fixture.controller.store().read(|s| {
            assert!(s.active_ride().is_none());
            assert_eq!(s.offer().cloned(), before);
        });
        let alert = fixture.alerts.current().unwrap();
        assert_eq!(alert.kind, AlertKind::Error);
        assert_eq!(alert.message, "network_error");
    }

    #[tokio::test(start_paused = true)]
    async fn offer_still_expires_after_a_failed_accept() {
        let fixture = fixture(StubGateway {
            fail_with_network_error: true,
            ..StubGateway::default()
        });
        fixture.controller.store().write(|s| s.set_online(true));
        push_offer(&fixture.channel, "o1");

        assert!(fixture.controller.accept_offer().await.is_err());
        assert!(fixture.controller.store().read(|s| s.offer().is_some()));

        tokio::time::sleep(Duration::from_secs(31)).await;

        assert!(fixture.controller.store().read(|s| s.offer().is_none()));
    }

    #[tokio::test(start_paused = true)]
    async fn accepted_ride_outlives_the_offer_window() {
        let fixture = fixture(StubGateway::default());
        online(&fixture).await;
        push_offer(&fixture.channel, "o1");
        assert!(fixture.controller.accept_offer().await.unwrap());

        tokio::time::sleep(Duration::from_secs(31)).await;

        let active = fixture
            .controller
            .store()
            .read(|s| s.active_ride().map(|r| r.id().to_string()));
        assert_eq!(active.as_deref(), Some("o1"));
    }

    #[tokio::test]
    async fn new_request_does_not_interrupt_the_active_ride() {
        let fixture = fixture(StubGateway::default());
        online(&fixture).await;
        push_offer(&fixture.channel, "o1");
        assert!(fixture.controller.accept_offer().await.unwrap());

        push_offer(&fixture.channel, "o2");

        fixture.controller.store().read(|s| {
            assert!(s.offer().is_none());
            assert_eq!(s.active_ride().map(|r| r.id()), Some("o1"));
            assert_eq!(s.active_ride().map(|r| r.status), Some(RideStatus::Accepted));
        });
    }

    #[tokio::test]
    async fn offers_are_ignored_while_offline() {
        let fixture = fixture(StubGateway::default());
        push_offer(&fixture.channel, "o1");

        assert!(fixture.controller.store().read(|s| s.offer().is_none()));
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_offer_expires() {
        let fixture = fixture(StubGateway::default());
        online(&fixture).await;
        push_offer(&fixture.channel, "o1");

        tokio::time::sleep(Duration::from_secs(31)).await;

        assert!(fixture.controller.store().read(|s| s.offer().is_none()));
    }

    #[tokio::test]
    async fn ride_walks_through_every_step_to_completion() {
        let fixture = fixture(StubGateway {
            fail_reads: true,
            ..StubGateway::default()
        });
        online(&fixture).await;
        push_offer(&fixture.channel, "o1");
        fixture.controller.accept_offer().await.unwrap();

        for expected in [RideStatus::Arrived, RideStatus::Started] {
            assert!(fixture.controller.advance_ride().await.unwrap());
            let status = fixture
                .controller
                .store()
                .read(|s| s.active_ride().map(|r| r.status));
            assert_eq!(status, Some(expected));
        }
        assert!(fixture.controller.advance_ride().await.unwrap());

        fixture.controller.store().read(|s| {
            assert!(s.active_ride().is_none());
            let row = &s.history()[0];
            assert_eq!(row.status, HistoryStatus::Completed);
            assert_eq!(row.fare, 13_000.0);
            assert_eq!(row.commission, 1_300.0);
        });
        assert!(fixture.channel.rooms().ride.is_none());
    }

    #[tokio::test]
    async fn customer_cancellation_finalizes_the_ride() {
        let fixture = fixture(StubGateway::default());
        online(&fixture).await;
        push_offer(&fixture.channel, "o1");
        fixture.controller.accept_offer().await.unwrap();

        fixture.channel.deliver(&Envelope::new(
            events::RIDE_CANCELLED,
            json!({ "tripId": "o1", "reason": "Client changed plans" }),
        ));

        fixture.controller.store().read(|s| {
            assert!(s.active_ride().is_none());
            assert_eq!(s.history()[0].status, HistoryStatus::Cancelled);
        });
        assert_eq!(fixture.alerts.current().unwrap().kind, AlertKind::Warning);
    }

    #[tokio::test]
    async fn cancelled_request_clears_the_pending_offer() {
        let fixture = fixture(StubGateway::default());
        online(&fixture).await;
        push_offer(&fixture.channel, "o1");

        fixture.channel.deliver(&Envelope::new(
            events::RIDE_CANCELLED,
            json!({ "tripId": "o1" }),
        ));

        assert!(fixture.controller.store().read(|s| s.offer().is_none()));
    }

    #[tokio::test]
    async fn backend_status_push_advances_only_forward() {
        let fixture = fixture(StubGateway::default());
        online(&fixture).await;
        push_offer(&fixture.channel, "o1");
        fixture.controller.accept_offer().await.unwrap();

        for status in ["driver_arrived", "driver_assigned", "driver_arrived"] {
            fixture.channel.deliver(&Envelope::new(
                events::RIDE_STATUS_UPDATE,
                json!({ "tripId": "o1", "status": status }),
            ));
        }

        let status = fixture
            .controller
            .store()
            .read(|s| s.active_ride().map(|r| r.status));
        assert_eq!(status, Some(RideStatus::Arrived));
    }

    #[tokio::test]
    async fn sent_chat_is_confirmed_by_its_echo() {
        let fixture = fixture(StubGateway::default());
        online(&fixture).await;
        push_offer(&fixture.channel, "o1");
        fixture.controller.accept_offer().await.unwrap();

        fixture.controller.send_chat("  I'm outside ");
        let provisional = fixture
            .controller
            .store()
            .read(|s| s.chat()[0].clone());
        assert!(provisional.is_provisional());
        assert_eq!(provisional.text, "I'm outside");

        fixture.channel.deliver(&Envelope::new(
            events::NEW_MESSAGE,
            json!({
                "_id": "m-1",
                "text": "I'm outside",
                "sender": "driver",
                "createdAt": provisional.timestamp + chrono::Duration::seconds(1),
                "tripId": "o1"
            }),
        ));

        fixture.controller.store().read(|s| {
            assert_eq!(s.chat().len(), 1);
            assert_eq!(s.chat()[0].id, "m-1");
            assert_eq!(s.chat()[0].sender, Sender::Driver);
        });
    }

    #[tokio::test]
    async fn chat_for_another_ride_is_ignored() {
        let fixture = fixture(StubGateway::default());
        online(&fixture).await;
        push_offer(&fixture.channel, "o1");
        fixture.controller.accept_offer().await.unwrap();

        fixture.channel.deliver(&Envelope::new(
            events::NEW_MESSAGE,
            json!({
                "_id": "m-2",
                "text": "hello",
                "sender": "client",
                "createdAt": "2026-03-01T12:00:00Z",
                "tripId": "o7"
            }),
        ));

        assert!(fixture.controller.store().read(|s| s.chat().is_empty()));
    }

    #[tokio::test]
    async fn refresh_restores_the_open_ride_and_replaces_history() {
        let fixture = fixture(StubGateway {
            active_ride: Some(trip(json!({
                "_id": "o5",
                "status": "ongoing",
                "price": 9000,
                "distance": 3000
            }))),
            history: vec![
                trip(json!({ "_id": "h1", "status": "completed", "price": 5000 })),
                trip(json!({ "_id": "h2", "status": "cancelled", "price": 7000 })),
                trip(json!({ "_id": "h3", "status": "completed", "price": 8000 })),
            ],
            ..StubGateway::default()
        });

        fixture.controller.refresh().await.unwrap();

        fixture.controller.store().read(|s| {
            let ride = s.active_ride().unwrap();
            assert_eq!(ride.id(), "o5");
            assert_eq!(ride.status, RideStatus::Started);
            let ids: Vec<&str> = s.history().iter().map(|h| h.id.as_str()).collect();
            assert_eq!(ids, vec!["h1", "h2", "h3"]);
            assert_eq!(s.history()[1].fare, 0.0);
        });
        assert_eq!(fixture.channel.rooms().ride.as_deref(), Some("o5"));
    }

    #[tokio::test]
    async fn location_is_stored_but_not_sent_while_off_duty() {
        let fixture = fixture(StubGateway::default());
        let here = Coordinates {
            lat: -3.38,
            lng: 29.36,
        };

        assert!(!fixture.controller.report_location(here));
        assert_eq!(
            fixture.controller.store().read(|s| s.location()),
            Some(here)
        );
    }
}

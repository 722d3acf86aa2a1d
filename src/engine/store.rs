use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::engine::chat::{MergeOutcome, merge_message};
use crate::models::chat::ChatMessage;
use crate::models::ride::{
    ActiveRide, Coordinates, HistoryStatus, RideHistory, RideOffer, RideStatus, commission_for,
};
use crate::models::stats::{DriverStats, StatsUpdate};

#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub commission_rate: f64,
    pub chat_merge_window: Duration,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            commission_rate: 0.1,
            chat_merge_window: Duration::from_secs(5),
        }
    }
}

/// Single source of truth for the driver's ride state.
///
/// Every mutator is total: a call whose precondition does not hold is logged
/// and ignored. Such calls usually mean an inbound cancellation won a race
/// against a local action.
#[derive(Debug)]
pub struct RideStore {
    settings: StoreSettings,
    online: bool,
    location: Option<Coordinates>,
    offer: Option<RideOffer>,
    active: Option<ActiveRide>,
    history: Vec<RideHistory>,
    stats: DriverStats,
    chat: Vec<ChatMessage>,
    unread_notifications: usize,
    notifications_seen_at: Option<DateTime<Utc>>,
}

impl RideStore {
    pub fn new(settings: StoreSettings) -> Self {
        Self {
            settings,
            online: false,
            location: None,
            offer: None,
            active: None,
            history: Vec::new(),
            stats: DriverStats::default(),
            chat: Vec::new(),
            unread_notifications: 0,
            notifications_seen_at: None,
        }
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn location(&self) -> Option<Coordinates> {
        self.location
    }

    pub fn offer(&self) -> Option<&RideOffer> {
        self.offer.as_ref()
    }

    pub fn active_ride(&self) -> Option<&ActiveRide> {
        self.active.as_ref()
    }

    pub fn active_ride_id(&self) -> Option<&str> {
        self.active.as_ref().map(ActiveRide::id)
    }

    pub fn history(&self) -> &[RideHistory] {
        &self.history
    }

    pub fn stats(&self) -> &DriverStats {
        &self.stats
    }

    pub fn chat(&self) -> &[ChatMessage] {
        &self.chat
    }

    pub fn unread_notifications(&self) -> usize {
        self.unread_notifications
    }

    pub fn notifications_seen_at(&self) -> Option<DateTime<Utc>> {
        self.notifications_seen_at
    }

    pub fn set_online(&mut self, online: bool) {
        self.online = online;
    }

    pub fn set_location(&mut self, location: Coordinates) {
        self.location = Some(location);
    }

    /// Replaces any unaccepted offer. Callers only deliver offers while the
    /// driver is online and has no ride in progress.
    pub fn receive_offer(&mut self, offer: RideOffer) {
        if let Some(previous) = &self.offer {
            debug!(previous = %previous.id, offer_id = %offer.id, "replacing pending offer");
        }
        self.offer = Some(offer);
    }

    pub fn accept_offer(&mut self) -> bool {
        if let Some(active) = &self.active {
            warn!(ride_id = %active.id(), "cannot accept an offer while a ride is active");
            return false;
        }

        match self.offer.take() {
            Some(offer) => {
                info!(ride_id = %offer.id, "offer accepted");
                self.active = Some(ActiveRide::accepted(offer));
                self.chat.clear();
                true
            }
            None => {
                warn!("accept requested without a pending offer");
                false
            }
        }
    }

    pub fn decline_offer(&mut self) {
        if let Some(offer) = self.offer.take() {
            debug!(offer_id = %offer.id, "offer declined");
        }
    }

    /// Clears the pending offer only if it is still `offer_id`.
    pub fn expire_offer(&mut self, offer_id: &str) -> bool {
        if self.offer.as_ref().is_some_and(|o| o.id == offer_id) {
            self.offer = None;
            info!(offer_id, "offer expired");
            true
        } else {
            false
        }
    }

    pub fn advance_ride(&mut self, status: RideStatus) -> bool {
        let Some(active) = self.active.as_mut() else {
            warn!(?status, "no active ride to advance");
            return false;
        };

        if active.status.next() != Some(status) {
            warn!(
                ride_id = %active.id(),
                from = ?active.status,
                to = ?status,
                "rejected out-of-order ride transition"
            );
            return false;
        }

        active.status = status;
        match status {
            RideStatus::Started => active.started_at = Some(Utc::now()),
            RideStatus::Completed => active.ended_at = Some(Utc::now()),
            RideStatus::Accepted | RideStatus::Arrived => {}
        }
        info!(ride_id = %active.id(), ?status, "ride advanced");
        true
    }

    /// [`advance_ride`](Self::advance_ride) guarded by the ride id the action
    /// was issued for.
    pub fn advance_ride_for(&mut self, ride_id: &str, status: RideStatus) -> bool {
        if self.active_ride_id() != Some(ride_id) {
            warn!(ride_id, ?status, "ride no longer active; ignoring transition");
            return false;
        }
        self.advance_ride(status)
    }

    /// Moves the active ride into history and clears it. Completion also
    /// bumps the local stats estimate.
    pub fn finalize_ride(
        &mut self,
        outcome: HistoryStatus,
        fare: Option<f64>,
        rating: Option<f64>,
    ) -> Option<RideHistory> {
        let Some(ride) = self.active.take() else {
            warn!(?outcome, "no active ride to finalize");
            return None;
        };

        let (fare, commission) = match outcome {
            HistoryStatus::Completed => {
                let fare = fare
                    .or(ride.actual_fare)
                    .unwrap_or(ride.offer.estimated_fare);
                (fare, commission_for(fare, self.settings.commission_rate))
            }
            HistoryStatus::Cancelled => (0.0, 0.0),
        };

        let row = RideHistory {
            id: ride.offer.id.clone(),
            date: Utc::now(),
            customer_name: ride.offer.customer_name.clone(),
            customer_phone: ride.offer.customer_phone.clone(),
            pickup: ride.offer.pickup.address.clone(),
            dropoff: ride.offer.dropoff.address.clone(),
            fare,
            commission,
            distance_km: ride.offer.distance_km,
            duration_min: ride.offer.duration_min,
            rating: if outcome == HistoryStatus::Completed { rating } else { None },
            status: outcome,
        };

        if outcome == HistoryStatus::Completed {
            self.stats.record_completed_ride(fare, commission);
        }

        self.history.insert(0, row.clone());
        self.chat.clear();
        info!(ride_id = %row.id, ?outcome, fare, "ride finalized");
        Some(row)
    }

    /// Installs the ride the backend still considers open. Ignored when a
    /// different ride is already live.
    pub fn restore_active_ride(&mut self, ride: ActiveRide) -> bool {
        match &self.active {
            Some(current) if current.id() != ride.id() => {
                warn!(
                    current = %current.id(),
                    restored = %ride.id(),
                    "refusing to replace a different active ride"
                );
                false
            }
            _ => {
                if self.offer.as_ref().is_some_and(|o| o.id == ride.id()) {
                    self.offer = None;
                }
                self.active = Some(ride);
                true
            }
        }
    }

    pub fn replace_history(&mut self, history: Vec<RideHistory>) {
        self.history = history;
    }

    pub fn replace_stats(&mut self, update: StatsUpdate) {
        self.stats.apply(update);
    }

    pub fn append_chat_message(&mut self, message: ChatMessage) -> MergeOutcome {
        let window = self.merge_window();
        merge_message(&mut self.chat, message, window)
    }

    pub fn merge_chat_history(&mut self, messages: Vec<ChatMessage>) {
        let window = self.merge_window();
        for message in messages {
            merge_message(&mut self.chat, message, window);
        }
        self.chat.sort_by_key(|m| m.timestamp);
    }

    pub fn set_unread_notifications(&mut self, count: usize) {
        self.unread_notifications = count;
    }

    pub fn mark_notifications_read(&mut self, at: DateTime<Utc>) {
        self.notifications_seen_at = Some(at);
        self.unread_notifications = 0;
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.settings.clone());
    }

    fn merge_window(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.settings.chat_merge_window)
            .unwrap_or_else(|_| chrono::Duration::seconds(5))
    }
}

/// Shared handle to the process-wide [`RideStore`].
#[derive(Debug, Clone)]
pub struct StoreHandle {
    inner: Arc<RwLock<RideStore>>,
}

impl StoreHandle {
    pub fn new(settings: StoreSettings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(RideStore::new(settings))),
        }
    }

    pub fn read<R>(&self, f: impl FnOnce(&RideStore) -> R) -> R {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    pub fn write<R>(&self, f: impl FnOnce(&mut RideStore) -> R) -> R {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

impl Default for StoreHandle {
    fn default() -> Self {
        Self::new(StoreSettings::default())
    }
}

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::debug;

/// Countdown shown while an offer awaits a decision. Starting a new countdown
/// replaces the previous one.
pub struct OfferCountdown {
    window: Duration,
    pending: Mutex<Option<(String, JoinHandle<()>)>>,
}

impl OfferCountdown {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: Mutex::new(None),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn start<F>(&self, offer_id: &str, on_expire: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let window = self.window;
        let handle = tokio::spawn(async move {
            sleep(window).await;
            on_expire();
        });

        let previous = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace((offer_id.to_string(), handle));
        if let Some((previous_id, handle)) = previous {
            debug!(offer_id = %previous_id, "countdown replaced");
            handle.abort();
        }
    }

    /// Stops the running countdown and returns the offer it was tracking.
    pub fn cancel(&self) -> Option<String> {
        let (offer_id, handle) = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;
        handle.abort();
        Some(offer_id)
    }

    pub fn tracking(&self) -> Option<String> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .filter(|(_, handle)| !handle.is_finished())
            .map(|(offer_id, _)| offer_id.clone())
    }
}

impl Drop for OfferCountdown {
    fn drop(&mut self) {
        self.cancel();
    }
}

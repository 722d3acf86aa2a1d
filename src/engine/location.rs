use std::time::Duration;

use tokio::time::Instant;

use crate::geo::distance_m;
use crate::models::ride::Coordinates;

/// Decides which position fixes are worth sending: a fix goes out once the
/// driver has moved far enough or the heartbeat interval has elapsed.
#[derive(Debug, Clone)]
pub struct LocationThrottle {
    min_distance_m: f64,
    heartbeat: Duration,
    last_sent: Option<(Coordinates, Instant)>,
}

impl LocationThrottle {
    pub fn new(min_distance_m: f64, heartbeat: Duration) -> Self {
        Self {
            min_distance_m,
            heartbeat,
            last_sent: None,
        }
    }

    pub fn should_send(&mut self, position: Coordinates, now: Instant) -> bool {
        let due = match self.last_sent {
            None => true,
            Some((last, at)) => {
                distance_m(&last, &position) >= self.min_distance_m
                    || now.saturating_duration_since(at) >= self.heartbeat
            }
        };

        if due {
            self.last_sent = Some((position, now));
        }
        due
    }

    pub fn reset(&mut self) {
        self.last_sent = None;
    }
}

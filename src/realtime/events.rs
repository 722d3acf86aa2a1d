use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::trip::TripStatus;

pub const NEW_RIDE_REQUEST: &str = "new_ride_request";
pub const RIDE_CANCELLED: &str = "ride_cancelled";
pub const RIDE_STATUS_UPDATE: &str = "ride_status_update";
pub const NEW_MESSAGE: &str = "new_message";
pub const DRIVER_LOCATION: &str = "driver_location_update";

pub const JOIN_DRIVER: &str = "join_driver";
pub const JOIN_RIDE_ROOM: &str = "join_ride_room";
pub const LEAVE_RIDE_ROOM: &str = "leave_ride_room";
pub const UPDATE_LOCATION: &str = "update_location";
pub const SEND_MESSAGE: &str = "send_message";

/// One frame on the realtime channel, in either direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RideCancelled {
    #[serde(rename = "tripId")]
    pub trip_id: String,
    #[serde(default)]
    pub reason: Option<String>,
}

impl RideCancelled {
    /// True when the backend cancelled the ride because the driver's
    /// connection dropped for too long.
    pub fn is_connection_loss(&self) -> bool {
        self.reason
            .as_deref()
            .is_some_and(|reason| reason.to_ascii_lowercase().contains("connection"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RideStatusUpdate {
    #[serde(rename = "tripId")]
    pub trip_id: String,
    pub status: TripStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationEcho {
    #[serde(rename = "driverId")]
    pub driver_id: String,
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoomRequest<'a> {
    #[serde(rename = "tripId")]
    pub trip_id: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct LocationPing<'a> {
    #[serde(rename = "driverId")]
    pub driver_id: &'a str,
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutgoingChat<'a> {
    #[serde(rename = "tripId")]
    pub trip_id: &'a str,
    pub sender: &'a str,
    pub text: &'a str,
    #[serde(rename = "clientId")]
    pub client_id: &'a str,
}

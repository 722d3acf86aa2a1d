//! Backend ride records as they travel over REST and the realtime channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::ride::{Coordinates, Place};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TripStatus {
    #[default]
    Request,
    DriverAssigned,
    DriverArrived,
    Ongoing,
    Completed,
    Cancelled,
    #[serde(other)]
    Unknown,
}

impl TripStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TripStatus::Request => "request",
            TripStatus::DriverAssigned => "driver_assigned",
            TripStatus::DriverArrived => "driver_arrived",
            TripStatus::Ongoing => "ongoing",
            TripStatus::Completed => "completed",
            TripStatus::Cancelled => "cancelled",
            TripStatus::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TripCustomer {
    #[serde(rename = "_id", alias = "id", default)]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub image: Option<String>,
}

/// `client_id` is populated with the customer profile on most routes and left
/// as a bare id on some.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TripClient {
    Profile(TripCustomer),
    Id(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TripPlace {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub lat: f64,
    #[serde(default)]
    pub lng: f64,
}

impl TripPlace {
    pub fn to_place(&self) -> Place {
        Place {
            address: self.address.clone(),
            coordinates: Coordinates {
                lat: self.lat,
                lng: self.lng,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Trip {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    #[serde(default)]
    pub client_id: Option<TripClient>,
    #[serde(default)]
    pub driver_id: Option<String>,
    #[serde(default)]
    pub pickup: TripPlace,
    #[serde(default)]
    pub destination: TripPlace,
    /// Metres.
    #[serde(default)]
    pub distance: f64,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub commission: Option<f64>,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub status: TripStatus,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub date_time: Option<DateTime<Utc>>,
    #[serde(default, rename = "createdAt")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, rename = "updatedAt")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Trip {
    pub fn customer(&self) -> TripCustomer {
        match &self.client_id {
            Some(TripClient::Profile(customer)) => customer.clone(),
            Some(TripClient::Id(id)) => TripCustomer {
                id: id.clone(),
                ..TripCustomer::default()
            },
            None => TripCustomer::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct HistoryQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

impl HistoryQuery {
    pub fn limit(limit: u32) -> Self {
        Self {
            page: None,
            limit: Some(limit),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RidePage {
    #[serde(default)]
    pub rides: Vec<Trip>,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub limit: u32,
}

/// Older backend builds answer the history route with a bare list.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum RideHistoryBody {
    Page(RidePage),
    List(Vec<Trip>),
}

impl From<RideHistoryBody> for RidePage {
    fn from(body: RideHistoryBody) -> Self {
        match body {
            RideHistoryBody::Page(page) => page,
            RideHistoryBody::List(rides) => RidePage {
                total: rides.len() as u64,
                limit: rides.len() as u32,
                page: 1,
                rides,
            },
        }
    }
}

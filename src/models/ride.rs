use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::trip::{Trip, TripStatus};

/// Metres of trip distance per estimated minute of driving.
const METRES_PER_MINUTE: f64 = 500.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Place {
    pub address: String,
    pub coordinates: Coordinates,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RideOffer {
    pub id: String,
    pub customer_id: String,
    pub customer_name: String,
    pub customer_rating: f64,
    pub customer_phone: String,
    pub customer_image: Option<String>,
    pub pickup: Place,
    pub dropoff: Place,
    pub estimated_fare: f64,
    pub distance_km: f64,
    pub duration_min: u32,
    pub requested_at: DateTime<Utc>,
}

impl From<&Trip> for RideOffer {
    fn from(trip: &Trip) -> Self {
        let customer = trip.customer();

        Self {
            id: trip.id.clone(),
            customer_id: customer.id,
            customer_name: customer.name.unwrap_or_else(|| "Customer".to_string()),
            customer_rating: customer.rating.unwrap_or(4.5),
            customer_phone: customer.phone.unwrap_or_default(),
            customer_image: customer.image,
            pickup: trip.pickup.to_place(),
            dropoff: trip.destination.to_place(),
            estimated_fare: trip.price,
            distance_km: trip.distance / 1000.0,
            duration_min: (trip.distance.max(0.0) / METRES_PER_MINUTE).round() as u32,
            requested_at: trip.created_at.unwrap_or_else(Utc::now),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RideStatus {
    Accepted,
    Arrived,
    Started,
    Completed,
}

impl RideStatus {
    /// The only status a ride may move to from `self`.
    pub fn next(self) -> Option<RideStatus> {
        match self {
            RideStatus::Accepted => Some(RideStatus::Arrived),
            RideStatus::Arrived => Some(RideStatus::Started),
            RideStatus::Started => Some(RideStatus::Completed),
            RideStatus::Completed => None,
        }
    }

    pub fn trip_status(self) -> TripStatus {
        match self {
            RideStatus::Accepted => TripStatus::DriverAssigned,
            RideStatus::Arrived => TripStatus::DriverArrived,
            RideStatus::Started => TripStatus::Ongoing,
            RideStatus::Completed => TripStatus::Completed,
        }
    }

    pub fn from_trip_status(status: TripStatus) -> Option<RideStatus> {
        match status {
            TripStatus::DriverAssigned => Some(RideStatus::Accepted),
            TripStatus::DriverArrived => Some(RideStatus::Arrived),
            TripStatus::Ongoing => Some(RideStatus::Started),
            TripStatus::Completed => Some(RideStatus::Completed),
            TripStatus::Request | TripStatus::Cancelled | TripStatus::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActiveRide {
    pub offer: RideOffer,
    pub status: RideStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub actual_fare: Option<f64>,
}

impl ActiveRide {
    pub fn accepted(offer: RideOffer) -> Self {
        Self {
            offer,
            status: RideStatus::Accepted,
            started_at: None,
            ended_at: None,
            actual_fare: None,
        }
    }

    /// Rebuilds the live ride from the backend record, e.g. after an app
    /// restart. Returns `None` when the backend no longer considers it open.
    pub fn from_trip(trip: &Trip) -> Option<Self> {
        let status = RideStatus::from_trip_status(trip.status)?;
        if status == RideStatus::Completed {
            return None;
        }

        let started_at = if status == RideStatus::Started {
            trip.updated_at
        } else {
            None
        };

        Some(Self {
            offer: RideOffer::from(trip),
            status,
            started_at,
            ended_at: None,
            actual_fare: None,
        })
    }

    pub fn id(&self) -> &str {
        &self.offer.id
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HistoryStatus {
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RideHistory {
    pub id: String,
    pub date: DateTime<Utc>,
    pub customer_name: String,
    pub customer_phone: String,
    pub pickup: String,
    pub dropoff: String,
    pub fare: f64,
    pub commission: f64,
    pub distance_km: f64,
    pub duration_min: u32,
    pub rating: Option<f64>,
    pub status: HistoryStatus,
}

impl RideHistory {
    /// `None` for trips that have not finished yet.
    pub fn from_trip(trip: &Trip, commission_rate: f64) -> Option<Self> {
        let status = match trip.status {
            TripStatus::Completed => HistoryStatus::Completed,
            TripStatus::Cancelled => HistoryStatus::Cancelled,
            _ => return None,
        };
        let offer = RideOffer::from(trip);

        let (fare, commission) = match status {
            HistoryStatus::Completed => (
                trip.price,
                trip.commission
                    .unwrap_or_else(|| commission_for(trip.price, commission_rate)),
            ),
            HistoryStatus::Cancelled => (0.0, 0.0),
        };

        Some(Self {
            id: offer.id,
            date: trip
                .date_time
                .or(trip.created_at)
                .unwrap_or_else(Utc::now),
            customer_name: offer.customer_name,
            customer_phone: offer.customer_phone,
            pickup: offer.pickup.address,
            dropoff: offer.dropoff.address,
            fare,
            commission,
            distance_km: offer.distance_km,
            duration_min: offer.duration_min,
            rating: trip.rating,
            status,
        })
    }
}

pub fn commission_for(fare: f64, commission_rate: f64) -> f64 {
    (fare * commission_rate).round()
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const PROVISIONAL_PREFIX: &str = "temp-";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    Driver,
    Customer,
}

impl Sender {
    pub fn from_wire(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("driver") {
            Sender::Driver
        } else {
            Sender::Customer
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Sender::Driver => "driver",
            Sender::Customer => "customer",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub id: String,
    pub text: String,
    pub sender: Sender,
    pub timestamp: DateTime<Utc>,
    /// Provisional id this message confirms, when the backend echoes it.
    pub client_id: Option<String>,
}

impl ChatMessage {
    /// A driver message shown before the backend confirms it.
    pub fn provisional(text: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: format!("{PROVISIONAL_PREFIX}{}", Uuid::new_v4()),
            text: text.into(),
            sender: Sender::Driver,
            timestamp,
            client_id: None,
        }
    }

    pub fn is_provisional(&self) -> bool {
        self.id.starts_with(PROVISIONAL_PREFIX)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatPayload {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    pub text: String,
    pub sender: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(default, rename = "tripId")]
    pub trip_id: Option<String>,
    #[serde(default, rename = "clientId")]
    pub client_id: Option<String>,
}

impl From<ChatPayload> for ChatMessage {
    fn from(payload: ChatPayload) -> Self {
        Self {
            id: payload.id,
            text: payload.text,
            sender: Sender::from_wire(&payload.sender),
            timestamp: payload.created_at,
            client_id: payload.client_id,
        }
    }
}

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ClientError;
use crate::realtime::ReconnectPolicy;

#[derive(Debug, Clone)]
pub struct Config {
    pub api_base_url: String,
    pub socket_url: String,
    pub log_level: String,
    pub session_path: Option<PathBuf>,
    /// Used only when no stored session exists.
    pub login_email: Option<String>,
    pub login_password: Option<String>,
    pub request_timeout: Duration,
    pub offer_window: Duration,
    pub disconnect_grace: Duration,
    pub chat_merge_window: Duration,
    pub reconnect: ReconnectPolicy,
    pub commission_rate: f64,
    pub location_heartbeat: Duration,
    pub location_min_distance_m: f64,
    pub notification_poll_interval: Duration,
    pub event_buffer_size: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, ClientError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ClientError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_base_url = lookup("API_BASE_URL")
            .unwrap_or_else(|| "http://localhost:5000/api".to_string());
        let socket_url =
            lookup("SOCKET_URL").unwrap_or_else(|| "ws://localhost:5000/ws".to_string());

        let commission_rate: f64 = parse_or_default(&lookup, "COMMISSION_RATE", 0.1)?;
        if !(0.0..=1.0).contains(&commission_rate) {
            return Err(ClientError::Config(format!(
                "COMMISSION_RATE must be within [0, 1], got {commission_rate}"
            )));
        }

        Ok(Self {
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            socket_url,
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            session_path: lookup("SESSION_PATH").map(PathBuf::from),
            login_email: lookup("DRIVER_EMAIL"),
            login_password: lookup("DRIVER_PASSWORD"),
            request_timeout: Duration::from_secs(parse_or_default(
                &lookup,
                "REQUEST_TIMEOUT_SECS",
                10,
            )?),
            offer_window: Duration::from_secs(parse_or_default(&lookup, "OFFER_WINDOW_SECS", 30)?),
            disconnect_grace: Duration::from_secs(parse_or_default(
                &lookup,
                "DISCONNECT_GRACE_SECS",
                30,
            )?),
            chat_merge_window: Duration::from_secs(parse_or_default(
                &lookup,
                "CHAT_MERGE_WINDOW_SECS",
                5,
            )?),
            reconnect: ReconnectPolicy {
                initial_delay: Duration::from_millis(parse_or_default(
                    &lookup,
                    "RECONNECT_DELAY_MS",
                    1000,
                )?),
                max_delay: Duration::from_millis(parse_or_default(
                    &lookup,
                    "RECONNECT_MAX_DELAY_MS",
                    5000,
                )?),
                max_attempts: Some(parse_or_default(&lookup, "RECONNECT_ATTEMPTS", 5)?),
            },
            commission_rate,
            location_heartbeat: Duration::from_secs(parse_or_default(
                &lookup,
                "LOCATION_HEARTBEAT_SECS",
                5,
            )?),
            location_min_distance_m: parse_or_default(&lookup, "LOCATION_MIN_DISTANCE_M", 2.0)?,
            notification_poll_interval: Duration::from_secs(parse_or_default(
                &lookup,
                "NOTIFICATION_POLL_SECS",
                300,
            )?),
            event_buffer_size: parse_or_default(&lookup, "EVENT_BUFFER_SIZE", 1024)?,
        })
    }
}

fn parse_or_default<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ClientError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|err| ClientError::Config(format!("invalid {key}: {err}"))),
        None => Ok(default),
    }
}

//! Request/response calls to the backend for driver actions.
//!
//! Nothing here touches the ride store; callers apply the result.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, warn};

use crate::error::{ClientError, ClientResult};
use crate::models::chat::ChatPayload;
use crate::models::driver::{AuthResponse, Credentials, Notification, PresenceUpdate};
use crate::models::stats::EarningsSummary;
use crate::models::trip::{HistoryQuery, RideHistoryBody, RidePage, Trip, TripStatus};
use crate::observability::metrics::Metrics;
use crate::session::SessionStore;

#[async_trait]
pub trait RideGateway: Send + Sync {
    async fn login(&self, credentials: &Credentials) -> ClientResult<AuthResponse>;

    async fn update_presence(&self, update: &PresenceUpdate) -> ClientResult<()>;

    async fn accept_ride(&self, ride_id: &str) -> ClientResult<Trip>;

    async fn advance_ride_state(&self, ride_id: &str, status: TripStatus) -> ClientResult<Trip>;

    /// `None` when the backend has no open ride for this driver.
    async fn fetch_active_ride(&self) -> ClientResult<Option<Trip>>;

    async fn fetch_ride_history(&self, query: &HistoryQuery) -> ClientResult<RidePage>;

    async fn fetch_earnings(&self) -> ClientResult<EarningsSummary>;

    async fn fetch_chat_history(&self, ride_id: &str) -> ClientResult<Vec<ChatPayload>>;

    /// Notifications addressed to drivers or to everyone.
    async fn fetch_notifications(&self) -> ClientResult<Vec<Notification>>;
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
}

pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
    session: Arc<dyn SessionStore>,
    metrics: Metrics,
}

impl HttpGateway {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        session: Arc<dyn SessionStore>,
        metrics: Metrics,
    ) -> ClientResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ClientError::Internal(format!("failed to build http client: {err}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session,
            metrics,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let request = self.client.request(method, format!("{}{}", self.base_url, path));
        match self.session.token() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, operation: &'static str, request: RequestBuilder) -> ClientResult<Response> {
        let timer = self
            .metrics
            .gateway_latency_seconds
            .with_label_values(&[operation])
            .start_timer();
        let result = self.dispatch(request).await;
        timer.observe_duration();

        let outcome = match &result {
            Ok(_) => "success",
            Err(ClientError::NotFound(_)) => "not_found",
            Err(ClientError::Network(_) | ClientError::Timeout) => "network_error",
            Err(_) => "error",
        };
        self.metrics
            .gateway_requests_total
            .with_label_values(&[operation, outcome])
            .inc();

        match &result {
            Ok(response) => debug!(operation, status = %response.status(), "gateway request ok"),
            Err(ClientError::NotFound(_)) => debug!(operation, "gateway resource not found"),
            Err(err) => warn!(operation, error = %err, "gateway request failed"),
        }
        result
    }

    async fn dispatch(&self, request: RequestBuilder) -> ClientResult<Response> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        if status == StatusCode::UNAUTHORIZED {
            if let Err(err) = self.session.clear() {
                warn!(error = %err, "failed to clear rejected session");
            }
        }

        let message = response
            .json::<ErrorBody>()
            .await
            .ok()
            .and_then(|body| body.message);
        Err(ClientError::from_status(status.as_u16(), message))
    }

    async fn json<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        request: RequestBuilder,
    ) -> ClientResult<T> {
        let response = self.send(operation, request).await?;
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl RideGateway for HttpGateway {
    async fn login(&self, credentials: &Credentials) -> ClientResult<AuthResponse> {
        let request = self
            .client
            .post(format!("{}/driver-app/auth/login", self.base_url))
            .json(credentials);
        self.json("login", request).await
    }

    async fn update_presence(&self, update: &PresenceUpdate) -> ClientResult<()> {
        let request = self.request(Method::PUT, "/driver-app/status").json(update);
        self.send("update_presence", request).await?;
        Ok(())
    }

    async fn accept_ride(&self, ride_id: &str) -> ClientResult<Trip> {
        let request = self.request(Method::PUT, &format!("/driver-app/ride/{ride_id}/accept"));
        self.json("accept_ride", request).await
    }

    async fn advance_ride_state(&self, ride_id: &str, status: TripStatus) -> ClientResult<Trip> {
        let request = self
            .request(Method::PUT, &format!("/driver-app/ride/{ride_id}/state"))
            .json(&json!({ "status": status }));
        self.json("advance_ride_state", request).await
    }

    async fn fetch_active_ride(&self) -> ClientResult<Option<Trip>> {
        let request = self.request(Method::GET, "/driver-app/active-ride");
        match self.json::<Option<Trip>>("fetch_active_ride", request).await {
            Ok(trip) => Ok(trip),
            Err(ClientError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn fetch_ride_history(&self, query: &HistoryQuery) -> ClientResult<RidePage> {
        let request = self.request(Method::GET, "/driver-app/rides").query(query);
        let body: RideHistoryBody = self.json("fetch_ride_history", request).await?;
        Ok(body.into())
    }

    async fn fetch_earnings(&self) -> ClientResult<EarningsSummary> {
        let request = self.request(Method::GET, "/driver-app/earnings");
        self.json("fetch_earnings", request).await
    }

    async fn fetch_chat_history(&self, ride_id: &str) -> ClientResult<Vec<ChatPayload>> {
        let request = self.request(Method::GET, &format!("/chat/{ride_id}"));
        let messages: Option<Vec<ChatPayload>> = self.json("fetch_chat_history", request).await?;
        Ok(messages.unwrap_or_default())
    }

    async fn fetch_notifications(&self) -> ClientResult<Vec<Notification>> {
        let request = self.request(Method::GET, "/notifications");
        let notifications: Vec<Notification> = self.json("fetch_notifications", request).await?;
        Ok(notifications
            .into_iter()
            .filter(Notification::is_for_driver)
            .collect())
    }
}

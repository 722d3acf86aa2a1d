use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::alerts::{Alert, AlertCenter};
use crate::api::gateway::{HttpGateway, RideGateway};
use crate::config::Config;
use crate::engine::controller::{ControllerSettings, RideController};
use crate::engine::store::{StoreHandle, StoreSettings};
use crate::engine::watchdog::ConnectionWatchdog;
use crate::error::{ClientError, ClientResult};
use crate::models::driver::{Credentials, DriverProfile};
use crate::observability::metrics::Metrics;
use crate::realtime::RealtimeChannel;
use crate::realtime::transport::{Transport, WsTransport};
use crate::session::{FileSessionStore, MemorySessionStore, Session, SessionStore};

/// Every long-lived component, built once at process start.
pub struct DriverApp {
    pub config: Config,
    pub store: StoreHandle,
    pub session: Arc<dyn SessionStore>,
    pub gateway: Arc<dyn RideGateway>,
    pub channel: Arc<RealtimeChannel>,
    pub alerts: Arc<AlertCenter>,
    pub controller: Arc<RideController>,
    pub watchdog: Arc<ConnectionWatchdog>,
    pub metrics: Metrics,
    started: AtomicBool,
    watchdog_task: Mutex<Option<JoinHandle<()>>>,
}

impl DriverApp {
    pub fn new(config: Config) -> ClientResult<Self> {
        let metrics = Metrics::new();
        let session: Arc<dyn SessionStore> = match &config.session_path {
            Some(path) => Arc::new(FileSessionStore::new(path)),
            None => Arc::new(MemorySessionStore::default()),
        };
        let gateway = Arc::new(HttpGateway::new(
            config.api_base_url.clone(),
            config.request_timeout,
            session.clone(),
            metrics.clone(),
        )?);
        let transport = Arc::new(WsTransport::new(
            config.socket_url.clone(),
            config.request_timeout,
        ));

        Ok(Self::with_parts(config, session, gateway, transport, metrics))
    }

    pub fn with_parts(
        config: Config,
        session: Arc<dyn SessionStore>,
        gateway: Arc<dyn RideGateway>,
        transport: Arc<dyn Transport>,
        metrics: Metrics,
    ) -> Self {
        let store = StoreHandle::new(StoreSettings {
            commission_rate: config.commission_rate,
            chat_merge_window: config.chat_merge_window,
        });
        let alerts = Arc::new(AlertCenter::new(config.event_buffer_size));
        let channel = Arc::new(RealtimeChannel::new(
            transport,
            session.clone(),
            config.reconnect.clone(),
            config.event_buffer_size,
            metrics.clone(),
        ));
        let controller = Arc::new(RideController::new(
            store.clone(),
            gateway.clone(),
            channel.clone(),
            session.clone(),
            alerts.clone(),
            ControllerSettings::from(&config),
        ));
        let watchdog = Arc::new(ConnectionWatchdog::new(
            store.clone(),
            alerts.clone(),
            config.disconnect_grace,
            metrics.clone(),
        ));

        Self {
            config,
            store,
            session,
            gateway,
            channel,
            alerts,
            controller,
            watchdog,
            metrics,
            started: AtomicBool::new(false),
            watchdog_task: Mutex::new(None),
        }
    }

    pub async fn login(&self, email: &str, password: &str) -> ClientResult<DriverProfile> {
        let credentials = Credentials {
            email: email.to_string(),
            password: password.to_string(),
        };
        let auth = self.gateway.login(&credentials).await.map_err(|err| {
            self.alerts.show(Alert::error(err.user_message()));
            err
        })?;

        self.session.save(&Session {
            token: auth.token,
            driver: auth.driver.clone(),
        })?;
        info!(driver_id = %auth.driver.id, "driver logged in");
        Ok(auth.driver)
    }

    /// The stored driver, if a previous login is still on record.
    pub fn resume(&self) -> Option<DriverProfile> {
        self.session.driver()
    }

    /// Connects the realtime channel, installs event handlers and pulls the
    /// current ride state. Calling it again while started does nothing.
    pub async fn start(&self) -> ClientResult<()> {
        let driver = self.session.driver().ok_or(ClientError::MissingCredential)?;
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.controller.install();
        self.watchdog.install(&self.channel);

        let transitions = self.channel.connection_events();
        let watchdog = self.watchdog.clone();
        let task = tokio::spawn(async move { watchdog.run(transitions).await });
        if let Some(previous) = self
            .watchdog_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task)
        {
            previous.abort();
        }

        self.channel.join_driver_room(&driver.id);
        self.channel.connect();
        self.controller.start_notification_poll();

        if let Err(err) = self.controller.refresh().await {
            warn!(error = %err, "initial refresh failed");
        }
        info!(driver_id = %driver.id, "driver app started");
        Ok(())
    }

    /// Stops background work and returns every component to its initial
    /// state. The stored session is kept.
    pub fn reset(&self) {
        self.controller.shutdown();
        if let Some(task) = self
            .watchdog_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
        self.channel.disconnect();
        self.store.write(|store| store.reset());
        self.alerts.hide();
        self.started.store(false, Ordering::SeqCst);
    }

    pub async fn logout(&self) -> ClientResult<()> {
        if self.store.read(|store| store.is_online()) {
            if let Err(err) = self.controller.go_offline().await {
                warn!(error = %err, "failed to go offline before logout");
            }
        }
        self.reset();
        self.session.clear()?;
        info!("driver logged out");
        Ok(())
    }
}

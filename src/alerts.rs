use std::sync::{PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    Success,
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Alert {
    pub title: String,
    pub message: String,
    pub kind: AlertKind,
}

impl Alert {
    pub fn new(kind: AlertKind, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            kind,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(AlertKind::Error, "Error", message)
    }
}

/// User-facing alerts: the one currently visible plus a feed of every alert
/// raised.
pub struct AlertCenter {
    current: RwLock<Option<Alert>>,
    tx: broadcast::Sender<Alert>,
}

impl AlertCenter {
    pub fn new(buffer: usize) -> Self {
        let (tx, _unused_rx) = broadcast::channel(buffer.max(1));
        Self {
            current: RwLock::new(None),
            tx,
        }
    }

    pub fn show(&self, alert: Alert) {
        debug!(title = %alert.title, kind = ?alert.kind, "showing alert");
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(alert.clone());
        let _ = self.tx.send(alert);
    }

    pub fn hide(&self) {
        self.current
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub fn current(&self) -> Option<Alert> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Alert> {
        self.tx.subscribe()
    }
}

impl Default for AlertCenter {
    fn default() -> Self {
        Self::new(64)
    }
}

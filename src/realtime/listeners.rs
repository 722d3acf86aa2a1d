use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde_json::Value;

pub type Handler = Arc<dyn Fn(&Value) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Event-name keyed handler sets.
#[derive(Default)]
pub struct ListenerRegistry {
    handlers: DashMap<String, Vec<(ListenerId, Handler)>>,
    next_id: AtomicU64,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, event: &str, handler: Handler) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .entry(event.to_string())
            .or_default()
            .push((id, handler));
        id
    }

    /// Safe to call with an id that was never registered.
    pub fn unregister(&self, event: &str, id: ListenerId) -> bool {
        let Some(mut entry) = self.handlers.get_mut(event) else {
            return false;
        };
        let before = entry.len();
        entry.retain(|(existing, _)| *existing != id);
        before != entry.len()
    }

    /// Invokes every handler registered for `event` once. Handlers run after
    /// the map guard is released so they may register or unregister freely.
    pub fn dispatch(&self, event: &str, payload: &Value) -> usize {
        let handlers: Vec<Handler> = match self.handlers.get(event) {
            Some(entry) => entry.iter().map(|(_, h)| h.clone()).collect(),
            None => return 0,
        };

        for handler in &handlers {
            handler(payload);
        }
        handlers.len()
    }

    pub fn len(&self, event: &str) -> usize {
        self.handlers.get(event).map_or(0, |entry| entry.len())
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.iter().all(|entry| entry.value().is_empty())
    }

    pub fn clear(&self) {
        self.handlers.clear();
    }
}

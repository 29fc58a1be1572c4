//! Topic-filter routing for incoming publishes.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Callback invoked with the concrete topic and raw payload of a
/// matching publish.
pub type MessageHandler = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

/// Maps subscribed topic filters to handlers.
///
/// One handler per filter; re-registering a filter replaces the old
/// handler. Registrations survive reconnects — only the broker-side
/// subscription has to be re-issued.
#[derive(Default)]
pub struct Router {
    routes: RwLock<HashMap<String, MessageHandler>>,
}

impl Router {
    /// Creates an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `filter`, replacing any previous one.
    pub fn insert(&self, filter: impl Into<String>, handler: MessageHandler) {
        self.routes.write().insert(filter.into(), handler);
    }

    /// Removes the handler for `filter`.
    pub fn remove(&self, filter: &str) {
        self.routes.write().remove(filter);
    }

    /// Dispatches a publish to every handler whose filter matches.
    ///
    /// Returns the number of handlers invoked. Handlers are called on
    /// the caller's thread (the event-loop task) and must not block.
    pub fn dispatch(&self, topic: &str, payload: &[u8]) -> usize {
        // Snapshot matching handlers so a handler that mutates the
        // router (unsubscribe on completion) does not deadlock.
        let matched: Vec<MessageHandler> = self
            .routes
            .read()
            .iter()
            .filter(|(filter, _)| filter_matches(filter, topic))
            .map(|(_, handler)| Arc::clone(handler))
            .collect();

        for handler in &matched {
            handler(topic, payload);
        }
        matched.len()
    }

    /// Returns the number of registered filters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.read().len()
    }

    /// Returns true when no filters are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.read().is_empty()
    }
}

/// MQTT topic-filter matching.
///
/// `+` matches exactly one level, `#` matches the remainder (and is
/// only valid as the final level).
#[must_use]
pub fn filter_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return filter_levels.next().is_none(),
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

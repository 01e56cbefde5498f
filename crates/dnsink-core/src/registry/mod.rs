//! Dispatch registry
//!
//! Maps an inbound notification to the handlers that subscribe to it. A
//! handler subscribes with its exchange, its topics and a list of event-type
//! matchers; the registry validates the payload into a [`SinkEvent`] once
//! and hands it to every matching handler in registration order.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use dnsink_core::registry::HandlerRegistry;
//!
//! let mut registry = HandlerRegistry::new();
//! registry.register(Arc::new(FixedAddressHandler::new(config.fixed, backends.clone())));
//! registry.register(Arc::new(FloatingAddressHandler::new(config.floating, backends)));
//!
//! match registry.dispatch(&notification).await {
//!     Dispatch::Processed(outcomes) => { /* log */ }
//!     Dispatch::Ignored => {}
//!     Dispatch::Rejected(err) => { /* malformed payload */ }
//! }
//! ```

use std::sync::Arc;
use tracing::{debug, info};

use crate::config::SinkConfig;
use crate::error::Error;
use crate::event::{Notification, SinkEvent};
use crate::handler::{Backends, FixedAddressHandler, FloatingAddressHandler, NotificationHandler};
use crate::outcome::EventOutcome;

/// Event-type subscription of a handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventTypeMatcher {
    /// The event type must be equal
    Exact(String),
    /// The event type must start with the prefix (`floatingip.delete` covers `.start` and `.end`)
    Prefix(String),
}

impl EventTypeMatcher {
    pub fn exact(event_type: impl Into<String>) -> Self {
        EventTypeMatcher::Exact(event_type.into())
    }

    pub fn prefix(prefix: impl Into<String>) -> Self {
        EventTypeMatcher::Prefix(prefix.into())
    }

    pub fn matches(&self, event_type: &str) -> bool {
        match self {
            EventTypeMatcher::Exact(expected) => event_type == expected,
            EventTypeMatcher::Prefix(prefix) => event_type.starts_with(prefix.as_str()),
        }
    }
}

/// Subscription declared by one handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub handler: &'static str,
    pub exchange: String,
    pub topics: Vec<String>,
    pub event_types: Vec<EventTypeMatcher>,
}

/// Result of dispatching one notification
#[derive(Debug)]
pub enum Dispatch {
    /// No handler subscribes to the notification
    Ignored,
    /// The payload did not validate; no handler ran
    Rejected(Error),
    /// One outcome per handler that ran
    Processed(Vec<EventOutcome>),
}

/// Registry of notification handlers
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: Vec<Arc<dyn NotificationHandler>>,
}

impl HandlerRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the handlers enabled in `config`
    pub fn from_config(config: &SinkConfig, backends: Backends) -> Self {
        let mut registry = Self::new();
        if config.fixed.enabled {
            registry.register(Arc::new(FixedAddressHandler::new(
                config.fixed.clone(),
                backends.clone(),
            )));
        }
        if config.floating.enabled {
            registry.register(Arc::new(FloatingAddressHandler::new(
                config.floating.clone(),
                backends,
            )));
        }
        registry
    }

    /// Register a handler
    pub fn register(&mut self, handler: Arc<dyn NotificationHandler>) {
        info!(
            "Registered handler {} on exchange {} ({})",
            handler.name(),
            handler.exchange(),
            handler.topics().join(", ")
        );
        self.handlers.push(handler);
    }

    /// Number of registered handlers
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Check if no handler is registered
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Subscriptions of all handlers, for the transport to bind to
    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.handlers
            .iter()
            .map(|h| Subscription {
                handler: h.name(),
                exchange: h.exchange().to_string(),
                topics: h.topics().to_vec(),
                event_types: h.event_types().to_vec(),
            })
            .collect()
    }

    /// Handlers subscribed to a notification
    ///
    /// An empty topic on the notification matches every topic; transports
    /// that do not report topics deliver to all handlers of the exchange.
    pub fn handlers_for(&self, notification: &Notification) -> Vec<Arc<dyn NotificationHandler>> {
        self.handlers
            .iter()
            .filter(|h| h.exchange() == notification.exchange)
            .filter(|h| {
                notification.topic.is_empty() || h.topics().iter().any(|t| *t == notification.topic)
            })
            .filter(|h| h.event_types().iter().any(|m| m.matches(&notification.event_type)))
            .cloned()
            .collect()
    }

    /// Validate a notification and run every subscribed handler on it
    pub async fn dispatch(&self, notification: &Notification) -> Dispatch {
        let handlers = self.handlers_for(notification);
        if handlers.is_empty() {
            debug!(
                "No handler for {} on exchange {}",
                notification.event_type, notification.exchange
            );
            return Dispatch::Ignored;
        }

        let event = match SinkEvent::parse(&notification.event_type, &notification.payload) {
            Ok(event) => event,
            Err(e) => return Dispatch::Rejected(e),
        };
        debug!("Dispatching {} ({}) to {} handlers", notification.event_type, event.kind(), handlers.len());

        let mut outcomes = Vec::with_capacity(handlers.len());
        for handler in handlers {
            let outcome = handler
                .process(&notification.event_type, &event, &notification.context)
                .await;
            info!("{}", outcome);
            outcomes.push(outcome);
        }
        Dispatch::Processed(outcomes)
    }
}

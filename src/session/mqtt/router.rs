//! Inbound topic routing
//!
//! Maps messages delivered on subscribed topics to registered handlers. The
//! ordered subscription set is also the source of truth for resubmission
//! after a session is established without persisted state.

use crate::session::{InboundHandler, InboundMessage, QosLevel};
use std::fmt;
use tracing::{debug, error};

/// One registered subscription
#[derive(Clone)]
pub struct Subscription {
    pub topic: String,
    pub qos: QosLevel,
    handler: InboundHandler,
}

impl Subscription {
    pub fn new(topic: impl Into<String>, qos: QosLevel, handler: InboundHandler) -> Self {
        Self {
            topic: topic.into(),
            qos,
            handler,
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("qos", &self.qos)
            .finish_non_exhaustive()
    }
}

/// Ordered registry of subscriptions with inbound dispatch
#[derive(Debug, Default)]
pub struct TopicRouter {
    subscriptions: Vec<Subscription>,
}

impl TopicRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscription, preserving first-registration order.
    /// Re-registering a topic replaces its handler in place.
    pub fn register(&mut self, subscription: Subscription) {
        match self
            .subscriptions
            .iter_mut()
            .find(|existing| existing.topic == subscription.topic)
        {
            Some(existing) => *existing = subscription,
            None => self.subscriptions.push(subscription),
        }
    }

    /// Topic filters and QoS levels in registration order
    pub fn topics_in_order(&self) -> Vec<(String, QosLevel)> {
        self.subscriptions
            .iter()
            .map(|s| (s.topic.clone(), s.qos))
            .collect()
    }

    /// Handlers whose filter matches the given topic
    pub fn handlers_for(&self, topic: &str) -> Vec<InboundHandler> {
        self.subscriptions
            .iter()
            .filter(|s| topic_matches(&s.topic, topic))
            .map(|s| s.handler.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}

/// Invoke every handler for a message. Handler faults are logged and never
/// propagate: dispatch continues and the connection stays up.
///
/// Returns the number of handlers invoked.
pub fn dispatch(handlers: &[InboundHandler], message: &InboundMessage) -> usize {
    for handler in handlers {
        if let Err(e) = handler(message) {
            error!(topic = %message.topic, error = %e, "Inbound handler failed");
        }
    }

    if handlers.is_empty() {
        debug!(topic = %message.topic, "No handler registered for topic");
    }

    handlers.len()
}

/// MQTT topic filter matching (`+` single level, `#` multi level)
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

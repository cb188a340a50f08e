//! Mock implementations for testing
//!
//! Provides a scriptable [`Session`] implementation so the device lifecycle
//! and publish loop can be exercised without a broker.

use crate::session::mqtt::router;
use crate::session::{
    ConnectError, ConnectionState, FatalEvent, InboundHandler, InboundMessage, PublishError,
    QosLevel, Session, SubscribeAck, SubscribeError,
};
use bytes::Bytes;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Mock session for testing
///
/// Scriptable failure modes: a number of failing connect attempts before
/// success, topics whose subscription the fake broker rejects, and manual
/// state control for publish gating.
pub struct MockSession {
    state: Mutex<ConnectionState>,
    connect_attempts: AtomicU32,
    connect_failures_remaining: AtomicU32,
    subscriptions: Mutex<Vec<(String, QosLevel)>>,
    handlers: Mutex<Vec<(String, InboundHandler)>>,
    rejected_topics: Mutex<HashSet<String>>,
    published: Mutex<Vec<(String, Vec<u8>, QosLevel)>>,
    fatal_tx: mpsc::UnboundedSender<FatalEvent>,
    fatal_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<FatalEvent>>,
}

impl MockSession {
    pub fn new() -> Self {
        let (fatal_tx, fatal_rx) = mpsc::unbounded_channel();
        Self {
            state: Mutex::new(ConnectionState::Disconnected),
            connect_attempts: AtomicU32::new(0),
            connect_failures_remaining: AtomicU32::new(0),
            subscriptions: Mutex::new(Vec::new()),
            handlers: Mutex::new(Vec::new()),
            rejected_topics: Mutex::new(HashSet::new()),
            published: Mutex::new(Vec::new()),
            fatal_tx,
            fatal_rx: tokio::sync::Mutex::new(fatal_rx),
        }
    }

    /// Fail the first `count` connect attempts before succeeding
    pub fn with_connect_failures(count: u32) -> Self {
        let mock = Self::new();
        mock.connect_failures_remaining.store(count, Ordering::SeqCst);
        mock
    }

    /// Reject subscriptions to the given topic
    pub fn with_rejected_topic(topic: &str) -> Self {
        let mock = Self::new();
        mock.rejected_topics.lock().unwrap().insert(topic.to_string());
        mock
    }

    pub fn set_state(&self, state: ConnectionState) {
        *self.state.lock().unwrap() = state;
    }

    pub fn connect_attempts(&self) -> u32 {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    pub fn subscriptions(&self) -> Vec<(String, QosLevel)> {
        self.subscriptions.lock().unwrap().clone()
    }

    pub fn published(&self) -> Vec<(String, Vec<u8>, QosLevel)> {
        self.published.lock().unwrap().clone()
    }

    /// Deliver an inbound message to every registered handler whose topic
    /// filter matches. Returns the number of handlers invoked.
    pub fn inject_message(&self, topic: &str, payload: &[u8]) -> usize {
        let message = InboundMessage {
            topic: topic.to_string(),
            payload: Bytes::copy_from_slice(payload),
            qos: QosLevel::AtLeastOnce,
            duplicate: false,
            retained: false,
        };
        let handlers: Vec<InboundHandler> = self
            .handlers
            .lock()
            .unwrap()
            .iter()
            .filter(|(filter, _)| router::topic_matches(filter, topic))
            .map(|(_, handler)| handler.clone())
            .collect();
        router::dispatch(&handlers, &message)
    }

    /// Raise a fatal event, as a rejected resubmission would
    pub fn emit_fatal(&self, topic: &str) {
        let _ = self.fatal_tx.send(FatalEvent {
            topic: topic.to_string(),
        });
    }
}

impl Default for MockSession {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Session for MockSession {
    async fn connect(&mut self) -> Result<(), ConnectError> {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);

        let remaining = self.connect_failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.connect_failures_remaining
                .store(remaining - 1, Ordering::SeqCst);
            return Err(ConnectError::Refused(
                rumqttc::ConnectReturnCode::ServiceUnavailable,
            ));
        }

        self.set_state(ConnectionState::Connected);
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        qos: QosLevel,
        handler: InboundHandler,
    ) -> Result<SubscribeAck, SubscribeError> {
        if self.rejected_topics.lock().unwrap().contains(topic) {
            return Err(SubscribeError::Rejected {
                topic: topic.to_string(),
            });
        }

        self.subscriptions
            .lock()
            .unwrap()
            .push((topic.to_string(), qos));
        self.handlers
            .lock()
            .unwrap()
            .push((topic.to_string(), handler));

        Ok(SubscribeAck {
            topic: topic.to_string(),
            granted: qos,
        })
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QosLevel,
    ) -> Result<(), PublishError> {
        let state = *self.state.lock().unwrap();
        if state != ConnectionState::Connected {
            return Err(PublishError::NotConnected { state });
        }

        self.published
            .lock()
            .unwrap()
            .push((topic.to_string(), payload, qos));
        Ok(())
    }

    fn connection_state(&self) -> ConnectionState {
        *self.state.lock().unwrap()
    }

    async fn recv_fatal(&self) -> Option<FatalEvent> {
        self.fatal_rx.lock().await.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_connect_failures_then_success() {
        let mut mock = MockSession::with_connect_failures(2);

        assert!(mock.connect().await.is_err());
        assert!(mock.connect().await.is_err());
        assert!(mock.connect().await.is_ok());
        assert_eq!(mock.connect_attempts(), 3);
        assert_eq!(mock.connection_state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_rejected_topic() {
        let mock = MockSession::with_rejected_topic("app/data");
        let handler: InboundHandler = Arc::new(|_| Ok(()));

        let result = mock
            .subscribe("app/data", QosLevel::AtLeastOnce, handler)
            .await;

        assert!(matches!(
            result,
            Err(SubscribeError::Rejected { topic }) if topic == "app/data"
        ));
        assert!(mock.subscriptions().is_empty());
    }

    #[tokio::test]
    async fn test_inject_message_reaches_handler() {
        let mock = MockSession::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let handler: InboundHandler = Arc::new(move |msg| {
            seen_clone.lock().unwrap().push(msg.topic.clone());
            Ok(())
        });

        mock.subscribe("app/data", QosLevel::AtLeastOnce, handler)
            .await
            .unwrap();

        assert_eq!(mock.inject_message("app/data", b"{}"), 1);
        assert_eq!(mock.inject_message("app/other", b"{}"), 0);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fatal_events() {
        let mock = MockSession::new();
        mock.emit_fatal("app/data");

        let event = mock.recv_fatal().await.unwrap();
        assert_eq!(event.topic, "app/data");
    }
}

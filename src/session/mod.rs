//! Session layer for broker communication
//!
//! This module provides the [`Session`] abstraction over the MQTT
//! implementation to enable dependency injection and testing, plus the
//! connection, message, and error types shared across the crate.

use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

pub mod mqtt;

/// Connection state for one session
///
/// Written only by the session's supervisor task once the connection is up;
/// everyone else reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection and none being attempted
    Disconnected,
    /// Handshake in progress
    Connecting,
    /// Session established and ready for operations
    Connected,
    /// Established session lost; transport reconnect pending
    Interrupted,
    /// Reconnected without persisted state; resubmitting subscriptions
    Resubscribing,
}

/// Delivery guarantee level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QosLevel {
    AtMostOnce,
    AtLeastOnce,
}

impl From<QosLevel> for rumqttc::QoS {
    fn from(qos: QosLevel) -> Self {
        match qos {
            QosLevel::AtMostOnce => rumqttc::QoS::AtMostOnce,
            QosLevel::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        }
    }
}

impl QosLevel {
    /// Map a broker-granted QoS onto the levels this device uses
    pub fn from_granted(qos: rumqttc::QoS) -> Self {
        match qos {
            rumqttc::QoS::AtMostOnce => QosLevel::AtMostOnce,
            _ => QosLevel::AtLeastOnce,
        }
    }
}

/// A message delivered on a subscribed topic
///
/// The payload is opaque bytes at this layer; no transformation is performed.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QosLevel,
    pub duplicate: bool,
    pub retained: bool,
}

/// Fault raised by an inbound handler; caught and logged by the router
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Handler invoked for every message on a subscribed topic.
///
/// Runs on the session's I/O task: handlers must not block on long-running
/// work.
pub type InboundHandler =
    Arc<dyn Fn(&InboundMessage) -> Result<(), HandlerError> + Send + Sync>;

/// Broker acknowledgment of a subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeAck {
    pub topic: String,
    pub granted: QosLevel,
}

/// The broker refused part of the device's topic contract.
///
/// Raised when a resubmitted subscription is rejected after session loss;
/// continued operation would violate the device contract, so the process
/// terminates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FatalEvent {
    pub topic: String,
}

impl fmt::Display for FatalEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "broker rejected subscription to topic: {}", self.topic)
    }
}

/// Connection establishment errors
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("Transport error: {0}")]
    Transport(#[from] rumqttc::ConnectionError),
    #[error("Broker refused connection: {0:?}")]
    Refused(rumqttc::ConnectReturnCode),
    #[error("Session already running")]
    AlreadyRunning,
}

/// Subscription errors
#[derive(Debug, Error)]
pub enum SubscribeError {
    #[error("Broker rejected subscription to {topic}")]
    Rejected { topic: String },
    #[error("Subscribe request failed: {0}")]
    Request(#[from] rumqttc::ClientError),
    #[error("Subscription acknowledgment channel closed")]
    AckDropped,
}

/// Publish errors
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: ConnectionState },
    #[error("Publish request failed: {0}")]
    Request(#[from] rumqttc::ClientError),
}

/// Session trait for broker communication
///
/// Abstraction over the MQTT session manager so the device lifecycle and
/// publish loop can be exercised against a mock.
#[async_trait::async_trait]
pub trait Session: Send + Sync {
    /// Make exactly one connection attempt.
    ///
    /// Retrying is the caller's responsibility; see
    /// [`mqtt::connection::RetryPolicy`].
    async fn connect(&mut self) -> Result<(), ConnectError>;

    /// Register a subscription and resolve once the broker acknowledges it.
    ///
    /// The subscription persists across reconnects: after a session is
    /// established without persisted state, the full registered set is
    /// resubmitted in registration order.
    async fn subscribe(
        &self,
        topic: &str,
        qos: QosLevel,
        handler: InboundHandler,
    ) -> Result<SubscribeAck, SubscribeError>;

    /// Send a message; fails with [`PublishError::NotConnected`] unless the
    /// session is connected.
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QosLevel,
    ) -> Result<(), PublishError>;

    /// Current connection state
    fn connection_state(&self) -> ConnectionState;

    /// Await the next fatal session event (rejected resubscription).
    ///
    /// Returns `None` if the session can no longer raise fatal events.
    async fn recv_fatal(&self) -> Option<FatalEvent>;
}

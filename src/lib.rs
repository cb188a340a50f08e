//! Telemsim - Simulated Telemetry Device
//!
//! A simulated vehicle telemetry device that maintains a mutually
//! authenticated MQTT session to a cloud broker, subscribes to a control
//! topic, and publishes synthetic sensor readings on a fixed cadence.
//!
//! # Overview
//!
//! This crate provides:
//! - A session layer with a connection state machine, automatic
//!   resubscription after session loss, and guarded publishing
//! - Topic routing of inbound messages to registered handlers
//! - A periodic publish loop fed by a sensor reading generator
//! - Device lifecycle orchestration (connect with retry, subscribe, run)
//!
//! # Quick Start
//!
//! ```rust
//! use telemsim::telemetry::SensorReading;
//!
//! // Build a reading and serialize it to the wire payload format
//! let reading = SensorReading {
//!     car_name: "car-7".to_string(),
//!     temperature: 25.3,
//!     longitude: 39.1,
//!     latitude: -94.5,
//!     pressure: 110,
//!     rpm: 2200,
//!     speed: 20,
//!     battery: 12.4,
//!     timestamp: 1000,
//! };
//!
//! let json = serde_json::to_string(&reading.to_wire()).unwrap();
//! assert!(json.starts_with("{\"car_name\":\"car-7\""));
//! ```

pub mod config;
pub mod device;
pub mod identity;
pub mod observability;
pub mod session;
pub mod telemetry;
pub mod testing;

pub use config::{ConfigError, DeviceConfig};
pub use device::DeviceLifecycle;
pub use identity::DeviceIdentity;
pub use session::{
    ConnectError, ConnectionState, FatalEvent, InboundMessage, PublishError, QosLevel, Session,
    SubscribeAck, SubscribeError,
};
pub use session::mqtt::SessionClient;
pub use telemetry::{ReadingGenerator, SensorReading, VehicleSimulator};

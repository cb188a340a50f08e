//! Telemetry: synthetic sensor readings and the outbound publish cadence

pub mod generator;
pub mod publisher;
pub mod reading;

pub use generator::{ReadingGenerator, VehicleSimulator};
pub use publisher::PublishLoop;
pub use reading::{GeoJson, SensorReading, WirePayload};

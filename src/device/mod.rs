//! Device lifecycle orchestration

pub mod lifecycle;

pub use lifecycle::{DeviceLifecycle, LifecycleError};

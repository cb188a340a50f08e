//! MQTT session implementation
//!
//! Connection configuration and policy live in [`connection`], inbound
//! dispatch in [`router`], and the impure session manager in [`client`].

pub mod client;
pub mod connection;
pub mod router;

pub use client::SessionClient;
pub use connection::{
    configure_mqtt_options, RetryPolicy, TopicBuilder, TransportConfig, TransportRuntime,
};
pub use router::{Subscription, TopicRouter};

//! Pure connection configuration for the MQTT session
//!
//! Transport configuration and option construction, the explicit transport
//! runtime, the retry policy for initial connection attempts, and topic
//! construction.

use crate::config::DeviceConfig;
use crate::identity::DeviceIdentity;
use rumqttc::{AsyncClient, EventLoop, MqttOptions, TlsConfiguration, Transport};
use std::time::Duration;

/// Broker endpoint and session parameters for one connection
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Broker hostname
    pub endpoint: String,
    /// Broker port
    pub port: u16,
    /// Keep-alive ping interval
    pub keep_alive: Duration,
    /// Pause after an interruption before the transport's automatic
    /// reconnect handshake
    pub reconnect_pause: Duration,
    /// Credential material, owned for the life of the connection
    pub identity: DeviceIdentity,
}

impl TransportConfig {
    pub fn new(endpoint: impl Into<String>, port: u16, identity: DeviceIdentity) -> Self {
        Self {
            endpoint: endpoint.into(),
            port,
            keep_alive: Duration::from_secs(30),
            reconnect_pause: Duration::from_secs(1),
            identity,
        }
    }

    /// Build from a loaded device configuration and its identity
    pub fn from_config(config: &DeviceConfig, identity: DeviceIdentity) -> Self {
        Self {
            endpoint: config.mqtt.endpoint.clone(),
            port: config.mqtt.port,
            keep_alive: Duration::from_secs(config.mqtt.keep_alive_secs),
            reconnect_pause: Duration::from_secs(1),
            identity,
        }
    }
}

/// Build MQTT options for a mutually authenticated clean session
pub fn configure_mqtt_options(config: &TransportConfig) -> MqttOptions {
    let mut options = MqttOptions::new(
        config.identity.client_id.clone(),
        config.endpoint.clone(),
        config.port,
    );

    options.set_keep_alive(config.keep_alive);
    // Clean session: the broker keeps no subscription state across
    // reconnects, so the session manager resubmits the full set itself.
    options.set_clean_session(true);
    options.set_transport(Transport::Tls(TlsConfiguration::Simple {
        ca: config.identity.trust_root.clone(),
        alpn: None,
        client_auth: Some((
            config.identity.certificate.clone(),
            config.identity.private_key.clone(),
        )),
    }));

    options
}

/// Explicit owner of the transport's request handle and event loop
///
/// Constructed once per session and handed to the session client; there is no
/// global transport state.
pub struct TransportRuntime {
    pub client: AsyncClient,
    pub event_loop: EventLoop,
}

impl TransportRuntime {
    pub fn new(config: &TransportConfig) -> Self {
        let (client, event_loop) = AsyncClient::new(configure_mqtt_options(config), 16);
        Self { client, event_loop }
    }
}

/// Retry policy for initial connection attempts
///
/// The always-on deployment model never gives up by default: unbounded
/// attempts with a fixed delay between them. This covers only the initial
/// connection; reconnects after an established session drops are handled by
/// the transport itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: Option<u32>,
    delay: Duration,
}

impl RetryPolicy {
    /// Retry forever with a fixed delay between attempts
    pub fn unbounded(delay: Duration) -> Self {
        Self {
            max_attempts: None,
            delay,
        }
    }

    /// Give up after `max_attempts` attempts
    pub fn limited(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            delay,
        }
    }

    /// Delay before the next attempt, given the number of attempts already
    /// made. Returns `None` once attempts are exhausted.
    pub fn next_delay(&self, attempts_made: u32) -> Option<Duration> {
        match self.max_attempts {
            Some(max) if attempts_made >= max => None,
            _ => Some(self.delay),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::unbounded(Duration::from_secs(5))
    }
}

/// Topic construction for the device's topic contract
pub struct TopicBuilder;

impl TopicBuilder {
    /// Data topic the device publishes readings to: `device/{thing_name}/data`
    pub fn data_topic(thing_name: &str) -> String {
        format!("device/{thing_name}/data")
    }

    /// Control topic the device subscribes to
    pub fn control_topic() -> &'static str {
        "app/data"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_identity() -> DeviceIdentity {
        DeviceIdentity {
            client_id: "test-device".to_string(),
            certificate: b"cert".to_vec(),
            private_key: b"key".to_vec(),
            trust_root: b"ca".to_vec(),
        }
    }

    #[test]
    fn test_configure_mqtt_options() {
        let config = TransportConfig::new("broker.example.com", 8883, test_identity());
        let options = configure_mqtt_options(&config);

        assert_eq!(options.client_id(), "test-device");
        assert_eq!(
            options.broker_address(),
            ("broker.example.com".to_string(), 8883)
        );
        assert_eq!(options.keep_alive(), Duration::from_secs(30));
        assert!(options.clean_session());
    }

    #[test]
    fn test_transport_config_from_device_config() {
        let device_config = crate::config::DeviceConfig::test_config();
        let config = TransportConfig::from_config(&device_config, test_identity());

        assert_eq!(config.endpoint, "localhost");
        assert_eq!(config.port, 8883);
        assert_eq!(config.keep_alive, Duration::from_secs(30));
    }

    #[test]
    fn test_retry_policy_default_is_unbounded_five_seconds() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.next_delay(0), Some(Duration::from_secs(5)));
        assert_eq!(policy.next_delay(1_000_000), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_retry_policy_limited_gives_up() {
        let policy = RetryPolicy::limited(3, Duration::from_millis(10));
        assert_eq!(policy.next_delay(0), Some(Duration::from_millis(10)));
        assert_eq!(policy.next_delay(2), Some(Duration::from_millis(10)));
        assert_eq!(policy.next_delay(3), None);
        assert_eq!(policy.next_delay(4), None);
    }

    #[test]
    fn test_topic_construction() {
        assert_eq!(TopicBuilder::data_topic("rachet"), "device/rachet/data");
        assert_eq!(TopicBuilder::control_topic(), "app/data");
    }
}

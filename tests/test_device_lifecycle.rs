//! Integration tests for the device lifecycle against a mock session
//!
//! Covers the externally observable behavior: initial-connect retry pacing,
//! fatal handling of rejected subscriptions, steady publish cadence with
//! drop-and-continue, and inbound control message dispatch.

use std::time::Duration;
use telemsim::config::DeviceConfig;
use telemsim::device::{DeviceLifecycle, LifecycleError};
use telemsim::session::mqtt::RetryPolicy;
use telemsim::session::{ConnectionState, QosLevel};
use telemsim::telemetry::{ReadingGenerator, SensorReading};
use telemsim::testing::mocks::MockSession;
use telemsim::Session;
use telemsim::VehicleSimulator;

fn test_config() -> DeviceConfig {
    toml::from_str(
        r#"
[device]
thing_name = "rachet"

[mqtt]
endpoint = "localhost"
cert_path = "device.cert.pem"
key_path = "device.private.key"
ca_path = "root-CA.crt"
"#,
    )
    .unwrap()
}

fn lifecycle_with(session: MockSession) -> DeviceLifecycle<MockSession> {
    DeviceLifecycle::new(
        test_config(),
        session,
        Box::new(VehicleSimulator::seeded(42)),
    )
}

#[tokio::test(start_paused = true)]
async fn initial_connect_retries_until_success() {
    let mut device = lifecycle_with(MockSession::with_connect_failures(5));

    let started = tokio::time::Instant::now();
    device.start().await.unwrap();

    let session = device.session().unwrap();
    assert_eq!(session.connect_attempts(), 6);
    // Five failures, each spaced by the fixed 5 second delay
    assert_eq!(started.elapsed(), Duration::from_secs(25));
    assert_eq!(session.connection_state(), ConnectionState::Connected);
}

#[tokio::test]
async fn rejected_control_subscription_terminates_startup() {
    let mut device = lifecycle_with(MockSession::with_rejected_topic("app/data"));

    let result = device.start().await;

    match result {
        Err(LifecycleError::SubscriptionRejected { topic }) => assert_eq!(topic, "app/data"),
        other => panic!("Expected SubscriptionRejected, got {other:?}"),
    }
}

#[tokio::test]
async fn rejected_resubscription_surfaces_through_wait_fatal() {
    let mut device = lifecycle_with(MockSession::new());
    device.start().await.unwrap();

    device.session().unwrap().emit_fatal("app/data");

    let event = device.wait_fatal().await.expect("fatal event");
    assert_eq!(event.topic, "app/data");
}

#[tokio::test(start_paused = true)]
async fn publish_cadence_drops_while_disconnected_and_recovers() {
    let mut device = lifecycle_with(MockSession::new());
    device.start().await.unwrap();
    let session = device.session().unwrap().clone();

    // Healthy cadence on the data topic
    tokio::time::sleep(Duration::from_secs(11)).await;
    let healthy = session.published().len();
    assert!(healthy >= 2, "expected publishes while connected");
    assert!(session
        .published()
        .iter()
        .all(|(topic, _, qos)| topic == "device/rachet/data" && *qos == QosLevel::AtLeastOnce));

    // Interruption: ticks keep firing, readings are dropped without error
    session.set_state(ConnectionState::Interrupted);
    tokio::time::sleep(Duration::from_secs(15)).await;
    let during_outage = session.published().len();
    assert_eq!(during_outage, healthy, "no publishes while interrupted");

    // Recovery: the next tick publishes a fresh reading, no backlog replay
    session.set_state(ConnectionState::Connected);
    tokio::time::sleep(Duration::from_secs(6)).await;
    let after_recovery = session.published().len();
    assert!(
        after_recovery > during_outage,
        "publishing resumes after recovery"
    );
    assert!(
        after_recovery - during_outage <= 2,
        "dropped readings are not replayed"
    );

    device.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn published_payloads_have_wire_shape() {
    let mut device = lifecycle_with(MockSession::new());
    device.start().await.unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;

    let published = device.session().unwrap().published();
    assert!(!published.is_empty());

    let json: serde_json::Value = serde_json::from_slice(&published[0].1).unwrap();
    assert!(json["car_name"].as_str().unwrap().starts_with("car-"));
    assert!(json["temperature"].is_string());
    assert!(json["location"].is_string());
    assert_eq!(json["geoJSON"]["type"], "Point");
    assert_eq!(json["geoJSON"]["coordinates"].as_array().unwrap().len(), 2);
    assert!(json["pressure"].is_i64());
    assert!(json["rpm"].is_i64());
    assert!(json["speed"].is_i64());
    assert!(json["battery"].is_string());
    assert!(json["timestamp"].is_u64());

    device.shutdown().await;
}

#[tokio::test]
async fn inbound_control_messages_reach_the_handler() {
    let mut device = lifecycle_with(MockSession::new());
    device.start().await.unwrap();
    let session = device.session().unwrap();

    // The lifecycle registered exactly one handler, on the control topic
    assert_eq!(session.inject_message("app/data", b"{\"cmd\":\"ping\"}"), 1);
    assert_eq!(session.inject_message("device/rachet/data", b"{}"), 0);
}

#[tokio::test(start_paused = true)]
async fn custom_generator_feeds_the_publish_loop() {
    struct StaticGenerator;

    impl ReadingGenerator for StaticGenerator {
        fn next_reading(&mut self) -> SensorReading {
            SensorReading {
                car_name: "car-99".to_string(),
                temperature: 21.0,
                longitude: 0.0,
                latitude: 0.0,
                pressure: 100,
                rpm: 1000,
                speed: 10,
                battery: 12.0,
                timestamp: 0,
            }
        }
    }

    let mut device =
        DeviceLifecycle::new(test_config(), MockSession::new(), Box::new(StaticGenerator))
            .with_retry_policy(RetryPolicy::limited(1, Duration::from_secs(5)));
    device.start().await.unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;

    let published = device.session().unwrap().published();
    let json: serde_json::Value = serde_json::from_slice(&published[0].1).unwrap();
    assert_eq!(json["car_name"], "car-99");

    device.shutdown().await;
}

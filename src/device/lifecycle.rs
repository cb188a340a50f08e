//! Device lifecycle management
//!
//! Sequences the device's startup and steady state: connect under the
//! initial-connect retry policy, subscribe to the control topic, then run the
//! publish loop for the life of the process. Fatal session events (a rejected
//! required subscription) surface here so the process can exit non-zero.

use crate::config::DeviceConfig;
use crate::session::mqtt::{RetryPolicy, TopicBuilder};
use crate::session::{FatalEvent, InboundHandler, QosLevel, Session, SubscribeError};
use crate::telemetry::{PublishLoop, ReadingGenerator};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Device lifecycle management with dependency injection
pub struct DeviceLifecycle<S>
where
    S: Session + 'static,
{
    config: DeviceConfig,
    retry_policy: RetryPolicy,
    session: Option<S>,
    generator: Option<Box<dyn ReadingGenerator>>,
    shared_session: Option<Arc<S>>,
    publish_handle: Option<JoinHandle<()>>,
}

impl<S> DeviceLifecycle<S>
where
    S: Session + 'static,
{
    /// Create a lifecycle manager with injected dependencies
    pub fn new(config: DeviceConfig, session: S, generator: Box<dyn ReadingGenerator>) -> Self {
        Self {
            config,
            retry_policy: RetryPolicy::default(),
            session: Some(session),
            generator: Some(generator),
            shared_session: None,
            publish_handle: None,
        }
    }

    /// Override the initial-connect retry policy
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn thing_name(&self) -> &str {
        &self.config.device.thing_name
    }

    pub fn is_started(&self) -> bool {
        self.publish_handle.is_some()
    }

    /// Shared session handle, available after `start()`
    pub fn session(&self) -> Option<&Arc<S>> {
        self.shared_session.as_ref()
    }

    /// Start the device: connect per the retry policy, subscribe the control
    /// topic, and spawn the publish loop.
    pub async fn start(&mut self) -> Result<(), LifecycleError> {
        let mut session = self.session.take().ok_or(LifecycleError::AlreadyStarted)?;
        let generator = self.generator.take().ok_or(LifecycleError::AlreadyStarted)?;

        info!(thing_name = %self.config.device.thing_name, "Starting device");
        Self::connect_with_retry(&mut session, &self.retry_policy).await?;

        let control_topic = TopicBuilder::control_topic();
        info!(topic = %control_topic, "Subscribing to control topic");
        let ack = session
            .subscribe(control_topic, QosLevel::AtLeastOnce, Self::control_handler())
            .await
            .map_err(|e| match e {
                SubscribeError::Rejected { topic } => {
                    LifecycleError::SubscriptionRejected { topic }
                }
                other => LifecycleError::Subscribe(other),
            })?;
        info!(topic = %ack.topic, granted = ?ack.granted, "Subscribed");

        let session = Arc::new(session);
        let data_topic = TopicBuilder::data_topic(&self.config.device.thing_name);
        let period = Duration::from_secs(self.config.telemetry.publish_interval_secs);
        let publish_loop =
            PublishLoop::new(session.clone(), generator, data_topic.clone(), period);

        self.publish_handle = Some(tokio::spawn(publish_loop.run()));
        info!(
            topic = %data_topic,
            period_secs = period.as_secs(),
            "Publish loop started"
        );

        self.shared_session = Some(session);
        Ok(())
    }

    /// Handler for the control topic: logs received payloads
    fn control_handler() -> InboundHandler {
        Arc::new(|msg| {
            info!(
                topic = %msg.topic,
                payload = %String::from_utf8_lossy(&msg.payload),
                "Received message"
            );
            Ok(())
        })
    }

    /// Wrap single connection attempts in the retry policy.
    ///
    /// Unbounded by default: an always-on device keeps trying until the
    /// broker appears.
    async fn connect_with_retry(
        session: &mut S,
        policy: &RetryPolicy,
    ) -> Result<(), LifecycleError> {
        let mut attempts = 0u32;
        loop {
            match session.connect().await {
                Ok(()) => {
                    info!(attempts = attempts + 1, "Connected to broker");
                    return Ok(());
                }
                Err(e) => {
                    attempts += 1;
                    match policy.next_delay(attempts) {
                        Some(delay) => {
                            warn!(
                                error = %e,
                                attempt = attempts,
                                delay_secs = delay.as_secs(),
                                "Connection failed, retrying"
                            );
                            tokio::time::sleep(delay).await;
                        }
                        None => {
                            error!(error = %e, attempts, "Connection attempts exhausted");
                            return Err(LifecycleError::Connect(e));
                        }
                    }
                }
            }
        }
    }

    /// Await a fatal session event. Resolves only when the device's topic
    /// contract has been violated and the process should exit non-zero.
    pub async fn wait_fatal(&self) -> Option<FatalEvent> {
        match &self.shared_session {
            Some(session) => session.recv_fatal().await,
            None => None,
        }
    }

    /// Stop the publish loop (signal-driven shutdown path)
    pub async fn shutdown(&mut self) {
        if let Some(handle) = self.publish_handle.take() {
            handle.abort();
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    error!(error = %e, "Publish loop ended with error");
                }
            }
        }
        info!("Device shutdown complete");
    }
}

/// Device lifecycle errors
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Connection attempts exhausted")]
    Connect(#[source] crate::session::ConnectError),
    #[error("Broker rejected required subscription to {topic}")]
    SubscriptionRejected { topic: String },
    #[error("Subscription failed")]
    Subscribe(#[source] SubscribeError),
    #[error("Device already started")]
    AlreadyStarted,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mocks::MockSession;
    use crate::VehicleSimulator;

    fn test_lifecycle(session: MockSession) -> DeviceLifecycle<MockSession> {
        DeviceLifecycle::new(
            DeviceConfig::test_config(),
            session,
            Box::new(VehicleSimulator::seeded(1)),
        )
    }

    #[tokio::test]
    async fn test_start_subscribes_control_topic() {
        let mut lifecycle = test_lifecycle(MockSession::new());

        lifecycle.start().await.unwrap();

        assert!(lifecycle.is_started());
        let session = lifecycle.session().unwrap();
        assert_eq!(
            session.subscriptions(),
            vec![("app/data".to_string(), QosLevel::AtLeastOnce)]
        );
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let mut lifecycle = test_lifecycle(MockSession::new());

        lifecycle.start().await.unwrap();
        let second = lifecycle.start().await;

        assert!(matches!(second, Err(LifecycleError::AlreadyStarted)));
    }

    #[tokio::test]
    async fn test_rejected_control_subscription_is_fatal() {
        let mut lifecycle = test_lifecycle(MockSession::with_rejected_topic("app/data"));

        let result = lifecycle.start().await;

        assert!(matches!(
            result,
            Err(LifecycleError::SubscriptionRejected { topic }) if topic == "app/data"
        ));
        assert!(!lifecycle.is_started());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_retry_spacing() {
        let mut lifecycle = test_lifecycle(MockSession::with_connect_failures(3));

        let started = tokio::time::Instant::now();
        lifecycle.start().await.unwrap();

        // Three failures, each followed by a fixed 5 second delay
        assert_eq!(started.elapsed(), Duration::from_secs(15));
        assert_eq!(lifecycle.session().unwrap().connect_attempts(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_limited_retry_policy_gives_up() {
        let mut lifecycle = test_lifecycle(MockSession::with_connect_failures(10))
            .with_retry_policy(RetryPolicy::limited(2, Duration::from_millis(10)));

        let result = lifecycle.start().await;

        assert!(matches!(result, Err(LifecycleError::Connect(_))));
    }

    #[tokio::test]
    async fn test_wait_fatal_surfaces_session_event() {
        let mut lifecycle = test_lifecycle(MockSession::new());
        lifecycle.start().await.unwrap();

        lifecycle.session().unwrap().emit_fatal("app/data");

        let event = lifecycle.wait_fatal().await.unwrap();
        assert_eq!(event.topic, "app/data");
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_loop_runs_after_start() {
        let mut lifecycle = test_lifecycle(MockSession::new());
        lifecycle.start().await.unwrap();

        tokio::time::sleep(Duration::from_secs(11)).await;

        let published = lifecycle.session().unwrap().published();
        assert!(
            published.len() >= 2,
            "expected periodic publishes, got {}",
            published.len()
        );
        assert!(published.iter().all(|(topic, _, _)| topic == "device/test-device/data"));

        lifecycle.shutdown().await;
    }
}

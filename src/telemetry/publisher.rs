//! Outbound publish cadence
//!
//! The publish loop is the program's main long-running activity once setup
//! completes; it runs independently of inbound handling and of connection
//! state.

use crate::session::{PublishError, QosLevel, Session};
use crate::telemetry::ReadingGenerator;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, warn};

/// Periodically publishes a fresh reading on the device's data topic.
///
/// A tick that cannot publish is dropped and the next tick tries again with a
/// fresh reading. No buffering, no catch-up: the most recent reading always
/// wins.
pub struct PublishLoop<S: Session> {
    session: Arc<S>,
    generator: Box<dyn ReadingGenerator>,
    topic: String,
    period: Duration,
    qos: QosLevel,
}

impl<S: Session> PublishLoop<S> {
    pub fn new(
        session: Arc<S>,
        generator: Box<dyn ReadingGenerator>,
        topic: impl Into<String>,
        period: Duration,
    ) -> Self {
        Self {
            session,
            generator,
            topic: topic.into(),
            period,
            qos: QosLevel::AtLeastOnce,
        }
    }

    /// Run forever. The first reading is published immediately.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            self.publish_tick().await;
        }
    }

    /// One cadence tick: generate, serialize, publish
    async fn publish_tick(&mut self) {
        let reading = self.generator.next_reading();
        let payload = match serde_json::to_vec(&reading.to_wire()) {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "Failed to serialize reading");
                return;
            }
        };

        match self.session.publish(&self.topic, payload, self.qos).await {
            Ok(()) => {
                debug!(topic = %self.topic, car = %reading.car_name, "Published reading");
            }
            Err(PublishError::NotConnected { state }) => {
                debug!(state = ?state, "Not connected; reading dropped");
            }
            Err(e) => {
                warn!(error = %e, "Publish failed; reading dropped");
            }
        }
    }
}

//! Impure I/O for the MQTT session
//!
//! [`SessionClient`] owns one logical connection to the broker: a single
//! connection attempt per `connect()` call, a supervisor task that drives the
//! transport event loop, state transitions through
//! [`ConnectionState`](crate::session::ConnectionState), resubscription after
//! session loss, and guarded publishing.

use super::connection::{TransportConfig, TransportRuntime};
use super::router::{self, Subscription, TopicRouter};
use crate::session::{
    ConnectError, ConnectionState, FatalEvent, InboundHandler, InboundMessage, PublishError,
    QosLevel, Session, SubscribeAck, SubscribeError,
};
use rumqttc::{
    AsyncClient, ConnAck, ConnectReturnCode, Event, EventLoop, Packet, Publish, SubAck,
    SubscribeReasonCode,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// An expectation for a SUBACK. The broker acknowledges subscribe packets in
/// the order they were sent, so a FIFO queue correlates acks with requests.
struct PendingSubscribe {
    topic: String,
    /// Present for caller-initiated subscriptions; absent for automatic
    /// resubmission, where a rejection goes to the fatal channel instead.
    ack: Option<oneshot::Sender<Result<SubscribeAck, SubscribeError>>>,
}

/// Shared state handed to the supervisor task
struct SupervisorContext {
    client: AsyncClient,
    state_tx: watch::Sender<ConnectionState>,
    router: Arc<Mutex<TopicRouter>>,
    pending: Arc<Mutex<VecDeque<PendingSubscribe>>>,
    fatal_tx: mpsc::UnboundedSender<FatalEvent>,
    reconnect_pause: Duration,
}

/// MQTT session manager for one device
///
/// At most one active network connection exists per client. The connection
/// state is written only by the supervisor task once the session is up;
/// other tasks read it through a watch channel.
pub struct SessionClient {
    client: AsyncClient,
    event_loop: Mutex<Option<EventLoop>>,
    supervisor: Option<JoinHandle<()>>,
    state_tx: watch::Sender<ConnectionState>,
    state_rx: watch::Receiver<ConnectionState>,
    router: Arc<Mutex<TopicRouter>>,
    pending: Arc<Mutex<VecDeque<PendingSubscribe>>>,
    fatal_tx: mpsc::UnboundedSender<FatalEvent>,
    fatal_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<FatalEvent>>,
    reconnect_pause: Duration,
}

impl SessionClient {
    pub fn new(config: &TransportConfig) -> Self {
        Self::with_runtime(TransportRuntime::new(config), config.reconnect_pause)
    }

    /// Build a session around an already-constructed transport runtime
    pub fn with_runtime(runtime: TransportRuntime, reconnect_pause: Duration) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (fatal_tx, fatal_rx) = mpsc::unbounded_channel();

        Self {
            client: runtime.client,
            event_loop: Mutex::new(Some(runtime.event_loop)),
            supervisor: None,
            state_tx,
            state_rx,
            router: Arc::new(Mutex::new(TopicRouter::new())),
            pending: Arc::new(Mutex::new(VecDeque::new())),
            fatal_tx,
            fatal_rx: tokio::sync::Mutex::new(fatal_rx),
            reconnect_pause,
        }
    }

    /// Make exactly one connection attempt.
    ///
    /// Drives the event loop until the first CONNACK. On success the event
    /// loop moves into a supervisor task and this method never runs again; on
    /// failure the event loop is retained so the caller's retry policy can
    /// try again.
    pub async fn connect(&mut self) -> Result<(), ConnectError> {
        let mut event_loop = self
            .event_loop
            .lock()
            .unwrap()
            .take()
            .ok_or(ConnectError::AlreadyRunning)?;
        let _ = self.state_tx.send(ConnectionState::Connecting);

        if let Err(e) = Self::establish(&mut event_loop).await {
            let _ = self.state_tx.send(ConnectionState::Disconnected);
            *self.event_loop.lock().unwrap() = Some(event_loop);
            return Err(e);
        }

        let _ = self.state_tx.send(ConnectionState::Connected);
        info!("MQTT session established");

        let ctx = SupervisorContext {
            client: self.client.clone(),
            state_tx: self.state_tx.clone(),
            router: self.router.clone(),
            pending: self.pending.clone(),
            fatal_tx: self.fatal_tx.clone(),
            reconnect_pause: self.reconnect_pause,
        };
        self.supervisor = Some(tokio::spawn(Self::run_event_loop(ctx, event_loop)));

        Ok(())
    }

    /// Poll until the broker acknowledges the connection
    async fn establish(event_loop: &mut EventLoop) -> Result<(), ConnectError> {
        loop {
            match event_loop.poll().await? {
                Event::Incoming(Packet::ConnAck(ConnAck { code, .. })) => {
                    if code == ConnectReturnCode::Success {
                        return Ok(());
                    }
                    return Err(ConnectError::Refused(code));
                }
                other => {
                    debug!(event = ?other, "Event before connection acknowledgment");
                }
            }
        }
    }

    /// Register a subscription and resolve once the broker acknowledges it.
    ///
    /// The subscribe request is queued by the transport if the session is not
    /// yet connected. A SUBACK without a granted QoS resolves to
    /// [`SubscribeError::Rejected`].
    pub async fn subscribe(
        &self,
        topic: &str,
        qos: QosLevel,
        handler: InboundHandler,
    ) -> Result<SubscribeAck, SubscribeError> {
        self.router
            .lock()
            .unwrap()
            .register(Subscription::new(topic, qos, handler));

        let (ack_tx, ack_rx) = oneshot::channel();
        self.pending.lock().unwrap().push_back(PendingSubscribe {
            topic: topic.to_string(),
            ack: Some(ack_tx),
        });

        debug!(topic = %topic, "Subscribing");
        if let Err(e) = self.client.subscribe(topic, qos.into()).await {
            // Withdraw the expectation just queued; no SUBACK will arrive
            let mut pending = self.pending.lock().unwrap();
            if let Some(idx) = pending.iter().rposition(|p| p.topic == topic) {
                pending.remove(idx);
            }
            return Err(SubscribeError::Request(e));
        }

        match ack_rx.await {
            Ok(result) => result,
            Err(_) => Err(SubscribeError::AckDropped),
        }
    }

    /// Send a message on a topic. Only valid while connected; callers decide
    /// whether to drop, buffer, or retry on `NotConnected`.
    pub async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QosLevel,
    ) -> Result<(), PublishError> {
        let state = *self.state_rx.borrow();
        if state != ConnectionState::Connected {
            return Err(PublishError::NotConnected { state });
        }

        self.client
            .publish(topic, qos.into(), false, payload)
            .await
            .map_err(PublishError::Request)
    }

    /// Current connection state
    pub fn connection_state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Await the next fatal session event
    pub async fn recv_fatal(&self) -> Option<FatalEvent> {
        self.fatal_rx.lock().await.recv().await
    }

    /// Supervisor: drives the event loop for the life of the process.
    ///
    /// Poll errors mark the session interrupted; the transport performs its
    /// own reconnect handshake on the next poll after a short pause.
    async fn run_event_loop(ctx: SupervisorContext, mut event_loop: EventLoop) {
        info!("Session supervisor started");
        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(packet)) => Self::handle_incoming(&ctx, packet),
                Ok(Event::Outgoing(_)) => {}
                Err(e) => {
                    Self::on_connection_interrupted(&ctx, &e);
                    tokio::time::sleep(ctx.reconnect_pause).await;
                }
            }
        }
    }

    fn handle_incoming(ctx: &SupervisorContext, packet: Packet) {
        match packet {
            Packet::ConnAck(ack) => Self::on_connection_resumed(ctx, ack),
            Packet::SubAck(suback) => Self::on_subscribe_ack(ctx, suback),
            Packet::Publish(publish) => Self::on_publish(ctx, publish),
            Packet::Disconnect => {
                warn!("Broker disconnected the session");
                let _ = ctx.state_tx.send(ConnectionState::Interrupted);
            }
            Packet::PingResp => {}
            other => debug!(packet = ?other, "Unhandled incoming packet"),
        }
    }

    /// An established session dropped. The transport's background reconnect
    /// drives the next transition; nothing is retried here.
    fn on_connection_interrupted(ctx: &SupervisorContext, error: &rumqttc::ConnectionError) {
        let current = *ctx.state_tx.borrow();
        if matches!(
            current,
            ConnectionState::Connected | ConnectionState::Resubscribing
        ) {
            warn!(error = %error, "Connection interrupted");
            let _ = ctx.state_tx.send(ConnectionState::Interrupted);

            // In-flight SUBACK expectations died with the session; the
            // resubmission after reconnect starts a fresh sequence.
            let mut pending = ctx.pending.lock().unwrap();
            for entry in pending.drain(..) {
                if let Some(ack) = entry.ack {
                    let _ = ack.send(Err(SubscribeError::AckDropped));
                }
            }
        } else {
            debug!(error = %error, "Reconnect attempt failed");
        }
    }

    /// The transport re-established the connection after an interruption.
    fn on_connection_resumed(ctx: &SupervisorContext, ack: ConnAck) {
        if ack.code != ConnectReturnCode::Success {
            warn!(code = ?ack.code, "Reconnect refused by broker");
            return;
        }

        info!(
            session_present = ack.session_present,
            "Connection resumed"
        );

        if ack.session_present {
            let _ = ctx.state_tx.send(ConnectionState::Connected);
            return;
        }

        // Session did not persist: resubmit every registered subscription,
        // in registration order.
        let topics = ctx.router.lock().unwrap().topics_in_order();
        if topics.is_empty() {
            let _ = ctx.state_tx.send(ConnectionState::Connected);
            return;
        }

        let _ = ctx.state_tx.send(ConnectionState::Resubscribing);
        {
            let mut pending = ctx.pending.lock().unwrap();
            for (topic, _) in &topics {
                pending.push_back(PendingSubscribe {
                    topic: topic.clone(),
                    ack: None,
                });
            }
        }

        // The sends happen off the supervisor task; results arrive as
        // SUBACKs. Waiting here would starve the event loop that has to
        // deliver those SUBACKs.
        let client = ctx.client.clone();
        tokio::spawn(async move {
            for (topic, qos) in topics {
                debug!(topic = %topic, "Resubmitting subscription");
                if let Err(e) = client.subscribe(&topic, qos.into()).await {
                    error!(topic = %topic, error = %e, "Failed to resubmit subscription");
                }
            }
        });
    }

    fn on_subscribe_ack(ctx: &SupervisorContext, suback: SubAck) {
        let entry = ctx.pending.lock().unwrap().pop_front();
        let Some(entry) = entry else {
            warn!(
                pkid = suback.pkid,
                "Subscription acknowledgment without expectation"
            );
            return;
        };

        let granted = suback.return_codes.first().and_then(|code| match code {
            SubscribeReasonCode::Success(qos) => Some(QosLevel::from_granted(*qos)),
            SubscribeReasonCode::Failure => None,
        });

        match granted {
            Some(qos) => {
                debug!(topic = %entry.topic, granted = ?qos, "Subscription acknowledged");
                if let Some(ack) = entry.ack {
                    let _ = ack.send(Ok(SubscribeAck {
                        topic: entry.topic,
                        granted: qos,
                    }));
                }

                let drained = ctx.pending.lock().unwrap().is_empty();
                if drained && *ctx.state_tx.borrow() == ConnectionState::Resubscribing {
                    info!("All subscriptions restored");
                    let _ = ctx.state_tx.send(ConnectionState::Connected);
                }
            }
            None => {
                error!(topic = %entry.topic, "Broker rejected subscription");
                match entry.ack {
                    // Caller-initiated: the rejection surfaces through the
                    // subscribe() result.
                    Some(ack) => {
                        let _ = ack.send(Err(SubscribeError::Rejected {
                            topic: entry.topic,
                        }));
                    }
                    // Resubmission: the device's topic contract can no
                    // longer be guaranteed.
                    None => {
                        let _ = ctx.fatal_tx.send(FatalEvent { topic: entry.topic });
                    }
                }
            }
        }
    }

    fn on_publish(ctx: &SupervisorContext, publish: Publish) {
        let message = InboundMessage {
            topic: publish.topic,
            payload: publish.payload,
            qos: QosLevel::from_granted(publish.qos),
            duplicate: publish.dup,
            retained: publish.retain,
        };

        debug!(
            topic = %message.topic,
            bytes = message.payload.len(),
            "Inbound message"
        );

        // Snapshot matching handlers so registration never contends with
        // handler runtime.
        let handlers = ctx.router.lock().unwrap().handlers_for(&message.topic);
        router::dispatch(&handlers, &message);
    }
}

#[async_trait::async_trait]
impl Session for SessionClient {
    async fn connect(&mut self) -> Result<(), ConnectError> {
        SessionClient::connect(self).await
    }

    async fn subscribe(
        &self,
        topic: &str,
        qos: QosLevel,
        handler: InboundHandler,
    ) -> Result<SubscribeAck, SubscribeError> {
        SessionClient::subscribe(self, topic, qos, handler).await
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QosLevel,
    ) -> Result<(), PublishError> {
        SessionClient::publish(self, topic, payload, qos).await
    }

    fn connection_state(&self) -> ConnectionState {
        SessionClient::connection_state(self)
    }

    async fn recv_fatal(&self) -> Option<FatalEvent> {
        SessionClient::recv_fatal(self).await
    }
}

impl Drop for SessionClient {
    fn drop(&mut self) {
        // The supervisor runs for the life of the process under normal
        // operation; stop it if the client goes away first.
        if let Some(handle) = self.supervisor.take() {
            handle.abort();
        }
    }
}

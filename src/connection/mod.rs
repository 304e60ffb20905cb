//! Connection state machine
//!
//! [`Connection`] owns the authoritative [`ConnectionStatus`], turns caller
//! requests into [`Transport`] requests, and turns [`TransportEvent`]s back into
//! [`Completion`]s for the caller's [`ConnectionListener`].
//!
//! Two contexts drive it concurrently: caller threads issuing requests and the
//! single event task draining the transport channel. Internal state is split
//! across small locks; the session lock is the only one ever held while another
//! is taken (session, then pending). No listener or interceptor callback runs
//! while any internal lock is held.

pub mod dedup;
pub mod interceptor;
pub mod listener;
pub mod registry;
pub mod state;

pub use dedup::DeliveryDeduplicator;
pub use interceptor::{InterceptorChain, Interception, MessageInterceptor};
pub use listener::{user_context, Completion, ConnectionListener, NoopListener, UserContext};
pub use registry::SubscriptionRegistry;
pub use state::{ConnectAdmission, ConnectionStatus, SessionState, StatusEvent, StatusTransitions};

use crate::credentials::{CredentialSigner, DeviceIdentity};
use crate::error::{LinkError, LinkResult, Status};
use crate::observability::metrics::{LinkMetrics, MetricsSnapshot};
use crate::protocol::topics::{validate_topic, MAX_TOPIC_LEN};
use crate::transport::{
    qos_level, ActionAck, BufferOptions, ConnectOptions, ConnectRequest, EventReceiver, Message,
    RequestId, Transport, TransportEvent,
};
use parking_lot::Mutex;
use rumqttc::QoS;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// SUBACK return code for a refused subscription
pub const SUBACK_FAILURE: u8 = 0x80;

/// Static per-connection settings
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub server_uri: String,
    pub identity: DeviceIdentity,
    pub max_topic_len: usize,
    pub buffer: Option<BufferOptions>,
}

impl ConnectionSettings {
    pub fn new(server_uri: impl Into<String>, identity: DeviceIdentity) -> Self {
        Self {
            server_uri: server_uri.into(),
            identity,
            max_topic_len: MAX_TOPIC_LEN,
            buffer: None,
        }
    }

    pub fn with_max_topic_len(mut self, max_topic_len: usize) -> Self {
        self.max_topic_len = max_topic_len;
        self
    }

    pub fn with_buffer(mut self, buffer: BufferOptions) -> Self {
        self.buffer = Some(buffer);
        self
    }
}

/// What an in-flight request was, keyed by its [`RequestId`]
#[derive(Debug)]
enum PendingAction {
    Connect { context: UserContext },
    ManualReconnect,
    Disconnect { context: UserContext },
    Publish { topic: String, context: UserContext },
    Subscribe { topic: String, context: UserContext },
    Unsubscribe { topic: String, context: UserContext },
}

/// Device-side MQTT connection manager
pub struct Connection {
    settings: ConnectionSettings,
    transport: Arc<dyn Transport>,
    listener: Arc<dyn ConnectionListener>,
    session: Mutex<SessionState>,
    pending: Mutex<HashMap<RequestId, PendingAction>>,
    subscriptions: Mutex<SubscriptionRegistry>,
    dedup: Mutex<DeliveryDeduplicator>,
    buffer: Mutex<Option<BufferOptions>>,
    interceptors: InterceptorChain,
    next_request: AtomicU64,
    metrics: LinkMetrics,
}

impl Connection {
    pub fn new(
        settings: ConnectionSettings,
        transport: Arc<dyn Transport>,
        listener: Arc<dyn ConnectionListener>,
    ) -> Self {
        let buffer = settings.buffer.clone();
        Self {
            settings,
            transport,
            listener,
            session: Mutex::new(SessionState::new()),
            pending: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(SubscriptionRegistry::new()),
            dedup: Mutex::new(DeliveryDeduplicator::new()),
            buffer: Mutex::new(buffer),
            interceptors: InterceptorChain::new(),
            next_request: AtomicU64::new(1),
            metrics: LinkMetrics::new(),
        }
    }

    /// Append an interceptor to the end of the chain
    pub fn add_interceptor(&self, interceptor: Arc<dyn MessageInterceptor>) {
        self.interceptors.push(interceptor);
    }

    pub fn status(&self) -> ConnectionStatus {
        self.session.lock().status()
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.settings.identity
    }

    pub fn server_uri(&self) -> &str {
        &self.settings.server_uri
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Replace the disconnected publish buffer policy
    pub fn set_buffer_options(&self, buffer: Option<BufferOptions>) {
        *self.buffer.lock() = buffer;
    }

    pub fn buffer_options(&self) -> Option<BufferOptions> {
        self.buffer.lock().clone()
    }

    /// Current subscription registry contents, sorted by topic
    pub fn subscriptions(&self) -> Vec<(String, QoS)> {
        self.subscriptions.lock().snapshot()
    }

    /// Number of requests still awaiting completion
    pub fn pending_requests(&self) -> usize {
        self.pending.lock().len()
    }

    fn next_request_id(&self) -> RequestId {
        RequestId(self.next_request.fetch_add(1, Ordering::Relaxed))
    }

    fn register(&self, action: PendingAction) -> RequestId {
        let id = self.next_request_id();
        self.pending.lock().insert(id, action);
        id
    }

    fn forget(&self, id: RequestId) {
        self.pending.lock().remove(&id);
    }

    fn validate_topic(&self, topic: &str) -> LinkResult {
        validate_topic(topic, self.settings.max_topic_len).map_err(|e| {
            error!("Rejected topic {:?}: {}", topic, e);
            LinkError::invalid_parameter(e.to_string())
        })
    }

    fn build_connect_request(&self, options: ConnectOptions) -> ConnectRequest {
        let credentials =
            CredentialSigner::sign(&self.settings.identity, options.automatic_reconnect);
        debug!(
            "Signed credentials for {} (connection id {}, expiry {})",
            credentials.client_id, credentials.connection_id, credentials.expiry
        );
        ConnectRequest {
            server_uri: self.settings.server_uri.clone(),
            client_id: credentials.client_id,
            username: credentials.username,
            password: credentials.password,
            options,
            buffer: self.buffer.lock().clone(),
        }
    }

    /// Start a session
    ///
    /// Returns `Ok` once the transport accepted the request; the outcome is
    /// reported later as [`Completion::Connect`].
    pub fn connect(&self, options: Option<ConnectOptions>, context: UserContext) -> LinkResult {
        let _span =
            crate::mqtt_span!(operation = "connect", server_uri = %self.settings.server_uri)
                .entered();
        let mut session = self.session.lock();

        match StatusTransitions::admit_connect(session.status()) {
            ConnectAdmission::InProgress => {
                info!("Connect already in progress");
                return Err(LinkError::ConnectInProgress);
            }
            ConnectAdmission::AlreadyConnected => {
                info!("Already connected to {}", self.settings.server_uri);
                return Ok(());
            }
            ConnectAdmission::Proceed => {}
        }

        let options = options.ok_or_else(|| {
            error!("Connect requested without options");
            LinkError::invalid_parameter("connect options are required")
        })?;

        let request = self.build_connect_request(options);
        session.set_connect_request(request.clone());
        session.transition(StatusEvent::ConnectRequested);
        self.metrics.connection_attempt();

        let id = self.register(PendingAction::Connect { context });
        if let Err(e) = self.transport.connect(&request, id) {
            error!("Transport refused connect: {}", e);
            self.forget(id);
            session.transition(StatusEvent::ConnectFailed);
            self.metrics.connection_failed();
            return Err(e.into());
        }

        info!("Connecting to {} as {}", request.server_uri, request.client_id);
        Ok(())
    }

    /// Re-establish the last session
    pub fn reconnect(&self) -> LinkResult {
        let mut session = self.session.lock();

        let Some(options) = session.connect_request().map(|r| r.options.clone()) else {
            error!("Reconnect requested before any connect");
            return Err(LinkError::NoConnection);
        };

        if session.status() == ConnectionStatus::Connecting {
            info!("Reconnect skipped, connect already in progress");
            return Err(LinkError::ConnectInProgress);
        }

        if options.automatic_reconnect {
            info!("Requesting transport reconnect");
            if let Err(e) = self.transport.reconnect() {
                error!("Transport refused reconnect: {}", e);
                session.transition(StatusEvent::ConnectFailed);
                self.metrics.connection_failed();
                return Err(e.into());
            }
        } else if session.status() == ConnectionStatus::Disconnected && !options.clean_session {
            info!("Issuing manual reconnect");
            let request = self.build_connect_request(options);
            session.set_connect_request(request.clone());
            session.transition(StatusEvent::ConnectRequested);
            self.metrics.connection_attempt();

            let id = self.register(PendingAction::ManualReconnect);
            if let Err(e) = self.transport.connect(&request, id) {
                error!("Transport refused manual reconnect: {}", e);
                self.forget(id);
                session.transition(StatusEvent::ConnectFailed);
                self.metrics.connection_failed();
                return Err(e.into());
            }
        } else {
            debug!(
                "Reconnect not applicable in status {} (automatic={}, clean_session={})",
                session.status(),
                options.automatic_reconnect,
                options.clean_session
            );
        }

        Ok(())
    }

    /// Close the session, waiting at most `timeout` when non-zero
    ///
    /// Returns [`LinkError::AlreadyDisconnected`] when the transport holds no
    /// session.
    pub fn disconnect(&self, timeout: Duration, context: UserContext) -> LinkResult {
        self.dedup.lock().reset();
        self.interceptors.reset();

        if !self.transport.is_connected() {
            info!("Disconnect requested while not connected");
            return Err(LinkError::AlreadyDisconnected);
        }

        let timeout = (!timeout.is_zero()).then_some(timeout);
        let id = self.register(PendingAction::Disconnect { context });
        if let Err(e) = self.transport.disconnect(timeout, id) {
            error!("Transport refused disconnect: {}", e);
            self.forget(id);
            return Err(e.into());
        }

        info!("Disconnecting from {}", self.settings.server_uri);
        Ok(())
    }

    /// Queue a publish; written now when connected, buffered when a buffer policy allows it
    pub fn publish(&self, topic: &str, message: Message, context: UserContext) -> LinkResult {
        self.validate_topic(topic)?;

        let connected = self.transport.is_connected();
        if !connected {
            let buffering = self.buffer.lock().as_ref().is_some_and(|b| b.enabled);
            if !buffering || !self.session.lock().has_session() {
                warn!("Publish to {} rejected: not connected and not buffering", topic);
                self.metrics.publish_failed();
                return Err(LinkError::PublishUnavailable);
            }
            debug!("Buffering publish to {} while disconnected", topic);
        }

        let id = self.register(PendingAction::Publish {
            topic: topic.to_string(),
            context,
        });
        if let Err(e) = self.transport.publish(topic, &message, id) {
            error!("Transport refused publish to {}: {}", topic, e);
            self.forget(id);
            self.metrics.publish_failed();
            return Err(e.into());
        }

        debug!(
            "Publish queued: topic={} qos={} bytes={}",
            topic,
            qos_level(message.qos),
            message.payload.len()
        );
        Ok(())
    }

    pub fn subscribe(&self, topic: &str, qos: QoS, context: UserContext) -> LinkResult {
        self.validate_topic(topic)?;

        if !self.transport.is_connected() {
            warn!("Subscribe to {} rejected: not connected", topic);
            return Err(LinkError::NoConnection);
        }

        let id = self.register(PendingAction::Subscribe {
            topic: topic.to_string(),
            context,
        });
        if let Err(e) = self.transport.subscribe(topic, qos, id) {
            error!("Transport refused subscribe to {}: {}", topic, e);
            self.forget(id);
            return Err(e.into());
        }

        self.subscriptions.lock().insert(topic, qos);
        debug!("Subscribe requested: topic={} qos={}", topic, qos_level(qos));
        Ok(())
    }

    pub fn unsubscribe(&self, topic: &str, context: UserContext) -> LinkResult {
        self.validate_topic(topic)?;

        if !self.transport.is_connected() {
            warn!("Unsubscribe from {} rejected: not connected", topic);
            return Err(LinkError::NoConnection);
        }

        let id = self.register(PendingAction::Unsubscribe {
            topic: topic.to_string(),
            context,
        });
        if let Err(e) = self.transport.unsubscribe(topic, id) {
            error!("Transport refused unsubscribe from {}: {}", topic, e);
            self.forget(id);
            return Err(e.into());
        }

        self.subscriptions.lock().remove(topic);
        debug!("Unsubscribe requested: topic={}", topic);
        Ok(())
    }

    /// Drain the transport event channel on a tokio task
    pub fn spawn_event_loop(self: &Arc<Self>, mut events: EventReceiver) -> JoinHandle<()> {
        let connection = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                connection.handle_event(event);
            }
            debug!("Transport event channel closed");
        })
    }

    /// Dispatch one transport event
    pub fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::ConnectComplete {
                reconnect,
                server_uri,
            } => self.on_connect_complete(reconnect, &server_uri),
            TransportEvent::ConnectionLost { cause } => self.on_connection_lost(&cause),
            TransportEvent::ReconnectFailed { cause } => self.on_reconnect_failed(cause),
            TransportEvent::MessageArrived { topic, message } => {
                self.on_message_arrived(&topic, &message)
            }
            TransportEvent::ActionCompleted { request, outcome } => {
                self.on_action_completed(request, outcome)
            }
        }
    }

    fn on_connect_complete(&self, reconnect: bool, server_uri: &str) {
        self.session.lock().transition(StatusEvent::SessionEstablished);

        if !reconnect {
            debug!("Session established with {}", server_uri);
            return;
        }

        info!("Automatic reconnect to {} complete", server_uri);
        self.metrics.reconnected();
        self.replay_subscriptions();
        self.listener.on_completion(Completion::Connect {
            status: Status::Ok,
            reconnect: true,
            context: None,
            detail: format!("reconnected to {server_uri}"),
        });
    }

    /// Re-subscribe every registered topic exactly once, from a snapshot
    fn replay_subscriptions(&self) {
        let snapshot = self.subscriptions.lock().snapshot();
        info!("Replaying {} subscriptions", snapshot.len());

        for (topic, qos) in snapshot {
            let id = self.register(PendingAction::Subscribe {
                topic: topic.clone(),
                context: None,
            });
            match self.transport.subscribe(&topic, qos, id) {
                Ok(()) => self.metrics.subscription_replayed(),
                Err(e) => {
                    warn!("Failed to replay subscription {}: {}", topic, e);
                    self.forget(id);
                    self.metrics.subscribe_failed();
                }
            }
        }
    }

    fn on_connection_lost(&self, cause: &str) {
        self.session.lock().transition(StatusEvent::ConnectionLost);
        self.dedup.lock().reset();
        self.interceptors.reset();
        self.metrics.connection_lost();

        warn!("Connection lost: {}", cause);
        self.listener.on_connection_lost(cause);
    }

    fn on_reconnect_failed(&self, cause: String) {
        self.session.lock().transition(StatusEvent::ConnectFailed);
        self.metrics.connection_failed();
        error!("Reconnect to {} failed: {}", self.settings.server_uri, cause);
        self.listener.on_completion(Completion::Connect {
            status: Status::Error,
            reconnect: true,
            context: None,
            detail: cause,
        });
    }

    fn on_message_arrived(&self, topic: &str, message: &Message) {
        let accepted = self.dedup.lock().accept(message);
        if !accepted {
            debug!(
                "Dropping redelivered message {} on {}",
                message.id, topic
            );
            self.metrics.duplicate_dropped();
            return;
        }

        self.metrics.message_received();
        if let Some(consumer) = self.interceptors.offer(topic, message) {
            debug!("Message on {} consumed by {}", topic, consumer);
            self.metrics.message_intercepted();
            return;
        }

        self.listener.on_message_received(topic, message);
    }

    fn on_action_completed(&self, request: RequestId, outcome: Result<ActionAck, String>) {
        let Some(action) = self.pending.lock().remove(&request) else {
            debug!("Completion for unknown request {}", request);
            return;
        };

        match action {
            PendingAction::Connect { context } => self.on_connect_result(outcome, context),
            PendingAction::ManualReconnect => self.on_manual_reconnect_result(outcome),
            PendingAction::Disconnect { context } => {
                let completion = match outcome {
                    Ok(_) => {
                        self.session.lock().transition(StatusEvent::DisconnectCompleted);
                        self.metrics.disconnected();
                        Completion::Disconnect {
                            status: Status::Ok,
                            context,
                            detail: format!("disconnected from {}", self.settings.server_uri),
                        }
                    }
                    Err(detail) => {
                        error!("Disconnect failed: {}", detail);
                        Completion::Disconnect {
                            status: Status::Error,
                            context,
                            detail,
                        }
                    }
                };
                self.listener.on_completion(completion);
            }
            PendingAction::Publish { topic, context } => {
                let (status, detail) = match outcome {
                    Ok(_) => {
                        self.metrics.message_published();
                        (Status::Ok, "publish success".to_string())
                    }
                    Err(detail) => {
                        warn!("Publish to {} failed: {}", topic, detail);
                        self.metrics.publish_failed();
                        (Status::Error, detail)
                    }
                };
                self.listener.on_completion(Completion::Publish {
                    status,
                    context,
                    detail,
                });
            }
            PendingAction::Subscribe { topic, context } => {
                let (status, detail) = match outcome {
                    Ok(ActionAck::Subscribed { granted_qos })
                        if granted_qos.first() == Some(&SUBACK_FAILURE) =>
                    {
                        (Status::Error, "subscribe fail".to_string())
                    }
                    Ok(_) => (Status::Ok, "subscribe success".to_string()),
                    Err(detail) => (Status::Error, detail),
                };
                if !status.is_ok() {
                    warn!("Subscribe to {} failed: {}", topic, detail);
                    self.metrics.subscribe_failed();
                }
                self.interceptors.notify_subscribe_completed(&topic, status);
                self.listener.on_completion(Completion::Subscribe {
                    topic,
                    status,
                    context,
                    detail,
                });
            }
            PendingAction::Unsubscribe { topic, context } => {
                let (status, detail) = match outcome {
                    Ok(_) => (Status::Ok, "unsubscribe success".to_string()),
                    Err(detail) => {
                        warn!("Unsubscribe from {} failed: {}", topic, detail);
                        (Status::Error, detail)
                    }
                };
                self.listener.on_completion(Completion::Unsubscribe {
                    topic,
                    status,
                    context,
                    detail,
                });
            }
        }
    }

    fn on_connect_result(&self, outcome: Result<ActionAck, String>, context: UserContext) {
        match outcome {
            Ok(_) => {
                self.session.lock().transition(StatusEvent::ConnectSucceeded);
                self.metrics.connection_established();
                self.listener.on_completion(Completion::Connect {
                    status: Status::Ok,
                    reconnect: false,
                    context,
                    detail: format!("connected to {}", self.settings.server_uri),
                });
                self.subscribe_interceptor_topics();
            }
            Err(detail) => {
                self.session.lock().transition(StatusEvent::ConnectFailed);
                self.metrics.connection_failed();
                error!("Connect to {} failed: {}", self.settings.server_uri, detail);
                self.listener.on_completion(Completion::Connect {
                    status: Status::Error,
                    reconnect: false,
                    context,
                    detail,
                });
            }
        }
    }

    fn on_manual_reconnect_result(&self, outcome: Result<ActionAck, String>) {
        let succeeded = outcome.is_ok();
        let completion = match outcome {
            Ok(_) => {
                self.session.lock().transition(StatusEvent::ConnectSucceeded);
                self.metrics.reconnected();
                Completion::Connect {
                    status: Status::Ok,
                    reconnect: true,
                    context: None,
                    detail: format!("reconnected to {}", self.settings.server_uri),
                }
            }
            Err(detail) => {
                self.session.lock().transition(StatusEvent::ConnectFailed);
                self.metrics.connection_failed();
                error!("Manual reconnect failed: {}", detail);
                Completion::Connect {
                    status: Status::Error,
                    reconnect: true,
                    context: None,
                    detail,
                }
            }
        };
        self.listener.on_completion(completion);

        // Interceptor state was reset when the session dropped
        if succeeded {
            self.subscribe_interceptor_topics();
        }
    }

    fn subscribe_interceptor_topics(&self) {
        for (topic, qos) in self.interceptors.subscriptions() {
            if let Err(e) = self.subscribe(&topic, qos, None) {
                warn!("Failed to subscribe {}: {}", topic, e);
            }
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("server_uri", &self.settings.server_uri)
            .field("client_id", &self.settings.identity.client_id())
            .field("status", &self.status())
            .finish()
    }
}

//! rumqttc-backed [`Transport`] implementation (impure I/O)
//!
//! Each `connect` builds a fresh `AsyncClient`/`EventLoop` pair and spawns a
//! task that polls the event loop, correlates packets with request ids and
//! emits [`TransportEvent`]s. Request methods only enqueue into the client's
//! bounded channel and never wait for the network.
//!
//! `reconnect` on a stopped loop rebuilds the pair from the last connect
//! request. Its outcome is a `ConnectComplete { reconnect: true }` or a
//! `ReconnectFailed` event.

use super::connection::{configure_mqtt_options, request_capacity, ReconnectConfig};
use super::correlator::RequestCorrelator;
use super::message_handler::{EventRoute, MessageHandler};
use crate::transport::{
    ActionAck, ConnectRequest, EventSender, Message, RequestId, Transport, TransportError,
    TransportEvent,
};
use parking_lot::Mutex;
use rumqttc::{AsyncClient, Event, EventLoop, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Per-session settings the event loop needs
#[derive(Debug, Clone)]
struct LoopSettings {
    server_uri: String,
    connection_timeout: Duration,
    automatic_reconnect: bool,
}

/// State shared between request methods and the event loop task
struct Shared {
    events: EventSender,
    client: Mutex<Option<AsyncClient>>,
    correlator: Mutex<RequestCorrelator>,
    connected: AtomicBool,
    closing: AtomicBool,
    /// Set while a restarted loop has not yet reached the broker
    restarting: AtomicBool,
    wake: Notify,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
    last_request: Mutex<Option<ConnectRequest>>,
}

impl Shared {
    fn emit(&self, event: TransportEvent) {
        if self.events.send(event).is_err() {
            debug!("Transport event dropped, receiver closed");
        }
    }

    fn complete(&self, request: RequestId, outcome: Result<ActionAck, String>) {
        self.emit(TransportEvent::ActionCompleted { request, outcome });
    }

    fn client(&self) -> Result<AsyncClient, TransportError> {
        self.client.lock().clone().ok_or(TransportError::NotStarted)
    }

    fn fail_outstanding(&self, cause: &str) {
        let outstanding = self.correlator.lock().drain();
        for request in outstanding {
            self.complete(request, Err(cause.to_string()));
        }
    }

    fn stop_event_loop(&self) {
        if let Some(handle) = self.loop_handle.lock().take() {
            handle.abort();
        }
    }

    fn event_loop_running(&self) -> bool {
        self.loop_handle
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Act on one routed event; returns false when the loop should stop
    fn process_event_route(&self, route: EventRoute, settings: &LoopSettings) -> bool {
        match route {
            EventRoute::ConnectionAcknowledged => {
                self.connected.store(true, Ordering::SeqCst);
                let pending = self.correlator.lock().take_connect();
                match pending {
                    Some(request) => {
                        info!("Connected to {}", settings.server_uri);
                        self.complete(request, Ok(ActionAck::Connected));
                        self.emit(TransportEvent::ConnectComplete {
                            reconnect: false,
                            server_uri: settings.server_uri.clone(),
                        });
                    }
                    None => {
                        self.restarting.store(false, Ordering::SeqCst);
                        info!("Reconnected to {}", settings.server_uri);
                        self.emit(TransportEvent::ConnectComplete {
                            reconnect: true,
                            server_uri: settings.server_uri.clone(),
                        });
                    }
                }
            }
            EventRoute::MessageReceived { topic, message } => {
                self.emit(TransportEvent::MessageArrived { topic, message });
            }
            EventRoute::PublishWritten { pkid } => {
                let written = self.correlator.lock().publish_written(pkid);
                if let Some(request) = written {
                    self.complete(request, Ok(ActionAck::Published { message_id: pkid }));
                }
            }
            EventRoute::PublishAcknowledged { pkid } => {
                let acked = self.correlator.lock().puback(pkid);
                if let Some(request) = acked {
                    self.complete(request, Ok(ActionAck::Published { message_id: pkid }));
                }
            }
            EventRoute::PublishCompleted { pkid } => {
                let completed = self.correlator.lock().pubcomp(pkid);
                if let Some(request) = completed {
                    self.complete(request, Ok(ActionAck::Published { message_id: pkid }));
                }
            }
            EventRoute::SubscribeWritten { pkid } => {
                self.correlator.lock().subscribe_written(pkid);
            }
            EventRoute::SubscriptionConfirmed { pkid, granted_qos } => {
                let acked = self.correlator.lock().suback(pkid);
                if let Some(request) = acked {
                    self.complete(request, Ok(ActionAck::Subscribed { granted_qos }));
                }
            }
            EventRoute::UnsubscribeWritten { pkid } => {
                self.correlator.lock().unsubscribe_written(pkid);
            }
            EventRoute::UnsubscriptionConfirmed { pkid } => {
                let acked = self.correlator.lock().unsuback(pkid);
                if let Some(request) = acked {
                    self.complete(request, Ok(ActionAck::Unsubscribed));
                }
            }
            EventRoute::DisconnectWritten => {
                if self.closing.load(Ordering::SeqCst) {
                    self.connected.store(false, Ordering::SeqCst);
                    let pending = self.correlator.lock().take_disconnect();
                    if let Some(request) = pending {
                        self.complete(request, Ok(ActionAck::Disconnected));
                    }
                    info!("Disconnected from {}", settings.server_uri);
                    return false;
                }
            }
            EventRoute::BrokerDisconnected => {
                warn!("Broker closed the session on {}", settings.server_uri);
            }
            EventRoute::Infrastructure => {}
        }
        true
    }

    /// Handle a failed poll; returns false when the loop should stop
    fn handle_event_loop_error(&self, cause: String, settings: &LoopSettings) -> bool {
        let pending = self.correlator.lock().take_connect();
        if let Some(request) = pending {
            error!("Connect to {} failed: {}", settings.server_uri, cause);
            self.connected.store(false, Ordering::SeqCst);
            self.complete(request, Err(cause));
            return false;
        }

        if self.closing.load(Ordering::SeqCst) {
            self.connected.store(false, Ordering::SeqCst);
            let pending = self.correlator.lock().take_disconnect();
            if let Some(request) = pending {
                self.complete(request, Ok(ActionAck::Disconnected));
            }
            return false;
        }

        if self.restarting.swap(false, Ordering::SeqCst) {
            error!("Reconnect to {} failed: {}", settings.server_uri, cause);
            self.emit(TransportEvent::ReconnectFailed { cause });
            return false;
        }

        if self.connected.swap(false, Ordering::SeqCst) {
            warn!("Connection to {} lost: {}", settings.server_uri, cause);
            self.emit(TransportEvent::ConnectionLost { cause });
        } else {
            debug!("Reconnect to {} failed: {}", settings.server_uri, cause);
        }

        settings.automatic_reconnect
    }

    /// Perform interruptible sleep; `reconnect()` cuts the delay short
    async fn interruptible_sleep(&self, delay_ms: u64) {
        tokio::select! {
            _ = self.wake.notified() => {
                debug!("Reconnect requested, skipping remaining backoff");
            }
            _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
        }
    }
}

async fn poll_once(
    eventloop: &mut EventLoop,
    waiting_for_connack: bool,
    connection_timeout: Duration,
) -> Result<Event, String> {
    if waiting_for_connack && !connection_timeout.is_zero() {
        match tokio::time::timeout(connection_timeout, eventloop.poll()).await {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(_) => Err(format!("no CONNACK within {connection_timeout:?}")),
        }
    } else {
        eventloop.poll().await.map_err(|e| e.to_string())
    }
}

async fn run_event_loop(
    mut eventloop: EventLoop,
    shared: Arc<Shared>,
    settings: LoopSettings,
    reconnect_config: ReconnectConfig,
) {
    info!("Starting MQTT event loop for {}", settings.server_uri);
    let mut reconnect_attempts = 0u32;

    loop {
        let waiting = shared.correlator.lock().has_pending_connect()
            || shared.restarting.load(Ordering::SeqCst);
        match poll_once(&mut eventloop, waiting, settings.connection_timeout).await {
            Ok(event) => {
                let route = MessageHandler::route_mqtt_event(&event);
                if route == EventRoute::ConnectionAcknowledged {
                    reconnect_attempts = 0;
                }
                if !shared.process_event_route(route, &settings) {
                    break;
                }
            }
            Err(cause) => {
                if !shared.handle_event_loop_error(cause, &settings) {
                    break;
                }
                reconnect_attempts += 1;
                let delay = reconnect_config.calculate_backoff_delay(reconnect_attempts);
                debug!("Reconnect attempt {} in {}ms", reconnect_attempts, delay);
                shared.interruptible_sleep(delay).await;
            }
        }
    }

    shared.connected.store(false, Ordering::SeqCst);
    shared.restarting.store(false, Ordering::SeqCst);
    shared.fail_outstanding("event loop stopped");
    info!("MQTT event loop stopped for {}", settings.server_uri);
}

/// [`Transport`] over `rumqttc::AsyncClient` (MQTT 3.1.1)
pub struct RumqttcTransport {
    shared: Arc<Shared>,
    runtime: Handle,
    reconnect_config: ReconnectConfig,
}

impl RumqttcTransport {
    /// Create a transport driven by the current tokio runtime
    pub fn new(events: EventSender) -> Result<Self, TransportError> {
        let runtime = Handle::try_current().map_err(|_| TransportError::NoRuntime)?;
        Ok(Self::with_runtime(events, runtime))
    }

    pub fn with_runtime(events: EventSender, runtime: Handle) -> Self {
        Self {
            shared: Arc::new(Shared {
                events,
                client: Mutex::new(None),
                correlator: Mutex::new(RequestCorrelator::new()),
                connected: AtomicBool::new(false),
                closing: AtomicBool::new(false),
                restarting: AtomicBool::new(false),
                wake: Notify::new(),
                loop_handle: Mutex::new(None),
                last_request: Mutex::new(None),
            }),
            runtime,
            reconnect_config: ReconnectConfig::default(),
        }
    }

    /// Number of requests awaiting a packet or acknowledgement
    pub fn outstanding_requests(&self) -> usize {
        self.shared.correlator.lock().outstanding()
    }

    /// Build a fresh client/event-loop pair and spawn the loop task
    ///
    /// `pending` is the connect request id to complete; `None` starts a
    /// restart whose outcome is reported as an event.
    fn start_session(
        &self,
        request: &ConnectRequest,
        pending: Option<RequestId>,
    ) -> Result<(), TransportError> {
        let options = configure_mqtt_options(request)?;
        let (client, eventloop) =
            AsyncClient::new(options, request_capacity(request.buffer.as_ref()));

        self.shared.stop_event_loop();
        self.shared.fail_outstanding("session replaced by a new connect");
        self.shared.connected.store(false, Ordering::SeqCst);
        self.shared.closing.store(false, Ordering::SeqCst);
        match pending {
            Some(id) => {
                self.shared.restarting.store(false, Ordering::SeqCst);
                self.shared.correlator.lock().set_connect(id);
            }
            None => self.shared.restarting.store(true, Ordering::SeqCst),
        }
        *self.shared.client.lock() = Some(client);
        *self.shared.last_request.lock() = Some(request.clone());

        let settings = LoopSettings {
            server_uri: request.server_uri.clone(),
            connection_timeout: request.options.connection_timeout,
            automatic_reconnect: request.options.automatic_reconnect,
        };
        let handle = self.runtime.spawn(run_event_loop(
            eventloop,
            Arc::clone(&self.shared),
            settings,
            self.reconnect_config.clone(),
        ));
        *self.shared.loop_handle.lock() = Some(handle);
        Ok(())
    }
}

impl Transport for RumqttcTransport {
    fn connect(&self, request: &ConnectRequest, id: RequestId) -> Result<(), TransportError> {
        self.start_session(request, Some(id))?;
        debug!("Connect {} queued for {}", id, request.server_uri);
        Ok(())
    }

    fn reconnect(&self) -> Result<(), TransportError> {
        let request = self
            .shared
            .last_request
            .lock()
            .clone()
            .ok_or(TransportError::NotStarted)?;

        if self.shared.event_loop_running() {
            if !self.shared.connected.load(Ordering::SeqCst) {
                self.shared.wake.notify_one();
            }
            return Ok(());
        }

        info!("Event loop for {} stopped, restarting it", request.server_uri);
        self.start_session(&request, None)
    }

    fn disconnect(&self, timeout: Option<Duration>, id: RequestId) -> Result<(), TransportError> {
        let client = self.shared.client()?;
        self.shared.closing.store(true, Ordering::SeqCst);
        self.shared.correlator.lock().set_disconnect(id);

        if let Err(e) = client.try_disconnect() {
            self.shared.correlator.lock().take_disconnect();
            self.shared.closing.store(false, Ordering::SeqCst);
            return Err(TransportError::Rejected(e.to_string()));
        }

        if let Some(timeout) = timeout {
            let shared = Arc::clone(&self.shared);
            self.runtime.spawn(async move {
                tokio::time::sleep(timeout).await;
                let expired = shared.correlator.lock().take_disconnect_if(id);
                if expired {
                    warn!("Disconnect did not finish within {:?}, closing", timeout);
                    shared.stop_event_loop();
                    shared.connected.store(false, Ordering::SeqCst);
                    shared.complete(id, Ok(ActionAck::Disconnected));
                    shared.fail_outstanding("disconnect timed out");
                }
            });
        }
        Ok(())
    }

    fn publish(&self, topic: &str, message: &Message, id: RequestId) -> Result<(), TransportError> {
        let client = self.shared.client()?;
        let mut correlator = self.shared.correlator.lock();
        correlator.queue_publish(id, message.qos);
        client
            .try_publish(topic, message.qos, message.retain, message.payload.to_vec())
            .map_err(|e| {
                correlator.cancel(id);
                TransportError::Rejected(e.to_string())
            })
    }

    fn subscribe(&self, topic: &str, qos: QoS, id: RequestId) -> Result<(), TransportError> {
        let client = self.shared.client()?;
        let mut correlator = self.shared.correlator.lock();
        correlator.queue_subscribe(id);
        client.try_subscribe(topic, qos).map_err(|e| {
            correlator.cancel(id);
            TransportError::Rejected(e.to_string())
        })
    }

    fn unsubscribe(&self, topic: &str, id: RequestId) -> Result<(), TransportError> {
        let client = self.shared.client()?;
        let mut correlator = self.shared.correlator.lock();
        correlator.queue_unsubscribe(id);
        client.try_unsubscribe(topic).map_err(|e| {
            correlator.cancel(id);
            TransportError::Rejected(e.to_string())
        })
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }
}

impl Drop for RumqttcTransport {
    fn drop(&mut self) {
        // Users should call disconnect() explicitly for a graceful close
        self.shared.stop_event_loop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{event_channel, ConnectOptions};

    fn request(server_uri: &str) -> ConnectRequest {
        ConnectRequest {
            server_uri: server_uri.to_string(),
            client_id: "PIDgw-1".to_string(),
            username: "PIDgw-1;12010126;abcde;2147483647".to_string(),
            password: None,
            options: ConnectOptions {
                connection_timeout: Duration::from_millis(200),
                automatic_reconnect: false,
                ..ConnectOptions::default()
            },
            buffer: None,
        }
    }

    #[test]
    fn test_new_requires_runtime() {
        let (tx, _rx) = event_channel();
        assert!(matches!(
            RumqttcTransport::new(tx),
            Err(TransportError::NoRuntime)
        ));
    }

    #[tokio::test]
    async fn test_requests_before_connect_are_refused() {
        let (tx, _rx) = event_channel();
        let transport = RumqttcTransport::new(tx).unwrap();

        assert!(!transport.is_connected());
        assert!(matches!(
            transport.publish("a/b", &Message::new(&b"x"[..]), RequestId(1)),
            Err(TransportError::NotStarted)
        ));
        assert!(matches!(
            transport.subscribe("a/b", QoS::AtLeastOnce, RequestId(2)),
            Err(TransportError::NotStarted)
        ));
        assert!(matches!(
            transport.disconnect(None, RequestId(3)),
            Err(TransportError::NotStarted)
        ));
        assert!(matches!(transport.reconnect(), Err(TransportError::NotStarted)));
    }

    #[tokio::test]
    async fn test_invalid_uri_is_refused_locally() {
        let (tx, _rx) = event_channel();
        let transport = RumqttcTransport::new(tx).unwrap();
        assert!(matches!(
            transport.connect(&request("nonsense"), RequestId(1)),
            Err(TransportError::InvalidServerUri(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_broker_fails_connect() {
        let (tx, mut rx) = event_channel();
        let transport = RumqttcTransport::new(tx).unwrap();
        // Port 1 on loopback refuses connections
        transport
            .connect(&request("tcp://127.0.0.1:1"), RequestId(7))
            .unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            TransportEvent::ActionCompleted { request, outcome } => {
                assert_eq!(request, RequestId(7));
                assert!(outcome.is_err());
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_reconnect_after_loop_stopped_reports_outcome() {
        let (tx, mut rx) = event_channel();
        let transport = RumqttcTransport::new(tx).unwrap();
        let mut connect = request("tcp://127.0.0.1:1");
        connect.options.automatic_reconnect = true;
        transport.connect(&connect, RequestId(1)).unwrap();

        let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            first,
            TransportEvent::ActionCompleted { request: RequestId(1), outcome: Err(_) }
        ));
        tokio::time::timeout(Duration::from_secs(5), async {
            while transport.shared.event_loop_running() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        transport.reconnect().unwrap();
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, TransportEvent::ReconnectFailed { .. }));
        assert!(!transport.is_connected());
        assert_eq!(transport.outstanding_requests(), 0);
    }
}

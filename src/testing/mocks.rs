//! Fake collaborators for driving a [`Connection`](crate::connection::Connection)
//! without a broker
//!
//! [`FakeTransport`] records every request and never calls back on its own;
//! tests decide when and how each request completes by feeding
//! [`TransportEvent`]s to the connection. [`RecordingListener`] captures every
//! callback the connection makes.

use crate::connection::{Completion, ConnectionListener};
use crate::transport::{
    ActionAck, ConnectRequest, EventSender, Message, RequestId, Transport, TransportError,
    TransportEvent,
};
use parking_lot::Mutex;
use rumqttc::QoS;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// One request as seen by the fake transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Connect { request: ConnectRequest },
    Reconnect,
    Disconnect { timeout: Option<Duration> },
    Publish { topic: String, message: Message },
    Subscribe { topic: String, qos: QoS },
    Unsubscribe { topic: String },
}

pub type SubscribeHook = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Default)]
struct FakeState {
    calls: Vec<(TransportCall, Option<RequestId>)>,
    fail_next: Option<String>,
    failing_topics: HashSet<String>,
    subscribe_hook: Option<SubscribeHook>,
}

/// Deterministic in-memory transport
#[derive(Default)]
pub struct FakeTransport {
    state: Mutex<FakeState>,
    connected: AtomicBool,
    events: Mutex<Option<EventSender>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fake that can push events into a spawned connection event loop
    pub fn with_events(sender: EventSender) -> Self {
        let fake = Self::default();
        *fake.events.lock() = Some(sender);
        fake
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Refuse the next request locally with the given detail
    pub fn fail_next_request(&self, detail: &str) {
        self.state.lock().fail_next = Some(detail.to_string());
    }

    /// Refuse every subscribe request for `topic`
    pub fn fail_subscribe_to(&self, topic: &str) {
        self.state.lock().failing_topics.insert(topic.to_string());
    }

    /// Run `hook` (outside the fake's own lock) on every accepted subscribe
    pub fn set_subscribe_hook(&self, hook: SubscribeHook) {
        self.state.lock().subscribe_hook = Some(hook);
    }

    /// Push an event through the channel given to [`FakeTransport::with_events`]
    pub fn emit(&self, event: TransportEvent) -> bool {
        match self.events.lock().as_ref() {
            Some(sender) => sender.send(event).is_ok(),
            None => false,
        }
    }

    pub fn success(request: RequestId, ack: ActionAck) -> TransportEvent {
        TransportEvent::ActionCompleted {
            request,
            outcome: Ok(ack),
        }
    }

    pub fn failure(request: RequestId, detail: &str) -> TransportEvent {
        TransportEvent::ActionCompleted {
            request,
            outcome: Err(detail.to_string()),
        }
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.state
            .lock()
            .calls
            .iter()
            .map(|(call, _)| call.clone())
            .collect()
    }

    /// Calls that carried a request id, in order
    pub fn requests(&self) -> Vec<(TransportCall, RequestId)> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|(call, id)| id.map(|id| (call.clone(), id)))
            .collect()
    }

    pub fn last_request_id(&self) -> Option<RequestId> {
        self.state.lock().calls.iter().rev().find_map(|(_, id)| *id)
    }

    pub fn last_connect_request(&self) -> Option<ConnectRequest> {
        self.state
            .lock()
            .calls
            .iter()
            .rev()
            .find_map(|(call, _)| match call {
                TransportCall::Connect { request } => Some(request.clone()),
                _ => None,
            })
    }

    pub fn connect_count(&self) -> usize {
        self.count(|call| matches!(call, TransportCall::Connect { .. }))
    }

    pub fn publish_count(&self) -> usize {
        self.count(|call| matches!(call, TransportCall::Publish { .. }))
    }

    /// Every publish as (topic, message)
    pub fn published(&self) -> Vec<(String, Message)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                TransportCall::Publish { topic, message } => Some((topic, message)),
                _ => None,
            })
            .collect()
    }

    /// Every subscribe request as (topic, qos, request id)
    pub fn subscribe_requests(&self) -> Vec<(String, QoS, RequestId)> {
        self.requests()
            .into_iter()
            .filter_map(|(call, id)| match call {
                TransportCall::Subscribe { topic, qos } => Some((topic, qos, id)),
                _ => None,
            })
            .collect()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    fn count(&self, predicate: impl Fn(&TransportCall) -> bool) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|(call, _)| predicate(call))
            .count()
    }

    fn record(&self, call: TransportCall, id: Option<RequestId>) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if let Some(detail) = state.fail_next.take() {
            return Err(TransportError::Rejected(detail));
        }
        if let TransportCall::Subscribe { topic, .. } = &call {
            if state.failing_topics.contains(topic) {
                return Err(TransportError::Rejected(format!("subscribe to {topic} refused")));
            }
        }
        state.calls.push((call, id));
        Ok(())
    }
}

impl Transport for FakeTransport {
    fn connect(&self, request: &ConnectRequest, id: RequestId) -> Result<(), TransportError> {
        self.record(
            TransportCall::Connect {
                request: request.clone(),
            },
            Some(id),
        )
    }

    fn reconnect(&self) -> Result<(), TransportError> {
        self.record(TransportCall::Reconnect, None)
    }

    fn disconnect(&self, timeout: Option<Duration>, id: RequestId) -> Result<(), TransportError> {
        self.record(TransportCall::Disconnect { timeout }, Some(id))
    }

    fn publish(&self, topic: &str, message: &Message, id: RequestId) -> Result<(), TransportError> {
        self.record(
            TransportCall::Publish {
                topic: topic.to_string(),
                message: message.clone(),
            },
            Some(id),
        )
    }

    fn subscribe(&self, topic: &str, qos: QoS, id: RequestId) -> Result<(), TransportError> {
        self.record(
            TransportCall::Subscribe {
                topic: topic.to_string(),
                qos,
            },
            Some(id),
        )?;
        let hook = self.state.lock().subscribe_hook.clone();
        if let Some(hook) = hook {
            hook(topic);
        }
        Ok(())
    }

    fn unsubscribe(&self, topic: &str, id: RequestId) -> Result<(), TransportError> {
        self.record(
            TransportCall::Unsubscribe {
                topic: topic.to_string(),
            },
            Some(id),
        )
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Listener that keeps every callback for later assertions
#[derive(Debug, Default)]
pub struct RecordingListener {
    completions: Mutex<Vec<Completion>>,
    lost: Mutex<Vec<String>>,
    messages: Mutex<Vec<(String, Message)>>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn completions(&self) -> Vec<Completion> {
        self.completions.lock().clone()
    }

    pub fn connection_lost_causes(&self) -> Vec<String> {
        self.lost.lock().clone()
    }

    pub fn messages(&self) -> Vec<(String, Message)> {
        self.messages.lock().clone()
    }
}

impl ConnectionListener for RecordingListener {
    fn on_completion(&self, completion: Completion) {
        self.completions.lock().push(completion);
    }

    fn on_connection_lost(&self, cause: &str) {
        self.lost.lock().push(cause.to_string());
    }

    fn on_message_received(&self, topic: &str, message: &Message) {
        self.messages
            .lock()
            .push((topic.to_string(), message.clone()));
    }
}

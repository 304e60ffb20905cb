//! Ordered message interception ahead of generic delivery

use crate::error::Status;
use crate::transport::Message;
use parking_lot::RwLock;
use rumqttc::QoS;
use std::sync::Arc;
use tracing::debug;

/// Result of offering a message to an interceptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interception {
    /// Handled; generic delivery is skipped
    Consumed,
    /// Not handled; continue with the next interceptor
    Pass,
}

/// A component that claims messages on topics under its prefixes
pub trait MessageInterceptor: Send + Sync {
    fn name(&self) -> &str;

    /// Topic prefixes this interceptor is offered
    fn prefixes(&self) -> &[String];

    fn intercept(&self, topic: &str, message: &Message) -> Interception;

    /// Topics subscribed on behalf of this interceptor after every connect
    fn subscriptions(&self) -> Vec<(String, QoS)> {
        Vec::new()
    }

    fn on_subscribe_completed(&self, _topic: &str, _status: Status) {}

    /// Connection dropped or was closed; prior subscriptions are gone
    fn on_subscriptions_reset(&self) {}
}

/// Interceptors in registration order
#[derive(Default)]
pub struct InterceptorChain {
    interceptors: RwLock<Vec<Arc<dyn MessageInterceptor>>>,
}

impl InterceptorChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, interceptor: Arc<dyn MessageInterceptor>) {
        debug!("Registered message interceptor: {}", interceptor.name());
        self.interceptors.write().push(interceptor);
    }

    pub fn len(&self) -> usize {
        self.interceptors.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.read().is_empty()
    }

    fn members(&self) -> Vec<Arc<dyn MessageInterceptor>> {
        self.interceptors.read().clone()
    }

    /// Offer a message to every interceptor whose prefix matches, in order
    ///
    /// Returns the name of the interceptor that consumed it.
    pub fn offer(&self, topic: &str, message: &Message) -> Option<String> {
        for interceptor in self.members() {
            let matches = interceptor
                .prefixes()
                .iter()
                .any(|prefix| topic.starts_with(prefix.as_str()));
            if !matches {
                continue;
            }
            if interceptor.intercept(topic, message) == Interception::Consumed {
                return Some(interceptor.name().to_string());
            }
        }
        None
    }

    pub fn subscriptions(&self) -> Vec<(String, QoS)> {
        self.members()
            .iter()
            .flat_map(|interceptor| interceptor.subscriptions())
            .collect()
    }

    pub fn notify_subscribe_completed(&self, topic: &str, status: Status) {
        for interceptor in self.members() {
            interceptor.on_subscribe_completed(topic, status);
        }
    }

    pub fn reset(&self) {
        for interceptor in self.members() {
            interceptor.on_subscriptions_reset();
        }
    }
}

//! Caller-facing completion and delivery callbacks

use crate::error::Status;
use crate::transport::Message;
use std::any::Any;
use std::sync::Arc;

/// Opaque value echoed back unchanged in the matching completion
pub type UserContext = Option<Arc<dyn Any + Send + Sync>>;

/// Wrap any value as a [`UserContext`]
pub fn user_context<T: Any + Send + Sync>(value: T) -> UserContext {
    Some(Arc::new(value))
}

/// Outcome of one asynchronous operation, tagged by kind
#[derive(Debug, Clone)]
pub enum Completion {
    Connect {
        status: Status,
        /// True for transport-driven and manual reconnects
        reconnect: bool,
        context: UserContext,
        detail: String,
    },
    Disconnect {
        status: Status,
        context: UserContext,
        detail: String,
    },
    Publish {
        status: Status,
        context: UserContext,
        detail: String,
    },
    Subscribe {
        topic: String,
        status: Status,
        context: UserContext,
        detail: String,
    },
    Unsubscribe {
        topic: String,
        status: Status,
        context: UserContext,
        detail: String,
    },
}

impl Completion {
    pub fn status(&self) -> Status {
        match self {
            Completion::Connect { status, .. }
            | Completion::Disconnect { status, .. }
            | Completion::Publish { status, .. }
            | Completion::Subscribe { status, .. }
            | Completion::Unsubscribe { status, .. } => *status,
        }
    }

    pub fn context(&self) -> &UserContext {
        match self {
            Completion::Connect { context, .. }
            | Completion::Disconnect { context, .. }
            | Completion::Publish { context, .. }
            | Completion::Subscribe { context, .. }
            | Completion::Unsubscribe { context, .. } => context,
        }
    }

    pub fn detail(&self) -> &str {
        match self {
            Completion::Connect { detail, .. }
            | Completion::Disconnect { detail, .. }
            | Completion::Publish { detail, .. }
            | Completion::Subscribe { detail, .. }
            | Completion::Unsubscribe { detail, .. } => detail,
        }
    }

    /// Short operation name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Completion::Connect { .. } => "connect",
            Completion::Disconnect { .. } => "disconnect",
            Completion::Publish { .. } => "publish",
            Completion::Subscribe { .. } => "subscribe",
            Completion::Unsubscribe { .. } => "unsubscribe",
        }
    }

    /// Downcast the attached context, if any
    pub fn context_as<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.context().as_ref().and_then(|ctx| ctx.downcast_ref::<T>())
    }
}

/// Receives every asynchronous outcome of a [`super::Connection`]
///
/// Callbacks run on the connection's event task and are never invoked while
/// the connection holds one of its internal locks, so implementations may
/// call back into the connection.
pub trait ConnectionListener: Send + Sync {
    fn on_completion(&self, completion: Completion);

    fn on_connection_lost(&self, cause: &str);

    /// Inbound message that no interceptor consumed
    fn on_message_received(&self, topic: &str, message: &Message);
}

/// Listener that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl ConnectionListener for NoopListener {
    fn on_completion(&self, _completion: Completion) {}

    fn on_connection_lost(&self, _cause: &str) {}

    fn on_message_received(&self, _topic: &str, _message: &Message) {}
}

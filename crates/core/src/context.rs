//! Server and client contexts.
//!
//! A [`ServerContext`] lives as long as the component process and carries its
//! identity plus a shutdown token. A [`ClientContext`] is created per request;
//! its token is a child of the server's shutdown token, so shutting down the
//! server cancels every in-flight request.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Kind of kubecc component a context belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Scheduler,
    Agent,
    Consumerd,
    Monitor,
    Cache,
    Test,
}

impl Component {
    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Scheduler => "scheduler",
            Component::Agent => "agent",
            Component::Consumerd => "consumerd",
            Component::Monitor => "monitor",
            Component::Cache => "cache",
            Component::Test => "test",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
struct ServerInner {
    component: Component,
    uuid: Uuid,
    shutdown: CancellationToken,
}

/// Process-wide context, cheap to clone
#[derive(Debug, Clone)]
pub struct ServerContext {
    inner: Arc<ServerInner>,
}

impl ServerContext {
    pub fn new(component: Component) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                component,
                uuid: Uuid::now_v7(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn component(&self) -> Component {
        self.inner.component
    }

    pub fn uuid(&self) -> Uuid {
        self.inner.uuid
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.inner.shutdown
    }

    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Creates a client context scoped to this server.
    pub fn new_client(&self) -> ClientContext {
        ClientContext::with_token(self.inner.shutdown.child_token())
    }
}

/// Per-request context
#[derive(Debug, Clone)]
pub struct ClientContext {
    request_id: Uuid,
    token: CancellationToken,
}

impl ClientContext {
    /// Standalone client context, not tied to any server
    pub fn new() -> Self {
        Self::with_token(CancellationToken::new())
    }

    pub fn with_token(token: CancellationToken) -> Self {
        Self {
            request_id: Uuid::now_v7(),
            token,
        }
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}

impl Default for ClientContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Server and client contexts for one request
#[derive(Debug, Clone)]
pub struct Contexts {
    pub server: ServerContext,
    pub client: ClientContext,
}

impl Contexts {
    pub fn new(server: ServerContext, client: ClientContext) -> Self {
        Self { server, client }
    }

    /// Pairs the server context with a fresh client context.
    pub fn for_request(server: &ServerContext) -> Self {
        Self {
            client: server.new_client(),
            server: server.clone(),
        }
    }
}

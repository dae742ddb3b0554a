use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{BridgeError, Result};
use crate::protocol::{decode_reply, Arguments, CorrelationId, MethodRequest};
use crate::transport::{Completion, Connection};

/// Turns method calls into framed requests on a shared [`Connection`].
#[derive(Clone)]
pub struct ModuleClient {
    connection: Arc<Connection>,
    default_timeout: Option<Duration>,
}

impl ModuleClient {
    pub fn new(connection: Arc<Connection>) -> Self {
        Self {
            connection,
            default_timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    pub async fn invoke(&self, module: &str, method: &str, arguments: Arguments) -> Result<Value> {
        self.invoke_with_timeout(module, method, arguments, self.default_timeout)
            .await
    }

    /// Sends one request and waits for its reply.
    ///
    /// On timeout the pending entry is dropped from the router; a reply that
    /// still arrives later is logged as an unknown id.
    pub async fn invoke_with_timeout(
        &self,
        module: &str,
        method: &str,
        arguments: Arguments,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let body = MethodRequest {
            module,
            method,
            arguments: &arguments,
        }
        .encode()?;

        let (tx, rx) = oneshot::channel::<Bytes>();
        let completion: Completion = Box::new(move |reply| {
            tx.send(reply)
                .map_err(|_| anyhow::anyhow!("caller stopped waiting for the reply"))
        });

        let id = self.connection.send(body, completion).await?;
        let mut pending = PendingCall {
            connection: &self.connection,
            id,
            armed: true,
        };

        let reply = match timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(reply) => reply,
                Err(_) => {
                    debug!(correlation_id = id, module, method, "request timed out");
                    return Err(BridgeError::RequestTimeout {
                        module: module.to_string(),
                        method: method.to_string(),
                    });
                }
            },
            None => rx.await,
        };
        pending.armed = false;

        let body = reply.map_err(|_| {
            BridgeError::TransportFatal("connection closed before the reply arrived".to_string())
        })?;
        decode_reply(&body)
    }

    /// Runs a call on the tokio pool without waiting for it.
    pub fn spawn_invoke(
        &self,
        module: impl Into<String>,
        method: impl Into<String>,
        arguments: Arguments,
    ) -> JoinHandle<Result<Value>> {
        let client = self.clone();
        let module = module.into();
        let method = method.into();
        tokio::spawn(async move { client.invoke(&module, &method, arguments).await })
    }
}

/// Abandons the router entry if the waiting future is dropped or times out.
struct PendingCall<'a> {
    connection: &'a Connection,
    id: CorrelationId,
    armed: bool,
}

impl Drop for PendingCall<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.connection.abandon(self.id);
        }
    }
}

//! Unix-socket listener for the façade: one JSON request per line in, one
//! JSON envelope per line out.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Semaphore;
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use crate::error::{BridgeError, Result};
use crate::facade::{Envelope, Facade, Request};

/// Longest accepted request line.
const MAX_LINE_LENGTH: usize = 16 * 1024 * 1024;

pub struct FacadeServer {
    listener: UnixListener,
    socket_path: PathBuf,
    facade: Arc<Facade>,
    workers: Arc<Semaphore>,
}

impl FacadeServer {
    /// Binds `socket_path`, replacing a stale socket file.
    pub fn bind(socket_path: impl AsRef<Path>, facade: Arc<Facade>, workers: usize) -> Result<Self> {
        let socket_path = socket_path.as_ref().to_path_buf();
        match std::fs::remove_file(&socket_path) {
            Ok(()) => debug!(socket = %socket_path.display(), "removed stale socket"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(BridgeError::Io(e)),
        }
        let listener = UnixListener::bind(&socket_path)?;
        info!(socket = %socket_path.display(), workers, "façade listening");

        Ok(Self {
            listener,
            socket_path,
            facade,
            workers: Arc::new(Semaphore::new(workers.max(1))),
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Accepts connections until `shutdown` resolves.
    pub async fn serve(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("façade shutting down");
                    break;
                }
                accepted = self.listener.accept() => {
                    let (stream, _) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            error!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    let conn_id = Uuid::new_v4();
                    tokio::spawn(
                        serve_connection(stream, Arc::clone(&self.facade), Arc::clone(&self.workers))
                            .instrument(tracing::info_span!("connection", %conn_id)),
                    );
                }
            }
        }

        if let Err(e) = std::fs::remove_file(&self.socket_path) {
            debug!(error = %e, "socket file not removed");
        }
        Ok(())
    }
}

async fn serve_connection(stream: UnixStream, facade: Arc<Facade>, workers: Arc<Semaphore>) {
    debug!("client connected");
    let mut lines = Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));

    while let Some(line) = lines.next().await {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "unreadable request line");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let request_id = Uuid::new_v4();
        let envelope = async {
            let request = match parse(&line) {
                Ok(request) => request,
                Err(failure) => return failure,
            };
            // Ping and interrupt never queue behind the calls they may have to stop
            let _permit = match request {
                Request::InvokeModuleMethod { .. } => match workers.acquire().await {
                    Ok(permit) => Some(permit),
                    Err(_) => return Envelope::failure("Unavailable", "façade is shutting down"),
                },
                _ => None,
            };
            Arc::clone(&facade).handle(request).await
        }
        .instrument(tracing::info_span!("request", %request_id))
        .await;

        let reply = match serde_json::to_string(&envelope) {
            Ok(reply) => reply,
            Err(e) => {
                error!(error = %e, "cannot encode reply");
                break;
            }
        };
        if let Err(e) = lines.send(reply).await {
            warn!(error = %e, "client went away before the reply");
            break;
        }
    }
    debug!("client disconnected");
}

fn parse(line: &str) -> Result<Request, Envelope> {
    serde_json::from_str::<Request>(line).map_err(|e| {
        warn!(error = %e, "malformed request");
        Envelope::failure("InvalidRequest", e)
    })
}

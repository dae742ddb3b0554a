use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, ToSocketAddrs, UnixStream};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, info};

use super::router::{Completion, RouterHandle};
use super::TransportConfig;
use crate::error::{BridgeError, Result};
use crate::protocol::{CorrelationId, Frame, FrameCodec};

type FrameSink = FramedWrite<Box<dyn AsyncWrite + Send + Unpin>, FrameCodec>;

/// One duplex byte stream to the daemon, shared by every caller.
///
/// Writes are serialised through `writer`; a background reader task decodes
/// replies and hands them to the router. Once the reader stops the
/// connection is dead for good and every pending or future call fails with
/// [`BridgeError::TransportFatal`].
pub struct Connection {
    writer: Mutex<FrameSink>,
    router: RouterHandle,
    in_flight: Arc<Semaphore>,
    alive: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl Connection {
    pub fn new<S>(stream: S, config: &TransportConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let boxed: Box<dyn AsyncWrite + Send + Unpin> = Box::new(write_half);
        let writer = FramedWrite::new(boxed, FrameCodec::with_max_size(config.max_frame_size));
        let frames = FramedRead::new(read_half, FrameCodec::with_max_size(config.max_frame_size));

        let (router, _router_task) = RouterHandle::spawn();
        let in_flight = Arc::new(Semaphore::new(config.max_in_flight));
        let alive = Arc::new(AtomicBool::new(true));

        let reader = tokio::spawn(receive_loop(
            frames,
            router.clone(),
            Arc::clone(&alive),
            Arc::clone(&in_flight),
        ));

        Self {
            writer: Mutex::new(writer),
            router,
            in_flight,
            alive,
            reader,
        }
    }

    pub async fn connect_unix(path: impl AsRef<Path>, config: &TransportConfig) -> Result<Self> {
        let path = path.as_ref();
        let stream = UnixStream::connect(path).await.map_err(|e| {
            BridgeError::TransportFatal(format!("connect to {}: {}", path.display(), e))
        })?;
        info!(socket = %path.display(), "connected to daemon");
        Ok(Self::new(stream, config))
    }

    pub async fn connect_tcp<A>(addr: A, config: &TransportConfig) -> Result<Self>
    where
        A: ToSocketAddrs + std::fmt::Display,
    {
        let label = addr.to_string();
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| BridgeError::TransportFatal(format!("connect to {}: {}", label, e)))?;
        stream.set_nodelay(true)?;
        info!(address = %label, "connected to daemon");
        Ok(Self::new(stream, config))
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Registers `on_complete` and writes one frame carrying `body`.
    ///
    /// The completion is recorded before any byte hits the wire, so a fast
    /// reply can never arrive ahead of its registration.
    pub async fn send(&self, body: Bytes, on_complete: Completion) -> Result<CorrelationId> {
        if !self.is_alive() {
            return Err(closed());
        }

        let permit = Arc::clone(&self.in_flight)
            .acquire_owned()
            .await
            .map_err(|_| closed())?;
        let id = self.router.register(on_complete, permit).await?;
        // Releases the entry and its permit if this future is dropped mid-write
        let unsent = Unsent {
            router: &self.router,
            id: Some(id),
        };

        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.send(Frame::new(id, body)).await {
            drop(writer);
            error!(correlation_id = id, error = %e, "write to daemon failed");
            drop(unsent);
            self.mark_dead();
            return Err(BridgeError::TransportFatal(e.to_string()));
        }
        unsent.written();

        debug!(correlation_id = id, "request written");
        Ok(id)
    }

    /// Forgets a pending request; a reply that still arrives is dropped.
    pub fn abandon(&self, id: CorrelationId) {
        self.router.cancel(id);
    }

    fn mark_dead(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.in_flight.close();
        self.router.close();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.reader.abort();
        self.router.close();
    }
}

struct Unsent<'a> {
    router: &'a RouterHandle,
    id: Option<CorrelationId>,
}

impl Unsent<'_> {
    fn written(mut self) {
        self.id = None;
    }
}

impl Drop for Unsent<'_> {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            debug!(correlation_id = id, "request dropped before it was written");
            self.router.cancel(id);
        }
    }
}

fn closed() -> BridgeError {
    BridgeError::TransportFatal("connection to the daemon is closed".to_string())
}

async fn receive_loop<R>(
    mut frames: FramedRead<R, FrameCodec>,
    router: RouterHandle,
    alive: Arc<AtomicBool>,
    in_flight: Arc<Semaphore>,
) where
    R: AsyncRead + Unpin,
{
    loop {
        match frames.next().await {
            Some(Ok(frame)) => router.deliver(frame.correlation_id, frame.body),
            Some(Err(e)) => {
                error!(error = %e, "daemon receive loop failed");
                break;
            }
            None => {
                error!("daemon closed the connection");
                break;
            }
        }
    }

    alive.store(false, Ordering::SeqCst);
    in_flight.close();
    router.close();
}

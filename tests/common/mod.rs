#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, Bytes};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

use cubelink::protocol::{Frame, FrameCodec};
use cubelink::{Connection, Cube, ModuleClient, TransportConfig};

/// One request as the daemon saw it.
#[derive(Debug, Clone)]
pub struct Call {
    pub id: u16,
    pub module: String,
    pub method: String,
    pub arguments: Value,
}

pub enum Reply {
    Result(Value),
    Error(String),
    /// Zero-length body.
    Empty,
    After(Duration, Value),
    Never,
}

pub fn parse_request(id: u16, mut body: Bytes) -> Call {
    assert_eq!(body.get_u16_le(), 16, "command code");
    assert_eq!(body.get_u8(), 1, "addressable type");
    let len = body.get_u8() as usize;
    let module = String::from_utf8(body.split_to(len).to_vec()).unwrap();
    let len = body.get_u8() as usize;
    let method = String::from_utf8(body.split_to(len).to_vec()).unwrap();
    let mut envelope: Value = serde_json::from_slice(&body).unwrap();
    Call {
        id,
        module,
        method,
        arguments: envelope["arguments"].take(),
    }
}

fn encode(value: Value) -> Bytes {
    Bytes::from(serde_json::to_vec(&value).unwrap())
}

/// In-memory stand-in for the daemon.
pub struct FakeDaemon {
    pub calls: mpsc::UnboundedReceiver<Call>,
    tasks: Vec<JoinHandle<()>>,
}

impl FakeDaemon {
    /// Drops the daemon side of the stream.
    pub fn shutdown(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for FakeDaemon {
    fn drop(&mut self) {
        self.shutdown();
    }
}

pub fn fake_daemon<F>(handler: F) -> (Connection, FakeDaemon)
where
    F: Fn(&Call) -> Reply + Send + Sync + 'static,
{
    fake_daemon_with(TransportConfig::default(), handler)
}

pub fn fake_daemon_with<F>(config: TransportConfig, handler: F) -> (Connection, FakeDaemon)
where
    F: Fn(&Call) -> Reply + Send + Sync + 'static,
{
    let (client_side, daemon_side) = tokio::io::duplex(64 * 1024);
    let connection = Connection::new(client_side, &config);

    let (mut sink, mut stream) = Framed::new(daemon_side, FrameCodec::new()).split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Frame>();
    let (calls_tx, calls) = mpsc::unbounded_channel();
    let handler = Arc::new(handler);

    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            if sink.send(frame).await.is_err() {
                break;
            }
        }
    });

    let reader = tokio::spawn(async move {
        while let Some(Ok(frame)) = stream.next().await {
            let call = parse_request(frame.correlation_id, frame.body);
            let reply = handler(&call);
            let id = call.id;
            let _ = calls_tx.send(call);
            match reply {
                Reply::Result(value) => {
                    let _ = out_tx.send(Frame::new(id, encode(json!({ "result": value }))));
                }
                Reply::Error(message) => {
                    let _ = out_tx.send(Frame::new(id, encode(json!({ "error": message }))));
                }
                Reply::Empty => {
                    let _ = out_tx.send(Frame::new(id, Bytes::new()));
                }
                Reply::After(delay, value) => {
                    let out_tx = out_tx.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = out_tx.send(Frame::new(id, encode(json!({ "result": value }))));
                    });
                }
                Reply::Never => {}
            }
        }
    });

    (
        connection,
        FakeDaemon {
            calls,
            tasks: vec![reader, writer],
        },
    )
}

pub fn cube_over(connection: Connection) -> Cube {
    Cube::new(ModuleClient::new(Arc::new(connection)))
}

/// Field values returned by `get_fields` for each module.
pub fn fields_reply(call: &Call, fields: Value) -> Reply {
    if call.method == "get_fields" {
        Reply::Result(fields)
    } else {
        Reply::Empty
    }
}

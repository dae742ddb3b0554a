mod common;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use std::time::Duration;

use common::{cube_over, fake_daemon, fields_reply, Reply};
use cubelink::server::FacadeServer;
use cubelink::Facade;

#[tokio::test]
async fn test_line_protocol_over_unix_socket() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("facade.sock");
    // A stale file from a previous run is replaced
    std::fs::write(&socket, b"stale").unwrap();

    let (connection, _daemon) = fake_daemon(|_| Reply::Result(json!(47.2)));
    let facade = Facade::builder(cube_over(connection)).build();
    let server = FacadeServer::bind(&socket, facade, 6).unwrap();

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let serving = tokio::spawn(server.serve(async {
        let _ = stop_rx.await;
    }));

    let stream = UnixStream::connect(&socket).await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    let mut replies = BufReader::new(read_half).lines();

    // 1. Ping echoes its value
    write_half
        .write_all(b"{\"endpoint\":\"ping\",\"value\":[1,2]}\n")
        .await
        .unwrap();
    let reply: Value = serde_json::from_str(&replies.next_line().await.unwrap().unwrap()).unwrap();
    assert_eq!(reply, json!({"status": 0, "result": [1, 2]}));

    // 2. A malformed line gets a failure envelope and the connection survives
    write_half.write_all(b"{not json\n").await.unwrap();
    let reply: Value = serde_json::from_str(&replies.next_line().await.unwrap().unwrap()).unwrap();
    assert_eq!(reply["status"], json!(-1));
    assert!(reply["error"].as_str().unwrap().starts_with("InvalidRequest"));

    // 3. A forwarded call reaches the daemon
    let request = json!({
        "endpoint": "invoke_module_method",
        "module": "env_sensor",
        "method": "get_fields",
        "json": "{\"arguments\": []}",
    });
    write_half
        .write_all(format!("{}\n", request).as_bytes())
        .await
        .unwrap();
    let reply: Value = serde_json::from_str(&replies.next_line().await.unwrap().unwrap()).unwrap();
    assert_eq!(reply, json!({"status": 0, "result": 47.2}));

    stop_tx.send(()).unwrap();
    serving.await.unwrap().unwrap();

    println!("Line Protocol Passed");
}

async fn send_line(socket: &std::path::Path, line: &str) -> Value {
    let stream = UnixStream::connect(socket).await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    write_half
        .write_all(format!("{}\n", line).as_bytes())
        .await
        .unwrap();
    let mut replies = BufReader::new(read_half).lines();
    serde_json::from_str(&replies.next_line().await.unwrap().unwrap()).unwrap()
}

#[tokio::test]
async fn test_interrupt_is_served_while_every_worker_is_busy() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("facade.sock");

    // Counters never move, so the poll holds its worker until interrupted
    let (connection, _daemon) = fake_daemon(|call| {
        fields_reply(
            call,
            json!({"top_pressed_count": 0, "middle_pressed_count": 0, "bottom_pressed_count": 0}),
        )
    });
    let facade = Facade::builder(cube_over(connection)).build();
    let server = FacadeServer::bind(&socket, facade, 1).unwrap();
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let serving = tokio::spawn(server.serve(async {
        let _ = stop_rx.await;
    }));

    // 1. The only worker is taken by a poll with no timeout
    let poll = {
        let socket = socket.clone();
        tokio::spawn(async move {
            let request = json!({
                "endpoint": "invoke_module_method",
                "module": "buttons",
                "method": "get_next_action",
                "json": "{\"arguments\": []}",
            });
            send_line(&socket, &request.to_string()).await
        })
    };
    tokio::time::sleep(Duration::from_millis(150)).await;

    // 2. Ping and interrupt still get through
    let reply = tokio::time::timeout(
        Duration::from_secs(1),
        send_line(&socket, r#"{"endpoint":"ping","value":1}"#),
    )
    .await
    .expect("ping waited for a worker");
    assert_eq!(reply, json!({"status": 0, "result": 1}));

    let reply = tokio::time::timeout(
        Duration::from_secs(1),
        send_line(&socket, r#"{"endpoint":"interrupt_executing_methods"}"#),
    )
    .await
    .expect("interrupt waited for a worker");
    assert_eq!(reply["phase"], json!(1));

    // 3. The interrupted poll answers null
    let reply = tokio::time::timeout(Duration::from_secs(1), poll)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply, json!({"status": 0, "result": null}));

    stop_tx.send(()).unwrap();
    serving.await.unwrap().unwrap();

    println!("Interrupt Bypasses Workers Passed");
}

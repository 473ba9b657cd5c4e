use figma_relay_client::{ClientConfig, Dispatcher, RelayClient};
use figma_relay_core::{
    CorrelationError, DispatchError, FigmaCommand, ProgressStatus, ProgressUpdate,
};
use figma_relay_hub::{serve, HubConfig};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::{net::TcpListener, sync::watch, task::JoinHandle};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type Plugin = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

struct Hub {
    addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<std::io::Result<()>>,
}

impl Hub {
    async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = tokio::time::timeout(Duration::from_secs(5), self.handle).await;
    }
}

async fn launch_hub() -> Hub {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let config = HubConfig {
        host: "127.0.0.1".to_string(),
        port: addr.port(),
        ping_interval: Duration::ZERO,
        ..HubConfig::default()
    };
    let (shutdown, rx) = watch::channel(false);
    let handle = tokio::spawn(serve(listener, config, rx));
    Hub {
        addr,
        shutdown,
        handle,
    }
}

async fn client(addr: SocketAddr) -> Dispatcher {
    let config = ClientConfig::from_url(&format!("ws://{addr}")).expect("config");
    let client = RelayClient::connect(config).await.expect("connect client");
    Dispatcher::new(Arc::new(client))
}

/// Connects a stand-in for the design-tool plugin and joins `channel`.
async fn plugin(addr: SocketAddr, channel: &str) -> Plugin {
    let (mut ws, _) = connect_async(format!("ws://{addr}")).await.expect("connect plugin");
    ws.send(Message::Text(
        json!({"type": "join", "channel": channel, "id": "plugin-join"}).to_string(),
    ))
    .await
    .expect("send join");
    let ack = next_json(&mut ws).await;
    assert_eq!(ack["message"]["result"]["status"], "joined");
    ws
}

async fn next_json(ws: &mut Plugin) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(3), ws.next())
            .await
            .expect("frame before timeout")
            .expect("stream open")
            .expect("frame ok");
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).expect("json frame");
        }
    }
}

/// Reads frames until a command envelope arrives; returns (id, command, params).
async fn next_command(ws: &mut Plugin) -> (String, String, Value) {
    loop {
        let frame = next_json(ws).await;
        let body = &frame["message"];
        if let Some(command) = body["command"].as_str() {
            let id = body["id"].as_str().expect("command id").to_string();
            return (id, command.to_string(), body["params"].clone());
        }
    }
}

async fn reply(ws: &mut Plugin, channel: &str, id: &str, body: Value) {
    let mut message = body;
    message["id"] = json!(id);
    ws.send(Message::Text(
        json!({"id": id, "type": "message", "channel": channel, "message": message}).to_string(),
    ))
    .await
    .expect("send reply");
}

async fn progress(ws: &mut Plugin, channel: &str, id: &str, status: &str, percent: u32) {
    let body = json!({
        "type": "command_progress",
        "commandId": id,
        "commandType": "scan_text_nodes",
        "status": status,
        "progress": percent,
        "totalItems": 10,
        "processedItems": percent / 10,
        "message": format!("{percent}% done"),
        "timestamp": 0
    });
    ws.send(Message::Text(
        json!({"id": id, "type": "message", "channel": channel, "message": body}).to_string(),
    ))
    .await
    .expect("send progress");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn command_round_trips_through_the_relay() {
    let hub = launch_hub().await;
    let mut figma = plugin(hub.addr, "room1").await;
    let dispatcher = client(hub.addr).await;

    let call = tokio::spawn({
        let dispatcher = dispatcher.clone();
        async move {
            dispatcher
                .dispatch_command("room1", FigmaCommand::GetNodeInfo, json!({"nodeId": "1:2"}))
                .await
        }
    });

    let (id, command, params) = next_command(&mut figma).await;
    assert_eq!(command, "get_node_info");
    assert_eq!(params["nodeId"], "1:2");
    assert_eq!(params["commandId"], id.as_str());
    reply(&mut figma, "room1", &id, json!({"result": {"name": "Frame 1"}})).await;

    let outcome = call.await.expect("join dispatch");
    assert_eq!(outcome, Ok(json!({"name": "Frame 1"})));
    assert_eq!(
        dispatcher.client().current_channel().as_deref(),
        Some("room1")
    );
    hub.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn progress_is_observed_before_success() {
    let hub = launch_hub().await;
    let mut figma = plugin(hub.addr, "room1").await;
    let dispatcher = client(hub.addr).await;

    let seen: Arc<Mutex<Vec<ProgressUpdate>>> = Arc::new(Mutex::new(Vec::new()));
    let call = tokio::spawn({
        let dispatcher = dispatcher.clone();
        let seen = seen.clone();
        async move {
            dispatcher
                .dispatch_with_progress(
                    "room1",
                    "scan_text_nodes",
                    json!({"nodeId": "0:1"}),
                    Some(Duration::from_millis(800)),
                    move |update| seen.lock().expect("lock").push(update),
                )
                .await
        }
    });

    let (id, _, _) = next_command(&mut figma).await;
    // Each update lands well inside the sliding window, while the total run
    // is longer than the timeout itself.
    for percent in [10, 40, 70] {
        progress(&mut figma, "room1", &id, "in_progress", percent).await;
        tokio::time::sleep(Duration::from_millis(400)).await;
    }
    reply(&mut figma, "room1", &id, json!({"result": {"textNodes": 3}})).await;

    let outcome = call.await.expect("join dispatch");
    assert_eq!(outcome, Ok(json!({"textNodes": 3})));
    let seen = seen.lock().expect("lock");
    assert_eq!(seen.len(), 3);
    assert!(seen.iter().all(|update| update.status == ProgressStatus::InProgress));
    assert_eq!(seen[2].progress, 70);
    hub.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unanswered_command_times_out() {
    let hub = launch_hub().await;
    let dispatcher = client(hub.addr).await;

    let outcome = dispatcher
        .dispatch(
            "lonely",
            "get_document_info",
            json!({}),
            Some(Duration::from_millis(300)),
        )
        .await;
    match outcome {
        Err(err) => assert!(err.is_timeout(), "expected timeout, got {err:?}"),
        Ok(value) => panic!("unexpected success: {value}"),
    }
    assert!(dispatcher.client().pending().is_empty());
    hub.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn command_error_is_not_a_timeout() {
    let hub = launch_hub().await;
    let mut figma = plugin(hub.addr, "room1").await;
    let dispatcher = client(hub.addr).await;

    let call = tokio::spawn({
        let dispatcher = dispatcher.clone();
        async move {
            dispatcher
                .dispatch("room1", "delete_node", json!({"nodeId": "9:9"}), None)
                .await
        }
    });
    let (id, _, _) = next_command(&mut figma).await;
    reply(&mut figma, "room1", &id, json!({"error": "Node not found: 9:9"})).await;

    match call.await.expect("join dispatch") {
        Err(DispatchError::Command { message, .. }) => {
            assert_eq!(message, "Node not found: 9:9")
        }
        other => panic!("expected command error, got {other:?}"),
    }
    hub.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn responder_disconnect_fails_pending_promptly() {
    let hub = launch_hub().await;
    let mut figma = plugin(hub.addr, "room1").await;
    let dispatcher = client(hub.addr).await;

    let call = tokio::spawn({
        let dispatcher = dispatcher.clone();
        async move {
            dispatcher
                .dispatch("room1", "get_selection", json!({}), Some(Duration::from_secs(30)))
                .await
        }
    });
    next_command(&mut figma).await;
    figma.close(None).await.expect("close plugin");

    let outcome = tokio::time::timeout(Duration::from_secs(3), call)
        .await
        .expect("failed before the command timeout")
        .expect("join dispatch");
    assert_eq!(
        outcome,
        Err(DispatchError::Correlation(CorrelationError::ResponderGone {
            channel: "room1".to_string()
        }))
    );
    hub.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_dispatches_resolve_independently() {
    let hub = launch_hub().await;
    let mut figma = plugin(hub.addr, "room1").await;
    let dispatcher = client(hub.addr).await;
    dispatcher
        .client()
        .join_channel("room1")
        .await
        .expect("join");

    let mut calls = Vec::new();
    for n in 0..4 {
        let dispatcher = dispatcher.clone();
        calls.push(tokio::spawn(async move {
            dispatcher
                .dispatch("room1", "get_node_info", json!({"nodeId": format!("1:{n}")}), None)
                .await
        }));
    }

    let mut received = Vec::new();
    for _ in 0..4 {
        received.push(next_command(&mut figma).await);
    }
    // Answer in reverse arrival order, echoing the requested node.
    for (id, _, params) in received.iter().rev() {
        reply(&mut figma, "room1", id, json!({"result": {"id": params["nodeId"]}})).await;
    }

    for (n, call) in calls.into_iter().enumerate() {
        let outcome = call.await.expect("join dispatch");
        assert_eq!(outcome, Ok(json!({"id": format!("1:{n}")})));
    }
    hub.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn refused_dispatch_leaves_channel_and_other_requests_alone() {
    let hub = launch_hub().await;
    let mut figma = plugin(hub.addr, "room1").await;
    let dispatcher = client(hub.addr).await;

    let in_flight = tokio::spawn({
        let dispatcher = dispatcher.clone();
        async move {
            dispatcher
                .dispatch("room1", "get_selection", json!({}), Some(Duration::from_secs(30)))
                .await
        }
    });
    let (id, _, _) = next_command(&mut figma).await;

    let refused = dispatcher
        .dispatch("room2", "get_selection", json!({}), Some(Duration::ZERO))
        .await;
    assert_eq!(
        refused,
        Err(DispatchError::Correlation(CorrelationError::InvalidTimeout))
    );
    assert_eq!(
        dispatcher.client().current_channel().as_deref(),
        Some("room1")
    );
    assert!(dispatcher.client().pending().contains(&id));

    reply(&mut figma, "room1", &id, json!({"result": {"selection": []}})).await;
    let outcome = tokio::time::timeout(Duration::from_secs(3), in_flight)
        .await
        .expect("answered")
        .expect("join dispatch");
    assert_eq!(outcome, Ok(json!({"selection": []})));
    hub.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn closing_the_client_fails_pending_requests() {
    let hub = launch_hub().await;
    let mut figma = plugin(hub.addr, "room1").await;
    let dispatcher = client(hub.addr).await;

    let call = tokio::spawn({
        let dispatcher = dispatcher.clone();
        async move {
            dispatcher
                .dispatch("room1", "get_styles", json!({}), Some(Duration::from_secs(30)))
                .await
        }
    });
    next_command(&mut figma).await;
    dispatcher.client().close().await;

    let outcome = tokio::time::timeout(Duration::from_secs(3), call)
        .await
        .expect("failed promptly")
        .expect("join dispatch");
    assert_eq!(
        outcome,
        Err(DispatchError::Correlation(CorrelationError::Disconnected))
    );

    let late = dispatcher
        .dispatch("room1", "get_styles", json!({}), Some(Duration::from_secs(30)))
        .await;
    assert_eq!(
        late,
        Err(DispatchError::Correlation(CorrelationError::Disconnected))
    );
    hub.stop().await;
}

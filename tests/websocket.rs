//! Duplex and multiplexed WebSocket sessions through the gateway.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use service_gateway::config::RouteConfig;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

mod common;

type Client = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

async fn next_json(ws: &mut Client) -> Value {
    let message = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("No frame within 5s")
        .expect("Stream ended")
        .expect("Read failed");
    serde_json::from_str(message.to_text().unwrap()).unwrap()
}

async fn send_json(ws: &mut Client, value: Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

async fn next_close_code(ws: &mut Client) -> Option<u16> {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("No close within 5s");
        match frame {
            Some(Ok(Message::Close(frame))) => return frame.map(|f| u16::from(f.code)),
            Some(Ok(_)) => continue,
            Some(Err(_)) | None => return None,
        }
    }
}

#[tokio::test]
async fn duplex_relays_frames_in_order() {
    let backend_addr: SocketAddr = "127.0.0.1:28501".parse().unwrap();
    let gateway_addr: SocketAddr = "127.0.0.1:28502".parse().unwrap();

    common::start_ws_echo_backend(backend_addr).await;

    let mut config = common::gateway_config(gateway_addr);
    config.services.push(common::service("voice-service", backend_addr));
    config.routes.push(RouteConfig {
        prefix: "voice".into(),
        service: "voice-service".into(),
    });
    let _shutdown = common::start_gateway(config).await;

    let (mut ws, _) = connect_async(format!("ws://{}/ws/voice", gateway_addr))
        .await
        .expect("Upgrade failed");

    for i in 0..20 {
        ws.send(Message::Text(format!("frame-{i}").into())).await.unwrap();
    }
    ws.send(Message::Binary(vec![1u8, 2, 3].into())).await.unwrap();

    for i in 0..20 {
        let message = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(message.to_text().unwrap(), format!("frame-{i}"));
    }
    let message = ws.next().await.unwrap().unwrap();
    assert_eq!(message.into_data(), vec![1u8, 2, 3]);

    ws.send(Message::Close(Some(CloseFrame {
        code: CloseCode::Normal,
        reason: "done".into(),
    })))
    .await
    .unwrap();
    assert_eq!(next_close_code(&mut ws).await, Some(1000));
}

#[tokio::test]
async fn client_close_ends_backend_leg() {
    let backend_addr: SocketAddr = "127.0.0.1:28507".parse().unwrap();
    let gateway_addr: SocketAddr = "127.0.0.1:28508".parse().unwrap();

    let backend_ended = common::start_tracked_ws_echo_backend(backend_addr).await;

    let mut config = common::gateway_config(gateway_addr);
    config.services.push(common::service("code-service", backend_addr));
    let _shutdown = common::start_gateway(config).await;

    let (mut ws, _) = connect_async(format!("ws://{}/ws/code-service", gateway_addr))
        .await
        .expect("Upgrade failed");

    for i in 0..3 {
        ws.send(Message::Text(format!("line-{i}").into())).await.unwrap();
        let message = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(message.to_text().unwrap(), format!("line-{i}"));
    }
    assert!(!backend_ended.load(Ordering::SeqCst));

    ws.close(None).await.unwrap();

    let mut ended = false;
    for _ in 0..20 {
        if backend_ended.load(Ordering::SeqCst) {
            ended = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(ended, "backend session still open 1s after the client closed");
}

#[tokio::test]
async fn duplex_without_instance_closes_with_error() {
    let gateway_addr: SocketAddr = "127.0.0.1:28503".parse().unwrap();
    let _shutdown = common::start_gateway(common::gateway_config(gateway_addr)).await;

    let (mut ws, _) = connect_async(format!("ws://{}/ws/nothing", gateway_addr))
        .await
        .expect("Upgrade failed");

    assert_eq!(next_close_code(&mut ws).await, Some(1011));
}

#[tokio::test]
async fn multiplex_session_routes_and_reports_inline() {
    let backend_addr: SocketAddr = "127.0.0.1:28504".parse().unwrap();
    let gateway_addr: SocketAddr = "127.0.0.1:28505".parse().unwrap();

    common::start_message_backend(backend_addr, "chat-a").await;

    let mut config = common::gateway_config(gateway_addr);
    config.services.push(common::service("chat-service", backend_addr));
    let _shutdown = common::start_gateway(config).await;

    let (mut ws, _) = connect_async(format!("ws://{}/ws", gateway_addr))
        .await
        .expect("Upgrade failed");

    let greeting = next_json(&mut ws).await;
    assert_eq!(greeting["type"], "connection_established");
    let session_id = greeting["session_id"].as_str().unwrap().to_string();

    send_json(&mut ws, json!({ "type": "ping" })).await;
    assert_eq!(next_json(&mut ws).await["type"], "pong");

    ws.send(Message::Text("not json".into())).await.unwrap();
    assert_eq!(
        next_json(&mut ws).await,
        json!({ "type": "error", "message": "Invalid JSON format" })
    );

    send_json(&mut ws, json!({ "type": "chat" })).await;
    assert_eq!(next_json(&mut ws).await["message"], "Service name required");

    send_json(&mut ws, json!({ "type": "chat", "service": "ghost" })).await;
    assert_eq!(next_json(&mut ws).await["message"], "Service ghost not available");

    send_json(&mut ws, json!({ "type": "chat", "service": "chat-service", "text": "hi" })).await;
    assert_eq!(
        next_json(&mut ws).await,
        json!({
            "type": "response",
            "received": { "type": "chat", "text": "hi" },
            "backend": "chat-a",
        })
    );

    send_json(&mut ws, json!({ "type": "get_stats" })).await;
    let stats = next_json(&mut ws).await;
    assert_eq!(stats["type"], "stats_response");
    assert_eq!(stats["session_id"], session_id);
    assert_eq!(stats["stats"]["messages_received"], 6);
    assert_eq!(stats["stats"]["messages_routed"], 1);
    assert_eq!(stats["stats"]["errors"], 3);
}

#[tokio::test]
async fn shutdown_closes_sessions_going_away() {
    let gateway_addr: SocketAddr = "127.0.0.1:28506".parse().unwrap();
    let shutdown = common::start_gateway(common::gateway_config(gateway_addr)).await;

    let (mut ws, _) = connect_async(format!("ws://{}/ws", gateway_addr))
        .await
        .expect("Upgrade failed");
    assert_eq!(next_json(&mut ws).await["type"], "connection_established");

    shutdown.trigger();
    assert_eq!(next_close_code(&mut ws).await, Some(1001));
}

mod common;

use common::{connect_reply, host_and_port, player_json, ScriptedTransport, CLIENT_ID, PLAYER_ID};
use mockito::{Matcher, Server};
use serde_json::json;
use squeezebox_lms::{
    Command, DeviceEvent, DeviceIdentity, DeviceSession, LmsError, RequestClient, ServerConfig,
    SessionOptions, SessionState, SubscriptionSession, Topic, TopicCommand,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tracing::Span;

const WAIT: Duration = Duration::from_secs(5);

fn identity(config: &ServerConfig) -> DeviceIdentity {
    DeviceIdentity {
        id: PLAYER_ID.to_string(),
        name: "Kitchen".to_string(),
        host: config.host.clone(),
        port: config.ports.http,
        model: "SqueezeLite".to_string(),
        manufacturer: "Logitech".to_string(),
        firmware_version: "v1.9.9".to_string(),
    }
}

fn device(config: ServerConfig, transport: Arc<ScriptedTransport>) -> DeviceSession {
    let options = SessionOptions::default();
    let requests = RequestClient::new(&config, &options, Span::none()).unwrap();
    let subscription = SubscriptionSession::new(PLAYER_ID, transport, options, Span::none());
    DeviceSession::from_parts(identity(&config), config, options, requests, subscription, Span::none())
}

/// Device whose JSON-RPC and notification endpoints are never reached
fn offline_device(transport: Arc<ScriptedTransport>) -> DeviceSession {
    device(ServerConfig::new("127.0.0.1").with_ports(9, 9), transport)
}

async fn next_event(events: &mut squeezebox_lms::EventReceiver) -> DeviceEvent {
    timeout(WAIT, events.recv()).await.unwrap().unwrap()
}

#[tokio::test]
async fn connect_reports_subscription_confirmation() {
    let device = offline_device(ScriptedTransport::lms());

    let mut events = device.connect().await.unwrap();

    match next_event(&mut events).await {
        DeviceEvent::Subscription(event) => {
            assert!(event.is_successful());
            assert_eq!(event.client_id(), Some(CLIENT_ID));
            assert_eq!(event.channel, "/meta/subscribe");
        }
        other => panic!("unexpected event: {:?}", other),
    }
    assert!(matches!(device.state(), SessionState::Connected { .. }));
}

#[tokio::test]
async fn published_status_arrives_normalized() {
    let transport = ScriptedTransport::lms();
    let device = offline_device(transport.clone());
    let mut events = device.connect().await.unwrap();

    device.publish(&Command::power(true)).await.unwrap();

    let published = transport.sent_on("/slim/request");
    assert_eq!(
        published[0].data,
        Some(json!({ "response": "/slim/abc123/request", "request": [PLAYER_ID, ["power", "1"]] }))
    );

    let status = timeout(WAIT, events.recv_status()).await.unwrap().unwrap();
    assert_eq!(status.volume, 55.0);
    assert!(!status.mute);
    assert!(status.active);
    assert_eq!(status.mode, "play");
}

#[tokio::test]
async fn invalid_status_push_is_dropped() {
    let transport = ScriptedTransport::new(|message| {
        if message.channel == "/slim/request" {
            vec![
                json!({ "channel": "/slim/abc123/request", "data": { "power": 3, "mixer volume": 10 } }),
                json!({ "channel": "/slim/abc123/request", "data": { "power": "1" } }),
                json!({ "channel": "/slim/abc123/request", "data": { "power": 0, "mixer volume": 0 } }),
            ]
        } else {
            common::lms_reply(message)
        }
    });
    let device = offline_device(transport);
    let mut events = device.connect().await.unwrap();

    device.publish(&Command::pause()).await.unwrap();

    let status = loop {
        if let DeviceEvent::Status(status) = next_event(&mut events).await {
            break status;
        }
    };
    assert!(!status.active);
    assert!(status.mute);
    assert_eq!(events.try_recv().unwrap(), None);
}

#[tokio::test]
async fn subscribe_topics_requires_connection() {
    let device = offline_device(ScriptedTransport::lms());

    let err = device
        .subscribe_topics(vec![TopicCommand::once(Command::play())])
        .await
        .unwrap_err();

    assert!(matches!(err, LmsError::NotConnected));
}

#[tokio::test]
async fn topic_commands_are_republished_on_notification() {
    let cli = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let cli_port = cli.local_addr().unwrap().port();
    let transport = ScriptedTransport::lms();
    let device = device(
        ServerConfig::new("127.0.0.1").with_ports(9, cli_port),
        transport.clone(),
    );
    device.connect().await.unwrap();

    device
        .subscribe_topics(vec![
            TopicCommand::once(Command::play()),
            TopicCommand::on(Topic::RescanDone, Command::favorites_items(0, 50)),
        ])
        .await
        .unwrap();
    assert_eq!(transport.sent_on("/slim/request").len(), 2);

    let (mut socket, _) = timeout(WAIT, cli.accept()).await.unwrap().unwrap();
    let mut listen = [0u8; 9];
    socket.read_exact(&mut listen).await.unwrap();
    assert_eq!(&listen, b"listen 1\n");

    socket
        .write_all(b"1234567890 playlist pause\n1234567890 rescan done\n")
        .await
        .unwrap();

    timeout(WAIT, async {
        while transport.sent_on("/slim/request").len() < 3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    let republished = transport.sent_on("/slim/request");
    assert_eq!(
        republished[2].data.as_ref().unwrap()["request"],
        json!([PLAYER_ID, ["favorites", "items", 0, 50]])
    );

    device.disconnect().await;
}

#[tokio::test]
async fn topics_are_not_published_without_notification_socket() {
    let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let cli_port = closed.local_addr().unwrap().port();
    drop(closed);
    let transport = ScriptedTransport::lms();
    let device = device(
        ServerConfig::new("127.0.0.1").with_ports(9, cli_port),
        transport.clone(),
    );
    device.connect().await.unwrap();

    let err = device
        .subscribe_topics(vec![
            TopicCommand::once(Command::play()),
            TopicCommand::on(Topic::RescanDone, Command::favorites_items(0, 50)),
        ])
        .await
        .unwrap_err();

    assert!(matches!(err, LmsError::Io(_)));
    assert!(transport.sent_on("/slim/request").is_empty());
}

#[tokio::test]
async fn stopped_session_is_reported_and_can_reconnect() {
    let transport = ScriptedTransport::with_polls(
        common::lms_reply,
        vec![
            Ok(vec![connect_reply(json!({ "successful": true, "advice": { "interval": 100 } }))]),
            Ok(vec![connect_reply(json!({ "successful": true, "advice": { "reconnect": "none" } }))]),
        ],
    );
    let device = offline_device(transport.clone());
    let mut events = device.connect().await.unwrap();

    assert!(matches!(next_event(&mut events).await, DeviceEvent::Subscription(_)));
    assert_eq!(next_event(&mut events).await, DeviceEvent::SessionLost);
    assert_eq!(device.state(), SessionState::Idle);
    assert!(matches!(device.publish(&Command::play()).await, Err(LmsError::NotConnected)));

    device.connect().await.unwrap();
    assert_eq!(transport.sent_on("/meta/handshake").len(), 2);
    assert!(matches!(device.state(), SessionState::Connected { .. }));
}

#[tokio::test]
async fn forgotten_client_is_restored() {
    let transport = ScriptedTransport::with_polls(
        common::lms_reply,
        vec![Ok(vec![connect_reply(json!({
            "successful": false,
            "error": "402::Unknown client",
            "advice": { "reconnect": "handshake" }
        }))])],
    );
    let device = offline_device(transport.clone());
    let mut events = device.connect().await.unwrap();
    assert!(matches!(next_event(&mut events).await, DeviceEvent::Subscription(_)));

    let first = next_event(&mut events).await;
    let second = next_event(&mut events).await;
    let lost = [&first, &second]
        .into_iter()
        .filter(|event| **event == DeviceEvent::SessionLost)
        .count();
    assert_eq!(lost, 1, "got {:?} and {:?}", first, second);
    assert!([&first, &second]
        .into_iter()
        .any(|event| matches!(event, DeviceEvent::Subscription(s) if s.is_successful())));

    assert_eq!(transport.sent_on("/meta/handshake").len(), 2);
    assert!(matches!(device.state(), SessionState::Connected { .. }));
    device.publish(&Command::play()).await.unwrap();
}

#[tokio::test]
async fn disconnect_is_idempotent() {
    let transport = ScriptedTransport::lms();
    let device = offline_device(transport.clone());
    let mut events = device.connect().await.unwrap();
    let _ = next_event(&mut events).await;

    device.disconnect().await;
    device.disconnect().await;

    assert_eq!(device.state(), SessionState::Closed);
    assert_eq!(transport.sent_on("/meta/unsubscribe").len(), 1);
    assert_eq!(transport.sent_on("/meta/disconnect").len(), 1);
    assert!(matches!(
        timeout(WAIT, events.recv()).await.unwrap(),
        Err(LmsError::ConnectionClosed)
    ));
    assert!(matches!(device.connect().await, Err(LmsError::SessionClosed)));
}

#[tokio::test]
async fn send_succeeds_where_typed_players_fails_validation() {
    let mut server = Server::new_async().await;
    let body = json!({
        "method": "slim.request",
        "result": { "count": 1, "players_loop": [{ "playerid": PLAYER_ID, "name": "Kitchen" }] }
    })
    .to_string();
    server
        .mock("POST", "/jsonrpc.js")
        .with_body(body)
        .expect(2)
        .create_async()
        .await;
    let (host, port) = host_and_port(&server);
    let device = device(
        ServerConfig::new(host).with_ports(port, 9),
        ScriptedTransport::lms(),
    );

    let raw = device.send(&Command::new(squeezebox_lms::Verb::Players).arg("0")).await.unwrap();
    assert_eq!(raw["result"]["count"], json!(1));

    match device.requests().players().await {
        Err(LmsError::Validation(e)) => assert!(e.is_missing("result.players_loop[0].connected")),
        other => panic!("expected validation failure, got {:?}", other),
    }
}

#[tokio::test]
async fn status_is_fetched_and_normalized() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/jsonrpc.js")
        .match_body(Matcher::Json(json!({
            "method": "slim.request",
            "params": [PLAYER_ID, ["status", "-"]]
        })))
        .with_body(
            json!({
                "method": "slim.request",
                "result": { "power": 1, "mixer volume": -35, "mode": "pause", "player_name": "Kitchen" }
            })
            .to_string(),
        )
        .create_async()
        .await;
    let (host, port) = host_and_port(&server);
    let device = device(
        ServerConfig::new(host).with_ports(port, 9),
        ScriptedTransport::lms(),
    );

    let status = device.status().await.unwrap();

    assert_eq!(status.volume, 0.0);
    assert!(status.mute);
    assert!(status.active);
    assert_eq!(status.mode, "pause");
}

#[tokio::test]
async fn device_from_listed_player() {
    let mut server = Server::new_async().await;
    server
        .mock("POST", "/jsonrpc.js")
        .with_body(
            json!({
                "method": "slim.request",
                "result": { "count": 1, "players_loop": [player_json(PLAYER_ID, "Kitchen")] }
            })
            .to_string(),
        )
        .create_async()
        .await;
    let (host, port) = host_and_port(&server);
    let config = ServerConfig::new(host).with_ports(port, 9);
    let options = SessionOptions::default();

    let players = RequestClient::new(&config, &options, Span::none())
        .unwrap()
        .players()
        .await
        .unwrap();
    let device = DeviceSession::for_player(&players.result.players_loop[0], config, options).unwrap();

    assert_eq!(device.identity().id, PLAYER_ID);
    assert_eq!(device.identity().name, "Kitchen");
    assert_eq!(device.identity().port, port);
    assert_eq!(device.state(), SessionState::Idle);
}

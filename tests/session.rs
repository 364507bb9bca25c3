mod common;

use common::{connect_reply, host_and_port, ScriptedTransport, CLIENT_ID, PLAYER_ID};
use mockito::{Matcher, Server};
use serde_json::json;
use squeezebox_lms::{
    ChannelEvent, Command, LmsError, ServerConfig, SessionOptions, SessionState,
    SubscriptionOutcome, SubscriptionSession,
};
use tracing::Span;

fn body_contains(fragment: &str) -> Matcher {
    Matcher::Regex(regex_escape(fragment))
}

fn regex_escape(text: &str) -> String {
    text.chars()
        .flat_map(|c| {
            let escape = matches!(c, '[' | ']' | '{' | '}' | '(' | ')' | '.' | '*' | '+' | '?' | '^' | '$' | '|' | '\\');
            escape.then_some('\\').into_iter().chain(std::iter::once(c))
        })
        .collect()
}

#[tokio::test]
async fn handshake_subscribe_and_publish_over_http() {
    let mut server = Server::new_async().await;
    let handshake = server
        .mock("POST", "/cometd")
        .match_body(body_contains(r#""channel":"/meta/handshake""#))
        .with_body(
            json!([{
                "channel": "/meta/handshake",
                "successful": true,
                "clientId": CLIENT_ID,
                "version": "1.0",
                "supportedConnectionTypes": ["long-polling"]
            }])
            .to_string(),
        )
        .create_async()
        .await;
    let subscribe = server
        .mock("POST", "/cometd")
        .match_body(Matcher::AllOf(vec![
            body_contains(r#""channel":"/meta/subscribe""#),
            body_contains(r#""subscription":"/slim/abc123/request""#),
        ]))
        .with_body(
            json!([{
                "channel": "/meta/subscribe",
                "successful": true,
                "clientId": CLIENT_ID,
                "subscription": "/slim/abc123/request"
            }])
            .to_string(),
        )
        .create_async()
        .await;
    // Long-polls fail and back off; pushes are covered by the scripted tests.
    server
        .mock("POST", "/cometd")
        .match_body(body_contains(r#""channel":"/meta/connect""#))
        .with_status(503)
        .create_async()
        .await;
    let publish = server
        .mock("POST", "/cometd")
        .match_body(Matcher::AllOf(vec![
            body_contains(r#""channel":"/slim/request""#),
            body_contains(r#""response":"/slim/abc123/request""#),
            body_contains(r#""request":["aa:bb:cc:dd:ee:ff",["power","1"]]"#),
        ]))
        .with_body(
            json!([{ "channel": "/slim/request", "successful": true, "clientId": CLIENT_ID, "id": "5" }])
                .to_string(),
        )
        .create_async()
        .await;

    let (host, port) = host_and_port(&server);
    let config = ServerConfig::new(host).with_ports(port, 9090);
    let session =
        SubscriptionSession::over_http(PLAYER_ID, &config, SessionOptions::default(), Span::none())
            .unwrap();

    session.connect().await.unwrap();
    assert_eq!(session.client_id().as_deref(), Some(CLIENT_ID));

    session.publish(&Command::power(true)).await.unwrap();

    handshake.assert_async().await;
    subscribe.assert_async().await;
    publish.assert_async().await;
    session.unsubscribe().await;
}

#[tokio::test]
async fn subscribe_confirmation_is_dispatched() {
    let session =
        SubscriptionSession::new(PLAYER_ID, ScriptedTransport::lms(), SessionOptions::default(), Span::none());
    let mut events = session.events();

    session.connect().await.unwrap();

    match events.try_recv().unwrap() {
        ChannelEvent::Subscription(event) => {
            assert_eq!(
                event.outcome,
                SubscriptionOutcome::Subscribed { client_id: CLIENT_ID.to_string() }
            );
            assert_eq!(Some(event.id.as_str()), session.subscription().map(|s| s.message_id().to_string()).as_deref());
        }
        other => panic!("unexpected event: {:?}", other),
    }
}

#[tokio::test]
async fn unrecognized_push_is_dropped() {
    let transport = ScriptedTransport::new(|message| {
        if message.channel == "/slim/request" {
            vec![
                json!({ "channel": "/slim/abc123/request", "data": { "surprise": true } }),
                json!({ "channel": "/slim/abc123/request", "data": { "power": 1, "mixer volume": 5 } }),
            ]
        } else {
            common::lms_reply(message)
        }
    });
    let session = SubscriptionSession::new(PLAYER_ID, transport, SessionOptions::default(), Span::none());
    session.connect().await.unwrap();
    let mut events = session.events();

    session.publish(&Command::play()).await.unwrap();

    match events.try_recv().unwrap() {
        ChannelEvent::Status(status) => assert_eq!(status.data["mixer volume"], json!(5)),
        other => panic!("unexpected event: {:?}", other),
    }
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn handshake_rejection_keeps_session_reusable() {
    let transport = ScriptedTransport::new(|message| {
        vec![json!({
            "channel": message.channel,
            "id": message.id,
            "successful": false,
            "error": "403::Unknown client"
        })]
    });
    let options = SessionOptions {
        handshake_attempts: 1,
        ..SessionOptions::default()
    };
    let session = SubscriptionSession::new(PLAYER_ID, transport.clone(), options, Span::none());

    assert!(matches!(session.connect().await, Err(LmsError::HandshakeFailed(_))));
    assert_eq!(session.state(), SessionState::Idle);
    assert!(matches!(session.connect().await, Err(LmsError::HandshakeFailed(_))));
    assert_eq!(transport.sent_on("/meta/handshake").len(), 2);
}

#[tokio::test]
async fn long_poll_keeps_delivering_pushes() {
    let push = |volume: i64| {
        json!({
            "channel": "/slim/abc123/request",
            "id": PLAYER_ID,
            "data": { "power": 1, "mixer volume": volume, "mode": "play" }
        })
    };
    let transport = ScriptedTransport::with_polls(
        common::lms_reply,
        vec![
            Ok(vec![connect_reply(json!({ "successful": true })), push(10)]),
            Ok(vec![push(20), connect_reply(json!({ "successful": true }))]),
        ],
    );
    let session = SubscriptionSession::new(PLAYER_ID, transport.clone(), SessionOptions::default(), Span::none());
    session.connect().await.unwrap();
    let mut events = session.events();

    let mut volumes = Vec::new();
    while volumes.len() < 2 {
        match tokio::time::timeout(std::time::Duration::from_secs(5), events.recv()).await {
            Ok(Ok(ChannelEvent::Status(status))) => volumes.push(status.data["mixer volume"].clone()),
            Ok(Ok(_)) => {}
            other => panic!("no push: {:?}", other),
        }
    }

    assert_eq!(volumes, vec![json!(10), json!(20)]);
    assert_eq!(transport.sent_on("/meta/connect").len(), 3);
    assert_eq!(
        transport.sent_on("/meta/connect")[0].client_id.as_deref(),
        Some(CLIENT_ID)
    );
}

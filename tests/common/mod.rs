#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use squeezebox_lms::{BayeuxTransport, Message, Result};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const CLIENT_ID: &str = "abc123";
pub const PLAYER_ID: &str = "aa:bb:cc:dd:ee:ff";

type Responder = Box<dyn Fn(&Message) -> Vec<Value> + Send + Sync>;

/// In-memory CometD server
///
/// Long-polls are answered from a script, one entry per poll, and stay open
/// once it runs out. Every other message is answered by the responder.
pub struct ScriptedTransport {
    sent: Mutex<Vec<Message>>,
    respond: Responder,
    polls: Mutex<VecDeque<Result<Vec<Value>>>>,
}

impl ScriptedTransport {
    pub fn new(respond: impl Fn(&Message) -> Vec<Value> + Send + Sync + 'static) -> Arc<Self> {
        Self::with_polls(respond, Vec::new())
    }

    pub fn with_polls(
        respond: impl Fn(&Message) -> Vec<Value> + Send + Sync + 'static,
        polls: Vec<Result<Vec<Value>>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            respond: Box::new(respond),
            polls: Mutex::new(polls.into()),
        })
    }

    /// A server that accepts everything and answers publishes with a status push
    pub fn lms() -> Arc<Self> {
        Self::new(lms_reply)
    }

    pub fn sent_on(&self, channel: &str) -> Vec<Message> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.channel == channel)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl BayeuxTransport for ScriptedTransport {
    async fn exchange(&self, messages: &[Message], _timeout: Duration) -> Result<Vec<Value>> {
        self.sent.lock().unwrap().extend(messages.iter().cloned());
        if messages.iter().any(|m| m.channel == "/meta/connect") {
            let next = self.polls.lock().unwrap().pop_front();
            match next {
                Some(reply) => return reply,
                None => std::future::pending::<()>().await,
            }
        }
        Ok(messages.iter().flat_map(|m| (self.respond)(m)).collect())
    }
}

pub fn lms_reply(message: &Message) -> Vec<Value> {
    match message.channel.as_str() {
        "/meta/handshake" => vec![json!({
            "channel": "/meta/handshake",
            "id": message.id,
            "successful": true,
            "clientId": CLIENT_ID,
            "version": "1.0",
            "supportedConnectionTypes": ["long-polling"],
            "advice": { "reconnect": "retry", "interval": 0, "timeout": 60000 }
        })],
        "/meta/subscribe" => vec![json!({
            "channel": "/meta/subscribe",
            "id": message.id,
            "successful": true,
            "clientId": CLIENT_ID,
            "subscription": message.subscription
        })],
        "/slim/request" => vec![
            json!({ "channel": "/slim/request", "id": message.id, "successful": true, "clientId": CLIENT_ID }),
            json!({
                "channel": format!("/slim/{}/request", CLIENT_ID),
                "id": PLAYER_ID,
                "ext": { "priority": "" },
                "data": { "power": 1, "mixer volume": 55, "mode": "play", "player_name": "Kitchen" }
            }),
        ],
        _ => vec![json!({
            "channel": message.channel,
            "id": message.id,
            "successful": true,
            "clientId": CLIENT_ID
        })],
    }
}

/// `/meta/connect` reply with extra fields such as `successful` or `advice`
pub fn connect_reply(fields: Value) -> Value {
    let mut reply = json!({ "channel": "/meta/connect", "clientId": CLIENT_ID });
    if let (Some(reply), Some(fields)) = (reply.as_object_mut(), fields.as_object()) {
        reply.extend(fields.clone());
    }
    reply
}

pub fn player_json(id: &str, name: &str) -> Value {
    json!({
        "connected": 1, "power": 1, "canpoweroff": 1, "displaytype": "none",
        "firmware": "v1.9.9", "uuid": null, "seq_no": 0, "isplaying": 0,
        "playerindex": "0", "playerid": id, "model": "squeezelite",
        "ip": "10.0.0.9:41224", "isplayer": 1, "name": name, "modelname": "SqueezeLite"
    })
}

/// `(host, port)` of a mockito server
pub fn host_and_port(server: &mockito::Server) -> (String, u16) {
    let address = server.host_with_port();
    let (host, port) = address.rsplit_once(':').unwrap();
    (host.to_string(), port.parse().unwrap())
}

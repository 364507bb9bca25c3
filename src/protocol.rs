use crate::command::Command;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use uuid::Uuid;

/// JSON-RPC method every LMS request goes through
pub const RPC_METHOD: &str = "slim.request";

pub const HANDSHAKE_CHANNEL: &str = "/meta/handshake";
pub const CONNECT_CHANNEL: &str = "/meta/connect";
pub const SUBSCRIBE_CHANNEL: &str = "/meta/subscribe";
pub const UNSUBSCRIBE_CHANNEL: &str = "/meta/unsubscribe";
pub const DISCONNECT_CHANNEL: &str = "/meta/disconnect";

/// Shared channel commands are published on
pub const REQUEST_CHANNEL: &str = "/slim/request";

const BAYEUX_VERSION: &str = "1.0";
const LONG_POLLING: &str = "long-polling";

/// Private response channel for a CometD client
pub fn response_channel(client_id: &str) -> String {
    format!("/slim/{}/request", client_id)
}

/// JSON-RPC request body
#[derive(Debug, Clone, Serialize)]
pub struct RpcRequest<'a> {
    pub method: &'static str,
    pub params: (&'a str, &'a Command),
}

impl<'a> RpcRequest<'a> {
    pub fn new(player_id: &'a str, command: &'a Command) -> Self {
        Self {
            method: RPC_METHOD,
            params: (player_id, command),
        }
    }
}

/// Outbound Bayeux message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub channel: String,
    pub id: String,
    #[serde(rename = "clientId", skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(rename = "supportedConnectionTypes", skip_serializing_if = "Option::is_none")]
    pub supported_connection_types: Option<Vec<String>>,
    #[serde(rename = "connectionType", skip_serializing_if = "Option::is_none")]
    pub connection_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Message {
    fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            id: Uuid::new_v4().to_string(),
            client_id: None,
            version: None,
            supported_connection_types: None,
            connection_type: None,
            subscription: None,
            data: None,
        }
    }

    fn for_client(channel: impl Into<String>, client_id: &str) -> Self {
        let mut message = Self::new(channel);
        message.client_id = Some(client_id.to_string());
        message
    }

    /// `/meta/handshake` offering long-polling only
    pub fn handshake() -> Self {
        let mut message = Self::new(HANDSHAKE_CHANNEL);
        message.version = Some(BAYEUX_VERSION.to_string());
        message.supported_connection_types = Some(vec![LONG_POLLING.to_string()]);
        message
    }

    /// One long-poll on `/meta/connect`
    pub fn connect(client_id: &str) -> Self {
        let mut message = Self::for_client(CONNECT_CHANNEL, client_id);
        message.connection_type = Some(LONG_POLLING.to_string());
        message
    }

    pub fn subscribe(client_id: &str, subscription: &str) -> Self {
        let mut message = Self::for_client(SUBSCRIBE_CHANNEL, client_id);
        message.subscription = Some(subscription.to_string());
        message
    }

    pub fn unsubscribe(client_id: &str, subscription: &str) -> Self {
        let mut message = Self::for_client(UNSUBSCRIBE_CHANNEL, client_id);
        message.subscription = Some(subscription.to_string());
        message
    }

    pub fn disconnect(client_id: &str) -> Self {
        Self::for_client(DISCONNECT_CHANNEL, client_id)
    }

    /// Publish `command` for `player_id`, asking for replies on the client's response channel
    pub fn publish(client_id: &str, player_id: &str, command: &Command) -> Self {
        let mut message = Self::for_client(REQUEST_CHANNEL, client_id);
        message.data = Some(serde_json::json!({
            "response": response_channel(client_id),
            "request": [player_id, command.encode()],
        }));
        message
    }
}

/// Reply to a `/meta/*` request, read loosely before shape validation
#[derive(Debug, Clone, Deserialize)]
pub struct MetaReply {
    pub channel: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub successful: Option<bool>,
    #[serde(rename = "clientId", default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub advice: Option<Advice>,
}

impl MetaReply {
    /// `None` when the value is not a meta reply at all
    pub fn parse(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }

    pub fn is_successful(&self) -> bool {
        self.successful == Some(true)
    }
}

/// Server hint on how to continue polling
#[derive(Debug, Clone, Deserialize)]
pub struct Advice {
    #[serde(default)]
    pub reconnect: Option<String>,
    /// Milliseconds to wait before the next poll
    #[serde(default)]
    pub interval: Option<u64>,
}

impl Advice {
    /// Pause the server asked for before polling again, if any
    pub fn delay(&self) -> Option<Duration> {
        self.interval
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    /// The server asked the client not to poll again
    pub fn forbids_reconnect(&self) -> bool {
        self.reconnect.as_deref() == Some("none")
    }

    /// The server forgot the client and wants a fresh handshake
    pub fn requires_handshake(&self) -> bool {
        self.reconnect.as_deref() == Some("handshake")
    }
}

use crate::command::{Command, Verb};
use crate::config::{ServerConfig, SessionOptions};
use crate::error::Result;
use crate::protocol::RpcRequest;
use crate::schema::MessageKind;
use crate::types::{FavoritesResponse, PlayerStatusResponse, PlayersResponse, SERVER_PLAYER_ID};
use serde_json::Value;
use tracing::Span;

/// One-shot JSON-RPC client for a server
///
/// Every call is a single HTTP POST; nothing is retried.
#[derive(Debug, Clone)]
pub struct RequestClient {
    http: reqwest::Client,
    endpoint: String,
    span: Span,
}

impl RequestClient {
    /// Create a client for the server's JSON-RPC endpoint
    pub fn new(config: &ServerConfig, options: &SessionOptions, span: Span) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(options.request_timeout)
            .build()?;
        Ok(Self::with_http(http, config, span))
    }

    /// Create a client around an existing HTTP client
    pub fn with_http(http: reqwest::Client, config: &ServerConfig, span: Span) -> Self {
        Self {
            http,
            endpoint: format!("{}/jsonrpc.js", config.base_url()),
            span,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Send `command` for `player_id` and return the decoded reply body
    ///
    /// The reply is not shape-checked here.
    pub async fn request(&self, player_id: &str, command: &Command) -> Result<Value> {
        let body = RpcRequest::new(player_id, command);
        tracing::debug!(
            parent: &self.span,
            player = player_id,
            command = %command.encode(),
            "Sending request"
        );

        let response = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        let reply: Value = response.json().await?;

        tracing::trace!(parent: &self.span, %reply, "Received reply");
        Ok(reply)
    }

    /// List the players known to the server
    pub async fn players(&self) -> Result<PlayersResponse> {
        let command = Command::new(Verb::Players).arg("0");
        let reply = self.request(SERVER_PLAYER_ID, &command).await?;
        self.decode(MessageKind::PlayersResponse, &reply)
    }

    /// Fetch the current status of a player
    pub async fn player_status(&self, player_id: &str) -> Result<PlayerStatusResponse> {
        let command = Command::new(Verb::Status).arg("-");
        let reply = self.request(player_id, &command).await?;
        self.decode(MessageKind::PlayerStatusResponse, &reply)
    }

    /// Fetch a page of the player's favorites
    pub async fn favorites(&self, player_id: &str, start: u32, count: u32) -> Result<FavoritesResponse> {
        let reply = self
            .request(player_id, &Command::favorites_items(start, count))
            .await?;
        self.decode(MessageKind::FavoritesResponse, &reply)
    }

    fn decode<T: serde::de::DeserializeOwned>(&self, kind: MessageKind, reply: &Value) -> Result<T> {
        kind.decode(reply).map_err(|e| {
            tracing::warn!(parent: &self.span, error = %e, "Invalid reply from server");
            e.into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LmsError;
    use mockito::{Matcher, Server};
    use serde_json::json;

    fn client_for(server: &Server) -> RequestClient {
        let url = url_parts(&server.host_with_port());
        let config = ServerConfig::new(url.0).with_ports(url.1, 9090);
        RequestClient::new(&config, &SessionOptions::default(), Span::none()).unwrap()
    }

    fn url_parts(host_with_port: &str) -> (String, u16) {
        let (host, port) = host_with_port.rsplit_once(':').unwrap();
        (host.to_string(), port.parse().unwrap())
    }

    fn player(id: &str, name: &str) -> Value {
        json!({
            "connected": 1, "power": 1, "canpoweroff": 1, "displaytype": "none",
            "firmware": "v1.9", "uuid": null, "seq_no": 0, "isplaying": 1,
            "playerindex": "0", "playerid": id, "model": "squeezelite",
            "ip": "10.0.0.9:5000", "isplayer": 1, "name": name, "modelname": "SqueezeLite"
        })
    }

    #[tokio::test]
    async fn posts_slim_request_body() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/jsonrpc.js")
            .match_header("content-type", "application/json")
            .match_body(Matcher::Json(json!({
                "method": "slim.request",
                "params": ["aa:bb", ["power", "1"]]
            })))
            .with_body(r#"{"method":"slim.request","result":{}}"#)
            .create_async()
            .await;

        let reply = client_for(&server)
            .request("aa:bb", &Command::power(true))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(reply, json!({ "method": "slim.request", "result": {} }));
    }

    #[tokio::test]
    async fn malformed_body_is_a_transport_error() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/jsonrpc.js")
            .with_body("not json")
            .create_async()
            .await;

        let err = client_for(&server)
            .request("aa:bb", &Command::play())
            .await
            .unwrap_err();
        assert!(err.is_transport(), "unexpected error: {err:?}");
    }

    #[tokio::test]
    async fn players_decodes_valid_reply() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/jsonrpc.js")
            .match_body(Matcher::Json(json!({
                "method": "slim.request",
                "params": ["FF:FF:FF:FF", ["players", "0"]]
            })))
            .with_body(
                json!({
                    "method": "slim.request",
                    "result": { "count": 2, "players_loop": [player("aa:01", "Kitchen"), player("aa:02", "Office")] }
                })
                .to_string(),
            )
            .create_async()
            .await;

        let players = client_for(&server).players().await.unwrap();
        assert_eq!(players.result.count, 2);
        assert_eq!(players.result.players_loop[1].name, "Office");
    }

    #[tokio::test]
    async fn players_rejects_invalid_reply() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/jsonrpc.js")
            .with_body(r#"{"method":"slim.request","result":{"count":1,"players_loop":[{"name":"Kitchen"}]}}"#)
            .create_async()
            .await;

        let err = client_for(&server).players().await.unwrap_err();
        match err {
            LmsError::Validation(e) => {
                assert_eq!(e.shape, "PlayersResponse");
                assert!(e.is_missing("result.players_loop[0].playerid"));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn player_status_keeps_raw_fields() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/jsonrpc.js")
            .with_body(
                json!({
                    "method": "slim.request",
                    "result": { "power": 1, "mixer volume": 30, "mode": "pause", "sleep": 0 }
                })
                .to_string(),
            )
            .create_async()
            .await;

        let status = client_for(&server).player_status("aa:01").await.unwrap();
        assert_eq!(status.result["mode"], json!("pause"));
        assert_eq!(status.result["sleep"], json!(0));
    }

    #[tokio::test]
    async fn server_error_status_is_a_transport_error() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/jsonrpc.js")
            .with_status(500)
            .create_async()
            .await;

        let err = client_for(&server).player_status("aa:01").await.unwrap_err();
        assert!(matches!(err, LmsError::Http(_)));
    }
}

use crate::config::{ServerConfig, SessionOptions};
use crate::error::Result;
use crate::protocol::Message;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

/// Carries batches of Bayeux messages to the server and returns its replies
///
/// Each call is independent: implementations must allow several exchanges to
/// be in flight at once, since a long-poll stays open while publishes go out.
#[async_trait]
pub trait BayeuxTransport: Send + Sync {
    /// Send `messages` and return every message in the reply, undecoded
    async fn exchange(&self, messages: &[Message], timeout: Duration) -> Result<Vec<Value>>;
}

/// Long-polling transport posting to the server's `/cometd` endpoint
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpTransport {
    /// Transport with its own HTTP client, using `options.request_timeout` to connect
    pub fn new(config: &ServerConfig, options: &SessionOptions) -> Result<Self> {
        // Per-call timeouts are set in `exchange`; this one only bounds connecting.
        let http = reqwest::Client::builder()
            .connect_timeout(options.request_timeout)
            .build()?;
        Ok(Self::with_http(http, config))
    }

    /// Transport sharing an existing HTTP client
    pub fn with_http(http: reqwest::Client, config: &ServerConfig) -> Self {
        Self {
            http,
            endpoint: format!("{}/cometd", config.base_url()),
        }
    }

    /// URL every batch is posted to
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl BayeuxTransport for HttpTransport {
    async fn exchange(&self, messages: &[Message], timeout: Duration) -> Result<Vec<Value>> {
        let reply: Value = self
            .http
            .post(&self.endpoint)
            .timeout(timeout)
            .json(messages)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        // Servers answer with an array, but a lone object is accepted too.
        Ok(match reply {
            Value::Array(items) => items,
            other => vec![other],
        })
    }
}

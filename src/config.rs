use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default JSON-RPC / CometD port
pub const DEFAULT_HTTP_PORT: u16 = 9000;

/// Default notification (CLI) port
pub const DEFAULT_CLI_PORT: u16 = 9090;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Long-poll requests are held open by the server, so they get a longer deadline
const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(90);
const DEFAULT_HANDSHAKE_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Ports a server listens on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerPorts {
    #[serde(default = "default_http_port")]
    pub http: u16,
    #[serde(default = "default_cli_port")]
    pub cli: u16,
}

impl Default for ServerPorts {
    fn default() -> Self {
        Self {
            http: DEFAULT_HTTP_PORT,
            cli: DEFAULT_CLI_PORT,
        }
    }
}

fn default_http_port() -> u16 {
    DEFAULT_HTTP_PORT
}

fn default_cli_port() -> u16 {
    DEFAULT_CLI_PORT
}

/// Where to reach a server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    #[serde(default)]
    pub ports: ServerPorts,
}

impl ServerConfig {
    /// Server at `host` on the default ports
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ports: ServerPorts::default(),
        }
    }

    pub fn with_ports(mut self, http: u16, cli: u16) -> Self {
        self.ports = ServerPorts { http, cli };
        self
    }

    pub(crate) fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.ports.http)
    }
}

/// Exponential backoff: `initial`, doubled on each failure, capped at `max`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl BackoffPolicy {
    /// Delay to wait after `previous`; zero means no failure so far
    pub fn next(&self, previous: Duration) -> Duration {
        if previous.is_zero() {
            self.initial
        } else {
            (previous * 2).min(self.max)
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: INITIAL_BACKOFF,
            max: MAX_BACKOFF,
        }
    }
}

/// Timeouts and retry behavior shared by the transports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Deadline for JSON-RPC calls and CometD handshake/subscribe/publish
    pub request_timeout: Duration,
    /// Deadline for one CometD long-poll
    pub poll_timeout: Duration,
    /// Handshake tries before `connect` gives up; at least one is always made
    pub handshake_attempts: u32,
    /// Delay between handshake retries, long-poll retries and socket reconnects
    pub backoff: BackoffPolicy,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            handshake_attempts: DEFAULT_HANDSHAKE_ATTEMPTS,
            backoff: BackoffPolicy::default(),
        }
    }
}

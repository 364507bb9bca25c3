//! Rust client for Logitech Media Server (LMS)
//!
//! This library talks to a Logitech Media Server over the three interfaces it
//! offers and turns what the server reports into validated, typed events. It
//! supports:
//!
//! - One-shot JSON-RPC requests (`/jsonrpc.js`)
//! - CometD publish/subscribe sessions with long-polling (`/cometd`)
//! - The line-based notification socket on the CLI port
//! - Shape validation of every payload the server sends
//! - Normalized player status (volume, mute, power, mode)
//!
//! # Quick Start
//!
//! ```no_run
//! use squeezebox_lms::{
//!     Command, DeviceEvent, DeviceSession, RequestClient, ServerConfig, SessionOptions, Tag,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::new("192.168.1.50");
//!     let options = SessionOptions::default();
//!
//!     // List the players the server knows about
//!     let server = RequestClient::new(&config, &options, tracing::Span::none())?;
//!     let players = server.players().await?;
//!
//!     if let Some(player) = players.result.players_loop.first() {
//!         println!("Found player: {}", player.name);
//!
//!         let device = DeviceSession::for_player(player, config.clone(), options)?;
//!         device.send(&Command::power(true)).await?;
//!
//!         // Ask for status pushes and wait for the first one
//!         let mut events = device.connect().await?;
//!         device
//!             .publish(&Command::status_subscription(0, [Tag::Volume, Tag::PlayerState]))
//!             .await?;
//!         while let Ok(event) = events.recv().await {
//!             if let DeviceEvent::Status(status) = event {
//!                 println!("Volume {} ({})", status.volume, status.mode);
//!                 break;
//!             }
//!         }
//!
//!         device.disconnect().await;
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! The library is organized into several layers:
//!
//! - **Device**: Per-player coordinator merging all transports into one event stream
//! - **Request / Session / Notification**: The three server transports
//! - **Schema**: Shape checks and classification of inbound payloads
//! - **Status**: Projection of raw status into [`PlayerStatus`]
//! - **Command / Protocol**: Wire encoding of commands and messages
//! - **Types**: Typed server replies and device identity

mod command;
mod config;
mod device;
mod error;
mod events;
mod notification;
mod protocol;
mod request;
pub mod schema;
mod session;
mod status;
mod transport;
mod types;

// Public exports
pub use command::{Arg, Command, Tag, Verb};
pub use config::{
    BackoffPolicy, ServerConfig, ServerPorts, SessionOptions, DEFAULT_CLI_PORT, DEFAULT_HTTP_PORT,
};
pub use device::{DeviceSession, TopicCommand};
pub use error::{LmsError, Result};
pub use events::{DeviceEvent, EventReceiver};
pub use notification::{NotificationListener, Topic};
pub use protocol::{response_channel, Advice, Message, MetaReply, RPC_METHOD};
pub use request::RequestClient;
pub use schema::{
    ChannelEvent, Classified, Favorite, Favorites, FavoritesEvent, MessageKind, StatusEvent,
    SubscriptionEvent, SubscriptionOutcome, ValidationError,
};
pub use session::{SessionState, SubscriptionHandle, SubscriptionSession};
pub use status::PlayerStatus;
pub use transport::{BayeuxTransport, HttpTransport};
pub use types::{
    DeviceIdentity, FavoritesResponse, NumberOrText, Player, PlayerId, PlayerStatusResponse,
    PlayersResponse, PlayersResult, SERVER_PLAYER_ID,
};

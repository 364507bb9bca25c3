use crate::schema::Favorites;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Server-assigned player identifier (usually the player's MAC address)
pub type PlayerId = String;

/// Player id used for server-wide queries
pub const SERVER_PLAYER_ID: &str = "FF:FF:FF:FF";

const DEFAULT_MANUFACTURER: &str = "Logitech";

/// Field the server sends either as a number or as a string
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NumberOrText {
    Number(serde_json::Number),
    Text(String),
}

impl fmt::Display for NumberOrText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NumberOrText::Number(n) => write!(f, "{}", n),
            NumberOrText::Text(s) => f.write_str(s),
        }
    }
}

/// Player entry of a `players` reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub connected: u8,
    pub power: u8,
    pub canpoweroff: u8,
    pub displaytype: String,
    pub firmware: NumberOrText,
    pub uuid: Option<String>,
    pub seq_no: u64,
    pub isplaying: u8,
    pub playerindex: NumberOrText,
    pub playerid: PlayerId,
    pub model: String,
    pub ip: String,
    pub isplayer: u8,
    pub name: String,
    pub modelname: String,
}

/// Result object of a `players` reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayersResult {
    pub count: u32,
    pub players_loop: Vec<Player>,
}

/// Validated reply to `players`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayersResponse {
    pub method: String,
    pub result: PlayersResult,
}

/// Validated reply to `status`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerStatusResponse {
    pub method: String,
    /// Raw status fields; see [`crate::PlayerStatus::from_raw`]
    pub result: Map<String, Value>,
}

/// Validated reply to `favorites items`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FavoritesResponse {
    pub method: String,
    pub result: Favorites,
}

/// Identity of a player and the server it is attached to
///
/// Fixed once discovered; a renamed player is treated as a new discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub id: PlayerId,
    pub name: String,
    pub host: String,
    /// JSON-RPC / CometD port of the server
    pub port: u16,
    pub model: String,
    pub manufacturer: String,
    pub firmware_version: String,
}

impl DeviceIdentity {
    /// Build an identity from a player listed by the server at `host:port`
    pub fn from_player(player: &Player, host: impl Into<String>, port: u16) -> Self {
        Self {
            id: player.playerid.clone(),
            name: player.name.clone(),
            host: host.into(),
            port,
            model: player.modelname.clone(),
            manufacturer: DEFAULT_MANUFACTURER.to_string(),
            firmware_version: player.firmware.to_string(),
        }
    }
}

use super::{Field, IssueKind, Kind, Shape};
use serde_json::{Map, Value};

static NUMBER_OR_STRING: [Kind; 2] = [Kind::Number, Kind::String];
static NULL_OR_STRING: [Kind; 2] = [Kind::Null, Kind::String];
static ANY_ITEM: Kind = Kind::Any;

// ========== Players ==========

pub static PLAYER: Shape = Shape {
    name: "Player",
    strict: true,
    rule: None,
    fields: &[
        Field::required("connected", Kind::Number),
        Field::required("power", Kind::Number),
        Field::required("canpoweroff", Kind::Number),
        Field::required("displaytype", Kind::String),
        Field::required("firmware", Kind::AnyOf(&NUMBER_OR_STRING)),
        Field::required("uuid", Kind::AnyOf(&NULL_OR_STRING)),
        Field::required("seq_no", Kind::Number),
        Field::required("isplaying", Kind::Number),
        Field::required("playerindex", Kind::AnyOf(&NUMBER_OR_STRING)),
        Field::required("playerid", Kind::String),
        Field::required("model", Kind::String),
        Field::required("ip", Kind::String),
        Field::required("isplayer", Kind::Number),
        Field::required("name", Kind::String),
        Field::required("modelname", Kind::String),
    ],
};

static PLAYER_ITEM: Kind = Kind::Object(&PLAYER);

pub static PLAYERS_RESULT: Shape = Shape {
    name: "PlayersResult",
    strict: true,
    rule: None,
    fields: &[
        Field::required("count", Kind::Number),
        Field::required("players_loop", Kind::Array(&PLAYER_ITEM)),
    ],
};

pub static PLAYERS_RESPONSE: Shape = Shape {
    name: "PlayersResponse",
    strict: false,
    rule: None,
    fields: &[
        Field::required("method", Kind::String),
        Field::required("result", Kind::Object(&PLAYERS_RESULT)),
    ],
};

// ========== Player status ==========

pub static PLAYLIST_ENTRY: Shape = Shape {
    name: "PlaylistEntry",
    strict: true,
    rule: None,
    fields: &[
        Field::required("playlist index", Kind::Number),
        Field::required("title", Kind::String),
        Field::required("id", Kind::String),
    ],
};

static PLAYLIST_ITEM: Kind = Kind::Object(&PLAYLIST_ENTRY);

pub static REMOTE_META: Shape = Shape {
    name: "RemoteMeta",
    strict: true,
    rule: None,
    fields: &[
        Field::required("id", Kind::String),
        Field::required("title", Kind::String),
    ],
};

/// Status fields vary by server version, so unknown fields are allowed; a
/// payload must still carry at least one of the known ones.
pub static PLAYER_STATUS: Shape = Shape {
    name: "PlayerStatus",
    strict: false,
    rule: Some(has_known_status_field),
    fields: &[
        Field::optional("playlist_tracks", Kind::Number),
        Field::optional("playlist repeat", Kind::Number),
        Field::optional("power", Kind::Number),
        Field::optional("playlist shuffle", Kind::Number),
        Field::optional("time", Kind::Number),
        Field::optional("player_name", Kind::String),
        Field::optional("playlist mode", Kind::String),
        Field::optional("signalstrength", Kind::Number),
        Field::optional("digital_volume_control", Kind::Number),
        Field::optional("rate", Kind::Number),
        Field::optional("remoteMeta", Kind::Object(&REMOTE_META)),
        Field::optional("playlist_loop", Kind::Array(&PLAYLIST_ITEM)),
        Field::optional("can_seek", Kind::Number),
        Field::optional("randomplay", Kind::Number),
        Field::optional("playlist_cur_index", Kind::AnyOf(&NUMBER_OR_STRING)),
        Field::optional("mode", Kind::String),
        Field::optional("playlist_timestamp", Kind::Number),
        Field::optional("current_title", Kind::String),
        Field::optional("use_volume_control", Kind::Number),
        Field::optional("seq_no", Kind::Number),
        Field::optional("mixer volume", Kind::Number),
        Field::optional("player_connected", Kind::Number),
        Field::optional("remote", Kind::Number),
        Field::optional("player_ip", Kind::String),
        Field::optional("playlist_repeat", Kind::Number),
        Field::optional("duration", Kind::Number),
        Field::optional("replay_gain", Kind::String),
    ],
};

fn has_known_status_field(map: &Map<String, Value>) -> Option<IssueKind> {
    if PLAYER_STATUS.fields.iter().any(|f| map.contains_key(f.name)) {
        None
    } else {
        Some(IssueKind::Rule("no player status fields present".to_string()))
    }
}

pub static PLAYER_STATUS_RESPONSE: Shape = Shape {
    name: "PlayerStatusResponse",
    strict: false,
    rule: None,
    fields: &[
        Field::required("method", Kind::String),
        Field::required("result", Kind::Object(&PLAYER_STATUS)),
    ],
};

// ========== Channel events ==========

pub static EVENT_EXT: Shape = Shape {
    name: "EventExt",
    strict: false,
    rule: None,
    fields: &[Field::optional("priority", Kind::String)],
};

pub static PLAYER_STATUS_EVENT: Shape = Shape {
    name: "PlayerStatusEvent",
    strict: false,
    rule: None,
    fields: &[
        Field::optional("id", Kind::String),
        Field::optional("channel", Kind::String),
        Field::optional("ext", Kind::Object(&EVENT_EXT)),
        Field::required("data", Kind::Object(&PLAYER_STATUS)),
    ],
};

pub static FAVORITE: Shape = Shape {
    name: "Favorite",
    strict: true,
    rule: None,
    fields: &[
        Field::required("id", Kind::String),
        Field::required("name", Kind::String),
        Field::optional("type", Kind::String),
        Field::required("image", Kind::String),
        Field::required("isaudio", Kind::Number),
        Field::required("hasitems", Kind::Number),
    ],
};

static FAVORITE_ITEM: Kind = Kind::Object(&FAVORITE);

pub static FAVORITES: Shape = Shape {
    name: "Favorites",
    strict: true,
    rule: None,
    fields: &[
        Field::required("count", Kind::Number),
        Field::required("title", Kind::String),
        Field::required("loop_loop", Kind::Array(&FAVORITE_ITEM)),
    ],
};

/// The JSON-RPC endpoint echoes `params` and `id` back next to the result.
pub static FAVORITES_RESPONSE: Shape = Shape {
    name: "FavoritesResponse",
    strict: true,
    rule: None,
    fields: &[
        Field::required("method", Kind::String),
        Field::required("result", Kind::Object(&FAVORITES)),
        Field::optional("params", Kind::Array(&ANY_ITEM)),
        Field::optional("id", Kind::Any),
    ],
};

pub static FAVORITES_EVENT: Shape = Shape {
    name: "FavoritesEvent",
    strict: false,
    rule: None,
    fields: &[
        Field::optional("id", Kind::String),
        Field::optional("channel", Kind::String),
        Field::optional("ext", Kind::Object(&EVENT_EXT)),
        Field::required("data", Kind::Object(&FAVORITES)),
    ],
};

pub static SUBSCRIPTION_EVENT: Shape = Shape {
    name: "SubscriptionEvent",
    strict: false,
    rule: Some(subscription_outcome_present),
    fields: &[
        Field::required("successful", Kind::Boolean),
        Field::required("channel", Kind::String),
        Field::required("id", Kind::String),
        Field::optional("clientId", Kind::String),
        Field::optional("error", Kind::String),
        Field::optional("subscription", Kind::String),
    ],
};

/// Successful replies name the client, failed ones carry the error text.
fn subscription_outcome_present(map: &Map<String, Value>) -> Option<IssueKind> {
    let (field, needed) = match map.get("successful").and_then(Value::as_bool) {
        Some(true) => ("clientId", "successful subscription reply without clientId"),
        Some(false) => ("error", "failed subscription reply without error"),
        None => return None,
    };
    match map.get(field) {
        Some(Value::String(_)) => None,
        _ => Some(IssueKind::Rule(needed.to_string())),
    }
}

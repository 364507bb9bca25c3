use serde::ser::{Serialize, SerializeSeq, Serializer};
use serde_json::{json, Value};
use std::fmt;

/// Server operations understood by the LMS command dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Status,
    Players,
    Play,
    Pause,
    Stop,
    Next,
    Previous,
    Volume,
    Mute,
    Unmute,
    Seek,
    AddToPlaylist,
    RemoveFromPlaylist,
    Playlist,
    ClearPlaylist,
    Shuffle,
    Repeat,
    Mode,
    Position,
    TrackInfo,
    AddToGroup,
    RemoveFromGroup,
    GroupVolume,
    Idle,
    Restart,
    /// Delay before the player sleeps once the current track ends
    JiveEndOfTrackSleep,
    Mixer,
    Power,
    Favorites,
}

impl Verb {
    /// Wire name of the verb
    pub fn as_str(self) -> &'static str {
        match self {
            Verb::Status => "status",
            Verb::Players => "players",
            Verb::Play => "play",
            Verb::Pause => "pause",
            Verb::Stop => "stop",
            Verb::Next => "next",
            Verb::Previous => "previous",
            Verb::Volume => "volume",
            Verb::Mute => "mute",
            Verb::Unmute => "unmute",
            Verb::Seek => "seek",
            Verb::AddToPlaylist => "addto_playlist",
            Verb::RemoveFromPlaylist => "remove_from_playlist",
            Verb::Playlist => "playlist",
            Verb::ClearPlaylist => "clear_playlist",
            Verb::Shuffle => "shuffle",
            Verb::Repeat => "repeat",
            Verb::Mode => "mode",
            Verb::Position => "position",
            Verb::TrackInfo => "trackinfo",
            Verb::AddToGroup => "add_to_group",
            Verb::RemoveFromGroup => "remove_from_group",
            Verb::GroupVolume => "group_volume",
            Verb::Idle => "idle",
            Verb::Restart => "restart",
            Verb::JiveEndOfTrackSleep => "jiveendoftracksleep",
            Verb::Mixer => "mixer",
            Verb::Power => "power",
            Verb::Favorites => "favorites",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Single-character field selectors for status replies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    Artist,
    Duration,
    Album,
    TrackNumber,
    TrackTitle,
    PlayerType,
    Volume,
    PlayMode,
    TrackId,
    PlayerState,
    Genre,
    Rating,
    Url,
    Bitrate,
    PlayerName,
    DateAdded,
    PlaylistName,
    PlaylistIndex,
    CustomField,
    SongId,
}

impl Tag {
    /// Letter the server expects in the `tags` parameter
    pub fn as_char(self) -> char {
        match self {
            Tag::Artist => 'a',
            Tag::Duration => 'd',
            Tag::Album => 'l',
            Tag::TrackNumber => 'k',
            Tag::TrackTitle => 'n',
            Tag::PlayerType => 'p',
            Tag::Volume => 'v',
            Tag::PlayMode => 'm',
            Tag::TrackId => 'i',
            Tag::PlayerState => 's',
            Tag::Genre => 't',
            Tag::Rating => 'r',
            Tag::Url => 'u',
            Tag::Bitrate => 'b',
            Tag::PlayerName => 'y',
            Tag::DateAdded => 'z',
            Tag::PlaylistName => 'q',
            Tag::PlaylistIndex => 'x',
            Tag::CustomField => 'c',
            Tag::SongId => 'f',
        }
    }
}

/// Positional command argument
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Text(String),
    Int(i64),
    Float(f64),
}

impl Arg {
    fn to_value(&self) -> Value {
        match self {
            Arg::Text(s) => Value::String(s.clone()),
            Arg::Int(n) => json!(n),
            Arg::Float(n) => json!(n),
        }
    }
}

impl From<&str> for Arg {
    fn from(s: &str) -> Self {
        Arg::Text(s.to_string())
    }
}

impl From<String> for Arg {
    fn from(s: String) -> Self {
        Arg::Text(s)
    }
}

impl From<i64> for Arg {
    fn from(n: i64) -> Self {
        Arg::Int(n)
    }
}

impl From<i32> for Arg {
    fn from(n: i32) -> Self {
        Arg::Int(n.into())
    }
}

impl From<u32> for Arg {
    fn from(n: u32) -> Self {
        Arg::Int(n.into())
    }
}

impl From<f64> for Arg {
    fn from(n: f64) -> Self {
        Arg::Float(n)
    }
}

/// A server command: verb, positional arguments and optional tag selectors
///
/// Commands are built by value and never change after construction. The
/// encoded form is the argument list LMS expects as the second `slim.request`
/// parameter:
///
/// ```
/// use squeezebox_lms::{Command, Tag, Verb};
/// use serde_json::json;
///
/// let cmd = Command::new(Verb::Status)
///     .arg("-")
///     .arg(1)
///     .tags([Tag::Volume, Tag::PlayerState]);
/// assert_eq!(cmd.encode(), json!(["status", "-", 1, {"tags": "vs"}]));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    verb: Verb,
    args: Vec<Arg>,
    tags: Vec<Tag>,
}

impl Command {
    /// Command with no arguments or tags
    pub fn new(verb: Verb) -> Self {
        Self {
            verb,
            args: Vec::new(),
            tags: Vec::new(),
        }
    }

    /// Append a positional argument
    pub fn arg(mut self, arg: impl Into<Arg>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several positional arguments
    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Request an optional reply field; repeated tags are ignored
    pub fn tag(mut self, tag: Tag) -> Self {
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
        self
    }

    /// Request several reply fields at once
    pub fn tags(self, tags: impl IntoIterator<Item = Tag>) -> Self {
        tags.into_iter().fold(self, Command::tag)
    }

    /// Top-level verb
    pub fn verb(&self) -> Verb {
        self.verb
    }

    /// Positional arguments in order
    pub fn arguments(&self) -> &[Arg] {
        &self.args
    }

    /// Requested tags, first occurrence order
    pub fn selected_tags(&self) -> &[Tag] {
        &self.tags
    }

    /// Canonical wire array: `[verb, ...args]` plus a trailing `{"tags": ..}` when tagged
    pub fn encode(&self) -> Value {
        Value::Array(self.encoded_items())
    }

    fn encoded_items(&self) -> Vec<Value> {
        let mut items = Vec::with_capacity(self.args.len() + 2);
        items.push(Value::String(self.verb.as_str().to_string()));
        items.extend(self.args.iter().map(Arg::to_value));
        if !self.tags.is_empty() {
            let tags: String = self.tags.iter().map(|t| t.as_char()).collect();
            items.push(json!({ "tags": tags }));
        }
        items
    }

    // ========== Common commands ==========

    /// `power 1` / `power 0`
    pub fn power(on: bool) -> Self {
        Command::new(Verb::Power).arg(if on { "1" } else { "0" })
    }

    /// `mixer muting 1` / `mixer muting 0`
    pub fn mute(muted: bool) -> Self {
        Command::new(Verb::Mixer).args(["muting", if muted { "1" } else { "0" }])
    }

    /// Relative volume step, `mixer volume +5` or `mixer volume -5`
    pub fn volume_change(change: i32) -> Self {
        let step = if change > 0 {
            format!("+{}", change)
        } else {
            change.to_string()
        };
        Command::new(Verb::Mixer).arg("volume").arg(step)
    }

    /// `play`
    pub fn play() -> Self {
        Command::new(Verb::Play)
    }

    /// `pause`
    pub fn pause() -> Self {
        Command::new(Verb::Pause)
    }

    /// Status query that asks the server to keep pushing updates every `interval_secs`
    pub fn status_subscription(interval_secs: u32, tags: impl IntoIterator<Item = Tag>) -> Self {
        Command::new(Verb::Status)
            .arg("-")
            .arg(1)
            .arg(format!("subscribe:{}", interval_secs))
            .tags(tags)
    }

    /// `favorites items <start> <count>`
    pub fn favorites_items(start: u32, count: u32) -> Self {
        Command::new(Verb::Favorites).arg("items").arg(start).arg(count)
    }
}

impl Serialize for Command {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let items = self.encoded_items();
        let mut seq = serializer.serialize_seq(Some(items.len()))?;
        for item in &items {
            seq.serialize_element(item)?;
        }
        seq.end()
    }
}

use super::{MessageKind, ValidationError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Extension metadata attached to channel pushes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventExt {
    #[serde(default)]
    pub priority: Option<String>,
}

/// Raw player status pushed on a session channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    /// Player the status belongs to
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub ext: Option<EventExt>,
    /// Status fields as sent by the server
    pub data: Map<String, Value>,
}

/// A single favorites entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Favorite {
    pub id: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub item_type: Option<String>,
    pub image: String,
    pub isaudio: u8,
    pub hasitems: u8,
}

impl Favorite {
    pub fn is_audio(&self) -> bool {
        self.isaudio != 0
    }

    pub fn has_items(&self) -> bool {
        self.hasitems != 0
    }
}

/// Favorites listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Favorites {
    pub count: u32,
    pub title: String,
    #[serde(rename = "loop_loop")]
    pub items: Vec<Favorite>,
}

/// Favorites pushed on a session channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FavoritesEvent {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub ext: Option<EventExt>,
    pub data: Favorites,
}

/// Result carried by a subscription reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionOutcome {
    Subscribed { client_id: String },
    Failed { error: String },
}

/// Reply to a subscribe (or other acknowledged) request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionEvent {
    pub channel: String,
    /// Message id the reply answers
    pub id: String,
    /// Channel that was subscribed, when the server names it
    pub subscription: Option<String>,
    pub outcome: SubscriptionOutcome,
}

impl SubscriptionEvent {
    pub fn is_successful(&self) -> bool {
        matches!(self.outcome, SubscriptionOutcome::Subscribed { .. })
    }

    pub fn client_id(&self) -> Option<&str> {
        match &self.outcome {
            SubscriptionOutcome::Subscribed { client_id } => Some(client_id),
            SubscriptionOutcome::Failed { .. } => None,
        }
    }

    fn from_value(value: &Value) -> Result<Self, ValidationError> {
        #[derive(Deserialize)]
        struct Raw {
            successful: bool,
            channel: String,
            id: String,
            #[serde(rename = "clientId", default)]
            client_id: Option<String>,
            #[serde(default)]
            error: Option<String>,
            #[serde(default)]
            subscription: Option<String>,
        }

        let raw: Raw = MessageKind::SubscriptionEvent.decode(value)?;
        // The shape rule guarantees the field matching `successful` is present.
        let outcome = if raw.successful {
            SubscriptionOutcome::Subscribed {
                client_id: raw.client_id.unwrap_or_default(),
            }
        } else {
            SubscriptionOutcome::Failed {
                error: raw.error.unwrap_or_default(),
            }
        };
        Ok(Self {
            channel: raw.channel,
            id: raw.id,
            subscription: raw.subscription,
            outcome,
        })
    }
}

/// Any validated inbound payload
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Status(StatusEvent),
    Favorites(FavoritesEvent),
    Subscription(SubscriptionEvent),
}

/// Result of classifying a raw payload
#[derive(Debug, Clone, PartialEq)]
pub enum Classified {
    Event(ChannelEvent),
    /// No shape matched; one error per shape tried, in priority order
    Unrecognized(Vec<ValidationError>),
}

impl ChannelEvent {
    /// Match a payload against status, favorites and subscription shapes, in that order
    pub fn classify(value: &Value) -> Classified {
        let mut errors = Vec::with_capacity(3);

        match MessageKind::PlayerStatusEvent.decode::<StatusEvent>(value) {
            Ok(event) => return Classified::Event(ChannelEvent::Status(event)),
            Err(e) => errors.push(e),
        }

        match MessageKind::FavoritesEvent.decode::<FavoritesEvent>(value) {
            Ok(event) => return Classified::Event(ChannelEvent::Favorites(event)),
            Err(e) => errors.push(e),
        }

        match SubscriptionEvent::from_value(value) {
            Ok(event) => return Classified::Event(ChannelEvent::Subscription(event)),
            Err(e) => errors.push(e),
        }

        Classified::Unrecognized(errors)
    }
}

impl Classified {
    pub fn into_event(self) -> Option<ChannelEvent> {
        match self {
            Classified::Event(event) => Some(event),
            Classified::Unrecognized(_) => None,
        }
    }
}

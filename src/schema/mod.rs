//! Shape checks for every JSON payload the server can send
//!
//! Each wire message kind has a static [`Shape`] describing its fields, their
//! primitive types and whether unknown fields are tolerated. Payloads are
//! validated against a shape before anything else looks at them; the typed
//! structs in this crate are only ever decoded from payloads that passed.

mod event;
mod shapes;

pub use event::{
    ChannelEvent, Classified, EventExt, Favorite, Favorites, FavoritesEvent, StatusEvent,
    SubscriptionEvent, SubscriptionOutcome,
};

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

/// Expected JSON type of a field
#[derive(Debug, Clone, Copy)]
pub enum Kind {
    /// Any JSON value
    Any,
    Number,
    String,
    Boolean,
    Null,
    /// Any JSON object, contents unchecked
    AnyObject,
    Object(&'static Shape),
    Array(&'static Kind),
    AnyOf(&'static [Kind]),
}

impl Kind {
    fn describe(&self) -> String {
        match self {
            Kind::Any => "any".to_string(),
            Kind::Number => "number".to_string(),
            Kind::String => "string".to_string(),
            Kind::Boolean => "boolean".to_string(),
            Kind::Null => "null".to_string(),
            Kind::AnyObject => "object".to_string(),
            Kind::Object(shape) => shape.name.to_string(),
            Kind::Array(item) => format!("array of {}", item.describe()),
            Kind::AnyOf(kinds) => kinds
                .iter()
                .map(Kind::describe)
                .collect::<Vec<_>>()
                .join(" | "),
        }
    }
}

/// Extra object-level check run after the per-field checks
pub type Rule = fn(&Map<String, Value>) -> Option<IssueKind>;

/// A named field of a [`Shape`]
#[derive(Debug, Clone, Copy)]
pub struct Field {
    pub name: &'static str,
    pub kind: Kind,
    pub required: bool,
}

impl Field {
    pub const fn required(name: &'static str, kind: Kind) -> Self {
        Self {
            name,
            kind,
            required: true,
        }
    }

    pub const fn optional(name: &'static str, kind: Kind) -> Self {
        Self {
            name,
            kind,
            required: false,
        }
    }
}

/// Declarative description of a JSON object
pub struct Shape {
    pub name: &'static str,
    pub fields: &'static [Field],
    /// Reject fields not listed in `fields`
    pub strict: bool,
    pub rule: Option<Rule>,
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shape")
            .field("name", &self.name)
            .field("fields", &self.fields.len())
            .field("strict", &self.strict)
            .finish()
    }
}

impl Shape {
    /// Check `value` against this shape, collecting every issue found
    pub fn validate(&'static self, value: &Value) -> Result<(), ValidationError> {
        let mut issues = Vec::new();
        check_object(self, value, "", &mut issues);
        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError {
                shape: self.name,
                issues,
            })
        }
    }

    pub fn is_valid(&'static self, value: &Value) -> bool {
        self.validate(value).is_ok()
    }

    /// Validate, then decode into the typed representation of this shape
    pub fn decode<T: DeserializeOwned>(&'static self, value: &Value) -> Result<T, ValidationError> {
        self.validate(value)?;
        serde_json::from_value(value.clone()).map_err(|e| ValidationError {
            shape: self.name,
            issues: vec![Issue {
                path: String::new(),
                kind: IssueKind::Decode(e.to_string()),
            }],
        })
    }
}

/// The message kinds the server is known to produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Player,
    PlayersResponse,
    PlayerStatus,
    PlayerStatusResponse,
    PlayerStatusEvent,
    Favorite,
    Favorites,
    FavoritesResponse,
    FavoritesEvent,
    SubscriptionEvent,
}

impl MessageKind {
    pub const ALL: [MessageKind; 10] = [
        MessageKind::Player,
        MessageKind::PlayersResponse,
        MessageKind::PlayerStatus,
        MessageKind::PlayerStatusResponse,
        MessageKind::PlayerStatusEvent,
        MessageKind::Favorite,
        MessageKind::Favorites,
        MessageKind::FavoritesResponse,
        MessageKind::FavoritesEvent,
        MessageKind::SubscriptionEvent,
    ];

    pub fn shape(self) -> &'static Shape {
        match self {
            MessageKind::Player => &shapes::PLAYER,
            MessageKind::PlayersResponse => &shapes::PLAYERS_RESPONSE,
            MessageKind::PlayerStatus => &shapes::PLAYER_STATUS,
            MessageKind::PlayerStatusResponse => &shapes::PLAYER_STATUS_RESPONSE,
            MessageKind::PlayerStatusEvent => &shapes::PLAYER_STATUS_EVENT,
            MessageKind::Favorite => &shapes::FAVORITE,
            MessageKind::Favorites => &shapes::FAVORITES,
            MessageKind::FavoritesResponse => &shapes::FAVORITES_RESPONSE,
            MessageKind::FavoritesEvent => &shapes::FAVORITES_EVENT,
            MessageKind::SubscriptionEvent => &shapes::SUBSCRIPTION_EVENT,
        }
    }

    pub fn validate(self, value: &Value) -> Result<(), ValidationError> {
        self.shape().validate(value)
    }

    pub fn is_valid(self, value: &Value) -> bool {
        self.shape().is_valid(value)
    }

    /// See [`Shape::decode`]
    pub fn decode<T: DeserializeOwned>(self, value: &Value) -> Result<T, ValidationError> {
        self.shape().decode(value)
    }
}

/// What went wrong at one location of a payload
#[derive(Debug, Clone, PartialEq)]
pub enum IssueKind {
    Missing,
    TypeMismatch { expected: String, found: &'static str },
    Unexpected,
    Rule(String),
    Decode(String),
}

/// One validation failure, located by a dotted path
#[derive(Debug, Clone, PartialEq)]
pub struct Issue {
    pub path: String,
    pub kind: IssueKind,
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = if self.path.is_empty() { "<root>" } else { &self.path };
        match &self.kind {
            IssueKind::Missing => write!(f, "{}: missing required field", path),
            IssueKind::TypeMismatch { expected, found } => {
                write!(f, "{}: expected {}, found {}", path, expected, found)
            }
            IssueKind::Unexpected => write!(f, "{}: unexpected field", path),
            IssueKind::Rule(msg) => write!(f, "{}: {}", path, msg),
            IssueKind::Decode(msg) => write!(f, "{}: {}", path, msg),
        }
    }
}

/// Payload did not match a shape
#[derive(Error, Debug, Clone, PartialEq)]
#[error("invalid {shape}: {}", join_issues(.issues))]
pub struct ValidationError {
    pub shape: &'static str,
    pub issues: Vec<Issue>,
}

impl ValidationError {
    /// Whether any issue reports `field` (a dotted path) as missing
    pub fn is_missing(&self, field: &str) -> bool {
        self.issues
            .iter()
            .any(|i| i.kind == IssueKind::Missing && i.path == field)
    }
}

fn join_issues(issues: &[Issue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn child_path(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", path, name)
    }
}

fn check_object(shape: &'static Shape, value: &Value, path: &str, issues: &mut Vec<Issue>) {
    let Some(map) = value.as_object() else {
        issues.push(Issue {
            path: path.to_string(),
            kind: IssueKind::TypeMismatch {
                expected: shape.name.to_string(),
                found: type_name(value),
            },
        });
        return;
    };

    for field in shape.fields {
        let field_path = child_path(path, field.name);
        match map.get(field.name) {
            Some(v) => check_kind(&field.kind, v, &field_path, issues),
            None if field.required => issues.push(Issue {
                path: field_path,
                kind: IssueKind::Missing,
            }),
            None => {}
        }
    }

    if shape.strict {
        for key in map.keys() {
            if !shape.fields.iter().any(|f| f.name == key) {
                issues.push(Issue {
                    path: child_path(path, key),
                    kind: IssueKind::Unexpected,
                });
            }
        }
    }

    if let Some(rule) = shape.rule {
        if let Some(kind) = rule(map) {
            issues.push(Issue {
                path: path.to_string(),
                kind,
            });
        }
    }
}

fn check_kind(kind: &Kind, value: &Value, path: &str, issues: &mut Vec<Issue>) {
    let matches = match kind {
        Kind::Any => true,
        Kind::Number => value.is_number(),
        Kind::String => value.is_string(),
        Kind::Boolean => value.is_boolean(),
        Kind::Null => value.is_null(),
        Kind::AnyObject => value.is_object(),
        Kind::Object(shape) => {
            check_object(shape, value, path, issues);
            return;
        }
        Kind::Array(item) => match value.as_array() {
            Some(items) => {
                for (i, entry) in items.iter().enumerate() {
                    check_kind(item, entry, &format!("{}[{}]", path, i), issues);
                }
                return;
            }
            None => false,
        },
        Kind::AnyOf(kinds) => kinds.iter().any(|k| {
            let mut scratch = Vec::new();
            check_kind(k, value, path, &mut scratch);
            scratch.is_empty()
        }),
    };

    if !matches {
        issues.push(Issue {
            path: path.to_string(),
            kind: IssueKind::TypeMismatch {
                expected: kind.describe(),
                found: type_name(value),
            },
        });
    }
}

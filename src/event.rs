use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::hash::{Hash, Hasher};
use std::time::{SystemTime, UNIX_EPOCH};

/// Event type of a redaction.
pub const REDACTION_TYPE: &str = "m.room.redaction";

/// Event type of a membership state event.
pub const MEMBER_TYPE: &str = "m.room.member";

/// Prefix of ids synthesized locally for stripped invite state.
///
/// Server-issued ids always start with `$`, so a local id can never collide
/// with one.
pub const LOCAL_ID_PREFIX: &str = "invite-";

/// Direction in which an event enters a timeline.
///
/// Serialized as `"f"` / `"b"`, the values the message history endpoint
/// takes for its `dir` parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Towards the present. Sync pushes and forward pagination.
    #[serde(rename = "f")]
    Forwards,
    /// Towards the past. Back pagination.
    #[serde(rename = "b")]
    Backwards,
}

impl Direction {
    /// Wire value for the `dir` query parameter.
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Forwards => "f",
            Direction::Backwards => "b",
        }
    }
}

/// An immutable protocol event as delivered by the remote service.
///
/// `content` is left untyped ([`serde_json::Value`]): the timeline only
/// interprets the handful of keys room state needs (membership, name, topic).
///
/// Identity is the event id. `PartialEq` and `Hash` compare ids only, so two
/// deliveries of the same event are equal even if one of them was redacted
/// in between.
///
/// # Examples
///
/// ```
/// use roomfold::Event;
/// use serde_json::json;
///
/// let event = Event::new("m.room.name", "@alice:example.org", json!({"name": "Lobby"}))
///     .with_id("$name1")
///     .with_state_key("");
/// assert!(event.is_state());
/// assert_eq!(event.content["name"], "Lobby");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[non_exhaustive]
pub struct Event {
    /// Server-issued id, or a locally synthesized one for stripped invite
    /// state. Empty when the payload carried none.
    #[serde(default)]
    pub event_id: String,

    #[serde(default)]
    pub room_id: String,

    /// Serialized as `"type"`.
    #[serde(rename = "type")]
    pub event_type: String,

    pub sender: String,

    /// Origin timestamp in milliseconds since the Unix epoch.
    #[serde(default)]
    pub origin_server_ts: u64,

    #[serde(default)]
    pub content: Value,

    /// Present iff this is a state event. Empty string for single-instance
    /// state such as the room name; a user id for membership.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_key: Option<String>,

    /// Target event id, for redactions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redacts: Option<String>,

    /// Content of the state this event replaced. Used to walk state
    /// backwards during back pagination. Servers usually send it under
    /// `unsigned` instead; see [`Event::prev_content`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_content: Option<Value>,

    /// Server- or client-added annotations. Carries `redacted_because` once
    /// the event has been redacted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unsigned: Option<Value>,
}

impl Event {
    /// Create an event stamped with the current time and no id.
    pub fn new(event_type: &str, sender: &str, content: Value) -> Self {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        Event {
            event_id: String::new(),
            room_id: String::new(),
            event_type: event_type.to_string(),
            sender: sender.to_string(),
            origin_server_ts: ts,
            content,
            state_key: None,
            redacts: None,
            prev_content: None,
            unsigned: None,
        }
    }

    /// Set the event id.
    pub fn with_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = event_id.into();
        self
    }

    /// Set the room id.
    pub fn in_room(mut self, room_id: impl Into<String>) -> Self {
        self.room_id = room_id.into();
        self
    }

    /// Make this a state event under `state_key`.
    pub fn with_state_key(mut self, state_key: impl Into<String>) -> Self {
        self.state_key = Some(state_key.into());
        self
    }

    /// Set the event this redaction targets.
    pub fn with_redacts(mut self, target: impl Into<String>) -> Self {
        self.redacts = Some(target.into());
        self
    }

    /// Set the content of the state this event replaced.
    pub fn with_prev_content(mut self, prev_content: Value) -> Self {
        self.prev_content = Some(prev_content);
        self
    }

    /// Override the origin timestamp (milliseconds).
    pub fn with_ts(mut self, origin_server_ts: u64) -> Self {
        self.origin_server_ts = origin_server_ts;
        self
    }

    /// Generate a process-unique id for an event the server sent without one.
    ///
    /// # Examples
    ///
    /// ```
    /// use roomfold::Event;
    ///
    /// let a = Event::local_id();
    /// let b = Event::local_id();
    /// assert!(a.starts_with("invite-"));
    /// assert_ne!(a, b);
    /// ```
    pub fn local_id() -> String {
        format!("{LOCAL_ID_PREFIX}{}", uuid::Uuid::new_v4())
    }

    /// Whether this is a state event, i.e. it carries a state key.
    pub fn is_state(&self) -> bool {
        self.state_key.is_some()
    }

    /// Whether this event redacts another one.
    pub fn is_redaction(&self) -> bool {
        self.event_type == REDACTION_TYPE
    }

    /// Whether this event has been stripped by a redaction.
    pub fn is_redacted(&self) -> bool {
        self.unsigned
            .as_ref()
            .is_some_and(|u| u.get("redacted_because").is_some())
    }

    /// Content of the state this event replaced, from the top-level field
    /// or, failing that, from `unsigned.prev_content`.
    ///
    /// ```
    /// use roomfold::Event;
    /// use serde_json::json;
    ///
    /// let rename: Event = serde_json::from_value(json!({
    ///     "type": "m.room.name",
    ///     "sender": "@alice:example.org",
    ///     "state_key": "",
    ///     "content": {"name": "New"},
    ///     "unsigned": {"prev_content": {"name": "Old"}}
    /// }))
    /// .unwrap();
    /// assert_eq!(rename.prev_content(), Some(&json!({"name": "Old"})));
    /// ```
    pub fn prev_content(&self) -> Option<&Value> {
        self.prev_content.as_ref().or_else(|| {
            self.unsigned
                .as_ref()
                .and_then(|unsigned| unsigned.get("prev_content"))
        })
    }

    /// Return the `(type, state_key)` pair this event establishes, if it is a
    /// state event.
    pub fn state_pair(&self) -> Option<(&str, &str)> {
        self.state_key
            .as_deref()
            .map(|key| (self.event_type.as_str(), key))
    }

    /// Produce the redacted form of this event.
    ///
    /// Content is stripped down to the keys the protocol preserves for the
    /// event's type, `prev_content` is dropped and the redaction itself is
    /// recorded under `unsigned.redacted_because`.
    ///
    /// # Examples
    ///
    /// ```
    /// use roomfold::Event;
    /// use serde_json::json;
    ///
    /// let msg = Event::new("m.room.message", "@bob:example.org", json!({"body": "oops"}))
    ///     .with_id("$msg");
    /// let redaction = Event::new("m.room.redaction", "@bob:example.org", json!({"reason": "typo"}))
    ///     .with_id("$red")
    ///     .with_redacts("$msg");
    ///
    /// let redacted = msg.redacted(&redaction);
    /// assert_eq!(redacted.content, json!({}));
    /// assert!(redacted.is_redacted());
    /// ```
    pub fn redacted(&self, redaction: &Event) -> Event {
        let kept = preserved_keys(&self.event_type);
        let mut content = Map::new();
        if let Some(object) = self.content.as_object() {
            for (key, value) in object {
                if kept.contains(&key.as_str()) {
                    content.insert(key.clone(), value.clone());
                }
            }
        }

        let because = serde_json::to_value(redaction).unwrap_or_else(|_| {
            json!({
                "event_id": redaction.event_id,
                "content": redaction.content,
            })
        });
        let mut unsigned = match &self.unsigned {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        };
        unsigned.remove("prev_content");
        unsigned.insert("redacted_because".to_string(), because);

        Event {
            content: Value::Object(content),
            prev_content: None,
            unsigned: Some(Value::Object(unsigned)),
            ..self.clone()
        }
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.event_id == other.event_id
    }
}

impl Eq for Event {}

impl Hash for Event {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.event_id.hash(state);
    }
}

/// Content keys that survive redaction, per event type.
fn preserved_keys(event_type: &str) -> &'static [&'static str] {
    match event_type {
        MEMBER_TYPE => &["membership"],
        "m.room.create" => &["creator"],
        "m.room.join_rules" => &["join_rule"],
        "m.room.power_levels" => &[
            "ban",
            "events",
            "events_default",
            "kick",
            "redact",
            "state_default",
            "users",
            "users_default",
        ],
        "m.room.aliases" => &["aliases"],
        "m.room.history_visibility" => &["history_visibility"],
        _ => &[],
    }
}

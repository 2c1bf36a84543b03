pub mod room;

use crate::error::PollError;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

pub use room::{Membership, PowerLevels, Room, RoomCache, RoomState};

// Relation type linking responses and end events to their poll
pub const REL_REFERENCE: &str = "m.reference";
pub const REL_REPLACE: &str = "m.replace";

// Clients only show this many answers of a poll
pub const MAX_POLL_ANSWERS: usize = 20;

// An identifier published under a stable name and a legacy (unstable) one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamespacedName {
    pub name: &'static str,
    pub alt_name: &'static str,
}

impl NamespacedName {
    pub const fn new(name: &'static str, alt_name: &'static str) -> Self {
        Self { name, alt_name }
    }

    pub fn matches(&self, value: &str) -> bool {
        value == self.name || value == self.alt_name
    }

    pub fn names(&self) -> [&'static str; 2] {
        [self.name, self.alt_name]
    }

    /// Looks the value up in a JSON object under either name, stable first.
    pub fn find_in<'a>(&self, content: &'a Value) -> Option<&'a Value> {
        content.get(self.name).or_else(|| content.get(self.alt_name))
    }
}

pub const M_POLL_START: NamespacedName =
    NamespacedName::new("m.poll.start", "org.matrix.msc3381.poll.start");
pub const M_POLL_RESPONSE: NamespacedName =
    NamespacedName::new("m.poll.response", "org.matrix.msc3381.poll.response");
pub const M_POLL_END: NamespacedName =
    NamespacedName::new("m.poll.end", "org.matrix.msc3381.poll.end");
pub const M_POLL_KIND_DISCLOSED: NamespacedName =
    NamespacedName::new("m.poll.disclosed", "org.matrix.msc3381.poll.disclosed");
pub const M_POLL_KIND_UNDISCLOSED: NamespacedName =
    NamespacedName::new("m.poll.undisclosed", "org.matrix.msc3381.poll.undisclosed");
pub const M_TEXT: NamespacedName = NamespacedName::new("m.text", "org.matrix.msc1767.text");

// A room event in client format, as handed over by the sync layer or read
// back from the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    pub sender: String,
    #[serde(default)]
    pub origin_server_ts: i64,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_key: Option<String>,
    #[serde(default)]
    pub content: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub unsigned: Value,
}

impl RoomEvent {
    pub fn id(&self) -> Option<&str> {
        self.event_id.as_deref()
    }

    pub fn is_redacted(&self) -> bool {
        self.unsigned.get("redacted_because").is_some()
    }

    // `(rel_type, event_id)` of the `m.relates_to` block, if any
    pub fn relates_to(&self) -> Option<(&str, &str)> {
        let relation = self.content.get("m.relates_to")?;
        let rel_type = relation.get("rel_type")?.as_str()?;
        let event_id = relation.get("event_id")?.as_str()?;
        Some((rel_type, event_id))
    }

    // Edits replace an earlier event
    pub fn is_edit(&self) -> bool {
        matches!(self.relates_to(), Some((REL_REPLACE, _)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PollKind {
    Disclosed,
    Undisclosed,
}

impl PollKind {
    // Unknown kinds fall back to undisclosed
    pub fn parse(kind: Option<&str>) -> Self {
        match kind {
            Some(k) if M_POLL_KIND_DISCLOSED.matches(k) => PollKind::Disclosed,
            Some(k) if M_POLL_KIND_UNDISCLOSED.matches(k) => PollKind::Undisclosed,
            _ => PollKind::Undisclosed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollAnswer {
    pub id: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollStart {
    pub id: String,
    pub question: String,
    pub answers: Vec<PollAnswer>,
    pub kind: PollKind,
    pub max_selections: usize,
}

impl PollStart {
    pub fn from_event(event: &RoomEvent) -> Result<Self, PollError> {
        if !M_POLL_START.matches(&event.event_type) {
            return Err(PollError::NotPollStart(event.event_type.clone()));
        }
        let id = event
            .event_id
            .clone()
            .ok_or_else(|| PollError::InvalidPollStart("missing event id".to_string()))?;
        let poll = M_POLL_START
            .find_in(&event.content)
            .filter(|p| p.is_object())
            .ok_or_else(|| PollError::InvalidPollStart("missing poll content".to_string()))?;

        let question = poll
            .get("question")
            .and_then(text_of)
            .ok_or_else(|| PollError::InvalidPollStart("question lacks text".to_string()))?;

        let raw_answers = poll
            .get("answers")
            .and_then(Value::as_array)
            .ok_or_else(|| PollError::InvalidPollStart("answers must be an array".to_string()))?;

        let mut answers = Vec::with_capacity(raw_answers.len().min(MAX_POLL_ANSWERS));
        for raw in raw_answers.iter().take(MAX_POLL_ANSWERS) {
            let id = raw
                .get("id")
                .and_then(Value::as_str)
                .ok_or_else(|| PollError::InvalidPollStart("answer lacks an id".to_string()))?;
            let text = text_of(raw)
                .ok_or_else(|| PollError::InvalidPollStart(format!("answer {} lacks text", id)))?;
            answers.push(PollAnswer {
                id: id.to_string(),
                text,
            });
        }

        let max_selections = poll
            .get("max_selections")
            .and_then(Value::as_u64)
            .map(|n| n.max(1) as usize)
            .unwrap_or(1);

        Ok(Self {
            id,
            question,
            answers,
            kind: PollKind::parse(poll.get("kind").and_then(Value::as_str)),
            max_selections,
        })
    }

    pub fn is_disclosed(&self) -> bool {
        self.kind == PollKind::Disclosed
    }

    pub fn has_answer(&self, answer_id: &str) -> bool {
        self.answers.iter().any(|a| a.id == answer_id)
    }
}

// Text of an extensible-event block: a plain string, or an array of
// `{body, mimetype}` representations where `text/plain` is preferred
fn text_of(block: &Value) -> Option<String> {
    match M_TEXT.find_in(block)? {
        Value::String(s) => Some(s.clone()),
        Value::Array(reps) => reps
            .iter()
            .find(|r| {
                r.get("mimetype")
                    .and_then(Value::as_str)
                    .is_none_or(|m| m == "text/plain")
            })
            .or_else(|| reps.first())
            .and_then(|r| r.get("body"))
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}

// A parsed poll response event. Malformed answer blocks parse to an empty
// list, which never survives validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollResponse {
    pub poll_id: Option<String>,
    pub answer_ids: Vec<String>,
}

impl PollResponse {
    pub fn from_event(event: &RoomEvent) -> Result<Self, PollError> {
        if !M_POLL_RESPONSE.matches(&event.event_type) {
            return Err(PollError::InvalidResponse {
                event_id: event.event_id.clone(),
                event_type: event.event_type.clone(),
            });
        }

        let answer_ids = M_POLL_RESPONSE
            .find_in(&event.content)
            .and_then(|r| r.get("answers"))
            .and_then(Value::as_array)
            .and_then(|answers| {
                answers
                    .iter()
                    .map(|a| a.as_str().map(str::to_string))
                    .collect::<Option<Vec<_>>>()
            })
            .unwrap_or_default();

        Ok(Self {
            poll_id: event
                .relates_to()
                .filter(|(rel_type, _)| *rel_type == REL_REFERENCE)
                .map(|(_, id)| id.to_string()),
            answer_ids,
        })
    }

    /// `(event type, content)` of a response choosing `answer_ids`.
    pub fn content(answer_ids: &[String], poll_id: &str) -> (&'static str, Value) {
        (
            M_POLL_RESPONSE.name,
            json!({
                "m.relates_to": { "rel_type": REL_REFERENCE, "event_id": poll_id },
                M_POLL_RESPONSE.name: { "answers": answer_ids },
            }),
        )
    }
}

use super::{M_POLL_START, RoomEvent};
use crate::voting::{RedactionPolicy, RelationSource, RoomDirectory};
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

pub const EVENT_MEMBER: &str = "m.room.member";
pub const EVENT_POWER_LEVELS: &str = "m.room.power_levels";
pub const EVENT_REDACTION: &str = "m.room.redaction";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Membership {
    Join,
    Invite,
    Knock,
    Leave,
    Ban,
}

fn default_fifty() -> i64 {
    50
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerLevels {
    #[serde(default)]
    pub users: HashMap<String, i64>,
    #[serde(default)]
    pub users_default: i64,
    #[serde(default)]
    pub events: HashMap<String, i64>,
    #[serde(default)]
    pub events_default: i64,
    #[serde(default = "default_fifty")]
    pub state_default: i64,
    #[serde(default = "default_fifty")]
    pub redact: i64,
}

impl Default for PowerLevels {
    fn default() -> Self {
        Self {
            users: HashMap::new(),
            users_default: 0,
            events: HashMap::new(),
            events_default: 0,
            state_default: 50,
            redact: 50,
        }
    }
}

impl PowerLevels {
    pub fn user_level(&self, user_id: &str) -> i64 {
        self.users.get(user_id).copied().unwrap_or(self.users_default)
    }

    // Level required to send a message event of `event_type`
    pub fn event_level(&self, event_type: &str) -> i64 {
        self.events
            .get(event_type)
            .copied()
            .unwrap_or(self.events_default)
    }
}

// Current membership and power levels of a room
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoomState {
    pub members: HashMap<String, Membership>,
    pub power_levels: PowerLevels,
}

impl RoomState {
    // Applies a state event. Later events replace earlier ones
    pub fn apply(&mut self, event: &RoomEvent) {
        let Some(state_key) = event.state_key.as_deref() else {
            return;
        };
        match event.event_type.as_str() {
            EVENT_MEMBER => {
                match serde_json::from_value::<Membership>(
                    event.content.get("membership").cloned().unwrap_or(Value::Null),
                ) {
                    Ok(membership) => {
                        self.members.insert(state_key.to_string(), membership);
                    }
                    Err(e) => warn!("Ignoring member event for {} with bad membership: {}", state_key, e),
                }
            }
            EVENT_POWER_LEVELS => match serde_json::from_value::<PowerLevels>(event.content.clone()) {
                Ok(levels) => self.power_levels = levels,
                Err(e) => warn!("Ignoring malformed power levels event: {}", e),
            },
            _ => {}
        }
    }

    pub fn membership(&self, user_id: &str) -> Option<Membership> {
        self.members.get(user_id).copied()
    }
}

impl RedactionPolicy for RoomState {
    fn may_send_redaction_for_event(&self, event: &RoomEvent, user_id: &str) -> bool {
        if self.membership(user_id) != Some(Membership::Join) {
            return false;
        }
        if event.is_redacted() {
            return false;
        }

        let level = self.power_levels.user_level(user_id);
        if event.sender == user_id {
            return level >= self.power_levels.event_level(EVENT_REDACTION);
        }
        level >= self.power_levels.redact
    }
}

// A room timeline in arrival order together with its current state
#[derive(Debug, Clone)]
pub struct Room {
    pub room_id: String,
    events: Vec<RoomEvent>,
    index: HashMap<String, usize>,
    // Redactions seen before their target: target id -> redaction id
    pending_redactions: HashMap<String, String>,
    state: RoomState,
}

impl Room {
    pub fn new(room_id: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            events: Vec::new(),
            index: HashMap::new(),
            pending_redactions: HashMap::new(),
            state: RoomState::default(),
        }
    }

    /// Appends an event. Returns false if an event with the same id was
    /// already present; events are never replaced.
    pub fn add_event(&mut self, event: RoomEvent) -> bool {
        let pos = self.events.len();
        if let Some(id) = event.id() {
            if self.index.contains_key(id) {
                return false;
            }
            self.index.insert(id.to_string(), pos);
        }

        self.state.apply(&event);
        let redaction = if event.event_type == EVENT_REDACTION {
            event
                .content
                .get("redacts")
                .and_then(Value::as_str)
                .map(|target| (target.to_string(), event.event_id.clone().unwrap_or_default()))
        } else {
            None
        };
        // The target may have been redacted before it arrived
        let early_redaction = event.id().and_then(|id| self.pending_redactions.remove(id));
        self.events.push(event);

        if let Some(because) = early_redaction {
            self.mark_redacted(pos, because);
        }
        if let Some((target, because)) = redaction {
            match self.index.get(&target) {
                Some(&target_pos) => self.mark_redacted(target_pos, because),
                None => {
                    self.pending_redactions.insert(target, because);
                }
            }
        }
        true
    }

    fn mark_redacted(&mut self, pos: usize, because: String) {
        let target = &mut self.events[pos];
        if !target.unsigned.is_object() {
            target.unsigned = Value::Object(Default::default());
        }
        if let Some(unsigned) = target.unsigned.as_object_mut() {
            unsigned.insert("redacted_because".to_string(), Value::String(because));
        }
    }

    pub fn event(&self, event_id: &str) -> Option<&RoomEvent> {
        self.index.get(event_id).map(|&pos| &self.events[pos])
    }

    pub fn state(&self) -> &RoomState {
        &self.state
    }

    // Poll start events, excluding edits of earlier polls
    pub fn poll_starts(&self) -> impl Iterator<Item = &RoomEvent> {
        self.events
            .iter()
            .filter(|e| M_POLL_START.matches(&e.event_type) && !e.is_edit())
    }
}

impl RelationSource for Room {
    fn relations(&self, event_id: &str, rel_type: &str, event_type: &str) -> Option<Vec<RoomEvent>> {
        let related: Vec<RoomEvent> = self
            .events
            .iter()
            .filter(|e| {
                e.event_type == event_type && e.relates_to() == Some((rel_type, event_id)) && !e.is_redacted()
            })
            .cloned()
            .collect();
        if related.is_empty() { None } else { Some(related) }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RoomCache {
    rooms: HashMap<String, Room>,
}

impl RoomCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes an event to its room. Events without a room id are dropped.
    pub fn add_event(&mut self, event: RoomEvent) -> bool {
        let Some(room_id) = event.room_id.clone() else {
            warn!("Dropping event {:?} without a room id", event.event_id);
            return false;
        };
        self.rooms
            .entry(room_id.clone())
            .or_insert_with(|| Room::new(room_id))
            .add_event(event)
    }

    pub fn room(&self, room_id: &str) -> Option<&Room> {
        self.rooms.get(room_id)
    }

    pub fn rooms(&self) -> impl Iterator<Item = &Room> {
        self.rooms.values()
    }
}

impl RoomDirectory for RoomCache {
    type State = RoomState;

    fn current_state(&self, room_id: &str) -> Option<&RoomState> {
        self.rooms.get(room_id).map(Room::state)
    }
}

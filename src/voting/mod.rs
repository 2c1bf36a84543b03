pub mod ending;
pub mod summary;
pub mod tally;
pub mod view;

use crate::models::{M_POLL_END, M_POLL_RESPONSE, NamespacedName, REL_REFERENCE, RoomEvent};
use std::collections::HashMap;

pub use ending::{ensure_poll_editable, is_poll_ended, poll_already_has_votes};
pub use summary::{find_top_answer, format_comma_separated_list};
pub use tally::{all_votes, collect_user_votes, count_votes, total_votes};
pub use view::{OptionView, PollView, render_poll};

/// Answer id -> number of valid votes. Only answers with at least one vote
/// are present.
pub type Tally = HashMap<String, u32>;

// The vote a single user is counted for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserVote {
    pub ts: i64,
    pub sender: String,
    pub answers: Vec<String>,
}

impl UserVote {
    pub fn new(ts: i64, sender: impl Into<String>, answers: Vec<String>) -> Self {
        Self {
            ts,
            sender: sender.into(),
            answers,
        }
    }
}

/// Looks up events related to another event.
pub trait RelationSource {
    /// Events of `event_type` related to `event_id` by `rel_type`, or `None`
    /// when there are none.
    fn relations(&self, event_id: &str, rel_type: &str, event_type: &str) -> Option<Vec<RoomEvent>>;
}

/// Decides whether a user may redact an event under current room state.
pub trait RedactionPolicy {
    fn may_send_redaction_for_event(&self, event: &RoomEvent, user_id: &str) -> bool;
}

pub trait RoomDirectory {
    type State: RedactionPolicy;

    fn current_state(&self, room_id: &str) -> Option<&Self::State>;
}

fn related_union<R: RelationSource + ?Sized>(
    source: &R,
    event_id: &str,
    kind: NamespacedName,
) -> Option<Vec<RoomEvent>> {
    let mut found: Option<Vec<RoomEvent>> = None;
    for event_type in kind.names() {
        if let Some(mut events) = source.relations(event_id, REL_REFERENCE, event_type) {
            found.get_or_insert_with(Vec::new).append(&mut events);
        }
    }
    found
}

/// Response events for a poll under both the stable and legacy type.
pub fn create_vote_relations<R: RelationSource + ?Sized>(source: &R, event_id: &str) -> Option<Vec<RoomEvent>> {
    related_union(source, event_id, M_POLL_RESPONSE)
}

/// End events for a poll under both the stable and legacy type.
pub fn create_end_relations<R: RelationSource + ?Sized>(source: &R, event_id: &str) -> Option<Vec<RoomEvent>> {
    related_union(source, event_id, M_POLL_END)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Room;
    use crate::models::test_utils::*;
    use serde_json::json;

    #[test]
    fn vote_relations_union_both_types() {
        let mut room = Room::new("!room:example.org");
        room.add_event(response_event("$r1", "@bob:example.org", 1, &["a"]));
        room.add_event(event(
            "$r2",
            "@carol:example.org",
            "org.matrix.msc3381.poll.response",
            2,
            json!({
                "m.relates_to": { "rel_type": "m.reference", "event_id": "$poll" },
                "org.matrix.msc3381.poll.response": { "answers": ["b"] }
            }),
        ));

        let ids: Vec<_> = create_vote_relations(&room, "$poll")
            .unwrap()
            .into_iter()
            .filter_map(|e| e.event_id)
            .collect();
        assert_eq!(ids, vec!["$r1".to_string(), "$r2".to_string()]);
        assert!(create_end_relations(&room, "$poll").is_none());
    }
}

use super::{RedactionPolicy, RelationSource, RoomDirectory, create_end_relations, create_vote_relations};
use crate::error::PollError;
use crate::models::RoomEvent;
use log::warn;

/// Whether an end event from someone allowed to redact the poll exists.
///
/// Anything that prevents the check (no relation source, missing event or
/// room id, unknown room) counts as "not ended". Authorization uses the
/// room's current state, not the state at the time the end event was sent.
pub fn is_poll_ended<D, R>(poll_event: &RoomEvent, rooms: &D, relations: Option<&R>) -> bool
where
    D: RoomDirectory + ?Sized,
    R: RelationSource + ?Sized,
{
    let Some(relations) = relations else {
        return false;
    };

    let Some(poll_event_id) = poll_event.id() else {
        warn!(
            "is_poll_ended: Poll event must have event ID in order to determine whether it has ended \
             - assuming poll has not ended"
        );
        return false;
    };

    let Some(room_id) = poll_event.room_id.as_deref() else {
        warn!(
            "is_poll_ended: Poll event must have room ID in order to determine whether it has ended \
             - assuming poll has not ended"
        );
        return false;
    };

    let Some(state) = rooms.current_state(room_id) else {
        return false;
    };

    create_end_relations(relations, poll_event_id)
        .unwrap_or_default()
        .iter()
        .any(|end| state.may_send_redaction_for_event(poll_event, &end.sender))
}

pub fn poll_already_has_votes<R: RelationSource + ?Sized>(poll_event: &RoomEvent, relations: Option<&R>) -> bool {
    let (Some(relations), Some(event_id)) = (relations, poll_event.id()) else {
        return false;
    };
    create_vote_relations(relations, event_id).is_some_and(|votes| !votes.is_empty())
}

/// Polls may only be edited before anyone has voted.
pub fn ensure_poll_editable<R: RelationSource + ?Sized>(
    poll_event: &RoomEvent,
    relations: Option<&R>,
) -> Result<(), PollError> {
    if poll_already_has_votes(poll_event, relations) {
        return Err(PollError::PollHasVotes);
    }
    Ok(())
}

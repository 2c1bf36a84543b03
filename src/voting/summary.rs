use super::tally::{all_votes, collect_user_votes, count_votes};
use crate::error::PollError;
use crate::models::{PollStart, RoomEvent};
use log::warn;

// At most this many answers are named in a summary
pub const TOP_ANSWER_LIMIT: usize = 3;

/// Joins `items` as natural language, naming at most `limit` of them.
pub fn format_comma_separated_list(items: &[String], limit: usize) -> String {
    let remaining = items.len().saturating_sub(limit);
    match items {
        [] => String::new(),
        [only] => only.clone(),
        _ if remaining > 0 => {
            let named = items[..limit].join(", ");
            if remaining == 1 {
                format!("{} and one other", named)
            } else {
                format!("{} and {} others", named, remaining)
            }
        }
        [init @ .., last] => format!("{} and {}", init.join(", "), last),
    }
}

/// Display text of the answer(s) with the most votes, or an empty string when
/// there is no best answer.
pub fn find_top_answer(poll_event: &RoomEvent, vote_relations: Option<&[RoomEvent]>) -> Result<String, PollError> {
    if poll_event.id().is_none() {
        warn!(
            "find_top_answer: Poll event needs an event ID to fetch relations in order to determine \
             the top answer - assuming no best answer"
        );
        return Ok(String::new());
    }

    let poll = match PollStart::from_event(poll_event) {
        Ok(poll) => poll,
        Err(e) => {
            warn!("Failed to parse poll to determine top answer - assuming no best answer: {}", e);
            return Ok(String::new());
        }
    };

    let user_votes = collect_user_votes(all_votes(vote_relations)?, None, None);
    let votes = count_votes(&user_votes, &poll);

    let Some(highest) = votes.values().copied().max() else {
        return Ok(String::new());
    };

    let best: Vec<String> = poll
        .answers
        .iter()
        .filter(|answer| votes.get(&answer.id) == Some(&highest))
        .map(|answer| answer.text.clone())
        .collect();

    Ok(format_comma_separated_list(&best, TOP_ANSWER_LIMIT))
}

use super::{Tally, UserVote};
use crate::error::PollError;
use crate::models::{PollResponse, PollStart, RoomEvent};
use std::collections::{HashMap, HashSet};

/// One `UserVote` per response event, in input order. Fails if any event is
/// not a poll response.
pub fn all_votes(vote_relations: Option<&[RoomEvent]>) -> Result<Vec<UserVote>, PollError> {
    let Some(events) = vote_relations else {
        return Ok(Vec::new());
    };
    events
        .iter()
        .map(|event| -> Result<UserVote, PollError> {
            let response = PollResponse::from_event(event)?;
            Ok(UserVote::new(event.origin_server_ts, event.sender.clone(), response.answer_ids))
        })
        .collect()
}

/// The counted vote of each user. A later vote replaces an earlier one; on
/// equal timestamps the first one seen is kept. A local `selected` answer
/// overrides `user_id`'s vote with timestamp 0.
pub fn collect_user_votes(
    user_responses: Vec<UserVote>,
    user_id: Option<&str>,
    selected: Option<&str>,
) -> HashMap<String, UserVote> {
    let mut user_votes: HashMap<String, UserVote> = HashMap::new();

    // Keep the latest vote per user
    for response in user_responses {
        let replace = user_votes
            .get(&response.sender)
            .is_none_or(|other| other.ts < response.ts);
        if replace {
            user_votes.insert(response.sender.clone(), response);
        }
    }

    // A pending local choice wins over anything from the server
    if let (Some(user_id), Some(selected)) = (user_id, selected) {
        user_votes.insert(
            user_id.to_string(),
            UserVote::new(0, user_id, vec![selected.to_string()]),
        );
    }

    user_votes
}

/// Whether `answers` is an acceptable ballot for `poll`.
pub fn is_valid_selection(answers: &[String], poll: &PollStart) -> bool {
    if answers.is_empty() || answers.len() > poll.max_selections {
        return false;
    }
    let mut seen = HashSet::new();
    answers.iter().all(|a| poll.has_answer(a) && seen.insert(a.as_str()))
}

/// Counts valid votes per answer. Spoiled ballots are skipped.
pub fn count_votes(user_votes: &HashMap<String, UserVote>, poll: &PollStart) -> Tally {
    let mut collected = Tally::new();

    for vote in user_votes.values() {
        // Spoiled ballot
        if !is_valid_selection(&vote.answers, poll) {
            continue;
        }
        for answer_id in &vote.answers {
            *collected.entry(answer_id.clone()).or_insert(0) += 1;
        }
    }

    collected
}

pub fn total_votes(collected: &Tally) -> u32 {
    collected.values().sum()
}

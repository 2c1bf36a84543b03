use super::{Notifier, VoteSender};
use crate::error::PollError;
use crate::models::{M_POLL_START, PollResponse, PollStart, REL_REPLACE, Room, RoomCache, RoomEvent};
use crate::voting::{self, PollView, RelationSource, UserVote};
use log::{error, info};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::task::JoinHandle;

// Local echo of the user's own vote: the answer picked locally and the
// response events already observed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalEcho {
    seen_event_ids: HashSet<String>,
    selected: Option<String>,
}

impl LocalEcho {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    fn select(&mut self, answer_id: &str) {
        self.selected = Some(answer_id.to_string());
    }

    /// Forgets the local selection if `events` holds a response from
    /// `user_id` that has not been seen before (e.g. a vote from another
    /// device, or the server echo of our own). Every new event id is recorded.
    /// Returns whether the selection was cleared.
    pub fn unselect_if_new_event_from_me(&mut self, events: &[RoomEvent], user_id: &str) -> bool {
        let mut from_me = false;
        // Record every new id, noting whether any of them is ours
        for event in events {
            let Some(id) = event.id() else {
                continue;
            };
            if self.seen_event_ids.insert(id.to_string()) && event.sender == user_id {
                from_me = true;
            }
        }

        if from_me && self.selected.is_some() {
            self.selected = None;
            return true;
        }
        false
    }
}

// Everything needed to display one poll for the local user
#[derive(Debug, Clone)]
pub struct PollBody {
    poll_event: RoomEvent,
    user_id: String,
    poll: Option<PollStart>,
    ended: bool,
    edited: bool,
    vote_relations: Option<Vec<RoomEvent>>,
    echo: LocalEcho,
}

impl PollBody {
    pub fn new(poll_event: RoomEvent, user_id: impl Into<String>) -> Self {
        Self {
            poll_event,
            user_id: user_id.into(),
            poll: None,
            ended: false,
            edited: false,
            vote_relations: None,
            echo: LocalEcho::new(),
        }
    }

    /// Builds a ready body for `poll_event` from what `room` already holds.
    pub fn load(room: &Room, rooms: &RoomCache, poll_event: &RoomEvent, user_id: &str) -> Result<Self, PollError> {
        let poll = PollStart::from_event(poll_event)?;
        let mut body = Self::new(poll_event.clone(), user_id);

        // Edits may arrive under either namespace
        let edited = M_POLL_START
            .names()
            .iter()
            .any(|event_type| room.relations(&poll.id, REL_REPLACE, event_type).is_some());
        body.set_edited(edited);

        let responses = voting::create_vote_relations(room, &poll.id);
        let ended = voting::is_poll_ended(poll_event, rooms, Some(room));
        body.set_poll_instance(poll, ended, responses);
        Ok(body)
    }

    pub fn poll_id(&self) -> Option<&str> {
        self.poll_event.id()
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    pub fn selected(&self) -> Option<&str> {
        self.echo.selected()
    }

    pub fn set_edited(&mut self, edited: bool) {
        self.edited = edited;
    }

    // Polls for other events are ignored; the initial responses count as seen
    pub fn set_poll_instance(&mut self, poll: PollStart, ended: bool, responses: Option<Vec<RoomEvent>>) -> bool {
        if self.poll_id() != Some(poll.id.as_str()) {
            return false;
        }
        self.poll = Some(poll);
        self.ended = ended;
        self.on_responses_change(responses);
        true
    }

    pub fn on_responses_change(&mut self, responses: Option<Vec<RoomEvent>>) {
        self.vote_relations = responses;
        self.on_relations_change();
    }

    pub fn on_poll_end(&mut self) {
        self.ended = true;
        self.on_relations_change();
    }

    fn on_relations_change(&mut self) {
        // A new vote of ours from the server replaces the local selection
        let events = self.vote_relations.as_deref().unwrap_or_default();
        if self.echo.unselect_if_new_event_from_me(events, &self.user_id) {
            info!(
                "Dropping local selection for poll {:?}: a newer vote from {} arrived",
                self.poll_id(),
                self.user_id
            );
        }
    }

    pub fn collect_user_votes(&self) -> Result<HashMap<String, UserVote>, PollError> {
        Ok(voting::collect_user_votes(
            voting::all_votes(self.vote_relations.as_deref())?,
            Some(&self.user_id),
            self.echo.selected(),
        ))
    }

    pub fn my_vote(&self) -> Result<Option<String>, PollError> {
        Ok(self
            .collect_user_votes()?
            .remove(&self.user_id)
            .and_then(|v| v.answers.into_iter().next()))
    }

    /// Votes for `answer_id`. Returns the send task, or `None` if nothing
    /// needed sending.
    pub fn select_option(
        &mut self,
        answer_id: &str,
        sender: Arc<dyn VoteSender>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Option<JoinHandle<()>>, PollError> {
        // Nothing to send once ended, or if the vote would not change
        if self.ended {
            return Ok(None);
        }
        if self.my_vote()?.as_deref() == Some(answer_id) {
            return Ok(None);
        }
        let (Some(poll_id), Some(room_id)) = (self.poll_id(), self.poll_event.room_id.as_deref()) else {
            error!("Cannot vote in a poll without event and room ids");
            return Ok(None);
        };

        let (event_type, content) = PollResponse::content(&[answer_id.to_string()], poll_id);
        let room_id = room_id.to_string();

        // Send in the background; the selection shows straight away
        let task = tokio::spawn(async move {
            if let Err(e) = sender.send_event(&room_id, event_type, content).await {
                error!("Failed to submit poll response event: {}", e);
                notifier.error_dialog(
                    "Vote not registered",
                    "Sorry, your vote was not registered. Please try again.",
                );
            }
        });

        // Kept even if the send fails
        self.echo.select(answer_id);
        Ok(Some(task))
    }

    // None until the poll instance is set
    pub fn view(&self) -> Result<Option<PollView>, PollError> {
        let Some(poll) = &self.poll else {
            return Ok(None);
        };
        let user_votes = self.collect_user_votes()?;
        let votes = voting::count_votes(&user_votes, poll);
        Ok(Some(voting::render_poll(
            poll,
            self.ended,
            &user_votes,
            &votes,
            &self.user_id,
            self.edited,
        )))
    }
}

use crate::db::Database;
use crate::error::StoreError;
use crate::handlers::{Notifier, PollBody, PollHandle, PollHub, PollUpdate, VoteSender, spawn_poll_body};
use crate::models::RoomCache;
use crate::voting::{PollView, create_vote_relations, find_top_answer, is_poll_ended};
use chrono::Utc;
use log::{error, info, warn};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::time::interval;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndedPoll {
    pub poll_id: String,
    pub room_id: String,
    pub top_answer: String,
}

// Keeps one running poll body per poll and feeds it what the store holds
pub struct PollWatcher {
    user_id: String,
    hub: PollHub,
    handles: HashMap<String, PollHandle>,
    known_ended: HashSet<String>,
    sender: Arc<dyn VoteSender>,
    notifier: Arc<dyn Notifier>,
}

impl PollWatcher {
    pub fn new(user_id: impl Into<String>, sender: Arc<dyn VoteSender>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            user_id: user_id.into(),
            hub: PollHub::new(),
            handles: HashMap::new(),
            known_ended: HashSet::new(),
            sender,
            notifier,
        }
    }

    pub fn handle(&self, poll_id: &str) -> Option<&PollHandle> {
        self.handles.get(poll_id)
    }

    // False if the poll is not watched
    pub fn select(&self, poll_id: &str, answer_id: &str) -> bool {
        self.handles
            .get(poll_id)
            .is_some_and(|handle| handle.select(answer_id))
    }

    /// Brings every poll body up to date with `rooms`. Returns the polls seen
    /// ending for the first time.
    pub fn sync(&mut self, rooms: &RoomCache) -> Vec<EndedPoll> {
        let mut ended = Vec::new();
        for room in rooms.rooms() {
            for poll_event in room.poll_starts() {
                let Some(poll_id) = poll_event.id() else {
                    continue;
                };

                // Start a body task the first time we see the poll
                if !self.handles.contains_key(poll_id) {
                    let body = match PollBody::load(room, rooms, poll_event, &self.user_id) {
                        Ok(body) => body,
                        Err(e) => {
                            warn!("Not watching poll {}: {}", poll_id, e);
                            continue;
                        }
                    };
                    let updates = self.hub.subscribe(poll_id);
                    let handle = spawn_poll_body(body, updates, Arc::clone(&self.sender), Arc::clone(&self.notifier));
                    self.handles.insert(poll_id.to_string(), handle);
                }

                // Hand the body task the latest responses
                let votes = create_vote_relations(room, poll_id);
                self.hub.publish(poll_id, PollUpdate::Responses(votes.clone()));

                if self.known_ended.contains(poll_id) || !is_poll_ended(poll_event, rooms, Some(room)) {
                    continue;
                }
                // Newly ended, tell the body task once
                self.hub.publish(poll_id, PollUpdate::End);

                let top_answer = find_top_answer(poll_event, votes.as_deref()).unwrap_or_else(|e| {
                    error!("Failed to tally ended poll {}: {}", poll_id, e);
                    String::new()
                });

                self.known_ended.insert(poll_id.to_string());
                ended.push(EndedPoll {
                    poll_id: poll_id.to_string(),
                    room_id: room.room_id.clone(),
                    top_answer,
                });
            }
        }
        ended
    }

    // Views the body tasks published since the last call
    pub fn changed_views(&mut self) -> Vec<(String, PollView)> {
        self.handles
            .iter_mut()
            .filter_map(|(poll_id, handle)| handle.take_changed().map(|view| (poll_id.clone(), view)))
            .collect()
    }
}

pub async fn check_ended_polls(database: &Database, watcher: &mut PollWatcher) -> Result<Vec<EndedPoll>, StoreError> {
    let rooms = database.load_rooms().await?;
    Ok(watcher.sync(&rooms))
}

// Re-reads the store every interval and logs polls as they change and end
pub async fn watch_ended_polls_task(database: Arc<Database>, mut watcher: PollWatcher, interval_seconds: u64) {
    info!("Starting background task to watch for ended polls...");
    let mut interval = interval(StdDuration::from_secs(interval_seconds.max(1)));

    loop {
        interval.tick().await;

        // Views the body tasks worked out since the last tick
        for (poll_id, view) in watcher.changed_views() {
            info!("Poll {}: {}", poll_id, view.total_text());
        }

        // Reload from the store and sync every poll
        info!("Checking for ended polls at {}", Utc::now().to_rfc3339());
        match check_ended_polls(&database, &mut watcher).await {
            Ok(ended) => {
                for poll in ended {
                    if poll.top_answer.is_empty() {
                        info!("Poll {} in {} has ended without votes", poll.poll_id, poll.room_id);
                    } else {
                        info!(
                            "Poll {} in {} has ended. Top answer: {}",
                            poll.poll_id, poll.room_id, poll.top_answer
                        );
                    }
                }
            }
            Err(e) => {
                error!("Failed to load rooms while checking for ended polls: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::poll_body::tests::{ME, RecordingNotifier, RecordingSender};
    use crate::models::room::{EVENT_MEMBER, EVENT_POWER_LEVELS};
    use crate::models::test_utils::*;
    use crate::models::{PollKind, RoomEvent};
    use serde_json::{Value, json};

    fn state_event(id: &str, event_type: &str, state_key: &str, content: Value) -> RoomEvent {
        let mut ev = event(id, "@alice:example.org", event_type, 1, content);
        ev.state_key = Some(state_key.to_string());
        ev
    }

    fn watcher(sender: Arc<RecordingSender>) -> PollWatcher {
        PollWatcher::new(ME, sender, Arc::new(RecordingNotifier::default()))
    }

    async fn next_view(watcher: &mut PollWatcher) -> PollView {
        for _ in 0..50 {
            if let Some((_, view)) = watcher.changed_views().pop() {
                return view;
            }
            tokio::task::yield_now().await;
        }
        panic!("no new view was published");
    }

    #[tokio::test]
    async fn reports_each_ended_poll_once() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("events.db").display());
        let db = Database::new(&url).await.unwrap();

        db.import_events(&[
            state_event("$m1", EVENT_MEMBER, "@alice:example.org", json!({ "membership": "join" })),
            state_event("$pl", EVENT_POWER_LEVELS, "", json!({ "users": { "@alice:example.org": 100 } })),
            poll_start_event("$poll", PollKind::Undisclosed, &[("a", "A"), ("b", "B")]),
            response_event("$r1", "@bob:example.org", 2, &["b"]),
        ])
        .await
        .unwrap();

        let mut watcher = watcher(Arc::new(RecordingSender::default()));
        assert!(check_ended_polls(&db, &mut watcher).await.unwrap().is_empty());
        assert!(watcher.handle("$poll").is_some());

        db.save_event(&end_event("$end", "@alice:example.org", "org.matrix.msc3381.poll.end"))
            .await
            .unwrap();
        let ended = check_ended_polls(&db, &mut watcher).await.unwrap();
        assert_eq!(
            ended,
            vec![EndedPoll {
                poll_id: "$poll".to_string(),
                room_id: "!room:example.org".to_string(),
                top_answer: "B".to_string(),
            }]
        );

        // The body task hears about the end too
        let mut view = next_view(&mut watcher).await;
        while !view.is_ended() {
            view = next_view(&mut watcher).await;
        }
        assert_eq!(view.total_text(), "Final result based on 1 vote");

        assert!(check_ended_polls(&db, &mut watcher).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn votes_go_through_the_poll_body_task() {
        let sender = Arc::new(RecordingSender::default());
        let mut watcher = watcher(Arc::clone(&sender));
        let mut rooms = RoomCache::new();
        rooms.add_event(poll_start_event("$poll", PollKind::Disclosed, &[("a", "A"), ("b", "B")]));

        assert!(watcher.sync(&rooms).is_empty());
        assert!(!watcher.select("$elsewhere", "a"));
        assert!(watcher.select("$poll", "a"));

        let mut view = next_view(&mut watcher).await;
        while view.total_text() != "Based on 1 vote" {
            view = next_view(&mut watcher).await;
        }
        assert!(view.options()[0].checked);

        // Let the background send finish
        for _ in 0..10 {
            if !sender.sent.lock().unwrap().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        let sent = sender.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, "m.poll.response");
    }
}

use super::{Notifier, PollBody, VoteSender};
use crate::models::RoomEvent;
use crate::voting::PollView;
use log::{error, warn};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

const UPDATE_BUFFER: usize = 64;

#[derive(Debug, Clone)]
pub enum PollUpdate {
    // The full current set of response events
    Responses(Option<Vec<RoomEvent>>),
    End,
}

// Fans poll updates out to whoever displays the poll
#[derive(Debug, Default)]
pub struct PollHub {
    channels: HashMap<String, broadcast::Sender<PollUpdate>>,
}

impl PollHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, poll_id: &str) -> broadcast::Receiver<PollUpdate> {
        self.channels
            .entry(poll_id.to_string())
            .or_insert_with(|| broadcast::channel(UPDATE_BUFFER).0)
            .subscribe()
    }

    /// Returns how many subscribers received the update.
    pub fn publish(&mut self, poll_id: &str, update: PollUpdate) -> usize {
        let Some(sender) = self.channels.get(poll_id) else {
            return 0;
        };
        match sender.send(update) {
            Ok(receivers) => receivers,
            Err(_) => {
                // Nobody listens any more
                self.channels.remove(poll_id);
                0
            }
        }
    }
}

/// Owner-side handle of a running poll body. Dropping it stops the task and
/// releases its subscription.
pub struct PollHandle {
    task: JoinHandle<()>,
    selections: mpsc::UnboundedSender<String>,
    views: watch::Receiver<Option<PollView>>,
}

impl PollHandle {
    pub fn view(&self) -> Option<PollView> {
        self.views.borrow().clone()
    }

    /// The view published since the last call, if any.
    pub fn take_changed(&mut self) -> Option<PollView> {
        if !self.views.has_changed().unwrap_or(false) {
            return None;
        }
        self.views.borrow_and_update().clone()
    }

    pub fn select(&self, answer_id: &str) -> bool {
        self.selections.send(answer_id.to_string()).is_ok()
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn current_view(body: &PollBody) -> Option<Option<PollView>> {
    match body.view() {
        Ok(view) => Some(view),
        Err(e) => {
            error!("Failed to tally poll {:?}: {}", body.poll_id(), e);
            None
        }
    }
}

// Moves `body` into its own task, which becomes the only place its state is
// read or written
pub fn spawn_poll_body(
    mut body: PollBody,
    mut updates: broadcast::Receiver<PollUpdate>,
    sender: Arc<dyn VoteSender>,
    notifier: Arc<dyn Notifier>,
) -> PollHandle {
    // Start from the current view so owners never see an empty poll
    let (view_tx, view_rx) = watch::channel(current_view(&body).flatten());
    let (select_tx, mut select_rx) = mpsc::unbounded_channel::<String>();

    let task = tokio::spawn(async move {
        loop {
            tokio::select! {
                update = updates.recv() => match update {
                    Ok(PollUpdate::Responses(responses)) => body.on_responses_change(responses),
                    Ok(PollUpdate::End) => body.on_poll_end(),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Poll {:?} missed {} updates", body.poll_id(), skipped);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                Some(answer_id) = select_rx.recv() => {
                    if let Err(e) = body.select_option(&answer_id, Arc::clone(&sender), Arc::clone(&notifier)) {
                        error!("Failed to vote in poll {:?}: {}", body.poll_id(), e);
                    }
                }
            }
            // Publish after every change, even if the view looks the same
            if let Some(view) = current_view(&body) {
                view_tx.send_replace(view);
            }
        }
    });

    PollHandle {
        task,
        selections: select_tx,
        views: view_rx,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::poll_body::tests::{ME, RecordingNotifier, RecordingSender};
    use crate::models::test_utils::*;
    use crate::models::{PollKind, PollStart};

    fn ready_body() -> PollBody {
        let poll_event = poll_start_event("$poll", PollKind::Disclosed, &[("a", "A"), ("b", "B")]);
        let poll = PollStart::from_event(&poll_event).unwrap();
        let mut body = PollBody::new(poll_event, ME);
        body.set_poll_instance(poll, false, None);
        body
    }

    // Lets the poll body task run until it publishes a new view.
    async fn next_view(handle: &mut PollHandle) -> PollView {
        for _ in 0..50 {
            if let Some(view) = handle.take_changed() {
                return view;
            }
            tokio::task::yield_now().await;
        }
        panic!("no new view was published");
    }

    #[test]
    fn publishing_without_subscribers_reaches_nobody() {
        let mut hub = PollHub::new();
        assert_eq!(hub.publish("$poll", PollUpdate::End), 0);

        let rx = hub.subscribe("$poll");
        assert_eq!(hub.publish("$poll", PollUpdate::End), 1);
        drop(rx);
        assert_eq!(hub.publish("$poll", PollUpdate::End), 0);
    }

    #[tokio::test]
    async fn poll_body_task_follows_updates() {
        let mut hub = PollHub::new();
        let mut handle = spawn_poll_body(
            ready_body(),
            hub.subscribe("$poll"),
            Arc::new(RecordingSender::default()),
            Arc::new(RecordingNotifier::default()),
        );
        assert_eq!(handle.view().unwrap().total_text(), "No votes cast");
        assert!(handle.take_changed().is_none());

        hub.publish(
            "$poll",
            PollUpdate::Responses(Some(vec![response_event("$1", "@bob:example.org", 1, &["a"])])),
        );
        assert_eq!(
            next_view(&mut handle).await.total_text(),
            "1 vote cast. Vote to see the results"
        );

        assert!(handle.select("b"));
        assert_eq!(next_view(&mut handle).await.total_text(), "Based on 2 votes");

        hub.publish("$poll", PollUpdate::End);
        assert!(next_view(&mut handle).await.is_ended());
        assert!(handle.view().unwrap().is_ended());
    }

    #[tokio::test]
    async fn dropping_the_handle_releases_the_subscription() {
        let mut hub = PollHub::new();
        let handle = spawn_poll_body(
            ready_body(),
            hub.subscribe("$poll"),
            Arc::new(RecordingSender::default()),
            Arc::new(RecordingNotifier::default()),
        );
        drop(handle);
        tokio::task::yield_now().await;

        // The aborted task drops its receiver once it has been cancelled.
        for _ in 0..10 {
            if hub.publish("$poll", PollUpdate::End) == 0 {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("subscription was not released");
    }
}

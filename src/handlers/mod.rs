pub mod hub;
pub mod poll_body;

use crate::error::SendError;
use async_trait::async_trait;
use log::error;
use serde_json::Value;

pub use hub::{PollHandle, PollHub, PollUpdate, spawn_poll_body};
pub use poll_body::{LocalEcho, PollBody};

/// Sends room events on behalf of the local user.
#[async_trait]
pub trait VoteSender: Send + Sync {
    /// Returns the id of the sent event.
    async fn send_event(&self, room_id: &str, event_type: &str, content: Value) -> Result<String, SendError>;
}

// Surfaces errors to the user
pub trait Notifier: Send + Sync {
    fn error_dialog(&self, title: &str, description: &str);
}

// Notifier for headless use: errors go to the log
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn error_dialog(&self, title: &str, description: &str) {
        error!("{}: {}", title, description);
    }
}

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PollError {
    #[error("expected a poll start event, got {0}")]
    NotPollStart(String),

    #[error("invalid poll start event: {0}")]
    InvalidPollStart(String),

    #[error("failed to parse poll response event {event_id:?} (type {event_type}) to determine user response")]
    InvalidResponse {
        event_id: Option<String>,
        event_type: String,
    },

    #[error("Sorry, you can't edit a poll after votes have been cast.")]
    PollHasVotes,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid event json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("event is missing its {0}")]
    MissingField(&'static str),
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} has an invalid value: {value}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Error)]
pub enum SendError {
    #[error("failed to send event: {0}")]
    Store(#[from] StoreError),

    #[error("failed to send event: {0}")]
    Rejected(String),
}

mod config;
mod db;
mod error;
mod handlers;
mod models;
mod tasks;
mod voting;

use config::{Config, VoteRequest};
use db::{Database, DatabaseSender};
use handlers::{LogNotifier, PollBody, PollHandle};
use log::{error, info, warn};
use models::RoomCache;
use std::sync::Arc;
use tasks::end_watcher::PollWatcher;
use voting::{PollView, create_vote_relations, ensure_poll_editable, find_top_answer};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

async fn cast_vote(
    database: &Arc<Database>,
    rooms: &RoomCache,
    user_id: &str,
    vote: &VoteRequest,
) -> Result<(), BoxError> {
    // Find the poll in whichever room holds it
    let Some((room, poll_event)) = rooms
        .rooms()
        .find_map(|room| room.event(&vote.poll_id).map(|event| (room, event)))
    else {
        return Err(format!("Poll {} not found", vote.poll_id).into());
    };

    let mut body = PollBody::load(room, rooms, poll_event, user_id)?;
    if body.is_ended() {
        warn!("Poll {} has ended; not voting", vote.poll_id);
        return Ok(());
    }

    // Votes are written straight into the store
    let sender = Arc::new(DatabaseSender::new(Arc::clone(database), user_id));
    match body.select_option(&vote.answer_id, sender, Arc::new(LogNotifier))? {
        Some(send) => {
            info!("Sending vote {:?} in poll {}", body.selected(), vote.poll_id);
            // Wait for the send so the vote is stored before we report
            send.await?;
            info!("Voted {} in poll {}", vote.answer_id, vote.poll_id);
        }
        None => info!("Already voted {} in poll {}", vote.answer_id, vote.poll_id),
    }
    Ok(())
}

fn print_view(poll_id: &str, view: &PollView, top_answer: &str, editable: bool) {
    let (question, edited) = match view {
        PollView::Live { question, edited, .. } | PollView::Ended { question, edited, .. } => (question, *edited),
    };
    let state = if view.is_ended() { "ended" } else { "live" };
    println!(
        "{} [{}] {}{}",
        poll_id,
        state,
        question,
        if edited { " (edited)" } else { "" }
    );
    // Counts are hidden until results may be shown
    for option in view.options() {
        let mark = if option.checked { "x" } else { " " };
        match option.votes {
            Some(votes) => println!("  [{}] {}: {} ({}%)", mark, option.text, votes, option.percent),
            None => println!("  [{}] {}", mark, option.text),
        }
    }
    println!("  {}", view.total_text());
    if !editable {
        println!("  Votes have been cast; the poll can no longer be edited");
    }
    if view.is_ended() && !top_answer.is_empty() {
        println!("  Top answer: {}", top_answer);
    }
}

fn report_polls(rooms: &RoomCache, user_id: &str) {
    for room in rooms.rooms() {
        for poll_event in room.poll_starts() {
            let Some(poll_id) = poll_event.id() else {
                continue;
            };
            let body = match PollBody::load(room, rooms, poll_event, user_id) {
                Ok(body) => body,
                Err(e) => {
                    warn!("Skipping poll {}: {}", poll_id, e);
                    continue;
                }
            };
            // Work out the top answer from the same votes the view counts
            let votes = create_vote_relations(room, poll_id);
            let editable = ensure_poll_editable(poll_event, Some(room)).is_ok();
            let summary = body
                .view()
                .and_then(|view| Ok((view, find_top_answer(poll_event, votes.as_deref())?)));
            match summary {
                Ok((Some(view), top_answer)) => print_view(poll_id, &view, &top_answer, editable),
                Ok((None, _)) => info!("Poll {} is not ready", poll_id),
                Err(e) => error!("Failed to tally poll {}: {}", poll_id, e),
            }
        }
    }
}

async fn run() -> Result<(), BoxError> {
    // Load configuration from the environment
    let config = Config::from_env()?;
    info!("Using event store {} as {}", config.database_url, config.user_id);

    // Connect to database
    let database = Arc::new(Database::new(&config.database_url).await?);

    // Import events before anything reads them
    if let Some(path) = &config.import_path {
        database.import_file(path).await?;
    }

    let Some(seconds) = config.watch_interval_seconds else {
        // One-shot: vote, then print every poll
        if let Some(vote) = &config.vote {
            let rooms = database.load_rooms().await?;
            cast_vote(&database, &rooms, &config.user_id, vote).await?;
        }
        let rooms = database.load_rooms().await?;
        report_polls(&rooms, &config.user_id);
        return Ok(());
    };

    let rooms = database.load_rooms().await?;
    report_polls(&rooms, &config.user_id);

    // Each poll gets its own body task; votes go through it
    let sender = Arc::new(DatabaseSender::new(Arc::clone(&database), config.user_id.as_str()));
    let mut watcher = PollWatcher::new(config.user_id.as_str(), sender, Arc::new(LogNotifier));
    watcher.sync(&rooms);
    if let Some(vote) = &config.vote {
        match watcher.handle(&vote.poll_id).map(PollHandle::view) {
            None => warn!("Poll {} not found", vote.poll_id),
            Some(Some(view)) if view.is_ended() => warn!("Poll {} has ended; not voting", vote.poll_id),
            Some(_) => {
                if watcher.select(&vote.poll_id, &vote.answer_id) {
                    info!("Voting {} in poll {}", vote.answer_id, vote.poll_id);
                }
            }
        }
    }

    // Run until killed
    tasks::end_watcher::watch_ended_polls_task(Arc::clone(&database), watcher, seconds).await;
    Ok(())
}

#[tokio::main]
async fn main() {
    // Initialize logging
    dotenvy::dotenv().ok();
    env_logger::init();

    if let Err(e) = run().await {
        error!("{}", e);
        std::process::exit(1);
    }
}

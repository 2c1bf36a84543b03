use crate::error::{SendError, StoreError};
use crate::handlers::VoteSender;
use crate::models::{RoomCache, RoomEvent};
use async_trait::async_trait;
use chrono::Utc;
use log::{info, warn};
use serde_json::Value;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, migrate::MigrateDatabase};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

// Append-only store of room events; row order is arrival order
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(db_url: &str) -> Result<Self, StoreError> {
        // Create database if it doesn't exist
        if !Sqlite::database_exists(db_url).await.unwrap_or(false) {
            Sqlite::create_database(db_url).await?;
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await?;

        // Initialize schema
        Self::init_schema(&pool).await?;

        Ok(Self { pool })
    }

    async fn init_schema(pool: &SqlitePool) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                event_id TEXT NOT NULL UNIQUE,
                room_id TEXT NOT NULL,
                sender TEXT NOT NULL,
                event_type TEXT NOT NULL,
                state_key TEXT,
                origin_server_ts INTEGER NOT NULL,
                content TEXT NOT NULL,
                unsigned TEXT
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS events_room ON events (room_id, seq);")
            .execute(pool)
            .await?;

        Ok(())
    }

    // Returns false if the event was already stored
    pub async fn save_event(&self, event: &RoomEvent) -> Result<bool, StoreError> {
        let event_id = event.event_id.as_deref().ok_or(StoreError::MissingField("event id"))?;
        let room_id = event.room_id.as_deref().ok_or(StoreError::MissingField("room id"))?;
        // Only keep unsigned data when there is some
        let unsigned = if event.unsigned.is_null() {
            None
        } else {
            Some(serde_json::to_string(&event.unsigned)?)
        };

        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO events (event_id, room_id, sender, event_type, state_key, origin_server_ts, content, unsigned)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(event_id)
        .bind(room_id)
        .bind(&event.sender)
        .bind(&event.event_type)
        .bind(event.state_key.as_deref())
        .bind(event.origin_server_ts)
        .bind(serde_json::to_string(&event.content)?)
        .bind(unsigned)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn import_events(&self, events: &[RoomEvent]) -> Result<usize, StoreError> {
        let mut stored = 0;
        for event in events {
            match self.save_event(event).await {
                Ok(true) => stored += 1,
                Ok(false) => {}
                // Events without ids can't be stored, skip them
                Err(StoreError::MissingField(field)) => {
                    warn!("Skipping event {:?} without {}", event.event_id, field);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(stored)
    }

    // Imports a JSON array of client-format events
    pub async fn import_file(&self, path: &Path) -> Result<usize, StoreError> {
        let raw = tokio::fs::read_to_string(path).await?;
        let events: Vec<RoomEvent> = serde_json::from_str(&raw)?;
        let stored = self.import_events(&events).await?;
        info!("Imported {} of {} events from {}", stored, events.len(), path.display());
        Ok(stored)
    }

    fn event_from_row(row: &SqliteRow) -> Result<RoomEvent, StoreError> {
        let content: String = row.try_get("content")?;
        let unsigned: Option<String> = row.try_get("unsigned")?;
        Ok(RoomEvent {
            event_id: Some(row.try_get("event_id")?),
            room_id: Some(row.try_get("room_id")?),
            sender: row.try_get("sender")?,
            origin_server_ts: row.try_get("origin_server_ts")?,
            event_type: row.try_get("event_type")?,
            state_key: row.try_get("state_key")?,
            content: serde_json::from_str(&content)?,
            unsigned: match unsigned {
                Some(u) => serde_json::from_str(&u)?,
                None => Value::Null,
            },
        })
    }

    pub async fn get_all_events(&self) -> Result<Vec<RoomEvent>, StoreError> {
        sqlx::query(
            r#"
            SELECT event_id, room_id, sender, event_type, state_key, origin_server_ts, content, unsigned
            FROM events
            ORDER BY seq
            "#,
        )
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(Self::event_from_row)
        .collect()
    }

    /// Rebuilds every room's timeline and current state from the store.
    pub async fn load_rooms(&self) -> Result<RoomCache, StoreError> {
        let mut cache = RoomCache::new();
        for event in self.get_all_events().await? {
            cache.add_event(event);
        }
        Ok(cache)
    }

    // Appends a new event from `sender` as the server would, returning its id
    pub async fn send_event(
        &self,
        room_id: &str,
        sender: &str,
        event_type: &str,
        content: Value,
    ) -> Result<String, StoreError> {
        // Mint an id and timestamp locally
        let event_id = format!("${}", Uuid::new_v4());
        let event = RoomEvent {
            event_id: Some(event_id.clone()),
            room_id: Some(room_id.to_string()),
            sender: sender.to_string(),
            origin_server_ts: Utc::now().timestamp_millis(),
            event_type: event_type.to_string(),
            state_key: None,
            content,
            unsigned: Value::Null,
        };
        self.save_event(&event).await?;
        Ok(event_id)
    }
}

// Sends votes as `user_id` by writing them straight into the store
pub struct DatabaseSender {
    database: Arc<Database>,
    user_id: String,
}

impl DatabaseSender {
    pub fn new(database: Arc<Database>, user_id: impl Into<String>) -> Self {
        Self {
            database,
            user_id: user_id.into(),
        }
    }
}

#[async_trait]
impl VoteSender for DatabaseSender {
    async fn send_event(&self, room_id: &str, event_type: &str, content: Value) -> Result<String, SendError> {
        Ok(self
            .database
            .send_event(room_id, &self.user_id, event_type, content)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_utils::*;
    use crate::models::{PollKind, PollResponse};
    use crate::voting::create_vote_relations;
    use serde_json::json;
    use tempfile::TempDir;

    async fn open() -> (TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("events.db").display());
        let db = Database::new(&url).await.unwrap();
        (dir, db)
    }

    #[tokio::test]
    async fn events_round_trip_in_arrival_order() {
        let (_dir, db) = open().await;
        let mut later = response_event("$b", "@bob:example.org", 1, &["a"]);
        later.unsigned = json!({ "age": 5 });
        let events = vec![
            poll_start_event("$poll", PollKind::Disclosed, &[("a", "A")]),
            response_event("$z", "@carol:example.org", 50, &["a"]),
            later,
        ];

        assert_eq!(db.import_events(&events).await.unwrap(), 3);
        assert_eq!(db.import_events(&events).await.unwrap(), 0);
        assert_eq!(db.get_all_events().await.unwrap(), events);
    }

    #[tokio::test]
    async fn events_without_ids_are_skipped() {
        let (_dir, db) = open().await;
        let mut no_room = response_event("$r", "@bob:example.org", 1, &["a"]);
        no_room.room_id = None;

        assert!(matches!(
            db.save_event(&no_room).await,
            Err(StoreError::MissingField("room id"))
        ));
        assert_eq!(db.import_events(&[no_room]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn sent_votes_show_up_as_relations() {
        let (_dir, db) = open().await;
        db.save_event(&poll_start_event("$poll", PollKind::Disclosed, &[("a", "A")]))
            .await
            .unwrap();

        let database = Arc::new(db);
        let sender = DatabaseSender::new(Arc::clone(&database), "@me:example.org");
        let (event_type, content) = PollResponse::content(&["a".to_string()], "$poll");
        let event_id = sender
            .send_event("!room:example.org", event_type, content)
            .await
            .unwrap();
        assert!(event_id.starts_with('$'));

        let rooms = database.load_rooms().await.unwrap();
        let room = rooms.room("!room:example.org").unwrap();
        let votes = create_vote_relations(room, "$poll").unwrap();
        assert_eq!(votes.len(), 1);
        assert_eq!(votes[0].sender, "@me:example.org");
        assert_eq!(votes[0].event_id.as_deref(), Some(event_id.as_str()));
    }

    #[tokio::test]
    async fn imports_json_dumps() {
        let (dir, db) = open().await;
        let path = dir.path().join("dump.json");
        std::fs::write(
            &path,
            json!([
                { "event_id": "$poll", "room_id": "!r:s", "sender": "@a:s", "type": "m.poll.start",
                  "origin_server_ts": 1, "content": {} },
                { "room_id": "!r:s", "sender": "@a:s", "type": "m.room.message", "content": {} }
            ])
            .to_string(),
        )
        .unwrap();

        assert_eq!(db.import_file(&path).await.unwrap(), 1);
        assert!(db.import_file(&dir.path().join("missing.json")).await.is_err());
    }
}

use chrono::Utc;
use futures::future::BoxFuture;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use vellora_core::error::{Result, VelloraError};
use vellora_core::traits::{ActionStore, Catalog, CredentialStore};
use vellora_core::types::{NewScheduledAction, OAuthTokens, ScheduledAction};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS lectures (
    lecture_id TEXT PRIMARY KEY,
    title TEXT NOT NULL DEFAULT '',
    video_ref TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS scheduled_actions (
    action_id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    title TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    timestamp TEXT NOT NULL,
    days_of_week TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_actions_user ON scheduled_actions(user_id, created_at);

CREATE TABLE IF NOT EXISTS enrollments (
    instructor_id TEXT NOT NULL,
    email TEXT NOT NULL,
    PRIMARY KEY (instructor_id, email)
);

CREATE TABLE IF NOT EXISTS calendar_tokens (
    user_id TEXT PRIMARY KEY,
    access_token TEXT NOT NULL,
    refresh_token TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
";

fn db_err(e: impl std::fmt::Display) -> VelloraError {
    VelloraError::Database(e.to_string())
}

/// SQLite-backed catalog, scheduled-action list and calendar credential store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| VelloraError::Database(format!("Failed to create db directory: {}", e)))?;
        }

        let conn = Connection::open(path).map_err(db_err)?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;

        debug!(path = %path.display(), "SQLite store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(db_err)
    }

    /// Register or replace a lecture.
    pub fn upsert_lecture(&self, lecture_id: &str, title: &str, video_ref: &str) -> Result<()> {
        self.lock()?
            .execute(
                "INSERT INTO lectures (lecture_id, title, video_ref) VALUES (?1, ?2, ?3)
                 ON CONFLICT(lecture_id) DO UPDATE SET title = excluded.title, video_ref = excluded.video_ref",
                params![lecture_id, title, video_ref],
            )
            .map_err(db_err)?;
        Ok(())
    }

    /// Enrol a learner's e-mail with an instructor.
    pub fn enroll(&self, instructor_id: &str, email: &str) -> Result<()> {
        self.lock()?
            .execute(
                "INSERT OR IGNORE INTO enrollments (instructor_id, email) VALUES (?1, ?2)",
                params![instructor_id, email],
            )
            .map_err(db_err)?;
        Ok(())
    }

    /// Store both OAuth tokens for a user.
    pub fn save_tokens(&self, user_id: &str, tokens: &OAuthTokens) -> Result<()> {
        self.lock()?
            .execute(
                "INSERT INTO calendar_tokens (user_id, access_token, refresh_token, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(user_id) DO UPDATE SET
                    access_token = excluded.access_token,
                    refresh_token = excluded.refresh_token,
                    updated_at = excluded.updated_at",
                params![
                    user_id,
                    tokens.access_token,
                    tokens.refresh_token,
                    Utc::now().to_rfc3339()
                ],
            )
            .map_err(db_err)?;
        Ok(())
    }
}

impl Catalog for SqliteStore {
    fn video_reference(&self, lecture_id: &str) -> BoxFuture<'_, Result<Option<String>>> {
        let lecture_id = lecture_id.to_string();
        Box::pin(async move {
            self.lock()?
                .query_row(
                    "SELECT video_ref FROM lectures WHERE lecture_id = ?1",
                    params![lecture_id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(db_err)
        })
    }

    fn attendee_emails(&self, instructor_id: &str) -> BoxFuture<'_, Result<Vec<String>>> {
        let instructor_id = instructor_id.to_string();
        Box::pin(async move {
            let conn = self.lock()?;
            let mut stmt = conn
                .prepare("SELECT email FROM enrollments WHERE instructor_id = ?1 ORDER BY email")
                .map_err(db_err)?;
            let rows = stmt
                .query_map(params![instructor_id], |row| row.get::<_, String>(0))
                .map_err(db_err)?;
            rows.collect::<std::result::Result<Vec<_>, _>>().map_err(db_err)
        })
    }
}

impl ActionStore for SqliteStore {
    fn append_scheduled_action(
        &self,
        user_id: &str,
        action: NewScheduledAction,
    ) -> BoxFuture<'_, Result<String>> {
        let user_id = user_id.to_string();
        Box::pin(async move {
            let action_id = uuid::Uuid::new_v4().to_string();
            let days = serde_json::to_string(&action.days_of_week)?;
            self.lock()?
                .execute(
                    "INSERT INTO scheduled_actions
                        (action_id, user_id, title, description, timestamp, days_of_week, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        action_id,
                        user_id,
                        action.title,
                        action.description,
                        action.timestamp,
                        days,
                        Utc::now().to_rfc3339()
                    ],
                )
                .map_err(db_err)?;
            Ok(action_id)
        })
    }

    fn remove_scheduled_action(
        &self,
        user_id: &str,
        action_id: &str,
    ) -> BoxFuture<'_, Result<bool>> {
        let user_id = user_id.to_string();
        let action_id = action_id.to_string();
        Box::pin(async move {
            let removed = self
                .lock()?
                .execute(
                    "DELETE FROM scheduled_actions WHERE user_id = ?1 AND action_id = ?2",
                    params![user_id, action_id],
                )
                .map_err(db_err)?;
            Ok(removed > 0)
        })
    }

    fn list_scheduled_actions(&self, user_id: &str) -> BoxFuture<'_, Result<Vec<ScheduledAction>>> {
        let user_id = user_id.to_string();
        Box::pin(async move {
            let conn = self.lock()?;
            let mut stmt = conn
                .prepare(
                    "SELECT action_id, title, description, timestamp, days_of_week
                     FROM scheduled_actions WHERE user_id = ?1
                     ORDER BY created_at ASC, rowid ASC",
                )
                .map_err(db_err)?;

            let rows = stmt
                .query_map(params![user_id], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                })
                .map_err(db_err)?;

            let mut actions = Vec::new();
            for row in rows {
                let (action_id, title, description, timestamp, days) = row.map_err(db_err)?;
                actions.push(ScheduledAction {
                    action_id,
                    title,
                    description,
                    timestamp,
                    days_of_week: serde_json::from_str(&days).unwrap_or_default(),
                });
            }
            Ok(actions)
        })
    }
}

impl CredentialStore for SqliteStore {
    fn load_tokens(&self, user_id: &str) -> BoxFuture<'_, Result<Option<OAuthTokens>>> {
        let user_id = user_id.to_string();
        Box::pin(async move {
            self.lock()?
                .query_row(
                    "SELECT access_token, refresh_token FROM calendar_tokens WHERE user_id = ?1",
                    params![user_id],
                    |row| {
                        Ok(OAuthTokens {
                            access_token: row.get(0)?,
                            refresh_token: row.get(1)?,
                        })
                    },
                )
                .optional()
                .map_err(db_err)
        })
    }

    fn save_access_token(&self, user_id: &str, access_token: &str) -> BoxFuture<'_, Result<()>> {
        let user_id = user_id.to_string();
        let access_token = access_token.to_string();
        Box::pin(async move {
            self.lock()?
                .execute(
                    "UPDATE calendar_tokens SET access_token = ?2, updated_at = ?3 WHERE user_id = ?1",
                    params![user_id, access_token, Utc::now().to_rfc3339()],
                )
                .map_err(db_err)?;
            Ok(())
        })
    }

    fn purge_tokens(&self, user_id: &str) -> BoxFuture<'_, Result<()>> {
        let user_id = user_id.to_string();
        Box::pin(async move {
            self.lock()?
                .execute("DELETE FROM calendar_tokens WHERE user_id = ?1", params![user_id])
                .map_err(db_err)?;
            Ok(())
        })
    }
}

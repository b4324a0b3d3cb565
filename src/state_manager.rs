// src/state_manager.rs

use crate::models::DownloadSession;
use rusqlite::{params, OptionalExtension};
use std::path::Path;
use thiserror::Error;
use tokio_rusqlite::Connection;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Persists the paused session to SQLite so a pause survives a restart.
///
/// There is at most one session per manager, so the table holds at most one row.
#[derive(Clone)]
pub struct SessionStore {
    conn: Connection,
}

impl SessionStore {
    /// Opens (or creates) the database file and its table.
    pub async fn open(db_path: &Path) -> Result<Self, StateError> {
        let conn = Connection::open(db_path).await?;
        let store = Self { conn };
        store.setup_database().await?;
        Ok(store)
    }

    pub async fn open_in_memory() -> Result<Self, StateError> {
        let conn = Connection::open_in_memory().await?;
        let store = Self { conn };
        store.setup_database().await?;
        Ok(store)
    }

    async fn setup_database(&self) -> Result<(), StateError> {
        self.conn
            .call(|conn| {
                conn.execute(
                    "CREATE TABLE IF NOT EXISTS paused_session (
                        id              INTEGER PRIMARY KEY CHECK (id = 1),
                        session_data    TEXT NOT NULL
                    )",
                    [],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Saves (inserts or replaces) the paused session.
    pub async fn save(&self, session: &DownloadSession) -> Result<(), StateError> {
        let session_data = serde_json::to_string(session)?;
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO paused_session (id, session_data) VALUES (1, ?1)",
                    params![session_data],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn load(&self) -> Result<Option<DownloadSession>, StateError> {
        let raw = self
            .conn
            .call(|conn| {
                let raw = conn
                    .query_row(
                        "SELECT session_data FROM paused_session WHERE id = 1",
                        [],
                        |row| row.get::<_, String>(0),
                    )
                    .optional()?;
                Ok(raw)
            })
            .await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn clear(&self) -> Result<(), StateError> {
        self.conn
            .call(|conn| {
                conn.execute("DELETE FROM paused_session", [])?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SessionState, Source};
    use crate::transfer::ResumeData;

    fn paused_session() -> DownloadSession {
        let mut session = DownloadSession::new(
            "http://origin/model.gguf".into(),
            Source::Mirror,
            "model.gguf".into(),
        );
        session.state = SessionState::Paused;
        session.bytes_written = 512;
        session.bytes_expected = Some(2048);
        session.resume = Some(ResumeData {
            offset: 512,
            expected: Some(2048),
            validator: Some("\"etag\"".into()),
            ..ResumeData::new("http://origin/model.gguf", "model.gguf")
        });
        session
    }

    #[tokio::test]
    async fn empty_store_loads_nothing() {
        let store = SessionStore::open_in_memory().await.unwrap();
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_replaces_and_clear_removes() {
        let store = SessionStore::open_in_memory().await.unwrap();
        let mut session = paused_session();
        store.save(&session).await.unwrap();

        session.bytes_written = 1024;
        store.save(&session).await.unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.bytes_written, 1024);
        assert_eq!(loaded.source, Source::Mirror);
        assert_eq!(loaded.state, SessionState::Paused);
        assert_eq!(loaded.resume.unwrap().validator.as_deref(), Some("\"etag\""));

        store.clear().await.unwrap();
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("downloads.db");
        SessionStore::open(&db).await.unwrap().save(&paused_session()).await.unwrap();

        let reopened = SessionStore::open(&db).await.unwrap();
        assert_eq!(reopened.load().await.unwrap().unwrap().bytes_written, 512);
    }
}

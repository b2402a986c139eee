//! # Session Store
//!
//! Chat history per session in the `messages` table. Each completed run
//! appends the user prompt and the assistant reply; the reply's metadata
//! carries the `(diagram, document)` pair that seeds edit mode on the next
//! request for the same session.

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

use super::db::OpexDb;
use super::revision::{PriorArtifacts, Role};

/// Persistence collaborator for the coordinator
pub trait SessionStore: Send + Sync {
    /// Most recent assistant artifacts for a session
    fn latest_artifacts(&self, session_id: &str) -> Result<Option<PriorArtifacts>>;

    /// Append one completed run
    fn record_run(
        &self,
        session_id: &str,
        prompt: &str,
        reply: &str,
        artifacts: &PriorArtifacts,
    ) -> Result<()>;
}

/// SQLite-backed session manager
pub struct SessionManager {
    conn: Arc<Mutex<Connection>>,
}

impl SessionManager {
    /// Create from shared OpexDb connection
    pub fn new(db: &OpexDb) -> Self {
        Self {
            conn: db.connection(),
        }
    }

    /// Number of stored messages for a session
    pub fn message_count(&self, session_id: &str) -> Result<usize> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE chat_session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )?;

        Ok(count as usize)
    }
}

impl SessionStore for SessionManager {
    fn latest_artifacts(&self, session_id: &str) -> Result<Option<PriorArtifacts>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let metadata: Option<String> = conn
            .query_row(
                r#"
                SELECT metadata_json FROM messages
                WHERE chat_session_id = ?1
                  AND sender_type = ?2
                  AND metadata_json IS NOT NULL
                ORDER BY id DESC
                LIMIT 1
                "#,
                params![session_id, Role::Assistant.as_str()],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to query session artifacts")?;

        match metadata {
            Some(json) => {
                let artifacts: PriorArtifacts =
                    serde_json::from_str(&json).context("Corrupt message metadata")?;
                Ok(Some(artifacts))
            }
            None => Ok(None),
        }
    }

    fn record_run(
        &self,
        session_id: &str,
        prompt: &str,
        reply: &str,
        artifacts: &PriorArtifacts,
    ) -> Result<()> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let metadata_json = serde_json::to_string(artifacts)?;
        let now = Utc::now().to_rfc3339();

        let tx = conn.transaction()?;
        if !prompt.trim().is_empty() {
            tx.execute(
                r#"
                INSERT INTO messages (chat_session_id, sender_type, content, metadata_json, created_at)
                VALUES (?1, ?2, ?3, NULL, ?4)
                "#,
                params![session_id, Role::User.as_str(), prompt, now],
            )?;
        }
        tx.execute(
            r#"
            INSERT INTO messages (chat_session_id, sender_type, content, metadata_json, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                session_id,
                Role::Assistant.as_str(),
                reply,
                metadata_json,
                now
            ],
        )?;
        tx.commit().context("Failed to record run")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifacts(diagram: &str, document: &str) -> PriorArtifacts {
        PriorArtifacts {
            diagram: Some(diagram.to_string()),
            document: Some(document.to_string()),
        }
    }

    #[test]
    fn test_unknown_session_has_no_artifacts() {
        let db = OpexDb::open_in_memory().unwrap();
        let sessions = SessionManager::new(&db);
        assert!(sessions.latest_artifacts("missing").unwrap().is_none());
    }

    #[test]
    fn test_latest_run_wins() {
        let dir = tempfile::tempdir().unwrap();
        let db = OpexDb::open_at(dir.path().join("opex.db")).unwrap();
        let sessions = SessionManager::new(&db);

        sessions
            .record_run("s-1", "first", "done", &artifacts("flowchart TD\n A-->B", "# A"))
            .unwrap();
        sessions
            .record_run("s-1", "second", "done", &artifacts("flowchart TD\n A-->C", "# C"))
            .unwrap();
        sessions
            .record_run("s-2", "other", "done", &artifacts("flowchart LR\n X-->Y", "# X"))
            .unwrap();

        let latest = sessions.latest_artifacts("s-1").unwrap().unwrap();
        assert_eq!(latest.document.as_deref(), Some("# C"));
        assert_eq!(sessions.message_count("s-1").unwrap(), 4);
        assert_eq!(sessions.message_count("s-2").unwrap(), 2);
    }

    #[test]
    fn test_blank_prompt_stores_only_reply() {
        let db = OpexDb::open_in_memory().unwrap();
        let sessions = SessionManager::new(&db);

        sessions
            .record_run("s-1", "  ", "done", &PriorArtifacts::default())
            .unwrap();
        assert_eq!(sessions.message_count("s-1").unwrap(), 1);
    }
}

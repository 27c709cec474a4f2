//! Chat-scoped notes the model asked to remember.

use crate::store::{parse_rfc3339, sql_conversion_error, Database};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

/// Upper bound on notes returned by a single recall.
pub const MAX_RECALL: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryNote {
    pub id: String,
    pub chat_id: String,
    pub note: String,
    pub created_at: DateTime<Utc>,
}

pub struct MemoryStore {
    db: Database,
}

impl MemoryStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn remember(&self, chat_id: &str, note: &str) -> Result<MemoryNote> {
        let note = note.trim();
        if note.is_empty() {
            anyhow::bail!("Memory note must not be empty");
        }

        let entry = MemoryNote {
            id: Uuid::new_v4().to_string(),
            chat_id: chat_id.to_string(),
            note: note.to_string(),
            created_at: Utc::now(),
        };

        self.db.with_connection(|conn| {
            conn.execute(
                "INSERT INTO memories (id, chat_id, note, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    entry.id,
                    entry.chat_id,
                    entry.note,
                    entry.created_at.to_rfc3339()
                ],
            )
            .context("Failed to insert memory")?;
            Ok(())
        })?;

        tracing::debug!(chat_id, memory_id = %entry.id, "Stored memory note");
        Ok(entry)
    }

    /// Newest-first notes for a chat, capped at `min(limit, MAX_RECALL)`.
    pub fn recall(&self, chat_id: &str, limit: usize) -> Result<Vec<MemoryNote>> {
        let limit = i64::try_from(limit.clamp(1, MAX_RECALL)).context("Recall limit overflow")?;
        self.db.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, chat_id, note, created_at
                 FROM memories
                 WHERE chat_id = ?1
                 ORDER BY seq DESC
                 LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![chat_id, limit], |row| {
                let created_at: String = row.get(3)?;
                Ok(MemoryNote {
                    id: row.get(0)?,
                    chat_id: row.get(1)?,
                    note: row.get(2)?,
                    created_at: parse_rfc3339(&created_at).map_err(sql_conversion_error)?,
                })
            })?;

            let mut notes = Vec::new();
            for row in rows {
                notes.push(row?);
            }
            Ok(notes)
        })
    }

    /// Delete one note (`Some(id)`) owned by the chat, or all of the chat's
    /// notes (`None`). Returns how many rows were removed.
    pub fn forget(&self, chat_id: &str, id: Option<&str>) -> Result<usize> {
        let changed = self.db.with_connection(|conn| {
            match id {
                Some(id) => conn.execute(
                    "DELETE FROM memories WHERE id = ?1 AND chat_id = ?2",
                    params![id, chat_id],
                ),
                None => conn.execute("DELETE FROM memories WHERE chat_id = ?1", params![chat_id]),
            }
            .context("Failed to delete memories")
        })?;

        if let (Some(id), 0) = (id, changed) {
            anyhow::bail!("Memory '{id}' not found in this chat");
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_store(tmp: &TempDir) -> MemoryStore {
        MemoryStore::new(Database::new(tmp.path().join("state.db")))
    }

    #[test]
    fn recall_is_newest_first() {
        let tmp = TempDir::new().unwrap();
        let store = test_store(&tmp);
        store.remember("c1", "first").unwrap();
        store.remember("c1", "second").unwrap();
        store.remember("c1", "third").unwrap();

        let notes: Vec<_> = store
            .recall("c1", 10)
            .unwrap()
            .into_iter()
            .map(|n| n.note)
            .collect();
        assert_eq!(notes, vec!["third", "second", "first"]);
    }

    #[test]
    fn recall_is_capped() {
        let tmp = TempDir::new().unwrap();
        let store = test_store(&tmp);
        for i in 0..(MAX_RECALL + 5) {
            store.remember("c1", &format!("note {i}")).unwrap();
        }
        assert_eq!(store.recall("c1", 1000).unwrap().len(), MAX_RECALL);
        assert_eq!(store.recall("c1", 2).unwrap().len(), 2);
    }

    #[test]
    fn empty_note_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let store = test_store(&tmp);
        assert!(store.remember("c1", "   ").is_err());
    }

    #[test]
    fn forget_respects_ownership() {
        let tmp = TempDir::new().unwrap();
        let store = test_store(&tmp);
        let note = store.remember("c1", "secret").unwrap();
        store.remember("c2", "other chat").unwrap();

        assert!(store.forget("c2", Some(&note.id)).is_err());
        assert_eq!(store.forget("c1", Some(&note.id)).unwrap(), 1);
        assert!(store.recall("c1", 10).unwrap().is_empty());

        assert_eq!(store.forget("c2", None).unwrap(), 1);
        assert!(store.recall("c2", 10).unwrap().is_empty());
    }
}

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};

const CONTEXT_WINDOW_KEY: &str = "context_window";

/// SQLite file shared by the rule, memory and settings stores.
///
/// A connection is opened per operation; schema creation is idempotent so any
/// operation may be the first one against a fresh file.
#[derive(Debug, Clone)]
pub struct Database {
    path: PathBuf,
}

impl Database {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn with_connection<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create state directory: {}", parent.display())
            })?;
        }

        let conn = Connection::open(&self.path)
            .with_context(|| format!("Failed to open state DB: {}", self.path.display()))?;
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .context("Failed to set state DB busy timeout")?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS auto_reply_rules (
                seq        INTEGER PRIMARY KEY AUTOINCREMENT,
                id         TEXT NOT NULL UNIQUE,
                chat_id    TEXT NOT NULL,
                pattern    TEXT NOT NULL,
                template   TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_auto_reply_rules_chat ON auto_reply_rules(chat_id);

            CREATE TABLE IF NOT EXISTS memories (
                seq        INTEGER PRIMARY KEY AUTOINCREMENT,
                id         TEXT NOT NULL UNIQUE,
                chat_id    TEXT NOT NULL,
                note       TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_memories_chat ON memories(chat_id, created_at);

            CREATE TABLE IF NOT EXISTS chat_settings (
                chat_id TEXT NOT NULL,
                key     TEXT NOT NULL,
                value   TEXT NOT NULL,
                PRIMARY KEY (chat_id, key)
            );",
        )
        .context("Failed to initialize state schema")?;

        f(&conn)
    }

    pub fn set_setting(&self, chat_id: &str, key: &str, value: &str) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO chat_settings (chat_id, key, value) VALUES (?1, ?2, ?3)
                 ON CONFLICT(chat_id, key) DO UPDATE SET value = excluded.value",
                params![chat_id, key, value],
            )
            .context("Failed to write chat setting")?;
            Ok(())
        })
    }

    pub fn get_setting(&self, chat_id: &str, key: &str) -> Result<Option<String>> {
        self.with_connection(|conn| {
            conn.query_row(
                "SELECT value FROM chat_settings WHERE chat_id = ?1 AND key = ?2",
                params![chat_id, key],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to read chat setting")
        })
    }

    pub fn delete_setting(&self, chat_id: &str, key: &str) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute(
                "DELETE FROM chat_settings WHERE chat_id = ?1 AND key = ?2",
                params![chat_id, key],
            )
            .context("Failed to delete chat setting")?;
            Ok(())
        })
    }

    /// Persisted per-chat context window overrides.
    pub fn context_windows(&self) -> Result<Vec<(String, usize)>> {
        self.with_connection(|conn| {
            let mut stmt =
                conn.prepare("SELECT chat_id, value FROM chat_settings WHERE key = ?1")?;
            let rows = stmt.query_map(params![CONTEXT_WINDOW_KEY], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;

            let mut windows = Vec::new();
            for row in rows {
                let (chat_id, raw) = row?;
                match raw.parse::<usize>() {
                    Ok(window) => windows.push((chat_id, window)),
                    Err(e) => {
                        tracing::warn!(
                            chat_id = %chat_id,
                            raw = %raw,
                            "Ignoring malformed context window: {e}"
                        );
                    }
                }
            }
            Ok(windows)
        })
    }

    pub fn set_context_window(&self, chat_id: &str, window: Option<usize>) -> Result<()> {
        match window {
            Some(window) => self.set_setting(chat_id, CONTEXT_WINDOW_KEY, &window.to_string()),
            None => self.delete_setting(chat_id, CONTEXT_WINDOW_KEY),
        }
    }
}

pub(crate) fn parse_rfc3339(raw: &str) -> Result<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("Invalid RFC3339 timestamp in state DB: {raw}"))?;
    Ok(parsed.with_timezone(&Utc))
}

pub(crate) fn sql_conversion_error(err: anyhow::Error) -> rusqlite::Error {
    rusqlite::Error::ToSqlConversionFailure(err.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn schema_creation_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let db = Database::new(tmp.path().join("nested").join("state.db"));
        db.with_connection(|_| Ok(())).unwrap();
        db.with_connection(|_| Ok(())).unwrap();
        assert!(db.path().exists());
    }

    #[test]
    fn settings_upsert_and_delete() {
        let tmp = TempDir::new().unwrap();
        let db = Database::new(tmp.path().join("state.db"));

        assert_eq!(db.get_setting("c1", "k").unwrap(), None);
        db.set_setting("c1", "k", "one").unwrap();
        db.set_setting("c1", "k", "two").unwrap();
        assert_eq!(db.get_setting("c1", "k").unwrap().as_deref(), Some("two"));
        assert_eq!(db.get_setting("c2", "k").unwrap(), None);

        db.delete_setting("c1", "k").unwrap();
        assert_eq!(db.get_setting("c1", "k").unwrap(), None);
    }

    #[test]
    fn context_windows_skip_malformed_values() {
        let tmp = TempDir::new().unwrap();
        let db = Database::new(tmp.path().join("state.db"));
        db.set_context_window("c1", Some(5)).unwrap();
        db.set_setting("c2", CONTEXT_WINDOW_KEY, "lots").unwrap();

        let windows = db.context_windows().unwrap();
        assert_eq!(windows, vec![("c1".to_string(), 5)]);

        db.set_context_window("c1", None).unwrap();
        assert!(db.context_windows().unwrap().is_empty());
    }
}

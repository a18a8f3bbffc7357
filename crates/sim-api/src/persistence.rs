//! SQLite persistence: world snapshots as JSON blobs keyed by game id,
//! append-only logs with a target fan-out table, newest-first cursor
//! queries.

use std::fmt;

use chrono::{DateTime, Utc};
use contracts::{EnvNode, LogEntry, LogKind};
use rusqlite::{params, Connection, OptionalExtension};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS games (
    id   TEXT PRIMARY KEY,
    data TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS logs (
    game TEXT    NOT NULL,
    id   INTEGER NOT NULL,
    time TEXT    NOT NULL,
    type TEXT    NOT NULL,
    src  TEXT    NOT NULL,
    msg  TEXT    NOT NULL,
    PRIMARY KEY (game, id)
);

CREATE TABLE IF NOT EXISTS log_targets (
    game   TEXT    NOT NULL,
    log_id INTEGER NOT NULL,
    target TEXT    NOT NULL,
    PRIMARY KEY (game, log_id, target)
);

CREATE INDEX IF NOT EXISTS idx_log_targets_target
    ON log_targets (game, target);
";

#[derive(Debug)]
pub enum PersistenceError {
    Sqlite(rusqlite::Error),
    Serde(serde_json::Error),
    /// A stored value no reader should have written: unparseable timestamp
    /// or log kind.
    Corrupt(String),
}

impl fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sqlite(e) => write!(f, "sqlite error: {e}"),
            Self::Serde(e) => write!(f, "serialization error: {e}"),
            Self::Corrupt(msg) => write!(f, "corrupt stored value: {msg}"),
        }
    }
}

impl std::error::Error for PersistenceError {}

impl From<rusqlite::Error> for PersistenceError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Sqlite(e)
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serde(e)
    }
}

pub struct SqliteGameStore {
    conn: Connection,
}

impl SqliteGameStore {
    pub fn open(path: &str) -> Result<Self, PersistenceError> {
        let store = Self {
            conn: Connection::open(path)?,
        };
        store.configure()?;
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, PersistenceError> {
        let store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.configure()?;
        store.migrate()?;
        Ok(store)
    }

    fn configure(&self) -> Result<(), PersistenceError> {
        self.conn.pragma_update(None, "journal_mode", "WAL")?;
        self.conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(())
    }

    fn migrate(&self) -> Result<(), PersistenceError> {
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Insert or replace the world snapshot for a game.
    pub fn save_game(&self, game: &str, node: &EnvNode) -> Result<(), PersistenceError> {
        let data = serde_json::to_string(node)?;
        self.conn.execute(
            "INSERT INTO games (id, data) VALUES (?1, ?2)
             ON CONFLICT (id) DO UPDATE SET data = excluded.data",
            params![game, data],
        )?;
        Ok(())
    }

    pub fn load_game(&self, game: &str) -> Result<Option<EnvNode>, PersistenceError> {
        let raw: Option<String> = self
            .conn
            .query_row("SELECT data FROM games WHERE id = ?1", params![game], |row| {
                row.get(0)
            })
            .optional()?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn list_games(&self) -> Result<Vec<String>, PersistenceError> {
        let mut stmt = self.conn.prepare("SELECT id FROM games ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// Append log entries in one transaction. Entry ids are assigned by the
    /// kernel; re-flushing the same rows is a no-op.
    pub fn append_logs(&mut self, game: &str, entries: &[LogEntry]) -> Result<(), PersistenceError> {
        let tx = self.conn.transaction()?;
        {
            let mut insert_log = tx.prepare(
                "INSERT OR IGNORE INTO logs (game, id, time, type, src, msg)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            let mut insert_target = tx.prepare(
                "INSERT OR IGNORE INTO log_targets (game, log_id, target)
                 VALUES (?1, ?2, ?3)",
            )?;
            for entry in entries {
                insert_log.execute(params![
                    game,
                    entry.id,
                    entry.time.to_rfc3339(),
                    entry.kind.as_str(),
                    entry.source,
                    entry.message,
                ])?;
                for target in &entry.targets {
                    insert_target.execute(params![game, entry.id, target])?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Highest log id stored for the game, 0 when there is none.
    pub fn max_log_id(&self, game: &str) -> Result<u64, PersistenceError> {
        let max: Option<u64> = self.conn.query_row(
            "SELECT MAX(id) FROM logs WHERE game = ?1",
            params![game],
            |row| row.get(0),
        )?;
        Ok(max.unwrap_or(0))
    }

    /// Up to `limit` entries, newest first. `cursor` continues a previous
    /// page: only ids strictly below it are returned. `target` keeps entries
    /// the named person can see (their own, addressed to them, or broadcast).
    pub fn load_logs(
        &self,
        game: &str,
        target: Option<&str>,
        limit: usize,
        cursor: Option<u64>,
    ) -> Result<Vec<LogEntry>, PersistenceError> {
        let mut stmt = self.conn.prepare(
            "SELECT l.id, l.time, l.type, l.src, l.msg
             FROM logs l
             WHERE l.game = ?1
               AND (?2 IS NULL OR l.id < ?2)
               AND (?3 IS NULL
                    OR l.src = ?3
                    OR EXISTS (SELECT 1 FROM log_targets t
                               WHERE t.game = l.game AND t.log_id = l.id AND t.target = ?3)
                    OR NOT EXISTS (SELECT 1 FROM log_targets t
                                   WHERE t.game = l.game AND t.log_id = l.id))
             ORDER BY l.id DESC
             LIMIT ?4",
        )?;
        let rows = stmt.query_map(params![game, cursor, target, limit as i64], |row| {
            Ok((
                row.get::<_, u64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut entries = Vec::new();
        let mut targets_stmt = self.conn.prepare(
            "SELECT target FROM log_targets
             WHERE game = ?1 AND log_id = ?2
             ORDER BY target",
        )?;
        for row in rows {
            let (id, time, kind, source, message) = row?;
            let time = parse_time(&time)?;
            let kind: LogKind = kind
                .parse()
                .map_err(|e: String| PersistenceError::Corrupt(e))?;
            let targets = targets_stmt
                .query_map(params![game, id], |r| r.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            entries.push(LogEntry {
                id,
                time,
                kind,
                source,
                targets,
                message,
            });
        }
        Ok(entries)
    }
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>, PersistenceError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| PersistenceError::Corrupt(format!("bad timestamp {raw:?}: {e}")))
}

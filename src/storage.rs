use crate::api::models::Sender;
use crate::error::StoreError;
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

fn db_path() -> Option<PathBuf> {
    let proj = crate::app::project_dirs()?;
    Some(proj.data_dir().join("cache.sqlite"))
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// Local copy of the sender list so the sidebar can render before the
/// backend answers.
pub struct SenderCache {
    conn: Connection,
}

impl SenderCache {
    pub fn open_default() -> Result<Self, StoreError> {
        let path = db_path().ok_or(StoreError::NoDataDir)?;
        Self::open(&path)
    }

    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            CREATE TABLE IF NOT EXISTS senders (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                token TEXT NOT NULL,
                jid TEXT NOT NULL DEFAULT '',
                connected INTEGER,
                updated_at INTEGER NOT NULL,
                raw_json TEXT NOT NULL
            );
            "#,
        )?;
        Ok(Self { conn })
    }

    /// Senders without an id are skipped; they have not been created remotely yet.
    pub fn upsert_senders(&mut self, senders: &[Sender]) -> Result<usize, StoreError> {
        let now = now_secs();
        let tx = self.conn.transaction()?;
        let mut written = 0;
        for sender in senders {
            let Some(id) = sender.id else { continue };
            let raw = serde_json::to_string(sender)?;
            tx.execute(
                r#"
                INSERT INTO senders (id, name, token, jid, connected, updated_at, raw_json)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT(id) DO UPDATE SET
                    name=excluded.name,
                    token=excluded.token,
                    jid=excluded.jid,
                    connected=excluded.connected,
                    updated_at=excluded.updated_at,
                    raw_json=excluded.raw_json
                "#,
                params![id, sender.name, sender.token, sender.jid, sender.connected, now, raw],
            )?;
            written += 1;
        }
        tx.commit()?;
        Ok(written)
    }

    /// Makes the cache mirror `senders` exactly, dropping rows deleted remotely.
    pub fn replace_all(&mut self, senders: &[Sender]) -> Result<usize, StoreError> {
        self.conn.execute("DELETE FROM senders", [])?;
        self.upsert_senders(senders)
    }

    pub fn get_senders(&self, limit: Option<usize>) -> Result<Vec<Sender>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT raw_json FROM senders ORDER BY name ASC, id ASC LIMIT ?1")?;
        let lim = limit.unwrap_or(500) as i64;
        let rows = stmt.query_map(params![lim], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for raw in rows {
            out.push(serde_json::from_str(&raw?)?);
        }
        Ok(out)
    }

    pub fn remove_sender(&self, id: i64) -> Result<bool, StoreError> {
        let removed = self.conn.execute("DELETE FROM senders WHERE id = ?1", params![id])?;
        Ok(removed > 0)
    }

    pub fn last_updated_at(&self, id: i64) -> Result<Option<i64>, StoreError> {
        let ts = self
            .conn
            .query_row("SELECT updated_at FROM senders WHERE id = ?1", params![id], |row| row.get(0))
            .optional()?;
        Ok(ts)
    }
}

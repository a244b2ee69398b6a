//! Response cache for immutable backend answers: log ranges below the
//! finality depth and block headers. Rows are scoped by endpoint so two
//! chains never share an entry.

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS responses (
    endpoint TEXT NOT NULL,
    request_hash TEXT NOT NULL,
    body TEXT NOT NULL,
    stored_utc INTEGER NOT NULL,
    PRIMARY KEY (endpoint, request_hash)
);
"#;

pub struct Cache {
    conn: Mutex<Connection>,
}

impl Cache {
    /// Open or create the cache file, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CacheError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        Self::init(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self, CacheError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, CacheError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// SHA-256 hex of the compact request body.
    pub fn request_hash(body: &Value) -> String {
        hex::encode(Sha256::digest(body.to_string().as_bytes()))
    }

    pub fn lookup(&self, endpoint: &str, body: &Value) -> Result<Option<String>, CacheError> {
        let hit = self
            .conn()
            .query_row(
                "SELECT body FROM responses WHERE endpoint = ?1 AND request_hash = ?2",
                params![endpoint, Self::request_hash(body)],
                |r| r.get::<_, String>(0),
            )
            .optional()?;
        Ok(hit)
    }

    pub fn store(&self, endpoint: &str, body: &Value, response: &str) -> Result<(), CacheError> {
        let stored = time::OffsetDateTime::now_utc().unix_timestamp();
        self.conn().execute(
            "INSERT OR REPLACE INTO responses (endpoint, request_hash, body, stored_utc) VALUES (?1, ?2, ?3, ?4)",
            params![endpoint, Self::request_hash(body), response, stored],
        )?;
        Ok(())
    }

    /// Cached responses for `endpoint`.
    pub fn entry_count(&self, endpoint: &str) -> Result<u64, CacheError> {
        let n: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM responses WHERE endpoint = ?1",
            [endpoint],
            |r| r.get(0),
        )?;
        Ok(u64::try_from(n).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn entries_are_scoped_by_endpoint() {
        let cache = Cache::in_memory().unwrap();
        let body = json!({"method":"eth_getLogs","params":[{"fromBlock":"0x1"}]});
        cache.store("http://127.0.0.1:8545/", &body, r#"{"result":[]}"#).unwrap();
        assert_eq!(
            cache.lookup("http://127.0.0.1:8545/", &body).unwrap().as_deref(),
            Some(r#"{"result":[]}"#)
        );
        assert!(cache.lookup("https://base.example/", &body).unwrap().is_none());
        assert_eq!(cache.entry_count("http://127.0.0.1:8545/").unwrap(), 1);
        assert_eq!(cache.entry_count("https://base.example/").unwrap(), 0);
    }

    #[test]
    fn store_replaces_and_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/vault_analytics.sqlite");
        let body = json!({"method":"eth_getBlockByNumber","params":["0x10",false]});
        {
            let cache = Cache::open(&path).unwrap();
            cache.store("e", &body, "old").unwrap();
            cache.store("e", &body, "new").unwrap();
        }
        let reopened = Cache::open(&path).unwrap();
        assert_eq!(reopened.lookup("e", &body).unwrap().as_deref(), Some("new"));
        assert_eq!(reopened.entry_count("e").unwrap(), 1);
    }

    #[test]
    fn request_hash_depends_on_body() {
        let a = Cache::request_hash(&json!({"method":"eth_blockNumber"}));
        assert_eq!(a.len(), 64);
        assert_ne!(a, Cache::request_hash(&json!({"method":"eth_chainId"})));
    }
}

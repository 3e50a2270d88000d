//! Persistent cache of raw provider responses.

use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

/// On-disk key-value store of raw provider response bodies, keyed by the
/// literal IP string (case-sensitive, no IPv6 normalization). Entries have
/// no TTL; they live until evicted or the store is wiped.
///
/// The store is opened once at startup and shared read/write by all lookup
/// calls. Cached bodies are reconstructible from the upstream provider, so
/// the connection runs with relaxed durability.
pub struct ResponseCache {
    conn: Mutex<Connection>,
}

impl ResponseCache {
    /// Open (or create) the store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> rusqlite::Result<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Open a store that lives only as long as the process. Used by tests
    /// and callers that want the cache semantics without persistence.
    pub fn open_in_memory() -> rusqlite::Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> rusqlite::Result<Self> {
        conn.query_row("PRAGMA journal_mode = WAL", [], |_row| Ok(()))?;
        conn.execute_batch("PRAGMA synchronous = OFF")?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS responses (ip TEXT PRIMARY KEY, body TEXT NOT NULL)",
            [],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Fetch the raw cached body for an IP, if present.
    pub fn get(&self, ip: &str) -> rusqlite::Result<Option<String>> {
        self.lock()
            .query_row(
                "SELECT body FROM responses WHERE ip = ?1",
                params![ip],
                |row| row.get(0),
            )
            .optional()
    }

    /// Store a raw response body, replacing any previous entry. Only
    /// parseable, error-free provider responses belong here; quota or
    /// malformed responses must never be written.
    pub fn put(&self, ip: &str, body: &str) -> rusqlite::Result<()> {
        self.lock().execute(
            "INSERT OR REPLACE INTO responses (ip, body) VALUES (?1, ?2)",
            params![ip, body],
        )?;
        Ok(())
    }

    /// Drop a single entry.
    pub fn evict(&self, ip: &str) -> rusqlite::Result<()> {
        self.lock()
            .execute("DELETE FROM responses WHERE ip = ?1", params![ip])?;
        Ok(())
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.lock()
            .query_row("SELECT COUNT(*) FROM responses", [], |row| {
                row.get::<_, i64>(0)
            })
            .map(|n| n as usize)
            .unwrap_or(0)
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every entry.
    pub fn clear(&self) -> rusqlite::Result<()> {
        self.lock().execute("DELETE FROM responses", [])?;
        Ok(())
    }
}

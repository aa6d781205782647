// Credential persistence backed by a key-value store

use anyhow::{anyhow, Context, Result};
use rusqlite::{Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use super::types::CredentialPair;

pub const ACCESS_TOKEN_KEY: &str = "accessToken";
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";

/// Synchronous string key-value storage.
///
/// Multi-key reads, writes and removals must be atomic: no reader may
/// observe a subset of the entries applied.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    /// Values for `keys`, in order, read from one snapshot
    fn get_all(&self, keys: &[&str]) -> Result<Vec<Option<String>>>;
    fn set_all(&self, entries: &[(&str, &str)]) -> Result<()>;
    fn remove_all(&self, keys: &[&str]) -> Result<()>;
}

/// SQLite key-value store using an `auth_kv` table
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database file
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create directory: {}", parent.display())
                })?;
            }
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database: {}", path.display()))?;
        Self::with_connection(conn)
    }

    /// Non-persistent database, mostly for tests
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory SQLite")?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS auth_kv (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
            [],
        )
        .context("Failed to create auth_kv table")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("SQLite connection lock poisoned"))
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.lock()?;
        conn.query_row("SELECT value FROM auth_kv WHERE key = ?", [key], |row| {
            row.get(0)
        })
        .optional()
        .with_context(|| format!("Failed to read {} from SQLite", key))
    }

    fn get_all(&self, keys: &[&str]) -> Result<Vec<Option<String>>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().context("Failed to begin transaction")?;
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            let value = tx
                .query_row("SELECT value FROM auth_kv WHERE key = ?", [*key], |row| {
                    row.get(0)
                })
                .optional()
                .with_context(|| format!("Failed to read {} from SQLite", key))?;
            values.push(value);
        }
        tx.commit().context("Failed to finish credential read")?;
        Ok(values)
    }

    fn set_all(&self, entries: &[(&str, &str)]) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().context("Failed to begin transaction")?;
        for (key, value) in entries {
            tx.execute(
                "INSERT INTO auth_kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                [*key, *value],
            )
            .with_context(|| format!("Failed to write {} to SQLite", key))?;
        }
        tx.commit().context("Failed to commit credential write")
    }

    fn remove_all(&self, keys: &[&str]) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().context("Failed to begin transaction")?;
        for key in keys {
            tx.execute("DELETE FROM auth_kv WHERE key = ?", [*key])
                .with_context(|| format!("Failed to delete {} from SQLite", key))?;
        }
        tx.commit().context("Failed to commit credential removal")
    }
}

/// In-process key-value store
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| anyhow!("Memory store lock poisoned"))?;
        Ok(entries.get(key).cloned())
    }

    fn get_all(&self, keys: &[&str]) -> Result<Vec<Option<String>>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| anyhow!("Memory store lock poisoned"))?;
        Ok(keys.iter().map(|key| entries.get(*key).cloned()).collect())
    }

    fn set_all(&self, new_entries: &[(&str, &str)]) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow!("Memory store lock poisoned"))?;
        for (key, value) in new_entries {
            entries.insert(key.to_string(), value.to_string());
        }
        Ok(())
    }

    fn remove_all(&self, keys: &[&str]) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow!("Memory store lock poisoned"))?;
        for key in keys {
            entries.remove(*key);
        }
        Ok(())
    }
}

/// Persisted access/refresh token pair.
///
/// Reads never fail: a storage error reads as "no credentials", which
/// leaves the client logged out.
pub struct CredentialStore {
    backend: Box<dyn KeyValueStore>,
}

impl CredentialStore {
    pub fn new(backend: impl KeyValueStore + 'static) -> Self {
        Self {
            backend: Box::new(backend),
        }
    }

    /// Store backed by a fresh `MemoryStore`
    pub fn in_memory() -> Self {
        Self::new(MemoryStore::new())
    }

    fn read(&self, key: &str) -> Option<String> {
        match self.backend.get(key) {
            Ok(value) => value.filter(|v| !v.is_empty()),
            Err(e) => {
                tracing::warn!("Credential read failed, treating as absent: {:#}", e);
                None
            }
        }
    }

    /// Both tokens, or `None` if either is missing.
    /// The two values always come from the same write.
    pub fn get(&self) -> Option<CredentialPair> {
        let values = match self.backend.get_all(&[ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY]) {
            Ok(values) => values,
            Err(e) => {
                tracing::warn!("Credential read failed, treating as absent: {:#}", e);
                return None;
            }
        };

        let mut tokens = values.into_iter().map(|v| v.filter(|v| !v.is_empty()));
        let access_token = tokens.next().flatten()?;
        let refresh_token = tokens.next().flatten()?;
        Some(CredentialPair {
            access_token,
            refresh_token,
        })
    }

    pub fn access_token(&self) -> Option<String> {
        self.read(ACCESS_TOKEN_KEY)
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.read(REFRESH_TOKEN_KEY)
    }

    /// Overwrite both tokens in one atomic write
    pub fn set(&self, pair: &CredentialPair) -> Result<()> {
        self.backend.set_all(&[
            (ACCESS_TOKEN_KEY, pair.access_token.as_str()),
            (REFRESH_TOKEN_KEY, pair.refresh_token.as_str()),
        ])
    }

    /// Remove both tokens
    pub fn clear(&self) -> Result<()> {
        self.backend
            .remove_all(&[ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY])
    }

    /// Presence check only; the token is not validated
    pub fn is_authenticated(&self) -> bool {
        self.access_token().is_some()
    }
}

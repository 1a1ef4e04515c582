//! Durable versioned store
//!
//! Integrity-checked, namespaced persistence for serializable values.
//! Every entry carries a logical version and a checksum of its payload;
//! a checksum mismatch on read means corruption and evicts the entry.
//!
//! The persistence medium (SQLite) may be unavailable: the host may run
//! on a read-only filesystem or a locked profile directory. Availability
//! is probed once when the store is opened; after a failed open every
//! operation short-circuits to a safe default so callers never need
//! medium-specific error handling.

use parking_lot::Mutex;
use rusqlite::{params, Connection, ErrorCode, OpenFlags};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use crate::error::{BoardsyncError, Result};
use crate::types::{now_millis, SyncConfig};

/// Soft quota reported by `storage_info`, in bytes.
///
/// The store does not enforce it; it exists so UI code can render a usage
/// gauge comparable to a browser storage quota.
const SOFT_QUOTA_BYTES: u64 = 5 * 1024 * 1024;

/// How the last conflict on an entry was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionTag {
    /// Local data kept, remote overwritten on next push
    Local,
    /// Remote data adopted, local divergence discarded
    Server,
    /// Shallow merge of both sides
    Merge,
}

impl ResolutionTag {
    fn as_str(self) -> &'static str {
        match self {
            ResolutionTag::Local => "local",
            ResolutionTag::Server => "server",
            ResolutionTag::Merge => "merge",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "local" => Some(ResolutionTag::Local),
            "server" => Some(ResolutionTag::Server),
            "merge" => Some(ResolutionTag::Merge),
            _ => None,
        }
    }
}

/// A stored value plus its sync metadata
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntry<T> {
    pub data: T,
    /// Logical version, monotonically non-decreasing per key
    pub version: i64,
    /// Millisecond timestamp of first write
    pub created_at: i64,
    /// Millisecond timestamp of last write
    pub last_modified: i64,
    /// Hex digest of the serialized payload
    pub checksum: String,
    /// True while the entry reflects a local mutation the remote has not
    /// confirmed
    pub is_offline: bool,
    /// Set when the last write resolved a conflict
    pub resolution: Option<ResolutionTag>,
}

/// Options for a store write
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    /// Logical version; defaults to the current millisecond timestamp
    pub version: Option<i64>,
    /// Mark the entry as an unconfirmed local mutation
    pub offline: bool,
    /// Record how a conflict was resolved
    pub resolution: Option<ResolutionTag>,
}

/// Best-effort usage accounting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageInfo {
    pub used: u64,
    pub available: u64,
    pub total: u64,
    pub item_count: usize,
}

/// Integrity-checked key/value store backed by SQLite.
///
/// All keys are namespaced with the configured prefix so several stores
/// can share one database file without colliding.
pub struct DurableStore {
    conn: Option<Arc<Mutex<Connection>>>,
    namespace: String,
    write_retries: u32,
    write_backoff: std::time::Duration,
}

impl DurableStore {
    /// Open or create the store at `path`.
    ///
    /// Never fails: if the database cannot be opened or migrated the store
    /// comes up degraded and every operation is a safe no-op.
    pub fn open<P: AsRef<Path>>(path: P, config: &SyncConfig) -> Self {
        let conn = match Self::create_connection(path.as_ref()) {
            Ok(conn) => Some(Arc::new(Mutex::new(conn))),
            Err(e) => {
                tracing::warn!("Durable store unavailable, running degraded: {}", e);
                None
            }
        };
        Self {
            conn,
            namespace: config.namespace.clone(),
            write_retries: config.store_write_retries.max(1),
            write_backoff: config.store_write_backoff,
        }
    }

    /// In-memory store for tests
    pub fn open_in_memory() -> Self {
        let config = SyncConfig::default();
        let conn = Connection::open_in_memory()
            .map_err(BoardsyncError::from)
            .and_then(|c| {
                Self::init_schema(&c)?;
                Ok(c)
            })
            .ok()
            .map(|c| Arc::new(Mutex::new(c)));
        Self {
            conn,
            namespace: config.namespace,
            write_retries: config.store_write_retries,
            write_backoff: config.store_write_backoff,
        }
    }

    /// A store whose medium is permanently unavailable.
    ///
    /// Used to exercise degraded-mode behavior without a broken filesystem.
    pub fn degraded() -> Self {
        let config = SyncConfig::default();
        Self {
            conn: None,
            namespace: config.namespace,
            write_retries: config.store_write_retries,
            write_backoff: config.store_write_backoff,
        }
    }

    fn create_connection(path: &Path) -> Result<Connection> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(path, flags)?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA busy_timeout=5000;
            "#,
        )?;
        Self::init_schema(&conn)?;
        Ok(conn)
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS entries (
                key TEXT PRIMARY KEY,
                payload TEXT NOT NULL,
                version INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                last_modified INTEGER NOT NULL,
                checksum TEXT NOT NULL,
                is_offline INTEGER NOT NULL DEFAULT 0,
                resolution TEXT
            );
            "#,
        )?;
        Ok(())
    }

    /// True when the persistence medium opened successfully
    pub fn is_available(&self) -> bool {
        self.conn.is_some()
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}:{}", self.namespace, key)
    }

    /// Checksum of a serialized payload: truncated hex SHA-256
    fn checksum(payload: &str) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(payload.as_bytes());
        hex::encode(hasher.finalize())[..16].to_string()
    }

    fn is_transient(err: &rusqlite::Error) -> bool {
        matches!(
            err,
            rusqlite::Error::SqliteFailure(e, _)
                if e.code == ErrorCode::DatabaseBusy || e.code == ErrorCode::DatabaseLocked
        )
    }

    /// Write an entry, computing its checksum atomically with the payload.
    ///
    /// Retries transient (busy/locked) failures a bounded number of times
    /// with a fixed backoff. Exhaustion surfaces as an error: a silently
    /// lost write would corrupt the caller's queue accounting.
    pub async fn put<T: Serialize>(&self, key: &str, data: &T, opts: WriteOptions) -> Result<()> {
        let Some(conn) = &self.conn else {
            return Ok(());
        };

        let payload = serde_json::to_string(data)?;
        let checksum = Self::checksum(&payload);
        let now = now_millis();
        let version = opts.version.unwrap_or(now);
        let full_key = self.full_key(key);
        let resolution = opts.resolution.map(ResolutionTag::as_str);

        let mut last_err: Option<rusqlite::Error> = None;
        for attempt in 1..=self.write_retries {
            let result = {
                let conn = conn.lock();
                conn.execute(
                    "INSERT INTO entries
                        (key, payload, version, created_at, last_modified, checksum, is_offline, resolution)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                     ON CONFLICT(key) DO UPDATE SET
                        payload = excluded.payload,
                        version = excluded.version,
                        last_modified = excluded.last_modified,
                        checksum = excluded.checksum,
                        is_offline = excluded.is_offline,
                        resolution = excluded.resolution",
                    params![
                        full_key,
                        payload,
                        version,
                        now,
                        now,
                        checksum,
                        opts.offline as i64,
                        resolution,
                    ],
                )
            };

            match result {
                Ok(_) => return Ok(()),
                Err(e) if Self::is_transient(&e) && attempt < self.write_retries => {
                    tracing::debug!("Store write busy for {} (attempt {}), retrying", key, attempt);
                    last_err = Some(e);
                    tokio::time::sleep(self.write_backoff).await;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(BoardsyncError::WriteExhausted {
            attempts: self.write_retries,
            message: last_err
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
        })
    }

    /// Read an entry, verifying its checksum.
    ///
    /// Corruption (checksum mismatch or an undeserializable payload) evicts
    /// the key and reads as absent; the read path never throws for it.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<StoredEntry<T>>> {
        let Some(conn) = &self.conn else {
            return Ok(None);
        };
        let full_key = self.full_key(key);

        let row = {
            let conn = conn.lock();
            conn.query_row(
                "SELECT payload, version, created_at, last_modified, checksum, is_offline, resolution
                 FROM entries WHERE key = ?1",
                params![full_key],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, i64>(5)?,
                        row.get::<_, Option<String>>(6)?,
                    ))
                },
            )
        };

        let (payload, version, created_at, last_modified, checksum, is_offline, resolution) =
            match row {
                Ok(row) => row,
                Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
                Err(e) => return Err(e.into()),
            };

        if Self::checksum(&payload) != checksum {
            tracing::debug!("Checksum mismatch for {}, evicting corrupted entry", key);
            self.remove(key)?;
            return Ok(None);
        }

        let data: T = match serde_json::from_str(&payload) {
            Ok(data) => data,
            Err(e) => {
                tracing::debug!("Undeserializable payload for {}, evicting: {}", key, e);
                self.remove(key)?;
                return Ok(None);
            }
        };

        Ok(Some(StoredEntry {
            data,
            version,
            created_at,
            last_modified,
            checksum,
            is_offline: is_offline != 0,
            resolution: resolution.as_deref().and_then(ResolutionTag::parse),
        }))
    }

    /// Remove an entry. No-op when the key is absent or the store degraded.
    pub fn remove(&self, key: &str) -> Result<()> {
        let Some(conn) = &self.conn else {
            return Ok(());
        };
        let conn = conn.lock();
        conn.execute("DELETE FROM entries WHERE key = ?1", params![self.full_key(key)])?;
        Ok(())
    }

    /// Rename an entry in place, preserving its metadata.
    ///
    /// Used to rewrite a temp id to its server-assigned id. Returns false
    /// when the source key does not exist.
    pub fn rename(&self, from: &str, to: &str) -> Result<bool> {
        let Some(conn) = &self.conn else {
            return Ok(false);
        };
        let conn = conn.lock();
        let changed = conn.execute(
            "UPDATE entries SET key = ?2 WHERE key = ?1",
            params![self.full_key(from), self.full_key(to)],
        )?;
        Ok(changed > 0)
    }

    /// Check if a key exists without reading its payload
    pub fn exists(&self, key: &str) -> bool {
        let Some(conn) = &self.conn else {
            return false;
        };
        let conn = conn.lock();
        conn.query_row(
            "SELECT 1 FROM entries WHERE key = ?1",
            params![self.full_key(key)],
            |_| Ok(()),
        )
        .is_ok()
    }

    /// List keys, optionally filtered by prefix, in insertion-time order
    pub fn keys(&self, prefix: Option<&str>) -> Vec<String> {
        let Some(conn) = &self.conn else {
            return Vec::new();
        };
        let ns = format!("{}:", self.namespace);
        let pattern = format!("{}{}%", ns, prefix.unwrap_or(""));
        let conn = conn.lock();
        let mut stmt = match conn
            .prepare("SELECT key FROM entries WHERE key LIKE ?1 ORDER BY created_at, key")
        {
            Ok(stmt) => stmt,
            Err(_) => return Vec::new(),
        };
        let rows = stmt
            .query_map(params![pattern], |row| row.get::<_, String>(0))
            .map(|rows| rows.filter_map(|r| r.ok()).collect::<Vec<_>>())
            .unwrap_or_default();
        rows.into_iter()
            .filter_map(|k| k.strip_prefix(&ns).map(str::to_string))
            .collect()
    }

    /// Remove every entry in this store's namespace
    pub fn clear(&self) -> Result<()> {
        let Some(conn) = &self.conn else {
            return Ok(());
        };
        let conn = conn.lock();
        conn.execute(
            "DELETE FROM entries WHERE key LIKE ?1",
            params![format!("{}:%", self.namespace)],
        )?;
        Ok(())
    }

    /// Best-effort usage accounting; all zeros when degraded
    pub fn storage_info(&self) -> StorageInfo {
        let Some(conn) = &self.conn else {
            return StorageInfo::default();
        };
        let conn = conn.lock();
        let (used, count): (u64, usize) = conn
            .query_row(
                "SELECT COALESCE(SUM(LENGTH(payload)), 0), COUNT(*)
                 FROM entries WHERE key LIKE ?1",
                params![format!("{}:%", self.namespace)],
                |row| Ok((row.get::<_, i64>(0)? as u64, row.get::<_, i64>(1)? as usize)),
            )
            .unwrap_or((0, 0));

        StorageInfo {
            used,
            available: SOFT_QUOTA_BYTES.saturating_sub(used),
            total: SOFT_QUOTA_BYTES,
            item_count: count,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_connection<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&Connection) -> T,
    {
        let conn = self.conn.as_ref().expect("store degraded");
        let conn = conn.lock();
        f(&conn)
    }
}

//! Per-dataset SQLite handle.
//!
//! Each dataset owns exactly one connection; a mutex serializes every
//! operation against it, which is the whole concurrency story for a
//! single dataset. Distinct datasets never share a connection.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::Connection;
use tracing::debug;

use crate::error::StagingError;

#[derive(Clone)]
pub struct DatasetStore {
    conn: Arc<Mutex<Connection>>,
}

impl DatasetStore {
    /// Open an in-memory store, the normal backing for a staged dataset.
    pub fn in_memory() -> Result<Self, StagingError> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    /// Open a file-backed store.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StagingError> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, StagingError> {
        conn.execute_batch("PRAGMA temp_store = MEMORY;")?;
        conn.execute_batch("PRAGMA busy_timeout = 5000;")?;
        debug!("dataset store opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a closure against the connection.
    pub fn with_connection<F, T>(&self, f: F) -> Result<T, StagingError>
    where
        F: FnOnce(&Connection) -> Result<T, StagingError>,
    {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Run a closure with mutable access, required for transactions.
    pub fn with_connection_mut<F, T>(&self, f: F) -> Result<T, StagingError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StagingError>,
    {
        let mut conn = self.conn.lock();
        f(&mut conn)
    }

    /// Names of user tables, excluding SQLite internals and the chunk
    /// side-table.
    pub fn table_names(&self) -> Result<Vec<String>, StagingError> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT name FROM sqlite_master \
                 WHERE type = 'table' AND name NOT LIKE 'sqlite_%' AND name != ?1 \
                 ORDER BY name",
            )?;
            let rows = stmt.query_map([crate::chunking::CHUNK_TABLE], |row| row.get(0))?;
            let mut names = Vec::new();
            for name in rows {
                names.push(name?);
            }
            Ok(names)
        })
    }

    pub fn row_count(&self, table: &str) -> Result<u64, StagingError> {
        self.with_connection(|conn| {
            let count: i64 = conn.query_row(
                &format!(
                    "SELECT COUNT(*) FROM {}",
                    crate::naming::quote_identifier(table)
                ),
                [],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }

    /// Page-level size statistics for the dataset.
    pub fn stats(&self) -> Result<StoreStats, StagingError> {
        self.with_connection(|conn| {
            let page_count: i64 = conn.query_row("PRAGMA page_count;", [], |row| row.get(0))?;
            let page_size: i64 = conn.query_row("PRAGMA page_size;", [], |row| row.get(0))?;
            Ok(StoreStats {
                page_count: page_count as u64,
                page_size: page_size as u64,
                total_size_bytes: (page_count * page_size) as u64,
            })
        })
    }
}

#[derive(Debug, Clone)]
pub struct StoreStats {
    pub page_count: u64,
    pub page_size: u64,
    pub total_size_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_store_answers_queries() {
        let store = DatasetStore::in_memory().expect("store");
        store
            .with_connection(|conn| {
                let sum: i64 = conn.query_row("SELECT 1 + 1", [], |row| row.get(0))?;
                assert_eq!(sum, 2);
                Ok(())
            })
            .expect("query");
    }

    #[test]
    fn file_backed_store_opens() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = DatasetStore::open(dir.path().join("staged.db")).expect("store");
        let stats = store.stats().expect("stats");
        assert!(stats.page_size > 0);
    }

    #[test]
    fn table_names_skips_internals() {
        let store = DatasetStore::in_memory().expect("store");
        store
            .with_connection(|conn| {
                conn.execute_batch(
                    "CREATE TABLE gene (id INTEGER PRIMARY KEY); \
                     CREATE TABLE chunked_values (row_id TEXT);",
                )?;
                Ok(())
            })
            .expect("create");
        assert_eq!(store.table_names().expect("names"), vec!["gene"]);
    }
}

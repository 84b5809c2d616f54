//! Database connection management

use crate::error::{Error, Result};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

const SCHEMA: &str = include_str!("../../../../migrations/001_initial.sql");

/// Directory holding the settings database and, by default, the library files
pub fn app_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("org.kiwix.desktop")
}

/// Get the database path
pub fn get_db_path() -> PathBuf {
    let data_dir = app_data_dir();
    std::fs::create_dir_all(&data_dir).ok();
    data_dir.join("kiwix-desktop.db")
}

/// Initialize the database with schema at the default location
pub fn init_database() -> Result<Database> {
    init_database_at(&get_db_path())
}

/// Initialize the database with schema at `path`
pub fn init_database_at(path: &Path) -> Result<Database> {
    log::info!("Initializing database at: {:?}", path);

    let conn = Connection::open(path)?;
    Database::with_schema(conn)
}

/// Database wrapper with thread-safe connection
#[derive(Clone, Debug)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Transient database, used by tests and when the data dir is unusable
    pub fn in_memory() -> Result<Self> {
        Self::with_schema(Connection::open_in_memory()?)
    }

    fn with_schema(conn: Connection) -> Result<Self> {
        // Run migrations
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Execute a function with the database connection
    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let conn = self.conn.lock().map_err(|e| {
            Error::Database(format!("Failed to lock database: {}", e))
        })?;
        f(&conn).map_err(Into::into)
    }
}

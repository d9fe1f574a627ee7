//! Engine creation: the connection source every session checks out from.

use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::OpenFlags;
use thiserror::Error;

use crate::schema::apply_schema;

/// Path that selects a private in-memory SQLite database.
const MEMORY_PATH: &str = ":memory:";

/// Runtime tunables for SQLite connection behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbRuntimeSettings {
    /// Busy timeout for SQLite connections, in milliseconds.
    pub busy_timeout_ms: u64,

    /// Maximum number of pooled SQLite connections.
    pub pool_max_size: u32,

    /// Run the embedded schema script on every new connection.
    pub bootstrap_schema: bool,
}

impl Default for DbRuntimeSettings {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
            pool_max_size: 4,
            bootstrap_schema: true,
        }
    }
}

/// The engine handle: a pool of SQLite connections.
pub type DbPool = Pool<SqliteConnectionManager>;

/// Errors that can occur when creating the engine.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Failed to build the connection pool.
    #[error("failed to create database engine: {0}")]
    PoolInit(#[from] r2d2::Error),
}

/// Strips an optional `sqlite://` or `sqlite:` scheme from a connection string.
pub fn database_path(database_url: &str) -> &str {
    database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))
        .unwrap_or(database_url)
}

/// Creates the engine for `database_url` with WAL mode and foreign keys enabled.
///
/// `:memory:` gets a single connection that is never recycled, so the
/// database survives between sessions for the lifetime of the engine.
///
/// # Errors
///
/// Returns `PoolError::PoolInit` if the pool cannot be created, including
/// when the first connection fails its initializer.
pub fn create_pool(database_url: &str, settings: DbRuntimeSettings) -> Result<DbPool, PoolError> {
    let path = database_path(database_url);
    let in_memory = path == MEMORY_PATH;

    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;

    let manager = SqliteConnectionManager::file(path)
        .with_flags(flags)
        .with_init(move |conn| {
            // In-memory databases report "memory", which is acceptable.
            let journal_mode: String =
                conn.query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))?;
            if journal_mode != "wal" && journal_mode != "memory" {
                return Err(rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
                    Some(format!(
                        "failed to set WAL journal mode, got: {}",
                        journal_mode
                    )),
                ));
            }
            conn.execute_batch(&format!(
                "PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = {};",
                settings.busy_timeout_ms
            ))?;
            if settings.bootstrap_schema {
                apply_schema(conn)?;
            }
            Ok(())
        });

    let builder = Pool::builder();
    let builder = if in_memory {
        builder
            .max_size(1)
            .idle_timeout(None)
            .max_lifetime(None)
    } else {
        builder
            .max_size(settings.pool_max_size)
            .connection_timeout(Duration::from_millis(settings.busy_timeout_ms.max(1_000)))
    };

    let pool = builder.build(manager)?;
    tracing::info!(path, in_memory, max_size = pool.max_size(), "database engine created");

    Ok(pool)
}

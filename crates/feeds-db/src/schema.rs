//! Embedded schema bootstrap.
//!
//! The schema script is compiled into the binary and written with
//! `CREATE ... IF NOT EXISTS`, so applying it to an existing database is a
//! no-op. There is no version tracking: the script describes the single
//! current layout of the feed catalogue.

use rusqlite::Connection;

/// The schema script applied to every new connection when bootstrapping is on.
const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Creates the feed catalogue tables if they do not exist yet.
///
/// # Errors
///
/// Returns the underlying `rusqlite::Error` if any statement fails.
pub fn apply_schema(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    tracing::debug!("feed catalogue schema applied");
    Ok(())
}

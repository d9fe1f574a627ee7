//! Data-access layer for the Mobility Feeds catalogue.
//!
//! [`Database`] is a session manager: it lazily creates a SQLite engine
//! (an `r2d2` pool) from its connection string and hands every caller the
//! same unit-of-work [`Session`] until that session is closed. Reads go
//! through [`Select`] descriptors, writes are merged into the session and
//! written on flush or commit.
//!
//! # Design decisions
//!
//! - **Explicit handle, not a global**: callers own a `Database` (usually in
//!   an `Arc`) and share it; there is no process-wide singleton.
//! - **One shared session**: session creation is serialized by a mutex, and
//!   `close_session` only closes when `SHOULD_CLOSE_DB_SESSION` is `true`.
//!   `commit` always closes.
//! - **Typed relationships**: a [`Relationship`] carries its own append
//!   function, so attaching a child never looks a field up by name.
//! - **Embedded schema**: the table script is compiled in and applied by the
//!   engine's connection initializer.

mod config;
mod database;
mod error;
mod models;
mod pool;
mod query;
mod record;
mod schema;
mod session;

pub use config::{parse_close_flag, DbConfig, CLOSE_SESSION_ENV, DATABASE_URL_ENV};
pub use database::{Database, MergeOptions, RelationshipOptions, SessionScope};
pub use error::{DbError, ErrorKind};
pub use models::{ExternalId, Feed, Location};
pub use pool::{create_pool, database_path, DbPool, DbRuntimeSettings, PoolError};
pub use query::{group_sorted, Condition, Operator, Select};
pub use record::{save, IntoValue, Model, Record, Relationship};
pub use schema::apply_schema;
pub use session::{ObjectState, Session};

pub use rusqlite::types::Value;

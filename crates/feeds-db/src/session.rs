//! The unit-of-work session.
//!
//! A session checks out one connection from the engine and keeps it until
//! it is closed. Entities merged into it are tracked in an identity map
//! keyed by table and primary key; each remembers whether storage already
//! holds it (`Persistent`) or not (`New`). Flushing writes every pending
//! entity inside the session transaction, committing ends the transaction
//! and detaches what it wrote, and closing rolls back whatever was not
//! committed and detaches everything.
//!
//! All state sits behind one mutex. Statements issued through the same
//! session are therefore serialized; the connection itself is not `Sync`.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use r2d2::PooledConnection;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Value;
use rusqlite::Connection;

use crate::error::DbError;
use crate::pool::DbPool;
use crate::query::{mark_unloaded, Condition, Select};
use crate::record::{self, quote_ident, render_key, Model, Record};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Savepoint that makes each flush all-or-nothing inside the session transaction.
const FLUSH_SAVEPOINT: &str = "feeds_flush";

/// Whether storage already holds a tracked entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectState {
    /// Merged but not yet written; listed by `select_from_active_session`.
    New,
    /// Known to storage, either loaded or flushed.
    Persistent,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ObjectKey {
    table: &'static str,
    key: String,
}

impl ObjectKey {
    fn of<M: Model>(key_values: &[Value]) -> Self {
        Self {
            table: M::TABLE,
            key: render_key(key_values),
        }
    }
}

/// Type-erased view of a tracked model.
trait Entity: Send {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn write(&self, conn: &Connection) -> rusqlite::Result<()>;
}

impl<M: Model> Entity for M {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn write(&self, conn: &Connection) -> rusqlite::Result<()> {
        record::save(conn, self)
    }
}

struct TrackedObject {
    entity: Box<dyn Entity>,
    state: ObjectState,
}

struct SessionInner {
    conn: Option<PooledConnection<SqliteConnectionManager>>,
    identity_map: HashMap<ObjectKey, TrackedObject>,
    /// Keys awaiting a write, in merge order.
    pending: Vec<ObjectKey>,
}

impl SessionInner {
    fn conn(&self) -> Result<&Connection, DbError> {
        self.conn.as_deref().ok_or(DbError::NoActiveSession)
    }
}

/// A unit-of-work session bound to one engine connection.
pub struct Session {
    id: u64,
    inner: Mutex<SessionInner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

impl Session {
    /// Checks out a connection and opens a session on it.
    pub(crate) fn open(engine: &DbPool) -> Result<Self, DbError> {
        let conn = engine.get()?;
        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        tracing::info!(session_id = id, "database session opened");
        Ok(Self {
            id,
            inner: Mutex::new(SessionInner {
                conn: Some(conn),
                identity_map: HashMap::new(),
                pending: Vec::new(),
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Process-unique identifier, for logs.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether the session still holds its connection.
    pub fn is_active(&self) -> bool {
        self.lock().conn.is_some()
    }

    /// Number of entities in the identity map.
    pub fn tracked_count(&self) -> usize {
        self.lock().identity_map.len()
    }

    /// Number of entities awaiting a flush.
    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    /// State of the tracked entity with `entity`'s identity, if tracked.
    pub fn state_of<M: Model>(&self, entity: &M) -> Option<ObjectState> {
        let key = ObjectKey::of::<M>(&entity.key_values());
        self.lock().identity_map.get(&key).map(|tracked| tracked.state)
    }

    /// Whether a database transaction is open on the session connection.
    pub fn in_transaction(&self) -> bool {
        self.lock()
            .conn
            .as_deref()
            .is_some_and(|conn| !conn.is_autocommit())
    }

    /// Rolls back uncommitted work, detaches every entity and returns the
    /// connection to the engine. Closing twice is a no-op.
    pub fn close(&self) {
        let mut inner = self.lock();
        let Some(conn) = inner.conn.take() else {
            return;
        };
        if !conn.is_autocommit() {
            if let Err(e) = conn.execute_batch("ROLLBACK") {
                tracing::warn!(session_id = self.id, error = %e, "rollback on close failed");
            }
        }
        let detached = inner.identity_map.len();
        inner.identity_map.clear();
        inner.pending.clear();
        tracing::info!(session_id = self.id, detached, "database session closed");
    }

    /// Runs `f` against the session connection.
    ///
    /// # Errors
    ///
    /// `NoActiveSession` if the session is closed, or the error `f` returns.
    pub fn with_connection<R>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<R>,
    ) -> Result<R, DbError> {
        let inner = self.lock();
        let conn = inner.conn()?;
        Ok(f(conn)?)
    }

    /// Executes `query` and converts every row to `M`, loading related
    /// collections.
    pub fn query<M: Model>(&self, query: &Select<M>) -> Result<Vec<M>, DbError> {
        let (sql, params) = query.to_sql()?;
        let inner = self.lock();
        let conn = inner.conn()?;
        tracing::debug!(session_id = self.id, %sql, "executing select");

        let mut stmt = conn.prepare(&sql)?;
        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let rows = stmt.query_map(rusqlite::params_from_iter(params), |row| {
            Record::from_row(row, &names)
        })?;

        let loaded = query.projection();
        let mut entities = Vec::new();
        for row in rows {
            let mut entity = M::from_record(&row?)?;
            if let Some(loaded) = &loaded {
                mark_unloaded(&mut entity, loaded)?;
            }
            entity.load_related(conn)?;
            entities.push(entity);
        }
        Ok(entities)
    }

    /// Attaches `entity` to the session.
    ///
    /// An identity already tracked has its state replaced and keeps its
    /// `New`/`Persistent` status. Otherwise, with `load` the storage is
    /// asked whether the key exists; without it the entity is trusted to be
    /// persistent already.
    pub fn track<M: Model>(&self, entity: M, load: bool) -> Result<ObjectState, DbError> {
        let key_values = entity.key_values();
        if key_values.iter().any(|value| *value == Value::Null) {
            return Err(DbError::Merge(format!(
                "{} entity has an empty primary key",
                M::TABLE
            )));
        }
        let key = ObjectKey::of::<M>(&key_values);

        let mut guard = self.lock();
        let inner = &mut *guard;
        let conn = inner.conn.as_deref().ok_or(DbError::NoActiveSession)?;

        if let Some(tracked) = inner.identity_map.get_mut(&key) {
            tracked.entity = Box::new(entity);
            if !inner.pending.contains(&key) {
                inner.pending.push(key);
            }
            return Ok(tracked.state);
        }

        let state = if load && !exists::<M>(conn, &key_values)? {
            ObjectState::New
        } else {
            ObjectState::Persistent
        };
        tracing::debug!(session_id = self.id, table = M::TABLE, key = %key.key, ?state, "entity merged");

        inner.identity_map.insert(
            key.clone(),
            TrackedObject {
                entity: Box::new(entity),
                state,
            },
        );
        inner.pending.push(key);
        Ok(state)
    }

    /// Writes every pending entity inside the session transaction.
    ///
    /// The transaction is opened on first use and stays open. A failed
    /// flush leaves no partial writes and keeps the pending list intact.
    pub fn flush(&self) -> Result<usize, DbError> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let conn = inner.conn.as_deref().ok_or(DbError::NoActiveSession)?;

        if inner.pending.is_empty() {
            return Ok(0);
        }
        if conn.is_autocommit() {
            conn.execute_batch("BEGIN")?;
        }
        conn.execute_batch(&format!("SAVEPOINT {FLUSH_SAVEPOINT}"))?;

        let written = inner.pending.iter().try_for_each(|key| {
            match inner.identity_map.get(key) {
                Some(tracked) => tracked.entity.write(conn),
                None => Ok(()),
            }
        });
        if let Err(e) = written {
            if let Err(rollback) = conn.execute_batch(&format!(
                "ROLLBACK TO {FLUSH_SAVEPOINT}; RELEASE {FLUSH_SAVEPOINT}"
            )) {
                tracing::warn!(session_id = self.id, error = %rollback, "flush rollback failed");
            }
            return Err(e.into());
        }
        conn.execute_batch(&format!("RELEASE {FLUSH_SAVEPOINT}"))?;

        let flushed = inner.pending.len();
        for key in inner.pending.drain(..) {
            if let Some(tracked) = inner.identity_map.get_mut(&key) {
                tracked.state = ObjectState::Persistent;
            }
        }
        tracing::debug!(session_id = self.id, flushed, "session flushed");
        Ok(flushed)
    }

    /// Flushes, then commits the session transaction if one is open.
    ///
    /// Committed entities are detached, so the identity map only holds work
    /// that is still uncommitted.
    pub fn commit(&self) -> Result<(), DbError> {
        self.flush()?;
        let mut inner = self.lock();
        let conn = inner.conn()?;
        if !conn.is_autocommit() {
            conn.execute_batch("COMMIT")?;
        }
        let detached = inner.identity_map.len();
        inner.identity_map.clear();
        tracing::debug!(session_id = self.id, detached, "session committed");
        Ok(())
    }

    /// Clones of the `New` entities of type `M`, in merge order.
    pub fn new_objects<M: Model>(&self) -> Result<Vec<M>, DbError> {
        let inner = self.lock();
        inner.conn()?;
        Ok(inner
            .pending
            .iter()
            .filter_map(|key| inner.identity_map.get(key))
            .filter(|tracked| tracked.state == ObjectState::New)
            .filter_map(|tracked| tracked.entity.as_any().downcast_ref::<M>())
            .cloned()
            .collect())
    }

    /// Applies `f` in place to the first `New` entity of type `M` matching
    /// every condition. Returns `None` when nothing matches.
    pub fn with_new_mut<M, R>(
        &self,
        conditions: &[Condition],
        f: impl FnOnce(&mut M) -> R,
    ) -> Result<Option<R>, DbError>
    where
        M: Model,
    {
        let mut guard = self.lock();
        let inner = &mut *guard;
        inner.conn()?;

        let mut found: Option<ObjectKey> = None;
        for key in &inner.pending {
            let Some(tracked) = inner.identity_map.get(key) else {
                continue;
            };
            if tracked.state != ObjectState::New {
                continue;
            }
            let Some(entity) = tracked.entity.as_any().downcast_ref::<M>() else {
                continue;
            };
            if matches_all(entity, conditions)? {
                found = Some(key.clone());
                break;
            }
        }

        let entity = found
            .and_then(|key| inner.identity_map.get_mut(&key))
            .and_then(|tracked| tracked.entity.as_any_mut().downcast_mut::<M>());
        Ok(entity.map(f))
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

/// Whether `entity` satisfies every equality condition.
pub(crate) fn matches_all<M: Model>(entity: &M, conditions: &[Condition]) -> Result<bool, DbError> {
    if conditions.is_empty() {
        return Ok(true);
    }
    let record = entity.to_record();
    for condition in conditions {
        if !condition.matches(&record)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn exists<M: Model>(conn: &Connection, key_values: &[Value]) -> rusqlite::Result<bool> {
    let clauses: Vec<String> = M::PRIMARY_KEY
        .iter()
        .enumerate()
        .map(|(idx, column)| format!("{} = ?{}", quote_ident(column), idx + 1))
        .collect();
    let sql = format!(
        "SELECT EXISTS(SELECT 1 FROM {} WHERE {})",
        quote_ident(M::TABLE),
        clauses.join(" AND ")
    );
    conn.query_row(&sql, rusqlite::params_from_iter(key_values), |row| row.get(0))
}

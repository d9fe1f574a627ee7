//! The session manager.
//!
//! [`Database`] owns the engine and at most one shared [`Session`]. Every
//! caller that starts a session while one is active gets the same session
//! back; a new one is created only after the previous one was closed.
//! Whether `close_session` really closes is decided by configuration, which
//! lets deployments keep one long-lived session or release it after each
//! unit of work. The manager counts live [`SessionScope`]s; a session still
//! used by a scope is closed only once the last of them ends.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rusqlite::types::Value;

use crate::config::DbConfig;
use crate::error::DbError;
use crate::pool::{create_pool, DbPool};
use crate::query::{group_sorted, mark_unloaded, project, Condition, Select};
use crate::record::{render_key, Model, Relationship};
use crate::session::{matches_all, Session};

/// Options for [`Database::merge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeOptions {
    /// Start (or reuse) the session before merging. When false an active
    /// session is required.
    pub update_session: bool,
    /// Commit the session after merging. The session stays open.
    pub auto_commit: bool,
    /// Query storage by primary key to decide whether the entity is new.
    pub load: bool,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            update_session: false,
            auto_commit: false,
            load: true,
        }
    }
}

impl MergeOptions {
    /// Sets [`MergeOptions::update_session`].
    pub fn update_session(mut self, update_session: bool) -> Self {
        self.update_session = update_session;
        self
    }

    /// Sets [`MergeOptions::auto_commit`].
    pub fn auto_commit(mut self, auto_commit: bool) -> Self {
        self.auto_commit = auto_commit;
        self
    }

    /// Sets [`MergeOptions::load`].
    pub fn load(mut self, load: bool) -> Self {
        self.load = load;
        self
    }
}

/// Options for [`Database::merge_relationship`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelationshipOptions {
    /// Start (or reuse) the session for the parent lookup and merge.
    pub update_session: bool,
    /// Commit after merging the parent back.
    pub auto_commit: bool,
    /// Look for the parent among the active session's new entities and
    /// modify it in place instead of selecting and merging.
    pub uncommitted: bool,
}

struct ManagerState {
    engine: Option<DbPool>,
    session: Option<Arc<Session>>,
    /// Live `SessionScope`s on the stored session.
    scopes: usize,
}

/// Session manager over a single engine.
pub struct Database {
    config: DbConfig,
    state: Mutex<ManagerState>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("config", &self.config)
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Guard returned by [`Database::scope`]. Dropping it releases the session
/// according to the close policy on every exit path, once no other scope
/// is using it.
#[derive(Debug)]
pub struct SessionScope<'a> {
    database: &'a Database,
    session: Arc<Session>,
}

impl SessionScope<'_> {
    /// The session this scope runs in.
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }
}

impl std::ops::Deref for SessionScope<'_> {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.session
    }
}

impl Drop for SessionScope<'_> {
    fn drop(&mut self) {
        self.database.release_scope(&self.session);
    }
}

impl Database {
    /// Creates a manager. Nothing is connected until the first session starts.
    pub fn new(config: DbConfig) -> Self {
        Self {
            config,
            state: Mutex::new(ManagerState {
                engine: None,
                session: None,
                scopes: 0,
            }),
        }
    }

    /// Creates a manager configured from the process environment.
    pub fn from_env() -> Self {
        Self::new(DbConfig::from_env())
    }

    /// The configuration this manager was built with.
    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    fn state(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// True when an engine or a session reference exists. This does not
    /// probe the connection.
    pub fn is_connected(&self) -> bool {
        let state = self.state();
        state.engine.is_some() || state.session.is_some()
    }

    /// Returns the active session, creating the engine and a new session
    /// when needed.
    ///
    /// # Errors
    ///
    /// `Configuration` when no connection string is set, `Engine` or
    /// `Checkout` when the engine cannot provide a connection.
    pub fn start_session(&self) -> Result<Arc<Session>, DbError> {
        self.start_locked(&mut self.state())
    }

    fn start_locked(&self, state: &mut ManagerState) -> Result<Arc<Session>, DbError> {
        if let Some(session) = state.session.as_ref().filter(|s| s.is_active()) {
            tracing::debug!(session_id = session.id(), "reusing active database session");
            return Ok(Arc::clone(session));
        }

        let Some(url) = self.config.database_url.as_deref() else {
            tracing::error!("database connection string is not set");
            return Err(DbError::Configuration(
                "database connection string is not set".to_string(),
            ));
        };

        if state.engine.is_none() {
            state.engine = Some(create_pool(url, self.config.runtime)?);
        }
        let engine = state
            .engine
            .as_ref()
            .ok_or_else(|| DbError::Configuration("engine unavailable".to_string()))?;

        let session = Arc::new(Session::open(engine)?);
        tracing::info!(session_id = session.id(), "database session started");
        state.session = Some(Arc::clone(&session));
        state.scopes = 0;
        Ok(session)
    }

    /// Closes the active session when the close-after-use policy is on and
    /// no [`SessionScope`] is using it.
    ///
    /// Returns [`Database::is_connected`] afterwards. Since the engine is
    /// kept, that is true once any session has been started.
    pub fn close_session(&self) -> bool {
        let state = self.state();
        if state.scopes == 0 {
            self.close_by_policy(&state);
        }
        state.engine.is_some() || state.session.is_some()
    }

    fn close_by_policy(&self, state: &ManagerState) {
        if self.config.close_after_use {
            if let Some(session) = state.session.as_ref().filter(|s| s.is_active()) {
                session.close();
            }
        }
    }

    fn release_scope(&self, session: &Arc<Session>) {
        let mut state = self.state();
        let stored = state
            .session
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, session));
        if !stored {
            return;
        }
        state.scopes = state.scopes.saturating_sub(1);
        if state.scopes == 0 {
            self.close_by_policy(&state);
        }
    }

    /// Starts (or reuses) the session for the lifetime of the returned guard.
    ///
    /// # Errors
    ///
    /// Same as [`Database::start_session`].
    pub fn scope(&self) -> Result<SessionScope<'_>, DbError> {
        let mut state = self.state();
        let session = self.start_locked(&mut state)?;
        state.scopes += 1;
        Ok(SessionScope {
            database: self,
            session,
        })
    }

    /// The stored session if it is active.
    pub fn active_session(&self) -> Option<Arc<Session>> {
        self.state()
            .session
            .as_ref()
            .filter(|s| s.is_active())
            .map(Arc::clone)
    }

    fn require_session(&self) -> Result<Arc<Session>, DbError> {
        self.active_session().ok_or(DbError::NoActiveSession)
    }

    /// Executes `query` and returns the matching entities.
    ///
    /// # Errors
    ///
    /// `Configuration` if a session cannot be started, `NoActiveSession`
    /// when the query does not update the session and none is active,
    /// `Query` for anything that fails while reading.
    pub fn select<M: Model>(&self, query: &Select<M>) -> Result<Vec<M>, DbError> {
        let result = if query.updates_session() {
            self.scope().and_then(|scope| scope.query(query))
        } else {
            self.require_session().and_then(|session| session.query(query))
        };
        result.map_err(|e| {
            let e = e.into_query();
            tracing::error!(table = M::TABLE, error = %e, "select failed");
            e
        })
    }

    /// Executes `query` and partitions the ordered result into runs of
    /// consecutive equal `key`.
    ///
    /// # Errors
    ///
    /// Same as [`Database::select`].
    pub fn select_grouped<M, K, F>(&self, query: &Select<M>, key: F) -> Result<Vec<Vec<M>>, DbError>
    where
        M: Model,
        K: PartialEq,
        F: Fn(&M) -> K,
    {
        Ok(group_sorted(self.select(query)?, key))
    }

    /// Lists the active session's new entities of type `M` that satisfy
    /// every equality condition, optionally projected onto `attributes`.
    ///
    /// # Errors
    ///
    /// `NoActiveSession` without an active session; `Query` for unknown
    /// columns or non-equality conditions.
    pub fn select_from_active_session<M: Model>(
        &self,
        conditions: &[Condition],
        attributes: Option<&[&str]>,
    ) -> Result<Vec<M>, DbError> {
        let session = self.require_session()?;
        let columns = match attributes {
            Some(attributes) => {
                let attributes = validated::<M>(attributes)?;
                Some(project::<M>(&attributes))
            }
            None => None,
        };
        if let Some(unknown) = conditions
            .iter()
            .map(Condition::column)
            .find(|column| !M::COLUMNS.contains(column))
        {
            return Err(DbError::Query(format!("{} has no column {unknown}", M::TABLE)));
        }

        let mut selected = Vec::new();
        for entity in session.new_objects::<M>()? {
            if !matches_all(&entity, conditions)? {
                continue;
            }
            match &columns {
                Some(columns) => {
                    let mut record = entity.to_record();
                    record.retain_columns(columns);
                    let mut projected = M::from_record(&record)?;
                    mark_unloaded(&mut projected, columns)?;
                    selected.push(projected);
                }
                None => selected.push(entity),
            }
        }
        Ok(selected)
    }

    /// Attaches `entity` to the session.
    ///
    /// # Errors
    ///
    /// `Configuration` if a session cannot be started, `NoActiveSession`
    /// without `update_session` and no active session, `Merge` for failures
    /// while tracking or committing.
    pub fn merge<M: Model>(&self, entity: M, options: MergeOptions) -> Result<(), DbError> {
        self.merge_inner(entity, options).map_err(|e| {
            let e = e.into_merge();
            tracing::error!(table = M::TABLE, error = %e, "merge failed");
            e
        })
    }

    fn merge_inner<M: Model>(&self, entity: M, options: MergeOptions) -> Result<(), DbError> {
        let session = if options.update_session {
            self.start_session()?
        } else {
            self.require_session()?
        };
        session.track(entity, options.load)?;
        if options.auto_commit {
            session.commit()?;
        }
        Ok(())
    }

    /// Flushes and commits the active session, then closes it whatever the
    /// outcome.
    ///
    /// # Errors
    ///
    /// `NoActiveSession` without an active session, `Merge` if the flush or
    /// commit fails.
    pub fn commit(&self) -> Result<(), DbError> {
        let session = self.state().session.clone();
        let result = match &session {
            Some(session) if session.is_active() => session.commit(),
            _ => Err(DbError::NoActiveSession),
        };
        if let Some(session) = session {
            session.close();
        }
        result.map_err(|e| {
            let e = e.into_merge();
            tracing::error!(error = %e, "commit failed");
            e
        })
    }

    /// Writes pending entities without committing or closing.
    ///
    /// # Errors
    ///
    /// `NoActiveSession` without an active session, `Merge` if a write fails.
    pub fn flush(&self) -> Result<(), DbError> {
        self.require_session()?
            .flush()
            .map(|_| ())
            .map_err(|e| {
                let e = e.into_merge();
                tracing::error!(error = %e, "flush failed");
                e
            })
    }

    /// Appends `child` to the `relationship` collection of the parent with
    /// primary-key values `parent_key`.
    ///
    /// Without `uncommitted` the parent is read from storage, and reads do
    /// not flush pending work: a parent merged but not yet flushed is not
    /// found. Call [`Database::flush`] first, or pass `uncommitted` to edit
    /// the pending parent in place.
    ///
    /// # Errors
    ///
    /// `Query` when `parent_key` does not match the parent's key arity,
    /// `NotFound` when no parent matches, plus anything
    /// [`Database::select`] or [`Database::merge`] return.
    pub fn merge_relationship<P: Model, C>(
        &self,
        parent_key: &[Value],
        child: C,
        relationship: &Relationship<P, C>,
        options: RelationshipOptions,
    ) -> Result<(), DbError> {
        let result = self.merge_relationship_inner(parent_key, child, relationship, options);
        if let Err(e) = &result {
            tracing::error!(
                parent = P::TABLE,
                relationship = relationship.name(),
                key = %render_key(parent_key),
                error = %e,
                "adding child to relationship failed"
            );
        }
        result
    }

    fn merge_relationship_inner<P: Model, C>(
        &self,
        parent_key: &[Value],
        child: C,
        relationship: &Relationship<P, C>,
        options: RelationshipOptions,
    ) -> Result<(), DbError> {
        if parent_key.len() != P::PRIMARY_KEY.len() {
            return Err(DbError::Query(format!(
                "{} key needs {} values, got {}",
                P::TABLE,
                P::PRIMARY_KEY.len(),
                parent_key.len()
            )));
        }
        let conditions: Vec<Condition> = P::PRIMARY_KEY
            .iter()
            .zip(parent_key)
            .map(|(column, value)| Condition::eq(column, value.clone()))
            .collect();
        let not_found = || DbError::NotFound {
            table: P::TABLE,
            key: render_key(parent_key),
        };

        if options.uncommitted {
            let session = self.require_session()?;
            return session
                .with_new_mut::<P, _>(&conditions, |parent| relationship.attach(parent, child))?
                .ok_or_else(not_found);
        }

        let query = Select::<P>::new()
            .filters(conditions)
            .update_session(options.update_session);
        let mut parent = self
            .select(&query)?
            .into_iter()
            .next()
            .ok_or_else(not_found)?;
        relationship.attach(&mut parent, child);
        self.merge(
            parent,
            MergeOptions {
                update_session: options.update_session,
                auto_commit: options.auto_commit,
                load: true,
            },
        )
    }
}

fn validated<M: Model>(attributes: &[&str]) -> Result<Vec<String>, DbError> {
    attributes
        .iter()
        .map(|attribute| {
            if M::COLUMNS.contains(attribute) {
                Ok((*attribute).to_string())
            } else {
                Err(DbError::Query(format!("{} has no column {attribute}", M::TABLE)))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::record::Record;
    use feeds_types::SortDirection;

    #[derive(Debug, Clone, PartialEq)]
    struct Route {
        id: String,
        short_name: String,
        stops: Vec<String>,
        unloaded: Vec<&'static str>,
    }

    impl Model for Route {
        const TABLE: &'static str = "route";
        const PRIMARY_KEY: &'static [&'static str] = &["id"];
        const COLUMNS: &'static [&'static str] = &["id", "short_name"];

        fn to_record(&self) -> Record {
            Record::new()
                .with("id", &self.id)
                .with("short_name", &self.short_name)
        }

        fn from_record(record: &Record) -> rusqlite::Result<Self> {
            Ok(Self {
                id: record.get("id")?,
                short_name: record.get_or_default("short_name")?,
                stops: Vec::new(),
                unloaded: Vec::new(),
            })
        }

        fn unloaded_columns(&self) -> &[&'static str] {
            &self.unloaded
        }

        fn unloaded_columns_mut(&mut self) -> Option<&mut Vec<&'static str>> {
            Some(&mut self.unloaded)
        }
    }

    fn route(id: &str, short_name: &str) -> Route {
        Route {
            id: id.to_string(),
            short_name: short_name.to_string(),
            stops: Vec::new(),
            unloaded: Vec::new(),
        }
    }

    fn started() -> MergeOptions {
        MergeOptions::default().update_session(true)
    }

    fn add_stop(route: &mut Route, stop: String) {
        route.stops.push(stop);
    }

    fn database(close_after_use: bool) -> Database {
        let db = Database::new(DbConfig::new(":memory:").close_after_use(close_after_use));
        db.start_session()
            .expect("session should start")
            .with_connection(|conn| {
                conn.execute_batch(
                    "CREATE TABLE route (id TEXT PRIMARY KEY, short_name TEXT NOT NULL)",
                )
            })
            .expect("should create table");
        db
    }

    #[test]
    fn merge_defaults_require_an_active_session() {
        let options = MergeOptions::default();
        assert!(!options.update_session);
        assert!(!options.auto_commit);
        assert!(options.load);
    }

    #[test]
    fn missing_url_is_a_configuration_error() {
        let db = Database::new(DbConfig::default());
        let err = db.start_session().expect_err("no url");
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(!db.is_connected());
    }

    #[test]
    fn start_session_reuses_the_active_session() {
        let db = database(false);
        let first = db.start_session().expect("start");
        let second = db.start_session().expect("start");
        assert!(Arc::ptr_eq(&first, &second));
        assert!(db.is_connected());
    }

    #[test]
    fn close_policy_off_keeps_session_open() {
        let db = database(false);
        let session = db.start_session().expect("start");
        assert!(db.close_session());
        assert!(session.is_active());
    }

    #[test]
    fn close_policy_on_closes_and_next_start_opens_new_session() {
        let db = database(true);
        let first = db.start_session().expect("start");
        assert!(db.close_session());
        assert!(!first.is_active());

        let second = db.start_session().expect("restart");
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(second.is_active());
    }

    #[test]
    fn merge_then_commit_is_visible_to_select() {
        let db = database(false);
        db.merge(route("r1", "10"), started()).expect("merge");
        db.commit().expect("commit");

        let found = db
            .select(&Select::<Route>::new().filter(Condition::eq("id", "r1")))
            .expect("select");
        assert_eq!(found, vec![route("r1", "10")]);
    }

    #[test]
    fn commit_closes_even_with_policy_off() {
        let db = database(false);
        let session = db.start_session().expect("start");
        db.commit().expect("commit");
        assert!(!session.is_active());
        assert!(db.active_session().is_none());
    }

    #[test]
    fn failed_commit_still_closes_the_session() {
        let db = database(false);
        let session = db.start_session().expect("start");
        session
            .with_connection(|conn| {
                conn.execute_batch(
                    "CREATE TRIGGER reject_route BEFORE INSERT ON route
                     WHEN NEW.short_name = 'Bad' BEGIN SELECT RAISE(ABORT, 'bad route'); END;",
                )
            })
            .expect("should create trigger");
        db.merge(route("r1", "Bad"), started()).expect("merge");

        let err = db.commit().expect_err("trigger rejects the write");
        assert_eq!(err.kind(), ErrorKind::Merge);
        assert!(!session.is_active());
        assert!(db.active_session().is_none());

        let stored = db.select(&Select::<Route>::new()).expect("select");
        assert!(stored.is_empty());
    }

    #[test]
    fn auto_committed_merges_do_not_accumulate() {
        let db = database(false);
        for n in 0..300 {
            db.merge(route(&format!("r{n}"), "10"), started().auto_commit(true))
                .expect("merge");
        }
        let session = db.active_session().expect("auto commit keeps the session open");
        assert_eq!(session.tracked_count(), 0);
        assert_eq!(db.select(&Select::<Route>::new()).expect("select").len(), 300);
    }

    #[test]
    fn merging_a_projected_read_keeps_unloaded_columns() {
        let db = database(false);
        db.merge(route("r1", "10"), started()).expect("merge");
        db.commit().expect("commit");

        let projected = db
            .select(&Select::<Route>::new().attributes(&[]))
            .expect("select");
        assert_eq!(projected[0].short_name, "");
        db.merge(projected[0].clone(), started()).expect("merge");
        db.commit().expect("commit");

        let stored = db.select(&Select::<Route>::new()).expect("select");
        assert_eq!(stored, vec![route("r1", "10")]);
    }

    #[test]
    fn commit_without_session_fails_and_stays_closed() {
        let db = database(true);
        db.close_session();
        let err = db.commit().expect_err("nothing to commit");
        assert_eq!(err.kind(), ErrorKind::NoActiveSession);
    }

    #[test]
    fn select_without_update_session_requires_active_session() {
        let db = database(true);
        db.close_session();
        let query = Select::<Route>::new().update_session(false);
        let err = db.select(&query).expect_err("no session");
        assert_eq!(err.kind(), ErrorKind::NoActiveSession);
    }

    #[test]
    fn select_reports_bad_columns_as_query_errors() {
        let db = database(false);
        let query = Select::<Route>::new().filter(Condition::eq("colour", "red"));
        let err = db.select(&query).expect_err("unknown column");
        assert_eq!(err.kind(), ErrorKind::Query);
    }

    #[test]
    fn grouped_select_partitions_ordered_rows() {
        let db = database(false);
        for (id, name) in [("r1", "A"), ("r2", "B"), ("r3", "A")] {
            db.merge(route(id, name), started()).expect("merge");
        }
        db.commit().expect("commit");

        let query = Select::<Route>::new()
            .order_by("short_name", SortDirection::Ascending)
            .order_by("id", SortDirection::Ascending);
        let groups = db
            .select_grouped(&query, |r| r.short_name.clone())
            .expect("grouped select");

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].len(), 2);
        assert!(groups[0].iter().all(|r| r.short_name == "A"));
        let flat: Vec<Route> = groups.into_iter().flatten().collect();
        assert_eq!(flat, db.select(&query).expect("select"));
    }

    #[test]
    fn active_session_listing_filters_and_projects() {
        let db = database(false);
        db.merge(route("r1", "10"), started()).expect("merge");
        db.merge(route("r2", "20"), started()).expect("merge");

        let all = db
            .select_from_active_session::<Route>(&[], None)
            .expect("list");
        assert_eq!(all.len(), 2);

        let key_only: &[&str] = &[];
        let projected = db
            .select_from_active_session::<Route>(
                &[Condition::eq("short_name", "20")],
                Some(key_only),
            )
            .expect("list");
        assert_eq!(projected.len(), 1);
        assert_eq!(projected[0].id, "r2");
        assert_eq!(projected[0].short_name, "");
        assert_eq!(projected[0].unloaded, vec!["short_name"]);

        db.flush().expect("flush");
        let after_flush = db
            .select_from_active_session::<Route>(&[], None)
            .expect("list");
        assert!(after_flush.is_empty());
    }

    #[test]
    fn active_session_listing_rejects_range_conditions() {
        let db = database(false);
        db.merge(route("r1", "10"), started()).expect("merge");
        let err = db
            .select_from_active_session::<Route>(&[Condition::gt("short_name", "0")], None)
            .expect_err("range condition");
        assert_eq!(err.kind(), ErrorKind::Query);
    }

    #[test]
    fn uncommitted_relationship_edits_pending_parent() {
        let db = database(false);
        db.merge(route("r1", "10"), started()).expect("merge");
        let pending_before = db.start_session().expect("start").pending_count();

        let stops = Relationship::new("stops", add_stop);
        db.merge_relationship(
            &[Value::Text("r1".into())],
            "s1".to_string(),
            &stops,
            RelationshipOptions {
                uncommitted: true,
                ..RelationshipOptions::default()
            },
        )
        .expect("append");

        let pending = db
            .select_from_active_session::<Route>(&[Condition::eq("id", "r1")], None)
            .expect("list");
        assert_eq!(pending[0].stops, vec!["s1".to_string()]);
        assert_eq!(db.start_session().expect("start").pending_count(), pending_before);
    }

    #[test]
    fn stored_relationship_needs_the_parent_flushed() {
        let db = database(false);
        db.merge(route("r1", "10"), started()).expect("merge");
        let stops = Relationship::new("stops", add_stop);
        let options = RelationshipOptions {
            update_session: true,
            ..RelationshipOptions::default()
        };
        let key = [Value::Text("r1".into())];

        let err = db
            .merge_relationship(&key, "s1".to_string(), &stops, options)
            .expect_err("reads do not flush");
        assert_eq!(err.kind(), ErrorKind::NotFound);

        db.flush().expect("flush");
        db.merge_relationship(&key, "s1".to_string(), &stops, options)
            .expect("flushed parent is found");
    }

    #[test]
    fn relationship_on_missing_parent_is_not_found() {
        let db = database(false);
        let stops = Relationship::new("stops", add_stop);
        let err = db
            .merge_relationship(
                &[Value::Text("nope".into())],
                "s1".to_string(),
                &stops,
                RelationshipOptions {
                    update_session: true,
                    ..RelationshipOptions::default()
                },
            )
            .expect_err("no parent");
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn relationship_key_arity_is_checked() {
        let db = database(false);
        let stops = Relationship::new("stops", add_stop);
        let err = db
            .merge_relationship(&[], "s1".to_string(), &stops, RelationshipOptions::default())
            .expect_err("empty key");
        assert_eq!(err.kind(), ErrorKind::Query);
    }

    #[test]
    fn merge_without_update_session_needs_active_session() {
        let db = database(true);
        db.close_session();
        let err = db
            .merge(
                route("r1", "10"),
                MergeOptions {
                    update_session: false,
                    ..MergeOptions::default()
                },
            )
            .expect_err("no session");
        assert_eq!(err.kind(), ErrorKind::NoActiveSession);
    }

    #[test]
    fn nested_scopes_close_when_the_last_one_ends() {
        let db = database(true);
        let outer = db.scope().expect("outer scope");
        {
            let inner = db.scope().expect("inner scope");
            assert!(Arc::ptr_eq(outer.session(), inner.session()));
        }
        assert!(outer.is_active());

        assert!(db.close_session());
        assert!(outer.is_active(), "a live scope keeps the session open");

        let session = Arc::clone(outer.session());
        drop(outer);
        assert!(!session.is_active());
    }

    #[test]
    fn concurrent_scoped_selects_keep_their_session_under_close_policy() {
        let db = database(true);
        db.merge(route("r1", "10"), started()).expect("merge");
        db.commit().expect("commit");

        let query = Select::<Route>::new();
        std::thread::scope(|threads| {
            for _ in 0..8 {
                threads.spawn(|| {
                    for _ in 0..100 {
                        let found = db.select(&query).expect("select should keep its session");
                        assert_eq!(found.len(), 1);
                    }
                });
            }
        });
        assert!(db.active_session().is_none());
    }

    #[test]
    fn scope_releases_by_policy() {
        let db = database(true);
        let session = {
            let scope = db.scope().expect("scope");
            assert!(scope.is_active());
            Arc::clone(scope.session())
        };
        assert!(!session.is_active());
    }
}

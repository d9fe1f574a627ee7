//! Connection settings for [`Database`](crate::Database).

use crate::pool::DbRuntimeSettings;

/// Environment variable holding the connection string.
pub const DATABASE_URL_ENV: &str = "FEEDS_DATABASE_URL";

/// Environment variable enabling close-after-use sessions.
pub const CLOSE_SESSION_ENV: &str = "SHOULD_CLOSE_DB_SESSION";

/// How a [`Database`](crate::Database) reaches its storage and manages sessions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DbConfig {
    /// Connection string, e.g. `sqlite:///var/lib/feeds.db` or `:memory:`.
    /// Starting a session without one is a configuration error.
    pub database_url: Option<String>,

    /// When set, `close_session` actually closes the active session.
    pub close_after_use: bool,

    /// Engine tunables.
    pub runtime: DbRuntimeSettings,
}

impl DbConfig {
    /// Configuration for `database_url` with close-after-use disabled.
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: Some(database_url.into()),
            ..Self::default()
        }
    }

    /// Sets the close-after-use policy.
    pub fn close_after_use(mut self, close: bool) -> Self {
        self.close_after_use = close;
        self
    }

    /// Sets the engine tunables.
    pub fn runtime(mut self, runtime: DbRuntimeSettings) -> Self {
        self.runtime = runtime;
        self
    }

    /// Reads `FEEDS_DATABASE_URL` and `SHOULD_CLOSE_DB_SESSION` from the
    /// process environment. An empty URL counts as unset.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`DbConfig::from_env`] with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let database_url = lookup(DATABASE_URL_ENV).filter(|url| !url.trim().is_empty());
        let close_after_use = parse_close_flag(lookup(CLOSE_SESSION_ENV).as_deref());
        Self {
            database_url,
            close_after_use,
            runtime: DbRuntimeSettings::default(),
        }
    }
}

/// Interprets the close-after-use flag: only `true`, in any letter case,
/// enables it.
pub fn parse_close_flag(value: Option<&str>) -> bool {
    value.is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

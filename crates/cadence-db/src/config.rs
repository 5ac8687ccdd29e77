use std::env;

/// Database configuration.
///
/// Reads from the `CADENCE_DATABASE_URL` environment variable, falling back to
/// `postgresql://localhost:5432/cadence` when unset.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Full PostgreSQL connection URL.
    pub database_url: String,
    /// Upper bound on pooled connections.
    pub max_connections: u32,
}

impl DbConfig {
    /// The default connection URL used when no environment variable is set.
    pub const DEFAULT_URL: &str = "postgresql://localhost:5432/cadence";

    /// Environment variable consulted by [`DbConfig::from_env`].
    pub const URL_ENV: &str = "CADENCE_DATABASE_URL";

    /// Pool size used unless the caller overrides it.
    pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

    /// Build a config from the environment.
    ///
    /// Priority: `CADENCE_DATABASE_URL` env var, then the compile-time default.
    pub fn from_env() -> Self {
        let database_url =
            env::var(Self::URL_ENV).unwrap_or_else(|_| Self::DEFAULT_URL.to_owned());
        Self::new(database_url)
    }

    /// Build a config from an explicit URL (useful for tests and CLI flags).
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections: Self::DEFAULT_MAX_CONNECTIONS,
        }
    }

    /// Override the pool size.
    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections.max(1);
        self
    }

    /// Extract the database name from the URL.
    ///
    /// Returns `None` if the URL has no path component. Query parameters
    /// (`?sslmode=...`) are stripped.
    pub fn database_name(&self) -> Option<&str> {
        let without_query = self
            .database_url
            .split('?')
            .next()
            .unwrap_or(&self.database_url);
        let (prefix, name) = without_query.rsplit_once('/')?;
        // `postgresql://host` has its only slashes in the scheme separator.
        if prefix.ends_with('/') || prefix.ends_with(':') || name.is_empty() {
            return None;
        }
        Some(name)
    }

    /// The same server's `postgres` database, keeping any query parameters.
    pub fn maintenance_url(&self) -> String {
        let (base, query) = match self.database_url.split_once('?') {
            Some((base, query)) => (base, Some(query)),
            None => (self.database_url.as_str(), None),
        };
        let server = match self.database_name() {
            Some(name) => &base[..base.len() - name.len()],
            None => base.trim_end_matches('/'),
        };
        let mut url = server.trim_end_matches('/').to_owned();
        url.push_str("/postgres");
        if let Some(query) = query {
            url.push('?');
            url.push_str(query);
        }
        url
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

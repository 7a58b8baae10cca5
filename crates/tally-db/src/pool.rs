//! # Database Pool Management
//!
//! Connection pool creation and the transactional unit of work.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Database Connection Pool                           │
//! │                                                                         │
//! │  DbConfig::new(path) ← Configure pool + retry settings                 │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Database::new(config).await ← Create pool + run migrations            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  db.transaction(|conn| Box::pin(async move { ... }))                   │
//! │       │                                                                 │
//! │       ├── BEGIN                                                         │
//! │       ├── run closure against the transaction connection               │
//! │       ├── Ok  → COMMIT                                                  │
//! │       ├── Err → ROLLBACK                                                │
//! │       └── Err is transient (SQLITE_BUSY)? back off, run closure again  │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## WAL Mode
//! SQLite WAL mode is enabled so readers never block the single writer.
//! Writers still serialize; a writer that loses the race gets SQLITE_BUSY and
//! the unit of work starts over from a fresh snapshot.
//!
//! ## Cancellation
//! If the caller drops the future returned by [`Database::transaction`], the
//! in-flight `sqlx::Transaction` is dropped with it and SQLite rolls back.

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use futures_util::future::BoxFuture;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{Sqlite, SqliteConnection, SqlitePool};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{DbError, DbResult, TransientError};
use crate::migrations;

// =============================================================================
// Configuration
// =============================================================================

/// Retry settings for transient transaction failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// First wait after a busy failure.
    pub initial_backoff: Duration,
    /// Cap on a single wait.
    pub max_backoff: Duration,
    /// Give up once this much time has passed since the first attempt.
    pub max_elapsed: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            initial_backoff: Duration::from_millis(20),
            max_backoff: Duration::from_millis(500),
            max_elapsed: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_backoff,
            current_interval: self.initial_backoff,
            max_interval: self.max_backoff,
            multiplier: 2.0,
            max_elapsed_time: Some(self.max_elapsed),
            ..Default::default()
        }
    }
}

/// Database configuration.
///
/// ## Example
/// ```rust,ignore
/// let config = DbConfig::new("/var/lib/tally/acme.db")
///     .max_connections(8)
///     .busy_timeout(Duration::from_secs(2));
/// ```
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Path to the SQLite database file.
    pub database_path: PathBuf,

    /// Maximum number of connections in the pool.
    /// Default: 5
    pub max_connections: u32,

    /// Minimum number of connections to keep alive.
    /// Default: 1
    pub min_connections: u32,

    /// Connection acquire timeout.
    /// Default: 30 seconds
    pub connect_timeout: Duration,

    /// Idle timeout before closing a connection.
    /// Default: 10 minutes
    pub idle_timeout: Duration,

    /// How long SQLite itself waits on a lock before returning BUSY.
    /// Default: 5 seconds
    pub busy_timeout: Duration,

    /// Retry policy for transactions failing with BUSY/LOCKED.
    pub retry: RetryPolicy,

    /// Whether to run migrations on connect.
    /// Default: true
    pub run_migrations: bool,
}

impl DbConfig {
    /// Creates a new database configuration with the given path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            database_path: path.into(),
            max_connections: 5,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            busy_timeout: Duration::from_secs(5),
            retry: RetryPolicy::default(),
            run_migrations: true,
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn run_migrations(mut self, run: bool) -> Self {
        self.run_migrations = run;
        self
    }

    /// Creates an in-memory database configuration (for testing).
    ///
    /// Every call yields a separate, isolated database.
    pub fn in_memory() -> Self {
        DbConfig {
            database_path: PathBuf::from(":memory:"),
            max_connections: 1, // In-memory requires single connection
            min_connections: 1,
            connect_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(60),
            busy_timeout: Duration::from_secs(5),
            retry: RetryPolicy::default(),
            run_migrations: true,
        }
    }
}

// =============================================================================
// Database
// =============================================================================

/// Handle to one company's database.
///
/// Cheap to clone; clones share the pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
    retry: RetryPolicy,
}

impl Database {
    /// Creates a new database connection pool.
    ///
    /// ## What This Does
    /// 1. Creates the database file if it doesn't exist
    /// 2. Configures SQLite: WAL, NORMAL synchronous, foreign keys, busy timeout
    /// 3. Creates the connection pool
    /// 4. Runs migrations (if enabled)
    pub async fn new(config: DbConfig) -> DbResult<Self> {
        info!(
            path = %config.database_path.display(),
            "Initializing database connection"
        );

        let connect_url = format!("sqlite://{}?mode=rwc", config.database_path.display());

        let connect_options = SqliteConnectOptions::from_str(&connect_url)
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(config.busy_timeout)
            .create_if_missing(true);

        debug!("Connection options configured");

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout)
            .idle_timeout(Some(config.idle_timeout))
            .connect_with(connect_options)
            .await
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;

        info!(
            max_connections = config.max_connections,
            "Database pool created"
        );

        let db = Database {
            pool,
            retry: config.retry,
        };

        if config.run_migrations {
            db.run_migrations().await?;
        }

        Ok(db)
    }

    /// Runs database migrations. Idempotent.
    pub async fn run_migrations(&self) -> DbResult<()> {
        info!("Running database migrations");
        migrations::run_migrations(&self.pool).await?;
        info!("Migrations complete");
        Ok(())
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Checks out a pooled connection for reads outside a transaction.
    pub async fn acquire(&self) -> DbResult<PoolConnection<Sqlite>> {
        Ok(self.pool.acquire().await?)
    }

    /// Runs `work` inside one SQLite transaction.
    ///
    /// ## Semantics
    /// - `Ok` commits; `Err` rolls back and nothing `work` wrote survives
    /// - Errors whose [`TransientError::is_transient`] is true (BUSY/LOCKED,
    ///   including a failed COMMIT) roll back and re-run `work` from scratch
    ///   after an exponential backoff, until the retry window closes
    /// - Any other error is returned immediately, never retried
    ///
    /// `work` may therefore run more than once and must only touch the
    /// database through the connection it is given.
    ///
    /// ## Example
    /// ```rust,ignore
    /// let sale = db
    ///     .transaction(|conn| {
    ///         let id = sale_id.clone();
    ///         Box::pin(async move { SaleRepository::find_by_id(conn, &id).await })
    ///     })
    ///     .await?;
    /// ```
    pub async fn transaction<T, E, F>(&self, mut work: F) -> Result<T, E>
    where
        F: for<'c> FnMut(&'c mut SqliteConnection) -> BoxFuture<'c, Result<T, E>>,
        E: From<DbError> + TransientError + std::fmt::Display,
    {
        let mut backoff = self.retry.backoff();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            let err = match self.try_transaction(&mut work).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !err.is_transient() {
                return Err(err);
            }

            match backoff.next_backoff() {
                Some(wait) => {
                    warn!(
                        attempt,
                        wait_ms = wait.as_millis() as u64,
                        error = %err,
                        "Transient database error, retrying transaction"
                    );
                    tokio::time::sleep(wait).await;
                }
                None => {
                    warn!(attempt, error = %err, "Transaction retry window exhausted");
                    return Err(err);
                }
            }
        }
    }

    async fn try_transaction<T, E, F>(&self, work: &mut F) -> Result<T, E>
    where
        F: for<'c> FnMut(&'c mut SqliteConnection) -> BoxFuture<'c, Result<T, E>>,
        E: From<DbError>,
    {
        let mut tx = self.pool.begin().await.map_err(DbError::from)?;

        match work(&mut *tx).await {
            Ok(value) => {
                tx.commit().await.map_err(DbError::from)?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "Rollback failed");
                }
                Err(err)
            }
        }
    }

    /// Closes the database connection pool.
    pub async fn close(&self) {
        info!("Closing database connection pool");
        self.pool.close().await;
    }

    /// Checks if the database is healthy (can execute queries).
    pub async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug)]
    enum TestError {
        Db(DbError),
        Flaky,
        Fatal,
    }

    impl From<DbError> for TestError {
        fn from(err: DbError) -> Self {
            TestError::Db(err)
        }
    }

    impl TransientError for TestError {
        fn is_transient(&self) -> bool {
            match self {
                TestError::Db(e) => e.is_transient(),
                TestError::Flaky => true,
                TestError::Fatal => false,
            }
        }
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{:?}", self)
        }
    }

    async fn counter_value(db: &Database) -> i64 {
        sqlx::query_scalar("SELECT COALESCE(MAX(value), 0) FROM counters WHERE name = 'marker'")
            .fetch_one(db.pool())
            .await
            .unwrap()
    }

    fn bump(conn: &mut SqliteConnection) -> BoxFuture<'_, Result<(), TestError>> {
        Box::pin(async move {
            sqlx::query(
                "INSERT INTO counters (name, value) VALUES ('marker', 1)
                 ON CONFLICT(name) DO UPDATE SET value = value + 1",
            )
            .execute(&mut *conn)
            .await
            .map_err(DbError::from)?;
            Ok(())
        })
    }

    #[tokio::test]
    async fn test_in_memory_database() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        assert!(db.health_check().await);
    }

    #[tokio::test]
    async fn test_config_builder() {
        let config = DbConfig::new("/tmp/test.db")
            .max_connections(10)
            .min_connections(2)
            .busy_timeout(Duration::from_millis(250));

        assert_eq!(config.max_connections, 10);
        assert_eq!(config.min_connections, 2);
        assert_eq!(config.busy_timeout, Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_transaction_commits_on_ok() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        db.transaction(|conn| bump(conn)).await.unwrap();

        assert_eq!(counter_value(&db).await, 1);
    }

    #[tokio::test]
    async fn test_transaction_rolls_back_on_error() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        let result: Result<(), TestError> = db
            .transaction(|conn| {
                Box::pin(async move {
                    bump(conn).await?;
                    Err(TestError::Fatal)
                })
            })
            .await;

        assert!(matches!(result, Err(TestError::Fatal)));
        assert_eq!(counter_value(&db).await, 0);
    }

    #[tokio::test]
    async fn test_transient_error_is_retried_from_scratch() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let attempts = Arc::new(AtomicU32::new(0));

        let seen = attempts.clone();
        db.transaction(move |conn| {
            let seen = seen.clone();
            Box::pin(async move {
                bump(conn).await?;
                if seen.fetch_add(1, Ordering::SeqCst) < 2 {
                    return Err(TestError::Flaky);
                }
                Ok(())
            })
        })
        .await
        .unwrap();

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        // Two failed attempts were rolled back; only the last bump survives.
        assert_eq!(counter_value(&db).await, 1);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let attempts = Arc::new(AtomicU32::new(0));

        let seen = attempts.clone();
        let result: Result<(), TestError> = db
            .transaction(move |_conn| {
                let seen = seen.clone();
                Box::pin(async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                    Err(TestError::Fatal)
                })
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}

//! # Per-Company Databases
//!
//! Every company gets its own SQLite file. The registry opens a company's
//! database on first use and hands out clones of the same pool afterwards.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  TenantRegistry { data_dir: /var/lib/tally }                            │
//! │                                                                         │
//! │   get("acme")    ──► /var/lib/tally/acme.db     (opened, migrated)      │
//! │   get("globex")  ──► /var/lib/tally/globex.db                           │
//! │   get("acme")    ──► cached pool                                        │
//! │   get("../x")    ──► ValidationError (slug is a file name)              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};
use tracing::info;

use tally_core::validation::validate_company_slug;
use tally_core::ValidationError;

use crate::error::DbError;
use crate::pool::{Database, DbConfig};

/// Where company databases live.
#[derive(Debug, Clone)]
pub enum TenantStorage {
    /// `<dir>/<company>.db`, built from the template config.
    Directory { dir: PathBuf, template: DbConfig },
    /// An isolated in-memory database per company (tests, demos).
    InMemory,
}

#[derive(Debug, thiserror::Error)]
pub enum TenantError {
    #[error("invalid company: {0}")]
    InvalidCompany(#[from] ValidationError),

    #[error(transparent)]
    Db(#[from] DbError),
}

/// Per-company cell; empty until the first successful open.
type Slot = Arc<OnceCell<Database>>;

/// Lazily opened, cached company databases.
#[derive(Debug, Clone)]
pub struct TenantRegistry {
    storage: TenantStorage,
    databases: Arc<RwLock<HashMap<String, Slot>>>,
}

impl TenantRegistry {
    /// Registry keeping one file per company under `dir`.
    pub fn directory(dir: impl Into<PathBuf>, template: DbConfig) -> Self {
        Self::with_storage(TenantStorage::Directory {
            dir: dir.into(),
            template,
        })
    }

    /// Registry backed by in-memory databases.
    pub fn in_memory() -> Self {
        Self::with_storage(TenantStorage::InMemory)
    }

    fn with_storage(storage: TenantStorage) -> Self {
        TenantRegistry {
            storage,
            databases: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Returns the database for `company`, opening it on first use.
    ///
    /// Concurrent first calls for one company share a single open. The map
    /// lock is never held while a database is opened or migrated, so other
    /// companies are not blocked by it. A failed open is not cached.
    pub async fn get(&self, company: &str) -> Result<Database, TenantError> {
        validate_company_slug(company)?;

        let slot = self.slot(company).await;
        let db = slot.get_or_try_init(|| self.open(company)).await?;
        Ok(db.clone())
    }

    async fn slot(&self, company: &str) -> Slot {
        if let Some(slot) = self.databases.read().await.get(company) {
            return slot.clone();
        }
        self.databases
            .write()
            .await
            .entry(company.to_string())
            .or_default()
            .clone()
    }

    async fn open(&self, company: &str) -> Result<Database, DbError> {
        let config = match &self.storage {
            TenantStorage::Directory { dir, template } => {
                std::fs::create_dir_all(dir)
                    .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;
                let mut config = template.clone();
                config.database_path = dir.join(format!("{}.db", company));
                config
            }
            TenantStorage::InMemory => DbConfig::in_memory(),
        };

        info!(company = %company, path = %config.database_path.display(), "Opening company database");
        Database::new(config).await
    }

    /// Companies opened so far.
    pub async fn open_companies(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .databases
            .read()
            .await
            .iter()
            .filter(|(_, slot)| slot.initialized())
            .map(|(company, _)| company.clone())
            .collect();
        names.sort();
        names
    }

    /// Closes every open pool.
    pub async fn close_all(&self) {
        let slots: Vec<(String, Slot)> = self.databases.write().await.drain().collect();
        for (company, slot) in slots {
            if let Some(db) = slot.get() {
                info!(company = %company, "Closing company database");
                db.close().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_same_company_shares_database() {
        let registry = TenantRegistry::in_memory();
        let a = registry.get("acme").await.unwrap();

        sqlx::query("INSERT INTO counters (name, value) VALUES ('marker', 7)")
            .execute(a.pool())
            .await
            .unwrap();

        let again = registry.get("acme").await.unwrap();
        let value: i64 = sqlx::query_scalar("SELECT value FROM counters WHERE name = 'marker'")
            .fetch_one(again.pool())
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_companies_are_isolated() {
        let registry = TenantRegistry::in_memory();
        let acme = registry.get("acme").await.unwrap();
        let globex = registry.get("globex").await.unwrap();

        sqlx::query("INSERT INTO counters (name, value) VALUES ('marker', 1)")
            .execute(acme.pool())
            .await
            .unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM counters")
            .fetch_one(globex.pool())
            .await
            .unwrap();
        assert_eq!(count, 0);
        assert_eq!(registry.open_companies().await, vec!["acme", "globex"]);
    }

    #[tokio::test]
    async fn test_concurrent_first_use_opens_once() {
        let registry = TenantRegistry::in_memory();

        let (a, b, other) = tokio::join!(
            registry.get("acme"),
            registry.get("acme"),
            registry.get("globex"),
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        other.unwrap();

        sqlx::query("INSERT INTO counters (name, value) VALUES ('marker', 3)")
            .execute(a.pool())
            .await
            .unwrap();
        let value: i64 = sqlx::query_scalar("SELECT value FROM counters WHERE name = 'marker'")
            .fetch_one(b.pool())
            .await
            .unwrap();
        assert_eq!(value, 3);
        assert_eq!(registry.open_companies().await, vec!["acme", "globex"]);
    }

    #[tokio::test]
    async fn test_failed_open_is_retried() {
        // A regular file where the data directory should be.
        let dir = std::env::temp_dir().join(format!("tally-tenancy-{}", uuid::Uuid::new_v4()));
        std::fs::write(&dir, b"not a directory").unwrap();
        let registry = TenantRegistry::directory(&dir, DbConfig::new("unused"));

        assert!(matches!(registry.get("acme").await, Err(TenantError::Db(_))));
        assert!(registry.open_companies().await.is_empty());

        std::fs::remove_file(&dir).unwrap();
        let db = registry.get("acme").await.unwrap();
        assert!(db.health_check().await);
        assert_eq!(registry.open_companies().await, vec!["acme"]);

        registry.close_all().await;
        assert!(registry.open_companies().await.is_empty());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_rejects_path_like_company() {
        let registry = TenantRegistry::in_memory();
        assert!(matches!(
            registry.get("../etc").await,
            Err(TenantError::InvalidCompany(_))
        ));
    }

    #[tokio::test]
    async fn test_directory_storage_creates_file() {
        let dir = std::env::temp_dir().join(format!("tally-tenancy-{}", uuid::Uuid::new_v4()));
        let registry = TenantRegistry::directory(&dir, DbConfig::new("unused"));

        let db = registry.get("acme").await.unwrap();
        assert!(db.health_check().await);
        assert!(dir.join("acme.db").exists());

        registry.close_all().await;
        let _ = std::fs::remove_dir_all(&dir);
    }
}

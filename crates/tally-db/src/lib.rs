//! # tally-db: Database Layer for Tally
//!
//! This crate provides database access for the Tally installment ledger.
//! Every company owns one SQLite file; sqlx drives it asynchronously.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Tally Data Flow                                │
//! │                                                                         │
//! │  PaymentService::process_sequential_payment("acme", ...)               │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     tally-db (THIS CRATE)                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │TenantRegistry │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │ (tenancy.rs)  │    │               │    │  (embedded)  │  │   │
//! │  │   │      │        │    │ SaleRepo      │    │ 001_initial  │  │   │
//! │  │   │      ▼        │    │ QuotaRepo     │    │  _schema.sql │  │   │
//! │  │   │   Database    │◄───│ PaymentRepo   │    │              │  │   │
//! │  │   │  transaction  │    │ ClientRepo    │    │              │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Databases                            │   │
//! │  │   <data_dir>/acme.db   <data_dir>/globex.db   ...              │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool, configuration and the transactional unit of work
//! - [`tenancy`] - Per-company database registry
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types and transient classification
//! - [`repository`] - Repository implementations (sale, quota, payment, client)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tally_db::{DbError, SaleRepository, TenantRegistry};
//!
//! let registry = TenantRegistry::directory("/var/lib/tally", DbConfig::new("unused"));
//! let db = registry.get("acme").await?;
//!
//! let sale = db
//!     .transaction(|conn| {
//!         let id = sale_id.clone();
//!         Box::pin(async move { SaleRepository::find_by_id(conn, &id).await })
//!     })
//!     .await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;
pub mod tenancy;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult, TransientError};
pub use pool::{Database, DbConfig, RetryPolicy};
pub use tenancy::{TenantError, TenantRegistry, TenantStorage};

// Repository re-exports for convenience
pub use repository::{
    ClientRepository, CounterRepository, PaymentRepository, QuotaRepository, SaleRepository,
};

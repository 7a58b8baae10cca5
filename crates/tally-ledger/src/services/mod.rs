//! # Ledger Services
//!
//! One service per use case. Every service holds the [`TenantRegistry`] it
//! was constructed with and resolves the company database per call.
//!
//! ## Call Shape
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  service.op(company, ...)                                               │
//! │       │                                                                 │
//! │       ├── validate request (no I/O)                                     │
//! │       ├── registry.get(company) → Database                              │
//! │       ├── pre-check outside the transaction (fail fast)                 │
//! │       └── db.transaction(|conn| Box::pin(apply(conn, ...)))             │
//! │               re-read, decide (tally-core), write, commit               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod payment;
pub mod report;
pub mod reschedule;
pub mod reversal;
pub mod sale;

pub use payment::PaymentService;
pub use report::ReportService;
pub use reschedule::RescheduleService;
pub use reversal::ReversalService;
pub use sale::SaleService;

use sqlx::SqliteConnection;
use tally_core::{CoreError, Sale};
use tally_db::{Database, SaleRepository};

use crate::error::LedgerResult;

/// Loads a sale or fails with `SaleNotFound`.
pub(crate) async fn load_sale(conn: &mut SqliteConnection, sale_id: &str) -> LedgerResult<Sale> {
    SaleRepository::find_by_id(conn, sale_id)
        .await?
        .ok_or_else(|| CoreError::SaleNotFound(sale_id.to_string()).into())
}

/// Existence check run before opening a transaction.
///
/// The pooled connection is released before returning, so the caller can
/// start a transaction right away even on a single-connection pool.
pub(crate) async fn ensure_sale_exists(db: &Database, sale_id: &str) -> LedgerResult<()> {
    let mut conn = db.acquire().await?;
    load_sale(&mut conn, sale_id).await?;
    Ok(())
}

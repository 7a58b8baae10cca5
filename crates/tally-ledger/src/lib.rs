//! # tally-ledger: Payment Application Services
//!
//! Applies and reverts installment payments for many companies at once,
//! each company in its own SQLite database.
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        tally-ledger (THIS CRATE)                        │
//! │                                                                         │
//! │   Ledger ─┬─ payments    PaymentService     bulk / sequential           │
//! │           ├─ reversals   ReversalService    undo from stored breakdown  │
//! │           ├─ reschedules RescheduleService  move unpaid quotas          │
//! │           ├─ sales       SaleService        clients, sales, quota plans │
//! │           └─ reports     ReportService      paginated payment listing   │
//! │                                                                         │
//! │   LedgerConfig (TOML + TALLY_* env) ──► TenantRegistry                  │
//! │                                                                         │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │   tally-core  allocation math, validation, domain types                 │
//! │   tally-db    repositories, unit of work, per-company pools             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//! ```rust,ignore
//! let config = LedgerConfig::load(None)?;
//! let ledger = Ledger::from_config(&config);
//! let payment = ledger
//!     .payments
//!     .process_sequential_payment("acme", &sale_id, &request, "collector-7")
//!     .await?;
//! ```

pub mod config;
pub mod error;
pub mod services;

pub use config::LedgerConfig;
pub use error::{ErrorKind, ErrorPayload, LedgerError, LedgerResult};
pub use services::{PaymentService, ReportService, RescheduleService, ReversalService, SaleService};

use tally_db::TenantRegistry;

/// Every service wired to the same registry.
#[derive(Debug, Clone)]
pub struct Ledger {
    pub payments: PaymentService,
    pub reversals: ReversalService,
    pub reschedules: RescheduleService,
    pub sales: SaleService,
    pub reports: ReportService,
    registry: TenantRegistry,
}

impl Ledger {
    pub fn new(registry: TenantRegistry, default_coin: &str) -> Self {
        Ledger {
            payments: PaymentService::new(registry.clone()).with_default_coin(default_coin),
            reversals: ReversalService::new(registry.clone()),
            reschedules: RescheduleService::new(registry.clone()),
            sales: SaleService::new(registry.clone()).with_default_coin(default_coin),
            reports: ReportService::new(registry.clone()),
            registry,
        }
    }

    pub fn from_config(config: &LedgerConfig) -> Self {
        Self::new(config.tenant_registry(), &config.ledger.default_coin)
    }

    pub fn registry(&self) -> &TenantRegistry {
        &self.registry
    }

    /// Closes every company database opened so far.
    pub async fn shutdown(&self) {
        self.registry.close_all().await;
    }
}

//! # tally-core: Pure Business Logic for Tally
//!
//! This crate holds the installment ledger rules as pure functions with zero
//! I/O dependencies. Everything that decides *how much* money goes *where*
//! lives here; `tally-db` only stores the outcome.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Tally Architecture                             │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                tally-ledger (Services)                          │   │
//! │  │   PaymentService  ReversalService  RescheduleService  Sales     │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ tally-core (THIS CRATE) ★                       │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌────────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │   money   │  │ allocation │  │ validation│  │   │
//! │  │   │   Sale    │  │   Money   │  │  Mode A/B  │  │   rules   │  │   │
//! │  │   │   Quota   │  │           │  │  Reversal  │  │  checks   │  │   │
//! │  │   └───────────┘  └───────────┘  └────────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                    tally-db (Database Layer)                    │   │
//! │  │         SQLite per company, migrations, repositories            │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (Sale, Quota, Payment, Client)
//! - [`requests`] - Inputs accepted by the ledger services
//! - [`money`] - Money type with integer arithmetic
//! - [`allocation`] - Quota allocation engine and reversal planning
//! - [`error`] - Domain error types
//! - [`validation`] - Business rule validation
//!
//! ## Example Usage
//!
//! ```rust
//! use tally_core::money::Money;
//!
//! let quota = Money::from_cents(100_000);
//! let paid = Money::from_cents(25_050);
//! assert_eq!((quota - paid).to_string(), "749.50");
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod allocation;
pub mod error;
pub mod money;
pub mod requests;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use money::Money;
pub use requests::*;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Currency stamped on payments and quotas when none is given.
pub const DEFAULT_COIN: &str = "ARS";

/// Longest currency code accepted on a quota.
pub const MAX_COIN_LEN: usize = 10;

/// Counter that hands out sale numbers.
pub const SALE_NUMBER_COUNTER: &str = "sale_number_seq";

/// Counter that hands out payment numbers.
pub const PAYMENT_NUMBER_COUNTER: &str = "payment_number_seq";

/// Largest page size accepted by the payment listing.
pub const MAX_PAGE_LIMIT: i64 = 100;

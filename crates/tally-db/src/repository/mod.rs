//! # Repository Module
//!
//! Database repository implementations for Tally.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repositories and Transactions                        │
//! │                                                                         │
//! │  Ledger service                                                        │
//! │       │                                                                 │
//! │       │  db.transaction(|conn| ...)                                     │
//! │       ▼                                                                 │
//! │  QuotaRepository::find_unpaid_by_sale(conn, sale_id)                   │
//! │  PaymentRepository::insert(conn, &payment)                             │
//! │  SaleRepository::update_after_payment(conn, ...)                       │
//! │       │                                                                 │
//! │       │  every call shares the same &mut SqliteConnection              │
//! │       ▼                                                                 │
//! │  SQLite (one transaction, all-or-nothing)                              │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Repositories hold no state and contain no business rules: every method
//! takes the connection to run on, so the same code serves a transaction
//! or a plain pooled connection (`db.acquire()`).
//!
//! ## Available Repositories
//!
//! - [`ClientRepository`] - Clients and credit balance
//! - [`CounterRepository`] - Sale and payment number sequences
//! - [`SaleRepository`] - Sales, items and aggregate totals
//! - [`QuotaRepository`] - Quota reads and guarded bulk writes
//! - [`PaymentRepository`] - Payments, breakdown and listing

pub mod client;
pub mod counter;
pub mod payment;
pub mod quota;
pub mod sale;

pub use client::ClientRepository;
pub use counter::CounterRepository;
pub use payment::PaymentRepository;
pub use quota::QuotaRepository;
pub use sale::SaleRepository;

use sqlx::{QueryBuilder, Sqlite};

/// Appends `(?, ?, ...)` binding every id.
pub(crate) fn push_id_list<'a>(qb: &mut QueryBuilder<'a, Sqlite>, ids: &'a [String]) {
    qb.push("(");
    let mut separated = qb.separated(", ");
    for id in ids {
        separated.push_bind(id.as_str());
    }
    separated.push_unseparated(")");
}

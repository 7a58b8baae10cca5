//! # Error Types
//!
//! Domain-specific error types for tally-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  tally-core errors (this file)                                         │
//! │  ├── CoreError        - Business rule violations                       │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  tally-db errors (separate crate)                                      │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  tally-ledger errors                                                   │
//! │  └── LedgerError      - What callers see (NotFound / Validation /      │
//! │                         Consistency / Storage)                         │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → LedgerError → HTTP status         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Business rule violations raised by the allocation engine and validators.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Sale cannot be found.
    #[error("sale not found: {0}")]
    SaleNotFound(String),

    /// Client cannot be found.
    #[error("client not found: {0}")]
    ClientNotFound(String),

    /// Payment cannot be found.
    #[error("payment not found: {0}")]
    PaymentNotFound(String),

    /// Some requested quota ids did not resolve.
    #[error("quotas not found: {}", missing.join(", "))]
    QuotasNotFound { missing: Vec<String> },

    /// A selected quota belongs to another sale.
    #[error("quota {quota_id} does not belong to sale {sale_id}")]
    QuotaSaleMismatch { quota_id: String, sale_id: String },

    /// A quota is already fully paid and cannot take more money.
    ///
    /// ## When This Occurs
    /// - Bulk payment selecting a quota closed by an earlier payment
    /// - Rescheduling a paid quota
    /// - A concurrent payment closed the quota between read and write
    #[error("quota {0} is already paid")]
    QuotaAlreadyPaid(String),

    /// Sequential payment on a sale with nothing left to pay.
    #[error("sale {0} has no unpaid quotas")]
    NoUnpaidQuotas(String),

    /// Payment amount is invalid.
    #[error("invalid payment amount: {reason}")]
    InvalidPaymentAmount { reason: String },

    /// Reverting a payment that was already reverted.
    #[error("payment already reverted: {0}")]
    PaymentAlreadyReverted(String),

    /// Reverting a payment through the wrong sale.
    #[error("payment {payment_id} does not belong to sale {sale_id}")]
    PaymentSaleMismatch { payment_id: String, sale_id: String },

    /// Rescheduling request rejected.
    #[error("cannot reschedule quota {quota_id}: {reason}")]
    InvalidReschedule { quota_id: String, reason: String },

    /// Quota plan does not add up to the sale total.
    #[error("sum of quotas ({quotas_cents}) does not match sale total ({total_cents})")]
    SaleTotalMismatch { quotas_cents: i64, total_cents: i64 },

    /// Stored data contradicts itself (e.g. a payment references a quota
    /// that no longer exists). Never caused by caller input.
    #[error("inconsistent ledger state: {0}")]
    Inconsistent(String),

    /// Validation error (wraps ValidationError).
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Raised before any I/O so a malformed request never opens a transaction.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Value must not be negative.
    #[error("{field} must not be negative")]
    MustNotBeNegative { field: String },

    /// Invalid format (e.g., bad company slug).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Value is not in allowed set.
    #[error("{field} must be one of: {allowed:?}")]
    NotAllowed { field: String, allowed: Vec<String> },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

//! # Ledger Error Type
//!
//! The one error type the ledger services return.
//!
//! ## Error Handling Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Flow in Tally                                  │
//! │                                                                         │
//! │  ValidationError ──► CoreError ──┐                                      │
//! │                                  ├──► LedgerError ──► kind()            │
//! │  sqlx::Error ──► DbError ────────┘         │             │              │
//! │                                            │             ▼              │
//! │                  is_transient()? ◄─────────┘   NOT_FOUND        404     │
//! │                  (unit of work retries)        VALIDATION       400     │
//! │                                                CONSISTENCY      500     │
//! │                                                STORAGE          500     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Serialization
//! [`LedgerError::to_payload`] produces what an API layer hands to clients:
//! ```json
//! { "code": "VALIDATION", "message": "payment already reverted: 5b0f..." }
//! ```

use serde::Serialize;
use tally_core::{CoreError, ValidationError};
use tally_db::{DbError, TenantError, TransientError};
use thiserror::Error;

/// Result type for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Error categories surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Sale, payment, client or quota does not exist (404)
    NotFound,
    /// The request breaks a business rule (400)
    Validation,
    /// Stored data contradicts itself (500)
    Consistency,
    /// The database failed (500)
    Storage,
}

impl ErrorKind {
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorKind::NotFound => 404,
            ErrorKind::Validation => 400,
            ErrorKind::Consistency | ErrorKind::Storage => 500,
        }
    }
}

#[derive(Debug, Error)]
pub enum LedgerError {
    /// A business rule or lookup failed.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The database failed.
    #[error("storage error: {0}")]
    Storage(DbError),

    /// Configuration could not be loaded or is invalid.
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Serializable form of a [`LedgerError`].
#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub code: ErrorKind,
    pub message: String,
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::Core(err) => match err {
                CoreError::SaleNotFound(_)
                | CoreError::ClientNotFound(_)
                | CoreError::PaymentNotFound(_)
                | CoreError::QuotasNotFound { .. } => ErrorKind::NotFound,
                CoreError::Inconsistent(_) => ErrorKind::Consistency,
                _ => ErrorKind::Validation,
            },
            LedgerError::Storage(DbError::NotFound { .. }) => ErrorKind::NotFound,
            LedgerError::Storage(_) | LedgerError::Config(_) => ErrorKind::Storage,
        }
    }

    pub fn http_status(&self) -> u16 {
        self.kind().http_status()
    }

    pub fn to_payload(&self) -> ErrorPayload {
        ErrorPayload {
            code: self.kind(),
            message: self.to_string(),
        }
    }
}

// =============================================================================
// Error Conversions
// =============================================================================

/// Guarded writes that lost a race are reported as the business rule they
/// protect, not as a storage failure.
impl From<DbError> for LedgerError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Conflict { entity, id } if entity == "Quota" => {
                LedgerError::Core(CoreError::QuotaAlreadyPaid(id))
            }
            DbError::Conflict { entity, id } if entity == "Payment" => {
                LedgerError::Core(CoreError::PaymentAlreadyReverted(id))
            }
            DbError::Conflict { entity, id } if entity == "QuotaBalance" => {
                LedgerError::Core(CoreError::Inconsistent(format!(
                    "quota {} holds less than the amount to revert",
                    id
                )))
            }
            other => LedgerError::Storage(other),
        }
    }
}

impl From<ValidationError> for LedgerError {
    fn from(err: ValidationError) -> Self {
        LedgerError::Core(CoreError::Validation(err))
    }
}

impl From<TenantError> for LedgerError {
    fn from(err: TenantError) -> Self {
        match err {
            TenantError::InvalidCompany(e) => e.into(),
            TenantError::Db(e) => e.into(),
        }
    }
}

impl From<std::io::Error> for LedgerError {
    fn from(err: std::io::Error) -> Self {
        LedgerError::Config(err.to_string())
    }
}

impl From<toml::de::Error> for LedgerError {
    fn from(err: toml::de::Error) -> Self {
        LedgerError::Config(err.to_string())
    }
}

impl TransientError for LedgerError {
    fn is_transient(&self) -> bool {
        match self {
            LedgerError::Storage(err) => err.is_transient(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_and_statuses() {
        let not_found: LedgerError = CoreError::SaleNotFound("s-1".into()).into();
        assert_eq!(not_found.kind(), ErrorKind::NotFound);
        assert_eq!(not_found.http_status(), 404);
        assert_eq!(not_found.to_string(), "sale not found: s-1");

        let reverted: LedgerError = CoreError::PaymentAlreadyReverted("p-1".into()).into();
        assert_eq!(reverted.http_status(), 400);

        let broken: LedgerError = CoreError::Inconsistent("missing quota".into()).into();
        assert_eq!(broken.kind(), ErrorKind::Consistency);
        assert_eq!(broken.http_status(), 500);

        let storage: LedgerError = DbError::QueryFailed("boom".into()).into();
        assert_eq!(storage.kind(), ErrorKind::Storage);
    }

    #[test]
    fn test_conflicts_become_business_errors() {
        let err: LedgerError = DbError::conflict("Quota", "q-1").into();
        assert!(matches!(err, LedgerError::Core(CoreError::QuotaAlreadyPaid(ref id)) if id == "q-1"));
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err: LedgerError = DbError::conflict("Payment", "p-1").into();
        assert_eq!(err.to_string(), "payment already reverted: p-1");

        let err: LedgerError = DbError::conflict("QuotaBalance", "q-2").into();
        assert_eq!(err.kind(), ErrorKind::Consistency);
        assert_eq!(err.http_status(), 500);
        assert_eq!(
            err.to_string(),
            "inconsistent ledger state: quota q-2 holds less than the amount to revert"
        );
    }

    #[test]
    fn test_only_storage_busy_is_transient() {
        let busy: LedgerError = DbError::Busy("database is locked".into()).into();
        assert!(busy.is_transient());

        let invalid: LedgerError = CoreError::NoUnpaidQuotas("s-1".into()).into();
        assert!(!invalid.is_transient());
    }

    #[test]
    fn test_payload_serialization() {
        let err: LedgerError = CoreError::PaymentNotFound("p-9".into()).into();
        let json = serde_json::to_value(err.to_payload()).unwrap();
        assert_eq!(json["code"], "NOT_FOUND");
        assert_eq!(json["message"], "payment not found: p-9");
    }
}

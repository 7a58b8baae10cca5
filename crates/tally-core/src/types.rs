//! # Domain Types
//!
//! Core domain types of the installment ledger.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │     Client      │   │      Sale       │   │     Quota       │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id (UUID)      │◄──│  client_id      │◄──│  sale_id        │       │
//! │  │  credit_balance │   │  sale_number    │   │  quota_number   │       │
//! │  └─────────────────┘   │  total/collected│   │  amount / paid  │       │
//! │                        │  /pending       │   │  status         │       │
//! │                        └────────▲────────┘   └────────▲────────┘       │
//! │                                 │                     │                 │
//! │                        ┌────────┴─────────────────────┴────────┐       │
//! │                        │               Payment                 │       │
//! │                        │  amount, method, status               │       │
//! │                        │  affected_quotas: [AffectedQuota]     │       │
//! │                        │  (immutable breakdown, drives revert) │       │
//! │                        └───────────────────────────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Dual-Key Identity Pattern
//! Every entity has:
//! - `id`: UUID v4 - immutable, used for relations
//! - Business ID: (`sale_number`, `payment_number`, `quota_number`) - human-readable

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use crate::money::Money;

// =============================================================================
// Sale Status
// =============================================================================

/// Lifecycle status of a sale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SaleStatus {
    PendingApproval,
    PendingShipment,
    /// Collecting quotas. Also the state a sale falls back to after a revert.
    #[default]
    InProgress,
    /// Every quota collected.
    Completed,
    Cancelled,
    Delinquent,
}

impl SaleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SaleStatus::PendingApproval => "pending_approval",
            SaleStatus::PendingShipment => "pending_shipment",
            SaleStatus::InProgress => "in_progress",
            SaleStatus::Completed => "completed",
            SaleStatus::Cancelled => "cancelled",
            SaleStatus::Delinquent => "delinquent",
        }
    }
}

impl fmt::Display for SaleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Quota Status
// =============================================================================

/// Status of a single installment.
///
/// `Paid` is reached only when `paid_amount_cents == amount_cents`; every
/// other status means money is still owed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum QuotaStatus {
    #[default]
    Pending,
    Paid,
    Overdue,
    Delinquent,
    Cancelled,
}

impl QuotaStatus {
    /// Statuses a quota may be moved to by rescheduling.
    pub const RESCHEDULABLE: [QuotaStatus; 4] = [
        QuotaStatus::Pending,
        QuotaStatus::Overdue,
        QuotaStatus::Delinquent,
        QuotaStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QuotaStatus::Pending => "pending",
            QuotaStatus::Paid => "paid",
            QuotaStatus::Overdue => "overdue",
            QuotaStatus::Delinquent => "delinquent",
            QuotaStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_reschedulable(&self) -> bool {
        Self::RESCHEDULABLE.contains(self)
    }
}

impl fmt::Display for QuotaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Payment Status & Method
// =============================================================================

/// A payment is either live or reverted. There is no way back from reverted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Completed,
    Reverted,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Completed => "completed",
            PaymentStatus::Reverted => "reverted",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Transfer,
    DebitCard,
    CreditCard,
    /// Used when one payment mixes several methods.
    Other,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Transfer => "transfer",
            PaymentMethod::DebitCard => "debit_card",
            PaymentMethod::CreditCard => "credit_card",
            PaymentMethod::Other => "other",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Client
// =============================================================================

/// A client buying on installments.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Client {
    pub id: String,
    pub name: String,
    pub last_name: String,
    pub email: Option<String>,
    /// Money owed back to the client, built up from overpayments.
    pub credit_balance_cents: i64,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Sale
// =============================================================================

/// A line item frozen at sale time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SaleItem {
    pub id: String,
    pub sale_id: String,
    pub product_id: String,
    pub variant_sku: String,
    /// Product name at time of sale (frozen).
    pub name_snapshot: String,
    pub quantity: i64,
    pub unit_price_cents: i64,
    pub unit_cost_cents: Option<i64>,
    /// `unit_price_cents × quantity`.
    pub subtotal_cents: i64,
}

/// Financing attached to a sale. A zero principal means "no loan".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Loan {
    pub principal_cents: i64,
    /// Interest in basis points (3500 = 35%).
    pub interest_rate_bps: i64,
    pub total_to_repay_cents: i64,
    pub observations: Option<String>,
}

impl Loan {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.principal_cents == 0
    }
}

/// One commercial transaction paid in quotas.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Sale {
    pub id: String,
    pub sale_number: i64,
    pub client_id: String,
    pub items: Vec<SaleItem>,
    pub loan: Option<Loan>,
    /// Quota ids in ascending quota number.
    pub quota_ids: Vec<String>,
    /// Payments currently counted in `collected_amount_cents`.
    pub payment_ids: Vec<String>,
    pub status: SaleStatus,
    pub total_amount_cents: i64,
    pub collected_amount_cents: i64,
    pub pending_amount_cents: i64,
    pub quota_count: i64,
    #[ts(as = "String")]
    pub sale_date: DateTime<Utc>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Sale {
    #[inline]
    pub fn total(&self) -> Money {
        Money::from_cents(self.total_amount_cents)
    }

    #[inline]
    pub fn collected(&self) -> Money {
        Money::from_cents(self.collected_amount_cents)
    }

    #[inline]
    pub fn pending(&self) -> Money {
        Money::from_cents(self.pending_amount_cents)
    }

    /// `collected + pending == total`.
    pub fn is_balanced(&self) -> bool {
        self.collected() + self.pending() == self.total()
    }
}

// =============================================================================
// Quota
// =============================================================================

/// One installment of a sale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Quota {
    pub id: String,
    pub sale_id: String,
    /// 1-based; lower numbers are paid first.
    pub quota_number: i64,
    #[ts(as = "String")]
    pub expiration_date: DateTime<Utc>,
    pub amount_cents: i64,
    pub paid_amount_cents: i64,
    pub coin: String,
    pub status: QuotaStatus,
    pub payment_ids: Vec<String>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Quota {
    /// What is still owed on this quota.
    #[inline]
    pub fn pending_cents(&self) -> i64 {
        self.amount_cents - self.paid_amount_cents
    }

    #[inline]
    pub fn is_paid(&self) -> bool {
        self.status == QuotaStatus::Paid
    }
}

// =============================================================================
// Payment
// =============================================================================

/// How much of a payment landed on one quota.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct AffectedQuota {
    pub quota_id: String,
    pub amount_applied_cents: i64,
}

/// Money received against a sale.
///
/// `affected_quotas` is written once and never changed. Reversal reads it to
/// undo exactly what was done; whatever `amount_cents` exceeds the sum of
/// applied amounts went to the client's credit balance.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Payment {
    pub id: String,
    pub sale_id: String,
    pub collector_id: String,
    pub payment_number: i64,
    #[ts(as = "String")]
    pub payment_date: DateTime<Utc>,
    pub amount_cents: i64,
    pub coin: String,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub affected_quotas: Vec<AffectedQuota>,
    pub notes: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    #[inline]
    pub fn amount(&self) -> Money {
        Money::from_cents(self.amount_cents)
    }

    /// Sum of what was applied to quotas.
    pub fn applied(&self) -> Money {
        self.affected_quotas
            .iter()
            .map(|aq| Money::from_cents(aq.amount_applied_cents))
            .sum()
    }

    /// Portion of the payment that became client credit.
    pub fn credit_granted(&self) -> Money {
        self.amount() - self.applied()
    }

    #[inline]
    pub fn is_reverted(&self) -> bool {
        self.status == PaymentStatus::Reverted
    }
}

// =============================================================================
// Query Results
// =============================================================================

/// Client fields shown next to a payment.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ClientSummary {
    pub id: String,
    pub name: String,
    pub last_name: String,
}

/// Sale fields shown next to a payment.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SaleSummary {
    pub id: String,
    pub sale_number: i64,
    #[ts(as = "String")]
    pub sale_date: DateTime<Utc>,
}

/// An affected-quota entry joined with the quota it points at.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct AffectedQuotaDetail {
    pub quota_id: String,
    pub amount_applied_cents: i64,
    /// Current state of the quota; `None` if it no longer resolves.
    pub quota: Option<Quota>,
}

/// A payment enriched for listing screens.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PaymentDetails {
    pub payment: Payment,
    pub client: Option<ClientSummary>,
    pub sale: Option<SaleSummary>,
    pub quotas: Vec<AffectedQuotaDetail>,
}

/// One page of results with offset pagination metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub docs: Vec<T>,
    pub total_docs: i64,
    pub limit: i64,
    pub page: i64,
    pub total_pages: i64,
    pub has_next_page: bool,
    pub has_prev_page: bool,
}

impl<T> Page<T> {
    /// Builds page metadata from the total row count.
    pub fn new(docs: Vec<T>, total_docs: i64, page: i64, limit: i64) -> Self {
        let total_pages = if limit > 0 {
            (total_docs + limit - 1) / limit
        } else {
            0
        };
        Page {
            docs,
            total_docs,
            limit,
            page,
            total_pages,
            has_next_page: page < total_pages,
            has_prev_page: page > 1,
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn payment_with(amount: i64, applied: &[i64]) -> Payment {
        let now = Utc::now();
        Payment {
            id: "p-1".to_string(),
            sale_id: "s-1".to_string(),
            collector_id: "c-1".to_string(),
            payment_number: 1,
            payment_date: now,
            amount_cents: amount,
            coin: "ARS".to_string(),
            method: PaymentMethod::Cash,
            status: PaymentStatus::Completed,
            affected_quotas: applied
                .iter()
                .enumerate()
                .map(|(i, cents)| AffectedQuota {
                    quota_id: format!("q-{}", i + 1),
                    amount_applied_cents: *cents,
                })
                .collect(),
            notes: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_payment_credit_granted() {
        let payment = payment_with(3500, &[1000, 1000, 1000]);
        assert_eq!(payment.applied().cents(), 3000);
        assert_eq!(payment.credit_granted().cents(), 500);

        let exact = payment_with(2500, &[1000, 1000, 500]);
        assert!(exact.credit_granted().is_zero());
    }

    #[test]
    fn test_status_strings_match_serde() {
        assert_eq!(
            serde_json::to_string(&SaleStatus::PendingApproval).unwrap(),
            format!("\"{}\"", SaleStatus::PendingApproval.as_str())
        );
        assert_eq!(
            serde_json::to_string(&PaymentMethod::DebitCard).unwrap(),
            "\"debit_card\""
        );
        assert_eq!(QuotaStatus::Overdue.to_string(), "overdue");
    }

    #[test]
    fn test_reschedulable_statuses() {
        assert!(!QuotaStatus::Paid.is_reschedulable());
        assert!(QuotaStatus::Cancelled.is_reschedulable());
        assert!(QuotaStatus::Delinquent.is_reschedulable());
    }

    #[test]
    fn test_page_metadata() {
        let page = Page::new(vec![1, 2, 3], 23, 1, 10);
        assert_eq!(page.total_pages, 3);
        assert!(page.has_next_page);
        assert!(!page.has_prev_page);

        let last = Page::new(vec![1, 2, 3], 23, 3, 10);
        assert!(!last.has_next_page);
        assert!(last.has_prev_page);

        let empty: Page<i32> = Page::new(vec![], 0, 1, 10);
        assert_eq!(empty.total_pages, 0);
        assert!(!empty.has_next_page);
    }
}

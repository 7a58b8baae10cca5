//! Inputs accepted by the ledger services.
//!
//! These are the shapes the HTTP layer deserializes and hands over; they carry
//! no ids generated server-side.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::types::{Loan, PaymentMethod, PaymentStatus, QuotaStatus};

/// Bulk payment: close the selected quotas in full.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PayQuotasRequest {
    pub quota_ids: Vec<String>,
    pub method: PaymentMethod,
}

/// One tender inside a sequential payment.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PaymentDetail {
    pub amount_cents: i64,
    pub method: PaymentMethod,
}

/// Sequential payment: spread the sum of `payments` oldest-quota-first.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SequentialPaymentRequest {
    pub payments: Vec<PaymentDetail>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// New expiration date and status for one quota.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct QuotaReschedule {
    pub quota_id: String,
    #[ts(as = "String")]
    pub new_expiration_date: DateTime<Utc>,
    pub new_status: QuotaStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct RescheduleQuotasRequest {
    pub updates: Vec<QuotaReschedule>,
}

/// A product line on a new sale.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SaleItemInput {
    pub product_id: String,
    #[serde(default)]
    pub variant_sku: String,
    pub name: String,
    pub quantity: i64,
    pub unit_price_cents: i64,
    #[serde(default)]
    pub unit_cost_cents: Option<i64>,
}

/// One installment of a new sale's plan.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct QuotaInput {
    #[ts(as = "String")]
    pub expiration_date: DateTime<Utc>,
    pub amount_cents: i64,
    /// Falls back to the configured default coin.
    #[serde(default)]
    pub coin: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CreateSaleRequest {
    pub client_id: String,
    #[serde(default)]
    pub items: Vec<SaleItemInput>,
    #[serde(default)]
    pub loan: Option<Loan>,
    pub quotas: Vec<QuotaInput>,
    /// Defaults to now.
    #[serde(default)]
    #[ts(as = "Option<String>")]
    pub sale_date: Option<DateTime<Utc>>,
}

/// Filters for the payment listing. Empty `statuses` means all statuses.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PaymentFilter {
    #[serde(default)]
    #[ts(as = "Option<String>")]
    pub start_date: Option<NaiveDate>,
    /// Inclusive: the whole end day is covered.
    #[serde(default)]
    #[ts(as = "Option<String>")]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub statuses: Vec<PaymentStatus>,
}

/// New client record.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct NewClient {
    pub name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub email: Option<String>,
}

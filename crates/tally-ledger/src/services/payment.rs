//! # Payment Service
//!
//! Applies money received against a sale.
//!
//! ## Two Ways to Pay
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  process_bulk_payment(quota_ids)                                        │
//! │     closes each selected quota in full; amount = what they owed         │
//! │                                                                         │
//! │  process_sequential_payment(payments[])                                 │
//! │     amount = Σ payments; poured into unpaid quotas, oldest first;       │
//! │     leftover goes to the client's credit balance                        │
//! │                                                                         │
//! │  Both, inside ONE transaction:                                          │
//! │     re-read sale ─► allocate ─► payment number ─► insert payment        │
//! │     ─► write quotas ─► move sale totals (complete if fully collected)   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use sqlx::SqliteConnection;
use tracing::{debug, info};
use uuid::Uuid;

use tally_core::allocation::{
    allocate_selected, allocate_sequential, completes_sale, merge_notes, overpayment_note,
    resolve_method, Allocation,
};
use tally_core::validation::{validate_pay_quotas, validate_sequential_payment};
use tally_core::{
    CoreError, Money, PayQuotasRequest, Payment, PaymentMethod, PaymentStatus, Sale,
    SequentialPaymentRequest, DEFAULT_COIN,
};
use tally_db::{ClientRepository, PaymentRepository, QuotaRepository, SaleRepository, TenantRegistry};

use crate::error::LedgerResult;
use crate::services::{ensure_sale_exists, load_sale};

/// Who took the money and how; fixed for every attempt of one payment.
#[derive(Debug, Clone)]
struct PaymentDraft {
    sale_id: String,
    collector_id: String,
    method: PaymentMethod,
    coin: String,
    notes: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PaymentService {
    registry: TenantRegistry,
    default_coin: String,
}

impl PaymentService {
    pub fn new(registry: TenantRegistry) -> Self {
        PaymentService {
            registry,
            default_coin: DEFAULT_COIN.to_string(),
        }
    }

    /// Coin recorded on new payments.
    pub fn with_default_coin(mut self, coin: impl Into<String>) -> Self {
        self.default_coin = coin.into();
        self
    }

    /// Pays the selected quotas in full.
    ///
    /// ## Errors
    /// - `SaleNotFound` before any write
    /// - `QuotasNotFound`, `QuotaSaleMismatch`, `QuotaAlreadyPaid`: nothing is
    ///   written, no payment row exists afterwards
    pub async fn process_bulk_payment(
        &self,
        company: &str,
        sale_id: &str,
        request: &PayQuotasRequest,
        collector_id: &str,
    ) -> LedgerResult<Payment> {
        validate_pay_quotas(request)?;
        let db = self.registry.get(company).await?;
        ensure_sale_exists(&db, sale_id).await?;

        let draft = PaymentDraft {
            sale_id: sale_id.to_string(),
            collector_id: collector_id.to_string(),
            method: request.method,
            coin: self.default_coin.clone(),
            notes: None,
        };
        let quota_ids = request.quota_ids.clone();

        let payment = db
            .transaction(|conn| Box::pin(apply_bulk(conn, draft.clone(), quota_ids.clone())))
            .await?;

        info!(
            company = %company,
            sale_id = %sale_id,
            payment_id = %payment.id,
            payment_number = payment.payment_number,
            amount_cents = payment.amount_cents,
            quotas = payment.affected_quotas.len(),
            "Bulk payment applied"
        );
        Ok(payment)
    }

    /// Applies a sum of money to the sale's unpaid quotas, oldest first.
    ///
    /// Money beyond what the sale still owes is credited to the client and
    /// noted on the payment.
    pub async fn process_sequential_payment(
        &self,
        company: &str,
        sale_id: &str,
        request: &SequentialPaymentRequest,
        collector_id: &str,
    ) -> LedgerResult<Payment> {
        let amount = validate_sequential_payment(request)?;
        let db = self.registry.get(company).await?;
        ensure_sale_exists(&db, sale_id).await?;

        let draft = PaymentDraft {
            sale_id: sale_id.to_string(),
            collector_id: collector_id.to_string(),
            method: resolve_method(&request.payments),
            coin: self.default_coin.clone(),
            notes: request.notes.clone(),
        };

        let payment = db
            .transaction(|conn| Box::pin(apply_sequential(conn, draft.clone(), amount)))
            .await?;

        info!(
            company = %company,
            sale_id = %sale_id,
            payment_id = %payment.id,
            payment_number = payment.payment_number,
            amount_cents = payment.amount_cents,
            credit_cents = payment.credit_granted().cents(),
            "Sequential payment applied"
        );
        Ok(payment)
    }

    pub async fn get_payment(&self, company: &str, payment_id: &str) -> LedgerResult<Payment> {
        let db = self.registry.get(company).await?;
        let mut conn = db.acquire().await?;
        PaymentRepository::find_by_id(&mut conn, payment_id)
            .await?
            .ok_or_else(|| CoreError::PaymentNotFound(payment_id.to_string()).into())
    }

    /// The client's current credit balance.
    pub async fn client_credit(&self, company: &str, client_id: &str) -> LedgerResult<Money> {
        let db = self.registry.get(company).await?;
        let mut conn = db.acquire().await?;
        let client = ClientRepository::find_by_id(&mut conn, client_id)
            .await?
            .ok_or_else(|| CoreError::ClientNotFound(client_id.to_string()))?;
        Ok(Money::from_cents(client.credit_balance_cents))
    }
}

// =============================================================================
// Transaction Bodies
// =============================================================================

async fn apply_bulk(
    conn: &mut SqliteConnection,
    draft: PaymentDraft,
    quota_ids: Vec<String>,
) -> LedgerResult<Payment> {
    let sale = load_sale(conn, &draft.sale_id).await?;
    let quotas = QuotaRepository::find_by_ids(conn, &quota_ids).await?;
    let allocation = allocate_selected(&sale.id, &quota_ids, &quotas)?;

    let payment = record_payment(conn, &draft, &allocation, None).await?;
    QuotaRepository::mark_paid(conn, &allocation.quota_ids(), &payment.id).await?;
    settle_sale(conn, &sale, &payment, allocation.applied).await?;

    Ok(payment)
}

async fn apply_sequential(
    conn: &mut SqliteConnection,
    draft: PaymentDraft,
    amount: Money,
) -> LedgerResult<Payment> {
    let sale = load_sale(conn, &draft.sale_id).await?;
    let unpaid = QuotaRepository::find_unpaid_by_sale(conn, &sale.id).await?;
    let allocation = allocate_sequential(&sale.id, amount, &unpaid)?;

    let credit_note = if allocation.credit.is_positive() {
        ClientRepository::adjust_credit_balance(conn, &sale.client_id, allocation.credit.cents())
            .await?;
        info!(
            client_id = %sale.client_id,
            credit_cents = allocation.credit.cents(),
            "Overpayment credited to client"
        );
        Some(overpayment_note(allocation.credit))
    } else {
        None
    };

    let payment = record_payment(conn, &draft, &allocation, credit_note).await?;
    QuotaRepository::bulk_update_paid(conn, &allocation.updates, &payment.id).await?;
    settle_sale(conn, &sale, &payment, allocation.applied).await?;

    Ok(payment)
}

/// Numbers and inserts the payment row with its breakdown.
async fn record_payment(
    conn: &mut SqliteConnection,
    draft: &PaymentDraft,
    allocation: &Allocation,
    generated_note: Option<String>,
) -> LedgerResult<Payment> {
    let payment_number = PaymentRepository::next_payment_number(conn).await?;
    let now = Utc::now();

    let payment = Payment {
        id: Uuid::new_v4().to_string(),
        sale_id: draft.sale_id.clone(),
        collector_id: draft.collector_id.clone(),
        payment_number,
        payment_date: now,
        amount_cents: allocation.received().cents(),
        coin: draft.coin.clone(),
        method: draft.method,
        status: PaymentStatus::Completed,
        affected_quotas: allocation.affected.clone(),
        notes: merge_notes(draft.notes.as_deref(), generated_note),
        created_at: now,
        updated_at: now,
    };

    PaymentRepository::insert(conn, &payment).await?;
    Ok(payment)
}

/// Counts the applied money on the sale, completing it when nothing is left.
async fn settle_sale(
    conn: &mut SqliteConnection,
    sale: &Sale,
    payment: &Payment,
    applied: Money,
) -> LedgerResult<()> {
    let completed = completes_sale(sale, applied);
    debug!(sale_id = %sale.id, applied_cents = applied.cents(), completed, "Settling sale");

    SaleRepository::update_after_payment(conn, &sale.id, &payment.id, applied.cents(), completed)
        .await?;
    Ok(())
}

//! # Reversal Service
//!
//! Undoes a payment using the breakdown stored on it.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  revert_payment(company, sale_id, payment_id)     ONE transaction       │
//! │                                                                         │
//! │  1. load payment + sale                  (404 if either is missing)     │
//! │  2. plan from payment.affected_quotas    (already reverted? → 400)      │
//! │  3. payment: completed → reverted        (compare-and-set)              │
//! │  4. quotas:  paid -= applied, status = pending | overdue                │
//! │  5. sale:    collected -= applied, pending += applied, in_progress      │
//! │  6. client:  credit -= what the payment had credited                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Quota status after a revert comes from the clock: a quota whose
//! expiration date has passed goes back to `overdue`, any other to
//! `pending`. A previous `delinquent` status is not restored.

use chrono::Utc;
use sqlx::SqliteConnection;
use tracing::{error, info};

use tally_core::allocation::plan_reversal;
use tally_core::{CoreError, Payment, PaymentStatus};
use tally_db::{ClientRepository, PaymentRepository, QuotaRepository, SaleRepository, TenantRegistry};

use crate::error::{LedgerError, LedgerResult};
use crate::services::load_sale;

#[derive(Debug, Clone)]
pub struct ReversalService {
    registry: TenantRegistry,
}

impl ReversalService {
    pub fn new(registry: TenantRegistry) -> Self {
        ReversalService { registry }
    }

    /// Reverts `payment_id` on `sale_id` and returns the reverted payment.
    ///
    /// ## Errors
    /// - `PaymentNotFound` / `SaleNotFound`
    /// - `PaymentAlreadyReverted` (also when a concurrent revert wins)
    /// - `PaymentSaleMismatch`
    /// - `Inconsistent` if the breakdown names a quota that does not exist or
    ///   one holding less than the breakdown says was applied
    pub async fn revert_payment(
        &self,
        company: &str,
        sale_id: &str,
        payment_id: &str,
    ) -> LedgerResult<Payment> {
        let db = self.registry.get(company).await?;

        let (sale_id, payment_id) = (sale_id.to_string(), payment_id.to_string());
        let payment = db
            .transaction(|conn| Box::pin(apply_reversal(conn, sale_id.clone(), payment_id.clone())))
            .await?;

        info!(
            company = %company,
            sale_id = %payment.sale_id,
            payment_id = %payment.id,
            payment_number = payment.payment_number,
            amount_cents = payment.amount_cents,
            "Payment reverted"
        );
        Ok(payment)
    }
}

async fn apply_reversal(
    conn: &mut SqliteConnection,
    sale_id: String,
    payment_id: String,
) -> LedgerResult<Payment> {
    let payment = PaymentRepository::find_by_id(conn, &payment_id)
        .await?
        .ok_or_else(|| CoreError::PaymentNotFound(payment_id.clone()))?;
    let sale = load_sale(conn, &sale_id).await?;

    let quota_ids: Vec<String> = payment
        .affected_quotas
        .iter()
        .map(|aq| aq.quota_id.clone())
        .collect();
    let quotas = QuotaRepository::find_by_ids(conn, &quota_ids).await?;

    let plan = plan_reversal(&sale.id, &payment, &quotas, Utc::now())
        .map_err(|err| report_inconsistency(err.into(), &sale.id, &payment.id))?;

    PaymentRepository::update_status(
        conn,
        &payment.id,
        PaymentStatus::Completed,
        PaymentStatus::Reverted,
    )
    .await?;

    QuotaRepository::bulk_revert(conn, &plan.instructions, &payment.id)
        .await
        .map_err(|err| report_inconsistency(err.into(), &sale.id, &payment.id))?;
    SaleRepository::revert_payment_updates(conn, &sale.id, &payment.id, plan.applied.cents())
        .await?;

    if plan.credit_to_revert.is_positive() {
        ClientRepository::adjust_credit_balance(
            conn,
            &sale.client_id,
            -plan.credit_to_revert.cents(),
        )
        .await?;
    }

    let now = Utc::now();
    Ok(Payment {
        status: PaymentStatus::Reverted,
        updated_at: now,
        ..payment
    })
}

/// Logs a breakdown that contradicts the stored quotas; passes the error on.
fn report_inconsistency(err: LedgerError, sale_id: &str, payment_id: &str) -> LedgerError {
    if let LedgerError::Core(CoreError::Inconsistent(detail)) = &err {
        error!(
            sale_id = %sale_id,
            payment_id = %payment_id,
            detail = %detail,
            "Payment breakdown does not match stored quotas"
        );
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::sale::tests::{seed_sale, seed_sale_due, SeededSale};
    use crate::services::{PaymentService, SaleService};
    use chrono::Duration;
    use tally_core::{
        Money, PaymentDetail, PaymentMethod, Quota, QuotaStatus, Sale, SaleStatus,
        SequentialPaymentRequest,
    };

    struct Fixture {
        payments: PaymentService,
        reversals: ReversalService,
        sales: SaleService,
        seeded: SeededSale,
    }

    async fn fixture(amounts: &[i64]) -> Fixture {
        let registry = TenantRegistry::in_memory();
        let sales = SaleService::new(registry.clone());
        let seeded = seed_sale(&sales, "acme", amounts).await;
        Fixture {
            payments: PaymentService::new(registry.clone()),
            reversals: ReversalService::new(registry),
            sales,
            seeded,
        }
    }

    fn cash(cents: i64) -> SequentialPaymentRequest {
        SequentialPaymentRequest {
            payments: vec![PaymentDetail {
                amount_cents: cents,
                method: PaymentMethod::Cash,
            }],
            notes: None,
        }
    }

    async fn snapshot(f: &Fixture) -> (Sale, Vec<Quota>, Money) {
        let sale = f.sales.get_sale("acme", &f.seeded.sale_id).await.unwrap();
        let quotas = f.sales.list_quotas("acme", &f.seeded.sale_id).await.unwrap();
        let credit = f.payments.client_credit("acme", &f.seeded.client_id).await.unwrap();
        (sale, quotas, credit)
    }

    #[tokio::test]
    async fn test_revert_overpayment_restores_everything() {
        let f = fixture(&[1000, 1000, 1000]).await;
        let payment = f
            .payments
            .process_sequential_payment("acme", &f.seeded.sale_id, &cash(3500), "collector-1")
            .await
            .unwrap();

        let reverted = f
            .reversals
            .revert_payment("acme", &f.seeded.sale_id, &payment.id)
            .await
            .unwrap();
        assert_eq!(reverted.status, PaymentStatus::Reverted);

        let (sale, quotas, credit) = snapshot(&f).await;
        assert_eq!(sale.status, SaleStatus::InProgress);
        assert_eq!(sale.collected_amount_cents, 0);
        assert_eq!(sale.pending_amount_cents, 3000);
        assert!(sale.payment_ids.is_empty());
        assert!(credit.is_zero());
        for quota in &quotas {
            assert_eq!(quota.paid_amount_cents, 0);
            assert_eq!(quota.status, QuotaStatus::Pending);
            assert!(quota.payment_ids.is_empty());
        }
    }

    #[tokio::test]
    async fn test_round_trip_for_any_amount() {
        for amount in [700, 2500, 3000, 4200] {
            let f = fixture(&[1000, 1000, 1000]).await;
            // An earlier payment that must survive the round trip.
            f.payments
                .process_sequential_payment("acme", &f.seeded.sale_id, &cash(300), "collector-1")
                .await
                .unwrap();
            let before = snapshot(&f).await;

            let payment = f
                .payments
                .process_sequential_payment("acme", &f.seeded.sale_id, &cash(amount), "collector-1")
                .await
                .unwrap();
            let (during, _, _) = snapshot(&f).await;
            assert!(during.is_balanced(), "unbalanced after paying {}", amount);

            f.reversals
                .revert_payment("acme", &f.seeded.sale_id, &payment.id)
                .await
                .unwrap();
            let after = snapshot(&f).await;

            assert_eq!(after.0.collected_amount_cents, before.0.collected_amount_cents);
            assert_eq!(after.0.pending_amount_cents, before.0.pending_amount_cents);
            assert_eq!(after.0.payment_ids, before.0.payment_ids);
            assert_eq!(after.2, before.2, "credit differs after reverting {}", amount);
            for (a, b) in after.1.iter().zip(before.1.iter()) {
                assert_eq!(a.paid_amount_cents, b.paid_amount_cents);
                assert_eq!(a.status, b.status);
                assert_eq!(a.payment_ids, b.payment_ids);
            }
        }
    }

    #[tokio::test]
    async fn test_double_revert_fails_and_changes_nothing() {
        let f = fixture(&[1000, 1000]).await;
        let payment = f
            .payments
            .process_sequential_payment("acme", &f.seeded.sale_id, &cash(1500), "collector-1")
            .await
            .unwrap();
        f.reversals
            .revert_payment("acme", &f.seeded.sale_id, &payment.id)
            .await
            .unwrap();
        let before = snapshot(&f).await;

        let err = f
            .reversals
            .revert_payment("acme", &f.seeded.sale_id, &payment.id)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Core(CoreError::PaymentAlreadyReverted(_))));
        assert_eq!(err.to_string(), format!("payment already reverted: {}", payment.id));
        assert_eq!(err.http_status(), 400);

        let after = snapshot(&f).await;
        assert_eq!(after.0.pending_amount_cents, before.0.pending_amount_cents);
        assert_eq!(after.1, before.1);
    }

    #[tokio::test]
    async fn test_revert_through_wrong_sale_or_unknown_ids() {
        let f = fixture(&[1000]).await;
        let other = seed_sale(&f.sales, "acme", &[500]).await;
        let payment = f
            .payments
            .process_sequential_payment("acme", &f.seeded.sale_id, &cash(500), "collector-1")
            .await
            .unwrap();

        let err = f
            .reversals
            .revert_payment("acme", &other.sale_id, &payment.id)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Core(CoreError::PaymentSaleMismatch { .. })));

        let err = f
            .reversals
            .revert_payment("acme", &f.seeded.sale_id, "no-such-payment")
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Core(CoreError::PaymentNotFound(_))));

        let err = f
            .reversals
            .revert_payment("acme", "no-such-sale", &payment.id)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Core(CoreError::SaleNotFound(_))));
    }

    #[tokio::test]
    async fn test_revert_against_drifted_quota_is_inconsistent() {
        let registry = TenantRegistry::in_memory();
        let sales = SaleService::new(registry.clone());
        let payments = PaymentService::new(registry.clone());
        let reversals = ReversalService::new(registry.clone());
        let seeded = seed_sale(&sales, "acme", &[1000, 1000]).await;

        let payment = payments
            .process_sequential_payment("acme", &seeded.sale_id, &cash(500), "collector-1")
            .await
            .unwrap();

        // Quota holds less than the stored breakdown applied to it.
        {
            let db = registry.get("acme").await.unwrap();
            let mut conn = db.acquire().await.unwrap();
            sqlx::query("UPDATE quotas SET paid_amount_cents = 100 WHERE id = ?1")
                .bind(&seeded.quota_ids[0])
                .execute(&mut *conn)
                .await
                .unwrap();
        }

        let err = reversals
            .revert_payment("acme", &seeded.sale_id, &payment.id)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Core(CoreError::Inconsistent(_))));
        assert_eq!(err.kind(), crate::ErrorKind::Consistency);
        assert_eq!(err.http_status(), 500);

        // Rolled back: the payment is still live on the sale.
        let loaded = payments.get_payment("acme", &payment.id).await.unwrap();
        assert_eq!(loaded.status, PaymentStatus::Completed);
        let sale = sales.get_sale("acme", &seeded.sale_id).await.unwrap();
        assert_eq!(sale.collected_amount_cents, 500);
        assert_eq!(sale.payment_ids, vec![payment.id.clone()]);
    }

    #[tokio::test]
    async fn test_revert_marks_expired_quotas_overdue() {
        let registry = TenantRegistry::in_memory();
        let sales = SaleService::new(registry.clone());
        let payments = PaymentService::new(registry.clone());
        let reversals = ReversalService::new(registry);

        // First quota already expired, second one due next month.
        let seeded = seed_sale_due(
            &sales,
            "acme",
            &[(1000, Utc::now() - Duration::days(3)), (1000, Utc::now() + Duration::days(30))],
        )
        .await;

        let payment = payments
            .process_sequential_payment("acme", &seeded.sale_id, &cash(2000), "collector-1")
            .await
            .unwrap();
        reversals
            .revert_payment("acme", &seeded.sale_id, &payment.id)
            .await
            .unwrap();

        let quotas = sales.list_quotas("acme", &seeded.sale_id).await.unwrap();
        assert_eq!(quotas[0].status, QuotaStatus::Overdue);
        assert_eq!(quotas[1].status, QuotaStatus::Pending);
    }

    #[tokio::test]
    async fn test_revert_bulk_payment() {
        let f = fixture(&[1000, 1000, 1000]).await;
        let request = tally_core::PayQuotasRequest {
            quota_ids: f.seeded.quota_ids.clone(),
            method: PaymentMethod::DebitCard,
        };
        let payment = f
            .payments
            .process_bulk_payment("acme", &f.seeded.sale_id, &request, "collector-1")
            .await
            .unwrap();
        assert_eq!(
            f.sales.get_sale("acme", &f.seeded.sale_id).await.unwrap().status,
            SaleStatus::Completed
        );

        f.reversals
            .revert_payment("acme", &f.seeded.sale_id, &payment.id)
            .await
            .unwrap();

        let (sale, quotas, credit) = snapshot(&f).await;
        assert_eq!(sale.status, SaleStatus::InProgress);
        assert_eq!(sale.pending_amount_cents, 3000);
        assert!(quotas.iter().all(|q| q.paid_amount_cents == 0));
        assert!(credit.is_zero());
    }
}

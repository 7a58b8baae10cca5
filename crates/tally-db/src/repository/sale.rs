//! # Sale Repository
//!
//! Database operations for sales.
//!
//! ## Key Operations
//! - Insert a sale with its line items
//! - Load a sale with its quota ids and live payment ids
//! - Move collected/pending totals when a payment is applied or reverted
//!
//! ## Totals
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Sale Totals Bookkeeping                             │
//! │                                                                         │
//! │  update_after_payment(applied = 2500, completed = false)               │
//! │     collected 0     → 2500                                              │
//! │     pending   3000  → 500                                               │
//! │                                                                         │
//! │  update_after_payment(applied = 500, completed = true)                 │
//! │     collected 2500  → 3000                                              │
//! │     pending   500   → 0          status → completed                     │
//! │                                                                         │
//! │  revert_payment_updates(applied = 500)                                  │
//! │     collected 3000  → 2500                                              │
//! │     pending   0     → 500        status → in_progress                   │
//! │                                                                         │
//! │  CHECK (collected + pending = total) guards every write                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, SqliteConnection};
use tracing::debug;

use crate::error::{DbError, DbResult};
use crate::repository::{push_id_list, CounterRepository};
use tally_core::{Loan, Sale, SaleItem, SaleStatus, SaleSummary, SALE_NUMBER_COUNTER};

#[derive(Debug, sqlx::FromRow)]
struct SaleRow {
    id: String,
    sale_number: i64,
    client_id: String,
    status: SaleStatus,
    loan_principal_cents: Option<i64>,
    loan_interest_rate_bps: Option<i64>,
    loan_total_to_repay_cents: Option<i64>,
    loan_observations: Option<String>,
    total_amount_cents: i64,
    collected_amount_cents: i64,
    pending_amount_cents: i64,
    quota_count: i64,
    sale_date: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl SaleRow {
    fn into_sale(
        self,
        items: Vec<SaleItem>,
        quota_ids: Vec<String>,
        payment_ids: Vec<String>,
    ) -> Sale {
        let loan = self.loan_principal_cents.map(|principal_cents| Loan {
            principal_cents,
            interest_rate_bps: self.loan_interest_rate_bps.unwrap_or(0),
            total_to_repay_cents: self.loan_total_to_repay_cents.unwrap_or(0),
            observations: self.loan_observations,
        });

        Sale {
            id: self.id,
            sale_number: self.sale_number,
            client_id: self.client_id,
            items,
            loan,
            quota_ids,
            payment_ids,
            status: self.status,
            total_amount_cents: self.total_amount_cents,
            collected_amount_cents: self.collected_amount_cents,
            pending_amount_cents: self.pending_amount_cents,
            quota_count: self.quota_count,
            sale_date: self.sale_date,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SaleItemRow {
    id: String,
    sale_id: String,
    product_id: String,
    variant_sku: String,
    name_snapshot: String,
    quantity: i64,
    unit_price_cents: i64,
    unit_cost_cents: Option<i64>,
    subtotal_cents: i64,
}

impl From<SaleItemRow> for SaleItem {
    fn from(row: SaleItemRow) -> Self {
        SaleItem {
            id: row.id,
            sale_id: row.sale_id,
            product_id: row.product_id,
            variant_sku: row.variant_sku,
            name_snapshot: row.name_snapshot,
            quantity: row.quantity,
            unit_price_cents: row.unit_price_cents,
            unit_cost_cents: row.unit_cost_cents,
            subtotal_cents: row.subtotal_cents,
        }
    }
}

pub struct SaleRepository;

impl SaleRepository {
    /// Allocates the next sale number.
    pub async fn next_sale_number(conn: &mut SqliteConnection) -> DbResult<i64> {
        CounterRepository::next_value(conn, SALE_NUMBER_COUNTER).await
    }

    /// Inserts a sale and its line items.
    ///
    /// Quotas are inserted separately (`QuotaRepository::insert_many`) and
    /// `quota_ids`/`payment_ids` on the struct are ignored here.
    pub async fn insert(conn: &mut SqliteConnection, sale: &Sale) -> DbResult<()> {
        debug!(id = %sale.id, sale_number = sale.sale_number, "Inserting sale");

        let loan = sale.loan.as_ref().filter(|l| !l.is_empty());

        sqlx::query(
            r#"
            INSERT INTO sales (
                id, sale_number, client_id, status,
                loan_principal_cents, loan_interest_rate_bps,
                loan_total_to_repay_cents, loan_observations,
                total_amount_cents, collected_amount_cents, pending_amount_cents,
                quota_count, sale_date, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            "#,
        )
        .bind(&sale.id)
        .bind(sale.sale_number)
        .bind(&sale.client_id)
        .bind(sale.status)
        .bind(loan.map(|l| l.principal_cents))
        .bind(loan.map(|l| l.interest_rate_bps))
        .bind(loan.map(|l| l.total_to_repay_cents))
        .bind(loan.and_then(|l| l.observations.clone()))
        .bind(sale.total_amount_cents)
        .bind(sale.collected_amount_cents)
        .bind(sale.pending_amount_cents)
        .bind(sale.quota_count)
        .bind(sale.sale_date)
        .bind(sale.created_at)
        .bind(sale.updated_at)
        .execute(&mut *conn)
        .await?;

        for (position, item) in sale.items.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO sale_items (
                    id, sale_id, position, product_id, variant_sku, name_snapshot,
                    quantity, unit_price_cents, unit_cost_cents, subtotal_cents
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                "#,
            )
            .bind(&item.id)
            .bind(&sale.id)
            .bind(position as i64)
            .bind(&item.product_id)
            .bind(&item.variant_sku)
            .bind(&item.name_snapshot)
            .bind(item.quantity)
            .bind(item.unit_price_cents)
            .bind(item.unit_cost_cents)
            .bind(item.subtotal_cents)
            .execute(&mut *conn)
            .await?;
        }

        Ok(())
    }

    /// Loads a sale with items, quota ids (ascending quota number) and the
    /// payments currently counted in its totals.
    pub async fn find_by_id(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Sale>> {
        let row: Option<SaleRow> = sqlx::query_as(
            r#"
            SELECT
                id, sale_number, client_id, status,
                loan_principal_cents, loan_interest_rate_bps,
                loan_total_to_repay_cents, loan_observations,
                total_amount_cents, collected_amount_cents, pending_amount_cents,
                quota_count, sale_date, created_at, updated_at
            FROM sales
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let items: Vec<SaleItemRow> = sqlx::query_as(
            r#"
            SELECT
                id, sale_id, product_id, variant_sku, name_snapshot,
                quantity, unit_price_cents, unit_cost_cents, subtotal_cents
            FROM sale_items
            WHERE sale_id = ?1
            ORDER BY position
            "#,
        )
        .bind(id)
        .fetch_all(&mut *conn)
        .await?;

        let quota_ids: Vec<String> =
            sqlx::query_scalar("SELECT id FROM quotas WHERE sale_id = ?1 ORDER BY quota_number")
                .bind(id)
                .fetch_all(&mut *conn)
                .await?;

        let payment_ids: Vec<String> =
            sqlx::query_scalar("SELECT payment_id FROM sale_payments WHERE sale_id = ?1 ORDER BY rowid")
                .bind(id)
                .fetch_all(&mut *conn)
                .await?;

        Ok(Some(row.into_sale(
            items.into_iter().map(SaleItem::from).collect(),
            quota_ids,
            payment_ids,
        )))
    }

    /// Sale number and date for several sales, paired with each sale's client id.
    pub async fn find_summaries(
        conn: &mut SqliteConnection,
        ids: &[String],
    ) -> DbResult<Vec<(SaleSummary, String)>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut qb =
            QueryBuilder::new("SELECT id, sale_number, sale_date, client_id FROM sales WHERE id IN ");
        push_id_list(&mut qb, ids);

        let rows: Vec<(String, i64, DateTime<Utc>, String)> =
            qb.build_query_as().fetch_all(&mut *conn).await?;

        Ok(rows
            .into_iter()
            .map(|(id, sale_number, sale_date, client_id)| {
                (
                    SaleSummary {
                        id,
                        sale_number,
                        sale_date,
                    },
                    client_id,
                )
            })
            .collect())
    }

    /// Counts `applied_cents` as collected and links the payment.
    ///
    /// With `completed` the sale flips to `completed` and pending is forced
    /// to zero; otherwise pending drops by the applied amount, floored at zero.
    pub async fn update_after_payment(
        conn: &mut SqliteConnection,
        sale_id: &str,
        payment_id: &str,
        applied_cents: i64,
        completed: bool,
    ) -> DbResult<()> {
        debug!(
            sale_id = %sale_id,
            payment_id = %payment_id,
            applied_cents,
            completed,
            "Updating sale after payment"
        );

        let result = sqlx::query(
            r#"
            UPDATE sales SET
                collected_amount_cents = collected_amount_cents + ?2,
                pending_amount_cents = CASE
                    WHEN ?3 THEN 0
                    ELSE MAX(pending_amount_cents - ?2, 0)
                END,
                status = CASE WHEN ?3 THEN ?4 ELSE status END,
                updated_at = ?5
            WHERE id = ?1
            "#,
        )
        .bind(sale_id)
        .bind(applied_cents)
        .bind(completed)
        .bind(SaleStatus::Completed)
        .bind(Utc::now())
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Sale", sale_id));
        }

        sqlx::query("INSERT OR IGNORE INTO sale_payments (sale_id, payment_id) VALUES (?1, ?2)")
            .bind(sale_id)
            .bind(payment_id)
            .execute(&mut *conn)
            .await?;

        Ok(())
    }

    /// Takes `applied_cents` back out of collected, unlinks the payment and
    /// returns the sale to `in_progress`.
    pub async fn revert_payment_updates(
        conn: &mut SqliteConnection,
        sale_id: &str,
        payment_id: &str,
        applied_cents: i64,
    ) -> DbResult<()> {
        debug!(
            sale_id = %sale_id,
            payment_id = %payment_id,
            applied_cents,
            "Reverting sale totals"
        );

        let result = sqlx::query(
            r#"
            UPDATE sales SET
                collected_amount_cents = collected_amount_cents - ?2,
                pending_amount_cents = pending_amount_cents + ?2,
                status = ?3,
                updated_at = ?4
            WHERE id = ?1
            "#,
        )
        .bind(sale_id)
        .bind(applied_cents)
        .bind(SaleStatus::InProgress)
        .bind(Utc::now())
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Sale", sale_id));
        }

        sqlx::query("DELETE FROM sale_payments WHERE sale_id = ?1 AND payment_id = ?2")
            .bind(sale_id)
            .bind(payment_id)
            .execute(&mut *conn)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::repository::ClientRepository;
    use crate::{Database, DbConfig};
    use tally_core::Client;

    /// Inserts client `c-1` and a sale `s-1` owing `total_cents`.
    pub(crate) async fn seed_sale(conn: &mut SqliteConnection, total_cents: i64, quota_count: i64) {
        let now = Utc::now();
        ClientRepository::insert(
            conn,
            &Client {
                id: "c-1".to_string(),
                name: "Ana".to_string(),
                last_name: "Pérez".to_string(),
                email: None,
                credit_balance_cents: 0,
                created_at: now,
                updated_at: now,
            },
        )
        .await
        .unwrap();

        let sale_number = SaleRepository::next_sale_number(conn).await.unwrap();
        SaleRepository::insert(
            conn,
            &Sale {
                id: "s-1".to_string(),
                sale_number,
                client_id: "c-1".to_string(),
                items: vec![SaleItem {
                    id: "i-1".to_string(),
                    sale_id: "s-1".to_string(),
                    product_id: "prod-1".to_string(),
                    variant_sku: "TV-55".to_string(),
                    name_snapshot: "Television 55\"".to_string(),
                    quantity: 1,
                    unit_price_cents: total_cents,
                    unit_cost_cents: None,
                    subtotal_cents: total_cents,
                }],
                loan: None,
                quota_ids: vec![],
                payment_ids: vec![],
                status: SaleStatus::InProgress,
                total_amount_cents: total_cents,
                collected_amount_cents: 0,
                pending_amount_cents: total_cents,
                quota_count,
                sale_date: now,
                created_at: now,
                updated_at: now,
            },
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_insert_and_load_sale() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut conn = db.acquire().await.unwrap();
        seed_sale(&mut conn, 3000, 3).await;

        let sale = SaleRepository::find_by_id(&mut conn, "s-1").await.unwrap().unwrap();
        assert_eq!(sale.sale_number, 1);
        assert_eq!(sale.items.len(), 1);
        assert_eq!(sale.items[0].variant_sku, "TV-55");
        assert!(sale.loan.is_none());
        assert_eq!(sale.status, SaleStatus::InProgress);
        assert!(sale.is_balanced());

        assert!(SaleRepository::find_by_id(&mut conn, "nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_payment_then_revert_restores_totals() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut conn = db.acquire().await.unwrap();
        seed_sale(&mut conn, 3000, 3).await;

        SaleRepository::update_after_payment(&mut conn, "s-1", "p-1", 2500, false)
            .await
            .unwrap();
        let sale = SaleRepository::find_by_id(&mut conn, "s-1").await.unwrap().unwrap();
        assert_eq!(sale.collected_amount_cents, 2500);
        assert_eq!(sale.pending_amount_cents, 500);
        assert_eq!(sale.payment_ids, vec!["p-1"]);

        SaleRepository::update_after_payment(&mut conn, "s-1", "p-2", 500, true)
            .await
            .unwrap();
        let sale = SaleRepository::find_by_id(&mut conn, "s-1").await.unwrap().unwrap();
        assert_eq!(sale.status, SaleStatus::Completed);
        assert_eq!(sale.pending_amount_cents, 0);
        assert_eq!(sale.payment_ids, vec!["p-1", "p-2"]);

        SaleRepository::revert_payment_updates(&mut conn, "s-1", "p-2", 500)
            .await
            .unwrap();
        let sale = SaleRepository::find_by_id(&mut conn, "s-1").await.unwrap().unwrap();
        assert_eq!(sale.status, SaleStatus::InProgress);
        assert_eq!(sale.collected_amount_cents, 2500);
        assert_eq!(sale.pending_amount_cents, 500);
        assert_eq!(sale.payment_ids, vec!["p-1"]);
    }

    #[tokio::test]
    async fn test_unbalanced_update_is_rejected() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut conn = db.acquire().await.unwrap();
        seed_sale(&mut conn, 3000, 3).await;

        // Completing with less than the pending amount would break the totals check.
        let err = SaleRepository::update_after_payment(&mut conn, "s-1", "p-1", 100, true)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::CheckViolation { .. }));
    }

    #[tokio::test]
    async fn test_unknown_sale_is_not_found() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut conn = db.acquire().await.unwrap();

        let err = SaleRepository::revert_payment_updates(&mut conn, "ghost", "p-1", 100)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }
}

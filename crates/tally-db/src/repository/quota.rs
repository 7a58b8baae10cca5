//! # Quota Repository
//!
//! Quota reads and the bulk writes that payments, reversals and
//! rescheduling perform. No business rules live here: the caller decides
//! the new paid amounts and statuses, this module only stores them.
//!
//! ## Guarded Writes
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Why Writes Carry a WHERE Guard                       │
//! │                                                                         │
//! │  Payment A reads Q1 (pending)        Payment B reads Q1 (pending)      │
//! │       │                                   │                             │
//! │       ▼                                   ▼                             │
//! │  UPDATE quotas ... WHERE id = Q1     UPDATE quotas ... WHERE id = Q1   │
//! │                  AND status != 'paid'               AND status != 'paid'│
//! │       │                                   │                             │
//! │       ▼                                   ▼                             │
//! │  1 row affected → commit              0 rows affected → Conflict       │
//! │                                       (whole transaction rolls back)   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, SqliteConnection};
use std::collections::HashMap;
use tracing::debug;

use crate::error::{DbError, DbResult};
use crate::repository::push_id_list;
use tally_core::allocation::{QuotaUpdate, ReversalInstruction};
use tally_core::{Quota, QuotaReschedule, QuotaStatus};

const QUOTA_COLUMNS: &str = "id, sale_id, quota_number, expiration_date, amount_cents, \
     paid_amount_cents, coin, status, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct QuotaRow {
    id: String,
    sale_id: String,
    quota_number: i64,
    expiration_date: DateTime<Utc>,
    amount_cents: i64,
    paid_amount_cents: i64,
    coin: String,
    status: QuotaStatus,
    updated_at: DateTime<Utc>,
}

impl From<QuotaRow> for Quota {
    fn from(row: QuotaRow) -> Self {
        Quota {
            id: row.id,
            sale_id: row.sale_id,
            quota_number: row.quota_number,
            expiration_date: row.expiration_date,
            amount_cents: row.amount_cents,
            paid_amount_cents: row.paid_amount_cents,
            coin: row.coin,
            status: row.status,
            payment_ids: Vec::new(),
            updated_at: row.updated_at,
        }
    }
}

pub struct QuotaRepository;

impl QuotaRepository {
    /// Inserts the quotas of a freshly created sale.
    pub async fn insert_many(conn: &mut SqliteConnection, quotas: &[Quota]) -> DbResult<()> {
        debug!(count = quotas.len(), "Inserting quotas");

        for quota in quotas {
            sqlx::query(
                r#"
                INSERT INTO quotas (
                    id, sale_id, quota_number, expiration_date, amount_cents,
                    paid_amount_cents, coin, status, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
                "#,
            )
            .bind(&quota.id)
            .bind(&quota.sale_id)
            .bind(quota.quota_number)
            .bind(quota.expiration_date)
            .bind(quota.amount_cents)
            .bind(quota.paid_amount_cents)
            .bind(&quota.coin)
            .bind(quota.status)
            .bind(quota.updated_at)
            .execute(&mut *conn)
            .await?;
        }

        Ok(())
    }

    /// Loads the given quotas in one query. Unknown ids are simply absent
    /// from the result; the caller decides whether that is an error.
    pub async fn find_by_ids(conn: &mut SqliteConnection, ids: &[String]) -> DbResult<Vec<Quota>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut qb = QueryBuilder::new(format!("SELECT {} FROM quotas WHERE id IN ", QUOTA_COLUMNS));
        push_id_list(&mut qb, ids);
        qb.push(" ORDER BY sale_id, quota_number");

        let rows: Vec<QuotaRow> = qb.build_query_as().fetch_all(&mut *conn).await?;
        Self::with_payment_ids(conn, rows).await
    }

    /// Every quota of a sale, ascending quota number.
    pub async fn find_by_sale(conn: &mut SqliteConnection, sale_id: &str) -> DbResult<Vec<Quota>> {
        let rows: Vec<QuotaRow> = sqlx::query_as(&format!(
            "SELECT {} FROM quotas WHERE sale_id = ?1 ORDER BY quota_number",
            QUOTA_COLUMNS
        ))
        .bind(sale_id)
        .fetch_all(&mut *conn)
        .await?;

        Self::with_payment_ids(conn, rows).await
    }

    /// Quotas of a sale that still owe money, ascending quota number.
    pub async fn find_unpaid_by_sale(
        conn: &mut SqliteConnection,
        sale_id: &str,
    ) -> DbResult<Vec<Quota>> {
        let rows: Vec<QuotaRow> = sqlx::query_as(&format!(
            "SELECT {} FROM quotas WHERE sale_id = ?1 AND status != ?2 ORDER BY quota_number",
            QUOTA_COLUMNS
        ))
        .bind(sale_id)
        .bind(QuotaStatus::Paid)
        .fetch_all(&mut *conn)
        .await?;

        Self::with_payment_ids(conn, rows).await
    }

    /// Closes each quota in full and links the payment to it.
    ///
    /// ## Errors
    /// `Conflict` if a quota is already paid (or does not exist).
    pub async fn mark_paid(
        conn: &mut SqliteConnection,
        quota_ids: &[String],
        payment_id: &str,
    ) -> DbResult<()> {
        debug!(count = quota_ids.len(), payment_id = %payment_id, "Marking quotas paid");
        let now = Utc::now();

        for quota_id in quota_ids {
            let result = sqlx::query(
                r#"
                UPDATE quotas SET
                    paid_amount_cents = amount_cents,
                    status = ?2,
                    updated_at = ?3
                WHERE id = ?1 AND status != ?2
                "#,
            )
            .bind(quota_id)
            .bind(QuotaStatus::Paid)
            .bind(now)
            .execute(&mut *conn)
            .await?;

            if result.rows_affected() == 0 {
                return Err(DbError::conflict("Quota", quota_id));
            }

            Self::link_payment(conn, quota_id, payment_id).await?;
        }

        Ok(())
    }

    /// Writes new cumulative paid amounts and statuses from an allocation.
    ///
    /// ## Errors
    /// `Conflict` if a quota was paid by someone else in the meantime.
    pub async fn bulk_update_paid(
        conn: &mut SqliteConnection,
        updates: &[QuotaUpdate],
        payment_id: &str,
    ) -> DbResult<()> {
        debug!(count = updates.len(), payment_id = %payment_id, "Updating quota paid amounts");
        let now = Utc::now();

        for update in updates {
            let result = sqlx::query(
                r#"
                UPDATE quotas SET
                    paid_amount_cents = ?2,
                    status = ?3,
                    updated_at = ?4
                WHERE id = ?1 AND status != ?5
                "#,
            )
            .bind(&update.quota_id)
            .bind(update.paid_amount_cents)
            .bind(update.status)
            .bind(now)
            .bind(QuotaStatus::Paid)
            .execute(&mut *conn)
            .await?;

            if result.rows_affected() == 0 {
                return Err(DbError::conflict("Quota", &update.quota_id));
            }

            Self::link_payment(conn, &update.quota_id, payment_id).await?;
        }

        Ok(())
    }

    /// Takes a payment's money back off its quotas and unlinks it.
    ///
    /// ## Errors
    /// `Conflict` on entity `QuotaBalance` if a quota holds less than the
    /// amount to revert. Stored breakdowns never allow that, so callers treat
    /// it as corrupted state rather than a lost race.
    pub async fn bulk_revert(
        conn: &mut SqliteConnection,
        instructions: &[ReversalInstruction],
        payment_id: &str,
    ) -> DbResult<()> {
        debug!(count = instructions.len(), payment_id = %payment_id, "Reverting quotas");
        let now = Utc::now();

        for instruction in instructions {
            let result = sqlx::query(
                r#"
                UPDATE quotas SET
                    paid_amount_cents = paid_amount_cents - ?2,
                    status = ?3,
                    updated_at = ?4
                WHERE id = ?1 AND paid_amount_cents >= ?2
                "#,
            )
            .bind(&instruction.quota_id)
            .bind(instruction.amount_to_revert_cents)
            .bind(instruction.new_status)
            .bind(now)
            .execute(&mut *conn)
            .await?;

            if result.rows_affected() == 0 {
                return Err(DbError::conflict("QuotaBalance", &instruction.quota_id));
            }

            sqlx::query("DELETE FROM quota_payments WHERE quota_id = ?1 AND payment_id = ?2")
                .bind(&instruction.quota_id)
                .bind(payment_id)
                .execute(&mut *conn)
                .await?;
        }

        Ok(())
    }

    /// Moves quotas to a new expiration date and status.
    ///
    /// ## Errors
    /// `Conflict` if a quota became paid since it was validated.
    pub async fn bulk_reschedule(
        conn: &mut SqliteConnection,
        updates: &[QuotaReschedule],
    ) -> DbResult<()> {
        debug!(count = updates.len(), "Rescheduling quotas");
        let now = Utc::now();

        for update in updates {
            let result = sqlx::query(
                r#"
                UPDATE quotas SET
                    expiration_date = ?2,
                    status = ?3,
                    updated_at = ?4
                WHERE id = ?1 AND status != ?5
                "#,
            )
            .bind(&update.quota_id)
            .bind(update.new_expiration_date)
            .bind(update.new_status)
            .bind(now)
            .bind(QuotaStatus::Paid)
            .execute(&mut *conn)
            .await?;

            if result.rows_affected() == 0 {
                return Err(DbError::conflict("Quota", &update.quota_id));
            }
        }

        Ok(())
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn link_payment(
        conn: &mut SqliteConnection,
        quota_id: &str,
        payment_id: &str,
    ) -> DbResult<()> {
        sqlx::query("INSERT OR IGNORE INTO quota_payments (quota_id, payment_id) VALUES (?1, ?2)")
            .bind(quota_id)
            .bind(payment_id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// Fills `payment_ids` for every row with one extra query.
    async fn with_payment_ids(
        conn: &mut SqliteConnection,
        rows: Vec<QuotaRow>,
    ) -> DbResult<Vec<Quota>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
        let mut qb =
            QueryBuilder::new("SELECT quota_id, payment_id FROM quota_payments WHERE quota_id IN ");
        push_id_list(&mut qb, &ids);
        qb.push(" ORDER BY rowid");

        let links: Vec<(String, String)> = qb.build_query_as().fetch_all(&mut *conn).await?;

        let mut by_quota: HashMap<String, Vec<String>> = HashMap::new();
        for (quota_id, payment_id) in links {
            by_quota.entry(quota_id).or_default().push(payment_id);
        }

        Ok(rows
            .into_iter()
            .map(|row| {
                let payment_ids = by_quota.remove(&row.id).unwrap_or_default();
                Quota {
                    payment_ids,
                    ..Quota::from(row)
                }
            })
            .collect())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::repository::sale::tests::seed_sale;
    use crate::{Database, DbConfig};
    use chrono::Duration;

    /// Seeds sale `s-1` with `amounts.len()` quotas `q-1`, `q-2`, ...
    pub(crate) async fn seed_quotas(conn: &mut SqliteConnection, amounts: &[i64]) {
        seed_sale(conn, amounts.iter().sum(), amounts.len() as i64).await;

        let now = Utc::now();
        let quotas: Vec<Quota> = amounts
            .iter()
            .enumerate()
            .map(|(i, amount)| Quota {
                id: format!("q-{}", i + 1),
                sale_id: "s-1".to_string(),
                quota_number: i as i64 + 1,
                expiration_date: now + Duration::days(30 * (i as i64 + 1)),
                amount_cents: *amount,
                paid_amount_cents: 0,
                coin: "ARS".to_string(),
                status: QuotaStatus::Pending,
                payment_ids: vec![],
                updated_at: now,
            })
            .collect();

        QuotaRepository::insert_many(conn, &quotas).await.unwrap();
    }

    fn ids(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_find_unpaid_is_ordered_and_skips_paid() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut conn = db.acquire().await.unwrap();
        seed_quotas(&mut conn, &[1000, 1000, 1000]).await;

        QuotaRepository::mark_paid(&mut conn, &ids(&["q-2"]), "p-1").await.unwrap();

        let unpaid = QuotaRepository::find_unpaid_by_sale(&mut conn, "s-1").await.unwrap();
        let numbers: Vec<i64> = unpaid.iter().map(|q| q.quota_number).collect();
        assert_eq!(numbers, vec![1, 3]);

        let all = QuotaRepository::find_by_sale(&mut conn, "s-1").await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[1].payment_ids, vec!["p-1"]);
        assert_eq!(all[1].paid_amount_cents, 1000);
    }

    #[tokio::test]
    async fn test_mark_paid_twice_conflicts() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut conn = db.acquire().await.unwrap();
        seed_quotas(&mut conn, &[1000, 1000]).await;

        QuotaRepository::mark_paid(&mut conn, &ids(&["q-1"]), "p-1").await.unwrap();
        let err = QuotaRepository::mark_paid(&mut conn, &ids(&["q-1"]), "p-2")
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_partial_update_then_revert() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut conn = db.acquire().await.unwrap();
        seed_quotas(&mut conn, &[1000]).await;

        QuotaRepository::bulk_update_paid(
            &mut conn,
            &[QuotaUpdate {
                quota_id: "q-1".to_string(),
                paid_amount_cents: 400,
                status: QuotaStatus::Pending,
            }],
            "p-1",
        )
        .await
        .unwrap();

        let quota = &QuotaRepository::find_by_ids(&mut conn, &ids(&["q-1"])).await.unwrap()[0];
        assert_eq!(quota.paid_amount_cents, 400);
        assert_eq!(quota.payment_ids, vec!["p-1"]);

        QuotaRepository::bulk_revert(
            &mut conn,
            &[ReversalInstruction {
                quota_id: "q-1".to_string(),
                amount_to_revert_cents: 400,
                new_status: QuotaStatus::Overdue,
            }],
            "p-1",
        )
        .await
        .unwrap();

        let quota = &QuotaRepository::find_by_ids(&mut conn, &ids(&["q-1"])).await.unwrap()[0];
        assert_eq!(quota.paid_amount_cents, 0);
        assert_eq!(quota.status, QuotaStatus::Overdue);
        assert!(quota.payment_ids.is_empty());
    }

    #[tokio::test]
    async fn test_revert_more_than_paid_conflicts() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut conn = db.acquire().await.unwrap();
        seed_quotas(&mut conn, &[1000]).await;

        let err = QuotaRepository::bulk_revert(
            &mut conn,
            &[ReversalInstruction {
                quota_id: "q-1".to_string(),
                amount_to_revert_cents: 1,
                new_status: QuotaStatus::Pending,
            }],
            "p-1",
        )
        .await
        .unwrap_err();
        assert!(matches!(err, DbError::Conflict { ref entity, ref id } if entity == "QuotaBalance" && id == "q-1"));
    }

    #[tokio::test]
    async fn test_reschedule_updates_and_guards_paid() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut conn = db.acquire().await.unwrap();
        seed_quotas(&mut conn, &[1000, 1000]).await;
        QuotaRepository::mark_paid(&mut conn, &ids(&["q-2"]), "p-1").await.unwrap();

        let new_date = Utc::now() + Duration::days(90);
        QuotaRepository::bulk_reschedule(
            &mut conn,
            &[QuotaReschedule {
                quota_id: "q-1".to_string(),
                new_expiration_date: new_date,
                new_status: QuotaStatus::Delinquent,
            }],
        )
        .await
        .unwrap();

        let quota = &QuotaRepository::find_by_ids(&mut conn, &ids(&["q-1"])).await.unwrap()[0];
        assert_eq!(quota.status, QuotaStatus::Delinquent);
        assert_eq!(quota.expiration_date.timestamp(), new_date.timestamp());

        let err = QuotaRepository::bulk_reschedule(
            &mut conn,
            &[QuotaReschedule {
                quota_id: "q-2".to_string(),
                new_expiration_date: new_date,
                new_status: QuotaStatus::Pending,
            }],
        )
        .await
        .unwrap_err();
        assert!(matches!(err, DbError::Conflict { .. }));
    }
}

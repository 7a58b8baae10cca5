//! # Payment Repository
//!
//! Payments, their immutable quota breakdown, and the filtered listing.
//!
//! ## Listing Filters
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  PaymentFilter { start_date: 2026-03-01, end_date: 2026-03-31,          │
//! │                  statuses: [completed] }                                │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  WHERE payment_date >= '2026-03-01T00:00:00+00:00'                      │
//! │    AND payment_date <  '2026-04-01T00:00:00+00:00'   (whole end day)    │
//! │    AND status IN ('completed')                                          │
//! │  ORDER BY payment_date DESC, payment_number DESC                        │
//! │  LIMIT ? OFFSET ?                                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Days, NaiveDate, NaiveTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use std::collections::HashMap;
use tracing::debug;

use crate::error::{DbError, DbResult};
use crate::repository::{push_id_list, CounterRepository};
use tally_core::{
    AffectedQuota, Payment, PaymentFilter, PaymentMethod, PaymentStatus, PAYMENT_NUMBER_COUNTER,
};

#[derive(Debug, sqlx::FromRow)]
struct PaymentRow {
    id: String,
    payment_number: i64,
    sale_id: String,
    collector_id: String,
    payment_date: DateTime<Utc>,
    amount_cents: i64,
    coin: String,
    method: PaymentMethod,
    status: PaymentStatus,
    notes: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl PaymentRow {
    fn into_payment(self, affected_quotas: Vec<AffectedQuota>) -> Payment {
        Payment {
            id: self.id,
            sale_id: self.sale_id,
            collector_id: self.collector_id,
            payment_number: self.payment_number,
            payment_date: self.payment_date,
            amount_cents: self.amount_cents,
            coin: self.coin,
            method: self.method,
            status: self.status,
            affected_quotas,
            notes: self.notes,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

const PAYMENT_COLUMNS: &str = "id, payment_number, sale_id, collector_id, payment_date, \
     amount_cents, coin, method, status, notes, created_at, updated_at";

pub struct PaymentRepository;

impl PaymentRepository {
    /// Allocates the next payment number.
    pub async fn next_payment_number(conn: &mut SqliteConnection) -> DbResult<i64> {
        CounterRepository::next_value(conn, PAYMENT_NUMBER_COUNTER).await
    }

    /// Inserts a payment and its breakdown. The breakdown is never updated
    /// afterwards.
    pub async fn insert(conn: &mut SqliteConnection, payment: &Payment) -> DbResult<()> {
        debug!(
            id = %payment.id,
            payment_number = payment.payment_number,
            amount_cents = payment.amount_cents,
            "Inserting payment"
        );

        sqlx::query(
            r#"
            INSERT INTO payments (
                id, payment_number, sale_id, collector_id, payment_date,
                amount_cents, coin, method, status, notes, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(&payment.id)
        .bind(payment.payment_number)
        .bind(&payment.sale_id)
        .bind(&payment.collector_id)
        .bind(payment.payment_date)
        .bind(payment.amount_cents)
        .bind(&payment.coin)
        .bind(payment.method)
        .bind(payment.status)
        .bind(&payment.notes)
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .execute(&mut *conn)
        .await?;

        for (position, affected) in payment.affected_quotas.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO payment_quotas (payment_id, position, quota_id, amount_applied_cents)
                VALUES (?1, ?2, ?3, ?4)
                "#,
            )
            .bind(&payment.id)
            .bind(position as i64)
            .bind(&affected.quota_id)
            .bind(affected.amount_applied_cents)
            .execute(&mut *conn)
            .await?;
        }

        Ok(())
    }

    pub async fn find_by_id(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Payment>> {
        let row: Option<PaymentRow> = sqlx::query_as(&format!(
            "SELECT {} FROM payments WHERE id = ?1",
            PAYMENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut payments = Self::with_breakdowns(conn, vec![row]).await?;
        Ok(payments.pop())
    }

    /// Compare-and-set on the payment status.
    ///
    /// ## Errors
    /// `Conflict` if the payment is not currently in `expected`.
    pub async fn update_status(
        conn: &mut SqliteConnection,
        id: &str,
        expected: PaymentStatus,
        new_status: PaymentStatus,
    ) -> DbResult<()> {
        debug!(id = %id, from = %expected, to = %new_status, "Updating payment status");

        let result = sqlx::query(
            "UPDATE payments SET status = ?3, updated_at = ?4 WHERE id = ?1 AND status = ?2",
        )
        .bind(id)
        .bind(expected)
        .bind(new_status)
        .bind(Utc::now())
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::conflict("Payment", id));
        }

        Ok(())
    }

    /// One page of payments matching `filter`, newest first, plus the total
    /// number of matches.
    ///
    /// `page` is 1-based. Callers validate `page`/`limit` beforehand; a page
    /// whose row offset does not fit in an `i64` fails with `QueryFailed`.
    pub async fn list(
        conn: &mut SqliteConnection,
        filter: &PaymentFilter,
        page: i64,
        limit: i64,
    ) -> DbResult<(Vec<Payment>, i64)> {
        let mut count_qb = QueryBuilder::new("SELECT COUNT(*) FROM payments WHERE 1 = 1");
        push_filters(&mut count_qb, filter);
        let offset = page
            .saturating_sub(1)
            .max(0)
            .checked_mul(limit)
            .ok_or_else(|| DbError::QueryFailed(format!("page {} out of range", page)))?;

        let total: i64 = count_qb.build_query_scalar().fetch_one(&mut *conn).await?;

        let mut qb = QueryBuilder::new(format!("SELECT {} FROM payments WHERE 1 = 1", PAYMENT_COLUMNS));
        push_filters(&mut qb, filter);
        qb.push(" ORDER BY payment_date DESC, payment_number DESC LIMIT ");
        qb.push_bind(limit);
        qb.push(" OFFSET ");
        qb.push_bind(offset);

        let rows: Vec<PaymentRow> = qb.build_query_as().fetch_all(&mut *conn).await?;
        debug!(total, returned = rows.len(), page, limit, "Listed payments");

        Ok((Self::with_breakdowns(conn, rows).await?, total))
    }

    /// Attaches the stored breakdown to each row with one extra query.
    async fn with_breakdowns(
        conn: &mut SqliteConnection,
        rows: Vec<PaymentRow>,
    ) -> DbResult<Vec<Payment>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
        let mut qb = QueryBuilder::new(
            "SELECT payment_id, quota_id, amount_applied_cents FROM payment_quotas WHERE payment_id IN ",
        );
        push_id_list(&mut qb, &ids);
        qb.push(" ORDER BY payment_id, position");

        let entries: Vec<(String, String, i64)> = qb.build_query_as().fetch_all(&mut *conn).await?;

        let mut by_payment: HashMap<String, Vec<AffectedQuota>> = HashMap::new();
        for (payment_id, quota_id, amount_applied_cents) in entries {
            by_payment.entry(payment_id).or_default().push(AffectedQuota {
                quota_id,
                amount_applied_cents,
            });
        }

        Ok(rows
            .into_iter()
            .map(|row| {
                let affected = by_payment.remove(&row.id).unwrap_or_default();
                row.into_payment(affected)
            })
            .collect())
    }
}

fn day_start(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

fn push_filters(qb: &mut QueryBuilder<'_, Sqlite>, filter: &PaymentFilter) {
    if let Some(start) = filter.start_date {
        qb.push(" AND payment_date >= ");
        qb.push_bind(day_start(start));
    }

    if let Some(end) = filter.end_date {
        // Exclusive bound at the start of the following day.
        if let Some(next_day) = end.checked_add_days(Days::new(1)) {
            qb.push(" AND payment_date < ");
            qb.push_bind(day_start(next_day));
        }
    }

    if !filter.statuses.is_empty() {
        qb.push(" AND status IN (");
        let mut separated = qb.separated(", ");
        for status in &filter.statuses {
            separated.push_bind(*status);
        }
        separated.push_unseparated(")");
    }
}

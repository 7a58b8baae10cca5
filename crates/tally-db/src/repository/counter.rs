//! Named monotonic counters.
//!
//! Sale and payment numbers come from here. The increment is a single
//! upsert, so two transactions can never be handed the same number.

use sqlx::SqliteConnection;

use crate::error::DbResult;

pub struct CounterRepository;

impl CounterRepository {
    /// Increments `name` and returns the new value. The first call returns 1.
    pub async fn next_value(conn: &mut SqliteConnection, name: &str) -> DbResult<i64> {
        let value: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO counters (name, value) VALUES (?1, 1)
            ON CONFLICT(name) DO UPDATE SET value = value + 1
            RETURNING value
            "#,
        )
        .bind(name)
        .fetch_one(&mut *conn)
        .await?;

        Ok(value)
    }

    /// Current value without incrementing; 0 if never used.
    pub async fn current(conn: &mut SqliteConnection, name: &str) -> DbResult<i64> {
        let value: Option<i64> = sqlx::query_scalar("SELECT value FROM counters WHERE name = ?1")
            .bind(name)
            .fetch_optional(&mut *conn)
            .await?;

        Ok(value.unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};

    #[tokio::test]
    async fn test_counters_are_independent_and_monotonic() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut conn = db.acquire().await.unwrap();

        assert_eq!(CounterRepository::current(&mut conn, "sale_number_seq").await.unwrap(), 0);
        assert_eq!(CounterRepository::next_value(&mut conn, "sale_number_seq").await.unwrap(), 1);
        assert_eq!(CounterRepository::next_value(&mut conn, "sale_number_seq").await.unwrap(), 2);
        assert_eq!(CounterRepository::next_value(&mut conn, "payment_number_seq").await.unwrap(), 1);
        assert_eq!(CounterRepository::current(&mut conn, "sale_number_seq").await.unwrap(), 2);
    }
}

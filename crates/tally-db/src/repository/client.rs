//! # Client Repository
//!
//! Clients and their credit balance. The balance only moves through
//! [`ClientRepository::adjust_credit_balance`], an atomic `+=` in SQL, so
//! concurrent adjustments never overwrite each other.

use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, SqliteConnection};
use tracing::debug;

use crate::error::{DbError, DbResult};
use crate::repository::push_id_list;
use tally_core::{Client, ClientSummary};

#[derive(Debug, sqlx::FromRow)]
struct ClientRow {
    id: String,
    name: String,
    last_name: String,
    email: Option<String>,
    credit_balance_cents: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ClientRow> for Client {
    fn from(row: ClientRow) -> Self {
        Client {
            id: row.id,
            name: row.name,
            last_name: row.last_name,
            email: row.email,
            credit_balance_cents: row.credit_balance_cents,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

pub struct ClientRepository;

impl ClientRepository {
    pub async fn insert(conn: &mut SqliteConnection, client: &Client) -> DbResult<()> {
        debug!(id = %client.id, "Inserting client");

        sqlx::query(
            r#"
            INSERT INTO clients (
                id, name, last_name, email, credit_balance_cents, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&client.id)
        .bind(&client.name)
        .bind(&client.last_name)
        .bind(&client.email)
        .bind(client.credit_balance_cents)
        .bind(client.created_at)
        .bind(client.updated_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    pub async fn find_by_id(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Client>> {
        let row: Option<ClientRow> = sqlx::query_as(
            r#"
            SELECT id, name, last_name, email, credit_balance_cents, created_at, updated_at
            FROM clients
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(row.map(Client::from))
    }

    /// Name fields for several clients at once. Unknown ids are skipped.
    pub async fn find_summaries(
        conn: &mut SqliteConnection,
        ids: &[String],
    ) -> DbResult<Vec<ClientSummary>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut qb = QueryBuilder::new("SELECT id, name, last_name FROM clients WHERE id IN ");
        push_id_list(&mut qb, ids);

        let rows: Vec<(String, String, String)> =
            qb.build_query_as().fetch_all(&mut *conn).await?;

        Ok(rows
            .into_iter()
            .map(|(id, name, last_name)| ClientSummary {
                id,
                name,
                last_name,
            })
            .collect())
    }

    /// Adds `delta_cents` (negative to subtract) to the client's credit.
    ///
    /// ## Errors
    /// `NotFound` if the client does not exist.
    pub async fn adjust_credit_balance(
        conn: &mut SqliteConnection,
        client_id: &str,
        delta_cents: i64,
    ) -> DbResult<()> {
        debug!(client_id = %client_id, delta_cents, "Adjusting credit balance");

        let result = sqlx::query(
            r#"
            UPDATE clients SET
                credit_balance_cents = credit_balance_cents + ?2,
                updated_at = ?3
            WHERE id = ?1
            "#,
        )
        .bind(client_id)
        .bind(delta_cents)
        .bind(Utc::now())
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Client", client_id));
        }

        Ok(())
    }
}

//! # Sale Service
//!
//! Clients, sales and their quota plans. Sales are created here in one
//! transaction together with every quota, so the plan always adds up to the
//! sale total from the first read on.

use chrono::Utc;
use sqlx::SqliteConnection;
use tracing::info;
use uuid::Uuid;

use tally_core::validation::validate_create_sale;
use tally_core::{
    Client, CoreError, CreateSaleRequest, Money, NewClient, Quota, QuotaStatus, Sale, SaleItem,
    SaleStatus, ValidationError, DEFAULT_COIN,
};
use tally_db::{ClientRepository, QuotaRepository, SaleRepository, TenantRegistry};

use crate::error::LedgerResult;
use crate::services::load_sale;

#[derive(Debug, Clone)]
pub struct SaleService {
    registry: TenantRegistry,
    default_coin: String,
}

impl SaleService {
    pub fn new(registry: TenantRegistry) -> Self {
        SaleService {
            registry,
            default_coin: DEFAULT_COIN.to_string(),
        }
    }

    /// Coin given to quotas created without one.
    pub fn with_default_coin(mut self, coin: impl Into<String>) -> Self {
        self.default_coin = coin.into();
        self
    }

    pub async fn create_client(&self, company: &str, new_client: &NewClient) -> LedgerResult<Client> {
        if new_client.name.trim().is_empty() {
            return Err(ValidationError::Required {
                field: "name".to_string(),
            }
            .into());
        }

        let db = self.registry.get(company).await?;
        let now = Utc::now();
        let client = Client {
            id: Uuid::new_v4().to_string(),
            name: new_client.name.trim().to_string(),
            last_name: new_client.last_name.trim().to_string(),
            email: new_client.email.clone().filter(|e| !e.trim().is_empty()),
            credit_balance_cents: 0,
            created_at: now,
            updated_at: now,
        };

        let mut conn = db.acquire().await?;
        ClientRepository::insert(&mut conn, &client).await?;

        info!(company = %company, client_id = %client.id, "Client created");
        Ok(client)
    }

    /// Creates a sale and its quota plan.
    ///
    /// ## Errors
    /// - Validation errors and `SaleTotalMismatch` before any I/O
    /// - `ClientNotFound` if the client does not exist in this company
    pub async fn create_sale(&self, company: &str, request: &CreateSaleRequest) -> LedgerResult<Sale> {
        let total = validate_create_sale(request)?;
        let db = self.registry.get(company).await?;

        let request = request.clone();
        let default_coin = self.default_coin.clone();
        let sale = db
            .transaction(|conn| {
                Box::pin(apply_create_sale(conn, request.clone(), total, default_coin.clone()))
            })
            .await?;

        info!(
            company = %company,
            sale_id = %sale.id,
            sale_number = sale.sale_number,
            total_cents = sale.total_amount_cents,
            quota_count = sale.quota_count,
            "Sale created"
        );
        Ok(sale)
    }

    pub async fn get_sale(&self, company: &str, sale_id: &str) -> LedgerResult<Sale> {
        let db = self.registry.get(company).await?;
        let mut conn = db.acquire().await?;
        load_sale(&mut conn, sale_id).await
    }

    /// Quotas of a sale in installment order.
    pub async fn list_quotas(&self, company: &str, sale_id: &str) -> LedgerResult<Vec<Quota>> {
        let db = self.registry.get(company).await?;
        let mut conn = db.acquire().await?;
        load_sale(&mut conn, sale_id).await?;
        Ok(QuotaRepository::find_by_sale(&mut conn, sale_id).await?)
    }
}

async fn apply_create_sale(
    conn: &mut SqliteConnection,
    request: CreateSaleRequest,
    total: Money,
    default_coin: String,
) -> LedgerResult<Sale> {
    if ClientRepository::find_by_id(conn, &request.client_id).await?.is_none() {
        return Err(CoreError::ClientNotFound(request.client_id.clone()).into());
    }

    let now = Utc::now();
    let sale_id = Uuid::new_v4().to_string();
    let sale_number = SaleRepository::next_sale_number(conn).await?;

    let items: Vec<SaleItem> = request
        .items
        .iter()
        .map(|item| SaleItem {
            id: Uuid::new_v4().to_string(),
            sale_id: sale_id.clone(),
            product_id: item.product_id.clone(),
            variant_sku: item.variant_sku.clone(),
            name_snapshot: item.name.clone(),
            quantity: item.quantity,
            unit_price_cents: item.unit_price_cents,
            unit_cost_cents: item.unit_cost_cents,
            // Overflow was ruled out by validation.
            subtotal_cents: item.unit_price_cents * item.quantity,
        })
        .collect();

    let quotas: Vec<Quota> = request
        .quotas
        .iter()
        .enumerate()
        .map(|(i, input)| Quota {
            id: Uuid::new_v4().to_string(),
            sale_id: sale_id.clone(),
            quota_number: i as i64 + 1,
            expiration_date: input.expiration_date,
            amount_cents: input.amount_cents,
            paid_amount_cents: 0,
            coin: input.coin.clone().unwrap_or_else(|| default_coin.clone()),
            // Nothing is owed on a zero quota, so it starts out settled.
            status: if input.amount_cents == 0 {
                QuotaStatus::Paid
            } else {
                QuotaStatus::Pending
            },
            payment_ids: Vec::new(),
            updated_at: now,
        })
        .collect();

    let sale = Sale {
        id: sale_id.clone(),
        sale_number,
        client_id: request.client_id.clone(),
        items,
        loan: request.loan.clone().filter(|l| !l.is_empty()),
        quota_ids: Vec::new(),
        payment_ids: Vec::new(),
        status: if total.is_zero() {
            SaleStatus::Completed
        } else {
            SaleStatus::InProgress
        },
        total_amount_cents: total.cents(),
        collected_amount_cents: 0,
        pending_amount_cents: total.cents(),
        quota_count: quotas.len() as i64,
        sale_date: request.sale_date.unwrap_or(now),
        created_at: now,
        updated_at: now,
    };

    SaleRepository::insert(conn, &sale).await?;
    QuotaRepository::insert_many(conn, &quotas).await?;

    load_sale(conn, &sale_id).await
}

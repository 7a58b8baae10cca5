//! # Report Service
//!
//! Read-only payment listing for collection reports.
//!
//! ```text
//! list_payments(filter, page, limit)
//!     │
//!     ├── payments page + total count        (1 COUNT, 1 SELECT, 1 breakdown)
//!     ├── sale summaries for the page        (1 IN query)
//!     ├── client summaries for those sales   (1 IN query)
//!     └── current snapshot of every quota    (1 IN query)
//! ```

use std::collections::HashMap;

use tracing::debug;

use tally_core::validation::validate_pagination;
use tally_core::{
    AffectedQuotaDetail, ClientSummary, Page, PaymentDetails, PaymentFilter, Quota, SaleSummary,
};
use tally_db::{ClientRepository, PaymentRepository, QuotaRepository, SaleRepository, TenantRegistry};

use crate::error::LedgerResult;

#[derive(Debug, Clone)]
pub struct ReportService {
    registry: TenantRegistry,
}

impl ReportService {
    pub fn new(registry: TenantRegistry) -> Self {
        ReportService { registry }
    }

    /// Payments matching `filter`, newest first, with their sale, client and
    /// quotas attached. `page` is 1-based, `limit` at most 100.
    pub async fn list_payments(
        &self,
        company: &str,
        filter: &PaymentFilter,
        page: i64,
        limit: i64,
    ) -> LedgerResult<Page<PaymentDetails>> {
        validate_pagination(page, limit)?;
        let db = self.registry.get(company).await?;
        let mut conn = db.acquire().await?;

        let (payments, total) = PaymentRepository::list(&mut conn, filter, page, limit).await?;

        let sale_ids = unique(payments.iter().map(|p| p.sale_id.clone()));
        let sales = SaleRepository::find_summaries(&mut conn, &sale_ids).await?;

        let client_ids = unique(sales.iter().map(|(_, client_id)| client_id.clone()));
        let clients: HashMap<String, ClientSummary> =
            ClientRepository::find_summaries(&mut conn, &client_ids)
                .await?
                .into_iter()
                .map(|c| (c.id.clone(), c))
                .collect();

        let sales: HashMap<String, (SaleSummary, String)> = sales
            .into_iter()
            .map(|(summary, client_id)| (summary.id.clone(), (summary, client_id)))
            .collect();

        let quota_ids = unique(
            payments
                .iter()
                .flat_map(|p| p.affected_quotas.iter().map(|aq| aq.quota_id.clone())),
        );
        let quotas: HashMap<String, Quota> = QuotaRepository::find_by_ids(&mut conn, &quota_ids)
            .await?
            .into_iter()
            .map(|q| (q.id.clone(), q))
            .collect();

        let docs: Vec<PaymentDetails> = payments
            .into_iter()
            .map(|payment| {
                let sale = sales.get(&payment.sale_id);
                let client = sale.and_then(|(_, client_id)| clients.get(client_id).cloned());
                let details = payment
                    .affected_quotas
                    .iter()
                    .map(|aq| AffectedQuotaDetail {
                        quota_id: aq.quota_id.clone(),
                        amount_applied_cents: aq.amount_applied_cents,
                        quota: quotas.get(&aq.quota_id).cloned(),
                    })
                    .collect();

                PaymentDetails {
                    sale: sale.map(|(summary, _)| summary.clone()),
                    client,
                    quotas: details,
                    payment,
                }
            })
            .collect();

        debug!(company = %company, total, page, limit, "Payments listed");
        Ok(Page::new(docs, total, page, limit))
    }
}

/// Distinct values in first-seen order.
fn unique(values: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    values.filter(|v| seen.insert(v.clone())).collect()
}

//! # Reschedule Service
//!
//! Moves unpaid quotas to new expiration dates. No money moves here.
//!
//! Every instruction is checked before the single bulk write: one bad
//! instruction rejects the whole request.

use std::collections::HashSet;

use chrono::Utc;
use sqlx::SqliteConnection;
use tracing::info;

use tally_core::validation::{start_of_day, validate_reschedule, validate_reschedule_request};
use tally_core::{CoreError, Quota, QuotaReschedule, RescheduleQuotasRequest};
use tally_db::{QuotaRepository, TenantRegistry};

use crate::error::LedgerResult;

#[derive(Debug, Clone)]
pub struct RescheduleService {
    registry: TenantRegistry,
}

impl RescheduleService {
    pub fn new(registry: TenantRegistry) -> Self {
        RescheduleService { registry }
    }

    /// Applies every update or none and returns the rescheduled quotas.
    /// A quota named more than once takes its last update and is returned
    /// once.
    ///
    /// ## Errors
    /// - `InvalidReschedule` for a date before today (UTC) or a status that
    ///   cannot be set by rescheduling; checked before any I/O
    /// - `QuotasNotFound` / `QuotaAlreadyPaid`
    pub async fn reschedule_quotas(
        &self,
        company: &str,
        request: &RescheduleQuotasRequest,
    ) -> LedgerResult<Vec<Quota>> {
        validate_reschedule_request(request)?;
        let today = start_of_day(Utc::now());
        for update in &request.updates {
            validate_reschedule(update, today)?;
        }

        let db = self.registry.get(company).await?;
        let updates = request.updates.clone();
        let quotas = db
            .transaction(|conn| Box::pin(apply_reschedule(conn, updates.clone())))
            .await?;

        info!(company = %company, count = quotas.len(), "Quotas rescheduled");
        Ok(quotas)
    }
}

async fn apply_reschedule(
    conn: &mut SqliteConnection,
    updates: Vec<QuotaReschedule>,
) -> LedgerResult<Vec<Quota>> {
    let mut seen = HashSet::new();
    let ids: Vec<String> = updates
        .iter()
        .map(|u| u.quota_id.clone())
        .filter(|id| seen.insert(id.clone()))
        .collect();
    let quotas = QuotaRepository::find_by_ids(conn, &ids).await?;

    let found: HashSet<&str> = quotas.iter().map(|q| q.id.as_str()).collect();
    let missing: Vec<String> = ids
        .iter()
        .filter(|id| !found.contains(id.as_str()))
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(CoreError::QuotasNotFound { missing }.into());
    }

    if let Some(paid) = quotas.iter().find(|q| q.is_paid()) {
        return Err(CoreError::QuotaAlreadyPaid(paid.id.clone()).into());
    }

    QuotaRepository::bulk_reschedule(conn, &updates).await?;
    Ok(QuotaRepository::find_by_ids(conn, &ids).await?)
}

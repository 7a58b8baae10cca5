//! # Validation Module
//!
//! Request validation for the ledger services.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Request shape (THIS MODULE, before any I/O)                  │
//! │  ├── Non-empty selections, positive amounts                            │
//! │  └── Company slug, coin, pagination bounds                             │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Allocation engine (inside the transaction)                   │
//! │  ├── Quotas resolve, belong to the sale, are not paid                  │
//! │  └── Reversal preconditions                                            │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── CHECK (collected + pending = total)                               │
//! │  ├── CHECK (0 <= paid <= amount)                                       │
//! │  └── Guarded updates (status != 'paid')                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use tally_core::validation::validate_company_slug;
//!
//! assert!(validate_company_slug("acme-store").is_ok());
//! assert!(validate_company_slug("../etc").is_err());
//! ```

use chrono::{DateTime, Utc};

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::Money;
use crate::requests::{
    CreateSaleRequest, PayQuotasRequest, QuotaReschedule, RescheduleQuotasRequest,
    SequentialPaymentRequest,
};
use crate::types::QuotaStatus;
use crate::{MAX_COIN_LEN, MAX_PAGE_LIMIT};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Longest accepted company slug.
pub const MAX_SLUG_LEN: usize = 63;

// =============================================================================
// Tenancy
// =============================================================================

/// Validates a company slug, which doubles as the database file name.
///
/// ## Rules
/// - 1 to 63 characters
/// - Lowercase ASCII letters, digits, `-` and `_`
/// - Must start with a letter or digit
pub fn validate_company_slug(slug: &str) -> ValidationResult<()> {
    if slug.is_empty() {
        return Err(ValidationError::Required {
            field: "company".to_string(),
        });
    }

    if slug.len() > MAX_SLUG_LEN {
        return Err(ValidationError::TooLong {
            field: "company".to_string(),
            max: MAX_SLUG_LEN,
        });
    }

    let valid_chars = slug
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');
    let valid_start = slug
        .chars()
        .next()
        .map(|c| c.is_ascii_alphanumeric())
        .unwrap_or(false);

    if !valid_chars || !valid_start {
        return Err(ValidationError::InvalidFormat {
            field: "company".to_string(),
            reason: "use lowercase letters, digits, '-' or '_'".to_string(),
        });
    }

    Ok(())
}

// =============================================================================
// Field Validators
// =============================================================================

/// Validates a currency code.
pub fn validate_coin(coin: &str) -> ValidationResult<()> {
    if coin.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "coin".to_string(),
        });
    }
    if coin.chars().count() > MAX_COIN_LEN {
        return Err(ValidationError::TooLong {
            field: "coin".to_string(),
            max: MAX_COIN_LEN,
        });
    }
    Ok(())
}

/// Validates page/limit for listings.
///
/// The page is capped so that its row offset `(page - 1) * limit` fits in
/// an `i64`.
pub fn validate_pagination(page: i64, limit: i64) -> ValidationResult<()> {
    if !(1..=MAX_PAGE_LIMIT).contains(&limit) {
        return Err(ValidationError::OutOfRange {
            field: "limit".to_string(),
            min: 1,
            max: MAX_PAGE_LIMIT,
        });
    }
    let max_page = i64::MAX / limit;
    if !(1..=max_page).contains(&page) {
        return Err(ValidationError::OutOfRange {
            field: "page".to_string(),
            min: 1,
            max: max_page,
        });
    }
    Ok(())
}

// =============================================================================
// Payment Requests
// =============================================================================

pub fn validate_pay_quotas(req: &PayQuotasRequest) -> ValidationResult<()> {
    if req.quota_ids.is_empty() {
        return Err(ValidationError::Required {
            field: "quota_ids".to_string(),
        });
    }
    if req.quota_ids.iter().any(|id| id.trim().is_empty()) {
        return Err(ValidationError::InvalidFormat {
            field: "quota_ids".to_string(),
            reason: "empty id".to_string(),
        });
    }
    Ok(())
}

/// Validates a sequential payment and returns the total received.
pub fn validate_sequential_payment(req: &SequentialPaymentRequest) -> CoreResult<Money> {
    if req.payments.is_empty() {
        return Err(ValidationError::Required {
            field: "payments".to_string(),
        }
        .into());
    }

    let mut total = Money::zero();
    for detail in &req.payments {
        if detail.amount_cents <= 0 {
            return Err(ValidationError::MustBePositive {
                field: "payments.amount_cents".to_string(),
            }
            .into());
        }
        total = total
            .checked_add(Money::from_cents(detail.amount_cents))
            .ok_or_else(|| CoreError::InvalidPaymentAmount {
                reason: "total overflows".to_string(),
            })?;
    }

    Ok(total)
}

// =============================================================================
// Rescheduling
// =============================================================================

pub fn validate_reschedule_request(req: &RescheduleQuotasRequest) -> ValidationResult<()> {
    if req.updates.is_empty() {
        return Err(ValidationError::Required {
            field: "updates".to_string(),
        });
    }
    Ok(())
}

/// Checks one reschedule instruction against the start of the current day.
///
/// The quota's current state (exists, not paid) is checked separately by the
/// service once it has loaded the quotas.
pub fn validate_reschedule(update: &QuotaReschedule, today: DateTime<Utc>) -> CoreResult<()> {
    if update.new_expiration_date < today {
        return Err(CoreError::InvalidReschedule {
            quota_id: update.quota_id.clone(),
            reason: "new expiration date is in the past".to_string(),
        });
    }

    if update.new_status == QuotaStatus::Paid {
        return Err(CoreError::InvalidReschedule {
            quota_id: update.quota_id.clone(),
            reason: "cannot mark a quota as paid by rescheduling".to_string(),
        });
    }

    if !update.new_status.is_reschedulable() {
        return Err(CoreError::InvalidReschedule {
            quota_id: update.quota_id.clone(),
            reason: format!(
                "status must be one of: {}",
                QuotaStatus::RESCHEDULABLE
                    .iter()
                    .map(QuotaStatus::as_str)
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        });
    }

    Ok(())
}

/// Midnight UTC of the given instant.
pub fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive().and_time(chrono::NaiveTime::MIN).and_utc()
}

// =============================================================================
// Sale Creation
// =============================================================================

/// Validates a new sale and returns its total.
///
/// ## Rules
/// - Client id is required
/// - At least one item or a non-empty loan
/// - At least one quota; each amount >= 0 and coin at most 10 characters
/// - Items: quantity > 0, unit price >= 0
/// - Loan: principal > 0, interest >= 0
/// - `items subtotal + loan total to repay == sum of quotas`
pub fn validate_create_sale(req: &CreateSaleRequest) -> CoreResult<Money> {
    if req.client_id.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "client_id".to_string(),
        }
        .into());
    }

    let loan = req.loan.as_ref().filter(|l| !l.is_empty());
    if req.items.is_empty() && loan.is_none() {
        return Err(ValidationError::Required {
            field: "items or loan".to_string(),
        }
        .into());
    }

    if req.quotas.is_empty() {
        return Err(ValidationError::Required {
            field: "quotas".to_string(),
        }
        .into());
    }

    let overflow = || CoreError::InvalidPaymentAmount {
        reason: "sale total overflows".to_string(),
    };

    let mut total = Money::zero();
    for item in &req.items {
        if item.quantity <= 0 {
            return Err(ValidationError::MustBePositive {
                field: "items.quantity".to_string(),
            }
            .into());
        }
        if item.unit_price_cents < 0 {
            return Err(ValidationError::MustNotBeNegative {
                field: "items.unit_price_cents".to_string(),
            }
            .into());
        }
        let subtotal = Money::from_cents(item.unit_price_cents)
            .checked_mul_quantity(item.quantity)
            .ok_or_else(overflow)?;
        total = total.checked_add(subtotal).ok_or_else(overflow)?;
    }

    if let Some(loan) = loan {
        if loan.principal_cents <= 0 {
            return Err(ValidationError::MustBePositive {
                field: "loan.principal_cents".to_string(),
            }
            .into());
        }
        if loan.interest_rate_bps < 0 {
            return Err(ValidationError::MustNotBeNegative {
                field: "loan.interest_rate_bps".to_string(),
            }
            .into());
        }
        total = total
            .checked_add(Money::from_cents(loan.total_to_repay_cents))
            .ok_or_else(overflow)?;
    }

    let mut quotas_total = Money::zero();
    for quota in &req.quotas {
        if quota.amount_cents < 0 {
            return Err(ValidationError::MustNotBeNegative {
                field: "quotas.amount_cents".to_string(),
            }
            .into());
        }
        if let Some(coin) = &quota.coin {
            validate_coin(coin)?;
        }
        quotas_total = quotas_total
            .checked_add(Money::from_cents(quota.amount_cents))
            .ok_or_else(overflow)?;
    }

    if quotas_total != total {
        return Err(CoreError::SaleTotalMismatch {
            quotas_cents: quotas_total.cents(),
            total_cents: total.cents(),
        });
    }

    Ok(total)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::requests::{PaymentDetail, QuotaInput, SaleItemInput};
    use crate::types::{Loan, PaymentMethod};
    use chrono::{Duration, TimeZone};

    fn item(qty: i64, price: i64) -> SaleItemInput {
        SaleItemInput {
            product_id: "prod-1".to_string(),
            variant_sku: "SKU-1".to_string(),
            name: "Fridge".to_string(),
            quantity: qty,
            unit_price_cents: price,
            unit_cost_cents: None,
        }
    }

    fn quota(amount: i64) -> QuotaInput {
        QuotaInput {
            expiration_date: Utc::now(),
            amount_cents: amount,
            coin: None,
        }
    }

    #[test]
    fn test_company_slug() {
        assert!(validate_company_slug("acme").is_ok());
        assert!(validate_company_slug("acme_2-north").is_ok());
        assert!(validate_company_slug("").is_err());
        assert!(validate_company_slug("Acme").is_err());
        assert!(validate_company_slug("-acme").is_err());
        assert!(validate_company_slug("a/b").is_err());
        assert!(validate_company_slug(&"a".repeat(64)).is_err());
    }

    #[test]
    fn test_coin() {
        assert!(validate_coin("ARS").is_ok());
        assert!(validate_coin("").is_err());
        assert!(validate_coin("ABCDEFGHIJK").is_err());
    }

    #[test]
    fn test_pagination() {
        assert!(validate_pagination(1, 10).is_ok());
        assert!(validate_pagination(0, 10).is_err());
        assert!(validate_pagination(1, 0).is_err());
        assert!(validate_pagination(1, 101).is_err());
    }

    #[test]
    fn test_pagination_offset_must_fit() {
        assert!(validate_pagination(i64::MAX / 100, 100).is_ok());
        assert!(validate_pagination(i64::MAX, 1).is_ok());

        let err = validate_pagination(i64::MAX, 100).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::OutOfRange { ref field, max, .. } if field == "page" && max == i64::MAX / 100
        ));
    }

    #[test]
    fn test_sequential_payment_total() {
        let req = SequentialPaymentRequest {
            payments: vec![
                PaymentDetail {
                    amount_cents: 1500,
                    method: PaymentMethod::Cash,
                },
                PaymentDetail {
                    amount_cents: 1000,
                    method: PaymentMethod::Transfer,
                },
            ],
            notes: None,
        };
        assert_eq!(validate_sequential_payment(&req).unwrap().cents(), 2500);
    }

    #[test]
    fn test_sequential_payment_rejects_non_positive() {
        let empty = SequentialPaymentRequest {
            payments: vec![],
            notes: None,
        };
        assert!(validate_sequential_payment(&empty).is_err());

        let zero = SequentialPaymentRequest {
            payments: vec![PaymentDetail {
                amount_cents: 0,
                method: PaymentMethod::Cash,
            }],
            notes: None,
        };
        assert!(matches!(
            validate_sequential_payment(&zero),
            Err(CoreError::Validation(ValidationError::MustBePositive { .. }))
        ));
    }

    #[test]
    fn test_reschedule_rules() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 15, 30, 0).unwrap();
        let today = start_of_day(now);
        assert_eq!(today, Utc.with_ymd_and_hms(2026, 3, 10, 0, 0, 0).unwrap());

        let ok = QuotaReschedule {
            quota_id: "q-1".to_string(),
            new_expiration_date: today,
            new_status: QuotaStatus::Pending,
        };
        assert!(validate_reschedule(&ok, today).is_ok());

        let yesterday = QuotaReschedule {
            new_expiration_date: today - Duration::days(1),
            ..ok.clone()
        };
        assert!(matches!(
            validate_reschedule(&yesterday, today),
            Err(CoreError::InvalidReschedule { .. })
        ));

        let to_paid = QuotaReschedule {
            new_status: QuotaStatus::Paid,
            ..ok
        };
        assert!(validate_reschedule(&to_paid, today).is_err());
    }

    #[test]
    fn test_create_sale_total_must_match_quotas() {
        let req = CreateSaleRequest {
            client_id: "client-1".to_string(),
            items: vec![item(2, 1500)],
            loan: None,
            quotas: vec![quota(1000), quota(1000), quota(1000)],
            sale_date: None,
        };
        assert_eq!(validate_create_sale(&req).unwrap().cents(), 3000);

        let short = CreateSaleRequest {
            quotas: vec![quota(1000), quota(1000)],
            ..req
        };
        assert!(matches!(
            validate_create_sale(&short),
            Err(CoreError::SaleTotalMismatch {
                quotas_cents: 2000,
                total_cents: 3000
            })
        ));
    }

    #[test]
    fn test_create_sale_with_loan_only() {
        let req = CreateSaleRequest {
            client_id: "client-1".to_string(),
            items: vec![],
            loan: Some(Loan {
                principal_cents: 10_000,
                interest_rate_bps: 2000,
                total_to_repay_cents: 12_000,
                observations: None,
            }),
            quotas: vec![quota(6000), quota(6000)],
            sale_date: None,
        };
        assert_eq!(validate_create_sale(&req).unwrap().cents(), 12_000);
    }

    #[test]
    fn test_create_sale_requires_items_or_loan() {
        let req = CreateSaleRequest {
            client_id: "client-1".to_string(),
            items: vec![],
            loan: Some(Loan {
                principal_cents: 0,
                interest_rate_bps: 0,
                total_to_repay_cents: 0,
                observations: None,
            }),
            quotas: vec![quota(0)],
            sale_date: None,
        };
        assert!(matches!(
            validate_create_sale(&req),
            Err(CoreError::Validation(ValidationError::Required { .. }))
        ));
    }
}

//! # Seed Data Generator
//!
//! Fills a company database with clients, installment sales and a few
//! payments for development.
//!
//! ## Usage
//! ```bash
//! # 10 sales for company "demo" (default)
//! cargo run -p tally-ledger --bin seed
//!
//! # Custom company and amount
//! cargo run -p tally-ledger --bin seed -- --company acme --sales 50
//!
//! # Explicit config file
//! cargo run -p tally-ledger --bin seed -- --config ./ledger.toml
//! ```
//!
//! ## Generated Data
//! Each sale gets its own client, one or two items and a plan of 3 to 12
//! monthly quotas. Every other sale then receives a sequential cash payment
//! and every third one a bulk payment of its first quota, so reports have
//! partially paid, fully paid and untouched sales to show.

use std::env;
use std::path::PathBuf;

use chrono::{Duration, Utc};
use futures_util::future::join_all;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tally_core::{
    CreateSaleRequest, NewClient, PayQuotasRequest, PaymentDetail, PaymentMethod, QuotaInput,
    Sale, SaleItemInput, SequentialPaymentRequest,
};
use tally_ledger::{Ledger, LedgerConfig, LedgerResult};

const FIRST_NAMES: &[&str] = &[
    "Ana", "Juan", "María", "Carlos", "Lucía", "Diego", "Sofía", "Martín", "Valentina", "Pedro",
];

const LAST_NAMES: &[&str] = &[
    "Pérez", "Gómez", "Rodríguez", "Fernández", "López", "Díaz", "Martínez", "Sánchez",
];

/// (sku, name, unit price in cents)
const PRODUCTS: &[(&str, &str, i64)] = &[
    ("FRIDGE-300L", "Fridge 300L", 450_000),
    ("TV-55", "Television 55\"", 380_000),
    ("WASHER-8KG", "Washing machine 8kg", 320_000),
    ("PHONE-A15", "Phone A15", 210_000),
    ("OVEN-60", "Electric oven 60L", 145_000),
    ("FAN-18", "Standing fan", 48_000),
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let mut company = String::from("demo");
    let mut sales: usize = 10;
    let mut config_path: Option<PathBuf> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--company" | "-c" => {
                if i + 1 < args.len() {
                    company = args[i + 1].clone();
                    i += 1;
                }
            }
            "--sales" | "-s" => {
                if i + 1 < args.len() {
                    sales = args[i + 1].parse().unwrap_or(10);
                    i += 1;
                }
            }
            "--config" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Tally Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --company <SLUG>   Company to seed (default: demo)");
                println!("  -s, --sales <N>        Number of sales to create (default: 10)");
                println!("      --config <PATH>    Config file (default: platform config dir)");
                println!("  -h, --help             Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    let config = LedgerConfig::load(config_path)?;
    init_tracing(&config.logging.filter);

    println!("🌱 Tally Seed Data Generator");
    println!("============================");
    println!("Data dir: {}", config.storage.data_dir.display());
    println!("Company:  {}", company);
    println!("Sales:    {}", sales);
    println!();

    let ledger = Ledger::from_config(&config);
    let start = std::time::Instant::now();

    let mut created = Vec::with_capacity(sales);
    for n in 0..sales {
        match create_sale(&ledger, &company, n).await {
            Ok(sale) => created.push(sale),
            Err(e) => eprintln!("Failed to create sale {}: {}", n + 1, e),
        }
    }
    println!("✓ Created {} sales", created.len());

    // Payments on different sales run concurrently; conflicts are retried
    // by the unit of work.
    let outcomes = join_all(
        created
            .iter()
            .enumerate()
            .map(|(n, sale)| pay_sale(&ledger, &company, n, sale)),
    )
    .await;

    let mut applied = 0;
    for outcome in outcomes {
        match outcome {
            Ok(count) => applied += count,
            Err(e) => warn!(error = %e, "Seed payment failed"),
        }
    }
    println!("✓ Applied {} payments", applied);

    let report = ledger
        .reports
        .list_payments(&company, &Default::default(), 1, 5)
        .await?;
    println!();
    println!("Latest payments ({} total):", report.total_docs);
    for details in &report.docs {
        let client = details
            .client
            .as_ref()
            .map(|c| format!("{} {}", c.name, c.last_name))
            .unwrap_or_default();
        println!(
            "  #{:<4} {:>12} {:<10} {}",
            details.payment.payment_number,
            details.payment.amount().to_string(),
            details.payment.method.as_str(),
            client
        );
    }

    ledger.shutdown().await;

    println!();
    println!("✓ Seed complete in {:?}", start.elapsed());
    info!(company = %company, sales = created.len(), payments = applied, "Seed finished");

    Ok(())
}

fn init_tracing(filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Creates a client and a sale with a monthly quota plan.
async fn create_sale(ledger: &Ledger, company: &str, n: usize) -> LedgerResult<Sale> {
    let client = ledger
        .sales
        .create_client(
            company,
            &NewClient {
                name: FIRST_NAMES[n % FIRST_NAMES.len()].to_string(),
                last_name: LAST_NAMES[(n * 7) % LAST_NAMES.len()].to_string(),
                email: Some(format!("client{}@example.com", n + 1)),
            },
        )
        .await?;

    let item_count = 1 + n % 2;
    let items: Vec<SaleItemInput> = (0..item_count)
        .map(|k| {
            let (sku, name, price) = PRODUCTS[(n + k * 3) % PRODUCTS.len()];
            SaleItemInput {
                product_id: format!("prod-{}", sku.to_lowercase()),
                variant_sku: sku.to_string(),
                name: name.to_string(),
                quantity: 1,
                unit_price_cents: price,
                unit_cost_cents: Some(price * 6 / 10),
            }
        })
        .collect();

    let total: i64 = items.iter().map(|it| it.unit_price_cents * it.quantity).sum();
    let quota_count = 3 + (n % 10) as i64;

    // Equal quotas; the last one absorbs the remainder.
    let base = total / quota_count;
    let sale_date = Utc::now();
    let quotas: Vec<QuotaInput> = (0..quota_count)
        .map(|k| QuotaInput {
            expiration_date: sale_date + Duration::days(30 * (k + 1)),
            amount_cents: if k == quota_count - 1 {
                total - base * (quota_count - 1)
            } else {
                base
            },
            coin: None,
        })
        .collect();

    ledger
        .sales
        .create_sale(
            company,
            &CreateSaleRequest {
                client_id: client.id,
                items,
                loan: None,
                quotas,
                sale_date: Some(sale_date),
            },
        )
        .await
}

/// Applies the payments planned for sale `n`; returns how many were made.
async fn pay_sale(ledger: &Ledger, company: &str, n: usize, sale: &Sale) -> LedgerResult<usize> {
    let mut count = 0;

    if n % 3 == 0 {
        if let Some(first) = sale.quota_ids.first() {
            ledger
                .payments
                .process_bulk_payment(
                    company,
                    &sale.id,
                    &PayQuotasRequest {
                        quota_ids: vec![first.clone()],
                        method: PaymentMethod::Transfer,
                    },
                    "seed-collector",
                )
                .await?;
            count += 1;
        }
    }

    if n % 2 == 0 {
        // A bit more than a third of the sale, split between two methods.
        let amount = sale.total_amount_cents * 2 / 5;
        ledger
            .payments
            .process_sequential_payment(
                company,
                &sale.id,
                &SequentialPaymentRequest {
                    payments: vec![
                        PaymentDetail {
                            amount_cents: amount / 2,
                            method: PaymentMethod::Cash,
                        },
                        PaymentDetail {
                            amount_cents: amount - amount / 2,
                            method: PaymentMethod::DebitCard,
                        },
                    ],
                    notes: Some("seed payment".to_string()),
                },
                "seed-collector",
            )
            .await?;
        count += 1;
    }

    Ok(count)
}

//! On-demand reconciliation report runner
//!
//! Usage: reconcile <user_id> <currency> [tenant_id] [env]
//!
//! Prints the ledger-vs-wallet report for one wallet as JSON and exits
//! non-zero when the wallet is out of balance.

use anyhow::{Context, Result};
use wallet_ledger::config::AppConfig;
use wallet_ledger::db::Database;
use wallet_ledger::ledger::Reconciler;

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        eprintln!("Usage: reconcile <user_id> <currency> [tenant_id] [env]");
        std::process::exit(2);
    }
    let user_id: i64 = args[1].parse().context("user_id must be an integer")?;
    let currency = &args[2];
    let tenant_id = args.get(3).map(String::as_str).unwrap_or("default");
    let env = args.get(4).map(String::as_str).unwrap_or("default");

    let config = AppConfig::load(env);
    let _guard = wallet_ledger::logging::init_logging(&config);

    let db = Database::connect(&config.postgres_url)
        .await
        .context("Failed to connect to PostgreSQL")?;

    let report = Reconciler::reconcile_wallet(db.pool(), user_id, currency, tenant_id)
        .await
        .context("Reconciliation failed")?;

    println!("{}", serde_json::to_string_pretty(&report)?);

    if !report.balanced {
        std::process::exit(1);
    }
    Ok(())
}

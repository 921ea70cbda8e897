use std::sync::Arc;

use anyhow::{Context, Result, bail};
use estate_billing::{ChargeAllocator, PaymentScheduler};
use estate_core::period::clamped_day;
use estate_core::{Clock, Directory, PersistMode, SettlementPolicy};
use estate_liquidation::LiquidationEngine;
use estate_ownership::ShareLedger;
use estate_platform::{PgDirectory, PgStore, ServiceConfig, connect_database, run_migrations};
use estate_store::SystemClock;
use tracing::{error, info, warn};

const OPERATOR: &str = "estate-ops";

enum Command {
    Sweep,
    Drafts { year: i32, month: u32 },
}

fn parse_command(args: &[String]) -> Result<Command> {
    match args {
        [] => Ok(Command::Sweep),
        [name, year, month] if name == "drafts" => {
            let year = year
                .parse::<i32>()
                .with_context(|| format!("year is not a number: {year}"))?;
            let month = month
                .parse::<u32>()
                .with_context(|| format!("month is not a number: {month}"))?;
            Ok(Command::Drafts { year, month })
        }
        other => bail!("usage: estate-ops [drafts <year> <month>], got {other:?}"),
    }
}

struct Services {
    directory: Arc<dyn Directory>,
    payments: PaymentScheduler,
    liquidations: LiquidationEngine,
    policy: SettlementPolicy,
}

impl Services {
    fn wire(store: PgStore, directory: PgDirectory, policy: SettlementPolicy) -> Self {
        let store = Arc::new(store);
        let directory: Arc<dyn Directory> = Arc::new(directory);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let shares = ShareLedger::new(store.clone(), store.clone(), clock.clone(), policy.clone());
        let payments = PaymentScheduler::new(store.clone(), store.clone(), clock.clone());
        let charges = ChargeAllocator::new(
            store.clone(),
            directory.clone(),
            shares.clone(),
            store.clone(),
            clock.clone(),
        );
        let liquidations = LiquidationEngine::new(
            directory.clone(),
            shares,
            payments.clone(),
            charges,
            store.clone(),
            store,
            clock,
            policy.clone(),
        );

        Self {
            directory,
            payments,
            liquidations,
            policy,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "estate_ops=info".to_string()),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = parse_command(&args)?;

    let config = ServiceConfig::from_env()?;
    let pool = connect_database(&config.database_url, config.max_connections).await?;
    run_migrations(&pool).await?;

    let services = Services::wire(
        PgStore::new(pool.clone()),
        PgDirectory::new(pool),
        config.policy,
    );

    let late = services
        .payments
        .mark_late_today()
        .await
        .context("late sweep failed")?;
    info!("{} obligation(s) moved to late", late.len());

    if let Command::Drafts { year, month } = command {
        save_drafts(&services, month, year).await?;
    }

    Ok(())
}

async fn save_drafts(services: &Services, month: u32, year: i32) -> Result<()> {
    let reference = clamped_day(month, year, services.policy.reference_day)?;
    let owners = services.directory.owners_with_mandates(reference).await?;
    info!(
        "saving {:02}/{year} drafts for {} owner(s) with a mandate on {reference}",
        month,
        owners.len()
    );

    let mut saved = 0usize;
    for owner_id in owners {
        match services
            .liquidations
            .generate(
                owner_id,
                month,
                year,
                PersistMode::Draft,
                Some(OPERATOR.to_string()),
            )
            .await
        {
            Ok(snapshot) => {
                saved += 1;
                info!(
                    "draft {} for owner {owner_id}: net {}",
                    snapshot.id, snapshot.net_amount
                );
            }
            Err(err) if err.is_storage() => error!("draft for owner {owner_id} failed: {err}"),
            Err(err) => warn!("draft for owner {owner_id} skipped: {err}"),
        }
    }

    info!("{saved} draft(s) saved for {:02}/{year}", month);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|arg| arg.to_string()).collect()
    }

    #[test]
    fn no_arguments_only_sweeps() {
        assert!(matches!(parse_command(&[]).unwrap(), Command::Sweep));
    }

    #[test]
    fn drafts_take_year_then_month() {
        let command = parse_command(&args(&["drafts", "2025", "3"])).unwrap();
        assert!(matches!(command, Command::Drafts { year: 2025, month: 3 }));
    }

    #[test]
    fn malformed_arguments_are_refused() {
        assert!(parse_command(&args(&["drafts", "2025"])).is_err());
        assert!(parse_command(&args(&["drafts", "march", "2025"])).is_err());
        assert!(parse_command(&args(&["publish"])).is_err());
    }
}

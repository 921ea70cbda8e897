use anyhow::{Context, Result};
use estate_core::SettlementPolicy;
use rust_decimal::Decimal;

const DEFAULT_MAX_CONNECTIONS: u32 = 10;

#[derive(Clone, Debug)]
pub struct ServiceConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub policy: SettlementPolicy,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ServiceConfig::from_env`] with an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let database_url = lookup("DATABASE_URL").context("DATABASE_URL is required")?;
        let max_connections = match lookup("DATABASE_MAX_CONNECTIONS") {
            Some(raw) => raw
                .parse::<u32>()
                .with_context(|| format!("DATABASE_MAX_CONNECTIONS is not a number: {raw}"))?,
            None => DEFAULT_MAX_CONNECTIONS,
        };

        let mut policy = SettlementPolicy::default();
        if let Some(raw) = lookup("PARTITION_EPSILON") {
            policy.partition_epsilon = raw
                .parse::<Decimal>()
                .with_context(|| format!("PARTITION_EPSILON is not a decimal: {raw}"))?;
        }
        if let Some(raw) = lookup("MONEY_SCALE") {
            policy.money_scale = raw
                .parse::<u32>()
                .with_context(|| format!("MONEY_SCALE is not a number: {raw}"))?;
        }

        Ok(Self {
            database_url,
            max_connections,
            policy,
        })
    }
}

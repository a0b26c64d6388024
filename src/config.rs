use anyhow::Context;
use std::str::FromStr;
use std::time::Duration;

use crate::utils::RetryConfig;

// ============================================================================
// Application Configuration
// ============================================================================
//
// Defaults suit a local run; each value can be overridden from the
// environment:
//
//   ORDERFLOW_STALE_ORDER_DAYS       orders older than this are cancelled (7)
//   ORDERFLOW_CANCEL_INTERVAL_SECS   how often the cancel task fires (3600)
//   ORDERFLOW_METRICS_PORT           /metrics and /health port (9090)
//   ORDERFLOW_RETRY_MAX_ATTEMPTS     store retry attempts per call (3)
//
// ============================================================================

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub stale_order_days: i64,
    pub cancel_interval: Duration,
    pub metrics_port: u16,
    pub retry: RetryConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            stale_order_days: 7,
            cancel_interval: Duration::from_secs(3600),
            metrics_port: 9090,
            retry: RetryConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from `lookup`, falling back to the defaults for
    /// unset keys.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Some(days) = parse(&lookup, "ORDERFLOW_STALE_ORDER_DAYS")? {
            anyhow::ensure!(days > 0, "ORDERFLOW_STALE_ORDER_DAYS must be positive, got {days}");
            stale_age(days).context("Invalid value for ORDERFLOW_STALE_ORDER_DAYS")?;
            config.stale_order_days = days;
        }
        if let Some(secs) = parse::<u64>(&lookup, "ORDERFLOW_CANCEL_INTERVAL_SECS")? {
            anyhow::ensure!(secs > 0, "ORDERFLOW_CANCEL_INTERVAL_SECS must be positive");
            config.cancel_interval = Duration::from_secs(secs);
        }
        if let Some(port) = parse(&lookup, "ORDERFLOW_METRICS_PORT")? {
            config.metrics_port = port;
        }
        if let Some(attempts) = parse::<u32>(&lookup, "ORDERFLOW_RETRY_MAX_ATTEMPTS")? {
            config.retry.max_attempts = attempts.max(1);
        }

        Ok(config)
    }

    pub fn stale_order_age(&self) -> anyhow::Result<chrono::Duration> {
        stale_age(self.stale_order_days)
    }
}

/// `days` as a duration that can still be subtracted from the current time.
fn stale_age(days: i64) -> anyhow::Result<chrono::Duration> {
    let age = chrono::Duration::try_days(days).with_context(|| format!("{days} days is out of range"))?;
    chrono::Utc::now()
        .checked_sub_signed(age)
        .with_context(|| format!("{days} days reaches before the earliest representable date"))?;
    Ok(age)
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("Invalid value for {key}: {raw:?}")),
        None => Ok(None),
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

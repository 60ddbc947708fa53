//! Configuration management for the protected-order trading system.

use crate::{Error, Result};
use chrono::NaiveTime;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;

/// Application configuration, loaded once at startup and never mutated.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub kite: KiteConfig,
    pub risk: RiskConfig,
    pub monitor: MonitorConfig,
    pub database: Option<DatabaseConfig>,
}

/// Kite Connect API credentials and endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct KiteConfig {
    pub api_key: String,
    pub access_token: String,
    pub base_url: String,
    /// Per-request timeout in seconds. A timed-out call is unknown-outcome,
    /// not failure.
    pub timeout_secs: u64,
}

/// Risk limits consumed by the risk manager. Process-wide, immutable.
#[derive(Debug, Clone, Deserialize)]
pub struct RiskConfig {
    /// Maximum notional value of a single order.
    pub max_order_value: Decimal,
    /// Maximum aggregate realized daily loss before the hard stop.
    pub max_daily_loss: Decimal,
    /// Maximum admissions within the trailing 60-second window.
    pub max_orders_per_window: usize,
    /// Reject intents outside the exchange session when true.
    pub enforce_market_hours: bool,
    /// Exchange session open (IST).
    pub market_open: NaiveTime,
    /// Exchange session close (IST).
    pub market_close: NaiveTime,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_order_value: Decimal::new(50_000, 0),
            max_daily_loss: Decimal::new(10_000, 0),
            max_orders_per_window: 10,
            enforce_market_hours: true,
            market_open: NaiveTime::from_hms_opt(9, 15, 0).unwrap(),
            market_close: NaiveTime::from_hms_opt(15, 30, 0).unwrap(),
        }
    }
}

/// Order monitor settings.
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Poll cadence for open order groups, in seconds.
    pub poll_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let risk_defaults = RiskConfig::default();

        Ok(Self {
            kite: KiteConfig {
                api_key: env::var("KITE_API_KEY").map_err(|_| Error::Config {
                    message: "KITE_API_KEY environment variable not set".to_string(),
                })?,
                access_token: env::var("KITE_ACCESS_TOKEN").map_err(|_| Error::Config {
                    message: "KITE_ACCESS_TOKEN environment variable not set".to_string(),
                })?,
                base_url: env::var("KITE_BASE_URL")
                    .unwrap_or_else(|_| "https://api.kite.trade".to_string()),
                timeout_secs: parse_env("KITE_TIMEOUT_SECS", 5),
            },
            risk: RiskConfig {
                max_order_value: parse_env("MAX_ORDER_VALUE", risk_defaults.max_order_value),
                max_daily_loss: parse_env("MAX_DAILY_LOSS", risk_defaults.max_daily_loss),
                max_orders_per_window: parse_env(
                    "MAX_ORDERS_PER_WINDOW",
                    risk_defaults.max_orders_per_window,
                ),
                enforce_market_hours: parse_env(
                    "ENFORCE_MARKET_HOURS",
                    risk_defaults.enforce_market_hours,
                ),
                market_open: risk_defaults.market_open,
                market_close: risk_defaults.market_close,
            },
            monitor: MonitorConfig {
                poll_secs: parse_env("MONITOR_POLL_SECS", 3),
            },
            database: env::var("DATABASE_URL").ok().map(|url| DatabaseConfig {
                url,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", 5),
            }),
        })
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

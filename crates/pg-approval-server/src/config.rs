use std::time::Duration;

use pg_approval::constants::parse_data_centers;
use pg_approval::{CoordinatorSettings, GatewayConfig};

use crate::bootstrap::BootstrapError;

pub const DEFAULT_PORT: u16 = 4080;
pub const DEFAULT_LEDGER_DB_PATH: &str = "./pg-ledger.db";
pub const DEFAULT_RESULT_PAGE_URL: &str = "/checkout/result";
pub const DEFAULT_RATE_LIMIT_RPM: u64 = 120;

/// Everything the server reads from the environment.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub gateway: GatewayConfig,
    pub settings: CoordinatorSettings,
    pub ledger_db_path: String,
    pub result_page_url: String,
    pub webhook_urls: Vec<String>,
    pub webhook_secret: Option<Vec<u8>>,
    pub metrics_token: Option<Vec<u8>>,
    pub public_metrics: bool,
    pub allowed_origins: Vec<String>,
    pub rate_limit_rpm: u64,
    pub port: u16,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, BootstrapError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, BootstrapError> {
        let var = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut gateway = GatewayConfig::default();
        if let Some(mid) = var("PG_MERCHANT_ID") {
            gateway.merchant_id = mid;
        }
        if let Some(key) = var("PG_SIGN_KEY") {
            gateway.sign_key = key;
        }
        if let Some(table) = var("PG_DATA_CENTERS_WEB") {
            gateway.web_data_centers =
                parse_data_centers(&table).map_err(|e| invalid("PG_DATA_CENTERS_WEB", e))?;
        }
        if let Some(table) = var("PG_DATA_CENTERS_MOBILE") {
            gateway.mobile_data_centers =
                parse_data_centers(&table).map_err(|e| invalid("PG_DATA_CENTERS_MOBILE", e))?;
        }
        if let Some(secs) = parse_var::<u64>(&var, "APPROVAL_TIMEOUT_SECS")? {
            gateway.approval_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64>(&var, "COMPENSATION_TIMEOUT_SECS")? {
            gateway.compensation_timeout = Duration::from_secs(secs);
        }

        let mut settings = CoordinatorSettings::default();
        if let Some(ms) = parse_var::<u64>(&var, "DUPLICATE_WAIT_MS")? {
            settings.duplicate_wait = Duration::from_millis(ms);
        }
        if let Some(secs) = parse_var::<u64>(&var, "CLAIM_LEASE_SECS")? {
            settings.claim_lease = Duration::from_secs(secs);
        }
        // The lease must cover one approval plus one cancel.
        let min_lease = gateway.approval_timeout + gateway.compensation_timeout;
        if settings.claim_lease <= min_lease {
            return Err(BootstrapError::InvalidVar {
                var: "CLAIM_LEASE_SECS",
                reason: format!(
                    "must exceed approval plus compensation timeout ({}s)",
                    min_lease.as_secs()
                ),
            });
        }

        Ok(Self {
            gateway,
            settings,
            ledger_db_path: var("LEDGER_DB_PATH")
                .unwrap_or_else(|| DEFAULT_LEDGER_DB_PATH.to_string()),
            result_page_url: var("RESULT_PAGE_URL")
                .unwrap_or_else(|| DEFAULT_RESULT_PAGE_URL.to_string()),
            webhook_urls: var("WEBHOOK_URLS").map(|v| split_list(&v)).unwrap_or_default(),
            webhook_secret: var("WEBHOOK_SHARED_SECRET").map(String::into_bytes),
            metrics_token: var("METRICS_TOKEN").map(String::into_bytes),
            public_metrics: var("PG_PUBLIC_METRICS")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            allowed_origins: var("ALLOWED_ORIGINS")
                .map(|v| split_list(&v))
                .unwrap_or_default(),
            rate_limit_rpm: parse_var(&var, "RATE_LIMIT_RPM")?.unwrap_or(DEFAULT_RATE_LIMIT_RPM),
            port: parse_var(&var, "PORT")?.unwrap_or(DEFAULT_PORT),
        })
    }
}

fn parse_var<T>(
    var: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, BootstrapError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    var(key)
        .map(|raw| raw.parse::<T>().map_err(|e| invalid(key, e)))
        .transpose()
}

fn invalid(var: &'static str, reason: impl std::fmt::Display) -> BootstrapError {
    BootstrapError::InvalidVar {
        var,
        reason: reason.to_string(),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

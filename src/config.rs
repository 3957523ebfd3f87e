use std::env;

use rust_decimal::Decimal;

/// What a billing run does when a meter shows negative consumption
/// (meter replaced or reset). `Abort` fails the whole invoice, `Skip`
/// drops the offending meter line and logs a warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnomalyPolicy {
    Abort,
    Skip,
}

impl AnomalyPolicy {
    fn from_env(value: Option<String>) -> Self {
        match value
            .as_deref()
            .map(str::trim)
            .unwrap_or_default()
            .to_ascii_lowercase()
            .as_str()
        {
            "skip" => Self::Skip,
            _ => Self::Abort,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Abort => "abort",
            Self::Skip => "skip",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub app_name: String,
    pub environment: String,
    pub api_prefix: String,
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub trusted_hosts: Vec<String>,
    pub rate_limit_per_second: u64,
    pub rate_limit_burst_size: u32,
    pub database_url: Option<String>,
    pub db_pool_max_connections: u32,
    pub db_pool_min_connections: u32,
    pub db_pool_acquire_timeout_seconds: u64,
    pub db_pool_idle_timeout_seconds: u64,
    pub internal_api_key: Option<String>,
    // Billing defaults, used when an organization has no settings row.
    pub default_currency: String,
    pub default_due_grace_days: i64,
    pub default_merge_services_with_rent: bool,
    pub default_rent_tax_rate: Decimal,
    pub anomaly_policy: AnomalyPolicy,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            app_name: env_or("APP_NAME", "Rentora Billing API"),
            environment: env_or("ENVIRONMENT", "development"),
            api_prefix: normalize_prefix(&env_or("API_PREFIX", "/v1")),
            host: env_or("HOST", "0.0.0.0"),
            port: env_parse_or("PORT", 8000),
            cors_origins: parse_csv(&env_or("CORS_ORIGINS", "http://localhost:3000")),
            trusted_hosts: parse_csv(&env_or("TRUSTED_HOSTS", "localhost,127.0.0.1")),
            rate_limit_per_second: env_parse_or("RATE_LIMIT_PER_SECOND", 10),
            rate_limit_burst_size: env_parse_or("RATE_LIMIT_BURST_SIZE", 100),
            database_url: env_opt("DATABASE_URL"),
            db_pool_max_connections: env_parse_or("DB_POOL_MAX_CONNECTIONS", 5),
            db_pool_min_connections: env_parse_or("DB_POOL_MIN_CONNECTIONS", 1),
            db_pool_acquire_timeout_seconds: env_parse_or("DB_POOL_ACQUIRE_TIMEOUT_SECONDS", 5),
            db_pool_idle_timeout_seconds: env_parse_or("DB_POOL_IDLE_TIMEOUT_SECONDS", 600),
            internal_api_key: env_opt("INTERNAL_API_KEY"),
            default_currency: env_or("BILLING_DEFAULT_CURRENCY", "EUR"),
            default_due_grace_days: env_parse_or("BILLING_DUE_GRACE_DAYS", 14),
            default_merge_services_with_rent: env_parse_bool_or(
                "BILLING_MERGE_SERVICES_WITH_RENT",
                false,
            ),
            default_rent_tax_rate: env_opt("BILLING_RENT_TAX_RATE")
                .and_then(|raw| raw.parse::<Decimal>().ok())
                .unwrap_or(Decimal::ZERO),
            anomaly_policy: AnomalyPolicy::from_env(env_opt("BILLING_ANOMALY_POLICY")),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.trim().eq_ignore_ascii_case("production")
    }
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}

fn env_parse_or<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    env_opt(key)
        .and_then(|raw| raw.parse::<T>().ok())
        .unwrap_or(default)
}

fn env_parse_bool_or(key: &str, default: bool) -> bool {
    match env_opt(key).as_deref().map(str::to_ascii_lowercase) {
        Some(value) if value == "1" || value == "true" || value == "yes" || value == "on" => true,
        Some(value) if value == "0" || value == "false" || value == "no" || value == "off" => false,
        Some(_) => default,
        None => default,
    }
}

fn parse_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

fn normalize_prefix(raw: &str) -> String {
    let mut prefix = raw.trim().to_string();
    if prefix.is_empty() {
        return "/v1".to_string();
    }
    if !prefix.starts_with('/') {
        prefix.insert(0, '/');
    }
    while prefix.ends_with('/') && prefix.len() > 1 {
        prefix.pop();
    }
    prefix
}

#[cfg(test)]
mod tests {
    use super::{normalize_prefix, AnomalyPolicy};

    #[test]
    fn normalizes_prefix() {
        assert_eq!(normalize_prefix("v1"), "/v1");
        assert_eq!(normalize_prefix("/v1/"), "/v1");
        assert_eq!(normalize_prefix(""), "/v1");
    }

    #[test]
    fn anomaly_policy_defaults_to_abort() {
        assert_eq!(AnomalyPolicy::from_env(None), AnomalyPolicy::Abort);
        assert_eq!(
            AnomalyPolicy::from_env(Some("skip".to_string())),
            AnomalyPolicy::Skip
        );
        assert_eq!(
            AnomalyPolicy::from_env(Some("garbage".to_string())),
            AnomalyPolicy::Abort
        );
    }
}

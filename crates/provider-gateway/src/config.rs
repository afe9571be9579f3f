use std::collections::HashMap;
use std::time::Duration;

/// Providers with a per-provider timeout override read from the environment.
pub const KNOWN_PROVIDERS: &[&str] = &["fmp", "polygon", "yahoo", "finnhub"];

const DEFAULT_TIMEOUT_SEC: f64 = 12.0;
const YAHOO_TIMEOUT_SEC: f64 = 8.0;

/// Timeout budgets, retry/backoff and circuit-breaker settings for the gateway.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub timeouts: HashMap<String, Duration>,
    /// Budget for providers without an explicit entry
    pub default_timeout: Duration,
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_jitter: Duration,
    /// Ceiling for one backoff sleep, jitter included
    pub max_backoff: Duration,
    pub failure_threshold: u32,
    pub circuit_open: Duration,
    /// Requests per minute, per provider. Providers absent here are not paced.
    pub rate_limits: HashMap<String, usize>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        let mut timeouts = HashMap::new();
        for provider in KNOWN_PROVIDERS {
            let secs = if *provider == "yahoo" {
                YAHOO_TIMEOUT_SEC
            } else {
                DEFAULT_TIMEOUT_SEC
            };
            timeouts.insert(provider.to_string(), Duration::from_secs_f64(secs));
        }

        // Default 500 req/min for the Polygon Starter plan. Free tier users should set POLYGON_RATE_LIMIT=5.
        let mut rate_limits = HashMap::new();
        rate_limits.insert("polygon".to_string(), 500);

        Self {
            timeouts,
            default_timeout: Duration::from_secs_f64(DEFAULT_TIMEOUT_SEC),
            max_retries: 3,
            backoff_base: Duration::from_millis(600),
            backoff_jitter: Duration::from_millis(350),
            max_backoff: Duration::from_secs(30),
            failure_threshold: 4,
            circuit_open: Duration::from_secs(45),
            rate_limits,
        }
    }
}

impl GatewayConfig {
    /// Defaults overlaid with `PROVIDER_*` and `POLYGON_RATE_LIMIT` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        for provider in KNOWN_PROVIDERS {
            let key = format!("PROVIDER_TIMEOUT_{}_SEC", provider.to_uppercase());
            if let Some(secs) = env_secs(&key) {
                config.timeouts.insert(provider.to_string(), secs);
            }
        }

        if let Some(v) = env_parse::<u32>("PROVIDER_MAX_RETRIES") {
            config.max_retries = v;
        }
        if let Some(v) = env_secs("PROVIDER_BACKOFF_BASE_SEC") {
            config.backoff_base = v;
        }
        if let Some(v) = env_secs("PROVIDER_BACKOFF_JITTER_SEC") {
            config.backoff_jitter = v;
        }
        if let Some(v) = env_secs("PROVIDER_BACKOFF_MAX_SEC") {
            config.max_backoff = v;
        }
        if let Some(v) = env_parse::<u32>("PROVIDER_CB_FAILURE_THRESHOLD") {
            config.failure_threshold = v.max(1);
        }
        if let Some(v) = env_secs("PROVIDER_CB_OPEN_SEC") {
            config.circuit_open = v;
        }
        if let Some(v) = env_parse::<usize>("POLYGON_RATE_LIMIT") {
            if v == 0 {
                config.rate_limits.remove("polygon");
            } else {
                config.rate_limits.insert("polygon".to_string(), v);
            }
        }

        config
    }

    /// Timeout budget for one provider; unknown providers get the default.
    pub fn timeout_for(&self, provider: &str) -> Duration {
        self.timeouts
            .get(provider)
            .copied()
            .unwrap_or(self.default_timeout)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_secs(key: &str) -> Option<Duration> {
    env_parse::<f64>(key)
        .filter(|v| v.is_finite() && *v >= 0.0)
        .map(Duration::from_secs_f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_budgets() {
        let config = GatewayConfig::default();
        assert_eq!(config.timeout_for("fmp"), Duration::from_secs(12));
        assert_eq!(config.timeout_for("yahoo"), Duration::from_secs(8));
        assert_eq!(config.timeout_for("somewhere-else"), Duration::from_secs(12));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.failure_threshold, 4);
        assert_eq!(config.circuit_open, Duration::from_secs(45));
        assert_eq!(config.max_backoff, Duration::from_secs(30));
        assert_eq!(config.rate_limits.get("polygon"), Some(&500));
    }
}

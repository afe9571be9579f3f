use acquisition_pipeline::{CrossCheckThresholds, FreshnessSla, PipelineConfig};
use peer_scoring::ScoringThresholds;
use provider_gateway::GatewayConfig;
use std::path::PathBuf;
use valuation_core::{normalize_ticker, ValuationError};
use valuation_sampler::SamplerConfig;

const MAX_TICKER_LEN: usize = 10;

/// Everything the runner reads from the environment (optionally via `.env`).
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub fmp_api_key: Option<String>,
    pub polygon_api_key: Option<String>,
    pub finnhub_api_key: Option<String>,
    /// Keyless Yahoo quotes as the last quote fallback
    pub yahoo_enabled: bool,
    pub data_dir: PathBuf,
    pub output_dir: PathBuf,
    pub gateway: GatewayConfig,
    pub pipeline: PipelineConfig,
    pub sampler: SamplerConfig,
    pub scoring: ScoringThresholds,
    pub freshness: FreshnessSla,
    pub crosscheck: CrossCheckThresholds,
}

impl RunnerConfig {
    pub fn from_env() -> Result<Self, ValuationError> {
        Ok(Self {
            fmp_api_key: env_key("FMP_API_KEY"),
            polygon_api_key: env_key("POLYGON_API_KEY").or_else(|| env_key("MASSIVE_API_KEY")),
            finnhub_api_key: env_key("FINNHUB_API_KEY"),
            yahoo_enabled: env_key("YAHOO_QUOTES_ENABLED")
                .map(|v| !matches!(v.to_lowercase().as_str(), "0" | "false" | "no"))
                .unwrap_or(true),
            data_dir: env_path("VALUATION_DATA_DIR", "data"),
            output_dir: env_path("VALUATION_OUTPUT_DIR", "outputs"),
            gateway: GatewayConfig::from_env(),
            pipeline: PipelineConfig::default(),
            sampler: SamplerConfig::from_env(),
            scoring: ScoringThresholds::from_env()?,
            freshness: FreshnessSla::from_env(),
            crosscheck: CrossCheckThresholds::from_env(),
        })
    }

    /// Config with no API keys and the given directories; every adapter is disabled.
    pub fn offline(data_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            fmp_api_key: None,
            polygon_api_key: None,
            finnhub_api_key: None,
            yahoo_enabled: false,
            data_dir: data_dir.into(),
            output_dir: output_dir.into(),
            gateway: GatewayConfig::default(),
            pipeline: PipelineConfig::default(),
            sampler: SamplerConfig::default(),
            scoring: ScoringThresholds::default(),
            freshness: FreshnessSla::default(),
            crosscheck: CrossCheckThresholds::default(),
        }
    }
}

fn env_key(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_path(name: &str, default: &str) -> PathBuf {
    env_key(name).map(PathBuf::from).unwrap_or_else(|| PathBuf::from(default))
}

/// Comma-separated ticker list, normalized, blanks dropped.
pub fn split_tickers(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(normalize_ticker)
        .filter(|t| !t.is_empty())
        .collect()
}

/// Accepts `GM`, `BRK.B`, `RDS-A`; rejects anything else before it reaches a provider URL.
pub fn validate_ticker(ticker: &str) -> Result<String, ValuationError> {
    let ticker = normalize_ticker(ticker);
    let valid = !ticker.is_empty()
        && ticker.len() <= MAX_TICKER_LEN
        && ticker
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-');
    if valid {
        Ok(ticker)
    } else {
        Err(ValuationError::InvalidData(format!("invalid ticker: {:?}", ticker)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_tickers() {
        assert_eq!(split_tickers(" f, tm ,,stla"), vec!["F", "TM", "STLA"]);
        assert!(split_tickers("").is_empty());
    }

    #[test]
    fn test_validate_ticker() {
        assert_eq!(validate_ticker(" brk.b ").unwrap(), "BRK.B");
        assert!(validate_ticker("").is_err());
        assert!(validate_ticker("GM&apikey=x").is_err());
        assert!(validate_ticker("TOOLONGTICKER").is_err());
    }

    #[test]
    fn test_offline_config_has_no_keys() {
        let config = RunnerConfig::offline("d", "o");
        assert!(config.fmp_api_key.is_none());
        assert_eq!(config.sampler.samples, 20_000);
        assert_eq!(config.output_dir, PathBuf::from("o"));
    }
}

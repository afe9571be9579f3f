use acquisition_pipeline::cache::write_atomic;
use acquisition_pipeline::{redact_all, CrossCheckReport, FreshnessReport};
use chrono::{DateTime, Utc};
use peer_scoring::{NewsSignal, ScoreResult};
use provider_gateway::ProviderStatus;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use valuation_core::{DataSource, ValuationError};
use valuation_sampler::MonteCarloResult;

/// Per-ticker decision record: score, provenance, freshness and every fallback taken.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionSummary {
    pub ticker: String,
    pub generated_at: DateTime<Utc>,
    pub peers: Vec<String>,
    pub score: ScoreResult,
    pub news: NewsSignal,
    pub quote_source: DataSource,
    pub news_source: DataSource,
    pub fundamentals_sources: BTreeMap<String, DataSource>,
    pub bootstrapped: Vec<String>,
    pub snapshot_saved: bool,
    pub freshness: FreshnessReport,
    pub cross_check: CrossCheckReport,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonteCarloArtifact {
    pub ticker: String,
    pub generated_at: DateTime<Utc>,
    pub cone: Option<MonteCarloResult>,
    pub dcf: Option<MonteCarloResult>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimeoutBudget {
    pub provider: String,
    pub timeout_sec: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderHealth {
    pub ticker: String,
    pub generated_at: DateTime<Utc>,
    pub max_retries: u32,
    pub timeouts: Vec<TimeoutBudget>,
    pub providers: Vec<ProviderStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WarmCacheEntry {
    pub ticker: String,
    pub ok: bool,
    pub score: Option<u8>,
    pub warnings: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WarmCacheReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<WarmCacheEntry>,
}

/// Writes run artifacts under the output directory.
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    dir: PathBuf,
}

impl ArtifactWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `decision_summary_<T>_<YYYYMMDD>.json`; warnings are redacted before they hit disk.
    pub fn write_decision_summary(&self, summary: &DecisionSummary) -> Result<PathBuf, ValuationError> {
        let mut redacted = summary.clone();
        redacted.warnings = redact_all(&summary.warnings);
        redacted.cross_check.alerts = redact_all(&summary.cross_check.alerts);
        let name = format!(
            "decision_summary_{}_{}.json",
            summary.ticker,
            summary.generated_at.format("%Y%m%d")
        );
        self.write(&name, &redacted)
    }

    /// `montecarlo_<T>_<YYYYMMDDTHHMMSSZ>.json`
    pub fn write_montecarlo(&self, artifact: &MonteCarloArtifact) -> Result<PathBuf, ValuationError> {
        let mut redacted = artifact.clone();
        redacted.errors = redact_all(&artifact.errors);
        let name = format!(
            "montecarlo_{}_{}.json",
            artifact.ticker,
            artifact.generated_at.format("%Y%m%dT%H%M%SZ")
        );
        self.write(&name, &redacted)
    }

    pub fn write_provider_health(&self, health: &ProviderHealth) -> Result<PathBuf, ValuationError> {
        let mut redacted = health.clone();
        for status in &mut redacted.providers {
            status.last_error = status.last_error.as_deref().map(acquisition_pipeline::redact);
        }
        self.write(&format!("provider_health_{}.json", health.ticker), &redacted)
    }

    pub fn write_warm_cache_report(&self, report: &WarmCacheReport) -> Result<PathBuf, ValuationError> {
        let mut redacted = report.clone();
        for entry in &mut redacted.results {
            entry.error = entry.error.as_deref().map(acquisition_pipeline::redact);
        }
        self.write("warm_cache_last_run.json", &redacted)
    }

    fn write<T: Serialize>(&self, name: &str, value: &T) -> Result<PathBuf, ValuationError> {
        let path = self.dir.join(name);
        let bytes = serde_json::to_vec_pretty(value)
            .map_err(|e| ValuationError::InvalidData(format!("{}: {}", name, e)))?;
        write_atomic(&path, &bytes)?;
        tracing::debug!("Wrote {}", path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn report() -> WarmCacheReport {
        let at = Utc.with_ymd_and_hms(2025, 1, 10, 12, 0, 0).unwrap();
        WarmCacheReport {
            started_at: at,
            finished_at: at,
            succeeded: 1,
            failed: 1,
            results: vec![
                WarmCacheEntry {
                    ticker: "GM".to_string(),
                    ok: true,
                    score: Some(71),
                    warnings: 2,
                    error: None,
                },
                WarmCacheEntry {
                    ticker: "F".to_string(),
                    ok: false,
                    score: None,
                    warnings: 0,
                    error: Some("GET https://x.test/quote?apikey=secret123 failed".to_string()),
                },
            ],
        }
    }

    #[test]
    fn test_warm_cache_report_is_redacted() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::new(dir.path().join("outputs"));
        let path = writer.write_warm_cache_report(&report()).unwrap();

        assert_eq!(path.file_name().unwrap(), "warm_cache_last_run.json");
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(!text.contains("secret123"));
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["failed"], 1);
        assert_eq!(json["results"][0]["score"], 71);
    }

    #[test]
    fn test_rewrite_replaces_previous_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::new(dir.path());
        let mut r = report();
        writer.write_warm_cache_report(&r).unwrap();
        r.succeeded = 2;
        let path = writer.write_warm_cache_report(&r).unwrap();

        let json: serde_json::Value = serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap();
        assert_eq!(json["succeeded"], 2);
        let leftovers = std::fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| e.as_ref().unwrap().path().extension().map(|x| x == "tmp").unwrap_or(false))
            .count();
        assert_eq!(leftovers, 0);
    }
}

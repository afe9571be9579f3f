use acquisition_pipeline::{
    cross_check, evaluate_freshness, AcquisitionPipeline, CacheStore, FreshnessReport,
};
use chrono::Utc;
use futures_util::future::join_all;
use peer_scoring::{apply_freshness_gate, summarize_news, PeerScoringEngine};
use provider_gateway::{FinnhubClient, FmpClient, PolygonClient, ResilientGateway, YahooClient};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use valuation_core::{ComparableRow, ValuationError};
use valuation_sampler::{
    build_dcf_cone, simulate, simulate_dcf, ConeAssumptions, DcfAssumptions, DcfInputs,
    PriceContext,
};

use crate::artifacts::{
    ArtifactWriter, DecisionSummary, MonteCarloArtifact, ProviderHealth, TimeoutBudget,
    WarmCacheEntry, WarmCacheReport,
};
use crate::config::{validate_ticker, RunnerConfig};

/// Everything one focus-ticker run produced.
#[derive(Debug, Clone)]
pub struct TickerRun {
    pub summary: DecisionSummary,
    pub montecarlo: MonteCarloArtifact,
    pub artifacts: Vec<PathBuf>,
}

/// Wires the gateway, adapters, pipeline, scoring and sampler for a run.
pub struct Runner {
    config: RunnerConfig,
    gateway: Arc<ResilientGateway>,
    pipeline: AcquisitionPipeline,
    engine: PeerScoringEngine,
    writer: ArtifactWriter,
    /// Adapters disabled for missing credentials
    setup_warnings: Vec<String>,
}

impl Runner {
    pub fn new(config: RunnerConfig) -> Self {
        let gateway = Arc::new(ResilientGateway::new(config.gateway.clone()));
        Self::with_gateway(config, gateway)
    }

    pub fn with_gateway(config: RunnerConfig, gateway: Arc<ResilientGateway>) -> Self {
        let mut setup_warnings = Vec::new();
        let mut pipeline = AcquisitionPipeline::new(
            CacheStore::new(&config.data_dir),
            config.pipeline.clone(),
        );

        // Quote priority: FMP, Polygon, Yahoo
        match &config.fmp_api_key {
            Some(key) => {
                let fmp = Arc::new(FmpClient::new(key.clone(), Arc::clone(&gateway)));
                pipeline = pipeline
                    .with_quote_adapter(fmp.clone())
                    .with_fundamentals_adapter(fmp);
            }
            None => setup_warnings
                .push("FMP_API_KEY not set; FMP quotes and fundamentals disabled.".to_string()),
        }
        match &config.polygon_api_key {
            Some(key) => {
                pipeline = pipeline.with_quote_adapter(Arc::new(PolygonClient::new(
                    key.clone(),
                    Arc::clone(&gateway),
                )));
            }
            None => setup_warnings.push("POLYGON_API_KEY not set; Polygon quotes disabled.".to_string()),
        }
        if config.yahoo_enabled {
            pipeline = pipeline.with_quote_adapter(Arc::new(YahooClient::new(Arc::clone(&gateway))));
        }
        match &config.finnhub_api_key {
            Some(key) => {
                pipeline = pipeline.with_news_adapter(Arc::new(FinnhubClient::new(
                    key.clone(),
                    Arc::clone(&gateway),
                )));
            }
            None => setup_warnings.push("FINNHUB_API_KEY not set; live news disabled.".to_string()),
        }
        for warning in &setup_warnings {
            tracing::warn!("{}", warning);
        }

        Self {
            engine: PeerScoringEngine::new(config.scoring.clone()),
            writer: ArtifactWriter::new(&config.output_dir),
            config,
            gateway,
            pipeline,
            setup_warnings,
        }
    }

    pub fn writer(&self) -> &ArtifactWriter {
        &self.writer
    }

    /// Acquire, score and value `focus` against `peers`, then write the artifacts.
    ///
    /// Provider trouble degrades the result and lands in the warnings; only invalid
    /// tickers and artifact/cache write failures are errors.
    pub async fn run(
        &self,
        focus: &str,
        peers: &[String],
        cancel: &CancellationToken,
    ) -> Result<TickerRun, ValuationError> {
        let focus = validate_ticker(focus)?;
        let peers = peers
            .iter()
            .map(|p| validate_ticker(p))
            .collect::<Result<Vec<_>, _>>()?;
        let mut warnings = self.setup_warnings.clone();

        let acquired = self.pipeline.acquire_universe(&focus, &peers, cancel).await?;
        warnings.extend(acquired.warnings.iter().cloned());

        let news = self.pipeline.acquire_news(&focus, cancel).await;
        warnings.extend(news.warnings.iter().cloned());

        let now = Utc::now();
        let signal = summarize_news(&news.data, &focus, now);
        let mut score = self.engine.score(&acquired.universe, &focus, &signal);

        let freshness = evaluate_freshness(
            &self.config.freshness,
            &acquired.universe,
            &acquired.quotes,
            &news.data,
            now,
        );
        let stale = stale_datasets(&freshness);
        if !stale.is_empty() {
            warnings.push(format!("Data freshness SLA failed for {}: {}", focus, stale.join(", ")));
        }
        apply_freshness_gate(&mut score, &stale, self.engine.thresholds());

        let cross = cross_check(
            self.pipeline.quote_adapters(),
            &acquired.live_quotes,
            &focus,
            &self.config.crosscheck,
            cancel,
        )
        .await;
        if !cross.enabled {
            warnings.push("Provider cross-check disabled: fewer than two quote providers.".to_string());
        }

        let montecarlo = self
            .value(&focus, acquired.universe.focus_row(), cancel, &mut warnings)
            .await;

        tracing::info!(
            "{}: score {} ({}), {} red flags, {} warnings",
            focus,
            score.score,
            score.rating,
            score.red_flags.len(),
            warnings.len()
        );

        let summary = DecisionSummary {
            ticker: focus.clone(),
            generated_at: now,
            peers: acquired
                .universe
                .tickers()
                .into_iter()
                .filter(|t| t != &focus)
                .collect(),
            score,
            news: signal,
            quote_source: acquired.quote_source,
            news_source: news.source,
            fundamentals_sources: acquired.fundamentals_sources,
            bootstrapped: acquired.bootstrapped,
            snapshot_saved: acquired.snapshot_saved,
            freshness,
            cross_check: cross,
            warnings,
        };

        let artifacts = vec![
            self.writer.write_decision_summary(&summary)?,
            self.writer.write_montecarlo(&montecarlo)?,
            self.writer.write_provider_health(&self.provider_health(&focus))?,
        ];

        Ok(TickerRun {
            summary,
            montecarlo,
            artifacts,
        })
    }

    /// Cone Monte Carlo plus DCF Monte Carlo for the focus row.
    async fn value(
        &self,
        focus: &str,
        row: Option<&ComparableRow>,
        cancel: &CancellationToken,
        warnings: &mut Vec<String>,
    ) -> MonteCarloArtifact {
        let sampler = &self.config.sampler;
        let mut errors = Vec::new();

        let cone = row
            .and_then(|r| build_dcf_cone(r, &ConeAssumptions::default()))
            .unwrap_or_default();
        let snapshot_price = row.and_then(|r| r.price).filter(|p| *p > 0.0);
        let live_price = if cone.complete().is_none() && snapshot_price.is_none() {
            self.live_price(focus, cancel).await
        } else {
            None
        };
        let prices = PriceContext {
            snapshot_price,
            live_price,
        };

        let cone_result = match simulate(&cone, &prices, sampler) {
            Ok(result) => {
                if let Some(reason) = &result.fallback_reason {
                    warnings.push(format!(
                        "Valuation cone incomplete for {}; anchored on {} ({:?} confidence).",
                        focus, reason, result.confidence
                    ));
                }
                Some(result)
            }
            Err(e) => {
                errors.push(format!("cone: {}", e));
                None
            }
        };

        let dcf = match row.and_then(DcfInputs::from_row) {
            Some(inputs) => {
                match simulate_dcf(&inputs, &DcfAssumptions::default(), sampler.samples, sampler.seed) {
                    Ok(result) => Some(result),
                    Err(e) => {
                        errors.push(format!("dcf: {}", e));
                        None
                    }
                }
            }
            None => {
                errors.push("dcf: price, market cap or TTM FCF missing".to_string());
                None
            }
        };
        for error in &errors {
            warnings.push(format!("Monte Carlo for {} degraded: {}", focus, error));
        }

        MonteCarloArtifact {
            ticker: focus.to_string(),
            generated_at: Utc::now(),
            cone: cone_result,
            dcf,
            errors,
        }
    }

    /// Live price from the primary quote adapter, used only when the snapshot has none.
    async fn live_price(&self, focus: &str, cancel: &CancellationToken) -> Option<f64> {
        let adapter = self.pipeline.quote_adapters().first()?;
        match adapter.fetch_quotes(&[focus.to_string()], cancel).await {
            Ok(quotes) => quotes
                .into_iter()
                .find(|q| q.ticker == focus)
                .and_then(|q| q.price)
                .filter(|p| *p > 0.0),
            Err(e) => {
                tracing::warn!("Live price for {} via {} failed: {}", focus, adapter.name(), e);
                None
            }
        }
    }

    fn provider_health(&self, focus: &str) -> ProviderHealth {
        let gateway_config = self.gateway.config();
        let mut timeouts: Vec<TimeoutBudget> = gateway_config
            .timeouts
            .keys()
            .map(|provider| TimeoutBudget {
                provider: provider.clone(),
                timeout_sec: self.gateway.timeout_for(provider).as_secs_f64(),
            })
            .collect();
        timeouts.sort_by(|a, b| a.provider.cmp(&b.provider));

        ProviderHealth {
            ticker: focus.to_string(),
            generated_at: Utc::now(),
            max_retries: gateway_config.max_retries,
            timeouts,
            providers: self.gateway.statuses(),
        }
    }

    /// Run every ticker independently; a failure is recorded and its siblings carry on.
    ///
    /// Each ticker is scored against `peers` when given, otherwise against the rest of `tickers`.
    pub async fn warm_cache(
        &self,
        tickers: &[String],
        peers: &[String],
        cancel: &CancellationToken,
    ) -> Result<WarmCacheReport, ValuationError> {
        let started_at = Utc::now();
        let semaphore = Arc::new(Semaphore::new(self.config.pipeline.max_concurrency.max(1)));
        tracing::info!("Warm cache: {} tickers", tickers.len());

        let futures = tickers.iter().map(|ticker| {
            let semaphore = Arc::clone(&semaphore);
            let ticker_peers: Vec<String> = if peers.is_empty() {
                tickers.iter().filter(|t| *t != ticker).cloned().collect()
            } else {
                peers.to_vec()
            };
            async move {
                let _permit = semaphore.acquire().await;
                match self.run(ticker, &ticker_peers, cancel).await {
                    Ok(run) => WarmCacheEntry {
                        ticker: run.summary.ticker.clone(),
                        ok: true,
                        score: Some(run.summary.score.score),
                        warnings: run.summary.warnings.len(),
                        error: None,
                    },
                    Err(e) => {
                        tracing::warn!("Warm cache: {} failed: {}", ticker, e);
                        WarmCacheEntry {
                            ticker: ticker.clone(),
                            ok: false,
                            score: None,
                            warnings: 0,
                            error: Some(e.to_string()),
                        }
                    }
                }
            }
        });
        let results = join_all(futures).await;

        let succeeded = results.iter().filter(|r| r.ok).count();
        let report = WarmCacheReport {
            started_at,
            finished_at: Utc::now(),
            succeeded,
            failed: results.len() - succeeded,
            results,
        };
        self.writer.write_warm_cache_report(&report)?;
        tracing::info!(
            "Warm cache done: {} ok, {} failed",
            report.succeeded,
            report.failed
        );
        Ok(report)
    }
}

fn stale_datasets(report: &FreshnessReport) -> Vec<&'static str> {
    let mut stale = Vec::new();
    if !report.checks.fundamentals {
        stale.push("fundamentals");
    }
    if !report.checks.news {
        stale.push("news");
    }
    if !report.checks.quotes {
        stale.push("quotes");
    }
    stale
}

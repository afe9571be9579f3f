use chrono::Utc;
use futures_util::future::join_all;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use valuation_core::{
    normalize_ticker, ComparableRow, ComparableUniverse, DataSource, FundamentalsAdapter,
    NewsAdapter, Quote, QuoteAdapter, TtmRecord, ValuationError,
};

use crate::cache::{CacheStore, Dataset};
use crate::fundamentals::merge_ttm_table;
use crate::snapshot::{bootstrap_focus, bootstrap_peers, build_comps_rows, hydrate_peers};

/// A dataset plus where it came from and every fallback taken on the way.
#[derive(Debug, Clone)]
pub struct Acquired<T> {
    pub data: T,
    pub source: DataSource,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Quarterly statements requested per ticker
    pub quarters_limit: usize,
    /// Concurrent per-ticker fundamentals fetches
    pub max_concurrency: usize,
    pub news_days_back: i64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            quarters_limit: 40,
            max_concurrency: 4,
            news_days_back: 30,
        }
    }
}

/// Outcome of one universe acquisition. Warnings are ordered and never fatal.
#[derive(Debug, Clone, Serialize)]
pub struct UniverseAcquisition {
    pub universe: ComparableUniverse,
    pub quotes: Vec<Quote>,
    pub quote_source: DataSource,
    /// Rows the winning quote adapter served this run, before cache hydration
    pub live_quotes: Vec<Quote>,
    pub fundamentals_sources: BTreeMap<String, DataSource>,
    /// Tickers whose row was synthesized rather than sourced
    pub bootstrapped: Vec<String>,
    pub snapshot_saved: bool,
    pub warnings: Vec<String>,
}

/// Cascading acquisition across ordered adapters and the on-disk caches.
pub struct AcquisitionPipeline {
    pub(crate) quote_adapters: Vec<Arc<dyn QuoteAdapter>>,
    pub(crate) fundamentals_adapters: Vec<Arc<dyn FundamentalsAdapter>>,
    pub(crate) news_adapters: Vec<Arc<dyn NewsAdapter>>,
    pub(crate) cache: CacheStore,
    pub(crate) config: PipelineConfig,
}

impl AcquisitionPipeline {
    pub fn new(cache: CacheStore, config: PipelineConfig) -> Self {
        Self {
            quote_adapters: Vec::new(),
            fundamentals_adapters: Vec::new(),
            news_adapters: Vec::new(),
            cache,
            config,
        }
    }

    /// Append a quote adapter; registration order is priority order.
    pub fn with_quote_adapter(mut self, adapter: Arc<dyn QuoteAdapter>) -> Self {
        self.quote_adapters.push(adapter);
        self
    }

    pub fn with_fundamentals_adapter(mut self, adapter: Arc<dyn FundamentalsAdapter>) -> Self {
        self.fundamentals_adapters.push(adapter);
        self
    }

    pub fn with_news_adapter(mut self, adapter: Arc<dyn NewsAdapter>) -> Self {
        self.news_adapters.push(adapter);
        self
    }

    pub fn quote_adapters(&self) -> &[Arc<dyn QuoteAdapter>] {
        &self.quote_adapters
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// Acquire quotes and fundamentals for `focus` + `peers` and build the comparable universe.
    ///
    /// Every universe ticker ends up with a row: sourced live or from cache, restored
    /// from the last-good snapshot, or bootstrapped with nulls. Cache write failures
    /// are warnings; only an unexpected quote-tier error is returned.
    pub async fn acquire_universe(
        &self,
        focus: &str,
        peers: &[String],
        cancel: &CancellationToken,
    ) -> Result<UniverseAcquisition, ValuationError> {
        let tickers = universe_tickers(focus, peers);
        let focus = normalize_ticker(focus);
        let mut warnings: Vec<String> = Vec::new();
        tracing::info!("Acquiring universe for {}: {}", focus, tickers.join(","));

        // Quotes
        let (quotes, quote_source, live_quotes) = match self.acquire_quotes_with_live(&tickers, cancel).await {
            Ok((acq, live)) => {
                warnings.extend(acq.warnings);
                (acq.data, acq.source, live)
            }
            Err(ValuationError::AcquisitionExhausted { warnings: w, .. }) => {
                warnings.extend(w);
                (Vec::new(), DataSource::Unavailable, Vec::new())
            }
            Err(e) => return Err(e),
        };

        // Fundamentals, one task per ticker; results come back in universe order
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let futures = tickers.iter().map(|ticker| {
            let semaphore = Arc::clone(&semaphore);
            async move {
                let _permit = semaphore.acquire().await;
                (ticker.clone(), self.acquire_fundamentals(ticker, cancel).await)
            }
        });
        let results = join_all(futures).await;

        let mut fresh: BTreeMap<String, Vec<TtmRecord>> = BTreeMap::new();
        let mut latest: Vec<(String, TtmRecord)> = Vec::new();
        let mut fundamentals_sources = BTreeMap::new();
        for (ticker, result) in results {
            match result {
                Ok(acq) => {
                    warnings.extend(acq.warnings);
                    if let Some(newest) = acq.data.first() {
                        latest.push((ticker.clone(), newest.clone()));
                    }
                    if acq.source.is_live() {
                        fresh.insert(ticker.clone(), acq.data);
                    }
                    fundamentals_sources.insert(ticker, acq.source);
                }
                Err(ValuationError::AcquisitionExhausted { warnings: w, .. }) => {
                    tracing::warn!("Fundamentals exhausted for {}", ticker);
                    warnings.extend(w);
                    fundamentals_sources.insert(ticker, DataSource::Unavailable);
                }
                Err(e) => {
                    warnings.push(format!("Fundamentals for {} failed: {}", ticker, e));
                    fundamentals_sources.insert(ticker, DataSource::Unavailable);
                }
            }
        }

        if !fresh.is_empty() {
            self.persist_ttm_table(&fresh, fresh.len() == tickers.len(), &mut warnings);
        }

        // Comparable snapshot
        let mut rows = build_comps_rows(&latest, &quotes);
        if rows.is_empty() {
            rows = self.cached_comps(&tickers, &mut warnings);
        }
        let mut universe = ComparableUniverse::from_rows(&focus, rows);

        let mut bootstrapped = Vec::new();
        if bootstrap_focus(&mut universe, &quotes, &mut warnings) {
            bootstrapped.push(focus.clone());
        }
        let last_good: Vec<ComparableRow> = match self.cache.read_latest_csv(Dataset::CompsSnapshot) {
            Ok(rows) => rows,
            Err(e) => {
                warnings.push(format!("last_good comps snapshot exists but could not be read: {}", e));
                Vec::new()
            }
        };
        hydrate_peers(&mut universe, &tickers, &last_good, &mut warnings);
        bootstrapped.extend(bootstrap_peers(&mut universe, &tickers, &quotes, &mut warnings));
        universe.sort_by_universe(&tickers);

        let snapshot_saved = self.persist_comps(&universe, bootstrapped.is_empty(), &mut warnings);

        tracing::info!(
            "Comparable universe for {}: {} rows, {} warnings",
            focus,
            universe.len(),
            warnings.len()
        );

        Ok(UniverseAcquisition {
            universe,
            quotes,
            quote_source,
            live_quotes,
            fundamentals_sources,
            bootstrapped,
            snapshot_saved,
            warnings,
        })
    }

    /// Write the comps table; snapshot it to last-good only when no row was bootstrapped.
    ///
    /// Write failures become warnings since the universe is already built.
    fn persist_comps(&self, universe: &ComparableUniverse, complete: bool, warnings: &mut Vec<String>) -> bool {
        if let Err(e) = self.cache.write_csv(Dataset::CompsSnapshot, universe.rows()) {
            tracing::warn!("Failed to write comps snapshot: {}", e);
            warnings.push(format!("Failed to write comps snapshot: {}", e));
            return false;
        }
        if !complete {
            return false;
        }
        match self
            .cache
            .snapshot_last_good(Dataset::CompsSnapshot, Utc::now().date_naive())
        {
            Ok(saved) => saved,
            Err(e) => {
                warnings.push(format!("Failed to snapshot last_good comps: {}", e));
                false
            }
        }
    }

    fn persist_ttm_table(
        &self,
        fresh: &BTreeMap<String, Vec<TtmRecord>>,
        full_universe: bool,
        warnings: &mut Vec<String>,
    ) {
        let cached = match self.cache.read_csv::<TtmRecord>(Dataset::FundamentalsTtm) {
            Ok(rows) => rows,
            Err(e) => {
                warnings.push(format!("Cached TTM table unreadable; rewriting: {}", e));
                Vec::new()
            }
        };
        let merged = merge_ttm_table(cached, fresh);
        if let Err(e) = self.cache.write_csv(Dataset::FundamentalsTtm, &merged) {
            warnings.push(format!("Failed to write TTM table: {}", e));
            return;
        }
        if full_universe {
            if let Err(e) = self
                .cache
                .snapshot_last_good(Dataset::FundamentalsTtm, Utc::now().date_naive())
            {
                warnings.push(format!("Failed to snapshot last_good TTM table: {}", e));
            }
        }
    }

    /// Previous comps snapshot (current table, then last-good) limited to the universe.
    fn cached_comps(&self, tickers: &[String], warnings: &mut Vec<String>) -> Vec<ComparableRow> {
        for (label, rows) in [
            ("cached", self.cache.read_csv::<ComparableRow>(Dataset::CompsSnapshot)),
            ("last_good", self.cache.read_latest_csv::<ComparableRow>(Dataset::CompsSnapshot)),
        ] {
            let rows: Vec<ComparableRow> = rows
                .unwrap_or_default()
                .into_iter()
                .filter(|r| tickers.contains(&normalize_ticker(&r.ticker)))
                .collect();
            if !rows.is_empty() {
                warnings.push(format!(
                    "No fresh fundamentals for any ticker; reused {} comps snapshot ({} rows).",
                    label,
                    rows.len()
                ));
                return rows;
            }
        }
        Vec::new()
    }
}

/// Focus first, then peers; upper-cased, blank and duplicate tickers removed.
pub fn universe_tickers(focus: &str, peers: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for t in std::iter::once(focus.to_string()).chain(peers.iter().cloned()) {
        let t = normalize_ticker(&t);
        if !t.is_empty() && !out.contains(&t) {
            out.push(t);
        }
    }
    out
}

use super::*;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use valuation_core::{
    BalanceQuarter, CashFlowQuarter, DataSource, FundamentalsAdapter, IncomeQuarter, NewsAdapter,
    NewsArticle, ProviderError, Quote, QuoteAdapter,
};

struct FakeQuotes {
    name: &'static str,
    outcome: Mutex<Result<Vec<(&'static str, f64, f64)>, ProviderError>>,
    calls: AtomicUsize,
}

impl FakeQuotes {
    fn ok(name: &'static str, rows: Vec<(&'static str, f64, f64)>) -> Arc<Self> {
        Arc::new(Self {
            name,
            outcome: Mutex::new(Ok(rows)),
            calls: AtomicUsize::new(0),
        })
    }

    fn failing(name: &'static str, err: ProviderError) -> Arc<Self> {
        Arc::new(Self {
            name,
            outcome: Mutex::new(Err(err)),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl QuoteAdapter for FakeQuotes {
    fn name(&self) -> &str {
        self.name
    }

    async fn fetch_quotes(&self, tickers: &[String], _cancel: &CancellationToken) -> Result<Vec<Quote>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let rows = self.outcome.lock().unwrap().clone()?;
        Ok(rows
            .into_iter()
            .filter(|(t, _, _)| tickers.iter().any(|x| x == t))
            .map(|(t, price, mcap)| Quote {
                ticker: t.to_string(),
                price: Some(price),
                market_cap: Some(mcap),
                as_of: Utc::now(),
                provider: self.name.to_string(),
            })
            .collect())
    }
}

/// Eight quarters per ticker, scaled by the ticker's position; some tickers can fail.
struct FakeFundamentals {
    failing: Mutex<HashSet<String>>,
    calls: AtomicUsize,
}

impl FakeFundamentals {
    fn new(failing: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            failing: Mutex::new(failing.iter().map(|s| s.to_string()).collect()),
            calls: AtomicUsize::new(0),
        })
    }

    fn set_failing(&self, failing: &[&str]) {
        *self.failing.lock().unwrap() = failing.iter().map(|s| s.to_string()).collect();
    }

    fn check(&self, ticker: &str) -> Result<f64, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().unwrap().contains(ticker) {
            return Err(ProviderError::HttpStatus { code: 503 });
        }
        Ok(ticker.bytes().map(|b| b as f64).sum::<f64>() * 1e7)
    }
}

fn periods() -> Vec<NaiveDate> {
    let ends = [(3, 31), (6, 30), (9, 30), (12, 31)];
    (0..8)
        .map(|i| {
            let (m, d) = ends[i % 4];
            NaiveDate::from_ymd_opt(2023 + (i / 4) as i32, m, d).unwrap()
        })
        .collect()
}

#[async_trait]
impl FundamentalsAdapter for FakeFundamentals {
    fn name(&self) -> &str {
        "fmp"
    }

    async fn income_statements(&self, ticker: &str, _limit: usize, _cancel: &CancellationToken) -> Result<Vec<IncomeQuarter>, ProviderError> {
        let scale = self.check(ticker)?;
        Ok(periods()
            .into_iter()
            .enumerate()
            .map(|(i, p)| IncomeQuarter {
                period_end: p,
                revenue: Some(scale * (10.0 + i as f64)),
            })
            .collect())
    }

    async fn cash_flow_statements(&self, ticker: &str, _limit: usize, _cancel: &CancellationToken) -> Result<Vec<CashFlowQuarter>, ProviderError> {
        let scale = self.check(ticker)?;
        Ok(periods()
            .into_iter()
            .map(|p| CashFlowQuarter {
                period_end: p,
                operating_cash_flow: Some(scale * 2.0),
                capital_expenditure: Some(-scale),
            })
            .collect())
    }

    async fn balance_sheets(&self, ticker: &str, _limit: usize, _cancel: &CancellationToken) -> Result<Vec<BalanceQuarter>, ProviderError> {
        let scale = self.check(ticker)?;
        Ok(periods()
            .into_iter()
            .map(|p| BalanceQuarter {
                period_end: p,
                cash: Some(scale),
                total_debt: Some(scale * 3.0),
            })
            .collect())
    }
}

struct FakeNews {
    outcome: Result<Vec<NewsArticle>, ProviderError>,
}

#[async_trait]
impl NewsAdapter for FakeNews {
    fn name(&self) -> &str {
        "finnhub"
    }

    async fn fetch_news(&self, _ticker: &str, _days_back: i64, _cancel: &CancellationToken) -> Result<Vec<NewsArticle>, ProviderError> {
        self.outcome.clone()
    }
}

const UNIVERSE: [&str; 5] = ["GM", "F", "TM", "STLA", "HMC"];

fn peers() -> Vec<String> {
    UNIVERSE[1..].iter().map(|s| s.to_string()).collect()
}

fn quote_rows() -> Vec<(&'static str, f64, f64)> {
    UNIVERSE
        .iter()
        .enumerate()
        .map(|(i, t)| (*t, 10.0 + i as f64, 5e10 + i as f64 * 1e10))
        .collect()
}

fn pipeline(dir: &std::path::Path, quotes: Vec<Arc<FakeQuotes>>, fundamentals: Arc<FakeFundamentals>) -> AcquisitionPipeline {
    let mut p = AcquisitionPipeline::new(CacheStore::new(dir), PipelineConfig::default())
        .with_fundamentals_adapter(fundamentals);
    for q in quotes {
        p = p.with_quote_adapter(q);
    }
    p
}

#[tokio::test]
async fn test_one_failing_peer_still_yields_full_universe() {
    let dir = tempfile::tempdir().unwrap();
    let p = pipeline(
        dir.path(),
        vec![FakeQuotes::ok("fmp", quote_rows())],
        FakeFundamentals::new(&["TM"]),
    );

    let out = p.acquire_universe("gm", &peers(), &CancellationToken::new()).await.unwrap();

    assert_eq!(out.universe.len(), 5);
    assert_eq!(out.universe.tickers(), UNIVERSE.to_vec());
    assert!(out.warnings.iter().any(|w| w.contains("TM")));
    assert_eq!(out.bootstrapped, vec!["TM"]);
    let tm = out.universe.get("TM").unwrap();
    assert_eq!(tm.fcf_ttm, None);
    assert_eq!(tm.price, Some(12.0));
    assert_eq!(out.fundamentals_sources.get("TM"), Some(&DataSource::Unavailable));
    // A bootstrapped row never becomes last-known-good
    assert!(!out.snapshot_saved);
}

#[tokio::test]
async fn test_failing_peer_recovers_from_cached_ttm_table() {
    let dir = tempfile::tempdir().unwrap();
    let fundamentals = FakeFundamentals::new(&[]);
    let p = pipeline(dir.path(), vec![FakeQuotes::ok("fmp", quote_rows())], fundamentals.clone());
    let cancel = CancellationToken::new();

    let healthy = p.acquire_universe("GM", &peers(), &cancel).await.unwrap();
    assert!(healthy.snapshot_saved);

    fundamentals.set_failing(&["TM"]);
    let degraded = p.acquire_universe("GM", &peers(), &cancel).await.unwrap();

    assert_eq!(degraded.universe.len(), 5);
    assert!(degraded.bootstrapped.is_empty());
    assert_eq!(degraded.fundamentals_sources.get("TM"), Some(&DataSource::CachedTable));
    assert!(degraded
        .warnings
        .contains(&"Fundamentals for TM recovered from cached TTM snapshot.".to_string()));
    assert_eq!(degraded.universe.get("TM"), healthy.universe.get("TM"));

    // The cached table still holds TM's rows after the degraded run
    let table: Vec<valuation_core::TtmRecord> = p.cache().read_csv(Dataset::FundamentalsTtm).unwrap();
    assert!(table.iter().any(|r| r.ticker == "TM"));
}

#[tokio::test]
async fn test_rerun_is_idempotent_and_advances_last_good() {
    let dir = tempfile::tempdir().unwrap();
    let p = pipeline(dir.path(), vec![FakeQuotes::ok("fmp", quote_rows())], FakeFundamentals::new(&[]));
    let cancel = CancellationToken::new();

    let first = p.acquire_universe("GM", &peers(), &cancel).await.unwrap();
    let second = p.acquire_universe("GM", &peers(), &cancel).await.unwrap();

    assert_eq!(first.universe.rows(), second.universe.rows());
    assert_eq!(second.universe.len(), 5);
    assert!(second.warnings.is_empty(), "{:?}", second.warnings);

    let store = p.cache();
    let latest: Vec<valuation_core::ComparableRow> = store.read_latest_csv(Dataset::CompsSnapshot).unwrap();
    assert_eq!(latest, second.universe.rows().to_vec());
    assert!(store.dated_path(Dataset::CompsSnapshot, Utc::now().date_naive()).exists());

    let table: Vec<valuation_core::TtmRecord> = store.read_csv(Dataset::FundamentalsTtm).unwrap();
    assert_eq!(table.len(), 5 * 8);
}

#[tokio::test]
async fn test_quote_cascade_falls_through_providers() {
    let dir = tempfile::tempdir().unwrap();
    let primary = FakeQuotes::failing("fmp", ProviderError::HttpStatus { code: 503 });
    let secondary = FakeQuotes::ok("polygon", quote_rows());
    let p = pipeline(dir.path(), vec![primary.clone(), secondary.clone()], FakeFundamentals::new(&[]));

    let tickers = universe_tickers("GM", &peers());
    let acq = p.acquire_quotes(&tickers, &CancellationToken::new()).await.unwrap();

    assert_eq!(acq.source, DataSource::Live("polygon".into()));
    assert_eq!(acq.data.len(), 5);
    assert_eq!(acq.warnings[0], "Primary quote pull failed: HTTP 503");
    assert_eq!(acq.warnings[1], "Quote pull recovered via polygon fallback.");
    assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_quotes_fall_back_to_raw_cache_then_exhaust() {
    let dir = tempfile::tempdir().unwrap();
    let tickers = universe_tickers("GM", &peers());

    // Exhausted with an empty cache
    let p = pipeline(
        dir.path(),
        vec![FakeQuotes::failing("fmp", ProviderError::Timeout)],
        FakeFundamentals::new(&[]),
    );
    match p.acquire_quotes(&tickers, &CancellationToken::new()).await {
        Err(valuation_core::ValuationError::AcquisitionExhausted { dataset, warnings, .. }) => {
            assert_eq!(dataset, "quotes");
            assert_eq!(
                warnings.last().map(String::as_str),
                Some("Quote fallback unavailable; price/market cap may be missing.")
            );
        }
        other => panic!("expected exhaustion, got {other:?}"),
    }

    // A healthy run fills the raw cache
    let healthy = pipeline(dir.path(), vec![FakeQuotes::ok("fmp", quote_rows())], FakeFundamentals::new(&[]));
    healthy.acquire_quotes(&tickers, &CancellationToken::new()).await.unwrap();

    let acq = p.acquire_quotes(&tickers, &CancellationToken::new()).await.unwrap();
    assert_eq!(acq.source, DataSource::RawCache);
    assert_eq!(acq.data.len(), 5);
}

#[tokio::test]
async fn test_partial_live_quotes_are_hydrated_from_cache() {
    let dir = tempfile::tempdir().unwrap();
    let tickers = universe_tickers("GM", &peers());
    let full = pipeline(dir.path(), vec![FakeQuotes::ok("fmp", quote_rows())], FakeFundamentals::new(&[]));
    full.acquire_quotes(&tickers, &CancellationToken::new()).await.unwrap();

    let partial_rows: Vec<_> = quote_rows().into_iter().filter(|(t, _, _)| *t != "HMC").collect();
    let partial = pipeline(dir.path(), vec![FakeQuotes::ok("fmp", partial_rows)], FakeFundamentals::new(&[]));
    let acq = partial.acquire_quotes(&tickers, &CancellationToken::new()).await.unwrap();

    assert_eq!(acq.data.len(), 5);
    assert_eq!(acq.data[4].ticker, "HMC");
    assert!(acq.warnings.iter().any(|w| w.starts_with("Quote hydration from cache completed for: HMC")));
}

#[tokio::test]
async fn test_total_outage_still_bootstraps_focus() {
    let dir = tempfile::tempdir().unwrap();
    let p = pipeline(
        dir.path(),
        vec![FakeQuotes::failing("fmp", ProviderError::Timeout)],
        FakeFundamentals::new(&UNIVERSE),
    );

    let out = p.acquire_universe("GM", &peers(), &CancellationToken::new()).await.unwrap();

    assert_eq!(out.universe.len(), 5);
    let focus = out.universe.focus_row().unwrap();
    assert_eq!(focus.ticker, "GM");
    assert_eq!(focus.price, None);
    assert!(out
        .warnings
        .iter()
        .any(|w| w == "Primary ticker GM was missing from comps snapshot; inserted bootstrap row with null fundamentals."));
    assert_eq!(out.quote_source, DataSource::Unavailable);
}

#[tokio::test]
async fn test_cancelled_run_degrades_to_cache() {
    let dir = tempfile::tempdir().unwrap();
    let fundamentals = FakeFundamentals::new(&[]);
    let p = pipeline(dir.path(), vec![FakeQuotes::ok("fmp", quote_rows())], fundamentals.clone());
    let healthy = p.acquire_universe("GM", &peers(), &CancellationToken::new()).await.unwrap();
    let live_calls = fundamentals.calls.load(Ordering::SeqCst);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let out = p.acquire_universe("GM", &peers(), &cancel).await.unwrap();

    assert_eq!(fundamentals.calls.load(Ordering::SeqCst), live_calls);
    assert_eq!(out.quote_source, DataSource::RawCache);
    assert_eq!(out.universe.rows(), healthy.universe.rows());
    assert!(out.fundamentals_sources.values().all(|s| *s == DataSource::CachedTable));
}

#[tokio::test]
async fn test_news_cascade() {
    let dir = tempfile::tempdir().unwrap();
    let article = NewsArticle {
        ticker: "GM".into(),
        published_at: Utc::now(),
        title: "GM beats estimates".into(),
        summary: None,
        source: "finnhub".into(),
        url: "https://n.test/1".into(),
    };

    let live = AcquisitionPipeline::new(CacheStore::new(dir.path()), PipelineConfig::default())
        .with_news_adapter(Arc::new(FakeNews { outcome: Ok(vec![article.clone(), article.clone()]) }));
    let acq = live.acquire_news("gm", &CancellationToken::new()).await;
    assert_eq!(acq.data.len(), 1);
    assert!(acq.source.is_live());

    let failing = AcquisitionPipeline::new(CacheStore::new(dir.path()), PipelineConfig::default())
        .with_news_adapter(Arc::new(FakeNews { outcome: Err(ProviderError::Timeout) }));
    let acq = failing.acquire_news("GM", &CancellationToken::new()).await;
    assert_eq!(acq.source, DataSource::RawCache);
    assert_eq!(acq.data, vec![article.clone()]);

    // Without the current table the last-good copy still answers
    std::fs::remove_file(failing.cache().path(Dataset::News)).unwrap();
    let acq = failing.acquire_news("GM", &CancellationToken::new()).await;
    assert_eq!(acq.source, DataSource::LastGood);
    assert_eq!(acq.data, vec![article]);

    let other = failing.acquire_news("F", &CancellationToken::new()).await;
    assert_eq!(other.source, DataSource::Unavailable);
    assert!(other.data.is_empty());
    assert!(other.warnings.last().unwrap().contains("No news available for F"));
}

fn news_for(ticker: &str, url: &str) -> NewsArticle {
    NewsArticle {
        ticker: ticker.into(),
        published_at: Utc::now(),
        title: format!("{ticker} headline"),
        summary: None,
        source: "finnhub".into(),
        url: url.into(),
    }
}

#[tokio::test]
async fn test_news_for_one_ticker_survives_a_later_ticker_run() {
    let dir = tempfile::tempdir().unwrap();
    let news_pipeline = |outcome: Result<Vec<NewsArticle>, ProviderError>| {
        AcquisitionPipeline::new(CacheStore::new(dir.path()), PipelineConfig::default())
            .with_news_adapter(Arc::new(FakeNews { outcome }))
    };
    let cancel = CancellationToken::new();

    let gm = news_for("GM", "https://n.test/gm");
    let f = news_for("F", "https://n.test/f");
    assert!(news_pipeline(Ok(vec![gm.clone()])).acquire_news("GM", &cancel).await.source.is_live());
    assert!(news_pipeline(Ok(vec![f.clone()])).acquire_news("F", &cancel).await.source.is_live());

    let failing = news_pipeline(Err(ProviderError::HttpStatus { code: 503 }));
    let restored = failing.acquire_news("GM", &cancel).await;
    assert_eq!(restored.source, DataSource::RawCache);
    assert_eq!(restored.data, vec![gm.clone()]);
    assert_eq!(restored.warnings[0], "News fetch failed for GM via finnhub: HTTP 503");
    assert_eq!(restored.warnings[1], "News for GM restored from cached news (1 articles).");

    // The last-good copy holds both tickers as well
    let last_good: Vec<NewsArticle> = failing.cache().read_latest_json(Dataset::News).unwrap().unwrap();
    assert_eq!(last_good.len(), 2);
    std::fs::remove_file(failing.cache().path(Dataset::News)).unwrap();
    let restored = failing.acquire_news("GM", &cancel).await;
    assert_eq!(restored.source, DataSource::LastGood);
    assert_eq!(restored.data, vec![gm]);
}

#[test]
fn test_merge_news_replaces_only_that_ticker() {
    let cached = vec![
        news_for("GM", "https://n.test/gm-old"),
        news_for("F", "https://n.test/f"),
    ];
    let fresh = vec![news_for("GM", "https://n.test/gm-new")];

    let merged = crate::news::merge_news(cached, "gm", &fresh);

    let urls: Vec<&str> = merged.iter().map(|a| a.url.as_str()).collect();
    assert_eq!(urls, vec!["https://n.test/f", "https://n.test/gm-new"]);
}

#[tokio::test]
async fn test_unwritable_comps_cache_is_a_warning() {
    let dir = tempfile::tempdir().unwrap();
    // A file where the processed/ directory should be makes every table write fail
    std::fs::write(dir.path().join("processed"), b"not a directory").unwrap();
    let p = pipeline(dir.path(), vec![FakeQuotes::ok("fmp", quote_rows())], FakeFundamentals::new(&[]));

    let out = p.acquire_universe("GM", &peers(), &CancellationToken::new()).await.unwrap();

    assert_eq!(out.universe.len(), 5);
    assert!(out.bootstrapped.is_empty());
    assert!(!out.snapshot_saved);
    assert!(out.warnings.iter().any(|w| w.starts_with("Failed to write comps snapshot")));
    assert!(out.warnings.iter().any(|w| w.starts_with("Failed to write TTM table")));
    assert_eq!(out.quote_source, DataSource::Live("fmp".into()));
}

#[tokio::test]
async fn test_cross_check_flags_divergent_providers() {
    let a = FakeQuotes::ok("fmp", vec![("GM", 100.0, 5.0e10)]);
    let b = FakeQuotes::ok("polygon", vec![("GM", 95.0, 5.1e10)]);
    let adapters: Vec<Arc<dyn QuoteAdapter>> = vec![a, b];

    let report = cross_check(&adapters, &[], "gm", &CrossCheckThresholds::default(), &CancellationToken::new()).await;
    assert!(report.enabled);
    assert!((report.variance_pct.price.unwrap() - 5.0).abs() < 1e-9);
    assert_eq!(report.alerts.len(), 1);
    assert!(report.alerts[0].starts_with("Price variance high between fmp and polygon"));

    let single: Vec<Arc<dyn QuoteAdapter>> = vec![FakeQuotes::ok("fmp", vec![])];
    assert!(!cross_check(&single, &[], "GM", &CrossCheckThresholds::default(), &CancellationToken::new()).await.enabled);
}

#[tokio::test]
async fn test_cross_check_reuses_acquired_quotes() {
    let dir = tempfile::tempdir().unwrap();
    let fmp = FakeQuotes::ok("fmp", quote_rows());
    let polygon = FakeQuotes::ok("polygon", vec![("GM", 10.1, 5.0e10)]);
    let p = pipeline(dir.path(), vec![fmp.clone(), polygon.clone()], FakeFundamentals::new(&[]));
    let cancel = CancellationToken::new();

    let out = p.acquire_universe("GM", &peers(), &cancel).await.unwrap();
    assert_eq!(out.live_quotes.len(), 5);
    assert_eq!(fmp.calls.load(Ordering::SeqCst), 1);

    let report = cross_check(p.quote_adapters(), &out.live_quotes, "GM", &CrossCheckThresholds::default(), &cancel).await;

    // fmp's quote comes from the acquisition; only polygon is asked
    assert_eq!(fmp.calls.load(Ordering::SeqCst), 1);
    assert_eq!(polygon.calls.load(Ordering::SeqCst), 1);
    assert_eq!(report.left.price, Some(10.0));
    assert_eq!(report.right.price, Some(10.1));
    assert!((report.variance_pct.price.unwrap() - 0.1 / 10.1 * 100.0).abs() < 1e-9);
    assert!(report.alerts.is_empty(), "{:?}", report.alerts);
}

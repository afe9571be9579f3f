//! valuation-runner: peer-relative score and Monte Carlo valuation for one ticker.
//!
//! Acquires quotes, fundamentals and news for the focus ticker and its peers (falling
//! back to the on-disk caches when providers fail), scores the focus against the peer
//! universe, samples its valuation cone and writes JSON artifacts to the output dir.
//!
//! Usage:
//!   cargo run -p valuation-runner -- --ticker GM --peers F,TM,STLA,HMC
//!   TICKER=GM PEERS=F,TM cargo run -p valuation-runner
//!   cargo run -p valuation-runner -- --warm-cache GM,F,TM,STLA,HMC

mod artifacts;
mod config;
mod run;

use tokio_util::sync::CancellationToken;

use crate::config::{split_tickers, RunnerConfig};
use crate::run::Runner;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let args: Vec<String> = std::env::args().collect();
    let arg = |flag: &str| {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .cloned()
    };

    let ticker = arg("--ticker").or_else(|| std::env::var("TICKER").ok());
    let peers = split_tickers(
        &arg("--peers")
            .or_else(|| std::env::var("PEERS").ok())
            .unwrap_or_default(),
    );
    let warm = arg("--warm-cache").map(|v| split_tickers(&v));

    if ticker.is_none() && warm.is_none() {
        eprintln!("Usage:");
        eprintln!("  valuation-runner --ticker GM --peers F,TM,STLA   Score and value one ticker");
        eprintln!("  valuation-runner --warm-cache GM,F,TM             Run each ticker, refreshing caches");
        eprintln!();
        eprintln!("Options:");
        eprintln!("  --peers A,B,C    Peer universe (default: PEERS env; for --warm-cache, the other tickers)");
        eprintln!();
        eprintln!("Environment: FMP_API_KEY, POLYGON_API_KEY, FINNHUB_API_KEY, VALUATION_DATA_DIR,");
        eprintln!("  VALUATION_OUTPUT_DIR, MC_SAMPLES, MC_SEED, PROVIDER_*, FRESHNESS_SLA_*, LOG_FORMAT");
        std::process::exit(1);
    }

    let config = RunnerConfig::from_env()?;
    tracing::info!(
        "valuation-runner: data={}, outputs={}, samples={}, seed={}",
        config.data_dir.display(),
        config.output_dir.display(),
        config.sampler.samples,
        config.sampler.seed
    );
    let runner = Runner::new(config);

    // Ctrl-C abandons in-flight provider calls; the run finishes from cache.
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted; finishing from cached data");
            on_signal.cancel();
        }
    });

    if let Some(tickers) = warm {
        let report = runner.warm_cache(&tickers, &peers, &cancel).await?;
        tracing::info!(
            "Done! {} ok, {} failed; report in {}",
            report.succeeded,
            report.failed,
            runner.writer().dir().display()
        );
        return Ok(());
    }

    let ticker = ticker.unwrap_or_default();
    let result = runner.run(&ticker, &peers, &cancel).await?;
    let summary = &result.summary;
    tracing::info!(
        "Done! {} {} score={} warnings={}",
        summary.ticker,
        summary.score.rating,
        summary.score.score,
        summary.warnings.len()
    );
    if let Some(cone) = &result.montecarlo.cone {
        tracing::info!(
            "  Monte Carlo p10/p50/p90 = {:.2}/{:.2}/{:.2} ({:?})",
            cone.summary.p10,
            cone.summary.p50,
            cone.summary.p90,
            cone.confidence
        );
    }
    for path in &result.artifacts {
        tracing::info!("  wrote {}", path.display());
    }
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "valuation_runner=info,acquisition_pipeline=info,provider_gateway=warn".into()
    });
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

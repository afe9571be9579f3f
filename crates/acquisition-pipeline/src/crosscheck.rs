use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use valuation_core::{normalize_ticker, Quote, QuoteAdapter};

/// Alert thresholds, in percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CrossCheckThresholds {
    pub price_pct: f64,
    pub market_cap_pct: f64,
}

impl Default for CrossCheckThresholds {
    fn default() -> Self {
        Self {
            price_pct: 2.0,
            market_cap_pct: 8.0,
        }
    }
}

impl CrossCheckThresholds {
    pub fn from_env() -> Self {
        let read = |key: &str, default: f64| {
            std::env::var(key)
                .ok()
                .and_then(|v| v.trim().parse::<f64>().ok())
                .unwrap_or(default)
        };
        let d = Self::default();
        Self {
            price_pct: read("CROSSCHECK_PRICE_VAR_ALERT_PCT", d.price_pct),
            market_cap_pct: read("CROSSCHECK_MCAP_VAR_ALERT_PCT", d.market_cap_pct),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderQuoteSide {
    pub provider: String,
    pub price: Option<f64>,
    pub market_cap: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Variance {
    pub price: Option<f64>,
    pub market_cap: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CrossCheckReport {
    pub enabled: bool,
    pub ticker: String,
    pub left: ProviderQuoteSide,
    pub right: ProviderQuoteSide,
    pub variance_pct: Variance,
    pub alerts: Vec<String>,
}

/// `|a - b| / max(|a|, |b|, 1e-9) * 100`; null when either side is missing.
pub fn variance_pct(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    let (a, b) = (a?, b?);
    if a == 0.0 && b == 0.0 {
        return Some(0.0);
    }
    let den = a.abs().max(b.abs()).max(1e-9);
    Some((a - b).abs() / den * 100.0)
}

/// One side of the comparison; a quote this provider already served is reused.
async fn fetch_side(
    adapter: &dyn QuoteAdapter,
    acquired: &[Quote],
    ticker: &str,
    cancel: &CancellationToken,
    alerts: &mut Vec<String>,
) -> ProviderQuoteSide {
    let mut side = ProviderQuoteSide {
        provider: adapter.name().to_string(),
        ..Default::default()
    };
    if let Some(q) = acquired
        .iter()
        .find(|q| q.provider == adapter.name() && normalize_ticker(&q.ticker) == ticker)
    {
        side.price = q.price;
        side.market_cap = q.market_cap;
        return side;
    }
    match adapter.fetch_quotes(&[ticker.to_string()], cancel).await {
        Ok(quotes) => {
            if let Some(q) = quotes.into_iter().find(|q| normalize_ticker(&q.ticker) == ticker) {
                side.price = q.price;
                side.market_cap = q.market_cap;
            }
        }
        Err(e) => alerts.push(format!("{} cross-check fetch failed: {}", adapter.name(), e)),
    }
    side
}

/// Compare the focus quote between the first two quote adapters.
///
/// `acquired` holds quotes fetched live earlier in the run; only a provider with no
/// focus quote among them is queried.
pub async fn cross_check(
    adapters: &[Arc<dyn QuoteAdapter>],
    acquired: &[Quote],
    focus: &str,
    thresholds: &CrossCheckThresholds,
    cancel: &CancellationToken,
) -> CrossCheckReport {
    let ticker = normalize_ticker(focus);
    let mut report = CrossCheckReport {
        ticker: ticker.clone(),
        ..Default::default()
    };
    let (Some(first), Some(second)) = (adapters.first(), adapters.get(1)) else {
        return report;
    };
    report.enabled = true;

    let mut alerts = Vec::new();
    report.left = fetch_side(first.as_ref(), acquired, &ticker, cancel, &mut alerts).await;
    report.right = fetch_side(second.as_ref(), acquired, &ticker, cancel, &mut alerts).await;

    let (l, r) = (&report.left, &report.right);
    report.variance_pct = Variance {
        price: variance_pct(l.price, r.price),
        market_cap: variance_pct(l.market_cap, r.market_cap),
    };

    match report.variance_pct.price {
        None => alerts.push(format!(
            "Price variance unavailable: one side is missing price ({}={:?}, {}={:?}).",
            l.provider, l.price, r.provider, r.price
        )),
        Some(v) if v > thresholds.price_pct => alerts.push(format!(
            "Price variance high between {} and {}: {:.2}% (> {:.2}%)",
            l.provider, r.provider, v, thresholds.price_pct
        )),
        Some(_) => {}
    }
    match report.variance_pct.market_cap {
        None => alerts.push(format!(
            "Market cap variance unavailable: one side is missing market cap ({}={:?}, {}={:?}).",
            l.provider, l.market_cap, r.provider, r.market_cap
        )),
        Some(v) if v > thresholds.market_cap_pct => alerts.push(format!(
            "Market cap variance high between {} and {}: {:.2}% (> {:.2}%)",
            l.provider, r.provider, v, thresholds.market_cap_pct
        )),
        Some(_) => {}
    }

    report.alerts = alerts;
    report
}

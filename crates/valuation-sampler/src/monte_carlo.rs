use rand::distributions::Distribution;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::json;
use statrs::distribution::Triangular;
use std::fmt;
use valuation_core::ValuationError;

/// Samples drawn per rayon task. Each chunk gets its own RNG seeded from the run
/// seed and the chunk index, so output does not depend on the thread count.
const CHUNK: usize = 4096;
const CHUNK_SEED_STRIDE: u64 = 0x9E37_79B9_7F4A_7C15;

/// Synthetic cone multipliers applied to an anchor price.
pub const BEAR_MULTIPLIER: f64 = 0.80;
pub const BASE_MULTIPLIER: f64 = 1.00;
pub const BULL_MULTIPLIER: f64 = 1.35;

/// Bear / base / bull value per share.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ValuationCone {
    pub bear: Option<f64>,
    pub base: Option<f64>,
    pub bull: Option<f64>,
}

impl ValuationCone {
    pub fn new(bear: f64, base: f64, bull: f64) -> Self {
        Self {
            bear: Some(bear),
            base: Some(base),
            bull: Some(bull),
        }
    }

    /// Fixed-multiplier cone around `price`.
    pub fn anchored(price: f64) -> Self {
        Self::new(price * BEAR_MULTIPLIER, price * BASE_MULTIPLIER, price * BULL_MULTIPLIER)
    }

    /// All three points, when every one is present and finite.
    pub fn complete(&self) -> Option<(f64, f64, f64)> {
        match (self.bear, self.base, self.bull) {
            (Some(a), Some(b), Some(c)) if a.is_finite() && b.is_finite() && c.is_finite() => Some((a, b, c)),
            _ => None,
        }
    }
}

/// Prices available for anchoring a synthetic cone, best first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceContext {
    /// Focus price from the comparable snapshot
    pub snapshot_price: Option<f64>,
    /// Price from a live quote fetch
    pub live_price: Option<f64>,
}

fn usable(price: Option<f64>) -> Option<f64> {
    price.filter(|p| p.is_finite() && *p > 0.0)
}

impl PriceContext {
    /// Best real price: snapshot, then live quote.
    pub fn current(&self) -> Option<f64> {
        usable(self.snapshot_price).or(usable(self.live_price))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorSource {
    CompsSnapshot,
    FmpLiveQuote,
    DefaultAnchor,
}

impl AnchorSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnchorSource::CompsSnapshot => "comps_snapshot",
            AnchorSource::FmpLiveQuote => "fmp_live_quote",
            AnchorSource::DefaultAnchor => "default_anchor",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConfidenceGrade {
    High,
    Medium,
    Low,
}

impl fmt::Display for ConfidenceGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfidenceGrade::High => write!(f, "HIGH"),
            ConfidenceGrade::Medium => write!(f, "MEDIUM"),
            ConfidenceGrade::Low => write!(f, "LOW"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceAnchor {
    pub price: f64,
    pub source: AnchorSource,
}

impl PriceAnchor {
    pub fn confidence(&self) -> ConfidenceGrade {
        match self.source {
            AnchorSource::CompsSnapshot | AnchorSource::FmpLiveQuote => ConfidenceGrade::Medium,
            AnchorSource::DefaultAnchor => ConfidenceGrade::Low,
        }
    }
}

/// Pick the anchor price for a synthetic cone: snapshot, live quote, then the fixed default.
pub fn resolve_anchor(prices: &PriceContext, default_anchor: f64) -> PriceAnchor {
    if let Some(price) = usable(prices.snapshot_price) {
        return PriceAnchor { price, source: AnchorSource::CompsSnapshot };
    }
    if let Some(price) = usable(prices.live_price) {
        return PriceAnchor { price, source: AnchorSource::FmpLiveQuote };
    }
    PriceAnchor {
        price: default_anchor,
        source: AnchorSource::DefaultAnchor,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplerConfig {
    pub samples: usize,
    pub seed: u64,
    pub default_anchor: f64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            samples: 20_000,
            seed: 7,
            default_anchor: 100.0,
        }
    }
}

impl SamplerConfig {
    /// `MC_SAMPLES`, `MC_SEED`, `MC_DEFAULT_ANCHOR` over the defaults.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            samples: std::env::var("MC_SAMPLES")
                .ok()
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(d.samples),
            seed: std::env::var("MC_SEED")
                .ok()
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(d.seed),
            default_anchor: std::env::var("MC_DEFAULT_ANCHOR")
                .ok()
                .and_then(|v| v.trim().parse::<f64>().ok())
                .filter(|v| v.is_finite() && *v > 0.0)
                .unwrap_or(d.default_anchor),
        }
    }
}

/// Order statistics and tail probabilities over the surviving samples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampleSummary {
    pub p10: f64,
    pub p50: f64,
    pub p90: f64,
    pub mean: f64,
    pub stdev: f64,
    pub prob_down_20pct: Option<f64>,
    pub prob_up_20pct: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonteCarloResult {
    pub method: String,
    pub n_requested: usize,
    pub n_used: usize,
    #[serde(flatten)]
    pub summary: SampleSummary,
    pub fallback_used: bool,
    pub fallback_reason: Option<String>,
    pub confidence: ConfidenceGrade,
    /// Echo of every input that shaped the draw
    pub inputs: serde_json::Value,
}

/// A triangular draw that tolerates a zero-width range.
#[derive(Debug, Clone)]
pub(crate) enum TriangularDraw {
    Fixed(f64),
    Spread(Triangular),
}

impl TriangularDraw {
    /// Triangular over `[min(a,b,c), max(a,b,c)]` with mode `mode`.
    pub(crate) fn new(low: f64, mode: f64, high: f64) -> Result<Self, ValuationError> {
        let lo = low.min(mode).min(high);
        let hi = low.max(mode).max(high);
        if !(lo.is_finite() && hi.is_finite() && mode.is_finite()) {
            return Err(ValuationError::InvalidData(format!(
                "triangular bounds must be finite: ({}, {}, {})",
                low, mode, high
            )));
        }
        if hi - lo <= f64::EPSILON * hi.abs().max(1.0) {
            return Ok(TriangularDraw::Fixed(mode));
        }
        Triangular::new(lo, hi, mode)
            .map(TriangularDraw::Spread)
            .map_err(|e| ValuationError::InvalidData(format!("triangular({}, {}, {}): {}", lo, mode, hi, e)))
    }

    pub(crate) fn sample(&self, rng: &mut StdRng) -> f64 {
        match self {
            TriangularDraw::Fixed(v) => *v,
            TriangularDraw::Spread(t) => t.sample(rng),
        }
    }
}

/// Draw `n` values in deterministic parallel chunks; `None` draws are discarded.
pub(crate) fn sample_chunks<F>(n: usize, seed: u64, draw: F) -> Vec<f64>
where
    F: Fn(&mut StdRng) -> Option<f64> + Sync,
{
    let chunks = n.div_ceil(CHUNK);
    let parts: Vec<Vec<f64>> = (0..chunks)
        .into_par_iter()
        .map(|idx| {
            let chunk_seed = seed.wrapping_add((idx as u64).wrapping_mul(CHUNK_SEED_STRIDE));
            let mut rng = StdRng::seed_from_u64(chunk_seed);
            let len = CHUNK.min(n - idx * CHUNK);
            (0..len)
                .filter_map(|_| draw(&mut rng))
                .filter(|v| v.is_finite())
                .collect()
        })
        .collect();
    parts.into_iter().flatten().collect()
}

/// `sorted[round(p * (n - 1))]`, clamped to the valid range.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let idx = (p * (sorted.len() - 1) as f64).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

/// Summarize samples; fails when nothing survived.
pub(crate) fn summarize(mut samples: Vec<f64>, price: Option<f64>) -> Result<SampleSummary, ValuationError> {
    if samples.is_empty() {
        return Err(ValuationError::InvalidSampleSet(
            "every draw was discarded; inputs or assumptions too tight".to_string(),
        ));
    }
    samples.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    let var = samples.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

    let (prob_down_20pct, prob_up_20pct) = match usable(price) {
        Some(p) => (
            Some(samples.iter().filter(|v| **v <= p * 0.80).count() as f64 / n),
            Some(samples.iter().filter(|v| **v >= p * 1.20).count() as f64 / n),
        ),
        None => (None, None),
    };

    Ok(SampleSummary {
        p10: percentile(&samples, 0.10),
        p50: percentile(&samples, 0.50),
        p90: percentile(&samples, 0.90),
        mean,
        stdev: var.sqrt(),
        prob_down_20pct,
        prob_up_20pct,
    })
}

/// Triangular Monte Carlo over a bear/base/bull cone.
///
/// An incomplete cone is replaced by a fixed-multiplier cone around the best
/// available price (snapshot, live quote, default anchor), and the result is
/// marked as a fallback with a lower confidence grade. Tail probabilities are
/// reported only against a real price. Identical inputs and seed always give
/// identical output.
pub fn simulate(
    cone: &ValuationCone,
    prices: &PriceContext,
    config: &SamplerConfig,
) -> Result<MonteCarloResult, ValuationError> {
    if config.samples == 0 {
        return Err(ValuationError::InvalidSampleSet("zero samples requested".to_string()));
    }

    let (points, price, fallback_reason, confidence) = match cone.complete() {
        Some(points) => (points, prices.current(), None, ConfidenceGrade::High),
        None => {
            let anchor = resolve_anchor(prices, config.default_anchor);
            let anchored = ValuationCone::anchored(anchor.price);
            tracing::warn!(
                "Valuation cone incomplete; anchoring on {} price {:.2}",
                anchor.source.as_str(),
                anchor.price
            );
            let price = match anchor.source {
                AnchorSource::DefaultAnchor => None,
                _ => Some(anchor.price),
            };
            let points = anchored.complete().ok_or_else(|| {
                ValuationError::InvalidData(format!("default anchor {} is not finite", anchor.price))
            })?;
            (points, price, Some(anchor.source.as_str().to_string()), anchor.confidence())
        }
    };
    let (bear, base, bull) = points;

    let dist = TriangularDraw::new(bear, base, bull)?;
    let samples = sample_chunks(config.samples, config.seed, |rng| Some(dist.sample(rng)));
    let n_used = samples.len();
    let summary = summarize(samples, price)?;

    Ok(MonteCarloResult {
        method: "triangular_over_valuation_cone".to_string(),
        n_requested: config.samples,
        n_used,
        summary,
        fallback_used: fallback_reason.is_some(),
        fallback_reason,
        confidence,
        inputs: json!({
            "bear": bear,
            "base": base,
            "bull": bull,
            "price_used": price,
            "n": config.samples,
            "seed": config.seed,
        }),
    })
}

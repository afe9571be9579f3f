use serde::{Deserialize, Serialize};
use serde_json::json;
use valuation_core::{ComparableRow, ValuationError};

use crate::monte_carlo::{
    sample_chunks, summarize, ConfidenceGrade, MonteCarloResult, TriangularDraw, ValuationCone,
};

/// Denominators `r - g` at or below this are discarded rather than exploding the terminal value.
const MIN_SPREAD: f64 = 0.002;

/// Low / mode / high of a triangular assumption.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tri {
    pub low: f64,
    pub mode: f64,
    pub high: f64,
}

impl Tri {
    pub const fn new(low: f64, mode: f64, high: f64) -> Self {
        Self { low, mode, high }
    }

    fn draw(&self) -> Result<TriangularDraw, ValuationError> {
        TriangularDraw::new(self.low, self.mode, self.high)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DcfAssumptions {
    pub years_stage1: u32,
    pub years_stage2: u32,
    pub discount_rate: Tri,
    pub terminal_growth: Tri,
    pub growth_stage1: Tri,
    pub growth_stage2: Tri,
    /// Draws are clamped into these ranges
    pub discount_bounds: (f64, f64),
    pub terminal_bounds: (f64, f64),
}

impl Default for DcfAssumptions {
    fn default() -> Self {
        Self {
            years_stage1: 5,
            years_stage2: 5,
            discount_rate: Tri::new(0.08, 0.10, 0.12),
            terminal_growth: Tri::new(0.0, 0.02, 0.03),
            growth_stage1: Tri::new(0.04, 0.08, 0.12),
            growth_stage2: Tri::new(0.02, 0.04, 0.07),
            discount_bounds: (0.03, 0.20),
            terminal_bounds: (-0.02, 0.06),
        }
    }
}

/// Company inputs for the DCF Monte Carlo.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DcfInputs {
    pub price: f64,
    pub fcf_ttm: f64,
    pub shares: f64,
    pub net_debt: f64,
}

impl DcfInputs {
    /// Inputs from a comparable row; shares are derived as market cap / price.
    pub fn from_row(row: &ComparableRow) -> Option<Self> {
        let price = row.price.filter(|p| *p > 0.0)?;
        let market_cap = row.market_cap.filter(|m| *m > 0.0)?;
        let fcf_ttm = row.fcf_ttm.filter(|f| f.is_finite() && *f != 0.0)?;
        Some(Self {
            price,
            fcf_ttm,
            shares: market_cap / price,
            net_debt: row.net_debt.unwrap_or(0.0),
        })
    }
}

/// Present value of FCF growing at `g1` for `years1` years, then `g2` for `years2`,
/// plus a Gordon terminal value. `None` when `r - tg` is too small.
fn two_stage_value(fcf: f64, r: f64, tg: f64, g1: f64, g2: f64, years1: u32, years2: u32) -> Option<f64> {
    let spread = r - tg;
    if spread <= MIN_SPREAD {
        return None;
    }
    let mut f = fcf;
    let mut pv = 0.0;
    for y in 1..=(years1 + years2) {
        f *= 1.0 + if y <= years1 { g1 } else { g2 };
        pv += f / (1.0 + r).powi(y as i32);
    }
    let terminal = f * (1.0 + tg) / spread;
    pv += terminal / (1.0 + r).powi((years1 + years2) as i32);
    Some(pv)
}

/// Two-stage DCF Monte Carlo over per-share equity value.
///
/// Samples whose discount/terminal spread is at or below 0.2pp, or whose per-share
/// value is non-positive or not finite, are dropped; zero survivors is an error.
pub fn simulate_dcf(
    inputs: &DcfInputs,
    assumptions: &DcfAssumptions,
    samples: usize,
    seed: u64,
) -> Result<MonteCarloResult, ValuationError> {
    if samples == 0 {
        return Err(ValuationError::InvalidSampleSet("zero samples requested".to_string()));
    }
    if !(inputs.price > 0.0 && inputs.shares > 0.0 && inputs.fcf_ttm != 0.0) {
        return Err(ValuationError::InvalidData(format!(
            "DCF inputs incomplete: price={} fcf_ttm={} shares={}",
            inputs.price, inputs.fcf_ttm, inputs.shares
        )));
    }

    let discount = assumptions.discount_rate.draw()?;
    let terminal = assumptions.terminal_growth.draw()?;
    let stage1 = assumptions.growth_stage1.draw()?;
    let stage2 = assumptions.growth_stage2.draw()?;
    let (r_lo, r_hi) = assumptions.discount_bounds;
    let (tg_lo, tg_hi) = assumptions.terminal_bounds;

    let values = sample_chunks(samples, seed, |rng| {
        // Draw order is fixed so a seed always maps to the same path
        let r = discount.sample(rng).clamp(r_lo, r_hi);
        let tg = terminal.sample(rng).clamp(tg_lo, tg_hi);
        let g1 = stage1.sample(rng);
        let g2 = stage2.sample(rng);
        let ev = two_stage_value(
            inputs.fcf_ttm,
            r,
            tg,
            g1,
            g2,
            assumptions.years_stage1,
            assumptions.years_stage2,
        )?;
        let per_share = (ev - inputs.net_debt) / inputs.shares;
        (per_share.is_finite() && per_share > 0.0).then_some(per_share)
    });

    let n_used = values.len();
    if n_used < samples {
        tracing::debug!("DCF Monte Carlo discarded {} of {} samples", samples - n_used, samples);
    }
    let summary = summarize(values, Some(inputs.price))?;

    Ok(MonteCarloResult {
        method: "two_stage_dcf".to_string(),
        n_requested: samples,
        n_used,
        summary,
        fallback_used: false,
        fallback_reason: None,
        confidence: ConfidenceGrade::High,
        inputs: json!({
            "price": inputs.price,
            "fcf_ttm": inputs.fcf_ttm,
            "shares": inputs.shares,
            "net_debt": inputs.net_debt,
            "years_stage1": assumptions.years_stage1,
            "years_stage2": assumptions.years_stage2,
            "discount_rate_tri": [assumptions.discount_rate.low, assumptions.discount_rate.mode, assumptions.discount_rate.high],
            "terminal_growth_tri": [assumptions.terminal_growth.low, assumptions.terminal_growth.mode, assumptions.terminal_growth.high],
            "fcf_growth_stage1_tri": [assumptions.growth_stage1.low, assumptions.growth_stage1.mode, assumptions.growth_stage1.high],
            "fcf_growth_stage2_tri": [assumptions.growth_stage2.low, assumptions.growth_stage2.mode, assumptions.growth_stage2.high],
            "seed": seed,
        }),
    })
}

/// Deterministic cone assumptions: one growth rate per scenario over five years.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConeAssumptions {
    pub years: u32,
    pub discount_rate: f64,
    pub terminal_growth: f64,
    pub bear_growth: f64,
    pub base_growth: f64,
    pub bull_growth: f64,
}

impl Default for ConeAssumptions {
    fn default() -> Self {
        Self {
            years: 5,
            discount_rate: 0.10,
            terminal_growth: 0.02,
            bear_growth: 0.03,
            base_growth: 0.08,
            bull_growth: 0.12,
        }
    }
}

/// Bear/base/bull per-share values from a five-year DCF on the row's TTM FCF.
///
/// `None` when FCF is not positive, shares cannot be derived, or the
/// discount rate does not exceed terminal growth.
pub fn build_dcf_cone(row: &ComparableRow, assumptions: &ConeAssumptions) -> Option<ValuationCone> {
    let inputs = DcfInputs::from_row(row)?;
    if inputs.fcf_ttm <= 0.0 {
        return None;
    }
    let per_share = |growth: f64| {
        two_stage_value(
            inputs.fcf_ttm,
            assumptions.discount_rate,
            assumptions.terminal_growth,
            growth,
            growth,
            assumptions.years,
            0,
        )
        .map(|ev| (ev - inputs.net_debt) / inputs.shares)
        .filter(|v| v.is_finite())
    };
    Some(ValuationCone::new(
        per_share(assumptions.bear_growth)?,
        per_share(assumptions.base_growth)?,
        per_share(assumptions.bull_growth)?,
    ))
}

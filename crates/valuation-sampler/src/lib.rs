//! Monte Carlo valuation: triangular sampling over a bear/base/bull cone and a
//! two-stage DCF simulation, both reproducible from a seed.

pub mod dcf;
pub mod monte_carlo;

pub use dcf::{build_dcf_cone, simulate_dcf, ConeAssumptions, DcfAssumptions, DcfInputs, Tri};
pub use monte_carlo::{
    percentile, resolve_anchor, simulate, AnchorSource, ConfidenceGrade, MonteCarloResult,
    PriceAnchor, PriceContext, SampleSummary, SamplerConfig, ValuationCone,
};

#[cfg(test)]
mod tests;

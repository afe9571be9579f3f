use serde::{Deserialize, Serialize};
use std::path::Path;
use valuation_core::ValuationError;

/// One step of a tier table: values past `at` earn `points`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tier {
    pub at: f64,
    pub points: f64,
}

/// Ordered tiers, most demanding first, plus the points for falling past all of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierTable {
    pub tiers: Vec<Tier>,
    #[serde(default)]
    pub floor: f64,
}

impl TierTable {
    fn new(tiers: &[(f64, f64)], floor: f64) -> Self {
        Self {
            tiers: tiers.iter().map(|&(at, points)| Tier { at, points }).collect(),
            floor,
        }
    }

    /// Points of the first tier with `value >= at`.
    pub fn at_least(&self, value: f64) -> f64 {
        self.tiers
            .iter()
            .find(|t| value >= t.at)
            .map(|t| t.points)
            .unwrap_or(self.floor)
    }

    /// Points of the first tier with `value <= at`.
    pub fn at_most(&self, value: f64) -> f64 {
        self.tiers
            .iter()
            .find(|t| value <= t.at)
            .map(|t| t.points)
            .unwrap_or(self.floor)
    }

    /// True when `value` clears none of the tiers.
    pub fn below_all(&self, value: f64) -> bool {
        self.tiers.iter().all(|t| value < t.at)
    }
}

/// Every tier constant the scoring engine uses.
///
/// The defaults are calibrated for large caps; a JSON file can override any
/// subset of fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringThresholds {
    /// Absolute TTM FCF in dollars -> cash_level points
    pub cash_fcf: TierTable,
    /// FCF yield as a fraction -> valuation points
    pub fcf_yield: TierTable,
    pub fcf_yield_rank: TierTable,

    /// Revenue TTM YoY %; negative growth applies `revenue_decline_points` instead
    pub revenue_growth: TierTable,
    pub revenue_decline_points: f64,
    pub fcf_growth: TierTable,
    pub fcf_decline_points: f64,
    pub growth_rank: TierTable,

    /// FCF margin %
    pub margin: TierTable,
    pub margin_rank: TierTable,

    pub net_debt_to_fcf: TierTable,
    pub net_debt_missing_points: f64,
    pub net_debt_flag_at: f64,
    pub negative_headlines_7d: TierTable,
    pub shock_7d: TierTable,
    pub core_tags_30d: TierTable,
    pub core_tags_flag_at: f64,
    pub negative_news_flag_at: u32,
    pub proxy_penalty: TierTable,
    pub proxy_bonus_at: f64,
    pub proxy_bonus_points: f64,

    pub buy_at: u8,
    pub hold_at: u8,
    /// Score ceiling when the freshness SLA fails
    pub stale_score_cap: u8,
}

impl Default for ScoringThresholds {
    fn default() -> Self {
        Self {
            cash_fcf: TierTable::new(&[(12e9, 25.0), (8e9, 21.0), (4e9, 15.0), (1e9, 8.0)], 3.0),
            fcf_yield: TierTable::new(&[(0.08, 10.0), (0.06, 8.0), (0.04, 5.0), (0.025, 3.0)], 1.0),
            fcf_yield_rank: TierTable::new(&[(75.0, 10.0), (50.0, 7.0), (25.0, 4.0)], 2.0),

            revenue_growth: TierTable::new(&[(20.0, 6.0), (10.0, 4.0), (5.0, 2.0)], 0.0),
            revenue_decline_points: -3.0,
            fcf_growth: TierTable::new(&[(40.0, 6.0), (15.0, 4.0), (5.0, 2.0)], 0.0),
            fcf_decline_points: -5.0,
            growth_rank: TierTable::new(&[(75.0, 4.0), (50.0, 3.0), (25.0, 2.0)], 1.0),

            margin: TierTable::new(&[(18.0, 9.0), (12.0, 7.0), (8.0, 5.0), (4.0, 3.0)], 1.0),
            margin_rank: TierTable::new(&[(75.0, 6.0), (50.0, 4.0), (25.0, 3.0)], 2.0),

            net_debt_to_fcf: TierTable::new(&[(3.0, -8.0), (1.5, -4.0)], 0.0),
            net_debt_missing_points: -2.0,
            net_debt_flag_at: 3.0,
            negative_headlines_7d: TierTable::new(&[(6.0, -8.0), (3.0, -5.0), (1.0, -2.0)], 0.0),
            shock_7d: TierTable::new(&[(-10.0, -4.0), (-6.0, -2.0)], 0.0),
            core_tags_30d: TierTable::new(&[(6.0, -4.0), (3.0, -2.0)], 0.0),
            core_tags_flag_at: 6.0,
            negative_news_flag_at: 3,
            proxy_penalty: TierTable::new(&[(25.0, -4.0), (35.0, -2.0)], 0.0),
            proxy_bonus_at: 70.0,
            proxy_bonus_points: 1.0,

            buy_at: 80,
            hold_at: 65,
            stale_score_cap: 45,
        }
    }
}

impl ScoringThresholds {
    /// Load overrides from a JSON file; absent fields keep their defaults.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ValuationError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text)
            .map_err(|e| ValuationError::InvalidData(format!("{}: {}", path.display(), e)))
    }

    /// `SCORING_THRESHOLDS_PATH` when set, otherwise the defaults.
    pub fn from_env() -> Result<Self, ValuationError> {
        match std::env::var("SCORING_THRESHOLDS_PATH") {
            Ok(path) if !path.trim().is_empty() => Self::from_path(path.trim()),
            _ => Ok(Self::default()),
        }
    }
}

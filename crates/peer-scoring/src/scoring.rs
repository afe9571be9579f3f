use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use valuation_core::{normalize_ticker, ComparableRow, ComparableUniverse};

use crate::news::NewsSignal;
use crate::thresholds::ScoringThresholds;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Rating {
    Buy,
    Hold,
    Avoid,
}

impl fmt::Display for Rating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rating::Buy => write!(f, "BUY"),
            Rating::Hold => write!(f, "HOLD"),
            Rating::Avoid => write!(f, "AVOID"),
        }
    }
}

/// Composite peer-relative score for one ticker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub ticker: String,
    pub score: u8,
    pub rating: Rating,
    pub bucket_scores: BTreeMap<String, f64>,
    pub peer_ranks: BTreeMap<String, Option<f64>>,
    pub red_flags: Vec<String>,
}

pub const CASH_LEVEL: &str = "cash_level";
pub const VALUATION: &str = "valuation";
pub const GROWTH: &str = "growth";
pub const QUALITY: &str = "quality";
pub const BALANCE_RISK: &str = "balance_risk";

/// Percentile of `value` within `series`: share of the series at or below it, times 100.
///
/// With `higher_is_better == false` the rank is flipped. `None` when either input is empty.
pub fn percentile_rank(value: Option<f64>, series: &[f64], higher_is_better: bool) -> Option<f64> {
    let value = value.filter(|v| v.is_finite())?;
    if series.is_empty() {
        return None;
    }
    let at_or_below = series.iter().filter(|s| **s <= value).count();
    let rank = 100.0 * at_or_below as f64 / series.len() as f64;
    Some(if higher_is_better { rank } else { 100.0 - rank })
}

fn fcf_yield(r: &ComparableRow) -> Option<f64> {
    r.fcf_yield
}

fn revenue_yoy(r: &ComparableRow) -> Option<f64> {
    r.revenue_ttm_yoy_pct
}

fn fcf_yoy(r: &ComparableRow) -> Option<f64> {
    r.fcf_ttm_yoy_pct
}

fn fcf_margin(r: &ComparableRow) -> Option<f64> {
    r.fcf_margin_ttm_pct
}

type Column = fn(&ComparableRow) -> Option<f64>;

/// Ranked metrics: rank key, column, higher-is-better.
const RANKED: [(&str, Column, bool); 4] = [
    ("fcf_yield_pct_rank", fcf_yield, true),
    ("revenue_ttm_yoy_pct_rank", revenue_yoy, true),
    ("fcf_ttm_yoy_pct_rank", fcf_yoy, true),
    ("fcf_margin_ttm_pct_rank", fcf_margin, true),
];

/// Peer-relative scoring over a comparable universe.
pub struct PeerScoringEngine {
    thresholds: ScoringThresholds,
}

impl PeerScoringEngine {
    pub fn new(thresholds: ScoringThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &ScoringThresholds {
        &self.thresholds
    }

    fn peer_ranks(&self, universe: &ComparableUniverse, row: &ComparableRow) -> BTreeMap<String, Option<f64>> {
        RANKED
            .iter()
            .map(|(key, column, higher_is_better)| {
                let series = universe.peer_values(*column);
                (key.to_string(), percentile_rank(column(row), &series, *higher_is_better))
            })
            .collect()
    }

    fn cash_level(&self, row: &ComparableRow, red_flags: &mut Vec<String>) -> f64 {
        let t = &self.thresholds;
        match row.fcf_ttm {
            Some(fcf) => {
                if t.cash_fcf.below_all(fcf) {
                    red_flags.push("Low TTM FCF".to_string());
                }
                t.cash_fcf.at_least(fcf).clamp(0.0, 25.0)
            }
            None => {
                red_flags.push("TTM FCF missing".to_string());
                0.0
            }
        }
    }

    fn valuation(&self, row: &ComparableRow, rank: Option<f64>, red_flags: &mut Vec<String>) -> f64 {
        let t = &self.thresholds;
        let mut points = 0.0;
        match row.fcf_yield {
            Some(y) => points += t.fcf_yield.at_least(y),
            None => red_flags.push("FCF yield missing".to_string()),
        }
        if let Some(rank) = rank {
            points += t.fcf_yield_rank.at_least(rank);
        }
        points.clamp(0.0, 20.0)
    }

    fn growth(
        &self,
        row: &ComparableRow,
        revenue_rank: Option<f64>,
        fcf_rank: Option<f64>,
        red_flags: &mut Vec<String>,
    ) -> f64 {
        let t = &self.thresholds;
        let mut points = 0.0;

        if let Some(g) = row.revenue_ttm_yoy_pct {
            if g < 0.0 {
                points += t.revenue_decline_points;
                red_flags.push("TTM revenue declining YoY".to_string());
            } else {
                points += t.revenue_growth.at_least(g);
            }
        }
        if let Some(g) = row.fcf_ttm_yoy_pct {
            if g < 0.0 {
                points += t.fcf_decline_points;
                red_flags.push("TTM FCF declining YoY".to_string());
            } else {
                points += t.fcf_growth.at_least(g);
            }
        }
        for rank in [revenue_rank, fcf_rank].into_iter().flatten() {
            points += t.growth_rank.at_least(rank);
        }
        points.clamp(0.0, 20.0)
    }

    fn quality(&self, row: &ComparableRow, rank: Option<f64>) -> f64 {
        let t = &self.thresholds;
        let mut points = 0.0;
        if let Some(m) = row.fcf_margin_ttm_pct {
            points += t.margin.at_least(m);
        }
        if let Some(rank) = rank {
            points += t.margin_rank.at_least(rank);
        }
        points.clamp(0.0, 15.0)
    }

    fn balance_risk(&self, row: &ComparableRow, news: &NewsSignal, red_flags: &mut Vec<String>) -> f64 {
        let t = &self.thresholds;
        let mut points = 20.0;

        match row.net_debt_to_fcf_ttm {
            Some(ratio) => {
                points += t.net_debt_to_fcf.at_least(ratio);
                if ratio >= t.net_debt_flag_at {
                    red_flags.push("Net debt high vs TTM FCF".to_string());
                }
            }
            None => points += t.net_debt_missing_points,
        }

        points += t.negative_headlines_7d.at_least(news.neg_7d as f64);
        points += t.shock_7d.at_most(news.shock_7d as f64);

        let core_hits = news.core_tag_hits() as f64;
        points += t.core_tags_30d.at_least(core_hits);
        if core_hits >= t.core_tags_flag_at {
            red_flags.push("Frequent LABOR/INSURANCE/REGULATORY negatives (30d)".to_string());
        }

        if let Some(proxy) = news.proxy_score_7d {
            if proxy >= t.proxy_bonus_at {
                points += t.proxy_bonus_points;
            } else {
                points += t.proxy_penalty.at_most(proxy);
            }
        }
        points.clamp(0.0, 20.0)
    }

    fn rating(&self, score: u8) -> Rating {
        if score >= self.thresholds.buy_at {
            Rating::Buy
        } else if score >= self.thresholds.hold_at {
            Rating::Hold
        } else {
            Rating::Avoid
        }
    }

    /// Score `focus` against the other rows of `universe`.
    ///
    /// Pure and deterministic. A focus ticker missing from the universe is scored
    /// as an all-null row; with no peers every rank is `None` and only the
    /// absolute tiers contribute.
    pub fn score(&self, universe: &ComparableUniverse, focus: &str, news: &NewsSignal) -> ScoreResult {
        let ticker = normalize_ticker(focus);
        let rebased;
        let universe = if universe.focus() == ticker {
            universe
        } else {
            rebased = ComparableUniverse::from_rows(&ticker, universe.rows().to_vec());
            &rebased
        };
        let row = universe
            .get(&ticker)
            .cloned()
            .unwrap_or_else(|| ComparableRow::empty(&ticker));

        let peer_ranks = self.peer_ranks(universe, &row);
        let rank = |key: &str| peer_ranks.get(key).copied().flatten();

        let mut red_flags = Vec::new();
        let mut bucket_scores = BTreeMap::new();
        bucket_scores.insert(CASH_LEVEL.to_string(), self.cash_level(&row, &mut red_flags));
        bucket_scores.insert(
            VALUATION.to_string(),
            self.valuation(&row, rank("fcf_yield_pct_rank"), &mut red_flags),
        );
        bucket_scores.insert(
            GROWTH.to_string(),
            self.growth(
                &row,
                rank("revenue_ttm_yoy_pct_rank"),
                rank("fcf_ttm_yoy_pct_rank"),
                &mut red_flags,
            ),
        );
        bucket_scores.insert(QUALITY.to_string(), self.quality(&row, rank("fcf_margin_ttm_pct_rank")));
        bucket_scores.insert(BALANCE_RISK.to_string(), self.balance_risk(&row, news, &mut red_flags));

        if news.neg_7d >= self.thresholds.negative_news_flag_at {
            red_flags.push(format!(
                "News: {} negative headlines in last 7d (shock {})",
                news.neg_7d, news.shock_7d
            ));
        }

        let total: f64 = bucket_scores.values().sum();
        let score = total.clamp(0.0, 100.0).round() as u8;
        let rating = self.rating(score);

        tracing::debug!("{} scored {} ({}), {} red flags", ticker, score, rating, red_flags.len());

        ScoreResult {
            ticker,
            score,
            rating,
            bucket_scores,
            peer_ranks,
            red_flags,
        }
    }
}

impl Default for PeerScoringEngine {
    fn default() -> Self {
        Self::new(ScoringThresholds::default())
    }
}

/// Cap a score whose inputs failed the freshness SLA.
///
/// `stale` names the datasets that breached it; an empty list leaves the result untouched.
pub fn apply_freshness_gate(result: &mut ScoreResult, stale: &[&str], thresholds: &ScoringThresholds) {
    if stale.is_empty() {
        return;
    }
    result.score = result.score.min(thresholds.stale_score_cap);
    result.rating = Rating::Avoid;
    result.red_flags.push(format!(
        "Data freshness SLA failed ({}); score capped at {}",
        stale.join(", "),
        thresholds.stale_score_cap
    ));
}

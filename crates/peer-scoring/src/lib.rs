//! Peer-relative scoring: percentile ranks against the comparable universe,
//! five clamped buckets, a composite score and explainable red flags.

pub mod news;
pub mod scoring;
pub mod thresholds;

pub use news::{score_headline, summarize_news, HeadlineScore, NewsSignal, RiskTag};
pub use scoring::{apply_freshness_gate, percentile_rank, PeerScoringEngine, Rating, ScoreResult};
pub use thresholds::{ScoringThresholds, Tier, TierTable};

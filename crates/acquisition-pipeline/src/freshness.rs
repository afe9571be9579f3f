use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use valuation_core::{normalize_ticker, ComparableUniverse, NewsArticle, Quote};

/// Maximum acceptable age, in days, per dataset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FreshnessSla {
    pub fundamentals_days: f64,
    pub news_days: f64,
    pub quotes_days: f64,
}

impl Default for FreshnessSla {
    fn default() -> Self {
        Self {
            fundamentals_days: 140.0,
            news_days: 3.0,
            quotes_days: 2.0,
        }
    }
}

impl FreshnessSla {
    pub fn from_env() -> Self {
        let read = |key: &str, default: f64| {
            std::env::var(key)
                .ok()
                .and_then(|v| v.trim().parse::<f64>().ok())
                .unwrap_or(default)
        };
        let d = Self::default();
        Self {
            fundamentals_days: read("FRESHNESS_SLA_FUND_DAYS", d.fundamentals_days),
            news_days: read("FRESHNESS_SLA_NEWS_DAYS", d.news_days),
            quotes_days: read("FRESHNESS_SLA_QUOTE_DAYS", d.quotes_days),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerDataset<T> {
    pub fundamentals: T,
    pub news: T,
    pub quotes: T,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreshnessReport {
    pub passed: bool,
    pub sla_days: PerDataset<f64>,
    /// `None` when the dataset has nothing for the focus ticker
    pub ages_days: PerDataset<Option<f64>>,
    pub checks: PerDataset<bool>,
}

fn age_days(then: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    ((now - then).num_seconds() as f64 / 86_400.0).max(0.0)
}

/// Ages of the focus ticker's fundamentals period end, quote and newest headline versus the SLA.
///
/// A dataset with no age (nothing for the focus ticker) fails its check.
pub fn evaluate_freshness(
    sla: &FreshnessSla,
    universe: &ComparableUniverse,
    quotes: &[Quote],
    news: &[NewsArticle],
    now: DateTime<Utc>,
) -> FreshnessReport {
    let focus = universe.focus().to_string();

    let fundamentals = universe
        .focus_row()
        .and_then(|r| r.period_end)
        .map(|d| age_days(d.and_time(NaiveTime::MIN).and_utc(), now));
    let quote_age = quotes
        .iter()
        .filter(|q| normalize_ticker(&q.ticker) == focus)
        .map(|q| q.as_of)
        .max()
        .map(|t| age_days(t, now));
    let news_age = news
        .iter()
        .filter(|a| normalize_ticker(&a.ticker) == focus)
        .map(|a| a.published_at)
        .max()
        .map(|t| age_days(t, now));

    let within = |age: Option<f64>, limit: f64| age.map(|a| a <= limit).unwrap_or(false);
    let checks = PerDataset {
        fundamentals: within(fundamentals, sla.fundamentals_days),
        news: within(news_age, sla.news_days),
        quotes: within(quote_age, sla.quotes_days),
    };

    FreshnessReport {
        passed: checks.fundamentals && checks.news && checks.quotes,
        sla_days: PerDataset {
            fundamentals: sla.fundamentals_days,
            news: sla.news_days,
            quotes: sla.quotes_days,
        },
        ages_days: PerDataset {
            fundamentals,
            news: news_age,
            quotes: quote_age,
        },
        checks,
    }
}

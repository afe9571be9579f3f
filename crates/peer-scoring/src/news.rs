use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use valuation_core::{normalize_ticker, NewsArticle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskTag {
    Labor,
    Insurance,
    Regulatory,
    Safety,
    Competition,
}

impl RiskTag {
    pub const ALL: [RiskTag; 5] = [
        RiskTag::Labor,
        RiskTag::Insurance,
        RiskTag::Regulatory,
        RiskTag::Safety,
        RiskTag::Competition,
    ];

    /// Tags whose negative headlines weigh on balance risk directly.
    pub const CORE: [RiskTag; 3] = [RiskTag::Labor, RiskTag::Insurance, RiskTag::Regulatory];

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskTag::Labor => "LABOR",
            RiskTag::Insurance => "INSURANCE",
            RiskTag::Regulatory => "REGULATORY",
            RiskTag::Safety => "SAFETY",
            RiskTag::Competition => "COMPETITION",
        }
    }

    /// Word prefixes that mark a headline with this tag.
    fn keywords(&self) -> &'static [&'static str] {
        match self {
            RiskTag::Labor => &["strike", "union", "uaw", "layoff", "walkout", "workforce", "labor", "labour"],
            RiskTag::Insurance => &["insur", "premium", "underwrit", "claims"],
            RiskTag::Regulatory => &["recall", "probe", "investigat", "lawsuit", "regulat", "antitrust", "fined", "penalt", "nhtsa", "subpoena"],
            RiskTag::Safety => &["crash", "fire", "injur", "fatal", "defect", "safety"],
            RiskTag::Competition => &["rival", "competit", "undercut", "pricewar"],
        }
    }
}

impl fmt::Display for RiskTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Word prefixes with their polarity weight.
const NEGATIVE_WORDS: &[(&str, i32)] = &[
    ("recall", 2),
    ("lawsuit", 2),
    ("probe", 2),
    ("investigat", 2),
    ("strike", 2),
    ("layoff", 2),
    ("downgrad", 2),
    ("plunge", 2),
    ("bankrupt", 3),
    ("fraud", 3),
    ("crash", 2),
    ("fatal", 3),
    ("misse", 1),
    ("cut", 1),
    ("fall", 1),
    ("drop", 1),
    ("slump", 1),
    ("weak", 1),
    ("loss", 1),
    ("warn", 1),
    ("delay", 1),
    ("fined", 1),
    ("halt", 1),
    ("decline", 1),
];

const POSITIVE_WORDS: &[(&str, i32)] = &[
    ("beat", 2),
    ("upgrad", 2),
    ("record", 2),
    ("surge", 2),
    ("soar", 2),
    ("rais", 1),
    ("gain", 1),
    ("strong", 1),
    ("growth", 1),
    ("wins", 1),
    ("rally", 1),
    ("expand", 1),
    ("profit", 1),
    ("buyback", 1),
];

fn words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

fn weight(words: &[String], lexicon: &[(&str, i32)]) -> i32 {
    words
        .iter()
        .filter_map(|w| {
            lexicon
                .iter()
                .find(|(kw, _)| w.starts_with(kw))
                .map(|(_, weight)| *weight)
        })
        .sum()
}

/// Keyword reading of one headline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeadlineScore {
    /// -3 (strongly negative) ..= +3
    pub impact: i32,
    pub tags: Vec<RiskTag>,
}

/// Score a headline (title plus optional summary) by keyword polarity and risk tags.
pub fn score_headline(title: &str, summary: Option<&str>) -> HeadlineScore {
    let mut text = title.to_string();
    if let Some(s) = summary {
        text.push(' ');
        text.push_str(s);
    }
    let words = words(&text);
    let impact = (weight(&words, POSITIVE_WORDS) - weight(&words, NEGATIVE_WORDS)).clamp(-3, 3);
    let tags = RiskTag::ALL
        .into_iter()
        .filter(|tag| {
            words
                .iter()
                .any(|w| tag.keywords().iter().any(|kw| w.starts_with(kw)))
        })
        .collect();
    HeadlineScore { impact, tags }
}

/// News risk inputs for the balance-risk bucket.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewsSignal {
    /// Negative headlines in the last 7 days
    pub neg_7d: u32,
    /// Sum of negative impacts in the last 7 days (zero or below)
    pub shock_7d: i32,
    /// Negative headlines per risk tag in the last 30 days
    pub tag_counts_30d: BTreeMap<RiskTag, u32>,
    /// 0..=100 sentiment proxy over the last 7 days; `None` with no recent headlines
    pub proxy_score_7d: Option<f64>,
    pub headlines_7d: u32,
    pub headlines_30d: u32,
}

impl NewsSignal {
    pub fn core_tag_hits(&self) -> u32 {
        RiskTag::CORE
            .iter()
            .map(|t| self.tag_counts_30d.get(t).copied().unwrap_or(0))
            .sum()
    }
}

/// Summarize the focus ticker's headlines relative to `now`.
pub fn summarize_news(articles: &[NewsArticle], focus: &str, now: DateTime<Utc>) -> NewsSignal {
    let focus = normalize_ticker(focus);
    let week_ago = now - Duration::days(7);
    let month_ago = now - Duration::days(30);

    let mut signal = NewsSignal::default();
    let mut impacts_7d: Vec<i32> = Vec::new();

    for article in articles
        .iter()
        .filter(|a| normalize_ticker(&a.ticker) == focus)
        .filter(|a| a.published_at >= month_ago && a.published_at <= now)
    {
        let scored = score_headline(&article.title, article.summary.as_deref());
        signal.headlines_30d += 1;
        if scored.impact < 0 {
            for tag in &scored.tags {
                *signal.tag_counts_30d.entry(*tag).or_insert(0) += 1;
            }
        }
        if article.published_at >= week_ago {
            signal.headlines_7d += 1;
            impacts_7d.push(scored.impact);
            if scored.impact < 0 {
                signal.neg_7d += 1;
                signal.shock_7d += scored.impact;
            }
        }
    }

    if !impacts_7d.is_empty() {
        let mean = impacts_7d.iter().sum::<i32>() as f64 / impacts_7d.len() as f64;
        signal.proxy_score_7d = Some((50.0 + mean / 3.0 * 50.0).clamp(0.0, 100.0));
    }
    signal
}

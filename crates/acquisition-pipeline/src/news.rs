use chrono::Utc;
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;
use valuation_core::{normalize_ticker, DataSource, NewsArticle};

use crate::cache::Dataset;
use crate::pipeline::{Acquired, AcquisitionPipeline};

/// Drop duplicate articles (same URL, or same title when the URL is empty) and sort newest first.
pub fn dedupe_articles(articles: Vec<NewsArticle>) -> Vec<NewsArticle> {
    let mut seen = HashSet::new();
    let mut out: Vec<NewsArticle> = articles
        .into_iter()
        .filter(|a| {
            let key = if a.url.is_empty() {
                a.title.trim().to_lowercase()
            } else {
                a.url.clone()
            };
            seen.insert(key)
        })
        .collect();
    out.sort_by(|a, b| b.published_at.cmp(&a.published_at));
    out
}

/// Replace `ticker`'s articles in the cached news table with `fresh`; other tickers are kept.
pub fn merge_news(cached: Vec<NewsArticle>, ticker: &str, fresh: &[NewsArticle]) -> Vec<NewsArticle> {
    let ticker = normalize_ticker(ticker);
    let mut merged: Vec<NewsArticle> = cached
        .into_iter()
        .filter(|a| normalize_ticker(&a.ticker) != ticker)
        .collect();
    merged.extend(fresh.iter().cloned());
    merged.sort_by(|a, b| {
        a.ticker
            .cmp(&b.ticker)
            .then_with(|| b.published_at.cmp(&a.published_at))
    });
    merged
}

fn for_ticker(articles: Vec<NewsArticle>, ticker: &str) -> Vec<NewsArticle> {
    dedupe_articles(
        articles
            .into_iter()
            .filter(|a| normalize_ticker(&a.ticker) == ticker)
            .collect(),
    )
}

impl AcquisitionPipeline {
    /// Recent news for one ticker: adapters in order, then the cached news table,
    /// then its last-good copy, then nothing.
    ///
    /// The news table holds every ticker; a live pull replaces only its own ticker's
    /// rows. Never fails; an empty result carries a warning.
    pub async fn acquire_news(&self, ticker: &str, cancel: &CancellationToken) -> Acquired<Vec<NewsArticle>> {
        let ticker = normalize_ticker(ticker);
        let mut warnings = Vec::new();

        for adapter in &self.news_adapters {
            if cancel.is_cancelled() {
                break;
            }
            match adapter
                .fetch_news(&ticker, self.config.news_days_back, cancel)
                .await
            {
                Ok(articles) if !articles.is_empty() => {
                    let articles = dedupe_articles(articles);
                    tracing::info!("News: {} articles for {} from {}", articles.len(), ticker, adapter.name());
                    self.persist_news(&ticker, &articles, &mut warnings);
                    return Acquired {
                        data: articles,
                        source: DataSource::Live(adapter.name().to_string()),
                        warnings,
                    };
                }
                Ok(_) => warnings.push(format!("{} returned no news for {}.", adapter.name(), ticker)),
                Err(e) => {
                    tracing::warn!("News fetch failed for {} via {}: {}", ticker, adapter.name(), e);
                    warnings.push(format!("News fetch failed for {} via {}: {}", ticker, adapter.name(), e));
                }
            }
        }

        for (source, label, table) in [
            (
                DataSource::RawCache,
                "cached news",
                self.cache.read_json::<Vec<NewsArticle>>(Dataset::News),
            ),
            (
                DataSource::LastGood,
                "last_good cache",
                self.cache.read_latest_json::<Vec<NewsArticle>>(Dataset::News),
            ),
        ] {
            match table {
                Ok(Some(cached)) => {
                    let articles = for_ticker(cached, &ticker);
                    if !articles.is_empty() {
                        warnings.push(format!(
                            "News for {} restored from {} ({} articles).",
                            ticker,
                            label,
                            articles.len()
                        ));
                        return Acquired {
                            data: articles,
                            source,
                            warnings,
                        };
                    }
                }
                Ok(None) => {}
                Err(e) => warnings.push(format!("News cache unreadable ({}): {}", label, e)),
            }
        }

        warnings.push(format!("No news available for {}; news risk inputs are empty.", ticker));
        Acquired {
            data: Vec::new(),
            source: DataSource::Unavailable,
            warnings,
        }
    }

    /// Merge this ticker's articles into the news table, then snapshot it to last-good.
    fn persist_news(&self, ticker: &str, articles: &[NewsArticle], warnings: &mut Vec<String>) {
        let cached = match self.cache.read_json::<Vec<NewsArticle>>(Dataset::News) {
            Ok(rows) => rows.unwrap_or_default(),
            Err(e) => {
                warnings.push(format!("Cached news table unreadable; rewriting: {}", e));
                Vec::new()
            }
        };
        let merged = merge_news(cached, ticker, articles);
        if let Err(e) = self.cache.write_json(Dataset::News, &merged) {
            warnings.push(format!("Failed to write news cache: {}", e));
            return;
        }
        if let Err(e) = self
            .cache
            .snapshot_last_good(Dataset::News, Utc::now().date_naive())
        {
            warnings.push(format!("Failed to snapshot last_good news: {}", e));
        }
    }
}

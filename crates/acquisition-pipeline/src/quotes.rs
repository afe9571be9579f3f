use chrono::Utc;
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;
use valuation_core::{normalize_ticker, DataSource, Quote, ValuationError};

use crate::cache::Dataset;
use crate::pipeline::{Acquired, AcquisitionPipeline};

/// Keep the first quote per universe ticker, in universe order.
fn align_to_universe(quotes: Vec<Quote>, universe: &[String]) -> Vec<Quote> {
    let mut seen = HashSet::new();
    let mut by_ticker: Vec<Quote> = Vec::new();
    for mut q in quotes {
        q.ticker = normalize_ticker(&q.ticker);
        if seen.insert(q.ticker.clone()) {
            by_ticker.push(q);
        }
    }
    universe
        .iter()
        .filter_map(|t| by_ticker.iter().find(|q| &q.ticker == t).cloned())
        .collect()
}

impl AcquisitionPipeline {
    /// Latest quotes for the universe.
    ///
    /// Adapters are tried in priority order and the first non-empty result wins;
    /// tickers it missed are hydrated from the raw cache and then the last-good
    /// copy. With no live data the raw cache, then the last-good copy, stand in.
    pub async fn acquire_quotes(
        &self,
        universe: &[String],
        cancel: &CancellationToken,
    ) -> Result<Acquired<Vec<Quote>>, ValuationError> {
        self.acquire_quotes_with_live(universe, cancel)
            .await
            .map(|(acquired, _)| acquired)
    }

    /// [`Self::acquire_quotes`] plus the rows the winning adapter served before hydration.
    pub(crate) async fn acquire_quotes_with_live(
        &self,
        universe: &[String],
        cancel: &CancellationToken,
    ) -> Result<(Acquired<Vec<Quote>>, Vec<Quote>), ValuationError> {
        let universe: Vec<String> = universe.iter().map(|t| normalize_ticker(t)).collect();
        let mut warnings = Vec::new();

        if self.quote_adapters.is_empty() {
            warnings.push("No quote providers configured.".to_string());
        }

        for (i, adapter) in self.quote_adapters.iter().enumerate() {
            if cancel.is_cancelled() {
                warnings.push("Quote pull skipped: run cancelled.".to_string());
                break;
            }
            match adapter.fetch_quotes(&universe, cancel).await {
                Ok(quotes) => {
                    let quotes = align_to_universe(quotes, &universe);
                    if quotes.is_empty() {
                        warnings.push(format!("{} quote pull returned no rows.", adapter.name()));
                        continue;
                    }
                    if i > 0 {
                        warnings.push(format!("Quote pull recovered via {} fallback.", adapter.name()));
                    }
                    tracing::info!("Quotes: {}/{} tickers from {}", quotes.len(), universe.len(), adapter.name());
                    let live = quotes.clone();
                    let quotes = self.hydrate_quotes(quotes, &universe, &mut warnings);
                    self.persist_quotes(&quotes, &universe, &mut warnings);
                    let acquired = Acquired {
                        data: quotes,
                        source: DataSource::Live(adapter.name().to_string()),
                        warnings,
                    };
                    return Ok((acquired, live));
                }
                Err(e) => {
                    tracing::warn!("{} quote pull failed: {}", adapter.name(), e);
                    if i == 0 {
                        warnings.push(format!("Primary quote pull failed: {}", e));
                    } else {
                        warnings.push(format!("{} quote fallback failed: {}", adapter.name(), e));
                    }
                }
            }
        }

        for (source, rows) in [
            (DataSource::RawCache, self.cache.read_csv::<Quote>(Dataset::QuotesRaw)),
            (DataSource::LastGood, self.cache.read_latest_csv::<Quote>(Dataset::QuotesRaw)),
        ] {
            match rows {
                Ok(rows) => {
                    let quotes = align_to_universe(rows, &universe);
                    if !quotes.is_empty() {
                        warnings.push(format!(
                            "All quote providers failed; using {} quotes for {}/{} tickers.",
                            source,
                            quotes.len(),
                            universe.len()
                        ));
                        let acquired = Acquired {
                            data: quotes,
                            source,
                            warnings,
                        };
                        return Ok((acquired, Vec::new()));
                    }
                }
                Err(e) => warnings.push(format!("Quote cache unreadable: {}", e)),
            }
        }

        warnings.push("Quote fallback unavailable; price/market cap may be missing.".to_string());
        Err(ValuationError::AcquisitionExhausted {
            dataset: "quotes".to_string(),
            subject: universe.join(","),
            warnings,
        })
    }

    /// Fill tickers a live pull missed from the raw cache, then the last-good copy.
    fn hydrate_quotes(&self, mut quotes: Vec<Quote>, universe: &[String], warnings: &mut Vec<String>) -> Vec<Quote> {
        let missing: Vec<&String> = universe
            .iter()
            .filter(|t| !quotes.iter().any(|q| &q.ticker == *t))
            .collect();
        if missing.is_empty() {
            return quotes;
        }

        let mut cached = self.cache.read_csv::<Quote>(Dataset::QuotesRaw).unwrap_or_default();
        cached.extend(self.cache.read_latest_csv::<Quote>(Dataset::QuotesRaw).unwrap_or_default());

        let mut hydrated = Vec::new();
        for ticker in missing {
            if let Some(q) = cached.iter().find(|q| normalize_ticker(&q.ticker) == *ticker) {
                quotes.push(Quote {
                    ticker: ticker.clone(),
                    ..q.clone()
                });
                hydrated.push(ticker.clone());
            }
        }
        if !hydrated.is_empty() {
            warnings.push(format!(
                "Quote hydration from cache completed for: {}.",
                hydrated.join(",")
            ));
        }
        align_to_universe(quotes, universe)
    }

    fn persist_quotes(&self, quotes: &[Quote], universe: &[String], warnings: &mut Vec<String>) {
        if let Err(e) = self.cache.write_csv(Dataset::QuotesRaw, quotes) {
            warnings.push(format!("Failed to write quote cache: {}", e));
            return;
        }
        if quotes.len() == universe.len() {
            if let Err(e) = self
                .cache
                .snapshot_last_good(Dataset::QuotesRaw, Utc::now().date_naive())
            {
                warnings.push(format!("Failed to snapshot last_good quotes: {}", e));
            }
        }
    }
}

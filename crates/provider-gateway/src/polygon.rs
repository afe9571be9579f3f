use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use valuation_core::{normalize_ticker, ProviderError, Quote, QuoteAdapter};

use crate::gateway::ResilientGateway;
use crate::transport::ProviderRequest;

const BASE_URL: &str = "https://api.polygon.io";
pub const PROVIDER: &str = "polygon";

/// Polygon (a.k.a. Massive) secondary quote source.
///
/// Price comes from the ticker snapshot (today's close, then last trade, then
/// previous day close), falling back to the previous-close aggregate when the
/// snapshot is sparse. Market cap comes from ticker reference data.
#[derive(Clone)]
pub struct PolygonClient {
    api_key: String,
    gateway: Arc<ResilientGateway>,
    base_url: String,
}

impl PolygonClient {
    pub fn new(api_key: String, gateway: Arc<ResilientGateway>) -> Self {
        Self {
            api_key,
            gateway,
            base_url: BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn request(&self, path: &str) -> ProviderRequest {
        ProviderRequest::get(format!("{}{}", self.base_url, path))
            .query("apiKey", &self.api_key)
            .max_retries(2)
    }

    async fn snapshot_price(
        &self,
        ticker: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<f64>, ProviderError> {
        let path = format!("/v2/snapshot/locale/us/markets/stocks/tickers/{}", ticker);
        let response = self.gateway.call(PROVIDER, &self.request(&path), cancel).await?;
        let snap: SnapshotResponse = response.json()?;
        let Some(t) = snap.ticker else {
            return Ok(None);
        };
        Ok(t.day
            .and_then(|d| d.c)
            .or_else(|| t.last_trade.and_then(|l| l.p))
            .or_else(|| t.prev_day.and_then(|d| d.c)))
    }

    async fn previous_close(
        &self,
        ticker: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<f64>, ProviderError> {
        let path = format!("/v2/aggs/ticker/{}/prev", ticker);
        let response = self.gateway.call(PROVIDER, &self.request(&path), cancel).await?;
        let prev: PrevCloseResponse = response.json()?;
        Ok(prev.results.into_iter().next().and_then(|r| r.c))
    }

    async fn market_cap(
        &self,
        ticker: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<f64>, ProviderError> {
        let path = format!("/v3/reference/tickers/{}", ticker);
        let response = self.gateway.call(PROVIDER, &self.request(&path), cancel).await?;
        let details: TickerDetailsResponse = response.json()?;
        Ok(details.results.and_then(|r| r.market_cap))
    }

    /// Price and market cap for one ticker; each part fails independently.
    async fn quote_one(
        &self,
        ticker: &str,
        cancel: &CancellationToken,
    ) -> (Option<f64>, Option<f64>, Option<ProviderError>) {
        let mut last_err = None;

        let mut price = match self.snapshot_price(ticker, cancel).await {
            Ok(p) => p,
            Err(e) => {
                last_err = Some(e);
                None
            }
        };
        if price.is_none() {
            match self.previous_close(ticker, cancel).await {
                Ok(p) => price = p,
                Err(e) => last_err = Some(e),
            }
        }
        let market_cap = match self.market_cap(ticker, cancel).await {
            Ok(m) => m,
            Err(e) => {
                last_err = Some(e);
                None
            }
        };

        (price, market_cap, last_err)
    }
}

#[async_trait]
impl QuoteAdapter for PolygonClient {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn fetch_quotes(
        &self,
        tickers: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<Quote>, ProviderError> {
        let mut quotes = Vec::new();
        let mut last_err = None;

        for ticker in tickers.iter().map(|t| normalize_ticker(t)) {
            if ticker.is_empty() {
                continue;
            }
            if cancel.is_cancelled() {
                return Err(ProviderError::Cancelled);
            }
            let (price, market_cap, err) = self.quote_one(&ticker, cancel).await;
            if let Some(e) = err {
                tracing::debug!("Polygon quote for {} partially failed: {}", ticker, e);
                last_err = Some(e);
            }
            if price.is_some() || market_cap.is_some() {
                quotes.push(Quote {
                    ticker,
                    price,
                    market_cap,
                    as_of: Utc::now(),
                    provider: PROVIDER.to_string(),
                });
            }
        }

        match (quotes.is_empty(), last_err) {
            (true, Some(e)) => Err(e),
            _ => Ok(quotes),
        }
    }
}

// Snapshot types
#[derive(Debug, Deserialize)]
struct SnapshotResponse {
    ticker: Option<SnapshotTicker>,
}

#[derive(Debug, Deserialize)]
struct SnapshotTicker {
    day: Option<SnapshotDay>,
    #[serde(rename = "lastTrade")]
    last_trade: Option<SnapshotLastTrade>,
    #[serde(rename = "prevDay")]
    prev_day: Option<SnapshotDay>,
}

#[derive(Debug, Deserialize)]
struct SnapshotDay {
    c: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct SnapshotLastTrade {
    p: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct PrevCloseResponse {
    #[serde(default)]
    results: Vec<PrevCloseBar>,
}

#[derive(Debug, Deserialize)]
struct PrevCloseBar {
    c: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct TickerDetailsResponse {
    results: Option<TickerDetails>,
}

#[derive(Debug, Deserialize)]
struct TickerDetails {
    market_cap: Option<f64>,
}

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use valuation_core::{normalize_ticker, ProviderError, Quote, QuoteAdapter};

use crate::gateway::ResilientGateway;
use crate::transport::ProviderRequest;

const QUOTE_URL: &str = "https://query1.finance.yahoo.com/v7/finance/quote";
pub const PROVIDER: &str = "yahoo";

/// Keyless public quote endpoint, last in the quote priority order.
#[derive(Clone)]
pub struct YahooClient {
    gateway: Arc<ResilientGateway>,
    url: String,
}

impl YahooClient {
    pub fn new(gateway: Arc<ResilientGateway>) -> Self {
        Self {
            gateway,
            url: QUOTE_URL.to_string(),
        }
    }

    pub fn with_url(mut self, url: &str) -> Self {
        self.url = url.to_string();
        self
    }
}

#[async_trait]
impl QuoteAdapter for YahooClient {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn fetch_quotes(
        &self,
        tickers: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<Quote>, ProviderError> {
        let symbols: Vec<String> = tickers
            .iter()
            .map(|t| normalize_ticker(t))
            .filter(|t| !t.is_empty())
            .collect();
        if symbols.is_empty() {
            return Ok(Vec::new());
        }

        let request = ProviderRequest::get(&self.url)
            .query("symbols", symbols.join(","))
            .header("User-Agent", "Mozilla/5.0")
            .max_retries(1);
        let response = self.gateway.call(PROVIDER, &request, cancel).await?;
        let parsed: YahooQuoteResponse = response.json()?;

        let as_of = Utc::now();
        Ok(parsed
            .quote_response
            .result
            .into_iter()
            .filter_map(|q| {
                let ticker = normalize_ticker(q.symbol.as_deref()?);
                if ticker.is_empty() {
                    return None;
                }
                Some(Quote {
                    ticker,
                    price: q.regular_market_price,
                    market_cap: q.market_cap,
                    as_of,
                    provider: PROVIDER.to_string(),
                })
            })
            .collect())
    }
}

#[derive(Debug, Deserialize)]
struct YahooQuoteResponse {
    #[serde(rename = "quoteResponse")]
    quote_response: YahooQuoteBody,
}

#[derive(Debug, Deserialize)]
struct YahooQuoteBody {
    #[serde(default)]
    result: Vec<YahooQuote>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct YahooQuote {
    symbol: Option<String>,
    regular_market_price: Option<f64>,
    market_cap: Option<f64>,
}

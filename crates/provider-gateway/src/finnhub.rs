use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use valuation_core::{normalize_ticker, NewsAdapter, NewsArticle, ProviderError};

use crate::gateway::ResilientGateway;
use crate::transport::ProviderRequest;

const BASE_URL: &str = "https://finnhub.io/api/v1";
pub const PROVIDER: &str = "finnhub";
const MAX_ITEMS: usize = 200;

/// Finnhub company news (per-article endpoint, works on free keys).
#[derive(Clone)]
pub struct FinnhubClient {
    api_key: String,
    gateway: Arc<ResilientGateway>,
    base_url: String,
}

impl FinnhubClient {
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
}

#[async_trait]
impl NewsAdapter for FinnhubClient {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn fetch_news(
        &self,
        ticker: &str,
        days_back: i64,
        cancel: &CancellationToken,
    ) -> Result<Vec<NewsArticle>, ProviderError> {
        let ticker = normalize_ticker(ticker);
        let end = Utc::now().date_naive();
        let start = end - Duration::days(days_back.max(0));

        let request = ProviderRequest::get(format!("{}/company-news", self.base_url))
            .query("symbol", &ticker)
            .query("from", start.to_string())
            .query("to", end.to_string())
            .query("token", &self.api_key)
            .max_retries(2);
        let response = self.gateway.call(PROVIDER, &request, cancel).await?;

        // A non-list payload (error object) means no articles
        let items: Vec<FinnhubArticle> = match response.json::<serde_json::Value>()? {
            serde_json::Value::Array(_) => response.json()?,
            _ => return Ok(Vec::new()),
        };

        Ok(items
            .into_iter()
            .take(MAX_ITEMS)
            .filter_map(|a| {
                // Undated articles are dropped; they would pass the freshness check as new
                let published_at = a
                    .datetime
                    .filter(|ts| *ts > 0)
                    .and_then(|ts| DateTime::from_timestamp(ts, 0))?;
                Some(NewsArticle {
                    ticker: ticker.clone(),
                    published_at,
                    title: a.headline.unwrap_or_default(),
                    summary: a.summary.filter(|s| !s.is_empty()),
                    source: PROVIDER.to_string(),
                    url: a.url.unwrap_or_default(),
                })
            })
            .collect())
    }
}

#[derive(Debug, Deserialize)]
struct FinnhubArticle {
    datetime: Option<i64>,
    headline: Option<String>,
    summary: Option<String>,
    url: Option<String>,
}

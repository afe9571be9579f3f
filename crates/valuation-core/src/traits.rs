use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{BalanceQuarter, CashFlowQuarter, IncomeQuarter, NewsArticle, ProviderError, Quote};

/// Quote source (price + market cap) for a batch of tickers.
///
/// Implementations map provider payloads into [`Quote`] and provider failures into
/// [`ProviderError`]. They never retry; retries belong to the gateway.
#[async_trait]
pub trait QuoteAdapter: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch_quotes(
        &self,
        tickers: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<Quote>, ProviderError>;
}

/// Quarterly statement source for the TTM build
#[async_trait]
pub trait FundamentalsAdapter: Send + Sync {
    fn name(&self) -> &str;

    async fn income_statements(
        &self,
        ticker: &str,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<IncomeQuarter>, ProviderError>;

    async fn cash_flow_statements(
        &self,
        ticker: &str,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<CashFlowQuarter>, ProviderError>;

    async fn balance_sheets(
        &self,
        ticker: &str,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<BalanceQuarter>, ProviderError>;
}

/// Company news source
#[async_trait]
pub trait NewsAdapter: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch_news(
        &self,
        ticker: &str,
        days_back: i64,
        cancel: &CancellationToken,
    ) -> Result<Vec<NewsArticle>, ProviderError>;
}

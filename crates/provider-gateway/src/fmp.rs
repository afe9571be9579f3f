use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use valuation_core::{
    normalize_ticker, BalanceQuarter, CashFlowQuarter, FundamentalsAdapter, IncomeQuarter,
    ProviderError, Quote, QuoteAdapter,
};

use crate::gateway::ResilientGateway;
use crate::transport::ProviderRequest;

const BASE_URL: &str = "https://financialmodelingprep.com/stable";
pub const PROVIDER: &str = "fmp";

/// Financial Modeling Prep: primary quotes and quarterly statements.
#[derive(Clone)]
pub struct FmpClient {
    api_key: String,
    gateway: Arc<ResilientGateway>,
    base_url: String,
}

impl FmpClient {
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
        ProviderRequest::get(format!("{}/{}", self.base_url, path)).query("apikey", &self.api_key)
    }

    async fn statements<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        ticker: &str,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<T>, ProviderError> {
        let request = self
            .request(path)
            .query("symbol", normalize_ticker(ticker))
            .query("period", "quarter")
            .query("limit", limit.to_string());
        let response = self.gateway.call(PROVIDER, &request, cancel).await?;
        response.json()
    }
}

#[async_trait]
impl QuoteAdapter for FmpClient {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn fetch_quotes(
        &self,
        tickers: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<Quote>, ProviderError> {
        let symbols: Vec<String> = tickers.iter().map(|t| normalize_ticker(t)).collect();
        let request = self.request("batch-quote").query("symbols", symbols.join(","));
        let response = self.gateway.call(PROVIDER, &request, cancel).await?;
        let rows: Vec<FmpQuote> = response.json()?;

        let as_of = Utc::now();
        Ok(rows
            .into_iter()
            .filter(|r| !r.symbol.trim().is_empty())
            .map(|r| Quote {
                ticker: normalize_ticker(&r.symbol),
                price: r.price,
                market_cap: r.market_cap,
                as_of,
                provider: PROVIDER.to_string(),
            })
            .collect())
    }
}

#[async_trait]
impl FundamentalsAdapter for FmpClient {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn income_statements(
        &self,
        ticker: &str,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<IncomeQuarter>, ProviderError> {
        let rows: Vec<FmpIncome> = self
            .statements("income-statement", ticker, limit, cancel)
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| IncomeQuarter {
                period_end: r.date,
                revenue: r.revenue,
            })
            .collect())
    }

    async fn cash_flow_statements(
        &self,
        ticker: &str,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<CashFlowQuarter>, ProviderError> {
        let rows: Vec<FmpCashFlow> = self
            .statements("cash-flow-statement", ticker, limit, cancel)
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| CashFlowQuarter {
                period_end: r.date,
                operating_cash_flow: r.operating_cash_flow,
                capital_expenditure: r.capital_expenditure,
            })
            .collect())
    }

    async fn balance_sheets(
        &self,
        ticker: &str,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<BalanceQuarter>, ProviderError> {
        let rows: Vec<FmpBalance> = self
            .statements("balance-sheet-statement", ticker, limit, cancel)
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| BalanceQuarter {
                period_end: r.date,
                cash: r.cash_and_cash_equivalents,
                total_debt: r.total_debt,
            })
            .collect())
    }
}

// Response structures
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FmpQuote {
    symbol: String,
    price: Option<f64>,
    market_cap: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct FmpIncome {
    date: NaiveDate,
    revenue: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FmpCashFlow {
    date: NaiveDate,
    operating_cash_flow: Option<f64>,
    capital_expenditure: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FmpBalance {
    date: NaiveDate,
    cash_and_cash_equivalents: Option<f64>,
    total_debt: Option<f64>,
}

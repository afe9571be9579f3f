use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Latest quote for one ticker as returned by a quote adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub ticker: String,
    pub price: Option<f64>,
    pub market_cap: Option<f64>,
    pub as_of: DateTime<Utc>,
    /// Name of the adapter that produced the quote
    pub provider: String,
}

/// Quarterly income statement (only the fields the TTM build needs)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomeQuarter {
    pub period_end: NaiveDate,
    pub revenue: Option<f64>,
}

/// Quarterly cash-flow statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CashFlowQuarter {
    pub period_end: NaiveDate,
    pub operating_cash_flow: Option<f64>,
    /// Raw capital expenditure as reported (providers disagree on sign)
    pub capital_expenditure: Option<f64>,
}

/// Quarterly balance sheet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceQuarter {
    pub period_end: NaiveDate,
    pub cash: Option<f64>,
    pub total_debt: Option<f64>,
}

/// One row of a ticker's trailing-twelve-month series.
///
/// Also the row type of the cached universe-level TTM table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TtmRecord {
    pub ticker: String,
    pub period_end: NaiveDate,
    pub revenue_ttm: Option<f64>,
    pub fcf_ttm: Option<f64>,
    pub fcf_margin_ttm_pct: Option<f64>,
    pub revenue_ttm_yoy_pct: Option<f64>,
    pub fcf_ttm_yoy_pct: Option<f64>,
    pub cash: Option<f64>,
    pub debt: Option<f64>,
}

/// One ticker's merged market + TTM snapshot.
///
/// Every column is always present; a field that could not be sourced is `None`
/// and serializes as an empty cell, never as a missing column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparableRow {
    pub ticker: String,
    pub price: Option<f64>,
    pub market_cap: Option<f64>,
    pub period_end: Option<NaiveDate>,
    pub revenue_ttm: Option<f64>,
    pub revenue_ttm_yoy_pct: Option<f64>,
    pub fcf_ttm: Option<f64>,
    pub fcf_ttm_yoy_pct: Option<f64>,
    pub fcf_margin_ttm_pct: Option<f64>,
    pub cash: Option<f64>,
    pub debt: Option<f64>,
    pub net_debt: Option<f64>,
    pub fcf_yield: Option<f64>,
    pub net_debt_to_fcf_ttm: Option<f64>,
}

impl ComparableRow {
    /// Row with identity only and every other column null.
    pub fn empty(ticker: &str) -> Self {
        Self {
            ticker: normalize_ticker(ticker),
            price: None,
            market_cap: None,
            period_end: None,
            revenue_ttm: None,
            revenue_ttm_yoy_pct: None,
            fcf_ttm: None,
            fcf_ttm_yoy_pct: None,
            fcf_margin_ttm_pct: None,
            cash: None,
            debt: None,
            net_debt: None,
            fcf_yield: None,
            net_debt_to_fcf_ttm: None,
        }
    }
}

/// Ordered set of comparable rows, unique by ticker, with a designated focus ticker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparableUniverse {
    focus: String,
    rows: Vec<ComparableRow>,
}

impl ComparableUniverse {
    pub fn new(focus: &str) -> Self {
        Self {
            focus: normalize_ticker(focus),
            rows: Vec::new(),
        }
    }

    /// Build from rows; later duplicates of a ticker are dropped.
    pub fn from_rows(focus: &str, rows: impl IntoIterator<Item = ComparableRow>) -> Self {
        let mut universe = Self::new(focus);
        for row in rows {
            universe.insert(row);
        }
        universe
    }

    /// Insert a row unless the ticker is already present. Returns whether it was inserted.
    pub fn insert(&mut self, mut row: ComparableRow) -> bool {
        row.ticker = normalize_ticker(&row.ticker);
        if self.contains(&row.ticker) {
            return false;
        }
        self.rows.push(row);
        true
    }

    pub fn contains(&self, ticker: &str) -> bool {
        self.get(ticker).is_some()
    }

    pub fn get(&self, ticker: &str) -> Option<&ComparableRow> {
        let ticker = normalize_ticker(ticker);
        self.rows.iter().find(|r| r.ticker == ticker)
    }

    pub fn focus(&self) -> &str {
        &self.focus
    }

    pub fn focus_row(&self) -> Option<&ComparableRow> {
        self.get(&self.focus)
    }

    /// Every row except the focus, in universe order.
    pub fn peer_rows(&self) -> impl Iterator<Item = &ComparableRow> {
        self.rows.iter().filter(move |r| r.ticker != self.focus)
    }

    /// Non-null peer values of one column.
    pub fn peer_values(&self, column: fn(&ComparableRow) -> Option<f64>) -> Vec<f64> {
        self.peer_rows()
            .filter_map(column)
            .filter(|v| v.is_finite())
            .collect()
    }

    pub fn rows(&self) -> &[ComparableRow] {
        &self.rows
    }

    pub fn tickers(&self) -> Vec<String> {
        self.rows.iter().map(|r| r.ticker.clone()).collect()
    }

    /// Reorder rows to follow `order`; tickers not in `order` keep their relative order at the end.
    pub fn sort_by_universe(&mut self, order: &[String]) {
        let position = |t: &str| {
            order
                .iter()
                .position(|o| normalize_ticker(o) == t)
                .unwrap_or(usize::MAX)
        };
        self.rows.sort_by_key(|r| position(&r.ticker));
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn into_rows(self) -> Vec<ComparableRow> {
        self.rows
    }
}

/// News article normalized across news providers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsArticle {
    pub ticker: String,
    pub published_at: DateTime<Utc>,
    pub title: String,
    #[serde(default)]
    pub summary: Option<String>,
    pub source: String,
    pub url: String,
}

/// Where a dataset ended up coming from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    /// Fresh data from the named adapter
    Live(String),
    /// Raw on-disk copy of the last live pull
    RawCache,
    /// Last-known-good "latest" pointer copy
    LastGood,
    /// Universe-level cached table (TTM fundamentals, comps snapshot)
    CachedTable,
    /// Synthesized minimal record
    Bootstrap,
    Unavailable,
}

impl DataSource {
    pub fn is_live(&self) -> bool {
        matches!(self, DataSource::Live(_))
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSource::Live(provider) => write!(f, "{}", provider),
            DataSource::RawCache => write!(f, "raw_cache"),
            DataSource::LastGood => write!(f, "last_good"),
            DataSource::CachedTable => write!(f, "cached_table"),
            DataSource::Bootstrap => write!(f, "bootstrap"),
            DataSource::Unavailable => write!(f, "unavailable"),
        }
    }
}

/// Upper-case and trim a ticker symbol.
pub fn normalize_ticker(ticker: &str) -> String {
    ticker.trim().to_uppercase()
}

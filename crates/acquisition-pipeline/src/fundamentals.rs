use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};
use tokio_util::sync::CancellationToken;
use valuation_core::{
    normalize_ticker, BalanceQuarter, CashFlowQuarter, DataSource, FundamentalsAdapter,
    IncomeQuarter, ProviderError, TtmRecord, ValuationError,
};

use crate::cache::Dataset;
use crate::pipeline::{Acquired, AcquisitionPipeline};

/// One joined quarter, oldest-first when used for rolling sums.
#[derive(Debug, Clone, PartialEq)]
struct Quarter {
    period_end: NaiveDate,
    revenue: Option<f64>,
    free_cash_flow: Option<f64>,
    cash: Option<f64>,
    debt: Option<f64>,
}

/// Inner-join the three statement series on `period_end` and derive FCF.
///
/// Capex is taken as absolute spend because providers disagree on its sign.
fn join_quarters(
    income: &[IncomeQuarter],
    cash_flow: &[CashFlowQuarter],
    balance: &[BalanceQuarter],
) -> Vec<Quarter> {
    let cash_flow: HashMap<NaiveDate, &CashFlowQuarter> =
        cash_flow.iter().map(|c| (c.period_end, c)).collect();
    let balance: HashMap<NaiveDate, &BalanceQuarter> =
        balance.iter().map(|b| (b.period_end, b)).collect();

    let mut joined: BTreeMap<NaiveDate, Quarter> = BTreeMap::new();
    for inc in income {
        let (Some(cf), Some(bal)) = (cash_flow.get(&inc.period_end), balance.get(&inc.period_end)) else {
            continue;
        };
        let capex_spend = cf.capital_expenditure.map(f64::abs);
        let free_cash_flow = match (cf.operating_cash_flow, capex_spend) {
            (Some(ocf), Some(capex)) => Some(ocf - capex),
            _ => None,
        };
        joined.entry(inc.period_end).or_insert(Quarter {
            period_end: inc.period_end,
            revenue: inc.revenue,
            free_cash_flow,
            cash: bal.cash,
            debt: bal.total_debt,
        });
    }
    joined.into_values().collect()
}

/// Sum of the 4 quarters ending at `i`; null unless all four are present.
fn rolling_sum(values: &[Option<f64>], i: usize) -> Option<f64> {
    if i < 3 {
        return None;
    }
    values[i - 3..=i].iter().copied().sum::<Option<f64>>()
}

fn pct_change(current: Option<f64>, previous: Option<f64>) -> Option<f64> {
    match (current, previous) {
        (Some(c), Some(p)) if p != 0.0 => Some((c - p) / p * 100.0),
        _ => None,
    }
}

/// Build the TTM series (newest first) from quarterly statements.
///
/// TTM values are rolling 4-quarter sums; YoY compares against the TTM four
/// quarters earlier; margin is `fcf_ttm / revenue_ttm * 100`.
pub fn build_ttm(
    ticker: &str,
    income: &[IncomeQuarter],
    cash_flow: &[CashFlowQuarter],
    balance: &[BalanceQuarter],
) -> Vec<TtmRecord> {
    let quarters = join_quarters(income, cash_flow, balance);
    let revenue: Vec<Option<f64>> = quarters.iter().map(|q| q.revenue).collect();
    let fcf: Vec<Option<f64>> = quarters.iter().map(|q| q.free_cash_flow).collect();

    let revenue_ttm: Vec<Option<f64>> = (0..quarters.len()).map(|i| rolling_sum(&revenue, i)).collect();
    let fcf_ttm: Vec<Option<f64>> = (0..quarters.len()).map(|i| rolling_sum(&fcf, i)).collect();

    let ticker = normalize_ticker(ticker);
    let mut out: Vec<TtmRecord> = quarters
        .iter()
        .enumerate()
        .map(|(i, q)| {
            let prior = |series: &[Option<f64>]| if i >= 4 { series[i - 4] } else { None };
            let fcf_margin_ttm_pct = match (fcf_ttm[i], revenue_ttm[i]) {
                (Some(f), Some(r)) if r != 0.0 => Some(f / r * 100.0),
                _ => None,
            };
            TtmRecord {
                ticker: ticker.clone(),
                period_end: q.period_end,
                revenue_ttm: revenue_ttm[i],
                fcf_ttm: fcf_ttm[i],
                fcf_margin_ttm_pct,
                revenue_ttm_yoy_pct: pct_change(revenue_ttm[i], prior(&revenue_ttm)),
                fcf_ttm_yoy_pct: pct_change(fcf_ttm[i], prior(&fcf_ttm)),
                cash: q.cash,
                debt: q.debt,
            }
        })
        .collect();
    out.reverse();
    out
}

/// Replace each freshly fetched ticker's rows in the cached universe table; other
/// tickers keep their cached rows. Output is sorted by ticker, newest period first.
pub fn merge_ttm_table(cached: Vec<TtmRecord>, fresh: &BTreeMap<String, Vec<TtmRecord>>) -> Vec<TtmRecord> {
    let mut merged: Vec<TtmRecord> = cached
        .into_iter()
        .filter(|r| !fresh.contains_key(&normalize_ticker(&r.ticker)))
        .collect();
    for rows in fresh.values() {
        merged.extend(rows.iter().cloned());
    }
    merged.sort_by(|a, b| a.ticker.cmp(&b.ticker).then(b.period_end.cmp(&a.period_end)));
    merged
}

/// Cached rows for one ticker, newest period first.
fn cached_series(table: &[TtmRecord], ticker: &str) -> Vec<TtmRecord> {
    let mut rows: Vec<TtmRecord> = table
        .iter()
        .filter(|r| normalize_ticker(&r.ticker) == ticker)
        .cloned()
        .collect();
    rows.sort_by(|a, b| b.period_end.cmp(&a.period_end));
    rows
}

async fn fetch_series(
    adapter: &dyn FundamentalsAdapter,
    ticker: &str,
    limit: usize,
    cancel: &CancellationToken,
) -> Result<Vec<TtmRecord>, ProviderError> {
    let (income, cash_flow, balance) = tokio::try_join!(
        adapter.income_statements(ticker, limit, cancel),
        adapter.cash_flow_statements(ticker, limit, cancel),
        adapter.balance_sheets(ticker, limit, cancel),
    )?;
    if income.is_empty() || cash_flow.is_empty() || balance.is_empty() {
        return Err(ProviderError::Malformed(format!(
            "Quarterly endpoint returned empty for {}",
            ticker
        )));
    }
    let series = build_ttm(ticker, &income, &cash_flow, &balance);
    if series.is_empty() {
        return Err(ProviderError::Malformed(format!(
            "No overlapping quarterly periods for {}",
            ticker
        )));
    }
    Ok(series)
}

impl AcquisitionPipeline {
    /// TTM series (newest first) for one ticker.
    ///
    /// Cascade: fundamentals adapters in order, then the cached universe TTM table,
    /// then its last-good copy. Fails only when every tier is empty.
    pub async fn acquire_fundamentals(
        &self,
        ticker: &str,
        cancel: &CancellationToken,
    ) -> Result<Acquired<Vec<TtmRecord>>, ValuationError> {
        let ticker = normalize_ticker(ticker);
        let mut warnings = Vec::new();

        for adapter in &self.fundamentals_adapters {
            if cancel.is_cancelled() {
                warnings.push(format!(
                    "Fundamentals refresh for {} skipped: run cancelled",
                    ticker
                ));
                break;
            }
            match fetch_series(adapter.as_ref(), &ticker, self.config.quarters_limit, cancel).await {
                Ok(series) => {
                    tracing::info!(
                        "{}: {} TTM periods from {}",
                        ticker,
                        series.len(),
                        adapter.name()
                    );
                    return Ok(Acquired {
                        data: series,
                        source: DataSource::Live(adapter.name().to_string()),
                        warnings,
                    });
                }
                Err(e) => {
                    tracing::warn!("Fundamentals refresh failed for {} via {}: {}", ticker, adapter.name(), e);
                    warnings.push(format!("Fundamentals refresh failed for {}: {}", ticker, e));
                }
            }
        }
        if self.fundamentals_adapters.is_empty() {
            warnings.push(format!("No fundamentals provider configured for {}", ticker));
        }

        let tiers = [
            (DataSource::CachedTable, self.cache.read_csv::<TtmRecord>(Dataset::FundamentalsTtm)),
            (DataSource::LastGood, self.cache.read_latest_csv::<TtmRecord>(Dataset::FundamentalsTtm)),
        ];
        for (source, table) in tiers {
            match table {
                Ok(table) => {
                    let series = cached_series(&table, &ticker);
                    if !series.is_empty() {
                        warnings.push(format!(
                            "Fundamentals for {} recovered from cached TTM snapshot.",
                            ticker
                        ));
                        return Ok(Acquired {
                            data: series,
                            source,
                            warnings,
                        });
                    }
                }
                Err(e) => warnings.push(format!("Cached TTM table unreadable: {}", e)),
            }
        }

        warnings.push(format!("No cached TTM fundamentals for {}.", ticker));
        Err(ValuationError::AcquisitionExhausted {
            dataset: "fundamentals".to_string(),
            subject: ticker,
            warnings,
        })
    }
}

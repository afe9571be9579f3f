use valuation_core::{normalize_ticker, ComparableRow, ComparableUniverse, Quote, TtmRecord};

/// Merge one ticker's latest TTM record with its quote and derive the ratio columns.
pub fn comparable_row(ticker: &str, ttm: Option<&TtmRecord>, quote: Option<&Quote>) -> ComparableRow {
    let price = quote.and_then(|q| q.price).filter(|v| v.is_finite());
    let market_cap = quote.and_then(|q| q.market_cap).filter(|v| v.is_finite());

    let mut row = ComparableRow {
        price,
        market_cap,
        ..ComparableRow::empty(ticker)
    };
    let Some(ttm) = ttm else {
        return row;
    };

    row.period_end = Some(ttm.period_end);
    row.revenue_ttm = ttm.revenue_ttm;
    row.revenue_ttm_yoy_pct = ttm.revenue_ttm_yoy_pct;
    row.fcf_ttm = ttm.fcf_ttm;
    row.fcf_ttm_yoy_pct = ttm.fcf_ttm_yoy_pct;
    row.fcf_margin_ttm_pct = ttm.fcf_margin_ttm_pct;
    row.cash = ttm.cash;
    row.debt = ttm.debt;

    row.net_debt = match (ttm.debt, ttm.cash) {
        (Some(debt), Some(cash)) => Some(debt - cash),
        _ => None,
    };
    row.fcf_yield = match (ttm.fcf_ttm, market_cap) {
        (Some(fcf), Some(mcap)) if mcap > 0.0 => Some(fcf / mcap),
        _ => None,
    };
    row.net_debt_to_fcf_ttm = match (row.net_debt, ttm.fcf_ttm) {
        (Some(nd), Some(fcf)) if fcf > 0.0 => Some(nd / fcf),
        _ => None,
    };
    row
}

/// Rows for every ticker that has a TTM record, in the given order.
pub fn build_comps_rows(latest: &[(String, TtmRecord)], quotes: &[Quote]) -> Vec<ComparableRow> {
    latest
        .iter()
        .map(|(ticker, ttm)| {
            let quote = quotes.iter().find(|q| normalize_ticker(&q.ticker) == *ticker);
            comparable_row(ticker, Some(ttm), quote)
        })
        .collect()
}

/// Ensure the focus ticker has a row, synthesizing one from its quote if needed.
///
/// Returns true when a bootstrap row was inserted.
pub fn bootstrap_focus(universe: &mut ComparableUniverse, quotes: &[Quote], warnings: &mut Vec<String>) -> bool {
    let focus = universe.focus().to_string();
    if universe.contains(&focus) {
        return false;
    }
    let quote = quotes.iter().find(|q| normalize_ticker(&q.ticker) == focus);
    let row = comparable_row(&focus, None, quote);
    let detail = if row.price.is_some() {
        "with live quote fields."
    } else {
        "with null fundamentals."
    };
    warnings.push(format!(
        "Primary ticker {} was missing from comps snapshot; inserted bootstrap row {}",
        focus, detail
    ));
    universe.insert(row);
    true
}

/// Backfill missing peers from the last-good comps snapshot.
///
/// Returns the tickers that were restored.
pub fn hydrate_peers(
    universe: &mut ComparableUniverse,
    wanted: &[String],
    last_good: &[ComparableRow],
    warnings: &mut Vec<String>,
) -> Vec<String> {
    let mut restored: Vec<String> = Vec::new();
    for ticker in wanted {
        if universe.contains(ticker) {
            continue;
        }
        if let Some(row) = last_good
            .iter()
            .find(|r| normalize_ticker(&r.ticker) == normalize_ticker(ticker))
        {
            if universe.insert(row.clone()) {
                restored.push(normalize_ticker(ticker));
            }
        }
    }
    if !restored.is_empty() {
        restored.sort();
        warnings.push(format!(
            "Restored missing peer comps from last_good cache: {}.",
            restored.join(",")
        ));
    }
    restored
}

/// Last resort for peers absent from every tier: a null row carrying any quote fields.
pub fn bootstrap_peers(
    universe: &mut ComparableUniverse,
    wanted: &[String],
    quotes: &[Quote],
    warnings: &mut Vec<String>,
) -> Vec<String> {
    let mut inserted = Vec::new();
    for ticker in wanted {
        let ticker = normalize_ticker(ticker);
        if universe.contains(&ticker) {
            continue;
        }
        let quote = quotes.iter().find(|q| normalize_ticker(&q.ticker) == ticker);
        universe.insert(comparable_row(&ticker, None, quote));
        warnings.push(format!(
            "Peer {} missing from comps snapshot and last_good cache; inserted null row.",
            ticker
        ));
        inserted.push(ticker);
    }
    inserted
}

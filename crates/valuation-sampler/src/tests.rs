use super::*;
use proptest::prelude::*;
use valuation_core::{ComparableRow, ValuationError};

fn config(samples: usize, seed: u64) -> SamplerConfig {
    SamplerConfig {
        samples,
        seed,
        ..SamplerConfig::default()
    }
}

#[test]
fn test_cone_scenario_is_centered_and_reproducible() {
    let cone = ValuationCone::new(80.0, 100.0, 135.0);
    let prices = PriceContext {
        snapshot_price: Some(100.0),
        live_price: None,
    };
    let a = simulate(&cone, &prices, &config(20_000, 7)).unwrap();
    let b = simulate(&cone, &prices, &config(20_000, 7)).unwrap();

    assert_eq!(a, b);
    assert!((a.summary.p50 - 100.0).abs() <= 5.0, "p50 = {}", a.summary.p50);
    assert!(a.summary.p10 < a.summary.p50 && a.summary.p50 < a.summary.p90);
    assert!(a.summary.p10 >= 80.0 && a.summary.p90 <= 135.0);
    // Triangular mean is (80 + 100 + 135) / 3
    assert!((a.summary.mean - 105.0).abs() < 0.5);
    assert_eq!(a.n_requested, 20_000);
    assert_eq!(a.n_used, 20_000);
    assert!(!a.fallback_used);
    assert_eq!(a.confidence, ConfidenceGrade::High);

    // P(X >= 120) = 15^2 / (55 * 35)
    let up = a.summary.prob_up_20pct.unwrap();
    assert!((up - 225.0 / 1925.0).abs() < 0.01, "prob_up = {}", up);
    assert!(a.summary.prob_down_20pct.unwrap() < 0.001);
}

#[test]
fn test_different_seed_changes_draws() {
    let cone = ValuationCone::new(80.0, 100.0, 135.0);
    let a = simulate(&cone, &PriceContext::default(), &config(5_000, 7)).unwrap();
    let b = simulate(&cone, &PriceContext::default(), &config(5_000, 8)).unwrap();
    assert_ne!(a.summary.mean, b.summary.mean);
}

#[test]
fn test_no_price_means_no_tail_probabilities() {
    let cone = ValuationCone::new(80.0, 100.0, 135.0);
    let result = simulate(&cone, &PriceContext::default(), &config(1_000, 7)).unwrap();
    assert_eq!(result.summary.prob_down_20pct, None);
    assert_eq!(result.summary.prob_up_20pct, None);
    assert!(result.inputs["price_used"].is_null());
}

#[test]
fn test_incomplete_cone_anchors_on_snapshot_price() {
    let cone = ValuationCone {
        bear: Some(70.0),
        base: None,
        bull: Some(150.0),
    };
    let prices = PriceContext {
        snapshot_price: Some(50.0),
        live_price: Some(55.0),
    };
    let result = simulate(&cone, &prices, &config(2_000, 7)).unwrap();

    assert!(result.fallback_used);
    assert_eq!(result.fallback_reason.as_deref(), Some("comps_snapshot"));
    assert_eq!(result.confidence, ConfidenceGrade::Medium);
    assert_eq!(result.inputs["bear"], 40.0);
    assert_eq!(result.inputs["bull"], 67.5);
    assert!(result.summary.prob_up_20pct.is_some());
}

#[test]
fn test_anchor_tiers() {
    let live_only = PriceContext {
        snapshot_price: Some(0.0),
        live_price: Some(42.0),
    };
    let anchor = resolve_anchor(&live_only, 100.0);
    assert_eq!(anchor.source, AnchorSource::FmpLiveQuote);
    assert_eq!(anchor.price, 42.0);
    assert_eq!(anchor.confidence(), ConfidenceGrade::Medium);

    let none = resolve_anchor(&PriceContext::default(), 100.0);
    assert_eq!(none.source, AnchorSource::DefaultAnchor);
    assert_eq!(none.confidence(), ConfidenceGrade::Low);
}

#[test]
fn test_default_anchor_is_low_confidence_without_tails() {
    let result = simulate(&ValuationCone::default(), &PriceContext::default(), &config(1_000, 7)).unwrap();
    assert_eq!(result.fallback_reason.as_deref(), Some("default_anchor"));
    assert_eq!(result.confidence, ConfidenceGrade::Low);
    assert_eq!(result.summary.prob_down_20pct, None);
    assert_eq!(result.inputs["base"], 100.0);
}

#[test]
fn test_zero_samples_is_invalid() {
    let cone = ValuationCone::new(80.0, 100.0, 135.0);
    assert!(matches!(
        simulate(&cone, &PriceContext::default(), &config(0, 7)),
        Err(ValuationError::InvalidSampleSet(_))
    ));
}

#[test]
fn test_degenerate_cone_collapses_to_a_point() {
    let cone = ValuationCone::new(100.0, 100.0, 100.0);
    let result = simulate(&cone, &PriceContext::default(), &config(500, 7)).unwrap();
    assert_eq!(result.summary.p10, 100.0);
    assert_eq!(result.summary.p90, 100.0);
    assert_eq!(result.summary.stdev, 0.0);
}

#[test]
fn test_percentile_index_rounding() {
    let sorted: Vec<f64> = (0..11).map(|v| v as f64).collect();
    assert_eq!(percentile(&sorted, 0.10), 1.0);
    assert_eq!(percentile(&sorted, 0.50), 5.0);
    assert_eq!(percentile(&sorted, 1.0), 10.0);
    assert_eq!(percentile(&[3.0], 0.9), 3.0);
    assert!(percentile(&[], 0.5).is_nan());
}

fn healthy_row() -> ComparableRow {
    ComparableRow {
        price: Some(50.0),
        market_cap: Some(5.0e10),
        fcf_ttm: Some(5.0e9),
        net_debt: Some(1.0e10),
        ..ComparableRow::empty("GM")
    }
}

#[test]
fn test_dcf_cone_orders_scenarios() {
    let cone = build_dcf_cone(&healthy_row(), &ConeAssumptions::default()).unwrap();
    let (bear, base, bull) = cone.complete().unwrap();
    assert!(bear < base && base < bull);
    assert!(bear > 0.0);

    let mut no_fcf = healthy_row();
    no_fcf.fcf_ttm = Some(-1.0e9);
    assert_eq!(build_dcf_cone(&no_fcf, &ConeAssumptions::default()), None);

    let mut no_mcap = healthy_row();
    no_mcap.market_cap = None;
    assert_eq!(build_dcf_cone(&no_mcap, &ConeAssumptions::default()), None);
}

#[test]
fn test_dcf_simulation_reproducible_and_positive() {
    let inputs = DcfInputs::from_row(&healthy_row()).unwrap();
    assert_eq!(inputs.shares, 1.0e9);

    let a = simulate_dcf(&inputs, &DcfAssumptions::default(), 5_000, 7).unwrap();
    let b = simulate_dcf(&inputs, &DcfAssumptions::default(), 5_000, 7).unwrap();
    assert_eq!(a, b);
    assert_eq!(a.method, "two_stage_dcf");
    assert!(a.n_used <= a.n_requested);
    assert!(a.summary.p10 > 0.0);
    assert!(a.summary.prob_down_20pct.is_some());
    assert_eq!(a.inputs["years_stage1"], 5);
}

#[test]
fn test_dcf_discards_non_positive_values() {
    // Net debt dwarfs any plausible enterprise value
    let inputs = DcfInputs {
        price: 10.0,
        fcf_ttm: 1.0e6,
        shares: 1.0e6,
        net_debt: 1.0e12,
    };
    assert!(matches!(
        simulate_dcf(&inputs, &DcfAssumptions::default(), 1_000, 7),
        Err(ValuationError::InvalidSampleSet(_))
    ));
}

#[test]
fn test_dcf_discards_collapsed_spread() {
    // Discount pinned to terminal growth: every r - g is zero
    let assumptions = DcfAssumptions {
        discount_rate: Tri::new(0.04, 0.04, 0.04),
        terminal_growth: Tri::new(0.04, 0.04, 0.04),
        ..DcfAssumptions::default()
    };
    let inputs = DcfInputs::from_row(&healthy_row()).unwrap();
    assert!(matches!(
        simulate_dcf(&inputs, &assumptions, 1_000, 7),
        Err(ValuationError::InvalidSampleSet(_))
    ));
}

#[test]
fn test_result_serializes_flat() {
    let cone = ValuationCone::new(80.0, 100.0, 135.0);
    let result = simulate(&cone, &PriceContext::default(), &config(100, 7)).unwrap();
    let json = serde_json::to_value(&result).unwrap();
    assert!(json["p50"].is_number());
    assert_eq!(json["confidence"], "HIGH");
    assert!(json["prob_up_20pct"].is_null());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_same_seed_same_output(
        bear in 1.0f64..100.0,
        spread_down in 0.0f64..50.0,
        spread_up in 0.0f64..80.0,
        n in 1usize..10_000,
        seed in any::<u64>(),
    ) {
        let cone = ValuationCone::new(bear, bear + spread_down, bear + spread_down + spread_up);
        let prices = PriceContext { snapshot_price: Some(bear + spread_down), live_price: None };
        let a = simulate(&cone, &prices, &config(n, seed)).unwrap();
        let b = simulate(&cone, &prices, &config(n, seed)).unwrap();
        prop_assert_eq!(&a, &b);
        prop_assert_eq!(a.n_used, n);
        prop_assert!(a.summary.p10 <= a.summary.p50 && a.summary.p50 <= a.summary.p90);
        prop_assert!(a.summary.p10 >= bear - 1e-9);
    }
}

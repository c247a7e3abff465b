use proptest::prelude::*;
use rust_decimal::Decimal;
use statement_analyzer::{
    compare_rows, compute_ratios, normalize, percentage_change, ConceptKey, FinancialPeriodModel,
    Metric,
};

fn amount() -> impl Strategy<Value = Decimal> {
    (-2_000_000_000i64..2_000_000_000i64, 0u32..3).prop_map(|(units, scale)| Decimal::new(units, scale))
}

fn period_model() -> impl Strategy<Value = FinancialPeriodModel> {
    proptest::collection::vec(amount(), 15).prop_map(|values| {
        let mut model = FinancialPeriodModel {
            period: "P".to_string(),
            ..FinancialPeriodModel::default()
        };
        for (key, value) in ConceptKey::ALL.into_iter().zip(values) {
            model.set(key, value);
        }
        model
    })
}

proptest! {
    #[test]
    fn rows_derive_variation_and_change(current in period_model(), previous in period_model()) {
        let rows = compare_rows(&current, Some(&previous)).unwrap();
        prop_assert_eq!(rows.len(), 15);

        for (row, key) in rows.iter().zip(ConceptKey::ALL) {
            prop_assert_eq!(row.key(), Some(key));
            prop_assert_eq!(row.variation, row.current - row.previous);

            let expected = if row.previous.is_zero() {
                Decimal::ZERO
            } else {
                (row.variation / row.previous.abs() * Decimal::ONE_HUNDRED)
                    .round_dp_with_strategy(1, rust_decimal::RoundingStrategy::MidpointAwayFromZero)
            };
            prop_assert_eq!(row.percentage_change, Metric::Value(expected));
        }
    }

    #[test]
    fn ratios_are_deterministic(current in period_model(), previous in period_model()) {
        let first = compute_ratios(&current, Some(&previous)).unwrap();
        let second = compute_ratios(&current, Some(&previous)).unwrap();
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(first.net_margin, first.operating_margin);
        prop_assert!(first.gross_margin_change.is_some());
    }

    #[test]
    fn single_period_rows_compare_against_zero(current in period_model()) {
        for row in compare_rows(&current, None).unwrap() {
            prop_assert_eq!(row.previous, Decimal::ZERO);
            prop_assert_eq!(row.variation, row.current);
            prop_assert_eq!(row.percentage_change, Metric::Value(Decimal::ZERO));
        }
    }

    #[test]
    fn percentage_change_sign_follows_variation(current in amount(), previous in amount()) {
        let change = percentage_change(current, previous).unwrap();
        if previous.is_zero() || current == previous {
            prop_assert_eq!(change, Decimal::ZERO);
        } else if current > previous {
            prop_assert!(change >= Decimal::ZERO);
        } else {
            prop_assert!(change <= Decimal::ZERO);
        }
    }

    #[test]
    fn normalize_is_idempotent(text in "[ \\ta-zA-Z0-9,.\\n\\r\u{a0}]{0,200}") {
        let once = normalize(&text);
        prop_assert_eq!(normalize(&once), once.clone());
    }

    #[test]
    fn out_of_range_rows_are_errors_not_panics(current in amount(), previous in amount()) {
        let mut now = FinancialPeriodModel::default();
        let mut before = FinancialPeriodModel::default();
        now.gross_profit = Decimal::MAX - current.abs();
        before.gross_profit = Decimal::MIN + previous.abs();
        prop_assert!(compare_rows(&now, Some(&before)).is_err());
    }
}

use crate::error::{AnalysisError, Result};
use crate::schema::{ComparativeRow, ConceptKey, FinancialPeriodModel, Metric, RatioSet};
use crate::utils::{format_point_delta, percent_of, round_one};
use rust_decimal::Decimal;

struct Margins {
    gross: Decimal,
    operating: Decimal,
    net: Decimal,
}

// There is no net income concept, so the net margin is taken from operating profit.
fn margins(model: &FinancialPeriodModel) -> Margins {
    Margins {
        gross: percent_of(model.gross_profit, model.total_income),
        operating: percent_of(model.operating_profit, model.total_income),
        net: percent_of(model.operating_profit, model.total_income),
    }
}

fn difference(what: &str, current: Decimal, previous: Decimal) -> Result<Decimal> {
    current.checked_sub(previous).ok_or_else(|| {
        AnalysisError::Overflow(format!("{} {} - {} is out of range", what, current, previous))
    })
}

/// Margins, sales growth and, when a previous period exists, margin deltas in percentage points.
pub fn compute_ratios(
    current: &FinancialPeriodModel,
    previous: Option<&FinancialPeriodModel>,
) -> Result<RatioSet> {
    let now = margins(current);

    let sales_growth = match previous {
        Some(prev) => percent_of(
            difference("Total Income", current.total_income, prev.total_income)?,
            prev.total_income,
        ),
        None => Decimal::ZERO,
    };

    let before = previous.map(margins);
    let delta = |what: &str, now: Decimal, pick: fn(&Margins) -> Decimal| {
        before
            .as_ref()
            .map(|b| difference(what, now, pick(b)).map(format_point_delta))
            .transpose()
    };

    Ok(RatioSet {
        gross_margin: Metric::Value(round_one(now.gross)),
        gross_margin_change: delta("Gross margin", now.gross, |m| m.gross)?,
        operating_margin: Metric::Value(round_one(now.operating)),
        operating_margin_change: delta("Operating margin", now.operating, |m| m.operating)?,
        net_margin: Metric::Value(round_one(now.net)),
        net_margin_change: delta("Net margin", now.net, |m| m.net)?,
        sales_growth: Metric::Value(round_one(sales_growth)),
    })
}

/// `variation / |previous| * 100` rounded to one decimal, or zero when `previous` is zero.
/// `None` when the variation itself is out of range.
pub fn percentage_change(current: Decimal, previous: Decimal) -> Option<Decimal> {
    if previous.is_zero() {
        return Some(Decimal::ZERO);
    }
    let variation = current.checked_sub(previous)?;
    Some(round_one(percent_of(variation, previous.abs())))
}

pub fn build_row(
    concept: impl Into<String>,
    current: Decimal,
    previous: Decimal,
) -> Result<ComparativeRow> {
    let concept = concept.into();
    let variation = difference(&concept, current, previous)?;
    Ok(ComparativeRow {
        percentage_change: Metric::Value(round_one(percent_of(variation, previous.abs()))),
        concept,
        current,
        previous,
        variation,
    })
}

/// The fifteen comparative rows in canonical order. A missing previous period counts as zero.
pub fn compare_rows(
    current: &FinancialPeriodModel,
    previous: Option<&FinancialPeriodModel>,
) -> Result<Vec<ComparativeRow>> {
    ConceptKey::ALL
        .iter()
        .map(|key| {
            let prev = previous.map(|p| p.get(*key)).unwrap_or(Decimal::ZERO);
            build_row(key.label(), current.get(*key), prev)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::extractor::fallback_pair;
    use rust_decimal_macros::dec;

    #[test]
    fn test_ratios_from_reference_statement() {
        let pair = fallback_pair();
        let ratios = compute_ratios(&pair.current, pair.previous.as_ref()).unwrap();

        // 111,098,541 / 857,757,604 = 12.95%
        assert_eq!(ratios.gross_margin, Metric::Value(dec!(13.0)));
        // 50,215,105 / 857,757,604 = 5.85%
        assert_eq!(ratios.operating_margin, Metric::Value(dec!(5.9)));
        assert_eq!(ratios.net_margin, ratios.operating_margin);
        // (857,757,604 - 835,413,197) / 835,413,197 = 2.67%
        assert_eq!(ratios.sales_growth, Metric::Value(dec!(2.7)));
        // 12.95 - 2.31 = 10.64pp
        assert_eq!(ratios.gross_margin_change.as_deref(), Some("+10.6pp"));
        // 5.85 - (-4.40) = 10.26pp
        assert_eq!(ratios.operating_margin_change.as_deref(), Some("+10.3pp"));
    }

    #[test]
    fn test_ratios_without_previous_period() {
        let pair = fallback_pair();
        let ratios = compute_ratios(&pair.current, None).unwrap();
        assert_eq!(ratios.sales_growth, Metric::Value(Decimal::ZERO));
        assert!(ratios.gross_margin_change.is_none());
        assert!(ratios.operating_margin_change.is_none());
        assert!(ratios.net_margin_change.is_none());
    }

    #[test]
    fn test_ratios_with_zero_income() {
        let model = FinancialPeriodModel::default();
        let ratios = compute_ratios(&model, Some(&model)).unwrap();
        assert_eq!(ratios.gross_margin, Metric::Value(Decimal::ZERO));
        assert_eq!(ratios.sales_growth, Metric::Value(Decimal::ZERO));
        assert_eq!(ratios.gross_margin_change.as_deref(), Some("0.0pp"));
    }

    #[test]
    fn test_ratios_are_pure() {
        let pair = fallback_pair();
        assert_eq!(
            compute_ratios(&pair.current, pair.previous.as_ref()).unwrap(),
            compute_ratios(&pair.current, pair.previous.as_ref()).unwrap()
        );
    }

    #[test]
    fn test_percentage_change_rules() {
        assert_eq!(percentage_change(dec!(150), dec!(100)), Some(dec!(50.0)));
        assert_eq!(percentage_change(dec!(50), dec!(-100)), Some(dec!(150.0)));
        assert_eq!(percentage_change(dec!(10), Decimal::ZERO), Some(Decimal::ZERO));
        assert_eq!(percentage_change(dec!(1), dec!(3)), Some(dec!(-66.7)));
        assert_eq!(percentage_change(Decimal::MAX, Decimal::MIN), None);
    }

    #[test]
    fn test_rows_in_canonical_order() {
        let pair = fallback_pair();
        let rows = compare_rows(&pair.current, pair.previous.as_ref()).unwrap();
        assert_eq!(rows.len(), 15);
        for (row, key) in rows.iter().zip(ConceptKey::ALL) {
            assert_eq!(row.concept, key.label());
            assert_eq!(row.variation, row.current - row.previous);
        }

        let operating = &rows[14];
        assert_eq!(operating.current, dec!(50215105));
        assert_eq!(operating.previous, dec!(-36785026));
        assert_eq!(operating.variation, dec!(87000131));
        assert_eq!(operating.percentage_change, Metric::Value(dec!(236.5)));
    }

    #[test]
    fn test_rows_without_previous_period() {
        let pair = fallback_pair();
        let rows = compare_rows(&pair.current, None).unwrap();
        assert_eq!(rows.len(), 15);
        for row in &rows {
            assert_eq!(row.previous, Decimal::ZERO);
            assert_eq!(row.variation, row.current);
            assert_eq!(row.percentage_change, Metric::Value(Decimal::ZERO));
        }
    }

    #[test]
    fn test_out_of_range_amounts_are_rejected() {
        let mut current = FinancialPeriodModel::default();
        let mut previous = FinancialPeriodModel::default();
        current.gross_profit = dec!(79000000000000000000000000000);
        previous.gross_profit = dec!(-79000000000000000000000000000);
        let err = compare_rows(&current, Some(&previous)).unwrap_err();
        assert!(matches!(err, AnalysisError::Overflow(ref m) if m.contains("Gross Profit")));

        current.total_income = Decimal::MAX;
        previous.total_income = Decimal::MIN;
        assert!(matches!(
            compute_ratios(&current, Some(&previous)),
            Err(AnalysisError::Overflow(_))
        ));
    }
}

//! Resolution of every canonical concept for one period.
//!
//! Each concept is resolved by the first rule that applies:
//!
//! 1. **Reported**: a non-zero value returned by the reasoning service.
//! 2. **Labeled line**: a non-zero amount on a statement line whose label is one of
//!    the concept's aliases (first amount = current period, second = previous).
//! 3. **Computed**: a formula over concepts that are already resolved. Formulas are
//!    re-applied until nothing changes, so chains such as
//!    `totalIncome -> fixedAssetGain -> ...` resolve in any order.
//! 4. **Estimated**: a domain estimate, tried only when no formula applies.
//!
//! A zero is never accepted from rules 1 and 2; it is accepted when a formula
//! produces it. After resolution the two derived invariants
//! `grossProfit = netSales - costOfSales` and `fixedAssetGain = totalIncome - netSales`
//! are enforced.

use crate::error::{AnalysisError, Result};
use crate::schema::{ConceptKey, FinancialPeriodModel};
use crate::utils::{amounts_in, coerce_amount};
use log::{debug, warn};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::schema::ConceptKey::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Reported,
    LabeledLine,
    Computed,
    Estimated,
}

pub type ProvenanceMap = BTreeMap<ConceptKey, Provenance>;

type Values = BTreeMap<ConceptKey, Decimal>;

struct Formula {
    target: ConceptKey,
    inputs: &'static [ConceptKey],
    compute: fn(&Values) -> Option<Decimal>,
    description: &'static str,
}

fn v(values: &Values, key: ConceptKey) -> Decimal {
    values.get(&key).copied().unwrap_or(Decimal::ZERO)
}

fn sum(values: &Values, keys: &[ConceptKey]) -> Option<Decimal> {
    keys.iter()
        .try_fold(Decimal::ZERO, |acc, key| acc.checked_add(v(values, *key)))
}

/// `minuend - subtrahends...`, `None` on overflow.
fn less(values: &Values, minuend: ConceptKey, subtrahends: &[ConceptKey]) -> Option<Decimal> {
    subtrahends
        .iter()
        .try_fold(v(values, minuend), |acc, key| acc.checked_sub(v(values, *key)))
}

/// Ordered formulas; for a given target the first applicable one wins.
const FORMULAS: &[Formula] = &[
    Formula {
        target: GrossProfit,
        inputs: &[NetSales, CostOfSales],
        compute: |x| less(x, NetSales, &[CostOfSales]),
        description: "netSales - costOfSales",
    },
    Formula {
        target: FixedAssetGain,
        inputs: &[TotalIncome, NetSales],
        compute: |x| less(x, TotalIncome, &[NetSales]),
        description: "totalIncome - netSales",
    },
    Formula {
        target: TotalIncome,
        inputs: &[NetSales, FixedAssetGain],
        compute: |x| sum(x, &[NetSales, FixedAssetGain]),
        description: "netSales + fixedAssetGain",
    },
    Formula {
        target: TotalIncome,
        inputs: &[TotalOperatingIncome],
        compute: |x| Some(v(x, TotalOperatingIncome)),
        description: "totalOperatingIncome",
    },
    Formula {
        target: TotalOperatingIncome,
        inputs: &[NetSales, FixedAssetGain],
        compute: |x| sum(x, &[NetSales, FixedAssetGain]),
        description: "netSales + fixedAssetGain",
    },
    Formula {
        target: TotalOperatingIncome,
        inputs: &[TotalIncome],
        compute: |x| Some(v(x, TotalIncome)),
        description: "totalIncome",
    },
    Formula {
        target: NetSales,
        inputs: &[TotalIncome, FixedAssetGain],
        compute: |x| less(x, TotalIncome, &[FixedAssetGain]),
        description: "totalIncome - fixedAssetGain",
    },
    Formula {
        target: CostOfSales,
        inputs: &[NetSales, GrossProfit],
        compute: |x| less(x, NetSales, &[GrossProfit]),
        description: "netSales - grossProfit",
    },
    Formula {
        target: TotalOperatingExpense,
        inputs: &[TotalOperatingExpenseDetail],
        compute: |x| Some(v(x, TotalOperatingExpenseDetail)),
        description: "totalOperatingExpenseDetail",
    },
    Formula {
        target: TotalOperatingExpense,
        inputs: &[CostOfSales, GeneralExpenses, ProfitSharingTax],
        compute: |x| sum(x, &[CostOfSales, GeneralExpenses, ProfitSharingTax]),
        description: "costOfSales + generalExpenses + profitSharingTax",
    },
    Formula {
        target: TotalOperatingExpenseDetail,
        inputs: &[TotalOperatingExpense],
        compute: |x| Some(v(x, TotalOperatingExpense)),
        description: "totalOperatingExpense",
    },
    Formula {
        target: TotalOperatingExpenseDetail,
        inputs: &[CostOfSales, GeneralExpenses, ProfitSharingTax],
        compute: |x| sum(x, &[CostOfSales, GeneralExpenses, ProfitSharingTax]),
        description: "costOfSales + generalExpenses + profitSharingTax",
    },
    Formula {
        target: GeneralExpenses,
        inputs: &[TotalOperatingExpense, CostOfSales, ProfitSharingTax],
        compute: |x| less(x, TotalOperatingExpense, &[CostOfSales, ProfitSharingTax]),
        description: "totalOperatingExpense - costOfSales - profitSharingTax",
    },
    Formula {
        target: ProfitSharingTax,
        inputs: &[TotalOperatingExpense, CostOfSales, GeneralExpenses],
        compute: |x| less(x, TotalOperatingExpense, &[CostOfSales, GeneralExpenses]),
        description: "totalOperatingExpense - costOfSales - generalExpenses",
    },
    Formula {
        target: OperatingProfit,
        inputs: &[TotalOperatingIncome, TotalOperatingExpense],
        compute: |x| less(x, TotalOperatingIncome, &[TotalOperatingExpense]),
        description: "totalOperatingIncome - totalOperatingExpense",
    },
    Formula {
        target: FixedAssetNetResult,
        inputs: &[FixedAssetSaleProceeds, FixedAssetCost],
        compute: |x| less(x, FixedAssetSaleProceeds, &[FixedAssetCost]),
        description: "fixedAssetSaleProceeds - fixedAssetCost",
    },
    Formula {
        target: FixedAssetSaleProceeds,
        inputs: &[FixedAssetNetResult],
        compute: |x| Some(v(x, FixedAssetNetResult).max(Decimal::ZERO)),
        description: "positive part of fixedAssetNetResult",
    },
    Formula {
        target: FixedAssetCost,
        inputs: &[FixedAssetSaleProceeds, FixedAssetNetResult],
        compute: |x| less(x, FixedAssetSaleProceeds, &[FixedAssetNetResult]),
        description: "fixedAssetSaleProceeds - fixedAssetNetResult",
    },
    Formula {
        target: FixedAssetLoss,
        inputs: &[FixedAssetNetResult],
        compute: |x| Some(v(x, FixedAssetNetResult).min(Decimal::ZERO).abs()),
        description: "absolute value of a negative fixedAssetNetResult",
    },
];

/// Share of pre-tax profit used to estimate profit-sharing tax.
pub const PROFIT_SHARING_RATE: Decimal = Decimal::from_parts(3, 0, 0, false, 2);

const ESTIMATES: &[Formula] = &[
    Formula {
        target: ProfitSharingTax,
        inputs: &[OperatingProfit],
        compute: |x| v(x, OperatingProfit).max(Decimal::ZERO).checked_mul(PROFIT_SHARING_RATE),
        description: "3% of positive operating profit",
    },
    Formula {
        target: NetSales,
        inputs: &[TotalIncome, TotalOperatingIncome],
        compute: |x| Some(v(x, TotalIncome).max(v(x, TotalOperatingIncome))),
        description: "highest income figure",
    },
    Formula {
        target: NetSales,
        inputs: &[TotalIncome],
        compute: |x| Some(v(x, TotalIncome)),
        description: "highest income figure",
    },
];

/// Values reported by the reasoning service for one period, before any fallback.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialPeriod {
    pub period: Option<String>,
    pub values: BTreeMap<ConceptKey, Decimal>,
}

impl PartialPeriod {
    /// Reads a period object, accepting both current and legacy field names.
    pub fn from_json(object: &Map<String, Value>) -> Self {
        let mut values = BTreeMap::new();
        for key in ConceptKey::ALL {
            let raw = object
                .get(key.json_key())
                .or_else(|| object.get(key.legacy_key()));
            if let Some(amount) = raw.and_then(coerce_amount) {
                values.insert(key, amount);
            }
        }

        let period = object.get("period").and_then(|p| match p {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        });

        Self { period, values }
    }
}

/// Amounts found on labeled statement lines, by column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabeledLines {
    pub current: BTreeMap<ConceptKey, Decimal>,
    pub previous: BTreeMap<ConceptKey, Decimal>,
}

/// Scans statement text for lines made of a concept label followed only by amounts.
pub fn scan_labeled_lines(text: &str) -> LabeledLines {
    let mut found = LabeledLines::default();

    for line in text.lines() {
        let lower = line.trim().to_lowercase();
        if lower.is_empty() {
            continue;
        }

        'concepts: for key in ConceptKey::ALL {
            for alias in key.line_aliases() {
                let Some(rest) = lower.strip_prefix(*alias) else {
                    continue;
                };
                if rest.chars().any(char::is_alphabetic) {
                    continue;
                }
                let amounts = amounts_in(rest);
                if let Some(first) = amounts.first() {
                    found.current.entry(key).or_insert(*first);
                }
                if let Some(second) = amounts.get(1) {
                    found.previous.entry(key).or_insert(*second);
                }
                if !amounts.is_empty() {
                    break 'concepts;
                }
            }
        }
    }

    found
}

fn out_of_range(period: &str, rule: &Formula) -> AnalysisError {
    AnalysisError::MalformedResponse(format!(
        "{} for period '{}' overflows when computed as {}",
        rule.target, period, rule.description
    ))
}

fn apply_formulas(period: &str, values: &mut Values, provenance: &mut ProvenanceMap) -> Result<()> {
    loop {
        let mut changed = false;
        for formula in FORMULAS {
            if values.contains_key(&formula.target) {
                continue;
            }
            if formula.inputs.iter().all(|k| values.contains_key(k)) {
                let result = (formula.compute)(values).ok_or_else(|| out_of_range(period, formula))?;
                debug!("{} computed as {} = {}", formula.target, formula.description, result);
                values.insert(formula.target, result);
                provenance.insert(formula.target, Provenance::Computed);
                changed = true;
            }
        }
        if !changed {
            return Ok(());
        }
    }
}

fn apply_first_estimate(
    period: &str,
    values: &mut Values,
    provenance: &mut ProvenanceMap,
) -> Result<bool> {
    for estimate in ESTIMATES {
        if values.contains_key(&estimate.target) {
            continue;
        }
        if estimate.inputs.iter().all(|k| values.contains_key(k)) {
            let result = (estimate.compute)(values).ok_or_else(|| out_of_range(period, estimate))?;
            warn!(
                "{} not found in the documents; estimated as {} = {}",
                estimate.target, estimate.description, result
            );
            values.insert(estimate.target, result);
            provenance.insert(estimate.target, Provenance::Estimated);
            return Ok(true);
        }
    }
    Ok(false)
}

fn enforce_invariant(
    values: &mut Values,
    provenance: &mut ProvenanceMap,
    target: ConceptKey,
    expected: Decimal,
) {
    if let Some(actual) = values.get(&target) {
        if *actual != expected {
            warn!(
                "{} reported as {} but must equal {}; using the derived value",
                target, actual, expected
            );
            values.insert(target, expected);
            provenance.insert(target, Provenance::Computed);
        }
    }
}

/// Resolves all fifteen concepts for one period.
///
/// `reported` comes from the reasoning service, `lines` from [`scan_labeled_lines`]
/// for the same column. Fails with [`AnalysisError::IncompleteModel`] when a concept
/// cannot be resolved by any rule, and with [`AnalysisError::MalformedResponse`] when a
/// rule overflows the decimal range.
pub fn resolve_period(
    period: &str,
    reported: &BTreeMap<ConceptKey, Decimal>,
    lines: &BTreeMap<ConceptKey, Decimal>,
) -> Result<(FinancialPeriodModel, ProvenanceMap)> {
    let mut values = Values::new();
    let mut provenance = ProvenanceMap::new();

    for key in ConceptKey::ALL {
        if let Some(value) = reported.get(&key).filter(|v| !v.is_zero()) {
            values.insert(key, *value);
            provenance.insert(key, Provenance::Reported);
        } else if let Some(value) = lines.get(&key).filter(|v| !v.is_zero()) {
            values.insert(key, *value);
            provenance.insert(key, Provenance::LabeledLine);
        }
    }

    loop {
        apply_formulas(period, &mut values, &mut provenance)?;
        if !apply_first_estimate(period, &mut values, &mut provenance)? {
            break;
        }
    }

    // The first two formulas are the derived invariants.
    for rule in &FORMULAS[..2] {
        if rule.inputs.iter().all(|k| values.contains_key(k)) {
            let expected = (rule.compute)(&values).ok_or_else(|| out_of_range(period, rule))?;
            enforce_invariant(&mut values, &mut provenance, rule.target, expected);
        }
    }

    let missing: Vec<ConceptKey> = ConceptKey::ALL
        .into_iter()
        .filter(|k| !values.contains_key(k))
        .collect();
    if !missing.is_empty() {
        return Err(AnalysisError::IncompleteModel {
            period: period.to_string(),
            missing,
        });
    }

    let mut model = FinancialPeriodModel {
        period: period.to_string(),
        ..FinancialPeriodModel::default()
    };
    for (key, value) in &values {
        model.set(*key, *value);
    }

    Ok((model, provenance))
}

//! Corrections to a live [`AnalysisResult`].
//!
//! Two paths mutate the analysis in place:
//!
//! - **Suggested patches**: the reasoning service appends an
//!   `<UPDATED_DATA>{...}</UPDATED_DATA>` block to its reply. Only the ratio fields and
//!   rows named in the block change; every other row is left exactly as it was.
//! - **Manual cell edits**: one `current` or `previous` cell is overwritten and the
//!   change is cascaded through a small dependency graph of derived concepts.
//!
//! Both paths stage their changes on a copy; an amount that leaves the decimal range
//! rejects the whole change and leaves the analysis as it was.

use crate::error::{AnalysisError, Result};
use crate::ratios::build_row;
use crate::schema::{AnalysisResult, ComparativeRow, ConceptKey, Metric, RatioSet, NOT_AVAILABLE};
use crate::utils::{coerce_amount, format_point_delta};
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap, VecDeque};

pub const UPDATE_OPEN_TAG: &str = "<UPDATED_DATA>";
pub const UPDATE_CLOSE_TAG: &str = "</UPDATED_DATA>";

static UPDATE_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<UPDATED_DATA>\s*(.*?)\s*</UPDATED_DATA>").expect("valid pattern")
});

/// Partial update for one comparative row, keyed by a free-text concept name.
#[derive(Debug, Clone, PartialEq)]
pub struct RowPatch {
    pub concept: String,
    pub current: Option<Value>,
    pub previous: Option<Value>,
    pub percentage_change: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct AnalysisPatch {
    pub ratios: Map<String, Value>,
    pub rows: Vec<RowPatch>,
}

impl AnalysisPatch {
    pub fn is_empty(&self) -> bool {
        self.ratios.is_empty() && self.rows.is_empty()
    }

    pub fn from_json(body: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(body)
            .map_err(|e| AnalysisError::ReconciliationParse(e.to_string()))?;
        let Value::Object(root) = value else {
            return Err(AnalysisError::ReconciliationParse(
                "update block must be a JSON object".into(),
            ));
        };

        let ratios = match root.get("ratios") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(_) => {
                return Err(AnalysisError::ReconciliationParse(
                    "'ratios' must be an object".into(),
                ))
            }
        };

        let rows = match root.get("comparativeData") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(parse_row_patch)
                .collect::<Result<Vec<_>>>()?,
            Some(_) => {
                return Err(AnalysisError::ReconciliationParse(
                    "'comparativeData' must be an array".into(),
                ))
            }
        };

        Ok(Self { ratios, rows })
    }
}

fn parse_row_patch(item: &Value) -> Result<RowPatch> {
    let object = item.as_object().ok_or_else(|| {
        AnalysisError::ReconciliationParse("comparativeData entries must be objects".into())
    })?;
    let concept = object
        .get("concept")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .ok_or_else(|| {
            AnalysisError::ReconciliationParse(
                "comparativeData entry is missing its 'concept'".into(),
            )
        })?;

    Ok(RowPatch {
        concept: concept.to_string(),
        current: object.get("current").cloned(),
        previous: object.get("previous").cloned(),
        percentage_change: object.get("percentageChange").cloned(),
    })
}

/// Finds and parses the update block of a reply.
///
/// `Ok(None)` when the reply carries no block; `ReconciliationParse` when the block is malformed.
pub fn extract_patch(reply: &str) -> Result<Option<AnalysisPatch>> {
    let Some(captures) = UPDATE_BLOCK.captures(reply) else {
        if reply.contains(UPDATE_OPEN_TAG) {
            return Err(AnalysisError::ReconciliationParse(format!(
                "{} block is not closed",
                UPDATE_OPEN_TAG
            )));
        }
        return Ok(None);
    };
    let body = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
    AnalysisPatch::from_json(body).map(Some)
}

/// What a patch changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchReport {
    pub ratios_updated: Vec<String>,
    pub ratios_ignored: Vec<String>,
    pub rows_updated: Vec<String>,
    pub unmatched_concepts: Vec<String>,
}

impl PatchReport {
    pub fn changed_anything(&self) -> bool {
        !self.ratios_updated.is_empty() || !self.rows_updated.is_empty()
    }
}

fn coerce_metric(value: &Value) -> Option<Metric> {
    match value {
        Value::String(s) if s.trim() == NOT_AVAILABLE => Some(Metric::NotAvailable),
        other => coerce_amount(other).map(Metric::Value),
    }
}

fn coerce_change(value: &Value) -> Option<Option<String>> {
    match value {
        Value::Null => Some(None),
        Value::String(s) => Some(Some(s.trim().to_string())),
        other => coerce_amount(other).map(|delta| Some(format_point_delta(delta))),
    }
}

fn merge_ratio(ratios: &mut RatioSet, key: &str, value: &Value) -> bool {
    match key {
        "grossMargin" | "operatingMargin" | "netMargin" | "salesGrowth" => {
            let Some(metric) = coerce_metric(value) else {
                return false;
            };
            let slot = match key {
                "grossMargin" => &mut ratios.gross_margin,
                "operatingMargin" => &mut ratios.operating_margin,
                "netMargin" => &mut ratios.net_margin,
                _ => &mut ratios.sales_growth,
            };
            *slot = metric;
            true
        }
        "grossMarginChange" | "operatingMarginChange" | "netMarginChange" => {
            let Some(change) = coerce_change(value) else {
                return false;
            };
            let slot = match key {
                "grossMarginChange" => &mut ratios.gross_margin_change,
                "operatingMarginChange" => &mut ratios.operating_margin_change,
                _ => &mut ratios.net_margin_change,
            };
            *slot = change;
            true
        }
        _ => false,
    }
}

fn concepts_equal(row: &ComparativeRow, concept: &str) -> bool {
    if row.concept.to_lowercase() == concept.to_lowercase() {
        return true;
    }
    match (row.key(), ConceptKey::from_label(concept)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

fn concepts_overlap(row: &ComparativeRow, concept: &str) -> bool {
    let existing = row.concept.to_lowercase();
    let suggested = concept.to_lowercase();
    existing.contains(&suggested) || suggested.contains(&existing)
}

/// Re-derives `variation` and `percentageChange` from the row's amounts.
pub fn rederive_row(row: &mut ComparativeRow) -> Result<()> {
    *row = build_row(row.concept.as_str(), row.current, row.previous)?;
    Ok(())
}

/// Merges a patch into the analysis.
///
/// Rows are matched exactly (label, JSON key or legacy key) first. A patch entry with no
/// exact match falls back to a case-insensitive substring match in either direction, but
/// never claims a row that another entry matched exactly. Amounts given as strings are
/// coerced; unusable values leave the cell as it was. `variation` is always re-derived and
/// `percentageChange` is re-derived unless the patch sets it to `"N/A"`.
///
/// Fails with [`AnalysisError::ReconciliationParse`] when a patched row's amounts are out of
/// range; `result` is then left unmodified.
pub fn apply_patch(result: &mut AnalysisResult, patch: &AnalysisPatch) -> Result<PatchReport> {
    let mut staged = result.clone();
    let report = merge_patch(&mut staged, patch)?;
    *result = staged;

    info!(
        "Applied suggested update: {} ratio(s), {} row(s)",
        report.ratios_updated.len(),
        report.rows_updated.len()
    );
    Ok(report)
}

fn merge_patch(result: &mut AnalysisResult, patch: &AnalysisPatch) -> Result<PatchReport> {
    let mut report = PatchReport::default();

    for (key, value) in &patch.ratios {
        if merge_ratio(&mut result.ratios, key, value) {
            report.ratios_updated.push(key.clone());
        } else {
            warn!("Ignoring suggested ratio '{}' = {}", key, value);
            report.ratios_ignored.push(key.clone());
        }
    }

    let exact: Vec<Option<usize>> = patch
        .rows
        .iter()
        .map(|p| {
            result
                .comparative_data
                .iter()
                .position(|row| concepts_equal(row, &p.concept))
        })
        .collect();
    let mut used = vec![false; patch.rows.len()];

    for (row_index, row) in result.comparative_data.iter_mut().enumerate() {
        let chosen = (0..patch.rows.len())
            .find(|&i| exact[i] == Some(row_index))
            .or_else(|| {
                (0..patch.rows.len()).find(|&i| {
                    exact[i].is_none() && concepts_overlap(row, &patch.rows[i].concept)
                })
            });

        let Some(patch_index) = chosen else {
            continue;
        };
        used[patch_index] = true;
        let update = &patch.rows[patch_index];

        if let Some(current) = update.current.as_ref().and_then(coerce_amount) {
            row.current = current;
        }
        if let Some(previous) = update.previous.as_ref().and_then(coerce_amount) {
            row.previous = previous;
        }
        rederive_row(row).map_err(|e| {
            AnalysisError::ReconciliationParse(format!(
                "suggested amounts for '{}' are unusable: {}",
                update.concept, e
            ))
        })?;
        if matches!(update.percentage_change.as_ref().and_then(coerce_metric), Some(Metric::NotAvailable)) {
            row.percentage_change = Metric::NotAvailable;
        }

        debug!("Row '{}' updated from suggestion '{}'", row.concept, update.concept);
        report.rows_updated.push(row.concept.clone());
    }

    for (update, was_used) in patch.rows.iter().zip(used) {
        if !was_used {
            warn!("Suggested concept '{}' matches no row", update.concept);
            report.unmatched_concepts.push(update.concept.clone());
        }
    }
    Ok(report)
}

/// Extracts and applies the update block of a reply. On any error nothing is modified.
pub fn apply_reply(result: &mut AnalysisResult, reply: &str) -> Result<Option<PatchReport>> {
    match extract_patch(reply)? {
        Some(patch) => apply_patch(result, &patch).map(Some),
        None => Ok(None),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditField {
    Current,
    Previous,
}

/// Which derived concepts a manual edit recomputes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CascadePolicy {
    /// Gross profit and fixed asset gain only, recomputed on every edit.
    #[default]
    Minimal,
    /// Every derived concept in the dependency graph. Beyond the minimal pair, a concept is
    /// recomputed only when one of its inputs changed.
    Full,
}

struct Dependency {
    target: ConceptKey,
    inputs: &'static [ConceptKey],
    compute: fn(&[Decimal]) -> Option<Decimal>,
    /// Recomputed on every edit, not only when an input changed.
    always: bool,
}

const MINIMAL_DEPENDENCIES: &[Dependency] = &[
    Dependency {
        target: ConceptKey::GrossProfit,
        inputs: &[ConceptKey::NetSales, ConceptKey::CostOfSales],
        compute: |x| x[0].checked_sub(x[1]),
        always: true,
    },
    Dependency {
        target: ConceptKey::FixedAssetGain,
        inputs: &[ConceptKey::TotalOperatingIncome, ConceptKey::NetSales],
        compute: |x| x[0].checked_sub(x[1]),
        always: true,
    },
];

const EXTENDED_DEPENDENCIES: &[Dependency] = &[
    Dependency {
        target: ConceptKey::OperatingProfit,
        inputs: &[
            ConceptKey::TotalOperatingIncome,
            ConceptKey::TotalOperatingExpense,
        ],
        compute: |x| x[0].checked_sub(x[1]),
        always: false,
    },
    Dependency {
        target: ConceptKey::FixedAssetNetResult,
        inputs: &[ConceptKey::FixedAssetSaleProceeds, ConceptKey::FixedAssetCost],
        compute: |x| x[0].checked_sub(x[1]),
        always: false,
    },
    Dependency {
        target: ConceptKey::FixedAssetLoss,
        inputs: &[ConceptKey::FixedAssetNetResult],
        compute: |x| Some(x[0].min(Decimal::ZERO).abs()),
        always: false,
    },
];

impl CascadePolicy {
    fn dependencies(self) -> Vec<&'static Dependency> {
        match self {
            Self::Minimal => MINIMAL_DEPENDENCIES.iter().collect(),
            Self::Full => MINIMAL_DEPENDENCIES
                .iter()
                .chain(EXTENDED_DEPENDENCIES.iter())
                .collect(),
        }
    }
}

/// Orders dependencies so every target is computed after the targets it reads.
fn topological_order(dependencies: Vec<&'static Dependency>) -> Vec<&'static Dependency> {
    let targets: BTreeSet<ConceptKey> = dependencies.iter().map(|d| d.target).collect();
    let mut pending: HashMap<ConceptKey, usize> = dependencies
        .iter()
        .map(|d| {
            let upstream = d.inputs.iter().filter(|k| targets.contains(k)).count();
            (d.target, upstream)
        })
        .collect();

    let mut ready: VecDeque<&'static Dependency> = dependencies
        .iter()
        .filter(|d| pending[&d.target] == 0)
        .copied()
        .collect();
    let mut ordered = Vec::with_capacity(dependencies.len());

    while let Some(dep) = ready.pop_front() {
        ordered.push(dep);
        for next in &dependencies {
            if next.inputs.contains(&dep.target) {
                if let Some(count) = pending.get_mut(&next.target) {
                    *count -= 1;
                    if *count == 0 {
                        ready.push_back(*next);
                    }
                }
            }
        }
    }
    ordered
}

/// Rows recomputed by a manual edit, in the order they were recomputed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CascadeReport {
    pub edited: String,
    pub recomputed: Vec<String>,
}

fn cell(row: &ComparativeRow, field: EditField) -> Decimal {
    match field {
        EditField::Current => row.current,
        EditField::Previous => row.previous,
    }
}

fn cell_mut(row: &mut ComparativeRow, field: EditField) -> &mut Decimal {
    match field {
        EditField::Current => &mut row.current,
        EditField::Previous => &mut row.previous,
    }
}

/// Overwrites one cell, re-derives its row, then recomputes dependent rows.
///
/// Dependents are recomputed only in the edited column, and only when the target row and
/// every input row are present in the table. The gross profit and fixed asset gain
/// relationships are re-applied on every edit, so a table left inconsistent by an earlier
/// patch is repaired by the next edit. An edit whose cascade leaves the decimal range fails
/// with [`AnalysisError::InvalidEdit`] and changes nothing.
pub fn edit_cell(
    result: &mut AnalysisResult,
    row_index: usize,
    field: EditField,
    value: Decimal,
    policy: CascadePolicy,
) -> Result<CascadeReport> {
    let mut rows = result.comparative_data.clone();
    let row_count = rows.len();
    let row = rows.get_mut(row_index).ok_or_else(|| {
        AnalysisError::InvalidEdit(format!(
            "row {} does not exist (table has {} rows)",
            row_index, row_count
        ))
    })?;

    let out_of_range = |concept: &str| {
        AnalysisError::InvalidEdit(format!("'{}' would leave the decimal range", concept))
    };

    *cell_mut(row, field) = value;
    rederive_row(row).map_err(|_| out_of_range(&row.concept))?;

    let mut report = CascadeReport {
        edited: row.concept.clone(),
        recomputed: Vec::new(),
    };

    let mut dirty: BTreeSet<ConceptKey> = row.key().into_iter().collect();
    let positions: HashMap<ConceptKey, usize> = rows
        .iter()
        .enumerate()
        .filter_map(|(i, r)| r.key().map(|k| (k, i)))
        .collect();

    for dep in topological_order(policy.dependencies()) {
        if !dep.always && !dep.inputs.iter().any(|k| dirty.contains(k)) {
            continue;
        }
        let Some(&target_index) = positions.get(&dep.target) else {
            continue;
        };
        let inputs: Option<Vec<Decimal>> = dep
            .inputs
            .iter()
            .map(|k| positions.get(k).map(|&i| cell(&rows[i], field)))
            .collect();
        let Some(inputs) = inputs else {
            continue;
        };

        let target = &mut rows[target_index];
        let computed = (dep.compute)(&inputs).ok_or_else(|| out_of_range(&target.concept))?;
        *cell_mut(target, field) = computed;
        rederive_row(target).map_err(|_| out_of_range(&target.concept))?;
        dirty.insert(dep.target);
        report.recomputed.push(target.concept.clone());
    }

    result.comparative_data = rows;
    info!(
        "Edited '{}' ({:?}); recomputed {:?}",
        report.edited, field, report.recomputed
    );
    Ok(report)
}

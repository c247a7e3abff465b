use crate::error::{AnalysisError, Result};
use crate::fallback::{resolve_period, scan_labeled_lines, PartialPeriod, ProvenanceMap};
use crate::ingestion::income_statement_text;
use crate::llm::prompts::{extraction_prompt, SYSTEM_PROMPT};
use crate::llm::service::{ReasoningRequest, ReasoningService};
use crate::ratios::{compare_rows, compute_ratios};
use crate::schema::{ConceptKey, Degradable, DocumentText, FinancialPeriodModel, PeriodPair};
use crate::utils::extract_first_json_object;
use log::{info, warn};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;

pub const DEFAULT_CURRENT_LABEL: &str = "Current";
pub const DEFAULT_PREVIOUS_LABEL: &str = "Previous";

/// What the extractor does when the reasoning service cannot produce a usable model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Return [`fallback_pair`], flagged as degraded.
    #[default]
    StaticData,
    /// Return [`AnalysisError::ExtractionUnavailable`] and let the caller decide.
    Surface,
}

/// Where each resolved value came from, per period.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeriodProvenance {
    pub current: ProvenanceMap,
    pub previous: Option<ProvenanceMap>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    pub pair: PeriodPair,
    pub provenance: PeriodProvenance,
}

fn model(period: &str, values: [i64; 15]) -> FinancialPeriodModel {
    let mut model = FinancialPeriodModel {
        period: period.to_string(),
        ..FinancialPeriodModel::default()
    };
    for (key, value) in ConceptKey::ALL.into_iter().zip(values) {
        model.set(key, Decimal::from(value));
    }
    model
}

/// The fixed pair returned whenever extraction fails under [`FallbackPolicy::StaticData`].
pub fn fallback_pair() -> PeriodPair {
    PeriodPair {
        current: model(
            "2024",
            [
                857_757_604,
                807_542_499,
                840_561_188,
                17_196_416,
                857_757_604,
                729_462_647,
                111_098_541,
                78_079_852,
                2_666_078,
                0,
                807_542_499,
                452_532,
                0,
                452_532,
                50_215_105,
            ],
        ),
        previous: Some(model(
            "2023",
            [
                835_413_197,
                872_198_223,
                822_495_316,
                12_917_881,
                835_413_197,
                803_188_777,
                19_306_539,
                69_009_446,
                4_660_774,
                0,
                872_198_223,
                676_527,
                0,
                676_527,
                -36_785_026,
            ],
        )),
    }
}

/// JSON schema of the extraction reply.
pub fn extraction_schema() -> Value {
    let mut properties = Map::new();
    for key in ConceptKey::ALL {
        properties.insert(
            key.json_key().to_string(),
            json!({ "type": "number", "description": key.label() }),
        );
    }
    properties.insert(
        "period".to_string(),
        json!({ "type": "string", "description": "Year or period label" }),
    );
    let period = json!({ "type": "object", "properties": properties });

    json!({
        "type": "object",
        "properties": { "current": period, "previous": period },
        "required": ["current"]
    })
}

fn read_period(
    object: &Map<String, Value>,
    default_label: &str,
    lines: &std::collections::BTreeMap<ConceptKey, Decimal>,
) -> Result<(FinancialPeriodModel, ProvenanceMap)> {
    let partial = PartialPeriod::from_json(object);
    let label = partial
        .period
        .clone()
        .unwrap_or_else(|| default_label.to_string());
    resolve_period(&label, &partial.values, lines)
}

/// Parses an extraction reply and runs the fallback chain against `source_text`.
///
/// A missing or non-object `previous` yields a single-period pair. Amounts whose rules or
/// period-over-period comparison leave the decimal range make the reply malformed.
pub fn parse_extraction(reply: &str, source_text: &str) -> Result<Extraction> {
    let raw = extract_first_json_object(reply).ok_or_else(|| {
        AnalysisError::MalformedResponse("no JSON object found in the reply".to_string())
    })?;
    let payload: Value = serde_json::from_str(raw)
        .map_err(|e| AnalysisError::MalformedResponse(e.to_string()))?;

    let current = payload
        .get("current")
        .and_then(Value::as_object)
        .ok_or_else(|| {
            AnalysisError::MalformedResponse("reply has no 'current' period".to_string())
        })?;

    let lines = scan_labeled_lines(source_text);
    let (current, current_provenance) = read_period(current, DEFAULT_CURRENT_LABEL, &lines.current)?;

    let (previous, previous_provenance) = match payload.get("previous").and_then(Value::as_object) {
        Some(object) => {
            let (model, provenance) = read_period(object, DEFAULT_PREVIOUS_LABEL, &lines.previous)?;
            (Some(model), Some(provenance))
        }
        None => (None, None),
    };

    let pair = PeriodPair { current, previous };
    compare_rows(&pair.current, pair.previous.as_ref())
        .and_then(|_| compute_ratios(&pair.current, pair.previous.as_ref()))
        .map_err(|e| AnalysisError::MalformedResponse(e.to_string()))?;

    Ok(Extraction {
        pair,
        provenance: PeriodProvenance {
            current: current_provenance,
            previous: previous_provenance,
        },
    })
}

pub struct FinancialExtractor {
    service: Arc<dyn ReasoningService>,
    policy: FallbackPolicy,
}

impl FinancialExtractor {
    pub fn new(service: Arc<dyn ReasoningService>) -> Self {
        Self {
            service,
            policy: FallbackPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: FallbackPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Extracts the period pair from the session documents.
    ///
    /// Service failures, replies without JSON and models the fallback chain cannot complete
    /// are handled by the configured [`FallbackPolicy`].
    pub async fn extract(&self, documents: &[DocumentText]) -> Result<Degradable<Extraction>> {
        if documents.is_empty() {
            return Err(AnalysisError::InputMissing(
                "no documents to extract from".to_string(),
            ));
        }

        match self.try_extract(documents).await {
            Ok(extraction) => {
                info!(
                    "Extracted period '{}' ({} previous period)",
                    extraction.pair.current.period,
                    if extraction.pair.previous.is_some() { "with" } else { "without" }
                );
                Ok(Degradable::genuine(extraction))
            }
            Err(e) => self.fall_back(e),
        }
    }

    async fn try_extract(&self, documents: &[DocumentText]) -> Result<Extraction> {
        let mut request = ReasoningRequest::new(SYSTEM_PROMPT.trim(), extraction_prompt(documents));
        request.response_schema = Some(extraction_schema());

        let reply = self.service.reason(&request).await?;
        parse_extraction(&reply, &income_statement_text(documents))
    }

    fn fall_back(&self, error: AnalysisError) -> Result<Degradable<Extraction>> {
        match self.policy {
            FallbackPolicy::StaticData => {
                warn!(
                    "Extraction via {} failed ({}); using the static reference statement",
                    self.service.name(),
                    error
                );
                let extraction = Extraction {
                    pair: fallback_pair(),
                    provenance: PeriodProvenance::default(),
                };
                Ok(Degradable::degraded(extraction, error.to_string()))
            }
            FallbackPolicy::Surface => Err(AnalysisError::ExtractionUnavailable {
                reason: error.to_string(),
            }),
        }
    }
}

use crate::error::{AnalysisError, Result};
use crate::llm::prompts::{narrative_prompt, SYSTEM_PROMPT};
use crate::llm::service::{ReasoningRequest, ReasoningService};
use crate::schema::{Degradable, PeriodPair, RatioSet};
use crate::utils::extract_first_json_object;
use log::warn;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const MIN_RECOMMENDATIONS: usize = 4;
pub const MAX_RECOMMENDATIONS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Narrative {
    /// Two or three paragraphs on financial performance.
    pub executive_summary: String,
    /// Four or five specific strategic recommendations.
    pub recommendations: Vec<String>,
}

impl Narrative {
    /// Canned narrative used when the reasoning service gives no usable answer.
    pub fn fallback() -> Self {
        Self {
            executive_summary: "The company shows a significant improvement in operating performance \
                during the current period. Despite challenges in net profitability, operating profit \
                has recovered and sales have grown steadily. Operating margins have improved \
                considerably, pointing to better cost management and operational efficiency."
                .to_string(),
            recommendations: vec![
                "Implement cost optimization strategies to improve the gross margin".to_string(),
                "Review the financial expense structure to reduce its impact on net profit".to_string(),
                "Diversify revenue sources to reduce dependence on core sales".to_string(),
                "Tighten controls on operating expenses to sustain the positive trend".to_string(),
                "Consider refinancing debt to reduce interest expense".to_string(),
            ],
        }
    }
}

/// Parses a narrative reply: the first JSON object, a non-blank summary and 4 to 5
/// recommendations. Extra recommendations are dropped.
pub fn parse_narrative(reply: &str) -> Result<Narrative> {
    let raw = extract_first_json_object(reply).ok_or_else(|| {
        AnalysisError::MalformedResponse("no JSON object found in the reply".to_string())
    })?;
    let mut narrative: Narrative =
        serde_json::from_str(raw).map_err(|e| AnalysisError::MalformedResponse(e.to_string()))?;

    narrative.executive_summary = narrative.executive_summary.trim().to_string();
    if narrative.executive_summary.is_empty() {
        return Err(AnalysisError::MalformedResponse(
            "executive summary is empty".to_string(),
        ));
    }

    narrative.recommendations = narrative
        .recommendations
        .into_iter()
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .collect();
    if narrative.recommendations.len() < MIN_RECOMMENDATIONS {
        return Err(AnalysisError::MalformedResponse(format!(
            "expected at least {} recommendations, got {}",
            MIN_RECOMMENDATIONS,
            narrative.recommendations.len()
        )));
    }
    narrative.recommendations.truncate(MAX_RECOMMENDATIONS);

    Ok(narrative)
}

pub struct NarrativeGenerator {
    service: Arc<dyn ReasoningService>,
}

impl NarrativeGenerator {
    pub fn new(service: Arc<dyn ReasoningService>) -> Self {
        Self { service }
    }

    /// Summary and recommendations, or the canned narrative flagged as degraded. Never fails.
    pub async fn narrate(&self, pair: &PeriodPair, ratios: &RatioSet) -> Degradable<Narrative> {
        match self.try_narrate(pair, ratios).await {
            Ok(narrative) => Degradable::genuine(narrative),
            Err(e) => {
                warn!("Narrative generation failed ({}); using the canned narrative", e);
                Degradable::degraded(Narrative::fallback(), e.to_string())
            }
        }
    }

    /// Same as [`narrate`](Self::narrate) but reports failures instead of degrading.
    pub async fn try_narrate(&self, pair: &PeriodPair, ratios: &RatioSet) -> Result<Narrative> {
        let request = ReasoningRequest::new(SYSTEM_PROMPT.trim(), narrative_prompt(pair, ratios))
            .expecting::<Narrative>();
        let reply = self.service.reason(&request).await?;
        parse_narrative(&reply)
    }
}

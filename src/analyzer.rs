//! Session-scoped entry point tying ingestion, extraction, ratios, narrative and corrections together.

use crate::assemble_analysis;
use crate::config::AnalyzerConfig;
use crate::error::{AnalysisError, Result};
use crate::export::{render_text, write_csv};
use crate::ingestion::{decode_batch, DocumentDecoder, IngestReport, PlainTextDecoder, RawUpload};
use crate::llm::assistant::{CorrectionAssistant, FeedbackOutcome};
use crate::llm::extractor::{FinancialExtractor, PeriodProvenance};
use crate::llm::narrator::NarrativeGenerator;
use crate::llm::service::ReasoningService;
use crate::normalizer::normalize;
use crate::ratios::compute_ratios;
use crate::reconciler::{self, CascadeReport, EditField};
use crate::schema::{AnalysisResult, Degradable, DocumentText};
use crate::session::{ChatMessage, InMemorySessionStore, SessionId, SessionStore};
use log::info;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A freshly generated analysis plus how it was produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisReport {
    pub analysis: AnalysisResult,
    pub provenance: PeriodProvenance,
    /// The figures are the static reference statement, not the uploaded documents.
    pub extraction_degraded: bool,
    /// The summary and recommendations are the canned narrative.
    pub narrative_degraded: bool,
    pub degraded_reasons: Vec<String>,
}

impl AnalysisReport {
    pub fn is_degraded(&self) -> bool {
        self.extraction_degraded || self.narrative_degraded
    }
}

pub struct FinancialAnalyzer<S: SessionStore = InMemorySessionStore> {
    config: AnalyzerConfig,
    store: Arc<S>,
    decoder: Arc<dyn DocumentDecoder>,
    extractor: FinancialExtractor,
    narrator: NarrativeGenerator,
    assistant: CorrectionAssistant,
}

impl FinancialAnalyzer<InMemorySessionStore> {
    pub fn new(service: Arc<dyn ReasoningService>, config: AnalyzerConfig) -> Self {
        Self::with_store(service, config, Arc::new(InMemorySessionStore::new()))
    }

    /// Analyzer backed by Gemini, using the key, model and timeout from `config`.
    #[cfg(feature = "gemini")]
    pub fn from_config(config: AnalyzerConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| AnalysisError::InvalidConfig("GEMINI_API_KEY is not set".to_string()))?;
        let client = crate::llm::client::GeminiClient::new(api_key)
            .with_model(config.model.clone())
            .with_timeout(config.request_timeout());
        Ok(Self::new(Arc::new(client), config))
    }
}

impl<S: SessionStore> FinancialAnalyzer<S> {
    pub fn with_store(service: Arc<dyn ReasoningService>, config: AnalyzerConfig, store: Arc<S>) -> Self {
        Self {
            extractor: FinancialExtractor::new(service.clone()).with_policy(config.extraction_fallback),
            narrator: NarrativeGenerator::new(service.clone()),
            assistant: CorrectionAssistant::new(service).with_history_limit(config.history_limit),
            decoder: Arc::new(PlainTextDecoder),
            store,
            config,
        }
    }

    pub fn with_decoder(mut self, decoder: Arc<dyn DocumentDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Registers already-extracted document texts. Returns the session's document count.
    pub fn add_documents(&self, id: &SessionId, documents: Vec<DocumentText>) -> usize {
        let documents: Vec<DocumentText> = documents
            .into_iter()
            .map(|mut doc| {
                doc.content = normalize(&doc.content);
                doc
            })
            .filter(|doc| !doc.content.is_empty())
            .collect();
        self.store.update(id, |session| {
            session.documents.extend(documents);
            session.documents.len()
        })
    }

    /// Decodes an upload batch and registers every document that decoded.
    pub async fn ingest(&self, id: &SessionId, uploads: &[RawUpload]) -> IngestReport {
        let report = decode_batch(self.decoder.as_ref(), uploads).await;
        self.store
            .update(id, |session| session.documents.extend(report.documents.iter().cloned()));
        report
    }

    /// Extracts, computes ratios and rows, narrates, and stores the result in the session.
    pub async fn generate_analysis(&self, id: &SessionId) -> Result<AnalysisReport> {
        let documents = self
            .store
            .get(id)
            .map(|s| s.documents)
            .filter(|docs| !docs.is_empty())
            .ok_or_else(|| {
                AnalysisError::InputMissing(format!("no documents uploaded for session {}", id))
            })?;

        let extraction = self.extractor.extract(&documents).await?;
        let pair = &extraction.value.pair;
        let ratios = compute_ratios(&pair.current, pair.previous.as_ref())?;

        let narrative = if self.config.narrative_fallback {
            self.narrator.narrate(pair, &ratios).await
        } else {
            Degradable::genuine(self.narrator.try_narrate(pair, &ratios).await?)
        };
        let narrative_degraded = narrative.degraded;
        let narrative_reason = narrative.reason.clone();
        let analysis = assemble_analysis(pair, narrative.into_inner())?;

        self.store
            .update(id, |session| session.analysis = Some(analysis.clone()));

        let degraded_reasons: Vec<String> = [extraction.reason.clone(), narrative_reason]
            .into_iter()
            .flatten()
            .collect();
        info!(
            "Analysis for session {} generated ({} rows, degraded: {})",
            id,
            analysis.comparative_data.len(),
            !degraded_reasons.is_empty()
        );

        Ok(AnalysisReport {
            analysis,
            provenance: extraction.value.provenance,
            extraction_degraded: extraction.degraded,
            narrative_degraded,
            degraded_reasons,
        })
    }

    /// One correction turn. The session must exist.
    pub async fn send_feedback(&self, id: &SessionId, message: &str) -> Result<FeedbackOutcome> {
        let mut session = self
            .store
            .get(id)
            .ok_or_else(|| AnalysisError::InputMissing(format!("unknown session {}", id)))?;

        let outcome = self.assistant.send_feedback(&mut session, message).await?;

        self.store.update(id, |stored| {
            stored.conversation = session.conversation;
            stored.analysis = session.analysis;
        });
        Ok(outcome)
    }

    /// Free-text ratio walkthrough of the session's statements. Not recorded in the conversation.
    pub async fn explain_ratios(&self, id: &SessionId) -> Result<String> {
        let documents = self.store.get(id).map(|s| s.documents).unwrap_or_default();
        self.assistant.explain_ratios(&documents).await
    }

    /// Overwrites one cell of the stored analysis and cascades with the configured policy.
    pub fn edit_cell(
        &self,
        id: &SessionId,
        row_index: usize,
        field: EditField,
        value: Decimal,
    ) -> Result<CascadeReport> {
        if self.store.get(id).and_then(|s| s.analysis).is_none() {
            return Err(AnalysisError::InputMissing(format!(
                "session {} has no analysis to edit",
                id
            )));
        }
        let policy = self.config.cascade;
        self.store.update(id, |session| match session.analysis.as_mut() {
            Some(analysis) => reconciler::edit_cell(analysis, row_index, field, value, policy),
            None => Err(AnalysisError::InputMissing(format!(
                "session {} has no analysis to edit",
                id
            ))),
        })
    }

    pub fn analysis(&self, id: &SessionId) -> Option<AnalysisResult> {
        self.store.get(id).and_then(|s| s.analysis)
    }

    pub fn conversation(&self, id: &SessionId) -> Vec<ChatMessage> {
        self.store
            .get(id)
            .map(|s| s.conversation)
            .unwrap_or_default()
    }

    pub fn clear_conversation(&self, id: &SessionId) {
        if self.store.get(id).is_some() {
            self.store.update(id, |s| s.conversation.clear());
        }
    }

    fn require_analysis(&self, id: &SessionId) -> Result<AnalysisResult> {
        self.analysis(id).ok_or_else(|| {
            AnalysisError::InputMissing(format!("session {} has no analysis yet", id))
        })
    }

    pub fn export_text(&self, id: &SessionId) -> Result<String> {
        Ok(render_text(&self.require_analysis(id)?, id.as_str()))
    }

    pub fn export_csv(&self, id: &SessionId) -> Result<String> {
        let analysis = self.require_analysis(id)?;
        let mut buffer = Vec::new();
        write_csv(&analysis, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| {
            AnalysisError::IoError(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })
    }

    /// Drops every piece of session state. Returns whether the session existed.
    pub fn end_session(&self, id: &SessionId) -> bool {
        self.store.delete(id)
    }
}

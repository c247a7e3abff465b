use crate::error::{AnalysisError, Result};
use crate::ingestion::{build_document_context, income_statement_text};
use crate::llm::prompts::{feedback_system_prompt, ratio_analysis_prompt, SYSTEM_PROMPT};
use crate::llm::service::{ReasoningRequest, ReasoningService};
use crate::reconciler::{apply_reply, PatchReport};
use crate::schema::{DocumentKind, DocumentText};
use crate::session::{ChatMessage, Session};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const DEFAULT_HISTORY_LIMIT: usize = 10;

/// Result of one feedback turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackOutcome {
    pub reply: String,
    /// Present when the reply carried an update block that was applied.
    pub patch: Option<PatchReport>,
    /// User-facing message when the update block could not be parsed.
    pub patch_error: Option<String>,
}

/// Conversational correction loop over a session's documents and analysis.
pub struct CorrectionAssistant {
    service: Arc<dyn ReasoningService>,
    history_limit: usize,
}

impl CorrectionAssistant {
    pub fn new(service: Arc<dyn ReasoningService>) -> Self {
        Self {
            service,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    /// Sends the user's message, records both turns and applies any suggested update.
    ///
    /// The session must hold at least one document.
    /// A malformed update block leaves the analysis untouched and is reported through
    /// [`FeedbackOutcome::patch_error`]. Service failures are returned as errors and leave
    /// the conversation unchanged.
    pub async fn send_feedback(&self, session: &mut Session, message: &str) -> Result<FeedbackOutcome> {
        let message = message.trim();
        if message.is_empty() {
            return Err(AnalysisError::InputMissing("feedback message is empty".to_string()));
        }
        if session.documents.is_empty() {
            return Err(AnalysisError::InputMissing(
                "no documents uploaded to discuss".to_string(),
            ));
        }

        let request = ReasoningRequest::new(feedback_system_prompt(session.analysis.as_ref()), message)
            .with_context(build_document_context(&session.documents))
            .with_history(session.recent_history(self.history_limit));

        let reply = self.service.reason(&request).await?;

        session.conversation.push(ChatMessage::user(message));
        session.conversation.push(ChatMessage::assistant(reply.clone()));

        let mut outcome = FeedbackOutcome {
            reply,
            patch: None,
            patch_error: None,
        };

        match session.analysis.as_mut() {
            Some(analysis) => match apply_reply(analysis, &outcome.reply) {
                Ok(report) => outcome.patch = report,
                Err(e) => {
                    warn!("Suggested update rejected: {}", e);
                    outcome.patch_error = Some(e.user_message());
                }
            },
            None => debug!("No analysis in session; update blocks are not applied"),
        }

        info!(
            "Feedback turn complete ({} messages in conversation)",
            session.conversation.len()
        );
        Ok(outcome)
    }

    /// Free-form ratio walkthrough of the income statements, with trial balances when present.
    pub async fn explain_ratios(&self, documents: &[DocumentText]) -> Result<String> {
        let income = income_statement_text(documents);
        if income.is_empty() {
            return Err(AnalysisError::InputMissing(
                "no income statement uploaded".to_string(),
            ));
        }
        let trial: Vec<&str> = documents
            .iter()
            .filter(|d| d.kind == DocumentKind::TrialBalance)
            .map(|d| d.content.as_str())
            .collect();
        let trial = trial.join("\n\n");

        let request = ReasoningRequest::new(
            SYSTEM_PROMPT.trim(),
            ratio_analysis_prompt(&income, Some(trial.as_str())),
        );
        self.service.reason(&request).await
    }
}

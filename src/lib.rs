//! # Statement Analyzer
//!
//! Turns uploaded income statements and trial balances into a validated two-period
//! financial model, a comparative table with margin ratios, and a narrative, then keeps
//! that analysis consistent through conversational and manual corrections.
//!
//! ## Core Concepts
//!
//! - **Canonical concepts**: fifteen fixed income-statement line items ([`ConceptKey`]) that key
//!   every period model and every comparative row
//! - **Reasoning service**: the external language model behind [`ReasoningService`]; its replies
//!   are parsed defensively and never trusted to be complete
//! - **Fallback chain**: reported value, then labeled statement line, then formula, then estimate
//! - **Degraded results**: static fallback data is returned as [`Degradable`] so callers can tell it
//!   apart from a genuine extraction
//! - **Patches**: `<UPDATED_DATA>{...}</UPDATED_DATA>` blocks in assistant replies, merged without
//!   touching unrelated rows
//!
//! ## Example
//!
//! ```rust,ignore
//! use statement_analyzer::*;
//! use std::sync::Arc;
//!
//! let config = AnalyzerConfig::from_env()?;
//! let analyzer = FinancialAnalyzer::new(Arc::new(GeminiClient::new(key)), config);
//! let session = SessionId::from("demo");
//!
//! analyzer.ingest(&session, &uploads).await;
//! let report = analyzer.generate_analysis(&session).await?;
//! println!("Gross margin: {}", report.analysis.ratios.gross_margin);
//!
//! let outcome = analyzer.send_feedback(&session, "Profit sharing tax is 3,000,000").await?;
//! println!("{}", analyzer.export_text(&session)?);
//! ```

pub mod analyzer;
pub mod config;
pub mod error;
pub mod export;
pub mod fallback;
pub mod ingestion;
pub mod llm;
pub mod normalizer;
pub mod ratios;
pub mod reconciler;
pub mod schema;
pub mod session;
pub mod utils;

pub use analyzer::{AnalysisReport, FinancialAnalyzer};
pub use config::AnalyzerConfig;
pub use error::{AnalysisError, Result, UpstreamError};
pub use export::{render_text, write_csv};
pub use fallback::{Provenance, ProvenanceMap};
pub use ingestion::{
    build_document_context, decode_batch, DocumentDecoder, DocumentFormat, IngestReport,
    PlainTextDecoder, RawUpload,
};
pub use llm::*;
pub use normalizer::normalize;
pub use ratios::{compare_rows, compute_ratios, percentage_change};
pub use reconciler::{
    apply_patch, apply_reply, edit_cell, extract_patch, AnalysisPatch, CascadePolicy,
    CascadeReport, EditField, PatchReport,
};
pub use schema::*;
pub use session::{ChatMessage, ChatRole, InMemorySessionStore, Session, SessionId, SessionStore};

use log::debug;

/// Assembles an [`AnalysisResult`] from a resolved period pair and its narrative.
///
/// A missing previous period is labeled `"N/A"`; its rows compare against zero.
/// Fails with [`AnalysisError::Overflow`] when an amount pair is out of decimal range.
pub fn assemble_analysis(pair: &PeriodPair, narrative: Narrative) -> Result<AnalysisResult> {
    let ratios = compute_ratios(&pair.current, pair.previous.as_ref())?;
    let comparative_data = compare_rows(&pair.current, pair.previous.as_ref())?;
    debug!(
        "Assembled {} comparative rows for period '{}'",
        comparative_data.len(),
        pair.current.period
    );

    Ok(AnalysisResult {
        current_period: pair.current.period.clone(),
        previous_period: pair
            .previous
            .as_ref()
            .map(|p| p.period.clone())
            .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
        executive_summary: narrative.executive_summary,
        ratios,
        comparative_data,
        recommendations: narrative.recommendations,
    })
}

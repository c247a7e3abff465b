//! Upload batches: format detection, concurrent decoding and the combined document context.
//!
//! The byte-level decoders (PDF text, spreadsheets, OCR) live outside this crate behind
//! [`DocumentDecoder`]. Every decoded text goes through [`normalize`] before it is stored.

use crate::error::{AnalysisError, Result};
use crate::normalizer::normalize;
use crate::schema::{DocumentKind, DocumentText};
use async_trait::async_trait;
use futures::future::join_all;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One uploaded file before decoding.
#[derive(Debug, Clone)]
pub struct RawUpload {
    pub original_name: String,
    /// MIME type declared by the client, if any.
    pub declared_mime: Option<String>,
    pub kind: DocumentKind,
    pub bytes: Vec<u8>,
}

impl RawUpload {
    pub fn new(original_name: impl Into<String>, kind: DocumentKind, bytes: Vec<u8>) -> Self {
        Self {
            original_name: original_name.into(),
            declared_mime: None,
            kind,
            bytes,
        }
    }

    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.declared_mime = Some(mime.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentFormat {
    Pdf,
    Spreadsheet,
    WordProcessor,
    Image,
    PlainText,
}

impl DocumentFormat {
    /// Classifies an upload from its declared MIME type, falling back to the file extension.
    pub fn detect(file_name: &str, declared_mime: Option<&str>) -> Result<(Self, String)> {
        let mime = declared_mime
            .map(str::to_string)
            .filter(|m| !m.is_empty() && m != "application/octet-stream")
            .or_else(|| {
                mime_guess::from_path(Path::new(file_name))
                    .first()
                    .map(|m| m.essence_str().to_string())
            })
            .ok_or_else(|| AnalysisError::Decode {
                file: file_name.to_string(),
                reason: "unknown file type".to_string(),
            })?;

        let format = Self::from_mime(&mime).ok_or_else(|| AnalysisError::Decode {
            file: file_name.to_string(),
            reason: format!("unsupported file type '{}'", mime),
        })?;
        Ok((format, mime))
    }

    fn from_mime(mime: &str) -> Option<Self> {
        let essence = mime.split(';').next().unwrap_or(mime).trim();
        match essence {
            "application/pdf" => Some(Self::Pdf),
            "application/vnd.ms-excel"
            | "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            | "text/csv" => Some(Self::Spreadsheet),
            "application/msword"
            | "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
                Some(Self::WordProcessor)
            }
            "text/plain" => Some(Self::PlainText),
            other if other.starts_with("image/") => Some(Self::Image),
            _ => None,
        }
    }
}

/// External text extraction for one file.
#[async_trait]
pub trait DocumentDecoder: Send + Sync {
    async fn decode(&self, format: DocumentFormat, upload: &RawUpload) -> Result<String>;
}

/// Decodes plain-text uploads only. Useful when the caller already holds extracted text.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextDecoder;

#[async_trait]
impl DocumentDecoder for PlainTextDecoder {
    async fn decode(&self, format: DocumentFormat, upload: &RawUpload) -> Result<String> {
        match format {
            DocumentFormat::PlainText => {
                String::from_utf8(upload.bytes.clone()).map_err(|e| AnalysisError::Decode {
                    file: upload.original_name.clone(),
                    reason: e.to_string(),
                })
            }
            other => Err(AnalysisError::Decode {
                file: upload.original_name.clone(),
                reason: format!("no decoder available for {:?}", other),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodeFailure {
    pub original_name: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestReport {
    pub documents: Vec<DocumentText>,
    pub failures: Vec<DecodeFailure>,
}

async fn decode_one(decoder: &dyn DocumentDecoder, upload: &RawUpload) -> Result<DocumentText> {
    let (format, mime) = DocumentFormat::detect(&upload.original_name, upload.declared_mime.as_deref())?;
    let raw = decoder.decode(format, upload).await?;
    let content = normalize(&raw);
    if content.is_empty() {
        return Err(AnalysisError::Decode {
            file: upload.original_name.clone(),
            reason: "no text could be extracted".to_string(),
        });
    }

    Ok(DocumentText {
        original_name: upload.original_name.clone(),
        mime_type: mime,
        kind: upload.kind,
        content,
    })
}

/// Decodes a batch concurrently. A failing file is recorded and never aborts its siblings;
/// successful documents keep the upload order.
pub async fn decode_batch(decoder: &dyn DocumentDecoder, uploads: &[RawUpload]) -> IngestReport {
    let results = join_all(uploads.iter().map(|upload| decode_one(decoder, upload))).await;

    let mut report = IngestReport::default();
    for (upload, result) in uploads.iter().zip(results) {
        match result {
            Ok(doc) => report.documents.push(doc),
            Err(e) => {
                warn!("Failed to decode '{}': {}", upload.original_name, e);
                let reason = match e {
                    AnalysisError::Decode { reason, .. } => reason,
                    other => other.to_string(),
                };
                report.failures.push(DecodeFailure {
                    original_name: upload.original_name.clone(),
                    reason,
                });
            }
        }
    }

    info!(
        "Decoded {} of {} uploaded documents",
        report.documents.len(),
        uploads.len()
    );
    report
}

/// Combined text sent to the reasoning service: income statements first, then trial balances.
pub fn build_document_context(documents: &[DocumentText]) -> String {
    let mut out = String::new();
    for kind in [DocumentKind::IncomeStatement, DocumentKind::TrialBalance] {
        let section: Vec<&DocumentText> = documents.iter().filter(|d| d.kind == kind).collect();
        if section.is_empty() {
            continue;
        }
        out.push_str(&format!("=== {} ===\n\n", kind.title().to_uppercase()));
        for (i, doc) in section.iter().enumerate() {
            out.push_str(&format!(
                "--- {} {}: {} ---\n{}\n\n",
                kind.title(),
                i + 1,
                doc.original_name,
                doc.content
            ));
        }
    }
    out.trim_end().to_string()
}

/// Text of the income-statement documents only, joined by blank lines.
pub fn income_statement_text(documents: &[DocumentText]) -> String {
    documents
        .iter()
        .filter(|d| d.kind == DocumentKind::IncomeStatement)
        .map(|d| d.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(name: &str, kind: DocumentKind, content: &str) -> DocumentText {
        DocumentText {
            original_name: name.into(),
            mime_type: "text/plain".into(),
            kind,
            content: content.into(),
        }
    }

    #[test]
    fn test_detect_from_declared_mime_and_extension() {
        let (format, mime) = DocumentFormat::detect("statement.pdf", None).unwrap();
        assert_eq!(format, DocumentFormat::Pdf);
        assert_eq!(mime, "application/pdf");

        let (format, _) = DocumentFormat::detect("scan", Some("image/png")).unwrap();
        assert_eq!(format, DocumentFormat::Image);

        let (format, _) = DocumentFormat::detect("tb.xlsx", Some("application/octet-stream")).unwrap();
        assert_eq!(format, DocumentFormat::Spreadsheet);

        let (format, _) = DocumentFormat::detect("notes.txt", None).unwrap();
        assert_eq!(format, DocumentFormat::PlainText);
    }

    #[test]
    fn test_detect_rejects_unsupported() {
        let err = DocumentFormat::detect("archive.zip", None).unwrap_err();
        assert!(matches!(err, AnalysisError::Decode { .. }));
        let err = DocumentFormat::detect("no_extension", None).unwrap_err();
        assert!(matches!(err, AnalysisError::Decode { .. }));
    }

    #[tokio::test]
    async fn test_decode_batch_isolates_failures() {
        let uploads = vec![
            RawUpload::new("er.txt", DocumentKind::IncomeStatement, b"Net sales   100\r\n\r\n\r\n\r\nCost of sales 60".to_vec()),
            RawUpload::new("scan.png", DocumentKind::IncomeStatement, vec![0x89, 0x50]),
            RawUpload::new("bad.txt", DocumentKind::TrialBalance, vec![0xff, 0xfe, 0x00]),
            RawUpload::new("bc.txt", DocumentKind::TrialBalance, b"Cash 10".to_vec()),
        ];

        let report = decode_batch(&PlainTextDecoder, &uploads).await;

        assert_eq!(report.documents.len(), 2);
        assert_eq!(report.documents[0].original_name, "er.txt");
        assert_eq!(report.documents[0].content, "Net sales 100\n\nCost of sales 60");
        assert_eq!(report.documents[1].kind, DocumentKind::TrialBalance);
        let failed: Vec<&str> = report.failures.iter().map(|f| f.original_name.as_str()).collect();
        assert_eq!(failed, vec!["scan.png", "bad.txt"]);
    }

    #[tokio::test]
    async fn test_empty_document_is_a_failure() {
        let uploads = vec![RawUpload::new("blank.txt", DocumentKind::IncomeStatement, b"  \n\n ".to_vec())];
        let report = decode_batch(&PlainTextDecoder, &uploads).await;
        assert!(report.documents.is_empty());
        assert_eq!(report.failures[0].reason, "no text could be extracted");
    }

    #[test]
    fn test_document_context_partitions_by_kind() {
        let docs = vec![
            doc("bc.xlsx", DocumentKind::TrialBalance, "Cash 10"),
            doc("er-2024.pdf", DocumentKind::IncomeStatement, "Net sales 100"),
            doc("er-2023.pdf", DocumentKind::IncomeStatement, "Net sales 90"),
        ];
        let context = build_document_context(&docs);

        let income = context.find("=== INCOME STATEMENT ===").unwrap();
        let trial = context.find("=== TRIAL BALANCE ===").unwrap();
        assert!(income < trial);
        assert!(context.contains("--- Income Statement 1: er-2024.pdf ---\nNet sales 100"));
        assert!(context.contains("--- Income Statement 2: er-2023.pdf ---"));
        assert!(context.contains("--- Trial Balance 1: bc.xlsx ---\nCash 10"));
    }

    #[test]
    fn test_income_statement_text_excludes_trial_balance() {
        let docs = vec![
            doc("bc", DocumentKind::TrialBalance, "Net sales 1"),
            doc("er", DocumentKind::IncomeStatement, "Net sales 2"),
        ];
        assert_eq!(income_statement_text(&docs), "Net sales 2");
        assert_eq!(build_document_context(&[]), "");
    }
}

//! Runs the whole pipeline against a canned reasoning service, without network access.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::json;
use statement_analyzer::*;
use std::sync::Mutex;
use std::sync::Arc;

struct Canned {
    replies: Mutex<Vec<String>>,
}

#[async_trait]
impl ReasoningService for Canned {
    async fn reason(&self, _request: &ReasoningRequest) -> Result<String> {
        let mut replies = self
            .replies
            .lock()
            .map_err(|_| AnalysisError::from(UpstreamError::Unavailable("poisoned".into())))?;
        if replies.is_empty() {
            return Err(UpstreamError::Unavailable("no more canned replies".into()).into());
        }
        Ok(replies.remove(0))
    }

    fn name(&self) -> &str {
        "canned"
    }
}

const STATEMENT: &str = "\
Concept                         2024           2023
Total operating income   857,757,604    835,413,197
Total operating expense  807,542,499    872,198,223
Net sales                840,561,188    822,495,316
Total income             857,757,604    835,413,197
Cost of sales            729,462,647    803,188,777
General expenses          78,079,852     69,009,446
Profit sharing tax         2,666,078      4,660,774
Fixed asset sale proceeds    452,532        676,527
Operating profit          50,215,105    -36,785,026
";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Only the figures the statement shows; the rest are filled in by the fallback rules.
    let extraction = json!({
        "current": { "period": "2024", "netSales": 840561188, "costOfSales": 729462647 },
        "previous": { "period": "2023", "netSales": "822,495,316" }
    });
    let correction = r#"Updated the profit sharing tax.
<UPDATED_DATA>{"comparativeData": [{"concept": "PTU", "current": 3000000}]}</UPDATED_DATA>"#;

    let service = Arc::new(Canned {
        replies: Mutex::new(vec![extraction.to_string(), "not json".into(), correction.into()]),
    });
    let analyzer = FinancialAnalyzer::new(service, AnalyzerConfig::default());
    let session = SessionId::from("offline");

    analyzer
        .ingest(
            &session,
            &[RawUpload::new("estado_resultados.txt", DocumentKind::IncomeStatement, STATEMENT.into())],
        )
        .await;

    let report = analyzer.generate_analysis(&session).await?;
    println!("Extraction degraded: {}", report.extraction_degraded);
    println!("Narrative degraded:  {}", report.narrative_degraded);
    for (key, source) in &report.provenance.current {
        println!("  {:<32} {:?}", key.label(), source);
    }

    let outcome = analyzer.send_feedback(&session, "PTU for 2024 is 3,000,000").await?;
    if let Some(patch) = outcome.patch {
        println!("\nCorrection touched {:?}", patch.rows_updated);
    }

    let income_row = analyzer
        .analysis(&session)
        .and_then(|a| a.comparative_data.iter().position(|r| r.key() == Some(ConceptKey::NetSales)))
        .ok_or_else(|| anyhow::anyhow!("income row missing"))?;
    let cascade = analyzer.edit_cell(&session, income_row, EditField::Current, Decimal::from(845_000_000))?;
    println!("Editing {} recomputed {:?}\n", cascade.edited, cascade.recomputed);

    println!("{}", analyzer.export_text(&session)?);
    Ok(())
}

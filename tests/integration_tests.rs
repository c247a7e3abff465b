use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use statement_analyzer::*;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Replies from a queue, then reports the service as unavailable.
struct Scripted {
    replies: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

impl Scripted {
    fn new(replies: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn offline() -> Arc<Self> {
        Self::new(Vec::new())
    }

    fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl ReasoningService for Scripted {
    async fn reason(&self, request: &ReasoningRequest) -> Result<String> {
        self.prompts.lock().unwrap().push(request.prompt.clone());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| UpstreamError::Unavailable("script exhausted".to_string()).into())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

const STATEMENT: &str = "\
ESTADO DE RESULTADOS
Concept                      FY2025         FY2024
Net sales               840,561,188    822,495,316
Cost of sales           729,462,647    803,188,777
Operating profit         50,215,105    -36,785,026
";

fn period(label: &str, model: &FinancialPeriodModel) -> Value {
    let mut value = serde_json::to_value(model).unwrap();
    value["period"] = json!(label);
    value
}

fn extraction_reply() -> String {
    let pair = fallback_pair();
    json!({
        "current": period("FY2025", &pair.current),
        "previous": period("FY2024", pair.previous.as_ref().unwrap()),
    })
    .to_string()
}

fn narrative_reply() -> String {
    json!({
        "executiveSummary": "Operating profit turned positive on lower cost of sales.",
        "recommendations": [
            "Lock in supplier pricing",
            "Review general expenses quarterly",
            "Grow higher-margin product lines",
            "Plan fixed asset disposals ahead of year end"
        ]
    })
    .to_string()
}

fn upload(name: &str, kind: DocumentKind, text: &str) -> RawUpload {
    RawUpload::new(name, kind, text.as_bytes().to_vec())
}

async fn analyzed(service: Arc<Scripted>, config: AnalyzerConfig) -> (FinancialAnalyzer, SessionId) {
    let analyzer = FinancialAnalyzer::new(service, config);
    let id = SessionId::from("session-1");
    let report = analyzer
        .ingest(&id, &[upload("er.txt", DocumentKind::IncomeStatement, STATEMENT)])
        .await;
    assert_eq!(report.documents.len(), 1);
    analyzer.generate_analysis(&id).await.unwrap();
    (analyzer, id)
}

#[tokio::test]
async fn test_end_to_end_genuine_analysis() {
    let service = Scripted::new(vec![extraction_reply(), narrative_reply()]);
    let analyzer = FinancialAnalyzer::new(service.clone(), AnalyzerConfig::default());
    let id = SessionId::from("genuine");

    let report = analyzer
        .ingest(
            &id,
            &[
                upload("er.txt", DocumentKind::IncomeStatement, STATEMENT),
                upload("tb.txt", DocumentKind::TrialBalance, "4000 Sales 840,561,188"),
            ],
        )
        .await;
    assert_eq!(report.documents.len(), 2);
    assert!(report.failures.is_empty());

    let report = analyzer.generate_analysis(&id).await.unwrap();
    assert!(!report.is_degraded());
    assert!(report.degraded_reasons.is_empty());
    assert_eq!(service.calls(), 2);

    let analysis = &report.analysis;
    assert_eq!(analysis.current_period, "FY2025");
    assert_eq!(analysis.previous_period, "FY2024");
    assert_eq!(analysis.comparative_data.len(), 15);
    assert_eq!(analysis.recommendations.len(), 4);
    assert_eq!(analysis.ratios.gross_margin, Metric::Value(dec!(13.0)));
    assert_eq!(analysis.ratios.gross_margin_change.as_deref(), Some("+10.6pp"));

    for row in &analysis.comparative_data {
        assert_eq!(row.variation, row.current - row.previous);
    }
    let gross = analysis.row(ConceptKey::GrossProfit).unwrap();
    let sales = analysis.row(ConceptKey::NetSales).unwrap();
    let cost = analysis.row(ConceptKey::CostOfSales).unwrap();
    assert_eq!(gross.current, sales.current - cost.current);
    assert_eq!(gross.previous, sales.previous - cost.previous);

    assert_eq!(analyzer.analysis(&id).as_ref(), Some(analysis));
}

#[tokio::test]
async fn test_offline_service_falls_back_to_reference_statement() {
    let service = Scripted::offline();
    let analyzer = FinancialAnalyzer::new(service.clone(), AnalyzerConfig::default());

    let first = SessionId::from("a");
    let second = SessionId::from("b");
    analyzer.add_documents(
        &first,
        vec![DocumentText {
            original_name: "a.txt".into(),
            mime_type: "text/plain".into(),
            kind: DocumentKind::IncomeStatement,
            content: "Net sales 1,000".into(),
        }],
    );
    analyzer.add_documents(
        &second,
        vec![DocumentText {
            original_name: "b.txt".into(),
            mime_type: "text/plain".into(),
            kind: DocumentKind::IncomeStatement,
            content: "Completely different statement".into(),
        }],
    );

    let a = analyzer.generate_analysis(&first).await.unwrap();
    let b = analyzer.generate_analysis(&second).await.unwrap();

    assert!(a.extraction_degraded);
    assert!(a.narrative_degraded);
    assert_eq!(a.degraded_reasons.len(), 2);
    assert_eq!(a.analysis, b.analysis);
    assert_eq!(a.analysis.current_period, "2024");
    assert_eq!(a.analysis.executive_summary, Narrative::fallback().executive_summary);
    assert_eq!(a.analysis.recommendations.len(), 5);
}

#[tokio::test]
async fn test_surface_policy_reports_unavailable_extraction() {
    let config = AnalyzerConfig {
        extraction_fallback: FallbackPolicy::Surface,
        ..AnalyzerConfig::default()
    };
    let analyzer = FinancialAnalyzer::new(Scripted::offline(), config);
    let id = SessionId::from("surface");
    analyzer
        .ingest(&id, &[upload("er.txt", DocumentKind::IncomeStatement, STATEMENT)])
        .await;

    let err = analyzer.generate_analysis(&id).await.unwrap_err();
    assert!(matches!(err, AnalysisError::ExtractionUnavailable { .. }));
    assert!(analyzer.analysis(&id).is_none());
}

#[tokio::test]
async fn test_generate_without_documents_is_input_missing() {
    let analyzer = FinancialAnalyzer::new(Scripted::offline(), AnalyzerConfig::default());
    let err = analyzer.generate_analysis(&SessionId::from("empty")).await.unwrap_err();
    assert!(matches!(err, AnalysisError::InputMissing(_)));
    assert!(err.is_client_error());
}

#[tokio::test]
async fn test_single_period_statement() {
    let pair = fallback_pair();
    let reply = json!({ "current": period("FY2025", &pair.current) }).to_string();
    let service = Scripted::new(vec![reply, narrative_reply()]);
    let (analyzer, id) = analyzed(service, AnalyzerConfig::default()).await;

    let analysis = analyzer.analysis(&id).unwrap();
    assert_eq!(analysis.current_period, "FY2025");
    assert_eq!(analysis.previous_period, "N/A");
    assert_eq!(analysis.ratios.sales_growth, Metric::Value(Decimal::ZERO));
    assert!(analysis.ratios.gross_margin_change.is_none());
    for row in &analysis.comparative_data {
        assert_eq!(row.previous, Decimal::ZERO);
        assert_eq!(row.percentage_change, Metric::Value(Decimal::ZERO));
    }
}

#[tokio::test]
async fn test_ingest_records_failures_without_aborting_batch() {
    let analyzer = FinancialAnalyzer::new(Scripted::offline(), AnalyzerConfig::default());
    let id = SessionId::from("mixed");

    let report = analyzer
        .ingest(
            &id,
            &[
                upload("scan.pdf", DocumentKind::IncomeStatement, "%PDF-1.7"),
                upload("er.txt", DocumentKind::IncomeStatement, STATEMENT),
                upload("blank.txt", DocumentKind::TrialBalance, "   \n\t "),
            ],
        )
        .await;

    assert_eq!(report.documents.len(), 1);
    assert_eq!(report.documents[0].original_name, "er.txt");
    let failed: Vec<&str> = report.failures.iter().map(|f| f.original_name.as_str()).collect();
    assert_eq!(failed, vec!["scan.pdf", "blank.txt"]);
}

#[tokio::test]
async fn test_feedback_patch_updates_matching_rows_only() {
    let patch_reply = r#"Thanks, the profit sharing tax was wrong.
<UPDATED_DATA>
{
  "ratios": { "netMargin": "6.1", "salesGrowth": "N/A", "bogus": 1 },
  "comparativeData": [
    { "concept": "Profit Sharing Tax", "current": "3,000,000", "previous": 4660774 },
    { "concept": "Dividends", "current": 10 }
  ]
}
</UPDATED_DATA>"#;
    let service = Scripted::new(vec![
        extraction_reply(),
        narrative_reply(),
        patch_reply.to_string(),
    ]);
    let (analyzer, id) = analyzed(service, AnalyzerConfig::default()).await;
    let before = analyzer.analysis(&id).unwrap();

    let outcome = analyzer
        .send_feedback(&id, "The profit sharing tax for FY2025 is 3,000,000")
        .await
        .unwrap();

    let patch = outcome.patch.unwrap();
    assert!(outcome.patch_error.is_none());
    assert_eq!(patch.rows_updated, vec!["Profit Sharing Tax".to_string()]);
    assert_eq!(patch.unmatched_concepts, vec!["Dividends".to_string()]);
    assert_eq!(patch.ratios_ignored, vec!["bogus".to_string()]);

    let after = analyzer.analysis(&id).unwrap();
    assert_eq!(after.ratios.net_margin, Metric::Value(dec!(6.1)));
    assert_eq!(after.ratios.sales_growth, Metric::NotAvailable);
    assert_eq!(after.ratios.gross_margin, before.ratios.gross_margin);

    let tax = after.row(ConceptKey::ProfitSharingTax).unwrap();
    assert_eq!(tax.current, dec!(3000000));
    assert_eq!(tax.variation, dec!(3000000) - dec!(4660774));
    for (old, new) in before.comparative_data.iter().zip(&after.comparative_data) {
        if old.concept != "Profit Sharing Tax" {
            assert_eq!(old, new);
        }
    }

    let conversation = analyzer.conversation(&id);
    assert_eq!(conversation.len(), 2);
    assert_eq!(conversation[0].role, ChatRole::User);
    assert_eq!(conversation[1].role, ChatRole::Assistant);
}

#[tokio::test]
async fn test_feedback_with_broken_update_block_keeps_analysis() {
    let reply = "Here you go <UPDATED_DATA>{ not json }</UPDATED_DATA>";
    let service = Scripted::new(vec![extraction_reply(), narrative_reply(), reply.to_string()]);
    let (analyzer, id) = analyzed(service, AnalyzerConfig::default()).await;
    let before = analyzer.analysis(&id).unwrap();

    let outcome = analyzer.send_feedback(&id, "Fix it").await.unwrap();
    assert!(outcome.patch.is_none());
    assert!(outcome.patch_error.is_some());
    assert_eq!(analyzer.analysis(&id).unwrap(), before);
    assert_eq!(analyzer.conversation(&id).len(), 2);
}

#[tokio::test]
async fn test_feedback_failure_leaves_conversation_empty() {
    let service = Scripted::new(vec![extraction_reply(), narrative_reply()]);
    let (analyzer, id) = analyzed(service, AnalyzerConfig::default()).await;

    let err = analyzer.send_feedback(&id, "Is gross margin right?").await.unwrap_err();
    assert!(err.is_upstream_failure());
    assert!(analyzer.conversation(&id).is_empty());

    let err = analyzer
        .send_feedback(&SessionId::from("nobody"), "hello")
        .await
        .unwrap_err();
    assert!(matches!(err, AnalysisError::InputMissing(_)));
}

#[tokio::test]
async fn test_feedback_without_documents_is_input_missing() {
    let service = Scripted::new(vec!["Sure, what would you like to check?".to_string()]);
    let analyzer = FinancialAnalyzer::new(service.clone(), AnalyzerConfig::default());
    let id = SessionId::from("no-files");

    let blank = DocumentText {
        original_name: "blank.txt".into(),
        mime_type: "text/plain".into(),
        kind: DocumentKind::IncomeStatement,
        content: " \n\t ".into(),
    };
    assert_eq!(analyzer.add_documents(&id, vec![blank]), 0);

    let err = analyzer.send_feedback(&id, "Is the tax right?").await.unwrap_err();
    assert!(matches!(err, AnalysisError::InputMissing(_)));
    assert!(err.is_client_error());
    assert_eq!(service.calls(), 0);
    assert!(analyzer.conversation(&id).is_empty());
}

#[tokio::test]
async fn test_out_of_range_patch_is_reported_and_ignored() {
    let reply = r#"Updated.
<UPDATED_DATA>{"comparativeData": [{"concept": "Gross Profit",
  "current": "79000000000000000000000000000",
  "previous": "-79000000000000000000000000000"}]}</UPDATED_DATA>"#;
    let service = Scripted::new(vec![extraction_reply(), narrative_reply(), reply.to_string()]);
    let (analyzer, id) = analyzed(service, AnalyzerConfig::default()).await;
    let before = analyzer.analysis(&id).unwrap();

    let outcome = analyzer.send_feedback(&id, "Gross profit is huge").await.unwrap();

    assert!(outcome.patch.is_none());
    assert!(outcome.patch_error.unwrap().contains("Gross Profit"));
    assert_eq!(analyzer.analysis(&id).unwrap(), before);
    assert_eq!(analyzer.conversation(&id).len(), 2);
}

#[tokio::test]
async fn test_edit_after_patch_restores_gross_profit() {
    let reply = r#"Adjusted.
<UPDATED_DATA>{"comparativeData": [{"concept": "Gross Profit", "current": 1}]}</UPDATED_DATA>"#;
    let service = Scripted::new(vec![extraction_reply(), narrative_reply(), reply.to_string()]);
    let (analyzer, id) = analyzed(service, AnalyzerConfig::default()).await;

    analyzer.send_feedback(&id, "Set gross profit to 1").await.unwrap();
    let patched = analyzer.analysis(&id).unwrap();
    assert_eq!(patched.row(ConceptKey::GrossProfit).unwrap().current, dec!(1));

    let expenses = patched
        .comparative_data
        .iter()
        .position(|r| r.key() == Some(ConceptKey::GeneralExpenses))
        .unwrap();
    let report = analyzer
        .edit_cell(&id, expenses, EditField::Current, dec!(78000000))
        .unwrap();

    assert!(report.recomputed.contains(&"Gross Profit".to_string()));
    let after = analyzer.analysis(&id).unwrap();
    assert_eq!(after.row(ConceptKey::GrossProfit).unwrap().current, dec!(111098541));
    assert_eq!(after.row(ConceptKey::GeneralExpenses).unwrap().current, dec!(78000000));
}

#[tokio::test]
async fn test_edit_income_cascades_current_column_only() {
    let service = Scripted::new(vec![extraction_reply(), narrative_reply()]);
    let (analyzer, id) = analyzed(service, AnalyzerConfig::default()).await;
    let before = analyzer.analysis(&id).unwrap();
    let income_index = before
        .comparative_data
        .iter()
        .position(|r| r.key() == Some(ConceptKey::NetSales))
        .unwrap();

    let report = analyzer
        .edit_cell(&id, income_index, EditField::Current, dec!(850000000))
        .unwrap();
    assert_eq!(report.edited, "Income");
    assert!(report.recomputed.contains(&"Gross Profit".to_string()));
    assert!(report.recomputed.contains(&"Fixed Asset Gain".to_string()));
    assert!(!report.recomputed.contains(&"Operating Profit".to_string()));

    let after = analyzer.analysis(&id).unwrap();
    let gross = after.row(ConceptKey::GrossProfit).unwrap();
    let old_gross = before.row(ConceptKey::GrossProfit).unwrap();
    assert_eq!(gross.current, dec!(850000000) - dec!(729462647));
    assert_eq!(gross.previous, old_gross.previous);
    assert_eq!(gross.variation, gross.current - gross.previous);

    let gain = after.row(ConceptKey::FixedAssetGain).unwrap();
    assert_eq!(gain.current, dec!(857757604) - dec!(850000000));
    assert_eq!(
        after.row(ConceptKey::OperatingProfit),
        before.row(ConceptKey::OperatingProfit)
    );
}

#[tokio::test]
async fn test_full_cascade_recomputes_operating_profit() {
    let config = AnalyzerConfig {
        cascade: CascadePolicy::Full,
        ..AnalyzerConfig::default()
    };
    let service = Scripted::new(vec![extraction_reply(), narrative_reply()]);
    let (analyzer, id) = analyzed(service, config).await;
    let expense_index = analyzer
        .analysis(&id)
        .unwrap()
        .comparative_data
        .iter()
        .position(|r| r.key() == Some(ConceptKey::TotalOperatingExpense))
        .unwrap();

    analyzer
        .edit_cell(&id, expense_index, EditField::Previous, dec!(800000000))
        .unwrap();

    let after = analyzer.analysis(&id).unwrap();
    let operating = after.row(ConceptKey::OperatingProfit).unwrap();
    assert_eq!(operating.previous, dec!(835413197) - dec!(800000000));
    assert_eq!(operating.current, dec!(50215105));
}

#[tokio::test]
async fn test_edit_rejects_unknown_row_and_missing_analysis() {
    let service = Scripted::new(vec![extraction_reply(), narrative_reply()]);
    let (analyzer, id) = analyzed(service, AnalyzerConfig::default()).await;

    let err = analyzer.edit_cell(&id, 99, EditField::Current, dec!(1)).unwrap_err();
    assert!(matches!(err, AnalysisError::InvalidEdit(_)));

    let err = analyzer
        .edit_cell(&SessionId::from("other"), 0, EditField::Current, dec!(1))
        .unwrap_err();
    assert!(matches!(err, AnalysisError::InputMissing(_)));
}

#[tokio::test]
async fn test_exports_and_end_session() {
    let service = Scripted::new(vec![extraction_reply(), narrative_reply()]);
    let (analyzer, id) = analyzed(service, AnalyzerConfig::default()).await;

    let text = analyzer.export_text(&id).unwrap();
    assert!(text.starts_with("FINANCIAL ANALYSIS - SESSION session-1"));
    assert!(text.contains("Periods: FY2025 vs FY2024"));
    assert!(text.contains("1. Lock in supplier pricing"));

    let csv = analyzer.export_csv(&id).unwrap();
    assert_eq!(csv.lines().count(), 16);
    assert!(csv.lines().any(|l| l.starts_with("Gross Profit,111098541,19306539,")));

    assert!(analyzer.end_session(&id));
    assert!(!analyzer.end_session(&id));
    assert!(analyzer.analysis(&id).is_none());
    assert!(analyzer.conversation(&id).is_empty());
    assert!(matches!(
        analyzer.export_text(&id).unwrap_err(),
        AnalysisError::InputMissing(_)
    ));
}

#[tokio::test]
async fn test_clear_conversation_keeps_analysis() {
    let service = Scripted::new(vec![
        extraction_reply(),
        narrative_reply(),
        "Gross margin looks right to me.".to_string(),
        "Gross margin is 13.0% of total income.".to_string(),
    ]);
    let (analyzer, id) = analyzed(service, AnalyzerConfig::default()).await;

    let outcome = analyzer.send_feedback(&id, "Check gross margin").await.unwrap();
    assert!(outcome.patch.is_none());
    assert_eq!(analyzer.conversation(&id).len(), 2);

    analyzer.clear_conversation(&id);
    assert!(analyzer.conversation(&id).is_empty());
    assert!(analyzer.analysis(&id).is_some());

    let explanation = analyzer.explain_ratios(&id).await.unwrap();
    assert!(explanation.starts_with("Gross margin is 13.0%"));
    assert!(analyzer.conversation(&id).is_empty());
}

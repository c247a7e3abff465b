use dotenv::dotenv;
use statement_analyzer::*;
use std::error::Error;

/// Usage: analyze_statement <income-statement> [more files...]
/// Files whose name contains "balanza" or "trial" are treated as trial balances.
fn load_uploads() -> std::result::Result<Vec<RawUpload>, Box<dyn Error>> {
    let paths: Vec<String> = std::env::args().skip(1).collect();
    if paths.is_empty() {
        return Err("pass at least one income statement text file".into());
    }

    let mut uploads = Vec::with_capacity(paths.len());
    for path in &paths {
        let bytes = std::fs::read(path)?;
        let lower = path.to_lowercase();
        let kind = if lower.contains("balanza") || lower.contains("trial") {
            DocumentKind::TrialBalance
        } else {
            DocumentKind::IncomeStatement
        };
        let name = std::path::Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.clone());
        uploads.push(RawUpload::new(name, kind, bytes));
    }
    Ok(uploads)
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn Error>> {
    dotenv().ok();

    let config = AnalyzerConfig::from_env()?;
    println!("📊 Statement analysis with {}\n", config.model);
    let analyzer = FinancialAnalyzer::from_config(config)?;
    let session = SessionId::from("cli");

    let uploads = load_uploads()?;
    let ingest = analyzer.ingest(&session, &uploads).await;
    println!("✅ Decoded {} document(s)", ingest.documents.len());
    for failure in &ingest.failures {
        println!("⚠️  {}: {}", failure.original_name, failure.reason);
    }

    let report = analyzer.generate_analysis(&session).await?;
    if report.extraction_degraded {
        println!("⚠️  Extraction failed; showing the reference statement instead.");
    }
    for reason in &report.degraded_reasons {
        println!("   reason: {}", reason);
    }

    println!("\n{}", analyzer.export_text(&session)?);

    std::fs::write("analysis.csv", analyzer.export_csv(&session)?)?;
    println!("💾 Comparative table written to analysis.csv");

    analyzer.end_session(&session);
    Ok(())
}

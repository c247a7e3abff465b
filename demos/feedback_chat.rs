use dotenv::dotenv;
use statement_analyzer::*;
use std::error::Error;
use std::io::{self, Write};

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn Error>> {
    dotenv().ok();

    let path = std::env::args()
        .nth(1)
        .ok_or("pass the income statement text file to discuss")?;
    let text = std::fs::read(&path)?;

    let analyzer = FinancialAnalyzer::from_config(AnalyzerConfig::from_env()?)?;
    let session = SessionId::from("chat");
    analyzer
        .ingest(&session, &[RawUpload::new(path.clone(), DocumentKind::IncomeStatement, text)])
        .await;

    println!("📊 Generating analysis...");
    let report = analyzer.generate_analysis(&session).await?;
    println!(
        "Periods {} vs {}, gross margin {}\n",
        report.analysis.current_period, report.analysis.previous_period, report.analysis.ratios.gross_margin
    );

    println!("💬 Describe corrections (type 'show' for the report, 'quit' to exit).");
    println!("------------------------------------------------------------------");

    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        let message = input.trim();

        if message.eq_ignore_ascii_case("quit") || message.eq_ignore_ascii_case("exit") {
            break;
        }
        if message.eq_ignore_ascii_case("show") {
            println!("{}", analyzer.export_text(&session)?);
            continue;
        }
        if message.is_empty() {
            continue;
        }

        match analyzer.send_feedback(&session, message).await {
            Ok(outcome) => {
                println!("\n{}\n", outcome.reply);
                if let Some(patch) = outcome.patch {
                    println!(
                        "✏️  Updated rows {:?}, ratios {:?}",
                        patch.rows_updated, patch.ratios_updated
                    );
                    if !patch.unmatched_concepts.is_empty() {
                        println!("   No row matched {:?}", patch.unmatched_concepts);
                    }
                }
                if let Some(error) = outcome.patch_error {
                    println!("⚠️  {}", error);
                }
            }
            Err(e) => println!("❌ {}", e.user_message()),
        }
    }

    analyzer.end_session(&session);
    Ok(())
}

//! Plain-text and CSV renderings of an analysis, for document generation and spreadsheets.

use crate::error::Result;
use crate::schema::{AnalysisResult, Metric};
use crate::utils::round_one;
use rust_decimal::Decimal;
use std::io::Write;

fn format_amount(value: Decimal) -> String {
    let rounded = value.round_dp(2).normalize();
    let text = rounded.abs().to_string();
    let (integer, fraction) = match text.split_once('.') {
        Some((i, f)) => (i.to_string(), Some(f.to_string())),
        None => (text, None),
    };

    let digits: Vec<char> = integer.chars().collect();
    let mut grouped = String::new();
    for (i, c) in digits.iter().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(*c);
    }

    let sign = if rounded.is_sign_negative() && !rounded.is_zero() { "-" } else { "" };
    match fraction {
        Some(f) => format!("{}{}.{}", sign, grouped, f),
        None => format!("{}{}", sign, grouped),
    }
}

fn format_percent(metric: &Metric) -> String {
    match metric {
        Metric::Value(v) => format!("{:.1}%", round_one(*v)),
        Metric::NotAvailable => metric.to_string(),
    }
}

fn ratio_line(out: &mut String, label: &str, metric: &Metric, change: Option<&str>) {
    out.push_str(&format!("- {}: {}", label, format_percent(metric)));
    if let Some(change) = change {
        out.push_str(&format!(" ({} vs previous period)", change));
    }
    out.push('\n');
}

/// Report text handed to the document-generation step.
pub fn render_text(result: &AnalysisResult, session_id: &str) -> String {
    let mut out = format!("FINANCIAL ANALYSIS - SESSION {}\n", session_id);
    out.push_str(&format!(
        "Periods: {} vs {}\n\n",
        result.current_period, result.previous_period
    ));

    out.push_str("EXECUTIVE SUMMARY\n");
    out.push_str(result.executive_summary.trim());
    out.push_str("\n\nFINANCIAL RATIOS\n");
    let ratios = &result.ratios;
    ratio_line(&mut out, "Gross Margin", &ratios.gross_margin, ratios.gross_margin_change.as_deref());
    ratio_line(
        &mut out,
        "Operating Margin",
        &ratios.operating_margin,
        ratios.operating_margin_change.as_deref(),
    );
    ratio_line(&mut out, "Net Margin", &ratios.net_margin, ratios.net_margin_change.as_deref());
    ratio_line(&mut out, "Sales Growth", &ratios.sales_growth, None);

    out.push_str("\nCOMPARATIVE TABLE\n");
    out.push_str(&format!(
        "{:<28} {:>16} {:>16} {:>16} {:>9}\n",
        "Concept", result.current_period, result.previous_period, "Variation", "Change"
    ));
    for row in &result.comparative_data {
        out.push_str(&format!(
            "{:<28} {:>16} {:>16} {:>16} {:>9}\n",
            row.concept,
            format_amount(row.current),
            format_amount(row.previous),
            format_amount(row.variation),
            format_percent(&row.percentage_change)
        ));
    }

    out.push_str("\nRECOMMENDATIONS\n");
    for (i, recommendation) in result.recommendations.iter().enumerate() {
        out.push_str(&format!("{}. {}\n", i + 1, recommendation));
    }
    out
}

/// Writes the comparative table as CSV with a header row.
pub fn write_csv<W: Write>(result: &AnalysisResult, writer: W) -> Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(["concept", "current", "previous", "variation", "percentageChange"])?;
    for row in &result.comparative_data {
        csv.write_record([
            row.concept.clone(),
            row.current.normalize().to_string(),
            row.previous.normalize().to_string(),
            row.variation.normalize().to_string(),
            row.percentage_change.to_string(),
        ])?;
    }
    csv.flush()?;
    Ok(())
}

// Prompts for extraction, narrative and feedback calls.
//
// The `<UPDATED_DATA>` block described in FEEDBACK_PROTOCOL is parsed by
// `crate::reconciler`; keep the delimiter and JSON shape in sync with it.

use crate::ingestion::build_document_context;
use crate::schema::{AnalysisResult, ConceptKey, DocumentText, PeriodPair, RatioSet};

pub const SYSTEM_PROMPT: &str = r#"
You are an expert financial analyst specializing in income statements and accounting analysis.
Your job is to help analyze financial documents and answer questions about them.

## CAPABILITIES
- Detailed income statement analysis
- Trial balance interpretation
- Financial ratio calculation
- Trend and pattern identification
- Data-driven recommendations

## INSTRUCTIONS
1. Always base answers on the provided documents.
2. If there is not enough information, say so clearly.
3. Show step-by-step calculations when relevant.
4. Use precise accounting terminology.
5. Include practical interpretations of the numbers.
6. Point out areas for improvement or attention when appropriate.

## LIMITATIONS
- Only analyze information present in the documents.
- Do not make assumptions about data that was not provided.
- If you find inconsistencies, point them out.

Keep a professional but accessible tone.
"#;

pub const FEEDBACK_PROTOCOL: &str = r#"
## CORRECTIONS
If the user asks for corrections or changes to the financial data, finish your reply with the
corrected values as JSON inside this exact block:

<UPDATED_DATA>{"ratios": {...}, "comparativeData": [...]}</UPDATED_DATA>

- `ratios` may contain any of: grossMargin, grossMarginChange, operatingMargin,
  operatingMarginChange, netMargin, netMarginChange, salesGrowth. Use numbers, or "N/A".
- `comparativeData` entries must use the exact `concept` label of the row being corrected and
  may contain `current`, `previous` and `percentageChange`.
- Only include the fields that change. Omit the block entirely when nothing changes.
"#;

fn field_instruction(key: ConceptKey) -> &'static str {
    match key {
        ConceptKey::TotalOperatingIncome => {
            "LOOK FOR \"Total Operating Income\" directly. IF ABSENT: net sales + other income lines. EXAMPLE: 857,757,604"
        }
        ConceptKey::TotalOperatingExpense => {
            "LOOK FOR \"Total Operating Expenses\" directly. IF ABSENT: cost of sales + general expenses + profit sharing tax + other operating expenses. EXAMPLE: 807,542,499"
        }
        ConceptKey::NetSales => {
            "LOOK FOR \"Net sales\" as the main line. IF ABSENT: use the highest income figure found. EXAMPLE: 840,561,188"
        }
        ConceptKey::FixedAssetGain => {
            "LOOK FOR a gain on fixed assets in the non-operating sections. IF ABSENT: total income - net sales. Never use 0 without trying to compute it."
        }
        ConceptKey::TotalIncome => {
            "LOOK FOR \"Total income\" or the line summing all income. IF ABSENT: net sales + other income + any additional income. EXAMPLE: 857,757,604"
        }
        ConceptKey::CostOfSales => {
            "LOOK FOR \"Cost of sales\" exactly. IF ABSENT: take the largest line under \"Costs and expenses\". EXAMPLE: 729,462,647"
        }
        ConceptKey::GrossProfit => {
            "ALWAYS COMPUTE: net sales - cost of sales. EXAMPLE: 840,561,188 - 729,462,647 = 111,098,541"
        }
        ConceptKey::GeneralExpenses => {
            "LOOK FOR \"Selling, general and administrative expenses\". IF ABSENT: total operating expenses - cost of sales - profit sharing tax. EXAMPLE: 78,079,852"
        }
        ConceptKey::ProfitSharingTax => {
            "LOOK FOR \"Income taxes\" exactly, then any line mentioning tax or profit sharing. ONLY IF NOTHING EXISTS: estimate 3% of pre-tax profit. EXAMPLE: 2,666,078"
        }
        ConceptKey::FixedAssetLoss => {
            "LOOK FOR a loss on fixed assets. IF ABSENT: absolute value of the fixed asset net result when it is negative, otherwise 0."
        }
        ConceptKey::TotalOperatingExpenseDetail => {
            "LOOK FOR \"Total operating costs\" directly. IF ABSENT: cost of sales + general expenses + profit sharing tax + other expenses. EXAMPLE: 807,542,499"
        }
        ConceptKey::FixedAssetSaleProceeds => {
            "LOOK FOR proceeds from selling fixed assets. IF ABSENT: the positive part of the fixed asset net result."
        }
        ConceptKey::FixedAssetCost => {
            "LOOK FOR the cost of fixed assets sold. IF ABSENT: fixed asset sale proceeds - fixed asset net result."
        }
        ConceptKey::FixedAssetNetResult => {
            "LOOK FOR \"Other comprehensive income\" specifically. IF ABSENT: fixed asset sale proceeds - fixed asset cost. EXAMPLE: 452,532"
        }
        ConceptKey::OperatingProfit => {
            "LOOK FOR \"Operating profit (loss)\" exactly. IF ABSENT: total operating income - total operating expenses. EXAMPLE: 50,215,105"
        }
    }
}

fn period_shape(year: &str) -> String {
    let fields: Vec<String> = ConceptKey::ALL
        .iter()
        .map(|key| format!("    \"{}\": number", key.json_key()))
        .collect();
    format!("{{\n{},\n    \"period\": \"{}\"\n  }}", fields.join(",\n"), year)
}

fn document_manifest(documents: &[DocumentText]) -> String {
    let mut manifest = String::from("### DOCUMENT MANIFEST\n");
    for (i, doc) in documents.iter().enumerate() {
        manifest.push_str(&format!(
            "{}. \"{}\" ({})\n",
            i + 1,
            doc.original_name,
            doc.kind.title()
        ));
    }
    manifest
}

/// Single combined extraction prompt covering every uploaded document.
pub fn extraction_prompt(documents: &[DocumentText]) -> String {
    let mut instructions = String::new();
    for (i, key) in ConceptKey::ALL.iter().enumerate() {
        instructions.push_str(&format!(
            "{}. **{}** (`{}`): {}\n",
            i + 1,
            key.label(),
            key.json_key(),
            field_instruction(*key)
        ));
    }

    format!(
        "Analyze the following financial documents and extract or compute the numeric data as JSON, \
following EXACTLY the structure below.\n\n\
{manifest}\n\
### DOCUMENTS\n{context}\n\n\
### CALCULATION INSTRUCTIONS (NEVER USE 0, ALWAYS COMPUTE)\n{instructions}\n\
CRITICAL RULE: never return 0 for a field before trying at least three different ways of computing it.\n\n\
### REQUIRED JSON STRUCTURE\n\
{{\n  \"current\": {current},\n  \"previous\": {previous}\n}}\n\
Omit \"previous\" only when the documents report a single period.\n\n\
### WORKED EXAMPLES\n\
- Fixed asset gain 2024: 857,757,604 - 840,561,188 = 17,196,416 (total income minus net sales)\n\
- Fixed asset gain 2023: 835,413,197 - 822,495,316 = 12,917,881\n\
- Fixed asset loss: absolute value of the fixed asset net result if negative, otherwise 0.\n\
- Fixed asset sale proceeds: \"Other comprehensive income\" when positive. 2024: 452,532. 2023: 676,527.\n\
- Fixed asset cost: sale proceeds - net result. 2024: 452,532 - 452,532 = 0 (a computed zero, not a missing value).\n\n\
ABSOLUTE RULE: DO NOT USE 0 UNLESS IT IS THE RESULT OF A SPECIFIC CALCULATION.\n",
        manifest = document_manifest(documents),
        context = build_document_context(documents),
        instructions = instructions,
        current = period_shape("2024"),
        previous = period_shape("2023"),
    )
}

/// Narrative request over the resolved figures and computed ratios.
pub fn narrative_prompt(pair: &PeriodPair, ratios: &RatioSet) -> String {
    let current = serde_json::to_string_pretty(&pair.current).unwrap_or_default();
    let previous = pair
        .previous
        .as_ref()
        .and_then(|p| serde_json::to_string_pretty(p).ok())
        .unwrap_or_else(|| "not reported".to_string());
    let ratios = serde_json::to_string_pretty(ratios).unwrap_or_default();

    format!(
        "As an expert financial analyst, write an executive summary and recommendations based on this data.\n\n\
### FINANCIAL DATA\nCurrent period: {current}\nPrevious period: {previous}\n\n\
### COMPUTED RATIOS\n{ratios}\n\n\
Produce:\n\
1. An executive summary of 2-3 paragraphs on financial performance.\n\
2. 4-5 specific strategic recommendations.\n\n\
Reply in JSON:\n\
{{\n  \"executiveSummary\": \"summary text...\",\n  \"recommendations\": [\"recommendation 1\", \"recommendation 2\", ...]\n}}\n"
    )
}

/// System instructions for the feedback loop, including the live analysis the user sees.
pub fn feedback_system_prompt(analysis: Option<&AnalysisResult>) -> String {
    let mut prompt = format!("{}\n{}", SYSTEM_PROMPT.trim(), FEEDBACK_PROTOCOL);
    if let Some(analysis) = analysis {
        let rows: Vec<String> = analysis
            .comparative_data
            .iter()
            .map(|row| {
                format!(
                    "- {}: current {}, previous {}, variation {}, change {}%",
                    row.concept, row.current, row.previous, row.variation, row.percentage_change
                )
            })
            .collect();
        prompt.push_str(&format!(
            "\n## CURRENT ANALYSIS ({} vs {})\n\
Gross margin {}% ({}), operating margin {}% ({}), net margin {}% ({}), sales growth {}%.\n\n\
{}\n",
            analysis.current_period,
            analysis.previous_period,
            analysis.ratios.gross_margin,
            analysis.ratios.gross_margin_change.as_deref().unwrap_or("n/a"),
            analysis.ratios.operating_margin,
            analysis.ratios.operating_margin_change.as_deref().unwrap_or("n/a"),
            analysis.ratios.net_margin,
            analysis.ratios.net_margin_change.as_deref().unwrap_or("n/a"),
            analysis.ratios.sales_growth,
            rows.join("\n"),
        ));
    }
    prompt
}

/// Free-form ratio walkthrough over raw statement text.
pub fn ratio_analysis_prompt(income_statement: &str, trial_balance: Option<&str>) -> String {
    let trial = trial_balance
        .filter(|t| !t.trim().is_empty())
        .map(|t| format!("TRIAL BALANCE:\n{}\n\n", t))
        .unwrap_or_default();
    format!(
        "Analyze the following financial data and compute the most important ratios:\n\n\
INCOME STATEMENT:\n{}\n\n{}\
Compute and explain:\n\
1. Gross margin\n\
2. Operating margin\n\
3. Net margin\n\
4. Relevant efficiency ratios\n\
5. Cost structure analysis\n\n\
Give a practical interpretation of each ratio.",
        income_statement, trial
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::DocumentKind;

    fn docs() -> Vec<DocumentText> {
        vec![DocumentText {
            original_name: "er-2024.pdf".into(),
            mime_type: "application/pdf".into(),
            kind: DocumentKind::IncomeStatement,
            content: "Net sales 840,561,188 822,495,316".into(),
        }]
    }

    #[test]
    fn test_extraction_prompt_covers_every_field() {
        let prompt = extraction_prompt(&docs());
        for key in ConceptKey::ALL {
            assert!(prompt.contains(key.json_key()), "missing {}", key.json_key());
        }
        assert!(prompt.contains("1. \"er-2024.pdf\" (Income Statement)"));
        assert!(prompt.contains("Net sales 840,561,188 822,495,316"));
        assert!(prompt.contains("\"previous\""));
    }

    #[test]
    fn test_feedback_prompt_carries_update_protocol() {
        let prompt = feedback_system_prompt(None);
        assert!(prompt.contains("<UPDATED_DATA>"));
        assert!(prompt.contains("</UPDATED_DATA>"));
        assert!(!prompt.contains("CURRENT ANALYSIS"));
    }

    #[test]
    fn test_ratio_prompt_skips_empty_trial_balance() {
        let prompt = ratio_analysis_prompt("Net sales 10", Some("  "));
        assert!(!prompt.contains("TRIAL BALANCE"));
        let prompt = ratio_analysis_prompt("Net sales 10", Some("Cash 5"));
        assert!(prompt.contains("TRIAL BALANCE:\nCash 5"));
    }
}

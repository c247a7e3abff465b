use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::Value;
use std::str::FromStr;

static AMOUNT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\(?-?\$?\s*\d[\d,]*(?:\.\d+)?\)?").expect("amount pattern is valid")
});

/// Returns the first balanced `{...}` object in `text`, ignoring braces inside JSON strings.
pub fn extract_first_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (offset, c) in text[start..].char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }

        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            _ if in_string => {}
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parses a statement amount such as `1,234.50`, `$ 840,561,188`, `-36,785,026` or `(2,500)`.
pub fn parse_amount(raw: &str) -> Option<Decimal> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let negative_parens = trimmed.starts_with('(') && trimmed.ends_with(')');
    let cleaned: String = trimmed
        .chars()
        .filter(|c| !matches!(c, ',' | '$' | '(' | ')' | ' ' | '\u{a0}'))
        .collect();

    let value = Decimal::from_str(&cleaned).ok()?;
    Some(if negative_parens { -value } else { value })
}

/// A bare four digit token in 1900..=2100, as in a `2024 2023` column header.
fn is_bare_year(token: &str) -> bool {
    let token = token.trim();
    token.len() == 4
        && token.bytes().all(|b| b.is_ascii_digit())
        && token
            .parse::<u16>()
            .map(|year| (1900..=2100).contains(&year))
            .unwrap_or(false)
}

/// All amounts appearing in a line, in order of appearance.
///
/// Bare years are column headings, not amounts: they are dropped when the line carries other
/// amounts, and a line holding nothing but two or more years yields no amounts at all.
pub fn amounts_in(line: &str) -> Vec<Decimal> {
    let tokens: Vec<&str> = AMOUNT_PATTERN.find_iter(line).map(|m| m.as_str()).collect();
    let years = tokens.iter().filter(|t| is_bare_year(t)).count();
    let keep_years = years == tokens.len() && years < 2;

    tokens
        .into_iter()
        .filter(|t| keep_years || !is_bare_year(t))
        .filter_map(parse_amount)
        .collect()
}

/// Coerces a JSON number or numeric string into a decimal. `null`, `"N/A"` and junk yield `None`.
pub fn coerce_amount(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(Decimal::from(i))
            } else if let Some(u) = n.as_u64() {
                Some(Decimal::from(u))
            } else {
                n.as_f64().and_then(Decimal::from_f64)
            }
        }
        Value::String(s) => parse_amount(s.trim_end_matches('%')),
        _ => None,
    }
}

/// Rounds to one decimal place, halves away from zero.
pub fn round_one(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(1, RoundingStrategy::MidpointAwayFromZero)
}

/// `(part / whole) * 100`, or zero when `whole` is zero.
pub fn percent_of(part: Decimal, whole: Decimal) -> Decimal {
    if whole.is_zero() {
        return Decimal::ZERO;
    }
    part.checked_div(whole)
        .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
        .unwrap_or(Decimal::ZERO)
}

/// Formats a percentage-point delta as `+1.2pp`, `-0.4pp` or `0.0pp`.
pub fn format_point_delta(delta: Decimal) -> String {
    let rounded = round_one(delta);
    if rounded.is_zero() {
        return "0.0pp".to_string();
    }
    let sign = if rounded > Decimal::ZERO { "+" } else { "" };
    format!("{}{:.1}pp", sign, rounded)
}

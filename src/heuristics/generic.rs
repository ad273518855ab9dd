use crate::models::ReceiptFields;
use regex::Regex;

/// Keyword-anchored regex extraction over the whole text.
pub fn extract(text: &str) -> ReceiptFields {
    ReceiptFields {
        total: extract_total(text),
        tax: extract_tax(text),
        currency: extract_currency(text),
        vendor: extract_vendor(text),
        date: extract_date(text),
        expense_code: None,
    }
}

// ---------------------------------------------------------------------------
// Amounts
// ---------------------------------------------------------------------------

fn parse_amount(raw: &str) -> Option<f64> {
    raw.replace(',', "").parse::<f64>().ok()
}

fn extract_total(text: &str) -> Option<f64> {
    // Label, up to a few non-digit chars (": $", " GBP "), then the amount.
    let re = Regex::new(
        r"(?i)\b(grand\s+total|amount\s+due|balance\s+due|total\s+due|sub\s*-?\s*total|total\s+tax|total)\b[^\d\n]{0,12}?(\d[\d,]*(?:\.\d{1,2})?)",
    )
    .ok()?;

    let mut strong: Option<f64> = None;
    let mut last_total: Option<f64> = None;
    for cap in re.captures_iter(text) {
        let label = cap[1].to_lowercase();
        let Some(value) = parse_amount(&cap[2]) else {
            continue;
        };
        if label.starts_with("sub") || label.contains("tax") {
            continue;
        }
        if label == "total" {
            // Take the last plain TOTAL (skips running totals printed earlier)
            last_total = Some(value);
        } else if strong.is_none() {
            strong = Some(value);
        }
    }
    strong.or(last_total)
}

fn extract_tax(text: &str) -> Option<f64> {
    // "Tax: 3.50", "VAT 20% 1.67", "GST (9%) 0.81"
    let re = Regex::new(
        r"(?i)\b(?:sales\s+|total\s+)?(?:tax|vat|gst|hst)\b(?:\s*\(?\d{1,2}(?:\.\d+)?\s*%\)?)?[^\d\n]{0,12}?(\d[\d,]*(?:\.\d{1,2})?)",
    )
    .ok()?;
    re.captures(text).and_then(|c| parse_amount(&c[1]))
}

// ---------------------------------------------------------------------------
// Currency, date, vendor
// ---------------------------------------------------------------------------

fn extract_currency(text: &str) -> Option<String> {
    let re = Regex::new(r"(?i)\b(USD|EUR|GBP|SGD|AUD|CAD|NZD|HKD|JPY|CHF|INR)\b").ok()?;
    if let Some(cap) = re.captures(text) {
        return Some(cap[1].to_uppercase());
    }
    // Fall back to the first currency symbol; "$" is assumed to be USD.
    text.chars().find_map(|c| match c {
        '€' => Some("EUR".to_string()),
        '£' => Some("GBP".to_string()),
        '¥' => Some("JPY".to_string()),
        '$' => Some("USD".to_string()),
        _ => None,
    })
}

fn extract_date(text: &str) -> Option<String> {
    let month = r"(?:Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Sept|Oct|Nov|Dec)[a-z]*\.?";
    let patterns = [
        r"\b(\d{4}-\d{2}-\d{2})\b".to_string(),
        r"\b(\d{1,2}[/.\-]\d{1,2}[/.\-]\d{2,4})\b".to_string(),
        format!(r"(?i)\b({month}\s+\d{{1,2}},?\s+\d{{4}})\b"),
        format!(r"(?i)\b(\d{{1,2}}\s+{month}\s+\d{{4}})\b"),
    ];

    // Earliest match in the text wins, whichever pattern found it
    patterns
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .filter_map(|re| re.captures(text).and_then(|c| c.get(1)))
        .min_by_key(|m| m.start())
        .map(|m| m.as_str().trim().to_string())
}

const NON_VENDOR_WORDS: &[&str] = &[
    "total", "tax", "vat", "gst", "receipt", "invoice", "date", "time", "cash", "change", "card",
    "visa", "mastercard", "thank", "tel", "phone", "www", "http", "amount", "balance", "qty",
];

fn extract_vendor(text: &str) -> Option<String> {
    // The merchant name is usually the first label-free, digit-free chunk of text.
    text.lines()
        .flat_map(|line| line.split([',', '|']))
        .map(str::trim)
        .filter(|seg| (2..=60).contains(&seg.len()))
        .filter(|seg| seg.chars().any(char::is_alphabetic))
        .filter(|seg| !seg.chars().any(|c| c.is_ascii_digit()))
        .find(|seg| {
            let lower = seg.to_lowercase();
            !NON_VENDOR_WORDS.iter().any(|w| lower.contains(w))
        })
        .map(str::to_string)
}

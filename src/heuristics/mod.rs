// src/heuristics/mod.rs

mod generic;

use crate::llm_extract::FieldExtractor;
use crate::models::ReceiptFields;
use async_trait::async_trait;
use tracing::info;

/// Extract structured receipt fields from raw text with keyword-anchored regexes.
///
/// The expense code is never guessed here; categorising needs a model.
pub fn extract_receipt(text: &str) -> ReceiptFields {
    generic::extract(text)
}

/// [`FieldExtractor`] for the `heuristics` backend. No network access.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicExtractor;

#[async_trait]
impl FieldExtractor for HeuristicExtractor {
    async fn extract_fields(&self, text: &str) -> ReceiptFields {
        let fields = extract_receipt(text);
        let (filled, total) = fields.coverage();
        info!(
            filled,
            total,
            vendor = ?fields.vendor,
            total_amount = ?fields.total,
            currency = ?fields.currency,
            "Heuristic extraction result"
        );
        fields
    }
}

// src/summary.rs

use crate::error::LlmError;
use crate::llm::{ChatMessage, LlmClient};
use crate::llm_extract::lenient_number;
use crate::receipt_db::Receipt;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{error, info};

/// The slice of a receipt that is sent for summarizing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReceiptProjection {
    pub filename: String,
    pub upload_date: String,
    pub total_amount: Option<f64>,
    pub tax_amount: Option<f64>,
    pub currency: Option<String>,
    pub vendor: Option<String>,
    pub date: Option<String>,
}

impl From<&Receipt> for ReceiptProjection {
    fn from(r: &Receipt) -> Self {
        Self {
            filename: r.filename.clone(),
            upload_date: r.upload_date.clone(),
            total_amount: r.total_amount,
            tax_amount: r.tax_amount,
            currency: r.currency.clone(),
            vendor: r.vendor.clone(),
            date: r.date.clone(),
        }
    }
}

/// Aggregate spending figures plus a narrative.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExpenseSummary {
    pub total_with_tax: f64,
    pub total_without_tax: f64,
    pub total_tax: f64,
    pub receipt_count: u64,
    pub summary_text: String,
}

impl ExpenseSummary {
    /// Zeroed result returned when the summary call fails.
    pub fn failed() -> Self {
        Self {
            total_with_tax: 0.0,
            total_without_tax: 0.0,
            total_tax: 0.0,
            receipt_count: 0,
            summary_text: "Error generating summary".to_string(),
        }
    }
}

/// Produces an [`ExpenseSummary`] for a set of receipts. Never fails; degrades to
/// [`ExpenseSummary::failed`].
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, receipts: &[ReceiptProjection]) -> ExpenseSummary;
}

const SUMMARY_PROMPT: &str = r#"Analyze the following receipt data and provide a comprehensive expense summary for the last {days} days.

Receipt Data:
{receipts}

Please calculate and provide:
1. Total amount with tax/VAT
2. Total amount without tax/VAT (subtract tax from total)
3. Total tax/VAT amount
4. Number of receipts processed
5. A brief summary of spending patterns (which vendors, categories, etc.)

Return the information in this exact JSON format:
{
    "total_with_tax": number,
    "total_without_tax": number,
    "total_tax": number,
    "receipt_count": number,
    "summary_text": "string describing spending patterns"
}

Make sure to handle different currencies appropriately and provide accurate calculations."#;

/// Asks the model for the totals. Whatever it reports is passed through unchecked.
pub struct LlmSummarizer {
    client: Arc<LlmClient>,
    window_days: i64,
}

impl LlmSummarizer {
    /// `window_days` is only used to describe the period to the model.
    pub fn new(client: Arc<LlmClient>, window_days: i64) -> Self {
        Self {
            client,
            window_days,
        }
    }

    fn prompt(&self, receipts: &[ReceiptProjection]) -> Result<String, LlmError> {
        let data = serde_json::to_string_pretty(receipts)?;
        Ok(SUMMARY_PROMPT
            .replace("{days}", &self.window_days.to_string())
            .replace("{receipts}", &data))
    }

    async fn try_summarize(&self, receipts: &[ReceiptProjection]) -> Result<ExpenseSummary, LlmError> {
        let prompt = self.prompt(receipts)?;
        let reply = self
            .client
            .chat_json(
                &[ChatMessage::user(prompt)],
                Some(&json!({ "type": "json_object" })),
            )
            .await?;
        Ok(parse_summary(&reply))
    }
}

#[async_trait]
impl Summarizer for LlmSummarizer {
    async fn summarize(&self, receipts: &[ReceiptProjection]) -> ExpenseSummary {
        match self.try_summarize(receipts).await {
            Ok(summary) => {
                info!(
                    receipts = receipts.len(),
                    reported_count = summary.receipt_count,
                    total_with_tax = summary.total_with_tax,
                    "Generated summary"
                );
                summary
            }
            Err(e) => {
                error!(error = %e, model = %self.client.model(), "AI summary failed");
                ExpenseSummary::failed()
            }
        }
    }
}

/// Read the model's summary, defaulting anything missing.
pub fn parse_summary(reply: &Value) -> ExpenseSummary {
    let amount = |key: &str| lenient_number(reply.get(key)).unwrap_or(0.0);
    ExpenseSummary {
        total_with_tax: amount("total_with_tax"),
        total_without_tax: amount("total_without_tax"),
        total_tax: amount("total_tax"),
        receipt_count: lenient_number(reply.get("receipt_count"))
            .filter(|n| *n >= 0.0)
            .map(|n| n as u64)
            .unwrap_or(0),
        summary_text: reply
            .get("summary_text")
            .and_then(Value::as_str)
            .unwrap_or("No summary available")
            .to_string(),
    }
}

/// Offline summarizer for the heuristics backend: sums the stored figures.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalSummarizer;

#[async_trait]
impl Summarizer for LocalSummarizer {
    async fn summarize(&self, receipts: &[ReceiptProjection]) -> ExpenseSummary {
        let total_with_tax: f64 = receipts.iter().filter_map(|r| r.total_amount).sum();
        let total_tax: f64 = receipts.iter().filter_map(|r| r.tax_amount).sum();

        let vendors: BTreeSet<&str> = receipts.iter().filter_map(|r| r.vendor.as_deref()).collect();
        let currencies: BTreeSet<&str> =
            receipts.iter().filter_map(|r| r.currency.as_deref()).collect();
        let missing = receipts.iter().filter(|r| r.total_amount.is_none()).count();

        let mut text = format!("{} receipts", receipts.len());
        if !vendors.is_empty() {
            text.push_str(&format!(
                " from {}",
                vendors.into_iter().collect::<Vec<_>>().join(", ")
            ));
        }
        text.push('.');
        if currencies.len() > 1 {
            text.push_str(&format!(
                " Mixed currencies ({}); totals are not converted.",
                currencies.into_iter().collect::<Vec<_>>().join(", ")
            ));
        }
        if missing > 0 {
            text.push_str(&format!(" {missing} without a total were counted as zero."));
        }

        ExpenseSummary {
            total_with_tax,
            total_without_tax: total_with_tax - total_tax,
            total_tax,
            receipt_count: receipts.len() as u64,
            summary_text: text,
        }
    }
}

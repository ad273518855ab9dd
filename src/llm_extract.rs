// src/llm_extract.rs

use crate::config::ExtractionMode;
use crate::error::LlmError;
use crate::llm::{ChatMessage, LlmClient, truncate_chars};
use crate::models::ReceiptFields;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{error, info};

/// Turns receipt text into the six structured fields.
///
/// Implementations never fail: anything they cannot determine comes back as `None`.
#[async_trait]
pub trait FieldExtractor: Send + Sync {
    async fn extract_fields(&self, text: &str) -> ReceiptFields;
}

/// The prompt template that instructs the model to extract structured receipt data.
const EXTRACTION_PROMPT: &str = r#"Extract the following information from this receipt text and return as JSON:
- Total amount (just the number)
- Tax/VAT amount (just the number)
- Currency (e.g., USD, EUR, GBP)
- Vendor/Store name
- Date (if available)
- Expense code: Categorise this expense into one of these categories:
  * CENTRAL
  * DISCRETIONARY
  * APPROVED
  * OTHER - for anything else that doesn't fit the above

Return the information in this exact JSON format:
{
    "total": number_or_null,
    "tax": number_or_null,
    "currency": "string_or_null",
    "vendor": "string_or_null",
    "date": "string_or_null",
    "expense_code": "string_or_null"
}

Use null for fields you cannot determine. Return ONLY the JSON object."#;

/// Shorter instruction used when the response shape is enforced by a schema.
const SCHEMA_PROMPT: &str = "Extract the total amount, tax/VAT amount, currency code, vendor name, \
date and expense code (CENTRAL, DISCRETIONARY, APPROVED or OTHER) from this receipt text. \
Use null for anything you cannot determine.";

fn receipt_schema() -> Value {
    let nullable = |ty: &str| json!({ "type": [ty, "null"] });
    json!({
        "type": "json_schema",
        "json_schema": {
            "name": "receipt_fields",
            "strict": true,
            "schema": {
                "type": "object",
                "properties": {
                    "total": nullable("number"),
                    "tax": nullable("number"),
                    "currency": nullable("string"),
                    "vendor": nullable("string"),
                    "date": nullable("string"),
                    "expense_code": {
                        "type": ["string", "null"],
                        "enum": ["CENTRAL", "DISCRETIONARY", "APPROVED", "OTHER", null]
                    }
                },
                "required": ["total", "tax", "currency", "vendor", "date", "expense_code"],
                "additionalProperties": false
            }
        }
    })
}

pub struct LlmFieldExtractor {
    client: Arc<LlmClient>,
    mode: ExtractionMode,
    max_chars: usize,
}

impl LlmFieldExtractor {
    pub fn new(client: Arc<LlmClient>, mode: ExtractionMode, max_chars: usize) -> Self {
        Self {
            client,
            mode,
            max_chars,
        }
    }

    async fn try_extract(&self, text: &str) -> Result<ReceiptFields, LlmError> {
        // Truncate very long texts to stay within context limits
        let text = truncate_chars(text, self.max_chars);

        let (messages, response_format) = match self.mode {
            ExtractionMode::JsonPrompt => (
                vec![ChatMessage::user(format!(
                    "{EXTRACTION_PROMPT}\n\nReceipt text:\n{text}"
                ))],
                json!({ "type": "json_object" }),
            ),
            ExtractionMode::Schema => (
                vec![
                    ChatMessage::system(SCHEMA_PROMPT),
                    ChatMessage::user(text.to_string()),
                ],
                receipt_schema(),
            ),
        };

        let reply = self
            .client
            .chat_json(&messages, Some(&response_format))
            .await?;
        Ok(normalize_fields(&reply))
    }
}

#[async_trait]
impl FieldExtractor for LlmFieldExtractor {
    async fn extract_fields(&self, text: &str) -> ReceiptFields {
        match self.try_extract(text).await {
            Ok(fields) => {
                let (filled, total) = fields.coverage();
                info!(
                    filled, total,
                    vendor = ?fields.vendor,
                    total_amount = ?fields.total,
                    expense_code = ?fields.expense_code,
                    "LLM extraction result"
                );
                fields
            }
            Err(e) => {
                error!(error = %e, model = %self.client.model(), "AI extraction failed");
                ReceiptFields::default()
            }
        }
    }
}

/// Map a model reply onto `ReceiptFields`, nulling anything that doesn't fit.
pub fn normalize_fields(reply: &Value) -> ReceiptFields {
    ReceiptFields {
        total: lenient_number(reply.get("total")),
        tax: lenient_number(reply.get("tax")),
        currency: lenient_string(reply.get("currency")).map(|c| c.to_uppercase()),
        vendor: lenient_string(reply.get("vendor")),
        date: lenient_string(reply.get("date")),
        expense_code: lenient_string(reply.get("expense_code")).and_then(|c| c.parse().ok()),
    }
}

/// Numbers pass through; strings like "$1,234.50" are cleaned up and parsed.
pub(crate) fn lenient_number(value: Option<&Value>) -> Option<f64> {
    let number = match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let cleaned: String = s
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
                .collect();
            cleaned.parse().ok()
        }
        _ => None,
    };
    number.filter(|n| n.is_finite())
}

fn lenient_string(value: Option<&Value>) -> Option<String> {
    let s = match value? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    let lowered = s.to_ascii_lowercase();
    if s.is_empty() || lowered == "null" || lowered == "none" || lowered == "n/a" {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ResolvedEndpoint;
    use crate::llm::stub_server::{StubServer, chat_reply};
    use crate::models::ExpenseCode;

    #[test]
    fn test_normalize_full_reply() {
        let reply = json!({
            "total": 42.50,
            "tax": 3.50,
            "currency": "USD",
            "vendor": "Walmart",
            "date": "2024-01-15",
            "expense_code": "DISCRETIONARY"
        });
        assert_eq!(
            normalize_fields(&reply),
            ReceiptFields {
                total: Some(42.5),
                tax: Some(3.5),
                currency: Some("USD".into()),
                vendor: Some("Walmart".into()),
                date: Some("2024-01-15".into()),
                expense_code: Some(ExpenseCode::Discretionary),
            }
        );
    }

    #[test]
    fn test_normalize_missing_and_junk_fields() {
        let reply = json!({
            "total": "about forty",
            "tax": null,
            "currency": "",
            "vendor": ["Tesco"],
            "expense_code": "TRAVEL"
        });
        assert_eq!(normalize_fields(&reply), ReceiptFields::default());
    }

    #[test]
    fn test_normalize_string_numbers() {
        let reply = json!({
            "total": "$1,234.50",
            "tax": "20.10",
            "currency": "eur",
            "date": 20240115,
            "expense_code": "approved"
        });
        let fields = normalize_fields(&reply);
        assert_eq!(fields.total, Some(1234.5));
        assert_eq!(fields.tax, Some(20.1));
        assert_eq!(fields.currency.as_deref(), Some("EUR"));
        assert_eq!(fields.date.as_deref(), Some("20240115"));
        assert_eq!(fields.expense_code, Some(ExpenseCode::Approved));
    }

    #[test]
    fn test_schema_lists_every_field() {
        let schema = receipt_schema();
        let required = schema["json_schema"]["schema"]["required"].as_array().unwrap();
        assert_eq!(required.len(), 6);
        let codes = schema["json_schema"]["schema"]["properties"]["expense_code"]["enum"]
            .as_array()
            .unwrap();
        for code in ExpenseCode::ALL {
            assert!(codes.contains(&json!(code.as_str())));
        }
    }

    #[tokio::test]
    async fn test_call_failure_yields_empty_fields() {
        let client = Arc::new(LlmClient::new(ResolvedEndpoint {
            base_url: "http://127.0.0.1:9/v1".to_string(),
            model: "test".to_string(),
            api_key: None,
        }));
        for mode in [ExtractionMode::JsonPrompt, ExtractionMode::Schema] {
            let extractor = LlmFieldExtractor::new(client.clone(), mode, 100);
            let fields = extractor.extract_fields("Total: $42.50").await;
            assert!(fields.is_empty());
        }
    }

    const WALMART_REPLY: &str = r#"{"total": "42.50", "tax": 3.5, "currency": "usd",
        "vendor": "Walmart", "date": "2024-01-15", "expense_code": "discretionary"}"#;

    fn walmart() -> ReceiptFields {
        ReceiptFields {
            total: Some(42.5),
            tax: Some(3.5),
            currency: Some("USD".into()),
            vendor: Some("Walmart".into()),
            date: Some("2024-01-15".into()),
            expense_code: Some(ExpenseCode::Discretionary),
        }
    }

    #[tokio::test]
    async fn test_json_prompt_mode_request() {
        let server = StubServer::start("200 OK", chat_reply(Some(WALMART_REPLY))).await;
        let extractor = LlmFieldExtractor::new(
            Arc::new(server.client(Some("sk-test"))),
            ExtractionMode::JsonPrompt,
            100,
        );

        let fields = extractor
            .extract_fields("Total: $42.50, Tax: $3.50, Walmart, 2024-01-15")
            .await;
        assert_eq!(fields, walmart());

        let sent = server.captured().await;
        assert_eq!(sent.body["temperature"], 0.0);
        assert_eq!(sent.body["response_format"], json!({ "type": "json_object" }));
        let messages = sent.body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["role"], "user");
        let prompt = messages[0]["content"].as_str().unwrap();
        assert!(prompt.starts_with(EXTRACTION_PROMPT));
        assert!(prompt.ends_with("Receipt text:\nTotal: $42.50, Tax: $3.50, Walmart, 2024-01-15"));
    }

    #[tokio::test]
    async fn test_schema_mode_request() {
        let server = StubServer::start("200 OK", chat_reply(Some(WALMART_REPLY))).await;
        let extractor =
            LlmFieldExtractor::new(Arc::new(server.client(None)), ExtractionMode::Schema, 5);

        let fields = extractor.extract_fields("Total: $42.50").await;
        assert_eq!(fields, walmart());

        let sent = server.captured().await;
        assert_eq!(sent.body["response_format"], receipt_schema());
        assert_eq!(
            sent.body["messages"],
            json!([
                { "role": "system", "content": SCHEMA_PROMPT },
                { "role": "user", "content": "Total" }
            ])
        );
    }

    #[tokio::test]
    async fn test_server_error_yields_empty_fields() {
        let server = StubServer::start(
            "500 Internal Server Error",
            r#"{"error":"boom"}"#.to_string(),
        )
        .await;
        let extractor = LlmFieldExtractor::new(
            Arc::new(server.client(None)),
            ExtractionMode::JsonPrompt,
            100,
        );
        assert_eq!(extractor.extract_fields("Total: $42.50").await, ReceiptFields::default());
        server.captured().await;
    }
}

// src/service.rs

use crate::config::{Config, LlmBackend};
use crate::error::{IngestError, Result};
use crate::heuristics::HeuristicExtractor;
use crate::llm::{LlmClient, resolve_endpoint};
use crate::llm_extract::{FieldExtractor, LlmFieldExtractor};
use crate::receipt_db::{NewReceipt, Receipt, ReceiptStore};
use crate::summary::{ExpenseSummary, LocalSummarizer, LlmSummarizer, ReceiptProjection, Summarizer};
use crate::text_extract::{DocumentTextExtractor, TextExtractor};
use crate::uploads::{sanitize_filename, save_upload};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use tracing::{Instrument, error, info, info_span, warn};

/// A file as received from the caller.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct UploadRequest {
    pub file: Option<UploadedFile>,
    pub owner: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SummaryOutcome {
    /// Nothing uploaded in the window; the summarizer was not called.
    NoReceipts,
    Summary {
        summary: ExpenseSummary,
        /// Rows actually found locally, independent of what the summary claims.
        receipt_count: usize,
    },
}

/// Ingestion, listing and summaries over one receipt store.
pub struct ReceiptService {
    db_path: PathBuf,
    upload_dir: PathBuf,
    max_upload_bytes: usize,
    summary_window_days: i64,
    text: Box<dyn TextExtractor>,
    fields: Box<dyn FieldExtractor>,
    summarizer: Box<dyn Summarizer>,
}

impl ReceiptService {
    pub fn new(
        cfg: &Config,
        text: Box<dyn TextExtractor>,
        fields: Box<dyn FieldExtractor>,
        summarizer: Box<dyn Summarizer>,
    ) -> Self {
        Self {
            db_path: PathBuf::from(&cfg.db_path),
            upload_dir: PathBuf::from(&cfg.upload_dir),
            max_upload_bytes: cfg.max_upload_bytes,
            summary_window_days: cfg.summary_window_days,
            text,
            fields,
            summarizer,
        }
    }

    /// Each operation gets its own connection, dropped when it returns.
    fn open_store(&self) -> Result<ReceiptStore> {
        if let Some(parent) = self.db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        Ok(ReceiptStore::new(&self.db_path)?)
    }

    /// Store the file, extract text and fields, and persist one record.
    ///
    /// Extraction failures degrade the record; only bad input or storage errors fail.
    pub async fn upload(&self, request: UploadRequest) -> Result<Receipt> {
        let file = request
            .file
            .filter(|f| !f.filename.is_empty())
            .ok_or(IngestError::MissingFile)?;
        let owner = request
            .owner
            .filter(|o| !o.is_empty())
            .ok_or(IngestError::MissingOwner)?;
        if file.bytes.len() > self.max_upload_bytes {
            return Err(IngestError::FileTooLarge {
                size: file.bytes.len(),
                limit: self.max_upload_bytes,
            }
            .into());
        }

        let filename = sanitize_filename(&file.filename);
        let uploaded_at = OffsetDateTime::now_utc();
        let id = ReceiptStore::generate_uid(&owner, &filename, uploaded_at, &file.bytes);

        let span = info_span!("upload", id = %id, filename = %filename);
        self.ingest(id, filename, uploaded_at, file.bytes, owner)
            .instrument(span)
            .await
    }

    async fn ingest(
        &self,
        id: String,
        filename: String,
        uploaded_at: OffsetDateTime,
        bytes: Vec<u8>,
        owner: String,
    ) -> Result<Receipt> {
        let path = save_upload(&self.upload_dir, &id, &filename, &bytes)?;

        let result = self.process(id, filename, uploaded_at, &path, owner).await;
        if let Err(e) = &result {
            // No row points at the file, so it must not outlive the failed upload
            if let Some(dir) = path.parent() {
                match fs::remove_dir_all(dir) {
                    Ok(()) => warn!(error = %e, dir = %dir.display(), "Upload failed; stored file removed"),
                    Err(rm) => error!(error = %rm, dir = %dir.display(), "Failed to remove orphaned upload"),
                }
            }
        }
        result
    }

    async fn process(
        &self,
        id: String,
        filename: String,
        uploaded_at: OffsetDateTime,
        path: &Path,
        owner: String,
    ) -> Result<Receipt> {
        let document = self.text.extract_text(path);
        if !document.is_text() {
            warn!(outcome = ?document, "Text extraction degraded");
        }
        let extracted_text = document.into_stored_text();

        let fields = self.fields.extract_fields(&extracted_text).await;
        if fields.is_empty() {
            warn!("No fields extracted; storing record without them");
        }
        let raw_ai_response = serde_json::to_string(&fields)?;

        let store = self.open_store()?;
        store.insert_receipt(&NewReceipt {
            id: id.clone(),
            filename,
            stored_path: path.display().to_string(),
            uploaded_at,
            extracted_text,
            fields,
            raw_ai_response,
            user_email: owner,
        })?;

        let receipt = store
            .get_receipt_by_id(&id)?
            .ok_or(rusqlite::Error::QueryReturnedNoRows)?;
        info!(owner = %receipt.user_email, "Receipt uploaded and processed");
        Ok(receipt)
    }

    /// All receipts for `owner`, newest first. An empty owner lists nothing.
    pub fn list(&self, owner: &str) -> Result<Vec<Receipt>> {
        if owner.is_empty() {
            return Ok(Vec::new());
        }
        let receipts = self.open_store()?.get_receipts_for_owner(owner, None)?;
        info!(owner = %owner, count = receipts.len(), "Listed receipts");
        Ok(receipts)
    }

    /// `(total, without_total)` receipt counts for `owner`.
    pub fn counts(&self, owner: &str) -> Result<(usize, usize)> {
        Ok(self.open_store()?.get_counts(owner)?)
    }

    /// Summarize `owner`'s receipts from the configured window (30 days by default).
    pub async fn summarize(&self, owner: &str) -> Result<SummaryOutcome> {
        self.summarize_at(owner, OffsetDateTime::now_utc()).await
    }

    pub async fn summarize_at(&self, owner: &str, now: OffsetDateTime) -> Result<SummaryOutcome> {
        if owner.is_empty() {
            return Err(IngestError::MissingOwner.into());
        }
        let since = now - Duration::days(self.summary_window_days);
        let receipts = self.open_store()?.get_receipts_for_owner(owner, Some(since))?;

        if receipts.is_empty() {
            info!(owner = %owner, days = self.summary_window_days, "No receipts in window");
            return Ok(SummaryOutcome::NoReceipts);
        }

        let projections: Vec<ReceiptProjection> = receipts.iter().map(Into::into).collect();
        let summary = self.summarizer.summarize(&projections).await;
        Ok(SummaryOutcome::Summary {
            summary,
            receipt_count: receipts.len(),
        })
    }
}

/// Pick the field extractor and summarizer for the configured backend.
pub async fn build_extractors(cfg: &Config) -> (Box<dyn FieldExtractor>, Box<dyn Summarizer>) {
    let Some(endpoint) = resolve_endpoint(&cfg.llm) else {
        info!("Backend set to heuristics, using regex extraction");
        return (Box::new(HeuristicExtractor), Box::new(LocalSummarizer));
    };

    let client = Arc::new(LlmClient::new(endpoint));
    if cfg.llm.backend == LlmBackend::Ollama {
        client.check_ollama_health().await;
    }

    (
        Box::new(LlmFieldExtractor::new(
            client.clone(),
            cfg.llm.mode,
            cfg.llm.max_chars,
        )),
        Box::new(LlmSummarizer::new(client, cfg.summary_window_days)),
    )
}

/// Service for read-only commands: no endpoint is resolved and nothing touches the network.
///
/// Uploads through it fall back to regex extraction.
pub fn offline_service(cfg: &Config) -> ReceiptService {
    ReceiptService::new(
        cfg,
        Box::new(DocumentTextExtractor),
        Box::new(HeuristicExtractor),
        Box::new(LocalSummarizer),
    )
}

pub async fn build_service(cfg: &Config) -> ReceiptService {
    let (fields, summarizer) = build_extractors(cfg).await;
    ReceiptService::new(cfg, Box::new(DocumentTextExtractor), fields, summarizer)
}

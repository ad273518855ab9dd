//! Receipt ingestion: store an uploaded receipt, pull its text, have a model
//! structure it, and report on what was spent.

pub mod config;
pub mod error;
pub mod heuristics;
pub mod llm;
pub mod llm_extract;
pub mod models;
pub mod office;
pub mod receipt_db;
pub mod service;
pub mod summary;
pub mod text_extract;
pub mod uploads;

pub use error::{IngestError, ReceiptError, Result};
pub use service::{
    ReceiptService, SummaryOutcome, UploadRequest, UploadedFile, build_extractors, build_service,
    offline_service,
};

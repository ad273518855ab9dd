// src/text_extract.rs

use crate::office::{OfficeKind, extract_office_text};
use lopdf::{Dictionary, Document};
use std::fs;
use std::panic;
use std::path::Path;
use tracing::{info, warn};

/// Result of attempting to pull text out of an uploaded document.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentText {
    /// The document contains extractable text.
    Text(String),
    /// The document is an image or image-only PDF; it needs OCR we don't do.
    ScannedImage,
    /// Something went wrong during extraction.
    Error(String),
}

impl DocumentText {
    /// The text to persist. Failures are recorded as an error message instead of raised.
    pub fn into_stored_text(self) -> String {
        match self {
            DocumentText::Text(text) => text,
            DocumentText::ScannedImage => {
                "Error extracting text: document has no text layer (scanned image)".to_string()
            }
            DocumentText::Error(e) => format!("Error extracting text: {e}"),
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, DocumentText::Text(_))
    }
}

/// Turns a stored file into plain text. Implementations never fail; they degrade.
pub trait TextExtractor: Send + Sync {
    fn extract_text(&self, path: &Path) -> DocumentText;
}

/// Local extractor: PDFs via lopdf + pdf-extract, office documents via their XML
/// parts, text formats read directly.
#[derive(Debug, Default, Clone, Copy)]
pub struct DocumentTextExtractor;

impl TextExtractor for DocumentTextExtractor {
    fn extract_text(&self, path: &Path) -> DocumentText {
        let bytes = match fs::read(path) {
            Ok(b) => b,
            Err(e) => return DocumentText::Error(format!("Failed to read {}: {e}", path.display())),
        };

        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        if let Some(kind) = OfficeKind::from_extension(&ext) {
            return extract_text_from_office(&bytes, kind);
        }

        match ext.as_str() {
            "pdf" => extract_text_from_pdf(&bytes),
            "txt" | "md" | "csv" | "tsv" | "json" | "html" | "htm" | "xml" | "log" => {
                DocumentText::Text(String::from_utf8_lossy(&bytes).into_owned())
            }
            "png" | "jpg" | "jpeg" | "gif" | "bmp" | "tif" | "tiff" | "webp" | "heic" => {
                info!(ext = %ext, "Image upload, no text layer");
                DocumentText::ScannedImage
            }
            _ if bytes.starts_with(b"%PDF") => extract_text_from_pdf(&bytes),
            _ => match String::from_utf8(bytes) {
                Ok(text) => DocumentText::Text(text),
                Err(_) => DocumentText::Error(format!("Unsupported binary format '{ext}'")),
            },
        }
    }
}

/// Minimum number of non-whitespace characters we expect from a
/// "real" text PDF. Below this threshold we treat it as scanned.
const MIN_TEXT_CHARS: usize = 30;

/// Takes raw PDF bytes and returns `DocumentText`.
pub fn extract_text_from_pdf(pdf_bytes: &[u8]) -> DocumentText {
    // --- Phase 1: structural check with lopdf ---
    let doc = match Document::load_mem(pdf_bytes) {
        Ok(d) => d,
        Err(e) => return DocumentText::Error(format!("Failed to parse PDF: {e}")),
    };

    if looks_like_scanned(&doc) {
        info!("PDF structural check: likely scanned / image-only");
        return DocumentText::ScannedImage;
    }

    // --- Phase 2: full text extraction ---
    // pdf-extract panics on some malformed font tables
    let extracted = panic::catch_unwind(|| pdf_extract::extract_text_from_mem(pdf_bytes));
    match extracted {
        Ok(Ok(text)) => {
            let meaningful = text.chars().filter(|c| !c.is_whitespace()).count();
            if meaningful < MIN_TEXT_CHARS {
                info!(chars = meaningful, "Extracted text too short, treating as scanned");
                DocumentText::ScannedImage
            } else {
                info!(chars = meaningful, "Text extracted successfully");
                DocumentText::Text(text)
            }
        }
        Ok(Err(e)) => {
            warn!(error = %e, "pdf-extract failed");
            DocumentText::Error(format!("Failed to extract PDF text: {e}"))
        }
        Err(_) => {
            warn!("pdf-extract panicked");
            DocumentText::Error("PDF text extraction aborted".to_string())
        }
    }
}

/// Text runs of a docx/pptx/xlsx. An archive with no text at all is an error.
pub fn extract_text_from_office(bytes: &[u8], kind: OfficeKind) -> DocumentText {
    match extract_office_text(bytes, kind) {
        Ok(text) if text.is_empty() => {
            info!(kind = ?kind, "Office document has no text");
            DocumentText::Error("office document contains no text".to_string())
        }
        Ok(text) => {
            info!(kind = ?kind, chars = text.chars().count(), "Office text extracted");
            DocumentText::Text(text)
        }
        Err(e) => {
            warn!(kind = ?kind, error = %e, "Office extraction failed");
            DocumentText::Error(format!("Failed to read office document: {e}"))
        }
    }
}

/// Heuristic: a page that carries XObject images but no Font resources is
/// almost certainly a scanned page.
fn looks_like_scanned(doc: &Document) -> bool {
    let pages = doc.get_pages();
    if pages.is_empty() {
        return false;
    }

    let mut image_only_pages = 0;

    for object_id in pages.values() {
        let Ok(page_obj) = doc.get_object(*object_id) else {
            continue;
        };
        let Ok(page_dict) = page_obj.as_dict() else {
            continue;
        };

        let resources = page_dict
            .get(b"Resources")
            .ok()
            .and_then(|r| doc.dereference(r).ok())
            .and_then(|(_, resolved)| resolved.as_dict().ok());

        if has_entries(doc, resources, b"XObject") && !has_entries(doc, resources, b"Font") {
            image_only_pages += 1;
        }
    }

    let total = pages.len();
    let ratio = image_only_pages as f64 / total as f64;
    info!(
        total_pages = total,
        image_only = image_only_pages,
        ratio = format!("{ratio:.2}"),
        "Scanned-page analysis"
    );

    // ≥80% image-only pages ⇒ whole document is scanned
    ratio >= 0.8
}

fn has_entries(doc: &Document, resources: Option<&Dictionary>, key: &[u8]) -> bool {
    resources
        .and_then(|res| res.get(key).ok())
        .and_then(|o| doc.dereference(o).ok())
        .and_then(|(_, resolved)| resolved.as_dict().ok())
        .is_some_and(|d| !d.is_empty())
}

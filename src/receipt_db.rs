use crate::models::{ExpenseCode, ReceiptFields};
use rusqlite::{Connection, OptionalExtension, Result as SqliteResult, params};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::Path;
use time::OffsetDateTime;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use tracing::info;

/// Same shape SQLite's CURRENT_TIMESTAMP produces, so text comparison orders correctly.
const TIMESTAMP_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

const RECEIPT_COLUMNS: &str = "id, filename, stored_path, upload_date, extracted_text, total_amount, \
     tax_amount, currency, vendor, date, raw_ai_response, user_email, expense_code";

pub struct ReceiptStore {
    conn: Connection,
}

/// A persisted receipt row.
#[derive(Debug, Clone, Serialize)]
pub struct Receipt {
    pub id: String,
    pub filename: String,
    pub stored_path: String,
    pub upload_date: String,
    pub extracted_text: Option<String>,
    pub total_amount: Option<f64>,
    pub tax_amount: Option<f64>,
    pub currency: Option<String>,
    pub vendor: Option<String>,
    pub date: Option<String>,
    pub raw_ai_response: Option<String>,
    pub user_email: String,
    pub expense_code: Option<ExpenseCode>,
}

/// Everything needed to write one row.
#[derive(Debug)]
pub struct NewReceipt {
    pub id: String,
    pub filename: String,
    pub stored_path: String,
    pub uploaded_at: OffsetDateTime,
    pub extracted_text: String,
    pub fields: ReceiptFields,
    pub raw_ai_response: String,
    pub user_email: String,
}

/// Render a timestamp the way `upload_date` is stored.
pub fn format_timestamp(at: OffsetDateTime) -> SqliteResult<String> {
    at.to_offset(time::UtcOffset::UTC)
        .format(TIMESTAMP_FORMAT)
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

impl ReceiptStore {
    /// Open (or create) the receipt store at `db_path`.
    pub fn new<P: AsRef<Path>>(db_path: P) -> SqliteResult<Self> {
        let conn = Connection::open(db_path)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS receipts (
                id TEXT PRIMARY KEY,
                filename TEXT NOT NULL,
                stored_path TEXT NOT NULL,
                upload_date TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                extracted_text TEXT,
                total_amount REAL,
                tax_amount REAL,
                currency TEXT,
                vendor TEXT,
                date TEXT,
                raw_ai_response TEXT,
                user_email TEXT NOT NULL,
                expense_code TEXT
            )",
            [],
        )?;

        info!("Receipt store ready");
        Ok(Self { conn })
    }

    /// Generate a record id from the owner, filename, upload instant and content.
    pub fn generate_uid(owner: &str, filename: &str, at: OffsetDateTime, bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(owner.as_bytes());
        hasher.update(filename.as_bytes());
        hasher.update(at.unix_timestamp_nanos().to_le_bytes());
        hasher.update(bytes);
        format!("{:x}", hasher.finalize())
    }

    /// Insert a receipt. Rows are never updated afterwards.
    pub fn insert_receipt(&self, receipt: &NewReceipt) -> SqliteResult<()> {
        let upload_date = format_timestamp(receipt.uploaded_at)?;
        self.conn.execute(
            "INSERT INTO receipts
                (id, filename, stored_path, upload_date, extracted_text, total_amount, tax_amount,
                 currency, vendor, date, raw_ai_response, user_email, expense_code)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                receipt.id,
                receipt.filename,
                receipt.stored_path,
                upload_date,
                receipt.extracted_text,
                receipt.fields.total,
                receipt.fields.tax,
                receipt.fields.currency,
                receipt.fields.vendor,
                receipt.fields.date,
                receipt.raw_ai_response,
                receipt.user_email,
                receipt.fields.expense_code.map(ExpenseCode::as_str),
            ],
        )?;
        info!(id = %receipt.id, filename = %receipt.filename, "Receipt stored");
        Ok(())
    }

    /// Receipts belonging to `owner`, newest first, optionally only those uploaded at or after `since`.
    pub fn get_receipts_for_owner(
        &self,
        owner: &str,
        since: Option<OffsetDateTime>,
    ) -> SqliteResult<Vec<Receipt>> {
        let since = since.map(format_timestamp).transpose()?;
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RECEIPT_COLUMNS}
             FROM receipts
             WHERE user_email = ?1 AND (?2 IS NULL OR upload_date >= ?2)
             ORDER BY upload_date DESC, rowid DESC"
        ))?;
        let rows = stmt.query_map(params![owner, since], Self::row_to_receipt)?;
        rows.collect()
    }

    pub fn get_receipt_by_id(&self, id: &str) -> SqliteResult<Option<Receipt>> {
        self.conn
            .query_row(
                &format!("SELECT {RECEIPT_COLUMNS} FROM receipts WHERE id = ?1"),
                params![id],
                Self::row_to_receipt,
            )
            .optional()
    }

    /// Count of an owner's receipts, and how many of those have no total.
    pub fn get_counts(&self, owner: &str) -> SqliteResult<(usize, usize)> {
        let total: usize = self.conn.query_row(
            "SELECT COUNT(*) FROM receipts WHERE user_email = ?1",
            params![owner],
            |row| row.get(0),
        )?;
        let without_total: usize = self.conn.query_row(
            "SELECT COUNT(*) FROM receipts WHERE user_email = ?1 AND total_amount IS NULL",
            params![owner],
            |row| row.get(0),
        )?;
        Ok((total, without_total))
    }

    fn row_to_receipt(row: &rusqlite::Row<'_>) -> rusqlite::Result<Receipt> {
        let expense_code: Option<String> = row.get(12)?;
        Ok(Receipt {
            id: row.get(0)?,
            filename: row.get(1)?,
            stored_path: row.get(2)?,
            upload_date: row.get(3)?,
            extracted_text: row.get(4)?,
            total_amount: row.get(5)?,
            tax_amount: row.get(6)?,
            currency: row.get(7)?,
            vendor: row.get(8)?,
            date: row.get(9)?,
            raw_ai_response: row.get(10)?,
            user_email: row.get(11)?,
            expense_code: expense_code.and_then(|c| c.parse().ok()),
        })
    }
}

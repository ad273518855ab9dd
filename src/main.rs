use anyhow::Context;
use clap::{Parser, Subcommand};
use receipt_tracker::config::{Config, DEFAULT_CONFIG_PATH};
use receipt_tracker::llm_extract::FieldExtractor;
use receipt_tracker::receipt_db::Receipt;
use receipt_tracker::text_extract::{DocumentTextExtractor, TextExtractor};
use receipt_tracker::{
    ReceiptError, SummaryOutcome, UploadRequest, UploadedFile, build_extractors, build_service,
    offline_service,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Upload receipts, list them, and summarize recent spending
#[derive(Parser)]
#[command(name = "receipts")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a receipt file and extract its fields
    Upload {
        /// Owner of the receipt
        #[arg(short, long)]
        email: Option<String>,
        /// Receipt file (PDF, image, text)
        file: Option<PathBuf>,
    },

    /// List an owner's receipts, newest first
    List {
        #[arg(short, long)]
        email: String,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Summarize an owner's spending over the configured window
    Summary {
        #[arg(short, long)]
        email: Option<String>,
        #[arg(long)]
        json: bool,
    },

    /// Run text and field extraction on a file without storing anything
    TestExtract { file: PathBuf },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let cfg = Config::load_or_default(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    info!(config = %cli.config.display(), db_path = %cfg.db_path, "Configuration loaded");

    let result = match cli.command {
        Commands::Upload { email, file } => upload(&cfg, email, file).await,
        Commands::List { email, json } => list(&cfg, &email, json),
        Commands::Summary { email, json } => summary(&cfg, email, json).await,
        Commands::TestExtract { file } => test_extract(&cfg, &file).await,
    };

    match result {
        Ok(()) => Ok(ExitCode::SUCCESS),
        // Bad input is a user-facing warning, not a crash
        Err(ReceiptError::Ingest(e)) => {
            eprintln!("⚠ {e}");
            Ok(ExitCode::FAILURE)
        }
        Err(e) => Err(e.into()),
    }
}

async fn upload(
    cfg: &Config,
    email: Option<String>,
    file: Option<PathBuf>,
) -> Result<(), ReceiptError> {
    let file = match file {
        Some(path) => Some(UploadedFile {
            filename: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            bytes: std::fs::read(&path)?,
        }),
        None => None,
    };

    let service = build_service(cfg).await;
    let receipt = service.upload(UploadRequest { file, owner: email }).await?;

    println!("Receipt uploaded and processed successfully!");
    print_receipts(&[receipt]);
    Ok(())
}

fn list(cfg: &Config, email: &str, json: bool) -> Result<(), ReceiptError> {
    let service = offline_service(cfg);
    let receipts = service.list(email)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&receipts)?);
    } else if receipts.is_empty() {
        println!("No receipts found for {email}");
    } else {
        print_receipts(&receipts);
        let (total, without_total) = service.counts(email)?;
        println!("\n{total} receipts, {without_total} without an extracted total");
    }
    Ok(())
}

async fn summary(cfg: &Config, email: Option<String>, json: bool) -> Result<(), ReceiptError> {
    let email = email.unwrap_or_default();
    let service = build_service(cfg).await;

    match service.summarize(&email).await? {
        SummaryOutcome::NoReceipts => {
            eprintln!(
                "⚠ No receipts found in the last {} days",
                cfg.summary_window_days
            );
        }
        SummaryOutcome::Summary {
            summary,
            receipt_count,
        } => {
            if json {
                let out = serde_json::json!({
                    "email": email,
                    "receipt_count": receipt_count,
                    "summary": summary,
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                println!(
                    "Expense summary for {email} (last {} days, {receipt_count} receipts)",
                    cfg.summary_window_days
                );
                println!("  Total with tax:    {:>12.2}", summary.total_with_tax);
                println!("  Total without tax: {:>12.2}", summary.total_without_tax);
                println!("  Total tax:         {:>12.2}", summary.total_tax);
                println!("  Receipts counted:  {:>12}", summary.receipt_count);
                println!();
                println!("{}", summary.summary_text);
            }
        }
    }
    Ok(())
}

/// Debug entry point: show what each stage produces for one file.
async fn test_extract(cfg: &Config, file: &Path) -> Result<(), ReceiptError> {
    let document = DocumentTextExtractor.extract_text(file);
    let text = document.into_stored_text();

    println!("\n--- Extracted Text (first 2000 chars) ---");
    println!("{}", receipt_tracker::llm::truncate_chars(&text, 2000));
    println!("--- End ---\n");

    let (extractor, _) = build_extractors(cfg).await;
    let fields = extractor.extract_fields(&text).await;
    let (filled, total) = fields.coverage();

    println!("--- Field Extraction ({:?}) ---", cfg.llm.backend);
    println!("{}", serde_json::to_string_pretty(&fields)?);
    println!("--- End ({filled}/{total} fields) ---\n");
    Ok(())
}

fn print_receipts(receipts: &[Receipt]) {
    let amount = |v: Option<f64>| v.map(|n| format!("{n:.2}")).unwrap_or_else(|| "-".into());
    let text = |v: &Option<String>| v.clone().unwrap_or_else(|| "-".into());

    println!(
        "{:<19}  {:<24}  {:>10}  {:>8}  {:<4}  {:<13}  {:<10}  FILE",
        "UPLOADED", "VENDOR", "TOTAL", "TAX", "CUR", "CODE", "DATE"
    );
    for r in receipts {
        println!(
            "{:<19}  {:<24}  {:>10}  {:>8}  {:<4}  {:<13}  {:<10}  {}",
            r.upload_date,
            text(&r.vendor),
            amount(r.total_amount),
            amount(r.tax_amount),
            text(&r.currency),
            r.expense_code.map(|c| c.as_str()).unwrap_or("-"),
            text(&r.date),
            r.filename,
        );
    }
}

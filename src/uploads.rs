use regex::Regex;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::info;

static UNSAFE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_.-]").expect("static regex"));

const FALLBACK_NAME: &str = "upload";

/// Reduce a client-supplied filename to something safe to put on disk.
///
/// Non-ASCII characters are dropped, path separators turn into spaces,
/// whitespace runs become a single `_`, anything outside `[A-Za-z0-9_.-]`
/// is removed, and leading/trailing dots and underscores are stripped.
pub fn sanitize_filename(name: &str) -> String {
    let ascii: String = name
        .chars()
        .filter(char::is_ascii)
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();
    let joined = ascii.split_whitespace().collect::<Vec<_>>().join("_");
    let cleaned = UNSAFE_CHARS.replace_all(&joined, "");
    let trimmed = cleaned.trim_matches(|c| c == '.' || c == '_');

    if trimmed.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Write an upload to `<upload_dir>/<record_id>/<filename>`.
///
/// Each record owns its directory, so two uploads with the same name never collide.
pub fn save_upload(
    upload_dir: &Path,
    record_id: &str,
    filename: &str,
    bytes: &[u8],
) -> io::Result<PathBuf> {
    let dir = upload_dir.join(record_id);
    fs::create_dir_all(&dir)?;
    let path = dir.join(filename);
    fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .and_then(|mut f| io::Write::write_all(&mut f, bytes))?;
    info!(path = %path.display(), bytes = bytes.len(), "Upload saved");
    Ok(path)
}

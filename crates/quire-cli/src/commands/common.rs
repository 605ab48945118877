use std::env;
use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use quire_core::crypto::{AesGcmCipher, Cipher};
use quire_core::models::{Category, CategoryLink, SyncConflict};
use quire_core::sync::SyncReport;
use quire_core::{DualStore, Note};

use crate::error::CliError;

/// Connection settings shared by every command
pub struct StoreOptions {
    pub db_path: PathBuf,
    pub author: String,
}

impl StoreOptions {
    pub fn open(&self) -> Result<DualStore, CliError> {
        open_store(&self.db_path, &self.author, load_cipher()?)
    }
}

pub fn open_store(
    path: &Path,
    author: &str,
    cipher: Option<Arc<dyn Cipher>>,
) -> Result<DualStore, CliError> {
    if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(DualStore::open(path, author, cipher)?)
}

pub fn load_cipher() -> Result<Option<Arc<dyn Cipher>>, CliError> {
    cipher_from_key(env::var("QUIRE_ENCRYPTION_KEY").ok())
}

pub fn cipher_from_key(key: Option<String>) -> Result<Option<Arc<dyn Cipher>>, CliError> {
    match key.as_deref().map(str::trim).filter(|key| !key.is_empty()) {
        Some(key) => {
            let cipher: Arc<dyn Cipher> = Arc::new(AesGcmCipher::from_base64_key(key)?);
            Ok(Some(cipher))
        }
        None => Ok(None),
    }
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> Result<PathBuf, CliError> {
    match cli_db_path.or_else(|| env::var_os("QUIRE_DB_PATH").map(PathBuf::from)) {
        Some(path) => Ok(path),
        None => default_db_path(),
    }
}

pub fn default_db_path() -> Result<PathBuf, CliError> {
    dirs::data_dir()
        .map(|dir| dir.join("quire").join("quire.db"))
        .ok_or_else(|| CliError::Config("Failed to resolve CLI data directory".to_string()))
}

/// Parse `CATEGORY` or `CATEGORY/SUBCATEGORY`
pub fn parse_link(raw: &str) -> Result<CategoryLink, CliError> {
    let raw = raw.trim();
    let link = match raw.split_once('/') {
        Some((category, subcategory)) => {
            let (category, subcategory) = (category.trim(), subcategory.trim());
            if category.is_empty() || subcategory.is_empty() {
                return Err(CliError::InvalidLink(raw.to_string()));
            }
            CategoryLink::new(category).with_subcategory(subcategory)
        }
        None if raw.is_empty() => return Err(CliError::InvalidLink(raw.to_string())),
        None => CategoryLink::new(raw),
    };
    Ok(link)
}

pub fn parse_links(raw: &[String]) -> Result<Vec<CategoryLink>, CliError> {
    raw.iter().map(|link| parse_link(link)).collect()
}

pub fn read_piped_stdin() -> Result<Option<String>, CliError> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }

    let mut buffer = String::new();
    stdin.lock().read_to_string(&mut buffer)?;
    Ok(Some(buffer.trim_end().to_string()).filter(|body| !body.is_empty()))
}

pub fn format_note_lines(notes: &[Note]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    notes
        .iter()
        .map(|note| {
            let short_id = note.guid.chars().take(13).collect::<String>();
            let title = truncate(&note.title, 30);
            let preview = if note.is_private {
                "[private]".to_string()
            } else {
                note.body_preview(30)
            };
            let relative_time = format_relative_time(note.updated_at, now_ms);
            format!("{short_id:<13}  {title:<30}  {preview:<30}  {relative_time}")
        })
        .collect()
}

pub fn format_note_detail(note: &Note) -> Vec<String> {
    let mut lines = vec![
        format!("guid:        {}", note.guid),
        format!("title:       {}", note.title),
    ];
    if let Some(description) = &note.description {
        lines.push(format!("description: {description}"));
    }
    lines.push(format!("private:     {}", note.is_private));
    lines.push(format!("authored:    {}", format_sync_timestamp(note.authored_at)));
    for link in &note.categories {
        match &link.subcategory_guid {
            Some(sub) => lines.push(format!("category:    {}/{sub}", link.category_guid)),
            None => lines.push(format!("category:    {}", link.category_guid)),
        }
    }
    lines.push(String::new());
    lines.push(note.body.clone());
    lines
}

pub fn format_category_lines(categories: &[Category]) -> Vec<String> {
    categories
        .iter()
        .map(|category| {
            let indent = if category.parent_guid.is_some() { "  " } else { "" };
            let color = category.color.as_deref().unwrap_or("-");
            format!("{}  {indent}{:<30}  {color}", category.guid, category.name)
        })
        .collect()
}

pub fn format_sync_conflict_lines(conflicts: &[SyncConflict]) -> Vec<String> {
    conflicts
        .iter()
        .map(|conflict| {
            format!(
                "{}  {:<21}  {}={}",
                format_sync_timestamp(conflict.created_at),
                conflict.resolution,
                conflict.entity_type,
                conflict.entity_guid,
            )
        })
        .collect()
}

pub fn format_report(report: &SyncReport) -> String {
    let checksum = match report.checksum_match {
        Some(true) => "match",
        Some(false) => "MISMATCH",
        None => "unchecked",
    };
    format!(
        "pulled {} (applied {}, skipped {}, failed {}, conflicts {}); pushed {} (rejected {}); checksum {checksum}",
        report.pulled,
        report.applied,
        report.skipped,
        report.failed,
        report.conflicts,
        report.pushed,
        report.rejected,
    )
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else {
        format_sync_timestamp(timestamp_ms)
    }
}

fn truncate(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        value.to_string()
    } else {
        let mut truncated = value.chars().take(max_chars.saturating_sub(3)).collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] quire_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Note not found: {0}")]
    NoteNotFound(String),
    #[error("Category not found: {0}")]
    CategoryNotFound(String),
    #[error("Invalid category link: {0}")]
    InvalidLink(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error(
        "Sync is not configured. Set QUIRE_HUB_URL, QUIRE_USERNAME and QUIRE_PASSWORD."
    )]
    SyncNotConfigured,
}

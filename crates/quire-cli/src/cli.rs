use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "quire")]
#[command(about = "Personal notes with hub/spoke sync")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Author recorded on local changes
    #[arg(long, global = true, value_name = "NAME", default_value = "local")]
    pub author: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create, edit and browse notes
    Note {
        #[command(subcommand)]
        command: NoteCommands,
    },
    /// Create, edit and browse categories
    Category {
        #[command(subcommand)]
        command: CategoryCommands,
    },
    /// Synchronize with the configured hub
    Sync {
        #[command(subcommand)]
        command: SyncCommands,
    },
    /// Rebuild the read cache from the database
    RebuildCache,
}

#[derive(Subcommand)]
pub enum NoteCommands {
    /// Create a new note
    #[command(alias = "new")]
    Add {
        title: String,
        /// Note body (stdin when omitted and piped)
        #[arg(short, long)]
        body: Option<String>,
        #[arg(short, long)]
        description: Option<String>,
        /// Encrypt the body at rest (requires QUIRE_ENCRYPTION_KEY)
        #[arg(long)]
        private: bool,
        /// Category link as `CATEGORY[/SUBCATEGORY]`; repeatable
        #[arg(short, long = "category", value_name = "GUID")]
        categories: Vec<String>,
    },
    /// List notes, most recently updated first
    List {
        #[arg(short, long, default_value = "20")]
        limit: usize,
        #[arg(long, default_value = "0")]
        offset: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one note
    Show {
        guid: String,
        #[arg(long)]
        json: bool,
    },
    /// Change fields of a note
    Edit {
        guid: String,
        #[arg(short, long)]
        title: Option<String>,
        #[arg(short, long)]
        body: Option<String>,
        #[arg(short, long)]
        description: Option<String>,
        #[arg(long, value_name = "BOOL")]
        private: Option<bool>,
        /// Replace all category links; repeatable
        #[arg(short, long = "category", value_name = "GUID")]
        categories: Option<Vec<String>>,
    },
    /// Delete a note
    Delete { guid: String },
}

#[derive(Subcommand)]
pub enum CategoryCommands {
    /// Create a category
    Add {
        name: String,
        #[arg(short, long)]
        description: Option<String>,
        #[arg(long)]
        color: Option<String>,
        /// Parent category GUID (makes this a subcategory)
        #[arg(long, value_name = "GUID")]
        parent: Option<String>,
    },
    /// List live categories
    List {
        #[arg(long)]
        json: bool,
    },
    /// Change fields of a category
    Edit {
        guid: String,
        #[arg(short, long)]
        name: Option<String>,
        #[arg(short, long)]
        description: Option<String>,
        #[arg(long)]
        color: Option<String>,
        #[arg(long, value_name = "GUID")]
        parent: Option<String>,
    },
    /// Delete a category
    Delete { guid: String },
}

#[derive(Subcommand)]
pub enum SyncCommands {
    /// Run one sync cycle now
    Now {
        #[arg(long)]
        json: bool,
    },
    /// Sync on a timer until interrupted
    Daemon,
    /// Show local entity counts and checksum
    Status {
        #[arg(long)]
        json: bool,
    },
    /// List recently resolved sync conflicts
    Conflicts {
        /// Number of conflicts to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

//! Quire CLI - notes and categories from the terminal, synced through a hub

mod cli;
mod commands;
mod error;


use clap::Parser;

use crate::cli::{CategoryCommands, Cli, Commands, NoteCommands, SyncCommands};
use crate::commands::category::{
    run_category_add, run_category_delete, run_category_edit, run_category_list, CategoryFields,
};
use crate::commands::common::{resolve_db_path, StoreOptions};
use crate::commands::note::{
    run_note_add, run_note_delete, run_note_edit, run_note_list, run_note_show, NoteFields,
};
use crate::commands::sync::{
    run_sync_conflicts, run_sync_daemon, run_sync_now, run_sync_status,
};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let directive = "quire=info"
        .parse()
        .map_err(|error| CliError::Config(format!("invalid log directive: {error}")))?;
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(directive))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let options = StoreOptions {
        db_path: resolve_db_path(cli.db_path)?,
        author: cli.author,
    };

    match cli.command {
        Commands::Note { command } => run_note(command, &options)?,
        Commands::Category { command } => run_category(command, &options)?,
        Commands::Sync { command } => match command {
            SyncCommands::Now { json } => run_sync_now(json, &options).await?,
            SyncCommands::Daemon => run_sync_daemon(&options).await?,
            SyncCommands::Status { json } => run_sync_status(json, &options)?,
            SyncCommands::Conflicts { limit, json } => {
                run_sync_conflicts(limit, json, &options)?;
            }
        },
        Commands::RebuildCache => {
            options.open()?.rebuild_cache()?;
            println!("Cache rebuilt");
        }
    }

    Ok(())
}

fn run_note(command: NoteCommands, options: &StoreOptions) -> Result<(), CliError> {
    match command {
        NoteCommands::Add {
            title,
            body,
            description,
            private,
            categories,
        } => run_note_add(&title, body, description, private, &categories, options),
        NoteCommands::List {
            limit,
            offset,
            json,
        } => run_note_list(limit, offset, json, options),
        NoteCommands::Show { guid, json } => run_note_show(&guid, json, options),
        NoteCommands::Edit {
            guid,
            title,
            body,
            description,
            private,
            categories,
        } => run_note_edit(
            &guid,
            NoteFields {
                title,
                body,
                description,
                private,
                categories,
            },
            options,
        ),
        NoteCommands::Delete { guid } => run_note_delete(&guid, options),
    }
}

fn run_category(command: CategoryCommands, options: &StoreOptions) -> Result<(), CliError> {
    match command {
        CategoryCommands::Add {
            name,
            description,
            color,
            parent,
        } => run_category_add(
            &name,
            CategoryFields {
                name: None,
                description,
                color,
                parent,
            },
            options,
        ),
        CategoryCommands::List { json } => run_category_list(json, options),
        CategoryCommands::Edit {
            guid,
            name,
            description,
            color,
            parent,
        } => run_category_edit(
            &guid,
            CategoryFields {
                name,
                description,
                color,
                parent,
            },
            options,
        ),
        CategoryCommands::Delete { guid } => run_category_delete(&guid, options),
    }
}

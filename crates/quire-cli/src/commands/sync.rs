use std::env;
use std::sync::Arc;

use quire_core::config::SyncClientConfig;
use quire_core::sync::{HttpTransport, SyncClient, SyncTransport};
use tokio_util::sync::CancellationToken;

use crate::commands::common::{format_report, format_sync_conflict_lines, StoreOptions};
use crate::error::CliError;

fn sync_client(options: &StoreOptions) -> Result<SyncClient, CliError> {
    if env::var_os("QUIRE_HUB_URL").is_none() {
        return Err(CliError::SyncNotConfigured);
    }
    let config = SyncClientConfig::from_env()?;
    let transport: Arc<dyn SyncTransport> = Arc::new(HttpTransport::new(config.hub_url.clone())?);
    let store = options.open()?.into_shared();
    Ok(SyncClient::new(store, transport, config))
}

pub async fn run_sync_now(as_json: bool, options: &StoreOptions) -> Result<(), CliError> {
    let client = sync_client(options)?;
    let Some(report) = client.sync_now().await? else {
        println!("Sync already in progress");
        return Ok(());
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Sync completed: {}", format_report(&report));
    }
    Ok(())
}

pub async fn run_sync_daemon(options: &StoreOptions) -> Result<(), CliError> {
    let client = sync_client(options)?;
    let cancel = CancellationToken::new();

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received; stopping sync daemon");
        }
        shutdown.cancel();
    });

    client.run(cancel).await;
    Ok(())
}

pub fn run_sync_status(as_json: bool, options: &StoreOptions) -> Result<(), CliError> {
    let status = options.open()?.status()?;
    if as_json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!("notes:      {}", status.note_count);
        println!("categories: {}", status.category_count);
        println!("checksum:   {}", status.checksum);
    }
    Ok(())
}

pub fn run_sync_conflicts(
    limit: usize,
    as_json: bool,
    options: &StoreOptions,
) -> Result<(), CliError> {
    let conflicts = options.open()?.list_conflicts(limit)?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&conflicts)?);
        return Ok(());
    }

    if conflicts.is_empty() {
        println!("No sync conflicts recorded.");
        return Ok(());
    }

    for line in format_sync_conflict_lines(&conflicts) {
        println!("{line}");
    }
    Ok(())
}

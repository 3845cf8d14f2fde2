mod cli;
mod commands;
mod output;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Command, ConsistencyCommand, GcCommand, QueryCommand};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).with_target(false).init();

    let cli = Cli::parse();
    let token = cli.token;

    match cli.command {
        Command::Upload { path, ingester, original_name, uploaded_by, content_type, retention_policy } => {
            commands::upload(path, ingester, original_name, uploaded_by, content_type, retention_policy, token).await
        }
        Command::Finalize { file_id, source_se, ingester } => commands::finalize(file_id, source_se, ingester, token).await,
        Command::FinalizeStatus { transaction_id, ingester } => commands::finalize_status(transaction_id, ingester, token).await,
        Command::Capacity { se } => commands::capacity(se, token).await,
        Command::Available { admin, mode, min_free_bytes } => commands::available(admin, mode, min_free_bytes, token).await,
        Command::Gc { command } => match command {
            GcCommand::Run { admin } => commands::gc_run(admin, token).await,
            GcCommand::Orphans { se_id, admin, file_ids_on_storage } => commands::gc_orphans(se_id, admin, file_ids_on_storage, token).await,
        },
        Command::Consistency { command } => match command {
            ConsistencyCommand::Show { se } => commands::consistency_show(se, token).await,
            ConsistencyCommand::RebuildFull { se } => commands::consistency_rebuild(se, false, token).await,
            ConsistencyCommand::RebuildIncremental { se } => commands::consistency_rebuild(se, true, token).await,
            ConsistencyCommand::CleanupExpired { se } => commands::consistency_cleanup_expired(se, token).await,
        },
        Command::Query { command } => match command {
            QueryCommand::Get { file_id, query } => commands::query_get(file_id, query, token).await,
            QueryCommand::Search { storage_element_id, include_deleted, query } => {
                commands::query_search(storage_element_id, include_deleted, query, token).await
            }
            QueryCommand::Download { file_id, out, query } => commands::query_download(file_id, out, query, token).await,
        },
    }
}

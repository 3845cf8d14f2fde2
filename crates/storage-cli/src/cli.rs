use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "storage-cli",
    about = "Operator CLI for the storage element / ingester / admin / query fleet",
    version
)]
pub struct Cli {
    /// Bearer token shared by all four services. Falls back to ~/.storage-cli/token.
    #[arg(long, env = "STORAGE_TOKEN", global = true)]
    pub token: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Upload a file through an ingester (multipart, picks an SE by capacity).
    Upload {
        /// Local file to upload.
        path: PathBuf,

        #[arg(long, env = "INGESTER_URL", default_value = "http://localhost:8081")]
        ingester: String,

        #[arg(long)]
        original_name: Option<String>,

        #[arg(long)]
        uploaded_by: Option<String>,

        #[arg(long)]
        content_type: Option<String>,

        #[arg(long, default_value = "permanent")]
        retention_policy: RetentionArg,
    },

    /// Copy a temporary upload onto a permanent SE and verify the checksum.
    Finalize {
        file_id: String,

        /// Storage element id the file currently lives on.
        #[arg(long)]
        source_se: String,

        #[arg(long, env = "INGESTER_URL", default_value = "http://localhost:8081")]
        ingester: String,
    },

    /// Poll the status of a finalize transaction.
    FinalizeStatus {
        transaction_id: String,

        #[arg(long, env = "INGESTER_URL", default_value = "http://localhost:8081")]
        ingester: String,
    },

    /// Show a storage element's reported capacity.
    Capacity {
        #[arg(long, env = "SE_URL")]
        se: String,
    },

    /// List the storage elements admin currently considers available.
    Available {
        #[arg(long, env = "ADMIN_URL", default_value = "http://localhost:8080")]
        admin: String,

        #[arg(long)]
        mode: Option<String>,

        #[arg(long)]
        min_free_bytes: Option<u64>,
    },

    /// Garbage-collection controls against admin.
    Gc {
        #[command(subcommand)]
        command: GcCommand,
    },

    /// Metadata-cache consistency checks against a storage element.
    Consistency {
        #[command(subcommand)]
        command: ConsistencyCommand,
    },

    /// Read-only lookups against query's cache.
    Query {
        #[command(subcommand)]
        command: QueryCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum GcCommand {
    /// Run a GC pass: process the cleanup queue, enqueue expired/finalized files.
    Run {
        #[arg(long, env = "ADMIN_URL", default_value = "http://localhost:8080")]
        admin: String,
    },

    /// Detect and enqueue orphaned files on one storage element.
    Orphans {
        se_id: String,

        #[arg(long, env = "ADMIN_URL", default_value = "http://localhost:8080")]
        admin: String,

        /// File ids the storage element actually reports having, comma-separated.
        #[arg(long, value_delimiter = ',')]
        file_ids_on_storage: Vec<String>,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConsistencyCommand {
    /// Compare the attribute sidecars on disk against the metadata cache.
    Show {
        #[arg(long, env = "SE_URL")]
        se: String,
    },

    /// Rebuild the metadata cache from every attribute sidecar on disk.
    RebuildFull {
        #[arg(long, env = "SE_URL")]
        se: String,
    },

    /// Rebuild the metadata cache from sidecars newer than the last rebuild.
    RebuildIncremental {
        #[arg(long, env = "SE_URL")]
        se: String,
    },

    /// Drop expired cache rows past their TTL.
    CleanupExpired {
        #[arg(long, env = "SE_URL")]
        se: String,
    },
}

#[derive(Debug, Subcommand)]
pub enum QueryCommand {
    /// Fetch a single file's cached view.
    Get {
        file_id: String,

        #[arg(long, env = "QUERY_URL", default_value = "http://localhost:8083")]
        query: String,
    },

    /// Search the cache, optionally scoped to one storage element.
    Search {
        #[arg(long)]
        storage_element_id: Option<String>,

        #[arg(long)]
        include_deleted: bool,

        #[arg(long, env = "QUERY_URL", default_value = "http://localhost:8083")]
        query: String,
    },

    /// Download a file's bytes, proxied through query from its owning SE.
    Download {
        file_id: String,

        /// Path to write the downloaded bytes to.
        out: PathBuf,

        #[arg(long, env = "QUERY_URL", default_value = "http://localhost:8083")]
        query: String,
    },
}

#[derive(Debug, Clone, ValueEnum)]
pub enum RetentionArg {
    Permanent,
    Temporary,
}

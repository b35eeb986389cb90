//! Warehouse CLI: store, fetch and manage objects by address.
//!
//! Reads DEFAULT_SERVICE, DEFAULT_LOCATION, DEFAULT_BUCKET and the backend
//! settings from the environment (or a `.env` file).

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use tokio::io::AsyncRead;
use warehouse_cli::{init_tracing, CopyDestination};
use warehouse_core::WarehouseConfig;
use warehouse_storage::{CubbyOptions, Destination, Source, Warehouse};

#[derive(Parser)]
#[command(name = "warehouse", about = "Uniform object storage CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store content at an address, replacing any previous content
    Put {
        /// Object address, e.g. s3://eu-west-1/media/cat.png
        address: String,
        /// Read content from a file
        #[arg(long)]
        file: Option<PathBuf>,
        /// Use this string as content
        #[arg(long)]
        data: Option<String>,
        /// Read content from stdin
        #[arg(long)]
        stdin: bool,
        /// Content type to record
        #[arg(long)]
        content_type: Option<String>,
        /// Access policy, e.g. public-read
        #[arg(long)]
        acl: Option<String>,
    },
    /// Fetch decoded content to stdout or a file
    Get {
        address: String,
        /// Write to this path; a directory receives <dir>/<key>
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Delete an object
    Rm { address: String },
    /// List objects in a bucket
    Ls {
        /// Bucket address, e.g. file:///media
        address: String,
        #[arg(long)]
        prefix: Option<String>,
        #[arg(long)]
        max_keys: Option<usize>,
    },
    /// Show size and attributes of an object
    Stat { address: String },
    /// Print a locator for an object
    Url {
        address: String,
        /// Expiry in seconds; omitted or 0 gives an unsigned URL that only
        /// works for publicly readable objects
        #[arg(long)]
        expires: Option<u64>,
    },
    /// Copy an object to another address or to a key in the same bucket
    Cp { source: String, destination: String },
    /// Move an object to another address or to a key in the same bucket
    Mv { source: String, destination: String },
    /// Change the recorded content type
    SetMimetype {
        address: String,
        value: String,
        /// Access policy to re-apply (required)
        #[arg(long)]
        acl: String,
    },
    /// Change the recorded content encoding (gzip enables transparent compression)
    SetEncoding {
        address: String,
        value: String,
        /// Access policy to re-apply (required)
        #[arg(long)]
        acl: String,
    },
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("Serialize output")?;
    println!("{}", out);
    Ok(())
}

async fn run(warehouse: &Warehouse, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Put {
            address,
            file,
            data,
            stdin,
            content_type,
            acl,
        } => {
            let mut input = tokio::io::stdin();
            let reader: Option<&mut (dyn AsyncRead + Unpin + Send)> =
                if stdin { Some(&mut input) } else { None };
            let source = Source::from_options(file, reader, None, data)?;

            let options = CubbyOptions { content_type, acl };
            let mut cubby = warehouse.resolve_cubby(&address, options).await?;
            cubby
                .store(source)
                .await
                .with_context(|| format!("Failed to store {}", address))?;
            tracing::info!(address = %cubby, "Stored object");
            println!("{}", cubby);
        }
        Commands::Get { address, output } => {
            let mut cubby = warehouse
                .resolve_cubby(&address, CubbyOptions::default())
                .await?;
            let mut stdout = tokio::io::stdout();
            let destination = match output {
                Some(path) => Destination::Path(path),
                None => Destination::Writer(&mut stdout),
            };
            cubby
                .retrieve_to(destination)
                .await
                .with_context(|| format!("Failed to retrieve {}", address))?;
        }
        Commands::Rm { address } => {
            let mut cubby = warehouse
                .resolve_cubby(&address, CubbyOptions::default())
                .await?;
            let deleted = cubby.delete().await?;
            tracing::info!(address = %address, deleted, "Delete completed");
            print_json(&serde_json::json!({ "address": address, "deleted": deleted }))?;
        }
        Commands::Ls {
            address,
            prefix,
            max_keys,
        } => {
            let entries =
                warehouse_cli::list(warehouse, &address, prefix.as_deref(), max_keys).await?;
            for entry in entries {
                println!("{}", entry);
            }
        }
        Commands::Stat { address } => {
            let stat = warehouse_cli::stat(warehouse, &address).await?;
            print_json(&stat)?;
        }
        Commands::Url { address, expires } => {
            let cubby = warehouse
                .resolve_cubby(&address, CubbyOptions::default())
                .await?;
            println!("{}", cubby.url(warehouse_cli::expiration(expires)).await?);
        }
        Commands::Cp {
            source,
            destination,
        } => {
            let destination = CopyDestination::parse(&destination);
            warehouse_cli::transfer(warehouse, &source, &destination, false).await?;
        }
        Commands::Mv {
            source,
            destination,
        } => {
            let destination = CopyDestination::parse(&destination);
            warehouse_cli::transfer(warehouse, &source, &destination, true).await?;
        }
        Commands::SetMimetype {
            address,
            value,
            acl,
        } => {
            let mut cubby = warehouse
                .resolve_cubby(&address, CubbyOptions::default().acl(acl))
                .await?;
            println!("{}", cubby.set_mimetype(&value).await?);
        }
        Commands::SetEncoding {
            address,
            value,
            acl,
        } => {
            let mut cubby = warehouse
                .resolve_cubby(&address, CubbyOptions::default().acl(acl))
                .await?;
            println!("{}", cubby.set_content_encoding(&value).await?);
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    let config = WarehouseConfig::from_env()
        .context("Failed to load configuration. Set DEFAULT_SERVICE (file or s3)")?;
    let warehouse = Warehouse::from_config(config).context("Failed to initialize warehouse")?;

    run(&warehouse, cli.command).await
}

use anyhow::{Context, Result};
use blobkit::models::StorageConfig;
use blobkit::{token, ObjectStorage};
use clap::{Parser, Subcommand};
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "blobkit")]
#[command(about = "Read, write and sign URLs for objects in a blob container")]
struct CliArgs {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Upload a local file.
    Put {
        name: String,
        file: PathBuf,
        #[arg(long)]
        content_type: Option<String>,
    },
    /// Download an object to stdout or a file.
    Get {
        name: String,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Delete an object (absent objects are fine).
    Rm { name: String },
    /// Exit 0 if the object exists, 1 otherwise.
    Exists { name: String },
    /// Print size and last-modified time.
    Stat { name: String },
    /// List object names.
    Ls,
    /// Print the public URL, signed when a CDN token key is configured.
    Url { name: String },
    /// Encrypt or decrypt a CDN token directly.
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },
}

#[derive(Debug, Subcommand)]
enum TokenAction {
    Encrypt {
        #[arg(short, long)]
        key: String,
        /// Parameters to encrypt, e.g. `ec_expire=1700000000`.
        #[arg(short, long)]
        token: String,
    },
    Decrypt {
        #[arg(short, long)]
        key: String,
        #[arg(short, long)]
        token: String,
    },
}

fn run_token(action: TokenAction) -> Result<()> {
    let output = match action {
        TokenAction::Encrypt { key, token } => token::encrypt_v3(&key, &token)?,
        TokenAction::Decrypt { key, token } => token::decrypt_v3(&key, &token)?,
    };
    println!("{}", output);
    Ok(())
}

/// Returns the process exit code.
async fn run(command: Command) -> Result<i32> {
    let config = StorageConfig::from_env().context("Failed to load storage configuration")?;
    let storage = ObjectStorage::from_config(config)?;

    match command {
        Command::Put {
            name,
            file,
            content_type,
        } => {
            let data = fs::read(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let stored = storage
                .write(&name, &data, content_type.as_deref())
                .await?;
            info!("Uploaded {} ({} bytes)", stored, data.len());
            println!("{}", stored);
        }
        Command::Get { name, output } => {
            let data = storage.open(&name).await?;
            match output {
                Some(path) => {
                    fs::write(&path, &data)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    info!("Saved {} to {}", name, path.display());
                }
                None => std::io::stdout().write_all(&data)?,
            }
        }
        Command::Rm { name } => {
            storage.delete(&name).await?;
            info!("Deleted {}", name);
        }
        Command::Exists { name } => {
            let exists = storage.exists(&name).await?;
            println!("{}", exists);
            if !exists {
                return Ok(1);
            }
        }
        Command::Stat { name } => {
            let size = storage.size(&name).await?;
            let modified = storage
                .modified_time(&name)
                .await?
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "unknown".to_string());
            println!("size: {}\nmodified: {}", size, modified);
        }
        Command::Ls => {
            for name in storage.list().await?.files {
                println!("{}", name);
            }
        }
        Command::Url { name } => println!("{}", storage.url(&name).await?),
        Command::Token { action } => run_token(action)?,
    }
    Ok(0)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "blobkit=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = CliArgs::parse();

    let result = match args.command {
        Command::Token { action } => run_token(action).map(|_| 0),
        command => run(command).await,
    };

    match result {
        Ok(0) => Ok(()),
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(1);
        }
    }
}

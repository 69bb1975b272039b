mod cli;

use anyhow::Context;
use bytes::Bytes;
use clap::Parser;
use futures::StreamExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use kodofs_adapter::{from_disk_config, DiskConfig, QiniuAdapter};
use kodofs_common::storage::{FileStorage, WriteOptions};

use cli::{Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cli = Cli::parse();

    let config = DiskConfig::load(&cli.config)?;
    let mut adapter = from_disk_config(&config)?;
    if let Some(alias) = cli.bucket.as_deref() {
        adapter.select_bucket(Some(alias))?;
    }
    debug!(
        config = %cli.config.display(),
        bucket = %adapter.active_bucket(),
        driver = %config.driver,
        "Adapter ready"
    );

    run(&mut adapter, cli.command).await
}

async fn run(adapter: &mut QiniuAdapter, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Put { local, key } => {
            let data = tokio::fs::read(&local)
                .await
                .with_context(|| format!("Failed to read {}", local.display()))?;
            let mime = mime_guess::from_path(&local).first_or_octet_stream();
            let options = WriteOptions::default().with_mime(mime.essence_str());
            let result = adapter.write(&key, Bytes::from(data), &options).await?;
            print_json(&result)?;
        }
        Command::Get { key, local } => match local {
            Some(path) => {
                let mut file = tokio::fs::File::create(&path)
                    .await
                    .with_context(|| format!("Failed to create {}", path.display()))?;
                let size = download(adapter, &key, &mut file).await?;
                info!(key = %key, path = %path.display(), size, "Downloaded");
            }
            None => {
                download(adapter, &key, &mut tokio::io::stdout()).await?;
            }
        },
        Command::List { prefix, recursive } => {
            let prefix = prefix.unwrap_or_default();
            let entries = adapter.list_contents(&prefix, recursive).await?;
            print_json(&entries)?;
        }
        Command::Stat { key } => {
            let stat = adapter.get_metadata(&key).await?;
            print_json(&stat)?;
        }
        Command::Exists { key } => {
            if !adapter.has(&key).await? {
                std::process::exit(1);
            }
        }
        Command::Remove { key } => {
            adapter.delete(&key).await?;
            info!(key = %key, "Deleted");
        }
        Command::RemoveDir { prefix } => {
            adapter.delete_dir(&prefix).await?;
            info!(prefix = %prefix, "Directory deleted");
        }
        Command::Move { src, dst, to } => {
            select_target(adapter, to.as_deref())?;
            adapter.rename(&src, &dst).await?;
            info!(src = %src, dst = %dst, "Moved");
        }
        Command::Copy { src, dst, to } => {
            select_target(adapter, to.as_deref())?;
            adapter.copy(&src, &dst).await?;
            info!(src = %src, dst = %dst, "Copied");
        }
        Command::Url { key } => {
            println!("{}", adapter.get_url(&key));
        }
    }
    Ok(())
}

/// Stream the object at `key` into `out`, returning the byte count.
async fn download<W: AsyncWrite + Unpin>(
    adapter: &QiniuAdapter,
    key: &str,
    out: &mut W,
) -> anyhow::Result<u64> {
    let mut stream = adapter.read_stream(key).await?;
    let mut size = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        out.write_all(&chunk).await?;
        size += chunk.len() as u64;
    }
    out.flush().await?;
    Ok(size)
}

/// The adapter ignores unknown move targets; the CLI reports them instead.
fn select_target(adapter: &mut QiniuAdapter, alias: Option<&str>) -> anyhow::Result<()> {
    if let Some(alias) = alias {
        if adapter.buckets().get(alias).is_none() {
            anyhow::bail!("bucket '{}' is not configured", alias);
        }
        adapter.select_move_target(alias);
    }
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

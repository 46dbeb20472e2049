pub mod cache;
pub mod cli;
pub mod engine;
pub mod logging;
pub mod metrics;
pub mod settings;

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use http::StatusCode;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::info;

use crate::cache::{
    CachedResource, DiskCache, HeaderFields, MetadataRecord, ResourceCache, StorageKeys,
};
use crate::cli::{Command, StoreArgs};
use crate::engine::EngineStats;
use crate::settings::Settings;

pub async fn run(settings: Settings, command: Command) -> Result<()> {
    match command {
        Command::Keys { key } => {
            let keys = StorageKeys::derive(&key);
            println!("metadata {}", keys.metadata);
            println!("body     {}", keys.body);
            Ok(())
        }
        Command::Stats => {
            let cache = DiskCache::open(&settings.cache_config()).await?;
            let report = render_stats(&settings.cache_dir, &cache.stats(), &metrics::gather());
            std::io::stdout().write_all(report.as_bytes())?;
            Ok(())
        }
        command => {
            let cache = DiskCache::open(&settings.cache_config()).await?;
            execute(&cache, command).await
        }
    }
}

/// Runs one cache command against any [`ResourceCache`].
pub async fn execute<C: ResourceCache>(cache: &C, command: Command) -> Result<()> {
    match command {
        Command::Header { key } => {
            let record = lookup(cache.header(&key).await, &key)?;
            print!("{}", render_record(&record));
        }
        Command::Get { key, output } => {
            let resource = lookup(cache.retrieve(&key).await, &key)?;
            let (record, mut body) = resource.into_parts();
            match output {
                Some(path) => {
                    let mut file = tokio::fs::File::create(&path)
                        .await
                        .with_context(|| format!("failed to create {}", path.display()))?;
                    let size = tokio::io::copy(&mut body, &mut file).await?;
                    file.flush().await?;
                    print!("{}", render_record(&record));
                    info!(key = %key, size, path = %path.display(), "wrote cached body");
                }
                None => {
                    eprint!("{}", render_record(&record));
                    let mut stdout = tokio::io::stdout();
                    tokio::io::copy(&mut body, &mut stdout).await?;
                    stdout.flush().await?;
                }
            }
        }
        Command::Put(args) => {
            let keys = args.keys.clone();
            let resource = build_resource(args).await?;
            cache.store(resource, &as_strs(&keys)).await?;
            info!(keys = keys.len(), "stored cache entry");
        }
        Command::Freshen(args) => {
            let keys = args.keys.clone();
            let resource = build_resource(args).await?;
            cache.freshen(resource, &as_strs(&keys)).await?;
            info!(keys = keys.len(), "freshened cache entry");
        }
        Command::Invalidate { keys } => {
            cache.invalidate(&as_strs(&keys)).await;
            info!(keys = keys.len(), "invalidated cache entries");
        }
        Command::Keys { .. } | Command::Stats => {
            return Err(anyhow!("command needs no cache handle"));
        }
    }
    Ok(())
}

fn lookup<T>(result: Result<T, cache::CacheError>, key: &str) -> Result<T> {
    match result {
        Ok(value) => Ok(value),
        Err(err) if err.is_miss() => Err(anyhow!("{key}: not found in cache")),
        Err(err) => Err(err.into()),
    }
}

fn as_strs(keys: &[String]) -> Vec<&str> {
    keys.iter().map(String::as_str).collect()
}

/// Formats on-disk usage followed by the counters of this process only.
fn render_stats(dir: &Path, stats: &EngineStats, metrics: &[u8]) -> String {
    let mut out = format!("dir          {}\n", dir.display());
    out.push_str(&format!("blobs        {}\n", stats.blobs));
    out.push_str(&format!("bytes_in_use {}\n", stats.bytes_in_use));
    out.push_str(&format!("target_bytes {}\n", stats.target_bytes));
    out.push_str(&format!("max_bytes    {}\n", stats.max_bytes));
    out.push_str("\n# process-local counters for this invocation, not cumulative\n");
    out.push_str(&String::from_utf8_lossy(metrics));
    out
}

fn render_record(record: &MetadataRecord) -> String {
    let mut out = format!("{}\n", record.status);
    for (name, values) in record.headers.iter() {
        for value in values {
            out.push_str(&format!("{name}: {value}\n"));
        }
    }
    out
}

/// Parses a `Name: value` header argument.
pub fn parse_header_arg(arg: &str) -> Result<(String, String)> {
    let (name, value) = arg
        .split_once(':')
        .ok_or_else(|| anyhow!("header {arg:?} is not in \"Name: value\" form"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(anyhow!("header {arg:?} has an empty name"));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

async fn build_resource(args: StoreArgs) -> Result<CachedResource> {
    let status = StatusCode::from_u16(args.status)
        .map_err(|_| anyhow!("invalid status code {}", args.status))?;
    let mut headers = HeaderFields::new();
    for arg in &args.headers {
        let (name, value) = parse_header_arg(arg)?;
        headers.append(name, value);
    }

    let body: Box<dyn AsyncRead + Send + Unpin> = match &args.body {
        Some(path) => Box::new(
            tokio::fs::File::open(path)
                .await
                .with_context(|| format!("failed to open body file {}", path.display()))?,
        ),
        None => Box::new(tokio::io::stdin()),
    };
    Ok(CachedResource::new(status, headers, body))
}

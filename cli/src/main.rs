/*
 * The CLI drives the archive pipeline from a terminal, mostly for local testing against a
 * `file://` store, and manages the repositories the watcher collects statistics for.
 */

use anyhow::{anyhow, Context};
use chrono::prelude::*;
use ghpulse::archive::{aggregate_file, ArchiveHour, HttpFetcher, DEFAULT_ARCHIVE_URL};
use ghpulse::backfill::{backfill, BackfillRequest, DEFAULT_CONCURRENCY};
use ghpulse::ingest::Ingestor;
use ghpulse::objects::BlobStore;
use ghpulse::partition::{ListWindow, PartitionStore};
use ghpulse_queries::table::DynamoTable;
use ghpulse_watch::repo::RepoName;
use ghpulse_watch::watchlist::Watchlist;
use gumdrop::Options;
use serde_json::Value;
use tracing::log::*;
use url::Url;

use std::path::Path;
use std::sync::Arc;

/*
 * Flags is a structure for managing command line parameters
 */
#[derive(Debug, Options)]
struct Flags {
    #[options(help = "print help message")]
    help: bool,
    #[options(help = "Report store URL, can also be set by GHPULSE_STORE_URL", meta = "URL")]
    store: Option<String>,
    #[options(help = "GitHub Archive base URL", meta = "URL")]
    archive: Option<String>,
    #[options(command)]
    command: Option<Command>,
}

#[derive(Debug, Options)]
enum Command {
    #[options(help = "count the events of a local archive file")]
    Aggregate(AggregateOpts),
    #[options(help = "ingest a single archive hour into the store")]
    Ingest(IngestOpts),
    #[options(help = "ingest every hour of a range of days")]
    Backfill(BackfillOpts),
    #[options(help = "list stored report partitions")]
    Partitions(PartitionsOpts),
    #[options(help = "manage the watched repositories")]
    Watch(WatchOpts),
}

#[derive(Debug, Options)]
struct AggregateOpts {
    help: bool,
    #[options(free, help = "a .json or .json.gz archive file")]
    paths: Vec<String>,
}

#[derive(Debug, Options)]
struct IngestOpts {
    help: bool,
    #[options(required)]
    year: i32,
    #[options(required)]
    month: u32,
    #[options(required)]
    day: u32,
    #[options(required, no_short, help = "hour of the day, 0-23")]
    hour: u32,
}

#[derive(Debug, Options)]
struct BackfillOpts {
    help: bool,
    #[options(required)]
    year: i32,
    #[options(required)]
    month: u32,
    #[options(required)]
    start_day: u32,
    #[options(required)]
    end_day: u32,
    #[options(help = "hours ingested at the same time")]
    concurrency: Option<usize>,
}

#[derive(Debug, Options)]
struct PartitionsOpts {
    help: bool,
    year: Option<i32>,
    #[options(help = "requires --year")]
    month: Option<u32>,
}

#[derive(Debug, Options)]
struct WatchOpts {
    help: bool,
    #[options(help = "DynamoDB table of watched repositories, can also be set by GHPULSE_REPOS_TABLE")]
    table: Option<String>,
    #[options(command)]
    action: Option<WatchAction>,
}

#[derive(Debug, Options)]
enum WatchAction {
    #[options(help = "start watching owner/name repositories")]
    Add(ReposOpts),
    #[options(help = "stop watching owner/name repositories")]
    Remove(ReposOpts),
    #[options(help = "list the watched repositories")]
    List(ListOpts),
}

#[derive(Debug, Options)]
struct ReposOpts {
    help: bool,
    #[options(free, help = "owner/name of each repository")]
    repos: Vec<String>,
}

#[derive(Debug, Options)]
struct ListOpts {
    help: bool,
}

/*
 * Main entrypoint for the command line
 */
#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let flags = Flags::parse_args_default_or_exit();
    debug!("Options as read: {:?}", flags);

    let output = execute(&flags).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn execute(flags: &Flags) -> Result<Value, anyhow::Error> {
    match &flags.command {
        None => Err(anyhow!(
            "a command is required, see --help\n\n{}",
            Flags::command_list().unwrap_or_default()
        )),
        Some(Command::Aggregate(opts)) => {
            let path = match opts.paths.as_slice() {
                [path] => path,
                _ => return Err(anyhow!("aggregate takes exactly one archive file")),
            };
            let aggregation = aggregate_file(Path::new(path))?;
            info!(
                "Read {} lines of {path}, skipped {}",
                aggregation.lines, aggregation.skipped
            );
            Ok(serde_json::to_value(&aggregation.report)?)
        }
        Some(Command::Ingest(opts)) => {
            let hour = ArchiveHour::new(opts.year, opts.month, opts.day, opts.hour)?;
            let summary = ingestor(flags)?.ingest(hour).await?;
            Ok(serde_json::to_value(summary)?)
        }
        Some(Command::Backfill(opts)) => {
            let request = BackfillRequest {
                year: opts.year,
                month: opts.month,
                start_day: opts.start_day,
                end_day: opts.end_day,
            };
            let concurrency = opts.concurrency.unwrap_or(DEFAULT_CONCURRENCY);
            let report = backfill(&ingestor(flags)?, &request, concurrency).await?;
            if !report.is_success() {
                warn!("{} hours failed to ingest", report.failed.len());
            }
            Ok(serde_json::to_value(report)?)
        }
        Some(Command::Partitions(opts)) => {
            let window = match (opts.year, opts.month) {
                (Some(year), Some(month)) => ListWindow::month(year, month),
                (Some(year), None) => ListWindow::year(year),
                (None, None) => ListWindow::trailing(Utc::now()),
                (None, Some(_)) => return Err(anyhow!("--month requires --year")),
            };
            let keys = partitions(flags)?.list(&window).await?;
            info!("Found {} partitions", keys.len());
            Ok(serde_json::to_value(keys)?)
        }
        Some(Command::Watch(opts)) => {
            let table = match &opts.table {
                Some(table) => table.to_string(),
                None => std::env::var("GHPULSE_REPOS_TABLE").unwrap_or_else(|_| "repos".into()),
            };
            info!("Using the watch table {table}");
            let config = aws_config::load_from_env().await;
            let client = aws_sdk_dynamodb::Client::new(&config);
            let watchlist = Watchlist::new(Arc::new(DynamoTable::new(client)), table);
            watch(&watchlist, opts).await
        }
    }
}

/*
 * Apply a watch action and return the watched repositories as they are afterwards
 */
async fn watch(watchlist: &Watchlist, opts: &WatchOpts) -> Result<Value, anyhow::Error> {
    let parse = |repos: &[String]| -> Result<Vec<RepoName>, anyhow::Error> {
        if repos.is_empty() {
            return Err(anyhow!("at least one owner/name repository is required"));
        }
        Ok(repos
            .iter()
            .map(|repo| repo.parse())
            .collect::<Result<Vec<RepoName>, _>>()?)
    };

    match &opts.action {
        None => return Err(anyhow!("watch needs one of add, remove or list")),
        Some(WatchAction::Add(add)) => {
            for repo in parse(&add.repos)? {
                watchlist.add(&repo).await?;
            }
        }
        Some(WatchAction::Remove(remove)) => {
            for repo in parse(&remove.repos)? {
                watchlist.remove(&repo).await?;
            }
        }
        Some(WatchAction::List(_)) => {}
    }
    Ok(serde_json::to_value(watchlist.repos().await?)?)
}

/*
 * Return the configured store location, falling back to the GHPULSE_STORE_URL environment
 * variable
 */
fn store_url(flags: &Flags) -> Result<Url, anyhow::Error> {
    let raw = match &flags.store {
        None => std::env::var("GHPULSE_STORE_URL")
            .context("--store or GHPULSE_STORE_URL is required")?,
        Some(url) => url.to_string(),
    };
    Url::parse(&raw).with_context(|| format!("invalid store URL {raw}"))
}

fn partitions(flags: &Flags) -> Result<PartitionStore, anyhow::Error> {
    let url = store_url(flags)?;
    info!("Using the store location of: {url}");
    Ok(PartitionStore::new(BlobStore::from_url(&url)?))
}

fn ingestor(flags: &Flags) -> Result<Ingestor, anyhow::Error> {
    let base = flags.archive.as_deref().unwrap_or(DEFAULT_ARCHIVE_URL);
    let base = Url::parse(base).with_context(|| format!("invalid archive URL {base}"))?;
    Ok(Ingestor::new(
        Arc::new(HttpFetcher::default()),
        partitions(flags)?,
        base,
    ))
}

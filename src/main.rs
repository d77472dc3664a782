use std::io::Write as _;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use readly::config::Config;
use readly::feed::{self, RefreshGuard};
use readly::storage::Database;
use readly::summarize::Summarizer;

#[derive(Parser, Debug)]
#[command(name = "readly", about = "Personal RSS/Atom feed reader", version)]
struct Args {
    /// Path to the config file (default: ~/.config/readly/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Subscribe to a feed URL
    Add {
        url: String,
        /// Place the feed in this folder (created if missing)
        #[arg(long)]
        folder: Option<String>,
    },
    /// Unsubscribe from a feed by URL
    Remove { url: String },
    /// List subscriptions, or the items of one feed
    List {
        /// Show the items of this feed URL instead of the subscription list
        #[arg(long)]
        feed: Option<String>,
        /// Show starred items across all feeds
        #[arg(long, conflicts_with = "feed")]
        starred: bool,
        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Fetch all feeds and store new items
    Refresh {
        /// Skip feeds fetched within the staleness threshold
        #[arg(long)]
        stale_only: bool,
    },
    /// Import subscriptions from an OPML file
    Import { file: PathBuf },
    /// Export subscriptions as OPML
    Export {
        /// Write to this file instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Mark an item as read
    Read { item_id: String },
    /// Mark an item as unread
    Unread { item_id: String },
    /// Toggle an item's star
    Star { item_id: String },
    /// Generate and store an AI summary for an item
    Summarize { item_id: String },
    /// Manage folders
    Folder {
        #[command(subcommand)]
        command: FolderCommand,
    },
}

#[derive(Subcommand, Debug)]
enum FolderCommand {
    /// Create a folder
    Add { name: String },
    /// Delete a folder (member feeds become uncategorized)
    Remove { name: String },
    /// Toggle a folder's expanded state
    Toggle { name: String },
    /// Move a feed into a folder, or out of all folders with --none
    Move {
        feed_url: String,
        /// Target folder name (created if missing)
        #[arg(required_unless_present = "none")]
        folder: Option<String>,
        /// Remove the feed from its folder
        #[arg(long)]
        none: bool,
    },
}

fn print_items(items: &[readly::storage::FeedItem], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(items)?);
        return Ok(());
    }
    for item in items {
        let marker = if item.is_read { " " } else { "*" };
        let star = if item.is_starred { "★" } else { " " };
        println!("{}{} {}  {}  {}", marker, star, item.id, item.title, item.link);
    }
    println!("{} items", items.len());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_path = args.config.unwrap_or_else(Config::default_path);
    let config = Config::load(&config_path).context("Failed to load configuration")?;

    let db_path = config.database_path();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create data directory")?;
    }
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = Database::open(db_path_str)
        .await
        .context("Failed to open database")?;

    let client = feed::build_client(Duration::from_secs(config.request_timeout_secs))
        .context("Failed to build HTTP client")?;

    match args.command {
        Command::Add { url, folder } => {
            if db.url_exists(&url).await? {
                anyhow::bail!("Already subscribed to {}", url);
            }
            let mut fetched = feed::fetch_and_parse_feed(&client, &url)
                .await
                .with_context(|| format!("Failed to fetch feed: {}", url))?;
            if let Some(name) = folder {
                let folder = db.find_or_create_folder(&name).await?;
                fetched.folder_id = Some(folder.id);
            }
            let item_count = fetched.items.len();
            db.add_feed(&fetched).await?;
            println!("Subscribed to \"{}\" ({} items)", fetched.title, item_count);
        }

        Command::Remove { url } => {
            let feed = db
                .get_feed_by_url(&url)
                .await?
                .ok_or_else(|| anyhow::anyhow!("Not subscribed to {}", url))?;
            db.remove_feed(&feed.id).await?;
            println!("Unsubscribed from \"{}\"", feed.title);
        }

        Command::List {
            feed,
            starred,
            json,
        } => match (feed, starred) {
            (Some(url), _) => {
                let feed = db
                    .get_feed_by_url(&url)
                    .await?
                    .ok_or_else(|| anyhow::anyhow!("Not subscribed to {}", url))?;
                let items = db.get_items(&feed.id).await?;
                print_items(&items, json)?;
            }
            (None, true) => {
                let items = db.get_starred_items().await?;
                print_items(&items, json)?;
            }
            (None, false) => {
                let feeds = db.get_feeds().await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&feeds)?);
                } else {
                    for feed in &feeds {
                        let unread = db.unread_count(&feed.id).await?;
                        println!("{:4} unread  {}  {}", unread, feed.title, feed.url);
                    }
                    println!("{} feeds", feeds.len());
                }
            }
        },

        Command::Refresh { stale_only } => {
            let mut feeds = db.get_feeds().await?;
            if stale_only {
                let threshold = Duration::from_secs(config.stale_threshold_minutes * 60);
                feeds.retain(|f| feed::fetcher::is_stale(f, threshold));
            }
            if feeds.is_empty() {
                println!("Nothing to refresh.");
                return Ok(());
            }
            let guard = RefreshGuard::new();
            let delay = Duration::from_millis(config.refresh_delay_ms);
            let outcomes = feed::refresh_all(&db, &client, &feeds, &guard, delay).await;
            let mut total_new = 0usize;
            let mut failures = 0usize;
            for outcome in &outcomes {
                match &outcome.result {
                    Ok(n) => {
                        total_new += n;
                        println!("{:4} new  {}", n, outcome.feed_title);
                    }
                    Err(e) => {
                        failures += 1;
                        eprintln!("FAILED  {}: {}", outcome.feed_title, e);
                    }
                }
            }
            println!(
                "Refreshed {} feeds: {} new items, {} failures",
                outcomes.len(),
                total_new,
                failures
            );
        }

        Command::Import { file } => {
            let path = file
                .to_str()
                .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in import path"))?;
            let outlines = feed::opml::parse_file(path).await?;
            let summary = feed::import_outlines(&db, &client, outlines).await?;
            println!(
                "Imported {} feeds ({} already subscribed, {} unreachable)",
                summary.imported, summary.skipped, summary.failed
            );
        }

        Command::Export { out } => {
            let feeds = db.get_feeds().await?;
            let folders = db.get_folders().await?;
            let opml = feed::export_opml(&feeds, &folders)?;
            match out {
                Some(path) => {
                    std::fs::write(&path, opml)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    println!("Exported {} feeds to {}", feeds.len(), path.display());
                }
                None => println!("{}", opml),
            }
        }

        Command::Read { item_id } => {
            db.mark_read(&item_id, true).await?;
        }

        Command::Unread { item_id } => {
            db.mark_read(&item_id, false).await?;
        }

        Command::Star { item_id } => {
            let starred = db.toggle_star(&item_id).await?;
            println!("{}", if starred { "Starred." } else { "Unstarred." });
        }

        Command::Summarize { item_id } => {
            let endpoint = config
                .summarize_endpoint
                .clone()
                .ok_or_else(|| anyhow::anyhow!("No summarize_endpoint configured"))?;
            let item = db.get_item(&item_id).await?;
            let summarizer = Summarizer::new(client.clone(), endpoint);
            let mut stdout = std::io::stdout();
            let summary = summarizer
                .summarize(&item.title, &item.content, |chunk| {
                    let _ = stdout.write_all(chunk.as_bytes());
                    let _ = stdout.flush();
                })
                .await
                .context("Summarization failed")?;
            println!();
            db.save_summary(&item_id, &summary).await?;
        }

        Command::Folder { command } => match command {
            FolderCommand::Add { name } => {
                let folder = db.add_folder(&name).await?;
                println!("Created folder \"{}\"", folder.name);
            }
            FolderCommand::Remove { name } => {
                let folder = db
                    .find_folder_by_name(&name)
                    .await?
                    .ok_or_else(|| anyhow::anyhow!("No folder named \"{}\"", name))?;
                db.remove_folder(&folder.id).await?;
                println!("Removed folder \"{}\"; its feeds are now uncategorized", name);
            }
            FolderCommand::Toggle { name } => {
                let folder = db
                    .find_folder_by_name(&name)
                    .await?
                    .ok_or_else(|| anyhow::anyhow!("No folder named \"{}\"", name))?;
                let expanded = db.toggle_folder(&folder.id).await?;
                println!(
                    "Folder \"{}\" is now {}",
                    name,
                    if expanded { "expanded" } else { "collapsed" }
                );
            }
            FolderCommand::Move {
                feed_url,
                folder,
                none,
            } => {
                let feed = db
                    .get_feed_by_url(&feed_url)
                    .await?
                    .ok_or_else(|| anyhow::anyhow!("Not subscribed to {}", feed_url))?;
                if none {
                    db.move_feed_to_folder(&feed.id, None).await?;
                    println!("Moved \"{}\" out of its folder", feed.title);
                } else {
                    let name = folder.expect("clap enforces folder unless --none");
                    let folder = db.find_or_create_folder(&name).await?;
                    db.move_feed_to_folder(&feed.id, Some(&folder.id)).await?;
                    println!("Moved \"{}\" into \"{}\"", feed.title, name);
                }
            }
        },
    }

    Ok(())
}

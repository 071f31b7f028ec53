//! url-blocker: manage the blacklist and serve the command interface.

use clap::{Parser, Subcommand};
use serde_json::Value;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime};
use url_blocker::{
    channel, display_pattern, Blocker, BlockerConfig, FetchSettings, JsonFileStore,
    LocalRuleEngine, NavigationEvent, Request, Response,
};

#[derive(Parser)]
#[command(name = "url-blocker")]
#[command(version = "0.1.0")]
#[command(about = "Block URLs with an adblock-style blacklist", long_about = None)]
struct Cli {
    /// Persisted state file
    #[arg(long, default_value = "url-blocker-state.json")]
    state: PathBuf,

    /// Installed rules file
    #[arg(long, default_value = "url-blocker-rules.json")]
    rules: PathBuf,

    /// Page blocked navigations are redirected to
    #[arg(long, default_value = "blocked.html")]
    block_page: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// First-run setup: migrate old entries, seed an empty list, install rules
    Install,

    /// Block a URL
    Add {
        /// Full URL to block
        url: String,

        /// Why it is blocked
        #[arg(short, long, default_value = "")]
        reason: String,
    },

    /// Remove a local pattern
    Remove {
        /// Pattern as listed, e.g. ||example.com/ads^
        pattern: String,
    },

    /// List entries
    List {
        /// List remote entries instead of local ones
        #[arg(long)]
        remote: bool,
    },

    /// Remove every entry
    Clear {
        /// Clear remote entries instead of local ones
        #[arg(long)]
        remote: bool,
    },

    /// Merge a JSON file of {url, info} items into the local list
    Import { file: PathBuf },

    /// Write the local list as JSON
    Export {
        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Fetch a remote feed once without subscribing
    ImportRemote { url: String },

    /// Subscribe to a remote feed
    Subscribe {
        url: String,

        /// Do not fetch right away
        #[arg(long)]
        no_fetch: bool,
    },

    /// Drop a subscription and its entries
    Unsubscribe { url: String },

    /// List subscriptions
    Subscriptions,

    /// Refresh every remote source
    Fetch,

    /// Configure periodic fetching
    Schedule {
        #[arg(long)]
        enabled: bool,

        /// Interval in minutes
        #[arg(long, default_value_t = 720)]
        interval: u64,
    },

    /// Show which entry a URL matches
    Test { url: String },

    /// List installed rules
    Rules,

    /// Reconcile installed rules with the lists
    Refresh,

    /// Serve JSON-lines commands on stdin/stdout
    Serve {
        /// Timer resolution in milliseconds
        #[arg(long, default_value_t = 250)]
        poll_ms: u64,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let store = Arc::new(JsonFileStore::open(&cli.state)?);
    let engine = Arc::new(LocalRuleEngine::open(&cli.rules)?);
    let config = BlockerConfig::default().with_block_page_url(cli.block_page);
    let blocker = Blocker::with_http(store, engine, config)?;

    match cli.command {
        Commands::Install => {
            let outcome = blocker.install(Instant::now())?;
            println!("Installed: {:?}", outcome);
        }
        Commands::Add { url, reason } => {
            let entry = blocker.add_rule(&url, &reason)?;
            println!("Added {}", entry.pattern);
        }
        Commands::Remove { pattern } => {
            if blocker.remove_rule(&pattern)? {
                println!("Removed {}", pattern);
            } else {
                println!("No such pattern: {}", pattern);
            }
        }
        Commands::List { remote } => {
            if remote {
                for entry in blocker.remote_entries()? {
                    println!(
                        "{}\t{}\t{}",
                        display_pattern(entry.pattern()),
                        entry.entry.reason,
                        entry.source.as_deref().unwrap_or("-")
                    );
                }
            } else {
                for entry in blocker.local_entries()? {
                    println!("{}\t{}\t{}", entry.pattern, display_pattern(&entry.pattern), entry.reason);
                }
            }
            let count = blocker.rule_count()?;
            println!("{} local, {} remote", count.local, count.remote);
        }
        Commands::Clear { remote } => {
            let removed = if remote {
                blocker.clear_remote()?
            } else {
                blocker.clear_local()?
            };
            println!("Removed {} entries", removed);
        }
        Commands::Import { file } => {
            let added = blocker.import_local(&fs::read_to_string(&file)?)?;
            println!("Imported {} new entries", added);
        }
        Commands::Export { output } => {
            let json = blocker.export_local()?;
            match output {
                Some(path) => {
                    fs::write(&path, json)?;
                    println!("Exported to {:?}", path);
                }
                None => println!("{}", json),
            }
        }
        Commands::ImportRemote { url } => {
            let count = blocker.import_remote(&url)?;
            println!("Imported {} remote entries from {}", count, url);
        }
        Commands::Subscribe { url, no_fetch } => {
            blocker.subscribe(&url)?;
            println!("Subscribed to {}", url.trim());
            if !no_fetch {
                print_fetch(&blocker)?;
            }
        }
        Commands::Unsubscribe { url } => {
            let removed = blocker.unsubscribe(&url)?;
            println!("Unsubscribed from {} ({} entries removed)", url, removed);
        }
        Commands::Subscriptions => {
            for (source, meta) in blocker.subscriptions()? {
                let updated = meta
                    .last_updated
                    .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
                    .map(|d| d.as_secs().to_string())
                    .unwrap_or_else(|| "never".to_string());
                println!("{}\tupdated={}\tcount={}\tfailures={}", source, updated, meta.count, meta.failures);
            }
        }
        Commands::Fetch => print_fetch(&blocker)?,
        Commands::Schedule { enabled, interval } => {
            blocker.set_fetch_settings(
                FetchSettings {
                    enabled,
                    interval_minutes: interval,
                },
                Instant::now(),
            )?;
            let settings = blocker.fetch_settings()?;
            println!(
                "Periodic fetch {} every {} minutes",
                if settings.enabled { "enabled" } else { "disabled" },
                settings.interval_minutes
            );
        }
        Commands::Test { url } => {
            let (matched, total) = blocker.test_match(&url)?;
            match matched {
                Some(m) => {
                    println!("Matched {} ({})", m.entry.pattern, m.entry.reason);
                    if let Some(source) = m.source {
                        println!("  from {}", source);
                    }
                }
                None => println!("No match among {} entries", total),
            }
        }
        Commands::Rules => {
            println!("{}", serde_json::to_string_pretty(&blocker.installed_rules()?)?);
        }
        Commands::Refresh => {
            println!("{:?}", blocker.refresh_rules()?);
        }
        Commands::Serve { poll_ms } => serve(blocker, Duration::from_millis(poll_ms.max(1)))?,
    }

    Ok(())
}

fn print_fetch(blocker: &Blocker) -> Result<(), Box<dyn std::error::Error>> {
    let outcome = blocker.fetch_remote(SystemTime::now())?;
    println!(
        "Fetched {} sources, {} failed, {} expired, {} remote entries",
        outcome.refreshed.len(),
        outcome.failed.len(),
        outcome.expired.len(),
        outcome.entries.len()
    );
    Ok(())
}

/// One JSON object per line in; one per line out. Lines carrying `tabId`
/// and `url` without an `action` are navigation events.
fn serve(blocker: Blocker, poll: Duration) -> Result<(), Box<dyn std::error::Error>> {
    let blocker = Arc::new(blocker);
    blocker.start(Instant::now())?;

    let (sender, receiver) = channel();
    let worker = {
        let blocker = Arc::clone(&blocker);
        thread::spawn(move || blocker.serve(&receiver, poll))
    };

    let stdin = io::stdin();
    let mut stdout = io::stdout().lock();
    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Value>(&line) {
            Ok(value) if value.get("action").is_none() && value.get("tabId").is_some() => {
                match serde_json::from_value::<NavigationEvent>(value) {
                    Ok(event) => match blocker.handle_navigation(&event) {
                        Ok(info) => Response::BlockedInfo { info },
                        Err(e) => Response::error(e.to_string()),
                    },
                    Err(e) => Response::error(format!("invalid navigation event: {}", e)),
                }
            }
            _ => match Request::from_json(&line) {
                Ok(request) => sender
                    .request(request, Duration::from_secs(60))
                    .unwrap_or_else(|e| Response::error(e.to_string())),
                Err(response) => response,
            },
        };

        writeln!(stdout, "{}", response.to_json()?)?;
        stdout.flush()?;
    }

    drop(sender);
    if worker.join().is_err() {
        log::error!("Command worker panicked");
    }
    Ok(())
}

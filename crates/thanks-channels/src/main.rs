use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use thanks_core::config::Config;
use thanks_core::model::Channel;
use thanks_core::registry::ChannelRegistry;
use thanks_core::resolver::{read_inputs, ChannelResolver, ImportSummary, DEFAULT_MESSAGE};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Manage the watched channel list", long_about = None)]
struct Args {
    /// Config file (default: ~/.config/thanks/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Look up a channel id without touching the list
    Resolve {
        /// @handle, channel URL or bare name
        input: String,
    },
    /// Resolve one channel and append it to the list
    Add {
        input: String,
        #[arg(short, long, default_value = DEFAULT_MESSAGE)]
        message: String,
    },
    /// Resolve every line of a file (`#` comments allowed) and append new channels
    Import {
        file: PathBuf,
        /// Lookups in flight at once
        #[arg(short, long, default_value_t = 10)]
        workers: usize,
        /// Only print the summary
        #[arg(long)]
        dry_run: bool,
    },
    /// Resolve rows that have a username but no channel id yet
    Fill,
    /// Print the channel list
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,hyper_util=warn,reqwest=warn")
            }),
        )
        .init();

    let args = Args::parse();
    let config_path = args.config.clone().unwrap_or_else(Config::config_path);
    let config = Config::load_from(&config_path)?;
    let registry = ChannelRegistry::new(&config.paths.channel_list);
    let resolver = ChannelResolver::new(&config.probe.user_agent)?;

    match args.command {
        Command::Resolve { input } => match resolver.resolve(&input).await? {
            Some(ch) => {
                println!("{}\t{}", ch.channel_id, ch.username());
                if let Some(subs) = &ch.subscribers {
                    println!("subscribers: {}", subs);
                }
            }
            None => anyhow::bail!("no channel id found for {}", input),
        },
        Command::Add { input, message } => {
            let ch = resolver
                .resolve(&input)
                .await?
                .with_context(|| format!("no channel id found for {}", input))?;
            if registry.contains(&ch.channel_id)? {
                println!("{} is already listed", ch.channel_id);
                return Ok(());
            }
            let channel = ch.into_channel(&message);
            if !registry.append(&channel) {
                anyhow::bail!("could not write {:?}", registry.path());
            }
            println!("added {} ({})", channel.display_name, channel.channel_id);
        }
        Command::Import {
            file,
            workers,
            dry_run,
        } => import(&registry, &resolver, &file, workers, dry_run).await?,
        Command::Fill => fill(&registry, &resolver).await?,
        Command::List => {
            let rows = registry.entries()?;
            for row in &rows {
                let id = if row.channel_id.is_empty() {
                    "(pending)"
                } else {
                    row.channel_id.as_str()
                };
                println!("{:<26} {:<30} {}", id, row.username, row.message);
            }
            println!("{} channels in {:?}", rows.len(), registry.path());
        }
    }
    Ok(())
}

async fn import(
    registry: &ChannelRegistry,
    resolver: &ChannelResolver,
    file: &std::path::Path,
    workers: usize,
    dry_run: bool,
) -> anyhow::Result<()> {
    let inputs = read_inputs(file)?;
    if inputs.is_empty() {
        println!("no channels in {:?}", file);
        return Ok(());
    }
    info!("resolving {} channels with {} workers", inputs.len(), workers);

    let known: HashSet<String> = registry
        .entries()?
        .into_iter()
        .map(|row| row.channel_id)
        .filter(|id| !id.is_empty())
        .collect();
    let outcomes = resolver.resolve_all(inputs, workers).await;
    let summary = ImportSummary::from_outcomes(outcomes, &known);

    println!("succeeded:  {:>4}", summary.succeeded);
    println!("failed:     {:>4}", summary.failed.len());
    println!("duplicates: {:>4}", summary.duplicates.len());
    println!("new:        {:>4}", summary.new.len());
    for (input, reason) in &summary.failed {
        println!("  failed    {} ({})", input, reason);
    }
    for (input, id) in &summary.duplicates {
        println!("  duplicate {} -> {}", input, id);
    }

    if dry_run {
        return Ok(());
    }
    let mut added = 0;
    for ch in summary.new {
        let channel: Channel = ch.into_channel(DEFAULT_MESSAGE);
        if registry.append(&channel) {
            println!("  added     {} ({})", channel.display_name, channel.channel_id);
            added += 1;
        }
    }
    println!("{} channels added to {:?}", added, registry.path());
    Ok(())
}

async fn fill(registry: &ChannelRegistry, resolver: &ChannelResolver) -> anyhow::Result<()> {
    let pending: Vec<String> = registry
        .entries()?
        .into_iter()
        .filter(|row| row.channel_id.is_empty() && !row.username.is_empty())
        .map(|row| row.username)
        .collect();
    if pending.is_empty() {
        println!("no rows without a channel id");
        return Ok(());
    }

    let mut filled = 0;
    for username in pending {
        match resolver.resolve(&username).await {
            Ok(Some(ch)) => {
                if registry.set_channel_id(&username, &ch.channel_id) {
                    println!("{} -> {}", username, ch.channel_id);
                    filled += 1;
                }
            }
            Ok(None) => warn!("{}: no channel id on page", username),
            Err(e) => warn!("{}: {:#}", username, e),
        }
    }
    println!("filled {} rows", filled);
    Ok(())
}

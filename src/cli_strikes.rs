use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use clap::builder::styling::{AnsiColor, Color, Style};
use clap::builder::Styles;
use clap::{Parser, Subcommand};
use queue_cleaner::clients::ArrQueueRecord;
use queue_cleaner::config::{AppConfig, CliConfig, FileConfig, DEFAULT_CONFIG_PATH};
use queue_cleaner::engine::{DecisionEngine, DecisionInput, ReannounceCoordinator};
use queue_cleaner::queue::{QueueItem, StrikeKey};
use queue_cleaner::strikes::{JsonFileStrikeStore, StrikeRecord, StrikeStore};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

fn get_styles() -> Styles {
    let header = Style::new()
        .bold()
        .underline()
        .fg_color(Some(Color::Ansi(AnsiColor::Cyan)));
    Styles::styled()
        .usage(header)
        .header(header)
        .literal(
            Style::new()
                .bold()
                .fg_color(Some(Color::Ansi(AnsiColor::Green))),
        )
        .error(
            Style::new()
                .bold()
                .fg_color(Some(Color::Ansi(AnsiColor::Red))),
        )
        .placeholder(Style::new().fg_color(Some(Color::Ansi(AnsiColor::BrightBlack))))
}

#[derive(Parser, Debug)]
#[command(styles = get_styles(), version = concat!(env!("CARGO_PKG_VERSION"), "-", env!("GIT_HASH")))]
struct CliArgs {
    /// Path to the TOML configuration file.
    #[clap(long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Strike file to operate on, overriding the configured one.
    #[clap(long)]
    pub strike_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Prints the strike document as JSON.
    List,

    /// Clears one strike record, or all of them.
    Clear {
        /// Key in the `service:id` form.
        #[clap(long)]
        key: Option<String>,
    },

    /// Evaluates one queue record (Arr JSON) against the configured rules,
    /// as if it was first seen an hour ago and has not moved since.
    Simulate {
        item: PathBuf,

        #[clap(long, default_value = "sonarr")]
        service: String,
    },

    /// Shows store statistics and the expected next run.
    Status,
}

fn load_config(args: &CliArgs) -> Result<AppConfig> {
    let file_config = if args.config.exists() {
        Some(FileConfig::load(&args.config)?)
    } else {
        None
    };
    let cli = CliConfig {
        strike_file: args.strike_file.clone(),
        ..CliConfig::default()
    };
    let mut config = AppConfig::resolve(&cli, file_config)?;
    if let Some(path) = &args.strike_file {
        config.general.strike_file_path = path.clone();
    }
    Ok(config)
}

fn list(store: &dyn StrikeStore) -> Result<Value> {
    let records: BTreeMap<String, StrikeRecord> = store
        .list()?
        .into_iter()
        .map(|(key, record)| (key.to_string(), record))
        .collect();
    Ok(serde_json::to_value(records)?)
}

fn clear(store: &dyn StrikeStore, key: Option<&str>) -> Result<String> {
    match key {
        Some(raw) => {
            let Some(key) = StrikeKey::parse(raw) else {
                bail!("Invalid key {:?}, expected service:id", raw);
            };
            if store.remove(&key)? {
                Ok(format!("Cleared {}", key))
            } else {
                Ok(format!("No strikes recorded for {}", key))
            }
        }
        None => {
            let removed = store.clear()?;
            Ok(format!("Cleared {} record(s)", removed))
        }
    }
}

/// Evaluate `item` as if it was first seen an hour before `now` at the same
/// size left.
fn simulate(config: &AppConfig, item: &QueueItem, now: DateTime<Utc>) -> Value {
    let hour_ago = now - Duration::hours(1);
    let record = StrikeRecord {
        last_size_left: Some(item.size_left),
        last_progress_at: Some(hour_ago),
        ..StrikeRecord::new(hour_ago)
    };
    let effective = config.effective_config(&item.service, &item.title);
    let whitelisted = config.whitelist.matches(item);
    let auto_search = config
        .service(&item.service)
        .map(|s| s.auto_search)
        .unwrap_or(false);

    let engine = DecisionEngine::new(config.general.reset_policy);
    let evaluation = engine.evaluate(
        &DecisionInput {
            item,
            record: Some(&record),
            config: &effective,
            whitelisted,
            auto_search,
            now,
        },
        &ReannounceCoordinator::new(),
    );

    json!({
        "service": item.service,
        "id": item.id,
        "title": item.title,
        "category": effective.category,
        "stall_limit": effective.stall_limit,
        "whitelisted": whitelisted,
        "verdict": evaluation.verdict.map(|v| v.as_str()),
        "decision": format!("{:?}", evaluation.decision),
        "reason": evaluation.decision.reason().as_str(),
    })
}

fn status(store: &dyn StrikeStore, config: &AppConfig, path: &Path) -> Result<Value> {
    let records = store.list()?;
    let active = records.iter().filter(|(_, r)| r.count > 0).count();
    let last_write: Option<DateTime<Utc>> = std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .map(DateTime::<Utc>::from);
    let interval = config.general.interval_secs;
    Ok(json!({
        "strike_file": path.display().to_string(),
        "entries": records.len(),
        "active_strikes": active,
        "interval_secs": interval,
        "last_write": last_write.map(|t| t.to_rfc3339()),
        "next_run_estimate": last_write
            .map(|t| (t + Duration::seconds(interval as i64)).to_rfc3339()),
        "dry_run": config.general.dry_run,
    }))
}

fn main() -> Result<()> {
    let args = CliArgs::parse();
    let config = load_config(&args)?;
    let path = config.general.strike_file_path.clone();
    let store = JsonFileStrikeStore::open(path.clone());

    match &args.command {
        Command::List => println!("{}", serde_json::to_string_pretty(&list(&store)?)?),
        Command::Clear { key } => println!("{}", clear(&store, key.as_deref())?),
        Command::Simulate { item, service } => {
            let content = std::fs::read_to_string(item)
                .with_context(|| format!("Failed to read {:?}", item))?;
            let record: ArrQueueRecord = serde_json::from_str(&content)
                .with_context(|| format!("{:?} is not an Arr queue record", item))?;
            let item = record.into_queue_item(service);
            let result = simulate(&config, &item, Utc::now());
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Status => {
            let result = status(&store, &config, &path)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
    }
    Ok(())
}

use apod::query::{Query, QueryState};
use apod::{ApodServices, Config, Record};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "apod")]
#[command(about = "Fetch and cache the Astronomy Picture of the Day")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/apod/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Date to fetch, YYYY-MM-DD (default: today)
  #[arg(short, long)]
  date: Option<NaiveDate>,

  /// Also download the record's image through the asset cache
  #[arg(long)]
  download: bool,

  /// Print the record as JSON
  #[arg(long)]
  json: bool,

  #[command(subcommand)]
  command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Inspect or clear the asset cache
  Cache {
    #[command(subcommand)]
    action: CacheAction,
  },
}

#[derive(Subcommand, Debug)]
enum CacheAction {
  /// Print bytes used on disk
  Size,
  /// Delete every cached asset
  Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let config = Config::load(args.config.as_deref())?;

  // Held until exit so buffered log lines are flushed
  let _log_guard = match apod::logging::default_log_dir() {
    Some(dir) => Some(apod::logging::init(&dir)?),
    None => None,
  };

  let services = ApodServices::new(&config)?;

  match args.command {
    Some(Command::Cache { action }) => run_cache(&services, action).await,
    None => run_fetch(&services, args.date, args.download, args.json).await,
  }
}

async fn run_cache(services: &ApodServices, action: CacheAction) -> Result<()> {
  match action {
    CacheAction::Size => {
      let bytes = services.asset_cache_size_on_disk().await;
      println!("{} ({})", format_bytes(bytes), services.assets().directory().display());
    }
    CacheAction::Clear => {
      services
        .clear_asset_cache()
        .await
        .map_err(|e| eyre!("Failed to clear asset cache: {}", e))?;
      println!("Asset cache cleared");
    }
  }
  Ok(())
}

async fn run_fetch(
  services: &ApodServices,
  date: Option<NaiveDate>,
  download: bool,
  json: bool,
) -> Result<()> {
  let records = services.records().clone();
  let mut query = Query::new(move |date| {
    let records = records.clone();
    async move { records.get_record(date).await }
  });

  query.request(date);
  query.wait().await;

  let record = match query.state() {
    QueryState::Success(record) => record,
    QueryState::Error(e) => return Err(eyre!("{}\n{}", e, e.recovery_suggestion())),
    _ => return Err(eyre!("Record request was cancelled")),
  };

  if json {
    println!("{}", serde_json::to_string_pretty(record)?);
  } else {
    print_record(record);
  }

  if download {
    if !record.is_image() {
      println!("Record is not an image; nothing to download");
      return Ok(());
    }

    let url = record.effective_asset_url();
    match services.fetch_and_cache_asset(url).await {
      Some(blob) => println!("Image: {} ({})", url, format_bytes(blob.len() as u64)),
      None => println!("Image unavailable: {}", url),
    }
  }

  Ok(())
}

fn print_record(record: &Record) {
  println!("{}  {}", record.date, record.title);
  if let Some(attribution) = &record.attribution {
    println!("Credit: {}", attribution);
  }
  println!("Media: {:?}  {}", record.media_kind, record.effective_asset_url());
  println!();
  println!("{}", record.explanation);
}

fn format_bytes(bytes: u64) -> String {
  const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
  let mut value = bytes as f64;
  let mut unit = 0;
  while value >= 1024.0 && unit < UNITS.len() - 1 {
    value /= 1024.0;
    unit += 1;
  }
  if unit == 0 {
    format!("{} B", bytes)
  } else {
    format!("{:.1} {}", value, UNITS[unit])
  }
}

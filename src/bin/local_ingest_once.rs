use chrono::{Duration, NaiveDate, Utc};
use vercel_runtime::Error;

use omnilytics_rust::accounts::ingest_stored_account;
use omnilytics_rust::config::AppConfig;
use omnilytics_rust::db::MySqlStore;
use omnilytics_rust::ingest::{IngestOptions, IngestWindow};
use omnilytics_rust::logging;
use omnilytics_rust::providers::youtube::youtube_oauth_client_from_env;
use omnilytics_rust::store::AccountKey;

fn validate_database_url(config: &AppConfig) -> Result<(), Error> {
  let url = config.database_url.as_deref().unwrap_or_default();
  if url.is_empty() {
    return Err(Box::new(std::io::Error::other("Missing TIDB_DATABASE_URL (or DATABASE_URL)")) as Error);
  }
  if !url.contains("://") {
    return Err(Box::new(std::io::Error::other(
      "Invalid TIDB_DATABASE_URL/DATABASE_URL (expected URL scheme like mysql://...)",
    )) as Error);
  }
  Ok(())
}

fn parse_flag_value(args: &[String], flag: &str) -> Option<String> {
  args
    .iter()
    .position(|a| a == flag)
    .and_then(|idx| args.get(idx + 1))
    .cloned()
}

fn parse_dt(input: &str) -> Option<NaiveDate> {
  NaiveDate::parse_from_str(input.trim(), "%Y-%m-%d").ok()
}

#[tokio::main]
async fn main() -> Result<(), Error> {
  logging::init();
  let config = AppConfig::from_env().map_err(|e| Box::new(e) as Error)?;
  validate_database_url(&config)?;
  let args: Vec<String> = std::env::args().collect();

  let user_id = parse_flag_value(&args, "--user-id").unwrap_or_default();
  let account_id = parse_flag_value(&args, "--account-id").unwrap_or_default();
  if user_id.trim().is_empty() || account_id.trim().is_empty() {
    eprintln!("Missing required --user-id and --account-id");
    eprintln!("Example: cargo run --bin local_ingest_once -- --user-id u123 --account-id youtube-UCxxxx --days 28");
    return Ok(());
  }

  let today = Utc::now().date_naive();
  let mut opts = IngestOptions::from_config(&config, today);

  let days_arg = parse_flag_value(&args, "--days").and_then(|v| v.parse::<i64>().ok());
  let start_arg = parse_flag_value(&args, "--start-dt").and_then(|v| parse_dt(&v));
  let end_arg = parse_flag_value(&args, "--end-dt").and_then(|v| parse_dt(&v));
  if days_arg.is_some() || start_arg.is_some() || end_arg.is_some() {
    let end_dt = end_arg.unwrap_or(opts.window.end);
    let start_dt = start_arg.unwrap_or_else(|| end_dt - Duration::days(days_arg.unwrap_or(config.lookback_days).max(1) - 1));
    if start_dt > end_dt {
      return Err(Box::new(std::io::Error::other("--start-dt must not be after --end-dt")) as Error);
    }
    opts.window = IngestWindow {
      start: start_dt,
      end: end_dt,
    };
  }
  if args.iter().any(|a| a == "--no-snapshot") {
    opts.data_base_url = None;
  }

  let (client, _redirect) = youtube_oauth_client_from_env()?;
  let store = MySqlStore::connect().await?;
  let key = AccountKey::new(user_id.trim(), account_id.trim());

  println!(
    "ingesting user_id={} account_id={} window={}..={}",
    key.user_id, key.account_id, opts.window.start, opts.window.end
  );

  let response = ingest_stored_account(&store, &key, &client, &opts, Utc::now())
    .await
    .map_err(|e| Box::new(e) as Error)?;

  println!(
    "{}",
    serde_json::to_string_pretty(&response).map_err(|e| Box::new(e) as Error)?
  );
  Ok(())
}

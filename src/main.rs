use apicache::cache::CacheStore;
use apicache::clock::SystemClock;
use apicache::storage::{DurableStorage, NoopStorage, SqliteStorage};
use apicache::{
  Config, Connectivity, Fetcher, HttpTransport, Interceptor, Method, Request, RetryQueue,
};
use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "apicache")]
#[command(about = "Client-side API cache with offline retry queue")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/apicache/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Origin that relative URLs are resolved against
  #[arg(long, global = true)]
  base_url: Option<String>,

  /// Write logs to this file instead of stderr
  #[arg(long, global = true)]
  log_file: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// GET a URL through the cache
  Get { url: String },
  /// Send a write (POST, PUT, PATCH, DELETE) through the cache
  Send {
    method: String,
    url: String,
    /// JSON request body
    #[arg(short, long)]
    data: Option<String>,
  },
  /// List queued writes waiting for connectivity
  Queue,
  /// Replay queued writes now
  Drain,
  /// Show persisted cache metadata and queue length
  Stats,
}

/// Keeps the non-blocking log writer flushing until exit.
type LogGuard = Option<tracing_appender::non_blocking::WorkerGuard>;

fn init_logging(log_file: Option<&Path>) -> Result<LogGuard> {
  let filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("apicache=info"));

  match log_file {
    Some(path) => {
      let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
      let name = path
        .file_name()
        .ok_or_else(|| eyre!("Invalid log file path: {}", path.display()))?;
      let appender = tracing_appender::rolling::never(dir, name);
      let (writer, guard) = tracing_appender::non_blocking(appender);
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
      Ok(Some(guard))
    }
    None => {
      tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
      Ok(None)
    }
  }
}

fn open_storage(config: &Config) -> Result<Arc<dyn DurableStorage>> {
  if !config.storage.enabled {
    return Ok(Arc::new(NoopStorage));
  }

  let storage = match &config.storage.path {
    Some(path) => SqliteStorage::open_at(path)?,
    None => SqliteStorage::open()?,
  };
  Ok(Arc::new(storage))
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = init_logging(args.log_file.as_deref())?;

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  // Override origin if specified on command line
  let config = if let Some(base_url) = args.base_url {
    Config { base_url, ..config }
  } else {
    config
  };

  let storage = open_storage(&config)?;
  let connectivity = Connectivity::new(true);
  let transport = HttpTransport::new(&config)?.with_connectivity(connectivity.clone());
  let fetcher = Fetcher::new(Arc::new(transport));

  match args.command {
    Command::Get { url } => {
      let interceptor = Interceptor::attach(&fetcher, &config, storage, connectivity)?;
      let result = interceptor.fetch(&Request::get(url)).await?;
      println!("{} ({})", result.data.status(), result.source);
      println!("{}", result.data.text());
      interceptor.uninstall(&fetcher);
    }
    Command::Send { method, url, data } => {
      let method = Method::from(method.as_str());
      if method == Method::Get {
        return Err(eyre!("Use `apicache get` for reads"));
      }

      let mut request = Request::new(method, url);
      if let Some(data) = data {
        let body: serde_json::Value =
          serde_json::from_str(&data).map_err(|e| eyre!("Invalid JSON body: {}", e))?;
        request = request.with_json(&body)?;
      }

      let interceptor = Interceptor::attach(&fetcher, &config, storage, connectivity)?;
      let pending_before = interceptor.queue().len();
      let outcome = fetcher.fetch(&request).await;
      let pending = interceptor.queue().len();
      interceptor.uninstall(&fetcher);

      match outcome {
        Ok(response) => {
          println!("{}", response.status());
          println!("{}", response.text());
        }
        Err(e) if pending > pending_before => {
          println!("Offline, queued for retry ({} pending): {}", pending, e);
        }
        Err(e) => return Err(e),
      }
    }
    Command::Queue => {
      let queue = RetryQueue::load(storage, Arc::new(SystemClock), config.retry.max_retries);
      let items = queue.items();
      if items.is_empty() {
        println!("Retry queue is empty");
      }
      for item in items {
        println!(
          "{}  {} {}  retries={}  queued={}",
          item.id,
          item.request.method,
          item.request.url,
          item.retry_count,
          item.created_at.to_rfc3339()
        );
      }
    }
    Command::Drain => {
      let interceptor = Interceptor::attach(&fetcher, &config, storage, connectivity)?;
      let report = interceptor.drain_retry_queue().await;
      println!(
        "succeeded={} retried={} dropped={} remaining={}",
        report.succeeded,
        report.retried,
        report.dropped,
        interceptor.queue().len()
      );
      interceptor.uninstall(&fetcher);
    }
    Command::Stats => {
      match CacheStore::load_meta(storage.as_ref()) {
        Some(meta) => {
          let at = chrono::DateTime::<chrono::Utc>::from_timestamp_millis(meta.timestamp)
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| meta.timestamp.to_string());
          println!("cache size={} updated={}", meta.size, at);
        }
        None => println!("No cache metadata recorded"),
      }
      let queue = RetryQueue::load(storage, Arc::new(SystemClock), config.retry.max_retries);
      println!("retry queue pending={}", queue.len());
    }
  }

  Ok(())
}

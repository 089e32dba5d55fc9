use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use dealstash::cache::CacheSource;
use dealstash::config::Config;
use dealstash::connectivity::{spawn_probe, ConnectivityMonitor, ConnectivityState, HttpProbe};
use dealstash::deals::{CachedDealsClient, Deal, DealId};
use dealstash::store::{self, LocalStore, MemoryStore};
use dealstash::sync::{SkipReason, SyncOutcome};

#[derive(Parser, Debug)]
#[command(name = "dealstash")]
#[command(about = "Offline-first deal cache with saved-deal sync")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/dealstash/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// User whose saved deals to work on
  #[arg(short, long, global = true)]
  user: Option<String>,

  /// Keep everything in memory for this run
  #[arg(long, global = true)]
  ephemeral: bool,

  /// Write logs to a daily file in this directory instead of stderr
  #[arg(long, global = true)]
  log_dir: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// List deals, from cache while fresh
  Deals {
    #[arg(short = 'k', long)]
    category: Option<String>,
    #[arg(short, long, default_value_t = 20)]
    limit: usize,
    /// Skip the cache and fetch from the API
    #[arg(long)]
    refresh: bool,
  },
  /// GET a JSON endpoint through the response cache
  Get { path: String },
  /// Save a deal (works offline)
  Save {
    deal_id: String,
    #[arg(long)]
    title: Option<String>,
    #[arg(long)]
    category: Option<String>,
  },
  /// Remove a saved deal (works offline)
  Unsave { deal_id: String },
  /// List saved deals and their sync status
  Saved,
  /// Show connectivity and queue status
  Status,
  /// Push queued saves and removals to the API
  Sync,
  /// Delete expired cache entries
  Sweep,
  /// Keep syncing on every reconnect until interrupted
  Watch,
}

fn init_logging(log_dir: Option<&Path>) -> Result<WorkerGuard> {
  let filter =
    EnvFilter::try_from_env("DEALSTASH_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

  let (writer, guard) = match log_dir {
    Some(dir) => tracing_appender::non_blocking(tracing_appender::rolling::daily(
      dir,
      "dealstash.log",
    )),
    None => tracing_appender::non_blocking(std::io::stderr()),
  };

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(log_dir.is_none())
    .try_init()
    .map_err(|e| eyre!("Failed to initialise logging: {}", e))?;

  Ok(guard)
}

fn require_user(user: Option<&str>) -> Result<&str> {
  user.ok_or_else(|| eyre!("No user given. Pass --user or set default_user in the config file."))
}

/// One reachability check, recorded as the current connectivity state.
async fn probe_once(config: &Config, connectivity: &ConnectivityState) -> Result<bool> {
  let probe = HttpProbe::new(config.api.health_url(), config.api.timeout())?;
  let online = probe.check().await;
  connectivity.set_online(online);
  Ok(online)
}

fn print_outcome(outcome: &SyncOutcome) {
  match outcome {
    SyncOutcome::Completed(report) => println!(
      "Synced {} saves and {} removals, dropped {}, {} still pending",
      report.synced, report.deleted, report.dropped, report.still_pending
    ),
    SyncOutcome::Skipped(SkipReason::Offline) => {
      println!("Offline: changes stay queued until the API is reachable")
    }
    SyncOutcome::Skipped(SkipReason::AlreadySyncing) => println!("A sync is already running"),
    SyncOutcome::Skipped(SkipReason::NoUser) => println!("No user to sync"),
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = init_logging(args.log_dir.as_deref())?;

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let user = args.user.clone().or_else(|| config.default_user.clone());

  let store: Arc<dyn LocalStore> = if args.ephemeral {
    Arc::new(MemoryStore::new())
  } else {
    store::open_or_degrade(config.storage.path.as_deref())
  };

  // Offline until a probe says otherwise
  let connectivity = Arc::new(ConnectivityState::new(false));
  let client = CachedDealsClient::from_config(&config, store, connectivity.clone())?;

  match args.command {
    Command::Deals {
      category,
      limit,
      refresh,
    } => {
      let result = if refresh {
        client.refresh_deals(category.as_deref(), limit).await?
      } else {
        client.deals(category.as_deref(), limit).await?
      };

      for deal in &result.data {
        println!(
          "{}\t{}\t{}",
          deal.id,
          deal.category.as_deref().unwrap_or("-"),
          deal.title.as_deref().unwrap_or("")
        );
      }
      if result.source == CacheSource::Cache {
        info!("Served {} deals from cache", result.data.len());
      }
    }

    Command::Get { path } => {
      let result = client.get_json(&path).await?;
      println!("{}", serde_json::to_string_pretty(&result.data)?);
    }

    Command::Save {
      deal_id,
      title,
      category,
    } => {
      let user = require_user(user.as_deref())?;
      let id = DealId::new(deal_id);

      // Prefer the cached listing as the snapshot
      let cached = client
        .get_cached_deals(None, usize::MAX)
        .into_iter()
        .find(|d| d.id == id);
      let mut deal = cached.unwrap_or_else(|| Deal::new(id.clone()));
      if let Some(title) = title {
        deal.title = Some(title);
      }
      if let Some(category) = category {
        deal.category = Some(category);
      }

      client.save_deal_offline(&deal, user)?;
      println!("Saved deal {}", id);

      if probe_once(&config, &connectivity).await? {
        print_outcome(&client.sync(Some(user)).await?);
      }
    }

    Command::Unsave { deal_id } => {
      let user = require_user(user.as_deref())?;
      let id = DealId::new(deal_id);
      client.remove_saved_deal_offline(&id, user)?;
      println!("Removed deal {}", id);

      if probe_once(&config, &connectivity).await? {
        print_outcome(&client.sync(Some(user)).await?);
      }
    }

    Command::Saved => {
      let user = require_user(user.as_deref())?;
      for record in client.get_saved_deals_offline(user) {
        let status = if record.synced_at.is_some() {
          "synced"
        } else {
          "pending"
        };
        println!(
          "{}\t{}\t{}",
          record.id,
          status,
          record.deal_snapshot.title.as_deref().unwrap_or("")
        );
      }
    }

    Command::Status => {
      let online = probe_once(&config, &connectivity).await?;
      println!("online: {}", online);
      if let Some(user) = user.as_deref() {
        println!("pending for {}: {}", user, client.pending_count(user)?);
      }
    }

    Command::Sync => {
      probe_once(&config, &connectivity).await?;
      print_outcome(&client.sync(user.as_deref()).await?);
    }

    Command::Sweep => {
      let removed = client.sweep()?;
      println!("Removed {} expired entries", removed);
    }

    Command::Watch => watch(&client, &config).await?,
  }

  Ok(())
}

/// Probe, debounce, and drain on every stable reconnect until Ctrl-C.
async fn watch(client: &CachedDealsClient, config: &Config) -> Result<()> {
  let connectivity = client.connectivity();
  let probe = HttpProbe::new(config.api.health_url(), config.api.timeout())?;

  // Initial state is whatever the network says at startup
  connectivity.set_online(probe.check().await);
  info!("Watching, online={}", connectivity.is_online());
  if connectivity.is_online() {
    if let Err(e) = client.drain_all().await {
      warn!("Initial sync failed: {}", e);
    }
  }

  let (signal_tx, signal_rx) = mpsc::channel(16);
  let probe_task = spawn_probe(probe, config.connectivity.probe_interval(), signal_tx);
  let monitor = ConnectivityMonitor::new(connectivity.clone(), config.connectivity.debounce())
    .with_trigger(client.orchestrator());
  let monitor_task = tokio::spawn(monitor.run(signal_rx));

  let mut sweep = tokio::time::interval(std::time::Duration::from_secs(
    config.cache.sweep_interval_secs.max(1),
  ));
  let ctrl_c = tokio::signal::ctrl_c();
  tokio::pin!(ctrl_c);

  loop {
    tokio::select! {
      _ = &mut ctrl_c => break,
      _ = sweep.tick() => match client.sweep() {
        Ok(0) => {}
        Ok(n) => info!("Swept {} expired cache entries", n),
        Err(e) => warn!("Cache sweep failed: {}", e),
      },
    }
  }

  probe_task.abort();
  monitor_task.abort();
  info!("Stopped watching");

  Ok(())
}

mod config;
mod context;
mod gateway;
mod http;
mod logging;
mod mirror;
mod model;
mod monitor;
mod queue;
mod storage;
mod worker;

use chrono::Local;
use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};

use context::SyncContext;
use gateway::{ServiceRegistry, TypedCollection};
use http::{HttpRequest, Method, Transport};
use model::{
  Entity, EntityKind, Exercise, Goal, ListFilter, MindActivity, Performance, Record, RoutineItem,
  Streak, Task, WaterIntake,
};

#[derive(Parser, Debug)]
#[command(name = "lifesync")]
#[command(about = "Offline-first client for the life tracking service")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/lifesync/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Start with the network considered unavailable
  #[arg(long, global = true)]
  offline: bool,

  /// Keep all state in memory for this run
  #[arg(long, global = true)]
  ephemeral: bool,

  /// Log debug output to stderr as well
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// List records of a collection
  List {
    kind: String,
    #[arg(long)]
    date: Option<String>,
    #[arg(long = "type")]
    entity_type: Option<String>,
    #[arg(long)]
    weekly: bool,
    /// Print records as received instead of decoding them
    #[arg(long)]
    raw: bool,
  },
  /// Create a record from a JSON object
  Create { kind: String, json: String },
  /// Merge a JSON object into an existing record
  Update {
    kind: String,
    id: String,
    json: String,
  },
  /// Delete a record
  Delete { kind: String, id: String },
  /// Forget the local copy of a collection
  Clear { kind: String },
  /// Record the water intake for a day
  Water {
    /// Millilitres
    amount: u32,
    /// Defaults to today
    #[arg(long)]
    date: Option<String>,
    #[arg(long)]
    goal: Option<u32>,
  },
  /// Show the streak
  Streak,
  /// Send a raw request through the worker
  Fetch {
    method: String,
    path: String,
    /// JSON request body
    #[arg(long)]
    body: Option<String>,
    /// Treat the request as a page navigation
    #[arg(long)]
    navigate: bool,
  },
  /// Show requests waiting for replay
  Queue {
    /// Drop them instead
    #[arg(long)]
    clear: bool,
  },
  /// Replay queued requests now
  Sync,
  /// Re-install the worker from the static manifest and show its caches
  Install,
  /// Probe the server and replay whenever it comes back
  Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;
  let _guard = logging::enable_logging(&config.data_dir()?, args.verbose)?;
  debug!(?args, "starting");

  let online = !args.offline;
  let mut ctx = if args.ephemeral {
    let network = Arc::new(http::ReqwestTransport::new(&config.server.url)?);
    SyncContext::ephemeral(config, network, online)
  } else {
    SyncContext::open(config, online)?
  };

  ctx.start().await?;
  let outcome = run(&mut ctx, args.command).await;
  ctx.shutdown().await;
  outcome
}

async fn run(ctx: &mut SyncContext, command: Command) -> Result<()> {
  match command {
    Command::List {
      kind,
      date,
      entity_type,
      weekly,
      raw,
    } => {
      let kind = kind.parse::<EntityKind>()?;
      let filter = ListFilter {
        date,
        entity_type,
        is_weekly: weekly.then_some(true),
      };
      if raw {
        print_json(&ctx.registry.get(kind)?.list(&filter).await?)
      } else {
        print_json(&list_decoded(&ctx.registry, kind, &filter).await?)
      }
    }
    Command::Create { kind, json } => {
      let result = ctx
        .registry
        .get(kind.parse::<EntityKind>()?)?
        .create(parse_record(&json)?)
        .await?;
      print_json(&result)
    }
    Command::Update { kind, id, json } => {
      let result = ctx
        .registry
        .get(kind.parse::<EntityKind>()?)?
        .update(&id, parse_record(&json)?)
        .await?;
      print_json(&result)
    }
    Command::Delete { kind, id } => {
      let result = ctx.registry.get(kind.parse::<EntityKind>()?)?.delete(&id).await?;
      print_json(&json!({ "deleted": id, "source": result.source }))
    }
    Command::Clear { kind } => {
      let kind = kind.parse::<EntityKind>()?;
      let dropped = ctx.mirror.clear(kind)?;
      print_json(&json!({ "cleared": kind.storage_name(), "records": dropped }))
    }
    Command::Water { amount, date, goal } => {
      let water: TypedCollection<WaterIntake> = ctx.registry.collection()?;
      let date = date.unwrap_or_else(|| Local::now().format("%Y-%m-%d").to_string());
      let result = water
        .create(&WaterIntake {
          id: String::new(),
          date,
          amount,
          goal,
        })
        .await?;
      print_json(&result)
    }
    Command::Streak => {
      let streaks: TypedCollection<Streak> = ctx.registry.collection()?;
      let result = streaks.list(&ListFilter::default()).await?;
      print_json(&result.map(|all| all.into_iter().next()))
    }
    Command::Fetch {
      method,
      path,
      body,
      navigate,
    } => {
      let method: Method = method.parse()?;
      let mut request = if navigate {
        if method != Method::Get {
          return Err(eyre!("Navigations are always GET, not {}", method));
        }
        HttpRequest::navigate(path)
      } else {
        HttpRequest::new(method, path)
      };
      if let Some(body) = body {
        let body: Value =
          serde_json::from_str(&body).map_err(|e| eyre!("Body is not valid JSON: {}", e))?;
        request = request.with_json(&body);
      }

      let response = ctx.worker.send(request).await?;
      let body = response
        .json_body()
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&response.body).into_owned()));
      print_json(&json!({
        "status": response.status,
        "servedBy": response.served_by(),
        "body": body,
      }))
    }
    Command::Queue { clear: false } => print_json(&ctx.queue.entries()?),
    Command::Queue { clear: true } => print_json(&json!({ "dropped": ctx.queue.clear()? })),
    Command::Sync => print_json(&ctx.request_sync().await?),
    Command::Install => {
      let state = ctx.worker.reinstall(&ctx.config.worker.static_assets).await?;
      let names = ctx.config.cache_names();
      print_json(&json!({
        "state": state,
        "staticCache": names.static_cache,
        "apiCache": names.api_cache,
        "caches": ctx.caches.cache_names()?,
        "mirror": ctx
          .mirror
          .counts()?
          .into_iter()
          .map(|(kind, count)| (kind.storage_name().to_string(), json!(count)))
          .collect::<serde_json::Map<_, _>>(),
      }))
    }
    Command::Watch => watch(ctx).await,
  }
}

async fn watch(ctx: &mut SyncContext) -> Result<()> {
  let mut events = ctx.subscribe();
  let mut connectivity = ctx.connectivity.subscribe();
  ctx.spawn_probe();
  info!(server = %ctx.config.server.url, "watching connectivity");

  loop {
    tokio::select! {
      _ = tokio::signal::ctrl_c() => break,
      changed = connectivity.changed() => {
        if changed.is_err() {
          break;
        }
        let online = *connectivity.borrow_and_update();
        print_json(&json!({ "online": online }))?;
      }
      event = events.recv() => match event {
        Ok(message) => print_json(&message)?,
        Err(RecvError::Lagged(skipped)) => debug!(skipped, "missed worker messages"),
        Err(RecvError::Closed) => break,
      },
    }
  }
  Ok(())
}

/// List through the typed collection of `kind`, dropping records that do not decode.
async fn list_decoded(
  registry: &ServiceRegistry,
  kind: EntityKind,
  filter: &ListFilter,
) -> Result<Value> {
  match kind {
    EntityKind::Tasks => list_as::<Task>(registry, filter).await,
    EntityKind::WaterIntake => list_as::<WaterIntake>(registry, filter).await,
    EntityKind::Exercises => list_as::<Exercise>(registry, filter).await,
    EntityKind::MindActivities => list_as::<MindActivity>(registry, filter).await,
    EntityKind::RoutineItems => list_as::<RoutineItem>(registry, filter).await,
    EntityKind::Goals => list_as::<Goal>(registry, filter).await,
    EntityKind::Performance => list_as::<Performance>(registry, filter).await,
    EntityKind::Streak => list_as::<Streak>(registry, filter).await,
  }
}

async fn list_as<T: Entity>(registry: &ServiceRegistry, filter: &ListFilter) -> Result<Value> {
  let result = registry.collection::<T>()?.list(filter).await?;
  Ok(serde_json::to_value(result)?)
}

fn parse_record(json: &str) -> Result<Record> {
  match serde_json::from_str::<Value>(json).map_err(|e| eyre!("Invalid JSON: {}", e))? {
    Value::Object(record) => Ok(record),
    other => Err(eyre!("Expected a JSON object, got {}", other)),
  }
}

fn print_json(value: &impl Serialize) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

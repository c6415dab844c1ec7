use clap::{Parser, Subcommand};
use color_eyre::Result;
use complaint_sync::app::{App, AppOptions};
use complaint_sync::backend::{parse_payload, Mutation};
use complaint_sync::{commands, config, logging};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "csync")]
#[command(about = "Offline-first sync client for the complaint tracker")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/csync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Keep the cache in memory for this run only
  #[arg(long)]
  ephemeral: bool,

  /// Start assuming the network is down
  #[arg(long)]
  offline: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Read a resource through the cache
  Fetch {
    /// complaints, dashboard_stats or complaint
    resource: String,
    /// Complaint list filter, key=value (repeatable)
    #[arg(short, long = "filter")]
    filters: Vec<String>,
    /// Complaint id
    #[arg(long)]
    id: Option<String>,
    /// Skip a fresh cache
    #[arg(short, long)]
    force: bool,
  },
  /// Create a complaint from a JSON object
  Create { data: String },
  /// Apply JSON updates to a complaint
  Update { id: String, updates: String },
  /// Show network, cache and sync state
  Status,
  /// Drop every cached entry, then force-refresh complaints and dashboard stats
  Clear {
    /// Only drop the cache
    #[arg(long)]
    no_refresh: bool,
  },
  /// Drop expired entries
  Sweep,
  /// Keep resources refreshed until ctrl-c
  Watch {
    /// Resources to watch (default: complaints and dashboard_stats)
    resources: Vec<String>,
  },
  /// List known resources
  Resources,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  if let Command::Resources = args.command {
    for res in commands::RESOURCES {
      println!("{:<16} {}", res.name, res.description);
    }
    return Ok(());
  }

  let config = config::Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(&config::data_dir()?.join("logs"))?;

  let options = AppOptions {
    ephemeral: args.ephemeral,
    start_offline: args.offline,
  };
  let app = App::new(config, options)?;

  match args.command {
    Command::Fetch {
      resource,
      filters,
      id,
      force,
    } => {
      let resource = commands::resolve(&resource, &filters, id.as_deref())?;
      let outcome = app.fetch(&resource, force).await?;
      if let Some(warning) = &outcome.warning {
        eprintln!("warning: {}", warning);
      }
      print_json(&outcome)?;
    }
    Command::Create { data } => {
      let mutation = Mutation::CreateComplaint {
        data: parse_payload(&data)?,
      };
      print_json(&app.mutate(&mutation).await?)?;
    }
    Command::Update { id, updates } => {
      let mutation = Mutation::UpdateComplaint {
        id,
        updates: parse_payload(&updates)?,
      };
      print_json(&app.mutate(&mutation).await?)?;
    }
    Command::Status => print_json(&app.status().await)?,
    Command::Clear { no_refresh: true } => {
      app.clear();
      println!("Cache cleared");
    }
    Command::Clear { no_refresh: false } => {
      for (key, result) in app.clear_and_refresh(&App::default_resources()).await {
        match result {
          Ok(outcome) => match &outcome.warning {
            Some(warning) => println!("{}: {}", key, warning),
            None => println!("{}: refreshed", key),
          },
          Err(e) => println!("{}: {}", key, e),
        }
      }
    }
    Command::Sweep => println!("Removed {} expired entries", app.sweep()),
    Command::Watch { resources } => {
      let resources = if resources.is_empty() {
        App::default_resources()
      } else {
        resources
          .iter()
          .map(|name| commands::resolve(name, &[], None))
          .collect::<Result<Vec<_>>>()?
      };
      app.run_watch(&resources).await?;
    }
    Command::Resources => {}
  }

  Ok(())
}

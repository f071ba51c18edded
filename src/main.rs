//! photoshelf daemon and catalog CLI.
//!
//! ```bash
//! photoshelf                     # index, pregenerate, re-scan daily until Ctrl-C
//! photoshelf --once              # index and pregenerate once, then exit
//! photoshelf timeline 0 50       # print a timeline page as JSON
//! photoshelf thumb 42 md         # print the cache path of a thumbnail
//! ```

use anyhow::{bail, Context, Result};
use chrono::Utc;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use photoshelf::config::Config;
use photoshelf::logging::{self, LogTarget};
use photoshelf::tasks::{CancelToken, Pipeline, PipelineOptions, TaskState, Watcher};
use photoshelf::thumbnails::SizeClass;
use photoshelf::Library;

/// How many five-year steps `memories` looks back.
const MEMORY_STEPS: usize = 5;

#[derive(Debug, Clone, PartialEq)]
enum Command {
    Serve,
    Scan,
    Pregen,
    Stats,
    Buckets,
    Timeline { offset: usize, limit: usize },
    Memories,
    Prune,
    Thumb { id: i64, size: SizeClass },
}

#[derive(Debug)]
struct CliArgs {
    config_path: Option<PathBuf>,
    once: bool,
    no_index: bool,
    command: Command,
}

fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut config_path = None;
    let mut once = false;
    let mut no_index = false;
    let mut positional = Vec::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("photoshelf {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                } else {
                    eprintln!("Error: --config requires a path argument");
                    std::process::exit(1);
                }
            }
            "--once" | "-1" => once = true,
            "--no-index" => no_index = true,
            arg if arg.starts_with('-') => {
                eprintln!("Unknown argument: {}", arg);
                print_help();
                std::process::exit(1);
            }
            arg => positional.push(arg.to_string()),
        }
        i += 1;
    }

    match parse_command(&positional) {
        Ok(command) => CliArgs {
            config_path,
            once,
            no_index,
            command,
        },
        Err(e) => {
            eprintln!("Error: {}", e);
            print_help();
            std::process::exit(1);
        }
    }
}

fn parse_command(args: &[String]) -> Result<Command> {
    let rest: Vec<&str> = args.iter().skip(1).map(String::as_str).collect();
    let command = match args.first().map(String::as_str) {
        None | Some("serve") => Command::Serve,
        Some("scan") => Command::Scan,
        Some("pregen") => Command::Pregen,
        Some("stats") => Command::Stats,
        Some("buckets") => Command::Buckets,
        Some("memories") => Command::Memories,
        Some("prune") => Command::Prune,
        Some("timeline") => {
            let offset = rest.first().map(|s| s.parse()).transpose()?.unwrap_or(0);
            let limit = rest.get(1).map(|s| s.parse()).transpose()?.unwrap_or(50);
            Command::Timeline { offset, limit }
        }
        Some("thumb") => {
            let id = rest
                .first()
                .context("thumb requires a media id")?
                .parse()
                .context("media id must be a number")?;
            let size = rest.get(1).map(|s| s.parse()).transpose()?.unwrap_or(SizeClass::Small);
            Command::Thumb { id, size }
        }
        Some(other) => bail!("unknown command: {other}"),
    };
    Ok(command)
}

fn print_help() {
    println!(
        r#"photoshelf - media indexer and thumbnail cache

USAGE:
    photoshelf [OPTIONS] [COMMAND]

COMMANDS:
    serve                   Index, pregenerate and re-scan periodically (default)
    scan                    Run one scan and print the summary
    pregen                  Run one thumbnail pregeneration pass
    stats                   Print library statistics
    buckets                 Print per-month counts
    timeline [OFFSET LIMIT] Print one timeline page (default 0 50)
    memories                Print photos from 5, 10, 15... years ago today
    prune                   Remove records for deleted and hidden files
    thumb ID [sm|md|lg]     Print the thumbnail path for a media id

OPTIONS:
    --config, -c PATH   Path to config file
    --once, -1          serve: run the startup pipeline once and exit
    --no-index          serve: skip the startup scan
    --version, -V       Show version
    --help, -h          Show this help message

ENVIRONMENT:
    PHOTOSHELF_CONFIG       Path to config file (overrides default location)
    PHOTOSHELF_PHOTO_PATHS  Comma-separated library roots
    PHOTOSHELF_CACHE_DIR    Cache directory for the catalog and thumbnails
    PHOTOSHELF_LOG          Log filter (trace, debug, info, warn, error)

Config file location: $XDG_CONFIG_HOME/photoshelf/config.toml"#
    );
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args();

    let target = match args.command {
        Command::Serve => LogTarget::Service {
            log_dir: Some(Config::config_dir().join("logs")),
        },
        _ => LogTarget::Stderr,
    };
    if let Err(e) = logging::init(target) {
        eprintln!("Warning: logging setup failed: {:#}", e);
    }

    let config = match &args.config_path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    let library = Arc::new(Library::open(config)?);
    info!("Catalog opened at {}", library.config().db_path().display());

    match args.command {
        Command::Serve => serve(library, args.once, args.no_index).await,
        Command::Scan => {
            let summary = library.scan(&CancelToken::new())?;
            print_json(&summary)
        }
        Command::Pregen => {
            let result = library.run_pregen(&CancelToken::new())?;
            print_json(&result)
        }
        Command::Stats => print_json(&library.db().stats()?),
        Command::Buckets => print_json(&library.db().month_buckets()?),
        Command::Timeline { offset, limit } => {
            print_json(&library.db().get_timeline(offset, limit)?)
        }
        Command::Memories => print_json(&library.db().memories(Utc::now(), MEMORY_STEPS)?),
        Command::Prune => {
            let missing = library.db().remove_missing()?;
            let hidden = library.db().remove_dotfiles()?;
            print_json(&serde_json::json!({ "missing": missing, "hidden": hidden }))
        }
        Command::Thumb { id, size } => match library.thumbnail_for(id, size) {
            Ok(path) => {
                println!("{}", path.display());
                Ok(())
            }
            Err(e) => {
                eprintln!("thumbnail unavailable: {}", e);
                std::process::exit(2);
            }
        },
    }
}

async fn serve(library: Arc<Library>, once: bool, no_index: bool) -> Result<()> {
    let config = library.config().clone();
    let cancel = CancelToken::new();

    let mut options = PipelineOptions::from(&config);
    if no_index {
        options.index_on_startup = false;
    }

    info!(
        roots = config.library.roots.len(),
        "photoshelf {} starting",
        env!("CARGO_PKG_VERSION")
    );
    let pipeline = Pipeline::start(Arc::clone(&library), options, cancel.clone())?;

    if once {
        let state = tokio::task::spawn_blocking(move || pipeline.join()).await?;
        return report(state);
    }

    let watcher = match config.watch.interval() {
        Some(interval) => Some(Watcher::spawn(
            Arc::clone(&library),
            interval,
            config.pregen.enabled,
            cancel.clone(),
        )?),
        None => {
            info!("Periodic re-scan disabled");
            None
        }
    };

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutting down...");
    cancel.cancel();

    let state = tokio::task::spawn_blocking(move || {
        let state = pipeline.join();
        if let Some(watcher) = watcher {
            watcher.join();
        }
        state
    })
    .await?;
    info!("Stopped");
    report(state)
}

fn report(state: TaskState) -> Result<()> {
    match state {
        TaskState::Failed(error) => bail!("background pipeline failed: {error}"),
        state => {
            info!("Background pipeline ended: {:?}", state);
            Ok(())
        }
    }
}

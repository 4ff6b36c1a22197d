// Forbid unwrap() and expect() in production code to prevent panics from
// corrupt data. Test code is allowed to use them for convenience.
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use pagekv::{Store, StoreConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const USAGE: &str = "usage: pagekv <db-path> put <key> <value> | get <key> | dump";

enum Command {
    Put { key: String, value: String },
    Get { key: String },
    Dump,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Option<(PathBuf, Command)> {
    let path = PathBuf::from(args.next()?);
    let command = match args.next()?.as_str() {
        "put" => Command::Put {
            key: args.next()?,
            value: args.next()?,
        },
        "get" => Command::Get { key: args.next()? },
        "dump" => Command::Dump,
        _ => return None,
    };
    if args.next().is_some() {
        return None;
    }
    Some((path, command))
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pagekv=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let Some((path, command)) = parse_args(std::env::args().skip(1)) else {
        eprintln!("{USAGE}");
        return ExitCode::from(2);
    };

    // Load configuration from environment variables
    let config = match StoreConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    match run(&path, config, command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(
    path: &Path,
    config: StoreConfig,
    command: Command,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut store = Store::open(path, config)?;
    let mut collection = store.collection("default");

    match command {
        Command::Put { key, value } => {
            collection.put(key, value)?;
        }
        Command::Get { key } => match collection.find(key.as_bytes())? {
            Some(item) => println!("{}", String::from_utf8_lossy(&item.value)),
            None => {
                return Err(format!("key not found: {key}").into());
            }
        },
        Command::Dump => {
            for item in collection.items()? {
                println!(
                    "{}\t{}",
                    String::from_utf8_lossy(&item.key),
                    String::from_utf8_lossy(&item.value)
                );
            }
        }
    }

    store.close()?;
    Ok(())
}

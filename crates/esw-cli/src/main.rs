//! 🚀 esw-cli -- the front door, the bouncer, the maitre d' of esw.
//!
//! 🎬 *[narrator voice]* "It all started with a simple main() function..."
//! 📦 This binary crate is the thin CLI wrapper that loads config,
//! sets up logging, and then lets the library do the heavy lifting.
//! Like a manager. 🦆

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use comfy_table::{Cell, Table, presets::NOTHING};
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

/// 📈 Forward metric samples from an NDJSON file into Elasticsearch.
#[derive(Debug, Parser)]
#[command(name = "esw", version)]
struct Args {
    /// 🔧 TOML config file. Must exist when given. Without it, `esw.toml` is used if present; ESW_* env vars always apply.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 📥 NDJSON file with one sample per line.
    samples: PathBuf,
}

const DEFAULT_CONFIG_FILE: &str = "esw.toml";

/// 🔍 Pick the config file to load, if any.
///
/// A file named on the command line has to exist. The fallback is optional,
/// env vars might carry everything. An unreadable path is an error either way.
fn resolve_config_file(explicit: Option<PathBuf>, fallback: &Path) -> Result<Option<PathBuf>> {
    let (candidate, required) = match explicit {
        Some(path) => (path, true),
        None => (fallback.to_path_buf(), false),
    };

    let exists = candidate.try_exists().with_context(|| {
        format!(
            "💀 Couldn't tell whether the config file exists. Was checking here: '{}'",
            candidate.display()
        )
    })?;

    match (exists, required) {
        (true, _) => Ok(Some(candidate)),
        (false, true) => anyhow::bail!(
            "💀 Config file '{}' does not exist. We looked everywhere. Under the couch. Behind the fridge.",
            candidate.display()
        ),
        (false, false) => {
            debug!(
                "🔧 No '{}' around, running on ESW_* env vars alone",
                candidate.display()
            );
            Ok(None)
        }
    }
}

/// 🚀 main() -- where it all begins. The "I pressed F5 and held my breath" moment.
///
/// 🔧 Steps:
/// 1. Init tracing (so we can see what goes wrong, and when)
/// 2. Parse args
/// 3. Load config (the moment of truth)
/// 4. Run the thing (send it and pray 🙏)
/// 5. Handle errors (cry)
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config_file = resolve_config_file(args.config, Path::new(DEFAULT_CONFIG_FILE))?;

    let app_config = esw::app_config::load_config(config_file.as_deref())
        .context("💀 In esw-cli, main, we couldn't load the config. Take a look at the file and your ESW_* variables.")?;

    match esw::run(app_config, &args.samples).await {
        Ok(summary) => {
            let mut table = Table::new();
            table.load_preset(NOTHING);
            table.add_row(vec![Cell::new("📡 writer"), Cell::new(summary.writer_name)]);
            table.add_row(vec![Cell::new("📦 index"), Cell::new(&summary.index)]);
            table.add_row(vec![Cell::new("📥 samples read"), Cell::new(summary.samples_read)]);
            table.add_row(vec![Cell::new("✅ batches written"), Cell::new(summary.batches_written)]);
            println!("{table}");
            Ok(())
        }
        Err(err) => {
            error!("💀 error: {}", err);
            // -- 🧅 peel the onion of sadness, one tear-jerking layer at a time
            let mut the_vibes_are_giving_connection_issues = false;
            for cause in err.chain().skip(1) {
                error!("⚠️  cause: {}", cause);
                let cause_str = cause.to_string();
                if cause_str.contains("could not open a session")
                    || cause_str.contains("error sending request")
                    || cause_str.contains("onnection refused")
                    || cause_str.contains("dns error")
                {
                    the_vibes_are_giving_connection_issues = true;
                }
            }

            if the_vibes_are_giving_connection_issues {
                error!(
                    "🔧 hint: looks like Elasticsearch isn't reachable. \
                    Double-check the [writer] url and that the cluster is actually running. \
                    If you're using Docker, `docker ps` is your friend. ☕"
                );
            }

            // 🗑️ Exit with prejudice. Process exitus maximus.
            std::process::exit(1);
        }
    }
}

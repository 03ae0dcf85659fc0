//! Runs a whole job in one process: map every input, group, reduce each
//! key into `mr-out-0`. The known-good baseline distributed output is
//! checked against.

mod apps;
mod util;

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mrsequential", about = "Single-process MapReduce baseline")]
struct Cli {
    /// Built-in application to run (wc, indexer, crash, nocrash,
    /// jobcount).
    app: String,

    /// Input files.
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let (map_fn, reduce_fn) = apps::lookup(&cli.app)
        .with_context(|| format!("unknown application {:?}", cli.app))?;
    info!(app = %cli.app, files = cli.files.len(), "running job sequentially");

    let mut intermediate = Vec::new();
    for file in &cli.files {
        let name = file.display().to_string();
        let contents = fs::read_to_string(file).with_context(|| format!("cannot read {name}"))?;
        intermediate.extend(map_fn(&name, &contents));
    }

    let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for kv in intermediate {
        grouped.entry(kv.key).or_default().push(kv.value);
    }

    let mut out = File::create("mr-out-0").context("cannot create mr-out-0")?;
    for (key, values) in &grouped {
        let values: Vec<&str> = values.iter().map(String::as_str).collect();
        writeln!(out, "{} {}", key, reduce_fn(key, values))?;
    }
    info!(keys = grouped.len(), "wrote mr-out-0");
    Ok(())
}

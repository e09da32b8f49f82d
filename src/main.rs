//! Batch aggregation of chat message history into a privacy-preserving,
//! monthly-bucketed n-gram frequency index.
//!
//! One invocation performs a full two-pass run over the message dump and
//! either completes or aborts; there is no partial-result salvage, and the
//! output database of an aborted run must be discarded.

mod config;
mod constants;
mod engine;
mod error;
mod ngram;
mod noise;
mod reader;
mod sink;
mod source;
mod tokenize;

use crate::{config::Config, engine::Aggregator, error::Error, source::JsonlStore};
use clap::Parser;
use log::LevelFilter;
use std::path::{Path, PathBuf};
#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

/// Aggregate a chat message dump into a monthly n-gram frequency database
///
/// Reads an ascending-timestamp message dump, counts word n-grams of widths
/// 1 to 5 in two passes, and writes per-width dimension tables plus a shared
/// monthly frequency fact table to a SQLite database. Published frequencies
/// carry deterministic noise derived from the secret nonce.
#[derive(Parser, Debug)]
#[command(version, author)]
pub struct Args {
    /// Message dump to aggregate, one JSON document per line
    ///
    /// A `.gz` suffix enables gzip decoding. Documents must be ordered by
    /// ascending timestamp; a violation aborts the run.
    pub messages: PathBuf,

    /// File holding the secret noise nonce
    ///
    /// The nonce must stay confidential: together with the corpus it fully
    /// determines the published noise.
    #[arg(short, long)]
    pub nonce_file: PathBuf,

    /// Output database path
    ///
    /// An existing file at this path is deleted and rebuilt from scratch.
    #[arg(short, long, default_value = "ngrams.db3")]
    pub database: PathBuf,

    /// Minimum global occurrence count for an n-gram to be retained
    ///
    /// Rare n-grams are both statistically useless and a privacy hazard, so
    /// anything below this cutoff is dropped after the first pass.
    #[arg(short, long, default_value_t = constants::DEFAULT_MIN_OCCURRENCES)]
    pub min_occurrences: u64,
}
//
impl Args {
    /// Decode and validate CLI arguments
    pub fn parse_and_check() -> Result<Self> {
        let args = Args::parse();
        anyhow::ensure!(
            args.min_occurrences >= 1,
            "a zero retention threshold would retain every n-gram ever seen"
        );
        Ok(args)
    }
}
//
#[tokio::main]
async fn main() -> Result<()> {
    // Set up logging
    setup_logging().map_err(|e| anyhow::format_err!("{e}"))?;
    log::info!("starting up");

    // Decode CLI arguments and assemble the run configuration
    let args = Args::parse_and_check()?;
    let nonce = read_nonce(&args.nonce_file)?;
    let config = Config::new(args, nonce);

    // Run both aggregation passes to completion
    let store = JsonlStore::new(config.clone());
    let mut aggregator = Aggregator::new(config);
    aggregator.run(&store).await
}

/// Load the secret nonce, without which no run may start
fn read_nonce(path: &Path) -> Result<Box<str>> {
    let nonce = std::fs::read_to_string(path).map_err(|error| {
        Error::Configuration(format!("cannot read nonce file {}: {error}", path.display()))
    })?;
    let nonce = nonce.trim();
    if nonce.is_empty() {
        return Err(Error::Configuration(format!("nonce file {} is empty", path.display())).into());
    }
    Ok(nonce.into())
}

/// Use anyhow for Result type erasure
pub use anyhow::Result;

/// Set up logging
fn setup_logging() -> syslog::Result<()> {
    syslog::init(
        syslog::Facility::LOG_USER,
        if cfg!(feature = "log-trace") {
            LevelFilter::Trace
        } else if cfg!(debug_assertions) {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        },
        None,
    )
}

/// Use jemalloc: the pass-1 count maps are huge and allocation-heavy
#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

//! Aggregation run configuration

use crate::constants::{BLACKOUT_INTERVALS_MS, BOT_AUTHORS, EXCLUDED_CHANNELS};
use crate::Args;
use chrono::{DateTime, Utc};
use std::{collections::HashSet, path::PathBuf, sync::Arc};

/// Final run configuration
///
/// This is the result of combining digested [`Args`] with the fixed corpus
/// policy from [`constants`](crate::constants). Please refer to [`Args`] to
/// know more about common fields.
#[derive(Clone, Debug)]
pub struct Config {
    /// Secret nonce seeding the per-n-gram noise sources
    ///
    /// Constant for the whole run, and to be kept confidential: an observer
    /// who knows it can reconstruct and cancel out the published noise.
    pub nonce: Box<str>,

    /// Time ranges excluded from all counts
    pub blackouts: Box<[BlackoutInterval]>,

    /// Automated accounts whose messages never reach the engine
    pub bot_authors: HashSet<Box<str>>,

    /// Channels excluded from the corpus
    pub excluded_channels: HashSet<Box<str>>,

    // Other fields have the same meaning as in Args
    pub min_occurrences: u64,
    pub messages: PathBuf,
    pub database: PathBuf,
}
//
impl Config {
    /// Determine run configuration from digested CLI arguments and the nonce
    /// loaded from disk
    pub(crate) fn new(args: Args, nonce: Box<str>) -> Arc<Self> {
        let Args {
            messages,
            nonce_file: _,
            database,
            min_occurrences,
        } = args;
        Arc::new(Self {
            nonce,
            blackouts: default_blackouts(),
            bot_authors: BOT_AUTHORS.iter().map(|id| Box::from(*id)).collect(),
            excluded_channels: EXCLUDED_CHANNELS.iter().map(|id| Box::from(*id)).collect(),
            min_occurrences,
            messages,
            database,
        })
    }

    /// Truth that a message timestamp falls inside a blackout interval
    pub fn in_blackout(&self, timestamp: DateTime<Utc>) -> bool {
        self.blackouts
            .iter()
            .any(|interval| interval.contains(timestamp))
    }

    /// Configuration for unit tests: tiny retention threshold, a fixed
    /// nonce, the standard denylists, and no blackouts
    #[cfg(test)]
    pub fn for_tests(database: PathBuf) -> Self {
        Self {
            nonce: "nonce".into(),
            blackouts: Box::new([]),
            bot_authors: BOT_AUTHORS.iter().map(|id| Box::from(*id)).collect(),
            excluded_channels: EXCLUDED_CHANNELS.iter().map(|id| Box::from(*id)).collect(),
            min_occurrences: 2,
            messages: PathBuf::new(),
            database,
        }
    }
}

/// A `[start, end)` time range excluded from all counts
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BlackoutInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}
//
impl BlackoutInterval {
    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        self.start <= timestamp && timestamp < self.end
    }
}

/// The known data-corruption windows from the fixed corpus policy
fn default_blackouts() -> Box<[BlackoutInterval]> {
    BLACKOUT_INTERVALS_MS
        .iter()
        .map(|&(start, end)| BlackoutInterval {
            start: DateTime::from_timestamp_millis(start)
                .expect("constant blackout bounds should be valid timestamps"),
            end: DateTime::from_timestamp_millis(end)
                .expect("constant blackout bounds should be valid timestamps"),
        })
        .collect()
}

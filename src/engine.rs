//! Two-pass n-gram aggregation engine
//!
//! Pass 1 (preprocessing) streams the whole corpus once and counts every
//! n-gram of widths 1 to 5 globally. The retention filter then keeps the
//! n-grams seen often enough, assigns them dense ids, and seeds their noise
//! sources. Pass 2 (aggregation) streams the corpus again, counts only the
//! retained n-grams, buckets counts by calendar month, and flushes one noisy
//! normalized frequency row per n-gram and month to the sink.
//!
//! Counting is strictly single-threaded: only the consumer side of the
//! reader pipeline ever touches the maps, so no locking is involved.

use crate::config::Config;
use crate::constants::AGG_EPOCH_YEAR;
use crate::error::Error;
use crate::ngram::{width_maps, Ngram, TokenSlice, WidthMaps};
use crate::noise::NoiseSource;
use crate::reader::{MessageEntry, MessageReader};
use crate::sink::{FrequencyRow, FrequencySink};
use crate::source::MessageStore;
use crate::tokenize::tokenize;
use crate::Result;
use anyhow::Context;
use chrono::{DateTime, Datelike, Utc};
use std::fmt;
use std::sync::Arc;

/// Engine state; every run walks through all of these in order
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Phase {
    Idle,
    Preprocessing,
    MapSetup,
    Aggregating,
    Done,
}

/// Bookkeeping for one retained n-gram
///
/// Owned exclusively by its width's retained map. `id`, `total` and the
/// noise seed are fixed at map setup; only `count` changes afterwards, and
/// only during the aggregation pass.
#[derive(Clone, Debug)]
struct RetainedEntry {
    /// Dense id joining the fact table to the dimension tables
    id: u32,

    /// Global occurrence count from the preprocessing pass
    total: u64,

    /// Occurrences within the current month, zeroed by every flush
    count: u32,

    /// Noise generator, advanced once per flush of this entry
    noise: NoiseSource,
}

/// A calendar year-month in UTC; the time bucket of the fact table
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct YearMonth {
    year: i32,
    month: u32,
}
//
impl YearMonth {
    fn months_since_epoch(self) -> i64 {
        (self.year - AGG_EPOCH_YEAR) as i64 * 12 + (self.month as i64 - 1)
    }
}
//
impl From<DateTime<Utc>> for YearMonth {
    fn from(timestamp: DateTime<Utc>) -> Self {
        Self {
            year: timestamp.year(),
            month: timestamp.month(),
        }
    }
}
//
impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// Two-pass aggregation state machine
///
/// The sink handle is deliberately absent at construction and only opened
/// between the passes, right before the first write.
pub struct Aggregator {
    config: Arc<Config>,
    phase: Phase,
    preprocessed_counts: WidthMaps<u64>,
    retained: WidthMaps<RetainedEntry>,
    sink: Option<FrequencySink>,
}
//
impl Aggregator {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            phase: Phase::Idle,
            preprocessed_counts: width_maps(),
            retained: width_maps(),
            sink: None,
        }
    }

    /// Run both passes to completion, or abort on the first error
    pub async fn run(&mut self, store: &dyn MessageStore) -> Result<()> {
        self.advance(Phase::Idle, Phase::Preprocessing);
        log::info!("preprocessing");
        self.preprocess(store).await.context("preprocessing pass")?;

        self.advance(Phase::Preprocessing, Phase::MapSetup);
        log::info!("preparing ngram maps");
        self.setup_ngram_maps();
        log::info!("preparing sink");
        self.open_sink().context("preparing the output sink")?;
        self.populate_ngram_tables()
            .context("writing dimension tables")?;

        self.advance(Phase::MapSetup, Phase::Aggregating);
        log::info!("aggregating");
        self.aggregate(store).await.context("aggregation pass")?;
        log::info!("creating indices");
        self.sink
            .as_mut()
            .expect("sink was opened during map setup")
            .create_indices()
            .context("creating sink indices")?;

        self.advance(Phase::Aggregating, Phase::Done);
        log::info!("finished");
        Ok(())
    }

    fn advance(&mut self, from: Phase, to: Phase) {
        assert_eq!(self.phase, from, "engine phases cannot be skipped");
        self.phase = to;
    }

    /// Pass 1: count every n-gram of every width across the whole corpus
    //
    // TODO: The preprocessed map is many GiB on a full corpus, dominated by
    // distinct n-gram cardinality. Worth reconsidering at some point, e.g.
    // trimming periodically or estimating the retained set with a sketch.
    async fn preprocess(&mut self, store: &dyn MessageStore) -> Result<()> {
        let mut reader = store.make_reader().await?;
        let config = &self.config;
        let counts = &mut self.preprocessed_counts;
        process_messages(&mut reader, |timestamp, content| {
            if config.in_blackout(timestamp) {
                return Ok(());
            }
            tokenize(content, |window| {
                for (index, map) in counts.iter_mut().enumerate() {
                    if let Some(tokens) = window.subview(index + 1) {
                        if let Some(count) = map.get_mut(&TokenSlice(tokens)) {
                            *count += 1;
                        } else {
                            map.insert(Ngram::new(tokens), 1);
                        }
                    }
                }
            });
            Ok(())
        })
        .await
    }

    /// Filter the preprocessed counts down to the retained maps
    ///
    /// Ids come from a single counter walked width by width: every id is
    /// unique across the shared fact table, all ids together cover 0..n with
    /// no gaps, and within one width they increase monotonically in first-
    /// occurrence order. The preprocessed counts are consumed here.
    fn setup_ngram_maps(&mut self) {
        let preprocessed = std::mem::take(&mut self.preprocessed_counts);
        let nonce = &self.config.nonce;
        let min_occurrences = self.config.min_occurrences;
        let mut id = 0u32;
        for (index, counts) in preprocessed.into_iter().enumerate() {
            let retained = &mut self.retained[index];
            for (ngram, total) in counts {
                if total < min_occurrences {
                    continue;
                }
                let noise = NoiseSource::new(ngram.tokens(), nonce, ngram.width());
                retained.insert(
                    ngram,
                    RetainedEntry {
                        id,
                        total,
                        count: 0,
                        noise,
                    },
                );
                id += 1;
            }
            log::debug!("retained {} {}-grams", retained.len(), index + 1);
        }
    }

    /// Two-phase initialization of the sink handle
    fn open_sink(&mut self) -> Result<()> {
        debug_assert!(self.sink.is_none(), "the sink is opened exactly once");
        self.sink = Some(FrequencySink::create(&self.config.database)?);
        Ok(())
    }

    /// Bulk-write the per-width dimension tables from the retained maps
    fn populate_ngram_tables(&mut self) -> Result<()> {
        let sink = self
            .sink
            .as_mut()
            .expect("sink was opened during map setup");
        for (index, retained) in self.retained.iter().enumerate() {
            sink.write_dimension_table(
                index + 1,
                retained
                    .iter()
                    .map(|(ngram, entry)| (entry.id, ngram, entry.total)),
            )?;
        }
        Ok(())
    }

    /// Pass 2: count retained n-grams per month and flush on month changes
    ///
    /// Width-1 matches also feed the single "total unigram occurrences this
    /// month" denominator that normalizes the frequencies of every width.
    async fn aggregate(&mut self, store: &dyn MessageStore) -> Result<()> {
        let mut reader = store.make_reader().await?;
        let config = &self.config;
        let retained = &mut self.retained;
        let sink = self
            .sink
            .as_mut()
            .expect("sink was opened during map setup");
        let mut current_month: Option<YearMonth> = None;
        let mut total_for_month: u64 = 0;
        process_messages(&mut reader, |timestamp, content| {
            if config.in_blackout(timestamp) {
                return Ok(());
            }
            let month = YearMonth::from(timestamp);
            match current_month {
                None => current_month = Some(month),
                Some(previous) if previous != month => {
                    log::info!("flushing {previous}");
                    flush_month(sink, retained, previous, total_for_month)?;
                    total_for_month = 0;
                    current_month = Some(month);
                }
                Some(_) => {}
            }
            tokenize(content, |window| {
                for (index, map) in retained.iter_mut().enumerate() {
                    if let Some(tokens) = window.subview(index + 1) {
                        if let Some(entry) = map.get_mut(&TokenSlice(tokens)) {
                            entry.count += 1;
                            if index == 0 {
                                total_for_month += 1;
                            }
                        }
                    }
                }
            });
            Ok(())
        })
        .await?;

        // The last month is still open when the stream ends; flush it too so
        // a partial final month is not silently dropped
        if let Some(month) = current_month {
            log::info!("flushing {month}");
            let sink = self
                .sink
                .as_mut()
                .expect("sink was opened during map setup");
            flush_month(sink, &mut self.retained, month, total_for_month)?;
        }
        Ok(())
    }
}

/// Emit one fact row per retained n-gram with a nonzero monthly count, then
/// zero the counts; one sink transaction per call
fn flush_month(
    sink: &mut FrequencySink,
    retained: &mut WidthMaps<RetainedEntry>,
    month: YearMonth,
    total_for_month: u64,
) -> Result<()> {
    let months_since_epoch = month.months_since_epoch();
    let mut rows = Vec::new();
    for map in retained.iter_mut() {
        for entry in map.values_mut() {
            if entry.count == 0 {
                continue;
            }
            let noise_fraction = entry.noise.next_fraction();
            let frequency =
                (entry.count as f64 / total_for_month as f64) * (1.0 + noise_fraction);
            rows.push(FrequencyRow {
                months_since_epoch,
                ngram_id: entry.id,
                frequency,
            });
            entry.count = 0;
        }
    }
    sink.insert_frequencies(&rows)?;
    Ok(())
}

/// Drain a reader, enforcing the monotonic-time invariant of the source
async fn process_messages(
    reader: &mut MessageReader,
    mut callback: impl FnMut(DateTime<Utc>, &str) -> Result<()>,
) -> Result<()> {
    let mut last_timestamp: Option<DateTime<Utc>> = None;
    let mut processed: u64 = 0;
    while let Some(entry) = reader.read().await {
        let MessageEntry { timestamp, content } = entry?;
        if last_timestamp.is_some_and(|last| timestamp < last) {
            return Err(Error::SourceIntegrity(format!(
                "time went backwards at {timestamp}"
            ))
            .into());
        }
        last_timestamp = Some(timestamp);
        callback(timestamp, &content)?;
        processed += 1;
        if processed % (1024 * 1024) == 0 {
            log::info!("processed {processed} messages");
        }
    }
    Ok(())
}

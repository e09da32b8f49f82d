//! SQLite output sink
//!
//! Per width W the sink holds a dimension table `ngrams_W(ngram_id, gram_0 ..
//! gram_{W-1}, total)`, written once in bulk, plus one shared fact table
//! `frequencies(months_since_epoch, ngram_id, frequency)` appended to on
//! every monthly flush. Each bulk write and each flush runs in its own
//! transaction. The artifact of a previous run is deleted at creation:
//! every run rebuilds the index from scratch.

use crate::constants::NGRAM_MAX_WIDTH;
use crate::error::Error;
use crate::ngram::Ngram;
use crate::Result;
use anyhow::Context;
use rusqlite::{params, params_from_iter, types::Value, Connection};
use std::path::Path;

/// One fact row, emitted by a monthly flush
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrequencyRow {
    pub months_since_epoch: i64,
    pub ngram_id: u32,
    pub frequency: f64,
}

pub struct FrequencySink {
    connection: Connection,
}
//
impl FrequencySink {
    /// Create a fresh sink, discarding any artifact from a previous run
    pub fn create(path: &Path) -> Result<Self> {
        if path.exists() {
            std::fs::remove_file(path)
                .with_context(|| format!("deleting stale sink artifact {}", path.display()))?;
        }
        let connection = Connection::open(path).map_err(Error::Sink)?;
        create_tables(&connection)?;
        Ok(Self { connection })
    }

    /// Bulk-write one width's dimension table
    pub fn write_dimension_table<'a>(
        &mut self,
        width: usize,
        entries: impl Iterator<Item = (u32, &'a Ngram, u64)>,
    ) -> Result<(), Error> {
        let columns = gram_columns(width).collect::<Vec<_>>().join(", ");
        let placeholders = vec!["?"; width].join(", ");
        let sql = format!(
            "INSERT INTO ngrams_{width} (ngram_id, {columns}, total) \
             VALUES (?, {placeholders}, ?)"
        );
        let transaction = self.connection.transaction()?;
        {
            let mut statement = transaction.prepare(&sql)?;
            for (id, ngram, total) in entries {
                let mut values = Vec::with_capacity(width + 2);
                values.push(Value::Integer(id.into()));
                values.extend(ngram.tokens().map(|token| Value::Text(token.to_owned())));
                values.push(Value::Integer(total as i64));
                statement.execute(params_from_iter(values))?;
            }
        }
        transaction.commit()?;
        Ok(())
    }

    /// Append the fact rows of one monthly flush
    pub fn insert_frequencies(&mut self, rows: &[FrequencyRow]) -> Result<(), Error> {
        if rows.is_empty() {
            return Ok(());
        }
        let transaction = self.connection.transaction()?;
        {
            let mut statement = transaction.prepare(
                "INSERT INTO frequencies (months_since_epoch, ngram_id, frequency) \
                 VALUES (?, ?, ?)",
            )?;
            for row in rows {
                statement.execute(params![row.months_since_epoch, row.ngram_id, row.frequency])?;
            }
        }
        transaction.commit()?;
        Ok(())
    }

    /// Secondary indices for query performance, built once counting is done
    pub fn create_indices(&mut self) -> Result<(), Error> {
        for width in 1..=NGRAM_MAX_WIDTH {
            self.connection.execute(
                &format!("CREATE INDEX ngrams_{width}_ngram_id ON ngrams_{width}(ngram_id)"),
                [],
            )?;
            for column in gram_columns(width) {
                self.connection.execute(
                    &format!("CREATE INDEX ngrams_{width}_{column} ON ngrams_{width}({column})"),
                    [],
                )?;
            }
            self.connection.execute(
                &format!("CREATE INDEX ngrams_{width}_total ON ngrams_{width}(total)"),
                [],
            )?;
        }
        self.connection
            .execute("CREATE INDEX frequencies_ngram_id ON frequencies(ngram_id)", [])?;
        self.connection.execute(
            "CREATE INDEX frequencies_months_since_epoch ON frequencies(months_since_epoch)",
            [],
        )?;
        Ok(())
    }
}

fn gram_columns(width: usize) -> impl Iterator<Item = String> {
    (0..width).map(|position| format!("gram_{position}"))
}

fn create_tables(connection: &Connection) -> Result<(), Error> {
    connection.execute(
        "CREATE TABLE frequencies (months_since_epoch INTEGER, ngram_id INTEGER, frequency REAL)",
        [],
    )?;
    for width in 1..=NGRAM_MAX_WIDTH {
        let columns = gram_columns(width)
            .map(|column| format!("{column} TEXT"))
            .collect::<Vec<_>>()
            .join(", ");
        connection.execute(
            &format!(
                "CREATE TABLE ngrams_{width} (ngram_id INTEGER PRIMARY KEY, {columns}, total INTEGER)"
            ),
            [],
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn dimension_rows_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ngrams.db3");
        let mut sink = FrequencySink::create(&path).unwrap();
        let first = Ngram::new(&["foo", "bar"]);
        let second = Ngram::new(&["isn't", "it"]);
        sink.write_dimension_table(2, [(0, &first, 42), (1, &second, 21)].into_iter())
            .unwrap();
        let connection = Connection::open(&path).unwrap();
        let (gram_0, gram_1, total): (String, String, i64) = connection
            .query_row(
                "SELECT gram_0, gram_1, total FROM ngrams_2 WHERE ngram_id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap();
        assert_eq!((gram_0.as_str(), gram_1.as_str(), total), ("isn't", "it", 21));
    }

    #[test]
    fn frequency_rows_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ngrams.db3");
        let mut sink = FrequencySink::create(&path).unwrap();
        sink.insert_frequencies(&[
            FrequencyRow {
                months_since_epoch: 72,
                ngram_id: 3,
                frequency: 0.125,
            },
            FrequencyRow {
                months_since_epoch: 73,
                ngram_id: 3,
                frequency: 0.25,
            },
        ])
        .unwrap();
        let connection = Connection::open(&path).unwrap();
        let count: i64 = connection
            .query_row("SELECT COUNT(*) FROM frequencies WHERE ngram_id = 3", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(count, 2);
        let frequency: f64 = connection
            .query_row(
                "SELECT frequency FROM frequencies WHERE months_since_epoch = 72",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(frequency, 0.125);
    }

    #[test]
    fn stale_artifact_is_discarded() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ngrams.db3");
        {
            let mut sink = FrequencySink::create(&path).unwrap();
            sink.insert_frequencies(&[FrequencyRow {
                months_since_epoch: 1,
                ngram_id: 0,
                frequency: 1.0,
            }])
            .unwrap();
        }
        let _sink = FrequencySink::create(&path).unwrap();
        let connection = Connection::open(&path).unwrap();
        let count: i64 = connection
            .query_row("SELECT COUNT(*) FROM frequencies", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn all_tables_and_indices_exist() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ngrams.db3");
        let mut sink = FrequencySink::create(&path).unwrap();
        sink.create_indices().unwrap();
        let connection = Connection::open(&path).unwrap();
        let tables: i64 = connection
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name LIKE 'ngrams_%'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, NGRAM_MAX_WIDTH as i64);
        let indices: i64 = connection
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name LIKE 'frequencies_%'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(indices, 2);
    }
}

//! Message source documents and the stores that stream them
//!
//! The message store itself (its connection and query machinery) is an
//! external system; the engine only depends on the [`MessageSource`] seam: an
//! ordered, ascending-timestamp stream of loosely-typed documents. The
//! concrete implementation here reads a message dump with one JSON document
//! per line, gzip-decoded when the file name says so.

use crate::config::Config;
use crate::error::Error;
use crate::reader::MessageReader;
use crate::Result;
use anyhow::Context;
use async_compression::tokio::bufread::GzipDecoder;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::{path::Path, pin::Pin, sync::Arc};
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};

/// A source document, as stored
///
/// `timestamp` and `edits` stay loosely typed on purpose: a document carrying
/// the wrong type there is upstream corruption that must be reported as a
/// source integrity failure, not a deserialization panic. Unknown fields are
/// ignored.
#[derive(Clone, Debug, Deserialize)]
pub struct RawDocument {
    /// Milliseconds since epoch, as a JSON number
    pub timestamp: Value,

    /// Edit history; the last entry's `content` is the current text
    pub edits: Value,

    /// Channel the message was posted in
    pub channel: Box<str>,

    /// Account that authored the message
    pub author: Box<str>,

    /// Soft-delete marker; any present value means the message is gone
    #[serde(default)]
    pub deleted: Option<Value>,
}

#[cfg(test)]
impl RawDocument {
    /// A plain visible message from a regular account
    pub fn message(timestamp_ms: i64, content: &str) -> Self {
        Self {
            timestamp: serde_json::json!(timestamp_ms as f64),
            edits: serde_json::json!([{ "content": content }]),
            channel: "104967755539247677".into(),
            author: "104041011601122080".into(),
            deleted: None,
        }
    }
}

/// An ordered stream of source documents, consumed once
#[async_trait]
pub trait MessageSource: Send {
    /// The next document, or `None` once the source is exhausted
    async fn next_document(&mut self) -> Result<Option<RawDocument>>;
}

/// Mints one fresh document stream per aggregation pass
///
/// The engine performs exactly two passes, so a store sees exactly two
/// `make_reader` calls per run, strictly in sequence.
#[async_trait]
pub trait MessageStore {
    async fn make_reader(&self) -> Result<MessageReader>;
}

/// Document stream over a line-delimited JSON dump
pub struct JsonlSource {
    lines: Lines<Pin<Box<dyn AsyncBufRead + Send>>>,
    line_number: u64,
}
//
impl JsonlSource {
    pub async fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .await
            .with_context(|| format!("opening message dump {}", path.display()))?;
        let reader: Pin<Box<dyn AsyncBufRead + Send>> =
            if path.extension().is_some_and(|extension| extension == "gz") {
                Box::pin(BufReader::new(GzipDecoder::new(BufReader::new(file))))
            } else {
                Box::pin(BufReader::new(file))
            };
        Ok(Self {
            lines: reader.lines(),
            line_number: 0,
        })
    }
}
//
#[async_trait]
impl MessageSource for JsonlSource {
    async fn next_document(&mut self) -> Result<Option<RawDocument>> {
        loop {
            let Some(line) = self
                .lines
                .next_line()
                .await
                .context("reading message dump")?
            else {
                return Ok(None);
            };
            self.line_number += 1;
            if line.trim().is_empty() {
                continue;
            }
            let document = serde_json::from_str(&line).map_err(|error| {
                Error::SourceIntegrity(format!(
                    "malformed document on line {}: {error}",
                    self.line_number
                ))
            })?;
            return Ok(Some(document));
        }
    }
}

/// Store backed by a line-delimited JSON dump on disk
pub struct JsonlStore {
    config: Arc<Config>,
}
//
impl JsonlStore {
    pub fn new(config: Arc<Config>) -> Self {
        Self { config }
    }
}
//
#[async_trait]
impl MessageStore for JsonlStore {
    async fn make_reader(&self) -> Result<MessageReader> {
        let source = JsonlSource::open(&self.config.messages).await?;
        Ok(MessageReader::spawn(
            Box::new(source),
            self.config.clone(),
        ))
    }
}

/// In-memory store for tests
#[cfg(test)]
pub struct MemoryStore {
    pub documents: Vec<RawDocument>,
    pub config: Arc<Config>,
}
//
#[cfg(test)]
#[async_trait]
impl MessageStore for MemoryStore {
    async fn make_reader(&self) -> Result<MessageReader> {
        let source = MemorySource {
            documents: self.documents.clone().into_iter(),
        };
        Ok(MessageReader::spawn(
            Box::new(source),
            self.config.clone(),
        ))
    }
}

#[cfg(test)]
struct MemorySource {
    documents: std::vec::IntoIter<RawDocument>,
}
//
#[cfg(test)]
#[async_trait]
impl MessageSource for MemorySource {
    async fn next_document(&mut self) -> Result<Option<RawDocument>> {
        Ok(self.documents.next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    async fn collect(path: &Path) -> Result<Vec<RawDocument>> {
        let mut source = JsonlSource::open(path).await?;
        let mut documents = Vec::new();
        while let Some(document) = source.next_document().await? {
            documents.push(document);
        }
        Ok(documents)
    }

    #[tokio::test]
    async fn reads_one_document_per_line() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"timestamp": 1000.0, "edits": [{{"content": "hi"}}], "channel": "c", "author": "a"}}"#
        )
        .unwrap();
        writeln!(file).unwrap();
        writeln!(
            file,
            r#"{{"timestamp": 2000.0, "edits": [{{"content": "there"}}], "channel": "c", "author": "a", "deleted": true}}"#
        )
        .unwrap();
        let documents = collect(file.path()).await.unwrap();
        assert_eq!(documents.len(), 2);
        assert_eq!(documents[0].channel.as_ref(), "c");
        assert!(documents[0].deleted.is_none());
        assert!(documents[1].deleted.is_some());
    }

    #[tokio::test]
    async fn malformed_line_is_a_source_integrity_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not json").unwrap();
        let error = collect(file.path()).await.unwrap_err();
        assert!(error
            .chain()
            .any(|cause| matches!(cause.downcast_ref(), Some(Error::SourceIntegrity(_)))));
    }
}

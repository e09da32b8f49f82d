//! Bounded producer/consumer pipeline fronting the message source
//!
//! One producer task per pass pulls documents from the source, filters and
//! parses them, and pushes entries into a fixed-capacity queue; the
//! aggregation engine consumes them strictly in arrival order. The bounded
//! queue provides backpressure in both directions and is the only
//! synchronization point in the program.

use crate::config::Config;
use crate::constants::QUEUE_DEPTH;
use crate::error::Error;
use crate::source::{MessageSource, RawDocument};
use crate::Result;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

/// A parsed message, ready for tokenization
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MessageEntry {
    pub timestamp: DateTime<Utc>,
    pub content: Box<str>,
}

/// Extract the timestamp and current content from a source document
///
/// The current content is the last element of the document's edit history.
/// An unexpected timestamp type or an empty/missing edit history means the
/// source is corrupted, which is fatal.
pub fn parse_document(document: &RawDocument) -> Result<MessageEntry, Error> {
    let millis = document.timestamp.as_f64().ok_or_else(|| {
        Error::SourceIntegrity(format!("unexpected timestamp type: {}", document.timestamp))
    })?;
    let timestamp = DateTime::from_timestamp_millis(millis as i64)
        .ok_or_else(|| Error::SourceIntegrity(format!("timestamp out of range: {millis}")))?;
    let content = document
        .edits
        .as_array()
        .and_then(|edits| edits.last())
        .ok_or_else(|| Error::SourceIntegrity("empty or missing edit history".into()))?
        .get("content")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::SourceIntegrity("last edit has no string content".into()))?;
    Ok(MessageEntry {
        timestamp,
        content: content.into(),
    })
}

/// Consumer end of the pipeline
///
/// Once [`read`](Self::read) has returned `None`, the stream is exhausted and
/// every further call returns `None` immediately.
pub struct MessageReader {
    queue: mpsc::Receiver<Result<MessageEntry>>,
}
//
impl MessageReader {
    /// Start the producer task over `source` and hand back the consumer end
    ///
    /// The producer drops soft-deleted documents, documents from denylisted
    /// channels, and documents authored by automated accounts before parsing,
    /// so none of them ever reach the engine. It stops at source exhaustion
    /// (closing the queue, which is the end-of-stream sentinel) or after
    /// forwarding the first error.
    pub fn spawn(mut source: Box<dyn MessageSource>, config: Arc<Config>) -> Self {
        let (sender, queue) = mpsc::channel(QUEUE_DEPTH);
        tokio::spawn(async move {
            loop {
                let document = match source.next_document().await {
                    Ok(Some(document)) => document,
                    Ok(None) => return,
                    Err(error) => {
                        let _ = sender.send(Err(error)).await;
                        return;
                    }
                };
                if document.deleted.is_some()
                    || config.excluded_channels.contains(document.channel.as_ref())
                    || config.bot_authors.contains(document.author.as_ref())
                {
                    continue;
                }
                let entry = parse_document(&document);
                let stop = entry.is_err();
                if sender.send(entry.map_err(Into::into)).await.is_err() {
                    // Consumer went away; nothing left to produce for
                    return;
                }
                if stop {
                    return;
                }
            }
        });
        Self { queue }
    }

    /// The next entry in arrival order, or `None` at end of stream
    pub async fn read(&mut self) -> Option<Result<MessageEntry>> {
        self.queue.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{MemoryStore, MessageStore};
    use std::path::PathBuf;

    fn store(documents: Vec<RawDocument>) -> MemoryStore {
        MemoryStore {
            documents,
            config: Arc::new(Config::for_tests(PathBuf::new())),
        }
    }

    async fn drain(store: &MemoryStore) -> Result<Vec<MessageEntry>> {
        let mut reader = store.make_reader().await?;
        let mut entries = Vec::new();
        while let Some(entry) = reader.read().await {
            entries.push(entry?);
        }
        Ok(entries)
    }

    #[tokio::test]
    async fn filters_never_reach_the_engine() {
        let mut deleted = RawDocument::message(1_000, "gone");
        deleted.deleted = Some(serde_json::json!(true));
        let mut bot = RawDocument::message(2_000, "beep");
        bot.author = "155149108183695360".into();
        let mut denylisted = RawDocument::message(3_000, "spam");
        denylisted.channel = "506274405500977153".into();
        let documents = vec![
            RawDocument::message(500, "first"),
            deleted,
            bot,
            denylisted,
            RawDocument::message(4_000, "last"),
        ];
        let entries = drain(&store(documents)).await.unwrap();
        let contents: Vec<&str> = entries.iter().map(|entry| entry.content.as_ref()).collect();
        assert_eq!(contents, ["first", "last"]);
    }

    #[tokio::test]
    async fn last_edit_wins() {
        let mut document = RawDocument::message(1_000, "unused");
        document.edits = serde_json::json!([
            { "content": "typo'd" },
            { "content": "fixed" },
        ]);
        let entries = drain(&store(vec![document])).await.unwrap();
        assert_eq!(entries[0].content.as_ref(), "fixed");
    }

    #[tokio::test]
    async fn unexpected_timestamp_type_is_fatal() {
        let mut document = RawDocument::message(1_000, "fine");
        document.timestamp = serde_json::json!("not a number");
        let error = drain(&store(vec![document])).await.unwrap_err();
        assert!(error
            .chain()
            .any(|cause| matches!(cause.downcast_ref(), Some(Error::SourceIntegrity(_)))));
    }

    #[tokio::test]
    async fn empty_edit_history_is_fatal() {
        let mut document = RawDocument::message(1_000, "fine");
        document.edits = serde_json::json!([]);
        assert!(drain(&store(vec![document])).await.is_err());
    }

    #[tokio::test]
    async fn read_after_end_of_stream_keeps_returning_none() {
        let store = store(vec![RawDocument::message(1_000, "only")]);
        let mut reader = store.make_reader().await.unwrap();
        assert!(reader.read().await.is_some());
        assert!(reader.read().await.is_none());
        assert!(reader.read().await.is_none());
    }
}

// # NDJSON Notification Source
//
// This crate provides a `NotificationSource` reading one notification per
// line from a file or from stdin.
//
// ## Line Formats
//
// Each non-blank line is one JSON document in either shape:
//
// ```json
// {"exchange": "nova", "event_type": "compute.instance.create.end", "payload": {...}}
// {"exchange": "nova", "topic": "notifications", "message": {"oslo.version": "2.0", "oslo.message": "{...}"}}
// ```
//
// The second form is a captured bus message. `message` may also be the
// unwrapped oslo message, whose request context lives in `_context_*` keys.
//
// ## Delivery
//
// A line is consumed once it is read. Undecodable lines are logged and
// skipped; the stream ends at end of input or on a read error.

use dnsink_core::{Error, Notification, NotificationContext, NotificationSource, Result};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use std::pin::Pin;
use std::sync::Mutex;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio_stream::Stream;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

/// Notifications buffered ahead of the engine
const DEFAULT_BUFFER: usize = 64;

/// Topic assumed when an envelope names none
const DEFAULT_TOPIC: &str = "notifications";

type LineReader = Box<dyn AsyncBufRead + Send + Unpin>;

/// Notification source over newline-delimited JSON
pub struct NdjsonSource {
    /// Where the lines come from (for logging)
    origin: String,

    /// Taken by the first `watch()`
    reader: Mutex<Option<LineReader>>,

    buffer: usize,
}

impl std::fmt::Debug for NdjsonSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NdjsonSource")
            .field("origin", &self.origin)
            .field("buffer", &self.buffer)
            .finish()
    }
}

impl NdjsonSource {
    /// Read notifications from a file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .map_err(|e| Error::config(format!("Cannot open {}: {}", path.display(), e)))?;
        Ok(Self::with_origin(
            path.display().to_string(),
            tokio::fs::File::from_std(file),
        ))
    }

    /// Read notifications from standard input
    pub fn stdin() -> Self {
        Self::with_origin("stdin", tokio::io::stdin())
    }

    /// Read notifications from any async reader
    pub fn from_reader<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self::with_origin("reader", reader)
    }

    fn with_origin<R>(origin: impl Into<String>, reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self {
            origin: origin.into(),
            reader: Mutex::new(Some(Box::new(BufReader::new(reader)))),
            buffer: DEFAULT_BUFFER,
        }
    }

    /// Set how many decoded notifications may wait for the engine
    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer.max(1);
        self
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }
}

impl NotificationSource for NdjsonSource {
    fn watch(&self) -> Pin<Box<dyn Stream<Item = Notification> + Send + 'static>> {
        let reader = match self.reader.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(reader) = reader else {
            warn!("{} was already consumed by an earlier watch", self.origin);
            return Box::pin(tokio_stream::empty::<Notification>());
        };

        let (tx, rx) = mpsc::channel(self.buffer);
        let origin = self.origin.clone();

        tokio::spawn(async move {
            info!("Reading notifications from {}", origin);
            let mut lines = reader.lines();
            let mut line_no: u64 = 0;

            loop {
                let line = match lines.next_line().await {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        info!("End of {} after {} line(s)", origin, line_no);
                        break;
                    }
                    Err(e) => {
                        error!("Failed to read {} after line {}: {}", origin, line_no, e);
                        break;
                    }
                };
                line_no += 1;

                match decode_line(&line) {
                    Ok(Some(notification)) => {
                        debug!(
                            "Line {}: {} from {}",
                            line_no, notification.event_type, notification.exchange
                        );
                        if tx.send(notification).await.is_err() {
                            debug!("Receiver dropped, closing {}", origin);
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!("Skipping line {} of {}: {}", line_no, origin, e),
                }
            }
        });

        Box::pin(ReceiverStream::new(rx))
    }

    fn source_name(&self) -> &'static str {
        "ndjson"
    }
}

#[derive(Deserialize)]
struct Envelope {
    exchange: String,
    #[serde(default)]
    topic: Option<String>,
    message: Value,
}

/// Body of an oslo messaging notification
#[derive(Deserialize)]
struct OsloMessage {
    event_type: String,
    #[serde(default)]
    payload: Value,
    #[serde(default)]
    message_id: Option<String>,
    #[serde(rename = "_context_project_name", default)]
    project_name: Option<String>,
    #[serde(rename = "_context_project_id", default)]
    project_id: Option<String>,
    #[serde(rename = "_context_tenant", default)]
    tenant: Option<String>,
    #[serde(rename = "_context_user_id", default)]
    user_id: Option<String>,
    #[serde(rename = "_context_user", default)]
    user: Option<String>,
}

impl OsloMessage {
    fn into_notification(self, exchange: String, topic: String) -> Notification {
        Notification {
            exchange,
            topic,
            event_type: self.event_type,
            payload: self.payload,
            context: NotificationContext {
                project_name: self.project_name,
                project_id: self.project_id.or(self.tenant),
                user_id: self.user_id.or(self.user),
            },
            message_id: self.message_id,
        }
    }
}

/// Decode one line into a notification
///
/// # Returns
///
/// - `Ok(None)`: Blank line
/// - `Err(Error::MalformedPayload)`: Not a notification in either shape
pub fn decode_line(line: &str) -> Result<Option<Notification>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let document: Value = serde_json::from_str(line)
        .map_err(|e| Error::malformed(format!("invalid JSON: {}", e)))?;
    if document.get("message").is_none() {
        let mut notification: Notification = serde_json::from_value(document)
            .map_err(|e| Error::malformed(format!("not a notification: {}", e)))?;
        if notification.topic.is_empty() {
            notification.topic = DEFAULT_TOPIC.to_string();
        }
        return Ok(Some(notification));
    }

    let envelope: Envelope = serde_json::from_value(document)
        .map_err(|e| Error::malformed(format!("not an envelope: {}", e)))?;
    let message = match envelope.message.get("oslo.message") {
        Some(Value::String(inner)) => serde_json::from_str(inner)
            .map_err(|e| Error::malformed(format!("invalid oslo.message: {}", e)))?,
        Some(_) => return Err(Error::malformed("oslo.message is not a string")),
        None => envelope.message,
    };
    let message: OsloMessage = serde_json::from_value(message)
        .map_err(|e| Error::malformed(format!("not an oslo message: {}", e)))?;

    let topic = envelope
        .topic
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| DEFAULT_TOPIC.to_string());
    Ok(Some(message.into_notification(envelope.exchange, topic)))
}

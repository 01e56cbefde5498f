// # Notification Source Trait
//
// Defines the interface for receiving platform lifecycle notifications.
//
// ## Implementations
//
// - Newline-delimited JSON (file or stdin): `dnsink-source-ndjson` crate
// - Tests: controlled channel-backed sources
//
// ## Usage
//
// ```rust,ignore
// use dnsink_core::NotificationSource;
// use tokio_stream::StreamExt;
//
// let source = /* NotificationSource implementation */;
// let mut stream = source.watch();
// while let Some(notification) = stream.next().await {
//     println!("{}", notification.event_type);
// }
// ```

use crate::event::Notification;
use std::pin::Pin;
use tokio_stream::Stream;

/// Trait for notification transports
///
/// The transport owns delivery guarantees: a notification yielded here is
/// considered consumed regardless of how reconciliation went, and any
/// redelivery is the transport's own decision.
pub trait NotificationSource: Send + Sync {
    /// Stream of decoded notifications
    ///
    /// The stream ends when the transport is exhausted (end of file) or
    /// closed. Dropping the stream must release the transport.
    fn watch(&self) -> Pin<Box<dyn Stream<Item = Notification> + Send + 'static>>;

    /// Source name (for logging/debugging)
    fn source_name(&self) -> &'static str;
}

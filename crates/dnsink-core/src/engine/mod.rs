//! Core reconciliation engine
//!
//! The SinkEngine is responsible for:
//! - Pulling notifications from the NotificationSource
//! - Handing each one to the HandlerRegistry, one at a time
//! - Reporting what happened over a bounded event channel
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────┐
//! │ NotificationSource │─── Notification ───┐
//! └────────────────────┘                    │
//!                                           ▼
//!                                  ┌──────────────┐
//!                                  │  SinkEngine  │
//!                                  └──────────────┘
//!                                           │
//!                    ┌──────────────────────┴──────────────┐
//!                    ▼                                     ▼
//!          ┌──────────────────┐                   ┌─────────────┐
//!          │ HandlerRegistry  │                   │   Events    │
//!          │ (validate, run)  │                   │  (notify)   │
//!          └──────────────────┘                   └─────────────┘
//! ```
//!
//! ## Event Flow
//!
//! 1. Notification received
//! 2. Registry selects the subscribed handlers (none: ignored)
//! 3. Payload validated into a SinkEvent (malformed: rejected)
//! 4. Each handler reconciles the event to completion
//! 5. Outcome emitted for monitoring/logging
//!
//! A notification is consumed once whatever its outcome; redelivery is the
//! transport's business.

use tokio::sync::{mpsc, oneshot};
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::error::Result;
use crate::event::Notification;
use crate::registry::{Dispatch, HandlerRegistry};
use crate::traits::NotificationSource;

/// Events emitted by the SinkEngine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Engine started
    Started { handlers: usize },

    /// No handler subscribes to the notification
    NotificationIgnored { exchange: String, event_type: String },

    /// The payload did not validate; nothing was attempted
    NotificationRejected { event_type: String, error: String },

    /// One handler finished reconciling a notification
    EventProcessed {
        handler: &'static str,
        event_type: String,
        applied: usize,
        unchanged: usize,
        skipped: usize,
        failed: usize,
    },

    /// Engine stopped
    Stopped { reason: String },
}

/// Core reconciliation engine
///
/// ## Lifecycle
///
/// 1. Create with [`SinkEngine::new()`]
/// 2. Start with [`SinkEngine::run()`]
/// 3. Engine runs until a shutdown signal is received or the source ends
///
/// ## Scheduling
///
/// Notifications are processed strictly one after another. Every event
/// re-derives its target state from the backends, so no state is carried
/// from one to the next.
pub struct SinkEngine {
    /// Source of notifications
    source: Box<dyn NotificationSource>,

    /// Handlers keyed by subscription
    registry: HandlerRegistry,

    /// Event sender for external monitoring
    event_tx: mpsc::Sender<EngineEvent>,
}

impl SinkEngine {
    /// Create a new engine
    ///
    /// # Returns
    ///
    /// A tuple of (engine, event_receiver) where event_receiver yields engine events
    pub fn new(
        source: Box<dyn NotificationSource>,
        registry: HandlerRegistry,
        config: EngineConfig,
    ) -> Result<(Self, mpsc::Receiver<EngineEvent>)> {
        config.validate()?;
        if registry.is_empty() {
            return Err(crate::Error::config("No handler registered"));
        }

        let (tx, rx) = mpsc::channel(config.event_channel_capacity);
        let engine = Self {
            source,
            registry,
            event_tx: tx,
        };
        Ok((engine, rx))
    }

    /// Run the engine until SIGINT/SIGTERM or the end of the source
    pub async fn run(&self) -> Result<()> {
        self.run_internal(None).await
    }

    /// Run the engine until `shutdown_rx` fires or the source ends
    ///
    /// **TESTING ONLY**: the daemon uses [`SinkEngine::run()`], which stops on
    /// OS signals.
    pub async fn run_with_shutdown(&self, shutdown_rx: Option<oneshot::Receiver<()>>) -> Result<()> {
        self.run_internal(shutdown_rx).await
    }

    async fn run_internal(&self, shutdown_rx: Option<oneshot::Receiver<()>>) -> Result<()> {
        self.emit_event(EngineEvent::Started {
            handlers: self.registry.len(),
        });
        info!(
            "Engine started with {} handlers on source {}",
            self.registry.len(),
            self.source.source_name()
        );

        let mut stream = self.source.watch();

        let reason = if let Some(mut rx) = shutdown_rx {
            loop {
                tokio::select! {
                    next = stream.next() => match next {
                        Some(notification) => self.handle_notification(notification).await,
                        None => break "Source exhausted",
                    },
                    _ = &mut rx => break "Shutdown signal",
                }
            }
        } else {
            let shutdown = shutdown_signal();
            tokio::pin!(shutdown);
            loop {
                tokio::select! {
                    next = stream.next() => match next {
                        Some(notification) => self.handle_notification(notification).await,
                        None => break "Source exhausted",
                    },
                    signal = &mut shutdown => {
                        info!("Received {}", signal);
                        break "Shutdown signal";
                    }
                }
            }
        };

        info!("Engine stopped: {}", reason);
        self.emit_event(EngineEvent::Stopped {
            reason: reason.to_string(),
        });
        Ok(())
    }

    /// Handle one notification to completion
    async fn handle_notification(&self, notification: Notification) {
        debug!(
            "Notification {} from {} ({})",
            notification.event_type,
            notification.exchange,
            notification.message_id.as_deref().unwrap_or("-")
        );

        match self.registry.dispatch(&notification).await {
            Dispatch::Ignored => {
                self.emit_event(EngineEvent::NotificationIgnored {
                    exchange: notification.exchange,
                    event_type: notification.event_type,
                });
            }
            Dispatch::Rejected(e) => {
                error!("Rejected {}: {}", notification.event_type, e);
                self.emit_event(EngineEvent::NotificationRejected {
                    event_type: notification.event_type,
                    error: e.to_string(),
                });
            }
            Dispatch::Processed(outcomes) => {
                for outcome in outcomes {
                    self.emit_event(EngineEvent::EventProcessed {
                        handler: outcome.handler,
                        event_type: outcome.event_type.clone(),
                        applied: outcome.applied(),
                        unchanged: outcome.unchanged(),
                        skipped: outcome.skipped(),
                        failed: outcome.failed(),
                    });
                }
            }
        }
    }

    /// Emit an engine event, dropping it when the channel is full
    fn emit_event(&self, event: EngineEvent) {
        if self.event_tx.try_send(event).is_err() {
            warn!("Event channel full, dropping event. Consider increasing event_channel_capacity.");
        }
    }
}

/// Wait for SIGTERM or SIGINT
#[cfg(unix)]
async fn shutdown_signal() -> &'static str {
    use tokio::signal::unix::{SignalKind, signal};

    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut sigterm), Ok(mut sigint)) => tokio::select! {
            _ = sigterm.recv() => "SIGTERM",
            _ = sigint.recv() => "SIGINT",
        },
        _ => {
            warn!("Failed to install signal handlers, falling back to Ctrl-C");
            let _ = tokio::signal::ctrl_c().await;
            "SIGINT"
        }
    }
}

/// Wait for Ctrl-C
#[cfg(not(unix))]
async fn shutdown_signal() -> &'static str {
    let _ = tokio::signal::ctrl_c().await;
    "SIGINT"
}

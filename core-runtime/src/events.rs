//! # Event Bus
//!
//! Typed pipeline events published over `tokio::sync::broadcast`.
//!
//! Every stage of a cycle reports what it did to the [`EventBus`]. The CLI
//! subscribes to surface warnings; tests subscribe to assert on outcomes
//! without scraping logs.
//!
//! ```text
//! ┌───────────┐  emit   ┌───────────┐  subscribe  ┌────────────┐
//! │ Transform ├────────>│           ├────────────>│    CLI     │
//! └───────────┘         │ EventBus  │             └────────────┘
//! ┌───────────┐  emit   │ (broadcast│  subscribe  ┌────────────┐
//! │Relocation ├────────>│  channel) ├────────────>│   Tests    │
//! └───────────┘         └───────────┘             └────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CycleEvent, EventBus, PipelineEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(100);
//! let mut stream = bus.subscribe();
//!
//! bus.emit(PipelineEvent::Cycle(CycleEvent::Started {
//!     cycle_id: "c-1".to_string(),
//!     mode: "scale".to_string(),
//! }))
//! .ok();
//!
//! let event = stream.recv().await.unwrap();
//! assert_eq!(event.description(), "Cycle started");
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: the subscriber missed `n` events; keep reading.
//! - **`RecvError::Closed`**: every sender was dropped; the pipeline shut down.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Pipeline Event Types
// ============================================================================

/// Top-level event published on the bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum PipelineEvent {
    /// Cycle lifecycle
    Cycle(CycleEvent),
    /// Per-item transform outcomes
    Transform(TransformEvent),
    /// Per-item relocation outcomes
    Relocation(RelocationEvent),
}

impl PipelineEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            PipelineEvent::Cycle(e) => e.description(),
            PipelineEvent::Transform(e) => e.description(),
            PipelineEvent::Relocation(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            PipelineEvent::Cycle(CycleEvent::Failed { .. })
            | PipelineEvent::Transform(TransformEvent::Failed { .. })
            | PipelineEvent::Relocation(RelocationEvent::Failed { .. }) => EventSeverity::Error,
            PipelineEvent::Transform(TransformEvent::OutputMissing { .. })
            | PipelineEvent::Relocation(RelocationEvent::MovedButTagged { .. }) => {
                EventSeverity::Warning
            }
            PipelineEvent::Cycle(CycleEvent::Completed { .. })
            | PipelineEvent::Transform(TransformEvent::Uploaded { .. })
            | PipelineEvent::Relocation(RelocationEvent::Relocated { .. })
            | PipelineEvent::Relocation(RelocationEvent::Reconciled { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Cycle Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum CycleEvent {
    Started {
        cycle_id: String,
        /// `scale`, `relocate` or `all`
        mode: String,
    },
    Completed {
        cycle_id: String,
        discovered: u64,
        succeeded: u64,
        failed: u64,
        duration_ms: u64,
    },
    /// The cycle aborted before its items ran, e.g. the listing failed.
    Failed { cycle_id: String, message: String },
}

impl CycleEvent {
    fn description(&self) -> &str {
        match self {
            CycleEvent::Started { .. } => "Cycle started",
            CycleEvent::Completed { .. } => "Cycle completed",
            CycleEvent::Failed { .. } => "Cycle failed",
        }
    }
}

// ============================================================================
// Transform Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum TransformEvent {
    /// Output uploaded and confirmed; the raw source was removed.
    Uploaded {
        source_path: String,
        uploaded_path: String,
    },
    /// The transform produced no output; the raw source stays in place.
    OutputMissing { source_path: String },
    Failed {
        source_path: String,
        message: String,
    },
}

impl TransformEvent {
    fn description(&self) -> &str {
        match self {
            TransformEvent::Uploaded { .. } => "Transformed item uploaded",
            TransformEvent::OutputMissing { .. } => "Transform produced no output",
            TransformEvent::Failed { .. } => "Transform failed",
        }
    }
}

// ============================================================================
// Relocation Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum RelocationEvent {
    /// Moved and the category tag cleared.
    Relocated {
        item_id: String,
        destination: String,
        category: String,
    },
    /// No matching tag at processing time.
    Skipped { item_id: String, reason: String },
    /// Moved, but clearing the tag failed. Recorded for reconciliation.
    MovedButTagged {
        item_id: String,
        destination: String,
        tag_id: String,
        message: String,
    },
    /// A previously recorded partial relocation had its tag cleared.
    Reconciled { item_id: String, tag_id: String },
    Failed { item_id: String, message: String },
}

impl RelocationEvent {
    fn description(&self) -> &str {
        match self {
            RelocationEvent::Relocated { .. } => "Item relocated",
            RelocationEvent::Skipped { .. } => "Item skipped",
            RelocationEvent::MovedButTagged { .. } => "Item moved but tag still assigned",
            RelocationEvent::Reconciled { .. } => "Partial relocation reconciled",
            RelocationEvent::Failed { .. } => "Relocation failed",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to pipeline events.
///
/// Cloning the bus yields another producer on the same channel. Slow
/// subscribers get `RecvError::Lagged` without blocking publishers.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    /// Creates a new event bus buffering `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an
    /// error if nobody is listening. Publishers usually ignore that error.
    pub fn emit(&self, event: PipelineEvent) -> Result<usize, SendError<PipelineEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<PipelineEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&PipelineEvent) -> bool + Send + Sync>;

/// A `broadcast::Receiver` with an optional filter.
///
/// ```rust
/// use core_runtime::events::{EventBus, EventSeverity, EventStream};
///
/// let bus = EventBus::default();
/// let warnings = EventStream::new(bus.subscribe())
///     .filter(|event| event.severity() >= EventSeverity::Warning);
/// ```
pub struct EventStream {
    receiver: Receiver<PipelineEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<PipelineEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` are returned by `recv()`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&PipelineEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &PipelineEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Receives the next event that passes the filter.
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged(n)` if the subscriber fell behind by `n` events.
    /// Returns `RecvError::Closed` if all senders have been dropped.
    pub async fn recv(&mut self) -> Result<PipelineEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Returns `None` if no matching event is currently available.
    pub fn try_recv(&mut self) -> Option<Result<PipelineEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relocated(item_id: &str) -> PipelineEvent {
        PipelineEvent::Relocation(RelocationEvent::Relocated {
            item_id: item_id.to_string(),
            destination: "Photos/cats/a.png".to_string(),
            category: "cats".to_string(),
        })
    }

    #[tokio::test]
    async fn test_emit_without_subscribers_is_err() {
        let bus = EventBus::new(10);
        assert_eq!(bus.subscriber_count(), 0);
        assert!(bus.emit(relocated("1")).is_err());
    }

    #[tokio::test]
    async fn test_multiple_subscribers_receive_same_event() {
        let bus = EventBus::new(10);
        let mut sub1 = bus.subscribe();
        let mut sub2 = bus.subscribe();

        let event = relocated("42");
        assert_eq!(bus.emit(event.clone()).unwrap(), 2);

        assert_eq!(sub1.recv().await.unwrap(), event);
        assert_eq!(sub2.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn test_event_stream_with_filter() {
        let bus = EventBus::new(10);
        let mut stream = EventStream::new(bus.subscribe())
            .filter(|event| event.severity() >= EventSeverity::Warning);

        bus.emit(relocated("1")).ok();
        let warning = PipelineEvent::Relocation(RelocationEvent::MovedButTagged {
            item_id: "2".to_string(),
            destination: "Photos/dogs/b.png".to_string(),
            tag_id: "7".to_string(),
            message: "connection reset".to_string(),
        });
        bus.emit(warning.clone()).ok();

        assert_eq!(stream.recv().await.unwrap(), warning);
        assert!(stream.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_lagged_subscriber() {
        let bus = EventBus::new(2);
        let mut sub = bus.subscribe();

        for i in 0..5 {
            bus.emit(relocated(&i.to_string())).ok();
        }

        assert!(matches!(sub.recv().await, Err(RecvError::Lagged(_))));
    }

    #[test]
    fn test_event_severity() {
        let failed = PipelineEvent::Transform(TransformEvent::Failed {
            source_path: "_raw/raw_1.png".to_string(),
            message: "decode error".to_string(),
        });
        assert_eq!(failed.severity(), EventSeverity::Error);

        let missing = PipelineEvent::Transform(TransformEvent::OutputMissing {
            source_path: "_raw/raw_1.png".to_string(),
        });
        assert_eq!(missing.severity(), EventSeverity::Warning);

        assert_eq!(relocated("1").severity(), EventSeverity::Info);

        let skipped = PipelineEvent::Relocation(RelocationEvent::Skipped {
            item_id: "1".to_string(),
            reason: "no category tag".to_string(),
        });
        assert_eq!(skipped.severity(), EventSeverity::Debug);
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = PipelineEvent::Cycle(CycleEvent::Completed {
            cycle_id: "c-1".to_string(),
            discovered: 3,
            succeeded: 2,
            failed: 1,
            duration_ms: 1500,
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "Cycle");
        assert_eq!(json["payload"]["event"], "Completed");

        let back: PipelineEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }
}

//! Event hooks for pipeline lifecycle and provider attempts.
//!
//! Provides an optional, non-intrusive way to observe a pipeline run.
//! Everything emitted here is also logged through `tracing`; handlers are
//! for callers that want the signals as values (progress UIs, metrics,
//! tests).

use std::sync::Arc;
use std::time::Duration;

use crate::pipeline::Stage;
use crate::resilience::BreakerState;

/// Events emitted during a pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// The run entered a new stage.
    StageEntered {
        /// Request id assigned to this run.
        request_id: String,
        stage: Stage,
    },
    /// A dependency node finished its producer.
    NodeResolved {
        node: String,
        ok: bool,
    },
    /// A provider attempt is starting (1-indexed).
    AttemptStart {
        attempt: u32,
    },
    /// A retryable provider failure; another attempt follows after `delay`.
    TransportRetry {
        attempt: u32,
        delay: Duration,
        reason: String,
    },
    /// The circuit breaker changed state.
    BreakerTransition {
        from: BreakerState,
        to: BreakerState,
    },
    /// The run reached a terminal state.
    Finished {
        request_id: String,
        ok: bool,
    },
}

/// Handler for pipeline events.
///
/// # Example
///
/// ```
/// use codegen_pipeline::events::{Event, EventHandler};
///
/// struct PrintHandler;
///
/// impl EventHandler for PrintHandler {
///     fn on_event(&self, event: Event) {
///         if let Event::StageEntered { stage, .. } = event {
///             println!("[stage] {:?}", stage);
///         }
///     }
/// }
/// ```
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: Event);
}

/// Emit an event if a handler is present. No-op otherwise.
pub(crate) fn emit(handler: &Option<Arc<dyn EventHandler>>, event: Event) {
    if let Some(ref h) = handler {
        h.on_event(event);
    }
}

/// An [`EventHandler`] backed by a closure.
pub struct FnEventHandler<F: Fn(Event) + Send + Sync>(pub F);

impl<F: Fn(Event) + Send + Sync> EventHandler for FnEventHandler<F> {
    fn on_event(&self, event: Event) {
        (self.0)(event);
    }
}

/// Collects every event it receives. Handy in tests.
#[derive(Debug, Default)]
pub struct RecordingHandler {
    events: std::sync::Mutex<Vec<Event>>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far.
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl EventHandler for RecordingHandler {
    fn on_event(&self, event: Event) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

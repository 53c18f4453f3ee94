//! Lifecycle events and listener plumbing.
//!
//! Events are emitted on a [`Context`] as nodes resolve and tear down, so
//! consumers can observe progress, persist timings, stream to UIs, etc.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::context::Context;
use crate::node::Dependency;

/// Events a [`Context`] emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
  /// A node's provider resolved.
  SuccessRun,
  /// A node failed to resolve (provider error, missing argument, shutdown).
  FailRun,
  /// A node transitioned to SHUTDOWN under this context.
  SuccessShutdown,
  /// A node's dispose hook failed during shutdown; the gate still advanced.
  FailShutdown,
  /// A node returned to READY under this context.
  SuccessReset,
  /// A node's dispose hook failed during reset; the gate still advanced.
  FailReset,
}

/// Payload delivered to event handlers.
#[derive(Debug, Clone)]
pub struct EventPayload {
  pub dependency: Dependency,
  pub context: Context,
  pub execution_id: String,
  /// Wall clock, milliseconds since the epoch.
  pub time_start: u64,
  pub time_end: u64,
  pub error: Option<String>,
}

pub(crate) type Handler = Arc<dyn Fn(&EventPayload) + Send + Sync>;

/// Build a handler that forwards every payload into an unbounded channel.
///
/// Send errors are ignored; the receiver may have been dropped. The channel
/// is unbounded so a slow consumer cannot stall the engine; event volume is
/// one per node settle, so growth is bounded by graph size in practice.
pub fn channel_handler(
  sender: mpsc::UnboundedSender<EventPayload>,
) -> impl Fn(&EventPayload) + Send + Sync + 'static {
  move |payload: &EventPayload| {
    let _ = sender.send(payload.clone());
  }
}

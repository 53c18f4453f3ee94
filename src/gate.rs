//! Single-slot lifecycle gate.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};

use crate::error::EngineError;

/// Lifecycle status of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
  Ready,
  Shutdown,
}

/// Shared handle to an enqueued transition. Yields whether the node actually
/// transitioned.
pub type TransitionHandle = Shared<BoxFuture<'static, Result<bool, EngineError>>>;

/// Single-slot async state machine serializing lifecycle transitions while
/// permitting concurrent reads.
///
/// [`StatusGate::get`] resolves after the transition pending at call time has
/// completed, so readers never observe a half-applied transition. A failing
/// transition still advances the status; the caller decides what a failure
/// means, but teardown must not leave the gate stuck.
#[derive(Clone)]
pub struct StatusGate {
  inner: Arc<Mutex<GateState>>,
}

struct GateState {
  status: Status,
  epoch: u64,
  pending: Option<TransitionHandle>,
}

impl StatusGate {
  pub fn new() -> Self {
    Self {
      inner: Arc::new(Mutex::new(GateState {
        status: Status::Ready,
        epoch: 0,
        pending: None,
      })),
    }
  }

  /// Current status, observed only between transitions.
  pub async fn get(&self) -> Status {
    let pending = self.inner.lock().unwrap().pending.clone();
    if let Some(transition) = pending {
      let _ = transition.await;
    }
    self.inner.lock().unwrap().status
  }

  /// Enqueue a transition to `target`, gated on `work`.
  ///
  /// The transition waits for any prior pending transition, then awaits
  /// `work`; on settle (success or failure) the status becomes `target` and
  /// the slot is cleared unless a later transition superseded it. The handle
  /// is lazy and must be awaited (or observed through `get`) to progress.
  pub fn change<W>(&self, target: Status, work: W) -> TransitionHandle
  where
    W: Future<Output = Result<bool, EngineError>> + Send + 'static,
  {
    let mut state = self.inner.lock().unwrap();
    state.epoch += 1;
    let epoch = state.epoch;
    let prior = state.pending.take();
    let slot = Arc::clone(&self.inner);
    let handle: TransitionHandle = async move {
      if let Some(prior) = prior {
        let _ = prior.await;
      }
      let result = work.await;
      let mut state = slot.lock().unwrap();
      state.status = target;
      if state.epoch == epoch {
        state.pending = None;
      }
      result
    }
    .boxed()
    .shared();
    state.pending = Some(handle.clone());
    handle
  }
}

impl Default for StatusGate {
  fn default() -> Self {
    Self::new()
  }
}

impl fmt::Debug for StatusGate {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = self.inner.lock().unwrap();
    f.debug_struct("StatusGate")
      .field("status", &state.status)
      .field("pending", &state.pending.is_some())
      .finish()
  }
}

//! Reverse-topological teardown of a context's members.
//!
//! The walk starts from an arbitrary member and climbs successor links to
//! the true sinks before transitioning anything, so every node transitions
//! strictly after all of its dependents within the context.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use futures::FutureExt;
use futures::future::{self, BoxFuture, Shared};
use tracing::{debug, info, warn};

use crate::cache::now_millis;
use crate::context::Context;
use crate::error::EngineError;
use crate::events::{EventKind, EventPayload};
use crate::gate::Status;
use crate::key::CacheKey;
use crate::node::Dependency;

type WalkHandle = Shared<BoxFuture<'static, ()>>;

struct Teardown {
  context: Context,
  target: Status,
  execution_id: String,
  /// One walk future per node: concurrent branches reaching the same node
  /// await the same transition instead of racing past it.
  walks: Mutex<HashMap<CacheKey, WalkHandle>>,
  first_error: Mutex<Option<EngineError>>,
}

/// Transition every member of `context` to `target`, dependents first.
///
/// The walk always completes the whole membership; the first transition
/// error is reported afterwards, later ones are logged.
pub(crate) async fn transition_context(
  context: &Context,
  target: Status,
) -> Result<(), EngineError> {
  let teardown = Arc::new(Teardown {
    context: context.clone(),
    target,
    execution_id: uuid::Uuid::new_v4().to_string(),
    walks: Mutex::new(HashMap::new()),
    first_error: Mutex::new(None),
  });
  info!(
    context = %context.name(),
    execution_id = %teardown.execution_id,
    target = ?target,
    "context_transition_started"
  );

  while let Some(member) = context.first_member() {
    walk(&teardown, &member).await;
    if context.has(&member) {
      // A concurrent run re-enrolled the node after its walk settled; drop
      // the stale walk so the next pass transitions it again.
      teardown.walks.lock().unwrap().remove(&member.cache_key());
    }
  }

  let error = teardown.first_error.lock().unwrap().take();
  match error {
    None => {
      info!(
        context = %context.name(),
        execution_id = %teardown.execution_id,
        "context_transition_completed"
      );
      Ok(())
    }
    Some(error) => {
      warn!(
        context = %context.name(),
        execution_id = %teardown.execution_id,
        error = %error,
        "context_transition_failed"
      );
      Err(error)
    }
  }
}

fn walk(teardown: &Arc<Teardown>, dependency: &Dependency) -> WalkHandle {
  let key = dependency.cache_key();
  let mut walks = teardown.walks.lock().unwrap();
  if let Some(existing) = walks.get(&key) {
    return existing.clone();
  }
  let handle: WalkHandle = {
    let teardown = Arc::downgrade(teardown);
    let dependency = dependency.clone();
    async move {
      let Some(teardown) = Weak::upgrade(&teardown) else {
        return;
      };
      if !teardown.context.has(&dependency) {
        return;
      }
      teardown.context.remove(&dependency);

      let successors = dependency.successors();
      let pending: Vec<WalkHandle> = successors
        .iter()
        .map(|successor| walk(&teardown, successor))
        .collect();
      future::join_all(pending).await;

      transition_member(&teardown, &dependency).await;
    }
    .boxed()
    .shared()
  };
  walks.insert(key, handle.clone());
  handle
}

async fn transition_member(teardown: &Arc<Teardown>, dependency: &Dependency) {
  let time_start = now_millis();
  let result = match teardown.target {
    Status::Shutdown => dependency.shutdown().await,
    Status::Ready => dependency.reset().await,
  };
  let time_end = now_millis();

  let (success_kind, fail_kind) = match teardown.target {
    Status::Shutdown => (EventKind::SuccessShutdown, EventKind::FailShutdown),
    Status::Ready => (EventKind::SuccessReset, EventKind::FailReset),
  };
  let payload = |error: Option<String>| EventPayload {
    dependency: dependency.clone(),
    context: teardown.context.clone(),
    execution_id: teardown.execution_id.clone(),
    time_start,
    time_end,
    error,
  };

  match result {
    Ok(true) => {
      debug!(
        dependency = %dependency.name(),
        execution_id = %teardown.execution_id,
        "dependency_transitioned"
      );
      teardown.context.emit(success_kind, payload(None));
    }
    // Retained by another context, already shut down, or never started.
    Ok(false) => {}
    Err(error) => {
      warn!(
        dependency = %dependency.name(),
        execution_id = %teardown.execution_id,
        error = %error,
        "dependency_transition_failed"
      );
      teardown.context.emit(fail_kind, payload(Some(error.to_string())));
      let mut first = teardown.first_error.lock().unwrap();
      if first.is_none() {
        *first = Some(error);
      }
    }
  }
}

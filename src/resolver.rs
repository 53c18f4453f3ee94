//! DAG resolution: at-most-once visits, parallel edge fan-out, timings, and
//! run events.

use std::collections::HashSet;
use std::sync::{Arc, Weak};

use futures::FutureExt;
use futures::future;
use tracing::{debug, info, instrument, warn};

use crate::cache::{ExecutionCache, Timing, now_millis};
use crate::context::Context;
use crate::error::EngineError;
use crate::events::{EventKind, EventPayload};
use crate::key::{CacheKey, META};
use crate::node::{Dependency, ValueHandle};
use crate::params::IntoParams;

pub(crate) struct Resolver {
  cache: ExecutionCache,
  context: Option<Context>,
  /// Self-reference captured by visit futures. Weak, so the cache's futures
  /// do not keep the resolver (and thus themselves) alive past the run.
  weak: Weak<Resolver>,
}

impl Resolver {
  fn new(params: crate::params::Params, context: Option<Context>) -> Arc<Self> {
    Arc::new_cyclic(|weak| Self {
      cache: ExecutionCache::seeded(&params),
      context,
      weak: weak.clone(),
    })
  }

  /// Return the shared handle for `dependency`, creating and publishing it
  /// on first sight.
  ///
  /// The handle is installed in the cache before any edge recursion runs, so
  /// siblings requesting the same node converge on one invocation. Real
  /// nodes enroll in the context on a genuine miss only: a seeded override
  /// hits the cache here and is never enrolled.
  fn visit(&self, dependency: &Dependency) -> ValueHandle {
    let key = dependency.cache_key();
    let (handle, inserted) = self.cache.get_or_insert_with(key, || {
      let resolver = self.weak.clone();
      let dependency = dependency.clone();
      async move {
        let resolver = resolver
          .upgrade()
          .expect("resolver outlives its in-run visit futures");
        resolver.resolve_node(dependency).await
      }
      .boxed()
      .shared()
    });
    if inserted && !dependency.is_parameter() {
      if let Some(context) = &self.context {
        context.add(dependency);
      }
    }
    handle
  }

  async fn resolve_node(&self, dependency: Dependency) -> Result<serde_json::Value, EngineError> {
    // A started Resource short-circuits edge resolution entirely, so
    // transient ancestors are not re-invoked beneath a warm memo. The
    // context must still learn about the whole subgraph it now depends on,
    // or a later teardown would skip nodes this run never executed.
    let args = if dependency.is_started() {
      if let Some(context) = &self.context {
        self.enroll_subgraph(&dependency, context);
      }
      Vec::new()
    } else {
      self.resolve_edges(&dependency).await?
    };

    let time_start = now_millis();
    let result = dependency.get_value(args).await;
    self.settle(&dependency, time_start, result)
  }

  /// Enroll the reachable subgraph of a memoized node without executing it.
  ///
  /// Parameter placeholders never enroll, and a node already present in the
  /// cache is skipped without descending: seeded overrides stay unenrolled,
  /// and nodes this run already visited are enrolled.
  fn enroll_subgraph(&self, root: &Dependency, context: &Context) {
    let mut seen: HashSet<CacheKey> = HashSet::new();
    let mut stack = root.edges();
    while let Some(node) = stack.pop() {
      if node.is_parameter() || !seen.insert(node.cache_key()) {
        continue;
      }
      if self.cache.contains(&node.cache_key()) {
        continue;
      }
      context.add(&node);
      stack.extend(node.edges());
    }
  }

  /// Resolve every edge in parallel, in declaration order.
  ///
  /// META edges are awaited after the rest have settled, so the timings
  /// snapshot they deliver covers every sibling edge.
  async fn resolve_edges(
    &self,
    dependency: &Dependency,
  ) -> Result<Vec<serde_json::Value>, EngineError> {
    let edges = dependency.edges();
    let handles: Vec<ValueHandle> = edges.iter().map(|edge| self.visit(edge)).collect();

    let meta_key = CacheKey::Token(META.clone());
    let mut eager = Vec::new();
    let mut deferred = Vec::new();
    for (index, (edge, handle)) in edges.iter().zip(handles).enumerate() {
      if edge.cache_key() == meta_key {
        deferred.push((index, handle));
      } else {
        eager.push((index, handle));
      }
    }

    let mut args = vec![serde_json::Value::Null; edges.len()];
    let values = future::try_join_all(eager.iter().map(|(_, handle)| handle.clone())).await?;
    for ((index, _), value) in eager.into_iter().zip(values) {
      args[index] = value;
    }
    for (index, handle) in deferred {
      args[index] = handle.await?;
    }
    Ok(args)
  }

  /// Record the timing and notify the context once a node has settled.
  fn settle(
    &self,
    dependency: &Dependency,
    time_start: u64,
    result: Result<serde_json::Value, EngineError>,
  ) -> Result<serde_json::Value, EngineError> {
    let time_end = now_millis();
    let error = result.as_ref().err().map(ToString::to_string);

    self.cache.record(Timing {
      dependency: dependency.clone(),
      context: self.context.clone(),
      time_start,
      time_end,
      error: error.clone(),
    });
    match &error {
      None => debug!(
        dependency = %dependency.name(),
        execution_id = %self.cache.execution_id(),
        "dependency_resolved"
      ),
      Some(message) => warn!(
        dependency = %dependency.name(),
        execution_id = %self.cache.execution_id(),
        error = %message,
        "dependency_failed"
      ),
    }
    if let Some(context) = &self.context {
      let kind = if error.is_none() {
        EventKind::SuccessRun
      } else {
        EventKind::FailRun
      };
      context.emit(
        kind,
        EventPayload {
          dependency: dependency.clone(),
          context: context.clone(),
          execution_id: self.cache.execution_id().to_string(),
          time_start,
          time_end,
          error,
        },
      );
    }
    result
  }
}

/// Execute the DAG rooted at `root`.
///
/// Each run owns its cache, so within one run every node resolves at most
/// once. Two concurrent runs may each invoke a shared Transient node once;
/// Resource nodes are deduped across runs by their memo.
#[instrument(name = "run", skip_all, fields(root = %root.name()))]
pub async fn run(
  root: &Dependency,
  params: impl IntoParams,
  context: Option<&Context>,
) -> Result<serde_json::Value, EngineError> {
  let resolver = Resolver::new(params.into_params()?, context.cloned());
  info!(execution_id = %resolver.cache.execution_id(), "run_started");
  let result = resolver.visit(root).await;
  match &result {
    Ok(_) => info!(execution_id = %resolver.cache.execution_id(), "run_completed"),
    Err(error) => warn!(
      execution_id = %resolver.cache.execution_id(),
      error = %error,
      "run_failed"
    ),
  }
  result
}

/// Execute the DAG from several roots at once, preserving input order.
///
/// Roots settle independently; one root failing does not poison its
/// siblings, and shared ancestors still resolve only once.
#[instrument(name = "run_many", skip_all, fields(roots = roots.len()))]
pub async fn run_many(
  roots: &[Dependency],
  params: impl IntoParams,
  context: Option<&Context>,
) -> Result<Vec<Result<serde_json::Value, EngineError>>, EngineError> {
  let resolver = Resolver::new(params.into_params()?, context.cloned());
  info!(execution_id = %resolver.cache.execution_id(), "run_started");
  let handles: Vec<ValueHandle> = roots.iter().map(|root| resolver.visit(root)).collect();
  let results = future::join_all(handles).await;
  info!(execution_id = %resolver.cache.execution_id(), "run_completed");
  Ok(results)
}

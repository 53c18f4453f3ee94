//! Dependency nodes: construction surface, invocation, memoization, and
//! per-node lifecycle.
//!
//! A [`Dependency`] is a cheap-clone handle with pointer identity. Edges hold
//! strong references to predecessors; successor links (`inverse edges`) and
//! context membership are weak, so the object graph never owns a cycle.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use futures::FutureExt;
use futures::future::{self, BoxFuture, Shared};

use crate::context::{Context, ContextInner};
use crate::error::{BoxError, EngineError};
use crate::gate::{Status, StatusGate};
use crate::key::{CacheKey, ParamId};
use crate::params::IntoParams;

/// Shared pending handle to one resolved value.
pub(crate) type ValueHandle = Shared<BoxFuture<'static, Result<serde_json::Value, EngineError>>>;

type ProviderFn = Arc<
  dyn Fn(Vec<serde_json::Value>) -> BoxFuture<'static, Result<serde_json::Value, BoxError>>
    + Send
    + Sync,
>;

type DisposeFn =
  Arc<dyn Fn(serde_json::Value) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

#[derive(Debug)]
enum Kind {
  /// Re-evaluated on every run.
  Transient,
  /// Evaluated once and memoized until shutdown or reset.
  Resource,
  /// Placeholder satisfied by the caller's params.
  Parameter(ParamId),
}

struct GraphState {
  edges: Vec<Dependency>,
  inverse_edges: Vec<Weak<NodeInner>>,
  provider: Option<ProviderFn>,
  dispose: Option<DisposeFn>,
}

struct MemoSlot {
  epoch: u64,
  handle: ValueHandle,
}

pub(crate) struct NodeInner {
  kind: Kind,
  name: String,
  graph: Mutex<GraphState>,
  gate: StatusGate,
  in_flight: Mutex<HashMap<u64, ValueHandle>>,
  memo: Mutex<Option<MemoSlot>>,
  contexts: Mutex<Vec<Weak<ContextInner>>>,
  seq: AtomicU64,
}

/// One executable unit of the graph.
///
/// Clones share the same node; equality and hashing follow pointer identity,
/// never structure.
pub struct Dependency {
  inner: Arc<NodeInner>,
}

impl Clone for Dependency {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

impl PartialEq for Dependency {
  fn eq(&self, other: &Self) -> bool {
    Arc::ptr_eq(&self.inner, &other.inner)
  }
}

impl Eq for Dependency {}

impl Hash for Dependency {
  fn hash<H: Hasher>(&self, state: &mut H) {
    (Arc::as_ptr(&self.inner) as usize).hash(state);
  }
}

impl fmt::Debug for Dependency {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Dependency")
      .field("name", &self.inner.name)
      .field("kind", &self.inner.kind)
      .finish_non_exhaustive()
  }
}

/// Types accepted as edge declarations: other nodes, or parameter keys that
/// become placeholders.
pub trait IntoEdge {
  fn into_edge(self) -> Dependency;
}

impl IntoEdge for Dependency {
  fn into_edge(self) -> Dependency {
    self
  }
}

impl IntoEdge for &Dependency {
  fn into_edge(self) -> Dependency {
    self.clone()
  }
}

impl IntoEdge for &str {
  fn into_edge(self) -> Dependency {
    Dependency::parameter(self)
  }
}

impl IntoEdge for String {
  fn into_edge(self) -> Dependency {
    Dependency::parameter(self)
  }
}

impl IntoEdge for crate::key::Token {
  fn into_edge(self) -> Dependency {
    Dependency::parameter(self)
  }
}

impl IntoEdge for &crate::key::Token {
  fn into_edge(self) -> Dependency {
    Dependency::parameter(self)
  }
}

impl Dependency {
  fn new(kind: Kind, name: String) -> Self {
    Self {
      inner: Arc::new(NodeInner {
        kind,
        name,
        graph: Mutex::new(GraphState {
          edges: Vec::new(),
          inverse_edges: Vec::new(),
          provider: None,
          dispose: None,
        }),
        gate: StatusGate::new(),
        in_flight: Mutex::new(HashMap::new()),
        memo: Mutex::new(None),
        contexts: Mutex::new(Vec::new()),
        seq: AtomicU64::new(1),
      }),
    }
  }

  /// A node re-evaluated on every run.
  pub fn transient(name: impl Into<String>) -> Self {
    Self::new(Kind::Transient, name.into())
  }

  /// A memoized node evaluated once and kept until shutdown or reset.
  pub fn resource(name: impl Into<String>) -> Self {
    Self::new(Kind::Resource, name.into())
  }

  /// A placeholder resolved from the caller's params; invoking it directly
  /// fails with `Missing argument`.
  pub fn parameter(key: impl Into<ParamId>) -> Self {
    let key = key.into();
    let name = key.to_string();
    Self::new(Kind::Parameter(key), name)
  }

  /// Interpret a JSON value as an edge declaration. Strings become parameter
  /// placeholders; any other shape is rejected.
  pub fn edge_from_value(value: &serde_json::Value) -> Result<Dependency, EngineError> {
    match value {
      serde_json::Value::String(key) => Ok(Dependency::parameter(key.as_str())),
      _ => Err(EngineError::InvalidEdge),
    }
  }

  /// Replace this node's edges. Order is the provider's argument order.
  ///
  /// Successor links on the old and new real-node edges are kept symmetric;
  /// parameter placeholders carry no successor links.
  pub fn depends_on<I>(self, edges: I) -> Self
  where
    I: IntoIterator,
    I::Item: IntoEdge,
  {
    let new_edges: Vec<Dependency> = edges.into_iter().map(IntoEdge::into_edge).collect();
    let old_edges = {
      let mut graph = self.inner.graph.lock().unwrap();
      std::mem::replace(&mut graph.edges, new_edges.clone())
    };
    for old in &old_edges {
      if !old.is_parameter() {
        old.remove_successor(&self);
      }
    }
    for edge in &new_edges {
      if !edge.is_parameter() {
        edge.add_successor(&self);
      }
    }
    self
  }

  /// Set the provider invoked with edge-resolved values in declaration order.
  pub fn provides<F, Fut, E>(self, provider: F) -> Self
  where
    F: Fn(Vec<serde_json::Value>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<serde_json::Value, E>> + Send + 'static,
    E: Into<BoxError>,
  {
    let wrapped: ProviderFn =
      Arc::new(move |args| provider(args).map(|result| result.map_err(Into::into)).boxed());
    self.inner.graph.lock().unwrap().provider = Some(wrapped);
    self
  }

  /// Register the teardown hook (Resource only). It receives the memoized
  /// value when the node is shut down or reset.
  pub fn disposes<F, Fut, E>(self, dispose: F) -> Self
  where
    F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<(), E>> + Send + 'static,
    E: Into<BoxError>,
  {
    let wrapped: DisposeFn =
      Arc::new(move |value| dispose(value).map(|result| result.map_err(Into::into)).boxed());
    self.inner.graph.lock().unwrap().dispose = Some(wrapped);
    self
  }

  pub fn name(&self) -> &str {
    &self.inner.name
  }

  pub fn is_parameter(&self) -> bool {
    matches!(self.inner.kind, Kind::Parameter(_))
  }

  pub fn is_resource(&self) -> bool {
    matches!(self.inner.kind, Kind::Resource)
  }

  /// Snapshot of the declared edges, in declaration order.
  pub fn edges(&self) -> Vec<Dependency> {
    self.inner.graph.lock().unwrap().edges.clone()
  }

  /// Snapshot of the live successors (nodes that declared an edge on this).
  pub fn successors(&self) -> Vec<Dependency> {
    self
      .inner
      .graph
      .lock()
      .unwrap()
      .inverse_edges
      .iter()
      .filter_map(Weak::upgrade)
      .map(|inner| Dependency { inner })
      .collect()
  }

  /// Current lifecycle status, observed between transitions.
  pub async fn status(&self) -> Status {
    self.inner.gate.get().await
  }

  /// Execute the DAG rooted at this node.
  pub async fn run(
    &self,
    params: impl IntoParams,
    context: Option<&Context>,
  ) -> Result<serde_json::Value, EngineError> {
    crate::resolver::run(self, params, context).await
  }

  /// Whether a Resource node currently holds a memoized invocation.
  pub(crate) fn is_started(&self) -> bool {
    matches!(self.inner.kind, Kind::Resource) && self.inner.memo.lock().unwrap().is_some()
  }

  pub(crate) fn cache_key(&self) -> CacheKey {
    match &self.inner.kind {
      Kind::Parameter(id) => CacheKey::from(id.clone()),
      _ => CacheKey::Node(self.clone()),
    }
  }

  fn add_successor(&self, successor: &Dependency) {
    let mut graph = self.inner.graph.lock().unwrap();
    graph.inverse_edges.retain(|weak| weak.upgrade().is_some());
    let present = graph.inverse_edges.iter().any(|weak| {
      weak
        .upgrade()
        .is_some_and(|inner| Arc::ptr_eq(&inner, &successor.inner))
    });
    if !present {
      graph.inverse_edges.push(Arc::downgrade(&successor.inner));
    }
  }

  fn remove_successor(&self, successor: &Dependency) {
    self.inner.graph.lock().unwrap().inverse_edges.retain(|weak| {
      weak
        .upgrade()
        .is_some_and(|inner| !Arc::ptr_eq(&inner, &successor.inner))
    });
  }

  pub(crate) fn enroll(&self, context: &Arc<ContextInner>) {
    let mut contexts = self.inner.contexts.lock().unwrap();
    contexts.retain(|weak| weak.upgrade().is_some());
    let present = contexts
      .iter()
      .any(|weak| weak.upgrade().is_some_and(|inner| Arc::ptr_eq(&inner, context)));
    if !present {
      contexts.push(Arc::downgrade(context));
    }
  }

  pub(crate) fn unenroll(&self, context: &Arc<ContextInner>) {
    self.inner.contexts.lock().unwrap().retain(|weak| {
      weak
        .upgrade()
        .is_some_and(|inner| !Arc::ptr_eq(&inner, context))
    });
  }

  fn held_by_any_context(&self) -> bool {
    self
      .inner
      .contexts
      .lock()
      .unwrap()
      .iter()
      .any(|weak| weak.upgrade().is_some())
  }

  /// Resolve this node's value from edge-resolved arguments.
  ///
  /// Parameter placeholders fail (their value comes from the run cache, never
  /// from here). Resources return the memoized handle when present and
  /// install a failure hook that clears the memo so a later run retries.
  pub(crate) fn get_value(&self, args: Vec<serde_json::Value>) -> ValueHandle {
    match &self.inner.kind {
      Kind::Parameter(id) => {
        let err = EngineError::MissingArgument { key: id.to_string() };
        future::ready(Err(err)).boxed().shared()
      }
      Kind::Transient => self.invoke(args),
      Kind::Resource => {
        let mut memo = self.inner.memo.lock().unwrap();
        if let Some(slot) = memo.as_ref() {
          return slot.handle.clone();
        }
        let epoch = self.inner.seq.fetch_add(1, Ordering::Relaxed);
        let base = self.invoke(args);
        let weak = Arc::downgrade(&self.inner);
        let handle: ValueHandle = async move {
          let result = base.await;
          if result.is_err() {
            if let Some(inner) = weak.upgrade() {
              let mut memo = inner.memo.lock().unwrap();
              if memo.as_ref().is_some_and(|slot| slot.epoch == epoch) {
                *memo = None;
              }
            }
          }
          result
        }
        .boxed()
        .shared();
        *memo = Some(MemoSlot {
          epoch,
          handle: handle.clone(),
        });
        handle
      }
    }
  }

  /// One tracked invocation of the provider, gated on the node's status.
  ///
  /// The invocation joins `in_flight` only after the gate read passes: a call
  /// parked behind a pending transition is not yet running user code, and the
  /// transition's drain must not wait on it.
  fn invoke(&self, args: Vec<serde_json::Value>) -> ValueHandle {
    let weak = Arc::downgrade(&self.inner);
    let handle: ValueHandle = async move {
      let Some(node) = weak.upgrade() else {
        return Err(EngineError::Shutdown);
      };
      let gate = node.gate.clone();
      drop(node);
      if gate.get().await == Status::Shutdown {
        return Err(EngineError::Shutdown);
      }

      let Some(node) = weak.upgrade() else {
        return Err(EngineError::Shutdown);
      };
      let name = node.name.clone();
      let provider = node
        .graph
        .lock()
        .unwrap()
        .provider
        .clone()
        .ok_or_else(|| EngineError::MissingProvider { name: name.clone() })?;
      let id = node.seq.fetch_add(1, Ordering::Relaxed);
      let tracked: ValueHandle = {
        let weak = weak.clone();
        async move {
          let result = provider(args).await.map_err(|source| EngineError::Provider {
            name,
            message: source.to_string(),
          });
          if let Some(inner) = weak.upgrade() {
            inner.in_flight.lock().unwrap().remove(&id);
          }
          result
        }
        .boxed()
        .shared()
      };
      node.in_flight.lock().unwrap().insert(id, tracked.clone());
      drop(node);
      tracked.await
    }
    .boxed()
    .shared();
    handle
  }

  /// Wait for every in-flight invocation to settle, ignoring outcomes.
  async fn drain_in_flight(&self) {
    let pending: Vec<ValueHandle> = self
      .inner
      .in_flight
      .lock()
      .unwrap()
      .values()
      .cloned()
      .collect();
    if pending.is_empty() {
      return;
    }
    let _ = future::join_all(pending).await;
  }

  /// Shut this node down: wait for in-flight work, run the dispose hook
  /// (Resource only), flip the gate.
  ///
  /// Returns `Ok(true)` when the node actually transitioned. No-ops (already
  /// SHUTDOWN, still held by a context, Resource never started) return
  /// `Ok(false)`. A dispose failure surfaces as `Err` but the gate still
  /// advances.
  pub async fn shutdown(&self) -> Result<bool, EngineError> {
    self.transition(Status::Shutdown).await
  }

  /// Return this node to READY, clearing memoized state so the next run
  /// starts from scratch.
  pub async fn reset(&self) -> Result<bool, EngineError> {
    self.transition(Status::Ready).await
  }

  async fn transition(&self, target: Status) -> Result<bool, EngineError> {
    if self.is_parameter() {
      return Ok(false);
    }
    let status = self.inner.gate.get().await;
    if target == Status::Shutdown {
      if status == Status::Shutdown {
        return Ok(false);
      }
      if self.held_by_any_context() {
        return Ok(false);
      }
    }
    if !self.is_resource() {
      let node = self.clone();
      let work = async move {
        node.drain_in_flight().await;
        Ok(true)
      };
      return self.inner.gate.change(target, work).await;
    }
    let slot = self.inner.memo.lock().unwrap().take();
    let Some(slot) = slot else {
      // Never started: the transition is a no-op, but an explicit call still
      // advances the gate.
      return self.inner.gate.change(target, future::ready(Ok(false))).await;
    };
    let node = self.clone();
    let dispose = self.inner.graph.lock().unwrap().dispose.clone();
    let name = self.inner.name.clone();
    let work = async move {
      node.drain_in_flight().await;
      if let Ok(value) = slot.handle.await {
        if let Some(dispose) = dispose {
          dispose(value).await.map_err(|source| EngineError::Dispose {
            name,
            message: source.to_string(),
          })?;
        }
      }
      Ok(true)
    };
    self.inner.gate.change(target, work).await
  }
}

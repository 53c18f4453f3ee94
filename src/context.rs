//! Caller-owned lifecycle group.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::error::EngineError;
use crate::events::{EventKind, EventPayload, Handler};
use crate::gate::Status;
use crate::graph;
use crate::lifecycle;
use crate::node::Dependency;

pub(crate) struct ContextInner {
  name: String,
  members: Mutex<Vec<Dependency>>,
  handlers: Mutex<HashMap<EventKind, Handler>>,
}

/// Tracks every node a caller has run under it and owns their teardown.
///
/// Clones share the same membership. A node may belong to several contexts
/// at once; only the last releasing context actually disposes it.
#[derive(Clone)]
pub struct Context {
  pub(crate) inner: Arc<ContextInner>,
}

impl Context {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      inner: Arc::new(ContextInner {
        name: name.into(),
        members: Mutex::new(Vec::new()),
        handlers: Mutex::new(HashMap::new()),
      }),
    }
  }

  pub fn name(&self) -> &str {
    &self.inner.name
  }

  /// Enroll a node, keeping membership symmetric on both sides.
  pub fn add(&self, dependency: &Dependency) {
    {
      let mut members = self.inner.members.lock().unwrap();
      if !members.iter().any(|member| member == dependency) {
        members.push(dependency.clone());
      }
    }
    dependency.enroll(&self.inner);
  }

  /// De-enroll a node, keeping membership symmetric on both sides.
  pub fn remove(&self, dependency: &Dependency) {
    self
      .inner
      .members
      .lock()
      .unwrap()
      .retain(|member| member != dependency);
    dependency.unenroll(&self.inner);
  }

  pub fn has(&self, dependency: &Dependency) -> bool {
    self
      .inner
      .members
      .lock()
      .unwrap()
      .iter()
      .any(|member| member == dependency)
  }

  pub fn size(&self) -> usize {
    self.inner.members.lock().unwrap().len()
  }

  /// Snapshot of the current members, in enrollment order.
  pub fn members(&self) -> Vec<Dependency> {
    self.inner.members.lock().unwrap().clone()
  }

  pub(crate) fn first_member(&self) -> Option<Dependency> {
    self.inner.members.lock().unwrap().first().cloned()
  }

  /// Register `handler` for `kind`. Later registrations replace earlier
  /// ones; each event carries at most one handler.
  pub fn on<F>(&self, kind: EventKind, handler: F)
  where
    F: Fn(&EventPayload) + Send + Sync + 'static,
  {
    self
      .inner
      .handlers
      .lock()
      .unwrap()
      .insert(kind, Arc::new(handler));
  }

  pub(crate) fn emit(&self, kind: EventKind, payload: EventPayload) {
    let handler = self.inner.handlers.lock().unwrap().get(&kind).cloned();
    if let Some(handler) = handler {
      handler(&payload);
    }
  }

  /// Reachable closure over edges from the current members.
  pub fn get_adjacency_list(&self) -> Vec<Dependency> {
    graph::get_adjacency_list(&self.members())
  }

  /// Transition every member to SHUTDOWN, dependents strictly first.
  pub async fn shutdown(&self) -> Result<(), EngineError> {
    lifecycle::transition_context(self, Status::Shutdown).await
  }

  /// Return every member to READY, clearing memoized state along the way.
  pub async fn reset(&self) -> Result<(), EngineError> {
    lifecycle::transition_context(self, Status::Ready).await
  }
}

impl PartialEq for Context {
  fn eq(&self, other: &Self) -> bool {
    Arc::ptr_eq(&self.inner, &other.inner)
  }
}

impl Eq for Context {}

impl fmt::Debug for Context {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Context")
      .field("name", &self.inner.name)
      .field("size", &self.size())
      .finish()
  }
}

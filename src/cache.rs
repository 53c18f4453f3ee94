//! Per-run resolution cache.
//!
//! One cache is created per `run`, seeded with caller params and overrides,
//! and discarded with the pending handles it holds. Entries are published
//! before their edges resolve, which is what makes a node execute at most
//! once within a run.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use futures::FutureExt;
use futures::future;
use serde_json::json;

use crate::context::Context;
use crate::error::EngineError;
use crate::key::{CacheKey, EXECUTION_ID, META};
use crate::node::{Dependency, ValueHandle};
use crate::params::{Params, ParamsKey};

/// One record in the per-run timings sequence.
#[derive(Debug, Clone)]
pub struct Timing {
  pub dependency: Dependency,
  pub context: Option<Context>,
  /// Wall clock, milliseconds since the epoch.
  pub time_start: u64,
  pub time_end: u64,
  pub error: Option<String>,
}

impl Timing {
  /// JSON rendition used for META delivery.
  pub fn to_value(&self) -> serde_json::Value {
    json!({
      "dependency": self.dependency.name(),
      "context": self.context.as_ref().map(|context| context.name().to_string()),
      "timeStart": self.time_start,
      "timeEnd": self.time_end,
      "error": self.error.clone(),
    })
  }
}

pub(crate) fn now_millis() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|elapsed| elapsed.as_millis() as u64)
    .unwrap_or(0)
}

/// Mapping from node identity to a shared pending handle, owned by one run.
pub(crate) struct ExecutionCache {
  entries: Mutex<HashMap<CacheKey, ValueHandle>>,
  timings: Arc<Mutex<Vec<Timing>>>,
  execution_id: String,
}

impl ExecutionCache {
  /// Build a cache seeded with every param entry, the META snapshot handle,
  /// and the run's execution id (caller-supplied or fresh).
  pub(crate) fn seeded(params: &Params) -> Self {
    let mut execution_id = None;
    for (key, value) in params.entries() {
      if let ParamsKey::Token(token) = key {
        if *token == *EXECUTION_ID {
          if let Some(id) = value.as_str() {
            execution_id = Some(id.to_string());
          }
        }
      }
    }
    let execution_id = execution_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let timings: Arc<Mutex<Vec<Timing>>> = Arc::default();
    let mut entries = HashMap::new();
    for (key, value) in params.entries() {
      let cache_key = match key {
        ParamsKey::Str(key) => CacheKey::Str(key.clone()),
        ParamsKey::Token(token) => CacheKey::Token(token.clone()),
        ParamsKey::Dependency(dependency) => CacheKey::Node(dependency.clone()),
      };
      entries.insert(cache_key, ready_handle(Ok(value.clone())));
    }
    entries.insert(
      CacheKey::Token(EXECUTION_ID.clone()),
      ready_handle(Ok(json!(execution_id.clone()))),
    );
    // The META handle snapshots the timings recorded up to its first poll;
    // every awaiter then sees that same snapshot.
    let meta: ValueHandle = {
      let timings = Arc::clone(&timings);
      async move {
        let snapshot: Vec<serde_json::Value> =
          timings.lock().unwrap().iter().map(Timing::to_value).collect();
        Ok(json!({ "timings": snapshot }))
      }
      .boxed()
      .shared()
    };
    entries.insert(CacheKey::Token(META.clone()), meta);

    Self {
      entries: Mutex::new(entries),
      timings,
      execution_id,
    }
  }

  pub(crate) fn execution_id(&self) -> &str {
    &self.execution_id
  }

  /// Return the entry for `key`, or publish the handle built by `make`.
  ///
  /// The check and the publish happen under one lock, so concurrent visits
  /// of the same node always converge on a single handle. The second tuple
  /// element reports whether `make` ran.
  pub(crate) fn get_or_insert_with(
    &self,
    key: CacheKey,
    make: impl FnOnce() -> ValueHandle,
  ) -> (ValueHandle, bool) {
    let mut entries = self.entries.lock().unwrap();
    if let Some(existing) = entries.get(&key) {
      return (existing.clone(), false);
    }
    let handle = make();
    entries.insert(key, handle.clone());
    (handle, true)
  }

  pub(crate) fn contains(&self, key: &CacheKey) -> bool {
    self.entries.lock().unwrap().contains_key(key)
  }

  pub(crate) fn record(&self, timing: Timing) {
    self.timings.lock().unwrap().push(timing);
  }
}

fn ready_handle(result: Result<serde_json::Value, EngineError>) -> ValueHandle {
  future::ready(result).boxed().shared()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::key::ParamId;

  #[tokio::test]
  async fn test_meta_snapshot_covers_recorded_timings() {
    let cache = ExecutionCache::seeded(&Params::new());
    cache.record(Timing {
      dependency: Dependency::transient("db"),
      context: None,
      time_start: 1,
      time_end: 2,
      error: None,
    });

    let (meta, inserted) =
      cache.get_or_insert_with(CacheKey::Token(META.clone()), || unreachable!());
    assert!(!inserted);
    let snapshot = meta.await.unwrap();
    let timings = snapshot["timings"].as_array().unwrap();
    assert_eq!(timings.len(), 1);
    assert_eq!(timings[0]["dependency"], json!("db"));
    assert_eq!(timings[0]["error"], json!(null));
  }

  #[tokio::test]
  async fn test_execution_id_is_seeded_and_injectable() {
    let fresh = ExecutionCache::seeded(&Params::new());
    assert!(!fresh.execution_id().is_empty());

    let params = Params::new().with(&*EXECUTION_ID, json!("run-42"));
    let injected = ExecutionCache::seeded(&params);
    assert_eq!(injected.execution_id(), "run-42");

    let (handle, _) = injected.get_or_insert_with(CacheKey::Token(EXECUTION_ID.clone()), || {
      unreachable!()
    });
    assert_eq!(handle.await.unwrap(), json!("run-42"));
  }

  #[tokio::test]
  async fn test_param_entries_resolve_to_their_values() {
    let params = Params::new().with("greeting", json!("hello"));
    let cache = ExecutionCache::seeded(&params);
    let (handle, inserted) =
      cache.get_or_insert_with(CacheKey::from(ParamId::from("greeting")), || unreachable!());
    assert!(!inserted);
    assert_eq!(handle.await.unwrap(), json!("hello"));
  }
}

//! Caller-supplied parameters and overrides for one run.

use std::collections::HashMap;

use crate::error::EngineError;
use crate::key::Token;
use crate::node::Dependency;

/// Key under which one param entry is seeded into the run cache.
#[derive(Debug, Clone)]
pub enum ParamsKey {
  /// Satisfies parameter placeholders declared with the same name.
  Str(String),
  /// Satisfies placeholders declared with the same token.
  Token(Token),
  /// Mock override: the node resolves to the mapped value without running
  /// its provider and without enrolling in any context.
  Dependency(Dependency),
}

impl From<&str> for ParamsKey {
  fn from(key: &str) -> Self {
    ParamsKey::Str(key.to_string())
  }
}

impl From<String> for ParamsKey {
  fn from(key: String) -> Self {
    ParamsKey::Str(key)
  }
}

impl From<Token> for ParamsKey {
  fn from(token: Token) -> Self {
    ParamsKey::Token(token)
  }
}

impl From<&Token> for ParamsKey {
  fn from(token: &Token) -> Self {
    ParamsKey::Token(token.clone())
  }
}

impl From<Dependency> for ParamsKey {
  fn from(dependency: Dependency) -> Self {
    ParamsKey::Dependency(dependency)
  }
}

impl From<&Dependency> for ParamsKey {
  fn from(dependency: &Dependency) -> Self {
    ParamsKey::Dependency(dependency.clone())
  }
}

/// Ordered parameter entries for one run.
#[derive(Debug, Clone, Default)]
pub struct Params {
  entries: Vec<(ParamsKey, serde_json::Value)>,
}

impl Params {
  pub fn new() -> Self {
    Self::default()
  }

  /// Append an entry, builder style.
  pub fn with(mut self, key: impl Into<ParamsKey>, value: serde_json::Value) -> Self {
    self.entries.push((key.into(), value));
    self
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub(crate) fn entries(&self) -> &[(ParamsKey, serde_json::Value)] {
    &self.entries
  }
}

/// Input shapes accepted as run parameters: a typed [`Params`], nothing, a
/// key/value map, an ordered pair list, or a JSON object.
pub trait IntoParams {
  fn into_params(self) -> Result<Params, EngineError>;
}

impl IntoParams for Params {
  fn into_params(self) -> Result<Params, EngineError> {
    Ok(self)
  }
}

impl IntoParams for () {
  fn into_params(self) -> Result<Params, EngineError> {
    Ok(Params::new())
  }
}

impl IntoParams for HashMap<String, serde_json::Value> {
  fn into_params(self) -> Result<Params, EngineError> {
    let mut params = Params::new();
    for (key, value) in self {
      params.entries.push((ParamsKey::Str(key), value));
    }
    Ok(params)
  }
}

impl IntoParams for Vec<(ParamsKey, serde_json::Value)> {
  fn into_params(self) -> Result<Params, EngineError> {
    Ok(Params { entries: self })
  }
}

/// JSON input: an object becomes string-keyed entries, an array must hold
/// `[key, value]` pairs with string keys. Anything else is rejected with the
/// stable message.
impl IntoParams for serde_json::Value {
  fn into_params(self) -> Result<Params, EngineError> {
    match self {
      serde_json::Value::Object(map) => {
        let mut params = Params::new();
        for (key, value) in map {
          params.entries.push((ParamsKey::Str(key), value));
        }
        Ok(params)
      }
      serde_json::Value::Array(pairs) => {
        let mut params = Params::new();
        for pair in pairs {
          let serde_json::Value::Array(kv) = pair else {
            return Err(EngineError::InvalidParams);
          };
          if kv.len() != 2 {
            return Err(EngineError::InvalidParams);
          }
          let Some(key) = kv[0].as_str() else {
            return Err(EngineError::InvalidParams);
          };
          params.entries.push((ParamsKey::Str(key.to_string()), kv[1].clone()));
        }
        Ok(params)
      }
      _ => Err(EngineError::InvalidParams),
    }
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  #[test]
  fn test_object_params_become_string_keys() {
    let params = json!({ "greeting": "hello" }).into_params().unwrap();
    assert!(matches!(
      params.entries(),
      [(ParamsKey::Str(key), value)] if key == "greeting" && value == &json!("hello")
    ));
  }

  #[test]
  fn test_pair_list_params_preserve_order() {
    let params = json!([["first", 1], ["second", 2]]).into_params().unwrap();
    let keys: Vec<_> = params
      .entries()
      .iter()
      .map(|(key, _)| match key {
        ParamsKey::Str(key) => key.clone(),
        _ => unreachable!(),
      })
      .collect();
    assert_eq!(keys, ["first", "second"]);
  }

  #[test]
  fn test_malformed_params_use_stable_message() {
    for bad in [json!(42), json!("flat"), json!([["k", 1, 2]]), json!([[1, "v"]])] {
      let err = bad.into_params().unwrap_err();
      assert_eq!(
        err.to_string(),
        "Must be either a Map, an array of key/value pairs or an object"
      );
    }
  }
}

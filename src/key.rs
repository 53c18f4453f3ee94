//! Identity of cache entries and parameter placeholders.
//!
//! Keys are heterogeneous: real nodes are keyed by pointer identity, while
//! parameter placeholders are keyed by the raw string or [`Token`] the caller
//! supplies. Node keys never compare structurally.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};

use crate::node::Dependency;

static NEXT_TOKEN_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque unique key, the symbol analog.
///
/// Two tokens are equal only when one is a clone of the other; the label is
/// for display and carries no identity.
#[derive(Debug, Clone)]
pub struct Token {
  id: u64,
  label: Arc<str>,
}

impl Token {
  /// Mint a fresh token. Every call returns a distinct identity, even for
  /// the same label.
  pub fn new(label: impl Into<String>) -> Self {
    Self {
      id: NEXT_TOKEN_ID.fetch_add(1, Ordering::Relaxed),
      label: label.into().into(),
    }
  }

  pub fn label(&self) -> &str {
    &self.label
  }
}

impl PartialEq for Token {
  fn eq(&self, other: &Self) -> bool {
    self.id == other.id
  }
}

impl Eq for Token {}

impl Hash for Token {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.id.hash(state);
  }
}

impl fmt::Display for Token {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.label)
  }
}

/// Well-known key delivering a `{ "timings": [...] }` snapshot of the run.
pub static META: LazyLock<Token> = LazyLock::new(|| Token::new("meta"));

/// Well-known key delivering the current run's execution id. May also be
/// supplied through params to correlate several runs.
pub static EXECUTION_ID: LazyLock<Token> = LazyLock::new(|| Token::new("execution_id"));

/// Identity of a parameter placeholder: the raw key the caller supplies.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ParamId {
  Str(String),
  Token(Token),
}

impl fmt::Display for ParamId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ParamId::Str(key) => write!(f, "{}", key),
      ParamId::Token(token) => write!(f, "{}", token),
    }
  }
}

impl From<&str> for ParamId {
  fn from(key: &str) -> Self {
    ParamId::Str(key.to_string())
  }
}

impl From<String> for ParamId {
  fn from(key: String) -> Self {
    ParamId::Str(key)
  }
}

impl From<Token> for ParamId {
  fn from(token: Token) -> Self {
    ParamId::Token(token)
  }
}

impl From<&Token> for ParamId {
  fn from(token: &Token) -> Self {
    ParamId::Token(token.clone())
  }
}

/// Cache key for one resolved entry within a run.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
  /// A real node, compared by pointer identity.
  Node(Dependency),
  Str(String),
  Token(Token),
}

impl From<ParamId> for CacheKey {
  fn from(id: ParamId) -> Self {
    match id {
      ParamId::Str(key) => CacheKey::Str(key),
      ParamId::Token(token) => CacheKey::Token(token),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_tokens_are_unique_per_mint() {
    let first = Token::new("db");
    let second = Token::new("db");
    assert_ne!(first, second);
    assert_eq!(first, first.clone());
    assert_eq!(first.label(), "db");
  }

  #[test]
  fn test_well_known_tokens_are_stable() {
    assert_eq!(*META, META.clone());
    assert_ne!(*META, *EXECUTION_ID);
  }

  #[test]
  fn test_param_id_display_uses_raw_key() {
    assert_eq!(ParamId::from("greeting").to_string(), "greeting");
    assert_eq!(ParamId::from(Token::new("session")).to_string(), "session");
  }
}

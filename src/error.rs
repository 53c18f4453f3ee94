//! Engine errors.

/// Boxed error accepted from user-supplied providers and dispose hooks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur while resolving or tearing down a dependency graph.
///
/// The enum is `Clone` because one result is fanned out to every dependent
/// through a shared pending handle.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
  /// A parameter placeholder was not satisfied by the caller's params.
  #[error("Missing argument: {key}")]
  MissingArgument { key: String },

  /// The params input was none of the accepted shapes.
  #[error("Must be either a Map, an array of key/value pairs or an object")]
  InvalidParams,

  /// An edge declaration was neither a dependency nor a string/symbol.
  #[error("A function can depend on a dependency or a string/symbol")]
  InvalidEdge,

  /// The node's gate is SHUTDOWN; new invocations are refused.
  #[error("The dependency is now shutdown")]
  Shutdown,

  /// A real node was invoked without a provider.
  #[error("dependency '{name}' has no provider")]
  MissingProvider { name: String },

  /// The provider failed; `message` is the source error's display text.
  #[error("{message}")]
  Provider { name: String, message: String },

  /// A dispose hook failed during shutdown or reset.
  #[error("dispose failed for dependency '{name}': {message}")]
  Dispose { name: String, message: String },
}

//! Async DAG execution engine with at-most-once resolution per run,
//! memoized resources, and reverse-topological teardown.
//!
//! # Architecture
//!
//! ```text
//! run(root, params, context)
//! ├── ExecutionCache - per-run identity -> shared pending handle, seeded
//! │                    with params, overrides, META and EXECUTION_ID
//! ├── Resolver       - walks edges in parallel, resolves each node at most
//! │                    once per run, records timings, emits run events
//! └── Context        - tracks every node started under it
//!     └── shutdown()/reset() - reverse-topological teardown: drain
//!         in-flight work, dispose resources, flip each node's StatusGate
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use lobelia::{Context, Dependency, run};
//! use serde_json::json;
//!
//! let config = Dependency::transient("config")
//!   .provides(|_| async { Ok::<_, lobelia::BoxError>(json!({ "dsn": "postgres://" })) });
//! let db = Dependency::resource("db")
//!   .depends_on([&config])
//!   .provides(|args| async move { connect(&args[0]).await })
//!   .disposes(|conn| async move { close(conn).await });
//!
//! let context = Context::new("request");
//! let value = run(&db, (), Some(&context)).await?;
//! context.shutdown().await?;
//! ```

mod cache;
mod context;
mod error;
mod events;
mod gate;
mod graph;
mod key;
mod lifecycle;
mod node;
mod params;
mod resolver;

pub use cache::Timing;
pub use context::Context;
pub use error::{BoxError, EngineError};
pub use events::{EventKind, EventPayload, channel_handler};
pub use gate::{Status, StatusGate, TransitionHandle};
pub use graph::get_adjacency_list;
pub use key::{CacheKey, EXECUTION_ID, META, ParamId, Token};
pub use node::{Dependency, IntoEdge};
pub use params::{IntoParams, Params, ParamsKey};
pub use resolver::{run, run_many};

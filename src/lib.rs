//! Dynamically scoped context variables.
//!
//! A [`RuntimeContext`] keeps a stack of variable frames per thread. Entering
//! a [`Context`] pushes a frame whose values shadow outer ones for everything
//! called while it is active; dropping the [`ScopeGuard`] pops it again.
//! [`Env`] binds the stack to an application environment whose declared
//! fields act as defaults.

pub mod errors;
pub mod options;
pub mod hooks;     // event registry
pub mod engine;
pub mod frame;
pub mod env;
mod stack;

use serde_json::{Map, Value};

/// Variables held by one frame.
pub type Vars = Map<String, Value>;

pub use errors::{BoxError, Error, Result};
pub use options::{ContextOptions, StackPolicy};
pub use hooks::{Event, ListenerId, Payload, Registry};
pub use engine::RuntimeContext;
pub use frame::{Context, ScopeGuard};
pub use env::{BaseEnv, Env};

/// Convenience: build a [`Vars`] map from pairs, e.g. `vars([("a", 1)])`.
pub fn vars<I, K, V>(pairs: I) -> Vars
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect()
}

#[doc(hidden)]
pub use serde_json;

//! Environment facade.
//!
//! [`Env`] wraps an application environment (anything implementing
//! [`BaseEnv`]) and routes reads of its declared fields through a
//! [`RuntimeContext`] first. A field nobody has overridden falls back to the
//! base environment's own value.
//!
//! The set of overridable names is the static [`BaseEnv::FIELDS`] list. The
//! facade consults it for existence checks and never evaluates a default
//! just to find out whether a name exists.

use std::sync::Arc;
use itertools::Itertools;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{trace, warn};
use crate::engine::RuntimeContext;
use crate::errors::{BoxError, Error, Result};
use crate::frame::Context;
use crate::hooks::{payload, Event, Listener, ListenerId, Payload, Registry};
use crate::Vars;

/// Application environment whose fields may be overridden per context.
pub trait BaseEnv: Send + Sync + 'static {
    /// Names that can be overridden. Fixed per type, never per instance.
    const FIELDS: &'static [&'static str];

    /// Value of `name` when no context overrides it. May be computed lazily
    /// and may fail; failures reach the caller of [`Env::get`] untouched.
    fn default_value(&self, name: &str) -> std::result::Result<Value, BoxError>;
}

/// Names owned by the facade itself. Never treated as context variables,
/// even if an environment declares them.
pub const RESERVED: &[&str] = &[
    "get",
    "set",
    "has",
    "reset",
    "reset_context",
    "is_context_var",
    "runtime_context",
    "context_entered",
    "context_exited",
    "context_var_set",
    "context_var_reset",
    "context_var_updated",
];

/// Fans a frame's variables out into one `{"name": ...}` fire per variable.
struct PerVariable {
    targets: Vec<Event>,
}

impl Listener for PerVariable {
    fn call(&self, fired: &Payload) -> std::result::Result<(), BoxError> {
        if let Some(Value::Object(vars)) = fired.get("context_vars") {
            for name in vars.keys() {
                let per_name = payload("name", name.as_str());
                for target in &self.targets {
                    target.fire(&per_name)?;
                }
            }
        }
        Ok(())
    }
}

/// Re-fires a payload on other events unchanged.
struct Relay {
    targets: Vec<Event>,
}

impl Listener for Relay {
    fn call(&self, fired: &Payload) -> std::result::Result<(), BoxError> {
        for target in &self.targets {
            target.fire(fired)?;
        }
        Ok(())
    }
}

/// Context-aware view of a base environment.
///
/// ```
/// use runtime_context::{runtime_env, Env};
/// use serde_json::json;
///
/// runtime_env! {
///     pub struct AppEnv {
///         dry_run: bool = false,
///     }
/// }
///
/// let env = Env::for_env(AppEnv::default());
/// env.scope([("dry_run", true)], || {
///     assert_eq!(env.get("dry_run").unwrap(), json!(true));
/// }).unwrap();
/// assert_eq!(env.get("dry_run").unwrap(), json!(false));
/// ```
pub struct Env<B: BaseEnv> {
    base: B,
    runtime_context: Arc<RuntimeContext>,
    hookery: Registry,
    var_set: Event,
    var_reset: Event,
    var_updated: Event,
    // Plain attributes that are not context variables.
    instance: RwLock<Vars>,
    // Forwarders on engine events, detached again on drop.
    forwarders: Vec<(Event, ListenerId)>,
}

impl<B: BaseEnv> Env<B> {
    /// Bind `base` to a fresh ambient engine.
    pub fn for_env(base: B) -> Self {
        Self::with_runtime_context(base, Arc::new(RuntimeContext::new()))
    }

    /// Bind `base` to an existing engine, possibly shared with other code.
    pub fn with_runtime_context(base: B, runtime_context: Arc<RuntimeContext>) -> Self {
        for name in B::FIELDS.iter().filter(|name| RESERVED.contains(name)) {
            warn!(field = %name, "declared field shadows a facade name and cannot be overridden");
        }

        let hookery = Registry::new();
        let var_set = hookery.register_event("context_var_set");
        let var_reset = hookery.register_event("context_var_reset");
        let var_updated = hookery.register_event("context_var_updated");

        let entered = runtime_context.context_entered().clone();
        let exited = runtime_context.context_exited().clone();
        let engine_reset = runtime_context.context_var_reset().clone();
        let forwarders = vec![
            (
                entered.clone(),
                entered.attach(PerVariable { targets: vec![var_set.clone(), var_updated.clone()] }, None),
            ),
            (
                exited.clone(),
                exited.attach(PerVariable { targets: vec![var_reset.clone(), var_updated.clone()] }, None),
            ),
            (
                engine_reset.clone(),
                engine_reset.attach(Relay { targets: vec![var_reset.clone(), var_updated.clone()] }, None),
            ),
        ];

        Self {
            base,
            runtime_context,
            hookery,
            var_set,
            var_reset,
            var_updated,
            instance: RwLock::new(Vars::new()),
            forwarders,
        }
    }

    pub fn base(&self) -> &B {
        &self.base
    }

    pub fn runtime_context(&self) -> &Arc<RuntimeContext> {
        &self.runtime_context
    }

    pub fn registry(&self) -> &Registry {
        &self.hookery
    }

    pub fn context_entered(&self) -> &Event {
        self.runtime_context.context_entered()
    }

    pub fn context_exited(&self) -> &Event {
        self.runtime_context.context_exited()
    }

    /// `{"name": ...}` whenever a variable is set, directly or by entering a frame.
    pub fn context_var_set(&self) -> &Event {
        &self.var_set
    }

    /// `{"name": ...}` whenever a variable is reset, directly or by exiting a frame.
    pub fn context_var_reset(&self) -> &Event {
        &self.var_reset
    }

    /// Union of `context_var_set` and `context_var_reset`.
    pub fn context_var_updated(&self) -> &Event {
        &self.var_updated
    }

    /// Context variable is something that can be customised per context.
    /// Only names declared by the environment type qualify.
    pub fn is_context_var(&self, name: &str) -> bool {
        !RESERVED.contains(&name) && B::FIELDS.contains(&name)
    }

    pub fn get(&self, name: &str) -> Result<Value> {
        if RESERVED.contains(&name) {
            return Err(Error::UnknownAttribute(name.to_string()));
        }
        if let Some(value) = self.runtime_context.get(name) {
            return Ok(value);
        }
        if self.is_context_var(name) {
            trace!(name, "falling back to base environment");
            return self.base.default_value(name).map_err(Error::Base);
        }
        Err(Error::UnknownAttribute(name.to_string()))
    }

    /// Like [`get`](Self::get), but an unknown name yields `default`.
    /// Failures of the base environment still propagate.
    pub fn get_or(&self, name: &str, default: impl Into<Value>) -> Result<Value> {
        match self.get(name) {
            Err(Error::UnknownAttribute(_)) => Ok(default.into()),
            other => other,
        }
    }

    pub fn get_as<T: DeserializeOwned>(&self, name: &str) -> Result<T> {
        let value = self.get(name)?;
        serde_json::from_value(value).map_err(|source| Error::Decode { name: name.to_string(), source })
    }

    pub fn has(&self, name: &str) -> bool {
        self.runtime_context.has(name) || self.is_context_var(name)
    }

    /// Override `name` in the current frame and fire `context_var_set`.
    pub fn set(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        if !self.is_context_var(name) {
            return Err(Error::UnknownAttribute(name.to_string()));
        }
        self.runtime_context.set(name, value)?;
        let fired = payload("name", name);
        self.var_set.fire(&fired)?;
        self.var_updated.fire(&fired)
    }

    /// Attribute-style write: declared names go to the context, anything else
    /// is kept as a plain attribute on this facade.
    pub fn set_attr(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        if self.is_context_var(name) {
            return self.set(name, value);
        }
        if RESERVED.contains(&name) {
            return Err(Error::UnknownAttribute(name.to_string()));
        }
        self.instance.write().insert(name.to_string(), value.into());
        Ok(())
    }

    pub fn instance_attr(&self, name: &str) -> Option<Value> {
        self.instance.read().get(name).cloned()
    }

    /// Drop the current frame's override of `name`, revealing the outer value
    /// or the base default. Plain attributes are removed outright.
    pub fn reset(&self, name: &str) -> Result<bool> {
        if self.is_context_var(name) || self.runtime_context.has(name) {
            return self.runtime_context.reset(name);
        }
        if self.instance.write().remove(name).is_some() {
            return Ok(true);
        }
        Err(Error::UnknownAttribute(name.to_string()))
    }

    pub fn reset_context(&self) -> Result<()> {
        self.runtime_context.reset_context()
    }

    /// Build a frame after checking every name is known.
    pub fn context<I, K, V>(&self, vars: I) -> Result<Context<'_>>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let vars = crate::vars(vars);
        let unknown = vars
            .keys()
            .filter(|name| !self.is_context_var(name) && !self.runtime_context.has(name))
            .join(", ");
        if !unknown.is_empty() {
            return Err(Error::UnknownAttribute(unknown));
        }
        Ok(self.runtime_context.context(vars))
    }

    pub fn empty_context(&self) -> Context<'_> {
        self.runtime_context.empty_context()
    }

    /// Push a validated frame without a guard. Pair with [`pop_context`](Self::pop_context).
    pub fn push_context<I, K, V>(&self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let vars = self.context(vars)?.into_vars();
        self.runtime_context.push_context(vars)
    }

    pub fn pop_context(&self) -> Result<Vars> {
        self.runtime_context.pop_context()
    }

    pub fn current(&self) -> Result<Vars> {
        self.runtime_context.current()
    }

    pub fn depth(&self) -> usize {
        self.runtime_context.depth()
    }

    pub fn snapshot(&self) -> Vars {
        self.runtime_context.snapshot()
    }

    pub fn scope<I, K, V, R>(&self, vars: I, f: impl FnOnce() -> R) -> Result<R>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        self.context(vars)?.run(f)
    }
}

impl<B: BaseEnv> Drop for Env<B> {
    fn drop(&mut self) {
        for (event, id) in self.forwarders.drain(..) {
            event.detach(id);
        }
    }
}

impl<B: BaseEnv + Default> Env<B> {
    /// Facade over the environment type's defaults.
    pub fn from_default() -> Self {
        Self::for_env(B::default())
    }
}

#[doc(hidden)]
pub const fn concat_fields<const N: usize>(
    parent: &[&'static str],
    own: &[&'static str],
) -> [&'static str; N] {
    let mut out = [""; N];
    let mut i = 0;
    while i < parent.len() {
        out[i] = parent[i];
        i += 1;
    }
    let mut j = 0;
    while j < own.len() {
        out[parent.len() + j] = own[j];
        j += 1;
    }
    out
}

/// Declare an environment type whose fields can be overridden per context.
///
/// Generates the struct, a `Default` impl from the given defaults, and a
/// [`BaseEnv`] impl that serializes the field values.
///
/// `struct App: BaseApp { ... }` extends another declared environment. The
/// parent is embedded as the `parent` field, its names come first in
/// `FIELDS`, and its defaults are served by the parent itself.
#[macro_export]
macro_rules! runtime_env {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $( $(#[$fmeta:meta])* $field:ident : $ty:ty = $default:expr ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis struct $name {
            $( $(#[$fmeta])* pub $field: $ty, )*
        }

        impl ::std::default::Default for $name {
            fn default() -> Self {
                Self { $( $field: $default, )* }
            }
        }

        impl $crate::env::BaseEnv for $name {
            const FIELDS: &'static [&'static str] = &[ $( stringify!($field) ),* ];

            fn default_value(
                &self,
                name: &str,
            ) -> ::std::result::Result<$crate::serde_json::Value, $crate::BoxError> {
                match name {
                    $( stringify!($field) => Ok($crate::serde_json::to_value(&self.$field)?), )*
                    other => Err(format!("{} is not declared on {}", other, stringify!($name)).into()),
                }
            }
        }
    };
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident : $parent:ty {
            $( $(#[$fmeta:meta])* $field:ident : $ty:ty = $default:expr ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis struct $name {
            pub parent: $parent,
            $( $(#[$fmeta])* pub $field: $ty, )*
        }

        impl ::std::default::Default for $name {
            fn default() -> Self {
                Self {
                    parent: ::std::default::Default::default(),
                    $( $field: $default, )*
                }
            }
        }

        impl $crate::env::BaseEnv for $name {
            const FIELDS: &'static [&'static str] = {
                const PARENT: &[&str] = <$parent as $crate::env::BaseEnv>::FIELDS;
                const OWN: &[&str] = &[ $( stringify!($field) ),* ];
                const ALL: [&str; PARENT.len() + OWN.len()] =
                    $crate::env::concat_fields(PARENT, OWN);
                &ALL
            };

            fn default_value(
                &self,
                name: &str,
            ) -> ::std::result::Result<$crate::serde_json::Value, $crate::BoxError> {
                match name {
                    $( stringify!($field) => Ok($crate::serde_json::to_value(&self.$field)?), )*
                    other => $crate::env::BaseEnv::default_value(&self.parent, other),
                }
            }
        }
    };
}

use serde_json::Value;
use tracing::trace;
use crate::errors::{Error, Result};
use crate::frame::{self, Context};
use crate::hooks::{payload, Event, Registry};
use crate::options::{ContextOptions, StackPolicy};
use crate::stack::ScopedStack;
use crate::{vars as collect_vars, Vars};

/// =========================
/// Runtime context engine
/// =========================

/// Stack of variable frames, one stack per thread.
///
/// Create one per application and share it (by reference or `Arc`). Every
/// thread that touches it sees only its own frames.
///
/// ```
/// use runtime_context::RuntimeContext;
///
/// let rc = RuntimeContext::new();
/// rc.scope([("dry_run", true)], || {
///     assert_eq!(rc.get("dry_run"), Some(serde_json::json!(true)));
/// }).unwrap();
/// assert_eq!(rc.get("dry_run"), None);
/// ```
pub struct RuntimeContext {
    pub(crate) stack: ScopedStack,
    options: ContextOptions,
    hookery: Registry,
    entered: Event,
    exited: Event,
    var_reset: Event,
}

impl RuntimeContext {
    /// Engine with an ambient frame on every thread.
    pub fn new() -> Self {
        Self::with_options(ContextOptions::default())
    }

    /// Engine whose stack starts empty; `set` fails until a scope is entered.
    pub fn strict() -> Self {
        Self::with_options(ContextOptions::strict())
    }

    pub fn with_options(options: ContextOptions) -> Self {
        let hookery = Registry::new();
        let entered = hookery.register_event("context_entered");
        let exited = hookery.register_event("context_exited");
        let var_reset = hookery.register_event("context_var_reset");
        Self {
            stack: ScopedStack::new(options.policy == StackPolicy::Ambient),
            options,
            hookery,
            entered,
            exited,
            var_reset,
        }
    }

    pub fn options(&self) -> &ContextOptions {
        &self.options
    }

    pub(crate) fn label(&self) -> &str {
        self.options.name.as_deref().unwrap_or("runtime_context")
    }

    pub fn registry(&self) -> &Registry {
        &self.hookery
    }

    /// Fired after a frame is pushed, with `{"context_vars": <initial vars>}`.
    pub fn context_entered(&self) -> &Event {
        &self.entered
    }

    /// Fired after a frame is popped, with `{"context_vars": <vars at exit>}`.
    pub fn context_exited(&self) -> &Event {
        &self.exited
    }

    /// Fired by [`reset`](Self::reset) with `{"name": ...}` when a variable was removed.
    pub fn context_var_reset(&self) -> &Event {
        &self.var_reset
    }

    /// Innermost value of `name`, if any frame holds it.
    pub fn get(&self, name: &str) -> Option<Value> {
        let value = self.stack.lookup(name);
        trace!(context = %self.label(), name, found = value.is_some(), "get");
        value
    }

    pub fn get_or(&self, name: &str, default: impl Into<Value>) -> Value {
        self.get(name).unwrap_or_else(|| default.into())
    }

    /// Strict read: a name absent from every frame is an unknown attribute.
    pub fn require(&self, name: &str) -> Result<Value> {
        self.get(name).ok_or_else(|| Error::UnknownAttribute(name.to_string()))
    }

    pub fn has(&self, name: &str) -> bool {
        self.stack.contains(name)
    }

    /// Returns true if `name` is held anywhere in the stack.
    pub fn is_context_var(&self, name: &str) -> bool {
        self.has(name)
    }

    /// Write into the current frame. Outer frames are never touched.
    pub fn set(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        trace!(context = %self.label(), name, %value, "set");
        self.stack
            .with_current(|vars| {
                vars.insert(name.to_string(), value);
            })
            .ok_or_else(|| Error::OutsideScope(name.to_string()))
    }

    /// Remove `name` from the current frame. Returns whether it was there;
    /// `context_var_reset` fires only in that case.
    pub fn reset(&self, name: &str) -> Result<bool> {
        let removed = self
            .stack
            .with_current(|vars| vars.remove(name).is_some())
            .ok_or(Error::NoActiveContext)?;
        trace!(context = %self.label(), name, removed, "reset");
        if removed {
            self.var_reset.fire(&payload("name", name))?;
        }
        Ok(removed)
    }

    /// Clear the current frame. No per-variable events.
    pub fn reset_context(&self) -> Result<()> {
        self.stack.with_current(|vars| vars.clear()).ok_or(Error::NoActiveContext)
    }

    /// Build a frame seeded with `vars`; enter it to make the values visible.
    pub fn context<I, K, V>(&self, vars: I) -> Context<'_>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Context::new(self, collect_vars(vars))
    }

    /// Frame with no variables of its own; mutations inside it are dropped on exit.
    pub fn empty_context(&self) -> Context<'_> {
        Context::new(self, Vars::new())
    }

    /// Run `f` with `vars` pushed, popping them afterwards.
    pub fn scope<I, K, V, R>(&self, vars: I, f: impl FnOnce() -> R) -> Result<R>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        self.context(vars).run(f)
    }

    /// Push without a guard. Pair with [`pop_context`](Self::pop_context).
    pub fn push_context<I, K, V>(&self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        frame::attach(self, collect_vars(vars)).map(|_| ())
    }

    /// Pop the current frame, firing `context_exited`.
    pub fn pop_context(&self) -> Result<Vars> {
        let popped = self.stack.pop().ok_or(Error::NoActiveContext)?;
        frame::detach(self, popped)
    }

    /// Copy of the topmost frame's variables.
    pub fn current(&self) -> Result<Vars> {
        self.stack.with_current(|vars| vars.clone()).ok_or(Error::NoActiveContext)
    }

    pub fn depth(&self) -> usize {
        self.stack.depth()
    }

    /// Every visible variable, inner frames shadowing outer ones.
    pub fn snapshot(&self) -> Vars {
        self.stack.flatten()
    }
}

impl Default for RuntimeContext {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RuntimeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeContext")
            .field("name", &self.label())
            .field("policy", &self.options.policy)
            .field("stack", &self.stack.id())
            .finish()
    }
}

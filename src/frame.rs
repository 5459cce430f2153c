//! Context frames and the guard that keeps them on the stack.

use std::marker::PhantomData;
use serde_json::Value;
use tracing::{debug, error};
use crate::engine::RuntimeContext;
use crate::errors::Result;
use crate::hooks::{payload, Payload};
use crate::stack::{FrameId, StackFrame};
use crate::Vars;

/// A frame that has been built but not yet entered.
///
/// Produced by [`RuntimeContext::context`]. Entering it pushes the frame on
/// the calling thread's stack; the returned [`ScopeGuard`] pops it again.
#[must_use = "a context does nothing until it is entered"]
pub struct Context<'e> {
    engine: &'e RuntimeContext,
    vars: Vars,
}

impl<'e> Context<'e> {
    pub(crate) fn new(engine: &'e RuntimeContext, vars: Vars) -> Self {
        Self { engine, vars }
    }

    /// Variables this frame will introduce.
    pub fn vars(&self) -> &Vars {
        &self.vars
    }

    pub(crate) fn into_vars(self) -> Vars {
        self.vars
    }

    pub fn enter(self) -> Result<ScopeGuard<'e>> {
        let id = attach(self.engine, self.vars)?;
        Ok(ScopeGuard { engine: self.engine, id, active: true, _not_send: PhantomData })
    }

    /// Enter, run `f`, exit. The frame is popped even if `f` panics.
    pub fn run<R>(self, f: impl FnOnce() -> R) -> Result<R> {
        let guard = self.enter()?;
        let out = f();
        guard.exit()?;
        Ok(out)
    }
}

/// Keeps an entered frame on the stack until dropped or [`exit`](Self::exit)ed.
///
/// Not `Send`: the frame lives on the stack of the thread that entered it.
#[must_use = "dropping the guard exits the context immediately"]
pub struct ScopeGuard<'e> {
    engine: &'e RuntimeContext,
    id: FrameId,
    active: bool,
    _not_send: PhantomData<*const ()>,
}

impl<'e> ScopeGuard<'e> {
    pub fn engine(&self) -> &'e RuntimeContext {
        self.engine
    }

    /// Exit now, returning the frame's final variables.
    /// Unlike dropping, listener failures are reported.
    pub fn exit(mut self) -> Result<Vars> {
        self.active = false;
        let frame = take_top(self.engine, self.id);
        detach(self.engine, frame)
    }
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if std::thread::panicking() {
            // Panicking again here would abort the process. Frames left above
            // ours by unpaired pushes are unwound with it.
            let frames = self.engine.stack.pop_through(self.id);
            if frames.is_empty() {
                error!(context = %self.engine.label(), frame = self.id, "frame is gone while unwinding");
            } else if frames.len() > 1 {
                error!(context = %self.engine.label(), frame = self.id, stale = frames.len() - 1, "frame is not topmost while unwinding");
            }
            for frame in frames {
                if let Err(e) = detach(self.engine, frame) {
                    error!(context = %self.engine.label(), error = %e, "exit listener failed while unwinding");
                }
            }
            return;
        }
        let frame = take_top(self.engine, self.id);
        if let Err(e) = detach(self.engine, frame) {
            error!(context = %self.engine.label(), error = %e, "exit listener failed");
        }
    }
}

fn take_top(engine: &RuntimeContext, id: FrameId) -> StackFrame {
    match engine.stack.pop_if_top(id) {
        Ok(frame) => frame,
        Err(Some(top)) => panic!(
            "runtime context {:?}: exiting frame {id} but frame {top} is current",
            engine.label()
        ),
        Err(None) => panic!(
            "runtime context {:?}: exiting frame {id} but the stack is empty",
            engine.label()
        ),
    }
}

fn context_vars_payload(vars: &Vars) -> Payload {
    payload("context_vars", Value::Object(vars.clone()))
}

/// Push `vars` and fire `context_entered`. A failing listener undoes the push.
pub(crate) fn attach(engine: &RuntimeContext, vars: Vars) -> Result<FrameId> {
    let event_payload = context_vars_payload(&vars);
    let names: Vec<String> = vars.keys().cloned().collect();
    let id = engine.stack.push(vars);
    debug!(context = %engine.label(), depth = engine.stack.depth(), vars = ?names, "context entered");
    if let Err(e) = engine.context_entered().fire(&event_payload) {
        if engine.stack.pop_if_top(id).is_err() {
            error!(context = %engine.label(), frame = id, "could not roll back frame after failed enter");
        }
        return Err(e);
    }
    Ok(id)
}

/// Fire `context_exited` for an already-popped frame.
pub(crate) fn detach(engine: &RuntimeContext, frame: StackFrame) -> Result<Vars> {
    debug!(
        context = %engine.label(),
        depth = engine.stack.depth(),
        vars = ?frame.vars.keys().collect::<Vec<_>>(),
        "context exited"
    );
    engine.context_exited().fire(&context_vars_payload(&frame.vars))?;
    Ok(frame.vars)
}

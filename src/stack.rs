//! Per-thread storage for context stacks.
//!
//! One `thread_local!` map holds every engine's stack for the current thread,
//! keyed by the engine's stack id. Two engines never share a stack, and a
//! thread never sees another thread's frames.
//!
//! No borrow of the map outlives a method call here, so listeners fired by
//! the engine are free to read and write the stack again.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use serde_json::Value;
use crate::Vars;

static NEXT_STACK_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_FRAME_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) type FrameId = u64;

#[derive(Debug, Clone)]
pub(crate) struct StackFrame {
    pub id: FrameId,
    pub vars: Vars,
}

impl StackFrame {
    fn new(vars: Vars) -> Self {
        Self { id: NEXT_FRAME_ID.fetch_add(1, Ordering::Relaxed), vars }
    }
}

#[derive(Default)]
struct ThreadStack {
    frames: Vec<StackFrame>,
    // Set once the ambient frame (if any) has been laid down on this thread.
    initialized: bool,
    // Dead once the owning engine is dropped, on whatever thread.
    owner: Weak<()>,
}

thread_local! {
    static STACKS: RefCell<HashMap<u64, ThreadStack>> = RefCell::new(HashMap::new());
}

/// Handle to one engine's stack, resolved against the calling thread.
#[derive(Debug)]
pub(crate) struct ScopedStack {
    id: u64,
    ambient: bool,
    alive: Arc<()>,
}

impl ScopedStack {
    pub fn new(ambient: bool) -> Self {
        Self {
            id: NEXT_STACK_ID.fetch_add(1, Ordering::Relaxed),
            ambient,
            alive: Arc::new(()),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    fn with<R>(&self, f: impl FnOnce(&mut Vec<StackFrame>) -> R) -> R {
        STACKS.with(|stacks| {
            let mut stacks = stacks.borrow_mut();
            if !stacks.contains_key(&self.id) {
                // Engines dropped on other threads leave their entries here.
                stacks.retain(|_, stack| stack.owner.strong_count() > 0);
            }
            let stack = stacks.entry(self.id).or_insert_with(|| ThreadStack {
                owner: Arc::downgrade(&self.alive),
                ..ThreadStack::default()
            });
            if !stack.initialized {
                stack.initialized = true;
                if self.ambient {
                    stack.frames.push(StackFrame::new(Vars::new()));
                }
            }
            f(&mut stack.frames)
        })
    }

    pub fn push(&self, vars: Vars) -> FrameId {
        let frame = StackFrame::new(vars);
        let id = frame.id;
        self.with(|frames| frames.push(frame));
        id
    }

    pub fn pop(&self) -> Option<StackFrame> {
        self.with(|frames| frames.pop())
    }

    /// Pop `id`, but only if it is the topmost frame. Returns `Err` with the
    /// actual top id (if any) otherwise, leaving the stack untouched.
    pub fn pop_if_top(&self, id: FrameId) -> Result<StackFrame, Option<FrameId>> {
        self.with(|frames| match frames.last().map(|top| top.id) {
            Some(top) if top == id => frames.pop().ok_or(None),
            other => Err(other),
        })
    }

    /// Pop every frame down to and including `id`, topmost first.
    /// Leaves the stack untouched and returns nothing if `id` is not on it.
    pub fn pop_through(&self, id: FrameId) -> Vec<StackFrame> {
        self.with(|frames| match frames.iter().rposition(|frame| frame.id == id) {
            Some(at) => frames.drain(at..).rev().collect(),
            None => Vec::new(),
        })
    }

    pub fn lookup(&self, name: &str) -> Option<Value> {
        self.with(|frames| frames.iter().rev().find_map(|f| f.vars.get(name).cloned()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.with(|frames| frames.iter().rev().any(|f| f.vars.contains_key(name)))
    }

    pub fn depth(&self) -> usize {
        self.with(|frames| frames.len())
    }

    /// Run `f` against the topmost frame's mapping; `None` on an empty stack.
    pub fn with_current<R>(&self, f: impl FnOnce(&mut Vars) -> R) -> Option<R> {
        self.with(|frames| frames.last_mut().map(|frame| f(&mut frame.vars)))
    }

    /// Flattened view, inner frames shadowing outer ones.
    pub fn flatten(&self) -> Vars {
        self.with(|frames| {
            let mut out = Vars::new();
            for frame in frames.iter() {
                for (k, v) in &frame.vars {
                    out.insert(k.clone(), v.clone());
                }
            }
            out
        })
    }
}

impl Drop for ScopedStack {
    fn drop(&mut self) {
        // Only this thread's stack can be reached; the thread-local may
        // already be gone if the engine outlives the thread's TLS teardown.
        let _ = STACKS.try_with(|stacks| {
            if let Ok(mut stacks) = stacks.try_borrow_mut() {
                stacks.remove(&self.id);
            }
        });
    }
}

#[cfg(test)]
fn has_thread_entry(id: u64) -> bool {
    STACKS.with(|stacks| stacks.borrow().contains_key(&id))
}

use serde::{Deserialize, Serialize};

/// How an engine treats an empty stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StackPolicy {
    /// Every thread starts with one empty frame, so `set` works without
    /// entering a scope first.
    #[default]
    Ambient,
    /// The stack starts empty; writes outside a scope are errors.
    Strict,
}

/// Engine configuration.
/// Deserializable so applications can keep it next to their own settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextOptions {
    pub policy: StackPolicy,
    /// Label used in log output.
    pub name: Option<String>,
}

impl ContextOptions {
    pub fn strict() -> Self {
        Self { policy: StackPolicy::Strict, ..Self::default() }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

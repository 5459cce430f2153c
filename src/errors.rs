use thiserror::Error; // Import the `Error` derive macro from the `thiserror` crate

/// Boxed error used at the seams where application code plugs in
/// (listeners and base environment evaluation).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

// Define an enum to represent every recoverable failure of the engine and facade
#[derive(Debug, Error)]
pub enum Error {
    // Name is neither a live context override nor a declared variable
    #[error("unknown attribute: {0}")]
    UnknownAttribute(String),

    // Write attempted on an engine whose stack has no frame
    #[error("cannot set {0:?} outside of a runtime context")]
    OutsideScope(String),

    // `current` / `pop_context` on an empty stack
    #[error("no active runtime context")]
    NoActiveContext,

    // Fire by name for an event nobody registered
    #[error("unknown event: {0}")]
    UnknownEvent(String),

    // A listener returned an error; dispatch stopped there
    #[error("listener for {event:?} failed: {source}")]
    Listener {
        event: String,
        #[source]
        source: BoxError,
    },

    // Failure raised by the base environment's own evaluation, passed through as-is
    #[error(transparent)]
    Base(BoxError),

    // Typed read could not deserialize the stored value
    #[error("cannot decode {name:?}: {source}")]
    Decode {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

// Type alias for results that use `Error` as the error type
pub type Result<T> = std::result::Result<T, Error>;

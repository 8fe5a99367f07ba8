//! Error type for the sniffer engine's fallible operations.
//!
//! Most engine operations do not fail loudly: an invalid guest range is
//! skipped, a breakpoint against a dead process is a no-op, a filter over an
//! empty history leaves `result` unchanged. Those paths log and return,
//! without ever constructing a [`SniffError`]. This type exists for the
//! handful of operations where the caller genuinely needs to know the
//! outcome: command parsing, unrecognized verbs, export I/O, and
//! configuration loading.

use thiserror::Error;

/// Errors produced by the sniffer engine.
#[derive(Debug, Error)]
pub enum SniffError {
    /// A command verb was recognized but its argument failed to parse.
    #[error("invalid argument for `{verb}`: {arg:?}")]
    InvalidArgument {
        /// The verb that rejected the argument.
        verb: String,
        /// The raw argument string that failed to parse.
        arg: String,
    },

    /// The verb is not recognized by this engine's command surface.
    ///
    /// Per the command surface's contract, this is returned to the caller
    /// rather than logged, so a higher-level dispatcher can try its own verb
    /// set before giving up.
    #[error("unhandled verb `{0}`")]
    UnknownVerb(String),

    /// An export writer failed to write its destination.
    #[error("export failed: {0}")]
    Export(#[from] std::io::Error),

    /// The engine configuration failed to deserialize.
    #[error("invalid engine configuration: {0}")]
    Config(#[from] serde_json::Error),
}

/// Result alias for fallible engine operations.
pub type SniffResult<T> = Result<T, SniffError>;

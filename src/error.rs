//! Bridge Error Types
//!
//! All fallible bridge operations return `Result<_, BridgeError>`. Errors are
//! reported to the immediate caller; mapping a failure to process termination
//! happens only at the host binary's top level.

use thiserror::Error;

/// Error type for bridge operations.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The unit could not be opened: missing path, rejected by the OS
    /// loader, or already loaded under the same canonical path.
    #[error("failed to load unit '{path}': {reason}")]
    Load { path: String, reason: String },

    /// The named symbol is not exported by the unit.
    #[error("symbol '{symbol}' not found in '{unit}': {reason}")]
    Resolve {
        unit: String,
        symbol: String,
        reason: String,
    },

    /// A cross-boundary value carried the wrong type tag.
    #[error("type tag mismatch: expected {expected}, got {got}")]
    Conversion { expected: &'static str, got: String },

    /// The operation was invoked in the wrong lifecycle state. Covers stale
    /// handles, double unload, double initialization, and calls into a unit
    /// that is not ready.
    #[error("cannot {operation}: unit is {state}")]
    State { operation: String, state: String },

    /// An entry point was called with the wrong number of arguments.
    #[error("'{name}' takes {expected} argument(s), got {got}")]
    Arity {
        name: String,
        expected: usize,
        got: usize,
    },

    /// The unit's init symbol reported failure.
    #[error("initialization of '{unit}' failed with status {status}")]
    Init { unit: String, status: i64 },

    /// A primitive was registered twice under the same name.
    #[error("primitive '{0}' is already registered")]
    DuplicatePrimitive(String),

    /// A call named a primitive that was never registered.
    #[error("no primitive registered under '{0}'")]
    UnknownPrimitive(String),

    /// The requested arity is above what the call dispatch supports.
    #[error("arity {arity} exceeds the supported maximum of {max}")]
    UnsupportedArity { arity: usize, max: usize },
}

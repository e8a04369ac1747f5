//! # Error Types
//!
//! General error handling for the debugger engine.
//!
//! We use `thiserror` to automatically generate `Error` trait implementations
//! and nice error messages.

use thiserror::Error;

/// Main error type for engine operations
///
/// ## Error Categories
///
/// 1. **Binding errors**: NotAttached, AlreadyAttached, Terminated
/// 2. **State errors**: NotStopped, InvalidReference
/// 3. **Configuration errors**: Config, Schema
/// 4. **Evaluation errors**: Evaluation
/// 5. **Transport/protocol errors**: Net, Protocol, Io
/// 6. **VM errors**: MissingDebugLibrary, Lua
#[derive(Error, Debug)]
pub enum DebuggerError
{
    /// No VM is attached, or the coroutine/VM named is not bound.
    ///
    /// Detaching the root VM invalidates every coroutine binding, so later
    /// coroutine queries fail with this error.
    #[error("Not attached")]
    NotAttached,

    /// A different VM is already attached to this engine.
    #[error("Another VM is already attached")]
    AlreadyAttached,

    /// The session reached its terminal state.
    #[error("Session terminated")]
    Terminated,

    /// An inspection command arrived while the VM was running.
    #[error("Not stopped")]
    NotStopped,

    /// A frame id or variables reference that is not (or no longer) valid.
    ///
    /// References are only valid during the pause that produced them.
    #[error("Invalid reference: {0}")]
    InvalidReference(i64),

    /// Configuration text was rejected. Configuration is unchanged.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Schema file could not be loaded. Nothing changed.
    #[error("Invalid schema: {0}")]
    Schema(String),

    /// Expression evaluation failed in the VM.
    #[error("Evaluation failed: {0}")]
    Evaluation(String),

    /// Transport failure.
    #[error(transparent)]
    Net(#[from] rdebug_net::NetError),

    /// Malformed message from the frontend.
    #[error(transparent)]
    Protocol(#[from] rdebug_protocol::ProtocolError),

    /// I/O error (schema files, stream redirection, ...).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The VM was created without its `debug` library, which the hook and
    /// introspection helpers need. Create the state with
    /// `Lua::unsafe_new()` (or load `StdLib::DEBUG`) before attaching.
    #[error("The VM has no `debug` library loaded")]
    MissingDebugLibrary,

    /// Error raised by the Lua VM or by `mlua` itself.
    #[cfg(feature = "lua")]
    #[error("Lua error: {0}")]
    Lua(#[from] mlua::Error),
}

/// Convenience type alias for Results in this crate
pub type Result<T> = std::result::Result<T, DebuggerError>;

//! # Debug Target
//!
//! The interface between the engine and a concrete VM.
//!
//! The engine never touches interpreter internals. Whenever the hook bridge
//! runs, the VM backend hands it a short-lived [`DebugTarget`] describing
//! the interpreter *at that instant*: which thread is running, how deep the
//! call stack is, and how to inspect frames and evaluate expressions.
//!
//! ## Why use a trait?
//!
//! - The engine's state machine can be tested without a real VM
//! - The Lua backend (`platform::lua`) stays the only place that knows
//!   about `mlua`
//!
//! ## Handle lifetime
//!
//! Variable handles returned by [`DebugTarget::scopes`] and
//! [`DebugTarget::variables`] are only valid while the VM is paused. The
//! engine calls [`DebugTarget::clear_handles`] on resume; any handle used
//! afterwards must be rejected.

/// One frame of the paused thread's call stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameInfo
{
    /// Function name, or a placeholder such as `"main chunk"`.
    pub name: String,
    /// Raw source identifier as the VM reports it.
    pub source: Option<String>,
    /// Short, human-readable source name.
    pub short_source: String,
    /// Current line, `-1` for native frames.
    pub line: i64,
}

/// A variable container shown under a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeInfo
{
    /// Display name ("Locals", "Upvalues", "Globals").
    pub name: String,
    /// Handle to pass to [`DebugTarget::variables`].
    pub handle: u64,
    /// Hint that expanding it is costly.
    pub expensive: bool,
}

/// One variable, already rendered for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableInfo
{
    /// Variable name or table key.
    pub name: String,
    /// Display string.
    pub value: String,
    /// VM type name.
    pub type_name: String,
    /// Non-zero when the value has children.
    pub handle: u64,
}

/// Result of evaluating an expression in a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvalValue
{
    /// Display string.
    pub display: String,
    /// VM type name.
    pub type_name: String,
    /// Truthiness under the VM's rules.
    pub truthy: bool,
    /// Non-zero when the value has children.
    pub handle: u64,
}

/// Snapshot interface of a running (or paused) VM.
///
/// Frame level `0` is the innermost user-visible frame.
pub trait DebugTarget
{
    /// Thread (root or coroutine) currently executing.
    fn thread(&self) -> crate::types::ThreadKey;

    /// Number of active frames on the current thread.
    fn depth(&mut self) -> usize;

    /// Call stack of the current thread, innermost first.
    fn stack(&mut self) -> Vec<FrameInfo>;

    /// Variable scopes of frame `level`.
    ///
    /// ## Errors
    ///
    /// A message if the frame does not exist.
    fn scopes(&mut self, level: usize) -> Result<Vec<ScopeInfo>, String>;

    /// Children of a handle.
    ///
    /// ## Errors
    ///
    /// A message if the handle is unknown or stale.
    fn variables(&mut self, handle: u64) -> Result<Vec<VariableInfo>, String>;

    /// Evaluate `expression` read-only in frame `level`.
    ///
    /// ## Errors
    ///
    /// The VM's compile or runtime error message.
    fn evaluate(&mut self, level: usize, expression: &str) -> Result<EvalValue, String>;

    /// Invalidate every handle handed out so far.
    fn clear_handles(&mut self);
}

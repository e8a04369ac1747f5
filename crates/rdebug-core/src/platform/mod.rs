//! # VM Backends
//!
//! Each backend binds one interpreter family to the engine: it installs the
//! debug hook, implements [`DebugTarget`](crate::target::DebugTarget) over
//! the interpreter's introspection API, and replaces the VM's output and
//! error primitives.
//!
//! - **Lua 5.4** over `mlua` (feature `lua`, on by default)

#[cfg(feature = "lua")]
pub mod lua;

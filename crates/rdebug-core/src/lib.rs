//! # rdebug-core
//!
//! Debugger engine for embedded Lua virtual machines.
//!
//! This crate provides:
//! - The engine state machine ([`Debugger`]): client handshake, breakpoints,
//!   stepping, pause requests, exception filters
//! - Layered configuration with optional JSON schema validation
//! - Source path conversion with a host-installable converter
//! - Output capture (VM `print`/`io.write` and the process's std streams)
//! - The hook bridge that a VM backend calls from its debug hook
//! - A Lua 5.4 backend over `mlua` (`platform::lua`, feature `lua`)
//!
//! ## Why unsafe code is needed
//!
//! Capturing stdout/stderr swaps file descriptors with `pipe`/`dup2`. Those
//! calls are wrapped in [`redirect::StdRedirect`]; nothing else is unsafe.

#![allow(unsafe_code)] // Required for descriptor redirection (pipe, dup2)

pub mod breakpoints;
pub mod config;
pub mod debugger;
pub mod error;
pub mod events;
pub mod global;
pub mod path;
pub mod platform;
pub mod prelude;
pub mod redirect;
pub mod schema;
pub mod target;
pub mod types;

pub use debugger::Debugger;
pub use error::{DebuggerError, Result};
pub use target::DebugTarget;
pub use types::{EngineState, ExceptionKind, StopReason};

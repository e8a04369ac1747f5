//! # rdebug-net
//!
//! Minimal non-blocking transport for the rdebug agent.
//!
//! The debug agent lives inside a host process that is busy running a Lua VM.
//! It can never block that thread on the network, except when the VM is
//! paused and the debugger *wants* to wait for the client. This crate
//! provides exactly that shape:
//!
//! - [`Poller`]: readiness multiplexer (`mio`) plus a software timer queue
//! - [`IoObject`]: registration bookkeeping for one socket
//! - [`Listener`]: accepts inbound connections and hands them to an [`Accept`] owner
//! - [`Session`]: buffered duplex byte stream with half-close detection
//! - [`SocketServer`] / [`SocketClient`]: the two [`Transport`] flavours the
//!   debugger engine talks to
//!
//! ## The pump
//!
//! [`Transport::update`] is the only blocking call in this crate. It waits up
//! to the given number of milliseconds for readiness or a timer, dispatches
//! each ready callback once and returns.
//!
//! ## Why unsafe code is needed
//!
//! Socket options that the standard library does not expose (buffer sizes,
//! explicit reuse-address control) are set through `libc` on unix targets.

#![allow(unsafe_code)] // setsockopt / socket creation through libc

pub mod client;
pub mod endpoint;
pub mod error;
pub mod io_object;
pub mod listener;
pub mod poller;
pub mod server;
pub mod session;
pub mod socket;
pub mod timer;
pub mod transport;

pub use client::SocketClient;
pub use endpoint::Endpoint;
pub use error::{NetError, Result};
pub use io_object::{EventHandler, IoObject};
pub use listener::{Accept, Listener, ListenerState};
pub use poller::{PollEvent, Poller};
pub use server::SocketServer;
pub use session::Session;
pub use timer::TimerId;
pub use transport::Transport;

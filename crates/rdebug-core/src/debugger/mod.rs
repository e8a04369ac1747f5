//! # Debugger Engine
//!
//! The state machine bound to one VM and one transport.
//!
//! ## Lifecycle
//!
//! ```text
//! birth ──set_config/open_schema/initialize──▶ initialized
//!   initialized ──VM attached + configurationDone──▶ running
//!   running ◀──────step request cleared──────▶ stepping
//!   any ──close() / last VM detached──▶ terminated   (terminal)
//! ```
//!
//! The state is derived from the engine's flags rather than stored, so it
//! can never disagree with them. "Paused" is not a state of its own: the
//! engine is paused while the hook bridge sits in its wait loop, and
//! [`Debugger::is_paused`] reports it.
//!
//! ## Threading
//!
//! Single thread of control. The transport is pumped from the host loop
//! ([`Debugger::update`], [`Debugger::wait_client`]) and from the hook
//! bridge's wait loop, never concurrently.

mod dispatch;
mod hook;

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::{Duration, Instant};

use rdebug_net::Transport;
use rdebug_protocol::{encode, Event, FrameDecoder, ProtocolMessage, Request, Response};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::breakpoints::BreakpointStore;
use crate::config::{Config, LEVELS};
use crate::error::{DebuggerError, Result};
use crate::events::EngineEvent;
use crate::path::{PathConvert, PathResolver};
use crate::redirect::{OutputQueue, StdRedirect};
use crate::schema::Schema;
use crate::types::{EngineState, ExceptionKind, Redirect, StepKind, StepRequest, ThreadKey, VmId};

/// Transport timeout while paused or waiting for a client, in milliseconds.
pub const WAIT_POLL_MS: u64 = 10;

/// Minimum interval between transport polls from the hook while running.
pub const RUNNING_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Client-visible id of the root thread.
pub const ROOT_THREAD_ID: i64 = 1;

/// Bound VM plus the coroutines reachable from it.
#[derive(Debug)]
struct Binding
{
    vm: VmId,
    threads: BTreeMap<ThreadKey, i64>,
    next_thread_id: i64,
}

impl Binding
{
    fn new(vm: VmId, root: ThreadKey) -> Self
    {
        let mut threads = BTreeMap::new();
        threads.insert(root, ROOT_THREAD_ID);
        Self {
            vm,
            threads,
            next_thread_id: ROOT_THREAD_ID + 1,
        }
    }
}

/// What the connected frontend has done so far.
#[derive(Debug, Default, Clone, Copy)]
struct ClientSession
{
    connected: bool,
    initialized: bool,
    configured: bool,
}

/// How the wait loop ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resume
{
    Continue,
    Step(StepKind),
    Disconnect,
}

/// Information kept while the VM is paused.
#[derive(Debug, Clone, Copy)]
struct Paused
{
    thread: i64,
}

/// The debugger engine.
pub struct Debugger
{
    terminated: bool,
    initialized: bool,
    transport: Option<Box<dyn Transport>>,
    decoder: FrameDecoder,
    seq: i64,
    client: ClientSession,
    config: Config,
    schema: Option<Schema>,
    breakpoints: BreakpointStore,
    exception_filters: Option<BTreeSet<ExceptionKind>>,
    step: Option<StepRequest>,
    pause_requested: bool,
    entry_pending: bool,
    paused: Option<Paused>,
    resume: Option<Resume>,
    binding: Option<Binding>,
    paths: PathResolver,
    redirects: Vec<StdRedirect>,
    output_queue: OutputQueue,
    last_poll: Instant,
}

impl std::fmt::Debug for Debugger
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        f.debug_struct("Debugger")
            .field("state", &self.state())
            .field("paused", &self.paused.is_some())
            .field("breakpoints", &self.breakpoints.len())
            .finish_non_exhaustive()
    }
}

impl Default for Debugger
{
    fn default() -> Self
    {
        Self::new()
    }
}

impl Debugger
{
    /// Engine in `birth` state with no transport.
    #[must_use]
    pub fn new() -> Self
    {
        Self {
            terminated: false,
            initialized: false,
            transport: None,
            decoder: FrameDecoder::new(),
            seq: 0,
            client: ClientSession::default(),
            config: Config::new(),
            schema: None,
            breakpoints: BreakpointStore::new(),
            exception_filters: None,
            step: None,
            pause_requested: false,
            entry_pending: false,
            paused: None,
            resume: None,
            binding: None,
            paths: PathResolver::new(),
            redirects: Vec::new(),
            output_queue: OutputQueue::new(),
            last_poll: Instant::now(),
        }
    }

    /// Engine talking over `transport`.
    #[must_use]
    pub fn with_transport(transport: Box<dyn Transport>) -> Self
    {
        let mut debugger = Self::new();
        debugger.set_transport(transport);
        debugger
    }

    /// Replace the transport. The previous one is closed.
    pub fn set_transport(&mut self, transport: Box<dyn Transport>)
    {
        if let Some(mut old) = self.transport.replace(transport) {
            old.close();
        }
        self.client.connected = false;
        self.decoder.reset();
    }

    // ------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> EngineState
    {
        if self.terminated {
            EngineState::Terminated
        } else if self.step.is_some() {
            EngineState::Stepping
        } else if self.binding.is_some() && self.client.configured {
            EngineState::Running
        } else if self.initialized {
            EngineState::Initialized
        } else {
            EngineState::Birth
        }
    }

    /// Is the engine in `state`? Never mutates.
    #[must_use]
    pub fn is_state(&self, state: EngineState) -> bool
    {
        self.state() == state
    }

    /// `true` while the hook bridge waits for a resume command.
    #[must_use]
    pub const fn is_paused(&self) -> bool
    {
        self.paused.is_some()
    }

    /// `true` while a frontend is connected.
    #[must_use]
    pub const fn is_connected(&self) -> bool
    {
        self.client.connected
    }

    /// `true` once the frontend sent `configurationDone`.
    #[must_use]
    pub const fn is_configured(&self) -> bool
    {
        self.client.configured
    }

    /// `true` while a VM is bound.
    #[must_use]
    pub const fn is_attached(&self) -> bool
    {
        self.binding.is_some()
    }

    /// Active step request.
    #[must_use]
    pub const fn step_request(&self) -> Option<StepRequest>
    {
        self.step
    }

    /// Breakpoint table.
    #[must_use]
    pub const fn breakpoints(&self) -> &BreakpointStore
    {
        &self.breakpoints
    }

    /// Mutable breakpoint table, for hosts that set breakpoints directly.
    pub fn breakpoints_mut(&mut self) -> &mut BreakpointStore
    {
        &mut self.breakpoints
    }

    /// Effective configuration.
    #[must_use]
    pub const fn config(&self) -> &Config
    {
        &self.config
    }

    /// Queue VM backends park output in while the engine is busy.
    #[must_use]
    pub fn output_queue(&self) -> OutputQueue
    {
        self.output_queue.clone()
    }

    // ------------------------------------------------------------------
    // VM binding
    // ------------------------------------------------------------------

    /// Bind a VM. Attaching the same VM again is a no-op.
    ///
    /// ## Errors
    ///
    /// [`DebuggerError::Terminated`] after the session ended,
    /// [`DebuggerError::AlreadyAttached`] if another VM is bound.
    pub fn attach(&mut self, vm: VmId, root_thread: ThreadKey) -> Result<()>
    {
        if self.terminated {
            return Err(DebuggerError::Terminated);
        }
        match &self.binding {
            Some(binding) if binding.vm == vm => return Ok(()),
            Some(_) => return Err(DebuggerError::AlreadyAttached),
            None => {}
        }
        self.transition(|engine| {
            engine.binding = Some(Binding::new(vm, root_thread));
        });
        info!(vm = vm.raw(), "VM attached");
        Ok(())
    }

    /// Unbind a VM. The session terminates since no VM remains.
    ///
    /// ## Errors
    ///
    /// [`DebuggerError::NotAttached`] if `vm` is not the bound VM.
    pub fn detach(&mut self, vm: VmId) -> Result<()>
    {
        if !self.binding.as_ref().is_some_and(|b| b.vm == vm) {
            return Err(DebuggerError::NotAttached);
        }
        self.transition(|engine| {
            engine.binding = None;
            engine.step = None;
            engine.paths.clear_cache();
            engine.terminated = true;
        });
        info!(vm = vm.raw(), "VM detached");
        self.send_event(EngineEvent::Terminated);
        Ok(())
    }

    /// Bind a coroutine of the attached VM and return its thread id.
    ///
    /// ## Errors
    ///
    /// [`DebuggerError::NotAttached`] if no VM is bound.
    pub fn attach_coroutine(&mut self, thread: ThreadKey) -> Result<i64>
    {
        let binding = self.binding.as_mut().ok_or(DebuggerError::NotAttached)?;
        if let Some(id) = binding.threads.get(&thread) {
            return Ok(*id);
        }
        let id = binding.next_thread_id;
        binding.next_thread_id += 1;
        binding.threads.insert(thread, id);
        debug!(thread = thread.raw(), id, "coroutine attached");
        self.send_event(EngineEvent::Thread {
            reason: "started",
            thread: id,
        });
        Ok(id)
    }

    /// Unbind a coroutine.
    ///
    /// ## Errors
    ///
    /// [`DebuggerError::NotAttached`] if no VM is bound, or `thread` is
    /// unknown or the root thread.
    pub fn detach_coroutine(&mut self, thread: ThreadKey) -> Result<()>
    {
        let binding = self.binding.as_mut().ok_or(DebuggerError::NotAttached)?;
        if binding.threads.get(&thread) == Some(&ROOT_THREAD_ID) {
            return Err(DebuggerError::NotAttached);
        }
        let id = binding.threads.remove(&thread).ok_or(DebuggerError::NotAttached)?;
        self.send_event(EngineEvent::Thread {
            reason: "exited",
            thread: id,
        });
        Ok(())
    }

    /// Is `thread` bound to the attached VM?
    ///
    /// ## Errors
    ///
    /// [`DebuggerError::NotAttached`] if no VM is bound.
    pub fn is_coroutine_attached(&self, thread: ThreadKey) -> Result<bool>
    {
        let binding = self.binding.as_ref().ok_or(DebuggerError::NotAttached)?;
        Ok(binding.threads.contains_key(&thread))
    }

    // ------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------

    /// Replace configuration level `level` (0 host, 1 launch, 2 client).
    ///
    /// ## Errors
    ///
    /// A non-empty description; configuration is unchanged.
    pub fn set_config(&mut self, level: usize, text: &str) -> std::result::Result<(), String>
    {
        self.config
            .set(level, text, self.schema.as_ref())
            .map_err(|e| e.to_string())?;
        self.transition(|engine| engine.initialized = true);
        debug!(level, "configuration updated");
        Ok(())
    }

    /// Load a configuration schema; its defaults become the lowest layer.
    ///
    /// ## Errors
    ///
    /// I/O or parse failure, or existing configuration violating the new
    /// schema. Nothing changes on error.
    pub fn open_schema(&mut self, path: &Path) -> Result<()>
    {
        let schema = Schema::open(path)?;
        for level in 0..LEVELS {
            if let Some(map) = self.config.level(level) {
                schema.validate(map).map_err(DebuggerError::Schema)?;
            }
        }
        self.config.set_defaults(schema.defaults());
        self.schema = Some(schema);
        self.transition(|engine| engine.initialized = true);
        info!(path = %path.display(), "schema loaded");
        Ok(())
    }

    /// Install the host's path converter.
    pub fn set_custom(&mut self, convert: Box<dyn PathConvert>)
    {
        self.paths.set_custom(convert);
    }

    /// Resolve a VM source identifier to a client path.
    pub fn resolve_source(&mut self, source: &str) -> Option<String>
    {
        self.paths.resolve(source).map(|path| path.to_string())
    }

    /// Capture the process's stdout or stderr.
    ///
    /// ## Errors
    ///
    /// OS failure, or `Unsupported` for VM-level kinds (those are installed
    /// by the VM backend).
    pub fn open_redirect(&mut self, kind: Redirect) -> Result<()>
    {
        if self.redirects.iter().any(|r| r.kind() == kind) {
            return Ok(());
        }
        self.redirects.push(StdRedirect::open(kind)?);
        debug!(?kind, "stream redirected");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Output and events
    // ------------------------------------------------------------------

    /// Forward bytes as an output event.
    ///
    /// Bytes are decoded per `consoleCoding`. Returns `false` (and does
    /// nothing) when no client is connected or `consoleCoding` is `none`.
    pub fn output(&mut self, category: &'static str, bytes: &[u8], location: Option<(String, i64)>) -> bool
    {
        if !self.client.connected || bytes.is_empty() {
            return false;
        }
        let Some(output) = self.config.console_coding().decode(bytes) else {
            return false;
        };
        self.send_event(EngineEvent::Output {
            category,
            output,
            location,
        })
    }

    /// Send a host-defined `rdebug/<name>` event.
    pub fn event(&mut self, name: &str, body: Value) -> bool
    {
        self.send_event(EngineEvent::Custom {
            name: name.to_string(),
            body,
        })
    }

    // ------------------------------------------------------------------
    // Pumping
    // ------------------------------------------------------------------

    /// Host-loop pump: poll the transport without blocking and handle
    /// whatever arrived.
    pub fn update(&mut self)
    {
        if !self.terminated {
            self.pump(None, 0);
        }
    }

    /// Block until a client connected and finished configuration.
    ///
    /// Returns `false` if there is no transport or the session ended first.
    pub fn wait_client(&mut self) -> bool
    {
        while !self.terminated && !self.client.configured {
            if self.transport.is_none() {
                return false;
            }
            self.pump(None, WAIT_POLL_MS);
        }
        self.client.configured
    }

    /// End the session: notify the client, close the transport, restore
    /// redirected streams. Idempotent.
    pub fn close(&mut self)
    {
        if self.terminated && self.transport.is_none() {
            return;
        }
        self.flush_captured();
        if !self.terminated {
            self.send_event(EngineEvent::Terminated);
        }
        self.transition(|engine| {
            engine.terminated = true;
            engine.step = None;
        });
        if let Some(mut transport) = self.transport.take() {
            transport.update(0);
            transport.close();
        }
        self.client = ClientSession::default();
        self.redirects.clear();
        info!("debug session closed");
    }

    /// Poll the transport and dispatch every complete request.
    fn pump<'t>(&mut self, mut target: Option<&mut (dyn crate::target::DebugTarget + 't)>, timeout_ms: u64)
    {
        let Some(transport) = self.transport.as_mut() else {
            return;
        };
        transport.update(timeout_ms);
        self.check_connection();
        self.flush_captured();

        loop {
            self.read_transport();
            match self.decoder.next_message() {
                Ok(Some(ProtocolMessage::Request(request))) => {
                    self.dispatch(target.as_deref_mut(), request);
                }
                Ok(Some(other)) => {
                    warn!(seq = other.seq(), "ignoring non-request message");
                }
                Ok(None) => break,
                Err(e) => warn!(error = %e, "malformed message dropped"),
            }
        }
        self.flush_captured();
    }

    fn read_transport(&mut self)
    {
        let Some(transport) = self.transport.as_mut() else {
            return;
        };
        let available = transport.raw_peek();
        if available == 0 {
            return;
        }
        let mut buf = vec![0u8; available];
        if transport.raw_recv(&mut buf) {
            self.decoder.feed(&buf);
        }
    }

    fn check_connection(&mut self)
    {
        let closed = self.transport.as_ref().map_or(true, |t| t.is_closed());
        if self.client.connected && closed {
            info!("debug client disconnected");
            self.client.connected = false;
            self.handle_disconnect();
        } else if !self.client.connected && !closed {
            info!("debug client connected");
            self.client.connected = true;
            self.decoder.reset();
        }
    }

    /// Drop every client-owned setting; force-resume if paused.
    fn handle_disconnect(&mut self)
    {
        self.transition(|engine| {
            engine.breakpoints.clear();
            engine.step = None;
            engine.pause_requested = false;
            engine.entry_pending = false;
            engine.exception_filters = None;
            engine.client.initialized = false;
            engine.client.configured = false;
            engine.config.clear_level(1);
            engine.config.clear_level(2);
            if engine.paused.is_some() {
                engine.resume = Some(Resume::Disconnect);
            }
        });
    }

    fn flush_captured(&mut self)
    {
        for (kind, bytes) in self.output_queue.drain() {
            self.output(kind.category(), &bytes, None);
        }
        for index in 0..self.redirects.len() {
            let bytes = self.redirects[index].drain();
            if bytes.is_empty() {
                continue;
            }
            let category = self.redirects[index].kind().category();
            if !self.output(category, &bytes, None) {
                self.redirects[index].passthrough(&bytes);
            }
        }
    }

    // ------------------------------------------------------------------
    // Sending
    // ------------------------------------------------------------------

    fn next_seq(&mut self) -> i64
    {
        self.seq += 1;
        self.seq
    }

    fn send(&mut self, message: &ProtocolMessage) -> bool
    {
        if !self.client.connected {
            return false;
        }
        let Some(transport) = self.transport.as_mut() else {
            return false;
        };
        match encode(message) {
            Ok(bytes) => transport.raw_send(&bytes),
            Err(e) => {
                warn!(error = %e, "failed to encode message");
                false
            }
        }
    }

    pub(crate) fn send_event(&mut self, event: EngineEvent) -> bool
    {
        if !self.client.connected {
            return false;
        }
        debug!(event = %event.describe(), "sending event");
        let message = ProtocolMessage::Event(Event {
            seq: self.next_seq(),
            event: event.name(),
            body: event.body(),
        });
        self.send(&message)
    }

    fn respond(&mut self, request: &Request, body: Option<Value>)
    {
        let message = ProtocolMessage::Response(Response {
            seq: self.next_seq(),
            request_seq: request.seq,
            success: true,
            command: request.command.clone(),
            message: None,
            body,
        });
        self.send(&message);
    }

    fn respond_error(&mut self, request: &Request, error: &str)
    {
        debug!(command = %request.command, error, "request failed");
        let message = ProtocolMessage::Response(Response {
            seq: self.next_seq(),
            request_seq: request.seq,
            success: false,
            command: request.command.clone(),
            message: Some(error.to_string()),
            body: None,
        });
        self.send(&message);
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    /// Run `change` and log the lifecycle transition it caused, if any.
    fn transition<F>(&mut self, change: F)
    where
        F: FnOnce(&mut Self),
    {
        let before = self.state();
        change(self);
        let after = self.state();
        if before != after {
            info!(from = %before, to = %after, "engine state changed");
        }
    }

    /// Client-visible id of `thread`, binding unknown coroutines on the fly.
    fn thread_id(&mut self, thread: ThreadKey) -> i64
    {
        let known = self
            .binding
            .as_ref()
            .and_then(|b| b.threads.get(&thread).copied());
        match known {
            Some(id) => id,
            None => self.attach_coroutine(thread).unwrap_or(ROOT_THREAD_ID),
        }
    }

    fn exception_enabled(&self, kind: ExceptionKind) -> bool
    {
        match &self.exception_filters {
            Some(filters) => filters.contains(&kind),
            None => self.config.exception_filters().contains(&kind),
        }
    }

    fn can_stop(&self) -> bool
    {
        !self.terminated && self.binding.is_some() && self.client.connected && self.client.configured
    }
}

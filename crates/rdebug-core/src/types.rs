//! # Core Types
//!
//! Plain data shared by the engine, the hook bridge and VM backends.

use std::fmt;
use std::str::FromStr;

/// Identity of one VM instance (the root interpreter state).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VmId(u64);

impl VmId
{
    /// Create an id from a raw value (typically a pointer).
    #[must_use]
    pub const fn from_raw(value: u64) -> Self
    {
        Self(value)
    }

    /// Raw value, for logging.
    #[must_use]
    pub const fn raw(self) -> u64
    {
        self.0
    }
}

/// Identity of one interpreter thread (root thread or coroutine).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadKey(u64);

impl ThreadKey
{
    /// Create a key from a raw value (typically a pointer).
    #[must_use]
    pub const fn from_raw(value: u64) -> Self
    {
        Self(value)
    }

    /// Raw value, for logging.
    #[must_use]
    pub const fn raw(self) -> u64
    {
        self.0
    }
}

/// Engine lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineState
{
    /// Constructed, nothing configured.
    Birth,
    /// Configuration accepted, not yet running.
    Initialized,
    /// VM attached and client configured.
    Running,
    /// A step request is active.
    Stepping,
    /// Terminal.
    Terminated,
}

impl EngineState
{
    /// Lower-case name as used in logs and status queries.
    #[must_use]
    pub const fn as_str(self) -> &'static str
    {
        match self {
            Self::Birth => "birth",
            Self::Initialized => "initialized",
            Self::Running => "running",
            Self::Stepping => "stepping",
            Self::Terminated => "terminated",
        }
    }
}

impl fmt::Display for EngineState
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.write_str(self.as_str())
    }
}

/// Output sources that can be captured and forwarded to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Redirect
{
    /// Process standard error.
    Stderr,
    /// Process standard output.
    Stdout,
    /// The VM's `print` primitive.
    Print,
    /// The VM's `io.write`.
    IoWrite,
}

impl Redirect
{
    /// Output event category for bytes captured from this source.
    #[must_use]
    pub const fn category(self) -> &'static str
    {
        match self {
            Self::Stderr => "stderr",
            Self::Stdout | Self::Print | Self::IoWrite => "stdout",
        }
    }
}

/// Exception interception points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ExceptionKind
{
    /// Error escaping to the host unprotected.
    LuaPanic,
    /// Error caught by a protected call made by the host.
    LuaPcall,
    /// Error caught by the script's `pcall`.
    Pcall,
    /// Error caught by the script's `xpcall`.
    Xpcall,
}

impl ExceptionKind
{
    /// Every kind, in filter-list order.
    pub const ALL: [Self; 4] = [Self::LuaPanic, Self::LuaPcall, Self::Pcall, Self::Xpcall];

    /// Filter id used on the wire.
    #[must_use]
    pub const fn filter(self) -> &'static str
    {
        match self {
            Self::LuaPanic => "lua_panic",
            Self::LuaPcall => "lua_pcall",
            Self::Pcall => "pcall",
            Self::Xpcall => "xpcall",
        }
    }

    /// Human-readable label for the frontend's filter list.
    #[must_use]
    pub const fn label(self) -> &'static str
    {
        match self {
            Self::LuaPanic => "Uncaught errors",
            Self::LuaPcall => "Errors caught by the host",
            Self::Pcall => "Errors caught by pcall",
            Self::Xpcall => "Errors caught by xpcall",
        }
    }
}

impl FromStr for ExceptionKind
{
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        Self::ALL
            .into_iter()
            .find(|kind| kind.filter() == s)
            .ok_or_else(|| format!("unknown exception filter: {s}"))
    }
}

/// Why execution paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason
{
    /// A breakpoint matched.
    Breakpoint,
    /// A step request completed.
    Step,
    /// The client asked for a pause.
    Pause,
    /// First line after configuration, with `stopOnEntry`.
    Entry,
    /// An intercepted exception.
    Exception,
}

impl StopReason
{
    /// Reason string of the `stopped` event.
    #[must_use]
    pub const fn as_str(self) -> &'static str
    {
        match self {
            Self::Breakpoint => "breakpoint",
            Self::Step => "step",
            Self::Pause => "pause",
            Self::Entry => "entry",
            Self::Exception => "exception",
        }
    }
}

/// Kind of step the client asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind
{
    /// Stop at the very next line, entering calls.
    Into,
    /// Stop at the next line at the same depth or shallower.
    Over,
    /// Stop once the current function returned.
    Out,
}

/// An active step, remembered from where it was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepRequest
{
    /// What kind of step.
    pub kind: StepKind,
    /// Thread the step was issued on.
    pub thread: ThreadKey,
    /// Call depth at issuance.
    pub depth: usize,
}

impl StepRequest
{
    /// Does a line event on `thread` at `depth` complete this step?
    #[must_use]
    pub fn is_satisfied(&self, thread: ThreadKey, depth: usize) -> bool
    {
        match self.kind {
            StepKind::Into => true,
            StepKind::Over => thread == self.thread && depth <= self.depth,
            StepKind::Out => thread == self.thread && depth < self.depth,
        }
    }
}

/// What the VM hook reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind
{
    /// About to execute a new line.
    Line,
    /// A function was called.
    Call,
    /// A function was tail-called.
    TailCall,
    /// A function is returning.
    Return,
}

/// One debug-hook notification.
#[derive(Debug, Clone, Copy)]
pub struct HookEvent<'a>
{
    /// Event kind.
    pub kind: HookKind,
    /// Raw source identifier of the running function (`@file.lua`, `=stdin`, ...).
    pub source: Option<&'a str>,
    /// Current line, `-1` when unknown.
    pub line: i64,
}

/// Text encoding applied to output events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConsoleCoding
{
    /// Bytes are UTF-8 (invalid sequences replaced).
    #[default]
    Utf8,
    /// Bytes are in the host's narrow encoding. Valid UTF-8 passes through;
    /// anything else is read as ISO-8859-1, one character per byte, so no
    /// byte is lost to a replacement character.
    Ansi,
    /// Output events are suppressed.
    None,
}

impl ConsoleCoding
{
    /// Text for an output event, or `None` when output is suppressed.
    #[must_use]
    pub fn decode(self, bytes: &[u8]) -> Option<String>
    {
        match self {
            Self::Utf8 => Some(String::from_utf8_lossy(bytes).into_owned()),
            Self::Ansi => Some(match std::str::from_utf8(bytes) {
                Ok(text) => text.to_string(),
                Err(_) => bytes.iter().map(|&b| char::from(b)).collect(),
            }),
            Self::None => None,
        }
    }
}

impl FromStr for ConsoleCoding
{
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s {
            "utf8" => Ok(Self::Utf8),
            "ansi" => Ok(Self::Ansi),
            "none" => Ok(Self::None),
            other => Err(format!("unknown console coding: {other}")),
        }
    }
}

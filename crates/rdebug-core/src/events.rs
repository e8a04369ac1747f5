//! Engine notification types.
//!
//! Everything the engine tells the client outside of a response goes
//! through [`EngineEvent`]. The engine converts each one into a framed
//! protocol event; tests and hosts can use [`EngineEvent::describe`] for
//! logs.

use rdebug_protocol::types::{
    ContinuedEventBody, OutputEventBody, Source, StoppedEventBody, ThreadEventBody,
};
use serde_json::Value;

use crate::types::StopReason;

/// Event emitted by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent
{
    /// Configuration may begin.
    Initialized,
    /// Execution paused.
    Stopped
    {
        /// Why.
        reason: StopReason,
        /// Client-visible thread id.
        thread: i64,
        /// Extra text (exception message, pause origin).
        text: Option<String>,
    },
    /// Execution resumed.
    Continued
    {
        /// Client-visible thread id.
        thread: i64,
    },
    /// Console output.
    Output
    {
        /// `stdout`, `stderr` or `console`.
        category: &'static str,
        /// Text to show.
        output: String,
        /// Originating source path and line, if known.
        location: Option<(String, i64)>,
    },
    /// A thread (coroutine) started or exited.
    Thread
    {
        /// `started` or `exited`.
        reason: &'static str,
        /// Client-visible thread id.
        thread: i64,
    },
    /// The debug session is over.
    Terminated,
    /// Host-defined event, sent as `rdebug/<name>`.
    Custom
    {
        /// Event name without the prefix.
        name: String,
        /// Arbitrary payload.
        body: Value,
    },
}

impl EngineEvent
{
    /// Wire name of the event.
    #[must_use]
    pub fn name(&self) -> String
    {
        match self {
            Self::Initialized => "initialized".to_string(),
            Self::Stopped { .. } => "stopped".to_string(),
            Self::Continued { .. } => "continued".to_string(),
            Self::Output { .. } => "output".to_string(),
            Self::Thread { .. } => "thread".to_string(),
            Self::Terminated => "terminated".to_string(),
            Self::Custom { name, .. } => format!("rdebug/{name}"),
        }
    }

    /// Wire body of the event.
    #[must_use]
    pub fn body(&self) -> Option<Value>
    {
        let body = match self {
            Self::Initialized | Self::Terminated => return None,
            Self::Stopped { reason, thread, text } => serde_json::to_value(StoppedEventBody {
                reason: reason.as_str().to_string(),
                description: None,
                thread_id: Some(*thread),
                text: text.clone(),
                all_threads_stopped: true,
            }),
            Self::Continued { thread } => serde_json::to_value(ContinuedEventBody {
                thread_id: *thread,
                all_threads_continued: true,
            }),
            Self::Output {
                category,
                output,
                location,
            } => serde_json::to_value(OutputEventBody {
                category: Some((*category).to_string()),
                output: output.clone(),
                source: location.as_ref().map(|(path, _)| Source {
                    name: None,
                    path: Some(path.clone()),
                }),
                line: location.as_ref().map(|(_, line)| *line),
            }),
            Self::Thread { reason, thread } => serde_json::to_value(ThreadEventBody {
                reason: (*reason).to_string(),
                thread_id: *thread,
            }),
            Self::Custom { body, .. } => return Some(body.clone()),
        };
        body.ok()
    }

    /// Human-readable description of the event.
    #[must_use]
    pub fn describe(&self) -> String
    {
        match self {
            Self::Stopped { reason, thread, .. } => {
                format!("Stopped ({}) on thread {thread}", reason.as_str())
            }
            Self::Continued { thread } => format!("Continued thread {thread}"),
            Self::Output { category, output, .. } => format!("[{category}] {}", output.trim_end()),
            Self::Thread { reason, thread } => format!("Thread {thread} {reason}"),
            other => other.name(),
        }
    }
}

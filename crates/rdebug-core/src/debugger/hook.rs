//! # Hook Bridge
//!
//! Entry points the VM backend calls from inside the interpreter.
//!
//! While running, the transport is polled at most every
//! [`RUNNING_POLL_INTERVAL`](super::RUNNING_POLL_INTERVAL). Only line events
//! can stop execution; the checks run in this order:
//!
//! 1. breakpoint at the current location (condition, hit count, log point)
//! 2. pending stop-on-entry
//! 3. pause request
//! 4. active step request
//!
//! A stop clears any step request, so a breakpoint and a step satisfied on
//! the same line produce a single `breakpoint` stop.

use std::time::Instant;

use tracing::{debug, info, warn};

use super::{Debugger, Paused, Resume, RUNNING_POLL_INTERVAL, WAIT_POLL_MS};
use crate::events::EngineEvent;
use crate::target::DebugTarget;
use crate::types::{ExceptionKind, HookEvent, HookKind, StepRequest, StopReason};

impl Debugger
{
    /// Process one hook notification.
    pub fn hook(&mut self, target: &mut dyn DebugTarget, event: &HookEvent<'_>)
    {
        if self.terminated || self.paused.is_some() {
            return;
        }
        if self.last_poll.elapsed() >= RUNNING_POLL_INTERVAL {
            self.last_poll = Instant::now();
            self.pump(None, 0);
        }
        if event.kind != HookKind::Line || !self.can_stop() {
            return;
        }

        let path = event.source.and_then(|source| self.paths.resolve(source));
        if let Some(path) = path.as_deref() {
            if self.check_breakpoint(target, path, event.line) {
                self.stop(target, StopReason::Breakpoint, None);
                return;
            }
        }

        if self.is_skipped(path.as_deref()) {
            return;
        }
        if self.entry_pending {
            self.stop(target, StopReason::Entry, None);
        } else if self.pause_requested {
            self.stop(target, StopReason::Pause, None);
        } else if let Some(step) = self.step {
            if step.is_satisfied(target.thread(), target.depth()) {
                self.stop(target, StopReason::Step, None);
            }
        }
    }

    /// Report an error at an interception point.
    ///
    /// Returns `true` if the engine stopped (the filter for `kind` is
    /// enabled and a client is configured). The VM's error semantics are
    /// up to the caller either way.
    pub fn exception(&mut self, target: &mut dyn DebugTarget, kind: ExceptionKind, message: &str) -> bool
    {
        if self.paused.is_some() || !self.can_stop() || !self.exception_enabled(kind) {
            return false;
        }
        info!(kind = kind.filter(), message, "exception intercepted");
        self.stop(target, StopReason::Exception, Some(message.to_string()));
        true
    }

    /// Pause at the caller's location as if the client had asked for it.
    ///
    /// Returns `false` when no configured client could be told.
    pub fn break_here(&mut self, target: &mut dyn DebugTarget, text: Option<&str>) -> bool
    {
        if self.paused.is_some() || !self.can_stop() {
            return false;
        }
        self.stop(target, StopReason::Pause, text.map(str::to_string));
        true
    }

    /// Should the current line stop on its breakpoint?
    ///
    /// Log points emit output and report `false`. Condition errors are
    /// reported to the client console and never stop.
    fn check_breakpoint(&mut self, target: &mut dyn DebugTarget, path: &str, line: i64) -> bool
    {
        let spec = match self.breakpoints.get(path, line) {
            Some(bp) if bp.enabled => bp.spec.clone(),
            _ => return false,
        };

        if let Some(condition) = spec.condition.as_deref() {
            match target.evaluate(0, condition) {
                Ok(value) if value.truthy => {}
                Ok(_) => return false,
                Err(e) => {
                    warn!(path, line, error = %e, "breakpoint condition failed");
                    let text = format!("Breakpoint condition `{condition}` failed: {e}\n");
                    self.output("console", text.as_bytes(), Some((path.to_string(), line)));
                    return false;
                }
            }
        }

        let hits = match self.breakpoints.get_mut(path, line) {
            Some(bp) => {
                bp.hit_count += 1;
                bp.hit_count
            }
            None => return false,
        };
        if spec.hit_condition.is_some_and(|cond| !cond.matches(hits)) {
            return false;
        }

        if let Some(template) = &spec.log_message {
            let mut text = template.render(|expr| match target.evaluate(0, expr) {
                Ok(value) => value.display,
                Err(e) => format!("{{{e}}}"),
            });
            text.push('\n');
            self.output("console", text.as_bytes(), Some((path.to_string(), line)));
            return false;
        }
        true
    }

    fn is_skipped(&self, path: Option<&str>) -> bool
    {
        let Some(path) = path else {
            return false;
        };
        self.config
            .skip_files()
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    }

    /// Notify the client and serve requests until it resumes us.
    fn stop(&mut self, target: &mut dyn DebugTarget, reason: StopReason, text: Option<String>)
    {
        self.transition(|engine| {
            engine.step = None;
            engine.pause_requested = false;
            engine.entry_pending = false;
        });
        let thread = self.thread_id(target.thread());
        self.paused = Some(Paused { thread });
        self.resume = None;
        info!(reason = reason.as_str(), thread, "execution paused");
        self.send_event(EngineEvent::Stopped { reason, thread, text });

        while self.resume.is_none() {
            if !self.client.connected {
                self.resume = Some(Resume::Disconnect);
                break;
            }
            self.pump(Some(&mut *target), WAIT_POLL_MS);
        }

        let resume = self.resume.take().unwrap_or(Resume::Continue);
        target.clear_handles();
        self.paused = None;
        if let Resume::Step(kind) = resume {
            let step = StepRequest {
                kind,
                thread: target.thread(),
                depth: target.depth(),
            };
            debug!(?step, "step requested");
            self.transition(|engine| engine.step = Some(step));
        }
        self.send_event(EngineEvent::Continued { thread });
        self.last_poll = Instant::now();
    }
}

//! Request handling.
//!
//! Every request is answered exactly once. Inspection commands
//! (`stackTrace`, `scopes`, `variables`, `evaluate`) need a paused VM: the
//! hook bridge passes the live [`DebugTarget`] into the pump only while it
//! waits, so outside a pause they fail with "Not stopped".

use rdebug_protocol::types::{
    Breakpoint as ProtocolBreakpoint, Capabilities, ContinueResponseBody, DisconnectArguments,
    EvaluateArguments, EvaluateResponseBody, ExceptionBreakpointsFilter, InitializeArguments,
    LaunchArguments, Scope, ScopesArguments, ScopesResponseBody, SetBreakpointsArguments,
    SetBreakpointsResponseBody, SetExceptionBreakpointsArguments, Source, StackFrame,
    StackTraceArguments, StackTraceResponseBody, Thread, ThreadsResponseBody, Variable,
    VariablesArguments, VariablesResponseBody,
};
use rdebug_protocol::Request;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use super::{Debugger, Resume, ROOT_THREAD_ID};
use crate::breakpoints::condition::{HitCondition, LogTemplate};
use crate::breakpoints::{normalize, BreakpointSpec};
use crate::error::DebuggerError;
use crate::events::EngineEvent;
use crate::target::DebugTarget;
use crate::types::{ExceptionKind, StepKind};

/// Launch/attach arguments are the second configuration layer.
const LAUNCH_LEVEL: usize = 1;

type Reply = Result<Option<Value>, String>;

impl Debugger
{
    /// Handle one request and send its response.
    pub(super) fn dispatch<'t>(&mut self, target: Option<&mut (dyn DebugTarget + 't)>, request: Request)
    {
        debug!(command = %request.command, seq = request.seq, "request");
        let reply = match request.command.as_str() {
            "initialize" => self.on_initialize(&request),
            "launch" | "attach" => self.on_launch(&request),
            "setBreakpoints" => self.on_set_breakpoints(&request),
            "setExceptionBreakpoints" => self.on_set_exception_breakpoints(&request),
            "configurationDone" => Ok(self.on_configuration_done()),
            "threads" => self.on_threads(),
            "pause" => Ok(self.on_pause()),
            "continue" => self.on_continue(),
            "next" => self.on_step(StepKind::Over),
            "stepIn" => self.on_step(StepKind::Into),
            "stepOut" => self.on_step(StepKind::Out),
            "stackTrace" => self.paused_target(target).and_then(|t| self.on_stack_trace(t, &request)),
            "scopes" => self.paused_target(target).and_then(|t| on_scopes(t, &request)),
            "variables" => self.paused_target(target).and_then(|t| on_variables(t, &request)),
            "evaluate" => self.paused_target(target).and_then(|t| on_evaluate(t, &request)),
            "disconnect" => self.on_disconnect(&request),
            other => Err(format!("Unknown command: {other}")),
        };

        match reply {
            Ok(body) => self.respond(&request, body),
            Err(message) => self.respond_error(&request, &message),
        }

        // `initialized` must follow the `initialize` response.
        if request.command == "initialize" && self.client.initialized {
            self.send_event(EngineEvent::Initialized);
        }
    }

    fn paused_target<'r, 't>(
        &self,
        target: Option<&'r mut (dyn DebugTarget + 't)>,
    ) -> Result<&'r mut (dyn DebugTarget + 't), String>
    {
        match target {
            Some(target) if self.paused.is_some() => Ok(target),
            _ => Err(DebuggerError::NotStopped.to_string()),
        }
    }

    fn on_initialize(&mut self, request: &Request) -> Reply
    {
        let args: InitializeArguments = arguments(request)?;
        info!(client = args.client_id.as_deref().unwrap_or("unknown"), "client initializing");
        self.transition(|engine| {
            engine.client.initialized = true;
            engine.initialized = true;
        });

        let capabilities = Capabilities {
            supports_configuration_done_request: true,
            supports_conditional_breakpoints: true,
            supports_hit_conditional_breakpoints: true,
            supports_log_points: true,
            supports_evaluate_for_hovers: true,
            exception_breakpoint_filters: ExceptionKind::ALL
                .into_iter()
                .map(|kind| ExceptionBreakpointsFilter {
                    filter: kind.filter().to_string(),
                    label: kind.label().to_string(),
                    default: false,
                })
                .collect(),
        };
        body(&capabilities)
    }

    fn on_launch(&mut self, request: &Request) -> Reply
    {
        let args: LaunchArguments = arguments(request)?;
        self.config
            .set_map(LAUNCH_LEVEL, args.config, self.schema.as_ref())
            .map_err(|e| e.to_string())?;
        Ok(None)
    }

    fn on_set_breakpoints(&mut self, request: &Request) -> Reply
    {
        let args: SetBreakpointsArguments = arguments(request)?;
        let path = args
            .source
            .path
            .as_deref()
            .or(args.source.name.as_deref())
            .map(normalize)
            .ok_or_else(|| "setBreakpoints needs a source path".to_string())?;

        let mut accepted = Vec::new();
        let mut results = Vec::with_capacity(args.breakpoints.len());
        for requested in args.breakpoints {
            let hit_condition = match requested.hit_condition.as_deref().map(str::trim) {
                None | Some("") => None,
                Some(text) => match text.parse::<HitCondition>() {
                    Ok(cond) => Some(cond),
                    Err(e) => {
                        results.push(ProtocolBreakpoint {
                            verified: false,
                            line: Some(requested.line),
                            message: Some(e),
                            source: Some(args.source.clone()),
                        });
                        continue;
                    }
                },
            };
            let spec = BreakpointSpec {
                condition: requested.condition.filter(|c| !c.trim().is_empty()),
                hit_condition,
                log_message: requested.log_message.as_deref().map(LogTemplate::parse),
            };
            accepted.push((requested.line, spec));
            results.push(ProtocolBreakpoint {
                verified: true,
                line: Some(requested.line),
                message: None,
                source: Some(args.source.clone()),
            });
        }

        let count = accepted.len();
        self.breakpoints.set_source(&path, accepted);
        debug!(path, count, "breakpoints set");
        body(&SetBreakpointsResponseBody { breakpoints: results })
    }

    fn on_set_exception_breakpoints(&mut self, request: &Request) -> Reply
    {
        let args: SetExceptionBreakpointsArguments = arguments(request)?;
        let filters = args
            .filters
            .iter()
            .filter_map(|name| name.parse::<ExceptionKind>().ok())
            .collect();
        self.exception_filters = Some(filters);
        Ok(None)
    }

    fn on_configuration_done(&mut self) -> Option<Value>
    {
        self.transition(|engine| {
            engine.client.configured = true;
            engine.entry_pending = engine.config.stop_on_entry();
        });
        info!(stop_on_entry = self.entry_pending, "client configured");
        None
    }

    fn on_threads(&mut self) -> Reply
    {
        let threads = self
            .binding
            .as_ref()
            .map(|binding| {
                let mut threads: Vec<Thread> = binding
                    .threads
                    .values()
                    .map(|&id| Thread {
                        id,
                        name: if id == ROOT_THREAD_ID {
                            "main".to_string()
                        } else {
                            format!("coroutine {id}")
                        },
                    })
                    .collect();
                threads.sort_by_key(|t| t.id);
                threads
            })
            .unwrap_or_default();
        body(&ThreadsResponseBody { threads })
    }

    fn on_pause(&mut self) -> Option<Value>
    {
        if self.paused.is_none() {
            self.pause_requested = true;
        }
        None
    }

    fn on_continue(&mut self) -> Reply
    {
        if self.paused.is_some() {
            self.resume = Some(Resume::Continue);
        }
        body(&ContinueResponseBody {
            all_threads_continued: true,
        })
    }

    fn on_step(&mut self, kind: StepKind) -> Reply
    {
        if self.paused.is_none() {
            return Err(DebuggerError::NotStopped.to_string());
        }
        self.resume = Some(Resume::Step(kind));
        Ok(None)
    }

    fn on_stack_trace(&mut self, target: &mut dyn DebugTarget, request: &Request) -> Reply
    {
        let args: StackTraceArguments = arguments(request)?;
        let frames = target.stack();
        let total = frames.len();
        let start = usize::try_from(args.start_frame.unwrap_or(0)).unwrap_or(0);
        let count = match args.levels {
            Some(levels) if levels > 0 => usize::try_from(levels).unwrap_or(total),
            _ => total,
        };

        let stack_frames = frames
            .into_iter()
            .enumerate()
            .skip(start)
            .take(count)
            .map(|(level, frame)| {
                let path = frame.source.as_deref().and_then(|s| self.paths.resolve(s)).map(|p| p.to_string());
                let source = (frame.line >= 0).then(|| Source {
                    name: Some(frame.short_source.clone()),
                    path,
                });
                StackFrame {
                    id: i64::try_from(level).unwrap_or(i64::MAX),
                    name: frame.name,
                    source,
                    line: frame.line.max(0),
                    column: 1,
                }
            })
            .collect();

        body(&StackTraceResponseBody {
            stack_frames,
            total_frames: i64::try_from(total).unwrap_or(i64::MAX),
        })
    }

    fn on_disconnect(&mut self, request: &Request) -> Reply
    {
        let args: DisconnectArguments = arguments(request)?;
        info!(terminate = args.terminate_debuggee.unwrap_or(false), "client requested disconnect");
        self.handle_disconnect();
        Ok(None)
    }
}

fn on_scopes(target: &mut dyn DebugTarget, request: &Request) -> Reply
{
    let args: ScopesArguments = arguments(request)?;
    let level = frame_level(args.frame_id)?;
    let scopes = target
        .scopes(level)?
        .into_iter()
        .map(|scope| Scope {
            name: scope.name,
            variables_reference: reference(scope.handle),
            expensive: scope.expensive,
        })
        .collect();
    body(&ScopesResponseBody { scopes })
}

fn on_variables(target: &mut dyn DebugTarget, request: &Request) -> Reply
{
    let args: VariablesArguments = arguments(request)?;
    let handle = u64::try_from(args.variables_reference)
        .ok()
        .filter(|h| *h != 0)
        .ok_or_else(|| DebuggerError::InvalidReference(args.variables_reference).to_string())?;
    let variables = target
        .variables(handle)?
        .into_iter()
        .map(|var| Variable {
            name: var.name,
            value: var.value,
            type_name: Some(var.type_name),
            variables_reference: reference(var.handle),
        })
        .collect();
    body(&VariablesResponseBody { variables })
}

fn on_evaluate(target: &mut dyn DebugTarget, request: &Request) -> Reply
{
    let args: EvaluateArguments = arguments(request)?;
    let level = frame_level(args.frame_id.unwrap_or(0))?;
    let value = target.evaluate(level, &args.expression)?;
    body(&EvaluateResponseBody {
        result: value.display,
        type_name: Some(value.type_name),
        variables_reference: reference(value.handle),
    })
}

fn arguments<T: DeserializeOwned>(request: &Request) -> Result<T, String>
{
    request.parse_arguments().map_err(|e| format!("invalid arguments: {e}"))
}

fn body<T: Serialize>(value: &T) -> Reply
{
    serde_json::to_value(value).map(Some).map_err(|e| e.to_string())
}

fn frame_level(frame_id: i64) -> Result<usize, String>
{
    usize::try_from(frame_id).map_err(|_| DebuggerError::InvalidReference(frame_id).to_string())
}

fn reference(handle: u64) -> i64
{
    i64::try_from(handle).unwrap_or(0)
}

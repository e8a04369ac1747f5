//! Engine tests over an in-memory transport and a scripted VM target.
//!
//! The engine blocks inside the hook while paused, so the client's
//! requests for each pause are queued up front: every `stopped` event the
//! engine sends releases the next batch. A pause with no batch left closes
//! the transport, which force-resumes the engine.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::path::Path;
use std::rc::Rc;

use rdebug_core::prelude::*;
use rdebug_net::Transport;
use rdebug_protocol::{encode, Event, FrameDecoder, ProtocolMessage, Request, Response};
use serde_json::{json, Value};

#[derive(Default)]
struct Wire
{
    inbox: Vec<u8>,
    outbox: Vec<u8>,
    on_stop: VecDeque<Vec<u8>>,
    closed: bool,
}

struct MemoryTransport(Rc<RefCell<Wire>>);

impl Transport for MemoryTransport
{
    fn update(&mut self, _timeout_ms: u64) {}

    fn raw_peek(&self) -> usize
    {
        self.0.borrow().inbox.len()
    }

    fn raw_recv(&mut self, buf: &mut [u8]) -> bool
    {
        let mut wire = self.0.borrow_mut();
        if buf.len() > wire.inbox.len() {
            return false;
        }
        buf.copy_from_slice(&wire.inbox[..buf.len()]);
        wire.inbox.drain(..buf.len());
        true
    }

    fn raw_send(&mut self, buf: &[u8]) -> bool
    {
        let mut wire = self.0.borrow_mut();
        if wire.closed {
            return false;
        }
        wire.outbox.extend_from_slice(buf);
        if contains(buf, br#""event":"stopped""#) {
            match wire.on_stop.pop_front() {
                Some(batch) => wire.inbox.extend(batch),
                None => wire.closed = true,
            }
        }
        true
    }

    fn is_closed(&self) -> bool
    {
        self.0.borrow().closed
    }

    fn close(&mut self)
    {
        self.0.borrow_mut().closed = true;
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool
{
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// Test-side frontend.
struct Client
{
    wire: Rc<RefCell<Wire>>,
    decoder: FrameDecoder,
    seq: i64,
}

impl Client
{
    fn encode(&mut self, command: &str, args: Value) -> Vec<u8>
    {
        self.seq += 1;
        let request = Request::new(self.seq, command, &args).unwrap();
        encode(&ProtocolMessage::Request(request)).unwrap()
    }

    /// Queue a request for the engine's next pump.
    fn send(&mut self, command: &str, args: Value)
    {
        let bytes = self.encode(command, args);
        self.wire.borrow_mut().inbox.extend(bytes);
    }

    /// Queue requests delivered once the engine reports its next stop.
    fn on_stop(&mut self, requests: &[(&str, Value)])
    {
        let mut batch = Vec::new();
        for (command, args) in requests {
            batch.extend(self.encode(command, args.clone()));
        }
        self.wire.borrow_mut().on_stop.push_back(batch);
    }

    /// Everything the engine sent since the last call.
    fn take(&mut self) -> Vec<ProtocolMessage>
    {
        let bytes = std::mem::take(&mut self.wire.borrow_mut().outbox);
        self.decoder.feed(&bytes);
        let mut out = Vec::new();
        while let Some(message) = self.decoder.next_message().unwrap() {
            out.push(message);
        }
        out
    }

    fn close(&self)
    {
        self.wire.borrow_mut().closed = true;
    }
}

fn responses<'a>(messages: &'a [ProtocolMessage], command: &str) -> Vec<&'a Response>
{
    messages
        .iter()
        .filter_map(|m| match m {
            ProtocolMessage::Response(r) if r.command == command => Some(r),
            _ => None,
        })
        .collect()
}

fn events<'a>(messages: &'a [ProtocolMessage], name: &str) -> Vec<&'a Event>
{
    messages
        .iter()
        .filter_map(|m| match m {
            ProtocolMessage::Event(e) if e.event == name => Some(e),
            _ => None,
        })
        .collect()
}

fn stop_reasons(messages: &[ProtocolMessage]) -> Vec<String>
{
    events(messages, "stopped")
        .iter()
        .filter_map(|e| e.body.as_ref()?.get("reason")?.as_str().map(str::to_string))
        .collect()
}

struct FakeTarget
{
    thread: ThreadKey,
    depth: usize,
    frames: Vec<FrameInfo>,
    values: HashMap<String, EvalValue>,
    cleared: usize,
    handles_live: bool,
}

impl FakeTarget
{
    fn new() -> Self
    {
        Self {
            thread: ThreadKey::from_raw(100),
            depth: 2,
            frames: vec![
                FrameInfo {
                    name: "update".to_string(),
                    source: Some("@main.lua".to_string()),
                    short_source: "main.lua".to_string(),
                    line: 3,
                },
                FrameInfo {
                    name: "main chunk".to_string(),
                    source: Some("@main.lua".to_string()),
                    short_source: "main.lua".to_string(),
                    line: 10,
                },
            ],
            values: HashMap::new(),
            cleared: 0,
            handles_live: false,
        }
    }

    fn with_value(mut self, expr: &str, display: &str, truthy: bool) -> Self
    {
        self.values.insert(
            expr.to_string(),
            EvalValue {
                display: display.to_string(),
                type_name: "number".to_string(),
                truthy,
                handle: 0,
            },
        );
        self
    }
}

impl DebugTarget for FakeTarget
{
    fn thread(&self) -> ThreadKey
    {
        self.thread
    }

    fn depth(&mut self) -> usize
    {
        self.depth
    }

    fn stack(&mut self) -> Vec<FrameInfo>
    {
        self.frames.clone()
    }

    fn scopes(&mut self, level: usize) -> std::result::Result<Vec<ScopeInfo>, String>
    {
        if level >= self.frames.len() {
            return Err("invalid frame".to_string());
        }
        self.handles_live = true;
        Ok(vec![ScopeInfo {
            name: "Locals".to_string(),
            handle: 1,
            expensive: false,
        }])
    }

    fn variables(&mut self, handle: u64) -> std::result::Result<Vec<VariableInfo>, String>
    {
        if !self.handles_live || handle != 1 {
            return Err("invalid reference".to_string());
        }
        Ok(vec![VariableInfo {
            name: "x".to_string(),
            value: "10".to_string(),
            type_name: "number".to_string(),
            handle: 0,
        }])
    }

    fn evaluate(&mut self, _level: usize, expression: &str) -> std::result::Result<EvalValue, String>
    {
        self.values
            .get(expression)
            .cloned()
            .ok_or_else(|| format!("undefined variable '{expression}'"))
    }

    fn clear_handles(&mut self)
    {
        self.cleared += 1;
        self.handles_live = false;
    }
}

const VM: VmId = VmId::from_raw(1);
const ROOT: ThreadKey = ThreadKey::from_raw(100);

fn engine() -> (Debugger, Client)
{
    let wire = Rc::new(RefCell::new(Wire::default()));
    let debugger = Debugger::with_transport(Box::new(MemoryTransport(Rc::clone(&wire))));
    let client = Client {
        wire,
        decoder: FrameDecoder::new(),
        seq: 0,
    };
    (debugger, client)
}

/// Attached, initialized and configured engine with `launch` arguments.
fn running(launch: Value, breakpoints: &[(i64, Value)]) -> (Debugger, Client)
{
    let (mut debugger, mut client) = engine();
    debugger.attach(VM, ROOT).unwrap();
    client.send("initialize", json!({ "clientID": "test" }));
    client.send("launch", launch);
    if !breakpoints.is_empty() {
        let list: Vec<Value> = breakpoints
            .iter()
            .map(|(line, extra)| {
                let mut bp = json!({ "line": line });
                if let (Some(bp), Some(extra)) = (bp.as_object_mut(), extra.as_object()) {
                    bp.extend(extra.clone());
                }
                bp
            })
            .collect();
        client.send(
            "setBreakpoints",
            json!({ "source": { "path": "main.lua" }, "breakpoints": list }),
        );
    }
    client.send("configurationDone", json!({}));
    assert!(debugger.wait_client());
    client.take();
    (debugger, client)
}

fn line(source: &str, line: i64) -> HookEvent<'_>
{
    HookEvent {
        kind: HookKind::Line,
        source: Some(source),
        line,
    }
}

#[test]
fn test_initialize_handshake()
{
    let (mut debugger, mut client) = engine();
    assert!(debugger.is_state(EngineState::Birth));

    client.send("initialize", json!({ "clientID": "test" }));
    debugger.update();

    let messages = client.take();
    let init = responses(&messages, "initialize");
    assert_eq!(init.len(), 1);
    assert!(init[0].success);
    let body = init[0].body.as_ref().unwrap();
    assert_eq!(body["supportsConfigurationDoneRequest"], json!(true));
    assert_eq!(body["exceptionBreakpointFilters"].as_array().unwrap().len(), 4);

    // `initialized` follows the response.
    let response_at = messages
        .iter()
        .position(|m| matches!(m, ProtocolMessage::Response(_)))
        .unwrap();
    let event_at = messages
        .iter()
        .position(|m| matches!(m, ProtocolMessage::Event(e) if e.event == "initialized"))
        .unwrap();
    assert!(response_at < event_at);
    assert!(debugger.is_state(EngineState::Initialized));
}

#[test]
fn test_configuration_done_reaches_running()
{
    let (debugger, _client) = running(json!({}), &[]);
    assert!(debugger.is_configured());
    assert!(debugger.is_state(EngineState::Running));
    assert!(!debugger.is_state(EngineState::Stepping));
}

#[test]
fn test_breakpoint_stop_and_continue()
{
    let (mut debugger, mut client) = running(json!({}), &[(3, json!({}))]);
    let mut target = FakeTarget::new();
    client.on_stop(&[("stackTrace", json!({ "threadId": 1 })), ("continue", json!({ "threadId": 1 }))]);

    debugger.hook(&mut target, &line("@main.lua", 2));
    assert!(stop_reasons(&client.take()).is_empty());

    debugger.hook(&mut target, &line("@main.lua", 3));
    let messages = client.take();
    assert_eq!(stop_reasons(&messages), vec!["breakpoint".to_string()]);

    let trace = responses(&messages, "stackTrace");
    assert!(trace[0].success);
    let frames = &trace[0].body.as_ref().unwrap()["stackFrames"];
    assert_eq!(frames[0]["name"], json!("update"));
    assert_eq!(frames[0]["line"], json!(3));
    assert_eq!(frames[0]["source"]["path"], json!("main.lua"));

    assert_eq!(events(&messages, "continued").len(), 1);
    assert!(!debugger.is_paused());
    assert!(debugger.is_state(EngineState::Running));
    assert_eq!(debugger.breakpoints().get("main.lua", 3).unwrap().hit_count, 1);
}

#[test]
fn test_false_condition_does_not_stop()
{
    let (mut debugger, mut client) = running(json!({}), &[(3, json!({ "condition": "x > 5" }))]);
    let mut target = FakeTarget::new().with_value("x > 5", "false", false);

    debugger.hook(&mut target, &line("@main.lua", 3));
    let messages = client.take();
    assert!(stop_reasons(&messages).is_empty());
    assert!(events(&messages, "output").is_empty());
}

#[test]
fn test_condition_error_reports_and_continues()
{
    let (mut debugger, mut client) = running(json!({}), &[(3, json!({ "condition": "nope" }))]);
    let mut target = FakeTarget::new();

    debugger.hook(&mut target, &line("@main.lua", 3));
    let messages = client.take();
    assert!(stop_reasons(&messages).is_empty());
    let output = events(&messages, "output");
    assert_eq!(output.len(), 1);
    let text = output[0].body.as_ref().unwrap()["output"].as_str().unwrap();
    assert!(text.contains("undefined variable 'nope'"));
}

#[test]
fn test_log_point_emits_output_without_stopping()
{
    let (mut debugger, mut client) = running(json!({}), &[(3, json!({ "logMessage": "x is {x}" }))]);
    let mut target = FakeTarget::new().with_value("x", "10", true);

    debugger.hook(&mut target, &line("@main.lua", 3));
    let messages = client.take();
    assert!(stop_reasons(&messages).is_empty());
    let output = events(&messages, "output");
    assert_eq!(output[0].body.as_ref().unwrap()["output"], json!("x is 10\n"));
    assert_eq!(output[0].body.as_ref().unwrap()["line"], json!(3));
}

#[test]
fn test_hit_condition_counts_hits()
{
    let (mut debugger, mut client) = running(json!({}), &[(3, json!({ "hitCondition": "== 2" }))]);
    let mut target = FakeTarget::new();
    client.on_stop(&[("continue", json!({}))]);

    debugger.hook(&mut target, &line("@main.lua", 3));
    assert!(stop_reasons(&client.take()).is_empty());
    debugger.hook(&mut target, &line("@main.lua", 3));
    assert_eq!(stop_reasons(&client.take()), vec!["breakpoint".to_string()]);
    debugger.hook(&mut target, &line("@main.lua", 3));
    assert!(stop_reasons(&client.take()).is_empty());
}

#[test]
fn test_invalid_hit_condition_is_unverified()
{
    let (mut debugger, mut client) = engine();
    client.send(
        "setBreakpoints",
        json!({
            "source": { "path": "main.lua" },
            "breakpoints": [{ "line": 1, "hitCondition": "sometimes" }, { "line": 2 }]
        }),
    );
    debugger.update();

    let messages = client.take();
    let body = responses(&messages, "setBreakpoints")[0].body.clone().unwrap();
    assert_eq!(body["breakpoints"][0]["verified"], json!(false));
    assert_eq!(body["breakpoints"][1]["verified"], json!(true));
    assert_eq!(debugger.breakpoints().len(), 1);
}

#[test]
fn test_step_over_skips_deeper_frames()
{
    let (mut debugger, mut client) = running(json!({}), &[(3, json!({}))]);
    let mut target = FakeTarget::new();
    client.on_stop(&[("next", json!({ "threadId": 1 }))]);
    client.on_stop(&[("continue", json!({}))]);

    debugger.hook(&mut target, &line("@main.lua", 3));
    assert!(debugger.is_state(EngineState::Stepping));
    let step = debugger.step_request().unwrap();
    assert_eq!(step.kind, StepKind::Over);
    assert_eq!(step.depth, 2);

    target.depth = 3;
    debugger.hook(&mut target, &line("@lib.lua", 7));
    target.depth = 2;
    debugger.hook(&mut target, &line("@main.lua", 4));

    let messages = client.take();
    assert_eq!(stop_reasons(&messages), vec!["breakpoint".to_string(), "step".to_string()]);
    assert!(debugger.is_state(EngineState::Running));
}

#[test]
fn test_step_in_stops_in_new_frame()
{
    let (mut debugger, mut client) = running(json!({}), &[(3, json!({}))]);
    let mut target = FakeTarget::new();
    client.on_stop(&[("stepIn", json!({ "threadId": 1 }))]);
    client.on_stop(&[("continue", json!({}))]);

    debugger.hook(&mut target, &line("@main.lua", 3));
    target.depth = 3;
    debugger.hook(&mut target, &line("@lib.lua", 1));

    assert_eq!(stop_reasons(&client.take()), vec!["breakpoint".to_string(), "step".to_string()]);
}

#[test]
fn test_step_out_waits_for_return()
{
    let (mut debugger, mut client) = running(json!({}), &[(3, json!({}))]);
    let mut target = FakeTarget::new();
    client.on_stop(&[("stepOut", json!({}))]);
    client.on_stop(&[("continue", json!({}))]);

    debugger.hook(&mut target, &line("@main.lua", 3));
    debugger.hook(&mut target, &line("@main.lua", 4));
    target.depth = 1;
    debugger.hook(&mut target, &line("@main.lua", 11));

    assert_eq!(stop_reasons(&client.take()), vec!["breakpoint".to_string(), "step".to_string()]);
}

#[test]
fn test_breakpoint_wins_over_step()
{
    let (mut debugger, mut client) = running(json!({}), &[(3, json!({})), (4, json!({}))]);
    let mut target = FakeTarget::new();
    client.on_stop(&[("next", json!({}))]);
    client.on_stop(&[("continue", json!({}))]);

    debugger.hook(&mut target, &line("@main.lua", 3));
    debugger.hook(&mut target, &line("@main.lua", 4));

    let reasons = stop_reasons(&client.take());
    assert_eq!(reasons, vec!["breakpoint".to_string(), "breakpoint".to_string()]);
    assert!(debugger.step_request().is_none());
}

#[test]
fn test_pause_request_honoured_at_next_line()
{
    let (mut debugger, mut client) = running(json!({}), &[]);
    let mut target = FakeTarget::new();
    client.send("pause", json!({ "threadId": 1 }));
    debugger.update();
    client.on_stop(&[("continue", json!({}))]);

    debugger.hook(&mut target, &line("@main.lua", 1));
    let messages = client.take();
    assert!(responses(&messages, "pause")[0].success);
    assert_eq!(stop_reasons(&messages), vec!["pause".to_string()]);
}

#[test]
fn test_stop_on_entry()
{
    let (mut debugger, mut client) = running(json!({ "stopOnEntry": true }), &[]);
    let mut target = FakeTarget::new();
    client.on_stop(&[("continue", json!({}))]);

    debugger.hook(&mut target, &line("@main.lua", 1));
    debugger.hook(&mut target, &line("@main.lua", 2));
    assert_eq!(stop_reasons(&client.take()), vec!["entry".to_string()]);
}

#[test]
fn test_skip_files_exempt_from_steps()
{
    let (mut debugger, mut client) = running(json!({ "skipFiles": ["vendor/"] }), &[(3, json!({}))]);
    let mut target = FakeTarget::new();
    client.on_stop(&[("stepIn", json!({}))]);
    client.on_stop(&[("continue", json!({}))]);

    debugger.hook(&mut target, &line("@main.lua", 3));
    target.depth = 3;
    debugger.hook(&mut target, &line("@vendor/json.lua", 20));
    assert!(debugger.is_state(EngineState::Stepping));
    target.depth = 2;
    debugger.hook(&mut target, &line("@main.lua", 4));

    assert_eq!(stop_reasons(&client.take()), vec!["breakpoint".to_string(), "step".to_string()]);
}

#[test]
fn test_inspection_while_paused()
{
    let (mut debugger, mut client) = running(json!({}), &[(3, json!({}))]);
    let mut target = FakeTarget::new().with_value("x + 1", "11", true);
    client.on_stop(&[
        ("scopes", json!({ "frameId": 0 })),
        ("variables", json!({ "variablesReference": 1 })),
        ("evaluate", json!({ "expression": "x + 1", "frameId": 0 })),
        ("evaluate", json!({ "expression": "y", "frameId": 0 })),
        ("continue", json!({})),
    ]);

    debugger.hook(&mut target, &line("@main.lua", 3));
    let messages = client.take();

    let scopes = responses(&messages, "scopes")[0].body.clone().unwrap();
    assert_eq!(scopes["scopes"][0]["name"], json!("Locals"));
    assert_eq!(scopes["scopes"][0]["variablesReference"], json!(1));

    let variables = responses(&messages, "variables")[0].body.clone().unwrap();
    assert_eq!(variables["variables"][0]["name"], json!("x"));
    assert_eq!(variables["variables"][0]["value"], json!("10"));

    let evaluations = responses(&messages, "evaluate");
    assert_eq!(evaluations[0].body.as_ref().unwrap()["result"], json!("11"));
    assert!(!evaluations[1].success);
    assert!(evaluations[1].message.as_deref().unwrap().contains("undefined variable"));

    assert_eq!(target.cleared, 1);
    assert!(!target.handles_live);
}

#[test]
fn test_inspection_requires_pause()
{
    let (mut debugger, mut client) = running(json!({}), &[]);
    client.send("stackTrace", json!({ "threadId": 1 }));
    client.send("next", json!({ "threadId": 1 }));
    debugger.update();

    let messages = client.take();
    let trace = responses(&messages, "stackTrace");
    assert!(!trace[0].success);
    assert_eq!(trace[0].message.as_deref(), Some("Not stopped"));
    assert!(!responses(&messages, "next")[0].success);
}

#[test]
fn test_unknown_command_fails()
{
    let (mut debugger, mut client) = engine();
    client.send("restartFrame", json!({}));
    debugger.update();

    let messages = client.take();
    let reply = responses(&messages, "restartFrame");
    assert!(!reply[0].success);
    assert!(reply[0].message.as_deref().unwrap().contains("restartFrame"));
}

#[test]
fn test_threads_lists_root_and_coroutines()
{
    let (mut debugger, mut client) = running(json!({}), &[]);
    assert_eq!(debugger.attach_coroutine(ThreadKey::from_raw(200)).unwrap(), 2);
    client.send("threads", json!({}));
    debugger.update();

    let messages = client.take();
    assert_eq!(events(&messages, "thread").len(), 1);
    let body = responses(&messages, "threads")[0].body.clone().unwrap();
    assert_eq!(body["threads"][0], json!({ "id": 1, "name": "main" }));
    assert_eq!(body["threads"][1]["id"], json!(2));
}

#[test]
fn test_disconnect_returns_to_initialized()
{
    let (mut debugger, mut client) = running(json!({}), &[(3, json!({}))]);
    client.send("disconnect", json!({}));
    debugger.update();

    assert!(responses(&client.take(), "disconnect")[0].success);
    assert!(debugger.breakpoints().is_empty());
    assert!(!debugger.is_configured());
    assert!(debugger.is_state(EngineState::Initialized));
}

#[test]
fn test_disconnect_while_paused_force_resumes()
{
    let (mut debugger, mut client) = running(json!({}), &[(3, json!({}))]);
    let mut target = FakeTarget::new();
    client.on_stop(&[("disconnect", json!({}))]);

    debugger.hook(&mut target, &line("@main.lua", 3));
    assert!(!debugger.is_paused());
    assert!(debugger.breakpoints().is_empty());
    assert!(debugger.is_state(EngineState::Initialized));
}

#[test]
fn test_lost_client_while_paused_force_resumes()
{
    let (mut debugger, mut client) = running(json!({}), &[(3, json!({}))]);
    let mut target = FakeTarget::new();

    // No batch queued: the stop closes the wire.
    debugger.hook(&mut target, &line("@main.lua", 3));
    assert!(!debugger.is_paused());
    assert!(!debugger.is_connected());
    assert_eq!(target.cleared, 1);
    client.close();
}

#[test]
fn test_exception_filters()
{
    let (mut debugger, mut client) = running(json!({}), &[]);
    let mut target = FakeTarget::new();
    client.send("setExceptionBreakpoints", json!({ "filters": ["pcall"] }));
    debugger.update();
    client.on_stop(&[("continue", json!({}))]);

    assert!(!debugger.exception(&mut target, ExceptionKind::Xpcall, "boom"));
    assert!(debugger.exception(&mut target, ExceptionKind::Pcall, "boom"));

    let messages = client.take();
    let stopped = events(&messages, "stopped");
    assert_eq!(stopped.len(), 1);
    let body = stopped[0].body.as_ref().unwrap();
    assert_eq!(body["reason"], json!("exception"));
    assert_eq!(body["text"], json!("boom"));
}

#[test]
fn test_exception_filters_from_config()
{
    let (mut debugger, mut client) = running(json!({ "exceptionFilters": ["lua_panic"] }), &[]);
    let mut target = FakeTarget::new();
    client.on_stop(&[("continue", json!({}))]);

    assert!(!debugger.exception(&mut target, ExceptionKind::Pcall, "caught"));
    assert!(debugger.exception(&mut target, ExceptionKind::LuaPanic, "fatal"));
}

#[test]
fn test_no_stop_before_configuration()
{
    let (mut debugger, mut client) = engine();
    debugger.attach(VM, ROOT).unwrap();
    debugger.breakpoints_mut().add("main.lua", 3, BreakpointSpec::default());
    let mut target = FakeTarget::new();

    debugger.hook(&mut target, &line("@main.lua", 3));
    assert!(stop_reasons(&client.take()).is_empty());
    assert!(!debugger.exception(&mut target, ExceptionKind::LuaPanic, "x"));
}

#[test]
fn test_malformed_config_leaves_state_unchanged()
{
    let (mut debugger, _client) = engine();
    debugger.set_config(0, r#"{ "stopOnEntry": true }"#).unwrap();
    let before = debugger.config().clone();

    let error = debugger.set_config(0, "{ not json").unwrap_err();
    assert!(!error.is_empty());
    let error = debugger.set_config(0, r#"{ "stopOnEntry": "yes" }"#).unwrap_err();
    assert!(!error.is_empty());
    assert_eq!(debugger.config(), &before);
    assert!(debugger.is_state(EngineState::Initialized));
}

#[test]
fn test_schema_file_defaults_and_validation()
{
    let (mut debugger, _client) = engine();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{ "properties": {{ "stopOnEntry": {{ "type": "boolean", "default": true }} }} }}"#
    )
    .unwrap();

    debugger.open_schema(file.path()).unwrap();
    assert_eq!(debugger.config().get("stopOnEntry"), Some(&json!(true)));
    assert!(debugger.set_config(1, r#"{ "stopOnEntry": 1 }"#).is_err());
    assert!(matches!(
        debugger.open_schema(Path::new("/nonexistent/rdebug-schema.json")),
        Err(DebuggerError::Io(_))
    ));
    assert!(debugger.is_state(EngineState::Initialized));
}

#[test]
fn test_attach_rules()
{
    let (mut debugger, _client) = engine();
    debugger.attach(VM, ROOT).unwrap();
    debugger.attach(VM, ROOT).unwrap();
    assert!(matches!(
        debugger.attach(VmId::from_raw(2), ROOT),
        Err(DebuggerError::AlreadyAttached)
    ));
}

#[test]
fn test_detach_invalidates_coroutines()
{
    let (mut debugger, mut client) = running(json!({}), &[]);
    let coroutine = ThreadKey::from_raw(200);
    debugger.attach_coroutine(coroutine).unwrap();
    assert!(debugger.is_coroutine_attached(coroutine).unwrap());

    debugger.detach(VM).unwrap();
    assert!(matches!(debugger.is_coroutine_attached(coroutine), Err(DebuggerError::NotAttached)));
    assert!(matches!(debugger.attach_coroutine(coroutine), Err(DebuggerError::NotAttached)));
    assert!(debugger.is_state(EngineState::Terminated));
    assert_eq!(events(&client.take(), "terminated").len(), 1);
    assert!(matches!(debugger.attach(VM, ROOT), Err(DebuggerError::Terminated)));
}

#[test]
fn test_output_requires_client()
{
    let mut debugger = Debugger::new();
    assert!(!debugger.output("stdout", b"hello\n", None));

    let (mut debugger, mut client) = engine();
    debugger.update();
    assert!(debugger.output("stdout", b"hello\n", None));
    let messages = client.take();
    assert_eq!(events(&messages, "output")[0].body.as_ref().unwrap()["output"], json!("hello\n"));

    debugger.set_config(0, r#"{ "consoleCoding": "none" }"#).unwrap();
    assert!(!debugger.output("stdout", b"hidden\n", None));
}

#[test]
fn test_ansi_console_coding_keeps_narrow_bytes()
{
    let (mut debugger, mut client) = engine();
    debugger.update();
    debugger.set_config(0, r#"{ "consoleCoding": "ansi" }"#).unwrap();
    assert!(debugger.output("stdout", b"\xe9t\xe9\n", None));

    let messages = client.take();
    assert_eq!(events(&messages, "output")[0].body.as_ref().unwrap()["output"], json!("été\n"));
}

#[test]
fn test_queued_output_flushed_on_pump()
{
    let (mut debugger, mut client) = engine();
    debugger.update();
    debugger.output_queue().push(Redirect::Print, b"later\n".to_vec());
    debugger.update();

    let messages = client.take();
    let output = events(&messages, "output");
    assert_eq!(output[0].body.as_ref().unwrap()["category"], json!("stdout"));
}

#[cfg(unix)]
#[test]
fn test_captured_stream_never_blocks_the_writer()
{
    let (mut debugger, mut client) = engine();
    debugger.update();
    debugger.open_redirect(Redirect::Stderr).unwrap();

    // Larger than any pipe buffer, and no pump runs while it is written.
    let payload = vec![b'x'; 256 * 1024];
    let mut err = std::io::stderr().lock();
    err.write_all(&payload).unwrap();
    err.flush().unwrap();
    drop(err);

    debugger.close();
    let messages = client.take();
    let output = events(&messages, "output");
    assert!(!output.is_empty());
    assert_eq!(output[0].body.as_ref().unwrap()["category"], json!("stderr"));
}

#[test]
fn test_custom_event()
{
    let (mut debugger, mut client) = engine();
    debugger.update();
    assert!(debugger.event("reload", json!({ "file": "a.lua" })));
    let messages = client.take();
    let custom = events(&messages, "rdebug/reload");
    assert_eq!(custom[0].body, Some(json!({ "file": "a.lua" })));
}

#[test]
fn test_custom_path_converter()
{
    let (mut debugger, mut client) = running(json!({}), &[]);
    debugger.set_custom(Box::new(|source: &str| source.strip_prefix('@').map(|p| format!("/work/{p}"))));
    client.send(
        "setBreakpoints",
        json!({ "source": { "path": "/work/main.lua" }, "breakpoints": [{ "line": 3 }] }),
    );
    debugger.update();
    let mut target = FakeTarget::new();
    client.on_stop(&[("continue", json!({}))]);

    debugger.hook(&mut target, &line("@main.lua", 3));
    assert!(stop_reasons(&client.take()).contains(&"breakpoint".to_string()));
}

#[test]
fn test_close_terminates()
{
    let (mut debugger, mut client) = running(json!({}), &[]);
    debugger.close();
    debugger.close();

    assert!(debugger.is_state(EngineState::Terminated));
    assert_eq!(events(&client.take(), "terminated").len(), 1);
    assert!(!debugger.wait_client());
}

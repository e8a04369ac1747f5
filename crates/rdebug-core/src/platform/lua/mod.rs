//! # Lua 5.4 Backend
//!
//! Binds an [`mlua::Lua`] state to the engine.
//!
//! ## What attaching installs
//!
//! - A debug hook (calls, returns, lines) that forwards to
//!   [`Debugger::hook`]
//! - `pcall`/`xpcall` replacements that report caught errors to
//!   [`Debugger::exception`] before behaving like the originals
//! - `coroutine.create`/`coroutine.wrap` replacements that hook each new
//!   coroutine and bind it to the engine. A weak-keyed table maps every
//!   coroutine to a sentinel whose `__gc` queues the coroutine for
//!   unbinding, so dead coroutines leave the thread list and a reused
//!   address never inherits a stale id
//! - The introspection helper chunk (`=[rdebug]`), whose frames are hidden
//!   from stack traces
//!
//! ## Reentrancy
//!
//! The hook, the output overrides and the `rdebug` module all reach the
//! engine through `try_borrow_mut`. While the engine is busy (paused, or
//! evaluating an expression that calls back into Lua) the hook is a no-op
//! and captured output is parked in the engine's
//! [`OutputQueue`](crate::redirect::OutputQueue).

mod target;
mod value;

use std::cell::RefCell;
use std::rc::Rc;

use mlua::{Debug, DebugEvent, Function, HookTriggers, Lua, MultiValue, Table, Thread, Value, VmState};
use tracing::{debug, info, trace};

pub use target::LuaTarget;
pub use value::{display, is_truthy, to_json};

use crate::debugger::Debugger;
use crate::error::{DebuggerError, Result};
use crate::redirect::OutputQueue;
use crate::types::{ExceptionKind, HookEvent, HookKind, Redirect, ThreadKey, VmId};

/// Chunk name of the helper; hooks in it are ignored.
pub const HELPER_CHUNK: &str = "=[rdebug]";

const HELPER_SOURCE: &str = include_str!("helper.lua");

/// Per-VM state kept in the Lua app data.
#[derive(Clone)]
struct LuaBinding
{
    engine: Rc<RefCell<Debugger>>,
    helper: Table,
    vm: VmId,
    originals: Vec<(Redirect, Function)>,
}

/// Coroutines collected by the VM, waiting to be unbound from the engine.
type Freed = Rc<RefCell<Vec<ThreadKey>>>;

/// Identity of a Lua state (its globals table).
#[must_use]
pub fn vm_id(lua: &Lua) -> VmId
{
    VmId::from_raw(lua.globals().to_pointer() as usize as u64)
}

fn thread_key(thread: &Thread) -> ThreadKey
{
    ThreadKey::from_raw(thread.to_pointer() as usize as u64)
}

fn current_thread(lua: &Lua) -> ThreadKey
{
    thread_key(&lua.current_thread())
}

fn binding(lua: &Lua) -> Result<LuaBinding>
{
    lua.app_data_ref::<LuaBinding>()
        .map(|b| b.clone())
        .ok_or(DebuggerError::NotAttached)
}

/// Attach `lua` to `engine` and install the hook.
///
/// Attaching the same state twice is a no-op. Coroutines created through
/// `coroutine.create` or `coroutine.wrap` afterwards are hooked and bound
/// as they are created, and unbound once the VM collects them.
///
/// ## Errors
///
/// [`DebuggerError::MissingDebugLibrary`] if the state was created without
/// its `debug` library, engine binding errors
/// ([`DebuggerError::AlreadyAttached`], [`DebuggerError::Terminated`]) or
/// a failure loading the helper chunk.
pub fn attach_lua(lua: &Lua, engine: &Rc<RefCell<Debugger>>) -> Result<VmId>
{
    let vm = vm_id(lua);
    if lua.app_data_ref::<LuaBinding>().is_some() {
        return Ok(vm);
    }
    if !matches!(lua.globals().get::<Value>("debug")?, Value::Table(_)) {
        return Err(DebuggerError::MissingDebugLibrary);
    }
    engine.borrow_mut().attach(vm, current_thread(lua))?;

    let helper: Table = lua.load(HELPER_SOURCE).set_name(HELPER_CHUNK).eval()?;
    let freed = Freed::default();
    let report = {
        let engine = Rc::clone(engine);
        let helper = helper.clone();
        lua.create_function(move |lua, (kind, message): (String, Value)| {
            if let Ok(kind) = kind.parse::<ExceptionKind>() {
                report_exception(lua, &engine, &helper, kind, &message);
            }
            Ok(message)
        })?
    };
    let bind = {
        let engine = Rc::clone(engine);
        let helper = helper.clone();
        let freed = Rc::clone(&freed);
        lua.create_function(move |_, thread: Thread| {
            thread.set_hook(
                hook_triggers(),
                hook_callback(Rc::clone(&engine), helper.clone(), Rc::clone(&freed)),
            );
            let key = thread_key(&thread);
            if let Ok(mut engine) = engine.try_borrow_mut() {
                reap(&mut engine, &freed);
                if engine.attach_coroutine(key).is_err() {
                    trace!(thread = key.raw(), "coroutine created while detached");
                }
            }
            Ok(key.raw() as i64)
        })?
    };
    let release = {
        let freed = Rc::clone(&freed);
        lua.create_function(move |_, key: i64| {
            freed.borrow_mut().push(ThreadKey::from_raw(key as u64));
            Ok(())
        })?
    };
    target::call::<()>(&helper, "install", (report, bind, release))?;

    lua.set_app_data(LuaBinding {
        engine: Rc::clone(engine),
        helper: helper.clone(),
        vm,
        originals: Vec::new(),
    });
    lua.set_hook(hook_triggers(), hook_callback(Rc::clone(engine), helper, freed));
    info!(vm = vm.raw(), "Lua state attached");
    Ok(vm)
}

/// Unbind `lua` from the engine, which ends the session.
///
/// With `remove` the hook and the VM overrides (`pcall`, `xpcall`,
/// coroutine constructors, redirected output primitives) are taken out as
/// well. Without it they stay installed but idle: the engine has no VM
/// left, so the hook returns at once and output falls back to the
/// original primitives when no client listens. A later call with `remove`
/// still takes them out.
///
/// ## Errors
///
/// [`DebuggerError::NotAttached`] if `lua` was never attached, if it was
/// already removed, or (without `remove`) if it was already unbound.
pub fn detach_lua(lua: &Lua, remove: bool) -> Result<()>
{
    let binding = binding(lua)?;
    let unbound = binding.engine.borrow_mut().detach(binding.vm);
    if !remove {
        unbound?;
        info!(vm = binding.vm.raw(), "Lua state unbound, hook kept");
        return Ok(());
    }
    if let Err(e) = unbound {
        debug!(vm = binding.vm.raw(), error = %e, "Lua state was already unbound");
    }

    lua.remove_hook();
    target::call::<()>(&binding.helper, "restore", ())?;
    let globals = lua.globals();
    for (kind, original) in &binding.originals {
        match kind {
            Redirect::Print => globals.set("print", original.clone())?,
            Redirect::IoWrite => globals.get::<Table>("io")?.set("write", original.clone())?,
            Redirect::Stdout | Redirect::Stderr => {}
        }
    }
    lua.remove_app_data::<LuaBinding>();
    info!(vm = binding.vm.raw(), "Lua state detached");
    Ok(())
}

/// Bind the running coroutine and return its client thread id.
///
/// Only needed for coroutines created behind the VM's back (from Rust or
/// C); the wrapped `coroutine.create`/`coroutine.wrap` bind on creation.
///
/// ## Errors
///
/// [`DebuggerError::NotAttached`] if `lua` is not attached.
pub fn attach_coroutine(lua: &Lua) -> Result<i64>
{
    let binding = binding(lua)?;
    let id = binding.engine.borrow_mut().attach_coroutine(current_thread(lua))?;
    Ok(id)
}

fn hook_triggers() -> HookTriggers
{
    HookTriggers::new().on_calls().on_returns().every_line()
}

/// The hook shared by the main thread and every wrapped coroutine.
fn hook_callback(
    engine: Rc<RefCell<Debugger>>,
    helper: Table,
    freed: Freed,
) -> impl Fn(&Lua, Debug<'_>) -> mlua::Result<VmState> + 'static
{
    move |lua, debug| {
        let kind = match debug.event() {
            DebugEvent::Line => HookKind::Line,
            DebugEvent::Call => HookKind::Call,
            DebugEvent::TailCall => HookKind::TailCall,
            DebugEvent::Ret => HookKind::Return,
            _ => return Ok(VmState::Continue),
        };
        let source = debug.source();
        let raw = source.source.as_deref();
        if raw == Some(HELPER_CHUNK) {
            return Ok(VmState::Continue);
        }
        let Ok(mut engine) = engine.try_borrow_mut() else {
            return Ok(VmState::Continue);
        };
        reap(&mut engine, &freed);
        let mut target = LuaTarget::new(lua, &helper);
        let event = HookEvent {
            kind,
            source: raw,
            line: i64::from(debug.curr_line()),
        };
        engine.hook(&mut target, &event);
        Ok(VmState::Continue)
    }
}

/// Unbind coroutines whose sentinels the collector finalized.
fn reap(engine: &mut Debugger, freed: &RefCell<Vec<ThreadKey>>)
{
    if freed.borrow().is_empty() {
        return;
    }
    for key in freed.take() {
        if engine.detach_coroutine(key).is_err() {
            trace!(thread = key.raw(), "collected coroutine was not bound");
        }
    }
}

fn report_exception(lua: &Lua, engine: &Rc<RefCell<Debugger>>, helper: &Table, kind: ExceptionKind, message: &Value)
{
    let Ok(mut engine) = engine.try_borrow_mut() else {
        return;
    };
    let text = value::plain_text(message).unwrap_or_else(|| display(message));
    let mut target = LuaTarget::at_first_user_frame(lua, helper);
    engine.exception(&mut target, kind, &text);
}

/// Inject the `rdebug` table into the globals.
///
/// - `rdebug.event(name, ...)` sends `rdebug/<name>` with the remaining
///   arguments as a JSON array; returns whether it was sent
/// - `rdebug.output(...)` sends console output; returns whether it was sent
/// - `rdebug.breakpoint([text])` pauses here if a client is configured
///
/// ## Errors
///
/// [`DebuggerError::NotAttached`] if `lua` is not attached.
pub fn init_internal_module(lua: &Lua) -> Result<()>
{
    let binding = binding(lua)?;
    let module = lua.create_table()?;

    let engine = Rc::clone(&binding.engine);
    module.set(
        "event",
        lua.create_function(move |_, (name, args): (String, MultiValue)| {
            let body = serde_json::Value::Array(args.iter().map(to_json).collect());
            Ok(engine.try_borrow_mut().is_ok_and(|mut e| e.event(&name, body)))
        })?,
    )?;

    let engine = Rc::clone(&binding.engine);
    module.set(
        "output",
        lua.create_function(move |lua, args: MultiValue| {
            let text = join_args(lua, &args, "")?;
            Ok(engine
                .try_borrow_mut()
                .is_ok_and(|mut e| e.output("console", text.as_bytes(), None)))
        })?,
    )?;

    let engine = Rc::clone(&binding.engine);
    let helper = binding.helper.clone();
    module.set(
        "breakpoint",
        lua.create_function(move |lua, text: Option<String>| {
            let Ok(mut engine) = engine.try_borrow_mut() else {
                return Ok(false);
            };
            let mut target = LuaTarget::at_first_user_frame(lua, &helper);
            Ok(engine.break_here(&mut target, text.as_deref()))
        })?,
    )?;

    lua.globals().set("rdebug", module)?;
    debug!("rdebug module installed");
    Ok(())
}

/// Send host-defined event `rdebug/<name>` with a Lua value as body.
///
/// ## Errors
///
/// [`DebuggerError::NotAttached`] if `lua` is not attached.
pub fn event(lua: &Lua, name: &str, args: &Value) -> Result<bool>
{
    let binding = binding(lua)?;
    let sent = binding.engine.borrow_mut().event(name, to_json(args));
    Ok(sent)
}

/// Redirect one output channel into the engine.
///
/// `Print` and `IoWrite` replace the VM primitives: output goes to the
/// client when one listens, otherwise to the original primitive.
/// `Stdout`/`Stderr` capture the process streams.
///
/// ## Errors
///
/// [`DebuggerError::NotAttached`], a Lua error while installing, or the OS
/// error of the stream capture.
pub fn open_redirect(lua: &Lua, kind: Redirect) -> Result<()>
{
    let mut binding = binding(lua)?;
    if binding.originals.iter().any(|(k, _)| *k == kind) {
        return Ok(());
    }
    let globals = lua.globals();
    let original = match kind {
        Redirect::Stdout | Redirect::Stderr => {
            binding.engine.borrow_mut().open_redirect(kind)?;
            return Ok(());
        }
        Redirect::Print => {
            let original: Function = globals.get("print")?;
            let engine = Rc::clone(&binding.engine);
            let queue = engine.borrow().output_queue();
            let fallback = original.clone();
            let replacement = lua.create_function(move |lua, args: MultiValue| {
                let mut text = join_args(lua, &args, "\t")?;
                text.push('\n');
                if !deliver(&engine, &queue, Redirect::Print, text.into_bytes()) {
                    fallback.call::<()>(args)?;
                }
                Ok(())
            })?;
            globals.set("print", replacement)?;
            original
        }
        Redirect::IoWrite => {
            let io: Table = globals.get("io")?;
            let original: Function = io.get("write")?;
            let engine = Rc::clone(&binding.engine);
            let queue = engine.borrow().output_queue();
            let fallback = original.clone();
            let replacement = lua.create_function(move |lua, args: MultiValue| {
                let text = join_args(lua, &args, "")?;
                if deliver(&engine, &queue, Redirect::IoWrite, text.into_bytes()) {
                    let io: Table = lua.globals().get("io")?;
                    let stdout: Value = io.get("stdout")?;
                    return Ok(MultiValue::from_iter([stdout]));
                }
                fallback.call::<MultiValue>(args)
            })?;
            io.set("write", replacement)?;
            original
        }
    };
    binding.originals.push((kind, original));
    lua.set_app_data(binding);
    debug!(?kind, "VM output redirected");
    Ok(())
}

/// Hand captured bytes to the engine, or park them if it is busy.
///
/// Returns `false` when no client received them, so the caller should fall
/// back to the original primitive.
fn deliver(engine: &Rc<RefCell<Debugger>>, queue: &OutputQueue, kind: Redirect, bytes: Vec<u8>) -> bool
{
    match engine.try_borrow_mut() {
        Ok(mut engine) => engine.output(kind.category(), &bytes, None),
        Err(_) => {
            trace!(?kind, len = bytes.len(), "engine busy, output parked");
            queue.push(kind, bytes);
            true
        }
    }
}

fn join_args(lua: &Lua, args: &MultiValue, separator: &str) -> mlua::Result<String>
{
    let tostring: Function = lua.globals().get("tostring")?;
    let mut parts = Vec::with_capacity(args.len());
    for arg in args.iter() {
        match value::plain_text(arg) {
            Some(text) => parts.push(text),
            None => parts.push(tostring.call::<String>(arg.clone())?),
        }
    }
    Ok(parts.join(separator))
}

/// Run a chunk protected; an escaping error is reported as `lua_panic`.
///
/// ## Errors
///
/// The Lua error, after the engine had its chance to stop on it.
pub fn run_script(lua: &Lua, name: &str, source: &str) -> Result<()>
{
    let chunk = lua.load(source).set_name(format!("@{name}")).into_function()?;
    protect(lua, ExceptionKind::LuaPanic, chunk, MultiValue::new()).map(|_| ())
}

/// Call `function` protected; an error is reported as `lua_pcall`.
///
/// ## Errors
///
/// The Lua error, after the engine had its chance to stop on it.
pub fn call_protected(lua: &Lua, function: Function, args: MultiValue) -> Result<MultiValue>
{
    protect(lua, ExceptionKind::LuaPcall, function, args)
}

fn protect(lua: &Lua, kind: ExceptionKind, function: Function, args: MultiValue) -> Result<MultiValue>
{
    let binding = binding(lua)?;
    let mut call_args = MultiValue::new();
    call_args.push_back(Value::String(lua.create_string(kind.filter())?));
    call_args.push_back(Value::Function(function));
    call_args.extend(args);

    let mut results: MultiValue = target::call(&binding.helper, "protect", call_args)?;
    let ok = matches!(results.pop_front(), Some(Value::Boolean(true)));
    if ok {
        return Ok(results);
    }
    let error = results.pop_front().unwrap_or(Value::Nil);
    let message = value::plain_text(&error).unwrap_or_else(|| display(&error));
    Err(DebuggerError::Lua(mlua::Error::RuntimeError(message)))
}

#[cfg(test)]
mod tests
{
    use crate::target::DebugTarget;
    use crate::types::EngineState;

    use super::*;

    fn debuggable() -> Lua
    {
        // SAFETY: test scripts are trusted; the hook needs the debug library.
        unsafe { Lua::unsafe_new() }
    }

    fn attached() -> (Lua, Rc<RefCell<Debugger>>)
    {
        let lua = debuggable();
        let engine = Rc::new(RefCell::new(Debugger::new()));
        attach_lua(&lua, &engine).unwrap();
        (lua, engine)
    }

    #[test]
    fn test_attach_requires_debug_library()
    {
        let lua = Lua::new();
        let engine = Rc::new(RefCell::new(Debugger::new()));
        assert!(matches!(attach_lua(&lua, &engine), Err(DebuggerError::MissingDebugLibrary)));
        assert!(!engine.borrow().is_attached());
        assert!(lua.app_data_ref::<LuaBinding>().is_none());
    }

    #[test]
    fn test_attach_is_idempotent()
    {
        let (lua, engine) = attached();
        assert_eq!(attach_lua(&lua, &engine).unwrap(), vm_id(&lua));
        assert!(engine.borrow().is_attached());
    }

    #[test]
    fn test_script_runs_without_client()
    {
        let (lua, engine) = attached();
        init_internal_module(&lua).unwrap();
        open_redirect(&lua, Redirect::Print).unwrap();
        run_script(
            &lua,
            "t.lua",
            "assert(rdebug.output('x') == false)\n\
             assert(rdebug.event('ping', 1) == false)\n\
             local ok, err = pcall(error, 'caught')\n\
             assert(not ok and err == 'caught')\n\
             print('fallback')",
        )
        .unwrap();
        assert!(!engine.borrow().is_paused());
    }

    #[test]
    fn test_escaping_error_is_returned()
    {
        let (lua, _engine) = attached();
        let err = run_script(&lua, "bad.lua", "error('bad thing')").unwrap_err();
        assert!(err.to_string().contains("bad thing"));
    }

    #[test]
    fn test_call_protected_returns_values()
    {
        let (lua, _engine) = attached();
        let add: Function = lua.load("return function(a, b) return a + b end").eval().unwrap();
        let args = MultiValue::from_iter([Value::Integer(2), Value::Integer(3)]);
        let results = call_protected(&lua, add, args).unwrap();
        assert!(matches!(results.front(), Some(Value::Integer(5))));
    }

    #[test]
    fn test_detach_with_remove_restores_primitives()
    {
        let lua = debuggable();
        let pcall: Function = lua.globals().get("pcall").unwrap();
        let print: Function = lua.globals().get("print").unwrap();
        let create: Function = lua.load("return coroutine.create").eval().unwrap();
        let engine = Rc::new(RefCell::new(Debugger::new()));
        attach_lua(&lua, &engine).unwrap();
        open_redirect(&lua, Redirect::Print).unwrap();
        assert!(lua.globals().get::<Function>("pcall").unwrap() != pcall);

        detach_lua(&lua, true).unwrap();
        assert!(lua.globals().get::<Function>("pcall").unwrap() == pcall);
        assert!(lua.globals().get::<Function>("print").unwrap() == print);
        assert!(lua.load("return coroutine.create").eval::<Function>().unwrap() == create);
        assert!(!engine.borrow().is_attached());
        assert!(engine.borrow().is_state(EngineState::Terminated));
        assert!(matches!(detach_lua(&lua, true), Err(DebuggerError::NotAttached)));
        assert!(matches!(attach_coroutine(&lua), Err(DebuggerError::NotAttached)));
    }

    #[test]
    fn test_detach_without_remove_unbinds_but_keeps_overrides()
    {
        let lua = debuggable();
        let pcall: Function = lua.globals().get("pcall").unwrap();
        let engine = Rc::new(RefCell::new(Debugger::new()));
        attach_lua(&lua, &engine).unwrap();

        detach_lua(&lua, false).unwrap();
        assert!(!engine.borrow().is_attached());
        assert!(engine.borrow().is_state(EngineState::Terminated));
        assert!(lua.globals().get::<Function>("pcall").unwrap() != pcall);
        assert!(matches!(detach_lua(&lua, false), Err(DebuggerError::NotAttached)));

        // The idle overrides still behave like the originals.
        lua.load("local ok, err = pcall(error, 'x')\nassert(not ok and err == 'x')")
            .exec()
            .unwrap();

        detach_lua(&lua, true).unwrap();
        assert!(lua.globals().get::<Function>("pcall").unwrap() == pcall);
        assert!(matches!(detach_lua(&lua, true), Err(DebuggerError::NotAttached)));
    }

    #[test]
    fn test_coroutine_bound_on_create_and_unbound_when_collected()
    {
        let (lua, engine) = attached();
        lua.load("co = coroutine.create(function() coroutine.yield() end)\ncoroutine.resume(co)")
            .exec()
            .unwrap();
        let co: Thread = lua.globals().get("co").unwrap();
        let key = thread_key(&co);
        assert!(engine.borrow().is_coroutine_attached(key).unwrap());

        drop(co);
        lua.globals().set("co", Value::Nil).unwrap();
        lua.gc_collect().unwrap();
        lua.gc_collect().unwrap();
        // The next hook event unbinds what the collector finalized.
        lua.load("local x = 1").exec().unwrap();
        assert!(!engine.borrow().is_coroutine_attached(key).unwrap());
    }

    #[test]
    fn test_wrap_behaves_like_the_original()
    {
        let (lua, engine) = attached();
        lua.load(
            "local g = coroutine.wrap(function(a)\n\
               local b = coroutine.yield(a + 1)\n\
               return b * 2\n\
             end)\n\
             assert(g(1) == 2)\n\
             assert(g(5) == 10)\n\
             local ok, err = pcall(g)\n\
             assert(not ok and err:find('dead coroutine'))\n\
             local h = coroutine.wrap(function() error('boom') end)\n\
             ok, err = pcall(h)\n\
             assert(not ok and err:find('boom'))",
        )
        .set_name("@wrap.lua")
        .exec()
        .unwrap();
        assert!(!engine.borrow().is_paused());
    }

    #[test]
    fn test_target_inspects_calling_frame()
    {
        let (lua, _engine) = attached();
        let helper = binding(&lua).unwrap().helper;
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let inspect = lua
            .create_function(move |lua, ()| {
                let mut target = LuaTarget::at_first_user_frame(lua, &helper);
                let mut sink = sink.borrow_mut();
                let stack = target.stack();
                sink.push(stack[0].name.clone());
                sink.push(stack[0].line.to_string());
                sink.push(target.evaluate(0, "a + b").map(|v| v.display).unwrap_or_default());
                let scopes = target.scopes(0).unwrap();
                for var in target.variables(scopes[0].handle).unwrap() {
                    sink.push(format!("{}={}", var.name, var.value));
                }
                target.clear_handles();
                sink.push(target.variables(scopes[0].handle).is_err().to_string());
                Ok(())
            })
            .unwrap();
        lua.globals().set("inspect", inspect).unwrap();

        lua.load("local function f(a)\n  local b = a * 2\n  local r = inspect()\n  return r\nend\nf(21)")
            .set_name("@inspect.lua")
            .exec()
            .unwrap();

        let seen = seen.borrow();
        assert_eq!(
            *seen,
            vec!["f", "3", "63", "a=21", "b=42", "true"]
                .into_iter()
                .map(str::to_string)
                .collect::<Vec<_>>()
        );
    }
}

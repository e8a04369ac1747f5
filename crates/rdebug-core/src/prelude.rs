//! Common module for library exports

pub use crate::breakpoints::{BreakpointSpec, BreakpointStore};
pub use crate::debugger::Debugger;
pub use crate::error::{DebuggerError, Result};
pub use crate::path::PathConvert;
pub use crate::target::{DebugTarget, EvalValue, FrameInfo, ScopeInfo, VariableInfo};
pub use crate::types::{
    ConsoleCoding, EngineState, ExceptionKind, HookEvent, HookKind, Redirect, StepKind, StopReason, ThreadKey, VmId,
};
#[cfg(feature = "lua")]
pub use crate::platform::lua::{attach_lua, detach_lua, init_internal_module, open_redirect, LuaTarget};

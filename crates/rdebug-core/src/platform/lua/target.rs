//! [`DebugTarget`] over a live Lua state.

use mlua::{Function, Lua, Table, Value};

use super::value::{display, is_truthy};
use crate::error::DebuggerError;
use crate::target::{DebugTarget, EvalValue, FrameInfo, ScopeInfo, VariableInfo};
use crate::types::ThreadKey;

/// Something a variables reference points at.
#[derive(Debug, Clone)]
enum Handle
{
    Locals(usize),
    Upvalues(usize),
    Table(Table),
}

/// Snapshot of the interpreter at one hook or interception point.
///
/// Levels are counted from the Rust caller (`0` is the hooked function).
/// `base` is the first level that belongs to user code.
pub struct LuaTarget<'lua>
{
    lua: &'lua Lua,
    helper: &'lua Table,
    base: usize,
    levels: Option<Vec<usize>>,
    handles: Vec<Handle>,
}

impl std::fmt::Debug for LuaTarget<'_>
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        f.debug_struct("LuaTarget")
            .field("base", &self.base)
            .field("handles", &self.handles.len())
            .finish_non_exhaustive()
    }
}

impl<'lua> LuaTarget<'lua>
{
    /// Target for a debug hook: the hooked function is level 0.
    #[must_use]
    pub const fn new(lua: &'lua Lua, helper: &'lua Table) -> Self
    {
        Self::with_base(lua, helper, 0)
    }

    /// Target whose user frames start at `base`.
    #[must_use]
    pub const fn with_base(lua: &'lua Lua, helper: &'lua Table, base: usize) -> Self
    {
        Self {
            lua,
            helper,
            base,
            levels: None,
            handles: Vec::new(),
        }
    }

    /// Target for code running inside a Rust callback: skips the callback
    /// itself, native frames and helper frames.
    pub fn at_first_user_frame(lua: &'lua Lua, helper: &'lua Table) -> Self
    {
        let base = call::<Option<usize>>(helper, "first_user", 0usize)
            .ok()
            .flatten()
            .unwrap_or(0);
        Self::with_base(lua, helper, base)
    }

    fn level(&mut self, frame: usize) -> Result<usize, String>
    {
        if self.levels.is_none() {
            self.stack();
        }
        self.levels
            .as_ref()
            .and_then(|levels| levels.get(frame).copied())
            .ok_or_else(|| DebuggerError::InvalidReference(i64::try_from(frame).unwrap_or(i64::MAX)).to_string())
    }

    fn register(&mut self, handle: Handle) -> u64
    {
        self.handles.push(handle);
        self.handles.len() as u64
    }

    fn describe(&mut self, name: String, value: &Value) -> VariableInfo
    {
        let handle = match value {
            Value::Table(table) => self.register(Handle::Table(table.clone())),
            _ => 0,
        };
        VariableInfo {
            name,
            value: display(value),
            type_name: value.type_name().to_string(),
            handle,
        }
    }

    fn frame_variables(&mut self, entry: &str, level: usize) -> Result<Vec<VariableInfo>, String>
    {
        let (names, values, count): (Table, Table, usize) =
            call(self.helper, entry, level).map_err(|e| e.to_string())?;
        let mut out = Vec::with_capacity(count);
        for i in 1..=count {
            let name: String = names.get(i).map_err(|e| e.to_string())?;
            let value: Value = values.get(i).map_err(|e| e.to_string())?;
            out.push(self.describe(name, &value));
        }
        Ok(out)
    }

    fn table_variables(&mut self, table: &Table) -> Vec<VariableInfo>
    {
        let mut entries: Vec<(String, Value)> = table
            .clone()
            .pairs::<Value, Value>()
            .filter_map(std::result::Result::ok)
            .map(|(key, value)| {
                let name = match &key {
                    Value::String(s) => s.to_string_lossy().to_string(),
                    other => format!("[{}]", display(other)),
                };
                (name, value)
            })
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
            .into_iter()
            .map(|(name, value)| self.describe(name, &value))
            .collect()
    }
}

impl DebugTarget for LuaTarget<'_>
{
    fn thread(&self) -> ThreadKey
    {
        ThreadKey::from_raw(self.lua.current_thread().to_pointer() as usize as u64)
    }

    fn depth(&mut self) -> usize
    {
        call(self.helper, "depth", self.base).unwrap_or(0)
    }

    fn stack(&mut self) -> Vec<FrameInfo>
    {
        let Ok(frames) = call::<Table>(self.helper, "frames", self.base) else {
            self.levels = Some(Vec::new());
            return Vec::new();
        };

        let mut levels = Vec::new();
        let mut out = Vec::new();
        for frame in frames.sequence_values::<Table>().filter_map(std::result::Result::ok) {
            let level: usize = frame.get("level").unwrap_or(0);
            let what: String = frame.get("what").unwrap_or_default();
            let name = frame
                .get::<Option<String>>("name")
                .ok()
                .flatten()
                .unwrap_or_else(|| match what.as_str() {
                    "main" => "main chunk".to_string(),
                    "C" => "[C]".to_string(),
                    _ => "?".to_string(),
                });
            let line: i64 = frame.get("line").unwrap_or(-1);
            levels.push(level);
            out.push(FrameInfo {
                name,
                source: frame.get::<Option<String>>("source").ok().flatten(),
                short_source: frame.get("short").unwrap_or_default(),
                line,
            });
        }
        self.levels = Some(levels);
        out
    }

    fn scopes(&mut self, level: usize) -> Result<Vec<ScopeInfo>, String>
    {
        let level = self.level(level)?;
        let locals = self.register(Handle::Locals(level));
        let upvalues = self.register(Handle::Upvalues(level));
        let globals = self.register(Handle::Table(self.lua.globals()));
        Ok(vec![
            ScopeInfo {
                name: "Locals".to_string(),
                handle: locals,
                expensive: false,
            },
            ScopeInfo {
                name: "Upvalues".to_string(),
                handle: upvalues,
                expensive: false,
            },
            ScopeInfo {
                name: "Globals".to_string(),
                handle: globals,
                expensive: true,
            },
        ])
    }

    fn variables(&mut self, handle: u64) -> Result<Vec<VariableInfo>, String>
    {
        let entry = usize::try_from(handle)
            .ok()
            .and_then(|h| h.checked_sub(1))
            .and_then(|index| self.handles.get(index).cloned())
            .ok_or_else(|| DebuggerError::InvalidReference(i64::try_from(handle).unwrap_or(i64::MAX)).to_string())?;
        match entry {
            Handle::Locals(level) => self.frame_variables("locals", level),
            Handle::Upvalues(level) => self.frame_variables("upvalues", level),
            Handle::Table(table) => Ok(self.table_variables(&table)),
        }
    }

    fn evaluate(&mut self, level: usize, expression: &str) -> Result<EvalValue, String>
    {
        let level = self.level(level)?;
        let (ok, value): (bool, Value) = call(self.helper, "eval", (level, expression)).map_err(|e| e.to_string())?;
        if !ok {
            let message = super::value::plain_text(&value).unwrap_or_else(|| display(&value));
            return Err(DebuggerError::Evaluation(message).to_string());
        }
        let handle = match &value {
            Value::Table(table) => self.register(Handle::Table(table.clone())),
            _ => 0,
        };
        Ok(EvalValue {
            display: display(&value),
            type_name: value.type_name().to_string(),
            truthy: is_truthy(&value),
            handle,
        })
    }

    fn clear_handles(&mut self)
    {
        self.handles.clear();
        self.levels = None;
    }
}

/// Call helper entry `name`.
pub(super) fn call<R: mlua::FromLuaMulti>(helper: &Table, name: &str, args: impl mlua::IntoLuaMulti) -> mlua::Result<R>
{
    helper.get::<Function>(name)?.call(args)
}

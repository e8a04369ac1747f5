//! Rendering Lua values for the client.

use mlua::Value;
use serde_json::{Map, Number};

/// Nesting limit when converting tables to JSON.
const MAX_JSON_DEPTH: usize = 16;

/// Display string for a value, Lua style.
#[must_use]
pub fn display(value: &Value) -> String
{
    match value {
        Value::Nil => "nil".to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Number(n) => format_number(*n),
        Value::String(s) => format!("{:?}", s.to_string_lossy()),
        other => format!("{}: {:p}", other.type_name(), other.to_pointer()),
    }
}

/// Truthiness under Lua's rules: everything but `nil` and `false`.
#[must_use]
pub const fn is_truthy(value: &Value) -> bool
{
    !matches!(value, Value::Nil | Value::Boolean(false))
}

/// Text `tostring` would produce for plain values; `None` for values that
/// need a metamethod-aware conversion.
#[must_use]
pub fn plain_text(value: &Value) -> Option<String>
{
    match value {
        Value::Nil => Some("nil".to_string()),
        Value::Boolean(b) => Some(b.to_string()),
        Value::Integer(i) => Some(i.to_string()),
        Value::Number(n) => Some(format_number(*n)),
        Value::String(s) => Some(s.to_string_lossy().to_string()),
        _ => None,
    }
}

/// Convert a value to JSON for custom event bodies.
///
/// Sequences become arrays, other tables objects with stringified keys.
/// Functions, threads and userdata become their display string.
#[must_use]
pub fn to_json(value: &Value) -> serde_json::Value
{
    to_json_at(value, 0)
}

fn to_json_at(value: &Value, depth: usize) -> serde_json::Value
{
    match value {
        Value::Nil => serde_json::Value::Null,
        Value::Boolean(b) => serde_json::Value::Bool(*b),
        Value::Integer(i) => serde_json::Value::from(*i),
        Value::Number(n) => Number::from_f64(*n).map_or(serde_json::Value::Null, serde_json::Value::Number),
        Value::String(s) => serde_json::Value::String(s.to_string_lossy().to_string()),
        Value::Table(table) if depth < MAX_JSON_DEPTH => {
            let len = table.raw_len();
            let mut entries = Vec::new();
            for pair in table.clone().pairs::<Value, Value>() {
                let Ok((key, item)) = pair else {
                    continue;
                };
                entries.push((key, item));
            }
            if len > 0 && entries.len() == len {
                let mut items = vec![serde_json::Value::Null; len];
                for (key, item) in &entries {
                    if let Value::Integer(i) = key {
                        if let Some(slot) = usize::try_from(*i).ok().and_then(|i| i.checked_sub(1)) {
                            if slot < len {
                                items[slot] = to_json_at(item, depth + 1);
                            }
                        }
                    }
                }
                serde_json::Value::Array(items)
            } else {
                let mut map = Map::new();
                for (key, item) in &entries {
                    let key = plain_text(key).unwrap_or_else(|| display(key));
                    map.insert(key, to_json_at(item, depth + 1));
                }
                serde_json::Value::Object(map)
            }
        }
        other => serde_json::Value::String(display(other)),
    }
}

fn format_number(n: f64) -> String
{
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e16 {
        format!("{n:.1}")
    } else {
        n.to_string()
    }
}

//! Value conversions between JSON and Lua.
//!
//! Parameters travel JSON → Lua on the way into a handler; return
//! values travel Lua → JSON on the way out. Numbers are split the way
//! action authors expect: integer-valued JSON numbers become Lua
//! integers, everything else becomes a float.

use mlua::{Lua, Value};
use serde_json::Value as JsonValue;

/// Converts a JSON value into a Lua value.
///
/// - string → string, bool → boolean, null → nil
/// - integer-valued number → integer, other number → float
/// - array → sequence table, object → table
///
/// # Errors
///
/// Returns an error if table or string allocation fails.
pub fn json_to_lua(lua: &Lua, value: &JsonValue) -> mlua::Result<Value> {
    match value {
        JsonValue::Null => Ok(Value::Nil),
        JsonValue::Bool(b) => Ok(Value::Boolean(*b)),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                return Ok(Value::Integer(i));
            }
            let f = n.as_f64().ok_or_else(|| {
                mlua::Error::RuntimeError(format!("unrepresentable number {n}"))
            })?;
            // 7.0 arrives as a float on the wire but is integer-valued.
            if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
                Ok(Value::Integer(f as i64))
            } else {
                Ok(Value::Number(f))
            }
        }
        JsonValue::String(s) => Ok(Value::String(lua.create_string(s)?)),
        JsonValue::Array(items) => {
            let table = lua.create_table_with_capacity(items.len(), 0)?;
            for (i, item) in items.iter().enumerate() {
                table.raw_set(i + 1, json_to_lua(lua, item)?)?;
            }
            Ok(Value::Table(table))
        }
        JsonValue::Object(map) => {
            let table = lua.create_table_with_capacity(0, map.len())?;
            for (key, item) in map {
                table.raw_set(key.as_str(), json_to_lua(lua, item)?)?;
            }
            Ok(Value::Table(table))
        }
    }
}

/// Converts a Lua value into JSON.
///
/// Tables with a non-zero sequence length become arrays, other tables
/// become objects with string keys.
///
/// # Errors
///
/// Returns an error for values with no JSON representation (functions,
/// userdata, threads, non-finite floats, non-string table keys).
pub fn lua_to_json(value: Value) -> mlua::Result<JsonValue> {
    match value {
        Value::Nil => Ok(JsonValue::Null),
        Value::Boolean(b) => Ok(JsonValue::Bool(b)),
        Value::Integer(i) => Ok(JsonValue::Number(i.into())),
        Value::Number(n) => serde_json::Number::from_f64(n)
            .map(JsonValue::Number)
            .ok_or_else(|| mlua::Error::runtime(format!("non-finite number {n}"))),
        Value::String(s) => Ok(JsonValue::String(s.to_str()?.to_string())),
        Value::Table(table) => {
            let len = table.raw_len();
            if len > 0 {
                let mut items = Vec::with_capacity(len);
                for i in 1..=len {
                    items.push(lua_to_json(table.raw_get(i)?)?);
                }
                Ok(JsonValue::Array(items))
            } else {
                let mut map = serde_json::Map::new();
                for pair in table.pairs::<String, Value>() {
                    let (key, item) = pair?;
                    map.insert(key, lua_to_json(item)?);
                }
                Ok(JsonValue::Object(map))
            }
        }
        other => Err(mlua::Error::runtime(format!(
            "cannot serialize {} value",
            other.type_name()
        ))),
    }
}

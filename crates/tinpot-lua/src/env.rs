//! Lua environment setup: the `tinpot` global and output capture.
//!
//! Built once per [`ActionManager`](crate::ActionManager). Scripts see:
//!
//! - `tinpot.action{...}` — registers an action into the shared
//!   registry (metadata host-side, handler in the Lua registry).
//! - `tinpot.log(level, msg)` — leveled log line to the current
//!   invocation's callback.
//! - `print` / `io.write` — rebound to the capture slot.
//! - `require` resolving against the actions directory
//!   (`{dir}/?.lua` and `{dir}/?/init.lua` are prepended to
//!   `package.path`).

use crate::capture::LogSlot;
use crate::error::ActionError;
use crate::manager::{ActionEntry, SharedRegistry};
use crate::marshal::lua_to_json;
use mlua::{Function, Lua, Table, Value, Variadic};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tinpot_protocol::{ActionInfo, LogLevel, ParameterSpec};
use tracing::warn;

/// Creates the interpreter with the Tinpot globals installed.
///
/// # Errors
///
/// Any failure here is an init failure: the worker cannot run without
/// its interpreter.
pub(crate) fn build(
    actions_dir: &Path,
    slot: Arc<LogSlot>,
    registry: SharedRegistry,
) -> Result<Lua, ActionError> {
    let lua = Lua::new();

    extend_package_path(&lua, actions_dir).map_err(|e| ActionError::Init(e.to_string()))?;
    install_capture(&lua, &slot).map_err(|e| ActionError::Init(e.to_string()))?;
    install_tinpot(&lua, &slot, registry).map_err(|e| ActionError::Init(e.to_string()))?;

    Ok(lua)
}

/// Prepends the actions directory to `package.path` so action scripts
/// can `require` co-located modules.
fn extend_package_path(lua: &Lua, actions_dir: &Path) -> mlua::Result<()> {
    let package: Table = lua.globals().get("package")?;
    let existing: String = package.get("path")?;
    let dir = actions_dir.display();
    package.set(
        "path",
        format!("{dir}/?.lua;{dir}/?/init.lua;{existing}"),
    )
}

/// Rebinds `print` and `io.write` to the capture slot.
fn install_capture(lua: &Lua, slot: &Arc<LogSlot>) -> mlua::Result<()> {
    let print_slot = Arc::clone(slot);
    let print_fn = lua.create_function(move |lua, args: Variadic<Value>| {
        let mut line = String::new();
        let tostring: Function = lua.globals().get("tostring")?;
        for (i, value) in args.iter().enumerate() {
            if i > 0 {
                line.push('\t');
            }
            let rendered: mlua::String = tostring.call(value.clone())?;
            line.push_str(&rendered.to_str()?);
        }
        line.push('\n');
        print_slot.write(&line);
        Ok(())
    })?;
    lua.globals().set("print", print_fn)?;

    let write_slot = Arc::clone(slot);
    let write_fn = lua.create_function(move |lua, args: Variadic<Value>| {
        let tostring: Function = lua.globals().get("tostring")?;
        for value in args.iter() {
            let rendered: mlua::String = tostring.call(value.clone())?;
            write_slot.write(&rendered.to_str()?);
        }
        Ok(())
    })?;
    let io_table: Table = lua.globals().get("io")?;
    io_table.set("write", write_fn)?;

    Ok(())
}

/// Installs the `tinpot` table with `action` and `log`.
fn install_tinpot(lua: &Lua, slot: &Arc<LogSlot>, registry: SharedRegistry) -> mlua::Result<()> {
    let tinpot = lua.create_table()?;

    let action_fn = lua.create_function(move |lua, spec: Table| {
        let (name, info, handler) = parse_registration(&spec)?;
        let key = lua.create_registry_value(handler)?;
        let replaced = registry
            .write()
            .insert(name.clone(), ActionEntry { info, handler: key });
        if replaced.is_some() {
            warn!(action = %name, "action re-registered, last definition wins");
        }
        Ok(())
    })?;
    tinpot.set("action", action_fn)?;

    let log_slot = Arc::clone(slot);
    let log_fn = lua.create_function(move |_, (level, message): (String, String)| {
        log_slot.emit_lines(parse_level(&level), &message);
        Ok(())
    })?;
    tinpot.set("log", log_fn)?;

    lua.globals().set("tinpot", tinpot)
}

fn parse_level(level: &str) -> LogLevel {
    match level.to_ascii_lowercase().as_str() {
        "warn" | "warning" => LogLevel::Warn,
        "error" => LogLevel::Error,
        _ => LogLevel::Info,
    }
}

/// Validates a `tinpot.action{...}` table.
///
/// `name` and `handler` are required; `group` defaults to `"General"`,
/// `description` to `""`. Parameter descriptors are
/// `name -> { type = "...", default = <literal> }`.
fn parse_registration(spec: &Table) -> mlua::Result<(String, ActionInfo, Function)> {
    let name: String = spec
        .get::<Option<String>>("name")?
        .filter(|n| !n.is_empty())
        .ok_or_else(|| {
            mlua::Error::RuntimeError("tinpot.action requires a non-empty 'name'".to_string())
        })?;

    let handler: Function = spec.get::<Option<Function>>("handler")?.ok_or_else(|| {
        mlua::Error::RuntimeError(format!("action '{name}' requires a 'handler' function"))
    })?;

    let description: String = spec.get::<Option<String>>("description")?.unwrap_or_default();
    let group: String = spec
        .get::<Option<String>>("group")?
        .unwrap_or_else(|| "General".to_string());

    let mut parameters = BTreeMap::new();
    if let Some(params) = spec.get::<Option<Table>>("parameters")? {
        for pair in params.pairs::<String, Table>() {
            let (param_name, descriptor) = pair.map_err(|e| {
                mlua::Error::RuntimeError(format!(
                    "action '{name}': bad parameter descriptor: {e}"
                ))
            })?;
            let type_name: String = descriptor
                .get::<Option<String>>("type")?
                .unwrap_or_else(|| "str".to_string());
            let default = match descriptor.get::<Value>("default") {
                Ok(value) => lua_to_json(value).map_err(|e| {
                    mlua::Error::RuntimeError(format!(
                        "action '{name}': default for '{param_name}' is not JSON-representable: {e}"
                    ))
                })?,
                Err(_) => serde_json::Value::Null,
            };
            parameters.insert(param_name, ParameterSpec::new(type_name, default));
        }
    }

    let info = ActionInfo {
        name: name.clone(),
        description,
        group,
        parameters,
    };
    Ok((name, info, handler))
}

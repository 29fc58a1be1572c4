//! The action manager: discovery, lookup, serialized invocation.

use crate::capture::{LogCallback, LogSlot};
use crate::error::ActionError;
use crate::marshal::{json_to_lua, lua_to_json};
use mlua::{Function, Lua, RegistryKey, Value};
use parking_lot::{Mutex, RwLock};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tinpot_protocol::{ActionInfo, LogLevel, ResultResponse};
use tracing::{info, warn};

/// A registered action: host-side metadata plus the handler parked in
/// the Lua registry.
pub(crate) struct ActionEntry {
    pub(crate) info: ActionInfo,
    pub(crate) handler: RegistryKey,
}

/// Registry shared between the manager and the `tinpot.action` global.
pub(crate) type SharedRegistry = Arc<RwLock<HashMap<String, ActionEntry>>>;

/// Outcome of scanning the actions directory.
///
/// Scripts that fail to load become warnings, not errors — one broken
/// script never takes the worker down.
#[derive(Debug, Default)]
pub struct DiscoveryReport {
    /// Names of all registered actions, sorted.
    pub actions: Vec<String>,
    /// Scripts (or the directory itself) that failed during discovery.
    pub warnings: Vec<DiscoveryWarning>,
}

/// One failed script load.
#[derive(Debug)]
pub struct DiscoveryWarning {
    /// Path that was being loaded.
    pub path: PathBuf,
    /// What went wrong.
    pub error: ActionError,
}

impl std::fmt::Display for DiscoveryWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.error)
    }
}

struct Inner {
    /// Execution lock. The interpreter is single-threaded; holding
    /// this for the whole invocation is the serialization discipline.
    lua: Mutex<Lua>,
    actions: SharedRegistry,
    slot: Arc<LogSlot>,
}

/// Owns the embedded interpreter and the actions discovered in a
/// directory.
///
/// Cloning is cheap and shares the single interpreter.
#[derive(Clone)]
pub struct ActionManager {
    inner: Arc<Inner>,
}

impl ActionManager {
    /// Builds the interpreter, installs the Tinpot globals, and runs
    /// discovery over `actions_dir`.
    ///
    /// # Errors
    ///
    /// Only interpreter setup can fail here; per-script failures are
    /// reported as warnings in the [`DiscoveryReport`].
    pub fn new(actions_dir: impl AsRef<Path>) -> Result<(Self, DiscoveryReport), ActionError> {
        let actions_dir = actions_dir.as_ref();
        let slot = Arc::new(LogSlot::new());
        let actions: SharedRegistry = Arc::new(RwLock::new(HashMap::new()));

        let lua = crate::env::build(actions_dir, Arc::clone(&slot), Arc::clone(&actions))?;
        let report = discover(&lua, actions_dir, &actions);

        for warning in &report.warnings {
            warn!(
                script = %warning.path.display(),
                error = %warning.error,
                "failed to load action script"
            );
        }
        info!(count = report.actions.len(), "actions discovered");

        let manager = Self {
            inner: Arc::new(Inner {
                lua: Mutex::new(lua),
                actions,
                slot,
            }),
        };
        Ok((manager, report))
    }

    /// Returns metadata for every registered action.
    #[must_use]
    pub fn list_actions(&self) -> HashMap<String, ActionInfo> {
        self.inner
            .actions
            .read()
            .iter()
            .map(|(name, entry)| (name.clone(), entry.info.clone()))
            .collect()
    }

    /// Returns a trigger for `name`, or `None` if unknown.
    #[must_use]
    pub fn get_action(&self, name: &str) -> Option<Trigger> {
        if !self.inner.actions.read().contains_key(name) {
            return None;
        }
        Some(Trigger {
            inner: Arc::clone(&self.inner),
            name: name.to_string(),
        })
    }
}

/// Callable handle for one action.
///
/// [`invoke`](Self::invoke) blocks the calling thread for the duration
/// of the action; run it under `spawn_blocking` from async code.
#[derive(Clone)]
pub struct Trigger {
    inner: Arc<Inner>,
    name: String,
}

impl Trigger {
    /// Returns the action name this trigger dispatches to.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Runs the action and delivers exactly one result via `on_result`.
    ///
    /// Log lines stream through `on_log` while the handler runs; they
    /// all precede the result callback. Parameter names starting with
    /// `_` are host-internal and never reach the handler. A host-side
    /// panic is caught and reported as a failure result.
    pub fn invoke<F>(
        &self,
        parameters: &BTreeMap<String, JsonValue>,
        on_result: F,
        on_log: LogCallback,
    ) where
        F: FnOnce(ResultResponse),
    {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.run(parameters, on_log)));
        let result = outcome.unwrap_or_else(|payload| {
            ResultResponse::failure(format!("panic: {}", panic_message(&*payload)))
        });
        on_result(result);
    }

    fn run(&self, parameters: &BTreeMap<String, JsonValue>, on_log: LogCallback) -> ResultResponse {
        let inner = &self.inner;

        // Serialization point: one invocation in the interpreter at a
        // time, capture slot swapped only while the lock is held.
        let lua = inner.lua.lock();

        let handler: Function = {
            let actions = inner.actions.read();
            let Some(entry) = actions.get(&self.name) else {
                return ResultResponse::failure(
                    ActionError::UnknownAction(self.name.clone()).to_string(),
                );
            };
            match lua.registry_value(&entry.handler) {
                Ok(f) => f,
                Err(e) => {
                    return ResultResponse::failure(format!("handler unavailable: {e}"));
                }
            }
        };

        inner.slot.install(on_log);
        let guard = CaptureGuard(&inner.slot);
        let result = call_handler(&lua, &handler, parameters, &inner.slot);
        drop(guard);
        result
    }
}

/// Clears the capture slot at invocation exit, including on unwind.
struct CaptureGuard<'a>(&'a LogSlot);

impl Drop for CaptureGuard<'_> {
    fn drop(&mut self) {
        self.0.clear();
    }
}

fn call_handler(
    lua: &Lua,
    handler: &Function,
    parameters: &BTreeMap<String, JsonValue>,
    slot: &LogSlot,
) -> ResultResponse {
    let table = match lua.create_table() {
        Ok(t) => t,
        Err(e) => return ResultResponse::failure(format!("Marshal error: {e}")),
    };
    for (name, value) in parameters {
        if name.starts_with('_') {
            continue;
        }
        let lua_value = match json_to_lua(lua, value) {
            Ok(v) => v,
            Err(e) => return ResultResponse::failure(format!("Marshal error: {e}")),
        };
        if let Err(e) = table.raw_set(name.as_str(), lua_value) {
            return ResultResponse::failure(format!("Marshal error: {e}"));
        }
    }

    match handler.call::<Value>(Value::Table(table)) {
        Ok(value) => match lua_to_json(value) {
            Ok(json) => ResultResponse::success(json),
            Err(e) => {
                slot.emit(
                    LogLevel::Info,
                    &format!("result value dropped, not JSON-serializable: {e}"),
                );
                ResultResponse::success(JsonValue::Null)
            }
        },
        Err(e) => {
            let text = e.to_string();
            slot.emit_lines(LogLevel::Error, &text);
            let first_line = text.lines().next().unwrap_or("lua error").to_string();
            ResultResponse::failure(first_line)
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Executes every action script under `dir`.
///
/// Picks up `{dir}/*.lua` plus `{dir}/{name}/init.lua` directory
/// scripts, in sorted order for deterministic registration.
fn discover(lua: &Lua, dir: &Path, registry: &SharedRegistry) -> DiscoveryReport {
    let mut report = DiscoveryReport::default();

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            report.warnings.push(DiscoveryWarning {
                path: dir.to_path_buf(),
                error: ActionError::ActionsDir(e.to_string()),
            });
            return report;
        }
    };

    let mut scripts: Vec<PathBuf> = entries
        .flatten()
        .filter_map(|entry| {
            let path = entry.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "lua") {
                Some(path)
            } else if path.is_dir() && path.join("init.lua").is_file() {
                Some(path.join("init.lua"))
            } else {
                None
            }
        })
        .collect();
    scripts.sort();

    for path in scripts {
        let source = match std::fs::read_to_string(&path) {
            Ok(source) => source,
            Err(e) => {
                report.warnings.push(DiscoveryWarning {
                    path,
                    error: ActionError::ActionsDir(e.to_string()),
                });
                continue;
            }
        };
        let chunk = lua.load(&source).set_name(format!("@{}", path.display()));
        if let Err(e) = chunk.exec() {
            report.warnings.push(DiscoveryWarning {
                path,
                error: ActionError::Runtime(e),
            });
        }
    }

    report.actions = {
        let mut names: Vec<String> = registry.read().keys().cloned().collect();
        names.sort();
        names
    };
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn write_script(dir: &TempDir, file: &str, body: &str) {
        std::fs::write(dir.path().join(file), body).expect("write script");
    }

    fn manager_with(scripts: &[(&str, &str)]) -> (ActionManager, DiscoveryReport, TempDir) {
        let dir = TempDir::new().expect("tempdir");
        for (file, body) in scripts {
            write_script(&dir, file, body);
        }
        let (manager, report) = ActionManager::new(dir.path()).expect("manager");
        (manager, report, dir)
    }

    /// Runs `name` to completion and returns the result plus captured
    /// log lines.
    fn run_action(
        manager: &ActionManager,
        name: &str,
        parameters: BTreeMap<String, JsonValue>,
    ) -> (ResultResponse, Vec<(LogLevel, String)>) {
        let trigger = manager.get_action(name).expect("action exists");
        let logs = Arc::new(PlMutex::new(Vec::new()));
        let result = Arc::new(PlMutex::new(None));

        let sink = Arc::clone(&logs);
        let slot = Arc::clone(&result);
        trigger.invoke(
            &parameters,
            move |res| *slot.lock() = Some(res),
            Arc::new(move |level, message: &str| {
                sink.lock().push((level, message.to_string()));
            }),
        );

        let res = result.lock().take().expect("result delivered");
        let lines = logs.lock().clone();
        (res, lines)
    }

    const ECHO_SCRIPT: &str = r#"
        tinpot.action{
            name = "echo",
            group = "Test",
            description = "Echo parameters back",
            parameters = {
                value = { type = "str", default = "hi" },
            },
            handler = function(params)
                return { value = params.value }
            end,
        }
    "#;

    #[test]
    fn discovery_registers_actions_with_metadata() {
        let (manager, report, _dir) = manager_with(&[("echo.lua", ECHO_SCRIPT)]);

        assert_eq!(report.actions, vec!["echo".to_string()]);
        assert!(report.warnings.is_empty());

        let actions = manager.list_actions();
        let info = &actions["echo"];
        assert_eq!(info.group, "Test");
        assert_eq!(info.description, "Echo parameters back");
        assert_eq!(info.parameters["value"].type_name, "str");
        assert_eq!(info.parameters["value"].default, json!("hi"));
    }

    #[test]
    fn broken_script_is_skipped_not_fatal() {
        let (manager, report, _dir) = manager_with(&[
            ("broken.lua", "this is not lua ("),
            ("echo.lua", ECHO_SCRIPT),
        ]);

        assert_eq!(report.actions, vec!["echo".to_string()]);
        assert_eq!(report.warnings.len(), 1);
        assert!(matches!(
            report.warnings[0].error,
            ActionError::Runtime(_)
        ));
        assert!(report.warnings[0].path.ends_with("broken.lua"));
        assert!(manager.get_action("echo").is_some());
    }

    #[test]
    fn directory_scripts_load_via_init_lua() {
        let dir = TempDir::new().expect("tempdir");
        let sub = dir.path().join("greet");
        std::fs::create_dir_all(&sub).expect("mkdir");
        std::fs::write(
            sub.join("init.lua"),
            r#"
            tinpot.action{
                name = "greet",
                handler = function(params) return { msg = "hello" } end,
            }
            "#,
        )
        .expect("write init.lua");

        let (manager, report) = ActionManager::new(dir.path()).expect("manager");
        assert_eq!(report.actions, vec!["greet".to_string()]);
        assert!(manager.get_action("greet").is_some());
    }

    #[test]
    fn missing_actions_dir_is_a_warning() {
        let dir = TempDir::new().expect("tempdir");
        let missing = dir.path().join("nope");
        let (manager, report) = ActionManager::new(&missing).expect("manager");
        assert!(report.actions.is_empty());
        assert_eq!(report.warnings.len(), 1);
        assert!(matches!(
            report.warnings[0].error,
            ActionError::ActionsDir(_)
        ));
        assert!(manager.list_actions().is_empty());
    }

    #[test]
    fn duplicate_registration_last_wins() {
        let script = r#"
            tinpot.action{ name = "dup", handler = function() return { v = 1 } end }
            tinpot.action{ name = "dup", handler = function() return { v = 2 } end }
        "#;
        let (manager, _, _dir) = manager_with(&[("dup.lua", script)]);

        let (result, _) = run_action(&manager, "dup", BTreeMap::new());
        assert_eq!(result.result, json!({ "v": 2 }));
    }

    #[test]
    fn registration_without_handler_fails_the_script() {
        let (manager, report, _dir) =
            manager_with(&[("bad.lua", r#"tinpot.action{ name = "bad" }"#)]);
        assert!(report.actions.is_empty());
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].error.to_string().contains("handler"));
        assert!(manager.get_action("bad").is_none());
    }

    #[test]
    fn unknown_action_lookup_returns_none() {
        let (manager, _, _dir) = manager_with(&[("echo.lua", ECHO_SCRIPT)]);
        assert!(manager.get_action("does_not_exist").is_none());
    }

    #[test]
    fn invoking_a_never_registered_name_fails_cleanly() {
        let (manager, _, _dir) = manager_with(&[("echo.lua", ECHO_SCRIPT)]);

        // A trigger whose name does not resolve must fail, not panic.
        let trigger = Trigger {
            inner: Arc::clone(&manager.inner),
            name: "ghost".to_string(),
        };
        let result = Arc::new(PlMutex::new(None));
        let slot = Arc::clone(&result);
        trigger.invoke(
            &BTreeMap::new(),
            move |res| *slot.lock() = Some(res),
            Arc::new(|_, _| {}),
        );

        let res = result.lock().take().expect("result delivered");
        assert!(!res.status.is_success());
        assert!(res.error.contains("unknown action: ghost"));
    }

    #[test]
    fn discovery_warning_display_names_the_script() {
        let warning = DiscoveryWarning {
            path: PathBuf::from("/srv/actions/bad.lua"),
            error: ActionError::ActionsDir("permission denied".into()),
        };
        let rendered = warning.to_string();
        assert!(rendered.contains("/srv/actions/bad.lua"));
        assert!(rendered.contains("permission denied"));
    }

    #[test]
    fn parameters_round_trip_through_the_handler() {
        let script = r#"
            tinpot.action{
                name = "inspect",
                handler = function(params)
                    return {
                        days = params.days,
                        rate = params.rate,
                        flag = params.flag,
                        first = params.hosts[1],
                        nested = params.opts.inner,
                    }
                end,
            }
        "#;
        let (manager, _, _dir) = manager_with(&[("inspect.lua", script)]);

        let mut params = BTreeMap::new();
        params.insert("days".to_string(), json!(5));
        params.insert("rate".to_string(), json!(0.5));
        params.insert("flag".to_string(), json!(true));
        params.insert("hosts".to_string(), json!(["alpha", "beta"]));
        params.insert("opts".to_string(), json!({ "inner": "deep" }));

        let (result, _) = run_action(&manager, "inspect", params);
        assert!(result.status.is_success());
        assert_eq!(
            result.result,
            json!({
                "days": 5,
                "rate": 0.5,
                "flag": true,
                "first": "alpha",
                "nested": "deep",
            })
        );
    }

    #[test]
    fn reserved_parameters_never_reach_the_handler() {
        let script = r#"
            tinpot.action{
                name = "peek",
                handler = function(params)
                    return { saw_internal = params._execution_id ~= nil }
                end,
            }
        "#;
        let (manager, _, _dir) = manager_with(&[("peek.lua", script)]);

        let mut params = BTreeMap::new();
        params.insert("_execution_id".to_string(), json!("abc"));
        let (result, _) = run_action(&manager, "peek", params);
        assert_eq!(result.result, json!({ "saw_internal": false }));
    }

    #[test]
    fn print_output_is_captured_line_by_line() {
        let script = r#"
            tinpot.action{
                name = "noisy",
                handler = function(params)
                    print("first line")
                    io.write("second ")
                    io.write("line\n")
                    print("a", "b")
                    return {}
                end,
            }
        "#;
        let (manager, _, _dir) = manager_with(&[("noisy.lua", script)]);

        let (result, logs) = run_action(&manager, "noisy", BTreeMap::new());
        assert!(result.status.is_success());
        let messages: Vec<&str> = logs.iter().map(|(_, m)| m.as_str()).collect();
        assert_eq!(messages, vec!["first line", "second line", "a\tb"]);
        assert!(logs.iter().all(|(level, _)| *level == LogLevel::Info));
    }

    #[test]
    fn tinpot_log_carries_levels() {
        let script = r#"
            tinpot.action{
                name = "leveled",
                handler = function(params)
                    tinpot.log("info", "fine")
                    tinpot.log("warn", "careful")
                    tinpot.log("error", "bad")
                    return {}
                end,
            }
        "#;
        let (manager, _, _dir) = manager_with(&[("leveled.lua", script)]);

        let (_, logs) = run_action(&manager, "leveled", BTreeMap::new());
        let levels: Vec<LogLevel> = logs.iter().map(|(level, _)| *level).collect();
        assert_eq!(levels, vec![LogLevel::Info, LogLevel::Warn, LogLevel::Error]);
    }

    #[test]
    fn raising_handler_yields_failure_with_error_logs() {
        let script = r#"
            tinpot.action{
                name = "boom",
                handler = function(params)
                    print("about to fail")
                    error("deliberate failure")
                end,
            }
        "#;
        let (manager, _, _dir) = manager_with(&[("boom.lua", script)]);

        let (result, logs) = run_action(&manager, "boom", BTreeMap::new());
        assert!(!result.status.is_success());
        assert!(result.error.contains("deliberate failure"));
        assert_eq!(result.result, JsonValue::Null);
        // print line first, then at least one ERROR line for the raise
        assert_eq!(logs[0], (LogLevel::Info, "about to fail".to_string()));
        assert!(logs.iter().any(|(level, _)| *level == LogLevel::Error));
    }

    #[test]
    fn non_serializable_return_becomes_null_success() {
        let script = r#"
            tinpot.action{
                name = "weird",
                handler = function(params)
                    return function() end
                end,
            }
        "#;
        let (manager, _, _dir) = manager_with(&[("weird.lua", script)]);

        let (result, logs) = run_action(&manager, "weird", BTreeMap::new());
        assert!(result.status.is_success());
        assert_eq!(result.result, JsonValue::Null);
        assert!(logs.iter().any(|(_, m)| m.contains("not JSON-serializable")));
    }

    #[test]
    fn nil_return_is_null_success() {
        let script = r#"
            tinpot.action{
                name = "quiet",
                handler = function(params) end,
            }
        "#;
        let (manager, _, _dir) = manager_with(&[("quiet.lua", script)]);

        let (result, _) = run_action(&manager, "quiet", BTreeMap::new());
        assert!(result.status.is_success());
        assert_eq!(result.result, JsonValue::Null);
    }

    #[test]
    fn concurrent_invocations_are_serialized() {
        // The handler trips if it ever observes itself running twice;
        // shared interpreter state makes any overlap visible.
        let script = r#"
            active = 0
            tinpot.action{
                name = "guarded",
                handler = function(params)
                    active = active + 1
                    if active > 1 then
                        error("overlapping invocation observed")
                    end
                    local x = 0
                    for i = 1, 100000 do x = x + i end
                    active = active - 1
                    return { sum = x }
                end,
            }
        "#;
        let (manager, _, _dir) = manager_with(&[("guarded.lua", script)]);

        let mut handles = Vec::new();
        for _ in 0..4 {
            let manager = manager.clone();
            handles.push(std::thread::spawn(move || {
                let trigger = manager.get_action("guarded").expect("action");
                let result = Arc::new(PlMutex::new(None));
                let slot = Arc::clone(&result);
                trigger.invoke(
                    &BTreeMap::new(),
                    move |res| *slot.lock() = Some(res),
                    Arc::new(|_, _| {}),
                );
                let res = result.lock().take().expect("result");
                res
            }));
        }

        for handle in handles {
            let result = handle.join().expect("thread");
            assert!(
                result.status.is_success(),
                "overlap detected: {}",
                result.error
            );
        }
    }

    #[test]
    fn require_resolves_against_the_actions_dir() {
        let dir = TempDir::new().expect("tempdir");
        std::fs::write(
            dir.path().join("helper.lua"),
            r#"
            local M = {}
            function M.double(n) return n * 2 end
            return M
            "#,
        )
        .expect("write helper");
        // helper.lua registers nothing; discovery runs it harmlessly.
        std::fs::write(
            dir.path().join("uses_helper.lua"),
            r#"
            local helper = require("helper")
            tinpot.action{
                name = "doubled",
                handler = function(params)
                    return { value = helper.double(21) }
                end,
            }
            "#,
        )
        .expect("write action");

        let (manager, report) = ActionManager::new(dir.path()).expect("manager");
        assert_eq!(report.actions, vec!["doubled".to_string()]);

        let trigger = manager.get_action("doubled").expect("action");
        let result = Arc::new(PlMutex::new(None));
        let slot = Arc::clone(&result);
        trigger.invoke(
            &BTreeMap::new(),
            move |res| *slot.lock() = Some(res),
            Arc::new(|_, _| {}),
        );
        let res = result.lock().take().expect("result");
        assert_eq!(res.result, json!({ "value": 42 }));
    }
}

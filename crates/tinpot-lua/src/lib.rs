//! Embedded Lua action runtime for Tinpot workers.
//!
//! One [`ActionManager`] owns one Lua interpreter. At startup it scans
//! an actions directory, executes every script it finds, and collects
//! the actions those scripts register. At runtime it serializes all
//! invocations against the single interpreter and captures everything
//! the action prints back into per-invocation log callbacks.
//!
//! # Script Format
//!
//! Action scripts call `tinpot.action{...}` once per action they
//! expose:
//!
//! ```lua
//! tinpot.action{
//!     name = "clean_cache",
//!     group = "Maintenance",
//!     description = "Clean up temporary files older than specified days",
//!     parameters = {
//!         days = { type = "int", default = 7 },
//!     },
//!     handler = function(params)
//!         print("cleaning files older than " .. params.days .. " days")
//!         return { files_deleted = 42 }
//!     end,
//! }
//! ```
//!
//! Inside a handler:
//!
//! - `print(...)` and `io.write(...)` are captured line by line and
//!   forwarded to the invocation's log callback at `INFO`.
//! - `tinpot.log(level, msg)` emits a log line at an explicit level
//!   (`"info"`, `"warn"`, `"error"`).
//! - The return value must convert to JSON; a value that does not
//!   (functions, userdata) yields a `SUCCESS` result with `null` and a
//!   log line noting the dropped value.
//! - A raised error yields a `FAILURE` result; the traceback is
//!   emitted as `ERROR` log lines before the result is delivered.
//!
//! # Concurrency
//!
//! The interpreter is single-threaded; the manager guards it with one
//! mutex held for the whole invocation (logs stream live, results
//! arrive sequentially). [`Trigger::invoke`] may be called from any
//! thread — concurrent callers queue on the mutex.

mod capture;
mod env;
mod error;
mod manager;
mod marshal;

pub use capture::{LogCallback, LogSlot};
pub use error::ActionError;
pub use manager::{ActionManager, DiscoveryReport, DiscoveryWarning, Trigger};
pub use marshal::{json_to_lua, lua_to_json};

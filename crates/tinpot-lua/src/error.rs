//! Errors for the Lua action runtime.

use thiserror::Error;
use tinpot_protocol::ErrorCode;

/// Action runtime error.
#[derive(Debug, Error)]
pub enum ActionError {
    /// Lua runtime error.
    #[error("lua error: {0}")]
    Runtime(#[from] mlua::Error),

    /// Interpreter environment setup failed. Fatal: the worker cannot
    /// run without its interpreter.
    #[error("interpreter init failed: {0}")]
    Init(String),

    /// The actions directory, or a script in it, could not be read.
    #[error("read failed: {0}")]
    ActionsDir(String),

    /// No action registered under the requested name.
    #[error("unknown action: {0}")]
    UnknownAction(String),
}

impl ErrorCode for ActionError {
    fn code(&self) -> &'static str {
        match self {
            Self::Runtime(_) => "ACTION_LUA_RUNTIME",
            Self::Init(_) => "ACTION_INIT_FAILED",
            Self::ActionsDir(_) => "ACTION_DIR_UNREADABLE",
            Self::UnknownAction(_) => "ACTION_UNKNOWN",
        }
    }

    fn is_recoverable(&self) -> bool {
        // A runtime error is specific to one invocation; the
        // interpreter stays usable for the next one.
        matches!(self, Self::Runtime(_))
    }
}

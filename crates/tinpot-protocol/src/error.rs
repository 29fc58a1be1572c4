//! Unified error interface for Tinpot crates.
//!
//! Every public error enum in the workspace implements [`ErrorCode`] so
//! that dispatch code and HTTP handlers can branch on a stable code
//! instead of matching display strings.

/// Unified error code interface.
///
/// # Code Format
///
/// - **UPPER_SNAKE_CASE**, e.g. `"BROKER_TIMEOUT"`
/// - **Layer-prefixed**: `BROKER_`, `ACTION_`, `DISPATCH_`
/// - **Stable**: codes are part of the API contract and never change
///
/// # Recoverability
///
/// Recoverable means a retry may succeed (transient broker trouble,
/// ack timeouts). Malformed payloads and unknown names are not
/// recoverable; retrying the same input cannot help.
///
/// # Example
///
/// ```
/// use tinpot_protocol::ErrorCode;
///
/// #[derive(Debug)]
/// enum DemoError {
///     NotFound(String),
///     Timeout,
/// }
///
/// impl ErrorCode for DemoError {
///     fn code(&self) -> &'static str {
///         match self {
///             Self::NotFound(_) => "DEMO_NOT_FOUND",
///             Self::Timeout => "DEMO_TIMEOUT",
///         }
///     }
///
///     fn is_recoverable(&self) -> bool {
///         matches!(self, Self::Timeout)
///     }
/// }
///
/// assert_eq!(DemoError::Timeout.code(), "DEMO_TIMEOUT");
/// assert!(DemoError::Timeout.is_recoverable());
/// ```
pub trait ErrorCode {
    /// Returns the machine-readable error code.
    fn code(&self) -> &'static str;

    /// Returns whether retrying the operation may succeed.
    fn is_recoverable(&self) -> bool;
}

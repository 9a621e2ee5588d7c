//! Error types for the preview engine

use thiserror::Error;

/// The sandbox environment could not boot.
///
/// Cloneable because a single boot attempt is shared by every caller that
/// raced on it.
#[derive(Debug, Clone, Error)]
pub enum InitError {
    /// A required executable is not on PATH
    #[error("Required tool not found: {tool}")]
    ToolchainMissing { tool: String },

    /// The private file tree could not be created
    #[error("Failed to create sandbox workspace: {0}")]
    Workspace(String),

    /// The environment is not available on this host
    #[error("Sandbox unavailable: {0}")]
    Unavailable(String),
}

/// A booted session failed to serve a bundle.
///
/// Terminal for the session: callers never retry on the same session.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to write manifest: {0}")]
    Manifest(#[from] serde_json::Error),

    #[error("Failed to spawn {step}: {message}")]
    Spawn { step: &'static str, message: String },

    #[error("Install step exited with status {code:?}")]
    InstallFailed { code: Option<i32> },

    #[error("Install step did not finish within {secs}s")]
    InstallTimeout { secs: u64 },

    #[error("Server process exited before becoming ready (status {code:?})")]
    ServerExited { code: Option<i32> },

    #[error("Server did not become ready within {secs}s")]
    ReadyTimeout { secs: u64 },

    #[error("Server announced ready but is not serving: {0}")]
    NotServing(String),

    #[error("Session has been torn down")]
    SessionClosed,
}

/// An upstream bundle payload violated its contract.
#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("Bundle is missing field '{0}'")]
    MissingField(&'static str),

    #[error("Bundle field '{field}' must be {expected}")]
    InvalidField {
        field: &'static str,
        expected: &'static str,
    },

    #[error("Unknown framework: {0}")]
    UnknownFramework(String),

    #[error("Completed generation carried no bundle")]
    EmptyPayload,

    #[error("Malformed bundle: {0}")]
    Malformed(String),
}

/// Errors surfaced by the preview controller
#[derive(Debug, Error)]
pub enum PreviewError {
    #[error("Assembly error: {0}")]
    Assembly(#[from] AssemblyError),

    #[error("No preview URL: not running in sandboxed mode")]
    NotSandboxed,

    #[error("Preview controller has been disposed")]
    Disposed,

    #[error("Failed to open preview externally: {0}")]
    Open(String),
}

/// Configuration load/save errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read or write config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(serde_json::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(serde_json::Error),
}

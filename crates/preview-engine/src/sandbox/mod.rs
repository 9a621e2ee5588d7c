//! Sandboxed execution of assembled bundles
//!
//! A [`SandboxExecutor`] boots an isolated environment once and hands back an
//! [`ExecutorSession`]. The session owns a private file tree and a server
//! process; every mount rewrites the tree and resolves a preview URL.

pub mod manifest;
pub mod node;
mod ready;

use std::sync::Arc;

use async_trait::async_trait;

use crate::assembler::FullDocument;
use crate::error::{ExecError, InitError};
use crate::types::{CodeBundle, ServerReady};

pub use manifest::ServerManifest;
pub use node::{NodeSandbox, NodeSession};
pub use ready::parse_ready_line;

/// Boots sandboxed execution environments
#[async_trait]
pub trait SandboxExecutor: Send + Sync {
    /// Human-readable name for logs and status display
    fn name(&self) -> &'static str;

    /// Boot a fresh environment.
    ///
    /// Callers boot at most once per preview lifetime; a failure here means
    /// the capability is unavailable and is never retried.
    async fn start(&self) -> Result<Arc<dyn ExecutorSession>, InitError>;
}

/// A live sandboxed environment
#[async_trait]
pub trait ExecutorSession: Send + Sync {
    /// Unique session identifier
    fn id(&self) -> &str;

    /// Write `document` and a server manifest into the session's file tree,
    /// install, start the static server and wait until it is listening.
    ///
    /// The URL of the previous mount keeps serving until the new one is
    /// ready. Any error is terminal for the session.
    async fn mount_and_serve(
        &self,
        document: &FullDocument,
        bundle: &CodeBundle,
    ) -> Result<ServerReady, ExecError>;

    /// Stop the server process and release the file tree
    async fn teardown(&self);
}

/// Executor for hosts that cannot or will not run a sandbox.
///
/// Every boot fails, so previews go straight to fallback rendering.
#[derive(Debug, Clone)]
pub struct DisabledSandbox {
    reason: String,
}

impl DisabledSandbox {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl SandboxExecutor for DisabledSandbox {
    fn name(&self) -> &'static str {
        "disabled"
    }

    async fn start(&self) -> Result<Arc<dyn ExecutorSession>, InitError> {
        Err(InitError::Unavailable(self.reason.clone()))
    }
}

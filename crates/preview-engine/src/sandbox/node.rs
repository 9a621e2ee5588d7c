//! Node-backed sandbox
//!
//! Each session gets a private temporary directory. A mount writes the
//! assembled document and a generated `package.json` into it, runs
//! `npm install`, then launches the static server through `npm run start`
//! and waits for it to announce a local URL.

use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::mpsc;

use super::manifest::ServerManifest;
use super::ready::parse_ready_line;
use super::{ExecutorSession, SandboxExecutor};
use crate::assembler::FullDocument;
use crate::config::SandboxConfig;
use crate::constants::{files, timeouts};
use crate::error::{ExecError, InitError};
use crate::process::{ProcessEvent, ProcessHandle, ProcessSpawner};
use crate::types::{CodeBundle, ServerReady};

/// Boots Node sessions through a [`ProcessSpawner`]
pub struct NodeSandbox {
    config: SandboxConfig,
    spawner: Arc<dyn ProcessSpawner>,
}

impl NodeSandbox {
    pub fn new(config: SandboxConfig, spawner: Arc<dyn ProcessSpawner>) -> Self {
        Self { config, spawner }
    }
}

fn resolve_tool(command: &str) -> Result<PathBuf, InitError> {
    which::which(command).map_err(|_| InitError::ToolchainMissing {
        tool: command.to_string(),
    })
}

#[async_trait]
impl SandboxExecutor for NodeSandbox {
    fn name(&self) -> &'static str {
        "node"
    }

    async fn start(&self) -> Result<Arc<dyn ExecutorSession>, InitError> {
        let node = resolve_tool(&self.config.node_command)?;
        let npm = resolve_tool(&self.config.npm_command)?;
        log::info!("Booting node sandbox (node: {:?}, npm: {:?})", node, npm);

        let session = NodeSession::create(
            self.config.clone(),
            self.spawner.clone(),
            npm.to_string_lossy().to_string(),
            Duration::from_secs(self.config.ready_timeout_secs),
        )?;
        log::info!("Sandbox session {} rooted at {:?}", session.id, session.root);
        Ok(Arc::new(session))
    }
}

/// A booted Node environment with its own file tree
pub struct NodeSession {
    id: String,
    config: SandboxConfig,
    spawner: Arc<dyn ProcessSpawner>,
    npm: String,
    ready_timeout: Duration,
    root: PathBuf,
    workspace: Mutex<Option<TempDir>>,
    server: Mutex<Option<Box<dyn ProcessHandle>>>,
    /// Serializes mounts: one in flight per session
    mount_lock: tokio::sync::Mutex<()>,
    closed: AtomicBool,
}

impl NodeSession {
    pub(crate) fn create(
        config: SandboxConfig,
        spawner: Arc<dyn ProcessSpawner>,
        npm: String,
        ready_timeout: Duration,
    ) -> Result<Self, InitError> {
        let workspace = tempfile::Builder::new()
            .prefix(files::SESSION_DIR_PREFIX)
            .tempdir()
            .map_err(|e| InitError::Workspace(e.to_string()))?;

        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            config,
            spawner,
            npm,
            ready_timeout,
            root: workspace.path().to_path_buf(),
            workspace: Mutex::new(Some(workspace)),
            server: Mutex::new(None),
            mount_lock: tokio::sync::Mutex::new(()),
            closed: AtomicBool::new(false),
        })
    }

    /// Root of the session's file tree
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn ensure_open(&self) -> Result<(), ExecError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(ExecError::SessionClosed)
        } else {
            Ok(())
        }
    }

    fn stop_server(&self) {
        if let Some(server) = self.server.lock().take() {
            kill_server(server.as_ref());
        }
    }

    fn free_port(&self) -> Result<u16, ExecError> {
        let listener = TcpListener::bind((self.config.host.as_str(), 0))?;
        Ok(listener.local_addr()?.port())
    }

    async fn write_tree(
        &self,
        document: &FullDocument,
        bundle: &CodeBundle,
        port: u16,
    ) -> Result<(), ExecError> {
        let manifest = ServerManifest::for_session(&self.config, bundle.framework, port);
        tokio::fs::write(self.root.join(files::DOCUMENT), document.as_str()).await?;
        tokio::fs::write(self.root.join(files::MANIFEST), manifest.to_json()?).await?;
        Ok(())
    }

    async fn run_install(&self) -> Result<(), ExecError> {
        let mut args: Vec<&str> = vec!["install"];
        args.extend(self.config.install_args.iter().map(String::as_str));

        let (mut rx, handle) = self
            .spawner
            .spawn(&self.npm, &args, &self.root)
            .await
            .map_err(|message| ExecError::Spawn {
                step: "install",
                message,
            })?;

        let wait = async {
            while let Some(event) = rx.recv().await {
                match event {
                    ProcessEvent::Stdout(line) => {
                        log::debug!("[install] {}", String::from_utf8_lossy(&line));
                    }
                    ProcessEvent::Stderr(line) => {
                        log::warn!("[install stderr] {}", String::from_utf8_lossy(&line));
                    }
                    ProcessEvent::Error(message) => {
                        return Err(ExecError::Spawn {
                            step: "install",
                            message,
                        });
                    }
                    ProcessEvent::Terminated(Some(0)) => return Ok(()),
                    ProcessEvent::Terminated(code) => {
                        return Err(ExecError::InstallFailed { code });
                    }
                }
            }
            Err(ExecError::InstallFailed { code: None })
        };

        let limit = Duration::from_secs(self.config.install_timeout_secs);
        match tokio::time::timeout(limit, wait).await {
            Ok(result) => result,
            Err(_) => {
                if let Err(e) = handle.kill() {
                    log::warn!("Failed to kill install step: {}", e);
                }
                Err(ExecError::InstallTimeout {
                    secs: self.config.install_timeout_secs,
                })
            }
        }
    }

    async fn start_server(&self) -> Result<ServerReady, ExecError> {
        let (rx, handle) = self
            .spawner
            .spawn(&self.npm, &["run", "start"], &self.root)
            .await
            .map_err(|message| ExecError::Spawn {
                step: "server",
                message,
            })?;
        log::debug!("Preview server spawned (PID: {})", handle.pid());

        let ready = match tokio::time::timeout(self.ready_timeout, wait_for_ready(rx)).await {
            Ok(result) => result,
            Err(_) => Err(ExecError::ReadyTimeout {
                secs: self.ready_timeout.as_secs(),
            }),
        };

        if ready.is_err() {
            kill_server(handle.as_ref());
            return ready;
        }

        // The previous server keeps serving its URL until this point
        let previous = self.server.lock().replace(handle);
        if let Some(previous) = previous {
            kill_server(previous.as_ref());
        }
        ready
    }

    /// Verify the server is answering HTTP requests
    async fn verify_http_ready(&self, url: &str) -> Result<(), ExecError> {
        let timeout = Duration::from_millis(self.config.http_verify_timeout_ms);
        let start = Instant::now();
        let mut delay = 100;
        let mut last_error = String::from("no response");

        log::debug!("Starting HTTP verification for {}", url);

        let client = reqwest::Client::new();

        while let Some(remaining) = timeout.checked_sub(start.elapsed()) {
            match client.get(url).timeout(remaining).send().await {
                Ok(resp) if resp.status().is_success() => {
                    log::debug!("HTTP verification passed");
                    return Ok(());
                }
                Ok(resp) => {
                    last_error = format!("status {}", resp.status());
                }
                Err(e) => {
                    last_error = e.to_string();
                }
            }

            let remaining = timeout.saturating_sub(start.elapsed());
            tokio::time::sleep(Duration::from_millis(delay).min(remaining)).await;
            delay = (delay * 2).min(timeouts::HTTP_VERIFY_MAX_DELAY_MS);
        }

        Err(ExecError::NotServing(last_error))
    }
}

fn kill_server(server: &dyn ProcessHandle) {
    log::debug!("Stopping preview server (PID: {})", server.pid());
    if let Err(e) = server.kill() {
        log::warn!("Failed to kill preview server: {}", e);
    }
}

/// Consume server output until it announces a local URL.
///
/// After the announcement the remaining output is drained in the
/// background so the server never blocks on a full pipe.
async fn wait_for_ready(mut rx: mpsc::Receiver<ProcessEvent>) -> Result<ServerReady, ExecError> {
    while let Some(event) = rx.recv().await {
        let line = match event {
            ProcessEvent::Stdout(line) => {
                let line = String::from_utf8_lossy(&line).to_string();
                log::info!("[preview-server] {}", line);
                line
            }
            ProcessEvent::Stderr(line) => {
                let line = String::from_utf8_lossy(&line).to_string();
                log::warn!("[preview-server stderr] {}", line);
                line
            }
            ProcessEvent::Error(message) => {
                return Err(ExecError::Spawn {
                    step: "server",
                    message,
                });
            }
            ProcessEvent::Terminated(code) => return Err(ExecError::ServerExited { code }),
        };

        if let Some(ready) = parse_ready_line(&line) {
            tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    match event {
                        ProcessEvent::Stdout(line) | ProcessEvent::Stderr(line) => {
                            log::debug!("[preview-server] {}", String::from_utf8_lossy(&line));
                        }
                        ProcessEvent::Error(e) => log::warn!("Preview server error: {}", e),
                        ProcessEvent::Terminated(code) => {
                            log::info!("Preview server exited with status {:?}", code);
                        }
                    }
                }
            });
            return Ok(ready);
        }
    }

    Err(ExecError::ServerExited { code: None })
}

#[async_trait]
impl ExecutorSession for NodeSession {
    fn id(&self) -> &str {
        &self.id
    }

    async fn mount_and_serve(
        &self,
        document: &FullDocument,
        bundle: &CodeBundle,
    ) -> Result<ServerReady, ExecError> {
        self.ensure_open()?;
        let _mount = self.mount_lock.lock().await;
        self.ensure_open()?;

        let port = self.free_port()?;
        self.write_tree(document, bundle, port).await?;
        log::debug!(
            "Session {} mounted {} bytes ({})",
            self.id,
            document.as_str().len(),
            bundle.framework
        );

        self.run_install().await?;

        let ready = self.start_server().await?;

        if self.config.verify_http {
            if let Err(e) = self.verify_http_ready(&ready.url).await {
                self.stop_server();
                return Err(e);
            }
        }

        log::info!("Session {} serving at {}", self.id, ready.url);
        Ok(ready)
    }

    async fn teardown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stop_server();
        if let Some(workspace) = self.workspace.lock().take() {
            if let Err(e) = workspace.close() {
                log::warn!("Failed to remove session tree {:?}: {}", self.root, e);
            }
        }
        log::info!("Sandbox session {} torn down", self.id);
    }
}

impl Drop for NodeSession {
    fn drop(&mut self) {
        self.stop_server();
    }
}

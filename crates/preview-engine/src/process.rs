//! Process spawning abstraction
//!
//! The Node sandbox never touches `std::process` directly. It goes through
//! [`ProcessSpawner`], so hosts can route processes through their own
//! supervisor and tests can script process output.
//!
//! # Example
//!
//! ```rust,ignore
//! use preview_engine::process::{ProcessEvent, ProcessSpawner, StdProcessSpawner};
//!
//! let spawner = StdProcessSpawner::new();
//! let (mut rx, handle) = spawner.spawn("npm", &["install"], session_dir).await?;
//!
//! while let Some(event) = rx.recv().await {
//!     match event {
//!         ProcessEvent::Stdout(data) => println!("stdout: {}", String::from_utf8_lossy(&data)),
//!         ProcessEvent::Terminated(code) => break,
//!         _ => {}
//!     }
//! }
//! ```

use std::path::Path;

use async_trait::async_trait;
use tokio::sync::mpsc;

/// Output event from a spawned process
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    /// One line written to stdout
    Stdout(Vec<u8>),
    /// One line written to stderr
    Stderr(Vec<u8>),
    /// Process error (e.g., failed to wait on it)
    Error(String),
    /// Process terminated with optional exit code
    Terminated(Option<i32>),
}

/// Handle to a spawned process
pub trait ProcessHandle: Send + Sync {
    /// Get the process ID
    fn pid(&self) -> u32;
    /// Kill the process
    fn kill(&self) -> Result<(), String>;
}

/// Trait for spawning external processes
#[async_trait]
pub trait ProcessSpawner: Send + Sync {
    /// Spawn `program` with `args` in working directory `cwd`
    ///
    /// # Returns
    /// A tuple of (event receiver, process handle). The receiver yields output
    /// lines as they arrive and ends with `Terminated` or `Error`.
    async fn spawn(
        &self,
        program: &str,
        args: &[&str],
        cwd: &Path,
    ) -> Result<(mpsc::Receiver<ProcessEvent>, Box<dyn ProcessHandle>), String>;
}

// ============================================================================
// Standard Process Spawner
// ============================================================================

#[cfg(feature = "std-process")]
mod std_process {
    use super::*;
    use std::process::Stdio;
    use std::sync::Arc;

    use parking_lot::Mutex;
    use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
    use tokio::process::{Child, Command};

    const EVENT_CHANNEL_CAPACITY: usize = 256;
    const POLL_INTERVAL_MS: u64 = 100;

    struct StdProcessHandle {
        child: Arc<Mutex<Option<Child>>>,
        pid: u32,
    }

    impl ProcessHandle for StdProcessHandle {
        fn pid(&self) -> u32 {
            self.pid
        }

        /// Kill the process and everything it started
        fn kill(&self) -> Result<(), String> {
            let tree = kill_tree(self.pid);
            if let Err(e) = &tree {
                log::debug!("Process tree kill for {} failed: {}", self.pid, e);
            }

            let mut guard = self.child.lock();
            let Some(child) = guard.as_mut() else {
                return Ok(());
            };
            if !matches!(child.try_wait(), Ok(None)) {
                // Already exited; the group kill above covered anything it left
                return Ok(());
            }
            match child.start_kill() {
                Ok(()) => Ok(()),
                Err(e) => tree.map_err(|_| format!("Failed to kill process {}: {}", self.pid, e)),
            }
        }
    }

    impl Drop for StdProcessHandle {
        fn drop(&mut self) {
            let running = match self.child.lock().as_mut() {
                Some(child) => matches!(child.try_wait(), Ok(None)),
                None => false,
            };
            if running {
                let _ = self.kill();
            }
        }
    }

    /// Kill the process group led by `pid`.
    ///
    /// Children are spawned as group leaders, so this also reaches processes
    /// they started themselves (npm scripts run the server in a subshell).
    #[cfg(unix)]
    fn kill_tree(pid: u32) -> Result<(), String> {
        let status = std::process::Command::new("kill")
            .arg("-KILL")
            .arg("--")
            .arg(format!("-{}", pid))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| format!("Failed to run kill: {}", e))?;
        if status.success() {
            Ok(())
        } else {
            Err(format!("kill exited with {}", status))
        }
    }

    #[cfg(windows)]
    fn kill_tree(pid: u32) -> Result<(), String> {
        let status = std::process::Command::new("taskkill")
            .args(["/PID", &pid.to_string(), "/T", "/F"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| format!("Failed to run taskkill: {}", e))?;
        if status.success() {
            Ok(())
        } else {
            Err(format!("taskkill exited with {}", status))
        }
    }

    #[cfg(not(any(unix, windows)))]
    fn kill_tree(_pid: u32) -> Result<(), String> {
        Err("Process tree kill is not supported on this platform".to_string())
    }

    /// Process spawner built on `tokio::process`
    #[derive(Debug, Default, Clone)]
    pub struct StdProcessSpawner;

    impl StdProcessSpawner {
        pub fn new() -> Self {
            Self
        }
    }

    fn forward_lines<R>(
        stream: R,
        tx: mpsc::Sender<ProcessEvent>,
        wrap: fn(Vec<u8>) -> ProcessEvent,
    ) where
        R: AsyncRead + Unpin + Send + 'static,
    {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stream).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if tx.send(wrap(line.into_bytes())).await.is_err() {
                    break;
                }
            }
        });
    }

    #[async_trait]
    impl ProcessSpawner for StdProcessSpawner {
        async fn spawn(
            &self,
            program: &str,
            args: &[&str],
            cwd: &Path,
        ) -> Result<(mpsc::Receiver<ProcessEvent>, Box<dyn ProcessHandle>), String> {
            let mut command = Command::new(program);
            command
                .args(args)
                .current_dir(cwd)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true);
            // Lead a fresh process group so kill reaches grandchildren
            #[cfg(unix)]
            command.process_group(0);

            let mut child = command
                .spawn()
                .map_err(|e| format!("Failed to spawn {}: {}", program, e))?;

            let pid = child
                .id()
                .ok_or_else(|| format!("{} exited before its pid was read", program))?;

            let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

            if let Some(stdout) = child.stdout.take() {
                forward_lines(stdout, tx.clone(), ProcessEvent::Stdout);
            }
            if let Some(stderr) = child.stderr.take() {
                forward_lines(stderr, tx.clone(), ProcessEvent::Stderr);
            }

            let child = Arc::new(Mutex::new(Some(child)));

            // Process monitor
            let monitored = child.clone();
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(tokio::time::Duration::from_millis(POLL_INTERVAL_MS)).await;

                    // Lock is never held across an await
                    let check_result = {
                        let mut guard = monitored.lock();
                        match guard.as_mut() {
                            Some(child) => child.try_wait(),
                            None => break,
                        }
                    };

                    match check_result {
                        Ok(Some(status)) => {
                            let _ = tx.send(ProcessEvent::Terminated(status.code())).await;
                            break;
                        }
                        Ok(None) => continue,
                        Err(e) => {
                            let _ = tx
                                .send(ProcessEvent::Error(format!("Wait error: {}", e)))
                                .await;
                            break;
                        }
                    }
                }
            });

            log::debug!("Spawned {} (PID: {})", program, pid);
            Ok((rx, Box::new(StdProcessHandle { child, pid })))
        }
    }
}

#[cfg(feature = "std-process")]
pub use std_process::StdProcessSpawner;

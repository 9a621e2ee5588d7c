//! Preview Controller - single entry point for previewing bundles
//!
//! The controller decides which renderer presents a bundle. It boots the
//! sandbox lazily on the first bundle and serves every bundle through the
//! same session. The first executor failure demotes it permanently to inline
//! fallback rendering.
//!
//! ```text
//! Idle ──► Booting ──► Sandboxed ──► FallbackActive
//!              └──────────────────────────▲
//! ```
//!
//! Every submission takes a sequence number. Results are applied only while
//! their sequence is still the latest, so a slow mount can never overwrite
//! a newer bundle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::OnceCell;

use crate::assembler::{assemble_with, FullDocument};
use crate::config::{InjectionPolicy, PreviewConfig};
use crate::error::{AssemblyError, ExecError, InitError, PreviewError};
use crate::events::{EventSink, NullEventSink, PreviewEvent};
use crate::opener::ExternalOpener;
use crate::renderer::{FallbackRenderer, RenderSource, RenderTarget, SandboxPolicy};
use crate::sandbox::{ExecutorSession, SandboxExecutor};
use crate::types::{
    CodeBundle, GenerationStatus, GenerationUpdate, PreviewStatus, RenderMode, ServerReady,
};

/// Lifecycle of a preview
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreviewState {
    /// No bundle yet
    Idle,
    /// First bundle received, sandbox booting or mounting
    Booting,
    /// A sandboxed server is presenting content
    Sandboxed { url: String, port: u16 },
    /// Inline rendering; terminal
    FallbackActive { document: FullDocument },
}

impl PreviewState {
    pub fn mode(&self) -> RenderMode {
        match self {
            PreviewState::FallbackActive { .. } => RenderMode::Fallback,
            _ => RenderMode::Sandboxed,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            PreviewState::Idle => "idle",
            PreviewState::Booting => "booting",
            PreviewState::Sandboxed { .. } => "sandboxed",
            PreviewState::FallbackActive { .. } => "fallback",
        }
    }
}

type BootResult = Result<Arc<dyn ExecutorSession>, InitError>;

struct Inner {
    state: PreviewState,
    /// Latest issued sequence number
    latest: u64,
    /// Sequence of the content currently presented
    presented: u64,
    ready: bool,
    /// Assembled document of the latest submission
    document: Option<FullDocument>,
    last_error: Option<String>,
    project_id: Option<String>,
    /// First error the session reported; the session is unusable after it
    session_failure: Option<String>,
}

/// Owns the render target and the sandbox session of one preview
pub struct PreviewController {
    executor: Arc<dyn SandboxExecutor>,
    session: OnceCell<BootResult>,
    target: Arc<dyn RenderTarget>,
    fallback: FallbackRenderer,
    injection: InjectionPolicy,
    events: Arc<dyn EventSink>,
    opener: Option<Arc<dyn ExternalOpener>>,
    inner: Mutex<Inner>,
    alive: AtomicBool,
}

impl PreviewController {
    /// Create a controller presenting into `target`
    pub fn new(executor: Arc<dyn SandboxExecutor>, target: Arc<dyn RenderTarget>) -> Self {
        Self {
            executor,
            session: OnceCell::new(),
            target,
            fallback: FallbackRenderer::default(),
            injection: InjectionPolicy::default(),
            events: Arc::new(NullEventSink),
            opener: None,
            inner: Mutex::new(Inner {
                state: PreviewState::Idle,
                latest: 0,
                presented: 0,
                ready: false,
                document: None,
                last_error: None,
                project_id: None,
                session_failure: None,
            }),
            alive: AtomicBool::new(true),
        }
    }

    /// Apply frame policy and assembly settings from `config`
    pub fn with_config(mut self, config: &PreviewConfig) -> Self {
        self.fallback = FallbackRenderer::new(SandboxPolicy::from(&config.frame));
        self.injection = config.assembly.injection_policy;
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn with_opener(mut self, opener: Arc<dyn ExternalOpener>) -> Self {
        self.opener = Some(opener);
        self
    }

    // ─── OBSERVATION ────────────────────────────────────────────────

    /// The surface the host embeds in its layout
    pub fn render_target(&self) -> Arc<dyn RenderTarget> {
        self.target.clone()
    }

    pub fn mode(&self) -> RenderMode {
        self.inner.lock().state.mode()
    }

    pub fn state(&self) -> PreviewState {
        self.inner.lock().state.clone()
    }

    /// Whether the target currently shows usable content
    pub fn is_ready(&self) -> bool {
        self.inner.lock().ready
    }

    /// Whether the latest submission has not been presented yet
    pub fn is_loading(&self) -> bool {
        let inner = self.inner.lock();
        inner.latest > inner.presented
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.lock().last_error.clone()
    }

    /// Preview URL while sandboxed
    pub fn preview_url(&self) -> Option<String> {
        match &self.inner.lock().state {
            PreviewState::Sandboxed { url, .. } => Some(url.clone()),
            _ => None,
        }
    }

    pub fn status(&self) -> PreviewStatus {
        let inner = self.inner.lock();
        PreviewStatus {
            mode: inner.state.mode(),
            state: inner.state.name().to_string(),
            ready: inner.ready,
            loading: inner.latest > inner.presented,
            url: match &inner.state {
                PreviewState::Sandboxed { url, .. } => Some(url.clone()),
                _ => None,
            },
            last_error: inner.last_error.clone(),
            project_id: inner.project_id.clone(),
        }
    }

    // ─── INPUT ──────────────────────────────────────────────────────

    /// React to a generation status change.
    ///
    /// Only completed generations render; failed ones are recorded and
    /// announced. Returns the mode the bundle ended up in, if one rendered.
    pub async fn on_generation(
        &self,
        update: GenerationUpdate,
    ) -> Result<Option<RenderMode>, PreviewError> {
        self.ensure_alive()?;
        self.inner.lock().project_id = Some(update.project_id.clone());

        match update.status {
            GenerationStatus::Pending | GenerationStatus::Generating => Ok(None),
            GenerationStatus::Error => {
                let reason = update
                    .error
                    .unwrap_or_else(|| "Generation failed".to_string());
                log::warn!("Generation for {} failed: {}", update.project_id, reason);
                self.inner.lock().last_error = Some(reason.clone());
                self.emit(PreviewEvent::GenerationFailed {
                    project_id: update.project_id,
                    reason,
                });
                Ok(None)
            }
            GenerationStatus::Completed => {
                let bundle = update
                    .bundle
                    .as_ref()
                    .ok_or(AssemblyError::EmptyPayload)
                    .and_then(CodeBundle::from_value)
                    .map_err(|e| self.assembly_failed(e))?;
                self.submit(bundle).await.map(Some)
            }
        }
    }

    /// Decode a raw JSON bundle and submit it
    pub async fn submit_json(&self, json: &str) -> Result<RenderMode, PreviewError> {
        self.ensure_alive()?;
        let bundle = CodeBundle::from_json(json).map_err(|e| self.assembly_failed(e))?;
        self.submit(bundle).await
    }

    /// Present `bundle`, replacing whatever was shown before.
    ///
    /// Executor failures never surface here: they demote the preview to
    /// fallback rendering and are reported through events and `last_error`.
    pub async fn submit(&self, bundle: CodeBundle) -> Result<RenderMode, PreviewError> {
        self.ensure_alive()?;
        let document = assemble_with(&bundle.html, &bundle.css, &bundle.js, self.injection);

        let sequence = {
            let mut inner = self.inner.lock();
            inner.latest += 1;
            let sequence = inner.latest;
            inner.document = Some(document.clone());

            if matches!(inner.state, PreviewState::FallbackActive { .. }) {
                self.present_fallback(&mut inner, sequence, document);
                return Ok(RenderMode::Fallback);
            }
            if inner.state == PreviewState::Idle {
                inner.state = PreviewState::Booting;
                self.emit(PreviewEvent::BootStarted {
                    executor: self.executor.name().to_string(),
                });
            }
            sequence
        };

        let session = match self.session().await {
            Ok(session) => session,
            Err(e) => {
                log::warn!("Sandbox boot failed: {}", e);
                self.demote(sequence, e.to_string()).await;
                return Ok(self.mode());
            }
        };

        if !self.alive.load(Ordering::SeqCst) {
            session.teardown().await;
            return Err(PreviewError::Disposed);
        }

        if !self.is_latest(sequence) {
            self.superseded(sequence);
            return Ok(self.mode());
        }

        let failure = self.inner.lock().session_failure.clone();
        if let Some(reason) = failure {
            self.demote(sequence, reason).await;
            return Ok(self.mode());
        }

        match session.mount_and_serve(&document, &bundle).await {
            Ok(ready) => {
                if let Some(reason) = self.apply_ready(sequence, ready) {
                    self.demote(sequence, reason).await;
                }
            }
            Err(e) => self.apply_exec_error(sequence, e).await,
        }

        Ok(self.mode())
    }

    // ─── USER OPERATIONS ────────────────────────────────────────────

    /// Reload the current content.
    ///
    /// Sandboxed previews reissue the preview URL; fallback previews
    /// reapply the same document. A no-op before anything is shown.
    pub fn refresh(&self) -> Result<(), PreviewError> {
        self.ensure_alive()?;
        let inner = self.inner.lock();
        match &inner.state {
            PreviewState::Sandboxed { url, .. } => {
                self.target.present(RenderSource::Url(url.clone()));
            }
            PreviewState::FallbackActive { document } => {
                self.fallback.refresh(self.target.as_ref(), document);
            }
            PreviewState::Idle | PreviewState::Booting => return Ok(()),
        }
        self.emit(PreviewEvent::Refreshed {
            mode: inner.state.mode(),
        });
        Ok(())
    }

    /// Open the served preview outside the render target.
    ///
    /// Only sandboxed previews have a URL to open.
    pub fn open_externally(&self) -> Result<String, PreviewError> {
        self.ensure_alive()?;
        let url = self.preview_url().ok_or(PreviewError::NotSandboxed)?;
        if let Some(opener) = &self.opener {
            opener.open(&url).map_err(PreviewError::Open)?;
        }
        Ok(url)
    }

    /// Tear down the session and blank the target.
    ///
    /// Results still in flight are dropped when they arrive.
    pub async fn dispose(&self) {
        if !self.alive.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(Ok(session)) = self.session.get() {
            session.teardown().await;
        }
        self.target.clear();
        self.inner.lock().ready = false;
        self.emit(PreviewEvent::Disposed);
        log::info!("Preview controller disposed");
    }

    // ─── INTERNALS ──────────────────────────────────────────────────

    fn ensure_alive(&self) -> Result<(), PreviewError> {
        if self.alive.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(PreviewError::Disposed)
        }
    }

    /// Boot once; concurrent callers share the in-flight attempt and its
    /// outcome, failures included.
    async fn session(&self) -> BootResult {
        self.session
            .get_or_init(|| async {
                let result = self.executor.start().await;
                if let Ok(session) = &result {
                    log::info!(
                        "Session {} booted by {} executor",
                        session.id(),
                        self.executor.name()
                    );
                }
                result
            })
            .await
            .clone()
    }

    fn is_latest(&self, sequence: u64) -> bool {
        self.inner.lock().latest == sequence
    }

    fn emit(&self, event: PreviewEvent) {
        if let Err(e) = self.events.send(event) {
            log::debug!("Dropped preview event: {}", e);
        }
    }

    fn superseded(&self, sequence: u64) {
        let latest = self.inner.lock().latest;
        log::debug!("Discarding result {} superseded by {}", sequence, latest);
        self.emit(PreviewEvent::Superseded { sequence, latest });
    }

    fn assembly_failed(&self, error: AssemblyError) -> PreviewError {
        log::error!("Rejected bundle: {}", error);
        self.inner.lock().last_error = Some(error.to_string());
        self.emit(PreviewEvent::AssemblyFailed {
            reason: error.to_string(),
        });
        PreviewError::Assembly(error)
    }

    fn present_fallback(&self, inner: &mut Inner, sequence: u64, document: FullDocument) {
        self.fallback.render(self.target.as_ref(), &document);
        inner.state = PreviewState::FallbackActive { document };
        inner.presented = sequence;
        inner.ready = true;
        self.emit(PreviewEvent::FallbackRendered { sequence });
    }

    /// Present a served URL. Returns the session failure instead when an
    /// earlier mount broke the session while this one was in flight.
    fn apply_ready(&self, sequence: u64, ready: ServerReady) -> Option<String> {
        let mut inner = self.inner.lock();
        if !self.alive.load(Ordering::SeqCst) {
            return None;
        }
        if let Some(reason) = &inner.session_failure {
            return Some(reason.clone());
        }
        if inner.latest != sequence || matches!(inner.state, PreviewState::FallbackActive { .. }) {
            drop(inner);
            self.superseded(sequence);
            return None;
        }

        log::info!("Preview {} ready at {}", sequence, ready.url);
        self.target.present(RenderSource::Url(ready.url.clone()));
        inner.state = PreviewState::Sandboxed {
            url: ready.url.clone(),
            port: ready.port,
        };
        inner.presented = sequence;
        inner.ready = true;
        self.emit(PreviewEvent::SandboxReady {
            sequence,
            url: ready.url,
            port: ready.port,
        });
        None
    }

    /// Any mount error breaks the session. The latest request demotes: right
    /// away when nothing newer is in flight, otherwise when its own mount
    /// settles.
    async fn apply_exec_error(&self, sequence: u64, error: ExecError) {
        let reason = error.to_string();
        let demote_as = {
            let mut inner = self.inner.lock();
            inner.session_failure.get_or_insert_with(|| reason.clone());
            if inner.latest == sequence || inner.latest == inner.presented {
                Some(inner.latest)
            } else {
                None
            }
        };

        match demote_as {
            Some(latest) => {
                log::warn!("Sandbox mount {} failed: {}", sequence, error);
                self.demote(latest, reason).await;
            }
            None => {
                log::warn!(
                    "Sandbox mount {} failed while a newer one is in flight: {}",
                    sequence,
                    error
                );
                self.superseded(sequence);
            }
        }
    }

    /// Switch to fallback for good, rendering the latest document, and
    /// abandon the session.
    async fn demote(&self, sequence: u64, reason: String) {
        {
            let mut inner = self.inner.lock();
            if !self.alive.load(Ordering::SeqCst) {
                return;
            }
            if inner.latest != sequence {
                drop(inner);
                self.superseded(sequence);
                return;
            }
            if matches!(inner.state, PreviewState::FallbackActive { .. }) {
                return;
            }
            let Some(document) = inner.document.clone() else {
                return;
            };

            log::warn!("Demoting preview to fallback rendering: {}", reason);
            inner.last_error = Some(reason.clone());
            self.emit(PreviewEvent::Demoted { reason });
            self.present_fallback(&mut inner, sequence, document);
        }

        if let Some(Ok(session)) = self.session.get() {
            session.teardown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::events::ChannelEventSink;
    use crate::renderer::FrameTarget;
    use crate::types::Framework;

    #[derive(Clone)]
    enum Mount {
        Ready(u16),
        Fail,
        Delayed(Duration, u16),
        DelayedFail(Duration),
    }

    #[derive(Default)]
    struct ScriptedSession {
        /// Keyed by bundle html; unscripted bundles are served on port 9000
        script: Mutex<HashMap<String, Mount>>,
        mounts: AtomicUsize,
        teardowns: AtomicUsize,
    }

    #[async_trait]
    impl ExecutorSession for ScriptedSession {
        fn id(&self) -> &str {
            "scripted"
        }

        async fn mount_and_serve(
            &self,
            _document: &FullDocument,
            bundle: &CodeBundle,
        ) -> Result<ServerReady, ExecError> {
            self.mounts.fetch_add(1, Ordering::SeqCst);
            let step = self
                .script
                .lock()
                .get(&bundle.html)
                .cloned()
                .unwrap_or(Mount::Ready(9000));
            let port = match step {
                Mount::Ready(port) => port,
                Mount::Fail => return Err(ExecError::InstallFailed { code: Some(1) }),
                Mount::Delayed(delay, port) => {
                    tokio::time::sleep(delay).await;
                    port
                }
                Mount::DelayedFail(delay) => {
                    tokio::time::sleep(delay).await;
                    return Err(ExecError::ReadyTimeout { secs: 30 });
                }
            };
            Ok(ServerReady {
                port,
                url: format!("http://127.0.0.1:{}", port),
            })
        }

        async fn teardown(&self) {
            self.teardowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct ScriptedExecutor {
        boot_fails: bool,
        boots: AtomicUsize,
        session: Arc<ScriptedSession>,
    }

    impl ScriptedExecutor {
        fn new(boot_fails: bool) -> Arc<Self> {
            Arc::new(Self {
                boot_fails,
                boots: AtomicUsize::new(0),
                session: Arc::new(ScriptedSession::default()),
            })
        }

        fn script(&self, html: &str, mount: Mount) {
            self.session.script.lock().insert(html.to_string(), mount);
        }
    }

    #[async_trait]
    impl SandboxExecutor for ScriptedExecutor {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn start(&self) -> Result<Arc<dyn ExecutorSession>, InitError> {
            self.boots.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            if self.boot_fails {
                Err(InitError::Unavailable("no isolation support".to_string()))
            } else {
                Ok(self.session.clone())
            }
        }
    }

    struct RecordingOpener {
        opened: Mutex<Vec<String>>,
    }

    impl ExternalOpener for RecordingOpener {
        fn open(&self, url: &str) -> Result<(), String> {
            self.opened.lock().push(url.to_string());
            Ok(())
        }
    }

    fn bundle(html: &str) -> CodeBundle {
        CodeBundle::new(html, "h1{color:red}", "console.log(1)", Framework::Html)
    }

    fn harness(executor: Arc<ScriptedExecutor>) -> (PreviewController, FrameTarget) {
        let target = FrameTarget::new();
        let controller = PreviewController::new(executor, Arc::new(target.clone()));
        (controller, target)
    }

    fn shown_document(target: &FrameTarget) -> String {
        match target.source() {
            Some(RenderSource::Document { document, .. }) => document.into_string(),
            other => panic!("Expected inline document, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_sandboxed_render() {
        let executor = ScriptedExecutor::new(false);
        executor.script("<h1>Hi</h1>", Mount::Ready(4173));
        let (controller, target) = harness(executor);

        let mode = controller.submit(bundle("<h1>Hi</h1>")).await.unwrap();
        assert_eq!(mode, RenderMode::Sandboxed);
        assert!(controller.is_ready());
        assert_eq!(
            target.source(),
            Some(RenderSource::Url("http://127.0.0.1:4173".to_string()))
        );
        assert_eq!(controller.preview_url().as_deref(), Some("http://127.0.0.1:4173"));
    }

    #[tokio::test]
    async fn test_boot_failure_falls_back() {
        let executor = ScriptedExecutor::new(true);
        let (controller, target) = harness(executor);

        let mode = controller.submit(bundle("<h1>Hi</h1>")).await.unwrap();
        assert_eq!(mode, RenderMode::Fallback);
        assert!(controller.is_ready());

        let shown = shown_document(&target);
        assert!(shown.contains("<style>h1{color:red}</style>"));
        assert!(shown.contains("<script>console.log(1)</script>"));
        assert!(controller.last_error().unwrap().contains("no isolation support"));
    }

    #[tokio::test]
    async fn test_mount_failure_after_success_renders_new_bundle() {
        let executor = ScriptedExecutor::new(false);
        executor.script("<p>A</p>", Mount::Ready(5001));
        executor.script("<p>B</p>", Mount::Fail);
        let (controller, target) = harness(executor.clone());

        controller.submit(bundle("<p>A</p>")).await.unwrap();
        assert_eq!(controller.preview_url().as_deref(), Some("http://127.0.0.1:5001"));

        let mode = controller.submit(bundle("<p>B</p>")).await.unwrap();
        assert_eq!(mode, RenderMode::Fallback);
        let shown = shown_document(&target);
        assert!(shown.contains("<p>B</p>"));
        assert!(!shown.contains("<p>A</p>"));
        assert!(controller.preview_url().is_none());
        // Abandoned session is torn down
        assert_eq!(executor.session.teardowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_last_request_wins_out_of_order() {
        let executor = ScriptedExecutor::new(false);
        executor.script("<p>A</p>", Mount::Delayed(Duration::from_millis(150), 5001));
        executor.script("<p>B</p>", Mount::Ready(5002));
        let (controller, target) = harness(executor);
        let (sink, mut rx) = ChannelEventSink::new();
        let controller = controller.with_events(Arc::new(sink));

        let (a, b) = tokio::join!(controller.submit(bundle("<p>A</p>")), async {
            tokio::time::sleep(Duration::from_millis(40)).await;
            controller.submit(bundle("<p>B</p>")).await
        });
        a.unwrap();
        b.unwrap();

        assert_eq!(
            target.source(),
            Some(RenderSource::Url("http://127.0.0.1:5002".to_string()))
        );
        assert!(!controller.is_loading());

        let mut superseded = false;
        while let Ok(event) = rx.try_recv() {
            if event == (PreviewEvent::Superseded { sequence: 1, latest: 2 }) {
                superseded = true;
            }
        }
        assert!(superseded);
    }

    #[tokio::test]
    async fn test_same_tick_submissions_boot_once() {
        let executor = ScriptedExecutor::new(false);
        executor.script("<p>A</p>", Mount::Ready(5001));
        executor.script("<p>B</p>", Mount::Ready(5002));
        let (controller, target) = harness(executor.clone());

        let (a, b) = tokio::join!(
            controller.submit(bundle("<p>A</p>")),
            controller.submit(bundle("<p>B</p>"))
        );
        a.unwrap();
        b.unwrap();

        assert_eq!(executor.boots.load(Ordering::SeqCst), 1);
        assert_eq!(
            target.source(),
            Some(RenderSource::Url("http://127.0.0.1:5002".to_string()))
        );
    }

    #[tokio::test]
    async fn test_late_failure_of_older_mount_demotes_latest() {
        let executor = ScriptedExecutor::new(false);
        executor.script("<p>A</p>", Mount::DelayedFail(Duration::from_millis(150)));
        executor.script("<p>B</p>", Mount::Ready(5002));
        let (controller, target) = harness(executor.clone());

        let _ = tokio::join!(controller.submit(bundle("<p>A</p>")), async {
            tokio::time::sleep(Duration::from_millis(40)).await;
            controller.submit(bundle("<p>B</p>")).await
        });

        assert_eq!(controller.mode(), RenderMode::Fallback);
        let shown = shown_document(&target);
        assert!(shown.contains("<p>B</p>"));
        assert!(!shown.contains("<p>A</p>"));
        assert_eq!(executor.session.teardowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_during_newer_mount_demotes_newer_bundle() {
        let executor = ScriptedExecutor::new(false);
        executor.script("<p>A</p>", Mount::DelayedFail(Duration::from_millis(100)));
        executor.script("<p>B</p>", Mount::Delayed(Duration::from_millis(200), 5002));
        let (controller, target) = harness(executor);
        let (sink, mut rx) = ChannelEventSink::new();
        let controller = controller.with_events(Arc::new(sink));

        let (_, b) = tokio::join!(controller.submit(bundle("<p>A</p>")), async {
            tokio::time::sleep(Duration::from_millis(40)).await;
            controller.submit(bundle("<p>B</p>")).await
        });

        assert_eq!(b.unwrap(), RenderMode::Fallback);
        assert!(shown_document(&target).contains("<p>B</p>"));
        assert!(controller.last_error().unwrap().contains("ready within 30s"));

        while let Ok(event) = rx.try_recv() {
            assert!(
                !matches!(event, PreviewEvent::SandboxReady { .. }),
                "Broken session must not present a URL"
            );
        }
    }

    #[tokio::test]
    async fn test_no_mount_after_session_failure() {
        let executor = ScriptedExecutor::new(false);
        executor.script("<p>A</p>", Mount::DelayedFail(Duration::from_millis(100)));
        executor.script("<p>B</p>", Mount::Delayed(Duration::from_millis(300), 5002));
        let (controller, target) = harness(executor.clone());

        let _ = tokio::join!(
            controller.submit(bundle("<p>A</p>")),
            async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                controller.submit(bundle("<p>B</p>")).await
            },
            async {
                tokio::time::sleep(Duration::from_millis(150)).await;
                controller.submit(bundle("<p>C</p>")).await
            }
        );

        // C arrives after A broke the session and is never mounted
        assert_eq!(executor.session.mounts.load(Ordering::SeqCst), 2);
        assert_eq!(controller.mode(), RenderMode::Fallback);
        assert!(shown_document(&target).contains("<p>C</p>"));
    }

    #[tokio::test]
    async fn test_previous_url_stays_usable_during_remount() {
        let executor = ScriptedExecutor::new(false);
        executor.script("<p>A</p>", Mount::Ready(5001));
        executor.script("<p>B</p>", Mount::Delayed(Duration::from_millis(100), 5002));
        let (controller, target) = harness(executor);

        controller.submit(bundle("<p>A</p>")).await.unwrap();
        let (_, during) = tokio::join!(controller.submit(bundle("<p>B</p>")), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            controller.refresh().unwrap();
            (
                controller.is_ready(),
                controller.is_loading(),
                target.source(),
                controller.open_externally().unwrap(),
            )
        });

        assert_eq!(
            during,
            (
                true,
                true,
                Some(RenderSource::Url("http://127.0.0.1:5001".to_string())),
                "http://127.0.0.1:5001".to_string(),
            )
        );
        assert_eq!(
            target.source(),
            Some(RenderSource::Url("http://127.0.0.1:5002".to_string()))
        );
    }

    #[tokio::test]
    async fn test_fallback_is_terminal() {
        let executor = ScriptedExecutor::new(false);
        executor.script("<p>bad</p>", Mount::Fail);
        let (controller, target) = harness(executor.clone());

        controller.submit(bundle("<p>bad</p>")).await.unwrap();
        assert_eq!(controller.mode(), RenderMode::Fallback);
        let mounts = executor.session.mounts.load(Ordering::SeqCst);

        for html in ["<p>1</p>", "<p>2</p>", "<p>3</p>"] {
            let mode = controller.submit(bundle(html)).await.unwrap();
            assert_eq!(mode, RenderMode::Fallback);
            assert!(shown_document(&target).contains(html));
        }
        assert_eq!(executor.session.mounts.load(Ordering::SeqCst), mounts);
        assert_eq!(executor.boots.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_remount_reuses_session() {
        let executor = ScriptedExecutor::new(false);
        let (controller, _target) = harness(executor.clone());

        controller.submit(bundle("<p>1</p>")).await.unwrap();
        controller.submit(bundle("<p>2</p>")).await.unwrap();
        assert_eq!(executor.boots.load(Ordering::SeqCst), 1);
        assert_eq!(executor.session.mounts.load(Ordering::SeqCst), 2);
        assert_eq!(controller.mode(), RenderMode::Sandboxed);
    }

    #[tokio::test]
    async fn test_refresh_in_fallback_reapplies_document() {
        let executor = ScriptedExecutor::new(true);
        let (controller, target) = harness(executor);
        controller.submit(bundle("<h1>Hi</h1>")).await.unwrap();

        let before = target.source();
        let loads = target.load_count();
        controller.refresh().unwrap();
        assert_eq!(target.source(), before);
        assert_eq!(target.load_count(), loads + 1);
    }

    #[tokio::test]
    async fn test_refresh_in_sandboxed_reissues_url() {
        let executor = ScriptedExecutor::new(false);
        let (controller, target) = harness(executor);
        controller.submit(bundle("<h1>Hi</h1>")).await.unwrap();

        let loads = target.load_count();
        controller.refresh().unwrap();
        assert_eq!(target.load_count(), loads + 1);
        assert_eq!(
            target.source(),
            Some(RenderSource::Url("http://127.0.0.1:9000".to_string()))
        );
    }

    #[tokio::test]
    async fn test_readiness() {
        let executor = ScriptedExecutor::new(false);
        executor.script("<p>slow</p>", Mount::Delayed(Duration::from_millis(50), 5001));
        let (controller, _target) = harness(executor);
        assert!(!controller.is_ready());
        assert_eq!(controller.state(), PreviewState::Idle);
        controller.refresh().unwrap();
        assert!(!controller.is_ready());

        let (result, loading) = tokio::join!(controller.submit(bundle("<p>slow</p>")), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            (controller.is_ready(), controller.is_loading(), controller.state())
        });
        result.unwrap();
        assert_eq!(loading, (false, true, PreviewState::Booting));
        assert!(controller.is_ready());
        assert!(!controller.is_loading());
    }

    #[tokio::test]
    async fn test_open_externally_only_when_sandboxed() {
        let opener = Arc::new(RecordingOpener {
            opened: Mutex::new(Vec::new()),
        });

        let executor = ScriptedExecutor::new(false);
        let (controller, _) = harness(executor);
        let controller = controller.with_opener(opener.clone());
        assert!(matches!(
            controller.open_externally(),
            Err(PreviewError::NotSandboxed)
        ));
        controller.submit(bundle("<p/>")).await.unwrap();
        assert_eq!(controller.open_externally().unwrap(), "http://127.0.0.1:9000");
        assert_eq!(opener.opened.lock().len(), 1);

        let executor = ScriptedExecutor::new(true);
        let (controller, _) = harness(executor);
        controller.submit(bundle("<p/>")).await.unwrap();
        assert!(matches!(
            controller.open_externally(),
            Err(PreviewError::NotSandboxed)
        ));
    }

    #[tokio::test]
    async fn test_generation_gating() {
        let executor = ScriptedExecutor::new(false);
        let (controller, target) = harness(executor);

        let pending = GenerationUpdate {
            project_id: "p-1".to_string(),
            status: GenerationStatus::Generating,
            bundle: None,
            error: None,
        };
        assert_eq!(controller.on_generation(pending).await.unwrap(), None);
        assert!(target.source().is_none());

        let failed = GenerationUpdate {
            project_id: "p-1".to_string(),
            status: GenerationStatus::Error,
            bundle: None,
            error: Some("provider quota exceeded".to_string()),
        };
        assert_eq!(controller.on_generation(failed).await.unwrap(), None);
        assert!(target.source().is_none());
        assert_eq!(controller.last_error().as_deref(), Some("provider quota exceeded"));

        let completed = GenerationUpdate {
            project_id: "p-1".to_string(),
            status: GenerationStatus::Completed,
            bundle: Some(serde_json::json!({ "html": "<h1>Hi</h1>", "framework": "html" })),
            error: None,
        };
        assert_eq!(
            controller.on_generation(completed).await.unwrap(),
            Some(RenderMode::Sandboxed)
        );
        assert_eq!(controller.status().project_id.as_deref(), Some("p-1"));
    }

    #[tokio::test]
    async fn test_malformed_bundle_fails_loudly() {
        let executor = ScriptedExecutor::new(false);
        let (controller, target) = harness(executor);

        let update = GenerationUpdate {
            project_id: "p-2".to_string(),
            status: GenerationStatus::Completed,
            bundle: Some(serde_json::json!({ "html": 7 })),
            error: None,
        };
        let result = controller.on_generation(update).await;
        assert!(matches!(result, Err(PreviewError::Assembly(_))));
        assert!(controller.last_error().unwrap().contains("html"));
        assert!(target.source().is_none());

        assert!(controller.submit_json("not json").await.is_err());
        assert_eq!(controller.state(), PreviewState::Idle);
    }

    #[tokio::test]
    async fn test_dispose_tears_down_and_drops_late_results() {
        let executor = ScriptedExecutor::new(false);
        executor.script("<p>late</p>", Mount::Delayed(Duration::from_millis(100), 5009));
        let (controller, target) = harness(executor.clone());

        controller.submit(bundle("<p>first</p>")).await.unwrap();
        let (late, _) = tokio::join!(controller.submit(bundle("<p>late</p>")), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            controller.dispose().await;
        });
        late.unwrap();

        assert!(target.source().is_none());
        assert!(!controller.is_ready());
        assert_eq!(executor.session.teardowns.load(Ordering::SeqCst), 1);
        assert!(matches!(
            controller.submit(bundle("<p/>")).await,
            Err(PreviewError::Disposed)
        ));
        assert!(matches!(controller.refresh(), Err(PreviewError::Disposed)));
    }

    #[tokio::test]
    async fn test_frame_policy_from_config() {
        let mut config = PreviewConfig::default();
        config.frame.allow_forms = false;
        let executor = ScriptedExecutor::new(true);
        let (controller, target) = harness(executor);
        let controller = controller.with_config(&config);

        controller.submit(bundle("<p/>")).await.unwrap();
        match target.source() {
            Some(RenderSource::Document { policy, .. }) => {
                assert_eq!(policy.attribute(), "allow-scripts allow-same-origin")
            }
            other => panic!("Expected inline document, got {:?}", other),
        }
    }
}

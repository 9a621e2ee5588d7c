//! Preview engine for generated HTML/CSS/JS bundles
//!
//! Turns a code bundle into something viewable:
//! - **Assembler**: merges html, css and js into one self-contained document
//! - **Sandbox**: serves the document from an isolated file tree through a
//!   local static server
//! - **Fallback**: renders the document inline in a restricted frame
//! - **Controller**: picks between the two, keeps the latest bundle on
//!   screen and demotes to fallback for good on the first sandbox failure
//!
//! # Example
//!
//! ```rust,ignore
//! use preview_engine::{
//!     CodeBundle, FrameTarget, NodeSandbox, PreviewConfig, PreviewController,
//!     StdProcessSpawner,
//! };
//! use std::sync::Arc;
//!
//! let config = PreviewConfig::default();
//! let executor = NodeSandbox::new(config.sandbox.clone(), Arc::new(StdProcessSpawner::new()));
//! let controller = PreviewController::new(Arc::new(executor), Arc::new(FrameTarget::new()))
//!     .with_config(&config);
//!
//! controller.submit(CodeBundle::new("<h1>Hi</h1>", "", "", Default::default())).await?;
//! ```

pub mod assembler;
pub mod config;
pub mod constants;
pub mod controller;
pub mod error;
pub mod events;
pub mod opener;
pub mod process;
pub mod renderer;
pub mod sandbox;
pub mod types;

// Re-exports for convenience
pub use assembler::{assemble, assemble_with, is_full_document, FullDocument};
pub use config::{AssemblyConfig, FrameConfig, InjectionPolicy, PreviewConfig, SandboxConfig};
pub use controller::{PreviewController, PreviewState};
pub use error::{AssemblyError, ConfigError, ExecError, InitError, PreviewError};
pub use events::{ChannelEventSink, EventError, EventSink, NullEventSink, PreviewEvent};
pub use opener::{CommandOpener, ExternalOpener, SystemOpener};
pub use process::{ProcessEvent, ProcessHandle, ProcessSpawner};
pub use renderer::{FallbackRenderer, FrameTarget, RenderSource, RenderTarget, SandboxPolicy};
pub use sandbox::{DisabledSandbox, ExecutorSession, NodeSandbox, NodeSession, SandboxExecutor};
pub use types::{
    CodeBundle, Framework, GenerationStatus, GenerationUpdate, PreviewStatus, RenderMode,
    ServerReady,
};

#[cfg(feature = "std-process")]
pub use process::StdProcessSpawner;

//! Preview events
//!
//! Non-blocking notifications from the controller to whatever surrounds it
//! (a UI, a CLI, a log). Sending never fails the preview itself.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::types::RenderMode;

/// Trait for delivering preview events
///
/// Abstracts over the transport (channel, UI bridge, log) so the controller
/// can be hosted anywhere.
pub trait EventSink: Send + Sync {
    /// Send an event
    ///
    /// Returns an error if the event could not be delivered (e.g., channel closed)
    fn send(&self, event: PreviewEvent) -> Result<(), EventError>;
}

/// Error when sending events fails
#[derive(Debug, Clone)]
pub struct EventError {
    pub message: String,
}

impl std::fmt::Display for EventError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Event error: {}", self.message)
    }
}

impl std::error::Error for EventError {}

impl EventError {
    pub fn channel_closed() -> Self {
        Self {
            message: "Channel closed".to_string(),
        }
    }
}

/// Events emitted while previewing bundles
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PreviewEvent {
    /// The sandbox is booting for the first bundle
    #[serde(rename_all = "camelCase")]
    BootStarted { executor: String },

    /// A sandboxed server is presenting the latest bundle
    #[serde(rename_all = "camelCase")]
    SandboxReady { sequence: u64, url: String, port: u16 },

    /// The latest bundle was rendered inline
    #[serde(rename_all = "camelCase")]
    FallbackRendered { sequence: u64 },

    /// The preview left sandboxed mode for good
    #[serde(rename_all = "camelCase")]
    Demoted { reason: String },

    /// A result arrived after a newer request and was discarded
    #[serde(rename_all = "camelCase")]
    Superseded { sequence: u64, latest: u64 },

    /// The preview was refreshed
    #[serde(rename_all = "camelCase")]
    Refreshed { mode: RenderMode },

    /// An upstream bundle could not be assembled
    #[serde(rename_all = "camelCase")]
    AssemblyFailed { reason: String },

    /// Upstream generation ended in an error; nothing was rendered
    #[serde(rename_all = "camelCase")]
    GenerationFailed { project_id: String, reason: String },

    /// The controller was disposed
    Disposed,
}

/// Sink that discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn send(&self, _event: PreviewEvent) -> Result<(), EventError> {
        Ok(())
    }
}

/// Sink forwarding events into an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    tx: mpsc::UnboundedSender<PreviewEvent>,
}

impl ChannelEventSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PreviewEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelEventSink {
    fn send(&self, event: PreviewEvent) -> Result<(), EventError> {
        self.tx.send(event).map_err(|_| EventError::channel_closed())
    }
}

//! Render targets and the fallback renderer
//!
//! A render target is the display surface the host embeds. It shows either a
//! served URL (sandboxed mode) or an inline document in a restricted frame
//! (fallback mode), never both.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::assembler::FullDocument;
use crate::config::FrameConfig;

/// Capability set of the embedded frame showing an inline document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxPolicy {
    pub allow_scripts: bool,
    pub allow_same_origin: bool,
    pub allow_forms: bool,
    pub allow_modals: bool,
    pub allow_popups: bool,
}

impl SandboxPolicy {
    /// Value for the frame's `sandbox` attribute.
    ///
    /// Top-level navigation tokens are never emitted, and popups never
    /// escape the sandbox.
    pub fn attribute(&self) -> String {
        let mut tokens = Vec::new();
        if self.allow_scripts {
            tokens.push("allow-scripts");
        }
        if self.allow_same_origin {
            tokens.push("allow-same-origin");
        }
        if self.allow_forms {
            tokens.push("allow-forms");
        }
        if self.allow_modals {
            tokens.push("allow-modals");
        }
        if self.allow_popups {
            tokens.push("allow-popups");
        }
        tokens.join(" ")
    }
}

impl Default for SandboxPolicy {
    fn default() -> Self {
        Self::from(&FrameConfig::default())
    }
}

impl From<&FrameConfig> for SandboxPolicy {
    fn from(config: &FrameConfig) -> Self {
        Self {
            allow_scripts: config.allow_scripts,
            allow_same_origin: config.allow_same_origin,
            allow_forms: config.allow_forms,
            allow_modals: config.allow_modals,
            allow_popups: config.allow_popups,
        }
    }
}

/// What a render target is showing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderSource {
    /// A page served by the sandbox
    Url(String),
    /// An inline document rendered without any server
    Document {
        document: FullDocument,
        policy: SandboxPolicy,
    },
}

impl RenderSource {
    /// Frame markup for this source
    pub fn frame_markup(&self, title: &str) -> String {
        match self {
            RenderSource::Url(url) => format!(
                "<iframe title=\"{}\" src=\"{}\"></iframe>",
                escape_attribute(title),
                escape_attribute(url)
            ),
            RenderSource::Document { document, policy } => format!(
                "<iframe title=\"{}\" sandbox=\"{}\" srcdoc=\"{}\"></iframe>",
                escape_attribute(title),
                policy.attribute(),
                escape_attribute(document.as_str())
            ),
        }
    }
}

fn escape_attribute(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Display surface owned by a preview controller
pub trait RenderTarget: Send + Sync {
    /// Point the surface at `source`, reloading even when it is unchanged
    fn present(&self, source: RenderSource);

    /// Blank the surface
    fn clear(&self);
}

#[derive(Debug, Default)]
struct FrameState {
    source: Option<RenderSource>,
    loads: u64,
}

/// In-memory render target.
///
/// Records the current source and how many times it was (re)loaded; hosts
/// turn it into iframe markup for their layout.
#[derive(Debug, Default, Clone)]
pub struct FrameTarget {
    state: Arc<Mutex<FrameState>>,
}

impl FrameTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn source(&self) -> Option<RenderSource> {
        self.state.lock().source.clone()
    }

    /// Number of loads since creation, reloads included
    pub fn load_count(&self) -> u64 {
        self.state.lock().loads
    }

    /// Iframe markup for the current source, if any
    pub fn markup(&self, title: &str) -> Option<String> {
        self.state
            .lock()
            .source
            .as_ref()
            .map(|source| source.frame_markup(title))
    }
}

impl RenderTarget for FrameTarget {
    fn present(&self, source: RenderSource) {
        let mut state = self.state.lock();
        state.source = Some(source);
        state.loads += 1;
    }

    fn clear(&self) {
        self.state.lock().source = None;
    }
}

/// Renders assembled documents straight into a target, with no network
#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackRenderer {
    policy: SandboxPolicy,
}

impl FallbackRenderer {
    pub fn new(policy: SandboxPolicy) -> Self {
        Self { policy }
    }

    pub fn render(&self, target: &dyn RenderTarget, document: &FullDocument) {
        target.present(RenderSource::Document {
            document: document.clone(),
            policy: self.policy,
        });
    }

    /// Re-apply `document`; there is no process to restart, so this always
    /// succeeds.
    pub fn refresh(&self, target: &dyn RenderTarget, document: &FullDocument) {
        self.render(target, document);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::assemble;

    #[test]
    fn test_default_policy_attribute() {
        assert_eq!(
            SandboxPolicy::default().attribute(),
            "allow-scripts allow-same-origin allow-forms"
        );
    }

    #[test]
    fn test_policy_never_allows_top_navigation() {
        let policy = SandboxPolicy {
            allow_scripts: true,
            allow_same_origin: true,
            allow_forms: true,
            allow_modals: true,
            allow_popups: true,
        };
        assert!(!policy.attribute().contains("top-navigation"));
        assert!(!policy.attribute().contains("escape-sandbox"));
    }

    #[test]
    fn test_fallback_render_sets_document() {
        let target = FrameTarget::new();
        let renderer = FallbackRenderer::default();
        let document = assemble("<p>x</p>", "", "");

        renderer.render(&target, &document);
        match target.source() {
            Some(RenderSource::Document { document: shown, .. }) => assert_eq!(shown, document),
            other => panic!("Expected document source, got {:?}", other),
        }
        assert_eq!(target.load_count(), 1);
    }

    #[test]
    fn test_fallback_refresh_reapplies_same_source() {
        let target = FrameTarget::new();
        let renderer = FallbackRenderer::default();
        let document = assemble("<p>x</p>", "", "");

        renderer.render(&target, &document);
        let before = target.source();
        renderer.refresh(&target, &document);
        assert_eq!(target.source(), before);
        assert_eq!(target.load_count(), 2);
    }

    #[test]
    fn test_srcdoc_markup_is_escaped() {
        let source = RenderSource::Document {
            document: assemble("<p class=\"a\">&</p>", "", ""),
            policy: SandboxPolicy::default(),
        };
        let markup = source.frame_markup("Preview");
        assert!(markup.starts_with("<iframe title=\"Preview\" sandbox=\"allow-scripts"));
        assert!(markup.contains("&lt;p class=&quot;a&quot;&gt;&amp;&lt;/p&gt;"));
        assert!(!markup.contains("<p class"));
    }

    #[test]
    fn test_url_markup_has_no_sandbox() {
        let markup = RenderSource::Url("http://127.0.0.1:4173".into()).frame_markup("Preview");
        assert_eq!(
            markup,
            "<iframe title=\"Preview\" src=\"http://127.0.0.1:4173\"></iframe>"
        );
    }

    #[test]
    fn test_clear() {
        let target = FrameTarget::new();
        target.present(RenderSource::Url("http://localhost:1".into()));
        target.clear();
        assert!(target.source().is_none());
        assert!(target.markup("x").is_none());
    }
}

//! Render target that mirrors the preview frame into a file

use std::path::PathBuf;

use preview_engine::constants::defaults::DOCUMENT_TITLE;
use preview_engine::{FrameTarget, RenderSource, RenderTarget};

/// Wraps a [`FrameTarget`] and rewrites `path` with the iframe markup after
/// every change, so an external page can embed the current preview.
pub struct FileFrameTarget {
    frame: FrameTarget,
    path: Option<PathBuf>,
}

impl FileFrameTarget {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            frame: FrameTarget::new(),
            path,
        }
    }

    pub fn frame(&self) -> &FrameTarget {
        &self.frame
    }

    fn write(&self) {
        let Some(path) = &self.path else {
            return;
        };
        let markup = self.frame.markup(DOCUMENT_TITLE).unwrap_or_default();
        if let Err(e) = std::fs::write(path, markup) {
            log::warn!("Failed to write frame markup to {:?}: {}", path, e);
        }
    }
}

impl RenderTarget for FileFrameTarget {
    fn present(&self, source: RenderSource) {
        self.frame.present(source);
        self.write();
    }

    fn clear(&self) {
        self.frame.clear();
        self.write();
    }
}

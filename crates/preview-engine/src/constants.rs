//! Engine-wide constants
//!
//! Single source of truth for timeouts, file names and configuration defaults.

/// Timeout configuration
pub mod timeouts {
    /// Maximum time to wait for the static server to announce it is listening
    pub const SERVER_READY_SECS: u64 = 30;
    /// Maximum time for the package install step
    pub const INSTALL_SECS: u64 = 180;
    /// Maximum time spent probing the announced URL over HTTP
    pub const HTTP_VERIFY_MS: u64 = 5000;
    /// Upper bound for the probe backoff delay
    pub const HTTP_VERIFY_MAX_DELAY_MS: u64 = 2000;
}

/// Files written into a session's file tree
pub mod files {
    /// Assembled document served at the root URL
    pub const DOCUMENT: &str = "index.html";
    /// Generated package manifest
    pub const MANIFEST: &str = "package.json";
    /// Prefix for session directories under the temp dir
    pub const SESSION_DIR_PREFIX: &str = "forge-preview-";
}

/// Server host configuration
pub mod hosts {
    /// Host the static server binds to
    pub const LOCAL: &str = "127.0.0.1";
}

/// Default values for sandbox configuration
pub mod defaults {
    /// Node.js executable
    pub const NODE_COMMAND: &str = "node";
    /// Package manager executable
    pub const NPM_COMMAND: &str = "npm";
    /// Static file server package installed into each session
    pub const SERVER_PACKAGE: &str = "serve";
    /// Version requirement for the server package
    pub const SERVER_VERSION: &str = "^14.2.0";
    /// Name given to the generated package manifest
    pub const MANIFEST_NAME: &str = "forge-preview-app";
    /// Title used for synthesized documents
    pub const DOCUMENT_TITLE: &str = "Preview";
}

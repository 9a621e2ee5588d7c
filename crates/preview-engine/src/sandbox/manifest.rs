//! Minimal package manifest written next to the served document

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::SandboxConfig;
use crate::constants::defaults;
use crate::types::Framework;

/// `package.json` contents for a preview session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerManifest {
    pub name: String,
    pub version: String,
    pub private: bool,
    pub description: String,
    pub scripts: BTreeMap<String, String>,
    pub dependencies: BTreeMap<String, String>,
}

impl ServerManifest {
    /// Build a manifest whose `start` script serves the session root on `port`
    pub fn for_session(config: &SandboxConfig, framework: Framework, port: u16) -> Self {
        let mut scripts = BTreeMap::new();
        scripts.insert(
            "start".to_string(),
            format!(
                "{} --no-clipboard --listen tcp://{}:{} .",
                config.server_package, config.host, port
            ),
        );

        let mut dependencies = BTreeMap::new();
        dependencies.insert(config.server_package.clone(), config.server_version.clone());

        Self {
            name: defaults::MANIFEST_NAME.to_string(),
            version: "0.0.0".to_string(),
            private: true,
            description: format!("Generated {} preview", framework),
            scripts,
            dependencies,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

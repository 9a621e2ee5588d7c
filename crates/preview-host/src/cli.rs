//! Command-line arguments and bundle loading

use std::path::{Path, PathBuf};

use clap::Parser;
use preview_engine::{AssemblyError, CodeBundle, ConfigError, Framework, PreviewError};
use thiserror::Error;

#[derive(Parser, Debug)]
#[command(name = "forge-preview")]
#[command(about = "Preview a generated HTML/CSS/JS bundle")]
#[command(version)]
pub struct Cli {
    /// HTML file (fragment or full document)
    #[arg(long, conflicts_with = "bundle")]
    pub html: Option<PathBuf>,

    /// Stylesheet to inject
    #[arg(long, requires = "html")]
    pub css: Option<PathBuf>,

    /// Script to inject
    #[arg(long, requires = "html")]
    pub js: Option<PathBuf>,

    /// JSON bundle with html, css, js and framework fields
    #[arg(long)]
    pub bundle: Option<PathBuf>,

    /// Framework the bundle targets
    #[arg(long, default_value = "html")]
    pub framework: String,

    /// Deliver the bundle as a completed generation of this project
    #[arg(long)]
    pub project_id: Option<String>,

    /// Configuration directory (defaults to the user config dir)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Write the preview frame markup here whenever it changes
    #[arg(long)]
    pub frame_out: Option<PathBuf>,

    /// Skip the sandbox and render inline
    #[arg(long)]
    pub fallback_only: bool,

    /// Open the served preview in the system browser
    #[arg(long)]
    pub open: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Debug, Error)]
pub enum HostError {
    #[error("Failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Nothing to preview: pass --html or --bundle")]
    NoInput,

    #[error("No configuration directory available; pass --config")]
    NoConfigDir,

    #[error(transparent)]
    Bundle(#[from] AssemblyError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Preview(#[from] PreviewError),

    #[error("Failed to encode status: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to wait for shutdown signal: {0}")]
    Signal(std::io::Error),
}

impl Cli {
    /// Directory holding `preview.json`
    pub fn config_dir(&self) -> Result<PathBuf, HostError> {
        match &self.config {
            Some(dir) => Ok(dir.clone()),
            None => dirs::config_dir()
                .map(|dir| dir.join("forge-preview"))
                .ok_or(HostError::NoConfigDir),
        }
    }

    /// Build the bundle from `--bundle` or the `--html/--css/--js` files
    pub async fn load_bundle(&self) -> Result<CodeBundle, HostError> {
        if let Some(path) = &self.bundle {
            let json = read(path).await?;
            return Ok(CodeBundle::from_json(&json)?);
        }

        let html_path = self.html.as_ref().ok_or(HostError::NoInput)?;
        let html = read(html_path).await?;
        let css = read_optional(self.css.as_deref()).await?;
        let js = read_optional(self.js.as_deref()).await?;
        let framework: Framework = self.framework.parse()?;

        Ok(CodeBundle::new(html, css, js, framework))
    }
}

async fn read(path: &Path) -> Result<String, HostError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|source| HostError::Read {
            path: path.to_path_buf(),
            source,
        })
}

async fn read_optional(path: Option<&Path>) -> Result<String, HostError> {
    match path {
        Some(path) => read(path).await,
        None => Ok(String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("forge-preview").chain(args.iter().copied()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_load_bundle_from_files() {
        let dir = tempfile::tempdir().unwrap();
        let html = dir.path().join("index.html");
        let css = dir.path().join("style.css");
        std::fs::write(&html, "<h1>Hi</h1>").unwrap();
        std::fs::write(&css, "h1{}").unwrap();

        let cli = parse(&[
            "--html",
            html.to_str().unwrap(),
            "--css",
            css.to_str().unwrap(),
            "--framework",
            "react",
        ]);
        let bundle = cli.load_bundle().await.unwrap();
        assert_eq!(bundle.html, "<h1>Hi</h1>");
        assert_eq!(bundle.css, "h1{}");
        assert_eq!(bundle.js, "");
        assert_eq!(bundle.framework, Framework::React);
    }

    #[tokio::test]
    async fn test_load_bundle_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bundle.json");
        std::fs::write(&path, r#"{"html":"<p/>","js":"go()"}"#).unwrap();

        let cli = parse(&["--bundle", path.to_str().unwrap()]);
        let bundle = cli.load_bundle().await.unwrap();
        assert_eq!(bundle.js, "go()");
        assert_eq!(bundle.framework, Framework::Html);
    }

    #[tokio::test]
    async fn test_missing_input() {
        let cli = parse(&[]);
        assert!(matches!(cli.load_bundle().await, Err(HostError::NoInput)));
    }

    #[tokio::test]
    async fn test_unreadable_file() {
        let cli = parse(&["--html", "/nonexistent/index.html"]);
        assert!(matches!(
            cli.load_bundle().await,
            Err(HostError::Read { .. })
        ));
    }

    #[test]
    fn test_html_conflicts_with_bundle() {
        let result = Cli::try_parse_from(["forge-preview", "--html", "a", "--bundle", "b"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_explicit_config_dir() {
        let cli = parse(&["--config", "/tmp/forge"]);
        assert_eq!(cli.config_dir().unwrap(), PathBuf::from("/tmp/forge"));
    }
}

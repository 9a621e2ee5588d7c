//! Opening preview URLs outside the embedded frame

use std::path::PathBuf;
use std::process::{Command, Stdio};

/// Opens a URL in something other than the render target (usually a browser)
pub trait ExternalOpener: Send + Sync {
    fn open(&self, url: &str) -> Result<(), String>;
}

/// Runs `program args... url` and waits for it to hand the URL off.
///
/// The URL is passed as its own argument, never through a shell.
#[derive(Debug, Clone)]
pub struct CommandOpener {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandOpener {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl ExternalOpener for CommandOpener {
    fn open(&self, url: &str) -> Result<(), String> {
        log::info!("Opening {} with {:?}", url, self.program);
        // Platform openers return once the browser has the URL
        let status = Command::new(&self.program)
            .args(&self.args)
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| format!("Failed to run {:?}: {}", self.program, e))?;

        if status.success() {
            Ok(())
        } else {
            Err(format!("{:?} exited with {}", self.program, status))
        }
    }
}

/// Opens URLs with the platform's default handler
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemOpener;

impl SystemOpener {
    /// Candidate openers for this platform, in order of preference
    fn candidates() -> Vec<(&'static str, Vec<&'static str>)> {
        if cfg!(target_os = "macos") {
            vec![("open", vec![])]
        } else if cfg!(windows) {
            // `cmd /C start` would split the URL at `&`
            vec![("rundll32", vec!["url.dll,FileProtocolHandler"])]
        } else {
            vec![("xdg-open", vec![]), ("gio", vec!["open"])]
        }
    }

    fn command() -> Result<CommandOpener, String> {
        for (program, args) in Self::candidates() {
            if let Ok(path) = which::which(program) {
                return Ok(CommandOpener::new(
                    path,
                    args.into_iter().map(str::to_string).collect(),
                ));
            }
        }
        Err("No system URL opener found".to_string())
    }
}

impl ExternalOpener for SystemOpener {
    fn open(&self, url: &str) -> Result<(), String> {
        Self::command()?.open(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_shell_interpreted_opener() {
        assert!(SystemOpener::candidates()
            .iter()
            .all(|(program, _)| *program != "cmd"));
    }

    #[cfg(unix)]
    #[test]
    fn test_url_is_passed_as_one_argument() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("opened");
        let opener = CommandOpener::new(
            "sh",
            vec![
                "-c".to_string(),
                format!("printf '%s' \"$1\" > {}", out.display()),
                "sh".to_string(),
            ],
        );

        let url = "http://127.0.0.1:4173/?a=1&b=2";
        opener.open(url).unwrap();
        assert_eq!(std::fs::read_to_string(&out).unwrap(), url);
    }

    #[cfg(unix)]
    #[test]
    fn test_opener_failure_is_reported() {
        let opener = CommandOpener::new("false", Vec::new());
        assert!(opener.open("http://127.0.0.1:1").is_err());

        let missing = CommandOpener::new("/nonexistent/opener", Vec::new());
        assert!(missing.open("http://127.0.0.1:1").is_err());
    }
}

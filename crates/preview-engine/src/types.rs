//! Common types shared between the engine and its host

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AssemblyError;

/// Framework the bundle was generated for
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Framework {
    #[default]
    Html,
    React,
    Vue,
}

impl Framework {
    pub fn as_str(&self) -> &'static str {
        match self {
            Framework::Html => "html",
            Framework::React => "react",
            Framework::Vue => "vue",
        }
    }
}

impl fmt::Display for Framework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Framework {
    type Err = AssemblyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "html" => Ok(Framework::Html),
            "react" => Ok(Framework::React),
            "vue" => Ok(Framework::Vue),
            other => Err(AssemblyError::UnknownFramework(other.to_string())),
        }
    }
}

/// Output of one completed generation.
///
/// Immutable once created; a regeneration replaces the whole bundle.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct CodeBundle {
    pub html: String,
    pub css: String,
    pub js: String,
    pub framework: Framework,
}

impl CodeBundle {
    pub fn new(
        html: impl Into<String>,
        css: impl Into<String>,
        js: impl Into<String>,
        framework: Framework,
    ) -> Self {
        Self {
            html: html.into(),
            css: css.into(),
            js: js.into(),
            framework,
        }
    }

    /// Decode a bundle payload handed over by the generation pipeline.
    ///
    /// `html` is required; `css` and `js` may be absent or null (treated as
    /// empty) but must be strings when present. `framework` defaults to html.
    pub fn from_value(value: &Value) -> Result<Self, AssemblyError> {
        let obj = value.as_object().ok_or(AssemblyError::InvalidField {
            field: "bundle",
            expected: "an object",
        })?;

        let html = match obj.get("html") {
            None | Some(Value::Null) => return Err(AssemblyError::MissingField("html")),
            Some(v) => string_field(v, "html")?,
        };
        let css = optional_string_field(obj.get("css"), "css")?;
        let js = optional_string_field(obj.get("js"), "js")?;
        let framework = match obj.get("framework") {
            None | Some(Value::Null) => Framework::default(),
            Some(v) => string_field(v, "framework")?.parse()?,
        };

        Ok(Self {
            html,
            css,
            js,
            framework,
        })
    }

    /// Decode a bundle from raw JSON text
    pub fn from_json(json: &str) -> Result<Self, AssemblyError> {
        let value: Value =
            serde_json::from_str(json).map_err(|e| AssemblyError::Malformed(e.to_string()))?;
        Self::from_value(&value)
    }
}

fn string_field(value: &Value, field: &'static str) -> Result<String, AssemblyError> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or(AssemblyError::InvalidField {
            field,
            expected: "a string",
        })
}

fn optional_string_field(
    value: Option<&Value>,
    field: &'static str,
) -> Result<String, AssemblyError> {
    match value {
        None | Some(Value::Null) => Ok(String::new()),
        Some(v) => string_field(v, field),
    }
}

/// Generation status reported by the persistence layer
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GenerationStatus {
    Pending,
    Generating,
    Completed,
    Error,
}

/// A generation status change for one project
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationUpdate {
    pub project_id: String,
    pub status: GenerationStatus,
    /// Raw bundle payload, present once the generation completed
    #[serde(default)]
    pub bundle: Option<Value>,
    /// Failure reason reported with `GenerationStatus::Error`
    #[serde(default)]
    pub error: Option<String>,
}

/// Which renderer is presenting content
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RenderMode {
    Sandboxed,
    Fallback,
}

/// Internal notification from a session once its server is listening
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerReady {
    pub port: u16,
    pub url: String,
}

/// Snapshot of the controller for display
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PreviewStatus {
    pub mode: RenderMode,
    pub state: String,
    pub ready: bool,
    pub loading: bool,
    pub url: Option<String>,
    pub last_error: Option<String>,
    pub project_id: Option<String>,
}

// Seam between the bridge and whatever runs scripts inside the page

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::SessionError;

/// A live script execution context inside the web page.
///
/// The bridge never creates or tears one down; it is handed a session and
/// owns it for as long as the proxy lives.
#[async_trait]
pub trait ScriptSession: Send + Sync {
    /// Runs a script bundle for its side effects. `name` identifies the
    /// bundle in logs and diagnostics.
    async fn inject(&self, name: &str, source: &str) -> Result<(), SessionError>;

    /// Evaluates `script` as a function body and returns its result.
    ///
    /// `arguments[0]` inside the script is a completion callback; the result
    /// is whatever is passed to it, or the script's own non-undefined return
    /// value. Fails with [`SessionError::Timeout`] when neither happens within
    /// `timeout`.
    async fn evaluate(&self, script: &str, timeout: Duration) -> Result<Value, SessionError>;
}

/// A named script artifact defining `window.WAPI`.
#[derive(Debug, Clone)]
pub struct ScriptBundle {
    pub name: String,
    pub source: String,
}

impl ScriptBundle {
    pub fn new(name: &str, source: impl Into<String>) -> Self {
        ScriptBundle {
            name: name.to_string(),
            source: source.into(),
        }
    }

    /// The bundle shipped with the crate
    pub fn embedded() -> Self {
        Self::new("wapi.js", include_str!("../../js/wapi.js"))
    }

    /// Loads a bundle from disk, named after its file name
    pub fn from_file(path: &std::path::Path) -> std::io::Result<Self> {
        let source = std::fs::read_to_string(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self::new(&name, source))
    }
}

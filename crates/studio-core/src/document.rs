//! Document snapshots handed to browser clients.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::kind::{RequestKind, infer_kind};

/// Where the initial editor contents came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DocumentSource {
    /// Loaded from a file on disk.
    File,
    /// Seeded from the agent's last response.
    LastResponse,
    /// Empty editor.
    Blank,
}

/// Immutable editor seed chosen once per studio activation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitialDocument {
    /// Document body.
    pub text: String,
    /// Short label shown in the client.
    pub label: String,
    /// Origin of the body.
    pub source: DocumentSource,
    /// File path for [`DocumentSource::File`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl InitialDocument {
    /// An empty editor.
    pub fn blank() -> Self {
        Self {
            text: String::new(),
            label: "Untitled".into(),
            source: DocumentSource::Blank,
            path: None,
        }
    }

    /// A document loaded from `path`.
    pub fn from_file(path: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        let path = path.into();
        let label = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
        Self {
            text: text.into(),
            label,
            source: DocumentSource::File,
            path: Some(path),
        }
    }

    /// A document seeded from the agent's last response.
    pub fn from_last_response(markdown: impl Into<String>) -> Self {
        Self {
            text: markdown.into(),
            label: "Last response".into(),
            source: DocumentSource::LastResponse,
            path: None,
        }
    }
}

impl Default for InitialDocument {
    fn default() -> Self {
        Self::blank()
    }
}

/// Cached copy of the most recent completed assistant output.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastResponse {
    /// The assistant's text.
    pub markdown: String,
    /// Unix epoch milliseconds when it was recorded.
    pub timestamp: i64,
    /// Kind the client should render it as.
    pub kind: RequestKind,
}

impl LastResponse {
    /// Record `markdown` now with an explicit kind.
    pub fn new(markdown: impl Into<String>, kind: RequestKind) -> Self {
        Self {
            markdown: markdown.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            kind,
        }
    }

    /// Record `markdown` now, inferring its kind from its shape.
    pub fn inferred(markdown: impl Into<String>) -> Self {
        let markdown = markdown.into();
        let kind = infer_kind(&markdown);
        Self::new(markdown, kind)
    }
}

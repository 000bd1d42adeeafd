//! Request kinds, critique lenses, and response-kind inference.

use std::fmt;

use serde::{Deserialize, Serialize};

/// What a studio turn asks the agent to do.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// Structured critique of a document.
    Critique,
    /// Free-form annotation of selected text.
    Annotation,
    /// Text forwarded to the agent verbatim.
    Direct,
}

impl RequestKind {
    /// Wire name of the kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Critique => "critique",
            Self::Annotation => "annotation",
            Self::Direct => "direct",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Critique focus; selects which prompt template is used.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lens {
    /// Prose-oriented critique.
    Writing,
    /// Source-code-oriented critique.
    Code,
    /// Let the template decide from the document.
    #[default]
    Auto,
}

/// Infer the kind of a piece of agent output from its shape.
///
/// Markdown that has both a `## Critiques` and a `## Document` heading line
/// (case-insensitive, surrounding whitespace ignored) is a critique;
/// everything else is an annotation.
pub fn infer_kind(markdown: &str) -> RequestKind {
    if is_structured_critique(markdown) {
        RequestKind::Critique
    } else {
        RequestKind::Annotation
    }
}

/// Whether `markdown` carries both critique section headings.
pub fn is_structured_critique(markdown: &str) -> bool {
    let mut critiques = false;
    let mut document = false;
    for line in markdown.lines() {
        let line = line.trim();
        if line.eq_ignore_ascii_case("## critiques") {
            critiques = true;
        } else if line.eq_ignore_ascii_case("## document") {
            document = true;
        }
        if critiques && document {
            return true;
        }
    }
    false
}

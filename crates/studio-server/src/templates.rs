//! Prompt construction for turn-starting requests.
//!
//! `send_run_request` text is submitted verbatim and never passes through here.

use studio_core::Lens;

/// Builds agent prompts from studio requests.
pub trait PromptTemplates: Send + Sync {
    /// Prompt asking for a structured critique of `document`.
    fn critique(&self, document: &str, lens: Lens) -> String;

    /// Prompt asking the agent to respond to annotations in `text`.
    fn annotation(&self, text: &str) -> String;
}

/// Minimal built-in templates.
#[derive(Clone, Copy, Debug, Default)]
pub struct PlainTemplates;

impl PromptTemplates for PlainTemplates {
    fn critique(&self, document: &str, lens: Lens) -> String {
        let focus = match lens {
            Lens::Writing => "Critique this as prose: clarity, structure, argument, and tone.",
            Lens::Code => "Critique this as code: correctness, readability, and design.",
            Lens::Auto => "Decide whether this is prose or code and critique it accordingly.",
        };
        format!(
            "{focus}\n\n\
             Reply in markdown with exactly these sections:\n\
             ## Assessment\nA short overall judgement.\n\
             ## Critiques\nNumbered items **C1**, **C2**, ... each with a concrete suggestion.\n\
             ## Document\nThe document with {{C1}}-style markers where each critique applies.\n\n\
             <document>\n{document}\n</document>"
        )
    }

    fn annotation(&self, text: &str) -> String {
        format!(
            "The text below contains my inline annotations. Address each one and \
             reply in markdown.\n\n<annotated>\n{text}\n</annotated>"
        )
    }
}

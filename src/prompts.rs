//! Prompts for LLM refinement of converted Markdown.
//!
//! Centralising every prompt here keeps the wording in one place and lets
//! unit tests inspect it without a live model.
//!
//! Both prompts insist on literal preservation: the model only repairs
//! Markdown syntax, it never summarises or rewrites.

/// System message sent with every refinement call.
pub const REFINE_SYSTEM_PROMPT: &str = "You are an assistant that strictly reformats scientific content into clean Markdown. Preserve every heading level, image reference, table, formula and piece of text exactly as provided without adding, omitting, or altering meaning. Return only the corrected Markdown.";

/// Instruction placed before the section text in the user message.
pub const REFINE_USER_INSTRUCTION: &str = "Reformat the following Markdown section so it is valid, readable Markdown. Preserve every heading level, math expression, table structure, list, code fence, citation, image link, and textual detail exactly as written. Do not add commentary or omit content. Return only Markdown.";

/// Build the user message for one section (or the whole document).
pub fn refine_user_message(section: &str) -> String {
    format!("{REFINE_USER_INSTRUCTION}\n\n{section}")
}

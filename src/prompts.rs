//! Prompts for restructuring a page's text layer into Markdown.
//!
//! Keeping every prompt here means changing the default behaviour touches
//! one place, and unit tests can inspect prompts without calling a provider.
//!
//! Callers can override the system prompt via
//! [`crate::config::ExtractionConfig::system_prompt`]; the per-page context
//! message is always sent.

use crate::pipeline::llm::RestructureContext;

/// Default system prompt for restructuring extracted page text.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You restructure text extracted from one page of a PDF into clean Markdown.

The text comes from the PDF text layer: reading order may be imperfect, words may be split across lines, and headers, footers and page numbers are mixed in.

Rules:

1. CONTENT
   - Keep every sentence of the page. Do not summarise, translate or add content.
   - Re-join words hyphenated across line breaks and lines broken mid-sentence.

2. STRUCTURE
   - Use ## for section headings and ### for subsections; use # only for the document title on the first page.
   - Use - for bullet lists and 1. 2. 3. for numbered lists.
   - Rebuild tables as GFM pipe tables when the columns are clear.

3. FIGURES
   - Figure files for this page are listed in the context message.
   - Reference each listed figure exactly once with ![caption](path), using the path exactly as given, placed next to its caption or first mention.
   - Never reference a figure that is not listed.

4. WHAT TO DROP
   - Page numbers, running headers and footers.

5. OUTPUT
   - Output ONLY the Markdown for this page.
   - Do NOT wrap the answer in ``` fences and do not add commentary."#;

/// Per-page context: document title, page position and available figures.
pub fn page_context_message(ctx: &RestructureContext) -> String {
    let mut msg = String::new();
    if let Some(title) = &ctx.title {
        msg.push_str(&format!("Document title: {}\n", title));
    }
    msg.push_str(&format!("Page {} of {}.\n", ctx.page_num, ctx.total_pages));

    if ctx.figures.is_empty() {
        msg.push_str("This page has no figure files. Do not add image references.");
    } else {
        msg.push_str("Figure files on this page (use these exact paths):\n");
        for f in &ctx.figures {
            msg.push_str(&format!("- {}\n", f));
        }
    }
    msg
}

//! Post-processing: deterministic cleanup of restructured Markdown and the
//! asset / reference consistency gate.
//!
//! ## Cleanup rules
//!
//! Restructuring services occasionally wrap their answer in a fence, emit
//! CRLF line endings or leave zero-width characters copied from the PDF text
//! layer. [`clean_markdown`] fixes these without touching content. Rules run
//! in a fixed order: fences first (so the remaining rules see the real
//! body), the final-newline pass last.
//!
//! ## Reference gate
//!
//! [`check_image_references`] compares the local images the Markdown points
//! at with the figure files actually written. Anything on one side but not
//! the other ends up in a [`ReferenceCheck`], which is rendered as an HTML
//! comment at the end of the document.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Apply all cleanup rules to one page of Markdown.
///
/// Rules (applied in order):
/// 1. Strip an outer ```` ```markdown ```` fence
/// 2. Normalise line endings (CRLF / CR → LF)
/// 3. Drop invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 4. Trim trailing whitespace per line
/// 5. Collapse runs of blank lines to a single blank line
/// 6. Put a blank line before every ATX heading
/// 7. End with exactly one newline
pub fn clean_markdown(input: &str) -> String {
    let s = strip_outer_fence(input);
    let s = normalise_line_endings(&s);
    let s = remove_invisible_chars(&s);
    let s = trim_line_ends(&s);
    let s = collapse_blank_runs(&s);
    let s = space_headings(&s);
    ensure_final_newline(&s)
}

static RE_OUTER_FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)\A```[ \t]*(?:markdown|md)?[ \t]*\r?\n(.*?)\r?\n```[ \t]*\z")
        .expect("valid regex")
});

fn strip_outer_fence(input: &str) -> String {
    match RE_OUTER_FENCE.captures(input.trim()) {
        Some(caps) => caps[1].to_string(),
        None => input.to_string(),
    }
}

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

const INVISIBLE: [char; 6] = [
    '\u{200B}', '\u{200C}', '\u{200D}', '\u{2060}', '\u{FEFF}', '\u{00AD}',
];

fn remove_invisible_chars(input: &str) -> String {
    input.chars().filter(|c| !INVISIBLE.contains(c)).collect()
}

fn trim_line_ends(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for (i, line) in input.split('\n').enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(line.trim_end());
    }
    out
}

fn collapse_blank_runs(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut blank_run = 0usize;
    for line in input.split('\n') {
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }
    out
}

static RE_ATX_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^#{1,6}(?:\s|$)").expect("valid regex"));

fn space_headings(input: &str) -> String {
    let mut lines: Vec<&str> = Vec::new();
    let mut in_code = false;
    for line in input.lines() {
        if line.trim_start().starts_with("```") {
            in_code = !in_code;
        }
        let needs_gap = !in_code
            && RE_ATX_HEADING.is_match(line)
            && lines.last().is_some_and(|prev| !prev.is_empty());
        if needs_gap {
            lines.push("");
        }
        lines.push(line);
    }
    lines.join("\n")
}

fn ensure_final_newline(input: &str) -> String {
    let body = input.trim_end();
    if body.is_empty() {
        "\n".to_string()
    } else {
        format!("{}\n", body)
    }
}

// ── Reference gate ───────────────────────────────────────────────────────

static RE_MD_IMAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"!\[[^\]]*\]\(\s*<?([^)\s>]+)>?(?:\s+"[^"]*")?\s*\)"#).expect("valid regex")
});

static RE_HTML_IMAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<img\b[^>]*\bsrc\s*=\s*["']([^"']+)["']"#).expect("valid regex")
});

/// Outcome of comparing Markdown image references with the asset set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceCheck {
    /// Distinct local image targets found in the Markdown.
    pub referenced: usize,
    /// Asset files never referenced by the Markdown.
    pub unreferenced: Vec<String>,
    /// Local targets with no matching asset file.
    pub missing: Vec<String>,
}

impl ReferenceCheck {
    pub fn is_consistent(&self) -> bool {
        self.unreferenced.is_empty() && self.missing.is_empty()
    }

    /// HTML comment listing every mismatch, or `None` when consistent.
    pub fn warning_comment(&self) -> Option<String> {
        if self.is_consistent() {
            return None;
        }
        let mut out = String::from("<!-- WARNING: image reference check failed\n");
        if !self.unreferenced.is_empty() {
            out.push_str("Assets never referenced:\n");
            for a in &self.unreferenced {
                out.push_str(&format!("  - {}\n", comment_safe(a)));
            }
        }
        if !self.missing.is_empty() {
            out.push_str("References with no asset file:\n");
            for m in &self.missing {
                out.push_str(&format!("  - {}\n", comment_safe(m)));
            }
        }
        out.push_str("-->\n");
        Some(out)
    }
}

fn comment_safe(s: &str) -> String {
    s.replace("--", "-\u{2010}")
}

fn is_local_target(target: &str) -> bool {
    let t = target.to_ascii_lowercase();
    !(t.starts_with("http://")
        || t.starts_with("https://")
        || t.starts_with("data:")
        || t.starts_with("//"))
}

fn normalise_target(target: &str) -> String {
    let t = target.trim();
    let t = t.split(['#', '?']).next().unwrap_or(t);
    t.trim_start_matches("./").replace('\\', "/")
}

/// Local image targets referenced by `markdown`, normalised and deduplicated.
pub fn local_image_references(markdown: &str) -> BTreeSet<String> {
    RE_MD_IMAGE
        .captures_iter(markdown)
        .chain(RE_HTML_IMAGE.captures_iter(markdown))
        .map(|c| c[1].to_string())
        .filter(|t| is_local_target(t))
        .map(|t| normalise_target(&t))
        .collect()
}

/// Compare the Markdown's local image references with `assets` (paths
/// relative to the Markdown file).
pub fn check_image_references(markdown: &str, assets: &[String]) -> ReferenceCheck {
    let referenced = local_image_references(markdown);
    let available: BTreeSet<String> = assets.iter().map(|a| normalise_target(a)).collect();

    ReferenceCheck {
        referenced: referenced.len(),
        unreferenced: available.difference(&referenced).cloned().collect(),
        missing: referenced.difference(&available).cloned().collect(),
    }
}

/// Append the gate's warning comment to `markdown` when there is one.
pub fn append_reference_warning(markdown: &str, check: &ReferenceCheck) -> String {
    match check.warning_comment() {
        None => markdown.to_string(),
        Some(comment) => {
            let mut out = markdown.trim_end().to_string();
            out.push_str("\n\n");
            out.push_str(&comment);
            out
        }
    }
}

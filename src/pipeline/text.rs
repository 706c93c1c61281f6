//! Page text: pull the text layer of each page and shape raw text into
//! presentable Markdown for pages that are not restructured.

use crate::error::PageError;
use crate::extraction::document::SourceDocument;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

/// Text of every page, page 1 first. Failures stay per page.
pub fn extract_page_texts(document: &dyn SourceDocument) -> Vec<Result<String, PageError>> {
    (1..=document.page_count())
        .map(|page| {
            let text = document.page_text(page);
            match &text {
                Ok(t) => debug!("Page {}: {} chars of text", page, t.chars().count()),
                Err(e) => warn!("{}", e),
            }
            text
        })
        .collect()
}

static RE_INNER_SPACES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[ \t]{2,}").expect("valid regex"));

/// Turn a raw text layer into plain Markdown paragraphs.
///
/// Words hyphenated across a line break are re-joined, runs of spaces are
/// squeezed and paragraphs are separated by one blank line. No structure is
/// inferred.
pub fn raw_text_to_markdown(text: &str) -> String {
    let normalised = text.replace("\r\n", "\n").replace('\r', "\n");
    let mut paragraphs: Vec<String> = Vec::new();
    let mut current = String::new();

    for line in normalised.lines() {
        let line = RE_INNER_SPACES.replace_all(line.trim(), " ");
        if line.is_empty() {
            if !current.is_empty() {
                paragraphs.push(std::mem::take(&mut current));
            }
            continue;
        }
        if current.is_empty() {
            current.push_str(&line);
        } else if current.ends_with('-') && line.starts_with(|c: char| c.is_lowercase()) {
            current.pop();
            current.push_str(&line);
        } else {
            current.push('\n');
            current.push_str(&line);
        }
    }
    if !current.is_empty() {
        paragraphs.push(current);
    }

    paragraphs.join("\n\n")
}

/// Markdown image links for a page's figures, one per line.
pub fn figure_links(figures: &[String]) -> String {
    figures
        .iter()
        .map(|path| {
            let name = path.rsplit('/').next().unwrap_or(path);
            let alt = name.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(name);
            format!("![{}]({})", alt, path)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paragraphs_are_separated_by_one_blank_line() {
        let raw = "First line\r\nsecond   line\r\n\r\n\r\nNext para\n";
        assert_eq!(
            raw_text_to_markdown(raw),
            "First line\nsecond line\n\nNext para"
        );
    }

    #[test]
    fn hyphenated_words_are_rejoined() {
        assert_eq!(raw_text_to_markdown("extrac-\ntion works"), "extraction works");
        assert_eq!(raw_text_to_markdown("Rust-\nBased"), "Rust-\nBased");
    }

    #[test]
    fn empty_text_yields_empty_markdown() {
        assert_eq!(raw_text_to_markdown(" \n\n \n"), "");
    }

    #[test]
    fn figure_links_use_file_stem_as_alt() {
        let links = figure_links(&[
            "doc-img-assets/fig1-page2-img1.png".to_string(),
            "doc-img-assets/fig2-page2-img2.png".to_string(),
        ]);
        assert_eq!(
            links,
            "![fig1-page2-img1](doc-img-assets/fig1-page2-img1.png)\n\n\
             ![fig2-page2-img2](doc-img-assets/fig2-page2-img2.png)"
        );
    }
}

//! HTML-to-visible-text stripping for notification mails.

use scraper::{Html, Node};

const SKIPPED: [&str; 4] = ["style", "script", "head", "title"];

/// Extract the visible text of an HTML body, joined with single spaces.
///
/// Style, script, and title content is dropped so boilerplate CSS never
/// leaks into pattern matching.
pub fn visible_text(html: &str) -> String {
    let doc = Html::parse_document(html);
    let mut chunks: Vec<&str> = Vec::new();

    for node in doc.tree.nodes() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let inside_skipped = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .is_some_and(|el| SKIPPED.contains(&el.name()))
        });
        if inside_skipped {
            continue;
        }
        for word in text.split_whitespace() {
            chunks.push(word);
        }
    }

    chunks.join(" ")
}

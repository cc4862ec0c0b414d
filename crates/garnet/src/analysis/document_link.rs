//
// analysis/document_link.rs
//
// Links for URLs written in comments
//

use std::sync::OnceLock;

use regex::Regex;
use tower_lsp::lsp_types::{DocumentLink, Range, Url};
use tree_sitter::Node;

use super::Listener;
use crate::document_store::DocumentSnapshot;
use crate::error::AnalysisError;

fn url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?:https?|source)://[^\s<>"'`)\]]+"#).expect("URL pattern is valid")
    })
}

#[derive(Default)]
pub struct DocumentLinkListener {
    links: Vec<DocumentLink>,
}

impl DocumentLinkListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finish(self) -> Vec<DocumentLink> {
        self.links
    }
}

impl Listener for DocumentLinkListener {
    fn node_kinds(&self) -> &'static [&'static str] {
        &["comment"]
    }

    fn on_enter(&mut self, node: Node<'_>, snapshot: &DocumentSnapshot) -> Result<(), AnalysisError> {
        let text = snapshot.node_text(node);
        for found in url_pattern().find_iter(text) {
            // Trailing sentence punctuation is not part of the link
            let target = found.as_str().trim_end_matches(|c| matches!(c, '.' | ',' | ';' | ':'));
            let Ok(url) = Url::parse(target) else {
                continue;
            };
            let start = node.start_byte() + found.start();
            let range = Range::new(
                snapshot.position_at(start),
                snapshot.position_at(start + target.len()),
            );
            self.links.push(DocumentLink {
                range,
                target: Some(url),
                tooltip: None,
                data: None,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::test_support::ruby_snapshot;
    use crate::analysis::Dispatcher;

    fn links(text: &str) -> Vec<DocumentLink> {
        let snapshot = ruby_snapshot(text);
        let mut listener = DocumentLinkListener::new();
        let mut dispatcher = Dispatcher::new();
        dispatcher.register(&mut listener);
        dispatcher.visit(snapshot.root().unwrap(), &snapshot).unwrap();
        listener.finish()
    }

    #[test]
    fn test_links_in_comments() {
        let found = links("# See https://ruby-doc.org/core.\nx = 1 # source://gems/foo.rb#12\n");
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].target.as_ref().unwrap().as_str(), "https://ruby-doc.org/core");
        assert_eq!(found[0].range.start.character, 6);
        assert_eq!(found[1].range.start.line, 1);
        assert_eq!(found[1].target.as_ref().unwrap().scheme(), "source");
    }

    #[test]
    fn test_urls_in_strings_are_ignored() {
        assert!(links("url = \"https://example.com\"\n").is_empty());
    }
}

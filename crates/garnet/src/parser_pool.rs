//
// parser_pool.rs
//
// Thread-local Ruby parser reuse and embedded-Ruby extraction
//

use std::cell::RefCell;
use std::ops::Range;

use tree_sitter::{Parser, Tree};

thread_local! {
    static PARSER: RefCell<Option<Parser>> = RefCell::new(ruby_parser());
}

fn ruby_parser() -> Option<Parser> {
    let mut parser = Parser::new();
    match parser.set_language(&tree_sitter_ruby::LANGUAGE.into()) {
        Ok(()) => Some(parser),
        Err(err) => {
            log::error!("Failed to load the Ruby grammar: {}", err);
            None
        }
    }
}

/// Parse Ruby source with this thread's parser.
/// The parser is reused across calls on the same thread.
pub fn parse_ruby(text: &str) -> Option<Tree> {
    PARSER.with(|parser| {
        parser
            .borrow_mut()
            .as_mut()
            .and_then(|parser| parser.parse(text, None))
    })
}

/// Ruby code extracted from an ERB template.
///
/// `code` has the same byte length and line structure as the template:
/// everything outside `<% %>` tags is blanked so tree positions map back to
/// the template unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErbSource {
    pub code: String,
    pub code_ranges: Vec<Range<usize>>,
}

impl ErbSource {
    pub fn contains(&self, byte: usize) -> bool {
        self.code_ranges
            .iter()
            .any(|range| range.start <= byte && byte <= range.end)
    }
}

pub fn extract_erb_ruby(template: &str) -> ErbSource {
    let bytes = template.as_bytes();
    let mut code: Vec<u8> = bytes
        .iter()
        .map(|&b| if b == b'\n' || b == b'\r' { b } else { b' ' })
        .collect();
    let mut code_ranges = Vec::new();

    let mut pos = 0;
    while let Some(open) = find(bytes, b"<%", pos) {
        let mut start = open + 2;
        // `<%%` is an escaped literal tag
        if bytes.get(start) == Some(&b'%') {
            pos = start + 1;
            continue;
        }
        let comment = bytes.get(start) == Some(&b'#');
        if matches!(bytes.get(start), Some(b'=') | Some(b'-')) {
            start += 1;
        }
        let Some(close) = find(bytes, b"%>", start) else {
            break;
        };
        let mut end = close;
        if end > start && bytes[end - 1] == b'-' {
            end -= 1;
        }
        if !comment && end > start {
            code[start..end].copy_from_slice(&bytes[start..end]);
            // Separate consecutive tags as statements
            code[close] = b';';
            code_ranges.push(start..end);
        }
        pos = close + 2;
    }

    let code = String::from_utf8(code)
        .unwrap_or_else(|err| String::from_utf8_lossy(err.as_bytes()).into_owned());
    ErbSource { code, code_ranges }
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|idx| idx + from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parser_initialized_with_ruby_language() {
        let tree = parse_ruby("class Foo; end").expect("Ruby should parse");
        assert_eq!(tree.root_node().kind(), "program");
        assert!(!tree.root_node().has_error());
    }

    #[test]
    fn test_parser_reuse_on_same_thread() {
        let trees: Vec<_> = ["a = 1", "def b; end", "C = 3"]
            .iter()
            .map(|src| parse_ruby(src))
            .collect();
        assert!(trees.iter().all(Option::is_some), "All parses should succeed");
    }

    #[test]
    fn test_parser_reports_syntax_errors() {
        let tree = parse_ruby("def broken(").unwrap();
        assert!(tree.root_node().has_error());
    }

    #[test]
    fn test_erb_extraction_keeps_offsets() {
        let template = "<h1><%= title %></h1>\n<% if x %>\n<p>ok</p>\n<% end %>\n";
        let erb = extract_erb_ruby(template);
        assert_eq!(erb.code.len(), template.len());
        assert_eq!(erb.code.lines().count(), template.lines().count());

        let title = template.find("title").unwrap();
        assert_eq!(&erb.code[title..title + 5], "title");
        assert!(erb.contains(title));
        assert!(!erb.contains(1));

        let tree = parse_ruby(&erb.code).unwrap();
        assert!(!tree.root_node().has_error(), "{}", erb.code);
    }

    #[test]
    fn test_erb_comments_and_escapes_are_blank() {
        let template = "<%# note %><%% literal %>";
        let erb = extract_erb_ruby(template);
        assert!(erb.code_ranges.is_empty());
        assert!(erb.code.trim().is_empty());
    }

    #[test]
    fn test_erb_multibyte_text_outside_tags() {
        let template = "héllo <%= name %>";
        let erb = extract_erb_ruby(template);
        assert_eq!(erb.code.len(), template.len());
        let name = template.find("name").unwrap();
        assert_eq!(&erb.code[name..name + 4], "name");
    }
}

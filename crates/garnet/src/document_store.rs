//
// document_store.rs
//
// Open documents, their parse results, and the per-method result cache
//

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use ropey::Rope;
use serde_json::Value;
use tower_lsp::lsp_types::{Position, Range, TextDocumentContentChangeEvent, Url};
use tree_sitter::{Node, Tree};

use crate::config::DEFAULT_EXPENSIVE_CHAR_LIMIT;
use crate::encoding::PositionEncoding;
use crate::parser_pool::{extract_erb_ruby, parse_ruby, ErbSource};

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct DocumentStoreConfig {
    /// Documents longer than this (in characters) are past limit
    pub expensive_char_limit: usize,
    /// Encoding of incoming edit positions and outgoing ranges
    pub encoding: PositionEncoding,
}

impl Default for DocumentStoreConfig {
    fn default() -> Self {
        Self {
            expensive_char_limit: DEFAULT_EXPENSIVE_CHAR_LIMIT,
            encoding: PositionEncoding::default(),
        }
    }
}

// ============================================================================
// Metrics
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentStoreMetrics {
    pub documents_opened: u64,
    pub documents_closed: u64,
    pub edits_applied: u64,
    /// Cached response found for (document, method)
    pub cache_hits: u64,
    /// No cached response for (document, method)
    pub cache_misses: u64,
    /// Caches cleared by an edit, reopen or close
    pub cache_invalidations: u64,
    /// Combined-cache tree traversals performed
    pub combined_traversals: u64,
}

// ============================================================================
// Document kinds and parse results
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Ruby,
    /// Template with embedded Ruby
    Erb,
    /// Signature-only file; stored but never parsed
    Rbs,
}

impl DocumentKind {
    /// Classify from the declared language id, falling back to the file
    /// extension for ids we do not recognise.
    pub fn classify(language_id: &str, uri: &Url) -> Self {
        match language_id {
            "ruby" => DocumentKind::Ruby,
            "erb" | "eruby" | "html.erb" | "html+erb" => DocumentKind::Erb,
            "rbs" => DocumentKind::Rbs,
            _ => {
                let path = uri.path();
                if path.ends_with(".erb") {
                    DocumentKind::Erb
                } else if path.ends_with(".rbs") {
                    DocumentKind::Rbs
                } else {
                    DocumentKind::Ruby
                }
            }
        }
    }
}

/// Immutable text plus its parse tree, shared by snapshots.
pub struct ParsedSource {
    text: String,
    erb: Option<ErbSource>,
    tree: Option<Tree>,
    line_starts: Vec<usize>,
}

impl ParsedSource {
    pub fn new(kind: DocumentKind, text: String) -> Self {
        let (erb, tree) = match kind {
            DocumentKind::Ruby => (None, parse_ruby(&text)),
            DocumentKind::Erb => {
                let erb = extract_erb_ruby(&text);
                let tree = parse_ruby(&erb.code);
                (Some(erb), tree)
            }
            DocumentKind::Rbs => (None, None),
        };
        let line_starts = std::iter::once(0)
            .chain(text.match_indices('\n').map(|(idx, _)| idx + 1))
            .collect();
        Self {
            text,
            erb,
            tree,
            line_starts,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// The text the tree was parsed from (blanked template for ERB).
    pub fn code(&self) -> &str {
        self.erb
            .as_ref()
            .map(|erb| erb.code.as_str())
            .unwrap_or(&self.text)
    }

    pub fn tree(&self) -> Option<&Tree> {
        self.tree.as_ref()
    }

    pub fn root(&self) -> Option<Node<'_>> {
        self.tree.as_ref().map(Tree::root_node)
    }

    pub fn node_text(&self, node: Node<'_>) -> &str {
        self.code().get(node.byte_range()).unwrap_or("")
    }

    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }

    /// Line text without its terminator; empty past the last line.
    pub fn line(&self, idx: usize) -> &str {
        let Some(&start) = self.line_starts.get(idx) else {
            return "";
        };
        let end = self
            .line_starts
            .get(idx + 1)
            .copied()
            .unwrap_or(self.text.len());
        self.text[start..end].trim_end_matches(|c| c == '\n' || c == '\r')
    }

    pub fn offset_at(&self, position: Position, encoding: PositionEncoding) -> usize {
        let line = position.line as usize;
        match self.line_starts.get(line) {
            Some(&start) => start + encoding.column_to_byte(self.line(line), position.character),
            None => self.text.len(),
        }
    }

    pub fn position_at(&self, byte: usize, encoding: PositionEncoding) -> Position {
        let byte = byte.min(self.text.len());
        let line = match self.line_starts.binary_search(&byte) {
            Ok(idx) => idx,
            Err(idx) => idx.saturating_sub(1),
        };
        let start = self.line_starts.get(line).copied().unwrap_or(0);
        Position::new(
            line as u32,
            encoding.byte_to_column(self.line(line), byte - start),
        )
    }

    /// Whether `byte` falls inside Ruby code (always true outside templates).
    pub fn in_ruby_code(&self, byte: usize) -> bool {
        self.erb.as_ref().map_or(true, |erb| erb.contains(byte))
    }
}

// ============================================================================
// Snapshots
// ============================================================================

/// Consistent read-only view of one document version.
///
/// Taken under the guard, then used by analyses after the guard is released.
#[derive(Clone)]
pub struct DocumentSnapshot {
    pub uri: Url,
    pub version: i32,
    pub revision: u64,
    pub kind: DocumentKind,
    pub past_limit: bool,
    pub encoding: PositionEncoding,
    pub source: Arc<ParsedSource>,
}

impl DocumentSnapshot {
    /// Snapshot of text that is not an open document (files on disk).
    pub fn from_text(uri: Url, kind: DocumentKind, text: String, encoding: PositionEncoding) -> Self {
        Self {
            uri,
            version: 0,
            revision: 0,
            kind,
            past_limit: false,
            encoding,
            source: Arc::new(ParsedSource::new(kind, text)),
        }
    }

    pub fn root(&self) -> Option<Node<'_>> {
        self.source.root()
    }

    pub fn node_text(&self, node: Node<'_>) -> &str {
        self.source.node_text(node)
    }

    pub fn range_of(&self, node: Node<'_>) -> Range {
        let start = node.start_position();
        let end = node.end_position();
        Range::new(
            Position::new(
                start.row as u32,
                self.encoding
                    .byte_to_column(self.source.line(start.row), start.column),
            ),
            Position::new(
                end.row as u32,
                self.encoding.byte_to_column(self.source.line(end.row), end.column),
            ),
        )
    }

    pub fn offset_at(&self, position: Position) -> usize {
        self.source.offset_at(position, self.encoding)
    }

    pub fn position_at(&self, byte: usize) -> Position {
        self.source.position_at(byte, self.encoding)
    }

    /// Range covering the whole document.
    pub fn full_range(&self) -> Range {
        Range::new(
            Position::new(0, 0),
            self.position_at(self.source.text().len()),
        )
    }

    /// Smallest named node spanning `position`.
    pub fn node_at(&self, position: Position) -> Option<Node<'_>> {
        let offset = self.offset_at(position);
        self.root()?.named_descendant_for_byte_range(offset, offset)
    }
}

// ============================================================================
// Document State
// ============================================================================

pub struct Document {
    pub uri: Url,
    pub version: i32,
    pub kind: DocumentKind,
    pub contents: Rope,
    /// Store-wide counter, bumped on every open and edit
    pub revision: u64,
    past_limit: bool,
    parsed: Arc<ParsedSource>,
    /// Method name to cached response; an absent key means not computed
    cache: HashMap<&'static str, Value>,
}

impl Document {
    pub fn past_limit(&self) -> bool {
        self.past_limit
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    Opened,
    /// Opened, but too large for expensive features
    PastLimit,
}

// ============================================================================
// Document Store
// ============================================================================

pub struct DocumentStore {
    documents: HashMap<Url, Document>,
    config: DocumentStoreConfig,
    metrics: DocumentStoreMetrics,
    next_revision: u64,
}

impl Default for DocumentStore {
    fn default() -> Self {
        Self::new(DocumentStoreConfig::default())
    }
}

impl DocumentStore {
    pub fn new(config: DocumentStoreConfig) -> Self {
        Self {
            documents: HashMap::new(),
            config,
            metrics: DocumentStoreMetrics::default(),
            next_revision: 0,
        }
    }

    pub fn config(&self) -> &DocumentStoreConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut DocumentStoreConfig {
        &mut self.config
    }

    fn bump_revision(&mut self) -> u64 {
        self.next_revision += 1;
        self.next_revision
    }

    /// Register (or replace) a document. Replacing drops the old cache.
    pub fn open(&mut self, uri: Url, text: String, version: i32, language_id: &str) -> OpenOutcome {
        let kind = DocumentKind::classify(language_id, &uri);
        let revision = self.bump_revision();
        let contents = Rope::from_str(&text);
        let past_limit = contents.len_chars() > self.config.expensive_char_limit;

        log::trace!("Opening {} (version {}, {:?})", uri, version, kind);
        let document = Document {
            uri: uri.clone(),
            version,
            kind,
            contents,
            revision,
            past_limit,
            parsed: Arc::new(ParsedSource::new(kind, text)),
            cache: HashMap::new(),
        };
        if self.documents.insert(uri, document).is_some() {
            self.metrics.cache_invalidations += 1;
        }
        self.metrics.documents_opened += 1;

        if past_limit {
            OpenOutcome::PastLimit
        } else {
            OpenOutcome::Opened
        }
    }

    pub fn close(&mut self, uri: &Url) -> bool {
        let removed = self.documents.remove(uri).is_some();
        if removed {
            self.metrics.documents_closed += 1;
            self.metrics.cache_invalidations += 1;
            log::trace!("Closed {}", uri);
        }
        removed
    }

    /// Apply ordered edits and reparse. Returns false for unknown documents.
    pub fn update(
        &mut self,
        uri: &Url,
        version: i32,
        changes: Vec<TextDocumentContentChangeEvent>,
    ) -> bool {
        let revision = self.bump_revision();
        let encoding = self.config.encoding;
        let limit = self.config.expensive_char_limit;
        let Some(document) = self.documents.get_mut(uri) else {
            return false;
        };

        for change in changes {
            apply_change(&mut document.contents, change, encoding);
        }
        document.version = version;
        document.revision = revision;
        document.cache.clear();
        document.past_limit = document.contents.len_chars() > limit;
        document.parsed = Arc::new(ParsedSource::new(document.kind, document.contents.to_string()));

        self.metrics.edits_applied += 1;
        self.metrics.cache_invalidations += 1;
        true
    }

    pub fn get(&self, uri: &Url) -> Option<&Document> {
        self.documents.get(uri)
    }

    pub fn contains(&self, uri: &Url) -> bool {
        self.documents.contains_key(uri)
    }

    pub fn snapshot(&self, uri: &Url) -> Option<DocumentSnapshot> {
        self.documents.get(uri).map(|document| DocumentSnapshot {
            uri: document.uri.clone(),
            version: document.version,
            revision: document.revision,
            kind: document.kind,
            past_limit: document.past_limit,
            encoding: self.config.encoding,
            source: Arc::clone(&document.parsed),
        })
    }

    /// Cached response for `method`, counting the lookup in the metrics.
    pub fn cached(&mut self, uri: &Url, method: &str) -> Option<Value> {
        let value = self
            .documents
            .get(uri)
            .and_then(|document| document.cache.get(method).cloned());
        if value.is_some() {
            self.metrics.cache_hits += 1;
        } else {
            self.metrics.cache_misses += 1;
        }
        value
    }

    /// Store computed responses, all or none. Rejected when the document was
    /// closed or edited since the snapshot at `revision` was taken.
    pub fn store_cache(
        &mut self,
        uri: &Url,
        revision: u64,
        entries: Vec<(&'static str, Value)>,
    ) -> bool {
        match self.documents.get_mut(uri) {
            Some(document) if document.revision == revision => {
                document.cache.extend(entries);
                true
            }
            _ => {
                log::trace!("Discarding stale results for {}", uri);
                false
            }
        }
    }

    pub fn record_traversal(&mut self) {
        self.metrics.combined_traversals += 1;
    }

    pub fn uris(&self) -> Vec<Url> {
        self.documents.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn metrics(&self) -> &DocumentStoreMetrics {
        &self.metrics
    }
}

/// Apply one change event. A change without a range replaces the text.
fn apply_change(contents: &mut Rope, change: TextDocumentContentChangeEvent, encoding: PositionEncoding) {
    let Some(range) = change.range else {
        *contents = Rope::from_str(&change.text);
        return;
    };
    let mut start = char_index(contents, range.start, encoding);
    let mut end = char_index(contents, range.end, encoding);
    if start > end {
        std::mem::swap(&mut start, &mut end);
    }
    contents.remove(start..end);
    contents.insert(start, &change.text);
}

fn char_index(contents: &Rope, position: Position, encoding: PositionEncoding) -> usize {
    let line_idx = position.line as usize;
    if line_idx >= contents.len_lines() {
        return contents.len_chars();
    }
    let line = contents.line(line_idx).to_string();
    let line = line.trim_end_matches(|c| c == '\n' || c == '\r');
    let byte = encoding.column_to_byte(line, position.character);
    contents.line_to_char(line_idx) + line[..byte].chars().count()
}

// ============================================================================
// Mutation Guard
// ============================================================================

/// The single exclusive lock around the document store.
///
/// Access is closure-scoped so a critical section cannot outlive the call:
/// take a snapshot inside `with`, run the analysis outside it.
#[derive(Clone, Default)]
pub struct MutationGuard {
    store: Arc<Mutex<DocumentStore>>,
}

impl MutationGuard {
    pub fn new(store: DocumentStore) -> Self {
        Self {
            store: Arc::new(Mutex::new(store)),
        }
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut DocumentStore) -> R) -> R {
        let mut store = self.store.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut store)
    }

    pub fn snapshot(&self, uri: &Url) -> Option<DocumentSnapshot> {
        self.with(|store| store.snapshot(uri))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn test_uri(name: &str) -> Url {
        Url::parse(&format!("file:///workspace/{}", name)).unwrap()
    }

    fn edit(start: (u32, u32), end: (u32, u32), text: &str) -> TextDocumentContentChangeEvent {
        TextDocumentContentChangeEvent {
            range: Some(Range::new(
                Position::new(start.0, start.1),
                Position::new(end.0, end.1),
            )),
            range_length: None,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_open_and_snapshot() {
        let mut store = DocumentStore::default();
        let uri = test_uri("a.rb");
        let outcome = store.open(uri.clone(), "class A\nend\n".into(), 1, "ruby");
        assert_eq!(outcome, OpenOutcome::Opened);

        let snapshot = store.snapshot(&uri).unwrap();
        assert_eq!(snapshot.version, 1);
        assert_eq!(snapshot.kind, DocumentKind::Ruby);
        assert_eq!(snapshot.root().unwrap().kind(), "program");
        assert_eq!(store.metrics().documents_opened, 1);
    }

    #[test]
    fn test_close() {
        let mut store = DocumentStore::default();
        let uri = test_uri("a.rb");
        store.open(uri.clone(), "x = 1".into(), 1, "ruby");
        assert!(store.close(&uri));
        assert!(!store.contains(&uri));
        assert!(store.snapshot(&uri).is_none());
        assert!(!store.close(&uri));
    }

    #[test]
    fn test_incremental_update_utf16() {
        let mut store = DocumentStore::default();
        let uri = test_uri("a.rb");
        store.open(uri.clone(), "name = \"😀\"\nputs name\n".into(), 1, "ruby");

        // Replace "name" on line 2 (after the emoji line)
        assert!(store.update(&uri, 2, vec![edit((1, 5), (1, 9), "other")]));
        // The emoji is two utf-16 units, so the closing quote ends at column 11
        assert!(store.update(&uri, 3, vec![edit((0, 11), (0, 11), ".upcase")]));

        let doc = store.get(&uri).unwrap();
        assert_eq!(doc.version, 3);
        assert_eq!(doc.contents.to_string(), "name = \"😀\".upcase\nputs other\n");
    }

    #[test]
    fn test_full_replacement_change() {
        let mut store = DocumentStore::default();
        let uri = test_uri("a.rb");
        store.open(uri.clone(), "old".into(), 1, "ruby");
        let change = TextDocumentContentChangeEvent {
            range: None,
            range_length: None,
            text: "new".into(),
        };
        assert!(store.update(&uri, 2, vec![change]));
        assert_eq!(store.snapshot(&uri).unwrap().source.text(), "new");
    }

    #[test]
    fn test_update_unknown_document() {
        let mut store = DocumentStore::default();
        assert!(!store.update(&test_uri("missing.rb"), 1, vec![edit((0, 0), (0, 0), "x")]));
    }

    #[test]
    fn test_update_clears_cache() {
        let mut store = DocumentStore::default();
        let uri = test_uri("a.rb");
        store.open(uri.clone(), "x = 1".into(), 1, "ruby");
        let revision = store.snapshot(&uri).unwrap().revision;
        assert!(store.store_cache(
            &uri,
            revision,
            vec![("textDocument/foldingRange", json!([])), ("textDocument/codeLens", Value::Null)]
        ));
        assert_eq!(store.cached(&uri, "textDocument/codeLens"), Some(Value::Null));

        store.update(&uri, 2, vec![edit((0, 4), (0, 5), "2")]);
        assert_eq!(store.get(&uri).unwrap().cache_len(), 0);
        assert_eq!(store.cached(&uri, "textDocument/codeLens"), None);
        assert_eq!(store.metrics().cache_hits, 1);
        assert_eq!(store.metrics().cache_misses, 1);
    }

    #[test]
    fn test_stale_revision_is_rejected() {
        let mut store = DocumentStore::default();
        let uri = test_uri("a.rb");
        store.open(uri.clone(), "x = 1".into(), 1, "ruby");
        let stale = store.snapshot(&uri).unwrap().revision;
        store.update(&uri, 2, vec![edit((0, 0), (0, 0), "y = 2\n")]);

        assert!(!store.store_cache(&uri, stale, vec![("textDocument/foldingRange", json!([]))]));
        assert_eq!(store.get(&uri).unwrap().cache_len(), 0);
    }

    #[test]
    fn test_reopen_drops_cache() {
        let mut store = DocumentStore::default();
        let uri = test_uri("a.rb");
        store.open(uri.clone(), "x = 1".into(), 1, "ruby");
        let revision = store.snapshot(&uri).unwrap().revision;
        store.store_cache(&uri, revision, vec![("textDocument/documentLink", json!([]))]);

        store.open(uri.clone(), "x = 1".into(), 5, "ruby");
        assert_eq!(store.cached(&uri, "textDocument/documentLink"), None);
    }

    #[test]
    fn test_past_limit() {
        let mut store = DocumentStore::new(DocumentStoreConfig {
            expensive_char_limit: 10,
            ..Default::default()
        });
        let uri = test_uri("big.rb");
        assert_eq!(
            store.open(uri.clone(), "a = 1\n".repeat(5), 1, "ruby"),
            OpenOutcome::PastLimit
        );
        assert!(store.snapshot(&uri).unwrap().past_limit);
        assert_eq!(
            store.open(test_uri("small.rb"), "a = 1".into(), 1, "ruby"),
            OpenOutcome::Opened
        );
    }

    #[test]
    fn test_classify_kinds() {
        assert_eq!(DocumentKind::classify("ruby", &test_uri("a.rb")), DocumentKind::Ruby);
        assert_eq!(DocumentKind::classify("erb", &test_uri("a.html.erb")), DocumentKind::Erb);
        assert_eq!(DocumentKind::classify("rbs", &test_uri("a.rbs")), DocumentKind::Rbs);
        assert_eq!(DocumentKind::classify("plaintext", &test_uri("a.rbs")), DocumentKind::Rbs);
        assert_eq!(DocumentKind::classify("", &test_uri("view.erb")), DocumentKind::Erb);
    }

    #[test]
    fn test_rbs_is_not_parsed() {
        let mut store = DocumentStore::default();
        let uri = test_uri("sig.rbs");
        store.open(uri.clone(), "class Foo\nend\n".into(), 1, "rbs");
        assert!(store.snapshot(&uri).unwrap().root().is_none());
    }

    #[test]
    fn test_erb_positions_map_to_template() {
        let mut store = DocumentStore::default();
        let uri = test_uri("view.html.erb");
        store.open(uri.clone(), "<p>é <%= user.name %></p>".into(), 1, "erb");
        let snapshot = store.snapshot(&uri).unwrap();

        let name_col = "<p>é <%= user.".encode_utf16().count() as u32;
        let node = snapshot.node_at(Position::new(0, name_col)).unwrap();
        assert_eq!(snapshot.node_text(node), "name");
        assert_eq!(snapshot.range_of(node).start, Position::new(0, name_col));
        assert!(!snapshot.source.in_ruby_code(snapshot.offset_at(Position::new(0, 1))));
    }

    #[test]
    fn test_position_roundtrip_at_line_ends() {
        let source = ParsedSource::new(DocumentKind::Ruby, "ab\r\ncd\n".into());
        let encoding = PositionEncoding::Utf16;
        assert_eq!(source.line(0), "ab");
        assert_eq!(source.position_at(4, encoding), Position::new(1, 0));
        assert_eq!(source.offset_at(Position::new(1, 2), encoding), 6);
        assert_eq!(source.offset_at(Position::new(9, 0), encoding), 7);
    }

    #[test]
    fn test_guard_serializes_access() {
        let guard = MutationGuard::new(DocumentStore::default());
        let uri = test_uri("a.rb");
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let guard = guard.clone();
                let uri = uri.clone();
                std::thread::spawn(move || {
                    guard.with(|store| {
                        if !store.contains(&uri) {
                            store.open(uri.clone(), String::new(), 0, "ruby");
                        }
                        store.update(&uri, i + 1, vec![edit((0, 0), (0, 0), "x")]);
                    });
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let text = guard.with(|store| store.get(&uri).unwrap().contents.to_string());
        assert_eq!(text, "xxxx");
    }

    // ========================================================================
    // Property-Based Tests
    // ========================================================================

    fn apply_to_string(text: &str, start: usize, end: usize, insert: &str) -> String {
        let mut out = String::new();
        out.push_str(&text[..start]);
        out.push_str(insert);
        out.push_str(&text[end..]);
        out
    }

    proptest! {
        #[test]
        fn prop_edits_match_string_model(
            initial in "[a-zé😀\n]{0,30}",
            edits in proptest::collection::vec((0usize..40, 0usize..40, "[a-z\n]{0,5}"), 1..6),
        ) {
            let mut store = DocumentStore::default();
            let uri = test_uri("model.rb");
            store.open(uri.clone(), initial.clone(), 0, "ruby");
            let mut model = initial;

            for (version, (a, b, insert)) in edits.into_iter().enumerate() {
                let boundaries: Vec<usize> = model
                    .char_indices()
                    .map(|(idx, _)| idx)
                    .chain(std::iter::once(model.len()))
                    .collect();
                let start = boundaries[a % boundaries.len()];
                let end = boundaries[b % boundaries.len()];
                let (start, end) = (start.min(end), start.max(end));

                let source = ParsedSource::new(DocumentKind::Ruby, model.clone());
                let from = source.position_at(start, PositionEncoding::Utf16);
                let to = source.position_at(end, PositionEncoding::Utf16);
                store.update(&uri, version as i32 + 1, vec![edit((from.line, from.character), (to.line, to.character), &insert)]);
                model = apply_to_string(&model, start, end, &insert);

                prop_assert_eq!(store.get(&uri).unwrap().contents.to_string(), model.clone());
            }
        }
    }
}

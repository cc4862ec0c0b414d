//
// workspace_index.rs
//
// Workspace symbol index: classes, modules, methods and constants per file
//

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{OnceLock, PoisonError, RwLock};

use globset::{Glob, GlobSet, GlobSetBuilder};
use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tower_lsp::lsp_types::{Location, Range, SymbolKind, Url};
use tree_sitter::Node;
use walkdir::WalkDir;

use crate::analysis::{bare_call_name, definition_name, Dispatcher, Listener};
use crate::config::IndexingConfig;
use crate::document_store::{DocumentKind, DocumentSnapshot};
use crate::encoding::PositionEncoding;
use crate::error::{AnalysisError, IndexError};

// ============================================================================
// Entries
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    Class,
    Module,
    Method,
    SingletonMethod,
    Constant,
}

impl EntryKind {
    pub fn symbol_kind(self) -> SymbolKind {
        match self {
            EntryKind::Class => SymbolKind::CLASS,
            EntryKind::Module => SymbolKind::MODULE,
            EntryKind::Method | EntryKind::SingletonMethod => SymbolKind::METHOD,
            EntryKind::Constant => SymbolKind::CONSTANT,
        }
    }

    pub fn is_namespace(self) -> bool {
        matches!(self, EntryKind::Class | EntryKind::Module)
    }

    pub fn is_method(self) -> bool {
        matches!(self, EntryKind::Method | EntryKind::SingletonMethod)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MixinKind {
    Include,
    Prepend,
    Extend,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mixin {
    pub kind: MixinKind,
    /// Constant as written at the call site
    pub name: String,
}

/// One declaration contributed by a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub name: String,
    /// `Shop::Cart`, `Shop::Cart#total` or `Shop::Cart.build`
    pub fully_qualified: String,
    pub kind: EntryKind,
    pub uri: Url,
    pub range: Range,
    pub comments: Vec<String>,
    pub parameters: Vec<String>,
    /// Superclass as written, classes only
    pub superclass: Option<String>,
    pub mixins: Vec<Mixin>,
    /// Enclosing namespace, fully qualified
    pub owner: Option<String>,
    /// Lexical scopes surrounding the declaration, outermost first
    pub nesting: Vec<String>,
}

impl Entry {
    pub fn location(&self) -> Location {
        Location::new(self.uri.clone(), self.range)
    }

    /// Markdown summary used by hover and completion documentation.
    pub fn documentation(&self) -> String {
        let mut doc = match self.kind {
            EntryKind::Class => match &self.superclass {
                Some(superclass) => format!("```ruby\nclass {} < {}\n```", self.fully_qualified, superclass),
                None => format!("```ruby\nclass {}\n```", self.fully_qualified),
            },
            EntryKind::Module => format!("```ruby\nmodule {}\n```", self.fully_qualified),
            EntryKind::Method | EntryKind::SingletonMethod => format!(
                "```ruby\ndef {}({})\n```",
                self.fully_qualified,
                self.parameters.join(", ")
            ),
            EntryKind::Constant => format!("```ruby\n{}\n```", self.fully_qualified),
        };
        if !self.comments.is_empty() {
            doc.push_str("\n\n");
            doc.push_str(&self.comments.join("\n"));
        }
        if let Ok(path) = self.uri.to_file_path() {
            doc.push_str(&format!("\n\n*Defined in {}*", path.display()));
        }
        doc
    }
}

// ============================================================================
// Indexable Paths
// ============================================================================

/// A source file plus the load path entry it is required through.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexablePath {
    pub load_path_entry: Option<PathBuf>,
    pub full_path: PathBuf,
}

impl IndexablePath {
    pub fn new(load_path_entry: Option<PathBuf>, full_path: PathBuf) -> Self {
        Self {
            load_path_entry,
            full_path,
        }
    }

    /// Pair `full_path` with the longest load path entry containing it.
    pub fn from_load_paths(full_path: PathBuf, load_paths: &[PathBuf]) -> Self {
        let load_path_entry = load_paths
            .iter()
            .filter(|entry| full_path.starts_with(entry))
            .max_by_key(|entry| entry.components().count())
            .cloned();
        Self {
            load_path_entry,
            full_path,
        }
    }

    /// `require` argument that loads this file (`shop/cart` for
    /// `lib/shop/cart.rb` under `lib`).
    pub fn require_path(&self) -> Option<String> {
        let entry = self.load_path_entry.as_ref()?;
        let relative = self.full_path.strip_prefix(entry).ok()?;
        let without_extension = relative.with_extension("");
        let parts: Vec<_> = without_extension
            .components()
            .map(|component| component.as_os_str().to_string_lossy().into_owned())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("/"))
        }
    }

    pub fn uri(&self) -> Option<Url> {
        Url::from_file_path(&self.full_path).ok()
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet, IndexError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|source| IndexError::Glob {
            pattern: pattern.clone(),
            source,
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|source| IndexError::Glob {
        pattern: patterns.join(", "),
        source,
    })
}

/// Every file under `root` matched by the included patterns and by none of
/// the excluded ones. Excluded directories are not descended into.
pub fn discover_indexable_paths(root: &Path, config: &IndexingConfig) -> Result<Vec<IndexablePath>, IndexError> {
    let included = build_globset(&config.included_patterns)?;
    let excluded = build_globset(&config.excluded_patterns)?;
    let load_paths = config.resolved_load_paths(root);

    let walker = WalkDir::new(root).sort_by_file_name().into_iter().filter_entry(|entry| {
        if entry.depth() == 0 || !entry.file_type().is_dir() {
            return true;
        }
        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        // Directory globs such as `**/vendor/**` need a path below the directory
        !excluded.is_match(relative.join("_"))
    });

    let mut paths = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) if err.depth() == 0 => return Err(err.into()),
            Err(err) => {
                log::warn!("Skipping unreadable workspace entry: {}", err);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        if included.is_match(relative) && !excluded.is_match(relative) {
            paths.push(IndexablePath::from_load_paths(entry.path().to_path_buf(), &load_paths));
        }
    }
    log::info!("Discovered {} indexable files under {}", paths.len(), root.display());
    Ok(paths)
}

// ============================================================================
// Declaration Collector
// ============================================================================

fn magic_comment_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"^#\s*(?:-\*-.*-\*-|(?:frozen_string_literal|typed|encoding|coding|warn_indent|shareable_constant_value)\s*:|rubocop:)",
        )
        .expect("magic comment pattern is valid")
    })
}

/// Fully qualified name of a lexical nesting. A `::Name` scope restarts at
/// the top level.
fn qualify(nesting: &[String]) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for scope in nesting {
        if let Some(absolute) = scope.strip_prefix("::") {
            parts.clear();
            parts.push(absolute);
        } else {
            parts.push(scope);
        }
    }
    parts.join("::")
}

fn join_name(owner: &str, name: &str) -> String {
    if let Some(absolute) = name.strip_prefix("::") {
        absolute.to_string()
    } else if owner.is_empty() {
        name.to_string()
    } else {
        format!("{}::{}", owner, name)
    }
}

enum Scope {
    /// Class or module, with the index of its entry
    Namespace { name: String, entry: usize },
    Singleton,
    Method,
    /// Definition whose name did not parse
    Anonymous,
}

struct DeclarationCollector<'a> {
    lines: Vec<&'a str>,
    excluded_magic_comments: &'a [String],
    entries: Vec<Entry>,
    scopes: Vec<Scope>,
}

impl<'a> DeclarationCollector<'a> {
    fn new(text: &'a str, excluded_magic_comments: &'a [String]) -> Self {
        Self {
            lines: text.lines().collect(),
            excluded_magic_comments,
            entries: Vec::new(),
            scopes: Vec::new(),
        }
    }

    fn nesting(&self) -> Vec<String> {
        self.scopes
            .iter()
            .filter_map(|scope| match scope {
                Scope::Namespace { name, .. } => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    fn in_singleton(&self) -> bool {
        matches!(self.scopes.last(), Some(Scope::Singleton))
    }

    fn current_namespace(&self) -> Option<usize> {
        match self.scopes.last() {
            Some(Scope::Namespace { entry, .. }) => Some(*entry),
            _ => None,
        }
    }

    fn is_magic(&self, comment: &str) -> bool {
        if magic_comment_pattern().is_match(comment) {
            return true;
        }
        let body = comment.trim_start_matches('#').trim();
        self.excluded_magic_comments
            .iter()
            .any(|excluded| body.starts_with(excluded.as_str()))
    }

    /// Comment block directly above `row`, top line first.
    fn comments_above(&self, row: usize) -> Vec<String> {
        let mut comments = Vec::new();
        let mut idx = row;
        while idx > 0 {
            idx -= 1;
            let line = self.lines.get(idx).map_or("", |line| line.trim());
            if !line.starts_with('#') {
                break;
            }
            if self.is_magic(line) {
                continue;
            }
            let text = line.trim_start_matches('#');
            comments.push(text.strip_prefix(' ').unwrap_or(text).to_string());
        }
        comments.reverse();
        comments
    }

    fn push_entry(&mut self, node: Node<'_>, snapshot: &DocumentSnapshot, entry: PartialEntry) -> usize {
        let nesting = self.nesting();
        let owner = qualify(&nesting);
        let receiver = if owner.is_empty() { "Object" } else { owner.as_str() };
        let fully_qualified = match entry.kind {
            EntryKind::Method => format!("{}#{}", receiver, entry.name),
            EntryKind::SingletonMethod => format!("{}.{}", receiver, entry.name),
            _ => join_name(&owner, &entry.name),
        };
        let name = entry
            .name
            .rsplit("::")
            .next()
            .unwrap_or(&entry.name)
            .to_string();
        self.entries.push(Entry {
            name,
            fully_qualified,
            kind: entry.kind,
            uri: snapshot.uri.clone(),
            range: snapshot.range_of(node),
            comments: self.comments_above(node.start_position().row),
            parameters: entry.parameters,
            superclass: entry.superclass,
            mixins: Vec::new(),
            owner: if owner.is_empty() { None } else { Some(owner) },
            nesting,
        });
        self.entries.len() - 1
    }

    fn on_namespace(&mut self, node: Node<'_>, snapshot: &DocumentSnapshot) {
        let Some(name) = definition_name(node, snapshot) else {
            self.scopes.push(Scope::Anonymous);
            return;
        };
        let kind = if node.kind() == "class" {
            EntryKind::Class
        } else {
            EntryKind::Module
        };
        let superclass = node.child_by_field_name("superclass").map(|superclass| {
            snapshot
                .node_text(superclass)
                .trim_start_matches('<')
                .trim()
                .to_string()
        });
        let entry = self.push_entry(
            node,
            snapshot,
            PartialEntry {
                name: name.to_string(),
                kind,
                parameters: Vec::new(),
                superclass,
            },
        );
        self.scopes.push(Scope::Namespace {
            name: name.to_string(),
            entry,
        });
    }

    fn on_method(&mut self, node: Node<'_>, snapshot: &DocumentSnapshot) {
        if let Some(name) = definition_name(node, snapshot) {
            let singleton = node.kind() == "singleton_method" || self.in_singleton();
            let parameters = node
                .child_by_field_name("parameters")
                .map(|parameters| {
                    let mut cursor = parameters.walk();
                    parameters
                        .named_children(&mut cursor)
                        .map(|parameter| snapshot.node_text(parameter).to_string())
                        .collect()
                })
                .unwrap_or_default();
            self.push_entry(
                node,
                snapshot,
                PartialEntry {
                    name: name.to_string(),
                    kind: if singleton {
                        EntryKind::SingletonMethod
                    } else {
                        EntryKind::Method
                    },
                    parameters,
                    superclass: None,
                },
            );
        }
        self.scopes.push(Scope::Method);
    }

    fn on_assignment(&mut self, node: Node<'_>, snapshot: &DocumentSnapshot) {
        if matches!(self.scopes.last(), Some(Scope::Method)) {
            return;
        }
        let Some(left) = node.child_by_field_name("left") else {
            return;
        };
        if !matches!(left.kind(), "constant" | "scope_resolution") {
            return;
        }
        let name = snapshot.node_text(left).to_string();
        self.push_entry(
            node,
            snapshot,
            PartialEntry {
                name,
                kind: EntryKind::Constant,
                parameters: Vec::new(),
                superclass: None,
            },
        );
    }

    fn on_call(&mut self, node: Node<'_>, snapshot: &DocumentSnapshot) {
        let kind = match bare_call_name(node, snapshot) {
            Some("include") => MixinKind::Include,
            Some("prepend") => MixinKind::Prepend,
            Some("extend") => MixinKind::Extend,
            _ => return,
        };
        let (Some(owner), Some(arguments)) = (self.current_namespace(), node.child_by_field_name("arguments")) else {
            return;
        };
        let mut cursor = arguments.walk();
        let names: Vec<String> = arguments
            .named_children(&mut cursor)
            .filter(|argument| matches!(argument.kind(), "constant" | "scope_resolution"))
            .map(|argument| snapshot.node_text(argument).to_string())
            .collect();
        self.entries[owner]
            .mixins
            .extend(names.into_iter().map(|name| Mixin { kind, name }));
    }
}

struct PartialEntry {
    name: String,
    kind: EntryKind,
    parameters: Vec<String>,
    superclass: Option<String>,
}

impl Listener for DeclarationCollector<'_> {
    fn node_kinds(&self) -> &'static [&'static str] {
        &["class", "module", "singleton_class", "method", "singleton_method", "assignment", "call"]
    }

    fn on_enter(&mut self, node: Node<'_>, snapshot: &DocumentSnapshot) -> Result<(), AnalysisError> {
        match node.kind() {
            "class" | "module" => self.on_namespace(node, snapshot),
            "singleton_class" => self.scopes.push(Scope::Singleton),
            "method" | "singleton_method" => self.on_method(node, snapshot),
            "assignment" => self.on_assignment(node, snapshot),
            "call" => self.on_call(node, snapshot),
            _ => {}
        }
        Ok(())
    }

    fn on_leave(&mut self, node: Node<'_>, _snapshot: &DocumentSnapshot) -> Result<(), AnalysisError> {
        if matches!(
            node.kind(),
            "class" | "module" | "singleton_class" | "method" | "singleton_method"
        ) {
            self.scopes.pop();
        }
        Ok(())
    }
}

/// Declarations in `text`, attributed to `uri`.
pub fn collect_entries(
    uri: Url,
    text: &str,
    encoding: PositionEncoding,
    excluded_magic_comments: &[String],
) -> Result<Vec<Entry>, AnalysisError> {
    let snapshot = DocumentSnapshot::from_text(uri, DocumentKind::Ruby, text.to_string(), encoding);
    let Some(root) = snapshot.root() else {
        return Ok(Vec::new());
    };
    let mut collector = DeclarationCollector::new(text, excluded_magic_comments);
    {
        let mut dispatcher = Dispatcher::new();
        dispatcher.register(&mut collector);
        dispatcher.visit(root, &snapshot)?;
    }
    Ok(collector.entries)
}

// ============================================================================
// Metrics
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct WorkspaceIndexMetrics {
    /// Files added one at a time (created on disk)
    pub single_file_insertions: u64,
    /// Files re-derived after a modification
    pub changes_handled: u64,
    pub deletions: u64,
    pub full_rebuilds: u64,
    pub files_indexed: u64,
    pub compactions: u64,
}

// ============================================================================
// Workspace Index
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOutcome {
    Completed,
    /// The stop check fired; the index holds what was read so far
    Cancelled,
}

struct IndexedFile {
    require_path: Option<String>,
    entries: Vec<Entry>,
}

#[derive(Default)]
struct IndexState {
    files: IndexMap<Url, IndexedFile>,
    /// Fully qualified constant name to its declarations
    constants: HashMap<String, Vec<Entry>>,
    /// Method name to every method with that name
    methods: HashMap<String, Vec<Entry>>,
    require_paths: HashMap<String, Url>,
}

impl IndexState {
    fn insert(&mut self, uri: Url, file: IndexedFile) {
        self.remove(&uri);
        for entry in &file.entries {
            let bucket = if entry.kind.is_method() {
                self.methods.entry(entry.name.clone()).or_default()
            } else {
                self.constants.entry(entry.fully_qualified.clone()).or_default()
            };
            bucket.push(entry.clone());
        }
        if let Some(require_path) = &file.require_path {
            self.require_paths.insert(require_path.clone(), uri.clone());
        }
        self.files.insert(uri, file);
    }

    /// Retract a file's contributions. Emptied buckets stay until `compact`.
    fn remove(&mut self, uri: &Url) -> bool {
        let Some(file) = self.files.shift_remove(uri) else {
            return false;
        };
        for entry in &file.entries {
            let bucket = if entry.kind.is_method() {
                self.methods.get_mut(&entry.name)
            } else {
                self.constants.get_mut(&entry.fully_qualified)
            };
            if let Some(bucket) = bucket {
                bucket.retain(|existing| &existing.uri != uri);
            }
        }
        if let Some(require_path) = &file.require_path {
            if self.require_paths.get(require_path) == Some(uri) {
                self.require_paths.remove(require_path);
            }
        }
        true
    }

    /// Fully qualified name `name` refers to from inside `nesting`.
    fn resolve_name(&self, name: &str, nesting: &[String]) -> Option<String> {
        if let Some(absolute) = name.strip_prefix("::") {
            return self.has_constant(absolute).then(|| absolute.to_string());
        }
        (0..=nesting.len()).rev().find_map(|depth| {
            let candidate = join_name(&qualify(&nesting[..depth]), name);
            self.has_constant(&candidate).then_some(candidate)
        })
    }

    fn has_constant(&self, fully_qualified: &str) -> bool {
        self.constants
            .get(fully_qualified)
            .map_or(false, |entries| !entries.is_empty())
    }

    fn linearize(&self, fully_qualified: &str, seen: &mut HashSet<String>, out: &mut Vec<String>) {
        if !seen.insert(fully_qualified.to_string()) {
            return;
        }
        let declarations: Vec<&Entry> = self
            .constants
            .get(fully_qualified)
            .map(|entries| entries.iter().filter(|entry| entry.kind.is_namespace()).collect())
            .unwrap_or_default();

        let mut inner_nesting = Vec::new();
        if let Some(first) = declarations.first() {
            inner_nesting = first.nesting.clone();
            inner_nesting.push(first.name.clone());
        }
        let resolve = |name: &str, nesting: &[String]| {
            self.resolve_name(name, nesting).unwrap_or_else(|| name.trim_start_matches("::").to_string())
        };

        for declaration in &declarations {
            for mixin in declaration.mixins.iter().rev() {
                if mixin.kind == MixinKind::Prepend {
                    self.linearize(&resolve(&mixin.name, &inner_nesting), seen, out);
                }
            }
        }
        out.push(fully_qualified.to_string());
        for declaration in &declarations {
            for mixin in declaration.mixins.iter().rev() {
                if mixin.kind == MixinKind::Include {
                    self.linearize(&resolve(&mixin.name, &inner_nesting), seen, out);
                }
            }
        }
        if let Some(declaration) = declarations.iter().find(|entry| entry.superclass.is_some()) {
            if let Some(superclass) = &declaration.superclass {
                self.linearize(&resolve(superclass, &declaration.nesting), seen, out);
            }
        }
    }
}

struct IndexSettings {
    encoding: PositionEncoding,
    excluded_magic_comments: Vec<String>,
}

/// Shared, lock-protected symbol index.
///
/// Files are parsed outside the lock; the write lock is only held to swap a
/// file's contributions in or out, so queries stay responsive during a
/// rebuild.
pub struct WorkspaceIndex {
    state: RwLock<IndexState>,
    settings: RwLock<IndexSettings>,
    metrics: RwLock<WorkspaceIndexMetrics>,
}

impl Default for WorkspaceIndex {
    fn default() -> Self {
        Self::new()
    }
}

fn fuzzy_score(candidate: &str, query: &str) -> Option<u8> {
    let candidate = candidate.to_lowercase();
    if query.is_empty() || candidate == query {
        return Some(0);
    }
    if candidate.starts_with(query) {
        return Some(1);
    }
    if candidate.contains(query) {
        return Some(2);
    }
    let mut chars = candidate.chars();
    query
        .chars()
        .all(|wanted| chars.any(|c| c == wanted))
        .then_some(3)
}

impl WorkspaceIndex {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(IndexState::default()),
            settings: RwLock::new(IndexSettings {
                encoding: PositionEncoding::default(),
                excluded_magic_comments: Vec::new(),
            }),
            metrics: RwLock::new(WorkspaceIndexMetrics::default()),
        }
    }

    /// Apply negotiated encoding and indexing options before the first rebuild.
    pub fn configure(&self, encoding: PositionEncoding, excluded_magic_comments: Vec<String>) {
        let mut settings = self.settings.write().unwrap_or_else(PoisonError::into_inner);
        settings.encoding = encoding;
        settings.excluded_magic_comments = excluded_magic_comments;
    }

    fn update_metrics(&self, f: impl FnOnce(&mut WorkspaceIndexMetrics)) {
        if let Ok(mut metrics) = self.metrics.write() {
            f(&mut metrics);
        }
    }

    fn parse_file(&self, path: &IndexablePath, source: &str) -> Result<(Url, IndexedFile), IndexError> {
        let uri = path.uri().ok_or_else(|| IndexError::Io {
            path: path.full_path.clone(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "not an absolute path"),
        })?;
        let entries = {
            let settings = self.settings.read().unwrap_or_else(PoisonError::into_inner);
            collect_entries(uri.clone(), source, settings.encoding, &settings.excluded_magic_comments)
        };
        let entries = entries.unwrap_or_else(|err| {
            log::warn!("Failed to collect declarations from {}: {}", uri, err);
            Vec::new()
        });
        Ok((
            uri,
            IndexedFile {
                require_path: path.require_path(),
                entries,
            },
        ))
    }

    fn read(path: &IndexablePath) -> Result<String, IndexError> {
        std::fs::read_to_string(&path.full_path).map_err(|source| IndexError::Io {
            path: path.full_path.clone(),
            source,
        })
    }

    // ========================================================================
    // Write Operations
    // ========================================================================

    /// Replace the contributions of `path` with declarations from `source`.
    pub fn index_source(&self, path: &IndexablePath, source: &str) -> Result<(), IndexError> {
        let (uri, file) = self.parse_file(path, source)?;
        log::trace!("Indexed {} ({} entries)", uri, file.entries.len());
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(uri, file);
        self.update_metrics(|metrics| metrics.files_indexed += 1);
        Ok(())
    }

    /// Add a newly created file.
    pub fn index_single(&self, path: &IndexablePath) -> Result<(), IndexError> {
        let source = Self::read(path)?;
        self.index_source(path, &source)?;
        self.update_metrics(|metrics| metrics.single_file_insertions += 1);
        Ok(())
    }

    /// Re-derive a modified file. A file that vanished is retracted instead.
    pub fn handle_change(&self, path: &IndexablePath) -> Result<(), IndexError> {
        self.update_metrics(|metrics| metrics.changes_handled += 1);
        match Self::read(path) {
            Ok(source) => self.index_source(path, &source),
            Err(IndexError::Io { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
                if let Some(uri) = path.uri() {
                    self.delete(&uri);
                }
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Retract every declaration contributed by `uri`.
    pub fn delete(&self, uri: &Url) -> bool {
        let removed = self
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(uri);
        if removed {
            self.update_metrics(|metrics| metrics.deletions += 1);
        }
        removed
    }

    /// Rebuild from `paths`, reporting percent complete after each file.
    ///
    /// `progress` returning false stops the rebuild early. Unreadable files
    /// are skipped with a warning.
    pub fn index_all(&self, paths: &[IndexablePath], mut progress: impl FnMut(u8) -> bool) -> IndexOutcome {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = IndexState::default();
        self.update_metrics(|metrics| metrics.full_rebuilds += 1);

        let total = paths.len().max(1);
        for (idx, path) in paths.iter().enumerate() {
            match Self::read(path).and_then(|source| self.index_source(path, &source)) {
                Ok(()) => {}
                Err(err) => log::warn!("Skipping {}: {}", path.full_path.display(), err),
            }
            let percent = ((idx + 1) * 100 / total) as u8;
            if !progress(percent) {
                log::info!("Indexing stopped after {} of {} files", idx + 1, paths.len());
                return IndexOutcome::Cancelled;
            }
        }
        IndexOutcome::Completed
    }

    /// Release space left behind by retracted files.
    pub fn compact(&self) {
        let mut guard = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let state = &mut *guard;
        state.constants.retain(|_, entries| !entries.is_empty());
        state.methods.retain(|_, entries| !entries.is_empty());
        for entries in state.constants.values_mut().chain(state.methods.values_mut()) {
            entries.shrink_to_fit();
        }
        state.constants.shrink_to_fit();
        state.methods.shrink_to_fit();
        state.require_paths.shrink_to_fit();
        state.files.shrink_to_fit();
        drop(guard);
        self.update_metrics(|metrics| metrics.compactions += 1);
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Declarations of the constant `name` as seen from `nesting`.
    pub fn resolve(&self, name: &str, nesting: &[String]) -> Vec<Entry> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state
            .resolve_name(name, nesting)
            .and_then(|fully_qualified| state.constants.get(&fully_qualified).cloned())
            .unwrap_or_default()
    }

    /// Fully qualified name `name` refers to from `nesting`.
    pub fn resolve_name(&self, name: &str, nesting: &[String]) -> Option<String> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.resolve_name(name, nesting)
    }

    pub fn methods_named(&self, name: &str) -> Vec<Entry> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.methods.get(name).cloned().unwrap_or_default()
    }

    /// Fuzzy match over every declaration, best matches first.
    pub fn search(&self, query: &str) -> Vec<Entry> {
        let query = query.to_lowercase();
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let mut scored: Vec<(u8, &Entry)> = state
            .constants
            .values()
            .chain(state.methods.values())
            .flatten()
            .filter_map(|entry| {
                let by_name = fuzzy_score(&entry.name, &query);
                let by_path = fuzzy_score(&entry.fully_qualified, &query).map(|score| score + 1);
                by_name.into_iter().chain(by_path).min().map(|score| (score, entry))
            })
            .collect();
        scored.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.fully_qualified.cmp(&b.1.fully_qualified)));
        scored.into_iter().map(|(_, entry)| entry.clone()).collect()
    }

    /// Constants whose name starts with `prefix`. A qualified prefix
    /// (`Shop::Ca`) matches against fully qualified names.
    pub fn prefix_search(&self, prefix: &str) -> Vec<Entry> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let qualified = prefix.contains("::");
        let prefix = prefix.trim_start_matches("::");
        let mut found: Vec<Entry> = state
            .constants
            .iter()
            .filter(|(fully_qualified, _)| {
                if qualified {
                    fully_qualified.starts_with(prefix)
                } else {
                    fully_qualified
                        .rsplit("::")
                        .next()
                        .map_or(false, |name| name.starts_with(prefix))
                }
            })
            .filter_map(|(_, entries)| entries.first().cloned())
            .collect();
        found.sort_by(|a, b| a.fully_qualified.cmp(&b.fully_qualified));
        found
    }

    /// One entry per distinct method name starting with `prefix`.
    pub fn method_prefix_search(&self, prefix: &str) -> Vec<Entry> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let mut found: Vec<Entry> = state
            .methods
            .iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .filter_map(|(_, entries)| entries.first().cloned())
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        found
    }

    pub fn find_by_require_path(&self, require_path: &str) -> Option<Url> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.require_paths.get(require_path).cloned()
    }

    pub fn require_paths_with_prefix(&self, prefix: &str) -> Vec<String> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let mut paths: Vec<String> = state
            .require_paths
            .keys()
            .filter(|path| path.starts_with(prefix))
            .cloned()
            .collect();
        paths.sort();
        paths
    }

    /// Method resolution order of a class or module, itself included.
    /// Constants that are not indexed end the chain.
    pub fn ancestors(&self, fully_qualified: &str) -> Vec<String> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        state.linearize(fully_qualified, &mut seen, &mut out);
        out
    }

    pub fn entries_for(&self, uri: &Url) -> Vec<Entry> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state
            .files
            .get(uri)
            .map(|file| file.entries.clone())
            .unwrap_or_default()
    }

    pub fn contains_file(&self, uri: &Url) -> bool {
        self.state
            .read()
            .map(|state| state.files.contains_key(uri))
            .unwrap_or(false)
    }

    pub fn file_count(&self) -> usize {
        self.state.read().map(|state| state.files.len()).unwrap_or(0)
    }

    /// Buckets currently held, including ones emptied since the last compaction.
    pub fn bucket_count(&self) -> usize {
        self.state
            .read()
            .map(|state| state.constants.len() + state.methods.len())
            .unwrap_or(0)
    }

    pub fn metrics(&self) -> WorkspaceIndexMetrics {
        self.metrics
            .read()
            .map(|metrics| metrics.clone())
            .unwrap_or_default()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, relative: &str, text: &str) -> PathBuf {
        let path = root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, text).unwrap();
        path
    }

    fn indexable(root: &Path, relative: &str) -> IndexablePath {
        IndexablePath::from_load_paths(root.join(relative), &[root.join("lib")])
    }

    fn entries(text: &str) -> Vec<Entry> {
        collect_entries(
            Url::parse("file:///workspace/lib/shop.rb").unwrap(),
            text,
            PositionEncoding::Utf16,
            &[],
        )
        .unwrap()
    }

    #[test]
    fn test_collects_nested_declarations() {
        let found = entries(
            "module Shop\n  TAX = 0.2\n  class Cart < Base\n    include Enumerable\n    def total(rate, round: true); end\n    def self.build; end\n    class << self\n      def empty; end\n    end\n  end\nend\n",
        );
        let names: Vec<_> = found.iter().map(|e| (e.fully_qualified.as_str(), e.kind)).collect();
        assert_eq!(
            names,
            vec![
                ("Shop", EntryKind::Module),
                ("Shop::TAX", EntryKind::Constant),
                ("Shop::Cart", EntryKind::Class),
                ("Shop::Cart#total", EntryKind::Method),
                ("Shop::Cart.build", EntryKind::SingletonMethod),
                ("Shop::Cart.empty", EntryKind::SingletonMethod),
            ]
        );
        let cart = &found[2];
        assert_eq!(cart.superclass.as_deref(), Some("Base"));
        assert_eq!(cart.nesting, vec!["Shop".to_string()]);
        assert_eq!(
            cart.mixins,
            vec![Mixin {
                kind: MixinKind::Include,
                name: "Enumerable".to_string()
            }]
        );
        assert_eq!(found[3].parameters, vec!["rate".to_string(), "round: true".to_string()]);
        assert_eq!(found[3].owner.as_deref(), Some("Shop::Cart"));
    }

    #[test]
    fn test_comments_skip_magic_comments() {
        let found = entries("# frozen_string_literal: true\n# A shopping cart.\n# Holds items.\nclass Cart\nend\n");
        assert_eq!(found[0].comments, vec!["A shopping cart.", "Holds items."]);

        let excluded = collect_entries(
            Url::parse("file:///workspace/lib/shop.rb").unwrap(),
            "# internal: yes\n# Docs\nclass Cart\nend\n",
            PositionEncoding::Utf16,
            &["internal:".to_string()],
        )
        .unwrap();
        assert_eq!(excluded[0].comments, vec!["Docs"]);
    }

    #[test]
    fn test_require_path_uses_longest_load_path() {
        let root = PathBuf::from("/workspace");
        let path = IndexablePath::from_load_paths(
            root.join("lib/shop/models/cart.rb"),
            &[root.join("lib"), root.join("lib/shop")],
        );
        assert_eq!(path.load_path_entry, Some(root.join("lib/shop")));
        assert_eq!(path.require_path().as_deref(), Some("models/cart"));

        let outside = IndexablePath::from_load_paths(root.join("bin/run.rb"), &[root.join("lib")]);
        assert_eq!(outside.require_path(), None);
    }

    #[test]
    fn test_single_change_delete_lifecycle() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(root, "lib/cart.rb", "class Cart\n  def total; end\nend\n");
        let path = indexable(root, "lib/cart.rb");
        let index = WorkspaceIndex::new();

        index.index_single(&path).unwrap();
        assert_eq!(index.resolve("Cart", &[]).len(), 1);
        assert_eq!(index.methods_named("total").len(), 1);
        assert_eq!(index.find_by_require_path("cart"), path.uri());

        write(root, "lib/cart.rb", "class Basket\nend\n");
        index.handle_change(&path).unwrap();
        assert!(index.resolve("Cart", &[]).is_empty());
        assert!(index.methods_named("total").is_empty());
        assert_eq!(index.resolve("Basket", &[]).len(), 1);

        assert!(index.delete(&path.uri().unwrap()));
        assert!(index.resolve("Basket", &[]).is_empty());
        assert_eq!(index.file_count(), 0);

        let metrics = index.metrics();
        assert_eq!(metrics.single_file_insertions, 1);
        assert_eq!(metrics.changes_handled, 1);
        assert_eq!(metrics.deletions, 1);
        assert_eq!(metrics.full_rebuilds, 0);
    }

    #[test]
    fn test_change_of_missing_file_retracts_it() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        let file = write(root, "lib/gone.rb", "class Gone; end\n");
        let path = indexable(root, "lib/gone.rb");
        let index = WorkspaceIndex::new();
        index.index_single(&path).unwrap();
        std::fs::remove_file(file).unwrap();
        index.handle_change(&path).unwrap();
        assert!(index.resolve("Gone", &[]).is_empty());
    }

    #[test]
    fn test_resolve_walks_nesting_outward() {
        let index = WorkspaceIndex::new();
        let path = IndexablePath::new(None, PathBuf::from("/workspace/a.rb"));
        index
            .index_source(&path, "class Item; end\nmodule Shop\n  class Item; end\nend\n")
            .unwrap();
        let nesting = vec!["Shop".to_string(), "Cart".to_string()];
        assert_eq!(index.resolve_name("Item", &nesting).as_deref(), Some("Shop::Item"));
        assert_eq!(index.resolve_name("::Item", &nesting).as_deref(), Some("Item"));
        assert_eq!(index.resolve_name("Missing", &nesting), None);
    }

    #[test]
    fn test_ancestors_follow_mixins_and_superclass() {
        let index = WorkspaceIndex::new();
        let path = IndexablePath::new(None, PathBuf::from("/workspace/a.rb"));
        index
            .index_source(
                &path,
                "module Loud; end\nmodule Tracked; end\nclass Base; end\nclass Cart < Base\n  include Tracked\n  prepend Loud\nend\n",
            )
            .unwrap();
        assert_eq!(index.ancestors("Cart"), vec!["Loud", "Cart", "Tracked", "Base"]);
    }

    #[test]
    fn test_ancestors_stop_at_cycles() {
        let index = WorkspaceIndex::new();
        let path = IndexablePath::new(None, PathBuf::from("/workspace/a.rb"));
        index
            .index_source(&path, "module A\n  include B\nend\nmodule B\n  include A\nend\n")
            .unwrap();
        assert_eq!(index.ancestors("A"), vec!["A", "B"]);
    }

    #[test]
    fn test_search_ranks_exact_matches_first() {
        let index = WorkspaceIndex::new();
        let path = IndexablePath::new(None, PathBuf::from("/workspace/a.rb"));
        index
            .index_source(&path, "class Cart; end\nclass CartItem; end\nclass Scarf; end\n")
            .unwrap();
        let names: Vec<_> = index.search("cart").into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["Cart", "CartItem"]);
        assert_eq!(index.search("crt").len(), 2);
        assert_eq!(index.prefix_search("Car").len(), 2);
    }

    #[test]
    fn test_index_all_reports_progress_and_stops() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        for idx in 0..4 {
            write(root, &format!("lib/file_{}.rb", idx), &format!("class File{}; end\n", idx));
        }
        let config = IndexingConfig::default();
        let paths = discover_indexable_paths(root, &config).unwrap();
        assert_eq!(paths.len(), 4);

        let index = WorkspaceIndex::new();
        let mut seen = Vec::new();
        let outcome = index.index_all(&paths, |percent| {
            seen.push(percent);
            true
        });
        assert_eq!(outcome, IndexOutcome::Completed);
        assert_eq!(seen, vec![25, 50, 75, 100]);
        assert_eq!(index.file_count(), 4);

        let outcome = index.index_all(&paths, |percent| percent < 50);
        assert_eq!(outcome, IndexOutcome::Cancelled);
        assert_eq!(index.file_count(), 2);
    }

    #[test]
    fn test_discovery_honors_excludes() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(root, "lib/a.rb", "");
        write(root, "vendor/bundle/gem.rb", "");
        write(root, "tmp/cache.rb", "");
        write(root, "README.md", "");
        let paths = discover_indexable_paths(root, &IndexingConfig::default()).unwrap();
        let found: Vec<_> = paths
            .iter()
            .map(|path| path.full_path.strip_prefix(root).unwrap().to_path_buf())
            .collect();
        assert_eq!(found, vec![PathBuf::from("lib/a.rb")]);
        assert_eq!(paths[0].require_path().as_deref(), Some("a"));
    }

    #[test]
    fn test_compact_drops_empty_buckets() {
        let index = WorkspaceIndex::new();
        let path = IndexablePath::new(None, PathBuf::from("/workspace/a.rb"));
        index.index_source(&path, "class A\n  def b; end\nend\n").unwrap();
        index.delete(&path.uri().unwrap());
        assert_eq!(index.bucket_count(), 2);
        index.compact();
        assert_eq!(index.bucket_count(), 0);
    }

    #[test]
    fn test_compact_keeps_live_entries() {
        let index = WorkspaceIndex::new();
        let kept = IndexablePath::new(None, PathBuf::from("/workspace/kept.rb"));
        let gone = IndexablePath::new(None, PathBuf::from("/workspace/gone.rb"));
        index.index_source(&kept, "class Kept
  def stay; end
end
").unwrap();
        index.index_source(&gone, "class Gone
  def leave; end
end
").unwrap();
        index.delete(&gone.uri().unwrap());

        index.compact();
        assert_eq!(index.bucket_count(), 2);
        assert_eq!(index.resolve("Kept", &[]).len(), 1);
        assert_eq!(index.methods_named("stay").len(), 1);
        assert!(index.resolve("Gone", &[]).is_empty());
        assert_eq!(index.metrics().compactions, 1);
    }
}

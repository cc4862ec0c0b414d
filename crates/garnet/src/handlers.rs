//
// handlers.rs
//
// Read-only feature analyses over a document snapshot and the workspace index
//

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::{json, Value};
use tower_lsp::lsp_types::*;
use tree_sitter::Node;

use crate::document_store::DocumentSnapshot;
use crate::workspace_index::{Entry, EntryKind, WorkspaceIndex};

const WORKSPACE_SYMBOL_LIMIT: usize = 100;

// ============================================================================
// Tree helpers
// ============================================================================

/// Names of the classes and modules lexically enclosing `node`, outermost
/// first, as written (`Shop::Cart` stays one element).
pub fn nesting_at(snapshot: &DocumentSnapshot, node: Node<'_>) -> Vec<String> {
    let mut nesting = Vec::new();
    let mut current = node.parent();
    while let Some(parent) = current {
        if matches!(parent.kind(), "class" | "module") {
            let is_own_name = parent
                .child_by_field_name("name")
                .map_or(false, |name| name.byte_range().contains(&node.start_byte()));
            if !is_own_name {
                if let Some(name) = parent.child_by_field_name("name") {
                    nesting.push(snapshot.node_text(name).to_string());
                }
            }
        }
        current = parent.parent();
    }
    nesting.reverse();
    nesting
}

/// The complete constant path a constant node belongs to (`Shop::Cart` for
/// either segment of it).
fn constant_path(node: Node<'_>) -> Option<Node<'_>> {
    let mut path = match node.kind() {
        "constant" | "scope_resolution" => node,
        _ => return None,
    };
    while let Some(parent) = path.parent() {
        let is_name = parent.kind() == "scope_resolution"
            && parent
                .child_by_field_name("name")
                .map_or(false, |name| name.id() == path.id());
        if !is_name {
            break;
        }
        path = parent;
    }
    Some(path)
}

/// Method name of the call `node` names, if it is a call's method identifier.
fn called_method<'s>(snapshot: &'s DocumentSnapshot, node: Node<'_>) -> Option<&'s str> {
    let parent = node.parent()?;
    let is_method = parent.kind() == "call"
        && parent
            .child_by_field_name("method")
            .map_or(false, |method| method.id() == node.id());
    let bare_identifier = node.kind() == "identifier" && parent.kind() != "call" && is_call_like(node);
    (is_method || bare_identifier).then(|| snapshot.node_text(node))
}

/// An identifier statement that is not a local variable is a receiver-less
/// call; tree-sitter only knows which when the name was assigned earlier.
fn is_call_like(node: Node<'_>) -> bool {
    matches!(
        node.parent().map(|parent| parent.kind()),
        Some("body_statement" | "program" | "then" | "else" | "do_block" | "block_body")
    )
}

/// String argument of `require` / `require_relative` enclosing `node`.
fn require_argument<'s>(snapshot: &'s DocumentSnapshot, node: Node<'_>) -> Option<(&'s str, &'s str)> {
    let string = if node.kind() == "string" {
        node
    } else {
        node.parent().filter(|parent| parent.kind() == "string")?
    };
    let call = string.parent()?.parent()?;
    if call.kind() != "call" || call.child_by_field_name("receiver").is_some() {
        return None;
    }
    let method = snapshot.node_text(call.child_by_field_name("method")?);
    if !matches!(method, "require" | "require_relative") {
        return None;
    }
    let content = string_content(snapshot, string)?;
    Some((method, content))
}

fn string_content<'s>(snapshot: &'s DocumentSnapshot, string: Node<'_>) -> Option<&'s str> {
    let mut cursor = string.walk();
    let content = string
        .named_children(&mut cursor)
        .find(|child| child.kind() == "string_content")?;
    Some(snapshot.node_text(content))
}

fn markdown(value: String) -> MarkupContent {
    MarkupContent {
        kind: MarkupKind::Markdown,
        value,
    }
}

fn joined_documentation(entries: &[Entry]) -> Option<String> {
    if entries.is_empty() {
        return None;
    }
    Some(
        entries
            .iter()
            .map(Entry::documentation)
            .collect::<Vec<_>>()
            .join("\n\n---\n\n"),
    )
}

// ============================================================================
// Hover
// ============================================================================

/// Documentation for the constant or method call under the cursor.
pub fn hover(snapshot: &DocumentSnapshot, index: &WorkspaceIndex, position: Position) -> Option<Hover> {
    let node = snapshot.node_at(position)?;

    let (entries, target) = if let Some(path) = constant_path(node) {
        let name = snapshot.node_text(path);
        (index.resolve(name, &nesting_at(snapshot, path)), path)
    } else if let Some(method) = called_method(snapshot, node) {
        (index.methods_named(method), node)
    } else {
        return None;
    };

    Some(Hover {
        contents: HoverContents::Markup(markdown(joined_documentation(&entries)?)),
        range: Some(snapshot.range_of(target)),
    })
}

// ============================================================================
// Completion
// ============================================================================

fn require_prefix_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"\brequire(?:_relative)?\s*\(?\s*["']([^"']*)$"#).expect("valid require regex")
    })
}

/// Characters that can belong to the constant or method name being typed.
fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | ':' | '?' | '!')
}

fn completion_item(entry: &Entry) -> CompletionItem {
    let kind = match entry.kind {
        EntryKind::Class => CompletionItemKind::CLASS,
        EntryKind::Module => CompletionItemKind::MODULE,
        EntryKind::Method | EntryKind::SingletonMethod => CompletionItemKind::METHOD,
        EntryKind::Constant => CompletionItemKind::CONSTANT,
    };
    let data = if entry.kind.is_method() {
        json!({ "method": entry.name })
    } else {
        json!({ "constant": entry.fully_qualified })
    };
    CompletionItem {
        label: entry.name.clone(),
        kind: Some(kind),
        detail: Some(entry.fully_qualified.clone()),
        data: Some(data),
        ..Default::default()
    }
}

/// Require paths inside `require` strings, constants for capitalized
/// prefixes, and methods after a dot or for lowercase prefixes.
pub fn completion(
    snapshot: &DocumentSnapshot,
    index: &WorkspaceIndex,
    position: Position,
) -> Option<CompletionResponse> {
    let line = snapshot.source.line(position.line as usize);
    let cursor = snapshot.encoding.column_to_byte(line, position.character);
    let before = &line[..cursor];

    if let Some(captures) = require_prefix_pattern().captures(before) {
        let prefix = captures.get(1).map_or("", |m| m.as_str());
        let start = Position::new(
            position.line,
            position.character.saturating_sub(snapshot.encoding.len(prefix)),
        );
        let items = index
            .require_paths_with_prefix(prefix)
            .into_iter()
            .map(|path| CompletionItem {
                label: path.clone(),
                kind: Some(CompletionItemKind::FILE),
                text_edit: Some(CompletionTextEdit::Edit(TextEdit::new(
                    Range::new(start, position),
                    path,
                ))),
                ..Default::default()
            })
            .collect();
        return Some(CompletionResponse::Array(items));
    }

    let token_start = before
        .char_indices()
        .rev()
        .take_while(|(_, c)| is_name_char(*c))
        .last()
        .map_or(cursor, |(idx, _)| idx);
    let token = &before[token_start..];
    let after_dot = before[..token_start].ends_with('.');

    let entries = if after_dot {
        index.method_prefix_search(token)
    } else if token.starts_with(|c: char| c.is_uppercase()) || token.starts_with("::") {
        let node = snapshot.node_at(position);
        let nesting = node.map(|node| nesting_at(snapshot, node)).unwrap_or_default();
        let mut found = index.prefix_search(token);
        // Constants declared in an enclosing namespace sort first
        found.sort_by_key(|entry| {
            let owner = entry.owner.clone().unwrap_or_default();
            !nesting.iter().any(|scope| owner.ends_with(scope.as_str()))
        });
        found
    } else if !token.is_empty() {
        index.method_prefix_search(token)
    } else {
        return None;
    };

    Some(CompletionResponse::Array(entries.iter().map(completion_item).collect()))
}

/// Attach documentation to an item produced by `completion`.
pub fn completion_resolve(index: &WorkspaceIndex, mut item: CompletionItem) -> CompletionItem {
    let entries = match &item.data {
        Some(data) => {
            if let Some(constant) = data.get("constant").and_then(Value::as_str) {
                index.resolve(constant, &[])
            } else if let Some(method) = data.get("method").and_then(Value::as_str) {
                index.methods_named(method)
            } else {
                Vec::new()
            }
        }
        None => Vec::new(),
    };
    if let Some(documentation) = joined_documentation(&entries) {
        item.documentation = Some(Documentation::MarkupContent(markdown(documentation)));
    }
    item
}

// ============================================================================
// Signature Help
// ============================================================================

pub fn signature_help(
    snapshot: &DocumentSnapshot,
    index: &WorkspaceIndex,
    position: Position,
) -> Option<SignatureHelp> {
    let offset = snapshot.offset_at(position);
    let root = snapshot.root()?;
    let mut node = root.named_descendant_for_byte_range(offset.saturating_sub(1), offset.saturating_sub(1))?;

    // Innermost call whose argument list contains the cursor
    let (name, arguments) = loop {
        if node.kind() == "call" {
            if let (Some(method), Some(arguments)) =
                (node.child_by_field_name("method"), node.child_by_field_name("arguments"))
            {
                if arguments.start_byte() < offset && offset <= arguments.end_byte() {
                    break (snapshot.node_text(method), arguments);
                }
            }
        }
        node = node.parent()?;
    };

    let entries = index.methods_named(name);
    if entries.is_empty() {
        return None;
    }

    let mut cursor = arguments.walk();
    let active_parameter = arguments
        .children(&mut cursor)
        .filter(|child| child.kind() == "," && child.end_byte() <= offset)
        .count() as u32;

    let signatures = entries
        .iter()
        .map(|entry| SignatureInformation {
            label: format!("{}({})", entry.name, entry.parameters.join(", ")),
            documentation: (!entry.comments.is_empty())
                .then(|| Documentation::MarkupContent(markdown(entry.comments.join("\n")))),
            parameters: Some(
                entry
                    .parameters
                    .iter()
                    .map(|parameter| ParameterInformation {
                        label: ParameterLabel::Simple(parameter.clone()),
                        documentation: None,
                    })
                    .collect(),
            ),
            active_parameter: None,
        })
        .collect();

    Some(SignatureHelp {
        signatures,
        active_signature: Some(0),
        active_parameter: Some(active_parameter),
    })
}

// ============================================================================
// Definition
// ============================================================================

pub fn definition(
    snapshot: &DocumentSnapshot,
    index: &WorkspaceIndex,
    position: Position,
) -> Option<GotoDefinitionResponse> {
    let node = snapshot.node_at(position)?;

    let locations: Vec<Location> = if let Some((method, content)) = require_argument(snapshot, node) {
        let target = if method == "require_relative" {
            relative_target(&snapshot.uri, content)
        } else {
            index.find_by_require_path(content)
        };
        target
            .map(|uri| Location::new(uri, Range::default()))
            .into_iter()
            .collect()
    } else if let Some(path) = constant_path(node) {
        index
            .resolve(snapshot.node_text(path), &nesting_at(snapshot, path))
            .iter()
            .map(Entry::location)
            .collect()
    } else if let Some(method) = called_method(snapshot, node) {
        index.methods_named(method).iter().map(Entry::location).collect()
    } else {
        return None;
    };

    (!locations.is_empty()).then_some(GotoDefinitionResponse::Array(locations))
}

fn relative_target(from: &Url, relative: &str) -> Option<Url> {
    let path = from.to_file_path().ok()?;
    let mut target = path.parent()?.join(relative);
    if target.extension().is_none() {
        target.set_extension("rb");
    }
    if !target.is_file() {
        return None;
    }
    Url::from_file_path(&target).ok()
}

// ============================================================================
// Document Highlight
// ============================================================================

fn is_write(node: Node<'_>) -> bool {
    let Some(parent) = node.parent() else {
        return false;
    };
    match parent.kind() {
        "assignment" | "operator_assignment" => parent
            .child_by_field_name("left")
            .map_or(false, |left| left.id() == node.id()),
        "method_parameters" | "block_parameters" | "lambda_parameters" | "optional_parameter"
        | "keyword_parameter" => true,
        _ => false,
    }
}

/// Occurrences of the variable, constant or method under the cursor.
/// Local variables are scoped to the enclosing method.
pub fn document_highlight(snapshot: &DocumentSnapshot, position: Position) -> Vec<DocumentHighlight> {
    let Some(node) = snapshot.node_at(position) else {
        return Vec::new();
    };
    let kind = node.kind();
    if !matches!(
        kind,
        "identifier" | "constant" | "instance_variable" | "class_variable" | "global_variable"
    ) {
        return Vec::new();
    }
    let name = snapshot.node_text(node);

    let is_method_name = kind == "identifier"
        && node.parent().map_or(false, |parent| {
            matches!(parent.kind(), "call" | "method" | "singleton_method")
                && ["method", "name"].iter().any(|field| {
                    parent
                        .child_by_field_name(field)
                        .map_or(false, |child| child.id() == node.id())
                })
        });

    let scope = if kind == "identifier" && !is_method_name {
        let mut scope = node;
        while let Some(parent) = scope.parent() {
            scope = parent;
            if matches!(parent.kind(), "method" | "singleton_method") {
                break;
            }
        }
        scope
    } else {
        match snapshot.root() {
            Some(root) => root,
            None => return Vec::new(),
        }
    };

    let mut highlights = Vec::new();
    let mut cursor = scope.walk();
    loop {
        let current = cursor.node();
        if current.kind() == kind && snapshot.node_text(current) == name {
            let highlight_kind = match kind {
                "constant" => DocumentHighlightKind::TEXT,
                _ if is_write(current) => DocumentHighlightKind::WRITE,
                _ => DocumentHighlightKind::READ,
            };
            highlights.push(DocumentHighlight {
                range: snapshot.range_of(current),
                kind: Some(highlight_kind),
            });
        }
        if cursor.goto_first_child() {
            continue;
        }
        loop {
            if cursor.node().id() == scope.id() {
                return highlights;
            }
            if cursor.goto_next_sibling() {
                break;
            }
            if !cursor.goto_parent() {
                return highlights;
            }
        }
    }
}

// ============================================================================
// Inlay Hints
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct InlayHintOptions {
    pub implicit_rescue: bool,
    pub implicit_hash_value: bool,
}

/// Hints for bare `rescue` clauses and hash shorthand (`{ name: }`).
pub fn inlay_hints(snapshot: &DocumentSnapshot, range: Range, options: InlayHintOptions) -> Vec<InlayHint> {
    let Some(root) = snapshot.root() else {
        return Vec::new();
    };
    let start = snapshot.offset_at(range.start);
    let end = snapshot.offset_at(range.end);

    let mut hints = Vec::new();
    let mut cursor = root.walk();
    loop {
        let node = cursor.node();
        let overlaps = node.start_byte() <= end && node.end_byte() >= start;
        if overlaps && node.is_named() {
            match node.kind() {
                "rescue" if options.implicit_rescue && node.child_by_field_name("exceptions").is_none() => {
                    if let Some(keyword) = node.child(0) {
                        hints.push(InlayHint {
                            position: snapshot.position_at(keyword.end_byte()),
                            label: InlayHintLabel::String("StandardError".to_string()),
                            kind: None,
                            text_edits: None,
                            tooltip: Some(InlayHintTooltip::String(
                                "StandardError is implied in a bare rescue".to_string(),
                            )),
                            padding_left: Some(true),
                            padding_right: None,
                            data: None,
                        });
                    }
                }
                "pair" if options.implicit_hash_value && node.child_by_field_name("value").is_none() => {
                    if let Some(key) = node.child_by_field_name("key") {
                        let name = snapshot.node_text(key).trim_end_matches(':').to_string();
                        hints.push(InlayHint {
                            position: snapshot.position_at(node.end_byte()),
                            label: InlayHintLabel::String(name.clone()),
                            kind: None,
                            text_edits: None,
                            tooltip: Some(InlayHintTooltip::String(format!(
                                "This is the same as {0}: {0}",
                                name
                            ))),
                            padding_left: Some(true),
                            padding_right: None,
                            data: None,
                        });
                    }
                }
                _ => {}
            }
        }
        if overlaps && cursor.goto_first_child() {
            continue;
        }
        loop {
            if cursor.goto_next_sibling() {
                break;
            }
            if !cursor.goto_parent() {
                return hints;
            }
        }
    }
}

// ============================================================================
// Workspace Symbol
// ============================================================================

#[allow(deprecated)]
pub fn workspace_symbol(index: &WorkspaceIndex, query: &str) -> Vec<SymbolInformation> {
    index
        .search(query)
        .into_iter()
        .take(WORKSPACE_SYMBOL_LIMIT)
        .map(|entry| SymbolInformation {
            name: entry.name.clone(),
            kind: entry.kind.symbol_kind(),
            tags: None,
            deprecated: None,
            location: entry.location(),
            container_name: entry.owner.clone(),
        })
        .collect()
}

// ============================================================================
// Type Hierarchy
// ============================================================================

/// Type hierarchy item for a class or module declaration.
fn hierarchy_item(entry: &Entry) -> Value {
    json!({
        "name": entry.name,
        "kind": entry.kind.symbol_kind(),
        "detail": entry.fully_qualified,
        "uri": entry.uri,
        "range": entry.range,
        "selectionRange": entry.range,
        "data": { "fullyQualified": entry.fully_qualified },
    })
}

fn first_namespace(entries: Vec<Entry>) -> Option<Entry> {
    entries.into_iter().find(|entry| entry.kind.is_namespace())
}

pub fn prepare_type_hierarchy(
    snapshot: &DocumentSnapshot,
    index: &WorkspaceIndex,
    position: Position,
) -> Option<Value> {
    let path = constant_path(snapshot.node_at(position)?)?;
    let entry = first_namespace(index.resolve(snapshot.node_text(path), &nesting_at(snapshot, path)))?;
    Some(Value::Array(vec![hierarchy_item(&entry)]))
}

/// Direct supertypes: the superclass plus included and prepended modules.
pub fn supertypes(index: &WorkspaceIndex, item: &Value) -> Option<Value> {
    let fully_qualified = item.get("data")?.get("fullyQualified")?.as_str()?;
    let declarations: Vec<Entry> = index
        .resolve(fully_qualified, &[])
        .into_iter()
        .filter(|entry| entry.kind.is_namespace())
        .collect();

    let mut seen = HashSet::new();
    let mut items = Vec::new();
    for declaration in &declarations {
        let mut inner = declaration.nesting.clone();
        inner.push(declaration.name.clone());
        let parents = declaration
            .superclass
            .iter()
            .map(|superclass| (superclass.as_str(), declaration.nesting.as_slice()))
            .chain(
                declaration
                    .mixins
                    .iter()
                    .map(|mixin| (mixin.name.as_str(), inner.as_slice())),
            );
        for (name, nesting) in parents {
            let Some(resolved) = index.resolve_name(name, nesting) else {
                continue;
            };
            if !seen.insert(resolved.clone()) {
                continue;
            }
            if let Some(entry) = first_namespace(index.resolve(&resolved, &[])) {
                items.push(hierarchy_item(&entry));
            }
        }
    }
    Some(Value::Array(items))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::test_support::ruby_snapshot;
    use crate::workspace_index::IndexablePath;
    use std::path::PathBuf;

    const CART: &str = "\
module Shop
  # A shopping cart
  class Cart < Base
    include Enumerable

    def add(item, quantity)
    end
  end
end
";

    fn index() -> WorkspaceIndex {
        let index = WorkspaceIndex::new();
        let lib = PathBuf::from("/workspace/lib");
        index
            .index_source(&IndexablePath::new(Some(lib.clone()), lib.join("shop/cart.rb")), CART)
            .unwrap();
        index
            .index_source(
                &IndexablePath::new(Some(lib.clone()), lib.join("shop/base.rb")),
                "module Shop\n  class Base\n  end\nend\nmodule Enumerable\nend\n",
            )
            .unwrap();
        index
    }

    #[test]
    fn test_nesting_at_skips_own_name() {
        let snapshot = ruby_snapshot("module Shop\n  class Cart\n    X = 1\n  end\nend\n");
        let x = snapshot.node_at(Position::new(2, 4)).unwrap();
        assert_eq!(nesting_at(&snapshot, x), vec!["Shop", "Cart"]);
        let cart = snapshot.node_at(Position::new(1, 9)).unwrap();
        assert_eq!(nesting_at(&snapshot, cart), vec!["Shop"]);
    }

    #[test]
    fn test_hover_on_constant_shows_documentation() {
        let index = index();
        let snapshot = ruby_snapshot("module Shop\n  Cart.new\nend\n");
        let hover = hover(&snapshot, &index, Position::new(1, 3)).unwrap();
        let HoverContents::Markup(content) = hover.contents else {
            panic!("expected markup");
        };
        assert!(content.value.contains("class Shop::Cart < Base"));
        assert!(content.value.contains("A shopping cart"));
    }

    #[test]
    fn test_hover_on_unknown_constant_is_none() {
        let snapshot = ruby_snapshot("Missing.new\n");
        assert!(hover(&snapshot, &index(), Position::new(0, 2)).is_none());
    }

    #[test]
    fn test_completion_of_constants_and_methods() {
        let index = index();
        let snapshot = ruby_snapshot("Shop::Ca\ncart.ad\n");
        let Some(CompletionResponse::Array(items)) = completion(&snapshot, &index, Position::new(0, 8)) else {
            panic!("expected constant completion");
        };
        assert_eq!(items[0].label, "Cart");

        let Some(CompletionResponse::Array(items)) = completion(&snapshot, &index, Position::new(1, 7)) else {
            panic!("expected method completion");
        };
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].kind, Some(CompletionItemKind::METHOD));

        let resolved = completion_resolve(&index, items[0].clone());
        assert!(resolved.documentation.is_some());
    }

    #[test]
    fn test_completion_of_require_paths() {
        let index = index();
        let snapshot = ruby_snapshot("require \"shop/c\"\n");
        let Some(CompletionResponse::Array(items)) = completion(&snapshot, &index, Position::new(0, 15)) else {
            panic!("expected require completion");
        };
        let labels: Vec<_> = items.iter().map(|item| item.label.as_str()).collect();
        assert_eq!(labels, vec!["shop/cart"]);
    }

    #[test]
    fn test_signature_help_tracks_active_parameter() {
        let index = index();
        let snapshot = ruby_snapshot("cart.add(apple, 2)\n");
        let help = signature_help(&snapshot, &index, Position::new(0, 16)).unwrap();
        assert_eq!(help.signatures[0].label, "add(item, quantity)");
        assert_eq!(help.active_parameter, Some(1));
    }

    #[test]
    fn test_definition_of_constant_and_require() {
        let index = index();
        let snapshot = ruby_snapshot("require \"shop/cart\"\nShop::Cart\n");
        let Some(GotoDefinitionResponse::Array(locations)) = definition(&snapshot, &index, Position::new(1, 7)) else {
            panic!("expected locations");
        };
        assert!(locations[0].uri.path().ends_with("shop/cart.rb"));

        let Some(GotoDefinitionResponse::Array(locations)) = definition(&snapshot, &index, Position::new(0, 11)) else {
            panic!("expected require target");
        };
        assert!(locations[0].uri.path().ends_with("shop/cart.rb"));
    }

    #[test]
    fn test_document_highlight_scopes_locals_to_method() {
        let snapshot = ruby_snapshot("def a\n  x = 1\n  x + 1\nend\ndef b\n  x = 2\nend\n");
        let highlights = document_highlight(&snapshot, Position::new(1, 2));
        assert_eq!(highlights.len(), 2);
        assert_eq!(highlights[0].kind, Some(DocumentHighlightKind::WRITE));
        assert_eq!(highlights[1].kind, Some(DocumentHighlightKind::READ));
    }

    #[test]
    fn test_inlay_hint_for_bare_rescue() {
        let snapshot = ruby_snapshot("begin\n  work\nrescue\n  retry\nend\n");
        let options = InlayHintOptions {
            implicit_rescue: true,
            implicit_hash_value: true,
        };
        let hints = inlay_hints(&snapshot, snapshot.full_range(), options);
        assert_eq!(hints.len(), 1);
        assert_eq!(hints[0].position, Position::new(2, 6));

        let disabled = InlayHintOptions {
            implicit_rescue: false,
            ..options
        };
        assert!(inlay_hints(&snapshot, snapshot.full_range(), disabled).is_empty());
    }

    #[test]
    fn test_workspace_symbol_search() {
        let symbols = workspace_symbol(&index(), "Cart");
        assert_eq!(symbols[0].name, "Cart");
        assert_eq!(symbols[0].container_name.as_deref(), Some("Shop"));
    }

    #[test]
    fn test_type_hierarchy_supertypes() {
        let index = index();
        let snapshot = ruby_snapshot("Shop::Cart\n");
        let prepared = prepare_type_hierarchy(&snapshot, &index, Position::new(0, 7)).unwrap();
        let item = &prepared[0];
        assert_eq!(item["detail"], json!("Shop::Cart"));

        let supertypes = supertypes(&index, item).unwrap();
        let names: Vec<_> = supertypes
            .as_array()
            .unwrap()
            .iter()
            .map(|item| item["detail"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["Shop::Base", "Enumerable"]);
    }
}

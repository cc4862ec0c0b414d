//
// analysis/document_symbol.rs
//
// Document outline: classes, modules, methods, constants and accessors
//

use tower_lsp::lsp_types::{DocumentSymbol, Range, SymbolKind};
use tree_sitter::Node;

use super::{bare_call_name, definition_name, Listener};
use crate::document_store::DocumentSnapshot;
use crate::error::AnalysisError;

const CONTAINERS: &[&str] = &["class", "module", "singleton_class", "method", "singleton_method"];

#[derive(Default)]
pub struct DocumentSymbolListener {
    roots: Vec<DocumentSymbol>,
    stack: Vec<(DocumentSymbol, Vec<DocumentSymbol>)>,
}

#[allow(deprecated)]
fn symbol(name: String, kind: SymbolKind, range: Range, selection_range: Range) -> DocumentSymbol {
    DocumentSymbol {
        name,
        detail: None,
        kind,
        tags: None,
        deprecated: None,
        range,
        selection_range,
        children: None,
    }
}

impl DocumentSymbolListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finish(mut self) -> Vec<DocumentSymbol> {
        while !self.stack.is_empty() {
            self.pop();
        }
        self.roots
    }

    fn add(&mut self, symbol: DocumentSymbol) {
        match self.stack.last_mut() {
            Some((_, children)) => children.push(symbol),
            None => self.roots.push(symbol),
        }
    }

    fn pop(&mut self) {
        if let Some((mut symbol, children)) = self.stack.pop() {
            symbol.children = Some(children);
            self.add(symbol);
        }
    }

    fn push_container(&mut self, node: Node<'_>, snapshot: &DocumentSnapshot) {
        let range = snapshot.range_of(node);
        let name_node = node.child_by_field_name("name");
        let selection = name_node.map_or(range, |n| snapshot.range_of(n));
        let name = definition_name(node, snapshot).unwrap_or("<unknown>");

        let (name, kind) = match node.kind() {
            "class" => (name.to_string(), SymbolKind::CLASS),
            "module" => (name.to_string(), SymbolKind::MODULE),
            "singleton_class" => {
                let target = node
                    .child_by_field_name("value")
                    .map_or("self", |value| snapshot.node_text(value));
                (format!("<< {}", target), SymbolKind::NAMESPACE)
            }
            "singleton_method" => {
                let object = node
                    .child_by_field_name("object")
                    .map_or("self", |object| snapshot.node_text(object));
                (format!("{}.{}", object, name), SymbolKind::METHOD)
            }
            _ if name == "initialize" => (name.to_string(), SymbolKind::CONSTRUCTOR),
            _ => (name.to_string(), SymbolKind::METHOD),
        };
        self.stack.push((symbol(name, kind, range, selection), Vec::new()));
    }

    fn add_assignment(&mut self, node: Node<'_>, snapshot: &DocumentSnapshot) {
        let Some(left) = node.child_by_field_name("left") else {
            return;
        };
        let kind = match left.kind() {
            "constant" | "scope_resolution" => SymbolKind::CONSTANT,
            "instance_variable" => SymbolKind::FIELD,
            "class_variable" => SymbolKind::VARIABLE,
            _ => return,
        };
        let name = snapshot.node_text(left).to_string();
        self.add(symbol(name, kind, snapshot.range_of(node), snapshot.range_of(left)));
    }

    fn add_accessors(&mut self, node: Node<'_>, snapshot: &DocumentSnapshot) {
        let Some(method) = bare_call_name(node, snapshot) else {
            return;
        };
        if !matches!(method, "attr_reader" | "attr_writer" | "attr_accessor") {
            return;
        }
        let Some(arguments) = node.child_by_field_name("arguments") else {
            return;
        };
        let mut cursor = arguments.walk();
        for argument in arguments.named_children(&mut cursor) {
            let text = snapshot.node_text(argument);
            let name = match argument.kind() {
                "simple_symbol" => text.trim_start_matches(':'),
                "string" => text.trim_matches(|c| c == '"' || c == '\''),
                _ => continue,
            };
            if name.is_empty() {
                continue;
            }
            let range = snapshot.range_of(argument);
            self.add(symbol(name.to_string(), SymbolKind::PROPERTY, range, range));
        }
    }
}

impl Listener for DocumentSymbolListener {
    fn node_kinds(&self) -> &'static [&'static str] {
        &["class", "module", "singleton_class", "method", "singleton_method", "assignment", "call"]
    }

    fn on_enter(&mut self, node: Node<'_>, snapshot: &DocumentSnapshot) -> Result<(), AnalysisError> {
        match node.kind() {
            "assignment" => self.add_assignment(node, snapshot),
            "call" => self.add_accessors(node, snapshot),
            _ => self.push_container(node, snapshot),
        }
        Ok(())
    }

    fn on_leave(&mut self, node: Node<'_>, _snapshot: &DocumentSnapshot) -> Result<(), AnalysisError> {
        if CONTAINERS.contains(&node.kind()) {
            self.pop();
        }
        Ok(())
    }
}

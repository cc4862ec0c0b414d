//
// analysis/mod.rs
//
// Single-pass tree traversal shared by several listeners
//

pub mod cache;
pub mod code_lens;
pub mod document_link;
pub mod document_symbol;
pub mod folding_range;
pub mod selection_range;

use tree_sitter::Node;

use crate::document_store::DocumentSnapshot;
use crate::error::AnalysisError;

/// A feature that computes its result while the dispatcher walks the tree.
///
/// Listeners only see named nodes whose kind appears in `node_kinds`.
pub trait Listener {
    fn node_kinds(&self) -> &'static [&'static str];

    fn on_enter(&mut self, node: Node<'_>, snapshot: &DocumentSnapshot) -> Result<(), AnalysisError>;

    fn on_leave(&mut self, _node: Node<'_>, _snapshot: &DocumentSnapshot) -> Result<(), AnalysisError> {
        Ok(())
    }
}

/// Walks a tree once and fans every node out to the interested listeners.
#[derive(Default)]
pub struct Dispatcher<'l> {
    listeners: Vec<&'l mut dyn Listener>,
}

impl<'l> Dispatcher<'l> {
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
        }
    }

    pub fn register(&mut self, listener: &'l mut dyn Listener) {
        self.listeners.push(listener);
    }

    fn enter(&mut self, node: Node<'_>, snapshot: &DocumentSnapshot) -> Result<(), AnalysisError> {
        if !node.is_named() {
            return Ok(());
        }
        for listener in self.listeners.iter_mut() {
            if listener.node_kinds().contains(&node.kind()) {
                listener.on_enter(node, snapshot)?;
            }
        }
        Ok(())
    }

    fn leave(&mut self, node: Node<'_>, snapshot: &DocumentSnapshot) -> Result<(), AnalysisError> {
        if !node.is_named() {
            return Ok(());
        }
        for listener in self.listeners.iter_mut() {
            if listener.node_kinds().contains(&node.kind()) {
                listener.on_leave(node, snapshot)?;
            }
        }
        Ok(())
    }

    /// Depth-first walk from `root`; each node is entered before its
    /// children and left after them. Stops at the first listener error.
    pub fn visit(&mut self, root: Node<'_>, snapshot: &DocumentSnapshot) -> Result<(), AnalysisError> {
        let mut cursor = root.walk();
        loop {
            self.enter(cursor.node(), snapshot)?;
            if cursor.goto_first_child() {
                continue;
            }
            loop {
                self.leave(cursor.node(), snapshot)?;
                if cursor.goto_next_sibling() {
                    break;
                }
                if !cursor.goto_parent() {
                    return Ok(());
                }
            }
        }
    }
}

/// Name of a definition node (`class Foo::Bar` yields "Foo::Bar").
pub(crate) fn definition_name<'s>(node: Node<'_>, snapshot: &'s DocumentSnapshot) -> Option<&'s str> {
    node.child_by_field_name("name")
        .map(|name| snapshot.node_text(name))
        .filter(|name| !name.is_empty())
}

/// Method name of a receiver-less call such as `require "x"` or `attr_reader :y`.
pub(crate) fn bare_call_name<'s>(node: Node<'_>, snapshot: &'s DocumentSnapshot) -> Option<&'s str> {
    if node.kind() != "call" || node.child_by_field_name("receiver").is_some() {
        return None;
    }
    node.child_by_field_name("method")
        .map(|method| snapshot.node_text(method))
}

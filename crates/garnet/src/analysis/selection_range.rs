//
// analysis/selection_range.rs
//
// Whole-document range tree answering selection range requests
//

use serde::{Deserialize, Serialize};
use tower_lsp::lsp_types::{Position, Range, SelectionRange};

use crate::document_store::DocumentSnapshot;

/// One named node of the tree, stored in pre-order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionNode {
    pub range: Range,
    pub parent: Option<usize>,
}

/// Every named node's range with the index of its nearest named ancestor.
pub fn selection_tree(snapshot: &DocumentSnapshot) -> Vec<SelectionNode> {
    let Some(root) = snapshot.root() else {
        return Vec::new();
    };
    let mut nodes = Vec::new();
    let mut open: Vec<usize> = Vec::new();
    let mut cursor = root.walk();
    loop {
        let node = cursor.node();
        if node.is_named() {
            nodes.push(SelectionNode {
                range: snapshot.range_of(node),
                parent: open.last().copied(),
            });
            open.push(nodes.len() - 1);
        }
        if cursor.goto_first_child() {
            continue;
        }
        loop {
            if cursor.node().is_named() {
                open.pop();
            }
            if cursor.goto_next_sibling() {
                break;
            }
            if !cursor.goto_parent() {
                return nodes;
            }
        }
    }
}

fn contains(range: &Range, position: Position) -> bool {
    let start = (range.start.line, range.start.character);
    let end = (range.end.line, range.end.character);
    let at = (position.line, position.character);
    start <= at && at <= end
}

/// Selection chain for each position, innermost node first.
///
/// Nodes are in pre-order, so the last node containing a position is the
/// deepest one. Positions outside every node get an empty range.
pub fn select(nodes: &[SelectionNode], positions: &[Position]) -> Vec<SelectionRange> {
    positions
        .iter()
        .map(|&position| {
            let Some(deepest) = nodes.iter().rposition(|node| contains(&node.range, position)) else {
                return SelectionRange {
                    range: Range::new(position, position),
                    parent: None,
                };
            };

            let mut chain = Vec::new();
            let mut current = Some(deepest);
            while let Some(idx) = current {
                let node = &nodes[idx];
                // A wrapper spanning exactly its child adds nothing to expand to
                if chain.last() != Some(&node.range) {
                    chain.push(node.range);
                }
                current = node.parent;
            }

            let mut selection: Option<SelectionRange> = None;
            for range in chain.into_iter().rev() {
                selection = Some(SelectionRange {
                    range,
                    parent: selection.map(Box::new),
                });
            }
            selection.unwrap_or(SelectionRange {
                range: Range::new(position, position),
                parent: None,
            })
        })
        .collect()
}

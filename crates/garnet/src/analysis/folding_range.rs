//
// analysis/folding_range.rs
//
// Folding ranges for definitions, blocks, literals, comment and require runs
//

use tower_lsp::lsp_types::{FoldingRange, FoldingRangeKind};
use tree_sitter::Node;

use super::{bare_call_name, Listener};
use crate::document_store::DocumentSnapshot;
use crate::error::AnalysisError;

const NODE_KINDS: &[&str] = &[
    "class",
    "module",
    "singleton_class",
    "method",
    "singleton_method",
    "do_block",
    "block",
    "if",
    "unless",
    "while",
    "until",
    "for",
    "case",
    "case_match",
    "when",
    "begin",
    "array",
    "hash",
    "heredoc_body",
    "string",
    "comment",
    "call",
];

/// Consecutive single-line items folded as one range.
#[derive(Clone, Copy)]
struct Run {
    start: usize,
    end: usize,
}

#[derive(Default)]
pub struct FoldingRangeListener {
    ranges: Vec<FoldingRange>,
    comments: Option<Run>,
    requires: Option<Run>,
}

fn fold(start: usize, end: usize, kind: Option<FoldingRangeKind>) -> FoldingRange {
    FoldingRange {
        start_line: start as u32,
        end_line: end as u32,
        kind,
        ..Default::default()
    }
}

impl FoldingRangeListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finish(mut self) -> Vec<FoldingRange> {
        self.flush_comments();
        self.flush_requires();
        self.ranges
            .sort_by_key(|range| (range.start_line, std::cmp::Reverse(range.end_line)));
        self.ranges
    }

    fn flush_comments(&mut self) {
        if let Some(run) = self.comments.take() {
            if run.end > run.start {
                self.ranges
                    .push(fold(run.start, run.end, Some(FoldingRangeKind::Comment)));
            }
        }
    }

    fn flush_requires(&mut self) {
        if let Some(run) = self.requires.take() {
            if run.end > run.start {
                self.ranges
                    .push(fold(run.start, run.end, Some(FoldingRangeKind::Imports)));
            }
        }
    }

    fn add_comment(&mut self, node: Node<'_>) {
        let start = node.start_position().row;
        let end = node.end_position().row;
        if end > start {
            // `=begin ... =end` block comment
            self.ranges
                .push(fold(start, end, Some(FoldingRangeKind::Comment)));
            return;
        }
        // Trailing comments after code do not extend a run
        if node.start_position().column > 0
            && node
                .prev_sibling()
                .map_or(false, |prev| prev.end_position().row == start)
        {
            return;
        }
        match self.comments.as_mut() {
            Some(run) if run.end + 1 == start => run.end = start,
            _ => {
                self.flush_comments();
                self.comments = Some(Run { start, end: start });
            }
        }
    }

    fn add_require(&mut self, node: Node<'_>) {
        let row = node.start_position().row;
        match self.requires.as_mut() {
            Some(run) if run.end + 1 == row => run.end = row,
            _ => {
                self.flush_requires();
                self.requires = Some(Run { start: row, end: row });
            }
        }
    }
}

impl Listener for FoldingRangeListener {
    fn node_kinds(&self) -> &'static [&'static str] {
        NODE_KINDS
    }

    fn on_enter(&mut self, node: Node<'_>, snapshot: &DocumentSnapshot) -> Result<(), AnalysisError> {
        match node.kind() {
            "comment" => self.add_comment(node),
            "call" => {
                if matches!(bare_call_name(node, snapshot), Some("require" | "require_relative")) {
                    self.add_require(node);
                }
            }
            _ => {
                let start = node.start_position().row;
                let end = node.end_position().row;
                // Keep the closing line (`end`, `]`, terminator) visible
                if end > start + 1 {
                    self.ranges.push(fold(start, end - 1, None));
                }
            }
        }
        Ok(())
    }
}

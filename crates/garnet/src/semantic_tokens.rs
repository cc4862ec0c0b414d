//
// semantic_tokens.rs
//
// Semantic highlighting for constants, methods, parameters and variables
//

use tower_lsp::lsp_types::{
    Range, SemanticToken, SemanticTokenModifier, SemanticTokenType, SemanticTokens, SemanticTokensLegend,
};
use tree_sitter::Node;

use crate::document_store::{DocumentKind, DocumentSnapshot};

pub const TOKEN_TYPES: [SemanticTokenType; 6] = [
    SemanticTokenType::NAMESPACE,
    SemanticTokenType::TYPE,
    SemanticTokenType::METHOD,
    SemanticTokenType::PARAMETER,
    SemanticTokenType::VARIABLE,
    SemanticTokenType::PROPERTY,
];

pub const TOKEN_MODIFIERS: [SemanticTokenModifier; 1] = [SemanticTokenModifier::DECLARATION];

const NAMESPACE: u32 = 0;
const TYPE: u32 = 1;
const METHOD: u32 = 2;
const PARAMETER: u32 = 3;
const VARIABLE: u32 = 4;
const PROPERTY: u32 = 5;

const DECLARATION: u32 = 1;

const PARAMETER_PARENTS: &[&str] = &[
    "method_parameters",
    "lambda_parameters",
    "block_parameters",
    "optional_parameter",
    "keyword_parameter",
    "splat_parameter",
    "hash_splat_parameter",
    "block_parameter",
];

pub fn legend() -> SemanticTokensLegend {
    SemanticTokensLegend {
        token_types: TOKEN_TYPES.to_vec(),
        token_modifiers: TOKEN_MODIFIERS.to_vec(),
    }
}

struct AbsoluteToken {
    line: u32,
    start: u32,
    length: u32,
    token_type: u32,
    modifiers: u32,
}

fn is_field(parent: Node<'_>, field: &str, node: Node<'_>) -> bool {
    parent.child_by_field_name(field).map_or(false, |child| child.id() == node.id())
}

fn classify(node: Node<'_>) -> Option<(u32, u32)> {
    let parent = node.parent();
    let parent_kind = parent.map_or("", |parent| parent.kind());
    match node.kind() {
        "constant" => match parent {
            Some(parent) if matches!(parent_kind, "class" | "module") && is_field(parent, "name", node) => {
                Some((NAMESPACE, DECLARATION))
            }
            _ => Some((TYPE, 0)),
        },
        "identifier" => match parent {
            Some(parent) if matches!(parent_kind, "method" | "singleton_method") && is_field(parent, "name", node) => {
                Some((METHOD, DECLARATION))
            }
            Some(parent) if parent_kind == "call" && is_field(parent, "method", node) => Some((METHOD, 0)),
            _ if PARAMETER_PARENTS.contains(&parent_kind) => Some((PARAMETER, DECLARATION)),
            _ => Some((VARIABLE, 0)),
        },
        "instance_variable" | "class_variable" => Some((PROPERTY, 0)),
        "global_variable" => Some((VARIABLE, 0)),
        _ => None,
    }
}

/// Tokens overlapping the byte range, in document order.
fn collect(snapshot: &DocumentSnapshot, bytes: std::ops::Range<usize>) -> Vec<AbsoluteToken> {
    let Some(root) = snapshot.root() else {
        return Vec::new();
    };
    let mut tokens = Vec::new();
    let mut cursor = root.walk();
    loop {
        let node = cursor.node();
        let overlaps = node.start_byte() < bytes.end && node.end_byte() > bytes.start;
        if overlaps && node.is_named() && node.start_position().row == node.end_position().row {
            if let Some((token_type, modifiers)) = classify(node) {
                let range = snapshot.range_of(node);
                tokens.push(AbsoluteToken {
                    line: range.start.line,
                    start: range.start.character,
                    length: range.end.character - range.start.character,
                    token_type,
                    modifiers,
                });
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
                return tokens;
            }
        }
    }
}

/// Relative encoding: each token is positioned against the previous one.
fn encode(tokens: Vec<AbsoluteToken>) -> SemanticTokens {
    let mut data = Vec::with_capacity(tokens.len());
    let (mut line, mut start) = (0, 0);
    for token in tokens.into_iter().filter(|token| token.length > 0) {
        let delta_line = token.line - line;
        let delta_start = if delta_line == 0 { token.start - start } else { token.start };
        data.push(SemanticToken {
            delta_line,
            delta_start,
            length: token.length,
            token_type: token.token_type,
            token_modifiers_bitset: token.modifiers,
        });
        line = token.line;
        start = token.start;
    }
    SemanticTokens { result_id: None, data }
}

fn highlightable(snapshot: &DocumentSnapshot) -> bool {
    !snapshot.past_limit && snapshot.kind != DocumentKind::Rbs
}

/// Tokens for the whole document; empty for documents past the size limit.
pub fn full(snapshot: &DocumentSnapshot) -> SemanticTokens {
    if !highlightable(snapshot) {
        return SemanticTokens::default();
    }
    encode(collect(snapshot, 0..snapshot.source.text().len()))
}

pub fn range(snapshot: &DocumentSnapshot, range: Range) -> SemanticTokens {
    if !highlightable(snapshot) {
        return SemanticTokens::default();
    }
    let start = snapshot.offset_at(range.start);
    let end = snapshot.offset_at(range.end).max(start);
    encode(collect(snapshot, start..end))
}

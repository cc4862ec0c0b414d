//
// editing.rs
//
// Formatting, on-type edits, refactoring code actions and diagnostics
//

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::{json, Value};
use tower_lsp::lsp_types::{
    CodeAction, CodeActionKind, Diagnostic, DiagnosticSeverity, Position, Range, TextEdit, Url, WorkspaceEdit,
};
use tree_sitter::Node;

use crate::document_store::{DocumentKind, DocumentSnapshot};
use crate::error::FormatterError;
use crate::formatter::Formatter;

pub const EXTRACT_VARIABLE_TITLE: &str = "Refactor: Extract Variable";
const EXTRACTED_NAME: &str = "new_variable";

// ============================================================================
// Formatting
// ============================================================================

/// One edit replacing the whole document, or None when nothing changes.
pub fn formatting(
    snapshot: &DocumentSnapshot,
    formatter: &dyn Formatter,
) -> Result<Option<Vec<TextEdit>>, FormatterError> {
    let text = snapshot.source.text();
    let formatted = match formatter.run_formatting(&snapshot.uri, text)? {
        Some(formatted) if formatted != text => formatted,
        _ => return Ok(None),
    };
    Ok(Some(vec![TextEdit::new(snapshot.full_range(), formatted)]))
}

// ============================================================================
// On-type formatting
// ============================================================================

fn block_opener_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"^\s*(?:(?:class|module|def|if|unless|while|until|case|begin)\b.*|.*\bdo(?:\s*\|[^|]*\|)?)\s*$",
        )
        .expect("valid block opener regex")
    })
}

fn pipe_opener_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?:\bdo|\{)\s*\|$").expect("valid pipe regex"))
}

fn indentation(line: &str) -> &str {
    &line[..line.len() - line.trim_start().len()]
}

/// Edits for the character the user just typed at `position`.
pub fn on_type_formatting(snapshot: &DocumentSnapshot, position: Position, ch: &str) -> Vec<TextEdit> {
    if snapshot.kind != DocumentKind::Ruby {
        return Vec::new();
    }
    let line = snapshot.source.line(position.line as usize);
    let cursor = snapshot.encoding.column_to_byte(line, position.character);
    let (before, after) = line.split_at(cursor);
    let insert = |text: String| vec![TextEdit::new(Range::new(position, position), text)];

    match ch {
        "\n" => {
            let Some(previous) = position
                .line
                .checked_sub(1)
                .map(|idx| snapshot.source.line(idx as usize))
            else {
                return Vec::new();
            };
            if !before.trim().is_empty() {
                return Vec::new();
            }
            let trimmed = previous.trim_start();
            if trimmed.starts_with('#') && !trimmed.starts_with("#!") {
                return insert("# ".to_string());
            }
            let unclosed = snapshot.root().map_or(false, |root| root.has_error());
            if unclosed && block_opener_pattern().is_match(previous) {
                return insert(format!("\n{}end", indentation(previous)));
            }
            Vec::new()
        }
        "|" if pipe_opener_pattern().is_match(before) && !after.starts_with('|') => insert("|".to_string()),
        "{" if before.ends_with("#{") && !after.starts_with('}') => insert("}".to_string()),
        _ => Vec::new(),
    }
}

// ============================================================================
// Code actions
// ============================================================================

/// Refactorings available for the selection.
pub fn code_actions(snapshot: &DocumentSnapshot, range: Range) -> Vec<CodeAction> {
    if range.start == range.end || range.start.line != range.end.line || snapshot.kind != DocumentKind::Ruby {
        return Vec::new();
    }
    let start = snapshot.offset_at(range.start);
    let end = snapshot.offset_at(range.end);
    let Some(selection) = snapshot.source.text().get(start..end) else {
        return Vec::new();
    };
    if selection.trim().is_empty() {
        return Vec::new();
    }
    vec![CodeAction {
        title: EXTRACT_VARIABLE_TITLE.to_string(),
        kind: Some(CodeActionKind::REFACTOR_EXTRACT),
        data: Some(json!({ "uri": snapshot.uri, "range": range })),
        ..Default::default()
    }]
}

/// Document and range a code action produced by `code_actions` targets.
pub fn code_action_target(action: &CodeAction) -> Option<(Url, Range)> {
    let data = action.data.as_ref()?;
    let uri = serde_json::from_value(data.get("uri")?.clone()).ok()?;
    let range = serde_json::from_value(data.get("range")?.clone()).ok()?;
    Some((uri, range))
}

/// Statement that contains `node`: the outermost ancestor still starting on
/// the same line below a body.
fn enclosing_statement(node: Node<'_>) -> Node<'_> {
    let mut statement = node;
    while let Some(parent) = statement.parent() {
        if matches!(
            parent.kind(),
            "program" | "body_statement" | "then" | "else" | "do_block" | "block_body" | "begin"
        ) {
            break;
        }
        statement = parent;
    }
    statement
}

/// Assign the selection to a new local before its statement and use the
/// local in its place.
pub fn extract_variable(snapshot: &DocumentSnapshot, range: Range) -> Option<WorkspaceEdit> {
    let start = snapshot.offset_at(range.start);
    let end = snapshot.offset_at(range.end);
    let selection = snapshot.source.text().get(start..end)?;
    let node = snapshot.root()?.named_descendant_for_byte_range(start, end)?;
    let statement = enclosing_statement(node);
    let statement_start = snapshot.position_at(statement.start_byte());
    let indent = indentation(snapshot.source.line(statement_start.line as usize));

    let edits = vec![
        TextEdit::new(
            Range::new(statement_start, statement_start),
            format!("{} = {}\n{}", EXTRACTED_NAME, selection, indent),
        ),
        TextEdit::new(range, EXTRACTED_NAME.to_string()),
    ];
    let mut changes = HashMap::new();
    changes.insert(snapshot.uri.clone(), edits);
    Some(WorkspaceEdit {
        changes: Some(changes),
        ..Default::default()
    })
}

// ============================================================================
// Diagnostics
// ============================================================================

fn collect_syntax_errors(node: Node<'_>, snapshot: &DocumentSnapshot, diagnostics: &mut Vec<Diagnostic>) {
    if node.is_error() || node.is_missing() {
        let message = if node.is_missing() {
            format!("Missing '{}'", node.kind())
        } else {
            "Syntax error".to_string()
        };
        diagnostics.push(Diagnostic {
            range: snapshot.range_of(node),
            severity: Some(DiagnosticSeverity::ERROR),
            source: Some("garnet".to_string()),
            message,
            ..Default::default()
        });
        if node.is_error() {
            return;
        }
    }

    if !node.has_error() {
        return;
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_syntax_errors(child, snapshot, diagnostics);
    }
}

/// Syntax errors plus the formatter's offenses. Documents past the size
/// limit get none.
pub fn diagnostics(snapshot: &DocumentSnapshot, formatter: Option<&dyn Formatter>) -> Vec<Diagnostic> {
    if snapshot.past_limit || snapshot.kind == DocumentKind::Rbs {
        return Vec::new();
    }
    let mut diagnostics = Vec::new();
    if let Some(root) = snapshot.root() {
        collect_syntax_errors(root, snapshot, &mut diagnostics);
    }
    if let (Some(formatter), DocumentKind::Ruby) = (formatter, snapshot.kind) {
        match formatter.run_diagnostic(&snapshot.uri, snapshot.source.text()) {
            Ok(found) => diagnostics.extend(found),
            Err(err) => log::warn!("{} diagnostics failed for {}: {}", formatter.name(), snapshot.uri, err),
        }
    }
    diagnostics
}

/// Full document diagnostic report.
pub fn diagnostic_report(diagnostics: Vec<Diagnostic>) -> Value {
    json!({ "kind": "full", "items": diagnostics })
}

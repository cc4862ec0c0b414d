//
// capabilities.rs
//
// Capability advertisement and client capability checks
//

use serde_json::{json, Value};
use tower_lsp::lsp_types::{
    ClientCapabilities, CodeActionKind, CodeActionOptions, CodeActionProviderCapability, CodeLensOptions,
    CompletionOptions, DiagnosticOptions, DiagnosticServerCapabilities, DocumentLinkOptions,
    DocumentOnTypeFormattingOptions, FoldingRangeProviderCapability, HoverProviderCapability, OneOf,
    Registration, RegistrationParams, SelectionRangeProviderCapability, SemanticTokensFullOptions,
    SemanticTokensOptions, SemanticTokensServerCapabilities, ServerCapabilities, ServerInfo,
    SignatureHelpOptions, TextDocumentSyncCapability, TextDocumentSyncKind,
};

use crate::config::{Feature, FeatureToggles};
use crate::encoding::PositionEncoding;
use crate::semantic_tokens;

pub const WATCHER_REGISTRATION_ID: &str = "workspace-watcher";

/// Everything the advertisement depends on.
#[derive(Debug, Clone)]
pub struct CapabilityInputs<'a> {
    pub features: &'a FeatureToggles,
    pub encoding: PositionEncoding,
    /// An external type checker owns workspace symbols
    pub typechecker: bool,
    /// Name of the resolved formatter, if any
    pub formatter: Option<&'a str>,
}

fn when<T>(enabled: bool, value: impl FnOnce() -> T) -> Option<T> {
    enabled.then(value)
}

pub fn server_capabilities(inputs: &CapabilityInputs<'_>) -> ServerCapabilities {
    let on = |feature| inputs.features.is_enabled(feature);

    ServerCapabilities {
        position_encoding: Some(inputs.encoding.kind()),
        text_document_sync: Some(TextDocumentSyncCapability::Kind(TextDocumentSyncKind::INCREMENTAL)),
        selection_range_provider: when(on(Feature::SelectionRanges), || {
            SelectionRangeProviderCapability::Simple(true)
        }),
        hover_provider: when(on(Feature::Hover), || HoverProviderCapability::Simple(true)),
        document_symbol_provider: when(on(Feature::DocumentSymbols), || OneOf::Left(true)),
        document_link_provider: when(on(Feature::DocumentLink), || DocumentLinkOptions {
            resolve_provider: Some(false),
            work_done_progress_options: Default::default(),
        }),
        code_lens_provider: when(on(Feature::CodeLens), || CodeLensOptions {
            resolve_provider: Some(false),
        }),
        folding_range_provider: when(on(Feature::FoldingRanges), || {
            FoldingRangeProviderCapability::Simple(true)
        }),
        semantic_tokens_provider: when(on(Feature::SemanticHighlighting), || {
            SemanticTokensServerCapabilities::SemanticTokensOptions(SemanticTokensOptions {
                legend: semantic_tokens::legend(),
                range: Some(true),
                full: Some(SemanticTokensFullOptions::Delta { delta: Some(true) }),
                ..Default::default()
            })
        }),
        document_formatting_provider: when(
            on(Feature::Formatting) && inputs.formatter.is_some(),
            || OneOf::Left(true),
        ),
        document_highlight_provider: when(on(Feature::DocumentHighlight), || OneOf::Left(true)),
        document_on_type_formatting_provider: when(on(Feature::OnTypeFormatting), || {
            DocumentOnTypeFormattingOptions {
                first_trigger_character: "{".to_string(),
                more_trigger_character: Some(vec!["\n".to_string(), "|".to_string()]),
            }
        }),
        code_action_provider: when(on(Feature::CodeActions), || {
            CodeActionProviderCapability::Options(CodeActionOptions {
                code_action_kinds: Some(vec![CodeActionKind::REFACTOR_EXTRACT]),
                resolve_provider: Some(true),
                work_done_progress_options: Default::default(),
            })
        }),
        diagnostic_provider: when(on(Feature::Diagnostics), || {
            DiagnosticServerCapabilities::Options(DiagnosticOptions {
                identifier: Some("garnet".to_string()),
                inter_file_dependencies: false,
                workspace_diagnostics: false,
                work_done_progress_options: Default::default(),
            })
        }),
        inlay_hint_provider: when(on(Feature::InlayHint), || OneOf::Left(true)),
        completion_provider: when(on(Feature::Completion), || CompletionOptions {
            resolve_provider: Some(true),
            trigger_characters: Some(
                ["/", "\"", "'", ":", "@", "."]
                    .iter()
                    .map(|c| c.to_string())
                    .collect(),
            ),
            ..Default::default()
        }),
        signature_help_provider: when(on(Feature::SignatureHelp), || SignatureHelpOptions {
            trigger_characters: Some(vec!["(".to_string(), " ".to_string(), ",".to_string()]),
            ..Default::default()
        }),
        definition_provider: when(on(Feature::Definition), || OneOf::Left(true)),
        workspace_symbol_provider: when(
            on(Feature::WorkspaceSymbol) && !inputs.typechecker,
            || OneOf::Left(true),
        ),
        ..Default::default()
    }
}

/// The `initialize` response body.
pub fn initialize_result(inputs: &CapabilityInputs<'_>) -> serde_json::Result<Value> {
    let mut capabilities = serde_json::to_value(server_capabilities(inputs))?;
    if inputs.features.is_enabled(Feature::TypeHierarchy) {
        if let Value::Object(map) = &mut capabilities {
            map.insert("typeHierarchyProvider".to_string(), Value::Bool(true));
        }
    }
    let server_info = ServerInfo {
        name: "garnet".to_string(),
        version: Some(env!("CARGO_PKG_VERSION").to_string()),
    };
    Ok(json!({
        "capabilities": capabilities,
        "serverInfo": server_info,
        "formatter": inputs.formatter.unwrap_or("none"),
    }))
}

// ============================================================================
// Client capabilities
// ============================================================================

pub fn supports_watch_registration(capabilities: &ClientCapabilities) -> bool {
    capabilities
        .workspace
        .as_ref()
        .and_then(|workspace| workspace.did_change_watched_files.as_ref())
        .and_then(|watched| watched.dynamic_registration)
        .unwrap_or(false)
}

pub fn supports_work_done_progress(capabilities: &ClientCapabilities) -> bool {
    capabilities
        .window
        .as_ref()
        .and_then(|window| window.work_done_progress)
        .unwrap_or(false)
}

/// Registration asking the client to watch Ruby sources and the lockfile
/// for create, change and delete events.
pub fn watcher_registration() -> RegistrationParams {
    RegistrationParams {
        registrations: vec![Registration {
            id: WATCHER_REGISTRATION_ID.to_string(),
            method: "workspace/didChangeWatchedFiles".to_string(),
            register_options: Some(json!({
                "watchers": [
                    { "globPattern": "**/*.rb", "kind": 7 },
                    { "globPattern": "**/Gemfile.lock", "kind": 7 },
                ]
            })),
        }],
    }
}

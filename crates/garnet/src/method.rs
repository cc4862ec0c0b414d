//
// method.rs
//
// Closed enumeration of the protocol methods the router understands
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Initialize,
    Initialized,
    Shutdown,
    Exit,
    DidOpen,
    DidClose,
    DidChange,
    SelectionRange,
    DocumentSymbol,
    DocumentLink,
    CodeLens,
    FoldingRange,
    SemanticTokensFull,
    SemanticTokensFullDelta,
    SemanticTokensRange,
    Formatting,
    DocumentHighlight,
    OnTypeFormatting,
    Hover,
    InlayHint,
    CodeAction,
    Diagnostic,
    Completion,
    SignatureHelp,
    Definition,
    PrepareTypeHierarchy,
    CompletionResolve,
    CodeActionResolve,
    TypeHierarchySupertypes,
    TypeHierarchySubtypes,
    DidChangeWatchedFiles,
    WorkspaceSymbol,
    CancelRequest,
    /// Anything else; the router ignores it.
    Unknown,
}

impl Method {
    pub const ALL: [Method; 33] = [
        Method::Initialize,
        Method::Initialized,
        Method::Shutdown,
        Method::Exit,
        Method::DidOpen,
        Method::DidClose,
        Method::DidChange,
        Method::SelectionRange,
        Method::DocumentSymbol,
        Method::DocumentLink,
        Method::CodeLens,
        Method::FoldingRange,
        Method::SemanticTokensFull,
        Method::SemanticTokensFullDelta,
        Method::SemanticTokensRange,
        Method::Formatting,
        Method::DocumentHighlight,
        Method::OnTypeFormatting,
        Method::Hover,
        Method::InlayHint,
        Method::CodeAction,
        Method::Diagnostic,
        Method::Completion,
        Method::SignatureHelp,
        Method::Definition,
        Method::PrepareTypeHierarchy,
        Method::CompletionResolve,
        Method::CodeActionResolve,
        Method::TypeHierarchySupertypes,
        Method::TypeHierarchySubtypes,
        Method::DidChangeWatchedFiles,
        Method::WorkspaceSymbol,
        Method::CancelRequest,
    ];

    pub fn from_name(name: &str) -> Method {
        match name {
            "initialize" => Method::Initialize,
            "initialized" => Method::Initialized,
            "shutdown" => Method::Shutdown,
            "exit" => Method::Exit,
            "textDocument/didOpen" => Method::DidOpen,
            "textDocument/didClose" => Method::DidClose,
            "textDocument/didChange" => Method::DidChange,
            "textDocument/selectionRange" => Method::SelectionRange,
            "textDocument/documentSymbol" => Method::DocumentSymbol,
            "textDocument/documentLink" => Method::DocumentLink,
            "textDocument/codeLens" => Method::CodeLens,
            "textDocument/foldingRange" => Method::FoldingRange,
            "textDocument/semanticTokens/full" => Method::SemanticTokensFull,
            "textDocument/semanticTokens/full/delta" => Method::SemanticTokensFullDelta,
            "textDocument/semanticTokens/range" => Method::SemanticTokensRange,
            "textDocument/formatting" => Method::Formatting,
            "textDocument/documentHighlight" => Method::DocumentHighlight,
            "textDocument/onTypeFormatting" => Method::OnTypeFormatting,
            "textDocument/hover" => Method::Hover,
            "textDocument/inlayHint" => Method::InlayHint,
            "textDocument/codeAction" => Method::CodeAction,
            "textDocument/diagnostic" => Method::Diagnostic,
            "textDocument/completion" => Method::Completion,
            "textDocument/signatureHelp" => Method::SignatureHelp,
            "textDocument/definition" => Method::Definition,
            "textDocument/prepareTypeHierarchy" => Method::PrepareTypeHierarchy,
            "completionItem/resolve" => Method::CompletionResolve,
            "codeAction/resolve" => Method::CodeActionResolve,
            "typeHierarchy/supertypes" => Method::TypeHierarchySupertypes,
            "typeHierarchy/subtypes" => Method::TypeHierarchySubtypes,
            "workspace/didChangeWatchedFiles" => Method::DidChangeWatchedFiles,
            "workspace/symbol" => Method::WorkspaceSymbol,
            "$/cancelRequest" => Method::CancelRequest,
            _ => Method::Unknown,
        }
    }

    /// Wire name; also the per-document cache key for cacheable requests.
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Initialize => "initialize",
            Method::Initialized => "initialized",
            Method::Shutdown => "shutdown",
            Method::Exit => "exit",
            Method::DidOpen => "textDocument/didOpen",
            Method::DidClose => "textDocument/didClose",
            Method::DidChange => "textDocument/didChange",
            Method::SelectionRange => "textDocument/selectionRange",
            Method::DocumentSymbol => "textDocument/documentSymbol",
            Method::DocumentLink => "textDocument/documentLink",
            Method::CodeLens => "textDocument/codeLens",
            Method::FoldingRange => "textDocument/foldingRange",
            Method::SemanticTokensFull => "textDocument/semanticTokens/full",
            Method::SemanticTokensFullDelta => "textDocument/semanticTokens/full/delta",
            Method::SemanticTokensRange => "textDocument/semanticTokens/range",
            Method::Formatting => "textDocument/formatting",
            Method::DocumentHighlight => "textDocument/documentHighlight",
            Method::OnTypeFormatting => "textDocument/onTypeFormatting",
            Method::Hover => "textDocument/hover",
            Method::InlayHint => "textDocument/inlayHint",
            Method::CodeAction => "textDocument/codeAction",
            Method::Diagnostic => "textDocument/diagnostic",
            Method::Completion => "textDocument/completion",
            Method::SignatureHelp => "textDocument/signatureHelp",
            Method::Definition => "textDocument/definition",
            Method::PrepareTypeHierarchy => "textDocument/prepareTypeHierarchy",
            Method::CompletionResolve => "completionItem/resolve",
            Method::CodeActionResolve => "codeAction/resolve",
            Method::TypeHierarchySupertypes => "typeHierarchy/supertypes",
            Method::TypeHierarchySubtypes => "typeHierarchy/subtypes",
            Method::DidChangeWatchedFiles => "workspace/didChangeWatchedFiles",
            Method::WorkspaceSymbol => "workspace/symbol",
            Method::CancelRequest => "$/cancelRequest",
            Method::Unknown => "unknown",
        }
    }

    /// Members of the combined-cache cluster, computed in one traversal.
    pub fn is_cluster_member(self) -> bool {
        matches!(
            self,
            Method::DocumentSymbol | Method::DocumentLink | Method::CodeLens | Method::FoldingRange
        )
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

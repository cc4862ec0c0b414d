//
// router.rs
//
// Protocol router: method dispatch, lifecycle handshake and error translation
//

use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tower_lsp::jsonrpc::Id;
use tower_lsp::lsp_types::notification::PublishDiagnostics;
use tower_lsp::lsp_types::request::RegisterCapability;
use tower_lsp::lsp_types::{
    ClientCapabilities, CodeAction, CodeActionParams, CompletionItem, CompletionParams, DidChangeTextDocumentParams,
    DidChangeWatchedFilesParams, DidCloseTextDocumentParams, DidOpenTextDocumentParams, DocumentFormattingParams,
    DocumentHighlightParams, DocumentOnTypeFormattingParams, FileChangeType, GotoDefinitionParams, HoverParams,
    InitializeParams, InlayHintParams, MessageType, Position, PublishDiagnosticsParams, SelectionRangeParams,
    SemanticTokensRangeParams, SignatureHelpParams, TextDocumentIdentifier, TextDocumentPositionParams, Url,
    WorkspaceSymbolParams,
};

use crate::addon::{AddonContext, AddonRegistry};
use crate::analysis::cache::{cached_response, cached_selection_tree, cluster_response};
use crate::analysis::selection_range::select;
use crate::background_indexer::{BackgroundIndexer, IndexChange};
use crate::cancellation::{cancel_target, CancellationRegistry};
use crate::capabilities::{
    initialize_result, supports_watch_registration, supports_work_done_progress, watcher_registration,
    CapabilityInputs,
};
use crate::config::{load_deprecated_index_config, parse_server_config, GemfileLock, ServerConfig, DEPRECATED_INDEX_CONFIG};
use crate::document_store::{DocumentKind, DocumentSnapshot, MutationGuard, OpenOutcome};
use crate::editing;
use crate::encoding::PositionEncoding;
use crate::error::{install_panic_hook, panic_message, take_panic_trace, RequestError, RequestResult};
use crate::formatter::FormatterRegistry;
use crate::handlers::{self, InlayHintOptions};
use crate::message::{Message, Outbox, ResponseError, DELEGATED_REQUEST, INTERNAL_ERROR, INVALID_PARAMS};
use crate::method::Method;
use crate::semantic_tokens;
use crate::workspace_index::{IndexablePath, WorkspaceIndex};

type RequestHandler = fn(&mut Router, Value) -> RequestResult<Value>;
type NotificationHandler = fn(&mut Router, Value) -> RequestResult<()>;

/// What the router does with a method.
#[derive(Clone, Copy)]
pub enum Handler {
    Request(RequestHandler),
    Notification(NotificationHandler),
    Ignored,
}

/// Dispatch table. Cancellation is applied by the transport reader, so
/// `$/cancelRequest` only reaches the router when nothing intercepted it.
pub fn handler_for(method: Method) -> Handler {
    use Handler::{Ignored, Notification, Request};
    match method {
        Method::Initialize => Request(Router::initialize),
        Method::Initialized => Notification(Router::initialized),
        Method::Shutdown => Request(Router::shutdown),
        Method::Exit => Notification(Router::exit),
        Method::DidOpen => Notification(Router::did_open),
        Method::DidClose => Notification(Router::did_close),
        Method::DidChange => Notification(Router::did_change),
        Method::SelectionRange => Request(Router::selection_range),
        Method::DocumentSymbol => Request(Router::document_symbol),
        Method::DocumentLink => Request(Router::document_link),
        Method::CodeLens => Request(Router::code_lens),
        Method::FoldingRange => Request(Router::folding_range),
        Method::SemanticTokensFull => Request(Router::semantic_tokens_full),
        Method::SemanticTokensFullDelta => Request(Router::semantic_tokens_delta),
        Method::SemanticTokensRange => Request(Router::semantic_tokens_range),
        Method::Formatting => Request(Router::formatting),
        Method::DocumentHighlight => Request(Router::document_highlight),
        Method::OnTypeFormatting => Request(Router::on_type_formatting),
        Method::Hover => Request(Router::hover),
        Method::InlayHint => Request(Router::inlay_hint),
        Method::CodeAction => Request(Router::code_action),
        Method::Diagnostic => Request(Router::diagnostic),
        Method::Completion => Request(Router::completion),
        Method::SignatureHelp => Request(Router::signature_help),
        Method::Definition => Request(Router::definition),
        Method::PrepareTypeHierarchy => Request(Router::prepare_type_hierarchy),
        Method::CompletionResolve => Request(Router::completion_resolve),
        Method::CodeActionResolve => Request(Router::code_action_resolve),
        Method::TypeHierarchySupertypes => Request(Router::type_hierarchy_supertypes),
        Method::TypeHierarchySubtypes => Request(Router::type_hierarchy_subtypes),
        Method::DidChangeWatchedFiles => Notification(Router::did_change_watched_files),
        Method::WorkspaceSymbol => Request(Router::workspace_symbol),
        Method::CancelRequest => Notification(Router::cancel_request),
        Method::Unknown => Ignored,
    }
}

/// Work that must wait until the `initialize` response is on its way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Deferred {
    RegisterWatchers,
    StartIndexing,
}

/// A handler that did not produce a value.
enum Failure {
    Error(RequestError),
    Panic { message: String, backtrace: Vec<String> },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DocumentParams {
    text_document: TextDocumentIdentifier,
}

#[derive(Deserialize)]
struct TypeHierarchyItemParams {
    item: Value,
}

pub struct RouterOptions {
    /// Compact the index after a rebuild; test harnesses turn this off
    pub compact_after_indexing: bool,
    pub formatters: FormatterRegistry,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            compact_after_indexing: true,
            formatters: FormatterRegistry::with_defaults(),
        }
    }
}

/// Session coordinator. Processes one message at a time to completion.
pub struct Router {
    outbox: Outbox,
    cancellation: CancellationRegistry,
    guard: MutationGuard,
    index: Arc<WorkspaceIndex>,
    indexer: BackgroundIndexer,
    formatters: FormatterRegistry,
    addons: AddonRegistry,
    config: ServerConfig,
    client_capabilities: ClientCapabilities,
    workspace_root: Option<PathBuf>,
    encoding: PositionEncoding,
    typechecker: bool,
    resolved_formatter: Option<String>,
    deferred: Vec<Deferred>,
    shutdown: CancellationToken,
    exit_requested: bool,
    /// Documents already warned about being past the size limit
    past_limit_warned: HashSet<Url>,
}

fn encode<T: Serialize>(value: T) -> RequestResult<Value> {
    serde_json::to_value(value).map_err(RequestError::internal)
}

fn parse<T: for<'de> Deserialize<'de>>(params: Value) -> RequestResult<T> {
    Ok(serde_json::from_value(params)?)
}

/// Response for document kinds a feature does not handle.
fn unsupported() -> RequestResult<Value> {
    Ok(Value::Null)
}

fn translate(failure: Failure) -> ResponseError {
    let (class, message, backtrace) = match failure {
        Failure::Error(err @ (RequestError::DocumentNotFound(_) | RequestError::InvalidParams(_))) => {
            return ResponseError {
                code: INVALID_PARAMS,
                message: err.to_string(),
                data: None,
            };
        }
        Failure::Error(err @ RequestError::Delegated) => {
            return ResponseError {
                code: DELEGATED_REQUEST,
                message: err.to_string(),
                data: None,
            };
        }
        Failure::Error(err) => (err.class_name(), err.to_string(), err.backtrace_lines()),
        Failure::Panic { message, backtrace } => ("panic", message, backtrace),
    };
    ResponseError {
        code: INTERNAL_ERROR,
        message: message.clone(),
        data: Some(json!({
            "errorClass": class,
            "errorMessage": message,
            "backtrace": backtrace.join("\n"),
        })),
    }
}

impl Router {
    pub fn new(outbox: Outbox, cancellation: CancellationRegistry, options: RouterOptions) -> Self {
        install_panic_hook();
        let index = Arc::new(WorkspaceIndex::new());
        let shutdown = CancellationToken::new();
        let indexer = BackgroundIndexer::new(
            Arc::clone(&index),
            outbox.clone(),
            shutdown.clone(),
            options.compact_after_indexing,
        );
        Self {
            outbox,
            cancellation,
            guard: MutationGuard::default(),
            index,
            indexer,
            formatters: options.formatters,
            addons: AddonRegistry::default(),
            config: ServerConfig::default(),
            client_capabilities: ClientCapabilities::default(),
            workspace_root: None,
            encoding: PositionEncoding::default(),
            typechecker: false,
            resolved_formatter: None,
            deferred: Vec::new(),
            shutdown,
            exit_requested: false,
            past_limit_warned: HashSet::new(),
        }
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Handle one inbound message. Every request gets exactly one reply
    /// unless it was cancelled.
    pub fn process(&mut self, message: Message) {
        match message {
            Message::Request { id, method, params } => self.process_request(id, &method, params),
            Message::Notification { method, params } => self.process_notification(&method, params),
            Message::Result { id, .. } => log::trace!("Client answered server request {}", id),
            Message::Error { id, error } => {
                log::warn!("Client rejected server request {}: {}", id, error.message)
            }
        }
    }

    fn process_request(&mut self, id: Id, name: &str, params: Value) {
        self.cancellation.register(id.clone());
        if self.cancellation.is_cancelled(&id) {
            self.cancellation.complete(&id);
            log::trace!("Skipping cancelled request {} ({})", id, name);
            return;
        }

        let method = Method::from_name(name);
        log::trace!("Request {}: {}", id, method);
        let result = match handler_for(method) {
            Handler::Request(handler) => self.guarded(|router| handler(router, params)),
            Handler::Notification(handler) => self
                .guarded(|router| handler(router, params))
                .map(|()| Value::Null),
            Handler::Ignored => {
                log::trace!("No handler for request '{}'", name);
                Ok(Value::Null)
            }
        };

        if self.cancellation.complete(&id) {
            log::trace!("Dropping reply to cancelled request {}", id);
        } else {
            match result {
                Ok(value) => {
                    self.outbox.respond(id, value);
                }
                Err(failure) => self.respond_failure(id, method, failure),
            }
        }
        self.run_deferred();
    }

    fn process_notification(&mut self, name: &str, params: Value) {
        let method = Method::from_name(name);
        let Handler::Notification(handler) = handler_for(method) else {
            log::trace!("Ignoring notification '{}'", name);
            return;
        };
        match self.guarded(|router| handler(router, params)) {
            Ok(()) => {}
            Err(Failure::Error(RequestError::DocumentNotFound(uri))) => {
                log::warn!("{} for unknown document {}", method, uri)
            }
            Err(failure) => {
                let error = translate(failure);
                log::error!("{} failed: {}", method, error.message);
                if error.code == INTERNAL_ERROR {
                    self.outbox
                        .log_message(MessageType::ERROR, format!("{} failed: {}", method, error.message));
                }
            }
        }
    }

    /// Run a handler, turning errors and panics into a `Failure`.
    fn guarded<T>(&mut self, handler: impl FnOnce(&mut Self) -> RequestResult<T>) -> Result<T, Failure> {
        let _ = take_panic_trace();
        match catch_unwind(AssertUnwindSafe(|| handler(self))) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(Failure::Error(err)),
            Err(payload) => Err(Failure::Panic {
                message: panic_message(&*payload),
                backtrace: take_panic_trace().map(|trace| trace.lines()).unwrap_or_default(),
            }),
        }
    }

    fn respond_failure(&mut self, id: Id, method: Method, failure: Failure) {
        let error = translate(failure);
        if error.code == INTERNAL_ERROR {
            log::error!("{} (request {}) failed: {}", method, id, error.message);
            self.outbox.log_message(
                MessageType::ERROR,
                format!("Error processing {}: {}", method, error.message),
            );
        }
        self.outbox.respond_error(id, error);
    }

    fn run_deferred(&mut self) {
        for action in std::mem::take(&mut self.deferred) {
            match action {
                Deferred::RegisterWatchers => {
                    self.outbox.request::<RegisterCapability>(watcher_registration());
                }
                Deferred::StartIndexing => {
                    if let Some(root) = self.workspace_root.clone() {
                        self.indexer.start(root, self.config.indexing.clone());
                    }
                }
            }
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    #[allow(deprecated)]
    fn workspace_root(params: &InitializeParams) -> Option<PathBuf> {
        params
            .workspace_folders
            .as_ref()
            .and_then(|folders| folders.first())
            .map(|folder| folder.uri.clone())
            .or_else(|| params.root_uri.clone())
            .and_then(|uri| uri.to_file_path().ok())
    }

    fn initialize(&mut self, params: Value) -> RequestResult<Value> {
        let params: InitializeParams = parse(params)?;
        self.workspace_root = Self::workspace_root(&params);
        let mut config = parse_server_config(params.initialization_options.as_ref());

        if let Some(root) = &self.workspace_root {
            match load_deprecated_index_config(root) {
                Ok(Some(deprecated)) => {
                    self.outbox.show_message(
                        MessageType::WARNING,
                        format!(
                            "The {} configuration file is deprecated. Move its settings to the indexing initialization options.",
                            DEPRECATED_INDEX_CONFIG
                        ),
                    );
                    config.indexing.merge_deprecated(deprecated);
                }
                Ok(None) => {}
                Err(err) => {
                    log::warn!("{}", err);
                    self.outbox.show_message(MessageType::WARNING, err.to_string());
                }
            }
        }

        let lock = GemfileLock::read(self.workspace_root.as_deref());
        self.typechecker = config.typechecker.unwrap_or_else(|| lock.has("sorbet-static"));
        self.resolved_formatter = self.formatters.resolve(&config.formatter, &lock);
        self.encoding = PositionEncoding::negotiate(&params.capabilities);

        let (encoding, limit) = (self.encoding, config.expensive_char_limit);
        self.guard.with(|store| {
            let store_config = store.config_mut();
            store_config.encoding = encoding;
            store_config.expensive_char_limit = limit;
        });
        self.index
            .configure(encoding, config.indexing.excluded_magic_comments.clone());
        self.indexer
            .set_progress_enabled(supports_work_done_progress(&params.capabilities));

        if supports_watch_registration(&params.capabilities) {
            self.deferred.push(Deferred::RegisterWatchers);
        }
        if self.workspace_root.is_some() {
            self.deferred.push(Deferred::StartIndexing);
        }
        self.client_capabilities = params.capabilities;
        self.config = config;

        log::info!(
            "Initialized with root {:?}, encoding {:?}, typechecker {}, formatter {:?}",
            self.workspace_root,
            self.encoding,
            self.typechecker,
            self.resolved_formatter
        );

        initialize_result(&CapabilityInputs {
            features: &self.config.features,
            encoding: self.encoding,
            typechecker: self.typechecker,
            formatter: self.resolved_formatter.as_deref(),
        })
        .map_err(RequestError::internal)
    }

    fn initialized(&mut self, _params: Value) -> RequestResult<()> {
        self.addons = AddonRegistry::load(&self.config.enabled_addons);
        let context = AddonContext {
            workspace_root: self.workspace_root.as_deref(),
            outbox: &self.outbox,
        };
        for error in self.addons.activate_all(&context) {
            self.outbox.show_message(MessageType::WARNING, error.to_string());
        }

        if let Some(name) = self.resolved_formatter.clone() {
            if let Err(err) = self.formatters.activate(&name) {
                log::warn!("{}", err);
                self.outbox.show_message(
                    MessageType::WARNING,
                    format!("Formatting is disabled: {}", err),
                );
                self.resolved_formatter = None;
            }
        }
        Ok(())
    }

    fn shutdown(&mut self, _params: Value) -> RequestResult<Value> {
        log::info!("Shutting down");
        self.shutdown.cancel();
        self.addons.deactivate_all();
        Ok(Value::Null)
    }

    fn exit(&mut self, _params: Value) -> RequestResult<()> {
        self.exit_requested = true;
        Ok(())
    }

    fn cancel_request(&mut self, params: Value) -> RequestResult<()> {
        if let Some(id) = cancel_target(&params) {
            self.cancellation.cancel(id);
        }
        Ok(())
    }

    // ========================================================================
    // Document lifecycle
    // ========================================================================

    fn did_open(&mut self, params: Value) -> RequestResult<()> {
        let params: DidOpenTextDocumentParams = parse(params)?;
        let document = params.text_document;
        let uri = document.uri.clone();
        let outcome = self.guard.with(|store| {
            store.open(document.uri, document.text, document.version, &document.language_id)
        });
        if outcome == OpenOutcome::PastLimit && self.past_limit_warned.insert(uri.clone()) {
            log::info!("{} is past the size limit", uri);
            self.outbox.show_message(
                MessageType::WARNING,
                format!(
                    "This file is longer than {} characters. Semantic highlighting and diagnostics are disabled for it.",
                    self.config.expensive_char_limit
                ),
            );
        }
        Ok(())
    }

    fn did_close(&mut self, params: Value) -> RequestResult<()> {
        let params: DidCloseTextDocumentParams = parse(params)?;
        let uri = params.text_document.uri;
        self.guard.with(|store| store.close(&uri));
        self.past_limit_warned.remove(&uri);
        self.outbox.notify::<PublishDiagnostics>(PublishDiagnosticsParams {
            uri,
            diagnostics: Vec::new(),
            version: None,
        });
        Ok(())
    }

    fn did_change(&mut self, params: Value) -> RequestResult<()> {
        let params: DidChangeTextDocumentParams = parse(params)?;
        let document = params.text_document;
        let applied = self
            .guard
            .with(|store| store.update(&document.uri, document.version, params.content_changes));
        if !applied {
            log::warn!("Ignoring change to unknown document {}", document.uri);
        }
        Ok(())
    }

    fn did_change_watched_files(&mut self, params: Value) -> RequestResult<()> {
        let params: DidChangeWatchedFilesParams = parse(params)?;
        let load_paths = self
            .workspace_root
            .as_deref()
            .map(|root| self.config.indexing.resolved_load_paths(root))
            .unwrap_or_default();

        for event in &params.changes {
            let Ok(path) = event.uri.to_file_path() else {
                continue;
            };
            if path.extension().map_or(true, |ext| ext != "rb") || path.is_dir() {
                continue;
            }
            let change = if event.typ == FileChangeType::DELETED {
                IndexChange::Deleted(event.uri.clone())
            } else {
                let indexable = IndexablePath::from_load_paths(path, &load_paths);
                if event.typ == FileChangeType::CREATED {
                    IndexChange::Created(indexable)
                } else {
                    IndexChange::Changed(indexable)
                }
            };
            self.indexer.apply_change(change);
        }

        let context = AddonContext {
            workspace_root: self.workspace_root.as_deref(),
            outbox: &self.outbox,
        };
        self.addons.file_events(&params.changes, &context);
        Ok(())
    }

    // ========================================================================
    // Document features
    // ========================================================================

    fn snapshot(&self, uri: &Url) -> RequestResult<DocumentSnapshot> {
        self.guard
            .snapshot(uri)
            .ok_or_else(|| RequestError::DocumentNotFound(uri.clone()))
    }

    /// Snapshot of a document the feature can analyze; None for signature
    /// files.
    fn ruby_snapshot(&self, uri: &Url) -> RequestResult<Option<DocumentSnapshot>> {
        let snapshot = self.snapshot(uri)?;
        Ok((snapshot.kind != DocumentKind::Rbs).then_some(snapshot))
    }

    /// Template positions outside Ruby tags belong to the host language.
    fn ensure_ruby_position(snapshot: &DocumentSnapshot, position: Position) -> RequestResult<()> {
        if snapshot.kind == DocumentKind::Erb && !snapshot.source.in_ruby_code(snapshot.offset_at(position)) {
            return Err(RequestError::Delegated);
        }
        Ok(())
    }

    fn cluster(&mut self, params: Value, method: Method) -> RequestResult<Value> {
        let params: DocumentParams = parse(params)?;
        cluster_response(&self.guard, &params.text_document.uri, method)
    }

    fn document_symbol(&mut self, params: Value) -> RequestResult<Value> {
        self.cluster(params, Method::DocumentSymbol)
    }

    fn document_link(&mut self, params: Value) -> RequestResult<Value> {
        self.cluster(params, Method::DocumentLink)
    }

    fn code_lens(&mut self, params: Value) -> RequestResult<Value> {
        self.cluster(params, Method::CodeLens)
    }

    fn folding_range(&mut self, params: Value) -> RequestResult<Value> {
        self.cluster(params, Method::FoldingRange)
    }

    fn selection_range(&mut self, params: Value) -> RequestResult<Value> {
        let params: SelectionRangeParams = parse(params)?;
        let tree = cached_selection_tree(&self.guard, &params.text_document.uri)?;
        encode(select(&tree, &params.positions))
    }

    fn semantic_tokens_full(&mut self, params: Value) -> RequestResult<Value> {
        let params: DocumentParams = parse(params)?;
        cached_response(
            &self.guard,
            &params.text_document.uri,
            Method::SemanticTokensFull,
            |snapshot| encode(semantic_tokens::full(snapshot)),
        )
    }

    /// Answered with a full token set; deltas depend on a baseline and are
    /// never cached.
    fn semantic_tokens_delta(&mut self, params: Value) -> RequestResult<Value> {
        let params: DocumentParams = parse(params)?;
        let snapshot = self.snapshot(&params.text_document.uri)?;
        encode(semantic_tokens::full(&snapshot))
    }

    fn semantic_tokens_range(&mut self, params: Value) -> RequestResult<Value> {
        let params: SemanticTokensRangeParams = parse(params)?;
        let snapshot = self.snapshot(&params.text_document.uri)?;
        encode(semantic_tokens::range(&snapshot, params.range))
    }

    fn formatting(&mut self, params: Value) -> RequestResult<Value> {
        let params: DocumentFormattingParams = parse(params)?;
        let Some(snapshot) = self.ruby_snapshot(&params.text_document.uri)? else {
            return unsupported();
        };
        let Some(formatter) = self.formatters.active() else {
            return Ok(Value::Null);
        };
        match editing::formatting(&snapshot, formatter.as_ref()) {
            Ok(edits) => encode(edits),
            Err(err) => {
                log::warn!("Formatting {} failed: {}", snapshot.uri, err);
                self.outbox
                    .show_message(MessageType::WARNING, format!("Formatting failed: {}", err));
                Ok(Value::Null)
            }
        }
    }

    fn document_highlight(&mut self, params: Value) -> RequestResult<Value> {
        let params: DocumentHighlightParams = parse(params)?;
        let position = params.text_document_position_params;
        let Some(snapshot) = self.ruby_snapshot(&position.text_document.uri)? else {
            return unsupported();
        };
        encode(handlers::document_highlight(&snapshot, position.position))
    }

    fn on_type_formatting(&mut self, params: Value) -> RequestResult<Value> {
        let params: DocumentOnTypeFormattingParams = parse(params)?;
        let position = params.text_document_position;
        let Some(snapshot) = self.ruby_snapshot(&position.text_document.uri)? else {
            return unsupported();
        };
        encode(editing::on_type_formatting(&snapshot, position.position, &params.ch))
    }

    fn hover(&mut self, params: Value) -> RequestResult<Value> {
        let params: HoverParams = parse(params)?;
        let position = params.text_document_position_params;
        let Some(snapshot) = self.ruby_snapshot(&position.text_document.uri)? else {
            return unsupported();
        };
        Self::ensure_ruby_position(&snapshot, position.position)?;
        encode(handlers::hover(&snapshot, &self.index, position.position))
    }

    fn inlay_hint(&mut self, params: Value) -> RequestResult<Value> {
        let params: InlayHintParams = parse(params)?;
        let Some(snapshot) = self.ruby_snapshot(&params.text_document.uri)? else {
            return unsupported();
        };
        let options = InlayHintOptions {
            implicit_rescue: self.config.implicit_rescue_hints,
            implicit_hash_value: self.config.implicit_hash_value_hints,
        };
        encode(handlers::inlay_hints(&snapshot, params.range, options))
    }

    fn code_action(&mut self, params: Value) -> RequestResult<Value> {
        let params: CodeActionParams = parse(params)?;
        let Some(snapshot) = self.ruby_snapshot(&params.text_document.uri)? else {
            return unsupported();
        };
        encode(editing::code_actions(&snapshot, params.range))
    }

    fn code_action_resolve(&mut self, params: Value) -> RequestResult<Value> {
        let mut action: CodeAction = parse(params)?;
        let (uri, range) = editing::code_action_target(&action)
            .ok_or_else(|| RequestError::InvalidParams("code action has no target".to_string()))?;
        let snapshot = self.snapshot(&uri)?;
        action.edit = editing::extract_variable(&snapshot, range);
        encode(action)
    }

    fn diagnostic(&mut self, params: Value) -> RequestResult<Value> {
        let params: DocumentParams = parse(params)?;
        let formatter = self.formatters.active();
        cached_response(&self.guard, &params.text_document.uri, Method::Diagnostic, |snapshot| {
            Ok(editing::diagnostic_report(editing::diagnostics(
                snapshot,
                formatter.as_deref(),
            )))
        })
    }

    fn completion(&mut self, params: Value) -> RequestResult<Value> {
        let params: CompletionParams = parse(params)?;
        let position = params.text_document_position;
        let Some(snapshot) = self.ruby_snapshot(&position.text_document.uri)? else {
            return unsupported();
        };
        Self::ensure_ruby_position(&snapshot, position.position)?;
        encode(handlers::completion(&snapshot, &self.index, position.position))
    }

    fn completion_resolve(&mut self, params: Value) -> RequestResult<Value> {
        let item: CompletionItem = parse(params)?;
        encode(handlers::completion_resolve(&self.index, item))
    }

    fn signature_help(&mut self, params: Value) -> RequestResult<Value> {
        let params: SignatureHelpParams = parse(params)?;
        let position = params.text_document_position_params;
        let Some(snapshot) = self.ruby_snapshot(&position.text_document.uri)? else {
            return unsupported();
        };
        Self::ensure_ruby_position(&snapshot, position.position)?;
        encode(handlers::signature_help(&snapshot, &self.index, position.position))
    }

    fn definition(&mut self, params: Value) -> RequestResult<Value> {
        let params: GotoDefinitionParams = parse(params)?;
        let position = params.text_document_position_params;
        let Some(snapshot) = self.ruby_snapshot(&position.text_document.uri)? else {
            return unsupported();
        };
        Self::ensure_ruby_position(&snapshot, position.position)?;
        encode(handlers::definition(&snapshot, &self.index, position.position))
    }

    fn prepare_type_hierarchy(&mut self, params: Value) -> RequestResult<Value> {
        let params: TextDocumentPositionParams = parse(params)?;
        let Some(snapshot) = self.ruby_snapshot(&params.text_document.uri)? else {
            return unsupported();
        };
        Ok(handlers::prepare_type_hierarchy(&snapshot, &self.index, params.position).unwrap_or(Value::Null))
    }

    fn type_hierarchy_supertypes(&mut self, params: Value) -> RequestResult<Value> {
        let params: TypeHierarchyItemParams = parse(params)?;
        Ok(handlers::supertypes(&self.index, &params.item).unwrap_or(Value::Null))
    }

    /// The index keeps no subclass relation.
    fn type_hierarchy_subtypes(&mut self, _params: Value) -> RequestResult<Value> {
        Ok(Value::Null)
    }

    fn workspace_symbol(&mut self, params: Value) -> RequestResult<Value> {
        let params: WorkspaceSymbolParams = parse(params)?;
        encode(handlers::workspace_symbol(&self.index, &params.query))
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn exit_requested(&self) -> bool {
        self.exit_requested
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn guard(&self) -> &MutationGuard {
        &self.guard
    }

    pub fn index(&self) -> &Arc<WorkspaceIndex> {
        &self.index
    }

    pub fn indexer(&self) -> &BackgroundIndexer {
        &self.indexer
    }

    pub fn cancellation(&self) -> &CancellationRegistry {
        &self.cancellation
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn client_capabilities(&self) -> &ClientCapabilities {
        &self.client_capabilities
    }

    pub fn formatters(&self) -> &FormatterRegistry {
        &self.formatters
    }

    pub fn addons(&self) -> &AddonRegistry {
        &self.addons
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    fn router() -> (Router, UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let router = Router::new(
            Outbox::new(tx),
            CancellationRegistry::new(),
            RouterOptions {
                compact_after_indexing: false,
                formatters: FormatterRegistry::empty(),
            },
        );
        (router, rx)
    }

    fn drain(rx: &mut UnboundedReceiver<Message>) -> Vec<Message> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    fn request(id: i64, method: &str, params: Value) -> Message {
        Message::request(Id::Number(id), method, params)
    }

    fn open(router: &mut Router, uri: &str, text: &str) {
        router.process(Message::notification(
            "textDocument/didOpen",
            json!({ "textDocument": { "uri": uri, "languageId": "ruby", "version": 1, "text": text } }),
        ));
    }

    #[test]
    fn test_every_method_has_a_route() {
        for method in Method::ALL {
            assert!(!matches!(handler_for(method), Handler::Ignored), "{method}");
        }
        assert!(matches!(handler_for(Method::Unknown), Handler::Ignored));
    }

    #[test]
    fn test_missing_document_is_invalid_params_without_data() {
        let (mut router, mut rx) = router();
        router.process(request(
            1,
            "textDocument/documentSymbol",
            json!({ "textDocument": { "uri": "file:///workspace/gone.rb" } }),
        ));
        match drain(&mut rx).as_slice() {
            [Message::Error { error, .. }] => {
                assert_eq!(error.code, INVALID_PARAMS);
                assert!(error.data.is_none());
            }
            other => panic!("unexpected messages: {:?}", other),
        }
    }

    #[test]
    fn test_malformed_params_are_invalid_params() {
        let (mut router, mut rx) = router();
        router.process(request(1, "textDocument/hover", json!({ "nope": true })));
        let messages = drain(&mut rx);
        assert!(matches!(&messages[0], Message::Error { error, .. } if error.code == INVALID_PARAMS));
    }

    #[test]
    fn test_unknown_request_gets_null_and_unknown_notification_nothing() {
        let (mut router, mut rx) = router();
        router.process(request(5, "textDocument/rename", json!({})));
        router.process(Message::notification("$/setTrace", json!({})));
        assert_eq!(
            drain(&mut rx),
            vec![Message::Result {
                id: Id::Number(5),
                result: Value::Null
            }]
        );
    }

    #[test]
    fn test_cancelled_request_gets_no_reply() {
        let (mut router, mut rx) = router();
        open(&mut router, "file:///workspace/a.rb", "class A; end\n");
        router.cancellation().register(Id::Number(9));
        router.cancellation().cancel(Id::Number(9));
        router.process(request(
            9,
            "textDocument/foldingRange",
            json!({ "textDocument": { "uri": "file:///workspace/a.rb" } }),
        ));
        router.process(request(
            10,
            "textDocument/foldingRange",
            json!({ "textDocument": { "uri": "file:///workspace/a.rb" } }),
        ));
        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id(), Some(&Id::Number(10)));
        assert!(router.cancellation().is_empty());
        assert_eq!(router.cancellation().in_flight(), 0);
    }

    #[test]
    fn test_erb_outside_ruby_is_delegated() {
        let (mut router, mut rx) = router();
        router.process(Message::notification(
            "textDocument/didOpen",
            json!({ "textDocument": {
                "uri": "file:///workspace/show.html.erb", "languageId": "erb", "version": 1,
                "text": "<h1>Title</h1>\n<%= link_to %>\n"
            } }),
        ));
        router.process(request(
            2,
            "textDocument/hover",
            json!({ "textDocument": { "uri": "file:///workspace/show.html.erb" }, "position": { "line": 0, "character": 2 } }),
        ));
        let messages = drain(&mut rx);
        assert!(matches!(&messages[0], Message::Error { error, .. } if error.code == DELEGATED_REQUEST && error.data.is_none()));
    }

    #[test]
    fn test_rbs_documents_get_empty_responses() {
        let (mut router, mut rx) = router();
        router.process(Message::notification(
            "textDocument/didOpen",
            json!({ "textDocument": {
                "uri": "file:///workspace/sig/cart.rbs", "languageId": "rbs", "version": 1,
                "text": "class Cart\nend\n"
            } }),
        ));
        router.process(request(
            3,
            "textDocument/hover",
            json!({ "textDocument": { "uri": "file:///workspace/sig/cart.rbs" }, "position": { "line": 0, "character": 7 } }),
        ));
        router.process(request(
            4,
            "textDocument/documentSymbol",
            json!({ "textDocument": { "uri": "file:///workspace/sig/cart.rbs" } }),
        ));
        let messages = drain(&mut rx);
        assert_eq!(messages[0], Message::Result { id: Id::Number(3), result: Value::Null });
        assert_eq!(messages[1], Message::Result { id: Id::Number(4), result: json!([]) });
    }

    #[test]
    fn test_did_change_for_unknown_document_is_ignored() {
        let (mut router, mut rx) = router();
        router.process(Message::notification(
            "textDocument/didChange",
            json!({
                "textDocument": { "uri": "file:///workspace/nope.rb", "version": 2 },
                "contentChanges": [{ "text": "x" }]
            }),
        ));
        assert!(drain(&mut rx).is_empty());
        assert!(router.guard().with(|store| store.is_empty()));
    }

    #[test]
    fn test_shutdown_and_exit() {
        let (mut router, mut rx) = router();
        let token = router.shutdown_token();
        router.process(request(1, "shutdown", Value::Null));
        assert!(token.is_cancelled());
        assert!(!router.exit_requested());
        router.process(Message::notification("exit", Value::Null));
        assert!(router.exit_requested());
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[test]
    fn test_translate_internal_error_payload() {
        let error = translate(Failure::Error(RequestError::internal(anyhow::anyhow!("exploded"))));
        assert_eq!(error.code, INTERNAL_ERROR);
        let data = error.data.unwrap();
        assert_eq!(data["errorClass"], json!("InternalError"));
        assert_eq!(data["errorMessage"], json!("exploded"));
        assert!(data["backtrace"].is_string());

        let panic = translate(Failure::Panic {
            message: "oops".to_string(),
            backtrace: vec!["0: somewhere".to_string()],
        });
        let data = panic.data.unwrap();
        assert_eq!(data["errorClass"], json!("panic"));
        assert_eq!(data["backtrace"], json!("0: somewhere"));
    }

    #[inline(never)]
    fn resolve_deep_in_handler(_router: &mut Router) -> RequestResult<Value> {
        panic!("handler blew up");
    }

    #[test]
    fn test_panic_backtrace_points_at_the_panicking_frame() {
        let (mut router, _rx) = router();
        let failure = match router.guarded(resolve_deep_in_handler) {
            Err(failure) => failure,
            Ok(_) => panic!("handler should have panicked"),
        };
        let error = translate(failure);
        assert_eq!(error.message, "handler blew up");
        let data = error.data.unwrap();
        assert_eq!(data["errorClass"], json!("panic"));
        let backtrace = data["backtrace"].as_str().unwrap();
        assert!(backtrace.contains("resolve_deep_in_handler"), "backtrace: {}", backtrace);
        assert!(!backtrace.contains("router::translate"), "backtrace: {}", backtrace);
    }
}

//
// config.rs
//
// Server configuration from initializationOptions and workspace files
//

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;

use crate::error::ConfigError;

/// Characters above which a document is "past limit" and loses expensive
/// features (semantic highlighting, diagnostics).
pub const DEFAULT_EXPENSIVE_CHAR_LIMIT: usize = 100_000;

/// Workspace file holding indexing settings from older clients.
pub const DEPRECATED_INDEX_CONFIG: &str = ".index.yml";

// ============================================================================
// Feature toggles
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    CodeActions,
    CodeLens,
    Completion,
    Definition,
    Diagnostics,
    DocumentHighlight,
    DocumentLink,
    DocumentSymbols,
    FoldingRanges,
    Formatting,
    Hover,
    InlayHint,
    OnTypeFormatting,
    SelectionRanges,
    SemanticHighlighting,
    SignatureHelp,
    TypeHierarchy,
    WorkspaceSymbol,
}

impl Feature {
    pub const ALL: [Feature; 18] = [
        Feature::CodeActions,
        Feature::CodeLens,
        Feature::Completion,
        Feature::Definition,
        Feature::Diagnostics,
        Feature::DocumentHighlight,
        Feature::DocumentLink,
        Feature::DocumentSymbols,
        Feature::FoldingRanges,
        Feature::Formatting,
        Feature::Hover,
        Feature::InlayHint,
        Feature::OnTypeFormatting,
        Feature::SelectionRanges,
        Feature::SemanticHighlighting,
        Feature::SignatureHelp,
        Feature::TypeHierarchy,
        Feature::WorkspaceSymbol,
    ];

    /// Name used in `enabledFeatures`.
    pub fn key(self) -> &'static str {
        match self {
            Feature::CodeActions => "codeActions",
            Feature::CodeLens => "codeLens",
            Feature::Completion => "completion",
            Feature::Definition => "definition",
            Feature::Diagnostics => "diagnostics",
            Feature::DocumentHighlight => "documentHighlight",
            Feature::DocumentLink => "documentLink",
            Feature::DocumentSymbols => "documentSymbols",
            Feature::FoldingRanges => "foldingRanges",
            Feature::Formatting => "formatting",
            Feature::Hover => "hover",
            Feature::InlayHint => "inlayHint",
            Feature::OnTypeFormatting => "onTypeFormatting",
            Feature::SelectionRanges => "selectionRanges",
            Feature::SemanticHighlighting => "semanticHighlighting",
            Feature::SignatureHelp => "signatureHelp",
            Feature::TypeHierarchy => "typeHierarchy",
            Feature::WorkspaceSymbol => "workspaceSymbol",
        }
    }

    pub fn from_key(key: &str) -> Option<Feature> {
        Feature::ALL.into_iter().find(|feature| feature.key() == key)
    }

    fn slot(self) -> usize {
        self as usize
    }
}

/// Per-feature enablement after merging the client's `enabledFeatures`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureToggles {
    enabled: [bool; Feature::ALL.len()],
}

impl Default for FeatureToggles {
    fn default() -> Self {
        Self::all_enabled()
    }
}

impl FeatureToggles {
    pub fn all_enabled() -> Self {
        Self {
            enabled: [true; Feature::ALL.len()],
        }
    }

    /// Merge the client's declaration with the defaults.
    ///
    /// An array is an opt-in list (everything else off), an object overrides
    /// individual features (everything unmentioned stays on), and anything
    /// else leaves all features on.
    pub fn from_value(value: Option<&Value>) -> Self {
        let mut toggles = Self::all_enabled();
        match value {
            Some(Value::Array(names)) => {
                toggles.enabled = [false; Feature::ALL.len()];
                for name in names.iter().filter_map(Value::as_str) {
                    match Feature::from_key(name) {
                        Some(feature) => toggles.set(feature, true),
                        None => log::warn!("Ignoring unknown feature '{}'", name),
                    }
                }
            }
            Some(Value::Object(map)) => {
                for (name, enabled) in map {
                    match (Feature::from_key(name), enabled.as_bool()) {
                        (Some(feature), Some(enabled)) => toggles.set(feature, enabled),
                        (None, _) => log::warn!("Ignoring unknown feature '{}'", name),
                        (Some(_), None) => {
                            log::warn!("Ignoring non-boolean toggle for feature '{}'", name)
                        }
                    }
                }
            }
            _ => {}
        }
        toggles
    }

    pub fn is_enabled(&self, feature: Feature) -> bool {
        self.enabled[feature.slot()]
    }

    pub fn set(&mut self, feature: Feature, enabled: bool) {
        self.enabled[feature.slot()] = enabled;
    }
}

// ============================================================================
// Server configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FormatterSetting {
    /// Pick a formatter from the bundle's dependencies.
    #[default]
    Auto,
    Disabled,
    Named(String),
}

impl FormatterSetting {
    fn parse(value: &str) -> Self {
        match value {
            "auto" => FormatterSetting::Auto,
            "none" => FormatterSetting::Disabled,
            other => FormatterSetting::Named(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexingConfig {
    pub excluded_patterns: Vec<String>,
    pub included_patterns: Vec<String>,
    /// Comment prefixes never attached to index entries as documentation.
    pub excluded_magic_comments: Vec<String>,
    /// Extra search roots, relative to the workspace root unless absolute.
    pub load_paths: Vec<String>,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            excluded_patterns: ["**/tmp/**", "**/vendor/**", "**/node_modules/**", "**/.git/**"]
                .into_iter()
                .map(String::from)
                .collect(),
            included_patterns: vec!["**/*.rb".to_string()],
            excluded_magic_comments: Vec::new(),
            load_paths: Vec::new(),
        }
    }
}

impl IndexingConfig {
    fn merge_value(&mut self, indexing: &Value) {
        if let Some(v) = string_list(indexing.get("excludedPatterns")) {
            self.excluded_patterns.extend(v);
        }
        if let Some(v) = string_list(indexing.get("includedPatterns")) {
            self.included_patterns.extend(v);
        }
        if let Some(v) = string_list(indexing.get("excludedMagicComments")) {
            self.excluded_magic_comments.extend(v);
        }
        if let Some(v) = string_list(indexing.get("loadPaths")) {
            self.load_paths.extend(v);
        }
    }

    pub fn merge_deprecated(&mut self, deprecated: DeprecatedIndexConfig) {
        self.excluded_patterns.extend(deprecated.excluded_patterns);
        self.included_patterns.extend(deprecated.included_patterns);
        self.excluded_magic_comments
            .extend(deprecated.excluded_magic_comments);
    }

    /// Search roots under `workspace_root`, conventional directories first.
    pub fn resolved_load_paths(&self, workspace_root: &Path) -> Vec<PathBuf> {
        ["lib", "app", "test", "spec"]
            .iter()
            .map(|dir| workspace_root.join(dir))
            .chain(self.load_paths.iter().map(|path| {
                let path = Path::new(path);
                if path.is_absolute() {
                    path.to_path_buf()
                } else {
                    workspace_root.join(path)
                }
            }))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub features: FeatureToggles,
    pub formatter: FormatterSetting,
    /// Explicit type checker declaration; detected from the bundle when None.
    pub typechecker: Option<bool>,
    pub indexing: IndexingConfig,
    pub enabled_addons: Vec<String>,
    pub expensive_char_limit: usize,
    pub implicit_rescue_hints: bool,
    pub implicit_hash_value_hints: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            features: FeatureToggles::default(),
            formatter: FormatterSetting::default(),
            typechecker: None,
            indexing: IndexingConfig::default(),
            enabled_addons: Vec::new(),
            expensive_char_limit: DEFAULT_EXPENSIVE_CHAR_LIMIT,
            implicit_rescue_hints: true,
            implicit_hash_value_hints: true,
        }
    }
}

fn string_list(value: Option<&Value>) -> Option<Vec<String>> {
    let items = value?.as_array()?;
    Some(
        items
            .iter()
            .filter_map(|item| item.as_str().map(String::from))
            .collect(),
    )
}

/// Parse `initializationOptions`. Missing or malformed members keep their
/// defaults.
pub fn parse_server_config(options: Option<&Value>) -> ServerConfig {
    let mut config = ServerConfig::default();
    let Some(options) = options else {
        return config;
    };

    config.features = FeatureToggles::from_value(options.get("enabledFeatures"));

    if let Some(v) = options.get("formatter").and_then(|v| v.as_str()) {
        config.formatter = FormatterSetting::parse(v);
    }
    if let Some(v) = options.get("typechecker").and_then(|v| v.as_bool()) {
        config.typechecker = Some(v);
    }
    if let Some(indexing) = options.get("indexing") {
        config.indexing.merge_value(indexing);
    }
    if let Some(v) = string_list(options.get("enabledAddons")) {
        config.enabled_addons = v;
    }
    if let Some(v) = options
        .get("expensiveFeatureCharLimit")
        .and_then(|v| v.as_u64())
    {
        config.expensive_char_limit = v as usize;
    }
    if let Some(inlay) = options
        .get("featuresConfiguration")
        .and_then(|v| v.get("inlayHint"))
    {
        if let Some(v) = inlay.get("implicitRescue").and_then(|v| v.as_bool()) {
            config.implicit_rescue_hints = v;
        }
        if let Some(v) = inlay.get("implicitHashValue").and_then(|v| v.as_bool()) {
            config.implicit_hash_value_hints = v;
        }
    }

    log::info!(
        "Server configuration: formatter={:?}, typechecker={:?}, addons={:?}, expensive_char_limit={}",
        config.formatter,
        config.typechecker,
        config.enabled_addons,
        config.expensive_char_limit
    );

    config
}

// ============================================================================
// Workspace files
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DeprecatedIndexConfig {
    pub excluded_patterns: Vec<String>,
    pub included_patterns: Vec<String>,
    pub excluded_magic_comments: Vec<String>,
}

/// Read `.index.yml` from the workspace root, if present.
pub fn load_deprecated_index_config(
    workspace_root: &Path,
) -> Result<Option<DeprecatedIndexConfig>, ConfigError> {
    let path = workspace_root.join(DEPRECATED_INDEX_CONFIG);
    if !path.is_file() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    if text.trim().is_empty() {
        return Ok(Some(DeprecatedIndexConfig::default()));
    }
    let config = serde_yaml::from_str(&text).map_err(|source| ConfigError::Yaml { path, source })?;
    Ok(Some(config))
}

/// Gem names listed in the workspace's `Gemfile.lock`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GemfileLock {
    gems: HashSet<String>,
}

impl GemfileLock {
    pub fn read(workspace_root: Option<&Path>) -> Self {
        let Some(root) = workspace_root else {
            return Self::default();
        };
        match std::fs::read_to_string(root.join("Gemfile.lock")) {
            Ok(text) => Self::parse(&text),
            Err(_) => Self::default(),
        }
    }

    /// Collect indented gem names from the `specs:` and `DEPENDENCIES`
    /// sections. Version constraints and platform suffixes are dropped.
    pub fn parse(text: &str) -> Self {
        let gems = text
            .lines()
            .filter(|line| line.starts_with("  "))
            .filter_map(|line| {
                let name = line
                    .trim_start()
                    .split(|c: char| c.is_whitespace() || c == '(' || c == '!')
                    .next()?;
                let valid = !name.is_empty()
                    && !name.ends_with(':')
                    && name
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
                valid.then(|| name.to_string())
            })
            .collect();
        Self { gems }
    }

    pub fn has(&self, gem: &str) -> bool {
        self.gems.contains(gem)
    }
}

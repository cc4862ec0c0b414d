//
// formatter.rs
//
// Named registry of formatters and the external-command implementation
//

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::Arc;

use indexmap::IndexMap;
use serde::Deserialize;
use tower_lsp::lsp_types::{Diagnostic, DiagnosticSeverity, NumberOrString, Position, Range, Url};

use crate::config::{FormatterSetting, GemfileLock};
use crate::error::FormatterError;

/// A code formatter selectable by name.
pub trait Formatter: Send + Sync {
    fn name(&self) -> &str;

    /// Checked once on activation; an error leaves the server without a
    /// formatter.
    fn is_available(&self) -> Result<(), FormatterError> {
        Ok(())
    }

    /// Formatted text, or None when the document is already formatted.
    fn run_formatting(&self, uri: &Url, text: &str) -> Result<Option<String>, FormatterError>;

    fn run_diagnostic(&self, uri: &Url, text: &str) -> Result<Vec<Diagnostic>, FormatterError>;
}

// ============================================================================
// External command formatter
// ============================================================================

/// Runs a formatter executable, passing the document on stdin.
///
/// `{path}` in an argument list is replaced with the document's file path.
pub struct ExternalFormatter {
    name: String,
    program: String,
    format_args: Vec<String>,
    diagnostic_args: Option<Vec<String>>,
    /// Exit codes that still mean success (rubocop exits 1 on offenses)
    ok_statuses: Vec<i32>,
}

fn owned(args: &[&str]) -> Vec<String> {
    args.iter().map(|arg| arg.to_string()).collect()
}

fn find_on_path(program: &str) -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

impl ExternalFormatter {
    pub fn new(name: &str, program: &str, format_args: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            program: program.to_string(),
            format_args,
            diagnostic_args: None,
            ok_statuses: vec![0],
        }
    }

    pub fn rubocop() -> Self {
        Self {
            name: "rubocop".to_string(),
            program: "rubocop".to_string(),
            format_args: owned(&["--stdin", "{path}", "-a", "--stderr", "--format", "quiet"]),
            diagnostic_args: Some(owned(&["--stdin", "{path}", "--format", "json"])),
            ok_statuses: vec![0, 1],
        }
    }

    pub fn syntax_tree() -> Self {
        Self::new("syntax_tree", "stree", owned(&["format"]))
    }

    fn command_line(&self, args: &[String]) -> String {
        std::iter::once(self.program.as_str())
            .chain(args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn run(&self, uri: &Url, args: &[String], input: &str) -> Result<String, FormatterError> {
        let path = uri
            .to_file_path()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|_| uri.path().to_string());
        let args: Vec<String> = args.iter().map(|arg| arg.replace("{path}", &path)).collect();
        let command = self.command_line(&args);
        log::trace!("Running formatter: {}", command);

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| FormatterError::Spawn {
                command: command.clone(),
                source,
            })?;
        let stdin = child.stdin.take();
        // Stdin is fed from its own thread while stdout and stderr drain here
        let (written, output) = std::thread::scope(|scope| {
            let writer = scope.spawn(move || match stdin {
                Some(mut stdin) => stdin.write_all(input.as_bytes()),
                None => Ok(()),
            });
            let output = child.wait_with_output();
            let written = writer
                .join()
                .unwrap_or_else(|_| Err(io::Error::new(io::ErrorKind::Other, "stdin writer panicked")));
            (written, output)
        });
        let spawn_error = |source| FormatterError::Spawn {
            command: command.clone(),
            source,
        };
        let output = output.map_err(spawn_error)?;
        match written {
            // The exit status below says whether stopping early was a failure
            Err(err) if err.kind() == io::ErrorKind::BrokenPipe => {}
            written => written.map_err(spawn_error)?,
        }

        let status = output.status.code().unwrap_or(-1);
        if !self.ok_statuses.contains(&status) {
            return Err(FormatterError::Failed {
                command,
                status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8(output.stdout)?)
    }
}

#[derive(Deserialize)]
struct RubocopReport {
    #[serde(default)]
    files: Vec<RubocopFile>,
}

#[derive(Deserialize)]
struct RubocopFile {
    #[serde(default)]
    offenses: Vec<RubocopOffense>,
}

#[derive(Deserialize)]
struct RubocopOffense {
    severity: String,
    message: String,
    cop_name: String,
    location: RubocopLocation,
}

#[derive(Deserialize)]
struct RubocopLocation {
    start_line: u32,
    start_column: u32,
    last_line: u32,
    last_column: u32,
}

fn rubocop_diagnostics(json: &str) -> Vec<Diagnostic> {
    let report: RubocopReport = match serde_json::from_str(json) {
        Ok(report) => report,
        Err(err) => {
            log::warn!("Unreadable rubocop report: {}", err);
            return Vec::new();
        }
    };
    report
        .files
        .into_iter()
        .flat_map(|file| file.offenses)
        .map(|offense| {
            let severity = match offense.severity.as_str() {
                "error" | "fatal" => DiagnosticSeverity::ERROR,
                "warning" => DiagnosticSeverity::WARNING,
                "convention" | "refactor" => DiagnosticSeverity::INFORMATION,
                _ => DiagnosticSeverity::HINT,
            };
            let location = offense.location;
            // Rubocop lines and columns are one-based, the last column inclusive
            let range = Range::new(
                Position::new(
                    location.start_line.saturating_sub(1),
                    location.start_column.saturating_sub(1),
                ),
                Position::new(location.last_line.saturating_sub(1), location.last_column),
            );
            Diagnostic {
                range,
                severity: Some(severity),
                code: Some(NumberOrString::String(offense.cop_name)),
                source: Some("RuboCop".to_string()),
                message: offense.message,
                ..Default::default()
            }
        })
        .collect()
}

impl Formatter for ExternalFormatter {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_available(&self) -> Result<(), FormatterError> {
        if find_on_path(&self.program).is_some() {
            Ok(())
        } else {
            Err(FormatterError::Unavailable {
                name: self.name.clone(),
                reason: format!("`{}` was not found on PATH", self.program),
            })
        }
    }

    fn run_formatting(&self, uri: &Url, text: &str) -> Result<Option<String>, FormatterError> {
        let formatted = self.run(uri, &self.format_args, text)?;
        if formatted.is_empty() || formatted == text {
            Ok(None)
        } else {
            Ok(Some(formatted))
        }
    }

    fn run_diagnostic(&self, uri: &Url, text: &str) -> Result<Vec<Diagnostic>, FormatterError> {
        let Some(args) = &self.diagnostic_args else {
            return Ok(Vec::new());
        };
        let output = self.run(uri, args, text)?;
        Ok(rubocop_diagnostics(&output))
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Formatters by name plus the one activated for this session.
pub struct FormatterRegistry {
    formatters: IndexMap<String, Arc<dyn Formatter>>,
    active: Option<String>,
}

impl Default for FormatterRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl FormatterRegistry {
    pub fn empty() -> Self {
        Self {
            formatters: IndexMap::new(),
            active: None,
        }
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(ExternalFormatter::rubocop()));
        registry.register(Arc::new(ExternalFormatter::syntax_tree()));
        registry
    }

    /// Add or replace a formatter under its own name.
    pub fn register(&mut self, formatter: Arc<dyn Formatter>) {
        self.formatters.insert(formatter.name().to_string(), formatter);
    }

    pub fn names(&self) -> Vec<&str> {
        self.formatters.keys().map(String::as_str).collect()
    }

    /// Formatter name selected by the setting, before activation.
    ///
    /// `auto` picks the first registered default found in the bundle.
    pub fn resolve(&self, setting: &FormatterSetting, lock: &GemfileLock) -> Option<String> {
        match setting {
            FormatterSetting::Disabled => None,
            FormatterSetting::Named(name) => Some(name.clone()),
            FormatterSetting::Auto => ["rubocop", "syntax_tree"]
                .into_iter()
                .find(|gem| lock.has(gem) && self.formatters.contains_key(*gem))
                .map(str::to_string),
        }
    }

    pub fn activate(&mut self, name: &str) -> Result<(), FormatterError> {
        let formatter = self
            .formatters
            .get(name)
            .ok_or_else(|| FormatterError::Unknown(name.to_string()))?;
        formatter.is_available()?;
        log::info!("Using formatter: {}", name);
        self.active = Some(name.to_string());
        Ok(())
    }

    pub fn deactivate(&mut self) {
        self.active = None;
    }

    pub fn active(&self) -> Option<Arc<dyn Formatter>> {
        self.active
            .as_ref()
            .and_then(|name| self.formatters.get(name))
            .cloned()
    }

    pub fn active_name(&self) -> Option<&str> {
        self.active.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Upcase;

    impl Formatter for Upcase {
        fn name(&self) -> &str {
            "upcase"
        }

        fn run_formatting(&self, _uri: &Url, text: &str) -> Result<Option<String>, FormatterError> {
            Ok(Some(text.to_uppercase()))
        }

        fn run_diagnostic(&self, _uri: &Url, _text: &str) -> Result<Vec<Diagnostic>, FormatterError> {
            Ok(Vec::new())
        }
    }

    fn uri() -> Url {
        Url::parse("file:///workspace/lib/a.rb").unwrap()
    }

    #[test]
    fn test_auto_resolution_follows_bundle() {
        let registry = FormatterRegistry::with_defaults();
        let rubocop = GemfileLock::parse("GEM\n  specs:\n    rubocop (1.60.0)\n    syntax_tree (6.2.0)\n");
        let stree = GemfileLock::parse("GEM\n  specs:\n    syntax_tree (6.2.0)\n");
        let neither = GemfileLock::default();

        assert_eq!(registry.resolve(&FormatterSetting::Auto, &rubocop).as_deref(), Some("rubocop"));
        assert_eq!(registry.resolve(&FormatterSetting::Auto, &stree).as_deref(), Some("syntax_tree"));
        assert_eq!(registry.resolve(&FormatterSetting::Auto, &neither), None);
        assert_eq!(registry.resolve(&FormatterSetting::Disabled, &rubocop), None);
        assert_eq!(
            registry
                .resolve(&FormatterSetting::Named("upcase".to_string()), &neither)
                .as_deref(),
            Some("upcase")
        );
    }

    #[test]
    fn test_activation() {
        let mut registry = FormatterRegistry::empty();
        assert!(matches!(registry.activate("upcase"), Err(FormatterError::Unknown(_))));

        registry.register(Arc::new(Upcase));
        registry.activate("upcase").unwrap();
        let active = registry.active().unwrap();
        assert_eq!(active.run_formatting(&uri(), "x").unwrap().as_deref(), Some("X"));

        registry.deactivate();
        assert!(registry.active().is_none());
    }

    #[test]
    fn test_missing_executable_is_unavailable() {
        let formatter = ExternalFormatter::new("ghost", "garnet-no-such-formatter", Vec::new());
        assert!(matches!(formatter.is_available(), Err(FormatterError::Unavailable { .. })));
        let mut registry = FormatterRegistry::empty();
        registry.register(Arc::new(formatter));
        assert!(registry.activate("ghost").is_err());
        assert!(registry.active_name().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_external_command_reads_stdin() {
        let formatter = ExternalFormatter::new("cat", "cat", Vec::new());
        // Identical output means nothing to change
        assert_eq!(formatter.run_formatting(&uri(), "x = 1\n").unwrap(), None);

        let failing = ExternalFormatter::new("false", "false", Vec::new());
        assert!(matches!(
            failing.run_formatting(&uri(), "x"),
            Err(FormatterError::Failed { status: 1, .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_external_command_with_large_document() {
        let formatter = ExternalFormatter::new("tr", "tr", owned(&["a-z", "A-Z"]));
        // Larger than any pipe buffer in both directions
        let text = "value = compute(1)\n".repeat(64 * 1024);
        let formatted = formatter.run_formatting(&uri(), &text).unwrap().unwrap();
        assert_eq!(formatted.len(), text.len());
        assert_eq!(formatted, text.to_uppercase());
    }

    #[test]
    fn test_rubocop_report_to_diagnostics() {
        let json = r#"{"files":[{"path":"a.rb","offenses":[{"severity":"convention","message":"Use snake_case.","cop_name":"Naming/MethodName","corrected":false,"location":{"start_line":2,"start_column":7,"last_line":2,"last_column":12}}]}]}"#;
        let diagnostics = rubocop_diagnostics(json);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].range, Range::new(Position::new(1, 6), Position::new(1, 12)));
        assert_eq!(diagnostics[0].severity, Some(DiagnosticSeverity::INFORMATION));
        assert_eq!(
            diagnostics[0].code,
            Some(NumberOrString::String("Naming/MethodName".to_string()))
        );
        assert!(rubocop_diagnostics("not json").is_empty());
    }
}

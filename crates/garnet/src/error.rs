//
// error.rs
//
// Error types for request handling, indexing, formatters and add-ons
//

use std::backtrace::{Backtrace, BacktraceStatus};
use std::cell::RefCell;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Once};

use thiserror::Error;
use tower_lsp::lsp_types::Url;

/// Errors a request or notification handler can return to the router.
///
/// The router turns each variant into one protocol error shape: stale
/// documents and bad params become invalid-params, `Delegated` becomes the
/// delegated-request code, everything else is an internal error with a
/// diagnostic payload.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("document not found: {0}")]
    DocumentNotFound(Url),
    #[error("invalid params: {0}")]
    InvalidParams(String),
    #[error("request must be handled by the host language server")]
    Delegated,
    #[error(transparent)]
    Analysis(#[from] AnalysisError),
    #[error("{error}")]
    Internal { error: anyhow::Error, trace: Trace },
}

impl From<anyhow::Error> for RequestError {
    fn from(error: anyhow::Error) -> Self {
        RequestError::Internal {
            error,
            trace: Trace::capture(),
        }
    }
}

impl From<serde_json::Error> for RequestError {
    fn from(err: serde_json::Error) -> Self {
        RequestError::InvalidParams(err.to_string())
    }
}

impl RequestError {
    /// Short class name reported in internal-error payloads.
    pub fn class_name(&self) -> &'static str {
        match self {
            RequestError::DocumentNotFound(_) => "DocumentNotFound",
            RequestError::InvalidParams(_) => "InvalidParams",
            RequestError::Delegated => "Delegated",
            RequestError::Analysis(_) => "AnalysisError",
            RequestError::Internal { .. } => "InternalError",
        }
    }

    /// Wrap any error as an internal failure, recording the stack here.
    pub fn internal(error: impl Into<anyhow::Error>) -> Self {
        RequestError::from(error.into())
    }

    /// Stack trace lines for the internal-error payload, taken from where
    /// the error was built. Empty for variants that never carry one.
    pub fn backtrace_lines(&self) -> Vec<String> {
        match self {
            RequestError::Internal { error, .. } if error.backtrace().status() == BacktraceStatus::Captured => {
                split_backtrace(error.backtrace())
            }
            RequestError::Internal { trace, .. } => trace.lines(),
            RequestError::Analysis(err) => err.trace().lines(),
            _ => Vec::new(),
        }
    }
}

/// Stack recorded at the point an error was constructed.
#[derive(Clone)]
pub struct Trace(Arc<Backtrace>);

impl Trace {
    pub fn capture() -> Self {
        Trace(Arc::new(Backtrace::force_capture()))
    }

    pub fn lines(&self) -> Vec<String> {
        split_backtrace(&self.0)
    }
}

impl fmt::Debug for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Trace")
    }
}

fn split_backtrace(backtrace: &Backtrace) -> Vec<String> {
    backtrace
        .to_string()
        .lines()
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

pub type RequestResult<T> = Result<T, RequestError>;

/// Failure inside a tree traversal.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("node text is not valid UTF-8: {source}")]
    Utf8 { source: std::str::Utf8Error, trace: Trace },
    #[error("failed to encode {feature} result: {source}")]
    Encode {
        feature: &'static str,
        source: serde_json::Error,
        trace: Trace,
    },
}

impl From<std::str::Utf8Error> for AnalysisError {
    fn from(source: std::str::Utf8Error) -> Self {
        AnalysisError::Utf8 {
            source,
            trace: Trace::capture(),
        }
    }
}

impl AnalysisError {
    pub fn encode(feature: &'static str, source: serde_json::Error) -> Self {
        AnalysisError::Encode {
            feature,
            source,
            trace: Trace::capture(),
        }
    }

    pub fn trace(&self) -> &Trace {
        match self {
            AnalysisError::Utf8 { trace, .. } | AnalysisError::Encode { trace, .. } => trace,
        }
    }
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to walk workspace: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("invalid glob pattern '{pattern}': {source}")]
    Glob {
        pattern: String,
        source: globset::Error,
    },
    #[error("indexing worker panicked: {0}")]
    Panicked(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid YAML in {path}: {source}")]
    Yaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },
}

#[derive(Debug, Error)]
pub enum FormatterError {
    #[error("formatter '{0}' is not registered")]
    Unknown(String),
    #[error("formatter '{name}' is not available: {reason}")]
    Unavailable { name: String, reason: String },
    #[error("failed to run {command}: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
    #[error("{command} exited with status {status}: {stderr}")]
    Failed {
        command: String,
        status: i32,
        stderr: String,
    },
    #[error("formatter output is not valid UTF-8")]
    Output(#[from] std::string::FromUtf8Error),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AddonError {
    #[error("add-on '{0}' is not known")]
    Unknown(String),
    #[error("add-on '{name}' failed to activate: {message}")]
    Activation { name: String, message: String },
}

/// Extract a readable message from a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

thread_local! {
    static PANIC_TRACE: RefCell<Option<Trace>> = const { RefCell::new(None) };
}

/// Record the stack of every panic on the panicking thread, then defer to
/// the previously installed hook. Installed once per process.
pub(crate) fn install_panic_hook() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let trace = Trace::capture();
            // A panic while the slot is borrowed must not panic again
            let _ = PANIC_TRACE.try_with(|slot| {
                if let Ok(mut slot) = slot.try_borrow_mut() {
                    *slot = Some(trace);
                }
            });
            previous(info);
        }));
    });
}

/// Take the stack recorded by the most recent panic on this thread.
pub(crate) fn take_panic_trace() -> Option<Trace> {
    PANIC_TRACE
        .try_with(|slot| slot.try_borrow_mut().ok().and_then(|mut slot| slot.take()))
        .ok()
        .flatten()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_error_becomes_invalid_params() {
        let err = serde_json::from_str::<u32>("\"x\"").unwrap_err();
        let err: RequestError = err.into();
        assert!(matches!(err, RequestError::InvalidParams(_)));
        assert_eq!(err.class_name(), "InvalidParams");
    }

    #[test]
    fn test_internal_error_has_backtrace_lines() {
        let err = RequestError::internal(anyhow::anyhow!("boom"));
        assert_eq!(err.to_string(), "boom");
        assert_eq!(err.class_name(), "InternalError");
        assert!(!err.backtrace_lines().is_empty());
    }

    #[inline(never)]
    fn decode_node_text() -> Result<(), AnalysisError> {
        let bytes = [0xff_u8, 0xfe];
        std::str::from_utf8(&bytes)?;
        Ok(())
    }

    #[inline(never)]
    fn report(err: AnalysisError) -> Vec<String> {
        RequestError::from(err).backtrace_lines()
    }

    #[test]
    fn test_analysis_trace_is_taken_where_the_error_is_built() {
        let err = decode_node_text().unwrap_err();
        assert!(err.to_string().starts_with("node text is not valid UTF-8"));
        let lines = report(err).join("\n");
        assert!(lines.contains("decode_node_text"), "trace: {}", lines);
    }

    #[test]
    fn test_panic_hook_records_the_panicking_stack() {
        install_panic_hook();
        let _ = take_panic_trace();
        let result = std::panic::catch_unwind(|| panic!("inside"));
        assert!(result.is_err());
        let trace = take_panic_trace().expect("trace recorded by the hook");
        assert!(!trace.lines().is_empty());
        assert!(take_panic_trace().is_none());
    }

    #[test]
    fn test_panic_message_variants() {
        let static_payload: Box<dyn std::any::Any + Send> = Box::new("static");
        let owned_payload: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        let other_payload: Box<dyn std::any::Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(static_payload.as_ref()), "static");
        assert_eq!(panic_message(owned_payload.as_ref()), "owned");
        assert_eq!(panic_message(other_payload.as_ref()), "unknown panic");
    }
}

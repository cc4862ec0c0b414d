//
// message.rs
//
// JSON-RPC message model and the outbound message queue
//

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedSender;
use tower_lsp::jsonrpc::Id;
use tower_lsp::lsp_types::notification::{LogMessage, Notification as LspNotification, ShowMessage};
use tower_lsp::lsp_types::request::Request as LspRequest;
use tower_lsp::lsp_types::{LogMessageParams, MessageType, ShowMessageParams};

pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;
/// The request targets code owned by another language layer (for example
/// HTML around embedded Ruby); the client should resubmit it elsewhere.
pub const DELEGATED_REQUEST: i64 = -32900;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request {
        id: Id,
        method: String,
        params: Value,
    },
    Notification {
        method: String,
        params: Value,
    },
    Result {
        id: Id,
        result: Value,
    },
    Error {
        id: Id,
        error: ResponseError,
    },
}

#[derive(Deserialize)]
struct RawMessage {
    #[serde(default)]
    id: Option<Id>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<ResponseError>,
}

impl Message {
    pub fn request(id: Id, method: &str, params: Value) -> Self {
        Message::Request {
            id,
            method: method.to_string(),
            params,
        }
    }

    pub fn notification(method: &str, params: Value) -> Self {
        Message::Notification {
            method: method.to_string(),
            params,
        }
    }

    pub fn id(&self) -> Option<&Id> {
        match self {
            Message::Request { id, .. } | Message::Result { id, .. } | Message::Error { id, .. } => {
                Some(id)
            }
            Message::Notification { .. } => None,
        }
    }

    pub fn method(&self) -> Option<&str> {
        match self {
            Message::Request { method, .. } | Message::Notification { method, .. } => Some(method),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Message::Request { id, method, params } => {
                json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params })
            }
            Message::Notification { method, params } => {
                json!({ "jsonrpc": "2.0", "method": method, "params": params })
            }
            Message::Result { id, result } => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
            Message::Error { id, error } => json!({ "jsonrpc": "2.0", "id": id, "error": error }),
        }
    }

    /// Classify a decoded JSON value by the members it carries.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        let raw: RawMessage = serde_json::from_value(value)?;
        let params = raw.params.unwrap_or(Value::Null);
        match (raw.method, raw.id) {
            (Some(method), Some(id)) => Ok(Message::Request { id, method, params }),
            (Some(method), None) => Ok(Message::Notification { method, params }),
            (None, id) => {
                let id = id.unwrap_or(Id::Null);
                match raw.error {
                    Some(error) => Ok(Message::Error { id, error }),
                    None if id == Id::Null => Err(<serde_json::Error as serde::de::Error>::custom(
                        "message has neither a method nor an id",
                    )),
                    None => Ok(Message::Result {
                        id,
                        result: raw.result.unwrap_or(Value::Null),
                    }),
                }
            }
        }
    }
}

// ============================================================================
// Outbox
// ============================================================================

/// Sending half of the outbound queue drained by the transport writer.
///
/// Cloned into the background indexer so it can stream progress; once the
/// writer is gone every send is a no-op and `is_closed` reports true.
#[derive(Debug, Clone)]
pub struct Outbox {
    sender: UnboundedSender<Message>,
    next_id: Arc<AtomicI64>,
}

impl Outbox {
    pub fn new(sender: UnboundedSender<Message>) -> Self {
        Self {
            sender,
            next_id: Arc::new(AtomicI64::new(1)),
        }
    }

    /// Enqueue a message. Returns false when the outbound channel is closed.
    pub fn send(&self, message: Message) -> bool {
        if self.sender.send(message).is_err() {
            log::trace!("Outbound channel closed, dropping message");
            return false;
        }
        true
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    pub fn notify<N: LspNotification>(&self, params: N::Params) -> bool {
        match serde_json::to_value(params) {
            Ok(params) => self.send(Message::notification(N::METHOD, params)),
            Err(err) => {
                log::error!("Failed to encode {} params: {}", N::METHOD, err);
                false
            }
        }
    }

    /// Send a server-initiated request with a fresh numeric id.
    pub fn request<R: LspRequest>(&self, params: R::Params) -> Id {
        let id = Id::Number(self.next_id.fetch_add(1, Ordering::Relaxed));
        match serde_json::to_value(params) {
            Ok(params) => {
                self.send(Message::Request {
                    id: id.clone(),
                    method: R::METHOD.to_string(),
                    params,
                });
            }
            Err(err) => log::error!("Failed to encode {} params: {}", R::METHOD, err),
        }
        id
    }

    pub fn respond(&self, id: Id, result: Value) -> bool {
        self.send(Message::Result { id, result })
    }

    pub fn respond_error(&self, id: Id, error: ResponseError) -> bool {
        self.send(Message::Error { id, error })
    }

    pub fn show_message(&self, typ: MessageType, message: impl Into<String>) -> bool {
        self.notify::<ShowMessage>(ShowMessageParams {
            typ,
            message: message.into(),
        })
    }

    pub fn log_message(&self, typ: MessageType, message: impl Into<String>) -> bool {
        self.notify::<LogMessage>(LogMessageParams {
            typ,
            message: message.into(),
        })
    }
}

//
// lib.rs
//
// Module tree for the garnet binary and its integration tests
//

pub mod addon;
pub mod analysis;
pub mod background_indexer;
pub mod cancellation;
pub mod capabilities;
pub mod config;
pub mod document_store;
pub mod editing;
pub mod encoding;
pub mod error;
pub mod formatter;
pub mod handlers;
pub mod message;
pub mod method;
pub mod parser_pool;
pub mod router;
pub mod semantic_tokens;
pub mod server;
pub mod transport;
pub mod workspace_index;

// Available in test builds and with the `test-support` feature so
// integration tests can build fixture workspaces.
#[cfg(any(test, feature = "test-support"))]
pub mod test_utils;

//
// analysis/cache.rs
//
// Combined analysis cache: one traversal fills every cluster member
//

use serde::Serialize;
use serde_json::Value;
use tower_lsp::lsp_types::{CodeLens, DocumentLink, DocumentSymbol, FoldingRange, Url};

use super::code_lens::CodeLensListener;
use super::document_link::DocumentLinkListener;
use super::document_symbol::DocumentSymbolListener;
use super::folding_range::FoldingRangeListener;
use super::selection_range::{selection_tree, SelectionNode};
use super::Dispatcher;
use crate::document_store::{DocumentKind, DocumentSnapshot, MutationGuard};
use crate::error::{AnalysisError, RequestError, RequestResult};
use crate::method::Method;

/// Results of the four features derived from one traversal.
#[derive(Debug, Default)]
pub struct ClusterResults {
    pub document_symbols: Vec<DocumentSymbol>,
    pub document_links: Vec<DocumentLink>,
    pub code_lenses: Vec<CodeLens>,
    pub folding_ranges: Vec<FoldingRange>,
}

fn encode<T: Serialize>(feature: &'static str, value: T) -> Result<Value, AnalysisError> {
    serde_json::to_value(value).map_err(|source| AnalysisError::encode(feature, source))
}

impl ClusterResults {
    /// Cache entries for every member, or an error if any fails to encode.
    pub fn into_entries(self) -> Result<Vec<(&'static str, Value)>, AnalysisError> {
        Ok(vec![
            (
                Method::DocumentSymbol.as_str(),
                encode("documentSymbol", self.document_symbols)?,
            ),
            (
                Method::DocumentLink.as_str(),
                encode("documentLink", self.document_links)?,
            ),
            (Method::CodeLens.as_str(), encode("codeLens", self.code_lenses)?),
            (
                Method::FoldingRange.as_str(),
                encode("foldingRange", self.folding_ranges)?,
            ),
        ])
    }
}

/// Run every cluster listener over the snapshot in a single walk.
///
/// Signature files are not parsed and produce empty results.
pub fn compute_cluster(snapshot: &DocumentSnapshot) -> Result<ClusterResults, AnalysisError> {
    let root = match (snapshot.kind, snapshot.root()) {
        (DocumentKind::Rbs, _) | (_, None) => return Ok(ClusterResults::default()),
        (_, Some(root)) => root,
    };

    let mut symbols = DocumentSymbolListener::new();
    let mut links = DocumentLinkListener::new();
    let mut lenses = CodeLensListener::new();
    let mut folds = FoldingRangeListener::new();
    {
        let mut dispatcher = Dispatcher::new();
        dispatcher.register(&mut symbols);
        dispatcher.register(&mut links);
        dispatcher.register(&mut lenses);
        dispatcher.register(&mut folds);
        dispatcher.visit(root, snapshot)?;
    }

    Ok(ClusterResults {
        document_symbols: symbols.finish(),
        document_links: links.finish(),
        code_lenses: lenses.finish(),
        folding_ranges: folds.finish(),
    })
}

/// Snapshot plus any cached value for `key`, read in one critical section.
fn lookup(guard: &MutationGuard, uri: &Url, key: &'static str) -> RequestResult<(DocumentSnapshot, Option<Value>)> {
    guard.with(|store| {
        let snapshot = store
            .snapshot(uri)
            .ok_or_else(|| RequestError::DocumentNotFound(uri.clone()))?;
        let cached = store.cached(uri, key);
        Ok((snapshot, cached))
    })
}

/// Response for one cluster member.
///
/// A miss runs the combined traversal outside the guard and stores all four
/// members at once. Results computed against a revision that has since been
/// edited or closed are returned but never stored.
pub fn cluster_response(guard: &MutationGuard, uri: &Url, method: Method) -> RequestResult<Value> {
    debug_assert!(method.is_cluster_member());
    let key = method.as_str();
    let (snapshot, cached) = lookup(guard, uri, key)?;
    if let Some(value) = cached {
        return Ok(value);
    }

    guard.with(|store| store.record_traversal());
    let entries = compute_cluster(&snapshot)?.into_entries()?;
    let requested = entries
        .iter()
        .find(|(name, _)| *name == key)
        .map(|(_, value)| value.clone())
        .unwrap_or(Value::Null);

    guard.with(|store| store.store_cache(uri, snapshot.revision, entries));
    Ok(requested)
}

/// Cached response for a parameter-free request, computed on a miss.
pub fn cached_response(
    guard: &MutationGuard,
    uri: &Url,
    method: Method,
    compute: impl FnOnce(&DocumentSnapshot) -> RequestResult<Value>,
) -> RequestResult<Value> {
    let key = method.as_str();
    let (snapshot, cached) = lookup(guard, uri, key)?;
    if let Some(value) = cached {
        return Ok(value);
    }
    let value = compute(&snapshot)?;
    guard.with(|store| store.store_cache(uri, snapshot.revision, vec![(key, value.clone())]));
    Ok(value)
}

/// The document's selection tree, cached under the selection range method.
pub fn cached_selection_tree(guard: &MutationGuard, uri: &Url) -> RequestResult<Vec<SelectionNode>> {
    let value = cached_response(guard, uri, Method::SelectionRange, |snapshot| {
        Ok(encode("selectionRange", selection_tree(snapshot))?)
    })?;
    serde_json::from_value(value).map_err(RequestError::internal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tower_lsp::lsp_types::{Position, Range, TextDocumentContentChangeEvent};

    fn guard_with(uri: &Url, text: &str) -> MutationGuard {
        let guard = MutationGuard::default();
        guard.with(|store| store.open(uri.clone(), text.to_string(), 1, "ruby"));
        guard
    }

    fn uri() -> Url {
        Url::parse("file:///workspace/test/cart_test.rb").unwrap()
    }

    const SOURCE: &str = "# https://example.com/docs\nclass CartTest < Minitest::Test\n  def test_total\n    1\n  end\nend\n";

    #[test]
    fn test_one_traversal_fills_all_members() {
        let uri = uri();
        let guard = guard_with(&uri, SOURCE);

        let symbols = cluster_response(&guard, &uri, Method::DocumentSymbol).unwrap();
        assert_eq!(symbols[0]["name"], "CartTest");
        let links = cluster_response(&guard, &uri, Method::DocumentLink).unwrap();
        assert_eq!(links.as_array().unwrap().len(), 1);
        let lenses = cluster_response(&guard, &uri, Method::CodeLens).unwrap();
        assert_eq!(lenses.as_array().unwrap().len(), 6);
        let folds = cluster_response(&guard, &uri, Method::FoldingRange).unwrap();
        assert!(!folds.as_array().unwrap().is_empty());

        guard.with(|store| {
            assert_eq!(store.metrics().combined_traversals, 1);
            assert_eq!(store.get(&uri).unwrap().cache_len(), 4);
        });
    }

    #[test]
    fn test_repeat_is_identical_and_cached() {
        let uri = uri();
        let guard = guard_with(&uri, SOURCE);
        let first = cluster_response(&guard, &uri, Method::FoldingRange).unwrap();
        let second = cluster_response(&guard, &uri, Method::FoldingRange).unwrap();
        assert_eq!(serde_json::to_string(&first).unwrap(), serde_json::to_string(&second).unwrap());
        guard.with(|store| assert_eq!(store.metrics().combined_traversals, 1));
    }

    #[test]
    fn test_edit_forces_recompute() {
        let uri = uri();
        let guard = guard_with(&uri, "class A\nend\n");
        let before = cluster_response(&guard, &uri, Method::DocumentSymbol).unwrap();
        assert_eq!(before[0]["name"], "A");

        guard.with(|store| {
            store.update(
                &uri,
                2,
                vec![TextDocumentContentChangeEvent {
                    range: Some(Range::new(Position::new(0, 6), Position::new(0, 7))),
                    range_length: None,
                    text: "B".to_string(),
                }],
            )
        });
        let after = cluster_response(&guard, &uri, Method::DocumentSymbol).unwrap();
        assert_eq!(after[0]["name"], "B");
        guard.with(|store| assert_eq!(store.metrics().combined_traversals, 2));
    }

    #[test]
    fn test_closed_document_is_not_found() {
        let uri = uri();
        let guard = guard_with(&uri, SOURCE);
        cluster_response(&guard, &uri, Method::CodeLens).unwrap();
        guard.with(|store| store.close(&uri));
        let err = cluster_response(&guard, &uri, Method::CodeLens).unwrap_err();
        assert!(matches!(err, RequestError::DocumentNotFound(_)));
    }

    #[test]
    fn test_signature_files_are_empty() {
        let uri = Url::parse("file:///workspace/sig/cart.rbs").unwrap();
        let guard = MutationGuard::default();
        guard.with(|store| store.open(uri.clone(), "class Cart\nend\n".to_string(), 1, "rbs"));
        let symbols = cluster_response(&guard, &uri, Method::DocumentSymbol).unwrap();
        assert_eq!(symbols, serde_json::json!([]));
    }

    #[test]
    fn test_selection_tree_is_cached_once() {
        let uri = uri();
        let guard = guard_with(&uri, SOURCE);
        let first = cached_selection_tree(&guard, &uri).unwrap();
        let second = cached_selection_tree(&guard, &uri).unwrap();
        assert_eq!(first, second);
        guard.with(|store| {
            assert_eq!(store.metrics().cache_hits, 1);
            assert_eq!(store.get(&uri).unwrap().cache_len(), 1);
        });
    }
}

//
// analysis/code_lens.rs
//
// Run / Run In Terminal / Debug lenses for Minitest and test-unit tests
//

use serde_json::json;
use tower_lsp::lsp_types::{CodeLens, Command, Range};
use tree_sitter::Node;

use super::{definition_name, Listener};
use crate::document_store::DocumentSnapshot;
use crate::error::AnalysisError;

pub const RUN_TEST_COMMAND: &str = "garnet.runTest";
pub const RUN_TEST_IN_TERMINAL_COMMAND: &str = "garnet.runTestInTerminal";
pub const DEBUG_TEST_COMMAND: &str = "garnet.debugTest";

struct TestClass {
    name: String,
    is_test: bool,
}

#[derive(Default)]
pub struct CodeLensListener {
    lenses: Vec<CodeLens>,
    classes: Vec<TestClass>,
}

fn is_test_superclass(superclass: &str) -> bool {
    let superclass = superclass.trim_start_matches('<').trim();
    superclass.ends_with("Test") || superclass.ends_with("TestCase")
}

/// First ancestor that is not a statement body wrapper.
fn enclosing_definition(node: Node<'_>) -> Option<Node<'_>> {
    let mut parent = node.parent();
    while let Some(candidate) = parent {
        if candidate.kind() != "body_statement" {
            return Some(candidate);
        }
        parent = candidate.parent();
    }
    None
}

impl CodeLensListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finish(self) -> Vec<CodeLens> {
        self.lenses
    }

    fn add_lenses(&mut self, snapshot: &DocumentSnapshot, range: Range, name: &str, command: String) {
        let path = snapshot
            .uri
            .to_file_path()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|_| snapshot.uri.path().to_string());
        let location = json!({
            "start_line": range.start.line,
            "start_column": range.start.character,
            "end_line": range.end.line,
            "end_column": range.end.character,
        });
        for (title, id) in [
            ("Run", RUN_TEST_COMMAND),
            ("Run In Terminal", RUN_TEST_IN_TERMINAL_COMMAND),
            ("Debug", DEBUG_TEST_COMMAND),
        ] {
            self.lenses.push(CodeLens {
                range,
                command: Some(Command {
                    title: title.to_string(),
                    command: id.to_string(),
                    arguments: Some(vec![
                        json!(path),
                        json!(name),
                        json!(command),
                        location.clone(),
                    ]),
                }),
                data: None,
            });
        }
    }
}

impl Listener for CodeLensListener {
    fn node_kinds(&self) -> &'static [&'static str] {
        &["class", "method"]
    }

    fn on_enter(&mut self, node: Node<'_>, snapshot: &DocumentSnapshot) -> Result<(), AnalysisError> {
        let Some(name) = definition_name(node, snapshot) else {
            if node.kind() == "class" {
                self.classes.push(TestClass {
                    name: String::new(),
                    is_test: false,
                });
            }
            return Ok(());
        };
        let file = snapshot.uri.path().rsplit('/').next().unwrap_or_default().to_string();

        if node.kind() == "class" {
            let is_test = node
                .child_by_field_name("superclass")
                .map(|superclass| is_test_superclass(snapshot.node_text(superclass)))
                .unwrap_or(false);
            if is_test {
                let command = format!("bundle exec ruby -Itest {} --name \"/^{}(#|::)/\"", file, name);
                self.add_lenses(snapshot, snapshot.range_of(node), name, command);
            }
            self.classes.push(TestClass {
                name: name.to_string(),
                is_test,
            });
            return Ok(());
        }

        // Methods only get a lens directly inside a test class
        let Some(class) = self.classes.last() else {
            return Ok(());
        };
        let direct_member = enclosing_definition(node).map(|parent| parent.kind()) == Some("class");
        if class.is_test && direct_member && name.starts_with("test_") {
            let command = format!("bundle exec ruby -Itest {} --name {}#{}", file, class.name, name);
            self.add_lenses(snapshot, snapshot.range_of(node), name, command);
        }
        Ok(())
    }

    fn on_leave(&mut self, node: Node<'_>, _snapshot: &DocumentSnapshot) -> Result<(), AnalysisError> {
        if node.kind() == "class" {
            self.classes.pop();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::test_support::ruby_snapshot;
    use crate::analysis::Dispatcher;

    fn lenses(text: &str) -> Vec<CodeLens> {
        let snapshot = ruby_snapshot(text);
        let mut listener = CodeLensListener::new();
        let mut dispatcher = Dispatcher::new();
        dispatcher.register(&mut listener);
        dispatcher.visit(snapshot.root().unwrap(), &snapshot).unwrap();
        listener.finish()
    }

    #[test]
    fn test_minitest_class_and_methods() {
        let found = lenses(
            "class CartTest < Minitest::Test\n  def test_total\n  end\n\n  def helper\n  end\nend\n",
        );
        // Three lenses for the class and three for test_total
        assert_eq!(found.len(), 6);
        let titles: Vec<_> = found[..3]
            .iter()
            .map(|lens| lens.command.as_ref().unwrap().title.as_str())
            .collect();
        assert_eq!(titles, vec!["Run", "Run In Terminal", "Debug"]);

        let method_command = found[3].command.as_ref().unwrap();
        let args = method_command.arguments.as_ref().unwrap();
        assert_eq!(args[1], json!("test_total"));
        assert_eq!(
            args[2],
            json!("bundle exec ruby -Itest sample_test.rb --name CartTest#test_total")
        );
        assert_eq!(found[3].range.start.line, 1);
    }

    #[test]
    fn test_non_test_classes_have_no_lenses() {
        assert!(lenses("class Cart < Base\n  def test_x; end\nend\n").is_empty());
        assert!(lenses("def test_top_level; end\n").is_empty());
    }

    #[test]
    fn test_nested_plain_class_inside_test_class() {
        let found = lenses(
            "class ATest < ActiveSupport::TestCase\n  class Helper\n    def test_inner; end\n  end\nend\n",
        );
        assert_eq!(found.len(), 3);
    }
}

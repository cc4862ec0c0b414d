//! Deterministic fixture workspace generator for tests.
//!
//! Generates synthetic Ruby workspaces with controlled characteristics:
//! file count, classes and methods per file, require chains, mixins and
//! extra lines of non-definition code. Files land under `lib/fixture/` so
//! their require paths are `fixture/file_N`.
//!
//! All output is deterministic, so repeated runs produce identical files.

use std::fmt::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Configuration for generating a fixture workspace.
#[derive(Debug, Clone)]
pub struct FixtureConfig {
    pub file_count: usize,
    pub methods_per_file: usize,
    pub require_chain_depth: usize,
    pub mixins_per_file: usize,
    pub extra_lines_per_file: usize,
}

/// Modules included deterministically by generated classes.
const MIXINS: &[&str] = &["Comparable", "Enumerable", "Kernel", "Fixture::Helpers"];

impl FixtureConfig {
    /// Small workspace: 10 files, 5 methods each, require chain depth 3.
    pub fn small() -> Self {
        Self {
            file_count: 10,
            methods_per_file: 5,
            require_chain_depth: 3,
            mixins_per_file: 1,
            extra_lines_per_file: 5,
        }
    }

    /// Medium workspace: 50 files, 10 methods each, require chain depth 10.
    pub fn medium() -> Self {
        Self {
            file_count: 50,
            methods_per_file: 10,
            require_chain_depth: 10,
            mixins_per_file: 2,
            extra_lines_per_file: 10,
        }
    }
}

/// Path of generated file `index`, relative to the workspace root.
pub fn fixture_file(index: usize) -> PathBuf {
    PathBuf::from("lib").join("fixture").join(format!("file_{}.rb", index))
}

/// Name of the class defined by file `index`.
pub fn fixture_class(index: usize) -> String {
    format!("Class{}", index)
}

fn generate_ruby_file_content(index: usize, config: &FixtureConfig) -> String {
    let mut content = String::from("# frozen_string_literal: true\n\n");

    if index < config.require_chain_depth && index + 1 < config.file_count {
        writeln!(content, "require \"fixture/file_{}\"", index + 1).unwrap();
        content.push('\n');
    }

    content.push_str("module Fixture\n");
    writeln!(content, "  # Generated class number {}.", index).unwrap();
    if index > 0 {
        writeln!(content, "  class {} < {}", fixture_class(index), fixture_class(index - 1)).unwrap();
    } else {
        writeln!(content, "  class {}", fixture_class(index)).unwrap();
    }

    for mixin_i in 0..config.mixins_per_file {
        let mixin = MIXINS[(index * config.mixins_per_file + mixin_i) % MIXINS.len()];
        writeln!(content, "    include {}", mixin).unwrap();
    }

    for line_i in 0..config.extra_lines_per_file {
        writeln!(content, "    VALUE_{}_{} = {}", index, line_i, line_i + 1).unwrap();
    }

    for method_i in 0..config.methods_per_file {
        content.push('\n');
        writeln!(content, "    # Adds {} to the scaled input.", method_i + 1).unwrap();
        writeln!(content, "    def method_{}_{}(x, y = {})", index, method_i, method_i + 1).unwrap();
        writeln!(content, "      result = x + y * {}", method_i + 1).unwrap();
        writeln!(content, "      return nil if result.nil?").unwrap();
        writeln!(content, "      result").unwrap();
        writeln!(content, "    end").unwrap();
    }

    content.push_str("  end\nend\n");
    content
}

const HELPERS: &str = "module Fixture\n  module Helpers\n    def helper; end\n  end\nend\n";

/// Create a temporary fixture workspace from the given configuration.
///
/// The directory is cleaned up when the `TempDir` is dropped.
pub fn create_fixture_workspace(config: &FixtureConfig) -> TempDir {
    let temp_dir = TempDir::new().expect("Failed to create temp directory for fixture workspace");
    write_fixture_workspace(temp_dir.path(), config);
    temp_dir
}

/// Write fixture files into an existing directory.
pub fn write_fixture_workspace(dir: &Path, config: &FixtureConfig) {
    let fixture_dir = dir.join("lib").join("fixture");
    std::fs::create_dir_all(&fixture_dir)
        .unwrap_or_else(|e| panic!("Failed to create {}: {}", fixture_dir.display(), e));
    std::fs::write(fixture_dir.join("helpers.rb"), HELPERS)
        .unwrap_or_else(|e| panic!("Failed to write helpers.rb: {}", e));
    for i in 0..config.file_count {
        let content = generate_ruby_file_content(i, config);
        let filepath = dir.join(fixture_file(i));
        std::fs::write(&filepath, &content)
            .unwrap_or_else(|e| panic!("Failed to write fixture file {}: {}", filepath.display(), e));
    }
}

/// Write a `Gemfile.lock` listing the given gems.
pub fn write_gemfile_lock(dir: &Path, gems: &[&str]) {
    let mut content = String::from("GEM\n  remote: https://rubygems.org/\n  specs:\n");
    for gem in gems {
        writeln!(content, "    {} (1.0.0)", gem).unwrap();
    }
    content.push_str("\nPLATFORMS\n  ruby\n\nDEPENDENCIES\n");
    for gem in gems {
        writeln!(content, "  {}", gem).unwrap();
    }
    std::fs::write(dir.join("Gemfile.lock"), content)
        .unwrap_or_else(|e| panic!("Failed to write Gemfile.lock: {}", e));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser_pool::parse_ruby;

    #[test]
    fn test_file_count_matches_config() {
        let config = FixtureConfig::small();
        let workspace = create_fixture_workspace(&config);
        let ruby_files: Vec<_> = std::fs::read_dir(workspace.path().join("lib/fixture"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("file_"))
            .collect();
        assert_eq!(ruby_files.len(), config.file_count);
    }

    #[test]
    fn test_deterministic_output() {
        let config = FixtureConfig::small();
        let ws1 = create_fixture_workspace(&config);
        let ws2 = create_fixture_workspace(&config);

        for i in 0..config.file_count {
            let content1 = std::fs::read_to_string(ws1.path().join(fixture_file(i))).unwrap();
            let content2 = std::fs::read_to_string(ws2.path().join(fixture_file(i))).unwrap();
            assert_eq!(content1, content2, "file_{} should be identical across runs", i);
        }
    }

    #[test]
    fn test_require_chain_structure() {
        let config = FixtureConfig {
            file_count: 4,
            methods_per_file: 1,
            require_chain_depth: 2,
            mixins_per_file: 0,
            extra_lines_per_file: 0,
        };
        let workspace = create_fixture_workspace(&config);
        let read = |i| std::fs::read_to_string(workspace.path().join(fixture_file(i))).unwrap();

        assert!(read(0).contains("require \"fixture/file_1\""));
        assert!(read(1).contains("require \"fixture/file_2\""));
        assert!(!read(2).contains("require "));
        assert!(!read(3).contains("require "));
    }

    #[test]
    fn test_generated_files_parse_without_errors() {
        let config = FixtureConfig::small();
        let workspace = create_fixture_workspace(&config);

        for i in 0..config.file_count {
            let content = std::fs::read_to_string(workspace.path().join(fixture_file(i))).unwrap();
            let tree = parse_ruby(&content).unwrap_or_else(|| panic!("Failed to parse file_{}", i));
            assert!(
                !tree.root_node().has_error(),
                "file_{} should parse without errors. Content:\n{}",
                i,
                content
            );
        }
    }

    #[test]
    fn test_methods_present() {
        let config = FixtureConfig {
            file_count: 1,
            methods_per_file: 4,
            require_chain_depth: 0,
            mixins_per_file: 0,
            extra_lines_per_file: 0,
        };
        let workspace = create_fixture_workspace(&config);
        let content = std::fs::read_to_string(workspace.path().join(fixture_file(0))).unwrap();
        let count = content.lines().filter(|l| l.trim_start().starts_with("def ")).count();
        assert_eq!(count, 4);
    }

    #[test]
    fn test_gemfile_lock_lists_gems() {
        let dir = TempDir::new().unwrap();
        write_gemfile_lock(dir.path(), &["rubocop", "sorbet-static"]);
        let content = std::fs::read_to_string(dir.path().join("Gemfile.lock")).unwrap();
        assert!(content.contains("    rubocop (1.0.0)"));
        assert!(content.contains("    sorbet-static (1.0.0)"));
    }
}

//! Source-to-source instrumentation of a mirrored Go project.
//!
//! Every non-test `.go` file in the mirror is parsed with tree-sitter,
//! rewritten for the five traced constructs, and written back only when a
//! rule fired. The injected `import` alone never marks a file modified, so a
//! file without concurrency constructs keeps its exact bytes and a second
//! pass over an instrumented tree is a no-op.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};
use tree_sitter::{Language, Node, Parser};
use walkdir::WalkDir;

pub mod edits;
pub mod runtime;
mod rewrite;

use edits::{Edit, apply_edits};
use rewrite::{Rewriter, collect_kind};

#[derive(Debug, Error)]
pub enum InstrumentError {
    #[error("i/o error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("go syntax error in {path}")]
    Parse { path: PathBuf },
    #[error("go grammar rejected by the linked tree-sitter: {0}")]
    Grammar(#[from] tree_sitter::LanguageError),
    #[error(transparent)]
    Walk(#[from] walkdir::Error),
}

impl InstrumentError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn parse(path: &Path) -> Self {
        Self::Parse {
            path: path.to_path_buf(),
        }
    }
}

const GO_SUFFIX: &str = ".go";
const TEST_SUFFIX: &str = "_test.go";

fn go_parser() -> Result<Parser, InstrumentError> {
    let language: Language = tree_sitter_go::LANGUAGE.into();
    let mut parser = Parser::new();
    parser.set_language(&language)?;
    Ok(parser)
}

/// Rewrite every eligible source file under `mirror_root`, in sorted walk
/// order. The first failure stops the walk. Returns the rewritten-file count.
pub fn instrument_project(
    mirror_root: &Path,
    import_path: &str,
) -> Result<usize, InstrumentError> {
    info!(
        target: "instrument",
        root = %mirror_root.display(),
        import_path,
        "instrument_begin"
    );
    let mut rewritten = 0;
    for entry in WalkDir::new(mirror_root).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if !name.ends_with(GO_SUFFIX) || name.ends_with(TEST_SUFFIX) {
            continue;
        }
        if in_runtime_dir(mirror_root, entry.path()) {
            continue;
        }
        if instrument_file(mirror_root, entry.path(), import_path)? {
            rewritten += 1;
        }
    }
    info!(target: "instrument", rewritten, "instrument_complete");
    Ok(rewritten)
}

fn in_runtime_dir(mirror_root: &Path, path: &Path) -> bool {
    path.strip_prefix(mirror_root)
        .ok()
        .and_then(|rel| rel.components().next())
        .is_some_and(|first| first.as_os_str() == runtime::RUNTIME_DIR)
}

/// Rewrite a single file. Returns whether the file was written back.
pub fn instrument_file(
    mirror_root: &Path,
    path: &Path,
    import_path: &str,
) -> Result<bool, InstrumentError> {
    let source = fs::read_to_string(path).map_err(|e| InstrumentError::io(path, e))?;
    let mut parser = go_parser()?;
    let tree = parser
        .parse(&source, None)
        .ok_or_else(|| InstrumentError::parse(path))?;
    let root = tree.root_node();
    if root.has_error() {
        return Err(InstrumentError::parse(path));
    }

    let rel = relative_slash_path(mirror_root, path);
    let mut rewriter = Rewriter::new(&source, rel);
    let mut cursor = root.walk();
    for decl in root.named_children(&mut cursor) {
        if matches!(decl.kind(), "function_declaration" | "method_declaration") {
            rewriter.process_function(decl);
        }
    }

    if !rewriter.modified {
        debug!(target: "instrument", path = %path.display(), "file_unchanged");
        return Ok(false);
    }

    let mut all_edits = rewriter.edits;
    if !has_runtime_import(root, &source, import_path) {
        if let Some(edit) = import_edit(root, import_path) {
            all_edits.push(edit);
        }
    }
    let output = apply_edits(&source, &all_edits);
    fs::write(path, output).map_err(|e| InstrumentError::io(path, e))?;
    debug!(
        target: "instrument",
        path = %path.display(),
        edits = all_edits.len(),
        "file_rewritten"
    );
    Ok(true)
}

/// Forward-slash path of `path` relative to the mirror root; instrumentation
/// sites embed it, so it must be stable across platforms.
fn relative_slash_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn has_runtime_import(root: Node, source: &str, import_path: &str) -> bool {
    let quoted = format!("\"{import_path}\"");
    let mut cursor = root.walk();
    for decl in root.named_children(&mut cursor) {
        if decl.kind() != "import_declaration" {
            continue;
        }
        let present = collect_kind(decl, "import_spec").into_iter().any(|spec| {
            spec.child_by_field_name("path")
                .is_some_and(|p| &source[p.byte_range()] == quoted.as_str())
        });
        if present {
            return true;
        }
    }
    false
}

fn import_edit(root: Node, import_path: &str) -> Option<Edit> {
    let mut cursor = root.walk();
    let pkg = root
        .named_children(&mut cursor)
        .find(|n| n.kind() == "package_clause")?;
    Some(Edit::insert(
        pkg.end_byte(),
        format!("\n\nimport \"{import_path}\""),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_paths_use_forward_slashes() {
        let root = Path::new("/tmp/mirror");
        let path = Path::new("/tmp/mirror/pkg/worker/worker.go");
        assert_eq!(relative_slash_path(root, path), "pkg/worker/worker.go");
    }

    #[test]
    fn runtime_dir_is_excluded_from_the_walk() {
        let root = Path::new("/tmp/mirror");
        assert!(in_runtime_dir(root, Path::new("/tmp/mirror/gtrace/gtrace.go")));
        assert!(!in_runtime_dir(root, Path::new("/tmp/mirror/app/gtrace.go")));
    }
}

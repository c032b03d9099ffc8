//! Go module discovery from the mirror's `go.mod`.
//!
//! The instrumented project imports the tracing runtime as
//! `<module>/gtrace`, so the rewriter needs the module path before touching
//! any source file. A missing or unreadable manifest falls back to the bare
//! literal `gtrace`.

use std::fs;
use std::path::Path;

/// Import path used when no module line can be recovered.
pub const FALLBACK_IMPORT: &str = "gtrace";

/// Directory (and package) name of the generated tracing runtime.
pub const RUNTIME_DIR: &str = "gtrace";

/// Trimmed remainder of the first `module ` line in `<mirror_root>/go.mod`.
pub fn module_path(mirror_root: &Path) -> Option<String> {
    let manifest = fs::read_to_string(mirror_root.join("go.mod")).ok()?;
    manifest
        .lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix("module "))
        .map(|rest| rest.trim().to_string())
        .filter(|module| !module.is_empty())
}

/// Import path the rewriter injects: `<module>/gtrace`, or the bare fallback.
pub fn runtime_import_path(mirror_root: &Path) -> String {
    match module_path(mirror_root) {
        Some(module) => format!("{module}/{RUNTIME_DIR}"),
        None => FALLBACK_IMPORT.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_line_is_extracted_and_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("go.mod"),
            "module example.com/demo  \n\ngo 1.22\n",
        )
        .unwrap();
        assert_eq!(
            module_path(dir.path()).as_deref(),
            Some("example.com/demo")
        );
        assert_eq!(runtime_import_path(dir.path()), "example.com/demo/gtrace");
    }

    #[test]
    fn missing_manifest_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(module_path(dir.path()), None);
        assert_eq!(runtime_import_path(dir.path()), "gtrace");
    }

    #[test]
    fn manifest_without_module_line_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("go.mod"), "go 1.22\n").unwrap();
        assert_eq!(runtime_import_path(dir.path()), "gtrace");
    }
}

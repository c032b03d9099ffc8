//! Project mirroring: copy a Go project tree into an output tree, skipping
//! hidden entries, vendored code and test files.
//!
//! The mirror is the working area for instrumentation; the target project is
//! never written to. A failed copy leaves the mirror partially populated (no
//! rollback) and the caller starts over with a fresh run.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};
use walkdir::WalkDir;

pub mod modpath;

#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("i/o error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Walk(#[from] walkdir::Error),
}

impl MirrorError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Copy counts reported back for logging.
#[derive(Debug, Default, Clone, Copy)]
pub struct MirrorStats {
    pub dirs: usize,
    pub files: usize,
}

const VENDOR_DIR: &str = "vendor";
const TEST_SUFFIX: &str = "_test.go";

fn skip_entry(name: &str, extra_ignores: &[String]) -> bool {
    name.starts_with('.') || name == VENDOR_DIR || extra_ignores.iter().any(|n| n == name)
}

/// Mirror `target` into `output`. Any path component beginning with `.` or
/// equal to `vendor` (or listed in `extra_ignores`) prunes its subtree; files
/// ending in `_test.go` are dropped. Directories are created with mode `0755`
/// and files with `0644` on Unix.
pub fn mirror_project(
    target: &Path,
    output: &Path,
    extra_ignores: &[String],
) -> Result<MirrorStats, MirrorError> {
    info!(
        target: "mirror",
        source = %target.display(),
        destination = %output.display(),
        "mirror_begin"
    );

    fs::create_dir_all(output).map_err(|e| MirrorError::io(output, e))?;
    set_mode(output, 0o755).map_err(|e| MirrorError::io(output, e))?;

    let mut stats = MirrorStats::default();
    let walker = WalkDir::new(target)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || !skip_entry(&entry.file_name().to_string_lossy(), extra_ignores)
        });

    for entry in walker {
        let entry = entry?;
        if entry.depth() == 0 {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(target) else {
            continue;
        };
        let dst = output.join(rel);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&dst).map_err(|e| MirrorError::io(&dst, e))?;
            set_mode(&dst, 0o755).map_err(|e| MirrorError::io(&dst, e))?;
            stats.dirs += 1;
            debug!(target: "mirror", path = %dst.display(), "dir_created");
            continue;
        }

        let name = entry.file_name().to_string_lossy();
        if name.ends_with(TEST_SUFFIX) {
            debug!(target: "mirror", path = %entry.path().display(), "test_file_skipped");
            continue;
        }

        copy_file(entry.path(), &dst)?;
        stats.files += 1;
        debug!(
            target: "mirror",
            source = %entry.path().display(),
            destination = %dst.display(),
            "file_copied"
        );
    }

    info!(
        target: "mirror",
        dirs = stats.dirs,
        files = stats.files,
        "mirror_complete"
    );
    Ok(stats)
}

fn copy_file(src: &Path, dst: &Path) -> Result<(), MirrorError> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).map_err(|e| MirrorError::io(parent, e))?;
    }
    let mut reader = fs::File::open(src).map_err(|e| MirrorError::io(src, e))?;
    let mut writer = fs::File::create(dst).map_err(|e| MirrorError::io(dst, e))?;
    io::copy(&mut reader, &mut writer).map_err(|e| MirrorError::io(dst, e))?;
    set_mode(dst, 0o644).map_err(|e| MirrorError::io(dst, e))?;
    Ok(())
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &Path, content: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    #[test]
    fn mirror_skips_hidden_vendor_and_tests() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        write(&src.path().join("a.go"), "package m\n");
        write(&src.path().join("a_test.go"), "package m\n");
        write(&src.path().join(".git/config"), "[core]\n");
        write(&src.path().join("vendor/dep/dep.go"), "package dep\n");

        let out = dst.path().join("mirror");
        let stats = mirror_project(src.path(), &out, &[]).unwrap();

        assert!(out.join("a.go").exists());
        assert!(!out.join("a_test.go").exists());
        assert!(!out.join(".git").exists());
        assert!(!out.join("vendor").exists());
        assert_eq!(stats.files, 1);
    }

    #[test]
    fn mirror_preserves_nested_layout_and_bytes() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        write(&src.path().join("pkg/worker/worker.go"), "package worker\n");
        write(&src.path().join("go.mod"), "module demo\n");

        let out = dst.path().join("mirror");
        mirror_project(src.path(), &out, &[]).unwrap();

        assert_eq!(
            fs::read_to_string(out.join("pkg/worker/worker.go")).unwrap(),
            "package worker\n"
        );
        assert_eq!(fs::read_to_string(out.join("go.mod")).unwrap(), "module demo\n");
    }

    #[test]
    fn mirror_honors_extra_ignores() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        write(&src.path().join("gen/big.go"), "package gen\n");
        write(&src.path().join("main.go"), "package main\n");

        let out = dst.path().join("mirror");
        mirror_project(src.path(), &out, &["gen".to_string()]).unwrap();

        assert!(out.join("main.go").exists());
        assert!(!out.join("gen").exists());
    }

    #[cfg(unix)]
    #[test]
    fn mirror_applies_file_mode() {
        use std::os::unix::fs::PermissionsExt;
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        write(&src.path().join("a.go"), "package m\n");

        let out = dst.path().join("mirror");
        mirror_project(src.path(), &out, &[]).unwrap();

        let mode = fs::metadata(out.join("a.go")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
    }
}

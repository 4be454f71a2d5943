//! Deletion of resolved paths.

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use tracing::debug;

use crate::resolve::{FileResolver, PathDescriptor};
use crate::spec::{FileOpsError, Result};

/// Removes whatever the given descriptors resolve to.
pub trait DeleteAction: Send + Sync + fmt::Debug {
    /// `true` iff at least one path existed and was removed.
    fn delete(&self, descriptors: &[PathDescriptor]) -> Result<bool>;
}

/// Removes files, directory trees and symlinks (the link, never its target).
#[derive(Debug, Clone)]
pub struct DefaultDeleteAction {
    resolver: FileResolver,
}

impl DefaultDeleteAction {
    pub fn new(resolver: FileResolver) -> Self {
        Self { resolver }
    }
}

impl DeleteAction for DefaultDeleteAction {
    fn delete(&self, descriptors: &[PathDescriptor]) -> Result<bool> {
        let mut if_did_work = false;
        for descriptor in descriptors {
            for path in self.resolver.resolve_files(descriptor.clone())? {
                if_did_work |= remove_path(&path)?;
            }
        }
        Ok(if_did_work)
    }
}

fn remove_path(path: &Path) -> Result<bool> {
    let meta = match fs::symlink_metadata(path) {
        Ok(v) => v,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(FileOpsError::io(path, e)),
    };
    let res_remove = if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        remove_file_or_link(path)
    };
    match res_remove {
        Ok(()) => {
            debug!(path = %path.display(), "deleted");
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(FileOpsError::io(path, e)),
    }
}

#[cfg(windows)]
fn remove_file_or_link(path: &Path) -> io::Result<()> {
    // Directory symlinks on Windows need remove_dir.
    fs::remove_file(path).or_else(|_| fs::remove_dir(path))
}

#[cfg(not(windows))]
fn remove_file_or_link(path: &Path) -> io::Result<()> {
    fs::remove_file(path)
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::{DefaultDeleteAction, DeleteAction};
    use crate::resolve::{FileResolver, PathDescriptor};

    fn write_text(path: &Path, txt: &str) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent");
        }
        std::fs::write(path, txt).expect("write text");
    }

    #[test]
    fn delete_existing_and_missing_reports_work() {
        let tmp = tempfile::tempdir().expect("tempdir");
        write_text(&tmp.path().join("gone.txt"), "x");
        write_text(&tmp.path().join("stay.txt"), "y");
        let action = DefaultDeleteAction::new(FileResolver::new(tmp.path()).expect("resolver"));

        let if_did_work = action
            .delete(&[PathDescriptor::from("gone.txt"), PathDescriptor::from("missing.txt")])
            .expect("delete");
        assert!(if_did_work);
        assert!(!tmp.path().join("gone.txt").exists());
        assert!(tmp.path().join("stay.txt").exists());

        let if_did_work = action
            .delete(&[PathDescriptor::from("missing.txt")])
            .expect("delete missing");
        assert!(!if_did_work);
    }

    #[test]
    fn delete_directory_recursively_via_collection() {
        let tmp = tempfile::tempdir().expect("tempdir");
        write_text(&tmp.path().join("build/a/b.txt"), "x");
        write_text(&tmp.path().join("out.log"), "x");
        let action = DefaultDeleteAction::new(FileResolver::new(tmp.path()).expect("resolver"));

        let if_did_work = action
            .delete(&[PathDescriptor::collection(["build", "out.log"])])
            .expect("delete");
        assert!(if_did_work);
        assert!(!tmp.path().join("build").exists());
        assert!(!tmp.path().join("out.log").exists());
    }

    #[cfg(unix)]
    #[test]
    fn delete_symlink_keeps_target() {
        use std::os::unix::fs::symlink;

        let tmp = tempfile::tempdir().expect("tempdir");
        write_text(&tmp.path().join("target/keep.txt"), "k");
        symlink(tmp.path().join("target"), tmp.path().join("link")).expect("symlink");
        let action = DefaultDeleteAction::new(FileResolver::new(tmp.path()).expect("resolver"));

        assert!(action.delete(&[PathDescriptor::from("link")]).expect("delete"));
        assert!(std::fs::symlink_metadata(tmp.path().join("link")).is_err());
        assert!(tmp.path().join("target/keep.txt").exists());
    }
}

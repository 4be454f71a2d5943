//! Lazily enumerated, composable file trees.

#[cfg(unix)]
use std::collections::HashSet;
use std::fmt;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use filetime::FileTime;
use tracing::{debug, warn};

use crate::archive::ArchiveEntryHandle;
use crate::resolve::{FileResolver, PathDescriptor};
use crate::spec::{EnumPathValidation, FileOpsError, Result, SpecPatterns};
use crate::util::SpecCompiledPatterns;

////////////////////////////////////////////////////////////////////////////////
// #region FileDetails

#[derive(Debug, Clone)]
pub(crate) enum FileContent {
    Local(PathBuf),
    Archive(ArchiveEntryHandle),
}

/// One element of a tree: a relative path plus a handle to its content.
#[derive(Debug, Clone)]
pub struct FileDetails {
    relative_path: String,
    if_is_directory: bool,
    size: u64,
    last_modified: Option<FileTime>,
    content: FileContent,
}

impl FileDetails {
    pub(crate) fn new(
        relative_path: String,
        if_is_directory: bool,
        size: u64,
        last_modified: Option<FileTime>,
        content: FileContent,
    ) -> Self {
        Self {
            relative_path,
            if_is_directory,
            size,
            last_modified,
            content,
        }
    }

    fn from_local(relative_path: String, path: PathBuf, meta: &fs::Metadata) -> Self {
        Self::new(
            relative_path,
            meta.is_dir(),
            if meta.is_dir() { 0 } else { meta.len() },
            Some(FileTime::from_last_modification_time(meta)),
            FileContent::Local(path),
        )
    }

    /// `/`-separated path relative to the tree root.
    pub fn relative_path(&self) -> &str {
        &self.relative_path
    }

    /// Last path segment.
    pub fn name(&self) -> &str {
        self.relative_path
            .rsplit('/')
            .next()
            .unwrap_or(&self.relative_path)
    }

    pub fn is_directory(&self) -> bool {
        self.if_is_directory
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn last_modified(&self) -> Option<FileTime> {
        self.last_modified
    }

    /// Concrete path of the content, extracting archive entries on first use.
    pub fn file(&self) -> Result<PathBuf> {
        match &self.content {
            FileContent::Local(path) => Ok(path.clone()),
            FileContent::Archive(handle) => handle.materialize(),
        }
    }

    /// Open the content as a byte stream.
    pub fn open(&self) -> Result<Box<dyn Read + Send>> {
        if self.if_is_directory {
            return Err(FileOpsError::invalid_input(format!(
                "Cannot open directory '{}' as a file.",
                self.display_name()
            )));
        }
        let path = self.file()?;
        let file = File::open(&path).map_err(|e| FileOpsError::io(&path, e))?;
        Ok(Box::new(file))
    }

    pub fn read_bytes(&self) -> Result<Vec<u8>> {
        let mut reader = self.open()?;
        let mut buf = Vec::with_capacity(self.size as usize);
        reader
            .read_to_end(&mut buf)
            .map_err(|e| FileOpsError::io(self.display_name(), e))?;
        Ok(buf)
    }

    /// Source path when the content already lives on the local filesystem.
    pub(crate) fn local_source(&self) -> Option<&Path> {
        match &self.content {
            FileContent::Local(path) => Some(path),
            FileContent::Archive(_) => None,
        }
    }

    pub fn display_name(&self) -> String {
        match &self.content {
            FileContent::Local(path) => path.display().to_string(),
            FileContent::Archive(handle) => {
                format!("{} in {}", self.relative_path, handle.archive_description())
            }
        }
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region FileTree

/// A re-iterable source of [`FileDetails`].
pub trait VisitableTree: Send + Sync + fmt::Debug {
    fn display_name(&self) -> String;

    /// Emit every element. Each directory is emitted before its contents.
    fn visit(&self, visitor: &mut dyn FnMut(FileDetails) -> Result<()>) -> Result<()>;

    /// Non-fatal problems found while enumerating (skipped entries and the like).
    fn diagnostics(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Shared handle over any [`VisitableTree`].
#[derive(Clone)]
pub struct FileTree {
    inner: Arc<dyn VisitableTree>,
}

impl fmt::Debug for FileTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FileTree").field(&self.inner).finish()
    }
}

impl FileTree {
    pub fn new<T: VisitableTree + 'static>(tree: T) -> Self {
        Self {
            inner: Arc::new(tree),
        }
    }

    pub fn empty() -> Self {
        Self::new(EmptyTree)
    }

    pub fn display_name(&self) -> String {
        self.inner.display_name()
    }

    pub fn visit<F>(&self, mut visitor: F) -> Result<()>
    where
        F: FnMut(FileDetails) -> Result<()>,
    {
        self.inner.visit(&mut visitor)
    }

    /// File (non-directory) elements in enumeration order.
    pub fn files(&self) -> Result<Vec<FileDetails>> {
        let mut l_files = Vec::new();
        self.visit(|details| {
            if !details.is_directory() {
                l_files.push(details);
            }
            Ok(())
        })?;
        Ok(l_files)
    }

    /// Relative paths of [`FileTree::files`].
    pub fn relative_paths(&self) -> Result<Vec<String>> {
        Ok(self
            .files()?
            .into_iter()
            .map(|d| d.relative_path)
            .collect())
    }

    /// Restrict to paths that pass the include/exclude lists.
    pub fn matching(&self, spec_patterns: &SpecPatterns) -> Result<FileTree> {
        let spec_pats = SpecCompiledPatterns::from_spec(spec_patterns)?;
        if spec_pats.is_empty() {
            return Ok(self.clone());
        }
        Ok(Self::new(FilteredTree {
            tree: self.clone(),
            spec_pats,
        }))
    }

    /// Left entries followed by right entries. Duplicates are kept.
    pub fn plus(&self, other: &FileTree) -> FileTree {
        Self::new(UnionTree {
            l_trees: vec![self.clone(), other.clone()],
        })
    }

    pub fn diagnostics(&self) -> Vec<String> {
        self.inner.diagnostics()
    }
}

#[derive(Debug)]
struct EmptyTree;

impl VisitableTree for EmptyTree {
    fn display_name(&self) -> String {
        "empty file tree".to_string()
    }

    fn visit(&self, _visitor: &mut dyn FnMut(FileDetails) -> Result<()>) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug)]
struct FilteredTree {
    tree: FileTree,
    spec_pats: SpecCompiledPatterns,
}

impl VisitableTree for FilteredTree {
    fn display_name(&self) -> String {
        self.tree.display_name()
    }

    fn visit(&self, visitor: &mut dyn FnMut(FileDetails) -> Result<()>) -> Result<()> {
        self.tree.visit(|details| {
            if self
                .spec_pats
                .is_included(details.relative_path(), details.is_directory())
            {
                visitor(details)?;
            }
            Ok(())
        })
    }

    fn diagnostics(&self) -> Vec<String> {
        self.tree.diagnostics()
    }
}

#[derive(Debug)]
struct UnionTree {
    l_trees: Vec<FileTree>,
}

impl VisitableTree for UnionTree {
    fn display_name(&self) -> String {
        let l_names: Vec<String> = self.l_trees.iter().map(FileTree::display_name).collect();
        format!("union of [{}]", l_names.join(", "))
    }

    fn visit(&self, visitor: &mut dyn FnMut(FileDetails) -> Result<()>) -> Result<()> {
        for tree in &self.l_trees {
            tree.visit(&mut *visitor)?;
        }
        Ok(())
    }

    fn diagnostics(&self) -> Vec<String> {
        self.l_trees.iter().flat_map(FileTree::diagnostics).collect()
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region DirectoryTrees

/// Recursive view of a directory in lexicographic pre-order. Follows symlinks.
#[derive(Debug, Clone)]
pub struct DirectoryFileTree {
    path_dir: PathBuf,
}

impl DirectoryFileTree {
    pub fn new<P: AsRef<Path>>(path_dir: P) -> Self {
        Self {
            path_dir: path_dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.path_dir
    }
}

impl VisitableTree for DirectoryFileTree {
    fn display_name(&self) -> String {
        format!("directory '{}'", self.path_dir.display())
    }

    fn visit(&self, visitor: &mut dyn FnMut(FileDetails) -> Result<()>) -> Result<()> {
        if !self.path_dir.exists() {
            debug!(dir = %self.path_dir.display(), "directory tree root missing; empty");
            return Ok(());
        }
        if !self.path_dir.is_dir() {
            return Err(FileOpsError::PathKindMismatch {
                path: self.path_dir.clone(),
                expected: EnumPathValidation::Directory,
            });
        }
        let mut walker = DirectoryWalker {
            #[cfg(unix)]
            set_ancestor_dirs: HashSet::new(),
            visitor,
        };
        walker.walk_directory(&self.path_dir, "")
    }
}

struct DirectoryWalker<'a> {
    /// `(dev, ino)` of the directories on the current descent path.
    #[cfg(unix)]
    set_ancestor_dirs: HashSet<(u64, u64)>,
    visitor: &'a mut dyn FnMut(FileDetails) -> Result<()>,
}

impl DirectoryWalker<'_> {
    fn walk_directory(&mut self, path_root: &Path, c_prefix: &str) -> Result<()> {
        #[cfg(unix)]
        let key_root = {
            use std::os::unix::fs::MetadataExt;
            let stat_root = fs::metadata(path_root).map_err(|e| FileOpsError::io(path_root, e))?;
            let key_root = (stat_root.dev(), stat_root.ino());
            if !self.set_ancestor_dirs.insert(key_root) {
                warn!(dir = %path_root.display(), "symlink loop detected; not descending");
                return Ok(());
            }
            key_root
        };

        let result = self.walk_entries(path_root, c_prefix);
        #[cfg(unix)]
        self.set_ancestor_dirs.remove(&key_root);
        result
    }

    fn walk_entries(&mut self, path_root: &Path, c_prefix: &str) -> Result<()> {
        let iter_entries = fs::read_dir(path_root).map_err(|e| FileOpsError::io(path_root, e))?;
        let mut l_entries: Vec<(String, PathBuf, fs::Metadata)> = Vec::new();
        for entry_res in iter_entries {
            let entry = entry_res.map_err(|e| FileOpsError::io(path_root, e))?;
            let path_entry = entry.path();
            let c_name = entry.file_name().to_string_lossy().into_owned();
            // Follows symlinks; broken links are skipped.
            let meta_entry = match fs::metadata(&path_entry) {
                Ok(v) => v,
                Err(e) => {
                    warn!(path = %path_entry.display(), error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            if !meta_entry.is_dir() && !meta_entry.is_file() {
                debug!(path = %path_entry.display(), "special file skipped");
                continue;
            }
            l_entries.push((c_name, path_entry, meta_entry));
        }
        l_entries.sort_by(|a, b| a.0.cmp(&b.0));

        for (c_name, path_entry, meta_entry) in l_entries {
            let c_relative = if c_prefix.is_empty() {
                c_name
            } else {
                format!("{c_prefix}/{c_name}")
            };
            let b_is_dir = meta_entry.is_dir();
            (self.visitor)(FileDetails::from_local(
                c_relative.clone(),
                path_entry.clone(),
                &meta_entry,
            ))?;
            if b_is_dir {
                self.walk_directory(&path_entry, &c_relative)?;
            }
        }
        Ok(())
    }
}

/// A single file exposed under its own name. Missing files yield nothing.
#[derive(Debug, Clone)]
pub struct SingleFileTree {
    path_file: PathBuf,
}

impl SingleFileTree {
    pub fn new<P: AsRef<Path>>(path_file: P) -> Self {
        Self {
            path_file: path_file.as_ref().to_path_buf(),
        }
    }
}

impl VisitableTree for SingleFileTree {
    fn display_name(&self) -> String {
        format!("file '{}'", self.path_file.display())
    }

    fn visit(&self, visitor: &mut dyn FnMut(FileDetails) -> Result<()>) -> Result<()> {
        let meta_file = match fs::metadata(&self.path_file) {
            Ok(v) => v,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(FileOpsError::io(&self.path_file, e)),
        };
        let c_name = self
            .path_file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                FileOpsError::invalid_input(format!(
                    "Path has no file name: {}",
                    self.path_file.display()
                ))
            })?;
        visitor(FileDetails::from_local(
            c_name,
            self.path_file.clone(),
            &meta_file,
        ))
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region FileCollection

/// Ordered descriptors resolved on demand.
#[derive(Debug, Clone)]
pub struct FileCollection {
    resolver: FileResolver,
    l_descriptors: Vec<PathDescriptor>,
}

impl FileCollection {
    pub fn new<I, D>(resolver: FileResolver, descriptors: I) -> Self
    where
        I: IntoIterator<Item = D>,
        D: Into<PathDescriptor>,
    {
        Self {
            resolver,
            l_descriptors: descriptors.into_iter().map(Into::into).collect(),
        }
    }

    /// Append more descriptors.
    pub fn from<D: Into<PathDescriptor>>(mut self, descriptor: D) -> Self {
        self.l_descriptors.push(descriptor.into());
        self
    }

    /// Resolved paths, first occurrence wins on duplicates.
    pub fn files(&self) -> Result<Vec<PathBuf>> {
        let mut l_paths: Vec<PathBuf> = Vec::new();
        for descriptor in &self.l_descriptors {
            for path in self.resolver.resolve_files(descriptor.clone())? {
                if !l_paths.contains(&path) {
                    l_paths.push(path);
                }
            }
        }
        Ok(l_paths)
    }

    /// Directories become directory trees, files single-file trees; missing paths vanish.
    pub fn as_file_tree(&self) -> FileTree {
        FileTree::new(self.clone())
    }

    pub fn to_descriptor(&self) -> PathDescriptor {
        PathDescriptor::Collection(self.l_descriptors.clone())
    }
}

impl From<&FileCollection> for PathDescriptor {
    fn from(value: &FileCollection) -> Self {
        value.to_descriptor()
    }
}

impl VisitableTree for FileCollection {
    fn display_name(&self) -> String {
        format!("file collection {}", self.to_descriptor())
    }

    fn visit(&self, visitor: &mut dyn FnMut(FileDetails) -> Result<()>) -> Result<()> {
        for path in self.files()? {
            if path.is_dir() {
                DirectoryFileTree::new(&path).visit(&mut *visitor)?;
            } else {
                SingleFileTree::new(&path).visit(&mut *visitor)?;
            }
        }
        Ok(())
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

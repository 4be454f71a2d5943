//! Zip and tar archives exposed as lazily extracted file trees.
//!
//! The first enumeration reads the archive index only. Entry content is
//! extracted into a scratch directory on first access and reused afterwards.
//! Tar entries are extracted together in one pass since tar streams cannot
//! seek. For path-backed archives a changed modification time discards the
//! index and everything extracted from it.

use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Cursor, Read, Seek};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use filetime::FileTime;
use tracing::{debug, warn};
use zip::ZipArchive;
use zip::result::ZipError;

use crate::resource::{ReadableResource, ResourceSource};
use crate::spec::{EnumArchiveFormat, FileOpsError, LABEL_EXPANDED_ARCHIVES, Result};
use crate::tree::{FileContent, FileDetails, VisitableTree};
use crate::util::{join_relative, sanitize_entry_name};

////////////////////////////////////////////////////////////////////////////////
// #region Scratch

/// Allocator of fresh, empty working directories.
pub trait ScratchProvider: Send + Sync + fmt::Debug {
    /// Create a new directory, unique per call. It exists on return.
    fn new_scratch_directory(&self, label: &str) -> Result<PathBuf>;
}

/// [`ScratchProvider`] backed by `tempfile`, rooted at a fixed directory.
#[derive(Debug, Clone)]
pub struct TempDirScratchProvider {
    path_dir_root: PathBuf,
}

impl TempDirScratchProvider {
    pub fn new<P: AsRef<Path>>(path_dir_root: P) -> Self {
        Self {
            path_dir_root: path_dir_root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.path_dir_root
    }
}

impl Default for TempDirScratchProvider {
    fn default() -> Self {
        Self::new(std::env::temp_dir())
    }
}

impl ScratchProvider for TempDirScratchProvider {
    fn new_scratch_directory(&self, label: &str) -> Result<PathBuf> {
        fs::create_dir_all(&self.path_dir_root)
            .map_err(|e| FileOpsError::io(&self.path_dir_root, e))?;
        let dir_tmp = tempfile::Builder::new()
            .prefix(&format!("{label}-"))
            .tempdir_in(&self.path_dir_root)
            .map_err(|e| FileOpsError::io(&self.path_dir_root, e))?;
        Ok(dir_tmp.keep())
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Sources

/// Backing bytes of an archive.
#[derive(Debug, Clone)]
pub enum ArchiveSource {
    Path(PathBuf),
    Resource(ReadableResource),
}

impl ArchiveSource {
    fn description(&self) -> String {
        match self {
            Self::Path(path) => format!("'{}'", path.display()),
            Self::Resource(resource) => resource.description(),
        }
    }

    fn diagnostic_path(&self) -> PathBuf {
        match self {
            Self::Path(path) => path.clone(),
            Self::Resource(resource) => resource.diagnostic_path(),
        }
    }

    /// Local file whose mtime decides whether extracted content is stale.
    fn backing_file(&self) -> Option<&Path> {
        match self {
            Self::Path(path) => Some(path),
            Self::Resource(resource) => match resource.source() {
                ResourceSource::File(path) => Some(path),
                _ => None,
            },
        }
    }

    fn as_resource(&self) -> ReadableResource {
        match self {
            Self::Path(path) => ReadableResource::from_file(path),
            Self::Resource(resource) => resource.clone(),
        }
    }
}

impl From<PathBuf> for ArchiveSource {
    fn from(value: PathBuf) -> Self {
        Self::Path(value)
    }
}

impl From<&Path> for ArchiveSource {
    fn from(value: &Path) -> Self {
        Self::Path(value.to_path_buf())
    }
}

impl From<ReadableResource> for ArchiveSource {
    fn from(value: ReadableResource) -> Self {
        Self::Resource(value)
    }
}

trait ReadSeek: Read + Seek + Send {}
impl<T: Read + Seek + Send> ReadSeek for T {}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Index

#[derive(Debug)]
pub(crate) struct ArchiveEntry {
    relative_path: String,
    /// Zip central directory index, or ordinal among tar entries.
    n_position: usize,
    size: u64,
    last_modified: Option<FileTime>,
    mode: Option<u32>,
    /// Index build this entry belongs to.
    n_generation: u64,
    path_extracted: Mutex<Option<PathBuf>>,
}

impl ArchiveEntry {
    fn cached_path(&self) -> Option<PathBuf> {
        let guard = self
            .path_extracted
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        guard.as_ref().filter(|path| path.is_file()).cloned()
    }
}

/// Zip reader kept open for the lifetime of one index.
struct OpenZip(ZipArchive<Box<dyn ReadSeek>>);

impl fmt::Debug for OpenZip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenZip").field("entries", &self.0.len()).finish()
    }
}

#[derive(Debug)]
struct ArchiveIndex {
    n_generation: u64,
    path_dir_scratch: PathBuf,
    mtime_archive: Option<FileTime>,
    l_entries: Vec<Arc<ArchiveEntry>>,
    l_diagnostics: Vec<String>,
    zip: Option<OpenZip>,
}

impl ArchiveIndex {
    fn find(&self, relative_path: &str) -> Option<Arc<ArchiveEntry>> {
        self.l_entries
            .iter()
            .find(|entry| entry.relative_path == relative_path)
            .cloned()
    }
}

/// Raw header data collected before safety checks.
struct RawEntry {
    c_name: String,
    n_position: usize,
    if_is_directory: bool,
    size: u64,
    last_modified: Option<FileTime>,
    mode: Option<u32>,
}

#[derive(Debug)]
pub(crate) struct ArchiveState {
    format: EnumArchiveFormat,
    source: ArchiveSource,
    scratch: Arc<dyn ScratchProvider>,
    cache: Mutex<Option<ArchiveIndex>>,
    n_generations: AtomicU64,
}

impl ArchiveState {
    fn description(&self) -> String {
        format!("{} {}", self.format, self.source.description())
    }

    fn lock_cache(&self) -> MutexGuard<'_, Option<ArchiveIndex>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current_mtime(&self) -> Option<FileTime> {
        let path = self.source.backing_file()?;
        fs::metadata(path)
            .ok()
            .map(|meta| FileTime::from_last_modification_time(&meta))
    }

    /// Current index, rebuilt when missing or stale. Callers hold the cache lock,
    /// so a scratch directory is never removed while an entry is written into it.
    fn refresh<'g>(&self, cache: &'g mut Option<ArchiveIndex>) -> Result<&'g mut ArchiveIndex> {
        let mtime_now = self.current_mtime();
        let index = match cache.take() {
            Some(index) if index.mtime_archive == mtime_now => index,
            Some(index_stale) => {
                debug!(
                    archive = %self.description(),
                    scratch = %index_stale.path_dir_scratch.display(),
                    "archive modified; discarding extracted entries"
                );
                remove_scratch(&index_stale.path_dir_scratch);
                self.build_index(mtime_now)?
            }
            None => self.build_index(mtime_now)?,
        };
        Ok(cache.insert(index))
    }

    fn index_snapshot(&self) -> Result<Vec<Arc<ArchiveEntry>>> {
        let mut guard = self.lock_cache();
        Ok(self.refresh(&mut guard)?.l_entries.clone())
    }

    fn build_index(&self, mtime_archive: Option<FileTime>) -> Result<ArchiveIndex> {
        let (l_raw, zip) = match self.format {
            EnumArchiveFormat::Zip => {
                let mut archive = self.open_zip()?;
                (self.read_zip_headers(&mut archive)?, Some(OpenZip(archive)))
            }
            EnumArchiveFormat::Tar => (self.read_tar_headers()?, None),
        };
        let path_dir_scratch = self.scratch.new_scratch_directory(LABEL_EXPANDED_ARCHIVES)?;
        let n_generation = self.n_generations.fetch_add(1, Ordering::Relaxed);

        let mut l_entries: Vec<Arc<ArchiveEntry>> = Vec::new();
        let mut map_seen: HashMap<String, usize> = HashMap::new();
        let mut l_diagnostics = Vec::new();
        for raw in l_raw {
            let Some(c_relative) = sanitize_entry_name(&raw.c_name) else {
                let err = FileOpsError::UnsafeArchiveEntry {
                    archive: self.description(),
                    entry: raw.c_name.clone(),
                };
                warn!(archive = %self.description(), entry = %raw.c_name, "skipping unsafe archive entry");
                l_diagnostics.push(err.to_string());
                continue;
            };
            if c_relative.is_empty() {
                continue;
            }
            if raw.if_is_directory {
                let path_dir = join_relative(&path_dir_scratch, &c_relative);
                if let Err(e) = fs::create_dir_all(&path_dir) {
                    remove_scratch(&path_dir_scratch);
                    return Err(FileOpsError::io(&path_dir, e));
                }
                continue;
            }
            let entry = Arc::new(ArchiveEntry {
                relative_path: c_relative.clone(),
                n_position: raw.n_position,
                size: raw.size,
                last_modified: raw.last_modified,
                mode: raw.mode,
                n_generation,
                path_extracted: Mutex::new(None),
            });
            // A later entry with the same path shadows the earlier one, as extraction would.
            match map_seen.get(&c_relative) {
                Some(&n_slot) => {
                    debug!(archive = %self.description(), entry = %c_relative, "duplicate archive entry; keeping the later one");
                    l_entries[n_slot] = entry;
                }
                None => {
                    map_seen.insert(c_relative, l_entries.len());
                    l_entries.push(entry);
                }
            }
        }
        debug!(
            archive = %self.description(),
            entries = l_entries.len(),
            skipped = l_diagnostics.len(),
            generation = n_generation,
            "indexed archive"
        );
        Ok(ArchiveIndex {
            n_generation,
            path_dir_scratch,
            mtime_archive,
            l_entries,
            l_diagnostics,
            zip,
        })
    }

    /// Extracted path of `entry`, which must belong to `index`.
    fn materialize_in(&self, index: &mut ArchiveIndex, entry: &ArchiveEntry) -> Result<PathBuf> {
        if let Some(path) = entry.cached_path() {
            return Ok(path);
        }
        match self.format {
            EnumArchiveFormat::Zip => self.extract_zip_entry(index, entry),
            EnumArchiveFormat::Tar => {
                self.extract_tar_entries(index)?;
                entry.cached_path().ok_or_else(|| self.missing_entry(&entry.relative_path))
            }
        }
    }

    /// Stream `reader` into the entry's scratch location and record it.
    fn write_entry(
        &self,
        path_dir_scratch: &Path,
        entry: &ArchiveEntry,
        reader: &mut dyn Read,
    ) -> Result<PathBuf> {
        let path_dst = join_relative(path_dir_scratch, &entry.relative_path);
        let path_parent = path_dst.parent().unwrap_or(path_dir_scratch).to_path_buf();
        fs::create_dir_all(&path_parent).map_err(|e| FileOpsError::io(&path_parent, e))?;

        // Partial output never appears under the final name.
        let mut file_tmp =
            tempfile::NamedTempFile::new_in(&path_parent).map_err(|e| FileOpsError::io(&path_parent, e))?;
        io::copy(reader, file_tmp.as_file_mut()).map_err(|e| self.stream_error(e))?;
        file_tmp
            .persist(&path_dst)
            .map_err(|e| FileOpsError::io(&path_dst, e.error))?;

        #[cfg(unix)]
        if let Some(n_mode) = entry.mode {
            use std::os::unix::fs::PermissionsExt;
            let n_mode = (n_mode & 0o7777) | 0o200;
            fs::set_permissions(&path_dst, fs::Permissions::from_mode(n_mode))
                .map_err(|e| FileOpsError::io(&path_dst, e))?;
        }
        if let Some(mtime) = entry.last_modified {
            filetime::set_file_mtime(&path_dst, mtime).map_err(|e| FileOpsError::io(&path_dst, e))?;
        }
        debug!(
            archive = %self.description(),
            entry = %entry.relative_path,
            path = %path_dst.display(),
            "extracted archive entry"
        );
        *entry
            .path_extracted
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(path_dst.clone());
        Ok(path_dst)
    }

    fn missing_entry(&self, relative_path: &str) -> FileOpsError {
        FileOpsError::CorruptArchive {
            archive: self.description(),
            message: format!("entry '{relative_path}' is no longer present"),
        }
    }

    // Zip

    /// Resource-backed zips are buffered once per index for seeking.
    fn open_zip(&self) -> Result<ZipArchive<Box<dyn ReadSeek>>> {
        let reader: Box<dyn ReadSeek> = match &self.source {
            ArchiveSource::Path(path) => {
                Box::new(File::open(path).map_err(|e| FileOpsError::io(path, e))?)
            }
            ArchiveSource::Resource(resource) => Box::new(Cursor::new(resource.read_all()?)),
        };
        ZipArchive::new(reader).map_err(|e| self.zip_error(e))
    }

    fn read_zip_headers(&self, archive: &mut ZipArchive<Box<dyn ReadSeek>>) -> Result<Vec<RawEntry>> {
        let mut l_raw = Vec::with_capacity(archive.len());
        for n_index in 0..archive.len() {
            let file = archive.by_index_raw(n_index).map_err(|e| self.zip_error(e))?;
            l_raw.push(RawEntry {
                c_name: file.name().to_string(),
                n_position: n_index,
                if_is_directory: file.is_dir(),
                size: file.size(),
                last_modified: None,
                mode: file.unix_mode(),
            });
        }
        Ok(l_raw)
    }

    fn extract_zip_entry(&self, index: &mut ArchiveIndex, entry: &ArchiveEntry) -> Result<PathBuf> {
        let path_dir_scratch = index.path_dir_scratch.clone();
        let Some(zip) = index.zip.as_mut() else {
            return Err(self.missing_entry(&entry.relative_path));
        };
        let mut file = zip
            .0
            .by_index(entry.n_position)
            .map_err(|e| self.zip_error(e))?;
        self.write_entry(&path_dir_scratch, entry, &mut file)
    }

    fn zip_error(&self, err: ZipError) -> FileOpsError {
        match err {
            ZipError::Io(e) => FileOpsError::io(self.source.diagnostic_path(), e),
            other => FileOpsError::CorruptArchive {
                archive: self.description(),
                message: other.to_string(),
            },
        }
    }

    // Tar

    fn open_tar(&self) -> Result<tar::Archive<Box<dyn Read + Send>>> {
        Ok(tar::Archive::new(self.source.as_resource().open()?))
    }

    fn read_tar_headers(&self) -> Result<Vec<RawEntry>> {
        let mut archive = self.open_tar()?;
        let iter_entries = archive.entries().map_err(|e| self.stream_error(e))?;
        let mut l_raw = Vec::new();
        for (n_position, entry_res) in iter_entries.enumerate() {
            let entry = entry_res.map_err(|e| self.stream_error(e))?;
            let header = entry.header();
            let entry_type = header.entry_type();
            let c_name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
            if !entry_type.is_dir() && !entry_type.is_file() {
                debug!(archive = %self.description(), entry = %c_name, ?entry_type, "skipping non-regular tar entry");
                continue;
            }
            l_raw.push(RawEntry {
                if_is_directory: entry_type.is_dir(),
                size: entry.size(),
                last_modified: header
                    .mtime()
                    .ok()
                    .map(|n_secs| FileTime::from_unix_time(n_secs as i64, 0)),
                mode: header.mode().ok(),
                c_name,
                n_position,
            });
        }
        Ok(l_raw)
    }

    /// Tar has no random access: extract every pending entry in one pass.
    fn extract_tar_entries(&self, index: &ArchiveIndex) -> Result<()> {
        let map_pending: HashMap<usize, &ArchiveEntry> = index
            .l_entries
            .iter()
            .filter(|entry| entry.cached_path().is_none())
            .map(|entry| (entry.n_position, entry.as_ref()))
            .collect();
        if map_pending.is_empty() {
            return Ok(());
        }

        let mut archive = self.open_tar()?;
        let iter_entries = archive.entries().map_err(|e| self.stream_error(e))?;
        let mut n_remaining = map_pending.len();
        for (n_position, entry_res) in iter_entries.enumerate() {
            let mut entry_tar = entry_res.map_err(|e| self.stream_error(e))?;
            let Some(entry) = map_pending.get(&n_position) else {
                continue;
            };
            self.write_entry(&index.path_dir_scratch, entry, &mut entry_tar)?;
            n_remaining -= 1;
            if n_remaining == 0 {
                break;
            }
        }
        debug!(
            archive = %self.description(),
            extracted = map_pending.len() - n_remaining,
            "extracted tar entries"
        );
        Ok(())
    }

    fn stream_error(&self, err: io::Error) -> FileOpsError {
        match err.kind() {
            io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => {
                FileOpsError::io(self.source.diagnostic_path(), err)
            }
            _ => FileOpsError::CorruptArchive {
                archive: self.description(),
                message: err.to_string(),
            },
        }
    }
}

impl Drop for ArchiveState {
    fn drop(&mut self) {
        let cache = self.cache.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(index) = cache.take() {
            remove_scratch(&index.path_dir_scratch);
        }
    }
}

fn remove_scratch(path_dir_scratch: &Path) {
    if let Err(e) = fs::remove_dir_all(path_dir_scratch) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(scratch = %path_dir_scratch.display(), error = %e, "failed to remove scratch directory");
        }
    }
}

/// Content handle of one archive entry.
#[derive(Debug, Clone)]
pub(crate) struct ArchiveEntryHandle {
    state: Arc<ArchiveState>,
    entry: Arc<ArchiveEntry>,
}

impl ArchiveEntryHandle {
    /// Extracted path of the entry; extracts once per archive index.
    ///
    /// A handle from before the archive changed is looked up again by path in
    /// the current index.
    pub(crate) fn materialize(&self) -> Result<PathBuf> {
        let mut guard = self.state.lock_cache();
        let index = self.state.refresh(&mut guard)?;
        if index.n_generation == self.entry.n_generation {
            return self.state.materialize_in(index, &self.entry);
        }
        let entry = index
            .find(&self.entry.relative_path)
            .ok_or_else(|| self.state.missing_entry(&self.entry.relative_path))?;
        debug!(
            archive = %self.state.description(),
            entry = %entry.relative_path,
            "entry handle predates archive change; using current entry"
        );
        self.state.materialize_in(index, &entry)
    }

    pub(crate) fn archive_description(&self) -> String {
        self.state.description()
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region ArchiveFileTree

/// File tree over the entries of a zip or tar archive.
#[derive(Debug, Clone)]
pub struct ArchiveFileTree {
    state: Arc<ArchiveState>,
}

impl ArchiveFileTree {
    pub fn zip<S: Into<ArchiveSource>>(source: S, scratch: Arc<dyn ScratchProvider>) -> Self {
        Self::new(EnumArchiveFormat::Zip, source.into(), scratch)
    }

    /// Tar content always goes through [`ReadableResource`], so compressed tarballs work.
    pub fn tar<S: Into<ArchiveSource>>(source: S, scratch: Arc<dyn ScratchProvider>) -> Self {
        Self::new(EnumArchiveFormat::Tar, source.into(), scratch)
    }

    fn new(
        format: EnumArchiveFormat,
        source: ArchiveSource,
        scratch: Arc<dyn ScratchProvider>,
    ) -> Self {
        Self {
            state: Arc::new(ArchiveState {
                format,
                source,
                scratch,
                cache: Mutex::new(None),
                n_generations: AtomicU64::new(0),
            }),
        }
    }

    pub fn format(&self) -> EnumArchiveFormat {
        self.state.format
    }

    /// Scratch directory of the current index, if the archive has been indexed.
    pub fn scratch_dir(&self) -> Option<PathBuf> {
        let guard = self.state.lock_cache();
        guard.as_ref().map(|index| index.path_dir_scratch.clone())
    }
}

impl VisitableTree for ArchiveFileTree {
    fn display_name(&self) -> String {
        self.state.description()
    }

    fn visit(&self, visitor: &mut dyn FnMut(FileDetails) -> Result<()>) -> Result<()> {
        let l_entries = self.state.index_snapshot()?;
        for entry in l_entries {
            let details = FileDetails::new(
                entry.relative_path.clone(),
                false,
                entry.size,
                entry.last_modified,
                FileContent::Archive(ArchiveEntryHandle {
                    state: Arc::clone(&self.state),
                    entry,
                }),
            );
            visitor(details)?;
        }
        Ok(())
    }

    fn diagnostics(&self) -> Vec<String> {
        let guard = self.state.lock_cache();
        guard
            .as_ref()
            .map(|index| index.l_diagnostics.clone())
            .unwrap_or_default()
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

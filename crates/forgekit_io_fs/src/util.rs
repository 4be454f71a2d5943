use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use globset::{GlobBuilder, GlobMatcher};
use regex::Regex;

use crate::spec::{EnumCopyPatternMode, FileOpsError, Result, SpecPatterns};

////////////////////////////////////////////////////////////////////////////////
// #region PatternMatching

#[derive(Debug, Clone)]
pub(crate) enum TypeCopyPattern {
    Literal(String),
    Glob(GlobMatcher),
    Regex(Regex),
}

impl TypeCopyPattern {
    pub(crate) fn compile(pattern: &str, rule_pattern: EnumCopyPatternMode) -> Result<Self> {
        match rule_pattern {
            EnumCopyPatternMode::Literal => Ok(Self::Literal(pattern.to_string())),
            EnumCopyPatternMode::Glob => {
                // A trailing separator selects everything below the directory.
                let c_pattern = if pattern.ends_with('/') {
                    format!("{pattern}**")
                } else {
                    pattern.to_string()
                };
                let matcher = GlobBuilder::new(&c_pattern)
                    .literal_separator(true)
                    .build()
                    .map_err(|e| {
                        FileOpsError::InvalidPattern(format!(
                            "Invalid pattern in include/exclude: {e}"
                        ))
                    })?
                    .compile_matcher();
                Ok(Self::Glob(matcher))
            }
            EnumCopyPatternMode::Regex => {
                let regex = Regex::new(pattern).map_err(|e| {
                    FileOpsError::InvalidPattern(format!(
                        "Invalid pattern in include/exclude: {e}"
                    ))
                })?;
                Ok(Self::Regex(regex))
            }
        }
    }

    pub(crate) fn is_match(&self, value: &str) -> bool {
        match self {
            Self::Literal(v) => v == value,
            Self::Glob(v) => v.is_match(value),
            Self::Regex(v) => v.is_match(value),
        }
    }
}

/// Compiled include/exclude lists. Lists from several levels concatenate.
#[derive(Debug, Clone, Default)]
pub(crate) struct SpecCompiledPatterns {
    l_include: Vec<TypeCopyPattern>,
    l_exclude: Vec<TypeCopyPattern>,
}

impl SpecCompiledPatterns {
    pub(crate) fn from_spec(spec_patterns: &SpecPatterns) -> Result<Self> {
        Self::from_raw(
            &spec_patterns.patterns_include,
            &spec_patterns.patterns_exclude,
            spec_patterns.rule_pattern,
        )
    }

    pub(crate) fn from_raw(
        patterns_include: &[String],
        patterns_exclude: &[String],
        rule_pattern: EnumCopyPatternMode,
    ) -> Result<Self> {
        Ok(Self {
            l_include: _compile(patterns_include, rule_pattern)?,
            l_exclude: _compile(patterns_exclude, rule_pattern)?,
        })
    }

    pub(crate) fn extend(&mut self, other: &Self) {
        self.l_include.extend(other.l_include.iter().cloned());
        self.l_exclude.extend(other.l_exclude.iter().cloned());
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.l_include.is_empty() && self.l_exclude.is_empty()
    }

    /// Whether `relative_path` survives the lists. Directories are never dropped by
    /// includes, only by excludes.
    pub(crate) fn is_included(&self, relative_path: &str, if_is_directory: bool) -> bool {
        if self.should_exclude(relative_path) {
            return false;
        }
        if if_is_directory || self.l_include.is_empty() {
            return true;
        }
        self.l_include.iter().any(|p| p.is_match(relative_path))
    }

    fn should_exclude(&self, relative_path: &str) -> bool {
        if self.l_exclude.is_empty() {
            return false;
        }
        let mut n_end = 0;
        loop {
            let c_prefix = match relative_path[n_end..].find('/') {
                Some(n_idx) => {
                    n_end += n_idx;
                    &relative_path[..n_end]
                }
                None => relative_path,
            };
            if self.l_exclude.iter().any(|p| p.is_match(c_prefix)) {
                return true;
            }
            if c_prefix.len() == relative_path.len() {
                return false;
            }
            n_end += 1;
        }
    }
}

fn _compile(patterns: &[String], rule_pattern: EnumCopyPatternMode) -> Result<Vec<TypeCopyPattern>> {
    patterns
        .iter()
        .map(|pattern| TypeCopyPattern::compile(pattern, rule_pattern))
        .collect()
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region PathUtilities

/// Resolve `.` and `..` without touching the filesystem. `..` above a root is dropped.
pub(crate) fn normalize_lexically(path: &Path) -> PathBuf {
    let mut path_out = PathBuf::new();
    let mut n_normal = 0usize;
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => path_out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if n_normal > 0 {
                    path_out.pop();
                    n_normal -= 1;
                } else if !path_out.has_root() {
                    path_out.push("..");
                }
            }
            Component::Normal(name) => {
                path_out.push(name);
                n_normal += 1;
            }
        }
    }
    path_out
}

/// Relative path from `base` to `target`, both absolute and normalized.
pub(crate) fn relative_between(base: &Path, target: &Path) -> PathBuf {
    let l_base: Vec<Component<'_>> = base.components().collect();
    let l_target: Vec<Component<'_>> = target.components().collect();
    let n_common = l_base
        .iter()
        .zip(l_target.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut path_rel = PathBuf::new();
    for _ in n_common..l_base.len() {
        path_rel.push("..");
    }
    for component in &l_target[n_common..] {
        path_rel.push(component.as_os_str());
    }
    path_rel
}

/// Join a `/`-separated relative path onto `root` segment by segment.
pub(crate) fn join_relative(root: &Path, relative_path: &str) -> PathBuf {
    let mut path_out = root.to_path_buf();
    for segment in relative_path.split('/').filter(|s| !s.is_empty()) {
        path_out.push(segment);
    }
    path_out
}

/// Archive entry name as a contained relative path, or `None` when it is absolute or
/// climbs above the extraction root. An empty string denotes the root itself.
pub(crate) fn sanitize_entry_name(name: &str) -> Option<String> {
    let c_name = name.replace('\\', "/");
    if c_name.starts_with('/') || Path::new(&c_name).has_root() {
        return None;
    }
    if c_name.len() >= 2 && c_name.as_bytes()[1] == b':' {
        return None;
    }

    let mut l_segments: Vec<&str> = Vec::new();
    for segment in c_name.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                l_segments.pop()?;
            }
            other => l_segments.push(other),
        }
    }
    Some(l_segments.join("/"))
}

fn _absolutize_path(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(path)
}

pub(crate) fn validate_destination_path_safety(
    path_dst_item: &Path,
    path_dir_dst_root: &Path,
) -> std::result::Result<(), String> {
    let path_dir_dst_root_abs = _absolutize_path(path_dir_dst_root);
    let path_dst_item_abs = _absolutize_path(path_dst_item);

    if !path_dst_item_abs.starts_with(&path_dir_dst_root_abs) {
        return Err(format!(
            "Unsafe destination path escapes destination root: {} (root={})",
            path_dst_item.display(),
            path_dir_dst_root.display()
        ));
    }

    let path_parent_dst = path_dst_item_abs.parent().ok_or_else(|| {
        format!(
            "Failed to derive parent directory: {}",
            path_dst_item.display()
        )
    })?;
    let path_parent_rel = path_parent_dst
        .strip_prefix(&path_dir_dst_root_abs)
        .map_err(|_| {
            format!(
                "Unsafe destination parent escapes destination root: {} (root={})",
                path_dst_item.display(),
                path_dir_dst_root.display()
            )
        })?;
    let mut path_cursor = path_dir_dst_root_abs.clone();
    for part_rel in path_parent_rel.components() {
        path_cursor.push(part_rel.as_os_str());
        match fs::symlink_metadata(&path_cursor) {
            Ok(meta_cursor) => {
                if meta_cursor.file_type().is_symlink() {
                    return Err(format!(
                        "Unsafe destination path traverses symlink component: {}",
                        path_cursor.display()
                    ));
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(format!(
                    "Failed to inspect destination path component {} ({e})",
                    path_cursor.display()
                ));
            }
        }
    }

    match fs::symlink_metadata(&path_dst_item_abs) {
        Ok(meta_dst_item) => {
            if meta_dst_item.file_type().is_symlink() {
                return Err(format!(
                    "Unsafe destination path is an existing symlink: {}",
                    path_dst_item.display()
                ));
            }
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(format!(
                "Failed to inspect destination path {} ({e})",
                path_dst_item.display()
            ));
        }
    }

    Ok(())
}

/// Carry permissions, timestamps and xattrs from a local source onto a written copy.
pub(crate) fn apply_file_metadata(
    path_file_src: &Path,
    path_file_dst: &Path,
) -> std::result::Result<(), io::Error> {
    use filetime::{FileTime, set_file_times};

    let stat_src = fs::metadata(path_file_src)?;

    #[cfg(target_os = "linux")]
    copy_xattrs_linux(path_file_src, path_file_dst);

    let file_time_access = FileTime::from_last_access_time(&stat_src);
    let file_time_modify = FileTime::from_last_modification_time(&stat_src);
    set_file_times(path_file_dst, file_time_access, file_time_modify)?;

    // Last, since a read-only mode would block the writes above.
    fs::set_permissions(path_file_dst, stat_src.permissions())?;
    Ok(())
}

#[cfg(target_os = "linux")]
fn copy_xattrs_linux(path_file_src: &Path, path_file_dst: &Path) {
    let iter_xattr_names = match xattr::list(path_file_src) {
        Ok(v) => v,
        Err(_) => return,
    };

    for name in iter_xattr_names {
        let Some(raw_value) = xattr::get(path_file_src, &name).ok().flatten() else {
            continue;
        };
        let _ = xattr::set(path_file_dst, &name, &raw_value);
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

//! Shared enums, option models and the crate error type.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Maximum nesting of descriptors (collections/factories) before resolution gives up.
pub const MAX_DESCRIPTOR_DEPTH: usize = 32;

/// Scratch label used for archive extraction directories.
pub const LABEL_EXPANDED_ARCHIVES: &str = "expandedArchives";

////////////////////////////////////////////////////////////////////////////////
// #region EnumsInit

/// Check applied to a path after it has been resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnumPathValidation {
    /// No check.
    #[default]
    None,
    /// The path must exist (any kind).
    Exists,
    /// The path must exist and be a directory.
    Directory,
    /// The path must exist and be a regular file.
    File,
}

impl fmt::Display for EnumPathValidation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c_name = match self {
            Self::None => "any path",
            Self::Exists => "existing path",
            Self::Directory => "directory",
            Self::File => "file",
        };
        write!(f, "{c_name}")
    }
}

/// Stream codec of a readable resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumCompression {
    /// Raw bytes.
    None,
    /// RFC 1952 gzip framing.
    Gzip,
    /// bzip2 framing.
    Bzip2,
}

impl EnumCompression {
    /// Codec implied by a file name extension, if any.
    pub fn from_file_name(name: &str) -> Option<Self> {
        let c_name = name.to_ascii_lowercase();
        if c_name.ends_with(".gz") || c_name.ends_with(".tgz") {
            return Some(Self::Gzip);
        }
        if c_name.ends_with(".bz2") || c_name.ends_with(".tbz2") || c_name.ends_with(".tbz") {
            return Some(Self::Bzip2);
        }
        None
    }

    /// Codec implied by leading magic bytes, if any.
    pub fn from_magic(head: &[u8]) -> Option<Self> {
        if head.starts_with(&[0x1f, 0x8b]) {
            return Some(Self::Gzip);
        }
        if head.starts_with(b"BZh") {
            return Some(Self::Bzip2);
        }
        None
    }
}

/// Pattern matching mode for include/exclude lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnumCopyPatternMode {
    /// Shell-like wildcards (`*`, `?`, `**`, character classes) over `/`-separated paths.
    #[default]
    Glob,
    /// Regular expression pattern.
    Regex,
    /// Exact string match.
    Literal,
}

/// Archive container format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumArchiveFormat {
    Zip,
    Tar,
}

impl fmt::Display for EnumArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Zip => write!(f, "ZIP"),
            Self::Tar => write!(f, "TAR"),
        }
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region StructsAndErrors

/// Include/exclude pattern lists, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpecPatterns {
    /// A relative path is kept only if it matches one of these (empty = all).
    pub patterns_include: Vec<String>,
    /// A relative path (or one of its parent directories) matching any of these is dropped.
    pub patterns_exclude: Vec<String>,
    /// Pattern interpretation mode.
    pub rule_pattern: EnumCopyPatternMode,
}

impl SpecPatterns {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn include<S: Into<String>>(mut self, pattern: S) -> Self {
        self.patterns_include.push(pattern.into());
        self
    }

    pub fn exclude<S: Into<String>>(mut self, pattern: S) -> Self {
        self.patterns_exclude.push(pattern.into());
        self
    }

    pub fn with_mode(mut self, rule_pattern: EnumCopyPatternMode) -> Self {
        self.rule_pattern = rule_pattern;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.patterns_include.is_empty() && self.patterns_exclude.is_empty()
    }
}

/// Arguments for building a filtered directory tree in one call.
#[derive(Debug, Clone, Default)]
pub struct SpecFileTreeArgs {
    /// Base directory descriptor (resolved against the resolver base).
    pub dir: String,
    pub patterns_include: Vec<String>,
    pub patterns_exclude: Vec<String>,
    pub rule_pattern: EnumCopyPatternMode,
}

impl SpecFileTreeArgs {
    pub(crate) fn to_patterns(&self) -> SpecPatterns {
        SpecPatterns {
            patterns_include: self.patterns_include.clone(),
            patterns_exclude: self.patterns_exclude.clone(),
            rule_pattern: self.rule_pattern,
        }
    }
}

/// Input options for copy execution.
#[derive(Debug, Clone)]
pub struct SpecCopyOptions {
    /// Do not mutate filesystem; record what would happen.
    pub if_dry_run: bool,
    /// Carry permissions, timestamps and (on Linux) xattrs of unfiltered local sources.
    pub if_preserve_metadata: bool,
}

impl Default for SpecCopyOptions {
    fn default() -> Self {
        Self {
            if_dry_run: false,
            if_preserve_metadata: true,
        }
    }
}

/// One per-entry failure with path + error text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecCopyError {
    /// Failed source or destination path.
    pub path: PathBuf,
    /// User-facing error text.
    pub exception: String,
}

/// Errors raised by resolution, tree enumeration, copy and delete.
#[derive(Debug, Error)]
pub enum FileOpsError {
    /// Bad descriptor shape, mkdir over a file, unusable rename result, ...
    #[error("{0}")]
    InvalidUserInput(String),
    /// Validation required an existing path.
    #[error("Path does not exist: {}", path.display())]
    PathNotFound { path: PathBuf },
    /// The path exists but is the wrong kind.
    #[error("Path is not a {expected}: {}", path.display())]
    PathKindMismatch {
        path: PathBuf,
        expected: EnumPathValidation,
    },
    /// Archive header or index could not be parsed.
    #[error("Could not read {archive}: {message}")]
    CorruptArchive { archive: String, message: String },
    /// Archive entry would land outside the extraction root.
    #[error("Unsafe entry '{entry}' in {archive} escapes the extraction directory")]
    UnsafeArchiveEntry { archive: String, entry: String },
    /// Underlying read/write failure.
    #[error("IO failure at {}: {source}", path.display())]
    IoFailure {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// Invalid include/exclude/rename pattern.
    #[error("{0}")]
    InvalidPattern(String),
}

impl FileOpsError {
    pub(crate) fn io<P: AsRef<Path>>(path: P, source: io::Error) -> Self {
        Self::IoFailure {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub(crate) fn invalid_input<S: Into<String>>(message: S) -> Self {
        Self::InvalidUserInput(message.into())
    }
}

pub type Result<T> = std::result::Result<T, FileOpsError>;

// #endregion
////////////////////////////////////////////////////////////////////////////////

//! `forgekit_io_fs` v1:
//! Build-tool file layer.
//!
//! Modules:
//! - `resolve`   : path descriptors and their resolution
//! - `resource`  : re-openable byte sources with gzip/bzip2 decoding
//! - `tree`      : lazily enumerated, composable file trees
//! - `archive`   : zip/tar trees extracted on demand into scratch space
//! - `copy_spec` : hierarchical copy specifications
//! - `copy`      : copy plan execution
//! - `delete`    : path deletion
//! - `ops`       : the `FileOperations` entry point
//! - `spec`      : enums/options/errors
//! - `report`    : copy work result model
//! - `util`      : shared helper functions

pub mod archive;
pub mod copy;
pub mod copy_spec;
pub mod delete;
pub mod ops;
pub mod report;
pub mod resolve;
pub mod resource;
pub mod spec;
pub mod tree;
mod util;

pub use archive::{ArchiveFileTree, ArchiveSource, ScratchProvider, TempDirScratchProvider};
pub use copy::{CopyAction, copy_spec_into};
pub use copy_spec::{ContentFilter, CopySpec, PlannedCopy};
pub use delete::{DefaultDeleteAction, DeleteAction};
pub use ops::FileOperations;
pub use report::{WorkResult, WorkResultBuilder};
pub use resolve::{FileResolver, PathDescriptor, validate_path};
pub use resource::{ReadableResource, ResourceSource};
pub use spec::{
    EnumArchiveFormat, EnumCompression, EnumCopyPatternMode, EnumPathValidation, FileOpsError,
    LABEL_EXPANDED_ARCHIVES, MAX_DESCRIPTOR_DEPTH, Result, SpecCopyError, SpecCopyOptions,
    SpecFileTreeArgs, SpecPatterns,
};
pub use tree::{DirectoryFileTree, FileCollection, FileDetails, FileTree, SingleFileTree, VisitableTree};

//! Entry point tying resolution, trees, archives, copy and delete together.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use url::Url;

use crate::archive::{ArchiveFileTree, ScratchProvider, TempDirScratchProvider};
use crate::copy::copy_spec_into;
use crate::copy_spec::CopySpec;
use crate::delete::{DefaultDeleteAction, DeleteAction};
use crate::report::WorkResult;
use crate::resolve::{FileResolver, PathDescriptor};
use crate::resource::ReadableResource;
use crate::spec::{
    EnumCompression, EnumPathValidation, FileOpsError, Result, SpecCopyOptions, SpecFileTreeArgs,
};
use crate::tree::{DirectoryFileTree, FileCollection, FileTree};

/// File operations rooted at one base directory.
#[derive(Debug, Clone)]
pub struct FileOperations {
    resolver: FileResolver,
    scratch: Arc<dyn ScratchProvider>,
    delete_action: Arc<dyn DeleteAction>,
}

impl FileOperations {
    /// Archive scratch space goes under the system temp directory.
    pub fn new<P: AsRef<Path>>(base_dir: P) -> Result<Self> {
        let resolver = FileResolver::new(base_dir)?;
        Ok(Self {
            delete_action: Arc::new(DefaultDeleteAction::new(resolver.clone())),
            scratch: Arc::new(TempDirScratchProvider::default()),
            resolver,
        })
    }

    pub fn with_scratch_provider(mut self, scratch: Arc<dyn ScratchProvider>) -> Self {
        self.scratch = scratch;
        self
    }

    pub fn set_delete_action(&mut self, delete_action: Arc<dyn DeleteAction>) {
        self.delete_action = delete_action;
    }

    pub fn resolver(&self) -> &FileResolver {
        &self.resolver
    }

    // Resolution

    pub fn file<D: Into<PathDescriptor>>(&self, descriptor: D) -> Result<PathBuf> {
        self.resolver.resolve(descriptor)
    }

    pub fn file_with<D: Into<PathDescriptor>>(
        &self,
        descriptor: D,
        validation: EnumPathValidation,
    ) -> Result<PathBuf> {
        self.resolver.resolve_with(descriptor, validation)
    }

    pub fn uri<D: Into<PathDescriptor>>(&self, descriptor: D) -> Result<Url> {
        self.resolver.resolve_uri(descriptor)
    }

    pub fn relative_path<D: Into<PathDescriptor>>(&self, descriptor: D) -> Result<String> {
        self.resolver.resolve_relative(descriptor)
    }

    pub fn mkdir<D: Into<PathDescriptor>>(&self, descriptor: D) -> Result<PathBuf> {
        self.resolver.mkdir(descriptor)
    }

    // Trees

    pub fn files<I, D>(&self, descriptors: I) -> FileCollection
    where
        I: IntoIterator<Item = D>,
        D: Into<PathDescriptor>,
    {
        FileCollection::new(self.resolver.clone(), descriptors)
    }

    pub fn file_tree<D: Into<PathDescriptor>>(&self, descriptor: D) -> Result<FileTree> {
        let path_dir = self.resolver.resolve(descriptor)?;
        Ok(FileTree::new(DirectoryFileTree::new(path_dir)))
    }

    pub fn file_tree_with(&self, args: &SpecFileTreeArgs) -> Result<FileTree> {
        self.file_tree(args.dir.as_str())?.matching(&args.to_patterns())
    }

    pub fn zip_tree<D: Into<PathDescriptor>>(&self, descriptor: D) -> Result<FileTree> {
        let path_zip = self.resolver.resolve(descriptor)?;
        Ok(FileTree::new(ArchiveFileTree::zip(
            path_zip,
            Arc::clone(&self.scratch),
        )))
    }

    pub fn zip_tree_resource(&self, resource: ReadableResource) -> FileTree {
        FileTree::new(ArchiveFileTree::zip(resource, Arc::clone(&self.scratch)))
    }

    /// Tar tree over a file; `.tar.gz`/`.tar.bz2` are decompressed transparently.
    pub fn tar_tree<D: Into<PathDescriptor>>(&self, descriptor: D) -> Result<FileTree> {
        let path_tar = self.resolver.resolve(descriptor)?;
        Ok(FileTree::new(ArchiveFileTree::tar(
            path_tar,
            Arc::clone(&self.scratch),
        )))
    }

    pub fn tar_tree_resource(&self, resource: ReadableResource) -> FileTree {
        FileTree::new(ArchiveFileTree::tar(resource, Arc::clone(&self.scratch)))
    }

    // Resources

    /// Readable resource with codec auto-detection.
    pub fn resource<D: Into<PathDescriptor>>(&self, descriptor: D) -> Result<ReadableResource> {
        let url = self.resolver.resolve_uri(descriptor)?;
        if url.scheme() != "file" {
            return Ok(ReadableResource::from_uri(url));
        }
        let path = url.to_file_path().map_err(|_| {
            FileOpsError::invalid_input(format!("Cannot convert URL '{url}' to a file."))
        })?;
        Ok(ReadableResource::from_file(path))
    }

    pub fn gzip<D: Into<PathDescriptor>>(&self, descriptor: D) -> Result<ReadableResource> {
        Ok(self
            .resource(descriptor)?
            .with_compression(EnumCompression::Gzip))
    }

    pub fn bzip2<D: Into<PathDescriptor>>(&self, descriptor: D) -> Result<ReadableResource> {
        Ok(self
            .resource(descriptor)?
            .with_compression(EnumCompression::Bzip2))
    }

    // Copy and delete

    pub fn copy_spec(&self) -> CopySpec {
        CopySpec::new()
    }

    pub fn copy<D: Into<PathDescriptor>>(&self, destination: D, spec: &CopySpec) -> Result<WorkResult> {
        self.copy_with(destination, spec, &SpecCopyOptions::default())
    }

    pub fn copy_with<D: Into<PathDescriptor>>(
        &self,
        destination: D,
        spec: &CopySpec,
        spec_cp_options: &SpecCopyOptions,
    ) -> Result<WorkResult> {
        copy_spec_into(&self.resolver, destination, spec, spec_cp_options)
    }

    /// `true` iff anything was removed. Missing paths are not errors.
    pub fn delete<I, D>(&self, descriptors: I) -> Result<bool>
    where
        I: IntoIterator<Item = D>,
        D: Into<PathDescriptor>,
    {
        let l_descriptors: Vec<PathDescriptor> = descriptors.into_iter().map(Into::into).collect();
        self.delete_action.delete(&l_descriptors)
    }
}

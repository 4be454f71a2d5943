//! Path descriptors and their resolution against a base directory.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;
use url::Url;

use crate::spec::{EnumPathValidation, FileOpsError, MAX_DESCRIPTOR_DEPTH, Result};
use crate::util::{normalize_lexically, relative_between};

type FnDescriptorFactory = dyn Fn() -> PathDescriptor + Send + Sync;

/// Anything that can name a filesystem location before resolution.
#[derive(Clone)]
pub enum PathDescriptor {
    /// Plain path string, or a `file:` URI string.
    Str(String),
    /// Path segments joined with the platform separator.
    Segments(Vec<String>),
    /// An already-built path.
    Path(PathBuf),
    /// A URI. Only `file` URIs resolve to paths.
    Uri(Url),
    /// Nested descriptors. Single-path APIs accept exactly one element.
    Collection(Vec<PathDescriptor>),
    /// Evaluated each time the descriptor is resolved.
    Factory(Arc<FnDescriptorFactory>),
}

impl PathDescriptor {
    pub fn factory<F>(f: F) -> Self
    where
        F: Fn() -> PathDescriptor + Send + Sync + 'static,
    {
        Self::Factory(Arc::new(f))
    }

    pub fn segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Segments(segments.into_iter().map(Into::into).collect())
    }

    pub fn collection<I, D>(items: I) -> Self
    where
        I: IntoIterator<Item = D>,
        D: Into<PathDescriptor>,
    {
        Self::Collection(items.into_iter().map(Into::into).collect())
    }
}

impl fmt::Debug for PathDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(v) => f.debug_tuple("Str").field(v).finish(),
            Self::Segments(v) => f.debug_tuple("Segments").field(v).finish(),
            Self::Path(v) => f.debug_tuple("Path").field(v).finish(),
            Self::Uri(v) => f.debug_tuple("Uri").field(&v.as_str()).finish(),
            Self::Collection(v) => f.debug_tuple("Collection").field(v).finish(),
            Self::Factory(_) => f.write_str("Factory(..)"),
        }
    }
}

impl fmt::Display for PathDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(v) => write!(f, "{v}"),
            Self::Segments(v) => write!(f, "{}", v.join("/")),
            Self::Path(v) => write!(f, "{}", v.display()),
            Self::Uri(v) => write!(f, "{v}"),
            Self::Collection(v) => {
                let l_items: Vec<String> = v.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", l_items.join(", "))
            }
            Self::Factory(_) => write!(f, "<factory>"),
        }
    }
}

impl From<&str> for PathDescriptor {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for PathDescriptor {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<&String> for PathDescriptor {
    fn from(value: &String) -> Self {
        Self::Str(value.clone())
    }
}

impl From<PathBuf> for PathDescriptor {
    fn from(value: PathBuf) -> Self {
        Self::Path(value)
    }
}

impl From<&PathBuf> for PathDescriptor {
    fn from(value: &PathBuf) -> Self {
        Self::Path(value.clone())
    }
}

impl From<&Path> for PathDescriptor {
    fn from(value: &Path) -> Self {
        Self::Path(value.to_path_buf())
    }
}

impl From<Url> for PathDescriptor {
    fn from(value: Url) -> Self {
        Self::Uri(value)
    }
}

impl<D: Into<PathDescriptor>> From<Vec<D>> for PathDescriptor {
    fn from(value: Vec<D>) -> Self {
        Self::collection(value)
    }
}

/// Resolves descriptors against a fixed base directory.
#[derive(Debug, Clone)]
pub struct FileResolver {
    path_dir_base: PathBuf,
}

impl FileResolver {
    /// `base_dir` is made absolute against the current directory and normalized.
    pub fn new<P: AsRef<Path>>(base_dir: P) -> Result<Self> {
        let base_dir = base_dir.as_ref();
        let path_dir_base = if base_dir.is_absolute() {
            base_dir.to_path_buf()
        } else {
            std::env::current_dir()
                .map_err(|e| FileOpsError::io(base_dir, e))?
                .join(base_dir)
        };
        Ok(Self {
            path_dir_base: normalize_lexically(&path_dir_base),
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.path_dir_base
    }

    /// Resolve to one concrete, normalized path.
    pub fn resolve<D: Into<PathDescriptor>>(&self, descriptor: D) -> Result<PathBuf> {
        self.resolve_with(descriptor, EnumPathValidation::None)
    }

    /// Resolve, then check the result against `validation`.
    pub fn resolve_with<D: Into<PathDescriptor>>(
        &self,
        descriptor: D,
        validation: EnumPathValidation,
    ) -> Result<PathBuf> {
        let descriptor = descriptor.into();
        let path = self.resolve_single(&descriptor, 0)?;
        validate_path(&path, validation)?;
        Ok(path)
    }

    /// Resolve to every path a descriptor names, flattening nested collections.
    pub fn resolve_files<D: Into<PathDescriptor>>(&self, descriptor: D) -> Result<Vec<PathBuf>> {
        let mut l_paths = Vec::new();
        self.collect_paths(&descriptor.into(), 0, &mut l_paths)?;
        Ok(l_paths)
    }

    /// Resolve to a URI. URIs (any scheme) pass through; paths become `file:` URLs.
    pub fn resolve_uri<D: Into<PathDescriptor>>(&self, descriptor: D) -> Result<Url> {
        let descriptor = descriptor.into();
        if let Some(url) = self.find_uri(&descriptor, 0)? {
            return Ok(url);
        }
        let path = self.resolve_single(&descriptor, 0)?;
        Url::from_file_path(&path).map_err(|_| {
            FileOpsError::invalid_input(format!(
                "Cannot convert path to URI: {}",
                path.display()
            ))
        })
    }

    /// Resolve and express the result relative to the base directory.
    pub fn resolve_relative<D: Into<PathDescriptor>>(&self, descriptor: D) -> Result<String> {
        let path = self.resolve(descriptor)?;
        let path_rel = relative_between(&self.path_dir_base, &path);
        Ok(path_rel.to_string_lossy().into_owned())
    }

    /// Create a directory and its missing parents. Fails if the target is a file.
    pub fn mkdir<D: Into<PathDescriptor>>(&self, descriptor: D) -> Result<PathBuf> {
        let descriptor = descriptor.into();
        let path_dir = self.resolve(descriptor.clone())?;
        if path_dir.exists() && !path_dir.is_dir() {
            return Err(FileOpsError::invalid_input(format!(
                "Can't create directory. The path={descriptor} points to an existing file."
            )));
        }
        fs::create_dir_all(&path_dir).map_err(|e| FileOpsError::io(&path_dir, e))?;
        Ok(path_dir)
    }

    fn resolve_single(&self, descriptor: &PathDescriptor, n_depth: usize) -> Result<PathBuf> {
        check_depth(descriptor, n_depth)?;
        match descriptor {
            PathDescriptor::Str(value) => self.resolve_str(value),
            PathDescriptor::Segments(l_segments) => {
                let path: PathBuf = l_segments.iter().collect();
                Ok(self.absolutize(&path))
            }
            PathDescriptor::Path(path) => Ok(self.absolutize(path)),
            PathDescriptor::Uri(url) => uri_to_path(url),
            PathDescriptor::Collection(l_items) => match l_items.as_slice() {
                [single] => self.resolve_single(single, n_depth + 1),
                _ => Err(FileOpsError::invalid_input(format!(
                    "Expected a single path but got a collection of {} elements: {descriptor}",
                    l_items.len()
                ))),
            },
            PathDescriptor::Factory(factory) => self.resolve_single(&(**factory)(), n_depth + 1),
        }
    }

    fn collect_paths(
        &self,
        descriptor: &PathDescriptor,
        n_depth: usize,
        l_paths: &mut Vec<PathBuf>,
    ) -> Result<()> {
        check_depth(descriptor, n_depth)?;
        match descriptor {
            PathDescriptor::Collection(l_items) => {
                for item in l_items {
                    self.collect_paths(item, n_depth + 1, l_paths)?;
                }
                Ok(())
            }
            PathDescriptor::Factory(factory) => self.collect_paths(&(**factory)(), n_depth + 1, l_paths),
            other => {
                l_paths.push(self.resolve_single(other, n_depth)?);
                Ok(())
            }
        }
    }

    fn find_uri(&self, descriptor: &PathDescriptor, n_depth: usize) -> Result<Option<Url>> {
        check_depth(descriptor, n_depth)?;
        match descriptor {
            PathDescriptor::Uri(url) => Ok(Some(url.clone())),
            PathDescriptor::Str(value) => Ok(parse_uri(value)),
            PathDescriptor::Collection(l_items) if l_items.len() == 1 => {
                self.find_uri(&l_items[0], n_depth + 1)
            }
            PathDescriptor::Factory(factory) => self.find_uri(&(**factory)(), n_depth + 1),
            _ => Ok(None),
        }
    }

    fn resolve_str(&self, value: &str) -> Result<PathBuf> {
        if let Some(url) = parse_uri(value) {
            return uri_to_path(&url);
        }
        if value.is_empty() {
            return Err(FileOpsError::invalid_input(
                "Cannot resolve an empty path string.",
            ));
        }
        Ok(self.absolutize(Path::new(value)))
    }

    fn absolutize(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            normalize_lexically(path)
        } else {
            normalize_lexically(&self.path_dir_base.join(path))
        }
    }
}

fn check_depth(descriptor: &PathDescriptor, n_depth: usize) -> Result<()> {
    if n_depth > MAX_DESCRIPTOR_DEPTH {
        return Err(FileOpsError::invalid_input(format!(
            "Path descriptor nests deeper than {MAX_DESCRIPTOR_DEPTH} levels: {descriptor}"
        )));
    }
    Ok(())
}

/// Parse strings that carry a real scheme. One-letter schemes are drive letters.
fn parse_uri(value: &str) -> Option<Url> {
    let (c_scheme, _) = value.split_once(':')?;
    if c_scheme.len() < 2 {
        return None;
    }
    Url::parse(value).ok()
}

fn uri_to_path(url: &Url) -> Result<PathBuf> {
    if url.scheme() != "file" {
        return Err(FileOpsError::invalid_input(format!(
            "Cannot convert URL '{url}' to a file."
        )));
    }
    url.to_file_path()
        .map(|path| normalize_lexically(&path))
        .map_err(|_| FileOpsError::invalid_input(format!("Cannot convert URL '{url}' to a file.")))
}

/// Check an already-resolved path. Never mutates the filesystem.
pub fn validate_path(path: &Path, validation: EnumPathValidation) -> Result<()> {
    let b_exists = path.exists();
    let b_valid = match validation {
        EnumPathValidation::None => return Ok(()),
        EnumPathValidation::Exists => b_exists,
        EnumPathValidation::Directory => b_exists && path.is_dir(),
        EnumPathValidation::File => b_exists && path.is_file(),
    };
    if b_valid {
        return Ok(());
    }
    debug!(path = %path.display(), %validation, "path validation failed");
    if !b_exists {
        return Err(FileOpsError::PathNotFound {
            path: path.to_path_buf(),
        });
    }
    Err(FileOpsError::PathKindMismatch {
        path: path.to_path_buf(),
        expected: validation,
    })
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use tempfile::TempDir;
    use url::Url;

    use super::{FileResolver, PathDescriptor};
    use crate::spec::{EnumPathValidation, FileOpsError};

    fn setup() -> (TempDir, FileResolver) {
        let tmp = tempfile::tempdir().expect("tempdir");
        let resolver = FileResolver::new(tmp.path()).expect("resolver");
        (tmp, resolver)
    }

    #[test]
    fn every_descriptor_shape_matches_plain_string() {
        let (_tmp, resolver) = setup();
        let expected = resolver.base_dir().join("src").join("main.rs");

        let l_descriptors = vec![
            PathDescriptor::from("src/main.rs"),
            PathDescriptor::from("./src/../src/main.rs"),
            PathDescriptor::segments(["src", "main.rs"]),
            PathDescriptor::from(PathBuf::from("src/main.rs")),
            PathDescriptor::from(expected.clone()),
            PathDescriptor::collection(["src/main.rs"]),
            PathDescriptor::factory(|| PathDescriptor::collection(["src/main.rs"])),
            PathDescriptor::from(Url::from_file_path(&expected).expect("file url")),
            PathDescriptor::from(
                Url::from_file_path(&expected)
                    .expect("file url")
                    .to_string(),
            ),
        ];
        for descriptor in l_descriptors {
            let c_debug = format!("{descriptor:?}");
            assert_eq!(resolver.resolve(descriptor).expect(&c_debug), expected);
        }
    }

    #[test]
    fn multi_element_collection_rejected_for_single_path() {
        let (_tmp, resolver) = setup();
        let err = resolver
            .resolve(PathDescriptor::collection(["a", "b"]))
            .expect_err("must fail");
        assert!(matches!(err, FileOpsError::InvalidUserInput(_)));

        let err = resolver
            .resolve(PathDescriptor::Collection(vec![]))
            .expect_err("must fail");
        assert!(matches!(err, FileOpsError::InvalidUserInput(_)));
    }

    #[test]
    fn resolve_files_flattens_collections() {
        let (_tmp, resolver) = setup();
        let l_paths = resolver
            .resolve_files(PathDescriptor::collection([
                PathDescriptor::from("a"),
                PathDescriptor::collection(["b", "c"]),
                PathDescriptor::factory(|| PathDescriptor::from("d")),
            ]))
            .expect("resolve files");
        let l_expected: Vec<PathBuf> = ["a", "b", "c", "d"]
            .iter()
            .map(|n| resolver.base_dir().join(n))
            .collect();
        assert_eq!(l_paths, l_expected);
    }

    #[test]
    fn self_referencing_factory_terminates() {
        fn looping() -> PathDescriptor {
            PathDescriptor::factory(looping)
        }
        let (_tmp, resolver) = setup();
        let err = resolver.resolve(looping()).expect_err("must fail");
        assert!(matches!(err, FileOpsError::InvalidUserInput(_)));
    }

    #[test]
    fn validation_modes() {
        let (tmp, resolver) = setup();
        std::fs::write(tmp.path().join("f.txt"), "x").expect("write");
        std::fs::create_dir(tmp.path().join("d")).expect("mkdir");

        assert!(resolver.resolve_with("f.txt", EnumPathValidation::Exists).is_ok());
        assert!(resolver.resolve_with("d", EnumPathValidation::Directory).is_ok());
        assert!(resolver.resolve_with("f.txt", EnumPathValidation::File).is_ok());
        assert!(resolver.resolve_with("missing", EnumPathValidation::None).is_ok());

        let err = resolver
            .resolve_with("missing", EnumPathValidation::Exists)
            .expect_err("missing");
        assert!(matches!(err, FileOpsError::PathNotFound { .. }));

        let err = resolver
            .resolve_with("f.txt", EnumPathValidation::Directory)
            .expect_err("not a dir");
        assert!(matches!(
            err,
            FileOpsError::PathKindMismatch {
                expected: EnumPathValidation::Directory,
                ..
            }
        ));

        let err = resolver
            .resolve_with("d", EnumPathValidation::File)
            .expect_err("not a file");
        assert!(matches!(err, FileOpsError::PathKindMismatch { .. }));
        assert!(!tmp.path().join("missing").exists());
    }

    #[test]
    fn resolve_uri_keeps_foreign_schemes() {
        let (_tmp, resolver) = setup();
        let url = resolver
            .resolve_uri("https://example.com/repo/lib.zip")
            .expect("uri");
        assert_eq!(url.as_str(), "https://example.com/repo/lib.zip");

        let url = resolver.resolve_uri("lib/a.jar").expect("file uri");
        assert_eq!(url.scheme(), "file");
        assert_eq!(
            url.to_file_path().expect("path"),
            resolver.base_dir().join("lib").join("a.jar")
        );

        let err = resolver
            .resolve("https://example.com/x")
            .expect_err("not a file");
        assert!(matches!(err, FileOpsError::InvalidUserInput(_)));
    }

    #[test]
    fn relative_paths_against_base() {
        let (_tmp, resolver) = setup();
        assert_eq!(
            resolver.resolve_relative("src/a.rs").expect("relative"),
            PathBuf::from("src").join("a.rs").to_string_lossy()
        );
        let outside = resolver.base_dir().join("..").join("sibling");
        assert_eq!(
            resolver.resolve_relative(outside).expect("relative"),
            PathBuf::from("..").join("sibling").to_string_lossy()
        );
    }

    #[test]
    fn mkdir_is_idempotent_and_rejects_files() {
        let (tmp, resolver) = setup();
        let path_dir = resolver.mkdir("a/b/c").expect("mkdir");
        assert!(path_dir.is_dir());
        assert_eq!(resolver.mkdir("a/b/c").expect("mkdir again"), path_dir);

        std::fs::write(tmp.path().join("plain"), "x").expect("write");
        let err = resolver.mkdir("plain").expect_err("file target");
        assert!(matches!(err, FileOpsError::InvalidUserInput(_)));
        assert!(err.to_string().contains("points to an existing file"));
    }
}

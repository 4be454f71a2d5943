//! Copy execution: materialize a copy plan under a destination directory.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use tracing::{debug, warn};

use crate::copy_spec::{CopySpec, PlannedCopy};
use crate::report::{WorkResult, WorkResultBuilder};
use crate::resolve::{FileResolver, PathDescriptor};
use crate::spec::{EnumPathValidation, FileOpsError, Result, SpecCopyOptions};
use crate::util::{apply_file_metadata, join_relative, validate_destination_path_safety};

/// A copy specification bound to a destination.
#[derive(Debug, Clone)]
pub struct CopyAction {
    pub destination: PathDescriptor,
    pub spec: CopySpec,
    pub options: SpecCopyOptions,
}

impl CopyAction {
    pub fn new<D: Into<PathDescriptor>>(destination: D, spec: CopySpec) -> Self {
        Self {
            destination: destination.into(),
            spec,
            options: SpecCopyOptions::default(),
        }
    }

    pub fn with_options(mut self, options: SpecCopyOptions) -> Self {
        self.options = options;
        self
    }

    pub fn execute(&self, resolver: &FileResolver) -> Result<WorkResult> {
        copy_spec_into(resolver, self.destination.clone(), &self.spec, &self.options)
    }
}

enum EnumEntryOutcome {
    Written,
    Unchanged,
    DryRun,
}

/// Copy everything `spec` plans into `destination`.
///
/// Writes only entries whose destination is absent or holds different bytes.
/// Destination files not named by the plan are left alone.
///
/// Returns [`WorkResult`] when the run completes (with possible per-entry errors
/// stored in the result). Returns [`FileOpsError`] only for setup failures:
/// an unusable destination root or a spec that cannot be planned.
pub fn copy_spec_into<D: Into<PathDescriptor>>(
    resolver: &FileResolver,
    destination: D,
    spec: &CopySpec,
    spec_cp_options: &SpecCopyOptions,
) -> Result<WorkResult> {
    let path_dir_dst = resolver.resolve(destination)?;
    prepare_destination_root(&path_dir_dst, spec_cp_options.if_dry_run)?;

    let map_plan = spec.plan(resolver)?;
    let mut builder_result = WorkResultBuilder::default();
    builder_result.add_planned(map_plan.len() as u64);
    for c_warning in spec.source_diagnostics() {
        builder_result.add_warning(c_warning);
    }

    for (c_relative, planned) in &map_plan {
        let path_file_dst = join_relative(&path_dir_dst, c_relative);
        match copy_entry(planned, &path_file_dst, &path_dir_dst, spec_cp_options) {
            Ok(EnumEntryOutcome::Written) => builder_result.add_written(path_file_dst),
            Ok(EnumEntryOutcome::Unchanged) => builder_result.add_unchanged(),
            Ok(EnumEntryOutcome::DryRun) => builder_result.add_skipped(path_file_dst),
            Err(e) => {
                warn!(
                    source = %planned.details.display_name(),
                    destination = %path_file_dst.display(),
                    error = %e,
                    "copy entry failed"
                );
                builder_result.add_error(path_file_dst, e.to_string());
            }
        }
    }

    let result = builder_result.build();
    debug!(destination = %path_dir_dst.display(), "{}", result);
    Ok(result)
}

fn prepare_destination_root(path_dir_dst: &Path, if_dry_run: bool) -> Result<()> {
    match fs::symlink_metadata(path_dir_dst) {
        Ok(meta_dir_dst) => {
            if meta_dir_dst.file_type().is_symlink() {
                return Err(FileOpsError::invalid_input(format!(
                    "Destination root path must not be a symbolic link: {}",
                    path_dir_dst.display()
                )));
            }
            if !meta_dir_dst.is_dir() {
                return Err(FileOpsError::PathKindMismatch {
                    path: path_dir_dst.to_path_buf(),
                    expected: EnumPathValidation::Directory,
                });
            }
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            if if_dry_run {
                return Ok(());
            }
            fs::create_dir_all(path_dir_dst).map_err(|e| FileOpsError::io(path_dir_dst, e))
        }
        Err(e) => Err(FileOpsError::io(path_dir_dst, e)),
    }
}

fn copy_entry(
    planned: &PlannedCopy,
    path_file_dst: &Path,
    path_dir_dst: &Path,
    spec_cp_options: &SpecCopyOptions,
) -> Result<EnumEntryOutcome> {
    validate_destination_path_safety(path_file_dst, path_dir_dst)
        .map_err(FileOpsError::InvalidUserInput)?;

    let data = planned.content()?;
    if let Some(data_existing) = read_existing(path_file_dst)?
        && data_existing == data
    {
        return Ok(EnumEntryOutcome::Unchanged);
    }
    if spec_cp_options.if_dry_run {
        return Ok(EnumEntryOutcome::DryRun);
    }

    write_replacing(path_file_dst, &data)?;

    if spec_cp_options.if_preserve_metadata
        && !planned.is_filtered()
        && let Some(path_file_src) = planned.details.local_source()
    {
        apply_file_metadata(path_file_src, path_file_dst)
            .map_err(|e| FileOpsError::io(path_file_dst, e))?;
    }
    debug!(
        source = %planned.details.display_name(),
        destination = %path_file_dst.display(),
        "copied file"
    );
    Ok(EnumEntryOutcome::Written)
}

/// Write `data` to a temp file beside `path_file_dst` and rename it into place.
/// A read-only earlier copy does not block the rewrite.
fn write_replacing(path_file_dst: &Path, data: &[u8]) -> Result<()> {
    let path_parent_dst = path_file_dst.parent().ok_or_else(|| {
        FileOpsError::invalid_input(format!(
            "Copy destination has no parent directory: {}",
            path_file_dst.display()
        ))
    })?;
    fs::create_dir_all(path_parent_dst).map_err(|e| FileOpsError::io(path_parent_dst, e))?;

    let mut builder_tmp = tempfile::Builder::new();
    builder_tmp.prefix(".forgekit-");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        // Same default mode as a plain create; the umask still applies.
        builder_tmp.permissions(fs::Permissions::from_mode(0o666));
    }
    let mut file_tmp = builder_tmp
        .tempfile_in(path_parent_dst)
        .map_err(|e| FileOpsError::io(path_parent_dst, e))?;
    file_tmp
        .write_all(data)
        .map_err(|e| FileOpsError::io(path_file_dst, e))?;
    file_tmp
        .persist(path_file_dst)
        .map_err(|e| FileOpsError::io(path_file_dst, e.error))?;
    Ok(())
}

/// Current destination bytes; `None` when absent.
fn read_existing(path_file_dst: &Path) -> Result<Option<Vec<u8>>> {
    match fs::symlink_metadata(path_file_dst) {
        Ok(meta) if meta.is_dir() => Err(FileOpsError::invalid_input(format!(
            "Copy destination is an existing directory: {}",
            path_file_dst.display()
        ))),
        Ok(_) => fs::read(path_file_dst)
            .map(Some)
            .map_err(|e| FileOpsError::io(path_file_dst, e)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(FileOpsError::io(path_file_dst, e)),
    }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use super::{CopyAction, copy_spec_into};
    use crate::copy_spec::{ContentFilter, CopySpec};
    use crate::resolve::FileResolver;
    use crate::spec::{FileOpsError, SpecCopyOptions};

    fn write_text(path: &Path, txt: &str) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent");
        }
        std::fs::write(path, txt).expect("write text");
    }

    fn setup() -> (tempfile::TempDir, FileResolver) {
        let tmp = tempfile::tempdir().expect("tempdir");
        let resolver = FileResolver::new(tmp.path()).expect("resolver");
        (tmp, resolver)
    }

    #[test]
    fn copy_writes_then_reports_unchanged() {
        let (tmp, resolver) = setup();
        write_text(&tmp.path().join("src/a.txt"), "a");
        write_text(&tmp.path().join("src/sub/b.txt"), "b");

        let action = CopyAction::new("dst", CopySpec::new().from_path("src"));
        let result = action.execute(&resolver).expect("copy");
        assert!(result.did_work);
        assert_eq!(result.cnt_written, 2);
        assert_eq!(
            std::fs::read_to_string(tmp.path().join("dst/sub/b.txt")).expect("read"),
            "b"
        );

        let result = action.execute(&resolver).expect("copy again");
        assert!(!result.did_work);
        assert_eq!(result.cnt_unchanged, 2);
    }

    #[test]
    fn changed_source_overwrites_and_leaves_strangers() {
        let (tmp, resolver) = setup();
        write_text(&tmp.path().join("src/a.txt"), "old");
        write_text(&tmp.path().join("dst/stranger.txt"), "keep me");
        let spec = CopySpec::new().from_path("src");
        copy_spec_into(&resolver, "dst", &spec, &SpecCopyOptions::default()).expect("copy");

        write_text(&tmp.path().join("src/a.txt"), "new");
        let result =
            copy_spec_into(&resolver, "dst", &spec, &SpecCopyOptions::default()).expect("copy");
        assert_eq!(result.paths_touched, vec![tmp.path().join("dst/a.txt")]);
        assert_eq!(
            std::fs::read_to_string(tmp.path().join("dst/a.txt")).expect("read"),
            "new"
        );
        assert!(tmp.path().join("dst/stranger.txt").exists());
    }

    #[test]
    fn dry_run_never_writes() {
        let (tmp, resolver) = setup();
        write_text(&tmp.path().join("src/a.txt"), "a");
        let spec_cp_options = SpecCopyOptions {
            if_dry_run: true,
            ..SpecCopyOptions::default()
        };
        let result = copy_spec_into(
            &resolver,
            "dst",
            &CopySpec::new().from_path("src"),
            &spec_cp_options,
        )
        .expect("dry run");
        assert!(!result.did_work);
        assert_eq!(result.cnt_skipped, 1);
        assert_eq!(result.paths_pending, vec![tmp.path().join("dst/a.txt")]);
        assert!(!tmp.path().join("dst").exists());
    }

    #[test]
    fn filtered_content_is_compared_after_filtering() {
        let (tmp, resolver) = setup();
        write_text(&tmp.path().join("src/v.txt"), "version=@v@\n");
        let spec = CopySpec::new()
            .from_path("src")
            .filter(ContentFilter::replace_tokens([("v", "1.0")]));
        let result =
            copy_spec_into(&resolver, "dst", &spec, &SpecCopyOptions::default()).expect("copy");
        assert!(result.did_work);
        assert_eq!(
            std::fs::read_to_string(tmp.path().join("dst/v.txt")).expect("read"),
            "version=1.0\n"
        );
        let result =
            copy_spec_into(&resolver, "dst", &spec, &SpecCopyOptions::default()).expect("copy");
        assert!(!result.did_work);
    }

    #[test]
    fn destination_root_must_be_a_directory() {
        let (tmp, resolver) = setup();
        write_text(&tmp.path().join("src/a.txt"), "a");
        write_text(&tmp.path().join("dst"), "file");
        let err = copy_spec_into(
            &resolver,
            "dst",
            &CopySpec::new().from_path("src"),
            &SpecCopyOptions::default(),
        )
        .expect_err("file root");
        assert!(matches!(err, FileOpsError::PathKindMismatch { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn preserves_permissions_of_unfiltered_sources() {
        use std::os::unix::fs::PermissionsExt;

        let (tmp, resolver) = setup();
        let path_src = tmp.path().join("src/run.sh");
        write_text(&path_src, "#!/bin/sh\n");
        std::fs::set_permissions(&path_src, std::fs::Permissions::from_mode(0o755))
            .expect("chmod");
        copy_spec_into(
            &resolver,
            "dst",
            &CopySpec::new().from_path("src"),
            &SpecCopyOptions::default(),
        )
        .expect("copy");
        let n_mode = std::fs::metadata(tmp.path().join("dst/run.sh"))
            .expect("meta")
            .permissions()
            .mode();
        assert_eq!(n_mode & 0o777, 0o755);
    }

    #[cfg(unix)]
    #[test]
    fn read_only_copy_is_replaced_when_source_changes() {
        use std::os::unix::fs::PermissionsExt;

        let (tmp, resolver) = setup();
        let path_src = tmp.path().join("src/gen.txt");
        write_text(&path_src, "v1");
        std::fs::set_permissions(&path_src, std::fs::Permissions::from_mode(0o444))
            .expect("chmod");
        let spec = CopySpec::new().from_path("src");
        let result =
            copy_spec_into(&resolver, "out", &spec, &SpecCopyOptions::default()).expect("copy");
        assert!(result.did_work);
        let path_dst = tmp.path().join("out/gen.txt");
        let n_mode = std::fs::metadata(&path_dst).expect("meta").permissions().mode();
        assert_eq!(n_mode & 0o777, 0o444);

        std::fs::set_permissions(&path_src, std::fs::Permissions::from_mode(0o644))
            .expect("chmod");
        write_text(&path_src, "v2");
        std::fs::set_permissions(&path_src, std::fs::Permissions::from_mode(0o444))
            .expect("chmod");
        let result =
            copy_spec_into(&resolver, "out", &spec, &SpecCopyOptions::default()).expect("copy");
        assert!(result.did_work);
        assert_eq!(result.error_count(), 0);
        assert_eq!(std::fs::read_to_string(&path_dst).expect("read"), "v2");
        let l_names: Vec<String> = std::fs::read_dir(tmp.path().join("out"))
            .expect("read out")
            .map(|e| e.expect("entry").file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(l_names, vec!["gen.txt"]);
    }

    #[cfg(unix)]
    #[test]
    fn rejects_symlink_destination_root() {
        use std::os::unix::fs::symlink;

        let (tmp, resolver) = setup();
        write_text(&tmp.path().join("src/a.txt"), "a");
        std::fs::create_dir_all(tmp.path().join("dst_real")).expect("mkdir");
        symlink(tmp.path().join("dst_real"), tmp.path().join("dst_link")).expect("symlink");
        let err = copy_spec_into(
            &resolver,
            "dst_link",
            &CopySpec::new().from_path("src"),
            &SpecCopyOptions::default(),
        )
        .expect_err("symlink root");
        assert!(matches!(err, FileOpsError::InvalidUserInput(_)));
    }

    #[cfg(unix)]
    #[test]
    fn blocks_destination_symlink_escape() {
        use std::os::unix::fs::symlink;

        let (tmp, resolver) = setup();
        let outside: PathBuf = tmp.path().join("outside");
        write_text(&tmp.path().join("src/escape/file.txt"), "x");
        write_text(&tmp.path().join("src/ok.txt"), "ok");
        std::fs::create_dir_all(tmp.path().join("dst")).expect("create dst");
        std::fs::create_dir_all(&outside).expect("create outside");
        symlink(&outside, tmp.path().join("dst/escape")).expect("escape symlink");

        let result = copy_spec_into(
            &resolver,
            "dst",
            &CopySpec::new().from_path("src"),
            &SpecCopyOptions::default(),
        )
        .expect("copy returns result");
        assert_eq!(result.error_count(), 1);
        assert!(!outside.join("file.txt").exists());
        assert!(tmp.path().join("dst/ok.txt").exists());
    }
}

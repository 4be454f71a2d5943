use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::Arc;

use forgekit_io_fs::{
    CopySpec, EnumPathValidation, FileOperations, FileOpsError, PathDescriptor, SpecPatterns,
    TempDirScratchProvider,
};

fn write_text(path: &Path, txt: &str) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create parent");
    }
    std::fs::write(path, txt).expect("write text");
}

fn operations(root: &Path) -> FileOperations {
    FileOperations::new(root.join("project"))
        .expect("operations")
        .with_scratch_provider(Arc::new(TempDirScratchProvider::new(root.join("scratch"))))
}

#[test]
fn include_and_rename_copy_is_incremental() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let ops = operations(tmp.path());
    write_text(&tmp.path().join("project/src/x.txt"), "A");
    write_text(&tmp.path().join("project/src/y.log"), "B");

    let spec = ops
        .copy_spec()
        .from_path("src")
        .include("*.txt")
        .rename("x", "z");

    let result = ops.copy("out", &spec).expect("first copy");
    assert!(result.did_work);
    let l_names: Vec<String> = std::fs::read_dir(tmp.path().join("project/out"))
        .expect("read out")
        .map(|e| e.expect("entry").file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(l_names, vec!["z.txt"]);
    assert_eq!(
        std::fs::read_to_string(tmp.path().join("project/out/z.txt")).expect("read"),
        "A"
    );

    let result = ops.copy("out", &spec).expect("second copy");
    assert!(!result.did_work);
    assert_eq!(result.error_count(), 0);
}

#[test]
fn child_spec_overrides_parent_at_same_destination() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let ops = operations(tmp.path());
    write_text(&tmp.path().join("project/base/app.conf"), "base");
    write_text(&tmp.path().join("project/override/app.conf"), "override");

    let spec = CopySpec::new()
        .from_path("base")
        .with_child(CopySpec::new().from_path("override"));
    ops.copy("dist", &spec).expect("copy");
    assert_eq!(
        std::fs::read_to_string(tmp.path().join("project/dist/app.conf")).expect("read"),
        "override"
    );
}

#[test]
fn delete_existing_and_missing() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let ops = operations(tmp.path());
    write_text(&tmp.path().join("project/build/out.bin"), "x");
    write_text(&tmp.path().join("project/keep.txt"), "k");

    assert!(ops.delete(["build", "never-existed"]).expect("delete"));
    assert!(!tmp.path().join("project/build").exists());
    assert!(tmp.path().join("project/keep.txt").exists());
    assert!(!ops.delete(["build"]).expect("delete again"));
}

#[test]
fn descriptor_shapes_resolve_alike() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let ops = operations(tmp.path());
    let path_expected = ops.file("src/main/../lib.rs").expect("string");

    let path_base = tmp.path().join("project");
    let l_descriptors = vec![
        PathDescriptor::from("src/lib.rs"),
        PathDescriptor::segments(["src", "lib.rs"]),
        PathDescriptor::from(path_base.join("src/lib.rs")),
        PathDescriptor::from(url::Url::from_file_path(path_base.join("src/lib.rs")).expect("url")),
        PathDescriptor::collection(["src/lib.rs"]),
        PathDescriptor::factory(|| PathDescriptor::from("src/./lib.rs")),
    ];
    for descriptor in l_descriptors {
        assert_eq!(ops.file(descriptor).expect("resolve"), path_expected);
    }
}

#[test]
fn validation_failures_name_the_path() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let ops = operations(tmp.path());
    write_text(&tmp.path().join("project/file.txt"), "f");

    let err = ops
        .file_with("missing", EnumPathValidation::Exists)
        .expect_err("missing");
    assert!(matches!(err, FileOpsError::PathNotFound { .. }));
    assert!(err.to_string().contains("missing"));

    let err = ops
        .file_with("file.txt", EnumPathValidation::Directory)
        .expect_err("not a directory");
    assert!(matches!(err, FileOpsError::PathKindMismatch { .. }));

    ops.mkdir("made").expect("mkdir");
    ops.mkdir("made").expect("mkdir twice");
    assert!(matches!(
        ops.mkdir("file.txt"),
        Err(FileOpsError::InvalidUserInput(_))
    ));
}

#[test]
fn tree_patterns_exclude_wins() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let ops = operations(tmp.path());
    for c_name in ["a.txt", "secret.txt", "b.log"] {
        write_text(&tmp.path().join("project/in").join(c_name), c_name);
    }
    let tree = ops
        .file_tree("in")
        .expect("tree")
        .matching(&SpecPatterns::new().include("*.txt").exclude("secret.txt"))
        .expect("matching");
    assert_eq!(tree.relative_paths().expect("paths"), vec!["a.txt"]);
}

#[test]
fn archives_copy_like_directories() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let ops = operations(tmp.path());

    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let opts = zip::write::SimpleFileOptions::default();
    writer.start_file("lib/a.txt", opts).expect("start");
    writer.write_all(b"from zip").expect("write");
    let data_zip = writer.finish().expect("finish").into_inner();
    std::fs::create_dir_all(tmp.path().join("project")).expect("mkdir");
    std::fs::write(tmp.path().join("project/lib.zip"), data_zip).expect("write zip");

    let mut builder = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_gnu();
    header.set_size(8);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append_data(&mut header, "bin/tool.sh", &b"from tar"[..])
        .expect("append");
    let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    enc.write_all(&builder.into_inner().expect("tar")).expect("gzip");
    std::fs::write(tmp.path().join("project/tool.tar.gz"), enc.finish().expect("gzip finish"))
        .expect("write tgz");

    let tree_zip = ops.zip_tree("lib.zip").expect("zip tree");
    let tree_tar = ops.tar_tree("tool.tar.gz").expect("tar tree");
    let spec = CopySpec::new()
        .from_tree(tree_zip.clone())
        .with_child(CopySpec::new().from_tree(tree_tar).into_dir("tools"));
    let result = ops.copy("unpacked", &spec).expect("copy");
    assert!(result.did_work);
    assert_eq!(
        std::fs::read_to_string(tmp.path().join("project/unpacked/lib/a.txt")).expect("read"),
        "from zip"
    );
    assert_eq!(
        std::fs::read_to_string(tmp.path().join("project/unpacked/tools/bin/tool.sh"))
            .expect("read"),
        "from tar"
    );

    let path_first = tree_zip.files().expect("files")[0].file().expect("file");
    let path_again = tree_zip.files().expect("files")[0].file().expect("file");
    assert_eq!(path_first, path_again);
    assert!(path_first.starts_with(tmp.path().join("scratch")));
    assert!(!ops.copy("unpacked", &spec).expect("copy again").did_work);
}

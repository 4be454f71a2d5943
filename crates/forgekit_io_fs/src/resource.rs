//! Re-openable byte sources with transparent gzip/bzip2 decompression.

use std::fs::File;
use std::io::{BufRead, BufReader, Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bzip2::read::BzDecoder;
use flate2::read::GzDecoder;
use tracing::debug;
use url::Url;

use crate::spec::{EnumCompression, FileOpsError, Result};

/// Where the raw bytes of a resource come from.
#[derive(Debug, Clone)]
pub enum ResourceSource {
    File(PathBuf),
    Uri(Url),
    Bytes { name: String, data: Arc<[u8]> },
}

/// A byte source that can be opened any number of times.
///
/// When no codec is declared, the codec is picked from the source name's extension
/// and then from the stream's magic bytes.
#[derive(Debug, Clone)]
pub struct ReadableResource {
    source: ResourceSource,
    compression: Option<EnumCompression>,
}

impl ReadableResource {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Self {
        Self {
            source: ResourceSource::File(path.as_ref().to_path_buf()),
            compression: None,
        }
    }

    /// Only `file` URIs can be opened.
    pub fn from_uri(url: Url) -> Self {
        Self {
            source: ResourceSource::Uri(url),
            compression: None,
        }
    }

    pub fn from_bytes<S: Into<String>, B: Into<Vec<u8>>>(name: S, data: B) -> Self {
        let data: Vec<u8> = data.into();
        Self {
            source: ResourceSource::Bytes {
                name: name.into(),
                data: Arc::from(data),
            },
            compression: None,
        }
    }

    /// Declare the codec instead of detecting it.
    pub fn with_compression(mut self, compression: EnumCompression) -> Self {
        self.compression = Some(compression);
        self
    }

    pub fn source(&self) -> &ResourceSource {
        &self.source
    }

    /// Declared codec, or the one implied by the source name.
    pub fn declared_compression(&self) -> Option<EnumCompression> {
        self.compression
            .or_else(|| EnumCompression::from_file_name(&self.display_name()))
    }

    /// File name (or last URI segment) of the source.
    pub fn display_name(&self) -> String {
        match &self.source {
            ResourceSource::File(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
            ResourceSource::Uri(url) => url
                .path_segments()
                .and_then(|mut segments| segments.next_back())
                .filter(|s| !s.is_empty())
                .map(ToString::to_string)
                .unwrap_or_else(|| url.to_string()),
            ResourceSource::Bytes { name, .. } => name.clone(),
        }
    }

    /// Display name without its compression extension (`lib.tar.gz` -> `lib.tar`).
    pub fn base_name(&self) -> String {
        let c_name = self.display_name();
        let c_lower = c_name.to_ascii_lowercase();
        for c_ext in [".gz", ".bz2"] {
            if c_lower.ends_with(c_ext) {
                return c_name[..c_name.len() - c_ext.len()].to_string();
            }
        }
        for (c_ext, c_replacement) in [(".tgz", ".tar"), (".tbz2", ".tar"), (".tbz", ".tar")] {
            if c_lower.ends_with(c_ext) {
                return format!("{}{c_replacement}", &c_name[..c_name.len() - c_ext.len()]);
            }
        }
        c_name
    }

    /// Human-readable label for diagnostics.
    pub fn description(&self) -> String {
        let c_kind = match self.declared_compression() {
            Some(EnumCompression::Gzip) => "gzip resource",
            Some(EnumCompression::Bzip2) => "bzip2 resource",
            Some(EnumCompression::None) | None => "resource",
        };
        match &self.source {
            ResourceSource::File(path) => format!("{c_kind} '{}'", path.display()),
            ResourceSource::Uri(url) => format!("{c_kind} '{url}'"),
            ResourceSource::Bytes { name, .. } => format!("{c_kind} '{name}' (in memory)"),
        }
    }

    /// Open a fresh, decompressed stream from the start of the source.
    pub fn open(&self) -> Result<Box<dyn Read + Send>> {
        let reader_raw = self.open_raw()?;
        let compression = match self.declared_compression() {
            Some(v) => v,
            None => return sniff_and_wrap(reader_raw, &self.description()),
        };
        debug!(resource = %self.description(), ?compression, "opening resource");
        Ok(wrap_decoder(reader_raw, compression))
    }

    /// Read the whole decompressed content.
    pub fn read_all(&self) -> Result<Vec<u8>> {
        let mut reader = self.open()?;
        let mut buf = Vec::new();
        reader
            .read_to_end(&mut buf)
            .map_err(|e| FileOpsError::io(self.diagnostic_path(), e))?;
        Ok(buf)
    }

    fn open_raw(&self) -> Result<Box<dyn Read + Send>> {
        match &self.source {
            ResourceSource::File(path) => {
                let file = File::open(path).map_err(|e| FileOpsError::io(path, e))?;
                Ok(Box::new(file))
            }
            ResourceSource::Uri(url) => {
                if url.scheme() != "file" {
                    return Err(FileOpsError::invalid_input(format!(
                        "Cannot open resource '{url}': only file URIs are supported."
                    )));
                }
                let path = url.to_file_path().map_err(|_| {
                    FileOpsError::invalid_input(format!("Cannot convert URL '{url}' to a file."))
                })?;
                let file = File::open(&path).map_err(|e| FileOpsError::io(&path, e))?;
                Ok(Box::new(file))
            }
            ResourceSource::Bytes { data, .. } => Ok(Box::new(Cursor::new(SharedBytes(
                Arc::clone(data),
            )))),
        }
    }

    pub(crate) fn diagnostic_path(&self) -> PathBuf {
        match &self.source {
            ResourceSource::File(path) => path.clone(),
            ResourceSource::Uri(url) => PathBuf::from(url.as_str()),
            ResourceSource::Bytes { name, .. } => PathBuf::from(name),
        }
    }
}

#[derive(Debug, Clone)]
struct SharedBytes(Arc<[u8]>);

impl AsRef<[u8]> for SharedBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

fn wrap_decoder(
    reader: Box<dyn Read + Send>,
    compression: EnumCompression,
) -> Box<dyn Read + Send> {
    match compression {
        EnumCompression::None => reader,
        EnumCompression::Gzip => Box::new(GzDecoder::new(reader)),
        EnumCompression::Bzip2 => Box::new(BzDecoder::new(reader)),
    }
}

/// Peek at the first bytes without consuming them, then pick a decoder.
fn sniff_and_wrap(reader: Box<dyn Read + Send>, description: &str) -> Result<Box<dyn Read + Send>> {
    let mut reader_buffered = BufReader::new(reader);
    let head = reader_buffered
        .fill_buf()
        .map_err(|e| FileOpsError::io(description, e))?;
    let compression = EnumCompression::from_magic(head).unwrap_or(EnumCompression::None);
    debug!(resource = %description, ?compression, "detected resource compression");
    Ok(wrap_decoder(Box::new(reader_buffered), compression))
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};

    use bzip2::write::BzEncoder;
    use flate2::write::GzEncoder;

    use super::ReadableResource;
    use crate::spec::{EnumCompression, FileOpsError};

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut enc = GzEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(data).expect("gzip write");
        enc.finish().expect("gzip finish")
    }

    fn bzip2(data: &[u8]) -> Vec<u8> {
        let mut enc = BzEncoder::new(Vec::new(), bzip2::Compression::default());
        enc.write_all(data).expect("bzip2 write");
        enc.finish().expect("bzip2 finish")
    }

    fn read(resource: &ReadableResource) -> Vec<u8> {
        let mut buf = Vec::new();
        resource
            .open()
            .expect("open")
            .read_to_end(&mut buf)
            .expect("read");
        buf
    }

    #[test]
    fn extension_selects_codec() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path_gz = tmp.path().join("notes.txt.gz");
        let path_bz = tmp.path().join("notes.txt.bz2");
        std::fs::write(&path_gz, gzip(b"hello gz")).expect("write gz");
        std::fs::write(&path_bz, bzip2(b"hello bz")).expect("write bz");

        let res_gz = ReadableResource::from_file(&path_gz);
        assert_eq!(res_gz.declared_compression(), Some(EnumCompression::Gzip));
        assert_eq!(read(&res_gz), b"hello gz");
        assert_eq!(res_gz.base_name(), "notes.txt");

        let res_bz = ReadableResource::from_file(&path_bz);
        assert_eq!(read(&res_bz), b"hello bz");
        assert!(res_bz.description().starts_with("bzip2 resource"));
    }

    #[test]
    fn magic_bytes_used_without_extension() {
        let res = ReadableResource::from_bytes("payload", gzip(b"sniffed"));
        assert_eq!(res.declared_compression(), None);
        assert_eq!(read(&res), b"sniffed");

        let res = ReadableResource::from_bytes("payload", bzip2(b"sniffed bz"));
        assert_eq!(read(&res), b"sniffed bz");

        let res = ReadableResource::from_bytes("plain", b"raw text".to_vec());
        assert_eq!(read(&res), b"raw text");
    }

    #[test]
    fn declared_codec_overrides_name() {
        let res = ReadableResource::from_bytes("archive.bin", gzip(b"declared"))
            .with_compression(EnumCompression::Gzip);
        assert_eq!(read(&res), b"declared");

        let res = ReadableResource::from_bytes("looks.gz", b"not compressed".to_vec())
            .with_compression(EnumCompression::None);
        assert_eq!(read(&res), b"not compressed");
    }

    #[test]
    fn open_is_repeatable() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("a.txt");
        std::fs::write(&path, "same bytes").expect("write");
        let res = ReadableResource::from_file(&path);
        assert_eq!(read(&res), b"same bytes");
        assert_eq!(read(&res), b"same bytes");
        assert_eq!(res.read_all().expect("read all"), b"same bytes");
    }

    #[test]
    fn file_uri_opens_and_foreign_scheme_fails() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("u.txt");
        std::fs::write(&path, "via uri").expect("write");
        let url = url::Url::from_file_path(&path).expect("file url");
        assert_eq!(read(&ReadableResource::from_uri(url)), b"via uri");

        let url = url::Url::parse("https://example.com/x.tar.gz").expect("url");
        let res = ReadableResource::from_uri(url);
        assert_eq!(res.display_name(), "x.tar.gz");
        let err = res.open().map(|_| ()).expect_err("no network");
        assert!(matches!(err, FileOpsError::InvalidUserInput(_)));
    }

    #[test]
    fn missing_file_is_io_failure() {
        let res = ReadableResource::from_file("/definitely/not/here.gz");
        let err = res.open().map(|_| ()).expect_err("missing");
        assert!(matches!(err, FileOpsError::IoFailure { .. }));
    }
}

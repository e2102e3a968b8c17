//! # Archive Extraction
//!
//! Pulls a single entry out of an archive without decompressing the whole
//! thing to a working directory: ZIP via central-directory lookup, gzip+tar
//! via a streaming header walk.
//!
//! Also owns integrity validation: bytes are never accepted as an archive
//! (from cache or origin) without the format's magic signature and a
//! minimum plausible size.

use std::io::{Cursor, Read};
use std::path::Path;

use bytes::Bytes;
use flate2::read::GzDecoder;
use serde::Serialize;

use crate::error::FetchError;

/// ZIP local-file-header signature.
const ZIP_MAGIC: [u8; 4] = [0x50, 0x4b, 0x03, 0x04];
/// Gzip member header magic.
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Smallest byte count a real archive of each format can have. An empty zip
/// is 22 bytes (end-of-central-directory alone); a gzip member is at least
/// the 10-byte header plus the 8-byte trailer.
const ZIP_MIN_LEN: usize = 22;
const GZIP_MIN_LEN: usize = 18;

/// Supported archive formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArchiveFormat {
    Zip,
    TarGz,
}

impl ArchiveFormat {
    /// Guess the format a URL will serve. Catalog download URLs encode the
    /// format in their shape (`zipball` vs `tarball`, or a file extension).
    pub fn for_url(url: &str) -> ArchiveFormat {
        let path = url.split('?').next().unwrap_or(url).to_ascii_lowercase();
        if path.contains("tarball") || path.ends_with(".tar.gz") || path.ends_with(".tgz") {
            ArchiveFormat::TarGz
        } else {
            ArchiveFormat::Zip
        }
    }

    /// Check magic bytes and minimum plausible size. Bytes failing this are
    /// never cached and cached bytes failing it are purged.
    pub fn validate(&self, bytes: &[u8]) -> Result<(), FetchError> {
        match self {
            ArchiveFormat::Zip => {
                if bytes.len() < ZIP_MIN_LEN {
                    return Err(FetchError::CorruptArchive(format!(
                        "zip too small: {} bytes",
                        bytes.len()
                    )));
                }
                if bytes[..4] != ZIP_MAGIC {
                    return Err(FetchError::CorruptArchive(
                        "missing zip local-file-header signature".into(),
                    ));
                }
            }
            ArchiveFormat::TarGz => {
                if bytes.len() < GZIP_MIN_LEN {
                    return Err(FetchError::CorruptArchive(format!(
                        "gzip too small: {} bytes",
                        bytes.len()
                    )));
                }
                if bytes[..2] != GZIP_MAGIC {
                    return Err(FetchError::CorruptArchive("missing gzip magic".into()));
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArchiveFormat::Zip => write!(f, "zip"),
            ArchiveFormat::TarGz => write!(f, "tar-gz"),
        }
    }
}

/// Extract exactly one entry by path. Exact match only; no heuristics.
///
/// CPU-bound by the requested entry's size, not the whole archive. Callers
/// on an async runtime should wrap this in `spawn_blocking`.
pub fn extract_entry(
    format: ArchiveFormat,
    bytes: &Bytes,
    inner_path: &str,
) -> Result<Bytes, FetchError> {
    format.validate(bytes)?;
    match format {
        ArchiveFormat::Zip => extract_zip_entry(bytes, inner_path),
        ArchiveFormat::TarGz => extract_tar_gz_entry(bytes, inner_path),
    }
}

/// Locate the entry through the central directory and inflate only its
/// compressed stream.
fn extract_zip_entry(bytes: &Bytes, inner_path: &str) -> Result<Bytes, FetchError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes.as_ref()))
        .map_err(|e| FetchError::CorruptArchive(format!("unreadable zip: {e}")))?;

    let mut entry = match archive.by_name(inner_path) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => {
            return Err(FetchError::NotFound(inner_path.to_string()));
        }
        Err(e) => {
            return Err(FetchError::CorruptArchive(format!(
                "zip entry lookup failed: {e}"
            )));
        }
    };

    let mut out = Vec::with_capacity(entry.size() as usize);
    entry
        .read_to_end(&mut out)
        .map_err(|e| FetchError::CorruptArchive(format!("zip entry inflate failed: {e}")))?;
    Ok(Bytes::from(out))
}

/// Tar has no random-access index; decompress the stream and walk headers
/// sequentially, stopping at the first exact path match.
fn extract_tar_gz_entry(bytes: &Bytes, inner_path: &str) -> Result<Bytes, FetchError> {
    let decoder = GzDecoder::new(bytes.as_ref());
    let mut archive = tar::Archive::new(decoder);
    let wanted = Path::new(inner_path);

    let entries = archive
        .entries()
        .map_err(|e| FetchError::CorruptArchive(format!("unreadable tar: {e}")))?;

    for entry in entries {
        let mut entry =
            entry.map_err(|e| FetchError::CorruptArchive(format!("tar header walk failed: {e}")))?;
        let matches = entry
            .path()
            .map(|path| path == wanted)
            .unwrap_or(false);
        if !matches {
            continue;
        }

        let mut out = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut out)
            .map_err(|e| FetchError::CorruptArchive(format!("tar entry read failed: {e}")))?;
        return Ok(Bytes::from(out));
    }

    Err(FetchError::NotFound(inner_path.to_string()))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;

    pub(crate) fn build_zip(entries: &[(&str, &[u8])]) -> Bytes {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            let options = zip::write::SimpleFileOptions::default()
                .compression_method(zip::CompressionMethod::Deflated);
            for (name, data) in entries {
                writer.start_file(*name, options).unwrap();
                writer.write_all(data).unwrap();
            }
            writer.finish().unwrap();
        }
        Bytes::from(cursor.into_inner())
    }

    pub(crate) fn build_tar_gz(entries: &[(&str, &[u8])]) -> Bytes {
        let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        let encoder = builder.into_inner().unwrap();
        Bytes::from(encoder.finish().unwrap())
    }

    #[test]
    fn url_format_detection() {
        assert_eq!(
            ArchiveFormat::for_url("https://host/repo/archive/v1.zip"),
            ArchiveFormat::Zip
        );
        assert_eq!(
            ArchiveFormat::for_url("https://host/api/v1/repos/o/r/tarball/v1"),
            ArchiveFormat::TarGz
        );
        assert_eq!(
            ArchiveFormat::for_url("https://host/r/archive/main.tar.gz?token=x"),
            ArchiveFormat::TarGz
        );
    }

    #[test]
    fn validation_rejects_garbage_and_truncation() {
        assert!(ArchiveFormat::Zip.validate(b"not a zip at all not a zip").is_err());
        assert!(ArchiveFormat::Zip.validate(b"PK\x03\x04").is_err());
        assert!(ArchiveFormat::TarGz.validate(b"\x1f\x8b").is_err());
        assert!(
            ArchiveFormat::TarGz
                .validate(b"plainly not gzip, long enough though")
                .is_err()
        );

        let zip = build_zip(&[("a.txt", b"hello")]);
        assert!(ArchiveFormat::Zip.validate(&zip).is_ok());
        let tgz = build_tar_gz(&[("a.txt", b"hello")]);
        assert!(ArchiveFormat::TarGz.validate(&tgz).is_ok());
    }

    #[test]
    fn zip_extracts_exactly_one_entry() {
        let entries: Vec<(String, Vec<u8>)> = (0..50)
            .map(|i| (format!("book-{i:02}.usfm"), format!("content {i}").into_bytes()))
            .collect();
        let refs: Vec<(&str, &[u8])> = entries
            .iter()
            .map(|(n, d)| (n.as_str(), d.as_slice()))
            .collect();
        let zip = build_zip(&refs);

        let got = extract_entry(ArchiveFormat::Zip, &zip, "book-31.usfm").unwrap();
        assert_eq!(got.as_ref(), b"content 31");
    }

    #[test]
    fn zip_missing_entry_is_not_found() {
        let zip = build_zip(&[("present.txt", b"here")]);
        match extract_entry(ArchiveFormat::Zip, &zip, "absent.txt") {
            Err(FetchError::NotFound(path)) => assert_eq!(path, "absent.txt"),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn zip_lookup_is_exact_match_only() {
        let zip = build_zip(&[("dir/51-GEN.usfm", b"in dir")]);
        assert!(matches!(
            extract_entry(ArchiveFormat::Zip, &zip, "51-GEN.usfm"),
            Err(FetchError::NotFound(_))
        ));
        assert_eq!(
            extract_entry(ArchiveFormat::Zip, &zip, "dir/51-GEN.usfm")
                .unwrap()
                .as_ref(),
            b"in dir"
        );
    }

    #[test]
    fn tar_gz_walks_to_the_entry() {
        let tgz = build_tar_gz(&[
            ("first.usfm", b"one".as_slice()),
            ("second.usfm", b"two".as_slice()),
            ("third.usfm", b"three".as_slice()),
        ]);
        let got = extract_entry(ArchiveFormat::TarGz, &tgz, "second.usfm").unwrap();
        assert_eq!(got.as_ref(), b"two");
    }

    #[test]
    fn tar_gz_missing_entry_is_not_found() {
        let tgz = build_tar_gz(&[("only.usfm", b"x")]);
        assert!(matches!(
            extract_entry(ArchiveFormat::TarGz, &tgz, "missing.usfm"),
            Err(FetchError::NotFound(_))
        ));
    }

    #[test]
    fn corrupt_bytes_never_extract() {
        let garbage = Bytes::from_static(b"PK\x03\x04 but then it all goes wrong........");
        assert!(matches!(
            extract_entry(ArchiveFormat::Zip, &garbage, "a"),
            Err(FetchError::CorruptArchive(_))
        ));
    }
}

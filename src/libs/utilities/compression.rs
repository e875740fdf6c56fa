//! # Archive Resolver
//!
//! Classifies fetched payloads by their content (magic bytes), never by file name, and
//! extracts them. The format is a tagged variant and extraction is a single dispatch over
//! it; every extraction reports the [`ExtractionStrategy`] that actually produced output.
//!
//! xz payloads get special treatment. A release `.tar.xz` can be consumed two ways, so
//! extraction first tries raw decompression to a fixed output name and keeps the result
//! only if it is a usable executable; otherwise the same bytes are unpacked as a tar stream.

use crate::schemas::errors::ProvisionError;
use crate::{log_debug, log_info};
use bzip2::read::BzDecoder;
use colored::Colorize;
use flate2::read::GzDecoder;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tar::Archive;
use xz2::read::XzDecoder;
use zip::ZipArchive;

const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
const XZ_MAGIC: &[u8] = &[0xfd, b'7', b'z', b'X', b'Z', 0x00];
const BZIP2_MAGIC: &[u8] = b"BZh";
const ZIP_MAGIC: &[u8] = &[b'P', b'K', 0x03, 0x04];
/// POSIX tar puts "ustar" at byte offset 257 of the first header block.
const USTAR_OFFSET: usize = 257;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    GzipTar,
    XzTar,
    RawXz,
    Bzip2Tar,
    Zip,
    /// Not a recognised container; the payload itself is the candidate executable.
    Unknown,
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ArchiveFormat::GzipTar => "gzip-tar",
            ArchiveFormat::XzTar => "xz-tar",
            ArchiveFormat::RawXz => "raw-xz",
            ArchiveFormat::Bzip2Tar => "bzip2-tar",
            ArchiveFormat::Zip => "zip",
            ArchiveFormat::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionStrategy {
    TarGz,
    RawXz,
    TarXz,
    TarBz2,
    Zip,
    Passthrough,
}

impl fmt::Display for ExtractionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExtractionStrategy::TarGz => "tar-gz",
            ExtractionStrategy::RawXz => "raw-xz",
            ExtractionStrategy::TarXz => "tar-xz",
            ExtractionStrategy::TarBz2 => "tar-bz2",
            ExtractionStrategy::Zip => "zip",
            ExtractionStrategy::Passthrough => "passthrough",
        };
        write!(f, "{}", s)
    }
}

/// Result of [`extract`].
#[derive(Debug)]
pub struct Extraction {
    /// Directory holding extracted files; the binary locator searches here.
    pub dir: PathBuf,
    pub strategy: ExtractionStrategy,
    /// Set when the strategy yields exactly one file (raw xz, passthrough).
    pub direct_candidate: Option<PathBuf>,
}

/// Decides the container format from the first bytes of the payload.
pub fn classify(bytes: &[u8]) -> ArchiveFormat {
    if bytes.starts_with(GZIP_MAGIC) {
        ArchiveFormat::GzipTar
    } else if bytes.starts_with(XZ_MAGIC) {
        if xz_wraps_tar(bytes) {
            ArchiveFormat::XzTar
        } else {
            ArchiveFormat::RawXz
        }
    } else if bytes.starts_with(BZIP2_MAGIC) {
        ArchiveFormat::Bzip2Tar
    } else if bytes.starts_with(ZIP_MAGIC) {
        ArchiveFormat::Zip
    } else {
        ArchiveFormat::Unknown
    }
}

/// Peeks at the first decompressed tar header block.
fn xz_wraps_tar(bytes: &[u8]) -> bool {
    let mut head = Vec::with_capacity(512);
    let mut decoder = XzDecoder::new(bytes).take(512);
    if decoder.read_to_end(&mut head).is_err() {
        return false;
    }
    head.len() >= USTAR_OFFSET + 5 && &head[USTAR_OFFSET..USTAR_OFFSET + 5] == b"ustar"
}

/// Whether `path` looks like something that can be executed directly: a native
/// executable (ELF, Mach-O, PE) or a script with a `#!` line.
pub fn is_usable_binary(path: &Path) -> bool {
    let Ok(bytes) = fs::read(path) else {
        return false;
    };
    if bytes.is_empty() {
        return false;
    }
    if bytes.starts_with(b"#!") {
        return true;
    }
    matches!(
        goblin::Object::parse(&bytes),
        Ok(goblin::Object::Elf(_)) | Ok(goblin::Object::Mach(_)) | Ok(goblin::Object::PE(_))
    )
}

/// Extracts `artifact` (already verified) into `<work_dir>/extracted`.
///
/// `raw_output_name` is the fixed file name used when a strategy produces a single file.
pub fn extract(
    format: ArchiveFormat,
    artifact: &Path,
    work_dir: &Path,
    raw_output_name: &str,
) -> Result<Extraction, ProvisionError> {
    // Everything lands under the scratch dir; the caller owns its cleanup.
    let dir = work_dir.join("extracted");
    fs::create_dir_all(&dir).map_err(|e| ProvisionError::io("creating extraction dir", e))?;
    log_debug!(
        "[ArchiveResolver] Extracting {} payload {} into {}",
        format.to_string().magenta(),
        artifact.display(),
        dir.display()
    );

    let extraction = match format {
        ArchiveFormat::GzipTar => {
            let file = open(artifact)?;
            unpack_tar(GzDecoder::new(file), &dir, format)?;
            Extraction {
                dir,
                strategy: ExtractionStrategy::TarGz,
                direct_candidate: None,
            }
        }
        ArchiveFormat::Bzip2Tar => {
            let file = open(artifact)?;
            unpack_tar(BzDecoder::new(file), &dir, format)?;
            Extraction {
                dir,
                strategy: ExtractionStrategy::TarBz2,
                direct_candidate: None,
            }
        }
        ArchiveFormat::Zip => {
            let file = open(artifact)?;
            let mut archive = ZipArchive::new(file)
                .map_err(|e| ProvisionError::Format(format!("zip: {}", e)))?;
            archive
                .extract(&dir)
                .map_err(|e| ProvisionError::Format(format!("zip: {}", e)))?;
            Extraction {
                dir,
                strategy: ExtractionStrategy::Zip,
                direct_candidate: None,
            }
        }
        ArchiveFormat::RawXz => {
            let out = dir.join(raw_output_name);
            decompress_raw_xz(artifact, &out)
                .map_err(|e| ProvisionError::Format(format!("raw xz: {}", e)))?;
            Extraction {
                dir,
                strategy: ExtractionStrategy::RawXz,
                direct_candidate: Some(out),
            }
        }
        ArchiveFormat::XzTar => extract_xz_with_fallback(artifact, dir, raw_output_name)?,
        // Nothing to unpack: the artifact is offered to the locator as is.
        ArchiveFormat::Unknown => Extraction {
            dir,
            strategy: ExtractionStrategy::Passthrough,
            direct_candidate: Some(artifact.to_path_buf()),
        },
    };

    log_info!(
        "[ArchiveResolver] {} payload extracted via {}",
        format,
        extraction.strategy.to_string().green()
    );
    Ok(extraction)
}

fn extract_xz_with_fallback(
    artifact: &Path,
    dir: PathBuf,
    raw_output_name: &str,
) -> Result<Extraction, ProvisionError> {
    // First try the whole stream as one file.
    let out = dir.join(raw_output_name);
    let raw_attempt = decompress_raw_xz(artifact, &out);
    match raw_attempt {
        Ok(()) if is_usable_binary(&out) => {
            return Ok(Extraction {
                dir,
                strategy: ExtractionStrategy::RawXz,
                direct_candidate: Some(out),
            });
        }
        Ok(()) => log_debug!(
            "[ArchiveResolver] Raw xz output is not an executable, falling back to tar-xz"
        ),
        Err(ref e) => log_debug!(
            "[ArchiveResolver] Raw xz decompression failed ({}), falling back to tar-xz",
            e
        ),
    }
    // Don't let a half-useful raw output shadow files from the tar fallback.
    if out.exists() {
        fs::remove_file(&out).map_err(|e| ProvisionError::io("discarding raw xz output", e))?;
    }

    let file = open(artifact)?;
    unpack_tar(XzDecoder::new(file), &dir, ArchiveFormat::XzTar).map_err(|tar_err| {
        let raw = match raw_attempt {
            Ok(()) => "raw output not executable".to_string(),
            Err(e) => e.to_string(),
        };
        ProvisionError::Format(format!(
            "xz payload: raw decompression ({}) and tar extraction ({}) both failed",
            raw, tar_err
        ))
    })?;
    Ok(Extraction {
        dir,
        strategy: ExtractionStrategy::TarXz,
        direct_candidate: None,
    })
}

fn open(path: &Path) -> Result<File, ProvisionError> {
    File::open(path).map_err(|e| ProvisionError::io(format!("opening {}", path.display()), e))
}

fn unpack_tar<R: Read>(reader: R, dest: &Path, format: ArchiveFormat) -> Result<(), ProvisionError> {
    let mut archive = Archive::new(reader);
    archive
        .unpack(dest)
        .map_err(|e| ProvisionError::Format(format!("{}: {}", format, e)))
}

fn decompress_raw_xz(src: &Path, dest: &Path) -> io::Result<()> {
    let mut decoder = XzDecoder::new(File::open(src)?);
    let mut out = File::create(dest)?;
    io::copy(&mut decoder, &mut out)?;
    Ok(())
}

#[cfg(test)]
pub mod testing {
    //! Builders for in-memory archive payloads.

    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;
    use xz2::write::XzEncoder;

    /// Tar stream holding the given `(path, mode, contents)` files.
    pub fn tar_bytes(files: &[(&str, u32, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (path, mode, data) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(*mode);
            header.set_cksum();
            builder.append_data(&mut header, path, *data).unwrap();
        }
        builder.into_inner().unwrap()
    }

    pub fn gzip(data: &[u8]) -> Vec<u8> {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    pub fn xz(data: &[u8]) -> Vec<u8> {
        let mut enc = XzEncoder::new(Vec::new(), 6);
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    pub const SCRIPT: &[u8] = b"#!/bin/sh\necho \"tool 1.0 usage\"\nexit 1\n";
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn classification_ignores_file_names() {
        let tgz = gzip(&tar_bytes(&[("tool/bin/tool", 0o755, SCRIPT)]));
        let txz = xz(&tar_bytes(&[("tool", 0o755, SCRIPT)]));
        assert_eq!(classify(&tgz), ArchiveFormat::GzipTar);
        assert_eq!(classify(&txz), ArchiveFormat::XzTar);
        assert_eq!(classify(&xz(SCRIPT)), ArchiveFormat::RawXz);
        assert_eq!(classify(b"BZh91AY&SY"), ArchiveFormat::Bzip2Tar);
        assert_eq!(classify(b"PK\x03\x04rest"), ArchiveFormat::Zip);
        assert_eq!(classify(SCRIPT), ArchiveFormat::Unknown);
    }

    #[test]
    fn gzip_tar_named_xz_still_extracts_as_gzip() {
        let work = tempfile::tempdir().unwrap();
        let artifact = work.path().join("tool.xz");
        fs::write(&artifact, gzip(&tar_bytes(&[("pkg/tool", 0o755, SCRIPT)]))).unwrap();

        let bytes = fs::read(&artifact).unwrap();
        let format = classify(&bytes);
        assert_eq!(format, ArchiveFormat::GzipTar);
        let ex = extract(format, &artifact, work.path(), "tool").unwrap();
        assert_eq!(ex.strategy, ExtractionStrategy::TarGz);
        assert!(ex.dir.join("pkg/tool").is_file());
    }

    #[test]
    fn xz_tar_falls_back_to_tar_and_reports_it() {
        let work = tempfile::tempdir().unwrap();
        let artifact = work.path().join("download");
        fs::write(&artifact, xz(&tar_bytes(&[("bin/tool", 0o755, SCRIPT)]))).unwrap();

        let ex = extract(ArchiveFormat::XzTar, &artifact, work.path(), "tool").unwrap();
        assert_eq!(ex.strategy, ExtractionStrategy::TarXz);
        assert!(ex.direct_candidate.is_none());
        assert!(ex.dir.join("bin/tool").is_file());
        // The rejected raw output must not linger next to the real files.
        assert!(!ex.dir.join("tool").exists());
    }

    #[test]
    fn xz_holding_an_executable_keeps_raw_strategy() {
        let work = tempfile::tempdir().unwrap();
        let artifact = work.path().join("download");
        fs::write(&artifact, xz(SCRIPT)).unwrap();

        let ex = extract(ArchiveFormat::XzTar, &artifact, work.path(), "tool").unwrap();
        assert_eq!(ex.strategy, ExtractionStrategy::RawXz);
        assert_eq!(fs::read(ex.direct_candidate.unwrap()).unwrap(), SCRIPT);
    }

    #[test]
    fn corrupt_gzip_is_a_format_error() {
        let work = tempfile::tempdir().unwrap();
        let artifact = work.path().join("download");
        fs::write(&artifact, [0x1f, 0x8b, 0x00, 0x01, 0x02]).unwrap();
        let err = extract(ArchiveFormat::GzipTar, &artifact, work.path(), "tool").unwrap_err();
        assert_eq!(err.kind(), "FormatError");
    }

    #[test]
    fn usable_binary_detection() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("s");
        let text = dir.path().join("t");
        fs::write(&script, SCRIPT).unwrap();
        fs::write(&text, b"just some notes").unwrap();
        assert!(is_usable_binary(&script));
        assert!(!is_usable_binary(&text));
        assert!(!is_usable_binary(&dir.path().join("missing")));
    }
}

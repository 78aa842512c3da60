// src/package/reader.rs
//! Package reader: package to output directory

use super::pipeline::{self, Source};
use crate::codec::{self, CodecReader};
use crate::config::PackageDescriptor;
use crate::error::{CryptoError, Error, Result};
use crate::extension::Compression;
use crate::gpg::{DecryptionKeys, KeySource};
use crate::hash::CHUNK_SIZE;
use crate::path;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use tracing::{debug, info};

/// Totals for a finished unpack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UnpackSummary {
    pub entries: usize,
    pub bytes: u64,
}

/// Extracts a package into a directory
pub struct PackageReader {
    descriptor: PackageDescriptor,
}

impl PackageReader {
    pub fn new(descriptor: PackageDescriptor) -> Self {
        Self { descriptor }
    }

    pub fn descriptor(&self) -> &PackageDescriptor {
        &self.descriptor
    }

    fn decryption_keys(&self) -> Result<Option<DecryptionKeys>> {
        let Some(encryption) = &self.descriptor.encryption else {
            return Ok(None);
        };

        match &encryption.key {
            KeySource::File(path) => {
                DecryptionKeys::load(path, &encryption.passphrase).map(Some)
            }
            KeySource::Lookup { identity, .. } => Err(CryptoError::MissingKeyMaterial(format!(
                "a keyserver only publishes public keys; a secret key file is needed to decrypt for {identity}"
            ))
            .into()),
        }
    }

    fn open(&self) -> Result<CodecReader> {
        let keys = self.decryption_keys()?;
        let source = Source::open(self.descriptor.path.as_deref())?;

        match self.descriptor.compression {
            Compression::Zip => CodecReader::zip(pipeline::seekable_payload(source, keys)?),
            compression => CodecReader::tar(pipeline::input_stream(source, keys)?, compression),
        }
    }

    /// Extract every entry into `out_dir`, creating it if needed
    ///
    /// Existing files are never replaced. Entries whose names would land
    /// outside `out_dir` are rejected.
    pub fn unpack(&self, out_dir: &Path) -> Result<UnpackSummary> {
        let reader = self.open()?;
        fs::create_dir_all(out_dir).map_err(|e| {
            Error::IoError(format!("failed to create {}: {e}", out_dir.display()))
        })?;

        let mut summary = UnpackSummary::default();
        reader.read_entries(|header, body| {
            let target = path::safe_join(out_dir, &header.name)?;
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| {
                    Error::IoError(format!("failed to create {}: {e}", parent.display()))
                })?;
            }

            info!("Unpacking '{}'", header.name);
            let mut file = create_exclusive(&target, header.mode)?;
            summary.bytes += copy_out(body, &mut file, &entry_label(&target))?;
            summary.entries += 1;
            Ok(())
        })?;

        info!(
            "Unpacked {} files ({} bytes) from {} into {}",
            summary.entries,
            summary.bytes,
            self.descriptor.location(),
            out_dir.display()
        );
        Ok(summary)
    }
}

fn entry_label(target: &Path) -> String {
    target.display().to_string()
}

fn create_exclusive(target: &Path, mode: u32) -> Result<File> {
    let mode = if mode & 0o777 == 0 { 0o644 } else { mode & 0o7777 };
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(mode)
        .open(target)
        .map_err(|e| match e.kind() {
            io::ErrorKind::AlreadyExists => Error::FileAlreadyExists(target.to_path_buf()),
            _ => Error::IoError(format!("failed to create {}: {e}", target.display())),
        })
}

/// Stream the current entry into `file` in fixed-size chunks
fn copy_out<R: Read + ?Sized>(entry: &mut R, file: &mut File, label: &str) -> Result<u64> {
    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut total = 0u64;

    loop {
        let read = match entry.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(codec::read_error(e, label)),
        };

        let written = file
            .write(&buffer[..read])
            .map_err(|e| Error::IoError(format!("failed to write {label}: {e}")))?;
        if written != read {
            return Err(Error::ShortWrite {
                path: label.to_string(),
                requested: read,
                written,
            });
        }
        total += written as u64;
    }

    file.flush()?;
    debug!("wrote {} bytes to {}", total, label);
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FormatError;
    use tempfile::TempDir;

    #[test]
    fn test_empty_stream_is_malformed() {
        let dir = TempDir::new().unwrap();
        let package = dir.path().join("empty.tar.gz");
        fs::write(&package, b"").unwrap();

        let reader =
            PackageReader::new(PackageDescriptor::plain(Some(package), Compression::TarGz));
        assert!(matches!(
            reader.unpack(&dir.path().join("out")),
            Err(Error::Format(FormatError::MalformedArchive(_)))
        ));
    }

    #[test]
    fn test_zip_garbage_is_malformed() {
        let dir = TempDir::new().unwrap();
        let package = dir.path().join("junk.zip");
        fs::write(&package, b"this is not a zip archive").unwrap();

        let reader = PackageReader::new(PackageDescriptor::plain(Some(package), Compression::Zip));
        assert!(matches!(
            reader.unpack(&dir.path().join("out")),
            Err(Error::Format(FormatError::MalformedArchive(_)))
        ));
    }

    #[test]
    fn test_create_exclusive_keeps_existing() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("a.csv");
        fs::write(&target, "original").unwrap();
        assert!(matches!(
            create_exclusive(&target, 0o644),
            Err(Error::FileAlreadyExists(_))
        ));
        assert_eq!(fs::read_to_string(&target).unwrap(), "original");
    }

    #[test]
    fn test_create_exclusive_applies_mode() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("b.csv");
        create_exclusive(&target, 0o600).unwrap();
        let mode = std::os::unix::fs::PermissionsExt::mode(&fs::metadata(&target).unwrap().permissions());
        assert_eq!(mode & 0o777, 0o600);
    }
}

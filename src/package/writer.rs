// src/package/writer.rs
//! Package writer: data directory to package

use super::pipeline::{OutputLayer, Sink};
use crate::codec::{CodecWriter, EntryHeader};
use crate::config::PackageDescriptor;
use crate::error::{Error, FormatError, Result};
use crate::gpg::{self, EncryptingWriter};
use crate::hash::CHUNK_SIZE;
use crate::path;
use sequoia_openpgp::Cert;
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::UNIX_EPOCH;
use tracing::{debug, info};
use walkdir::WalkDir;

/// Totals for a finished pack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PackSummary {
    pub entries: usize,
    pub bytes: u64,
}

/// Writes a data directory into a package
pub struct PackageWriter {
    descriptor: PackageDescriptor,
}

impl PackageWriter {
    pub fn new(descriptor: PackageDescriptor) -> Self {
        Self { descriptor }
    }

    pub fn descriptor(&self) -> &PackageDescriptor {
        &self.descriptor
    }

    /// Pack every file under `data_dir`
    ///
    /// On failure a partially written package file is removed.
    pub fn pack(&self, data_dir: &Path) -> Result<PackSummary> {
        if !self.descriptor.compression.can_write() {
            return Err(FormatError::WriteUnsupported(self.descriptor.compression).into());
        }

        let recipient = match &self.descriptor.encryption {
            Some(encryption) => Some(gpg::load_public_key(&encryption.key)?),
            None => None,
        };

        let mut sink = Sink::create(self.descriptor.path.as_deref())?;
        let result = self.write_package(&mut sink, recipient.as_ref(), data_dir);

        match result {
            Ok(summary) => {
                sink.finish()?;
                info!(
                    "Packed {} files ({} bytes) into {}",
                    summary.entries,
                    summary.bytes,
                    self.descriptor.location()
                );
                Ok(summary)
            }
            Err(e) => {
                sink.discard();
                Err(e)
            }
        }
    }

    fn write_package(
        &self,
        sink: &mut Sink,
        recipient: Option<&Cert>,
        data_dir: &Path,
    ) -> Result<PackSummary> {
        let layer = match recipient {
            Some(cert) => OutputLayer::Encrypted(EncryptingWriter::new(sink, cert)?),
            None => OutputLayer::Plain(sink),
        };
        debug!(
            "assembled pipeline: {} -> {} -> {}",
            self.descriptor.compression,
            layer.describe(),
            self.descriptor.location()
        );

        let mut codec = CodecWriter::new(self.descriptor.compression, layer)?;
        let summary = write_entries(&mut codec, data_dir)?;
        debug!("closing archive after {} entries", codec.entries());
        let layer = codec.finish()?;
        layer.finish()?;
        Ok(summary)
    }
}

fn walk_error(data_dir: &Path, err: walkdir::Error) -> Error {
    Error::IoError(format!("failed to walk {}: {err}", data_dir.display()))
}

/// Write one entry per data file, in sorted path order
fn write_entries<W: Write>(codec: &mut CodecWriter<W>, data_dir: &Path) -> Result<PackSummary> {
    let mut summary = PackSummary::default();

    for entry in WalkDir::new(data_dir).sort_by_file_name() {
        let entry = entry.map_err(|e| walk_error(data_dir, e))?;
        let file_type = entry.file_type();
        if file_type.is_dir() {
            continue;
        }

        let file_path = entry.path();
        if !file_type.is_file() {
            return Err(FormatError::UnexpectedFileType(format!(
                "not a regular file: {}",
                file_path.display()
            ))
            .into());
        }
        if file_path.extension().is_none_or(|ext| ext != "csv") {
            return Err(FormatError::UnexpectedFileType(format!(
                "non-csv file found: {}",
                file_path.display()
            ))
            .into());
        }

        let name = path::entry_name(data_dir, file_path).ok_or_else(|| {
            Error::IoError(format!("{} is outside {}", file_path.display(), data_dir.display()))
        })?;
        let metadata = entry.metadata().map_err(|e| walk_error(data_dir, e))?;
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let header = EntryHeader::new(&name, metadata.permissions().mode() & 0o7777, metadata.len())
            .with_mtime(mtime);

        info!("Writing '{}' to data package", name);
        codec.write_entry_header(&header)?;

        let mut file = File::open(file_path).map_err(|e| {
            Error::IoError(format!("failed to open {}: {e}", file_path.display()))
        })?;
        summary.bytes += copy_into(&mut file, codec, &name)?;
        summary.entries += 1;
    }

    Ok(summary)
}

/// Stream `reader` into the current entry in fixed-size chunks
fn copy_into<R: Read, W: Write>(
    reader: &mut R,
    codec: &mut CodecWriter<W>,
    name: &str,
) -> Result<u64> {
    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut total = 0u64;

    loop {
        let read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::IoError(format!("failed to read {name}: {e}"))),
        };

        let written = codec.write(&buffer[..read])?;
        if written != read {
            return Err(Error::ShortWrite {
                path: name.to_string(),
                requested: read,
                written,
            });
        }
        total += written as u64;
    }

    Ok(total)
}

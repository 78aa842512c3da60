// src/codec/zipfile.rs
//! Zip archives
//!
//! The zip central directory lives at the end of the archive, so writing
//! spools into an anonymous temporary file and copies the finished archive
//! into the real sink on close; reading needs a seekable file.

use super::EntryHeader;
use crate::error::{FormatError, Result};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Default mode for zip entries that carry no unix permissions
const DEFAULT_MODE: u32 = 0o644;

fn zip_io_error(err: zip::result::ZipError) -> io::Error {
    io::Error::other(err)
}

/// Writes zip entries into a spool file, then into `inner` on finish
pub struct ZipSpoolWriter<W: Write> {
    zip: ZipWriter<File>,
    inner: W,
}

impl<W: Write> ZipSpoolWriter<W> {
    pub fn new(inner: W) -> io::Result<Self> {
        let spool = tempfile::tempfile()?;
        Ok(Self {
            zip: ZipWriter::new(spool),
            inner,
        })
    }

    pub fn start_entry(&mut self, entry: &EntryHeader) -> io::Result<()> {
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .unix_permissions(entry.mode & 0o777)
            .large_file(entry.size >= u64::from(u32::MAX));

        debug!("zip entry '{}' ({} bytes)", entry.name, entry.size);
        self.zip
            .start_file(entry.name.as_str(), options)
            .map_err(zip_io_error)
    }

    pub fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.zip.write(buf)
    }

    /// Write the central directory, then copy the archive into the sink
    pub fn finish(self) -> io::Result<W> {
        let Self { zip, mut inner } = self;
        let mut spool = zip.finish().map_err(zip_io_error)?;
        spool.seek(SeekFrom::Start(0))?;
        io::copy(&mut spool, &mut inner)?;
        Ok(inner)
    }
}

/// Reads file entries from a seekable zip archive in index order
pub struct ZipReader {
    archive: ZipArchive<File>,
}

impl ZipReader {
    pub fn new(file: File) -> Result<Self> {
        let archive = ZipArchive::new(file)
            .map_err(|e| FormatError::MalformedArchive(format!("invalid zip archive: {e}")))?;
        debug!("zip archive with {} entries", archive.len());
        Ok(Self { archive })
    }

    /// Hand each file entry to `visit` in index order, skipping directories
    ///
    /// Whatever the visitor leaves unread is drained so every entry's CRC is
    /// checked.
    pub fn read_entries<F>(mut self, mut visit: F) -> Result<usize>
    where
        F: FnMut(&EntryHeader, &mut dyn Read) -> Result<()>,
    {
        let mut count = 0;
        for index in 0..self.archive.len() {
            let mut file = self
                .archive
                .by_index(index)
                .map_err(|e| FormatError::MalformedArchive(format!("zip entry {index}: {e}")))?;
            if file.is_dir() {
                continue;
            }

            let header = EntryHeader {
                name: file.name().to_string(),
                mode: file.unix_mode().map(|m| m & 0o7777).unwrap_or(DEFAULT_MODE),
                size: file.size(),
                mtime: 0,
            };
            visit(&header, &mut file)?;
            io::copy(&mut file, &mut io::sink())
                .map_err(|e| super::read_error(e, &header.name))?;
            count += 1;
        }
        Ok(count)
    }
}

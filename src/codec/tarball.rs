// src/codec/tarball.rs
//! Tar framing over a compressed byte stream
//!
//! Writing hands each entry header to `tar::Builder` and streams the entry
//! bytes straight into the compressor, so callers can feed an entry in
//! chunks without ever holding it in memory. Reading walks
//! `tar::Archive::entries()` and then drains the decoded stream, so the
//! compression and encryption trailers are always checked.

use super::EntryHeader;
use crate::error::{Error, FormatError, Result};
use crate::gpg;
use flate2::write::GzEncoder;
use std::io::{self, Read, Write};
use tar::{Archive, EntryType, Header};
use tracing::{debug, warn};

const BLOCK_SIZE: u64 = 512;

/// Writes tar entries into a gzip stream
pub struct TarWriter<W: Write> {
    builder: tar::Builder<GzEncoder<W>>,
}

impl<W: Write> TarWriter<W> {
    pub fn new(inner: W) -> Self {
        let encoder = GzEncoder::new(inner, flate2::Compression::default());
        Self {
            builder: tar::Builder::new(encoder),
        }
    }

    /// Emit the header for `entry`, plus a GNU long-name record when the name needs one
    pub fn start_entry(&mut self, entry: &EntryHeader) -> io::Result<()> {
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Regular);
        header.set_mode(entry.mode & 0o7777);
        header.set_size(entry.size);
        header.set_mtime(entry.mtime);
        header.set_uid(0);
        header.set_gid(0);

        debug!("tar header for '{}' ({} bytes)", entry.name, entry.size);
        // The body follows through `write`, so the builder gets no data here
        self.builder
            .append_data(&mut header, &entry.name, io::empty())
    }

    pub fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.builder.get_mut().write(buf)
    }

    /// Pad the finished entry out to the block boundary
    pub fn end_entry(&mut self, size: u64) -> io::Result<()> {
        let zeros = [0u8; BLOCK_SIZE as usize];
        let pad = ((BLOCK_SIZE - size % BLOCK_SIZE) % BLOCK_SIZE) as usize;
        self.builder.get_mut().write_all(&zeros[..pad])
    }

    /// Write the end-of-archive marker, then the gzip trailer
    pub fn finish(self) -> io::Result<W> {
        let encoder = self.builder.into_inner()?;
        encoder.finish()
    }
}

/// Counts the decoded bytes the archive pulls through
struct Counted<R> {
    inner: R,
    bytes: u64,
}

impl<R: Read> Read for Counted<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.bytes += n as u64;
        Ok(n)
    }
}

/// Entry body that fails on a stream ending before the declared size
struct Bounded<'a, R> {
    inner: &'a mut R,
    remaining: u64,
}

impl<R: Read> Read for Bounded<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let n = self.inner.read(buf)?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("archive truncated with {} entry bytes missing", self.remaining),
            ));
        }
        self.remaining = self.remaining.saturating_sub(n as u64);
        Ok(n)
    }
}

/// Reads tar entries from a decompressed byte stream
pub struct TarReader<R: Read> {
    archive: Archive<Counted<R>>,
}

impl<R: Read> TarReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            archive: Archive::new(Counted { inner, bytes: 0 }),
        }
    }

    /// Hand every regular file entry to `visit`, in archive order
    ///
    /// Directory entries are skipped, other special entries are skipped
    /// with a warning. After the end-of-archive marker the rest of the
    /// stream is read to its end, so a corrupt gzip or OpenPGP trailer
    /// fails the read even though every entry was already delivered.
    pub fn read_entries<F>(self, mut visit: F) -> Result<usize>
    where
        F: FnMut(&EntryHeader, &mut dyn Read) -> Result<()>,
    {
        let mut archive = self.archive;
        let mut count = 0;

        let entries = archive
            .entries()
            .map_err(|e| tar_error(e, "reading archive"))?;
        for entry in entries {
            let mut entry = entry.map_err(|e| tar_error(e, "reading entry header"))?;
            let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();

            match entry.header().entry_type() {
                EntryType::Regular | EntryType::Continuous => {}
                EntryType::Directory | EntryType::XGlobalHeader => continue,
                other => {
                    warn!("skipping non-regular archive entry '{}' ({:?})", name, other);
                    continue;
                }
            }

            let mode = entry
                .header()
                .mode()
                .map_err(|e| malformed(&format!("invalid mode for '{name}': {e}")))?;
            let header = EntryHeader {
                mode,
                size: entry.size(),
                mtime: entry.header().mtime().unwrap_or(0),
                name,
            };

            let mut body = Bounded {
                inner: &mut entry,
                remaining: header.size,
            };
            visit(&header, &mut body)?;
            count += 1;
        }

        let mut stream = archive.into_inner();
        if stream.bytes == 0 {
            return Err(malformed("empty package stream"));
        }
        let trailing = io::copy(&mut stream, &mut io::sink())
            .map_err(|e| tar_error(e, "reading package trailer"))?;
        debug!("{} bytes after the end-of-archive marker", trailing);
        Ok(count)
    }
}

fn malformed(reason: &str) -> Error {
    FormatError::MalformedArchive(reason.to_string()).into()
}

/// The tar crate reports framing problems as `ErrorKind::Other`
fn tar_error(err: io::Error, context: &str) -> Error {
    if gpg::ciphertext_error(&err).is_none() && err.kind() == io::ErrorKind::Other {
        return malformed(&format!("{context}: {err}"));
    }
    super::read_error(err, context)
}

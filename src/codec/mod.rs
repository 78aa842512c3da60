// src/codec/mod.rs
//! Format-polymorphic archive codecs
//!
//! Presents one entry-oriented write contract and one entry-oriented read
//! contract over the supported archive/compression backends:
//!
//! - tar + gzip: read and write
//! - tar + bzip2: read only
//! - zip (deflate): read and write; zip needs random access, so both
//!   directions spool through a temporary file when the peer stream is not
//!   seekable
//!
//! Writers take an entry header before each entry's bytes and account for
//! every byte against the declared size. Readers hand each entry to a
//! visitor and return once the archive ends; an empty or truncated stream
//! is a typed [`FormatError::MalformedArchive`], never a panic.

mod tarball;
mod zipfile;

pub use tarball::{TarReader, TarWriter};
pub use zipfile::{ZipReader, ZipSpoolWriter};

use crate::error::{Error, FormatError, Result};
use crate::extension::Compression;
use crate::gpg;
use std::fs::File;
use std::io::{self, Read, Write};

/// Header describing one archive entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryHeader {
    /// Relative `/`-separated path inside the package
    pub name: String,
    /// Unix permission bits
    pub mode: u32,
    /// Entry size in bytes
    pub size: u64,
    /// Modification time (seconds since the epoch)
    pub mtime: u64,
}

impl EntryHeader {
    pub fn new(name: impl Into<String>, mode: u32, size: u64) -> Self {
        Self {
            name: name.into(),
            mode,
            size,
            mtime: 0,
        }
    }

    pub fn with_mtime(mut self, mtime: u64) -> Self {
        self.mtime = mtime;
        self
    }
}

/// Byte accounting for the entry currently being written
#[derive(Debug)]
struct OpenEntry {
    name: String,
    declared: u64,
    written: u64,
}

enum WriterBackend<W: Write> {
    Tar(TarWriter<W>),
    Zip(ZipSpoolWriter<W>),
}

/// Entry-oriented archive writer over any byte sink
pub struct CodecWriter<W: Write> {
    backend: WriterBackend<W>,
    current: Option<OpenEntry>,
    entries: usize,
}

impl<W: Write> CodecWriter<W> {
    /// Wrap `inner` with the writer for `compression`
    pub fn new(compression: Compression, inner: W) -> Result<Self> {
        let backend = match compression {
            Compression::TarGz => WriterBackend::Tar(TarWriter::new(inner)),
            Compression::Zip => WriterBackend::Zip(ZipSpoolWriter::new(inner)?),
            Compression::TarBz2 => {
                return Err(FormatError::WriteUnsupported(compression).into());
            }
        };

        Ok(Self {
            backend,
            current: None,
            entries: 0,
        })
    }

    /// Number of entries started so far
    pub fn entries(&self) -> usize {
        self.entries
    }

    /// Start a new entry; the previous entry must have received exactly its declared size
    pub fn write_entry_header(&mut self, header: &EntryHeader) -> Result<()> {
        self.close_entry()?;

        match &mut self.backend {
            WriterBackend::Tar(tar) => tar.start_entry(header)?,
            WriterBackend::Zip(zip) => zip.start_entry(header)?,
        }

        self.current = Some(OpenEntry {
            name: header.name.clone(),
            declared: header.size,
            written: 0,
        });
        self.entries += 1;
        Ok(())
    }

    /// Write bytes into the current entry, returning how many were accepted
    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let entry = self.current.as_mut().ok_or_else(|| {
            Error::IoError("write called before any entry header".to_string())
        })?;

        if entry.written + buf.len() as u64 > entry.declared {
            return Err(FormatError::EntryOverflow {
                name: entry.name.clone(),
                declared: entry.declared,
            }
            .into());
        }

        let n = match &mut self.backend {
            WriterBackend::Tar(tar) => tar.write(buf)?,
            WriterBackend::Zip(zip) => zip.write(buf)?,
        };
        entry.written += n as u64;
        Ok(n)
    }

    /// Close the archive, returning the sink beneath it
    ///
    /// The archive layer is finalized first (tar trailer, then gzip trailer;
    /// or the zip central directory) so the sink has seen every byte before
    /// it is handed back for its own close.
    pub fn finish(mut self) -> Result<W> {
        self.close_entry()?;
        match self.backend {
            WriterBackend::Tar(tar) => Ok(tar.finish()?),
            WriterBackend::Zip(zip) => Ok(zip.finish()?),
        }
    }

    fn close_entry(&mut self) -> Result<()> {
        let Some(entry) = self.current.take() else {
            return Ok(());
        };

        if entry.written != entry.declared {
            return Err(FormatError::EntryUnderflow {
                name: entry.name,
                declared: entry.declared,
                written: entry.written,
            }
            .into());
        }

        if let WriterBackend::Tar(tar) = &mut self.backend {
            tar.end_entry(entry.declared)?;
        }
        Ok(())
    }
}

/// Create a decompressing reader for the tar-based formats
pub fn create_decoder<'a, R: Read + 'a>(
    reader: R,
    compression: Compression,
) -> Result<Box<dyn Read + 'a>> {
    match compression {
        Compression::TarGz => Ok(Box::new(flate2::read::GzDecoder::new(reader))),
        Compression::TarBz2 => Ok(Box::new(bzip2::read::BzDecoder::new(reader))),
        Compression::Zip => Err(Error::IoError(
            "zip archives are not a byte-stream compression".to_string(),
        )),
    }
}

/// Entry-oriented archive reader
pub enum CodecReader {
    Tar(TarReader<Box<dyn Read>>),
    Zip(ZipReader),
}

impl CodecReader {
    /// Read a tar-based package from a byte stream
    pub fn tar(reader: Box<dyn Read>, compression: Compression) -> Result<Self> {
        let decoder = create_decoder(reader, compression)?;
        Ok(Self::Tar(TarReader::new(decoder)))
    }

    /// Read a zip package from a seekable file
    pub fn zip(file: File) -> Result<Self> {
        Ok(Self::Zip(ZipReader::new(file)?))
    }

    /// Hand each file entry's header and bytes to `visit`, returning the entry count
    ///
    /// Returning normally is the end-of-archive signal; the whole package
    /// stream has been consumed and its trailers checked by then.
    pub fn read_entries<F>(self, visit: F) -> Result<usize>
    where
        F: FnMut(&EntryHeader, &mut dyn Read) -> Result<()>,
    {
        match self {
            Self::Tar(tar) => tar.read_entries(visit),
            Self::Zip(zip) => zip.read_entries(visit),
        }
    }
}

/// Classify an I/O error raised while reading through the pipeline
///
/// Errors tagged by the decrypting layer become ciphertext errors; framing
/// problems (early EOF, corrupt compressed data) become malformed-archive
/// errors; everything else stays an I/O error.
pub fn read_error(err: io::Error, context: &str) -> Error {
    if let Some(crypto) = gpg::ciphertext_error(&err) {
        return crypto.into();
    }

    match err.kind() {
        io::ErrorKind::UnexpectedEof | io::ErrorKind::InvalidData | io::ErrorKind::InvalidInput => {
            FormatError::MalformedArchive(format!("{context}: {err}")).into()
        }
        _ => Error::IoError(format!("{context}: {err}")),
    }
}

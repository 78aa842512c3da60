// src/package/pipeline.rs
//! Byte stream layers beneath the archive codec
//!
//! The write side is a stack owned by the package writer:
//!
//! ```text
//! CodecWriter -> OutputLayer (plain | encrypting) -> Sink (file | stdout)
//! ```
//!
//! Closing walks the stack from the inside out: the codec writes its
//! trailers, the encrypting layer writes its trailer, then the sink is
//! flushed. The read side mirrors it with a [`Source`] feeding an optional
//! decrypting layer, then the decompressor.

use crate::codec;
use crate::error::{Error, Result};
use crate::gpg::{DecryptingReader, DecryptionKeys, EncryptingWriter};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Where package bytes are written
pub enum Sink {
    File { file: File, path: PathBuf },
    Stdout(io::Stdout),
}

impl Sink {
    /// Open the package output; `None` writes to standard output
    ///
    /// Package files are created exclusively; an existing file is never
    /// replaced.
    pub fn create(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            debug!("writing package to standard output");
            return Ok(Self::Stdout(io::stdout()));
        };

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| match e.kind() {
                io::ErrorKind::AlreadyExists => Error::FileAlreadyExists(path.to_path_buf()),
                _ => Error::IoError(format!("failed to create {}: {e}", path.display())),
            })?;

        debug!("writing package to {}", path.display());
        Ok(Self::File {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Flush and close the output
    pub fn finish(self) -> Result<()> {
        match self {
            Self::File { mut file, path } => {
                file.flush()?;
                file.sync_all().map_err(|e| {
                    Error::IoError(format!("failed to sync {}: {e}", path.display()))
                })?;
            }
            Self::Stdout(mut stdout) => stdout.flush()?,
        }
        Ok(())
    }

    /// Close the output after a failure, removing a partially written file
    pub fn discard(self) {
        if let Self::File { file, path } = self {
            drop(file);
            if let Err(e) = fs::remove_file(&path) {
                warn!("failed to remove partial package {}: {}", path.display(), e);
            } else {
                debug!("removed partial package {}", path.display());
            }
        }
    }
}

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::File { file, .. } => file.write(buf),
            Self::Stdout(stdout) => stdout.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::File { file, .. } => file.flush(),
            Self::Stdout(stdout) => stdout.flush(),
        }
    }
}

/// Layer between the archive codec and the sink
pub enum OutputLayer<'a> {
    Plain(&'a mut Sink),
    Encrypted(EncryptingWriter<'a>),
}

impl OutputLayer<'_> {
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Plain(_) => "plain",
            Self::Encrypted(_) => "openpgp",
        }
    }

    /// Close this layer; the sink beneath it stays open
    pub fn finish(self) -> Result<()> {
        match self {
            Self::Plain(sink) => Ok(sink.flush()?),
            Self::Encrypted(writer) => writer.finish(),
        }
    }
}

impl Write for OutputLayer<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Plain(sink) => sink.write(buf),
            Self::Encrypted(writer) => writer.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Plain(sink) => sink.flush(),
            Self::Encrypted(writer) => writer.flush(),
        }
    }
}

/// Where package bytes are read from
pub enum Source {
    File(File),
    Stdin(io::Stdin),
}

impl Source {
    /// Open the package input; `None` reads standard input
    pub fn open(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let file = File::open(path).map_err(|e| {
                    Error::IoError(format!("failed to open package {}: {e}", path.display()))
                })?;
                debug!("reading package from {}", path.display());
                Ok(Self::File(file))
            }
            None => {
                debug!("reading package from standard input");
                Ok(Self::Stdin(io::stdin()))
            }
        }
    }
}

impl Read for Source {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::File(file) => file.read(buf),
            Self::Stdin(stdin) => stdin.read(buf),
        }
    }
}

/// Stack the optional decrypting layer onto `source`
pub fn input_stream(source: Source, keys: Option<DecryptionKeys>) -> Result<Box<dyn Read>> {
    match keys {
        Some(keys) => Ok(Box::new(DecryptingReader::new(source, keys)?)),
        None => Ok(Box::new(source)),
    }
}

/// Get a seekable file holding the whole package payload
///
/// Zip archives keep their directory at the end, so they cannot be read
/// as a stream. A plain package file is used as is; standard input and
/// decrypted payloads are spooled into an anonymous temporary file first.
pub fn seekable_payload(source: Source, keys: Option<DecryptionKeys>) -> Result<File> {
    if let (Source::File(file), None) = (&source, &keys) {
        let mut file = file.try_clone()?;
        file.seek(SeekFrom::Start(0))?;
        return Ok(file);
    }

    let mut input = input_stream(source, keys)?;
    let mut spool = tempfile::tempfile()?;
    let copied = io::copy(&mut input, &mut spool)
        .map_err(|e| codec::read_error(e, "spooling package"))?;
    spool.seek(SeekFrom::Start(0))?;
    debug!("spooled {} package bytes to a temporary file", copied);
    Ok(spool)
}

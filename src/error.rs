// src/error.rs

//! Error types for datapack
//!
//! Errors are grouped by the stage that raises them so callers can tell a bad
//! invocation (`Config`) from a bad package (`Format`, `Crypto`), a bad
//! manifest (`Integrity`), or a failing environment (`Io`, `Service`).

use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::extension::Compression;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("package format error: {0}")]
    Format(#[from] FormatError),

    #[error("encryption error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("metadata integrity error: {0}")]
    Integrity(#[from] IntegrityError),

    #[error("schema service error: {0}")]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("I/O error: {0}")]
    IoError(String),

    #[error("short write to {path}: wrote {written} of {requested} bytes")]
    ShortWrite {
        path: String,
        requested: usize,
        written: usize,
    },

    #[error("refusing to overwrite existing file: {}", .0.display())]
    FileAlreadyExists(PathBuf),
}

/// Conflicting or missing settings, detected before any I/O
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("compression '{declared}' conflicts with '{inferred}' implied by the package name")]
    CompressionConflict {
        declared: Compression,
        inferred: Compression,
    },

    #[error("package '{0}' has a 'gpg' extension but no key path or key identity was given")]
    MissingKey(String),

    #[error("package '{0}' has no 'gpg' extension but a key path or key identity was given")]
    UnexpectedKey(String),

    #[error("unknown compression method '{0}' (expected .zip, .tar.gz, .tar.gzip, .tar.bz2 or .tar.bzip2)")]
    InvalidCompression(String),

    #[error("no value available for {0}")]
    MissingField(String),

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("failed to load config file {path}: {reason}")]
    ConfigFile { path: String, reason: String },
}

/// Unknown or conflicting extensions and malformed archive framing
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("unknown extension '.{extension}' in package name '{filename}'")]
    UnknownExtension { filename: String, extension: String },

    #[error("conflicting compression extensions in package name '{0}'")]
    ExtensionConflict(String),

    #[error("package name '{0}' has a compression extension but no 'tar' container")]
    MissingTarContainer(String),

    #[error("package name '{0}' has no recognized compression extension")]
    NoCompressionExtension(String),

    #[error("writing {0} packages is not supported")]
    WriteUnsupported(Compression),

    #[error("malformed archive: {0}")]
    MalformedArchive(String),

    #[error("unexpected file type: {0}")]
    UnexpectedFileType(String),

    #[error("unsafe entry path in archive: {0}")]
    UnsafeEntryPath(String),

    #[error("entry '{name}' overflows its declared size of {declared} bytes")]
    EntryOverflow { name: String, declared: u64 },

    #[error("entry '{name}' ended after {written} of {declared} declared bytes")]
    EntryUnderflow {
        name: String,
        declared: u64,
        written: u64,
    },
}

/// Key resolution, key unlocking and ciphertext failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("failed to unlock secret key {fingerprint}: wrong or missing passphrase")]
    KeyUnlockFailure { fingerprint: String },

    #[error("malformed or truncated encrypted payload: {0}")]
    MalformedCiphertext(String),

    #[error("no usable key material: {0}")]
    MissingKeyMaterial(String),

    #[error("failed to parse OpenPGP key: {0}")]
    InvalidKey(String),

    #[error("none of the supplied keys can decrypt this package")]
    NoDecryptionKey,

    #[error("public key lookup for '{identity}' failed: {reason}")]
    KeyLookup { identity: String, reason: String },
}

/// Manifest structure, record consistency and checksum failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IntegrityError {
    #[error("metadata file not found: {}", .0.display())]
    ManifestNotFound(PathBuf),

    #[error("metadata file already exists: {}", .0.display())]
    ManifestExists(PathBuf),

    #[error("unexpected header value: {0}")]
    UnexpectedHeaderField(String),

    #[error("missing required header value: {0}")]
    MissingHeaderField(String),

    #[error("malformed metadata at line {line}: {reason}")]
    MalformedManifest { line: u64, reason: String },

    #[error("line {line} missing required value '{field}'")]
    MissingField { line: u64, field: String },

    #[error("line {line} {field} '{actual}' does not match expected '{expected}'")]
    FieldMismatch {
        line: u64,
        field: String,
        expected: String,
        actual: String,
    },

    #[error("line {line} schema '{schema}' version '{version}' not found in schema catalog")]
    UnknownSchema {
        line: u64,
        schema: String,
        version: String,
    },

    #[error("line {line} table '{table}' not found in schema '{schema}' version '{version}'")]
    UnknownTable {
        line: u64,
        table: String,
        schema: String,
        version: String,
    },

    #[error("line {line} file '{filename}' does not exist")]
    MissingDataFile { line: u64, filename: String },

    #[error("line {line} file '{filename}' could not be read: {reason}")]
    UnreadableDataFile {
        line: u64,
        filename: String,
        reason: String,
    },

    #[error("line {line} file '{filename}' checksum does not match: expected {expected}, got {actual}")]
    ChecksumMismatch {
        line: u64,
        filename: String,
        expected: String,
        actual: String,
    },

    #[error("{}", ListDisplay(.0))]
    Multiple(Vec<IntegrityError>),
}

impl IntegrityError {
    /// Collapse a list of problems into one error, if there are any
    pub fn from_issues(mut issues: Vec<IntegrityError>) -> Option<Self> {
        match issues.len() {
            0 => None,
            1 => issues.pop(),
            _ => Some(Self::Multiple(issues)),
        }
    }

    /// Flattened view of every individual problem
    pub fn issues(&self) -> Vec<&IntegrityError> {
        match self {
            Self::Multiple(all) => all.iter().collect(),
            other => vec![other],
        }
    }
}

struct ListDisplay<'a>(&'a [IntegrityError]);

impl fmt::Display for ListDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} problems found", self.0.len())?;
        for issue in self.0 {
            write!(f, "\n  - {issue}")?;
        }
        Ok(())
    }
}

/// Schema catalog service failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("schema service at {url} is unreachable: {reason}")]
    Unreachable { url: String, reason: String },

    #[error("schema service at {url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("schema service at {url} returned invalid data: {reason}")]
    InvalidResponse { url: String, reason: String },

    #[error("invalid schema catalog: {0}")]
    InvalidCatalog(String),
}

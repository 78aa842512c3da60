// src/extension.rs
//! Package name extension resolution
//!
//! Infers the archive/compression method and whether encryption is expected
//! from a package file name such as `data.tar.gz.gpg`. Resolution is a pure
//! function of the name and the declared settings, so the same input always
//! yields the same descriptor or the same error.

use crate::error::{ConfigError, FormatError, Result};
use std::fmt;
use std::str::FromStr;

/// Supported archive/compression methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Compression {
    /// Tar entries inside a gzip stream (.tar.gz, .tar.gzip)
    #[default]
    TarGz,
    /// Tar entries inside a bzip2 stream (.tar.bz2, .tar.bzip2), read-only
    TarBz2,
    /// Standard zip archive with deflated entries (.zip)
    Zip,
}

impl Compression {
    /// Canonical file extension for this method
    pub fn extension(&self) -> &'static str {
        match self {
            Self::TarGz => ".tar.gz",
            Self::TarBz2 => ".tar.bz2",
            Self::Zip => ".zip",
        }
    }

    /// Get a human-readable name for this method
    pub fn name(&self) -> &'static str {
        match self {
            Self::TarGz => "tar.gz",
            Self::TarBz2 => "tar.bz2",
            Self::Zip => "zip",
        }
    }

    /// Whether packages of this kind can be written
    pub fn can_write(&self) -> bool {
        !matches!(self, Self::TarBz2)
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Compression {
    type Err = ConfigError;

    /// Parse a compression override such as `.tar.gz` or `zip`
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().trim_start_matches('.').to_lowercase().as_str() {
            "tar.gz" | "tar.gzip" => Ok(Self::TarGz),
            "tar.bz2" | "tar.bzip2" => Ok(Self::TarBz2),
            "zip" => Ok(Self::Zip),
            _ => Err(ConfigError::InvalidCompression(s.to_string())),
        }
    }
}

/// Normalized description of a package's on-disk format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackageFormat {
    pub compression: Compression,
    pub encrypted: bool,
}

impl fmt::Display for PackageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.encrypted {
            write!(f, "{}.gpg", self.compression)
        } else {
            write!(f, "{}", self.compression)
        }
    }
}

/// A classified dot-delimited suffix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Suffix {
    Gpg,
    Tar,
    Bz2,
    Gz,
    Zip,
}

impl Suffix {
    fn classify(raw: &str) -> Option<Self> {
        match raw.to_lowercase().as_str() {
            "gpg" => Some(Self::Gpg),
            "tar" => Some(Self::Tar),
            "bz2" | "bzip2" => Some(Self::Bz2),
            "gz" | "gzip" => Some(Self::Gz),
            "zip" => Some(Self::Zip),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct SuffixSet {
    gpg: bool,
    tar: bool,
    bz2: bool,
    gz: bool,
    zip: bool,
}

impl SuffixSet {
    fn insert(&mut self, suffix: Suffix) {
        match suffix {
            Suffix::Gpg => self.gpg = true,
            Suffix::Tar => self.tar = true,
            Suffix::Bz2 => self.bz2 = true,
            Suffix::Gz => self.gz = true,
            Suffix::Zip => self.zip = true,
        }
    }
}

/// Scan the extension chain of `filename` right to left
///
/// The chain ends at the first suffix that is not a known extension; that
/// suffix then belongs to the stem (`study.2016.tar.gz`). An unknown
/// rightmost suffix is an error since nothing about the format can be
/// inferred from it.
fn scan_suffixes(filename: &str) -> Result<SuffixSet> {
    // Only the final path component carries extensions.
    let base = filename.rsplit(['/', '\\']).next().unwrap_or(filename);

    let mut parts: Vec<&str> = base.split('.').collect();
    // The first part is the stem (or empty for dotfiles); never an extension.
    if !parts.is_empty() {
        parts.remove(0);
    }

    let mut set = SuffixSet::default();
    let mut seen_any = false;

    for raw in parts.iter().rev() {
        match Suffix::classify(raw) {
            Some(suffix) => {
                set.insert(suffix);
                seen_any = true;
            }
            None if !seen_any => {
                return Err(FormatError::UnknownExtension {
                    filename: filename.to_string(),
                    extension: raw.to_string(),
                }
                .into());
            }
            // Dots left of the extension chain belong to the stem (`study.2016.tar.gz`)
            None => break,
        }
    }

    Ok(set)
}

/// Resolve the format of a named package
///
/// `declared` is a compression method given explicitly by configuration and
/// `key_declared` says whether any key material (a key file or a key
/// identity) was configured.
pub fn resolve(
    filename: &str,
    declared: Option<Compression>,
    key_declared: bool,
) -> Result<PackageFormat> {
    let set = scan_suffixes(filename)?;

    let compressors = [set.gz, set.bz2, set.zip].iter().filter(|b| **b).count();
    if compressors > 1 || (set.zip && set.tar) {
        return Err(FormatError::ExtensionConflict(filename.to_string()).into());
    }

    if (set.gz || set.bz2) && !set.tar {
        return Err(FormatError::MissingTarContainer(filename.to_string()).into());
    }

    let inferred = match (set.tar, set.gz, set.bz2, set.zip) {
        (true, true, false, false) => Compression::TarGz,
        (true, false, true, false) => Compression::TarBz2,
        (false, false, false, true) => Compression::Zip,
        _ => return Err(FormatError::NoCompressionExtension(filename.to_string()).into()),
    };

    if let Some(declared) = declared {
        if declared != inferred {
            return Err(ConfigError::CompressionConflict { declared, inferred }.into());
        }
    }

    if set.gpg && !key_declared {
        return Err(ConfigError::MissingKey(filename.to_string()).into());
    }
    if key_declared && !set.gpg {
        return Err(ConfigError::UnexpectedKey(filename.to_string()).into());
    }

    Ok(PackageFormat {
        compression: inferred,
        encrypted: set.gpg,
    })
}

/// Resolve the format of a package streamed over standard input/output
///
/// With no file name to inspect, the declared compression (default tar.gz)
/// is used and encryption follows the presence of key material.
pub fn resolve_unnamed(declared: Option<Compression>, key_declared: bool) -> PackageFormat {
    PackageFormat {
        compression: declared.unwrap_or_default(),
        encrypted: key_declared,
    }
}

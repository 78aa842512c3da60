// src/config.rs
//! Run configuration
//!
//! Settings come from an optional TOML file and from command-line flags, with
//! flags taking precedence. Every conflict between settings (compression
//! override versus package name, key material versus `.gpg` suffix) is
//! detected here, before any file or network I/O happens.

use crate::error::{ConfigError, FormatError, Result};
use crate::extension::{self, Compression, PackageFormat};
use crate::gpg::{KeySource, PassphraseSource, DEFAULT_KEYSERVER};
use crate::metadata::catalog::{HttpSchemaService, SchemaSource, StaticCatalog, DEFAULT_SERVICE};
use crate::metadata::MetadataOptions;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Direction of a package operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Pack,
    Unpack,
}

/// Settings for one run
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    /// Package file; unset means standard input/output
    pub package_path: Option<PathBuf>,
    /// Data directory to pack, verify, or unpack into
    pub data_dir: Option<PathBuf>,
    /// Compression override, e.g. `.tar.gz`
    pub compression: Option<String>,
    /// Public key (pack) or secret key (unpack) file
    pub key_path: Option<PathBuf>,
    /// Identity to look up on the keyserver when packing
    pub public_key_email: Option<String>,
    /// File holding the secret key passphrase
    pub key_pass_path: Option<PathBuf>,
    /// HKP keyserver base URL
    pub keyserver: Option<String>,
    pub site: Option<String>,
    pub schema: Option<String>,
    pub schema_version: Option<String>,
    pub data_version: Option<String>,
    pub etl: Option<String>,
    /// Schema service base URL
    pub service: Option<String>,
    /// Offline schema catalog (JSON) used instead of the service
    pub catalog_file: Option<PathBuf>,
}

/// Encryption settings of a package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encryption {
    pub key: KeySource,
    pub passphrase: PassphraseSource,
}

/// Fully resolved description of the package to write or read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageDescriptor {
    /// Package file; `None` streams through standard input/output
    pub path: Option<PathBuf>,
    pub compression: Compression,
    pub encryption: Option<Encryption>,
}

impl PackageDescriptor {
    /// Descriptor for an unencrypted package
    pub fn plain(path: Option<PathBuf>, compression: Compression) -> Self {
        Self {
            path,
            compression,
            encryption: None,
        }
    }

    pub fn format(&self) -> PackageFormat {
        PackageFormat {
            compression: self.compression,
            encrypted: self.encryption.is_some(),
        }
    }

    /// Human-readable location of the package
    pub fn location(&self) -> String {
        match &self.path {
            Some(path) => path.display().to_string(),
            None => "<stdio>".to_string(),
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl Config {
    /// Load settings from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let origin = path.display().to_string();
        let content = fs::read_to_string(path).map_err(|e| ConfigError::ConfigFile {
            path: origin.clone(),
            reason: e.to_string(),
        })?;
        Self::parse(&content, &origin)
    }

    /// Parse settings from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        Self::parse(content, "<inline>")
    }

    fn parse(content: &str, origin: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| {
            ConfigError::ConfigFile {
                path: origin.to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Fill every unset value in `self` from `fallback`
    pub fn or(self, fallback: Config) -> Config {
        Config {
            package_path: self.package_path.or(fallback.package_path),
            data_dir: self.data_dir.or(fallback.data_dir),
            compression: self.compression.or(fallback.compression),
            key_path: self.key_path.or(fallback.key_path),
            public_key_email: self.public_key_email.or(fallback.public_key_email),
            key_pass_path: self.key_pass_path.or(fallback.key_pass_path),
            keyserver: self.keyserver.or(fallback.keyserver),
            site: self.site.or(fallback.site),
            schema: self.schema.or(fallback.schema),
            schema_version: self.schema_version.or(fallback.schema_version),
            data_version: self.data_version.or(fallback.data_version),
            etl: self.etl.or(fallback.etl),
            service: self.service.or(fallback.service),
            catalog_file: self.catalog_file.or(fallback.catalog_file),
        }
    }

    /// The compression override, if one was given
    pub fn declared_compression(&self) -> Result<Option<Compression>> {
        match non_empty(&self.compression) {
            Some(value) => Ok(Some(value.parse::<Compression>()?)),
            None => Ok(None),
        }
    }

    /// Whether any key material (key file or key identity) was configured
    pub fn key_declared(&self) -> bool {
        self.key_path.is_some() || non_empty(&self.public_key_email).is_some()
    }

    /// Resolve the package descriptor for `direction`
    ///
    /// The package name decides the format; a compression override must agree
    /// with it. Without a package path the override (default tar.gz) is used
    /// and encryption follows the presence of key material.
    pub fn descriptor(&self, direction: Direction) -> Result<PackageDescriptor> {
        let declared = self.declared_compression()?;
        let key_declared = self.key_declared();

        let format = match &self.package_path {
            Some(path) => {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.display().to_string());
                extension::resolve(&name, declared, key_declared)?
            }
            None => extension::resolve_unnamed(declared, key_declared),
        };

        if direction == Direction::Pack && !format.compression.can_write() {
            return Err(FormatError::WriteUnsupported(format.compression).into());
        }

        let encryption = if format.encrypted {
            Some(self.encryption(direction)?)
        } else {
            None
        };

        let descriptor = PackageDescriptor {
            path: self.package_path.clone(),
            compression: format.compression,
            encryption,
        };
        debug!("resolved package descriptor: {:?}", descriptor);
        Ok(descriptor)
    }

    fn encryption(&self, direction: Direction) -> Result<Encryption> {
        match direction {
            Direction::Pack => {
                let key = match (&self.key_path, non_empty(&self.public_key_email)) {
                    (Some(path), _) => KeySource::File(path.clone()),
                    (None, Some(identity)) => KeySource::Lookup {
                        identity: identity.to_string(),
                        keyserver: non_empty(&self.keyserver)
                            .unwrap_or(DEFAULT_KEYSERVER)
                            .to_string(),
                    },
                    (None, None) => {
                        return Err(ConfigError::MissingKey(self.location()).into());
                    }
                };
                Ok(Encryption {
                    key,
                    passphrase: PassphraseSource::None,
                })
            }
            Direction::Unpack => {
                let path = self.key_path.clone().ok_or_else(|| ConfigError::InvalidValue {
                    field: "key-path".to_string(),
                    reason: "unpacking an encrypted package needs a local secret key file"
                        .to_string(),
                })?;
                Ok(Encryption {
                    key: KeySource::File(path),
                    passphrase: PassphraseSource::resolve(self.key_pass_path.as_deref()),
                })
            }
        }
    }

    fn location(&self) -> String {
        match &self.package_path {
            Some(path) => path.display().to_string(),
            None => "<stdio>".to_string(),
        }
    }

    /// Metadata values declared for this run
    pub fn metadata_options(&self) -> MetadataOptions {
        let owned = |value: &Option<String>| non_empty(value).map(str::to_string);
        MetadataOptions {
            site: owned(&self.site),
            schema: owned(&self.schema),
            schema_version: owned(&self.schema_version),
            data_version: owned(&self.data_version),
            etl: owned(&self.etl),
        }
    }

    /// Where the schema catalog comes from
    pub fn schema_source(&self) -> Result<Box<dyn SchemaSource>> {
        if let Some(path) = &self.catalog_file {
            return Ok(Box::new(StaticCatalog::from_file(path)?));
        }
        let url = non_empty(&self.service).unwrap_or(DEFAULT_SERVICE);
        Ok(Box::new(HttpSchemaService::new(url)?))
    }
}

// src/lib.rs

//! Datapack
//!
//! Packs directories of CSV data files into compressed, optionally
//! OpenPGP-encrypted archives and unpacks them again, keeping a
//! `metadata.csv` manifest that describes and checksums every data file.
//!
//! # Architecture
//!
//! - Descriptor-first: package format, encryption and key material are
//!   resolved from the package name and settings before any I/O
//! - Layered streams: archive codec, then encryption, then file or stdio
//! - Manifest integrity: every data file is checked against a schema
//!   catalog and its recorded SHA-256 checksum

pub mod codec;
pub mod config;
mod error;
pub mod extension;
pub mod gpg;
pub mod hash;
pub mod metadata;
pub mod package;
pub mod path;

pub use config::{Config, Direction, Encryption, PackageDescriptor};
pub use error::{
    ConfigError, CryptoError, Error, FormatError, IntegrityError, Result, ServiceError,
};
pub use extension::{Compression, PackageFormat};
pub use gpg::{DecryptionKeys, KeySource, PassphraseSource};
pub use metadata::{
    create_or_verify_metadata, FieldResolver, Manifest, MetadataOptions, MetadataOutcome,
    NonInteractive, SchemaCatalog, SchemaSource, StaticCatalog, TerminalResolver,
    VerifySummary, MANIFEST_FILE,
};
pub use package::{PackSummary, PackageReader, PackageWriter, UnpackSummary};

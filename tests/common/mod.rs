// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use datapack::metadata::SchemaRecord;
use datapack::{
    create_or_verify_metadata, Config, Direction, MetadataOptions, MetadataOutcome,
    NonInteractive, PackSummary, PackageWriter, SchemaCatalog,
};
use sequoia_openpgp::cert::CertBuilder;
use sequoia_openpgp::crypto::Password;
use sequoia_openpgp::serialize::SerializeInto;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use walkdir::WalkDir;

pub const MESSAGE: &str = "A test message";
pub const PASSPHRASE: &str = "passphrase";

/// Catalog JSON as served by the schema service
pub const CATALOG_JSON: &str = r#"[
    {"name": "pedsnet", "version": "2.0.0", "tables": [{"name": "person"}]},
    {"name": "pedsnet", "version": "2.1.0", "tables": [
        {"name": "datafile1"}, {"name": "datafile2"}, {"name": "person"}
    ]}
]"#;

/// Paths of a generated key pair written to disk
pub struct KeyFiles {
    pub public: PathBuf,
    pub secret: PathBuf,
    pub passphrase: PathBuf,
}

/// Generate a passphrase-protected key pair and write it as armored files
pub fn write_keys(dir: &Path) -> KeyFiles {
    let (cert, _revocation) =
        CertBuilder::general_purpose(None, Some("Data Team <data@example.org>"))
            .set_password(Some(Password::from(PASSPHRASE)))
            .generate()
            .unwrap();

    let keys = KeyFiles {
        public: dir.join("public.asc"),
        secret: dir.join("secret.asc"),
        passphrase: dir.join("pass.txt"),
    };
    fs::write(&keys.public, cert.armored().to_vec().unwrap()).unwrap();
    fs::write(&keys.secret, cert.as_tsk().armored().to_vec().unwrap()).unwrap();
    fs::write(&keys.passphrase, format!("{PASSPHRASE}\n")).unwrap();
    keys
}

pub fn catalog() -> SchemaCatalog {
    SchemaCatalog::from_records(vec![
        SchemaRecord::new("pedsnet", "2.0.0", &["person"]),
        SchemaRecord::new("pedsnet", "2.1.0", &["datafile1", "datafile2", "person"]),
    ])
    .unwrap()
}

/// A data directory with `datafile1.csv` and `datafile2.csv`
pub fn data_dir() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("datafile1.csv"), MESSAGE).unwrap();
    fs::write(dir.path().join("datafile2.csv"), MESSAGE).unwrap();
    dir
}

pub fn metadata_options() -> MetadataOptions {
    MetadataOptions {
        site: Some("ORG".to_string()),
        schema: Some("pedsnet".to_string()),
        schema_version: Some("2.1.0".to_string()),
        data_version: None,
        etl: Some("https://github.com/example/etl".to_string()),
    }
}

/// Settings for packing `data` into `package`
pub fn pack_config(data: &Path, package: &Path) -> Config {
    Config {
        package_path: Some(package.to_path_buf()),
        data_dir: Some(data.to_path_buf()),
        site: Some("ORG".to_string()),
        schema: Some("pedsnet".to_string()),
        schema_version: Some("2.1.0".to_string()),
        etl: Some("https://github.com/example/etl".to_string()),
        ..Default::default()
    }
}

/// Create or verify the manifest, then pack, the way the CLI does
pub fn pack(config: &Config) -> PackSummary {
    let data = config.data_dir.as_deref().unwrap();
    let descriptor = config.descriptor(Direction::Pack).unwrap();
    create_or_verify_metadata(
        data,
        &config.metadata_options(),
        &catalog(),
        &mut NonInteractive,
        false,
    )
    .unwrap();
    PackageWriter::new(descriptor).pack(data).unwrap()
}

/// Verify the manifest of an unpacked directory
pub fn verify(dir: &Path) -> datapack::Result<MetadataOutcome> {
    create_or_verify_metadata(dir, &metadata_options(), &catalog(), &mut NonInteractive, true)
}

/// Every file under `dir`, keyed by its relative path
pub fn read_tree(dir: &Path) -> BTreeMap<String, Vec<u8>> {
    WalkDir::new(dir)
        .into_iter()
        .map(|entry| entry.unwrap())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| {
            let name = entry
                .path()
                .strip_prefix(dir)
                .unwrap()
                .to_string_lossy()
                .into_owned();
            (name, fs::read(entry.path()).unwrap())
        })
        .collect()
}

// src/metadata/mod.rs
//! Metadata integrity engine
//!
//! Every data directory carries a `metadata.csv` manifest naming each data
//! file with its checksum, schema, schema version, table and provenance. When
//! the manifest is missing it is generated; when present it is verified
//! against the schema catalog and the files' actual bytes.

pub mod catalog;
pub mod generate;
pub mod manifest;
pub mod prompt;
pub mod verify;

pub use catalog::{SchemaCatalog, SchemaRecord, SchemaSource, StaticCatalog};
pub use manifest::{Field, Manifest, Record, MANIFEST_FILE};
pub use prompt::{FieldResolver, NonInteractive, TerminalResolver};
pub use verify::VerifySummary;

use crate::error::{ConfigError, Error, IntegrityError, Result};
use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;
use walkdir::WalkDir;

/// Metadata values declared for a run
///
/// Unset values are prompted for during generation and are not enforced
/// during verification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataOptions {
    pub site: Option<String>,
    pub schema: Option<String>,
    pub schema_version: Option<String>,
    pub data_version: Option<String>,
    pub etl: Option<String>,
}

impl MetadataOptions {
    /// Lower-case the declared values and check them against the catalog
    ///
    /// A declared schema must exist; a declared version must exist for it,
    /// and an omitted version becomes the schema's latest.
    pub fn normalize(&self, catalog: &SchemaCatalog) -> Result<Self> {
        let lower = |value: &Option<String>| value.as_ref().map(|v| v.trim().to_lowercase());
        let mut normalized = Self {
            site: self.site.clone(),
            schema: lower(&self.schema),
            schema_version: lower(&self.schema_version),
            data_version: lower(&self.data_version),
            etl: self.etl.clone(),
        };

        if let Some(schema) = &normalized.schema {
            let requested = normalized.schema_version.clone().unwrap_or_default();
            let version = catalog.resolve_version(schema, &requested).ok_or_else(|| {
                ConfigError::InvalidValue {
                    field: "schema".to_string(),
                    reason: format!(
                        "schema '{schema}' version '{requested}' not found in schema catalog"
                    ),
                }
            })?;
            normalized.schema_version = Some(version);
        }

        Ok(normalized)
    }
}

/// A file found under a data directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFile {
    /// `/`-separated path relative to the data directory
    pub name: String,
    pub path: PathBuf,
}

impl DataFile {
    pub fn is_csv(&self) -> bool {
        self.path.extension().is_some_and(|ext| ext == "csv")
    }
}

/// Every non-directory entry under `data_dir` except the manifest, sorted by path
pub fn data_files(data_dir: &Path) -> Result<Vec<DataFile>> {
    let mut files = Vec::new();

    for entry in WalkDir::new(data_dir).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            Error::IoError(format!("failed to walk {}: {e}", data_dir.display()))
        })?;
        if entry.file_type().is_dir() {
            continue;
        }

        let Some(name) = crate::path::entry_name(data_dir, entry.path()) else {
            continue;
        };
        if name == MANIFEST_FILE {
            continue;
        }

        files.push(DataFile {
            name,
            path: entry.into_path(),
        });
    }

    Ok(files)
}

/// What [`create_or_verify_metadata`] did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataOutcome {
    /// A new manifest was written
    Generated { path: PathBuf, records: usize },
    /// The existing manifest verified
    Verified(VerifySummary),
}

/// Write `manifest` to `path`, refusing to replace an existing file
pub fn write_manifest_file(path: &Path, manifest: &Manifest) -> Result<()> {
    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| match e.kind() {
            io::ErrorKind::AlreadyExists => {
                Error::from(IntegrityError::ManifestExists(path.to_path_buf()))
            }
            _ => Error::IoError(format!("failed to create {}: {e}", path.display())),
        })?;

    let mut writer = BufWriter::new(file);
    manifest.write(&mut writer)?;
    writer.flush()?;
    Ok(())
}

/// Generate the manifest of `data_dir` if it has none, otherwise verify it
///
/// With `verify_only` a missing manifest is an error instead.
pub fn create_or_verify_metadata(
    data_dir: &Path,
    options: &MetadataOptions,
    catalog: &SchemaCatalog,
    resolver: &mut dyn FieldResolver,
    verify_only: bool,
) -> Result<MetadataOutcome> {
    if !data_dir.is_dir() {
        return Err(ConfigError::InvalidValue {
            field: "data-dir".to_string(),
            reason: format!("{} is not a directory", data_dir.display()),
        }
        .into());
    }

    let declared = options.normalize(catalog)?;
    let manifest_path = data_dir.join(MANIFEST_FILE);

    if manifest_path.exists() {
        info!("Verifying {}", manifest_path.display());
        let manifest = Manifest::read(&manifest_path)?;
        let summary = verify::verify_manifest(data_dir, &manifest, &declared, catalog)?;
        info!(
            "Metadata verified: {} records, {} unlisted files",
            summary.records, summary.unlisted
        );
        return Ok(MetadataOutcome::Verified(summary));
    }

    if verify_only {
        return Err(IntegrityError::ManifestNotFound(manifest_path).into());
    }

    info!("Generating {}", manifest_path.display());
    let manifest = generate::generate_manifest(data_dir, &declared, catalog, resolver)?;
    write_manifest_file(&manifest_path, &manifest)?;
    info!("Wrote {} records to {}", manifest.records.len(), manifest_path.display());

    Ok(MetadataOutcome::Generated {
        path: manifest_path,
        records: manifest.records.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn catalog() -> SchemaCatalog {
        SchemaCatalog::from_records(vec![
            SchemaRecord::new("pedsnet", "2.0.0", &["person"]),
            SchemaRecord::new("pedsnet", "2.1.0", &["datafile1", "datafile2"]),
        ])
        .unwrap()
    }

    fn options() -> MetadataOptions {
        MetadataOptions {
            site: Some("ORG".to_string()),
            schema: Some("PEDSnet".to_string()),
            schema_version: None,
            data_version: None,
            etl: Some("https://example.org/etl".to_string()),
        }
    }

    fn data_dir() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("datafile1.csv"), "A test message").unwrap();
        fs::write(dir.path().join("datafile2.csv"), "A test message").unwrap();
        dir
    }

    #[test]
    fn test_normalize() {
        let normalized = options().normalize(&catalog()).unwrap();
        assert_eq!(normalized.schema.as_deref(), Some("pedsnet"));
        assert_eq!(normalized.schema_version.as_deref(), Some("2.1.0"));
        assert_eq!(normalized.site.as_deref(), Some("ORG"));

        let mut unknown = options();
        unknown.schema_version = Some("9.0.0".to_string());
        assert!(matches!(
            unknown.normalize(&catalog()),
            Err(Error::Config(ConfigError::InvalidValue { .. }))
        ));
    }

    #[test]
    fn test_generate_then_verify() {
        let dir = data_dir();
        let outcome =
            create_or_verify_metadata(dir.path(), &options(), &catalog(), &mut NonInteractive, false)
                .unwrap();
        assert!(matches!(outcome, MetadataOutcome::Generated { records: 2, .. }));
        assert!(dir.path().join(MANIFEST_FILE).is_file());

        // Verification is repeatable
        for _ in 0..2 {
            let outcome = create_or_verify_metadata(
                dir.path(),
                &options(),
                &catalog(),
                &mut NonInteractive,
                true,
            )
            .unwrap();
            assert_eq!(
                outcome,
                MetadataOutcome::Verified(VerifySummary {
                    records: 2,
                    unlisted: 0
                })
            );
        }
    }

    #[test]
    fn test_verify_only_without_manifest() {
        let dir = data_dir();
        assert!(matches!(
            create_or_verify_metadata(dir.path(), &options(), &catalog(), &mut NonInteractive, true),
            Err(Error::Integrity(IntegrityError::ManifestNotFound(_)))
        ));
        assert!(!dir.path().join(MANIFEST_FILE).exists());
    }

    #[test]
    fn test_missing_data_dir() {
        assert!(matches!(
            create_or_verify_metadata(
                Path::new("/nonexistent/data"),
                &options(),
                &catalog(),
                &mut NonInteractive,
                false
            ),
            Err(Error::Config(ConfigError::InvalidValue { .. }))
        ));
    }

    #[test]
    fn test_manifest_not_overwritten() {
        let dir = data_dir();
        let path = dir.path().join(MANIFEST_FILE);
        fs::write(&path, "existing").unwrap();
        assert!(matches!(
            write_manifest_file(&path, &Manifest::new(Vec::new())),
            Err(Error::Integrity(IntegrityError::ManifestExists(_)))
        ));
        assert_eq!(fs::read_to_string(&path).unwrap(), "existing");
    }

    #[test]
    fn test_data_files_skip_manifest() {
        let dir = data_dir();
        fs::write(dir.path().join(MANIFEST_FILE), "x").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested/notes.txt"), "x").unwrap();

        let files = data_files(dir.path()).unwrap();
        let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["datafile1.csv", "datafile2.csv", "nested/notes.txt"]);
        assert!(!files[2].is_csv());
    }
}

// tests/metadata.rs

//! Manifest generation and verification against a schema catalog.

mod common;

use common::*;
use datapack::metadata::{Field, Manifest};
use datapack::{
    create_or_verify_metadata, Config, ConfigError, Error, IntegrityError, MetadataOptions,
    MetadataOutcome, NonInteractive, SchemaCatalog, TerminalResolver, VerifySummary,
    MANIFEST_FILE,
};
use std::fs;
use std::io::Cursor;

#[test]
fn test_generated_manifest_contents() {
    let data = data_dir();
    let outcome = create_or_verify_metadata(
        data.path(),
        &metadata_options(),
        &catalog(),
        &mut NonInteractive,
        false,
    )
    .unwrap();
    assert!(matches!(outcome, MetadataOutcome::Generated { records: 2, .. }));

    let text = fs::read_to_string(data.path().join(MANIFEST_FILE)).unwrap();
    let header = text.lines().next().unwrap();
    assert_eq!(
        header,
        "\"organization\",\"filename\",\"checksum\",\"schema-name\",\"schema-version\",\"table\",\"etl\",\"data-version\""
    );

    let manifest = Manifest::read(&data.path().join(MANIFEST_FILE)).unwrap();
    let first = &manifest.records[0];
    assert_eq!(first.get(Field::Organization), "ORG");
    assert_eq!(first.get(Field::Filename), "datafile1.csv");
    assert_eq!(first.get(Field::Table), "datafile1");
    assert_eq!(first.get(Field::SchemaVersion), "2.1.0");
    assert_eq!(
        first.get(Field::Checksum),
        datapack::hash::sha256(MESSAGE.as_bytes())
    );
}

#[test]
fn test_verification_is_idempotent() {
    let data = data_dir();
    create_or_verify_metadata(
        data.path(),
        &metadata_options(),
        &catalog(),
        &mut NonInteractive,
        false,
    )
    .unwrap();

    let first = verify(data.path()).unwrap();
    let second = verify(data.path()).unwrap();
    assert_eq!(first, second);
    assert_eq!(
        first,
        MetadataOutcome::Verified(VerifySummary {
            records: 2,
            unlisted: 0
        })
    );
}

#[test]
fn test_missing_header_field_rejected_before_reading_files() {
    let data = TempDirWithManifest::new(
        "organization,filename,schema-name,schema-version,table,etl\n\
         ORG,gone.csv,pedsnet,2.1.0,person,etl\n",
    );
    assert!(matches!(
        verify(data.path()),
        Err(Error::Integrity(IntegrityError::MissingHeaderField(field))) if field == "checksum"
    ));
}

#[test]
fn test_unexpected_header_field() {
    let data = TempDirWithManifest::new(
        "organization,filename,checksum,schema-name,schema-version,table,etl,color\n",
    );
    assert!(matches!(
        verify(data.path()),
        Err(Error::Integrity(IntegrityError::UnexpectedHeaderField(_)))
    ));
}

#[test]
fn test_declared_site_mismatch() {
    let data = data_dir();
    create_or_verify_metadata(
        data.path(),
        &metadata_options(),
        &catalog(),
        &mut NonInteractive,
        false,
    )
    .unwrap();

    let other_site = MetadataOptions {
        site: Some("OTHER".to_string()),
        ..metadata_options()
    };
    match create_or_verify_metadata(data.path(), &other_site, &catalog(), &mut NonInteractive, true)
    {
        Err(Error::Integrity(err)) => {
            let issues = err.issues();
            assert_eq!(issues.len(), 2);
            assert!(issues.iter().all(|issue| matches!(
                issue,
                IntegrityError::FieldMismatch { field, .. } if field == "organization"
            )));
        }
        other => panic!("expected field mismatch, got {other:?}"),
    }
}

#[test]
fn test_unknown_declared_schema_fails_before_generation() {
    let data = data_dir();
    let options = MetadataOptions {
        schema: Some("omop".to_string()),
        ..metadata_options()
    };
    assert!(matches!(
        create_or_verify_metadata(data.path(), &options, &catalog(), &mut NonInteractive, false),
        Err(Error::Config(ConfigError::InvalidValue { .. }))
    ));
    assert!(!data.path().join(MANIFEST_FILE).exists());
}

#[test]
fn test_terminal_prompts_fill_missing_values() {
    let data = data_dir();
    fs::write(data.path().join("visits.csv"), "id\n").unwrap();

    // site, schema, version (one invalid answer first), etl, table for visits.csv
    let input = "ORG\npedsnet\n9.9\n2.1.0\nhttps://github.com/example/etl\nperson\n";
    let mut prompts = Vec::new();
    let mut resolver = TerminalResolver::new(Cursor::new(input), &mut prompts);

    let outcome = create_or_verify_metadata(
        data.path(),
        &MetadataOptions::default(),
        &catalog(),
        &mut resolver,
        false,
    )
    .unwrap();
    assert!(matches!(outcome, MetadataOutcome::Generated { records: 3, .. }));

    let prompts = String::from_utf8(prompts).unwrap();
    assert!(prompts.contains("Please provide site name: "));
    assert!(prompts.contains("Invalid input, please choose from '2.0.0, 2.1.0'."));
    assert!(prompts.contains("Please provide table name for 'visits.csv': "));

    let manifest = Manifest::read(&data.path().join(MANIFEST_FILE)).unwrap();
    assert_eq!(manifest.records[2].filename, "visits.csv");
    assert_eq!(manifest.records[2].table, "person");
}

#[test]
fn test_non_interactive_missing_value() {
    let data = data_dir();
    let options = MetadataOptions {
        etl: None,
        ..metadata_options()
    };
    assert!(matches!(
        create_or_verify_metadata(data.path(), &options, &catalog(), &mut NonInteractive, false),
        Err(Error::Config(ConfigError::MissingField(_)))
    ));
}

#[test]
fn test_catalog_file_from_config() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("catalog.json");
    fs::write(&path, CATALOG_JSON).unwrap();

    let config = Config {
        catalog_file: Some(path),
        ..Default::default()
    };
    let source = config.schema_source().unwrap();
    let catalog = SchemaCatalog::fetch(source.as_ref()).unwrap();
    assert_eq!(catalog.latest_version("pedsnet"), Some("2.1.0"));
    assert!(catalog.has_table("pedsnet", "2.1.0", "datafile2"));
}

/// A data directory holding only a hand-written manifest
struct TempDirWithManifest(tempfile::TempDir);

impl TempDirWithManifest {
    fn new(manifest: &str) -> Self {
        let dir = tempfile::TempDir::new().unwrap();
        fs::write(dir.path().join(MANIFEST_FILE), manifest).unwrap();
        Self(dir)
    }

    fn path(&self) -> &std::path::Path {
        self.0.path()
    }
}

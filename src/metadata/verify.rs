// src/metadata/verify.rs
//! Manifest verification
//!
//! Verification runs in two passes. The structural pass checks every record
//! (required values, declared constraints, schema/version and table against
//! the catalog) without touching the data files, and reports every problem
//! it finds at once. Only when the structure is sound does the checksum pass
//! open and hash the referenced files.

use super::catalog::SchemaCatalog;
use super::manifest::{Field, Manifest, Record};
use super::{data_files, MetadataOptions};
use crate::error::{IntegrityError, Result};
use crate::hash;
use crate::path;
use std::path::Path;
use tracing::{debug, info, warn};

/// Result of a successful verification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VerifySummary {
    /// Records verified
    pub records: usize,
    /// Data files present in the directory but not in the manifest
    pub unlisted: usize,
}

fn mismatch(record: &Record, field: Field, expected: &str, actual: &str) -> IntegrityError {
    IntegrityError::FieldMismatch {
        line: record.line,
        field: field.name().to_string(),
        expected: expected.to_string(),
        actual: actual.to_string(),
    }
}

fn check_record(
    record: &Record,
    declared: &MetadataOptions,
    catalog: &SchemaCatalog,
    issues: &mut Vec<IntegrityError>,
) {
    let missing = record.missing_fields();
    if !missing.is_empty() {
        issues.extend(missing.into_iter().map(|field| IntegrityError::MissingField {
            line: record.line,
            field: field.name().to_string(),
        }));
        return;
    }

    if let Err(e) = path::sanitize_entry_name(&record.filename) {
        issues.push(IntegrityError::MalformedManifest {
            line: record.line,
            reason: e.to_string(),
        });
    }

    if let Some(site) = &declared.site {
        if record.organization != *site {
            issues.push(mismatch(record, Field::Organization, site, &record.organization));
        }
    }
    if let Some(schema) = &declared.schema {
        if record.schema_name != *schema {
            issues.push(mismatch(record, Field::SchemaName, schema, &record.schema_name));
        }
    }
    if let Some(data_version) = &declared.data_version {
        if !record.data_version.is_empty() && record.data_version != *data_version {
            issues.push(mismatch(
                record,
                Field::DataVersion,
                data_version,
                &record.data_version,
            ));
        }
    }

    let Some(version) = catalog.resolve_version(&record.schema_name, &record.schema_version)
    else {
        issues.push(IntegrityError::UnknownSchema {
            line: record.line,
            schema: record.schema_name.clone(),
            version: record.schema_version.clone(),
        });
        return;
    };
    if record.schema_version.is_empty() {
        debug!("line {} defaults to {} version {}", record.line, record.schema_name, version);
    }

    if let Some(expected) = &declared.schema_version {
        if version != *expected {
            issues.push(mismatch(record, Field::SchemaVersion, expected, &version));
        }
    }

    if !catalog.has_table(&record.schema_name, &version, &record.table) {
        issues.push(IntegrityError::UnknownTable {
            line: record.line,
            table: record.table.clone(),
            schema: record.schema_name.clone(),
            version,
        });
    }
}

/// Check every record against the declared values and the catalog
///
/// Performs no file I/O.
pub fn check_records(
    manifest: &Manifest,
    declared: &MetadataOptions,
    catalog: &SchemaCatalog,
) -> Result<()> {
    let mut issues = Vec::new();
    for record in &manifest.records {
        check_record(record, declared, catalog, &mut issues);
    }

    match IntegrityError::from_issues(issues) {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}

/// Check the recorded checksum of every listed file
///
/// Every file is checked; missing, unreadable and mismatched files are
/// reported together.
pub fn verify_checksums(data_dir: &Path, manifest: &Manifest) -> Result<()> {
    let mut issues = Vec::new();

    for record in &manifest.records {
        let file_path = match path::safe_join(data_dir, &record.filename) {
            Ok(file_path) => file_path,
            Err(e) => {
                issues.push(IntegrityError::MalformedManifest {
                    line: record.line,
                    reason: e.to_string(),
                });
                continue;
            }
        };

        if !file_path.is_file() {
            issues.push(IntegrityError::MissingDataFile {
                line: record.line,
                filename: record.filename.clone(),
            });
            continue;
        }

        info!("Validating '{}' checksum", record.filename);
        let actual = match hash::hash_file(&file_path) {
            Ok(actual) => actual,
            Err(e) => {
                warn!("failed to read {}: {}", file_path.display(), e);
                issues.push(IntegrityError::UnreadableDataFile {
                    line: record.line,
                    filename: record.filename.clone(),
                    reason: e.to_string(),
                });
                continue;
            }
        };

        if !hash::checksums_match(&record.checksum, &actual) {
            issues.push(IntegrityError::ChecksumMismatch {
                line: record.line,
                filename: record.filename.clone(),
                expected: record.checksum.clone(),
                actual,
            });
        }
    }

    match IntegrityError::from_issues(issues) {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}

/// Verify `manifest` against the catalog and the files under `data_dir`
pub fn verify_manifest(
    data_dir: &Path,
    manifest: &Manifest,
    declared: &MetadataOptions,
    catalog: &SchemaCatalog,
) -> Result<VerifySummary> {
    check_records(manifest, declared, catalog)?;
    verify_checksums(data_dir, manifest)?;

    let mut unlisted = 0;
    for file in data_files(data_dir)? {
        if file.is_csv() && !manifest.lists(&file.name) {
            warn!("'{}' is not listed in the metadata file", file.name);
            unlisted += 1;
        }
    }

    Ok(VerifySummary {
        records: manifest.records.len(),
        unlisted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::metadata::catalog::SchemaRecord;
    use std::fs;
    use tempfile::TempDir;

    fn catalog() -> SchemaCatalog {
        SchemaCatalog::from_records(vec![
            SchemaRecord::new("pedsnet", "2.0.0", &["person"]),
            SchemaRecord::new("pedsnet", "2.1.0", &["person", "visit_occurrence"]),
        ])
        .unwrap()
    }

    fn manifest_text(rows: &[&str]) -> String {
        let mut text = String::from(
            "organization,filename,checksum,schema-name,schema-version,table,etl,data-version\n",
        );
        for row in rows {
            text.push_str(row);
            text.push('\n');
        }
        text
    }

    fn parse(rows: &[&str]) -> Manifest {
        Manifest::parse(manifest_text(rows).as_bytes()).unwrap()
    }

    fn issues(result: Result<()>) -> Vec<IntegrityError> {
        match result {
            Err(Error::Integrity(err)) => err.issues().into_iter().cloned().collect(),
            other => panic!("expected integrity error, got {:?}", other),
        }
    }

    #[test]
    fn test_structural_problems_are_collected() {
        let manifest = parse(&[
            "ORG,a.csv,00,pedsnet,2.1.0,person,etl,",
            "ORG,b.csv,,pedsnet,2.1.0,person,etl,",
            "ORG,c.csv,00,omop,5.0,person,etl,",
            "ORG,d.csv,00,pedsnet,2.0.0,visit_occurrence,etl,",
        ]);
        let found = issues(check_records(&manifest, &MetadataOptions::default(), &catalog()));
        assert_eq!(found.len(), 3);
        assert!(matches!(&found[0], IntegrityError::MissingField { line: 3, field } if field == "checksum"));
        assert!(matches!(&found[1], IntegrityError::UnknownSchema { line: 4, .. }));
        assert!(matches!(&found[2], IntegrityError::UnknownTable { line: 5, table, .. } if table == "visit_occurrence"));
    }

    #[test]
    fn test_empty_version_defaults_to_latest() {
        let manifest = parse(&["ORG,a.csv,00,pedsnet,,visit_occurrence,etl,"]);
        let declared = MetadataOptions {
            schema_version: Some("2.1.0".to_string()),
            ..Default::default()
        };
        check_records(&manifest, &declared, &catalog()).unwrap();
    }

    #[test]
    fn test_declared_constraints() {
        let manifest = parse(&["Other,a.csv,00,pedsnet,2.0.0,person,etl,v2"]);
        let declared = MetadataOptions {
            site: Some("ORG".to_string()),
            schema: Some("pedsnet".to_string()),
            schema_version: Some("2.1.0".to_string()),
            data_version: Some("v1".to_string()),
            etl: None,
        };
        let found = issues(check_records(&manifest, &declared, &catalog()));
        let fields: Vec<&str> = found
            .iter()
            .map(|issue| match issue {
                IntegrityError::FieldMismatch { line: 2, field, .. } => field.as_str(),
                other => panic!("unexpected issue {other:?}"),
            })
            .collect();
        assert_eq!(fields, vec!["organization", "data-version", "schema-version"]);
    }

    #[test]
    fn test_empty_data_version_is_accepted() {
        let manifest = parse(&["ORG,a.csv,00,pedsnet,2.1.0,person,etl,"]);
        let declared = MetadataOptions {
            data_version: Some("v1".to_string()),
            ..Default::default()
        };
        check_records(&manifest, &declared, &catalog()).unwrap();
    }

    #[test]
    fn test_checksums() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.csv"), "A test message").unwrap();
        fs::write(dir.path().join("b.csv"), "A test message").unwrap();
        let good = hash::sha256(b"A test message");

        let manifest = parse(&[
            format!("ORG,a.csv,{good},pedsnet,2.1.0,person,etl,").as_str(),
            format!("ORG,b.csv,{},pedsnet,2.1.0,person,etl,", good.to_uppercase()).as_str(),
        ]);
        let summary =
            verify_manifest(dir.path(), &manifest, &MetadataOptions::default(), &catalog())
                .unwrap();
        assert_eq!(summary, VerifySummary { records: 2, unlisted: 0 });

        fs::write(dir.path().join("b.csv"), "A test messagf").unwrap();
        let found = issues(verify_checksums(dir.path(), &manifest));
        assert_eq!(found.len(), 1);
        assert!(matches!(
            &found[0],
            IntegrityError::ChecksumMismatch { line: 3, filename, .. } if filename == "b.csv"
        ));
    }

    #[test]
    fn test_missing_data_file_and_unlisted() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("extra.csv"), "x").unwrap();
        let manifest = parse(&["ORG,gone.csv,00,pedsnet,2.1.0,person,etl,"]);
        let found = issues(verify_checksums(dir.path(), &manifest));
        assert!(matches!(&found[0], IntegrityError::MissingDataFile { line: 2, .. }));

        let manifest = Manifest::new(Vec::new());
        let summary =
            verify_manifest(dir.path(), &manifest, &MetadataOptions::default(), &catalog())
                .unwrap();
        assert_eq!(summary.unlisted, 1);
    }

    #[test]
    fn test_traversal_in_filename_is_structural() {
        let manifest = parse(&[
            "ORG,../secret.csv,00,pedsnet,2.1.0,person,etl,",
            "ORG,b.csv,00,omop,5.0,person,etl,",
        ]);
        let found = issues(check_records(&manifest, &MetadataOptions::default(), &catalog()));
        assert_eq!(found.len(), 2);
        assert!(matches!(&found[0], IntegrityError::MalformedManifest { line: 2, .. }));
        assert!(matches!(&found[1], IntegrityError::UnknownSchema { line: 3, .. }));
    }

    #[test]
    fn test_checksum_pass_reports_every_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("bad.csv"), "changed").unwrap();
        let good = hash::sha256(b"A test message");

        let manifest = parse(&[
            format!("ORG,gone.csv,{good},pedsnet,2.1.0,person,etl,").as_str(),
            format!("ORG,../escape.csv,{good},pedsnet,2.1.0,person,etl,").as_str(),
            format!("ORG,bad.csv,{good},pedsnet,2.1.0,person,etl,").as_str(),
        ]);
        let found = issues(verify_checksums(dir.path(), &manifest));
        assert_eq!(found.len(), 3);
        assert!(matches!(&found[0], IntegrityError::MissingDataFile { line: 2, .. }));
        assert!(matches!(&found[1], IntegrityError::MalformedManifest { line: 3, .. }));
        assert!(matches!(
            &found[2],
            IntegrityError::ChecksumMismatch { line: 4, filename, .. } if filename == "bad.csv"
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_file_is_an_issue() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let locked = dir.path().join("locked.csv");
        fs::write(&locked, "secret").unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
        if fs::File::open(&locked).is_ok() {
            // Running as root; permissions are not enforced
            return;
        }
        fs::write(dir.path().join("bad.csv"), "changed").unwrap();

        let manifest = parse(&[
            "ORG,locked.csv,00,pedsnet,2.1.0,person,etl,",
            "ORG,bad.csv,00,pedsnet,2.1.0,person,etl,",
        ]);
        let found = issues(verify_checksums(dir.path(), &manifest));
        assert_eq!(found.len(), 2);
        assert!(matches!(&found[0], IntegrityError::UnreadableDataFile { line: 2, .. }));
        assert!(matches!(&found[1], IntegrityError::ChecksumMismatch { line: 3, .. }));
    }
}

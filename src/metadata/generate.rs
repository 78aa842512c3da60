// src/metadata/generate.rs
//! Manifest generation for a data directory without one

use super::catalog::SchemaCatalog;
use super::manifest::{Field, Manifest, Record};
use super::prompt::FieldResolver;
use super::{data_files, MetadataOptions};
use crate::error::{ConfigError, Error, FormatError, Result};
use crate::hash;
use std::path::Path;
use tracing::{debug, info};

/// Values shared by every generated row
struct RowValues {
    site: String,
    schema: String,
    version: String,
    etl: String,
    data_version: String,
}

fn collect_values(
    options: &MetadataOptions,
    catalog: &SchemaCatalog,
    resolver: &mut dyn FieldResolver,
) -> Result<RowValues> {
    let site = match &options.site {
        Some(site) => site.clone(),
        None => resolver.resolve_missing_field("site name", &[])?,
    };

    let schema = match &options.schema {
        Some(schema) => schema.clone(),
        None => resolver
            .resolve_missing_field("schema name", &catalog.schema_names())?
            .to_lowercase(),
    };

    let version = match &options.schema_version {
        Some(version) => version.clone(),
        None => {
            let choices = catalog.versions(&schema).unwrap_or_default().to_vec();
            resolver
                .resolve_missing_field("schema version", &choices)?
                .to_lowercase()
        }
    };

    if !catalog.has_version(&schema, &version) {
        return Err(ConfigError::InvalidValue {
            field: "schema".to_string(),
            reason: format!("schema '{schema}' version '{version}' not found in schema catalog"),
        }
        .into());
    }

    let etl = match &options.etl {
        Some(etl) => etl.clone(),
        None => resolver.resolve_missing_field("etl code URL", &[])?,
    };

    Ok(RowValues {
        site,
        schema,
        version,
        etl,
        data_version: options.data_version.clone().unwrap_or_default(),
    })
}

/// Build a manifest describing every data file under `data_dir`
///
/// `options` must already be normalized against `catalog`. Table names are
/// taken from the file name when the catalog knows them; otherwise the
/// resolver is asked. Files are listed in sorted path order.
pub fn generate_manifest(
    data_dir: &Path,
    options: &MetadataOptions,
    catalog: &SchemaCatalog,
    resolver: &mut dyn FieldResolver,
) -> Result<Manifest> {
    let values = collect_values(options, catalog, resolver)?;
    let tables = catalog.tables(&values.schema, &values.version);

    let mut records = Vec::new();
    for file in data_files(data_dir)? {
        if !file.is_csv() {
            return Err(FormatError::UnexpectedFileType(format!(
                "non-csv file found: {}",
                file.path.display()
            ))
            .into());
        }

        let stem = file
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        let table = if tables.iter().any(|t| *t == stem) {
            stem
        } else {
            resolver
                .resolve_missing_field(&format!("table name for '{}'", file.name), tables)?
                .to_lowercase()
        };

        info!("Calculating '{}' checksum", file.name);
        let checksum = hash::hash_file(&file.path).map_err(|e| {
            Error::IoError(format!("failed to read {}: {e}", file.path.display()))
        })?;

        let mut record = Record {
            line: records.len() as u64 + 2,
            ..Default::default()
        };
        record.set(Field::Organization, &values.site);
        record.set(Field::Filename, &file.name);
        record.set(Field::Checksum, &checksum);
        record.set(Field::SchemaName, &values.schema);
        record.set(Field::SchemaVersion, &values.version);
        record.set(Field::Table, &table);
        record.set(Field::Etl, &values.etl);
        record.set(Field::DataVersion, &values.data_version);
        debug!("manifest row {}: {} -> {}", record.line, file.name, table);
        records.push(record);
    }

    Ok(Manifest::new(records))
}

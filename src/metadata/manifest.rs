// src/metadata/manifest.rs
//! The `metadata.csv` manifest
//!
//! A header row names the fields present, followed by one row per data file.
//! Parsing is strict: unknown header names are rejected, required header
//! names must be present, and every row must have exactly as many values as
//! the header. Names and values are lower-cased on read, except the values of
//! `organization`, `filename` and `etl`, which are kept verbatim.

use crate::error::{Error, IntegrityError, Result};
use csv::{QuoteStyle, ReaderBuilder, StringRecord, Trim, WriterBuilder};
use std::fmt;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

/// File name of the manifest inside a data directory
pub const MANIFEST_FILE: &str = "metadata.csv";

/// Manifest fields in canonical order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Organization,
    Filename,
    Checksum,
    SchemaName,
    SchemaVersion,
    Table,
    Etl,
    DataVersion,
}

impl Field {
    /// All fields, in the order they are written
    pub const CANONICAL: [Field; 8] = [
        Field::Organization,
        Field::Filename,
        Field::Checksum,
        Field::SchemaName,
        Field::SchemaVersion,
        Field::Table,
        Field::Etl,
        Field::DataVersion,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Organization => "organization",
            Self::Filename => "filename",
            Self::Checksum => "checksum",
            Self::SchemaName => "schema-name",
            Self::SchemaVersion => "schema-version",
            Self::Table => "table",
            Self::Etl => "etl",
            Self::DataVersion => "data-version",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::CANONICAL.into_iter().find(|f| f.name() == name)
    }

    /// Whether the field must be in the header and non-empty in every row
    pub fn required(&self) -> bool {
        !matches!(self, Self::SchemaVersion | Self::DataVersion)
    }

    /// Whether values of this field keep their case
    pub fn preserves_case(&self) -> bool {
        matches!(self, Self::Organization | Self::Filename | Self::Etl)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One manifest row
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    /// Line number in the manifest (the header is line 1)
    pub line: u64,
    pub organization: String,
    pub filename: String,
    pub checksum: String,
    pub schema_name: String,
    pub schema_version: String,
    pub table: String,
    pub etl: String,
    pub data_version: String,
}

impl Record {
    pub fn get(&self, field: Field) -> &str {
        match field {
            Field::Organization => &self.organization,
            Field::Filename => &self.filename,
            Field::Checksum => &self.checksum,
            Field::SchemaName => &self.schema_name,
            Field::SchemaVersion => &self.schema_version,
            Field::Table => &self.table,
            Field::Etl => &self.etl,
            Field::DataVersion => &self.data_version,
        }
    }

    fn slot(&mut self, field: Field) -> &mut String {
        match field {
            Field::Organization => &mut self.organization,
            Field::Filename => &mut self.filename,
            Field::Checksum => &mut self.checksum,
            Field::SchemaName => &mut self.schema_name,
            Field::SchemaVersion => &mut self.schema_version,
            Field::Table => &mut self.table,
            Field::Etl => &mut self.etl,
            Field::DataVersion => &mut self.data_version,
        }
    }

    /// Set a field, applying case normalization
    pub fn set(&mut self, field: Field, value: &str) {
        *self.slot(field) = if field.preserves_case() {
            value.to_string()
        } else {
            value.to_lowercase()
        };
    }

    /// Required fields that are empty in this row
    pub fn missing_fields(&self) -> Vec<Field> {
        Field::CANONICAL
            .into_iter()
            .filter(|f| f.required() && self.get(*f).trim().is_empty())
            .collect()
    }
}

/// A parsed or generated manifest
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    pub header: Vec<Field>,
    pub records: Vec<Record>,
}

fn csv_error(err: csv::Error) -> Error {
    let line = err.position().map(|p| p.line()).unwrap_or(0);
    IntegrityError::MalformedManifest {
        line,
        reason: err.to_string(),
    }
    .into()
}

impl Manifest {
    /// A manifest with the canonical header and the given rows
    pub fn new(records: Vec<Record>) -> Self {
        Self {
            header: Field::CANONICAL.to_vec(),
            records,
        }
    }

    /// Parse a manifest strictly
    pub fn parse<R: Read>(reader: R) -> Result<Self> {
        let mut csv_reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(false)
            .trim(Trim::None)
            .from_reader(reader);

        let mut rows = csv_reader.records();
        let header_row = match rows.next() {
            Some(row) => row.map_err(csv_error)?,
            None => {
                return Err(IntegrityError::MalformedManifest {
                    line: 1,
                    reason: "empty metadata file".to_string(),
                }
                .into());
            }
        };
        let header = Self::parse_header(&header_row)?;

        let mut records = Vec::new();
        for row in rows {
            let row = row.map_err(csv_error)?;
            let line = row.position().map(|p| p.line()).unwrap_or(0);

            let mut record = Record {
                line,
                ..Default::default()
            };
            for (field, value) in header.iter().zip(row.iter()) {
                record.set(*field, value);
            }
            records.push(record);
        }

        Ok(Self { header, records })
    }

    fn parse_header(row: &StringRecord) -> Result<Vec<Field>> {
        let mut header = Vec::with_capacity(row.len());
        for raw in row.iter() {
            let field = Field::from_name(&raw.to_lowercase())
                .ok_or_else(|| IntegrityError::UnexpectedHeaderField(raw.to_string()))?;
            if header.contains(&field) {
                return Err(IntegrityError::MalformedManifest {
                    line: 1,
                    reason: format!("duplicate header value '{raw}'"),
                }
                .into());
            }
            header.push(field);
        }

        if let Some(missing) = Field::CANONICAL
            .into_iter()
            .find(|f| f.required() && !header.contains(f))
        {
            return Err(IntegrityError::MissingHeaderField(missing.name().to_string()).into());
        }

        Ok(header)
    }

    /// Read and parse a manifest file
    pub fn read(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                Error::from(IntegrityError::ManifestNotFound(path.to_path_buf()))
            }
            _ => Error::IoError(format!("failed to open {}: {e}", path.display())),
        })?;
        Self::parse(file)
    }

    /// Write the manifest with every value quoted
    pub fn write<W: Write>(&self, writer: W) -> Result<()> {
        let mut csv_writer = WriterBuilder::new()
            .quote_style(QuoteStyle::Always)
            .from_writer(writer);

        csv_writer
            .write_record(self.header.iter().map(|f| f.name()))
            .map_err(csv_error)?;
        for record in &self.records {
            csv_writer
                .write_record(self.header.iter().map(|f| record.get(*f)))
                .map_err(csv_error)?;
        }
        csv_writer.flush()?;
        Ok(())
    }

    /// Whether `filename` is listed
    pub fn lists(&self, filename: &str) -> bool {
        self.records.iter().any(|r| r.filename == filename)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
\"organization\",\"filename\",\"checksum\",\"schema-name\",\"schema-version\",\"table\",\"etl\",\"data-version\"
\"ORG\",\"sub/Person.csv\",\"ABC123\",\"PEDSnet\",\"2.1.0\",\"Person\",\"https://example.org/ETL\",\"\"
\"ORG\",\"visit.csv\",\"def456\",\"pedsnet\",\"\",\"visit_occurrence\",\"https://example.org/ETL\",\"V1\"
";

    #[test]
    fn test_parse_normalizes_case() {
        let manifest = Manifest::parse(SAMPLE.as_bytes()).unwrap();
        assert_eq!(manifest.header, Field::CANONICAL.to_vec());
        assert_eq!(manifest.records.len(), 2);

        let first = &manifest.records[0];
        assert_eq!(first.line, 2);
        assert_eq!(first.organization, "ORG");
        assert_eq!(first.filename, "sub/Person.csv");
        assert_eq!(first.checksum, "abc123");
        assert_eq!(first.schema_name, "pedsnet");
        assert_eq!(first.table, "person");
        assert_eq!(first.etl, "https://example.org/ETL");

        let second = &manifest.records[1];
        assert_eq!(second.line, 3);
        assert_eq!(second.schema_version, "");
        assert_eq!(second.data_version, "v1");
    }

    #[test]
    fn test_optional_header_fields() {
        let text = "Organization,FILENAME,checksum,schema-name,table,etl\nORG,a.csv,00,pedsnet,person,x\n";
        let manifest = Manifest::parse(text.as_bytes()).unwrap();
        assert_eq!(manifest.header.len(), 6);
        assert_eq!(manifest.records[0].schema_version, "");
        assert_eq!(manifest.records[0].data_version, "");
    }

    #[test]
    fn test_unexpected_header_field() {
        let text = "organization,filename,checksum,schema-name,table,etl,site\n";
        assert!(matches!(
            Manifest::parse(text.as_bytes()),
            Err(Error::Integrity(IntegrityError::UnexpectedHeaderField(f))) if f == "site"
        ));
    }

    #[test]
    fn test_missing_header_field() {
        let text = "organization,filename,schema-name,table,etl\nORG,a.csv,pedsnet,person,x\n";
        assert!(matches!(
            Manifest::parse(text.as_bytes()),
            Err(Error::Integrity(IntegrityError::MissingHeaderField(f))) if f == "checksum"
        ));
    }

    #[test]
    fn test_ragged_rows_rejected() {
        let text = "organization,filename,checksum,schema-name,table,etl\nORG,a.csv,00\n";
        assert!(matches!(
            Manifest::parse(text.as_bytes()),
            Err(Error::Integrity(IntegrityError::MalformedManifest { line: 2, .. }))
        ));
    }

    #[test]
    fn test_empty_and_duplicate_headers() {
        assert!(matches!(
            Manifest::parse(&b""[..]),
            Err(Error::Integrity(IntegrityError::MalformedManifest { line: 1, .. }))
        ));
        let text = "organization,filename,checksum,schema-name,table,etl,table\n";
        assert!(matches!(
            Manifest::parse(text.as_bytes()),
            Err(Error::Integrity(IntegrityError::MalformedManifest { line: 1, .. }))
        ));
    }

    #[test]
    fn test_write_quotes_everything() {
        let mut record = Record::default();
        record.set(Field::Organization, "ORG");
        record.set(Field::Filename, "a,b.csv");
        record.set(Field::Checksum, "00ff");
        record.set(Field::SchemaName, "pedsnet");
        record.set(Field::SchemaVersion, "2.1.0");
        record.set(Field::Table, "person");
        record.set(Field::Etl, "https://example.org/etl");

        let mut out = Vec::new();
        Manifest::new(vec![record]).write(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("\"organization\",\"filename\",\"checksum\",\"schema-name\",\"schema-version\",\"table\",\"etl\",\"data-version\"")
        );
        assert_eq!(
            lines.next(),
            Some("\"ORG\",\"a,b.csv\",\"00ff\",\"pedsnet\",\"2.1.0\",\"person\",\"https://example.org/etl\",\"\"")
        );

        let reparsed = Manifest::parse(text.as_bytes()).unwrap();
        assert_eq!(reparsed.records[0].filename, "a,b.csv");
        assert!(reparsed.lists("a,b.csv"));
    }

    #[test]
    fn test_missing_fields() {
        let mut record = Record::default();
        record.set(Field::Organization, "ORG");
        record.set(Field::Filename, "a.csv");
        let missing = record.missing_fields();
        assert_eq!(
            missing,
            vec![Field::Checksum, Field::SchemaName, Field::Table, Field::Etl]
        );
    }

    #[test]
    fn test_read_missing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join(MANIFEST_FILE);
        assert!(matches!(
            Manifest::read(&path),
            Err(Error::Integrity(IntegrityError::ManifestNotFound(_)))
        ));
    }
}

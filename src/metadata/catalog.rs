// src/metadata/catalog.rs
//! Schema catalog
//!
//! The catalog maps schema names to their known versions and, per version,
//! the table names a data file may belong to. It is fetched once per run from
//! a [`SchemaSource`] and is read-only afterwards.
//!
//! The schema service publishes one record per schema version:
//!
//! ```json
//! [{"name": "pedsnet", "version": "2.1.0", "tables": [{"name": "person"}]}]
//! ```
//!
//! An offline catalog file uses the same JSON document.

use crate::error::{Result, ServiceError};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Default schema service
pub const DEFAULT_SERVICE: &str = "http://data-models.origins.link";

/// Timeout for schema service requests (30 seconds)
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// One schema version as published by the schema service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaRecord {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub tables: Vec<TableRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRecord {
    pub name: String,
}

impl SchemaRecord {
    pub fn new(name: &str, version: &str, tables: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            tables: tables
                .iter()
                .map(|t| TableRecord {
                    name: t.to_string(),
                })
                .collect(),
        }
    }
}

/// Provider of schema catalog data
pub trait SchemaSource {
    /// Check that the source is reachable
    fn ping(&self) -> Result<()>;

    /// List every known schema version with its tables
    fn list_schemas(&self) -> Result<Vec<SchemaRecord>>;

    /// Short description for log messages
    fn describe(&self) -> String;
}

/// Schema service reached over HTTP
pub struct HttpSchemaService {
    base_url: String,
    client: Client,
}

impl HttpSchemaService {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| ServiceError::Unreachable {
                url: base_url.to_string(),
                reason: format!("failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn get(&self, url: &str) -> Result<reqwest::blocking::Response> {
        let response = self
            .client
            .get(url)
            .header("Accept", "application/json")
            .send()
            .map_err(|e| ServiceError::Unreachable {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(ServiceError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            }
            .into());
        }
        Ok(response)
    }
}

impl SchemaSource for HttpSchemaService {
    fn ping(&self) -> Result<()> {
        let url = self.url("");
        debug!("pinging schema service at {}", url);
        self.get(&url).map(|_| ())
    }

    fn list_schemas(&self) -> Result<Vec<SchemaRecord>> {
        let url = self.url("models");
        let response = self.get(&url)?;
        response
            .json::<Vec<SchemaRecord>>()
            .map_err(|e| {
                ServiceError::InvalidResponse {
                    url,
                    reason: e.to_string(),
                }
                .into()
            })
    }

    fn describe(&self) -> String {
        self.base_url.clone()
    }
}

/// In-memory schema source, typically loaded from a catalog file
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    origin: String,
    records: Vec<SchemaRecord>,
}

impl StaticCatalog {
    pub fn new(records: Vec<SchemaRecord>) -> Self {
        Self {
            origin: "<static>".to_string(),
            records,
        }
    }

    /// Parse a catalog JSON document
    pub fn from_json(json: &str) -> Result<Self> {
        let records: Vec<SchemaRecord> = serde_json::from_str(json)
            .map_err(|e| ServiceError::InvalidCatalog(e.to_string()))?;
        Ok(Self::new(records))
    }

    /// Load a catalog JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path).map_err(|e| {
            ServiceError::InvalidCatalog(format!("failed to read {}: {e}", path.display()))
        })?;
        let mut catalog = Self::from_json(&json)?;
        catalog.origin = path.display().to_string();
        Ok(catalog)
    }
}

impl SchemaSource for StaticCatalog {
    fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn list_schemas(&self) -> Result<Vec<SchemaRecord>> {
        Ok(self.records.clone())
    }

    fn describe(&self) -> String {
        self.origin.clone()
    }
}

/// Order versions semantically when both parse, lexically otherwise
fn compare_versions(a: &str, b: &str) -> Ordering {
    match (semver::Version::parse(a), semver::Version::parse(b)) {
        (Ok(va), Ok(vb)) => va.cmp(&vb),
        _ => a.cmp(b),
    }
}

#[derive(Debug, Clone, Default)]
struct SchemaEntry {
    /// Ascending
    versions: Vec<String>,
    tables: BTreeMap<String, Vec<String>>,
}

/// Schema name → versions → table names
///
/// Names, versions and tables are stored lower-cased.
#[derive(Debug, Clone, Default)]
pub struct SchemaCatalog {
    schemas: BTreeMap<String, SchemaEntry>,
}

impl SchemaCatalog {
    /// Fetch the catalog from `source`
    pub fn fetch(source: &dyn SchemaSource) -> Result<Self> {
        info!("Fetching schema catalog from {}", source.describe());
        source.ping()?;
        let catalog = Self::from_records(source.list_schemas()?)?;
        info!("Schema catalog lists {} schemas", catalog.schemas.len());
        Ok(catalog)
    }

    /// Build the catalog from published records
    pub fn from_records(records: Vec<SchemaRecord>) -> Result<Self> {
        let mut schemas: BTreeMap<String, SchemaEntry> = BTreeMap::new();

        for record in records {
            let name = record.name.trim().to_lowercase();
            let version = record.version.trim().to_lowercase();
            if name.is_empty() || version.is_empty() {
                return Err(ServiceError::InvalidCatalog(format!(
                    "schema record with empty name or version: {:?}",
                    record
                ))
                .into());
            }

            let entry = schemas.entry(name).or_default();
            if !entry.versions.contains(&version) {
                entry.versions.push(version.clone());
            }
            let tables = entry.tables.entry(version).or_default();
            for table in record.tables {
                let table = table.name.trim().to_lowercase();
                if !tables.contains(&table) {
                    tables.push(table);
                }
            }
        }

        for entry in schemas.values_mut() {
            entry.versions.sort_by(|a, b| compare_versions(a, b));
        }

        Ok(Self { schemas })
    }

    /// Known schema names, sorted
    pub fn schema_names(&self) -> Vec<String> {
        self.schemas.keys().cloned().collect()
    }

    /// Versions of `schema`, oldest first
    pub fn versions(&self, schema: &str) -> Option<&[String]> {
        self.schemas.get(schema).map(|e| e.versions.as_slice())
    }

    pub fn latest_version(&self, schema: &str) -> Option<&str> {
        self.versions(schema)
            .and_then(|v| v.last())
            .map(String::as_str)
    }

    pub fn has_version(&self, schema: &str, version: &str) -> bool {
        self.versions(schema)
            .is_some_and(|versions| versions.iter().any(|v| v == version))
    }

    /// Resolve a possibly empty version to a known one
    ///
    /// An empty version means the schema's latest version. Returns `None`
    /// when the schema or the version is unknown.
    pub fn resolve_version(&self, schema: &str, version: &str) -> Option<String> {
        if version.is_empty() {
            return self.latest_version(schema).map(str::to_string);
        }
        self.has_version(schema, version).then(|| version.to_string())
    }

    /// Tables of one schema version
    pub fn tables(&self, schema: &str, version: &str) -> &[String] {
        self.schemas
            .get(schema)
            .and_then(|e| e.tables.get(version))
            .map(|t| t.as_slice())
            .unwrap_or(&[])
    }

    pub fn has_table(&self, schema: &str, version: &str, table: &str) -> bool {
        self.tables(schema, version).iter().any(|t| t == table)
    }
}

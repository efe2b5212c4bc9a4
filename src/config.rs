//! Server configuration and demo data files.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::ast::TypeDescriptor;
use crate::catalog::{EnumDef, RecordDef, TypeCatalog, TypeInfoProvider};
use crate::error::{Error, Result};
use crate::host::HostType;
use crate::interpreter::MemoryDataSource;
use crate::value::{self, Value};
use crate::wire::{Codec, DEFAULT_MAX_FRAME_LEN, PayloadFormat};

/// Main server configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Server bind address
    pub bind_address: String,

    /// Payload encoding inside each frame
    pub format: PayloadFormat,

    /// JSON data file served by `remoteq serve` (optional)
    pub data_path: Option<PathBuf>,

    /// Largest accepted frame payload, in bytes
    pub max_frame_len: u64,

    /// Default `tracing` filter when `RUST_LOG` is unset
    pub log_filter: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:7070".to_string(),
            format: PayloadFormat::default(),
            data_path: None,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            log_filter: "info".to_string(),
        }
    }
}

impl RemoteConfig {
    /// Create a new configuration builder
    pub fn builder() -> RemoteConfigBuilder {
        RemoteConfigBuilder::default()
    }

    /// Load a TOML file. Missing keys keep their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// `<config dir>/remoteq/config.toml`, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("remoteq").join("config.toml"))
    }

    /// Load from [`default_path`](Self::default_path) when that file exists,
    /// otherwise return the defaults.
    pub fn load_default() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(path),
            _ => Ok(Self::default()),
        }
    }

    pub fn codec(&self) -> Codec {
        Codec::new(self.format).with_max_frame_len(self.max_frame_len)
    }
}

/// Builder for RemoteConfig
#[derive(Debug, Default)]
pub struct RemoteConfigBuilder {
    config: RemoteConfig,
}

impl RemoteConfigBuilder {
    /// Set the bind address
    pub fn bind(mut self, addr: impl Into<String>) -> Self {
        self.config.bind_address = addr.into();
        self
    }

    pub fn format(mut self, format: PayloadFormat) -> Self {
        self.config.format = format;
        self
    }

    /// Set the data file
    pub fn data(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_path = Some(path.into());
        self
    }

    pub fn max_frame_len(mut self, len: u64) -> Self {
        self.config.max_frame_len = len;
        self
    }

    pub fn log_filter(mut self, filter: impl Into<String>) -> Self {
        self.config.log_filter = filter.into();
        self
    }

    /// Build the configuration
    pub fn build(self) -> RemoteConfig {
        self.config
    }
}

// ==================== Data files ====================

/// A self-contained data set: type definitions plus rows per record type.
///
/// ```json
/// {
///   "records": [{ "name": "shop.Person", "fields": { "Name": "core.String", "Age": "core.Int64" } }],
///   "enums": [{ "name": "shop.Color", "variants": ["Red", "Green"] }],
///   "rows": { "shop.Person": [{ "Name": "Ada", "Age": 36 }] }
/// }
/// ```
///
/// Field types use the descriptor text form. Rows are plain JSON objects;
/// `core.DateTime` fields are parsed from RFC 3339 strings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DataFile {
    pub records: Vec<RecordSpec>,
    pub enums: Vec<EnumSpec>,
    pub rows: IndexMap<String, Vec<serde_json::Value>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordSpec {
    pub name: String,
    #[serde(default)]
    pub fields: IndexMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnumSpec {
    pub name: String,
    pub variants: Vec<String>,
}

impl DataFile {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Build the catalog and data source described by this file.
    pub fn into_parts(self) -> Result<(TypeCatalog, MemoryDataSource)> {
        let mut catalog = TypeCatalog::new();
        for entry in &self.enums {
            let variants: Vec<&str> = entry.variants.iter().map(String::as_str).collect();
            catalog.insert_enum(EnumDef::new(&entry.name, &variants));
        }
        // Names first, so fields may refer to any record in the file.
        for entry in &self.records {
            catalog.insert_record(RecordDef::new(&entry.name));
        }
        let mut defs = Vec::with_capacity(self.records.len());
        for entry in &self.records {
            let mut def = RecordDef::new(&entry.name);
            for (field, text) in &entry.fields {
                let descriptor: TypeDescriptor = text.parse()?;
                let ty = catalog.resolve(&descriptor).map_err(|e| {
                    Error::Configuration(format!("{}.{}: {}", entry.name, field, e))
                })?;
                def = def.field(field, ty);
            }
            defs.push(def);
        }
        for def in &defs {
            catalog.insert_record(def.clone());
        }

        let mut data = MemoryDataSource::new();
        for (name, rows) in self.rows {
            let def = catalog
                .record(&name)
                .ok_or_else(|| Error::Configuration(format!("rows for undeclared record '{}'", name)))?;
            let rows = rows
                .iter()
                .map(|row| typed_row(def, value::from_json(row)))
                .collect::<Result<Vec<_>>>()?;
            tracing::debug!("Loaded {} rows of {}", rows.len(), name);
            data.insert(name, rows);
        }
        Ok((catalog, data))
    }
}

fn typed_row(def: &RecordDef, mut row: Value) -> Result<Value> {
    if let Value::Record(record) = &mut row {
        for (field, ty) in &def.fields {
            let Some(slot) = record.fields.get_mut(field) else {
                continue;
            };
            if let (HostType::Timestamp, Value::Str(text)) = (ty.unwrap_optional(), &*slot) {
                let parsed = DateTime::parse_from_rfc3339(text).map_err(|e| {
                    Error::Configuration(format!("{}.{}: {}", def.name, field, e))
                })?;
                *slot = Value::Timestamp(parsed.with_timezone(&Utc));
            }
        }
    }
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::DataSource;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = RemoteConfig::default();
        assert_eq!(config.bind_address, "127.0.0.1:7070");
        assert_eq!(config.format, PayloadFormat::Json);
        assert_eq!(config.max_frame_len, 256 * 1024 * 1024);
        assert_eq!(config.log_filter, "info");
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "bind_address = \"0.0.0.0:9000\"\nformat = \"binary\"").unwrap();
        let config = RemoteConfig::load(file.path()).unwrap();
        assert_eq!(
            config,
            RemoteConfig::builder()
                .bind("0.0.0.0:9000")
                .format(PayloadFormat::Binary)
                .build()
        );
        assert_eq!(config.codec().format(), PayloadFormat::Binary);
    }

    #[test]
    fn test_bad_toml_is_configuration_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "format = \"yaml\"").unwrap();
        assert!(matches!(
            RemoteConfig::load(file.path()),
            Err(Error::Configuration(_))
        ));
    }

    const DATA: &str = r#"{
        "enums": [{ "name": "shop.Tier", "variants": ["Basic", "Gold"] }],
        "records": [
            { "name": "shop.Order", "fields": { "Id": "core.Int64", "Buyer": "shop.Customer", "Placed": "core.DateTime" } },
            { "name": "shop.Customer", "fields": { "Name": "core.String", "Tier": "enum shop.Tier" } }
        ],
        "rows": {
            "shop.Order": [{ "Id": 1, "Placed": "2024-05-01T08:30:00Z" }],
            "shop.Customer": [{ "Name": "Ada", "Tier": "Gold" }, { "Name": "Lin", "Tier": "Basic" }]
        }
    }"#;

    #[test]
    fn test_data_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        std::fs::write(&path, DATA).unwrap();

        let (catalog, data) = DataFile::load(&path).unwrap().into_parts().unwrap();
        let order = catalog.record("shop.Order").unwrap();
        assert_eq!(order.fields["Buyer"], HostType::record("shop.Customer"));
        assert_eq!(
            catalog.record("shop.Customer").unwrap().fields["Tier"],
            HostType::enumeration("shop.Tier")
        );

        let orders = data.elements(&HostType::record("shop.Order")).unwrap();
        let placed = orders[0].as_record().unwrap().get("Placed").unwrap();
        assert!(matches!(placed, Value::Timestamp(_)));
        assert_eq!(
            data.elements(&HostType::record("shop.Customer")).unwrap().len(),
            2
        );
    }

    #[test]
    fn test_data_file_rejects_unknown_types() {
        let file: DataFile = serde_json::from_str(
            r#"{ "records": [{ "name": "a.B", "fields": { "C": "a.Missing" } }] }"#,
        )
        .unwrap();
        assert!(matches!(file.into_parts(), Err(Error::Configuration(_))));

        let file: DataFile = serde_json::from_str(r#"{ "rows": { "a.B": [] } }"#).unwrap();
        assert!(matches!(file.into_parts(), Err(Error::Configuration(_))));
    }
}

//! Typed feed record definitions
//!
//! Every datalake table has a record struct implementing [`Record`]. The
//! struct's [`TableSchema`] fixes the field order used both for positional
//! parsing of feed lines and for SQL column lists. [`FeedTable`] is the
//! registry that maps configuration names to those schemas and validates raw
//! captures into [`FeedRecord`]s.

use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::error::EtlError;

/// Declared type of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Text,
    Integer,
    Boolean,
    Decimal,
    Timestamp,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Text => write!(f, "text"),
            FieldType::Integer => write!(f, "integer"),
            FieldType::Boolean => write!(f, "boolean"),
            FieldType::Decimal => write!(f, "decimal"),
            FieldType::Timestamp => write!(f, "timestamp"),
        }
    }
}

/// A single field value. `Null` stands for an absent or blank capture.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FieldValue {
    Null,
    Text(String),
    Integer(i64),
    Boolean(bool),
    /// Fixed-point number, `mantissa * 10^-scale`
    Decimal { mantissa: i64, scale: u32 },
    Timestamp(DateTime<Utc>),
}

impl FieldValue {
    /// Runtime type of the value, `None` for `Null`
    pub fn field_type(&self) -> Option<FieldType> {
        match self {
            FieldValue::Null => None,
            FieldValue::Text(_) => Some(FieldType::Text),
            FieldValue::Integer(_) => Some(FieldType::Integer),
            FieldValue::Boolean(_) => Some(FieldType::Boolean),
            FieldValue::Decimal { .. } => Some(FieldType::Decimal),
            FieldValue::Timestamp(_) => Some(FieldType::Timestamp),
        }
    }

    /// Render as a SQL literal for a VALUES list
    pub fn to_sql_literal(&self) -> String {
        match self {
            FieldValue::Null => "NULL".to_string(),
            FieldValue::Text(s) => format!("'{}'", s.replace('\'', "''")),
            FieldValue::Integer(i) => i.to_string(),
            FieldValue::Boolean(true) => "TRUE".to_string(),
            FieldValue::Boolean(false) => "FALSE".to_string(),
            FieldValue::Decimal { mantissa, scale } => decimal_literal(*mantissa, *scale),
            FieldValue::Timestamp(ts) => format!("'{}'", ts.to_rfc3339()),
        }
    }
}

fn decimal_literal(mantissa: i64, scale: u32) -> String {
    if scale == 0 {
        return mantissa.to_string();
    }
    let sign = if mantissa < 0 { "-" } else { "" };
    let abs = mantissa.unsigned_abs();
    let unit = 10u64.pow(scale);
    format!(
        "{}{}.{:0width$}",
        sign,
        abs / unit,
        abs % unit,
        width = scale as usize
    )
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl From<i64> for FieldValue {
    fn from(i: i64) -> Self {
        FieldValue::Integer(i)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(ts: DateTime<Utc>) -> Self {
        FieldValue::Timestamp(ts)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(FieldValue::Null)
    }
}

/// One declared field of a table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDef {
    pub name: &'static str,
    pub field_type: FieldType,
    /// Storage column name when it differs from `name`
    pub renamed: Option<&'static str>,
}

impl FieldDef {
    pub const fn new(name: &'static str, field_type: FieldType) -> Self {
        Self {
            name,
            field_type,
            renamed: None,
        }
    }

    pub const fn renamed(mut self, column: &'static str) -> Self {
        self.renamed = Some(column);
        self
    }

    /// Storage column name
    pub fn column(&self) -> &'static str {
        self.renamed.unwrap_or(self.name)
    }
}

/// Field layout of one table
#[derive(Debug, PartialEq, Eq)]
pub struct TableSchema {
    pub name: &'static str,
    pub fields: &'static [FieldDef],
}

impl TableSchema {
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Captured field names, in declaration order
    pub fn field_names(&self) -> Vec<&'static str> {
        self.fields.iter().map(|f| f.name).collect()
    }

    /// Storage column names, in declaration order
    pub fn columns(&self) -> Vec<&'static str> {
        self.fields.iter().map(FieldDef::column).collect()
    }

    /// (captured name, storage column) pairs
    pub fn rename_mapping(&self) -> Vec<(&'static str, &'static str)> {
        self.fields.iter().map(|f| (f.name, f.column())).collect()
    }

    pub fn field(&self, name: &str) -> Option<&'static FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Why a raw capture was rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationErrorKind {
    TypeMismatch {
        expected: FieldType,
        actual: FieldType,
    },
    UnknownField,
}

impl fmt::Display for ValidationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationErrorKind::TypeMismatch { expected, actual } => {
                write!(f, "must be '{}' but got '{}'", expected, actual)
            },
            ValidationErrorKind::UnknownField => write!(f, "not declared by the schema"),
        }
    }
}

/// A raw capture that does not fit its table. Fatal to the line only.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid field '{field}' for table '{table}': {kind}")]
pub struct ValidationError {
    pub table: &'static str,
    pub field: String,
    pub kind: ValidationErrorKind,
}

/// Captured values keyed by field name, in capture order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawFields(Vec<(String, FieldValue)>);

impl RawFields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pair schema field names with captured parts positionally
    pub fn from_parts<I, S>(schema: &TableSchema, parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(
            schema
                .fields
                .iter()
                .zip(parts)
                .map(|(field, part)| (field.name.to_string(), FieldValue::Text(part.into())))
                .collect(),
        )
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.0.push((name.into(), value.into()));
        self
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v))
    }
}

/// Check every present field against the schema. Absent and `Null` values
/// are accepted whatever the declared type.
pub fn check_raw(schema: &'static TableSchema, raw: &RawFields) -> Result<(), ValidationError> {
    for (name, value) in raw.iter() {
        let Some(field) = schema.field(name) else {
            return Err(ValidationError {
                table: schema.name,
                field: name.to_string(),
                kind: ValidationErrorKind::UnknownField,
            });
        };

        if let Some(actual) = value.field_type() {
            if actual != field.field_type {
                return Err(ValidationError {
                    table: schema.name,
                    field: name.to_string(),
                    kind: ValidationErrorKind::TypeMismatch {
                        expected: field.field_type,
                        actual,
                    },
                });
            }
        }
    }
    Ok(())
}

fn text(raw: &RawFields, name: &str) -> Option<String> {
    match raw.get(name) {
        Some(FieldValue::Text(s)) => Some(s.clone()),
        _ => None,
    }
}

/// A statically typed row of one datalake table
pub trait Record: Sized {
    fn schema() -> &'static TableSchema;

    /// Build the record from checked raw fields
    fn from_raw(raw: &RawFields) -> Result<Self, ValidationError>;

    /// Values in schema field order
    fn into_values(self) -> Vec<FieldValue>;
}

static ADS_AND_TRACKERS: TableSchema = TableSchema {
    name: "ads_and_trackers",
    fields: &[
        FieldDef::new("ip", FieldType::Text).renamed("ip"),
        FieldDef::new("url", FieldType::Text),
    ],
};

static MALWARE: TableSchema = TableSchema {
    name: "malware",
    fields: &[FieldDef::new("url", FieldType::Text)],
};

/// Ad and tracker domains, optionally with the sinkhole address of hosts lists
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdsAndTrackers {
    pub ip: Option<String>,
    pub url: Option<String>,
}

impl Record for AdsAndTrackers {
    fn schema() -> &'static TableSchema {
        &ADS_AND_TRACKERS
    }

    fn from_raw(raw: &RawFields) -> Result<Self, ValidationError> {
        check_raw(Self::schema(), raw)?;
        Ok(Self {
            ip: text(raw, "ip"),
            url: text(raw, "url"),
        })
    }

    fn into_values(self) -> Vec<FieldValue> {
        vec![self.ip.into(), self.url.into()]
    }
}

/// Malware distribution URLs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Malware {
    pub url: Option<String>,
}

impl Record for Malware {
    fn schema() -> &'static TableSchema {
        &MALWARE
    }

    fn from_raw(raw: &RawFields) -> Result<Self, ValidationError> {
        check_raw(Self::schema(), raw)?;
        Ok(Self {
            url: text(raw, "url"),
        })
    }

    fn into_values(self) -> Vec<FieldValue> {
        vec![self.url.into()]
    }
}

/// A validated row, values ordered by storage column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedRecord {
    schema: &'static TableSchema,
    values: Vec<FieldValue>,
}

impl FeedRecord {
    fn from_record<R: Record>(raw: &RawFields) -> Result<Self, ValidationError> {
        let record = R::from_raw(raw)?;
        Ok(Self {
            schema: R::schema(),
            values: record.into_values(),
        })
    }

    pub fn table(&self) -> &'static str {
        self.schema.name
    }

    pub fn columns(&self) -> Vec<&'static str> {
        self.schema.columns()
    }

    pub fn values(&self) -> &[FieldValue] {
        &self.values
    }

    /// Value stored under a storage column name
    pub fn get(&self, column: &str) -> Option<&FieldValue> {
        self.schema
            .fields
            .iter()
            .position(|f| f.column() == column)
            .and_then(|i| self.values.get(i))
    }

    pub fn into_values(self) -> Vec<FieldValue> {
        self.values
    }
}

/// Registry of datalake tables known to the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedTable {
    AdsAndTrackers,
    Malware,
}

impl FeedTable {
    pub const ALL: [FeedTable; 2] = [FeedTable::AdsAndTrackers, FeedTable::Malware];

    pub fn schema(&self) -> &'static TableSchema {
        match self {
            FeedTable::AdsAndTrackers => AdsAndTrackers::schema(),
            FeedTable::Malware => Malware::schema(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.schema().name
    }

    /// Validate raw captures into a record of this table
    pub fn validate(&self, raw: &RawFields) -> Result<FeedRecord, ValidationError> {
        match self {
            FeedTable::AdsAndTrackers => FeedRecord::from_record::<AdsAndTrackers>(raw),
            FeedTable::Malware => FeedRecord::from_record::<Malware>(raw),
        }
    }
}

impl fmt::Display for FeedTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FeedTable {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.name() == s)
            .ok_or_else(|| EtlError::config(format!("Unknown datalake table '{}'", s)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    static RENAMED: TableSchema = TableSchema {
        name: "renamed_feed",
        fields: &[
            FieldDef::new("addr", FieldType::Text).renamed("ip_address"),
            FieldDef::new("host", FieldType::Text),
        ],
    };

    #[test]
    fn test_ads_and_trackers_validates_positional_parts() {
        let raw = RawFields::from_parts(FeedTable::AdsAndTrackers.schema(), ["", "ads.example.com"]);
        let record = FeedTable::AdsAndTrackers.validate(&raw).unwrap();

        assert_eq!(record.table(), "ads_and_trackers");
        assert_eq!(record.columns(), vec!["ip", "url"]);
        assert_eq!(
            record.values(),
            &[FieldValue::from(""), FieldValue::from("ads.example.com")]
        );
    }

    #[test]
    fn test_missing_field_becomes_null() {
        let raw = RawFields::new().with("url", "bad.test");
        let record = FeedTable::AdsAndTrackers.validate(&raw).unwrap();
        assert_eq!(record.get("ip"), Some(&FieldValue::Null));
        assert_eq!(record.get("url"), Some(&FieldValue::from("bad.test")));
    }

    #[test]
    fn test_type_mismatch_names_table_and_field() {
        let raw = RawFields::new().with("url", 42i64);
        let err = FeedTable::Malware.validate(&raw).unwrap_err();

        assert_eq!(err.table, "malware");
        assert_eq!(err.field, "url");
        assert_eq!(
            err.kind,
            ValidationErrorKind::TypeMismatch {
                expected: FieldType::Text,
                actual: FieldType::Integer
            }
        );
        assert!(err.to_string().contains("must be 'text' but got 'integer'"));
    }

    #[test]
    fn test_null_accepted_for_any_declared_type() {
        let raw = RawFields::new().with("url", FieldValue::Null);
        assert!(check_raw(&MALWARE, &raw).is_ok());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let raw = RawFields::new().with("url", "x.test").with("port", "80");
        let err = FeedTable::Malware.validate(&raw).unwrap_err();
        assert_eq!(err.kind, ValidationErrorKind::UnknownField);
        assert_eq!(err.field, "port");
    }

    #[test]
    fn test_rename_mapping_uses_storage_columns() {
        assert_eq!(RENAMED.field_names(), vec!["addr", "host"]);
        assert_eq!(RENAMED.columns(), vec!["ip_address", "host"]);
        assert_eq!(
            RENAMED.rename_mapping(),
            vec![("addr", "ip_address"), ("host", "host")]
        );
    }

    #[test]
    fn test_sql_literal_escapes_quotes() {
        assert_eq!(FieldValue::from("o'brien.test").to_sql_literal(), "'o''brien.test'");
        assert_eq!(FieldValue::Null.to_sql_literal(), "NULL");
        assert_eq!(FieldValue::Integer(7).to_sql_literal(), "7");
        assert_eq!(FieldValue::Boolean(false).to_sql_literal(), "FALSE");
        assert_eq!(
            FieldValue::Decimal { mantissa: 5, scale: 2 }.to_sql_literal(),
            "0.05"
        );
        assert_eq!(
            FieldValue::Decimal { mantissa: -1234, scale: 2 }.to_sql_literal(),
            "-12.34"
        );
    }

    #[test]
    fn test_feed_table_from_config_name() {
        assert_eq!("malware".parse::<FeedTable>().unwrap(), FeedTable::Malware);
        assert_eq!(
            "ads_and_trackers".parse::<FeedTable>().unwrap(),
            FeedTable::AdsAndTrackers
        );
        assert!("phishing".parse::<FeedTable>().is_err());
    }
}

//! Named template parameters
//!
//! Every template receives the same parameter set: `table_name`, `schema`,
//! `fields`, `delete_where`, `values` and `etl_timestamp`. Absent values render
//! as empty strings.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::schema::FieldValue;

#[derive(Debug, Clone, PartialEq)]
pub struct SqlParams {
    pub table_name: String,
    pub schema: String,
    pub fields: Vec<String>,
    /// Natural key of the target; falls back to `fields` when empty
    pub delete_where_fields: Vec<String>,
    pub values: Option<String>,
    pub etl_timestamp: DateTime<Utc>,
}

impl SqlParams {
    pub fn new(
        table_name: impl Into<String>,
        schema: impl Into<String>,
        etl_timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            table_name: table_name.into(),
            schema: schema.into(),
            fields: Vec::new(),
            delete_where_fields: Vec::new(),
            values: None,
            etl_timestamp,
        }
    }

    pub fn with_fields<S: AsRef<str>>(mut self, fields: &[S]) -> Self {
        self.fields = fields.iter().map(|f| f.as_ref().to_string()).collect();
        self
    }

    pub fn with_delete_where_fields<S: AsRef<str>>(mut self, fields: &[S]) -> Self {
        self.delete_where_fields = fields.iter().map(|f| f.as_ref().to_string()).collect();
        self
    }

    pub fn with_values<'a, I>(mut self, rows: I) -> Self
    where
        I: IntoIterator<Item = &'a Vec<FieldValue>>,
    {
        let values = build_values(rows);
        self.values = (!values.is_empty()).then_some(values);
        self
    }

    /// Join predicate between the target table and its `_temp` staging table
    pub fn delete_where(&self) -> String {
        let keys = if self.delete_where_fields.is_empty() {
            &self.fields
        } else {
            &self.delete_where_fields
        };
        build_delete_where(&self.table_name, &self.schema, keys)
    }

    /// Rendering context for [`super::template::render_str`]
    pub fn context(&self) -> BTreeMap<&'static str, String> {
        BTreeMap::from([
            ("table_name", self.table_name.clone()),
            ("schema", self.schema.clone()),
            ("fields", self.fields.join(", ")),
            ("delete_where", self.delete_where()),
            ("values", self.values.clone().unwrap_or_default()),
            ("etl_timestamp", self.etl_timestamp.to_rfc3339()),
        ])
    }
}

/// `{table}.{f} = {schema}_{table}_temp.{f}` for each key, joined with AND
pub fn build_delete_where<S: AsRef<str>>(table: &str, schema: &str, keys: &[S]) -> String {
    keys.iter()
        .map(|f| {
            let f = f.as_ref();
            format!("{table}.{f} = {schema}_{table}_temp.{f}")
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// Render rows as a VALUES list body: `(a, b), (c, d)`
pub fn build_values<'a, I>(rows: I) -> String
where
    I: IntoIterator<Item = &'a Vec<FieldValue>>,
{
    rows.into_iter()
        .map(|row| {
            let literals: Vec<String> = row.iter().map(FieldValue::to_sql_literal).collect();
            format!("({})", literals.join(", "))
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_build_values_with_empty_input() {
        let rows: Vec<Vec<FieldValue>> = Vec::new();
        assert_eq!(build_values(&rows), "");
    }

    #[test]
    fn test_build_values_with_mixed_types() {
        let rows = vec![
            vec![FieldValue::Integer(1), FieldValue::from("test"), FieldValue::from(ts())],
            vec![FieldValue::Integer(2), FieldValue::Null, FieldValue::from("it's")],
        ];
        assert_eq!(
            build_values(&rows),
            "(1, 'test', '2023-01-01T00:00:00+00:00'), (2, NULL, 'it''s')"
        );
    }

    #[test]
    fn test_params_with_explicit_delete_where_fields() {
        let params = SqlParams::new("test_table", "test_schema", ts())
            .with_fields(&["field1", "field2"])
            .with_delete_where_fields(&["field1"]);
        assert_eq!(
            params.delete_where(),
            "test_table.field1 = test_schema_test_table_temp.field1"
        );
    }

    #[test]
    fn test_params_delete_where_falls_back_to_fields() {
        let params =
            SqlParams::new("test_table", "test_schema", ts()).with_fields(&["field1", "field2"]);
        assert_eq!(
            params.delete_where(),
            "test_table.field1 = test_schema_test_table_temp.field1 AND \
             test_table.field2 = test_schema_test_table_temp.field2"
        );
    }

    #[test]
    fn test_params_context_defaults() {
        let context = SqlParams::new("test_table", "datalake", ts()).context();
        assert_eq!(context["table_name"], "test_table");
        assert_eq!(context["schema"], "datalake");
        assert_eq!(context["fields"], "");
        assert_eq!(context["delete_where"], "");
        assert_eq!(context["values"], "");
        assert_eq!(context["etl_timestamp"], "2023-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_empty_values_stay_absent() {
        let rows: Vec<Vec<FieldValue>> = Vec::new();
        let params = SqlParams::new("t", "datalake", ts()).with_values(&rows);
        assert_eq!(params.values, None);
    }
}

//! Response types for the `/v1/rest/mgmt` API
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};

/// The body of a v1 management command response: a list of result tables
#[derive(Debug, Clone, Deserialize)]
pub struct MgmtResponse {
    #[serde(rename = "Tables", default)]
    pub tables: Vec<ResultTable>,
}

impl MgmtResponse {
    /// The primary result of a management command is its first table
    pub fn primary_table(&self) -> Option<&ResultTable> {
        self.tables.first()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResultTable {
    #[serde(rename = "TableName", default)]
    pub name: String,
    #[serde(rename = "Columns")]
    pub columns: Vec<Column>,
    #[serde(rename = "Rows", default)]
    pub rows: Vec<Vec<Value>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Column {
    #[serde(rename = "ColumnName")]
    pub name: String,
    #[serde(rename = "DataType", default)]
    pub data_type: String,
}

impl ResultTable {
    /// Position of the column called `name`
    pub fn column_index(&self, name: &'static str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| Error::MissingColumn {
                table: self.name.clone(),
                column: name,
            })
    }

    /// Read the string cell at (`row`, `column`)
    fn string_at(&self, row: usize, column: usize, column_name: &'static str) -> Result<String> {
        match self.rows[row].get(column) {
            Some(Value::String(s)) => Ok(s.clone()),
            Some(Value::Null) => Ok(String::new()),
            _ => Err(Error::InvalidCell {
                row,
                column: column_name,
            }),
        }
    }
}

/// One ingestion mapping registered on the server, as listed by `.show ingestion mappings`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MappingEntry {
    /// The name used to reference the mapping
    pub name: String,
    /// The mapping kind, e.g., `Csv` or `Json`
    pub kind: String,
}

impl MappingEntry {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
        }
    }

    /// Convert every row of a `.show ingestion mappings` result table
    pub fn from_table(table: &ResultTable) -> Result<Vec<Self>> {
        let name_idx = table.column_index("Name")?;
        let kind_idx = table.column_index("Kind")?;
        (0..table.rows.len())
            .map(|row| {
                Ok(Self {
                    name: table.string_at(row, name_idx, "Name")?,
                    kind: table.string_at(row, kind_idx, "Kind")?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{MappingEntry, MgmtResponse};
    use crate::Error;

    #[test]
    fn mapping_entries_from_table() {
        let resp: MgmtResponse = serde_json::from_str(
            r#"{
                "Tables": [{
                    "TableName": "Table_0",
                    "Columns": [
                        {"ColumnName": "Name", "DataType": "String"},
                        {"ColumnName": "Kind", "DataType": "String"},
                        {"ColumnName": "Mapping", "DataType": "String"}
                    ],
                    "Rows": [
                        ["events_json", "Json", "[]"],
                        ["events_csv", "Csv", "[]"]
                    ]
                }]
            }"#,
        )
        .unwrap();
        let entries = MappingEntry::from_table(resp.primary_table().unwrap()).unwrap();
        assert_eq!(
            entries,
            vec![
                MappingEntry::new("events_json", "Json"),
                MappingEntry::new("events_csv", "Csv"),
            ]
        );
    }

    #[test]
    fn missing_kind_column() {
        let resp: MgmtResponse = serde_json::from_str(
            r#"{"Tables": [{"TableName": "Table_0", "Columns": [{"ColumnName": "Name"}], "Rows": [["a"]]}]}"#,
        )
        .unwrap();
        let err = MappingEntry::from_table(resp.primary_table().unwrap()).unwrap_err();
        assert!(
            matches!(err, Error::MissingColumn { column: "Kind", .. }),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn non_string_cell() {
        let resp: MgmtResponse = serde_json::from_str(
            r#"{"Tables": [{"TableName": "Table_0",
                "Columns": [{"ColumnName": "Name"}, {"ColumnName": "Kind"}],
                "Rows": [["a", 42]]}]}"#,
        )
        .unwrap();
        let err = MappingEntry::from_table(resp.primary_table().unwrap()).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidCell {
                row: 0,
                column: "Kind"
            }
        ));
    }
}

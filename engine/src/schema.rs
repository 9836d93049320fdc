//! Static table schemas and row validation.
//!
//! Every record type declares its columns up front. The storage
//! collaborators create tables from these declarations and validate rows
//! against them before writing.

use crate::{error::Result, Error, Row, TableName};
use serde::{Deserialize, Serialize};

/// Name of the implicit integer primary key column.
pub const ID_COLUMN: &str = "id";

/// Column types supported in schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Integer,
    Real,
    Text,
    Bool,
    /// Arbitrary nested JSON, stored as text by SQL backends
    Json,
}

impl ColumnType {
    /// SQLite storage class used for this column type.
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::Integer | ColumnType::Bool => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Text | ColumnType::Json => "TEXT",
        }
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ColumnType::Integer => write!(f, "Integer"),
            ColumnType::Real => write!(f, "Real"),
            ColumnType::Text => write!(f, "Text"),
            ColumnType::Bool => write!(f, "Bool"),
            ColumnType::Json => write!(f, "Json"),
        }
    }
}

/// Definition of a column in a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDef {
    /// Column name
    pub name: String,
    /// Column type
    pub column_type: ColumnType,
    /// Whether the column accepts null
    pub nullable: bool,
}

impl ColumnDef {
    /// Create a new non-null column definition.
    pub fn required(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: false,
        }
    }

    /// Create a new nullable column definition.
    pub fn nullable(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: true,
        }
    }

    /// Validate a JSON value against this column definition.
    pub fn validate(&self, value: Option<&serde_json::Value>) -> Result<()> {
        match value {
            None | Some(serde_json::Value::Null) if !self.nullable => {
                Err(Error::MissingRequiredColumn(self.name.clone()))
            }
            None | Some(serde_json::Value::Null) => Ok(()),
            Some(v) => self.validate_type(v),
        }
    }

    fn validate_type(&self, value: &serde_json::Value) -> Result<()> {
        let valid = match self.column_type {
            ColumnType::Integer => value.is_i64() || value.is_u64(),
            ColumnType::Real => value.is_number(),
            ColumnType::Text => value.is_string(),
            ColumnType::Bool => value.is_boolean(),
            ColumnType::Json => true,
        };

        if valid {
            Ok(())
        } else {
            Err(Error::TypeMismatch {
                column: self.name.clone(),
                expected: self.column_type.to_string(),
                got: json_type_name(value).to_string(),
            })
        }
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "Null",
        serde_json::Value::Bool(_) => "Bool",
        serde_json::Value::Number(n) if n.is_i64() || n.is_u64() => "Integer",
        serde_json::Value::Number(_) => "Real",
        serde_json::Value::String(_) => "Text",
        serde_json::Value::Array(_) => "Array",
        serde_json::Value::Object(_) => "Object",
    }
}

/// Check that a table or column name is a plain SQL identifier.
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Schema for a single table. The `id` primary key is implicit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSchema {
    /// Table name
    pub name: TableName,
    /// Column definitions, excluding `id`
    pub columns: Vec<ColumnDef>,
}

impl TableSchema {
    /// Create a new table schema.
    pub fn new(name: impl Into<TableName>, columns: Vec<ColumnDef>) -> Self {
        Self {
            name: name.into(),
            columns,
        }
    }

    /// Get a column definition by name.
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Check that the table and all column names are usable identifiers.
    pub fn validate_identifiers(&self) -> Result<()> {
        if !is_valid_identifier(&self.name) {
            return Err(Error::InvalidIdentifier(self.name.clone()));
        }
        for column in &self.columns {
            if !is_valid_identifier(&column.name) || column.name == ID_COLUMN {
                return Err(Error::InvalidIdentifier(column.name.clone()));
            }
        }
        Ok(())
    }

    /// Validate a full row: integer id, known columns, declared types.
    pub fn validate_row(&self, row: &Row) -> Result<()> {
        if let Some(id) = row.get(ID_COLUMN) {
            if !id.is_i64() {
                return Err(Error::InvalidRow {
                    table: self.name.clone(),
                    message: format!("id must be an integer, got {id}"),
                });
            }
        }

        self.validate_known_columns(row)?;

        for column in &self.columns {
            column.validate(row.get(&column.name))?;
        }

        Ok(())
    }

    /// Validate a partial set of column values, as used by updates.
    pub fn validate_values(&self, values: &Row) -> Result<()> {
        self.validate_known_columns(values)?;
        for (name, value) in values {
            if let Some(column) = self.column(name) {
                column.validate(Some(value))?;
            }
        }
        Ok(())
    }

    fn validate_known_columns(&self, row: &Row) -> Result<()> {
        for key in row.keys() {
            if key != ID_COLUMN && self.column(key).is_none() {
                return Err(Error::InvalidRow {
                    table: self.name.clone(),
                    message: format!("unknown column '{key}'"),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: serde_json::Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    fn todos() -> TableSchema {
        TableSchema::new(
            "todos",
            vec![
                ColumnDef::required("title", ColumnType::Text),
                ColumnDef::required("done", ColumnType::Bool),
                ColumnDef::nullable("list_id", ColumnType::Integer),
            ],
        )
    }

    #[test]
    fn valid_row() {
        let schema = todos();
        let r = row(json!({"id": 1, "title": "milk", "done": false, "list_id": null}));
        assert!(schema.validate_row(&r).is_ok());
    }

    #[test]
    fn missing_required_column() {
        let schema = todos();
        let r = row(json!({"id": 1, "done": false}));
        assert_eq!(
            schema.validate_row(&r),
            Err(Error::MissingRequiredColumn("title".into()))
        );
    }

    #[test]
    fn type_mismatch() {
        let schema = todos();
        let r = row(json!({"id": 1, "title": "milk", "done": "no"}));
        assert!(matches!(
            schema.validate_row(&r),
            Err(Error::TypeMismatch { column, .. }) if column == "done"
        ));
    }

    #[test]
    fn unknown_column_rejected() {
        let schema = todos();
        let r = row(json!({"id": 1, "title": "milk", "done": true, "color": "red"}));
        assert!(matches!(
            schema.validate_row(&r),
            Err(Error::InvalidRow { .. })
        ));
    }

    #[test]
    fn non_integer_id_rejected() {
        let schema = todos();
        let r = row(json!({"id": "a", "title": "milk", "done": true}));
        assert!(matches!(
            schema.validate_row(&r),
            Err(Error::InvalidRow { .. })
        ));
    }

    #[test]
    fn real_accepts_integers() {
        let col = ColumnDef::required("price", ColumnType::Real);
        assert!(col.validate(Some(&json!(3))).is_ok());
        assert!(col.validate(Some(&json!(3.5))).is_ok());
    }

    #[test]
    fn identifiers() {
        assert!(is_valid_identifier("todo_items"));
        assert!(is_valid_identifier("_private"));
        assert!(!is_valid_identifier("1abc"));
        assert!(!is_valid_identifier("drop table\""));
        assert!(!is_valid_identifier(""));

        let bad = TableSchema::new("todos", vec![ColumnDef::required("id", ColumnType::Integer)]);
        assert!(bad.validate_identifiers().is_err());
    }
}

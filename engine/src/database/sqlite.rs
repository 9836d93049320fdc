//! SQLite database backend.
//!
//! Tables are created from the static [`TableSchema`] declarations and
//! queried with parameterised SQL. Column values are decoded back into
//! JSON using the declared column types.

use super::{Database, Filter};
use crate::{
    error::Result,
    schema::{is_valid_identifier, ID_COLUMN},
    ColumnType, Error, RecordId, Row, TableName, TableSchema,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row as _, Sqlite, SqlitePool};
use std::collections::HashMap;
use std::str::FromStr;

type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

fn storage_error(e: sqlx::Error) -> Error {
    Error::Storage(e.to_string())
}

/// A [`Database`] backed by a SQLite connection pool.
#[derive(Debug)]
pub struct SqliteDatabase {
    pool: SqlitePool,
    schemas: RwLock<HashMap<TableName, TableSchema>>,
}

impl SqliteDatabase {
    /// Connect to a database URL such as `sqlite://app.db`, creating the
    /// file if missing.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(storage_error)?
            .create_if_missing(true);

        // A single connection keeps writes serialized.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(storage_error)?;

        Ok(Self::from_pool(pool))
    }

    /// Open a private in-memory database.
    pub async fn in_memory() -> Result<Self> {
        Self::connect("sqlite::memory:").await
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            schemas: RwLock::new(HashMap::new()),
        }
    }

    /// The underlying pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn schema(&self, table: &str) -> Result<TableSchema> {
        self.schemas
            .read()
            .get(table)
            .cloned()
            .ok_or_else(|| Error::TableNotFound(table.to_string()))
    }
}

fn quote(identifier: &str) -> Result<String> {
    if !is_valid_identifier(identifier) {
        return Err(Error::InvalidIdentifier(identifier.to_string()));
    }
    Ok(format!("\"{identifier}\""))
}

fn bind_value<'q>(query: SqliteQuery<'q>, value: &Value) -> SqliteQuery<'q> {
    match value {
        Value::Null => query.bind(None::<i64>),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => query.bind(i),
            None => query.bind(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => query.bind(s.clone()),
        other => query.bind(other.to_string()),
    }
}

/// Build a WHERE clause and the values to bind, in order.
fn where_clause(filter: &Filter) -> Result<(String, Vec<Value>)> {
    if filter.conditions().is_empty() {
        return Ok((String::new(), Vec::new()));
    }

    let mut parts = Vec::new();
    let mut binds = Vec::new();
    for (column, value) in filter.conditions() {
        if value.is_null() {
            parts.push(format!("{} IS NULL", quote(column)?));
        } else {
            parts.push(format!("{} = ?", quote(column)?));
            binds.push(value.clone());
        }
    }
    Ok((format!(" WHERE {}", parts.join(" AND ")), binds))
}

fn decode_row(schema: &TableSchema, row: &SqliteRow) -> Result<Row> {
    let mut out = Row::new();
    let id: i64 = row.try_get(ID_COLUMN).map_err(storage_error)?;
    out.insert(ID_COLUMN.to_string(), id.into());

    for column in &schema.columns {
        let name = column.name.as_str();
        let value = match column.column_type {
            ColumnType::Integer => row
                .try_get::<Option<i64>, _>(name)
                .map_err(storage_error)?
                .map(Value::from),
            ColumnType::Real => row
                .try_get::<Option<f64>, _>(name)
                .map_err(storage_error)?
                .map(Value::from),
            ColumnType::Text => row
                .try_get::<Option<String>, _>(name)
                .map_err(storage_error)?
                .map(Value::from),
            ColumnType::Bool => row
                .try_get::<Option<bool>, _>(name)
                .map_err(storage_error)?
                .map(Value::from),
            ColumnType::Json => match row
                .try_get::<Option<String>, _>(name)
                .map_err(storage_error)?
            {
                Some(text) => Some(serde_json::from_str(&text).map_err(|e| {
                    Error::InvalidRow {
                        table: schema.name.clone(),
                        message: format!("column '{name}' holds invalid JSON: {e}"),
                    }
                })?),
                None => None,
            },
        };
        out.insert(column.name.clone(), value.unwrap_or(Value::Null));
    }

    Ok(out)
}

#[async_trait]
impl Database for SqliteDatabase {
    async fn ensure_table(&self, schema: &TableSchema) -> Result<()> {
        schema.validate_identifiers()?;

        let mut columns = vec![format!("{} INTEGER PRIMARY KEY", quote(ID_COLUMN)?)];
        for column in &schema.columns {
            let null = if column.nullable { "" } else { " NOT NULL" };
            columns.push(format!(
                "{} {}{}",
                quote(&column.name)?,
                column.column_type.sql_type(),
                null
            ));
        }

        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote(&schema.name)?,
            columns.join(", ")
        );
        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;

        tracing::debug!(table = %schema.name, "ensured sqlite table");
        self.schemas
            .write()
            .insert(schema.name.clone(), schema.clone());
        Ok(())
    }

    async fn select(&self, table: &str, filter: &Filter) -> Result<Vec<Row>> {
        let schema = self.schema(table)?;
        let (clause, binds) = where_clause(filter)?;
        let sql = format!(
            "SELECT * FROM {}{} ORDER BY {} ASC",
            quote(table)?,
            clause,
            quote(ID_COLUMN)?
        );

        let mut query = sqlx::query(&sql);
        for value in &binds {
            query = bind_value(query, value);
        }

        let rows = query.fetch_all(&self.pool).await.map_err(storage_error)?;
        rows.iter().map(|row| decode_row(&schema, row)).collect()
    }

    async fn insert(&self, table: &str, row: Row) -> Result<RecordId> {
        let schema = self.schema(table)?;
        schema.validate_row(&row)?;

        let mut names = Vec::new();
        let mut values = Vec::new();
        if let Some(id) = row.get(ID_COLUMN) {
            names.push(quote(ID_COLUMN)?);
            values.push(id.clone());
        }
        for column in &schema.columns {
            names.push(quote(&column.name)?);
            values.push(row.get(&column.name).cloned().unwrap_or(Value::Null));
        }

        let placeholders = vec!["?"; names.len()].join(", ");
        let sql = format!(
            "INSERT OR REPLACE INTO {} ({}) VALUES ({})",
            quote(table)?,
            names.join(", "),
            placeholders
        );

        let mut query = sqlx::query(&sql);
        for value in &values {
            query = bind_value(query, value);
        }

        let result = query.execute(&self.pool).await.map_err(storage_error)?;
        Ok(result.last_insert_rowid())
    }

    async fn update(&self, table: &str, filter: &Filter, values: Row) -> Result<u64> {
        let schema = self.schema(table)?;
        schema.validate_values(&values)?;
        if values.contains_key(ID_COLUMN) {
            return Err(Error::InvalidRow {
                table: table.to_string(),
                message: "id cannot be updated in place".into(),
            });
        }
        if values.is_empty() {
            return Ok(0);
        }

        let mut sets = Vec::new();
        let mut binds = Vec::new();
        for (column, value) in &values {
            sets.push(format!("{} = ?", quote(column)?));
            binds.push(value.clone());
        }
        let (clause, filter_binds) = where_clause(filter)?;
        binds.extend(filter_binds);

        let sql = format!("UPDATE {} SET {}{}", quote(table)?, sets.join(", "), clause);
        let mut query = sqlx::query(&sql);
        for value in &binds {
            query = bind_value(query, value);
        }

        let result = query.execute(&self.pool).await.map_err(storage_error)?;
        Ok(result.rows_affected())
    }

    async fn delete(&self, table: &str, filter: &Filter) -> Result<u64> {
        self.schema(table)?;
        let (clause, binds) = where_clause(filter)?;
        let sql = format!("DELETE FROM {}{}", quote(table)?, clause);

        let mut query = sqlx::query(&sql);
        for value in &binds {
            query = bind_value(query, value);
        }

        let result = query.execute(&self.pool).await.map_err(storage_error)?;
        Ok(result.rows_affected())
    }
}

//! Database operations for the records table.

use offsync_engine::schema::ID_COLUMN;
use offsync_engine::{RecordId, Row};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::types::Json;
use sqlx::{Row as _, SqlitePool};

/// A stored record row from the database.
#[derive(Debug)]
pub struct StoredRecord {
    pub table_name: String,
    pub id: RecordId,
    pub body: Row,
    pub created_at: i64,
    pub updated_at: i64,
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for StoredRecord {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let Json(body) = row.try_get::<Json<Row>, _>("body")?;
        Ok(StoredRecord {
            table_name: row.try_get("table_name")?,
            id: row.try_get("id")?,
            body,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl StoredRecord {
    /// The wire form: the body with the authoritative id merged in.
    pub fn into_row(self) -> Row {
        let mut row = self.body;
        row.insert(ID_COLUMN.to_string(), Value::from(self.id));
        row
    }
}

/// The body as stored. Ids live in their own column.
fn body_without_id(row: &Row) -> Row {
    let mut body = row.clone();
    body.remove(ID_COLUMN);
    body
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Get all records in a table, ordered by id.
pub async fn list_records(pool: &SqlitePool, table: &str) -> Result<Vec<StoredRecord>, sqlx::Error> {
    sqlx::query_as::<_, StoredRecord>(
        r#"
        SELECT table_name, id, body, created_at, updated_at
        FROM records
        WHERE table_name = ?1
        ORDER BY id
        "#,
    )
    .bind(table)
    .fetch_all(pool)
    .await
}

/// Get a record by table and id.
pub async fn get_record(
    pool: &SqlitePool,
    table: &str,
    id: RecordId,
) -> Result<Option<StoredRecord>, sqlx::Error> {
    sqlx::query_as::<_, StoredRecord>(
        r#"
        SELECT table_name, id, body, created_at, updated_at
        FROM records
        WHERE table_name = ?1 AND id = ?2
        "#,
    )
    .bind(table)
    .bind(id)
    .fetch_optional(pool)
    .await
}

/// Insert a record under the next id of the table's sequence.
///
/// Any id in `row` is ignored.
pub async fn insert_record(
    pool: &SqlitePool,
    table: &str,
    row: &Row,
) -> Result<StoredRecord, sqlx::Error> {
    let body = body_without_id(row);
    let now = now_millis();
    let mut tx = pool.begin().await?;

    let id: RecordId = sqlx::query_scalar(
        r#"
        INSERT INTO record_sequences (table_name, next_id)
        VALUES (?1, 2)
        ON CONFLICT (table_name) DO UPDATE SET next_id = next_id + 1
        RETURNING next_id - 1
        "#,
    )
    .bind(table)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO records (table_name, id, body, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?4)
        "#,
    )
    .bind(table)
    .bind(id)
    .bind(Json(&body))
    .bind(now)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(StoredRecord {
        table_name: table.to_string(),
        id,
        body,
        created_at: now,
        updated_at: now,
    })
}

/// Replace the body of an existing record. Returns `None` if there is
/// no record with that id.
pub async fn update_record(
    pool: &SqlitePool,
    table: &str,
    id: RecordId,
    row: &Row,
) -> Result<Option<StoredRecord>, sqlx::Error> {
    let body = body_without_id(row);

    sqlx::query_as::<_, StoredRecord>(
        r#"
        UPDATE records SET body = ?3, updated_at = ?4
        WHERE table_name = ?1 AND id = ?2
        RETURNING table_name, id, body, created_at, updated_at
        "#,
    )
    .bind(table)
    .bind(id)
    .bind(Json(&body))
    .bind(now_millis())
    .fetch_optional(pool)
    .await
}

/// Delete a record. Returns whether a row was removed.
pub async fn delete_record(pool: &SqlitePool, table: &str, id: RecordId) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM records WHERE table_name = ?1 AND id = ?2")
        .bind(table)
        .bind(id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

//! Record CRUD against the authoritative store.

use offsync_engine::schema::is_valid_identifier;
use offsync_engine::{RecordId, Row};

use crate::db::{self, Pool};
use crate::error::{AppError, Result};

fn check_table(table: &str) -> Result<()> {
    if is_valid_identifier(table) {
        Ok(())
    } else {
        Err(AppError::BadRequest(format!("invalid table name '{}'", table)))
    }
}

fn not_found(table: &str, id: RecordId) -> AppError {
    AppError::NotFound(format!("record {} in table '{}'", id, table))
}

/// All records of a table. An unknown table is empty.
pub async fn handle_list(pool: &Pool, table: &str) -> Result<Vec<Row>> {
    check_table(table)?;
    let records = db::list_records(pool, table).await?;
    Ok(records.into_iter().map(|r| r.into_row()).collect())
}

pub async fn handle_get(pool: &Pool, table: &str, id: RecordId) -> Result<Row> {
    check_table(table)?;
    db::get_record(pool, table, id)
        .await?
        .map(|r| r.into_row())
        .ok_or_else(|| not_found(table, id))
}

/// Store a new record and return it under its assigned id.
pub async fn handle_insert(pool: &Pool, table: &str, row: Row) -> Result<Row> {
    check_table(table)?;
    let stored = db::insert_record(pool, table, &row).await?;
    tracing::info!(table, id = stored.id, "record inserted");
    Ok(stored.into_row())
}

/// Replace an existing record. The path id wins over any id in the body.
pub async fn handle_update(pool: &Pool, table: &str, id: RecordId, row: Row) -> Result<Row> {
    check_table(table)?;
    let stored = db::update_record(pool, table, id, &row)
        .await?
        .ok_or_else(|| not_found(table, id))?;
    tracing::info!(table, id, "record updated");
    Ok(stored.into_row())
}

/// Delete a record. Deleting a missing record succeeds.
pub async fn handle_delete(pool: &Pool, table: &str, id: RecordId) -> Result<()> {
    check_table(table)?;
    let existed = db::delete_record(pool, table, id).await?;
    tracing::info!(table, id, existed, "record deleted");
    Ok(())
}

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::BlockStoreError;
use crate::store::{FileInfo, FileMeta, FileOpts};

pub(crate) fn init_schema(conn: &Connection) -> Result<(), BlockStoreError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS block_file (
            blockid TEXT NOT NULL,
            name TEXT NOT NULL,
            size INTEGER NOT NULL,
            createdts INTEGER NOT NULL,
            modts INTEGER NOT NULL,
            opts TEXT NOT NULL,
            meta TEXT NOT NULL,
            PRIMARY KEY (blockid, name)
        );

        CREATE TABLE IF NOT EXISTS block_data (
            blockid TEXT NOT NULL,
            name TEXT NOT NULL,
            partidx INTEGER NOT NULL,
            data BLOB NOT NULL,
            PRIMARY KEY (blockid, name, partidx)
        );
        ",
    )?;
    Ok(())
}

fn map_file_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<FileInfo> {
    let opts_json: String = row.get(5)?;
    let meta_json: String = row.get(6)?;
    let opts: FileOpts = serde_json::from_str(&opts_json).map_err(to_from_sql_error)?;
    let meta: FileMeta = serde_json::from_str(&meta_json).map_err(to_from_sql_error)?;
    Ok(FileInfo {
        block_id: row.get(0)?,
        name: row.get(1)?,
        size: row.get(2)?,
        created_ts: row.get(3)?,
        mod_ts: row.get(4)?,
        opts,
        meta,
    })
}

fn to_from_sql_error<E>(err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(err))
}

pub(crate) fn file_exists(
    conn: &Connection,
    block_id: &str,
    name: &str,
) -> Result<bool, BlockStoreError> {
    let found = conn
        .query_row(
            "SELECT 1 FROM block_file WHERE blockid = ?1 AND name = ?2",
            params![block_id, name],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

pub(crate) fn insert_file(conn: &Connection, info: &FileInfo) -> Result<(), BlockStoreError> {
    let opts_json =
        serde_json::to_string(&info.opts).map_err(|err| BlockStoreError::Persistence(err.to_string()))?;
    let meta_json =
        serde_json::to_string(&info.meta).map_err(|err| BlockStoreError::Persistence(err.to_string()))?;
    conn.execute(
        "
        INSERT INTO block_file (blockid, name, size, createdts, modts, opts, meta)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        ",
        params![
            info.block_id,
            info.name,
            info.size,
            info.created_ts,
            info.mod_ts,
            opts_json,
            meta_json,
        ],
    )?;
    Ok(())
}

pub(crate) fn write_file_info(conn: &Connection, info: &FileInfo) -> Result<(), BlockStoreError> {
    let opts_json =
        serde_json::to_string(&info.opts).map_err(|err| BlockStoreError::Persistence(err.to_string()))?;
    let meta_json =
        serde_json::to_string(&info.meta).map_err(|err| BlockStoreError::Persistence(err.to_string()))?;
    conn.execute(
        "
        INSERT INTO block_file (blockid, name, size, createdts, modts, opts, meta)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        ON CONFLICT(blockid, name) DO UPDATE SET
            size = excluded.size,
            modts = excluded.modts,
            opts = excluded.opts,
            meta = excluded.meta
        ",
        params![
            info.block_id,
            info.name,
            info.size,
            info.created_ts,
            info.mod_ts,
            opts_json,
            meta_json,
        ],
    )?;
    Ok(())
}

pub(crate) fn get_file_info(
    conn: &Connection,
    block_id: &str,
    name: &str,
) -> Result<Option<FileInfo>, BlockStoreError> {
    let info = conn
        .query_row(
            "
            SELECT blockid, name, size, createdts, modts, opts, meta
            FROM block_file
            WHERE blockid = ?1 AND name = ?2
            ",
            params![block_id, name],
            map_file_row,
        )
        .optional()?;
    Ok(info)
}

pub(crate) fn get_part_data(
    conn: &Connection,
    block_id: &str,
    name: &str,
    part_idx: i64,
) -> Result<Option<Vec<u8>>, BlockStoreError> {
    let data = conn
        .query_row(
            "SELECT data FROM block_data WHERE blockid = ?1 AND name = ?2 AND partidx = ?3",
            params![block_id, name, part_idx],
            |row| row.get::<_, Vec<u8>>(0),
        )
        .optional()?;
    Ok(data)
}

pub(crate) fn write_part_data(
    conn: &Connection,
    block_id: &str,
    name: &str,
    part_idx: i64,
    data: &[u8],
) -> Result<(), BlockStoreError> {
    conn.execute(
        "
        INSERT INTO block_data (blockid, name, partidx, data)
        VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT(blockid, name, partidx) DO UPDATE SET data = excluded.data
        ",
        params![block_id, name, part_idx, data],
    )?;
    Ok(())
}

pub(crate) fn delete_file_rows(
    conn: &Connection,
    block_id: &str,
    name: &str,
) -> Result<(), BlockStoreError> {
    conn.execute(
        "DELETE FROM block_data WHERE blockid = ?1 AND name = ?2",
        params![block_id, name],
    )?;
    conn.execute(
        "DELETE FROM block_file WHERE blockid = ?1 AND name = ?2",
        params![block_id, name],
    )?;
    Ok(())
}

pub(crate) fn delete_block_rows(conn: &Connection, block_id: &str) -> Result<(), BlockStoreError> {
    conn.execute("DELETE FROM block_data WHERE blockid = ?1", params![block_id])?;
    conn.execute("DELETE FROM block_file WHERE blockid = ?1", params![block_id])?;
    Ok(())
}

pub(crate) fn delete_part_rows(
    conn: &Connection,
    block_id: &str,
    name: &str,
) -> Result<(), BlockStoreError> {
    conn.execute(
        "DELETE FROM block_data WHERE blockid = ?1 AND name = ?2",
        params![block_id, name],
    )?;
    Ok(())
}

pub(crate) fn list_files(
    conn: &Connection,
    block_id: &str,
) -> Result<Vec<FileInfo>, BlockStoreError> {
    let mut stmt = conn.prepare(
        "
        SELECT blockid, name, size, createdts, modts, opts, meta
        FROM block_file
        WHERE blockid = ?1
        ORDER BY name
        ",
    )?;
    let rows = stmt.query_map(params![block_id], map_file_row)?;
    let mut result = Vec::new();
    for row in rows {
        result.push(row?);
    }
    Ok(result)
}

pub(crate) fn get_all_block_ids(conn: &Connection) -> Result<Vec<String>, BlockStoreError> {
    let mut stmt = conn.prepare("SELECT DISTINCT blockid FROM block_file ORDER BY blockid")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    let mut result = Vec::new();
    for row in rows {
        result.push(row?);
    }
    Ok(result)
}

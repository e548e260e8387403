//! Chunked storage for oversized field values.
//!
//! The embedded store enforces a per-value size ceiling. Values over the
//! configured threshold are split into ordered pieces in a side table
//! keyed by (table, column, row id, index); the main row keeps a compact
//! reference token that the query path resolves back to the original
//! value before results are returned.

use rusqlite::{params, Connection};
use tracing::debug;

use crate::config::{ChunkPriority, ChunkingConfig};
use crate::error::StagingError;
use crate::inference::RowId;

pub const CHUNK_TABLE: &str = "chunked_values";
const TOKEN_PREFIX: &str = "__chunked_ref__:";

fn ensure_side_table(conn: &Connection) -> Result<(), StagingError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS chunked_values (\
            table_name TEXT NOT NULL, \
            column_name TEXT NOT NULL, \
            row_id TEXT NOT NULL, \
            chunk_index INTEGER NOT NULL, \
            content TEXT NOT NULL, \
            PRIMARY KEY (table_name, column_name, row_id, chunk_index))",
    )?;
    Ok(())
}

/// Store a text value for a cell, splitting it when the (table, column)
/// policy demands. Returns what the main row should hold: the original
/// text, or a reference token.
pub fn store_value(
    conn: &Connection,
    config: &ChunkingConfig,
    table: &str,
    column: &str,
    row_id: &RowId,
    text: &str,
) -> Result<String, StagingError> {
    let (priority, threshold) = config.policy_for(table, column);
    let chunk = match priority {
        ChunkPriority::Never => false,
        ChunkPriority::Always => true,
        ChunkPriority::SizeBased => text.len() > threshold,
    };
    if !chunk {
        return Ok(text.to_string());
    }

    ensure_side_table(conn)?;
    let row_key = row_id.canonical();
    conn.execute(
        "DELETE FROM chunked_values \
         WHERE table_name = ?1 AND column_name = ?2 AND row_id = ?3",
        params![table, column, row_key],
    )?;

    let pieces = split_pieces(text, config.piece_size);
    let mut stmt = conn.prepare(
        "INSERT INTO chunked_values (table_name, column_name, row_id, chunk_index, content) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    for (index, piece) in pieces.iter().enumerate() {
        stmt.execute(params![table, column, row_key, index as i64, piece])?;
    }
    debug!(
        table = %table,
        column = %column,
        pieces = pieces.len(),
        bytes = text.len(),
        "chunked oversized value"
    );
    Ok(format!("{TOKEN_PREFIX}{table}:{column}:{row_key}"))
}

pub fn is_reference(value: &str) -> bool {
    value.starts_with(TOKEN_PREFIX)
}

/// Reassemble the original value behind a reference token. Returns
/// `Ok(None)` for strings that merely resemble a token or name a cell
/// with no stored pieces.
///
/// The token carries only the cell's identity, never a piece count, so
/// a row whose pieces are rewritten by a later staging call keeps a
/// valid token; reassembly trusts whatever ordered pieces the side
/// table currently holds.
pub fn resolve_reference(conn: &Connection, token: &str) -> Result<Option<String>, StagingError> {
    let Some(rest) = token.strip_prefix(TOKEN_PREFIX) else {
        return Ok(None);
    };
    let mut parts = rest.splitn(3, ':');
    let (Some(table), Some(column), Some(row_key)) = (parts.next(), parts.next(), parts.next())
    else {
        return Ok(None);
    };

    ensure_side_table(conn)?;
    let mut stmt = conn.prepare(
        "SELECT content FROM chunked_values \
         WHERE table_name = ?1 AND column_name = ?2 AND row_id = ?3 \
         ORDER BY chunk_index",
    )?;
    let pieces: Vec<String> = stmt
        .query_map(params![table, column, row_key], |row| row.get(0))?
        .collect::<Result<_, _>>()?;
    if pieces.is_empty() {
        return Ok(None);
    }
    Ok(Some(pieces.concat()))
}

/// Split on char boundaries, each piece at most `piece_size` bytes.
fn split_pieces(text: &str, piece_size: usize) -> Vec<String> {
    let piece_size = piece_size.max(4);
    let mut pieces = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        if current.len() + ch.len_utf8() > piece_size && !current.is_empty() {
            pieces.push(std::mem::take(&mut current));
        }
        current.push(ch);
    }
    if !current.is_empty() || pieces.is_empty() {
        pieces.push(current);
    }
    pieces
}

//! Two-phase relational writer for an inferred document plan.
//!
//! Phase 1 inserts entity rows (idempotent on the primary key), phase 2
//! inserts junction rows once all ids are known. The entire staging write
//! runs inside one transaction: a row-level failure rolls the whole call
//! back. A table whose creation fails degrades to a minimal
//! `(id, data_json)` form instead of aborting the batch.

use std::collections::{BTreeMap, HashMap, HashSet};

use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, Transaction};
use tracing::{debug, warn};

use crate::chunking;
use crate::config::ChunkingConfig;
use crate::error::StagingError;
use crate::inference::{
    CellValue, ColumnType, DocumentPlan, EntityRecord, JunctionSpec, RowId, TableDraft,
};
use crate::naming::quote_identifier;

#[derive(Debug, Default)]
pub struct StagingReport {
    pub row_counts: BTreeMap<String, u64>,
    pub degraded_tables: Vec<String>,
}

impl StagingReport {
    pub fn total_rows(&self) -> u64 {
        self.row_counts.values().sum()
    }
}

/// Create tables and write all rows for one staging call.
pub fn stage(
    conn: &mut Connection,
    plan: &DocumentPlan,
    chunking: &ChunkingConfig,
) -> Result<StagingReport, StagingError> {
    let tx = conn.transaction()?;
    let fk_targets = collect_fk_targets(plan);

    let mut degraded: HashSet<String> = HashSet::new();
    for (name, draft) in &plan.tables {
        let ddl = create_table_sql(name, draft, &fk_targets);
        if let Err(err) = tx.execute_batch(&ddl) {
            warn!(table = %name, error = %err, "table creation failed, using minimal fallback form");
            tx.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {} (\"id\" INTEGER PRIMARY KEY, \"data_json\" TEXT)",
                quote_identifier(name)
            ))?;
            degraded.insert(name.clone());
        } else {
            reconcile_columns(&tx, name, draft)?;
        }
    }
    for junction in plan.junctions.values() {
        tx.execute_batch(&junction_table_sql(junction))?;
    }

    let ids = assign_row_ids(&tx, plan)?;

    for (table, records) in &plan.records {
        let table_ids = &ids[table.as_str()];
        if degraded.contains(table) {
            insert_degraded_rows(&tx, table, records, table_ids)?;
        } else {
            let draft = &plan.tables[table];
            insert_entity_rows(&tx, table, draft, records, table_ids, &ids, chunking)?;
        }
    }

    insert_junction_rows(&tx, plan, &ids)?;

    let mut report = StagingReport {
        row_counts: BTreeMap::new(),
        degraded_tables: degraded.into_iter().collect(),
    };
    report.degraded_tables.sort();
    for name in plan.tables.keys().chain(plan.junctions.keys()) {
        let count: i64 = tx.query_row(
            &format!("SELECT COUNT(*) FROM {}", quote_identifier(name)),
            [],
            |row| row.get(0),
        )?;
        report.row_counts.insert(name.clone(), count as u64);
    }

    tx.commit()?;
    debug!(
        tables = report.row_counts.len(),
        rows = report.total_rows(),
        "staging write committed"
    );
    Ok(report)
}

/// Map (table, fk column) to the referenced table, for DDL REFERENCES
/// clauses. First observation wins.
fn collect_fk_targets(plan: &DocumentPlan) -> HashMap<(String, String), String> {
    let mut targets = HashMap::new();
    for (table, records) in &plan.records {
        for record in records {
            for field_ref in &record.refs {
                targets
                    .entry((table.clone(), field_ref.column.clone()))
                    .or_insert_with(|| field_ref.table.clone());
            }
        }
    }
    targets
}

fn create_table_sql(
    name: &str,
    draft: &TableDraft,
    fk_targets: &HashMap<(String, String), String>,
) -> String {
    let id_type = draft
        .columns
        .get("id")
        .copied()
        .flatten()
        .unwrap_or(ColumnType::Integer);
    let mut defs = vec![format!("\"id\" {} PRIMARY KEY", id_type.sql_name())];
    for (column, ty) in &draft.columns {
        if column == "id" {
            continue;
        }
        let sql_type = ty.unwrap_or(ColumnType::Text).sql_name();
        let mut def = format!("{} {}", quote_identifier(column), sql_type);
        if let Some(target) = fk_targets.get(&(name.to_string(), column.clone())) {
            def.push_str(&format!(" REFERENCES {}(\"id\")", quote_identifier(target)));
        }
        defs.push(def);
    }
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote_identifier(name),
        defs.join(", ")
    )
}

/// `CREATE TABLE IF NOT EXISTS` leaves an existing table's shape alone, so
/// a later call whose plan widened the column set adds the missing columns
/// before any row is written.
fn reconcile_columns(
    tx: &Transaction<'_>,
    name: &str,
    draft: &TableDraft,
) -> Result<(), StagingError> {
    let mut stmt = tx.prepare(&format!("PRAGMA table_info({})", quote_identifier(name)))?;
    let existing = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<HashSet<String>, _>>()?;
    drop(stmt);
    for (column, ty) in &draft.columns {
        if !existing.contains(column) {
            debug!(table = %name, column = %column, "adding column to existing table");
            tx.execute_batch(&format!(
                "ALTER TABLE {} ADD COLUMN {} {}",
                quote_identifier(name),
                quote_identifier(column),
                ty.unwrap_or(ColumnType::Text).sql_name()
            ))?;
        }
    }
    Ok(())
}

fn junction_table_sql(junction: &JunctionSpec) -> String {
    let left_col = format!("{}_id", junction.left);
    let right_col = format!("{}_id", junction.right);
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (\
            \"id\" INTEGER PRIMARY KEY AUTOINCREMENT, \
            {left} INTEGER REFERENCES {left_table}(\"id\"), \
            {right} INTEGER REFERENCES {right_table}(\"id\"));\n\
         CREATE UNIQUE INDEX IF NOT EXISTS {index} ON {table} ({left}, {right});",
        table = quote_identifier(&junction.name),
        left = quote_identifier(&left_col),
        right = quote_identifier(&right_col),
        left_table = quote_identifier(&junction.left),
        right_table = quote_identifier(&junction.right),
        index = quote_identifier(&format!("idx_{}_pair", junction.name)),
    )
}

/// Resolve every record's primary key: explicit ids are reused, records
/// without one get surrogates allocated above the largest numeric id
/// already stored for the table and the largest explicit id in the plan,
/// so surrogates from earlier staging calls are never reused.
fn assign_row_ids(
    tx: &Transaction<'_>,
    plan: &DocumentPlan,
) -> Result<HashMap<String, Vec<RowId>>, StagingError> {
    let mut ids = HashMap::new();
    for (table, records) in &plan.records {
        let plan_max = records
            .iter()
            .filter_map(|r| match &r.explicit_id {
                Some(RowId::Integer(i)) => Some(*i),
                _ => None,
            })
            .max()
            .unwrap_or(0);
        // Tables in the plan were all created above, so this never
        // hits a missing table. Text ids are ignored for the floor.
        let stored_max: i64 = tx.query_row(
            &format!(
                "SELECT COALESCE(MAX(CASE WHEN typeof(\"id\") = 'integer' THEN \"id\" END), 0) FROM {}",
                quote_identifier(table)
            ),
            [],
            |row| row.get(0),
        )?;
        let mut next = plan_max.max(stored_max) + 1;
        let mut assigned = Vec::with_capacity(records.len());
        for record in records {
            match &record.explicit_id {
                Some(id) => assigned.push(id.clone()),
                None => {
                    assigned.push(RowId::Integer(next));
                    next += 1;
                }
            }
        }
        ids.insert(table.clone(), assigned);
    }
    Ok(ids)
}

fn insert_entity_rows(
    tx: &Transaction<'_>,
    table: &str,
    draft: &TableDraft,
    records: &[EntityRecord],
    table_ids: &[RowId],
    all_ids: &HashMap<String, Vec<RowId>>,
    chunking: &ChunkingConfig,
) -> Result<(), StagingError> {
    let columns: Vec<&str> = std::iter::once("id")
        .chain(draft.columns.keys().map(String::as_str).filter(|c| *c != "id"))
        .collect();
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "INSERT OR IGNORE INTO {} ({}) VALUES ({})",
        quote_identifier(table),
        columns
            .iter()
            .map(|c| quote_identifier(c))
            .collect::<Vec<_>>()
            .join(", "),
        placeholders.join(", ")
    );
    let mut stmt = tx.prepare(&sql)?;

    for (index, record) in records.iter().enumerate() {
        let row_id = &table_ids[index];
        let mut values: Vec<SqlValue> = Vec::with_capacity(columns.len());
        values.push(row_id_value(row_id));

        for column in columns.iter().skip(1) {
            let value = if let Some(field_ref) = record.refs.iter().find(|r| r.column == *column) {
                row_id_value(&all_ids[field_ref.table.as_str()][field_ref.index])
            } else {
                match record.values.get(*column) {
                    Some(CellValue::Text(text)) => {
                        let stored = chunking::store_value(
                            tx, chunking, table, column, row_id, text,
                        )?;
                        SqlValue::Text(stored)
                    }
                    Some(cell) => cell_value(cell),
                    None => SqlValue::Null,
                }
            };
            values.push(value);
        }
        stmt.execute(params_from_iter(values.iter()))?;
    }
    Ok(())
}

/// Rows for a degraded table keep the whole record as one JSON value.
fn insert_degraded_rows(
    tx: &Transaction<'_>,
    table: &str,
    records: &[EntityRecord],
    table_ids: &[RowId],
) -> Result<(), StagingError> {
    let sql = format!(
        "INSERT OR IGNORE INTO {} (\"id\", \"data_json\") VALUES (?1, ?2)",
        quote_identifier(table)
    );
    let mut stmt = tx.prepare(&sql)?;
    for (index, record) in records.iter().enumerate() {
        let mut obj = serde_json::Map::new();
        for (column, cell) in &record.values {
            obj.insert(column.clone(), cell_to_json(cell));
        }
        let data = serde_json::to_string(&serde_json::Value::Object(obj))?;
        stmt.execute(params_from_iter(
            [row_id_value(&table_ids[index]), SqlValue::Text(data)].iter(),
        ))?;
    }
    Ok(())
}

fn insert_junction_rows(
    tx: &Transaction<'_>,
    plan: &DocumentPlan,
    ids: &HashMap<String, Vec<RowId>>,
) -> Result<(), StagingError> {
    let mut seen: HashSet<(String, String, String)> = HashSet::new();
    for link in &plan.links {
        let (left, right) = if link.parent_table <= link.child_table {
            (&link.parent_table, &link.child_table)
        } else {
            (&link.child_table, &link.parent_table)
        };
        let name = format!("{left}_{right}");
        let junction = match plan.junctions.get(&name) {
            Some(j) => j,
            None => continue,
        };

        let parent_id = &ids[link.parent_table.as_str()][link.parent_index];
        let child_id = &ids[link.child_table.as_str()][link.child_index];
        let (left_id, right_id) = if *left == link.parent_table {
            (parent_id, child_id)
        } else {
            (child_id, parent_id)
        };

        if !seen.insert((name.clone(), left_id.canonical(), right_id.canonical())) {
            continue;
        }

        let sql = format!(
            "INSERT OR IGNORE INTO {} ({}, {}) VALUES (?1, ?2)",
            quote_identifier(&junction.name),
            quote_identifier(&format!("{}_id", junction.left)),
            quote_identifier(&format!("{}_id", junction.right)),
        );
        tx.execute(
            &sql,
            params_from_iter([row_id_value(left_id), row_id_value(right_id)].iter()),
        )?;
    }
    Ok(())
}

fn row_id_value(id: &RowId) -> SqlValue {
    match id {
        RowId::Integer(i) => SqlValue::Integer(*i),
        RowId::Text(t) => SqlValue::Text(t.clone()),
    }
}

fn cell_value(cell: &CellValue) -> SqlValue {
    match cell {
        CellValue::Null => SqlValue::Null,
        CellValue::Integer(i) => SqlValue::Integer(*i),
        CellValue::Real(r) => SqlValue::Real(*r),
        CellValue::Text(t) => SqlValue::Text(t.clone()),
    }
}

fn cell_to_json(cell: &CellValue) -> serde_json::Value {
    match cell {
        CellValue::Null => serde_json::Value::Null,
        CellValue::Integer(i) => serde_json::Value::from(*i),
        CellValue::Real(r) => serde_json::Value::from(*r),
        CellValue::Text(t) => serde_json::Value::from(t.clone()),
    }
}

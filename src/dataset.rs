//! One staged dataset: an access id bound to a private SQLite store and
//! the operations that run against it.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::chunking;
use crate::config::EngineConfig;
use crate::error::StagingError;
use crate::gatekeeper;
use crate::inference;
use crate::insertion;
use crate::naming::quote_identifier;
use crate::pagination;
use crate::response::{
    ColumnInfo, DatasetSummary, ForeignKeyInfo, ProcessResponse, QueryResponse, SchemaResponse,
    TableSchema, TableSummary,
};
use crate::store::{DatasetStore, StoreStats};

pub struct Dataset {
    pub access_id: String,
    pub created_at: DateTime<Utc>,
    store: DatasetStore,
    config: EngineConfig,
}

impl Dataset {
    pub fn new(access_id: String, config: EngineConfig) -> Result<Self, StagingError> {
        Ok(Self {
            access_id,
            created_at: Utc::now(),
            store: DatasetStore::in_memory()?,
            config,
        })
    }

    /// Stage one response document into the dataset's relational form.
    ///
    /// Staging failures are reported in the response rather than as an
    /// error; the transaction inside [`insertion::stage`] guarantees a
    /// failed call leaves previously staged data untouched.
    pub fn process(&self, document: &Value) -> ProcessResponse {
        let plan = inference::plan_document(document);
        let pagination = pagination::analyze(document);

        let report = match self
            .store
            .with_connection_mut(|conn| insertion::stage(conn, &plan, &self.config.chunking))
        {
            Ok(report) => report,
            Err(err) => {
                warn!(access_id = %self.access_id, error = %err, "staging failed");
                return ProcessResponse::failure(format!("Failed to stage document: {err}"));
            }
        };

        let schemas = match self.summarize_tables(&report.row_counts) {
            Ok(schemas) => schemas,
            Err(err) => {
                warn!(access_id = %self.access_id, error = %err, "schema summary failed");
                return ProcessResponse::failure(format!("Failed to summarize tables: {err}"));
            }
        };

        let total_rows = report.total_rows();
        info!(
            access_id = %self.access_id,
            tables = schemas.len(),
            rows = total_rows,
            degraded = report.degraded_tables.len(),
            "document staged"
        );

        let mut message = format!(
            "Staged {} rows across {} tables",
            total_rows,
            schemas.len()
        );
        if !report.degraded_tables.is_empty() {
            message.push_str(&format!(
                " ({} stored in degraded form)",
                report.degraded_tables.join(", ")
            ));
        }

        ProcessResponse {
            success: true,
            message,
            table_count: schemas.len(),
            schemas,
            total_rows,
            pagination,
        }
    }

    /// Run one governed read query.
    pub fn query(&self, sql: &str) -> QueryResponse {
        let kind = match gatekeeper::classify(sql) {
            Ok(kind) => kind,
            Err(reason) => {
                debug!(access_id = %self.access_id, reason = %reason, "query rejected");
                return QueryResponse::failure(sql, reason);
            }
        };

        let max_rows = self.config.max_result_rows;
        let outcome = self.store.with_connection(|conn| {
            let mut stmt = conn.prepare(sql)?;
            if stmt.column_count() == 0 {
                // Temp DDL and similar statements produce no rows.
                drop(stmt);
                conn.execute_batch(sql)?;
                return Ok((Vec::new(), Vec::new(), false));
            }

            let column_names: Vec<String> =
                stmt.column_names().iter().map(|s| s.to_string()).collect();
            let mut results = Vec::new();
            let mut resolved_any = false;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                if results.len() >= max_rows {
                    break;
                }
                let mut object = Map::new();
                for (i, name) in column_names.iter().enumerate() {
                    let value = match row.get_ref(i)? {
                        ValueRef::Null => Value::Null,
                        ValueRef::Integer(n) => Value::from(n),
                        ValueRef::Real(f) => serde_json::Number::from_f64(f)
                            .map(Value::Number)
                            .unwrap_or(Value::Null),
                        ValueRef::Text(bytes) => {
                            let text = String::from_utf8_lossy(bytes).into_owned();
                            if chunking::is_reference(&text) {
                                match chunking::resolve_reference(conn, &text)? {
                                    Some(full) => {
                                        resolved_any = true;
                                        Value::String(full)
                                    }
                                    None => Value::String(text),
                                }
                            } else {
                                Value::String(text)
                            }
                        }
                        ValueRef::Blob(bytes) => {
                            Value::String(format!("<{} byte blob>", bytes.len()))
                        }
                    };
                    object.insert(name.clone(), value);
                }
                results.push(Value::Object(object));
            }
            Ok((column_names, results, resolved_any))
        });

        match outcome {
            Ok((column_names, results, resolved_any)) => {
                debug!(
                    access_id = %self.access_id,
                    kind = kind.as_str(),
                    rows = results.len(),
                    "query executed"
                );
                QueryResponse::success(sql, kind.as_str(), column_names, results, resolved_any)
            }
            Err(err) => {
                debug!(access_id = %self.access_id, error = %err, "query failed");
                QueryResponse::failure(sql, err.to_string())
            }
        }
    }

    /// Introspect everything staged so far.
    pub fn schema(&self) -> Result<SchemaResponse, StagingError> {
        let names = self.store.table_names()?;
        let sample_rows = self.config.sample_rows;
        let mut tables = BTreeMap::new();
        let mut total_rows = 0u64;

        for name in &names {
            let table = self.store.with_connection(|conn| {
                let columns = table_columns(conn, name)?;
                let foreign_keys = table_foreign_keys(conn, name)?;
                let indexes = table_indexes(conn, name)?;
                let row_count: i64 = conn.query_row(
                    &format!("SELECT COUNT(*) FROM {}", quote_identifier(name)),
                    [],
                    |row| row.get(0),
                )?;
                let sample_data = sample_table_rows(conn, name, sample_rows)?;
                Ok(TableSchema {
                    columns,
                    foreign_keys,
                    indexes,
                    row_count: row_count as u64,
                    sample_data,
                })
            })?;
            total_rows += table.row_count;
            tables.insert(name.clone(), table);
        }

        Ok(SchemaResponse {
            access_id: self.access_id.clone(),
            table_count: tables.len(),
            tables,
            total_rows,
        })
    }

    pub fn summary(&self) -> Result<DatasetSummary, StagingError> {
        let names = self.store.table_names()?;
        let mut total_rows = 0u64;
        for name in &names {
            total_rows += self.store.row_count(name)?;
        }
        Ok(DatasetSummary {
            access_id: self.access_id.clone(),
            table_count: names.len(),
            total_rows,
            created_at: self.created_at,
        })
    }

    pub fn stats(&self) -> Result<StoreStats, StagingError> {
        self.store.stats()
    }

    fn summarize_tables(
        &self,
        row_counts: &BTreeMap<String, u64>,
    ) -> Result<BTreeMap<String, TableSummary>, StagingError> {
        let sample_rows = self.config.sample_rows;
        let mut schemas = BTreeMap::new();
        for (name, row_count) in row_counts {
            let summary = self.store.with_connection(|conn| {
                let mut columns = BTreeMap::new();
                for column in table_columns(conn, name)? {
                    columns.insert(column.name, column.sql_type);
                }
                let sample_data = sample_table_rows(conn, name, sample_rows)?;
                Ok(TableSummary {
                    columns,
                    row_count: *row_count,
                    sample_data,
                })
            })?;
            schemas.insert(name.clone(), summary);
        }
        Ok(schemas)
    }
}

fn table_columns(conn: &Connection, table: &str) -> Result<Vec<ColumnInfo>, StagingError> {
    let mut stmt = conn.prepare(&format!(
        "PRAGMA table_info({})",
        quote_identifier(table)
    ))?;
    let rows = stmt.query_map([], |row| {
        Ok(ColumnInfo {
            name: row.get(1)?,
            sql_type: row.get(2)?,
            not_null: row.get::<_, i64>(3)? != 0,
            primary_key: row.get::<_, i64>(5)? != 0,
        })
    })?;
    let mut columns = Vec::new();
    for column in rows {
        columns.push(column?);
    }
    Ok(columns)
}

fn table_foreign_keys(conn: &Connection, table: &str) -> Result<Vec<ForeignKeyInfo>, StagingError> {
    let mut stmt = conn.prepare(&format!(
        "PRAGMA foreign_key_list({})",
        quote_identifier(table)
    ))?;
    let rows = stmt.query_map([], |row| {
        Ok(ForeignKeyInfo {
            references_table: row.get(2)?,
            column: row.get(3)?,
            references_column: row
                .get::<_, Option<String>>(4)?
                .unwrap_or_else(|| "id".to_string()),
        })
    })?;
    let mut keys = Vec::new();
    for key in rows {
        keys.push(key?);
    }
    Ok(keys)
}

fn table_indexes(conn: &Connection, table: &str) -> Result<Vec<String>, StagingError> {
    let mut stmt = conn.prepare(&format!(
        "PRAGMA index_list({})",
        quote_identifier(table)
    ))?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;
    let mut indexes = Vec::new();
    for index in rows {
        indexes.push(index?);
    }
    Ok(indexes)
}

/// First rows of a table as JSON objects, with chunk references resolved.
fn sample_table_rows(
    conn: &Connection,
    table: &str,
    limit: usize,
) -> Result<Vec<Value>, StagingError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT * FROM {} LIMIT {}",
        quote_identifier(table),
        limit
    ))?;
    let column_names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
    let mut samples = Vec::new();
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let mut object = Map::new();
        for (i, name) in column_names.iter().enumerate() {
            let value = match row.get_ref(i)? {
                ValueRef::Null => Value::Null,
                ValueRef::Integer(n) => Value::from(n),
                ValueRef::Real(f) => serde_json::Number::from_f64(f)
                    .map(Value::Number)
                    .unwrap_or(Value::Null),
                ValueRef::Text(bytes) => {
                    let text = String::from_utf8_lossy(bytes).into_owned();
                    if chunking::is_reference(&text) {
                        match chunking::resolve_reference(conn, &text)? {
                            Some(full) => Value::String(full),
                            None => Value::String(text),
                        }
                    } else {
                        Value::String(text)
                    }
                }
                ValueRef::Blob(bytes) => Value::String(format!("<{} byte blob>", bytes.len())),
            };
            object.insert(name.clone(), value);
        }
        samples.push(Value::Object(object));
    }
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dataset() -> Dataset {
        Dataset::new("ds_test".to_string(), EngineConfig::default()).expect("dataset")
    }

    #[test]
    fn process_reports_tables_and_samples() {
        let ds = dataset();
        let response = ds.process(&json!({
            "data": {
                "genes": [
                    {"id": 1, "name": "TP53", "symbol": "TP53"},
                    {"id": 2, "name": "BRCA1", "symbol": "BRCA1"}
                ]
            }
        }));

        assert!(response.success, "{}", response.message);
        assert_eq!(response.table_count, 1);
        assert_eq!(response.total_rows, 2);
        let summary = &response.schemas["gene"];
        assert_eq!(summary.row_count, 2);
        assert_eq!(summary.sample_data.len(), 2);
        assert_eq!(summary.columns["name"], "TEXT");
    }

    #[test]
    fn repeated_process_is_idempotent() {
        let ds = dataset();
        let doc = json!({"data": {"genes": [{"id": 1, "name": "TP53", "symbol": "TP53"}]}});
        ds.process(&doc);
        let second = ds.process(&doc);
        assert!(second.success);
        assert_eq!(second.schemas["gene"].row_count, 1);
    }

    #[test]
    fn query_rejects_writes_and_runs_reads() {
        let ds = dataset();
        ds.process(&json!({"data": {"genes": [{"id": 7, "name": "KRAS", "symbol": "KRAS"}]}}));

        let blocked = ds.query("DELETE FROM gene");
        assert!(!blocked.success);
        assert!(blocked.error.is_some());

        let rows = ds.query("SELECT id, name FROM gene");
        assert!(rows.success);
        assert_eq!(rows.row_count, 1);
        assert_eq!(rows.column_names, vec!["id", "name"]);
        assert_eq!(rows.results[0]["name"], "KRAS");
        assert_eq!(rows.query_type.as_deref(), Some("select"));
    }

    #[test]
    fn query_caps_result_rows() {
        let mut config = EngineConfig::default();
        config.max_result_rows = 2;
        let ds = Dataset::new("ds_cap".to_string(), config).expect("dataset");
        ds.process(&json!({"data": {"genes": [
            {"id": 1, "name": "a", "symbol": "a"},
            {"id": 2, "name": "b", "symbol": "b"},
            {"id": 3, "name": "c", "symbol": "c"}
        ]}}));

        let response = ds.query("SELECT * FROM gene ORDER BY id");
        assert!(response.success);
        assert_eq!(response.row_count, 2);
    }

    #[test]
    fn temp_table_queries_execute_without_rows() {
        let ds = dataset();
        let create = ds.query("CREATE TEMP TABLE scratch (n INTEGER)");
        assert!(create.success, "{:?}", create.error);
        assert_eq!(create.row_count, 0);
        assert_eq!(create.query_type.as_deref(), Some("create_temp"));
    }

    #[test]
    fn schema_reports_foreign_keys() {
        let ds = dataset();
        ds.process(&json!({"data": {"variants": [
            {"id": 10, "name": "V600E", "hgvs": "p.V600E",
             "gene": {"id": 12, "name": "BRAF", "symbol": "BRAF"}}
        ]}}));

        let schema = ds.schema().expect("schema");
        assert_eq!(schema.table_count, 2);
        let variant = &schema.tables["variant"];
        assert_eq!(variant.foreign_keys.len(), 1);
        assert_eq!(variant.foreign_keys[0].column, "gene_id");
        assert_eq!(variant.foreign_keys[0].references_table, "gene");
    }

    #[test]
    fn summary_counts_rows_across_tables() {
        let ds = dataset();
        ds.process(&json!({"data": {"genes": [
            {"id": 1, "name": "a", "symbol": "a"},
            {"id": 2, "name": "b", "symbol": "b"}
        ]}}));
        let summary = ds.summary().expect("summary");
        assert_eq!(summary.table_count, 1);
        assert_eq!(summary.total_rows, 2);
        assert_eq!(summary.access_id, "ds_test");
    }
}

//! Serializable response envelopes returned by the engine operations.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::pagination::PaginationInfo;

/// Per-table summary included in a [`ProcessResponse`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSummary {
    /// Column name to declared SQL type.
    pub columns: BTreeMap<String, String>,
    pub row_count: u64,
    /// The first few rows, as JSON objects keyed by column name.
    pub sample_data: Vec<Value>,
}

/// Outcome of staging one document into a dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessResponse {
    pub success: bool,
    pub message: String,
    pub schemas: BTreeMap<String, TableSummary>,
    pub table_count: usize,
    pub total_rows: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<PaginationInfo>,
}

impl ProcessResponse {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            schemas: BTreeMap::new(),
            table_count: 0,
            total_rows: 0,
            pagination: None,
        }
    }
}

/// Outcome of running one governed query against a dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub success: bool,
    pub results: Vec<Value>,
    pub row_count: usize,
    pub column_names: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_type: Option<String>,
    pub chunked_content_resolved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub query: String,
}

impl QueryResponse {
    pub fn success(
        query: impl Into<String>,
        query_type: &'static str,
        column_names: Vec<String>,
        results: Vec<Value>,
        chunked_content_resolved: bool,
    ) -> Self {
        Self {
            success: true,
            row_count: results.len(),
            results,
            column_names,
            query_type: Some(query_type.to_string()),
            chunked_content_resolved,
            error: None,
            query: query.into(),
        }
    }

    pub fn failure(query: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            results: Vec::new(),
            row_count: 0,
            column_names: Vec::new(),
            query_type: None,
            chunked_content_resolved: false,
            error: Some(error.into()),
            query: query.into(),
        }
    }
}

/// One column as reported by table introspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub sql_type: String,
    pub not_null: bool,
    pub primary_key: bool,
}

/// One outgoing foreign key as reported by table introspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeignKeyInfo {
    pub column: String,
    pub references_table: String,
    pub references_column: String,
}

/// Full description of one staged table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSchema {
    pub columns: Vec<ColumnInfo>,
    pub foreign_keys: Vec<ForeignKeyInfo>,
    pub indexes: Vec<String>,
    pub row_count: u64,
    pub sample_data: Vec<Value>,
}

/// Schema snapshot of everything staged so far in a dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaResponse {
    pub access_id: String,
    pub tables: BTreeMap<String, TableSchema>,
    pub table_count: usize,
    pub total_rows: u64,
}

/// Listing entry for one live dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub access_id: String,
    pub table_count: usize,
    pub total_rows: u64,
    pub created_at: DateTime<Utc>,
}

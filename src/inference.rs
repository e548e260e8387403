//! Schema inference over untyped, arbitrarily nested JSON.
//!
//! A depth-first walk classifies objects with the entity heuristic, pools
//! structurally similar instances into one table per resolved type name,
//! and records single references (foreign-key columns) and list references
//! (junction tables) between types. All state lives in a [`DocumentPlan`]
//! built fresh per staging call; nothing is shared between datasets.

use std::collections::{BTreeMap, HashMap};

use serde_json::{Map, Value};

use crate::naming::{sanitize_identifier, singularize};

/// SQL scalar type for an inferred column. Widening prefers TEXT over
/// REAL over INTEGER when instances disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Real,
    Text,
}

impl ColumnType {
    pub fn sql_name(self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Text => "TEXT",
        }
    }

    fn widen(current: Option<ColumnType>, observed: ColumnType) -> ColumnType {
        match (current, observed) {
            (None, t) => t,
            (Some(ColumnType::Text), _) | (_, ColumnType::Text) => ColumnType::Text,
            (Some(ColumnType::Real), _) | (_, ColumnType::Real) => ColumnType::Real,
            _ => ColumnType::Integer,
        }
    }
}

/// One cell value destined for a row. Booleans arrive as 0/1 integers,
/// non-entity structures as serialized text.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

/// A primary-key value, either reused from the source document or
/// surrogate-assigned at insertion time.
#[derive(Debug, Clone, PartialEq)]
pub enum RowId {
    Integer(i64),
    Text(String),
}

impl RowId {
    pub fn canonical(&self) -> String {
        match self {
            RowId::Integer(i) => i.to_string(),
            RowId::Text(t) => t.clone(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TableDraft {
    /// Column name -> resolved type. `None` means only nulls were seen;
    /// such columns default to TEXT.
    pub columns: BTreeMap<String, Option<ColumnType>>,
}

/// A single-reference field: `column` on the owning row holds the id of
/// `records[table][index]`.
#[derive(Debug, Clone)]
pub struct FieldRef {
    pub column: String,
    pub table: String,
    pub index: usize,
}

#[derive(Debug, Clone)]
pub struct EntityRecord {
    pub explicit_id: Option<RowId>,
    pub values: BTreeMap<String, CellValue>,
    pub refs: Vec<FieldRef>,
}

/// One observed (parent, child) pair under a list-of-entities field.
#[derive(Debug, Clone)]
pub struct EntityLink {
    pub parent_table: String,
    pub parent_index: usize,
    pub child_table: String,
    pub child_index: usize,
}

/// A many-to-many junction, one slot per unordered type pair. `left` and
/// `right` are the pair in sorted order.
#[derive(Debug, Clone)]
pub struct JunctionSpec {
    pub name: String,
    pub left: String,
    pub right: String,
}

#[derive(Debug, Default)]
pub struct DocumentPlan {
    pub tables: BTreeMap<String, TableDraft>,
    pub records: BTreeMap<String, Vec<EntityRecord>>,
    pub junctions: BTreeMap<String, JunctionSpec>,
    pub links: Vec<EntityLink>,
}

impl DocumentPlan {
    pub fn entity_count(&self) -> usize {
        self.records.values().map(Vec::len).sum()
    }
}

/// Infer the relational plan for one decoded document.
pub fn plan_document(document: &Value) -> DocumentPlan {
    let mut planner = Planner::default();
    planner.walk_root(document);
    if planner.plan.entity_count() == 0 {
        planner.plan_fallback(document);
    }
    planner.plan
}

#[derive(Default)]
struct Planner {
    plan: DocumentPlan,
    by_id: HashMap<(String, String), usize>,
}

impl Planner {
    fn walk_root(&mut self, value: &Value) {
        match value {
            Value::Object(obj) => {
                if let Some(nodes) = connection_nodes(obj) {
                    for node in nodes {
                        self.walk_root(node);
                    }
                } else if is_entity(obj) {
                    self.visit_entity(obj, "");
                } else {
                    for (key, child) in obj {
                        self.discover(child, key);
                    }
                }
            }
            Value::Array(items) => {
                for item in items {
                    self.walk_root(item);
                }
            }
            _ => {}
        }
    }

    /// Search for entities below a non-entity container. No parent row
    /// exists here, so scalars contribute nothing.
    fn discover(&mut self, value: &Value, key: &str) {
        match value {
            Value::Object(obj) => {
                if let Some(nodes) = connection_nodes(obj) {
                    for node in nodes {
                        self.discover(node, key);
                    }
                } else if is_entity(obj) {
                    self.visit_entity(obj, key);
                } else {
                    for (sub_key, child) in obj {
                        self.discover(child, sub_key);
                    }
                }
            }
            Value::Array(items) => {
                for item in items {
                    self.discover(item, key);
                }
            }
            _ => {}
        }
    }

    /// Register one entity instance under its resolved type and process
    /// its fields for nested entities. Returns (table, record index).
    fn visit_entity(&mut self, obj: &Map<String, Value>, key_hint: &str) -> (String, usize) {
        let table = self.resolve_type_name(obj, key_hint);
        let explicit_id = extract_id(obj);
        let index = self.register_record(&table, explicit_id.clone());

        let id_type = match &explicit_id {
            Some(RowId::Text(_)) => ColumnType::Text,
            _ => ColumnType::Integer,
        };
        self.observe(&table, "id", Some(id_type));

        for (key, value) in obj {
            if key == "__typename" || key == "id" || key == "_id" {
                continue;
            }
            match value {
                Value::Object(child) => self.visit_object_field(&table, index, key, child),
                Value::Array(items) => self.visit_array_field(&table, index, key, items),
                scalar => {
                    let column = sanitize_identifier(key);
                    let (cell, ty) = scalar_cell(scalar);
                    self.put_value(&table, index, &column, cell, ty);
                }
            }
        }
        (table, index)
    }

    fn visit_object_field(
        &mut self,
        table: &str,
        index: usize,
        key: &str,
        child: &Map<String, Value>,
    ) {
        if let Some(nodes) = connection_nodes(child) {
            self.visit_node_list(table, index, key, &nodes);
            return;
        }
        if is_entity(child) {
            let (child_table, child_index) = self.visit_entity(child, key);
            self.record_single_ref(table, index, key, &child_table, child_index);
            return;
        }

        // A non-entity object with no scalar fields and nothing entity-
        // shaped inside is kept whole as opaque text.
        let has_scalar = child
            .values()
            .any(|v| !matches!(v, Value::Object(_) | Value::Array(_)));
        let has_entity_content = child.values().any(|v| match v {
            Value::Object(inner) => is_entity(inner) || connection_nodes(inner).is_some(),
            Value::Array(items) => !items.is_empty() && entity_items(items).is_some(),
            _ => false,
        });
        if !has_scalar && !has_entity_content {
            let column = sanitize_identifier(key);
            let serialized = Value::Object(child.clone()).to_string();
            self.put_value(
                table,
                index,
                &column,
                CellValue::Text(serialized),
                Some(ColumnType::Text),
            );
            return;
        }

        // Otherwise fold its fields into the parent row under prefixed
        // column names.
        for (sub_key, sub_value) in child {
            let flat_key = format!("{key}_{sub_key}");
            match sub_value {
                Value::Object(inner) => {
                    if let Some(nodes) = connection_nodes(inner) {
                        self.visit_node_list(table, index, &flat_key, &nodes);
                    } else if is_entity(inner) {
                        let (child_table, child_index) = self.visit_entity(inner, &flat_key);
                        self.record_single_ref(table, index, &flat_key, &child_table, child_index);
                    } else {
                        let column = sanitize_identifier(&flat_key);
                        let serialized = Value::Object(inner.clone()).to_string();
                        self.put_value(
                            table,
                            index,
                            &column,
                            CellValue::Text(serialized),
                            Some(ColumnType::Text),
                        );
                    }
                }
                Value::Array(items) => self.visit_array_field(table, index, &flat_key, items),
                scalar => {
                    let column = sanitize_identifier(&flat_key);
                    let (cell, ty) = scalar_cell(scalar);
                    self.put_value(table, index, &column, cell, ty);
                }
            }
        }
    }

    fn visit_array_field(&mut self, table: &str, index: usize, key: &str, items: &[Value]) {
        if !items.is_empty() {
            if let Some(entities) = entity_items(items) {
                self.visit_entity_list(table, index, key, &entities);
                return;
            }
        }
        let column = sanitize_identifier(key);
        let serialized = Value::Array(items.to_vec()).to_string();
        self.put_value(
            table,
            index,
            &column,
            CellValue::Text(serialized),
            Some(ColumnType::Text),
        );
    }

    /// Unwrapped connection nodes under a field: entity nodes form a list
    /// relationship, anything else is searched for entities deeper down.
    fn visit_node_list(&mut self, table: &str, index: usize, key: &str, nodes: &[&Value]) {
        let entity_nodes: Vec<&Map<String, Value>> = nodes
            .iter()
            .filter_map(|n| n.as_object())
            .filter(|o| is_entity(o))
            .collect();
        if !entity_nodes.is_empty() {
            self.visit_entity_list(table, index, key, &entity_nodes);
        } else {
            for node in nodes {
                self.discover(node, key);
            }
        }
    }

    fn visit_entity_list(
        &mut self,
        parent_table: &str,
        parent_index: usize,
        key: &str,
        entities: &[&Map<String, Value>],
    ) {
        for obj in entities {
            let (child_table, child_index) = self.visit_entity(obj, key);
            // Self-relationships are not recorded.
            if child_table != parent_table {
                self.record_junction(parent_table, &child_table);
                self.plan.links.push(EntityLink {
                    parent_table: parent_table.to_string(),
                    parent_index,
                    child_table,
                    child_index,
                });
            }
        }
    }

    fn record_single_ref(
        &mut self,
        table: &str,
        index: usize,
        key: &str,
        child_table: &str,
        child_index: usize,
    ) {
        let column = format!("{}_id", sanitize_identifier(key));
        // FK columns mirror the referenced id's type; surrogate ids are
        // numeric, so the absent-id case stays INTEGER.
        let id_type = self
            .plan
            .records
            .get(child_table)
            .and_then(|records| records.get(child_index))
            .and_then(|record| record.explicit_id.as_ref())
            .map(|id| match id {
                RowId::Integer(_) => ColumnType::Integer,
                RowId::Text(_) => ColumnType::Text,
            })
            .unwrap_or(ColumnType::Integer);
        self.observe(table, &column, Some(id_type));
        if let Some(records) = self.plan.records.get_mut(table) {
            records[index].refs.push(FieldRef {
                column,
                table: child_table.to_string(),
                index: child_index,
            });
        }
    }

    fn record_junction(&mut self, a: &str, b: &str) {
        let (left, right) = if a <= b { (a, b) } else { (b, a) };
        let name = format!("{left}_{right}");
        self.plan.junctions.entry(name.clone()).or_insert(JunctionSpec {
            name,
            left: left.to_string(),
            right: right.to_string(),
        });
    }

    /// Type name: explicit `__typename` discriminator first, then the
    /// singularized path key, then a synthetic fallback.
    fn resolve_type_name(&self, obj: &Map<String, Value>, key_hint: &str) -> String {
        if let Some(Value::String(discriminator)) = obj.get("__typename") {
            return sanitize_identifier(discriminator);
        }
        if !key_hint.trim().is_empty() {
            return sanitize_identifier(&singularize(key_hint));
        }
        "entity".to_string()
    }

    /// Instances are deduplicated by (type, id) value identity: a second
    /// node carrying an id already seen for the type merges into the
    /// existing record instead of becoming a new row.
    fn register_record(&mut self, table: &str, explicit_id: Option<RowId>) -> usize {
        self.plan.tables.entry(table.to_string()).or_default();
        let records = self.plan.records.entry(table.to_string()).or_default();

        if let Some(id) = &explicit_id {
            let key = (table.to_string(), id.canonical());
            if let Some(&index) = self.by_id.get(&key) {
                return index;
            }
            let index = records.len();
            records.push(EntityRecord {
                explicit_id,
                values: BTreeMap::new(),
                refs: Vec::new(),
            });
            self.by_id.insert(key, index);
            index
        } else {
            let index = records.len();
            records.push(EntityRecord {
                explicit_id: None,
                values: BTreeMap::new(),
                refs: Vec::new(),
            });
            index
        }
    }

    fn put_value(
        &mut self,
        table: &str,
        index: usize,
        column: &str,
        cell: CellValue,
        ty: Option<ColumnType>,
    ) {
        self.observe(table, column, ty);
        if let Some(records) = self.plan.records.get_mut(table) {
            let values = &mut records[index].values;
            match values.get(column) {
                None | Some(CellValue::Null) => {
                    values.insert(column.to_string(), cell);
                }
                _ => {}
            }
        }
    }

    fn observe(&mut self, table: &str, column: &str, ty: Option<ColumnType>) {
        let draft = self.plan.tables.entry(table.to_string()).or_default();
        let slot = draft.columns.entry(column.to_string()).or_insert(None);
        if let Some(observed) = ty {
            *slot = Some(ColumnType::widen(*slot, observed));
        }
    }

    /// Pure scalar, flat-object, or plain-array payloads with no entities
    /// at all land in a single flattened table.
    fn plan_fallback(&mut self, document: &Value) {
        match document {
            Value::Object(obj) => {
                let index = self.register_record("root_object", None);
                self.observe("root_object", "id", Some(ColumnType::Integer));
                self.fold_flat(obj, "root_object", index);
            }
            Value::Array(items) => {
                self.plan.tables.entry("array_data".to_string()).or_default();
                self.observe("array_data", "id", Some(ColumnType::Integer));
                for item in items {
                    let index = self.register_record("array_data", None);
                    match item {
                        Value::Object(obj) => self.fold_flat(obj, "array_data", index),
                        other => {
                            let (cell, ty) = flat_cell(other);
                            self.put_value("array_data", index, "value", cell, ty);
                        }
                    }
                }
            }
            scalar => {
                let index = self.register_record("scalar_data", None);
                self.observe("scalar_data", "id", Some(ColumnType::Integer));
                let (cell, ty) = flat_cell(scalar);
                self.put_value("scalar_data", index, "value", cell, ty);
            }
        }
    }

    fn fold_flat(&mut self, obj: &Map<String, Value>, table: &str, index: usize) {
        for (key, value) in obj {
            let column = sanitize_identifier(key);
            let (cell, ty) = flat_cell(value);
            self.put_value(table, index, &column, cell, ty);
        }
    }
}

fn is_entity(obj: &Map<String, Value>) -> bool {
    if obj.contains_key("id") || obj.contains_key("_id") {
        return true;
    }
    obj.len() >= 2
        && ["name", "title", "description", "type"]
            .iter()
            .any(|k| obj.contains_key(*k))
}

/// Unwrap a GraphQL connection (`{edges:[{node:..}], pageInfo, totalCount}`)
/// to its node values so edges/pageInfo never become columns.
fn connection_nodes(obj: &Map<String, Value>) -> Option<Vec<&Value>> {
    let edges = obj.get("edges")?.as_array()?;
    let looks_like_connection = obj.contains_key("pageInfo")
        || obj.contains_key("totalCount")
        || edges
            .iter()
            .all(|e| e.as_object().is_some_and(|m| m.contains_key("node")));
    if !looks_like_connection {
        return None;
    }
    Some(edges.iter().filter_map(|e| e.get("node")).collect())
}

/// All elements are objects passing the entity heuristic.
fn entity_items(items: &[Value]) -> Option<Vec<&Map<String, Value>>> {
    let objs: Vec<&Map<String, Value>> = items.iter().filter_map(|i| i.as_object()).collect();
    if objs.len() == items.len() && objs.iter().all(|o| is_entity(o)) {
        Some(objs)
    } else {
        None
    }
}

fn extract_id(obj: &Map<String, Value>) -> Option<RowId> {
    let raw = obj.get("id").or_else(|| obj.get("_id"))?;
    match raw {
        Value::Number(n) => match n.as_i64() {
            Some(i) => Some(RowId::Integer(i)),
            None => Some(RowId::Text(n.to_string())),
        },
        Value::String(s) => Some(RowId::Text(s.clone())),
        _ => None,
    }
}

fn scalar_cell(value: &Value) -> (CellValue, Option<ColumnType>) {
    match value {
        Value::Null => (CellValue::Null, None),
        Value::Bool(b) => (CellValue::Integer(*b as i64), Some(ColumnType::Integer)),
        Value::Number(n) => number_cell(n),
        Value::String(s) => (CellValue::Text(s.clone()), Some(ColumnType::Text)),
        // Callers dispatch structured values before reaching here.
        other => (CellValue::Text(other.to_string()), Some(ColumnType::Text)),
    }
}

/// Fallback-table variant: structured values are serialized inline.
fn flat_cell(value: &Value) -> (CellValue, Option<ColumnType>) {
    match value {
        Value::Object(_) | Value::Array(_) => (
            CellValue::Text(value.to_string()),
            Some(ColumnType::Text),
        ),
        scalar => scalar_cell(scalar),
    }
}

fn number_cell(n: &serde_json::Number) -> (CellValue, Option<ColumnType>) {
    if let Some(i) = n.as_i64() {
        (CellValue::Integer(i), Some(ColumnType::Integer))
    } else {
        (
            CellValue::Real(n.as_f64().unwrap_or(f64::NAN)),
            Some(ColumnType::Real),
        )
    }
}

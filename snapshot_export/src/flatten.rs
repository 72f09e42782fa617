//! Projection of a decoded [`RecordNode`] tree into flat rows or a nested
//! JSON document.

use std::borrow::Cow;
use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use snapshot_schema::{ElementKind, FieldKind, SchemaProvider, StructMember, UNION_TYPE_SUFFIX};

use crate::error::ExportError;
use crate::record::{RecordNode, ScalarValue};

/// Column used when the root record itself is a leaf.
const ROOT_LEAF_COLUMN: &str = "value";

pub const DEFAULT_JOIN_DELIMITER: &str = ";";
pub const DEFAULT_MAX_ROWS_PER_RECORD: usize = 1_000_000;

/// How vectors turn into rows. Has no `Default`; callers asking for rows
/// pick one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FanoutPolicy {
    /// One row per combination of elements across every vector in the record.
    Cartesian,
    /// Element 0 of each vector only. Lossy.
    FirstOnly,
    /// Vectors of scalars or strings collapse into one delimited cell;
    /// vectors of tables still expand as in `Cartesian`.
    JoinScalar { delimiter: String },
}

/// Fan-out policy as named on the command line and in config files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FanoutKind {
    Cartesian,
    #[serde(alias = "first_only")]
    First,
    #[serde(alias = "join_scalar")]
    Join,
}

impl FanoutKind {
    pub fn into_policy(self, delimiter: &str) -> FanoutPolicy {
        match self {
            FanoutKind::Cartesian => FanoutPolicy::Cartesian,
            FanoutKind::First => FanoutPolicy::FirstOnly,
            FanoutKind::Join => FanoutPolicy::JoinScalar {
                delimiter: delimiter.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlattenMode {
    Rows(FanoutPolicy),
    Document,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlattenOptions {
    pub max_rows_per_record: usize,
}

impl Default for FlattenOptions {
    fn default() -> Self {
        Self {
            max_rows_per_record: DEFAULT_MAX_ROWS_PER_RECORD,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FlatValue {
    Null,
    Scalar(ScalarValue),
    Text(String),
}

impl FlatValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FlatValue::Null)
    }

    /// Text of a CSV cell; null is the empty cell.
    pub fn to_cell(&self) -> Cow<'_, str> {
        match self {
            FlatValue::Null => Cow::Borrowed(""),
            FlatValue::Scalar(value) => Cow::Owned(value.to_string()),
            FlatValue::Text(text) => Cow::Borrowed(text),
        }
    }
}

/// Ordered `path -> value` cells of one output row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlatRow {
    cells: Vec<(String, FlatValue)>,
}

impl FlatRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, path: impl Into<String>, value: FlatValue) {
        self.cells.push((path.into(), value));
    }

    /// Put a cell ahead of every existing one.
    pub fn push_front(&mut self, path: impl Into<String>, value: FlatValue) {
        self.cells.insert(0, (path.into(), value));
    }

    pub fn get(&self, path: &str) -> Option<&FlatValue> {
        self.cells
            .iter()
            .find(|(cell, _)| cell == path)
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FlatValue)> {
        self.cells.iter().map(|(path, value)| (path.as_str(), value))
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.cells.iter().map(|(path, _)| path.as_str())
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

impl FromIterator<(String, FlatValue)> for FlatRow {
    fn from_iter<T: IntoIterator<Item = (String, FlatValue)>>(iter: T) -> Self {
        Self {
            cells: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Flattened {
    Rows(Vec<FlatRow>),
    Document(Value),
}

pub fn flatten(
    root: RecordNode,
    mode: &FlattenMode,
    options: &FlattenOptions,
) -> Result<Flattened, ExportError> {
    match mode {
        FlattenMode::Document => Ok(Flattened::Document(to_document(root))),
        FlattenMode::Rows(policy) => flatten_rows(&root, policy, options).map(Flattened::Rows),
    }
}

pub fn flatten_rows(
    root: &RecordNode,
    policy: &FanoutPolicy,
    options: &FlattenOptions,
) -> Result<Vec<FlatRow>, ExportError> {
    let expander = RowExpander {
        policy,
        limit: options.max_rows_per_record,
    };
    let rows = expander.expand(root, "")?;
    Ok(rows.into_iter().map(FlatRow::from_iter).collect())
}

/// Structure-preserving conversion into a JSON value.
pub fn to_document(node: RecordNode) -> Value {
    match node {
        RecordNode::Null | RecordNode::CycleCut(_) => Value::Null,
        RecordNode::Scalar(value) => scalar_to_json(value),
        RecordNode::Text(text) => Value::String(text),
        RecordNode::List(items) => Value::Array(items.into_iter().map(to_document).collect()),
        RecordNode::Struct(fields) => Value::Object(
            fields
                .into_iter()
                .map(|(name, value)| (name, to_document(value)))
                .collect::<Map<String, Value>>(),
        ),
    }
}

fn scalar_to_json(value: ScalarValue) -> Value {
    match value {
        ScalarValue::Bool(v) => Value::Bool(v),
        ScalarValue::Int(v) => Value::Number(v.into()),
        ScalarValue::UInt(v) => Value::Number(v.into()),
        // Shortest f32 text, so 0.1f32 renders as 0.1 rather than 0.10000000149011612.
        ScalarValue::Float32(v) => v
            .to_string()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map_or(Value::Null, Value::Number),
        ScalarValue::Float64(v) => Number::from_f64(v).map_or(Value::Null, Value::Number),
    }
}

fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

type PartialRow = Vec<(String, FlatValue)>;

struct RowExpander<'p> {
    policy: &'p FanoutPolicy,
    limit: usize,
}

impl RowExpander<'_> {
    /// Alternatives for `node`: each entry is one partial row, and the record
    /// yields one full row per element of the cross product of its fields.
    fn expand(&self, node: &RecordNode, path: &str) -> Result<Vec<PartialRow>, ExportError> {
        match node {
            RecordNode::Struct(fields) => {
                let mut rows: Vec<PartialRow> = vec![Vec::new()];
                for (name, child) in fields {
                    let child_rows = self.expand(child, &join_path(path, name))?;
                    rows = self.cross(rows, child_rows)?;
                }
                Ok(rows)
            }
            RecordNode::List(items) => self.expand_list(items, path),
            leaf => Ok(vec![vec![(leaf_path(path), leaf_value(leaf))]]),
        }
    }

    fn expand_list(&self, items: &[RecordNode], path: &str) -> Result<Vec<PartialRow>, ExportError> {
        let Some(first) = items.first() else {
            return Ok(vec![vec![(leaf_path(path), FlatValue::Null)]]);
        };
        match self.policy {
            FanoutPolicy::FirstOnly => self.expand(first, path),
            FanoutPolicy::JoinScalar { delimiter } if items.iter().all(RecordNode::is_leaf) => {
                let joined = items
                    .iter()
                    .map(|item| leaf_value(item).to_cell().into_owned())
                    .collect::<Vec<_>>()
                    .join(delimiter.as_str());
                Ok(vec![vec![(leaf_path(path), FlatValue::Text(joined))]])
            }
            _ => {
                let mut rows = Vec::new();
                for item in items {
                    rows.extend(self.expand(item, path)?);
                    if rows.len() > self.limit {
                        return Err(ExportError::RowLimitExceeded { limit: self.limit });
                    }
                }
                Ok(rows)
            }
        }
    }

    fn cross(&self, left: Vec<PartialRow>, right: Vec<PartialRow>) -> Result<Vec<PartialRow>, ExportError> {
        if right.len() == 1 {
            let mut left = left;
            if let Some(only) = right.into_iter().next() {
                for row in &mut left {
                    row.extend(only.iter().cloned());
                }
            }
            return Ok(left);
        }
        let total = left.len().saturating_mul(right.len());
        if total > self.limit {
            return Err(ExportError::RowLimitExceeded { limit: self.limit });
        }
        let mut out = Vec::with_capacity(total);
        for row in &left {
            for extra in &right {
                let mut combined = row.clone();
                combined.extend(extra.iter().cloned());
                out.push(combined);
            }
        }
        Ok(out)
    }
}

fn leaf_path(path: &str) -> String {
    if path.is_empty() {
        ROOT_LEAF_COLUMN.to_string()
    } else {
        path.to_string()
    }
}

fn leaf_value(node: &RecordNode) -> FlatValue {
    match node {
        RecordNode::Scalar(value) => FlatValue::Scalar(*value),
        RecordNode::Text(text) => FlatValue::Text(text.clone()),
        _ => FlatValue::Null,
    }
}

/// Every column a row of `root` can produce, in schema order.
///
/// Independent of the fan-out policy: vectors expand under their own path
/// whichever policy is used. A table already on the current chain of nested
/// tables is not walked again; its path becomes a single column instead, so
/// recursive schemas stay finite. Deeper paths under that column only show
/// up in rows.
pub fn schema_columns<S: SchemaProvider + ?Sized>(schema: &S, root: &str) -> Vec<String> {
    let mut columns = Columns::default();
    let mut chain = Vec::new();
    columns.table(schema, root, "", &mut chain);
    columns.paths
}

#[derive(Default)]
struct Columns {
    paths: Vec<String>,
    seen: HashSet<String>,
}

impl Columns {
    fn add(&mut self, path: String) {
        if self.seen.insert(path.clone()) {
            self.paths.push(path);
        }
    }

    fn table<'s, S: SchemaProvider + ?Sized>(
        &mut self,
        schema: &'s S,
        name: &'s str,
        prefix: &str,
        chain: &mut Vec<&'s str>,
    ) {
        let Some(def) = schema.table(name) else {
            return;
        };
        if chain.contains(&name) {
            self.add(prefix.to_string());
            return;
        }
        chain.push(name);
        for field in def.fields.iter().filter(|field| !field.deprecated) {
            let path = join_path(prefix, &field.name);
            match &field.kind {
                FieldKind::Scalar(_)
                | FieldKind::String
                | FieldKind::Vector(ElementKind::Scalar(_))
                | FieldKind::Vector(ElementKind::String) => self.add(path),
                FieldKind::Table(table) | FieldKind::Vector(ElementKind::Table(table)) => {
                    self.table(schema, table, &path, chain)
                }
                FieldKind::Struct(name) | FieldKind::Vector(ElementKind::Struct(name)) => {
                    self.inline_struct(schema, name, &path)
                }
                FieldKind::Union(union) => {
                    self.add(format!("{path}{UNION_TYPE_SUFFIX}"));
                    if let Some(union) = schema.union_def(union) {
                        for variant in &union.variants {
                            self.table(schema, &variant.table, &path, chain);
                        }
                    }
                }
            }
        }
        chain.pop();
    }

    fn inline_struct<S: SchemaProvider + ?Sized>(&mut self, schema: &S, name: &str, prefix: &str) {
        let Some(def) = schema.struct_def(name) else {
            return;
        };
        for member in &def.fields {
            let path = join_path(prefix, &member.name);
            match &member.kind {
                StructMember::Scalar(_) => self.add(path),
                StructMember::Struct(nested) => self.inline_struct(schema, nested, &path),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snapshot_schema::SchemaDescriptor;

    fn int(v: i64) -> RecordNode {
        RecordNode::Scalar(ScalarValue::Int(v))
    }

    fn text(v: &str) -> RecordNode {
        RecordNode::Text(v.to_string())
    }

    fn record(fields: Vec<(&str, RecordNode)>) -> RecordNode {
        RecordNode::Struct(
            fields
                .into_iter()
                .map(|(name, node)| (name.to_string(), node))
                .collect(),
        )
    }

    fn rows(node: RecordNode, policy: FanoutPolicy) -> Vec<FlatRow> {
        match flatten(node, &FlattenMode::Rows(policy), &FlattenOptions::default())
            .expect("flatten")
        {
            Flattened::Rows(rows) => rows,
            Flattened::Document(_) => panic!("rows mode produced a document"),
        }
    }

    fn squad() -> RecordNode {
        record(vec![
            ("id", int(7)),
            ("name", text("alpha")),
            (
                "members",
                RecordNode::List(vec![
                    record(vec![("callsign", text("hawk"))]),
                    record(vec![("callsign", text("wren"))]),
                ]),
            ),
        ])
    }

    #[test]
    fn cartesian_repeats_siblings_per_element() {
        let rows = rows(squad(), FanoutPolicy::Cartesian);
        assert_eq!(rows.len(), 2);
        for (row, callsign) in rows.iter().zip(["hawk", "wren"]) {
            let paths: Vec<_> = row.paths().collect();
            assert_eq!(paths, vec!["id", "name", "members.callsign"]);
            assert_eq!(row.get("id"), Some(&FlatValue::Scalar(ScalarValue::Int(7))));
            assert_eq!(
                row.get("members.callsign"),
                Some(&FlatValue::Text(callsign.into()))
            );
        }
    }

    #[test]
    fn cartesian_crosses_sibling_vectors() {
        let node = record(vec![
            ("a", RecordNode::List(vec![int(1), int(2), int(3)])),
            ("b", RecordNode::List(vec![text("x"), text("y")])),
        ]);
        let rows = rows(node, FanoutPolicy::Cartesian);
        let cells: Vec<_> = rows
            .iter()
            .map(|row| format!("{}{}", row.get("a").expect("a").to_cell(), row.get("b").expect("b").to_cell()))
            .collect();
        assert_eq!(cells, vec!["1x", "1y", "2x", "2y", "3x", "3y"]);
    }

    #[test]
    fn first_only_and_join_collapse_to_one_row() {
        let rows_first = rows(squad(), FanoutPolicy::FirstOnly);
        assert_eq!(rows_first.len(), 1);
        assert_eq!(
            rows_first[0].get("members.callsign"),
            Some(&FlatValue::Text("hawk".into()))
        );

        let node = record(vec![("tags", RecordNode::List(vec![text("north"), text("coastal")]))]);
        let joined = rows(
            node,
            FanoutPolicy::JoinScalar {
                delimiter: "|".into(),
            },
        );
        assert_eq!(joined.len(), 1);
        assert_eq!(joined[0].get("tags"), Some(&FlatValue::Text("north|coastal".into())));

        // Tables inside a join policy still fan out.
        assert_eq!(
            rows(
                squad(),
                FanoutPolicy::JoinScalar {
                    delimiter: ";".into()
                }
            )
            .len(),
            2
        );
    }

    #[test]
    fn empty_vectors_and_null_tables_keep_the_record() {
        let node = record(vec![
            ("id", int(1)),
            ("members", RecordNode::List(Vec::new())),
            ("leader", RecordNode::Null),
            ("parent", RecordNode::CycleCut(16)),
        ]);
        let rows = rows(node, FanoutPolicy::Cartesian);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("members"), Some(&FlatValue::Null));
        assert_eq!(rows[0].get("leader"), Some(&FlatValue::Null));
        assert_eq!(rows[0].get("parent"), Some(&FlatValue::Null));
    }

    #[test]
    fn root_leaf_uses_value_column() {
        let rows = rows(int(3), FanoutPolicy::Cartesian);
        assert_eq!(rows[0].paths().collect::<Vec<_>>(), vec!["value"]);
    }

    #[test]
    fn expansion_beyond_limit_fails() {
        let node = record(vec![
            ("a", RecordNode::List((0..10).map(int).collect())),
            ("b", RecordNode::List((0..10).map(int).collect())),
        ]);
        let result = flatten(
            node,
            &FlattenMode::Rows(FanoutPolicy::Cartesian),
            &FlattenOptions {
                max_rows_per_record: 50,
            },
        );
        assert!(matches!(
            result,
            Err(ExportError::RowLimitExceeded { limit: 50 })
        ));
    }

    #[test]
    fn document_keeps_structure_and_nulls() {
        let node = record(vec![
            ("x", RecordNode::Null),
            ("y", RecordNode::List(vec![int(1), int(2)])),
        ]);
        let document = to_document(node);
        assert_eq!(
            serde_json::to_string(&document).expect("serialize"),
            r#"{"x":null,"y":[1,2]}"#
        );
    }

    #[test]
    fn document_floats_are_shortest_and_finite() {
        let node = record(vec![
            ("a", RecordNode::Scalar(ScalarValue::Float32(0.1))),
            ("b", RecordNode::Scalar(ScalarValue::Float32(-2.0))),
            ("c", RecordNode::Scalar(ScalarValue::Float64(f64::NAN))),
            ("d", RecordNode::Scalar(ScalarValue::UInt(u64::MAX))),
        ]);
        assert_eq!(
            serde_json::to_string(&to_document(node)).expect("serialize"),
            r#"{"a":0.1,"b":-2.0,"c":null,"d":18446744073709551615}"#
        );
    }

    #[test]
    fn schema_columns_cover_unions_structs_and_recursion() {
        let schema = SchemaDescriptor::from_json_str(
            r#"{
                "name": "squad",
                "version": 1,
                "root_table": "Squad",
                "tables": [
                    {"name": "Squad", "fields": [
                        {"name": "id", "id": 0, "type": {"scalar": "uint32"}},
                        {"name": "origin", "id": 1, "type": {"struct": "Vec2"}},
                        {"name": "members", "id": 2, "type": {"vector": {"table": "Member"}}},
                        {"name": "task", "id": 4, "type": {"union": "Task"}},
                        {"name": "parent", "id": 5, "type": {"table": "Squad"}}
                    ]},
                    {"name": "Member", "fields": [
                        {"name": "callsign", "id": 0, "type": "string"}
                    ]},
                    {"name": "Patrol", "fields": [
                        {"name": "turns", "id": 0, "type": {"scalar": "uint8"}}
                    ]},
                    {"name": "Escort", "fields": [
                        {"name": "turns", "id": 0, "type": {"scalar": "uint8"}},
                        {"name": "target", "id": 1, "type": "string"}
                    ]}
                ],
                "structs": [
                    {"name": "Vec2", "size": 8, "fields": [
                        {"name": "x", "offset": 0, "type": {"scalar": "float"}},
                        {"name": "y", "offset": 4, "type": {"scalar": "float"}}
                    ]}
                ],
                "unions": [
                    {"name": "Task", "variants": [
                        {"tag": 1, "table": "Patrol"},
                        {"tag": 2, "table": "Escort"}
                    ]}
                ]
            }"#,
        )
        .expect("schema");
        assert_eq!(
            schema_columns(&schema, "Squad"),
            vec![
                "id",
                "origin.x",
                "origin.y",
                "members.callsign",
                "task_type",
                "task.turns",
                "task.target",
                "parent",
            ]
        );
    }
}

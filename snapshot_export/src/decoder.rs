//! Schema-driven walk over a [`BufferView`] producing a [`RecordNode`] tree.
//!
//! One generic walker serves every table: the schema says which vtable slot
//! holds what, and the walker reads slots in declaration order. Table offsets
//! seen during the walk are remembered so that back-references terminate as
//! [`RecordNode::CycleCut`] leaves instead of recursing forever.

use std::collections::HashSet;
use std::fmt::Write as _;

use flatbuffers::SIZE_UOFFSET;
use serde::{Deserialize, Serialize};
use snapshot_schema::{
    ElementKind, FieldDef, FieldKind, SchemaProvider, StructMember, UNION_TYPE_SUFFIX,
};
use tracing::{debug, warn};

use crate::buffer::{BufferView, TableRef};
use crate::error::DecodeError;
use crate::record::{RecordNode, ScalarValue};

pub const DEFAULT_MAX_DEPTH: usize = 64;

/// What to do with a union discriminant that names no known variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnionTagPolicy {
    #[default]
    Fail,
    /// Emit null for the value and keep the raw tag, logging a warning.
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeOptions {
    pub unknown_union_tags: UnionTagPolicy,
    /// Deepest chain of nested tables accepted before giving up.
    pub max_depth: usize,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            unknown_union_tags: UnionTagPolicy::Fail,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

pub struct Decoder<'s, S: SchemaProvider + ?Sized> {
    schema: &'s S,
    options: DecodeOptions,
}

impl<'s, S: SchemaProvider + ?Sized> Decoder<'s, S> {
    pub fn new(schema: &'s S) -> Self {
        Self::with_options(schema, DecodeOptions::default())
    }

    pub fn with_options(schema: &'s S, options: DecodeOptions) -> Self {
        Self { schema, options }
    }

    /// Decode the buffer's root table.
    pub fn decode(&self, view: &BufferView<'_>) -> Result<RecordNode, DecodeError> {
        self.check_identifier(view)?;
        let root = view.root_offset()?;
        self.decode_table_at(view, root, self.schema.root_table())
    }

    /// Decode the table at `position` as an instance of `table`.
    pub fn decode_table_at(
        &self,
        view: &BufferView<'_>,
        position: usize,
        table: &str,
    ) -> Result<RecordNode, DecodeError> {
        let mut traversal = Traversal {
            view: *view,
            schema: self.schema,
            options: self.options,
            visited: HashSet::new(),
            path: Vec::new(),
            depth: 0,
        };
        traversal.visited.insert(position);
        let record = traversal.table(position, table)?;
        debug!(
            target: "snapshot_export::decoder",
            schema = self.schema.schema_name(),
            table,
            tables = traversal.visited.len(),
            "decode.completed"
        );
        Ok(record)
    }

    fn check_identifier(&self, view: &BufferView<'_>) -> Result<(), DecodeError> {
        let Some(expected) = self.schema.file_identifier() else {
            return Ok(());
        };
        let found = view.file_identifier()?;
        if found == expected.as_bytes() {
            return Ok(());
        }
        Err(DecodeError::SchemaMismatch {
            schema: self.schema.schema_name().to_string(),
            version: self.schema.version(),
            expected: expected.to_string(),
            found: String::from_utf8_lossy(found).into_owned(),
        })
    }
}

enum Segment<'s> {
    Field(&'s str),
    Index(usize),
}

struct Traversal<'s, 'buf, S: SchemaProvider + ?Sized> {
    view: BufferView<'buf>,
    schema: &'s S,
    options: DecodeOptions,
    visited: HashSet<usize>,
    path: Vec<Segment<'s>>,
    depth: usize,
}

impl<'s, 'buf, S: SchemaProvider + ?Sized> Traversal<'s, 'buf, S> {
    fn path(&self) -> String {
        let mut out = String::new();
        for segment in &self.path {
            match segment {
                Segment::Field(name) => {
                    if !out.is_empty() {
                        out.push('.');
                    }
                    out.push_str(name);
                }
                Segment::Index(index) => {
                    let _ = write!(out, "[{index}]");
                }
            }
        }
        out
    }

    fn invalid(&self, detail: String) -> DecodeError {
        DecodeError::InvalidSchema {
            path: self.path(),
            detail,
        }
    }

    fn missing(&self) -> DecodeError {
        DecodeError::MissingField { path: self.path() }
    }

    fn table(&mut self, position: usize, name: &str) -> Result<RecordNode, DecodeError> {
        let schema = self.schema;
        let def = schema
            .table(name)
            .ok_or_else(|| self.invalid(format!("table {name} is not defined")))?;
        if self.depth >= self.options.max_depth {
            return Err(DecodeError::DepthLimitExceeded {
                path: self.path(),
                limit: self.options.max_depth,
            });
        }
        self.depth += 1;
        let table = self.view.table(position)?;
        let mut fields = Vec::with_capacity(def.fields.len());
        for field in def.fields.iter().filter(|field| !field.deprecated) {
            self.path.push(Segment::Field(&field.name));
            let result = self.field(&table, field, &mut fields);
            self.path.pop();
            result?;
        }
        self.depth -= 1;
        Ok(RecordNode::Struct(fields))
    }

    fn field(
        &mut self,
        table: &TableRef<'buf>,
        field: &'s FieldDef,
        out: &mut Vec<(String, RecordNode)>,
    ) -> Result<(), DecodeError> {
        if let FieldKind::Union(union) = &field.kind {
            let (tag, value) = self.union(table, field, union)?;
            out.push((format!("{}{UNION_TYPE_SUFFIX}", field.name), tag));
            out.push((field.name.clone(), value));
            return Ok(());
        }
        let node = match table.field_position(field.slot_offset())? {
            Some(position) => self.value(position, &field.kind)?,
            None if field.required => return Err(self.missing()),
            None => match (&field.kind, field.default) {
                (FieldKind::Scalar(ty), Some(default)) => {
                    RecordNode::Scalar(ScalarValue::from_default(*ty, default))
                }
                (FieldKind::Scalar(ty), None) => RecordNode::Scalar(ScalarValue::zero(*ty)),
                _ => RecordNode::Null,
            },
        };
        out.push((field.name.clone(), node));
        Ok(())
    }

    fn value(&mut self, position: usize, kind: &'s FieldKind) -> Result<RecordNode, DecodeError> {
        match kind {
            FieldKind::Scalar(ty) => Ok(RecordNode::Scalar(self.view.read_scalar(position, *ty)?)),
            FieldKind::String => Ok(RecordNode::Text(self.view.string(position)?.into_owned())),
            FieldKind::Table(name) => {
                let target = self.view.follow(position)?;
                self.child_table(target, name)
            }
            FieldKind::Struct(name) => self.inline_struct(position, name),
            FieldKind::Vector(element) => self.vector(position, element),
            FieldKind::Union(name) => Err(self.invalid(format!("union {name} outside a table"))),
        }
    }

    fn child_table(&mut self, target: usize, name: &str) -> Result<RecordNode, DecodeError> {
        if !self.visited.insert(target) {
            debug!(
                target: "snapshot_export::decoder",
                offset = target,
                path = %self.path(),
                "decode.cycle_cut"
            );
            return Ok(RecordNode::CycleCut(target));
        }
        self.table(target, name)
    }

    fn inline_struct(&self, position: usize, name: &str) -> Result<RecordNode, DecodeError> {
        let schema = self.schema;
        let def = schema
            .struct_def(name)
            .ok_or_else(|| self.invalid(format!("struct {name} is not defined")))?;
        self.view.bytes_at(position, def.size)?;
        let mut fields = Vec::with_capacity(def.fields.len());
        for member in &def.fields {
            let at = position + member.offset;
            let node = match &member.kind {
                StructMember::Scalar(ty) => RecordNode::Scalar(self.view.read_scalar(at, *ty)?),
                StructMember::Struct(nested) => self.inline_struct(at, nested)?,
            };
            fields.push((member.name.clone(), node));
        }
        Ok(RecordNode::Struct(fields))
    }

    fn vector(&mut self, position: usize, element: &'s ElementKind) -> Result<RecordNode, DecodeError> {
        let width = match element {
            ElementKind::Scalar(ty) => ty.width(),
            ElementKind::String | ElementKind::Table(_) => SIZE_UOFFSET,
            ElementKind::Struct(name) => self
                .schema
                .struct_def(name)
                .map(|def| def.size)
                .ok_or_else(|| self.invalid(format!("struct {name} is not defined")))?,
        };
        let vector = self.view.vector(position, width)?;
        let mut items = Vec::with_capacity(vector.len());
        for index in 0..vector.len() {
            let at = vector.element(index);
            self.path.push(Segment::Index(index));
            let item = match element {
                ElementKind::Scalar(ty) => self.view.read_scalar(at, *ty).map(RecordNode::Scalar),
                ElementKind::String => self
                    .view
                    .string(at)
                    .map(|text| RecordNode::Text(text.into_owned())),
                ElementKind::Table(name) => self
                    .view
                    .follow(at)
                    .and_then(|target| self.child_table(target, name)),
                ElementKind::Struct(name) => self.inline_struct(at, name),
            };
            self.path.pop();
            items.push(item?);
        }
        Ok(RecordNode::List(items))
    }

    /// Returns the `<name>_type` sibling and the union value.
    fn union(
        &mut self,
        table: &TableRef<'buf>,
        field: &'s FieldDef,
        union: &str,
    ) -> Result<(RecordNode, RecordNode), DecodeError> {
        let tag_slot = field
            .union_tag_slot_offset()
            .ok_or_else(|| self.invalid(format!("union field {} has no discriminant", field.name)))?;
        let tag = match table.field_position(tag_slot)? {
            Some(position) => self.view.read_u8(position)?,
            None => 0,
        };
        if tag == 0 && field.required {
            return Err(self.missing());
        }
        if tag == 0 {
            return Ok((RecordNode::Null, RecordNode::Null));
        }
        let value = table.field_position(field.slot_offset())?;
        let schema = self.schema;
        match schema.union_variant(union, tag) {
            Some(variant) => {
                let record = match value {
                    Some(position) => {
                        let target = self.view.follow(position)?;
                        self.child_table(target, &variant.table)?
                    }
                    None if field.required => return Err(self.missing()),
                    None => RecordNode::Null,
                };
                Ok((RecordNode::Text(variant.table.clone()), record))
            }
            None if self.options.unknown_union_tags == UnionTagPolicy::Skip => {
                warn!(
                    target: "snapshot_export::decoder",
                    path = %self.path(),
                    union,
                    tag,
                    "decode.unknown_union_tag_skipped"
                );
                Ok((RecordNode::Scalar(ScalarValue::UInt(tag.into())), RecordNode::Null))
            }
            None => Err(DecodeError::UnknownUnionTag {
                path: self.path(),
                union: union.to_string(),
                tag,
            }),
        }
    }
}

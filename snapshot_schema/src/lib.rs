//! Declarative descriptions of the FlatBuffers tables found in game-state
//! snapshots.
//!
//! A schema file is a JSON rendering of the server's `.fbs` definitions: the
//! tables with their field ids, inline structs, unions and the 4-byte file
//! identifier stamped into every buffer. The decoder never sees generated
//! accessors, only the [`SchemaProvider`] surface defined here.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod registry;

pub use registry::SchemaRegistry;

/// Length of the file identifier embedded at bytes 4..8 of a buffer.
pub const IDENTIFIER_LEN: usize = 4;

/// Suffix of the sibling discriminant field generated for every union field.
pub const UNION_TYPE_SUFFIX: &str = "_type";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalarType {
    Bool,
    #[serde(alias = "byte")]
    Int8,
    #[serde(alias = "ubyte")]
    Uint8,
    #[serde(alias = "short")]
    Int16,
    #[serde(alias = "ushort")]
    Uint16,
    #[serde(alias = "int")]
    Int32,
    #[serde(alias = "uint")]
    Uint32,
    #[serde(alias = "long")]
    Int64,
    #[serde(alias = "ulong")]
    Uint64,
    #[serde(alias = "float")]
    Float32,
    #[serde(alias = "double")]
    Float64,
}

impl ScalarType {
    /// Width in bytes of the little-endian encoding.
    pub fn width(self) -> usize {
        match self {
            ScalarType::Bool | ScalarType::Int8 | ScalarType::Uint8 => 1,
            ScalarType::Int16 | ScalarType::Uint16 => 2,
            ScalarType::Int32 | ScalarType::Uint32 | ScalarType::Float32 => 4,
            ScalarType::Int64 | ScalarType::Uint64 | ScalarType::Float64 => 8,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, ScalarType::Float32 | ScalarType::Float64)
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            ScalarType::Int8 | ScalarType::Int16 | ScalarType::Int32 | ScalarType::Int64
        )
    }
}

/// Element type of a vector field. FlatBuffers has no nested vectors and no
/// vectors of unions in the snapshot schemas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    Scalar(ScalarType),
    String,
    Table(String),
    Struct(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Scalar(ScalarType),
    String,
    Table(String),
    Struct(String),
    Vector(ElementKind),
    Union(String),
}

/// Declared default of a scalar field, as written in the schema file.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DefaultValue {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    /// Field id; for unions this is the id of the value slot, the
    /// discriminant lives in slot `id - 1`.
    pub id: u16,
    #[serde(rename = "type")]
    pub kind: FieldKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<DefaultValue>,
    #[serde(default)]
    pub deprecated: bool,
}

impl FieldDef {
    /// Byte offset of this field's entry inside a vtable.
    pub fn slot_offset(&self) -> usize {
        slot_offset_for(self.id)
    }

    /// Vtable byte offset of the union discriminant, if this is a union field.
    pub fn union_tag_slot_offset(&self) -> Option<usize> {
        match self.kind {
            FieldKind::Union(_) => self.id.checked_sub(1).map(slot_offset_for),
            _ => None,
        }
    }
}

fn slot_offset_for(id: u16) -> usize {
    4 + 2 * id as usize
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDef {
    pub name: String,
    pub fields: Vec<FieldDef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructMember {
    Scalar(ScalarType),
    Struct(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructFieldDef {
    pub name: String,
    pub offset: usize,
    #[serde(rename = "type")]
    pub kind: StructMember,
}

/// Fixed-layout struct stored inline in its parent table or vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructDef {
    pub name: String,
    pub size: usize,
    pub fields: Vec<StructFieldDef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnionVariant {
    pub tag: u8,
    pub table: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnionDef {
    pub name: String,
    pub variants: Vec<UnionVariant>,
}

/// What the decoder needs to know about a schema, and nothing more.
pub trait SchemaProvider {
    fn schema_name(&self) -> &str;
    fn version(&self) -> u32;
    /// Identifier the buffer must carry at bytes 4..8, if the schema declares one.
    fn file_identifier(&self) -> Option<&str>;
    fn root_table(&self) -> &str;
    fn table(&self, name: &str) -> Option<&TableDef>;
    fn struct_def(&self, name: &str) -> Option<&StructDef>;
    fn union_def(&self, name: &str) -> Option<&UnionDef>;

    fn union_variant(&self, union: &str, tag: u8) -> Option<&UnionVariant> {
        self.union_def(union)?
            .variants
            .iter()
            .find(|variant| variant.tag == tag)
    }
}

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("failed to parse schema: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read schema from {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid schema pattern {pattern}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },
    #[error("schema {schema}: {reason}")]
    Invalid { schema: String, reason: String },
    #[error("duplicate schema name {0}")]
    Duplicate(String),
}

#[derive(Debug, Clone, Deserialize)]
struct SchemaFile {
    name: String,
    version: u32,
    #[serde(default)]
    file_identifier: Option<String>,
    root_table: String,
    tables: Vec<TableDef>,
    #[serde(default)]
    structs: Vec<StructDef>,
    #[serde(default)]
    unions: Vec<UnionDef>,
}

/// A validated, indexed schema version.
#[derive(Debug, Clone)]
pub struct SchemaDescriptor {
    name: String,
    version: u32,
    file_identifier: Option<String>,
    root_table: String,
    tables: Vec<TableDef>,
    structs: Vec<StructDef>,
    unions: Vec<UnionDef>,
    tables_by_name: HashMap<String, usize>,
    structs_by_name: HashMap<String, usize>,
    unions_by_name: HashMap<String, usize>,
}

impl SchemaDescriptor {
    pub fn new(
        name: impl Into<String>,
        version: u32,
        file_identifier: Option<String>,
        root_table: impl Into<String>,
        tables: Vec<TableDef>,
        structs: Vec<StructDef>,
        unions: Vec<UnionDef>,
    ) -> Result<Self, SchemaError> {
        let tables_by_name = index_by_name(tables.iter().map(|t| t.name.as_str()));
        let structs_by_name = index_by_name(structs.iter().map(|s| s.name.as_str()));
        let unions_by_name = index_by_name(unions.iter().map(|u| u.name.as_str()));
        let schema = Self {
            name: name.into(),
            version,
            file_identifier,
            root_table: root_table.into(),
            tables,
            structs,
            unions,
            tables_by_name,
            structs_by_name,
            unions_by_name,
        };
        schema.validate()?;
        Ok(schema)
    }

    pub fn from_json_str(json: &str) -> Result<Self, SchemaError> {
        let file: SchemaFile = serde_json::from_str(json)?;
        Self::new(
            file.name,
            file.version,
            file.file_identifier,
            file.root_table,
            file.tables,
            file.structs,
            file.unions,
        )
    }

    pub fn from_file(path: &Path) -> Result<Self, SchemaError> {
        let contents = fs::read_to_string(path).map_err(|source| SchemaError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&contents)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tables(&self) -> &[TableDef] {
        &self.tables
    }

    pub fn structs(&self) -> &[StructDef] {
        &self.structs
    }

    pub fn unions(&self) -> &[UnionDef] {
        &self.unions
    }

    fn invalid(&self, reason: String) -> SchemaError {
        SchemaError::Invalid {
            schema: self.name.clone(),
            reason,
        }
    }

    fn validate(&self) -> Result<(), SchemaError> {
        if let Some(identifier) = &self.file_identifier {
            if identifier.len() != IDENTIFIER_LEN || !identifier.is_ascii() {
                return Err(self.invalid(format!(
                    "file identifier {identifier:?} must be {IDENTIFIER_LEN} ASCII bytes"
                )));
            }
        }
        if self.tables_by_name.len() != self.tables.len() {
            return Err(self.invalid("table names must be unique".to_string()));
        }
        if self.structs_by_name.len() != self.structs.len() {
            return Err(self.invalid("struct names must be unique".to_string()));
        }
        if self.unions_by_name.len() != self.unions.len() {
            return Err(self.invalid("union names must be unique".to_string()));
        }
        if !self.tables_by_name.contains_key(&self.root_table) {
            return Err(self.invalid(format!("root table {} is not defined", self.root_table)));
        }
        for table in &self.tables {
            self.validate_table(table)?;
        }
        for def in &self.structs {
            self.validate_struct(def, &mut Vec::new())?;
        }
        for union in &self.unions {
            let mut tags = HashSet::new();
            for variant in &union.variants {
                if variant.tag == 0 {
                    return Err(self.invalid(format!(
                        "union {} uses reserved tag 0 (NONE)",
                        union.name
                    )));
                }
                if !tags.insert(variant.tag) {
                    return Err(self.invalid(format!(
                        "union {} repeats tag {}",
                        union.name, variant.tag
                    )));
                }
                self.require_table(&variant.table)?;
            }
        }
        Ok(())
    }

    fn validate_table(&self, table: &TableDef) -> Result<(), SchemaError> {
        let mut ids = HashSet::new();
        let mut names = HashSet::new();
        for field in &table.fields {
            let context = format!("{}.{}", table.name, field.name);
            if !names.insert(field.name.as_str()) {
                return Err(self.invalid(format!("field {context} is declared twice")));
            }
            if !ids.insert(field.id) {
                return Err(self.invalid(format!("field {context} reuses id {}", field.id)));
            }
            if field.default.is_some() && !matches!(field.kind, FieldKind::Scalar(_)) {
                return Err(self.invalid(format!("field {context} has a default but is not a scalar")));
            }
            match &field.kind {
                FieldKind::Scalar(ty) => {
                    if let Some(default) = field.default {
                        check_default(*ty, default).map_err(|reason| {
                            self.invalid(format!("field {context}: {reason}"))
                        })?;
                    }
                }
                FieldKind::String => {}
                FieldKind::Table(name) => self.require_table(name)?,
                FieldKind::Struct(name) => self.require_struct(name)?,
                FieldKind::Vector(element) => match element {
                    ElementKind::Table(name) => self.require_table(name)?,
                    ElementKind::Struct(name) => self.require_struct(name)?,
                    ElementKind::Scalar(_) | ElementKind::String => {}
                },
                FieldKind::Union(name) => {
                    if !self.unions_by_name.contains_key(name) {
                        return Err(self.invalid(format!("union {name} is not defined")));
                    }
                    if field.id == 0 {
                        return Err(self.invalid(format!(
                            "union field {context} needs id >= 1, its discriminant takes id - 1"
                        )));
                    }
                    if !ids.insert(field.id - 1) {
                        return Err(self.invalid(format!(
                            "union field {context} discriminant id {} is taken",
                            field.id - 1
                        )));
                    }
                }
            }
        }
        for field in &table.fields {
            if let FieldKind::Union(_) = field.kind {
                let sibling = format!("{}{UNION_TYPE_SUFFIX}", field.name);
                if names.contains(sibling.as_str()) {
                    return Err(self.invalid(format!(
                        "field {}.{sibling} collides with the union discriminant",
                        table.name
                    )));
                }
            }
        }
        Ok(())
    }

    fn validate_struct<'a>(
        &'a self,
        def: &'a StructDef,
        chain: &mut Vec<&'a str>,
    ) -> Result<(), SchemaError> {
        if chain.contains(&def.name.as_str()) {
            return Err(self.invalid(format!("struct {} contains itself", def.name)));
        }
        chain.push(&def.name);
        for field in &def.fields {
            let width = match &field.kind {
                StructMember::Scalar(ty) => ty.width(),
                StructMember::Struct(name) => {
                    let nested = self
                        .struct_def(name)
                        .ok_or_else(|| self.invalid(format!("struct {name} is not defined")))?;
                    self.validate_struct(nested, chain)?;
                    nested.size
                }
            };
            let end = field.offset.checked_add(width).unwrap_or(usize::MAX);
            if end > def.size {
                return Err(self.invalid(format!(
                    "struct field {}.{} ends at byte {end}, past size {}",
                    def.name, field.name, def.size
                )));
            }
        }
        chain.pop();
        Ok(())
    }

    fn require_table(&self, name: &str) -> Result<(), SchemaError> {
        if self.tables_by_name.contains_key(name) {
            Ok(())
        } else {
            Err(self.invalid(format!("table {name} is not defined")))
        }
    }

    fn require_struct(&self, name: &str) -> Result<(), SchemaError> {
        if self.structs_by_name.contains_key(name) {
            Ok(())
        } else {
            Err(self.invalid(format!("struct {name} is not defined")))
        }
    }
}

impl SchemaProvider for SchemaDescriptor {
    fn schema_name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn file_identifier(&self) -> Option<&str> {
        self.file_identifier.as_deref()
    }

    fn root_table(&self) -> &str {
        &self.root_table
    }

    fn table(&self, name: &str) -> Option<&TableDef> {
        self.tables_by_name.get(name).map(|&index| &self.tables[index])
    }

    fn struct_def(&self, name: &str) -> Option<&StructDef> {
        self.structs_by_name.get(name).map(|&index| &self.structs[index])
    }

    fn union_def(&self, name: &str) -> Option<&UnionDef> {
        self.unions_by_name.get(name).map(|&index| &self.unions[index])
    }
}

fn index_by_name<'a>(names: impl Iterator<Item = &'a str>) -> HashMap<String, usize> {
    let mut index = HashMap::new();
    for (position, name) in names.enumerate() {
        index.entry(name.to_string()).or_insert(position);
    }
    index
}

fn check_default(ty: ScalarType, default: DefaultValue) -> Result<(), String> {
    let fits = match (ty, default) {
        (ScalarType::Bool, DefaultValue::Bool(_)) => true,
        (ScalarType::Bool, DefaultValue::Int(v)) => v == 0 || v == 1,
        (ScalarType::Bool, _) => false,
        (_, DefaultValue::Bool(_)) => false,
        (ty, DefaultValue::Float(_)) => ty.is_float(),
        (ty, _) if ty.is_float() => true,
        (ty, DefaultValue::Int(v)) => integer_range(ty).contains(&(v as i128)),
        (ty, DefaultValue::UInt(v)) => integer_range(ty).contains(&(v as i128)),
    };
    if fits {
        Ok(())
    } else {
        Err(format!("default {default:?} does not fit {ty:?}"))
    }
}

fn integer_range(ty: ScalarType) -> std::ops::RangeInclusive<i128> {
    match ty {
        ScalarType::Int8 => i8::MIN as i128..=i8::MAX as i128,
        ScalarType::Uint8 => 0..=u8::MAX as i128,
        ScalarType::Int16 => i16::MIN as i128..=i16::MAX as i128,
        ScalarType::Uint16 => 0..=u16::MAX as i128,
        ScalarType::Int32 => i32::MIN as i128..=i32::MAX as i128,
        ScalarType::Uint32 => 0..=u32::MAX as i128,
        ScalarType::Int64 => i64::MIN as i128..=i64::MAX as i128,
        ScalarType::Uint64 => 0..=u64::MAX as i128,
        ScalarType::Bool | ScalarType::Float32 | ScalarType::Float64 => 0..=0,
    }
}

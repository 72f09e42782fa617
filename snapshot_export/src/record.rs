//! Schema-independent record tree produced by the decoder.

use std::fmt;

use snapshot_schema::{DefaultValue, ScalarType};

/// A decoded scalar, keeping the numeric family the schema declared so that
/// integers are never widened to floating point on the way out.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScalarValue {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float32(f32),
    Float64(f64),
}

impl ScalarValue {
    /// Value of an absent field with no declared default.
    pub fn zero(ty: ScalarType) -> Self {
        match ty {
            ScalarType::Bool => ScalarValue::Bool(false),
            ScalarType::Float32 => ScalarValue::Float32(0.0),
            ScalarType::Float64 => ScalarValue::Float64(0.0),
            ty if ty.is_signed() => ScalarValue::Int(0),
            _ => ScalarValue::UInt(0),
        }
    }

    /// Converts a schema default into the field's declared type.
    pub fn from_default(ty: ScalarType, default: DefaultValue) -> Self {
        match (ty, default) {
            (ScalarType::Bool, DefaultValue::Bool(b)) => ScalarValue::Bool(b),
            (ScalarType::Bool, DefaultValue::Int(v)) => ScalarValue::Bool(v != 0),
            (ScalarType::Bool, DefaultValue::UInt(v)) => ScalarValue::Bool(v != 0),
            (ScalarType::Bool, DefaultValue::Float(v)) => ScalarValue::Bool(v != 0.0),
            (ScalarType::Float32, default) => ScalarValue::Float32(default_as_f64(default) as f32),
            (ScalarType::Float64, default) => ScalarValue::Float64(default_as_f64(default)),
            (ty, default) if ty.is_signed() => ScalarValue::Int(match default {
                DefaultValue::Bool(b) => b as i64,
                DefaultValue::Int(v) => v,
                DefaultValue::UInt(v) => v as i64,
                DefaultValue::Float(v) => v as i64,
            }),
            (_, default) => ScalarValue::UInt(match default {
                DefaultValue::Bool(b) => b as u64,
                DefaultValue::Int(v) => v as u64,
                DefaultValue::UInt(v) => v,
                DefaultValue::Float(v) => v as u64,
            }),
        }
    }
}

fn default_as_f64(default: DefaultValue) -> f64 {
    match default {
        DefaultValue::Bool(b) => f64::from(u8::from(b)),
        DefaultValue::Int(v) => v as f64,
        DefaultValue::UInt(v) => v as f64,
        DefaultValue::Float(v) => v,
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Bool(v) => write!(f, "{v}"),
            ScalarValue::Int(v) => write!(f, "{v}"),
            ScalarValue::UInt(v) => write!(f, "{v}"),
            ScalarValue::Float32(v) => write!(f, "{v}"),
            ScalarValue::Float64(v) => write!(f, "{v}"),
        }
    }
}

/// One node of a decoded snapshot.
///
/// The tree is acyclic by construction: a table offset reached a second time
/// during one traversal becomes a [`RecordNode::CycleCut`] leaf.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordNode {
    Null,
    /// Null-valued terminal standing in for an already visited table.
    CycleCut(usize),
    Scalar(ScalarValue),
    Text(String),
    List(Vec<RecordNode>),
    /// Fields in schema declaration order.
    Struct(Vec<(String, RecordNode)>),
}

impl RecordNode {
    pub fn is_null(&self) -> bool {
        matches!(self, RecordNode::Null | RecordNode::CycleCut(_))
    }

    /// Leaves are everything that renders into a single cell.
    pub fn is_leaf(&self) -> bool {
        !matches!(self, RecordNode::List(_) | RecordNode::Struct(_))
    }

    /// Field lookup on a struct node.
    pub fn get(&self, name: &str) -> Option<&RecordNode> {
        match self {
            RecordNode::Struct(fields) => fields
                .iter()
                .find(|(field, _)| field == name)
                .map(|(_, value)| value),
            _ => None,
        }
    }

    /// Number of cycle cuts anywhere below (and including) this node.
    pub fn cycle_cuts(&self) -> usize {
        match self {
            RecordNode::CycleCut(_) => 1,
            RecordNode::List(items) => items.iter().map(RecordNode::cycle_cuts).sum(),
            RecordNode::Struct(fields) => fields.iter().map(|(_, node)| node.cycle_cuts()).sum(),
            _ => 0,
        }
    }
}

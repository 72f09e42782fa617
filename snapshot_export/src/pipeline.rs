//! One snapshot in, one rendered export out.
//!
//! The pipeline picks a schema, decodes, flattens and serializes into memory;
//! the sink only sees bytes once every stage has succeeded.

use std::collections::HashSet;
use std::io::Write;
use std::sync::Arc;

use rayon::prelude::*;
use serde_json::{Map, Value};
use snapshot_schema::{SchemaDescriptor, SchemaProvider, SchemaRegistry};
use tracing::{debug, info, warn};

use crate::buffer::BufferView;
use crate::decoder::{DecodeOptions, Decoder};
use crate::error::ExportError;
use crate::flatten::{
    flatten_rows, schema_columns, to_document, FanoutPolicy, FlatValue, FlattenOptions,
};
use crate::record::RecordNode;
use crate::writer::{write_csv, write_json, CsvHeader, CsvOptions, HeaderStrategy, JsonStyle};

/// Leading column/key holding the root table name. Left out when the root
/// table has a field of the same name.
pub const TYPE_FIELD: &str = "_type";

#[derive(Debug, Clone, PartialEq)]
pub struct ExportOptions {
    pub decode: DecodeOptions,
    pub flatten: FlattenOptions,
    pub csv: CsvOptions,
    pub header: HeaderStrategy,
    pub json_style: JsonStyle,
    pub type_field: bool,
    /// Buffers carry a u32 length prefix before the root offset.
    pub size_prefixed: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            decode: DecodeOptions::default(),
            flatten: FlattenOptions::default(),
            csv: CsvOptions::default(),
            header: HeaderStrategy::Observed,
            json_style: JsonStyle::Pretty,
            type_field: true,
            size_prefixed: false,
        }
    }
}

/// Output format. CSV always names its fan-out policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportTarget {
    Csv { fanout: FanoutPolicy },
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub schema: String,
    pub version: u32,
    pub root_table: String,
    /// Data rows written; `None` for JSON.
    pub rows: Option<usize>,
    pub bytes: usize,
    pub cycle_cuts: usize,
}

struct Decoded {
    schema: Arc<SchemaDescriptor>,
    record: RecordNode,
    root_table: String,
    type_field: bool,
}

#[derive(Debug, Clone)]
pub struct Rendered {
    pub bytes: Vec<u8>,
    pub summary: ExportSummary,
}

pub struct Pipeline {
    registry: Arc<SchemaRegistry>,
    options: ExportOptions,
}

impl Pipeline {
    pub fn new(registry: Arc<SchemaRegistry>, options: ExportOptions) -> Self {
        Self { registry, options }
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn options(&self) -> &ExportOptions {
        &self.options
    }

    fn view<'buf>(&self, bytes: &'buf [u8]) -> Result<BufferView<'buf>, ExportError> {
        let view = if self.options.size_prefixed {
            BufferView::size_prefixed(bytes)?
        } else {
            BufferView::new(bytes)?
        };
        Ok(view)
    }

    /// Schema for a buffer: the one named by `root` (schema or root table
    /// name), else the one whose identifier the buffer carries, else the only
    /// registered schema. Without `root`, a buffer too short to carry an
    /// identifier is `Truncated`.
    pub fn select_schema(
        &self,
        view: &BufferView<'_>,
        root: Option<&str>,
    ) -> Result<Arc<SchemaDescriptor>, ExportError> {
        if let Some(name) = root {
            return self
                .registry
                .get(name)
                .ok_or_else(|| ExportError::UnknownRoot(name.to_string()));
        }
        let identifier = view.file_identifier()?;
        if let Some(schema) = self.registry.find_by_identifier(identifier) {
            debug!(
                target: "snapshot_export::pipeline",
                schema = schema.name(),
                version = schema.version(),
                "schema.matched"
            );
            return Ok(schema);
        }
        if let Some(schema) = self.registry.single() {
            debug!(
                target: "snapshot_export::pipeline",
                schema = schema.name(),
                "schema.single_fallback"
            );
            return Ok(schema);
        }
        Err(ExportError::NoMatchingSchema {
            identifier: String::from_utf8_lossy(identifier).into_owned(),
            known: self.registry.format_schema_list(),
        })
    }

    fn decode(&self, bytes: &[u8], root: Option<&str>) -> Result<Decoded, ExportError> {
        let view = self.view(bytes)?;
        let schema = self.select_schema(&view, root)?;
        let record = Decoder::with_options(schema.as_ref(), self.options.decode).decode(&view)?;
        let root_table = schema.root_table().to_string();
        let type_field = self.options.type_field && record.get(TYPE_FIELD).is_none();
        if self.options.type_field && !type_field {
            warn!(
                target: "snapshot_export::pipeline",
                schema = schema.name(),
                root_table = %root_table,
                "export.type_field_taken"
            );
        }
        Ok(Decoded {
            schema,
            record,
            root_table,
            type_field,
        })
    }

    /// The JSON document of one buffer, `_type` key included when enabled.
    pub fn document(&self, bytes: &[u8], root: Option<&str>) -> Result<Value, ExportError> {
        let decoded = self.decode(bytes, root)?;
        let document = to_document(decoded.record);
        if decoded.type_field {
            return Ok(with_type_key(document, &decoded.root_table));
        }
        Ok(document)
    }

    /// Decode, flatten and serialize one buffer entirely in memory.
    pub fn render(
        &self,
        bytes: &[u8],
        root: Option<&str>,
        target: &ExportTarget,
    ) -> Result<Rendered, ExportError> {
        let Decoded {
            schema,
            record,
            root_table,
            type_field,
        } = self.decode(bytes, root)?;
        let cycle_cuts = record.cycle_cuts();

        let mut out = Vec::new();
        let rows = match target {
            ExportTarget::Json => {
                let mut document = to_document(record);
                if type_field {
                    document = with_type_key(document, &root_table);
                }
                write_json(&document, self.options.json_style, &mut out)?;
                None
            }
            ExportTarget::Csv { fanout } => {
                let mut rows = flatten_rows(&record, fanout, &self.options.flatten)?;
                if type_field {
                    for row in &mut rows {
                        row.push_front(TYPE_FIELD, FlatValue::Text(root_table.clone()));
                    }
                }
                let header = match self.options.header {
                    HeaderStrategy::Observed => CsvHeader::Observed,
                    HeaderStrategy::Schema => {
                        let mut columns = Vec::new();
                        if type_field {
                            columns.push(TYPE_FIELD.to_string());
                        }
                        columns.extend(schema_columns(schema.as_ref(), &root_table));
                        // Recursive tables can carry values below the
                        // schema-derived columns.
                        let mut known: HashSet<String> = columns.iter().cloned().collect();
                        for (path, value) in rows.iter().flat_map(|row| row.iter()) {
                            if !value.is_null() && known.insert(path.to_string()) {
                                columns.push(path.to_string());
                            }
                        }
                        CsvHeader::Fixed(columns)
                    }
                };
                write_csv(&rows, &header, &self.options.csv, &mut out)?;
                Some(rows.len())
            }
        };

        let summary = ExportSummary {
            schema: schema.name().to_string(),
            version: schema.version(),
            root_table,
            rows,
            bytes: out.len(),
            cycle_cuts,
        };
        info!(
            target: "snapshot_export::pipeline",
            schema = %summary.schema,
            version = summary.version,
            rows = ?summary.rows,
            bytes = summary.bytes,
            cycle_cuts = summary.cycle_cuts,
            "export.rendered"
        );
        Ok(Rendered {
            bytes: out,
            summary,
        })
    }

    /// Render and then write to `sink`. A failed render writes nothing.
    pub fn export<W: Write>(
        &self,
        bytes: &[u8],
        root: Option<&str>,
        target: &ExportTarget,
        mut sink: W,
    ) -> Result<ExportSummary, ExportError> {
        let rendered = self.render(bytes, root, target)?;
        sink.write_all(&rendered.bytes)?;
        sink.flush()?;
        info!(
            target: "snapshot_export::pipeline",
            bytes = rendered.summary.bytes,
            "export.written"
        );
        Ok(rendered.summary)
    }

    /// Independent renders of many buffers in parallel; results keep input
    /// order and one failure does not affect the others.
    pub fn export_batch<B>(
        &self,
        inputs: &[B],
        root: Option<&str>,
        target: &ExportTarget,
    ) -> Vec<Result<Rendered, ExportError>>
    where
        B: AsRef<[u8]> + Sync,
    {
        inputs
            .par_iter()
            .map(|input| self.render(input.as_ref(), root, target))
            .collect()
    }

    /// Batch export where each task loads its own input and stores its own
    /// output, so only buffers in flight are held in memory. `store` gets the
    /// input's index. Results keep input order.
    pub fn export_batch_with<T, E, L, S>(
        &self,
        inputs: &[T],
        root: Option<&str>,
        target: &ExportTarget,
        load: L,
        store: S,
    ) -> Vec<Result<ExportSummary, E>>
    where
        T: Sync,
        E: From<ExportError> + Send,
        L: Fn(&T) -> Result<Vec<u8>, E> + Sync,
        S: Fn(usize, &Rendered) -> Result<(), E> + Sync,
    {
        inputs
            .par_iter()
            .enumerate()
            .map(|(index, input)| {
                let bytes = load(input)?;
                let rendered = self.render(&bytes, root, target)?;
                store(index, &rendered)?;
                Ok(rendered.summary)
            })
            .collect()
    }
}

fn with_type_key(document: Value, root_table: &str) -> Value {
    match document {
        Value::Object(fields) => {
            let mut keyed = Map::with_capacity(fields.len() + 1);
            keyed.insert(TYPE_FIELD.to_string(), Value::String(root_table.to_string()));
            keyed.extend(fields);
            Value::Object(keyed)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DecodeError, ErrorKind};
    use flatbuffers::FlatBufferBuilder;

    fn schema(name: &str, root: &str, identifier: &str) -> SchemaDescriptor {
        SchemaDescriptor::from_json_str(&format!(
            r#"{{
                "name": "{name}",
                "version": 1,
                "file_identifier": "{identifier}",
                "root_table": "{root}",
                "tables": [{{"name": "{root}", "fields": [
                    {{"name": "id", "id": 0, "type": {{"scalar": "uint32"}}}},
                    {{"name": "tags", "id": 1, "type": {{"vector": "string"}}}}
                ]}}]
            }}"#
        ))
        .expect("schema")
    }

    fn registry(schemas: Vec<SchemaDescriptor>) -> Arc<SchemaRegistry> {
        let mut registry = SchemaRegistry::new();
        for schema in schemas {
            registry.insert(schema).expect("insert");
        }
        Arc::new(registry)
    }

    fn buffer(id: u32, tags: &[&str], identifier: &str) -> Vec<u8> {
        let mut fbb = FlatBufferBuilder::new();
        let tags: Vec<_> = tags.iter().map(|tag| fbb.create_string(tag)).collect();
        let tags = fbb.create_vector(&tags);
        let start = fbb.start_table();
        fbb.push_slot::<u32>(4, id, 0);
        fbb.push_slot_always(6, tags);
        let root = fbb.end_table(start);
        fbb.finish(root, Some(identifier));
        fbb.finished_data().to_vec()
    }

    fn cartesian() -> ExportTarget {
        ExportTarget::Csv {
            fanout: FanoutPolicy::Cartesian,
        }
    }

    #[test]
    fn selects_schema_by_identifier_and_types_rows() {
        let pipeline = Pipeline::new(
            registry(vec![
                schema("army", "Army", "FBAR"),
                schema("fleet", "Fleet", "FBFL"),
            ]),
            ExportOptions::default(),
        );
        let rendered = pipeline
            .render(&buffer(5, &["a", "b"], "FBFL"), None, &cartesian())
            .expect("render");
        assert_eq!(rendered.summary.schema, "fleet");
        assert_eq!(rendered.summary.rows, Some(2));
        assert_eq!(
            String::from_utf8(rendered.bytes).expect("utf-8"),
            "_type,id,tags\r\nFleet,5,a\r\nFleet,5,b\r\n"
        );
    }

    #[test]
    fn document_matches_json_render() {
        let pipeline = Pipeline::new(
            registry(vec![schema("fleet", "Fleet", "FBFL")]),
            ExportOptions {
                json_style: JsonStyle::Compact,
                ..ExportOptions::default()
            },
        );
        let bytes = buffer(7, &["x"], "FBFL");
        let document = pipeline.document(&bytes, None).expect("document");
        assert_eq!(
            document,
            serde_json::json!({"_type": "Fleet", "id": 7, "tags": ["x"]})
        );
        let rendered = pipeline
            .render(&bytes, None, &ExportTarget::Json)
            .expect("render");
        assert_eq!(
            String::from_utf8(rendered.bytes).expect("utf-8"),
            format!("{document}\n")
        );
        assert_eq!(
            pipeline.document(&bytes[..6], None).map_err(|err| err.kind()),
            Err(ErrorKind::OutOfBounds)
        );
    }

    #[test]
    fn unmatched_identifier_lists_known_schemas() {
        let pipeline = Pipeline::new(
            registry(vec![
                schema("army", "Army", "FBAR"),
                schema("fleet", "Fleet", "FBFL"),
            ]),
            ExportOptions::default(),
        );
        let err = pipeline
            .render(&buffer(5, &[], "ZZZZ"), None, &ExportTarget::Json)
            .expect_err("no schema carries ZZZZ");
        assert_eq!(err.kind(), ErrorKind::SchemaMismatch);
        let message = err.to_string();
        assert!(message.contains("ZZZZ"), "{message}");
        assert!(message.contains("Fleet"), "{message}");

        let err = pipeline
            .render(&buffer(5, &[], "FBAR"), Some("Fleet"), &ExportTarget::Json)
            .expect_err("root override keeps the identifier check");
        assert!(matches!(
            err,
            ExportError::Decode(DecodeError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn single_schema_is_used_and_json_gets_type_key_first() {
        let pipeline = Pipeline::new(
            registry(vec![schema("army", "Army", "FBAR")]),
            ExportOptions {
                json_style: JsonStyle::Compact,
                ..ExportOptions::default()
            },
        );
        let rendered = pipeline
            .render(&buffer(9, &["x"], "FBAR"), None, &ExportTarget::Json)
            .expect("render");
        assert_eq!(
            String::from_utf8(rendered.bytes).expect("utf-8"),
            "{\"_type\":\"Army\",\"id\":9,\"tags\":[\"x\"]}\n"
        );
        assert_eq!(rendered.summary.rows, None);
    }

    #[test]
    fn root_field_named_like_the_type_key_is_kept() {
        let schema = SchemaDescriptor::from_json_str(
            r#"{
                "name": "tagged",
                "version": 1,
                "file_identifier": "TAGD",
                "root_table": "Tagged",
                "tables": [{"name": "Tagged", "fields": [
                    {"name": "_type", "id": 0, "type": "string"},
                    {"name": "id", "id": 1, "type": {"scalar": "uint32"}}
                ]}]
            }"#,
        )
        .expect("schema");
        let pipeline = Pipeline::new(
            registry(vec![schema]),
            ExportOptions {
                json_style: JsonStyle::Compact,
                ..ExportOptions::default()
            },
        );
        let mut fbb = FlatBufferBuilder::new();
        let kind = fbb.create_string("custom");
        let start = fbb.start_table();
        fbb.push_slot_always(4, kind);
        fbb.push_slot::<u32>(6, 3, 0);
        let root = fbb.end_table(start);
        fbb.finish(root, Some("TAGD"));
        let bytes = fbb.finished_data().to_vec();

        let json = pipeline
            .render(&bytes, None, &ExportTarget::Json)
            .expect("json");
        assert_eq!(
            String::from_utf8(json.bytes).expect("utf-8"),
            "{\"_type\":\"custom\",\"id\":3}\n"
        );
        let csv = pipeline.render(&bytes, None, &cartesian()).expect("csv");
        assert_eq!(
            String::from_utf8(csv.bytes).expect("utf-8"),
            "_type,id\r\ncustom,3\r\n"
        );
    }

    #[test]
    fn failing_export_leaves_sink_untouched() {
        let pipeline = Pipeline::new(
            registry(vec![schema("army", "Army", "FBAR")]),
            ExportOptions::default(),
        );
        let mut sink = Vec::new();
        let result = pipeline.export(&buffer(9, &["x"], "ZZZZ"), None, &cartesian(), &mut sink);
        assert!(matches!(
            result,
            Err(ExportError::Decode(DecodeError::SchemaMismatch { .. }))
        ));
        assert!(sink.is_empty());

        let summary = pipeline
            .export(&buffer(9, &["x"], "FBAR"), None, &cartesian(), &mut sink)
            .expect("export");
        assert_eq!(summary.bytes, sink.len());
    }

    #[test]
    fn batch_results_keep_input_order() {
        let pipeline = Pipeline::new(
            registry(vec![schema("army", "Army", "FBAR")]),
            ExportOptions {
                type_field: false,
                json_style: JsonStyle::Compact,
                ..ExportOptions::default()
            },
        );
        let inputs: Vec<Vec<u8>> = (0..16)
            .map(|id| {
                if id == 7 {
                    vec![1, 2, 3]
                } else {
                    buffer(id, &[], "FBAR")
                }
            })
            .collect();
        let results = pipeline.export_batch(&inputs, None, &ExportTarget::Json);
        assert_eq!(results.len(), 16);
        for (id, result) in results.iter().enumerate() {
            if id == 7 {
                assert!(result.is_err(), "corrupt input should fail alone");
                continue;
            }
            let rendered = result.as_ref().expect("render");
            let document: Value = serde_json::from_slice(&rendered.bytes).expect("json");
            assert_eq!(document["id"], Value::from(id as u64));
        }
    }
}

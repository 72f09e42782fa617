use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::{SchemaDescriptor, SchemaError, SchemaProvider, IDENTIFIER_LEN};

/// Every schema version known to one export run, keyed by schema name.
///
/// Iteration order is the sorted schema name so identifier matching and the
/// `schemas` listing are stable across runs.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: BTreeMap<String, Arc<SchemaDescriptor>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a single schema file, or every `*.json` file inside a directory.
    pub fn load_path(path: &Path) -> Result<Self, SchemaError> {
        let mut registry = Self::new();
        if path.is_dir() {
            let pattern = path.join("*.json").to_string_lossy().into_owned();
            let entries = glob::glob(&pattern).map_err(|source| SchemaError::Pattern {
                pattern: pattern.clone(),
                source,
            })?;
            for entry in entries {
                let file = match entry {
                    Ok(file) => file,
                    Err(err) => {
                        warn!(
                            target: "snapshot_schema::registry",
                            error = %err,
                            "schema.unreadable_entry"
                        );
                        continue;
                    }
                };
                registry.insert(SchemaDescriptor::from_file(&file)?)?;
                debug!(
                    target: "snapshot_schema::registry",
                    path = %file.display(),
                    "schema.loaded"
                );
            }
        } else {
            registry.insert(SchemaDescriptor::from_file(path)?)?;
        }
        info!(
            target: "snapshot_schema::registry",
            count = registry.len(),
            path = %path.display(),
            "schema.registry_loaded"
        );
        Ok(registry)
    }

    pub fn insert(&mut self, schema: SchemaDescriptor) -> Result<(), SchemaError> {
        let name = schema.name().to_string();
        if self.schemas.contains_key(&name) {
            return Err(SchemaError::Duplicate(name));
        }
        self.schemas.insert(name, Arc::new(schema));
        Ok(())
    }

    /// Look a schema up by schema name, falling back to its root table name.
    pub fn get(&self, name: &str) -> Option<Arc<SchemaDescriptor>> {
        self.schemas.get(name).cloned().or_else(|| {
            self.schemas
                .values()
                .find(|schema| schema.root_table() == name)
                .cloned()
        })
    }

    /// First schema (in name order) whose declared identifier matches.
    pub fn find_by_identifier(&self, identifier: &[u8]) -> Option<Arc<SchemaDescriptor>> {
        if identifier.len() != IDENTIFIER_LEN {
            return None;
        }
        let mut matches = self.schemas.values().filter(|schema| {
            schema
                .file_identifier()
                .is_some_and(|declared| declared.as_bytes() == identifier)
        });
        let found = matches.next().cloned();
        if let Some(other) = matches.next() {
            warn!(
                target: "snapshot_schema::registry",
                identifier = %String::from_utf8_lossy(identifier),
                chosen = found.as_ref().map(|s| s.name()).unwrap_or_default(),
                ignored = other.name(),
                "schema.identifier_shared"
            );
        }
        found
    }

    /// The registry's only schema, when exactly one is loaded.
    pub fn single(&self) -> Option<Arc<SchemaDescriptor>> {
        if self.schemas.len() == 1 {
            self.schemas.values().next().cloned()
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<SchemaDescriptor>> {
        self.schemas.values()
    }

    /// Table of registered schemas for the `schemas` command and for
    /// "no matching schema" diagnostics.
    pub fn format_schema_list(&self) -> String {
        if self.schemas.is_empty() {
            return "No snapshot schemas registered.\n".to_string();
        }
        let mut out = String::new();
        let _ = writeln!(out, "{:<32} {:<32} {:<10} {}", "Schema", "Root Type", "Identifier", "Version");
        let _ = writeln!(out, "{:<32} {:<32} {:<10} {}", "-".repeat(32), "-".repeat(32), "-".repeat(10), "-".repeat(7));
        for schema in self.schemas.values() {
            let _ = writeln!(
                out,
                "{:<32} {:<32} {:<10} {}",
                schema.name(),
                schema.root_table(),
                schema.file_identifier().unwrap_or("-"),
                schema.version()
            );
        }
        let _ = writeln!(out);
        let _ = writeln!(out, "{} schemas registered", self.schemas.len());
        out
    }
}

//! The JSON document accepted by the CLI.

use anyhow::bail;
use serde::Deserialize;

use ogm_core::{EntityGraph, EntityRef, NodeDescriptor, SchemaRegistry};

/// A schema, an entity arena and the slots to save.
#[derive(Debug, Deserialize)]
pub struct SaveDocument {
    pub schema: Vec<NodeDescriptor>,
    pub entities: EntityGraph,
    #[serde(default)]
    pub roots: Vec<EntityRef>,
}

impl SaveDocument {
    pub fn from_json(input: &str) -> anyhow::Result<Self> {
        let doc: Self = serde_json::from_str(input)?;
        for &root in &doc.roots {
            if doc.entities.get(root).is_none() {
                bail!(
                    "root {root} is out of range ({} entities)",
                    doc.entities.len()
                );
            }
        }
        Ok(doc)
    }

    pub fn registry(&self) -> anyhow::Result<SchemaRegistry> {
        Ok(SchemaRegistry::from_descriptors(self.schema.clone())?)
    }
}

//! Declarative schema registry.
//!
//! Every entity type is described once at startup: its labels, how its
//! identity is assigned, and which fields reference other entities. The
//! registry is either built with [`SchemaBuilder`] or deserialized from a
//! schema document and then validated with [`SchemaRegistry::from_descriptors`].

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while building or querying the schema registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Entity type {0} is registered twice")]
    DuplicateType(String),

    #[error("Unknown entity type: {0}")]
    UnknownType(String),

    #[error("Relationship field {type_name}.{field} targets unknown type {target}")]
    UnknownTarget {
        type_name: String,
        field: String,
        target: String,
    },

    #[error("Relationship field {type_name}.{field} is declared twice")]
    DuplicateField { type_name: String, field: String },

    #[error("No relationship field {field} on entity type {type_name}")]
    UnknownRelationship { type_name: String, field: String },

    #[error("Relationship field {type_name}.{field} expects {expected}, got {actual}")]
    TargetMismatch {
        type_name: String,
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Invalid identifier {value:?} used as {role}")]
    InvalidIdentifier { role: &'static str, value: String },
}

/// How the identity of an entity type is assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IdStrategy {
    /// Natural key provided by the application. Must never be missing.
    #[default]
    Assigned,
    /// Surrogate key allocated by the store when the node is created.
    Generated,
    /// Surrogate key (UUID string) allocated by the mapper before the write.
    ExternallyGenerated,
}

/// The identity field of an entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdDescriptor {
    /// Graph property holding the key. Unused for `Generated` ids, which
    /// live in the store's internal id.
    pub property: String,
    #[serde(default)]
    pub strategy: IdStrategy,
}

impl IdDescriptor {
    pub fn assigned(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            strategy: IdStrategy::Assigned,
        }
    }

    pub fn generated() -> Self {
        Self {
            property: "id".to_string(),
            strategy: IdStrategy::Generated,
        }
    }

    pub fn externally_generated(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            strategy: IdStrategy::ExternallyGenerated,
        }
    }
}

/// Direction of a relationship relative to the entity declaring it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    #[default]
    Outgoing,
    Incoming,
}

/// A relationship field on an entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipDescriptor {
    /// Field name on the declaring type.
    pub field: String,
    /// Relationship type. Ignored for dynamic fields.
    #[serde(default)]
    pub rel_type: String,
    #[serde(default)]
    pub direction: Direction,
    /// Entity type of the referenced entities.
    pub target: String,
    /// When set, each link supplies its own relationship type as its key.
    #[serde(default)]
    pub dynamic: bool,
}

impl RelationshipDescriptor {
    pub fn outgoing(
        field: impl Into<String>,
        rel_type: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            rel_type: rel_type.into(),
            direction: Direction::Outgoing,
            target: target.into(),
            dynamic: false,
        }
    }

    pub fn incoming(
        field: impl Into<String>,
        rel_type: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            direction: Direction::Incoming,
            ..Self::outgoing(field, rel_type, target)
        }
    }

    /// A map-keyed field whose keys become relationship types.
    pub fn dynamic(field: impl Into<String>, direction: Direction, target: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            rel_type: String::new(),
            direction,
            target: target.into(),
            dynamic: true,
        }
    }
}

/// Mapping metadata for one entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    pub type_name: String,
    /// Defaults to the type name when left empty.
    #[serde(default)]
    pub primary_label: String,
    #[serde(default)]
    pub additional_labels: Vec<String>,
    pub id: IdDescriptor,
    #[serde(default)]
    pub relationships: Vec<RelationshipDescriptor>,
}

impl NodeDescriptor {
    pub fn new(type_name: impl Into<String>, id: IdDescriptor) -> Self {
        let type_name = type_name.into();
        Self {
            primary_label: type_name.clone(),
            type_name,
            additional_labels: Vec::new(),
            id,
            relationships: Vec::new(),
        }
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.primary_label = label.into();
        self
    }

    pub fn additional_label(mut self, label: impl Into<String>) -> Self {
        self.additional_labels.push(label.into());
        self
    }

    pub fn relationship(mut self, rel: RelationshipDescriptor) -> Self {
        self.relationships.push(rel);
        self
    }

    /// Primary label followed by the additional labels.
    pub fn labels(&self) -> Vec<String> {
        std::iter::once(self.primary_label.clone())
            .chain(self.additional_labels.iter().cloned())
            .collect()
    }

    pub fn find_relationship(&self, field: &str) -> Option<&RelationshipDescriptor> {
        self.relationships.iter().find(|r| r.field == field)
    }
}

/// Validated, immutable set of entity type descriptors.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    types: BTreeMap<String, NodeDescriptor>,
}

impl SchemaRegistry {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    /// Validate a list of descriptors and build the registry.
    pub fn from_descriptors(descriptors: Vec<NodeDescriptor>) -> Result<Self, SchemaError> {
        let mut types = BTreeMap::new();
        for mut desc in descriptors {
            if desc.primary_label.is_empty() {
                desc.primary_label = desc.type_name.clone();
            }
            if types.contains_key(&desc.type_name) {
                return Err(SchemaError::DuplicateType(desc.type_name));
            }
            types.insert(desc.type_name.clone(), desc);
        }

        for desc in types.values() {
            validate_identifier("label", &desc.primary_label)?;
            for label in &desc.additional_labels {
                validate_identifier("label", label)?;
            }
            if desc.id.strategy != IdStrategy::Generated {
                validate_identifier("id property", &desc.id.property)?;
            }

            let mut fields = HashSet::new();
            for rel in &desc.relationships {
                if !fields.insert(rel.field.as_str()) {
                    return Err(SchemaError::DuplicateField {
                        type_name: desc.type_name.clone(),
                        field: rel.field.clone(),
                    });
                }
                if !rel.dynamic {
                    validate_identifier("relationship type", &rel.rel_type)?;
                }
                if !types.contains_key(&rel.target) {
                    return Err(SchemaError::UnknownTarget {
                        type_name: desc.type_name.clone(),
                        field: rel.field.clone(),
                        target: rel.target.clone(),
                    });
                }
            }
        }

        tracing::debug!(types = types.len(), "Schema registry built");
        Ok(Self { types })
    }

    pub fn descriptor(&self, type_name: &str) -> Result<&NodeDescriptor, SchemaError> {
        self.types
            .get(type_name)
            .ok_or_else(|| SchemaError::UnknownType(type_name.to_string()))
    }

    pub fn relationship(
        &self,
        type_name: &str,
        field: &str,
    ) -> Result<&RelationshipDescriptor, SchemaError> {
        self.descriptor(type_name)?
            .find_relationship(field)
            .ok_or_else(|| SchemaError::UnknownRelationship {
                type_name: type_name.to_string(),
                field: field.to_string(),
            })
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeDescriptor> {
        self.types.values()
    }
}

/// Explicit registration of entity types, validated on [`SchemaBuilder::build`].
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    descriptors: Vec<NodeDescriptor>,
}

impl SchemaBuilder {
    pub fn register(mut self, descriptor: NodeDescriptor) -> Self {
        self.descriptors.push(descriptor);
        self
    }

    pub fn build(self) -> Result<SchemaRegistry, SchemaError> {
        SchemaRegistry::from_descriptors(self.descriptors)
    }
}

/// Labels, relationship types, and key properties are spliced into Cypher,
/// so they are restricted to plain identifiers.
pub fn validate_identifier(role: &'static str, value: &str) -> Result<(), SchemaError> {
    let mut chars = value.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(SchemaError::InvalidIdentifier {
            role,
            value: value.to_string(),
        })
    }
}

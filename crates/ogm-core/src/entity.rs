//! Application object graphs expressed as an arena of entities.
//!
//! Entities never own each other. A relationship is a [`Link`] holding the
//! slot index of its target, so self references and longer cycles are plain
//! data and the same instance can be referenced from many places.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::{Properties, Value};

/// Slot of an entity inside an [`EntityGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityRef(pub usize);

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One in-memory instance of a mapped type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub type_name: String,
    /// Natural key or surrogate key, depending on the type's id strategy.
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub properties: Properties,
    #[serde(default)]
    pub links: Vec<Link>,
}

impl Entity {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            id: None,
            properties: Properties::new(),
            links: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<Value>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    /// Links declared on `field`, in insertion order.
    pub fn links_for<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a Link> + 'a {
        self.links.iter().filter(move |l| l.field == field)
    }
}

/// A reference from one entity to another through a relationship field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub field: String,
    pub target: EntityRef,
    /// Relationship type for dynamic fields (the map key in the domain model).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Edge-scoped properties.
    #[serde(default, skip_serializing_if = "Properties::is_empty")]
    pub properties: Properties,
}

/// Arena holding every entity reachable from one or more save roots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityGraph {
    entities: Vec<Entity>,
}

impl EntityGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, entity: Entity) -> EntityRef {
        self.entities.push(entity);
        EntityRef(self.entities.len() - 1)
    }

    pub fn get(&self, slot: EntityRef) -> Option<&Entity> {
        self.entities.get(slot.0)
    }

    pub fn get_mut(&mut self, slot: EntityRef) -> Option<&mut Entity> {
        self.entities.get_mut(slot.0)
    }

    /// Reference `to` from `from` through `field`.
    ///
    /// # Panics
    ///
    /// Panics if `from` is not a slot of this graph.
    pub fn link(&mut self, from: EntityRef, field: impl Into<String>, to: EntityRef) {
        self.push_link(
            from,
            Link {
                field: field.into(),
                target: to,
                key: None,
                properties: Properties::new(),
            },
        );
    }

    /// Reference `to` through a dynamic field, using `key` as relationship type.
    ///
    /// # Panics
    ///
    /// Panics if `from` is not a slot of this graph.
    pub fn link_keyed(
        &mut self,
        from: EntityRef,
        field: impl Into<String>,
        key: impl Into<String>,
        to: EntityRef,
    ) {
        self.push_link(
            from,
            Link {
                field: field.into(),
                target: to,
                key: Some(key.into()),
                properties: Properties::new(),
            },
        );
    }

    /// Reference `to` with edge-scoped properties.
    ///
    /// # Panics
    ///
    /// Panics if `from` is not a slot of this graph.
    pub fn link_with_properties(
        &mut self,
        from: EntityRef,
        field: impl Into<String>,
        to: EntityRef,
        properties: Properties,
    ) {
        self.push_link(
            from,
            Link {
                field: field.into(),
                target: to,
                key: None,
                properties,
            },
        );
    }

    fn push_link(&mut self, from: EntityRef, link: Link) {
        self.entities[from.0].links.push(link);
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntityRef, &Entity)> {
        self.entities
            .iter()
            .enumerate()
            .map(|(i, e)| (EntityRef(i), e))
    }

    /// Whether `slot` can reach itself by following links.
    pub fn on_cycle(&self, slot: EntityRef) -> bool {
        let mut seen = vec![false; self.entities.len()];
        let mut stack: Vec<EntityRef> = match self.get(slot) {
            Some(e) => e.links.iter().map(|l| l.target).collect(),
            None => return false,
        };
        while let Some(current) = stack.pop() {
            if current == slot {
                return true;
            }
            match seen.get_mut(current.0) {
                Some(s) if !*s => *s = true,
                _ => continue,
            }
            if let Some(e) = self.get(current) {
                stack.extend(e.links.iter().map(|l| l.target));
            }
        }
        false
    }
}

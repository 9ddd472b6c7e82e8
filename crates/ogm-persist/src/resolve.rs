//! Key/identity resolution.
//!
//! Decides, once per entity instance, which logical node the instance stands
//! for and whether that node is new within the current save call.

use std::collections::{BTreeMap, HashMap, HashSet};

use ogm_core::{Entity, EntityRef, IdStrategy, Identity, OgmError, Result, SchemaRegistry, Value};
use uuid::Uuid;

/// Resolution result for one entity instance.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentityDescriptor {
    /// First time this identity is seen in the save call, or a node the
    /// store has yet to allocate an id for.
    pub is_new: bool,
    pub identity: Identity,
    /// Value for the key property (or the store id), if known before writing.
    pub key: Option<Value>,
    /// The node can already be in the store: its natural key or store id
    /// came from the caller rather than from this save.
    pub may_exist: bool,
}

/// Per-save-call identity resolver. Holds no state across calls.
pub struct KeyResolver<'a> {
    schema: &'a SchemaRegistry,
    resolved: HashMap<EntityRef, IdentityDescriptor>,
    seen: HashSet<Identity>,
    generated: BTreeMap<EntityRef, String>,
}

impl<'a> KeyResolver<'a> {
    pub fn new(schema: &'a SchemaRegistry) -> Self {
        Self {
            schema,
            resolved: HashMap::new(),
            seen: HashSet::new(),
            generated: BTreeMap::new(),
        }
    }

    /// Resolve the identity of the instance stored at `slot`.
    ///
    /// Repeated calls for one slot return the cached descriptor.
    pub fn resolve(&mut self, slot: EntityRef, entity: &Entity) -> Result<IdentityDescriptor> {
        if let Some(cached) = self.resolved.get(&slot) {
            return Ok(cached.clone());
        }

        let desc = self.schema.descriptor(&entity.type_name)?;
        let label = desc.primary_label.clone();
        let id = entity.id.as_ref().filter(|v| !v.is_null());

        let mut may_exist = true;
        let (identity, key) = match desc.id.strategy {
            IdStrategy::Assigned => {
                let value = id.ok_or_else(|| {
                    invalid_key(
                        entity,
                        slot,
                        format!("natural key {} is missing", desc.id.property),
                    )
                })?;
                let key = natural_key(entity, slot, value)?;
                (Identity::Natural { label, key }, Some(value.clone()))
            }
            IdStrategy::Generated => match id {
                None => {
                    may_exist = false;
                    (Identity::Transient { slot }, None)
                }
                Some(Value::Int(store_id)) => (
                    Identity::Surrogate {
                        label,
                        id: *store_id,
                    },
                    Some(Value::Int(*store_id)),
                ),
                Some(other) => {
                    return Err(invalid_key(
                        entity,
                        slot,
                        format!("generated id must be an integer, got {}", other.kind()),
                    ))
                }
            },
            IdStrategy::ExternallyGenerated => match id {
                None => {
                    may_exist = false;
                    let generated = Uuid::new_v4().to_string();
                    self.generated.insert(slot, generated.clone());
                    let value = Value::String(generated);
                    let key = natural_key(entity, slot, &value)?;
                    (Identity::Natural { label, key }, Some(value))
                }
                Some(value) => {
                    let key = natural_key(entity, slot, value)?;
                    (Identity::Natural { label, key }, Some(value.clone()))
                }
            },
        };

        let is_new = match identity {
            Identity::Surrogate { .. } => false,
            _ => self.seen.insert(identity.clone()),
        };

        let descriptor = IdentityDescriptor {
            is_new,
            identity,
            key,
            may_exist,
        };
        self.resolved.insert(slot, descriptor.clone());
        Ok(descriptor)
    }

    /// Identity [`resolve`](Self::resolve) gives the instance, without
    /// recording anything. `None` while the instance has no usable key.
    pub fn peek(&self, slot: EntityRef, entity: &Entity) -> Option<Identity> {
        if let Some(cached) = self.resolved.get(&slot) {
            return Some(cached.identity.clone());
        }
        let desc = self.schema.descriptor(&entity.type_name).ok()?;
        let label = desc.primary_label.clone();
        match (desc.id.strategy, entity.id.as_ref().filter(|v| !v.is_null())) {
            (IdStrategy::Generated, None) => Some(Identity::Transient { slot }),
            (IdStrategy::Generated, Some(Value::Int(id))) => {
                Some(Identity::Surrogate { label, id: *id })
            }
            (IdStrategy::Generated, Some(_)) | (_, None) => None,
            (_, Some(value)) => value.as_key().map(|key| Identity::Natural { label, key }),
        }
    }

    /// Number of distinct instances resolved so far.
    pub fn resolved_count(&self) -> usize {
        self.resolved.len()
    }

    /// Keys generated for `ExternallyGenerated` instances, by slot.
    pub fn into_generated_keys(self) -> BTreeMap<EntityRef, String> {
        self.generated
    }
}

fn natural_key(entity: &Entity, slot: EntityRef, value: &Value) -> Result<ogm_core::KeyValue> {
    value.as_key().ok_or_else(|| {
        invalid_key(
            entity,
            slot,
            format!("{} value cannot identify a node", value.kind()),
        )
    })
}

fn invalid_key(entity: &Entity, slot: EntityRef, reason: String) -> OgmError {
    OgmError::InvalidKey {
        type_name: entity.type_name.clone(),
        slot,
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ogm_core::{EntityGraph, IdDescriptor, KeyValue, NodeDescriptor};

    fn schema() -> SchemaRegistry {
        SchemaRegistry::builder()
            .register(NodeDescriptor::new("Person", IdDescriptor::assigned("name")))
            .register(NodeDescriptor::new("Location", IdDescriptor::generated()))
            .register(NodeDescriptor::new(
                "Ticket",
                IdDescriptor::externally_generated("uuid"),
            ))
            .build()
            .unwrap()
    }

    #[test]
    fn test_natural_key_is_new_only_once() {
        let schema = schema();
        let mut graph = EntityGraph::new();
        let a = graph.add(Entity::new("Person").with_id("p1"));
        let b = graph.add(Entity::new("Person").with_id("p1"));

        let mut resolver = KeyResolver::new(&schema);
        let first = resolver.resolve(a, graph.get(a).unwrap()).unwrap();
        let second = resolver.resolve(b, graph.get(b).unwrap()).unwrap();

        assert!(first.is_new);
        assert!(!second.is_new);
        assert_eq!(first.identity, second.identity);
        assert_eq!(
            first.identity,
            Identity::Natural {
                label: "Person".to_string(),
                key: KeyValue::String("p1".to_string()),
            }
        );
    }

    #[test]
    fn test_resolution_is_idempotent_per_instance() {
        let schema = schema();
        let mut graph = EntityGraph::new();
        let a = graph.add(Entity::new("Ticket"));

        let mut resolver = KeyResolver::new(&schema);
        let first = resolver.resolve(a, graph.get(a).unwrap()).unwrap();
        let again = resolver.resolve(a, graph.get(a).unwrap()).unwrap();

        assert_eq!(first, again);
        assert!(!first.may_exist);
        assert_eq!(resolver.resolved_count(), 1);
        let keys = resolver.into_generated_keys();
        assert_eq!(keys.len(), 1);
        assert_eq!(first.key, Some(Value::String(keys[&a].clone())));
    }

    #[test]
    fn test_caller_supplied_keys_may_exist() {
        let schema = schema();
        let mut graph = EntityGraph::new();
        let person = graph.add(Entity::new("Person").with_id("p1"));
        let ticket = graph.add(Entity::new("Ticket").with_id("t-1"));

        let mut resolver = KeyResolver::new(&schema);
        assert!(resolver.resolve(person, graph.get(person).unwrap()).unwrap().may_exist);
        assert!(resolver.resolve(ticket, graph.get(ticket).unwrap()).unwrap().may_exist);
    }

    #[test]
    fn test_peek_records_nothing() {
        let schema = schema();
        let mut graph = EntityGraph::new();
        let person = graph.add(Entity::new("Person").with_id("p1"));
        let ticket = graph.add(Entity::new("Ticket"));

        let mut resolver = KeyResolver::new(&schema);
        let peeked = resolver.peek(person, graph.get(person).unwrap());
        assert_eq!(resolver.peek(ticket, graph.get(ticket).unwrap()), None);
        assert_eq!(resolver.resolved_count(), 0);

        let resolved = resolver.resolve(person, graph.get(person).unwrap()).unwrap();
        assert!(resolved.is_new);
        assert_eq!(peeked, Some(resolved.identity));
    }

    #[test]
    fn test_missing_natural_key_fails() {
        let schema = schema();
        let mut graph = EntityGraph::new();
        let a = graph.add(Entity::new("Person"));
        let b = graph.add(Entity::new("Person").with_id(Value::Null));

        let mut resolver = KeyResolver::new(&schema);
        assert!(matches!(
            resolver.resolve(a, graph.get(a).unwrap()),
            Err(OgmError::InvalidKey { .. })
        ));
        assert!(matches!(
            resolver.resolve(b, graph.get(b).unwrap()),
            Err(OgmError::InvalidKey { .. })
        ));
    }

    #[test]
    fn test_float_natural_key_rejected() {
        let schema = schema();
        let mut graph = EntityGraph::new();
        let a = graph.add(Entity::new("Person").with_id(1.5));

        let err = KeyResolver::new(&schema)
            .resolve(a, graph.get(a).unwrap())
            .unwrap_err();
        assert!(err.to_string().contains("float value cannot identify a node"));
    }

    #[test]
    fn test_generated_ids() {
        let schema = schema();
        let mut graph = EntityGraph::new();
        let fresh = graph.add(Entity::new("Location"));
        let stored = graph.add(Entity::new("Location").with_id(42));
        let bogus = graph.add(Entity::new("Location").with_id("x"));

        let mut resolver = KeyResolver::new(&schema);
        let d = resolver.resolve(fresh, graph.get(fresh).unwrap()).unwrap();
        assert!(d.is_new);
        assert!(!d.may_exist);
        assert_eq!(d.identity, Identity::Transient { slot: fresh });
        assert_eq!(d.key, None);

        let d = resolver.resolve(stored, graph.get(stored).unwrap()).unwrap();
        assert!(!d.is_new);
        assert!(d.may_exist);
        assert_eq!(
            d.identity,
            Identity::Surrogate {
                label: "Location".to_string(),
                id: 42
            }
        );

        assert!(resolver.resolve(bogus, graph.get(bogus).unwrap()).is_err());
    }

    #[test]
    fn test_distinct_transient_instances_differ() {
        let schema = schema();
        let mut graph = EntityGraph::new();
        let a = graph.add(Entity::new("Location"));
        let b = graph.add(Entity::new("Location"));

        let mut resolver = KeyResolver::new(&schema);
        let da = resolver.resolve(a, graph.get(a).unwrap()).unwrap();
        let db = resolver.resolve(b, graph.get(b).unwrap()).unwrap();
        assert_ne!(da.identity, db.identity);
        assert!(da.is_new && db.is_new);
    }

    #[test]
    fn test_unknown_type() {
        let schema = schema();
        let mut graph = EntityGraph::new();
        let a = graph.add(Entity::new("Device").with_id("1"));
        assert!(matches!(
            KeyResolver::new(&schema).resolve(a, graph.get(a).unwrap()),
            Err(OgmError::Schema(_))
        ));
    }
}

//! Reference graph walking.
//!
//! Traverses everything reachable from the save roots depth-first with an
//! explicit stack, producing one [`NodeOp`] per distinct identity and one
//! [`RelationshipOp`] per distinct stored relationship. An identity already
//! visited is never expanded again; the link only gains an edge to the
//! existing node, which is what makes cyclic and self-referencing graphs
//! terminate. Nodes that may already be stored also get one [`ClearOp`] per
//! relationship field, so a re-save replaces their relationships.

use std::collections::{BTreeMap, HashMap};

use ogm_core::schema::validate_identifier;
use ogm_core::{
    ClearOp, DuplicatePolicy, Entity, EntityGraph, EntityRef, Identity, Link, NodeDescriptor,
    NodeOp, NodeRef, OgmError, RelationshipOp, Result, SchemaError, SchemaRegistry,
};

use crate::resolve::KeyResolver;

/// Ephemeral per-save structure: identities mapped to pending operations.
#[derive(Debug, Clone, Default)]
pub struct ReferenceGraph {
    nodes: Vec<NodeOp>,
    relationships: Vec<RelationshipOp>,
    clears: Vec<ClearOp>,
    index: HashMap<Identity, NodeRef>,
    slots: BTreeMap<EntityRef, NodeRef>,
    roots: Vec<NodeRef>,
    visits: usize,
    generated_keys: BTreeMap<EntityRef, String>,
}

impl ReferenceGraph {
    /// Node operations in discovery order.
    pub fn nodes(&self) -> &[NodeOp] {
        &self.nodes
    }

    /// Relationship operations in discovery order.
    pub fn relationships(&self) -> &[RelationshipOp] {
        &self.relationships
    }

    /// Relationship clears in discovery order of their nodes.
    pub fn clears(&self) -> &[ClearOp] {
        &self.clears
    }

    pub fn node(&self, node: NodeRef) -> Option<&NodeOp> {
        self.nodes.get(node.0)
    }

    pub fn lookup(&self, identity: &Identity) -> Option<NodeRef> {
        self.index.get(identity).copied()
    }

    /// Node an entity instance was resolved to.
    pub fn node_for_slot(&self, slot: EntityRef) -> Option<NodeRef> {
        self.slots.get(&slot).copied()
    }

    /// Every visited instance with the node it resolved to.
    pub fn slots(&self) -> impl Iterator<Item = (EntityRef, NodeRef)> + '_ {
        self.slots.iter().map(|(s, n)| (*s, *n))
    }

    pub fn roots(&self) -> &[NodeRef] {
        &self.roots
    }

    /// Number of entities expanded by the walk.
    pub fn visits(&self) -> usize {
        self.visits
    }

    /// UUIDs generated for instances without an externally generated id.
    pub fn generated_keys(&self) -> &BTreeMap<EntityRef, String> {
        &self.generated_keys
    }

    #[cfg(test)]
    pub(crate) fn from_parts(nodes: Vec<NodeOp>, relationships: Vec<RelationshipOp>) -> Self {
        Self {
            visits: nodes.len(),
            nodes,
            relationships,
            ..Default::default()
        }
    }
}

/// Walk the graph reachable from `root`.
pub fn walk(
    schema: &SchemaRegistry,
    graph: &EntityGraph,
    root: EntityRef,
    policy: DuplicatePolicy,
) -> Result<ReferenceGraph> {
    walk_all(schema, graph, &[root], policy)
}

/// Walk the graph reachable from several roots into one reference graph.
pub fn walk_all(
    schema: &SchemaRegistry,
    graph: &EntityGraph,
    roots: &[EntityRef],
    policy: DuplicatePolicy,
) -> Result<ReferenceGraph> {
    let mut walker = Walker {
        schema,
        graph,
        policy,
        resolver: KeyResolver::new(schema),
        out: ReferenceGraph::default(),
        state: Vec::new(),
        edges: HashMap::new(),
    };

    for &root in roots {
        let node = walker.visit_root(root)?;
        walker.out.roots.push(node);
    }

    let mut out = walker.out;
    out.generated_keys = walker.resolver.into_generated_keys();
    tracing::debug!(
        roots = roots.len(),
        nodes = out.nodes.len(),
        relationships = out.relationships.len(),
        clears = out.clears.len(),
        "Reference graph built"
    );
    Ok(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VisitState {
    OnPath,
    Done,
}

struct Frame {
    slot: EntityRef,
    node: NodeRef,
    next_link: usize,
}

struct Walker<'a> {
    schema: &'a SchemaRegistry,
    graph: &'a EntityGraph,
    policy: DuplicatePolicy,
    resolver: KeyResolver<'a>,
    out: ReferenceGraph,
    state: Vec<VisitState>,
    /// Pending relationships by (type, start, end).
    edges: HashMap<(String, NodeRef, NodeRef), Vec<usize>>,
}

impl<'a> Walker<'a> {
    fn visit_root(&mut self, root: EntityRef) -> Result<NodeRef> {
        let graph = self.graph;
        let entity = graph.get(root).ok_or(OgmError::DanglingReference {
            slot: root,
            field: String::new(),
            target: root,
        })?;

        let (node, fresh) = self.enter(root, entity, false)?;
        if !fresh {
            return Ok(node);
        }

        let mut stack = vec![Frame {
            slot: root,
            node,
            next_link: 0,
        }];

        while let Some(frame) = stack.last_mut() {
            let (slot, from) = (frame.slot, frame.node);
            let Some(entity) = graph.get(slot) else {
                stack.pop();
                continue;
            };
            let Some(link) = entity.links.get(frame.next_link) else {
                self.state[from.0] = VisitState::Done;
                stack.pop();
                continue;
            };
            frame.next_link += 1;

            let rel = self.schema.relationship(&entity.type_name, &link.field)?;
            let target = graph
                .get(link.target)
                .ok_or_else(|| OgmError::DanglingReference {
                    slot,
                    field: link.field.clone(),
                    target: link.target,
                })?;
            if target.type_name != rel.target {
                return Err(SchemaError::TargetMismatch {
                    type_name: entity.type_name.clone(),
                    field: link.field.clone(),
                    expected: rel.target.clone(),
                    actual: target.type_name.clone(),
                }
                .into());
            }

            let rel_type = if rel.dynamic {
                let key = link.key.clone().unwrap_or_default();
                validate_identifier("dynamic relationship type", &key)?;
                key
            } else {
                rel.rel_type.clone()
            };

            let (to, fresh) = self.enter(link.target, target, true)?;
            let deferred = !fresh && self.state[to.0] == VisitState::OnPath;

            self.push_relationship(RelationshipOp {
                rel_type,
                direction: rel.direction,
                from,
                to,
                properties: link.properties.clone(),
                field: link.field.clone(),
                deferred,
            });

            if fresh {
                stack.push(Frame {
                    slot: link.target,
                    node: to,
                    next_link: 0,
                });
            }
        }

        Ok(node)
    }

    /// Resolve `slot` to a node operation. Returns `true` when the node was
    /// created by this call and still has to be expanded.
    fn enter(&mut self, slot: EntityRef, entity: &Entity, via_link: bool) -> Result<(NodeRef, bool)> {
        if let Some(node) = self.out.node_for_slot(slot) {
            return Ok((node, false));
        }

        let resolved = match self.resolver.resolve(slot, entity) {
            Ok(d) => d,
            Err(e @ OgmError::InvalidKey { .. }) if via_link && self.graph.on_cycle(slot) => {
                return Err(OgmError::CyclicKeyConflict {
                    type_name: entity.type_name.clone(),
                    slot,
                    source: Box::new(e),
                });
            }
            Err(e) => return Err(e),
        };

        if let Some(node) = self.out.lookup(&resolved.identity) {
            self.reconcile(node, slot, entity)?;
            self.out.slots.insert(slot, node);
            return Ok((node, false));
        }

        let schema = self.schema;
        let desc = schema.descriptor(&entity.type_name)?;
        let node = NodeRef(self.out.nodes.len());
        self.out.nodes.push(NodeOp {
            node_ref: node,
            identity: resolved.identity.clone(),
            labels: desc.labels(),
            id_property: desc.id.property.clone(),
            key: resolved.key,
            strategy: desc.id.strategy,
            properties: entity.properties.clone(),
            is_new: resolved.is_new,
            origin: slot,
        });
        self.out.index.insert(resolved.identity, node);
        self.out.slots.insert(slot, node);
        self.state.push(VisitState::OnPath);
        self.out.visits += 1;
        if resolved.may_exist {
            self.push_clears(node, desc)?;
        }

        tracing::trace!(%slot, %node, type_name = %entity.type_name, "Visited entity");
        Ok((node, true))
    }

    /// Record `op` unless the same stored relationship, with the same
    /// properties, is already pending.
    fn push_relationship(&mut self, op: RelationshipOp) {
        let (start, end) = op.endpoints();
        let pending = self
            .edges
            .entry((op.rel_type.clone(), start, end))
            .or_default();
        let relationships = &self.out.relationships;
        if pending
            .iter()
            .any(|&i| relationships[i].properties == op.properties)
        {
            tracing::trace!(rel_type = %op.rel_type, %start, %end, "Skipping repeated relationship");
            return;
        }
        pending.push(relationships.len());
        self.out.relationships.push(op);
    }

    fn push_clears(&mut self, node: NodeRef, desc: &NodeDescriptor) -> Result<()> {
        for rel in &desc.relationships {
            let target = self.schema.descriptor(&rel.target)?;
            self.out.clears.push(ClearOp {
                node,
                field: rel.field.clone(),
                rel_type: (!rel.dynamic).then(|| rel.rel_type.clone()),
                direction: rel.direction,
                target_label: target.primary_label.clone(),
            });
        }
        Ok(())
    }

    /// A second instance of an already visited identity. Its attributes and
    /// links lose to the first instance's, or fail the walk when they differ
    /// and the policy says so. Its links are not followed.
    fn reconcile(&self, node: NodeRef, slot: EntityRef, entity: &Entity) -> Result<()> {
        let first = &self.out.nodes[node.0];
        let differing = first
            .properties
            .keys()
            .chain(entity.properties.keys())
            .find(|k| first.properties.get(*k) != entity.properties.get(*k))
            .cloned()
            .or_else(|| self.differing_link(first.origin, entity));

        let Some(property) = differing else {
            return Ok(());
        };

        match self.policy {
            DuplicatePolicy::FirstWins => {
                tracing::debug!(
                    identity = %first.identity,
                    first = %first.origin,
                    duplicate = %slot,
                    differs = %property,
                    "Ignoring attributes and links of duplicate instance"
                );
                Ok(())
            }
            DuplicatePolicy::Fail => Err(OgmError::ConflictingEntityState {
                identity: first.identity.clone(),
                property,
                first: first.origin,
                duplicate: slot,
            }),
        }
    }

    /// First link, in declaration order, on which `duplicate` departs from
    /// the instance at `first`, as `link <field>`.
    fn differing_link(&self, first: EntityRef, duplicate: &Entity) -> Option<String> {
        let graph = self.graph;
        let first_links = graph.get(first).map(|e| e.links.as_slice()).unwrap_or_default();
        let len = first_links.len().max(duplicate.links.len());
        (0..len).find_map(|i| match (first_links.get(i), duplicate.links.get(i)) {
            (Some(a), Some(b)) if self.same_link(a, b) => None,
            (Some(l), _) | (None, Some(l)) => Some(format!("link {}", l.field)),
            (None, None) => None,
        })
    }

    /// Links describing the same relationship. Targets match when they are
    /// the same instance or resolve to the same identity.
    fn same_link(&self, a: &Link, b: &Link) -> bool {
        if a.field != b.field || a.key != b.key || a.properties != b.properties {
            return false;
        }
        if a.target == b.target {
            return true;
        }
        let graph = self.graph;
        match (graph.get(a.target), graph.get(b.target)) {
            (Some(x), Some(y)) => {
                let left = self.resolver.peek(a.target, x);
                left.is_some() && left == self.resolver.peek(b.target, y)
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ogm_core::{
        Direction, IdDescriptor, NodeDescriptor, Properties, RelationshipDescriptor, Value,
    };

    fn schema() -> SchemaRegistry {
        SchemaRegistry::builder()
            .register(
                NodeDescriptor::new("Person", IdDescriptor::assigned("name"))
                    .relationship(RelationshipDescriptor::outgoing(
                        "was_onboarded_by",
                        "ONBOARDED_BY",
                        "Person",
                    ))
                    .relationship(RelationshipDescriptor::incoming("known_by", "KNOWS", "Person"))
                    .relationship(RelationshipDescriptor::dynamic(
                        "rated_by",
                        Direction::Incoming,
                        "Person",
                    )),
            )
            .register(
                NodeDescriptor::new("Location", IdDescriptor::generated()).relationship(
                    RelationshipDescriptor::outgoing("previous", "PREVIOUS_LOCATION", "Location"),
                ),
            )
            .build()
            .unwrap()
    }

    fn person(graph: &mut EntityGraph, name: &str) -> EntityRef {
        graph.add(Entity::new("Person").with_id(name))
    }

    #[test]
    fn test_acyclic_visits_each_identity_once() {
        let schema = schema();
        let mut graph = EntityGraph::new();
        let p1 = person(&mut graph, "p1");
        let p2 = person(&mut graph, "p2");
        let p3 = person(&mut graph, "p3");
        graph.link(p3, "was_onboarded_by", p1);
        graph.link(p3, "was_onboarded_by", p2);
        graph.link(p2, "was_onboarded_by", p1);

        let rg = walk(&schema, &graph, p3, DuplicatePolicy::FirstWins).unwrap();
        assert_eq!(rg.visits(), 3);
        assert_eq!(rg.nodes().len(), 3);
        assert_eq!(rg.relationships().len(), 3);
        assert!(rg.relationships().iter().all(|r| !r.deferred));
    }

    #[test]
    fn test_discovery_order_is_depth_first() {
        let schema = schema();
        let mut graph = EntityGraph::new();
        let p1 = person(&mut graph, "p1");
        let p2 = person(&mut graph, "p2");
        let p3 = person(&mut graph, "p3");
        graph.link(p3, "was_onboarded_by", p2);
        graph.link(p3, "was_onboarded_by", p1);
        graph.link(p2, "was_onboarded_by", p1);

        let rg = walk(&schema, &graph, p3, DuplicatePolicy::FirstWins).unwrap();
        let order: Vec<EntityRef> = rg.nodes().iter().map(|n| n.origin).collect();
        assert_eq!(order, vec![p3, p2, p1]);
    }

    #[test]
    fn test_mutual_references_terminate() {
        let schema = schema();
        let mut graph = EntityGraph::new();
        let a = person(&mut graph, "a");
        let b = person(&mut graph, "b");
        graph.link(a, "known_by", b);
        graph.link(b, "known_by", a);

        let rg = walk(&schema, &graph, a, DuplicatePolicy::FirstWins).unwrap();
        assert_eq!(rg.nodes().len(), 2);
        assert_eq!(rg.relationships().len(), 2);

        let back: Vec<&RelationshipOp> =
            rg.relationships().iter().filter(|r| r.deferred).collect();
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].from, rg.node_for_slot(b).unwrap());
        assert_eq!(back[0].to, rg.node_for_slot(a).unwrap());
    }

    #[test]
    fn test_self_reference_is_deferred() {
        let schema = schema();
        let mut graph = EntityGraph::new();
        let a = person(&mut graph, "a");
        graph.link(a, "was_onboarded_by", a);

        let rg = walk(&schema, &graph, a, DuplicatePolicy::FirstWins).unwrap();
        assert_eq!(rg.nodes().len(), 1);
        assert_eq!(rg.relationships().len(), 1);
        assert!(rg.relationships()[0].deferred);
    }

    #[test]
    fn test_same_key_different_instances_share_node() {
        let schema = schema();
        let mut graph = EntityGraph::new();
        let p1 = person(&mut graph, "p1");
        let p1_copy = person(&mut graph, "p1");
        let p2 = person(&mut graph, "p2");
        let p3 = person(&mut graph, "p3");
        graph.link(p3, "was_onboarded_by", p1);
        graph.link(p3, "was_onboarded_by", p2);
        graph.link(p2, "was_onboarded_by", p1_copy);

        let rg = walk(&schema, &graph, p3, DuplicatePolicy::FirstWins).unwrap();
        assert_eq!(rg.nodes().len(), 3);
        assert_eq!(rg.node_for_slot(p1), rg.node_for_slot(p1_copy));
    }

    #[test]
    fn test_first_instance_wins_on_divergent_attributes() {
        let schema = schema();
        let mut graph = EntityGraph::new();
        let first = graph.add(Entity::new("Person").with_id("p1").with_property("age", 30));
        let second = graph.add(Entity::new("Person").with_id("p1").with_property("age", 31));
        let root = person(&mut graph, "root");
        graph.link(root, "was_onboarded_by", first);
        graph.link(root, "was_onboarded_by", second);

        let rg = walk(&schema, &graph, root, DuplicatePolicy::FirstWins).unwrap();
        let node = rg.node(rg.node_for_slot(second).unwrap()).unwrap();
        assert_eq!(node.properties.get("age"), Some(&Value::Int(30)));
        assert_eq!(node.origin, first);
    }

    #[test]
    fn test_fail_policy_rejects_divergent_attributes() {
        let schema = schema();
        let mut graph = EntityGraph::new();
        let first = graph.add(Entity::new("Person").with_id("p1").with_property("age", 30));
        let second = graph.add(Entity::new("Person").with_id("p1"));
        let root = person(&mut graph, "root");
        graph.link(root, "was_onboarded_by", first);
        graph.link(root, "was_onboarded_by", second);

        let err = walk(&schema, &graph, root, DuplicatePolicy::Fail).unwrap_err();
        assert!(matches!(
            err,
            OgmError::ConflictingEntityState { ref property, .. } if property == "age"
        ));
    }

    #[test]
    fn test_fail_policy_accepts_identical_duplicates() {
        let schema = schema();
        let mut graph = EntityGraph::new();
        let first = graph.add(Entity::new("Person").with_id("p1").with_property("age", 30));
        let second = graph.add(Entity::new("Person").with_id("p1").with_property("age", 30));
        let root = person(&mut graph, "root");
        graph.link(root, "was_onboarded_by", first);
        graph.link(root, "was_onboarded_by", second);

        assert!(walk(&schema, &graph, root, DuplicatePolicy::Fail).is_ok());
    }

    #[test]
    fn test_fail_policy_rejects_divergent_links() {
        let schema = schema();
        let mut graph = EntityGraph::new();
        let first = person(&mut graph, "p1");
        let second = person(&mut graph, "p1");
        let only_via_second = person(&mut graph, "hidden");
        let root = person(&mut graph, "root");
        graph.link(root, "was_onboarded_by", first);
        graph.link(root, "was_onboarded_by", second);
        graph.link(second, "was_onboarded_by", only_via_second);

        let err = walk(&schema, &graph, root, DuplicatePolicy::Fail).unwrap_err();
        assert!(matches!(
            err,
            OgmError::ConflictingEntityState { ref property, duplicate, .. }
                if property == "link was_onboarded_by" && duplicate == second
        ));
    }

    #[test]
    fn test_first_wins_does_not_follow_duplicate_links() {
        let schema = schema();
        let mut graph = EntityGraph::new();
        let first = person(&mut graph, "p1");
        let second = person(&mut graph, "p1");
        let only_via_second = person(&mut graph, "hidden");
        let root = person(&mut graph, "root");
        graph.link(root, "was_onboarded_by", first);
        graph.link(root, "was_onboarded_by", second);
        graph.link(second, "was_onboarded_by", only_via_second);

        let rg = walk(&schema, &graph, root, DuplicatePolicy::FirstWins).unwrap();
        assert_eq!(rg.nodes().len(), 2);
        assert_eq!(rg.node_for_slot(only_via_second), None);
    }

    #[test]
    fn test_fail_policy_accepts_links_to_same_identity() {
        let schema = schema();
        let mut graph = EntityGraph::new();
        let boss = person(&mut graph, "boss");
        let boss_copy = person(&mut graph, "boss");
        let first = person(&mut graph, "p1");
        let second = person(&mut graph, "p1");
        let root = person(&mut graph, "root");
        graph.link(first, "was_onboarded_by", boss);
        graph.link(second, "was_onboarded_by", boss_copy);
        graph.link(root, "was_onboarded_by", first);
        graph.link(root, "was_onboarded_by", second);

        let rg = walk(&schema, &graph, root, DuplicatePolicy::Fail).unwrap();
        assert_eq!(rg.nodes().len(), 3);
    }

    #[test]
    fn test_repeated_relationship_is_recorded_once() {
        let schema = schema();
        let mut graph = EntityGraph::new();
        let root = person(&mut graph, "root");
        let other = person(&mut graph, "other");
        let other_copy = person(&mut graph, "other");
        graph.link(root, "was_onboarded_by", other);
        graph.link(root, "was_onboarded_by", other_copy);

        let rg = walk(&schema, &graph, root, DuplicatePolicy::FirstWins).unwrap();
        assert_eq!(rg.relationships().len(), 1);
    }

    #[test]
    fn test_parallel_relationships_with_distinct_properties_are_kept() {
        let schema = schema();
        let mut graph = EntityGraph::new();
        let root = person(&mut graph, "root");
        let other = person(&mut graph, "other");
        for since in [2001, 2010] {
            let props = Properties::from([("since".to_string(), Value::Int(since))]);
            graph.link_with_properties(root, "known_by", other, props);
        }

        let rg = walk(&schema, &graph, root, DuplicatePolicy::FirstWins).unwrap();
        assert_eq!(rg.relationships().len(), 2);
    }

    #[test]
    fn test_clears_only_for_nodes_that_may_be_stored() {
        let schema = schema();
        let mut graph = EntityGraph::new();
        let fresh = graph.add(Entity::new("Location"));
        let stored = graph.add(Entity::new("Location").with_id(5));
        let root = person(&mut graph, "root");
        graph.link(fresh, "previous", stored);

        let rg = walk_all(&schema, &graph, &[fresh, root], DuplicatePolicy::FirstWins).unwrap();
        let stored_node = rg.node_for_slot(stored).unwrap();
        let root_node = rg.node_for_slot(root).unwrap();

        assert!(rg.clears().iter().all(|c| c.node != rg.node_for_slot(fresh).unwrap()));
        let location_clears: Vec<&ClearOp> =
            rg.clears().iter().filter(|c| c.node == stored_node).collect();
        assert_eq!(location_clears.len(), 1);
        assert_eq!(location_clears[0].rel_type.as_deref(), Some("PREVIOUS_LOCATION"));
        assert_eq!(location_clears[0].target_label, "Location");

        let person_clears: Vec<&ClearOp> =
            rg.clears().iter().filter(|c| c.node == root_node).collect();
        assert_eq!(person_clears.len(), 3);
        let dynamic = person_clears.iter().find(|c| c.field == "rated_by").unwrap();
        assert_eq!(dynamic.rel_type, None);
        assert_eq!(dynamic.direction, Direction::Incoming);
    }

    #[test]
    fn test_generated_id_chain() {
        let schema = schema();
        let mut graph = EntityGraph::new();
        let l1 = graph.add(Entity::new("Location").with_property("latitude", 10.0));
        let l2 = graph.add(Entity::new("Location").with_property("latitude", 20.0));
        graph.link(l1, "previous", l2);

        let rg = walk(&schema, &graph, l1, DuplicatePolicy::FirstWins).unwrap();
        assert_eq!(rg.visits(), 2);
        let rel = &rg.relationships()[0];
        assert_eq!(rel.rel_type, "PREVIOUS_LOCATION");
        assert_eq!(rel.from, rg.node_for_slot(l1).unwrap());
        assert_eq!(rel.to, rg.node_for_slot(l2).unwrap());
    }

    #[test]
    fn test_dynamic_relationship_type_from_key() {
        let schema = schema();
        let mut graph = EntityGraph::new();
        let root = person(&mut graph, "root");
        let good = person(&mut graph, "good");
        let bad = person(&mut graph, "bad");
        graph.link_keyed(root, "rated_by", "Good", good);
        graph.link_keyed(root, "rated_by", "Bad", bad);

        let rg = walk(&schema, &graph, root, DuplicatePolicy::FirstWins).unwrap();
        let types: Vec<&str> = rg.relationships().iter().map(|r| r.rel_type.as_str()).collect();
        assert_eq!(types, vec!["Good", "Bad"]);
        assert!(rg
            .relationships()
            .iter()
            .all(|r| r.direction == Direction::Incoming));
    }

    #[test]
    fn test_dynamic_relationship_requires_key() {
        let schema = schema();
        let mut graph = EntityGraph::new();
        let root = person(&mut graph, "root");
        let other = person(&mut graph, "other");
        graph.link(root, "rated_by", other);

        assert!(matches!(
            walk(&schema, &graph, root, DuplicatePolicy::FirstWins),
            Err(OgmError::Schema(SchemaError::InvalidIdentifier { .. }))
        ));
    }

    #[test]
    fn test_relationship_properties_are_carried() {
        let schema = schema();
        let mut graph = EntityGraph::new();
        let root = person(&mut graph, "root");
        let other = person(&mut graph, "other");
        let mut props = Properties::new();
        props.insert("since".to_string(), Value::Int(2019));
        graph.link_with_properties(root, "known_by", other, props.clone());

        let rg = walk(&schema, &graph, root, DuplicatePolicy::FirstWins).unwrap();
        assert_eq!(rg.relationships()[0].properties, props);
    }

    #[test]
    fn test_missing_key_on_cycle_is_cyclic_conflict() {
        let schema = schema();
        let mut graph = EntityGraph::new();
        let a = person(&mut graph, "a");
        let keyless = graph.add(Entity::new("Person"));
        graph.link(a, "was_onboarded_by", keyless);
        graph.link(keyless, "was_onboarded_by", a);

        let err = walk(&schema, &graph, a, DuplicatePolicy::FirstWins).unwrap_err();
        assert!(matches!(err, OgmError::CyclicKeyConflict { slot, .. } if slot == keyless));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_missing_key_off_cycle_is_invalid_key() {
        let schema = schema();
        let mut graph = EntityGraph::new();
        let a = person(&mut graph, "a");
        let keyless = graph.add(Entity::new("Person"));
        graph.link(a, "was_onboarded_by", keyless);

        assert!(matches!(
            walk(&schema, &graph, a, DuplicatePolicy::FirstWins),
            Err(OgmError::InvalidKey { .. })
        ));
    }

    #[test]
    fn test_dangling_and_mistyped_links() {
        let schema = schema();
        let mut graph = EntityGraph::new();
        let a = person(&mut graph, "a");
        graph.link(a, "was_onboarded_by", EntityRef(99));
        assert!(matches!(
            walk(&schema, &graph, a, DuplicatePolicy::FirstWins),
            Err(OgmError::DanglingReference { .. })
        ));

        let mut graph = EntityGraph::new();
        let a = person(&mut graph, "a");
        let loc = graph.add(Entity::new("Location"));
        graph.link(a, "was_onboarded_by", loc);
        assert!(matches!(
            walk(&schema, &graph, a, DuplicatePolicy::FirstWins),
            Err(OgmError::Schema(SchemaError::TargetMismatch { .. }))
        ));
    }

    #[test]
    fn test_walk_all_shares_identities_across_roots() {
        let schema = schema();
        let mut graph = EntityGraph::new();
        let shared = person(&mut graph, "shared");
        let r1 = person(&mut graph, "r1");
        let r2 = person(&mut graph, "r2");
        graph.link(r1, "was_onboarded_by", shared);
        graph.link(r2, "was_onboarded_by", shared);

        let rg = walk_all(&schema, &graph, &[r1, r2], DuplicatePolicy::FirstWins).unwrap();
        assert_eq!(rg.nodes().len(), 3);
        assert_eq!(rg.roots().len(), 2);
        assert_eq!(rg.relationships().len(), 2);
    }
}

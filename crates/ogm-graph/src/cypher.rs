//! Cypher generation for node and relationship operations.
//!
//! Every node statement returns the internal id of the node it touched as
//! `internal_id`, which later relationship statements match on. Labels,
//! property names and relationship types are backtick-quoted; values always
//! travel as parameters.
//!
//! Relationships are created, never merged: the walk emits each stored
//! relationship once, and a re-saved node's stale relationships are deleted
//! by its clears first.

use neo4rs::{query, BoltList, BoltMap, BoltNull, BoltString, BoltType, Query};
use ogm_core::{ClearOp, Direction, IdStrategy, NodeOp, Properties, RelationshipOp, Value};

use crate::client::GraphError;

/// Column carrying the internal id of a written node.
pub const INTERNAL_ID: &str = "internal_id";

/// Column carrying the number of relationships a clear deleted.
pub const REMOVED: &str = "removed";

/// A Cypher string plus its parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub cypher: String,
    pub params: Vec<(String, BoltType)>,
}

impl Statement {
    fn new(cypher: String) -> Self {
        Self {
            cypher,
            params: Vec::new(),
        }
    }

    fn param(mut self, key: &str, value: BoltType) -> Self {
        self.params.push((key.to_string(), value));
        self
    }

    pub fn into_query(self) -> Query {
        let mut q = query(&self.cypher);
        for (key, value) in self.params {
            q = q.param(&key, value);
        }
        q
    }
}

/// Statement writing one node.
///
/// Keyed nodes are merged on their primary label and key property. Nodes with
/// store-generated ids are created when new and matched by internal id
/// otherwise.
pub fn node_statement(op: &NodeOp) -> Result<Statement, GraphError> {
    let primary = quote(op.primary_label());
    let extra_labels = set_extra_labels(op);
    let props = props_to_bolt(&op.properties);

    let stmt = match (op.strategy, &op.key) {
        (IdStrategy::Generated, None) => {
            let labels: String = op.labels.iter().map(|l| format!(":{}", quote(l))).collect();
            Statement::new(format!(
                "CREATE (n{labels}) SET n = $props RETURN id(n) AS {INTERNAL_ID}"
            ))
            .param("props", props)
        }
        (IdStrategy::Generated, Some(Value::Int(id))) => Statement::new(format!(
            "MATCH (n:{primary}) WHERE id(n) = $id SET n += $props{extra_labels} RETURN id(n) AS {INTERNAL_ID}"
        ))
        .param("id", BoltType::from(*id))
        .param("props", props),
        (IdStrategy::Generated, Some(other)) => {
            return Err(GraphError::Serialization(format!(
                "{} carries a {} store id",
                op.identity,
                other.kind()
            )))
        }
        (_, Some(key)) => Statement::new(format!(
            "MERGE (n:{primary} {{{}: $key}}) SET n += $props{extra_labels} RETURN id(n) AS {INTERNAL_ID}",
            quote(&op.id_property)
        ))
        .param("key", to_bolt(key))
        .param("props", props),
        (_, None) => {
            return Err(GraphError::Constraint(format!(
                "{} has no value for {}",
                op.identity, op.id_property
            )))
        }
    };
    Ok(stmt)
}

/// Statement deleting the relationships node `start` holds through one field.
pub fn clear_statement(op: &ClearOp, start: i64) -> Statement {
    let rel = match &op.rel_type {
        Some(rel_type) => format!("[r:{}]", quote(rel_type)),
        None => "[r]".to_string(),
    };
    let target = format!("(:{})", quote(&op.target_label));
    let pattern = match op.direction {
        Direction::Outgoing => format!("(a)-{rel}->{target}"),
        Direction::Incoming => format!("(a)<-{rel}-{target}"),
    };
    Statement::new(format!(
        "MATCH {pattern} WHERE id(a) = $start DELETE r RETURN count(r) AS {REMOVED}"
    ))
    .param("start", BoltType::from(start))
}

/// Statement writing one relationship between two already written nodes.
///
/// `start` and `end` are the internal ids of the relationship's endpoints in
/// arrow order (see [`RelationshipOp::endpoints`]).
pub fn relationship_statement(op: &RelationshipOp, start: i64, end: i64) -> Statement {
    Statement::new(format!(
        "MATCH (a) WHERE id(a) = $start MATCH (b) WHERE id(b) = $end CREATE (a)-[r:{}]->(b) SET r = $props",
        quote(&op.rel_type)
    ))
    .param("start", BoltType::from(start))
    .param("end", BoltType::from(end))
    .param("props", props_to_bolt(&op.properties))
}

pub fn to_bolt(value: &Value) -> BoltType {
    match value {
        Value::Null => BoltType::Null(BoltNull),
        Value::Bool(b) => BoltType::from(*b),
        Value::Int(i) => BoltType::from(*i),
        Value::Float(f) => BoltType::from(*f),
        Value::String(s) => BoltType::from(s.clone()),
        Value::List(items) => {
            let mut list = BoltList::new();
            for item in items {
                list.push(to_bolt(item));
            }
            BoltType::List(list)
        }
    }
}

pub fn props_to_bolt(props: &Properties) -> BoltType {
    let mut map = BoltMap::new();
    for (key, value) in props {
        map.put(BoltString::from(key.as_str()), to_bolt(value));
    }
    BoltType::Map(map)
}

pub(crate) fn quote(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

fn set_extra_labels(op: &NodeOp) -> String {
    let extra: String = op
        .labels
        .iter()
        .skip(1)
        .map(|l| format!(":{}", quote(l)))
        .collect();
    if extra.is_empty() {
        extra
    } else {
        format!(" SET n{extra}")
    }
}

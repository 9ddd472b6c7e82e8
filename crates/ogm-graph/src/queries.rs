//! Read-back queries for saved entities.

use neo4rs::query;
use ogm_core::Value;

use crate::client::{GraphClient, GraphError};
use crate::cypher::{quote, to_bolt, INTERNAL_ID};

/// A lightweight record returned from node queries.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct NodeRecord {
    pub internal_id: i64,
    pub labels: Vec<String>,
    pub properties: serde_json::Value,
}

impl GraphClient {
    /// First node with `label` whose `property` equals `value`.
    pub async fn find_node(
        &self,
        label: &str,
        property: &str,
        value: &Value,
    ) -> Result<Option<NodeRecord>, GraphError> {
        let cypher = format!(
            "MATCH (n:{}) WHERE n.{} = $value
             RETURN n, id(n) AS {INTERNAL_ID} LIMIT 1",
            quote(label),
            quote(property)
        );
        let q = query(&cypher).param("value", to_bolt(value));

        match self.query_one(q).await? {
            Some(row) => Ok(Some(row_to_record(&row, "n")?)),
            None => Ok(None),
        }
    }

    /// Get a node by label and internal id.
    pub async fn get_node_by_internal_id(
        &self,
        label: &str,
        internal_id: i64,
    ) -> Result<NodeRecord, GraphError> {
        let cypher = format!(
            "MATCH (n:{}) WHERE id(n) = $id
             RETURN n, id(n) AS {INTERNAL_ID}",
            quote(label)
        );
        let q = query(&cypher).param("id", internal_id);

        match self.query_one(q).await? {
            Some(row) => row_to_record(&row, "n"),
            None => Err(GraphError::NotFound {
                label: label.to_string(),
                id: internal_id.to_string(),
            }),
        }
    }

    /// Nodes reached from the node identified by (`label`, `property`,
    /// `value`) over outgoing `rel_type` relationships.
    pub async fn related(
        &self,
        label: &str,
        property: &str,
        value: &Value,
        rel_type: &str,
    ) -> Result<Vec<NodeRecord>, GraphError> {
        let cypher = format!(
            "MATCH (a:{})-[:{}]->(n) WHERE a.{} = $value
             RETURN n, id(n) AS {INTERNAL_ID}
             ORDER BY id(n)",
            quote(label),
            quote(rel_type),
            quote(property)
        );
        let q = query(&cypher).param("value", to_bolt(value));

        let rows = self.query_rows(q).await?;
        rows.iter().map(|row| row_to_record(row, "n")).collect()
    }

    /// Count nodes of a given label.
    pub async fn count_nodes(&self, label: &str) -> Result<i64, GraphError> {
        let cypher = format!("MATCH (n:{}) RETURN count(n) AS cnt", quote(label));
        match self.query_one(query(&cypher)).await? {
            Some(row) => Ok(row.get::<i64>("cnt").unwrap_or(0)),
            None => Ok(0),
        }
    }

    /// Count relationships of a given type.
    pub async fn count_relationships(&self, rel_type: &str) -> Result<i64, GraphError> {
        let cypher = format!("MATCH ()-[r:{}]->() RETURN count(r) AS cnt", quote(rel_type));
        match self.query_one(query(&cypher)).await? {
            Some(row) => Ok(row.get::<i64>("cnt").unwrap_or(0)),
            None => Ok(0),
        }
    }

    /// Delete every node with `label` and its relationships.
    pub async fn delete_all(&self, label: &str) -> Result<(), GraphError> {
        let cypher = format!("MATCH (n:{}) DETACH DELETE n", quote(label));
        self.run(query(&cypher)).await
    }
}

fn row_to_record(row: &neo4rs::Row, column: &str) -> Result<NodeRecord, GraphError> {
    let node: neo4rs::Node = row
        .get(column)
        .map_err(|e| GraphError::Serialization(format!("Failed to deserialize node: {e}")))?;
    let internal_id: i64 = row.get(INTERNAL_ID).unwrap_or_else(|_| node.id());

    let mut props = serde_json::Map::new();
    for key in node.keys() {
        if let Some(value) = property_to_json(&node, key) {
            props.insert(key.to_string(), value);
        }
    }

    Ok(NodeRecord {
        internal_id,
        labels: node.labels().into_iter().map(str::to_string).collect(),
        properties: serde_json::Value::Object(props),
    })
}

/// Properties written by the mapper are scalars or lists of scalars.
fn property_to_json(node: &neo4rs::Node, key: &str) -> Option<serde_json::Value> {
    if let Ok(v) = node.get::<i64>(key) {
        return Some(v.into());
    }
    if let Ok(v) = node.get::<f64>(key) {
        return Some(v.into());
    }
    if let Ok(v) = node.get::<bool>(key) {
        return Some(v.into());
    }
    if let Ok(v) = node.get::<String>(key) {
        return Some(v.into());
    }
    if let Ok(v) = node.get::<Vec<i64>>(key) {
        return Some(v.into());
    }
    if let Ok(v) = node.get::<Vec<String>>(key) {
        return Some(v.into());
    }
    None
}

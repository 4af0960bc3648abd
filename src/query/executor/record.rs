//! Record structures for query execution
//!
//! Records flow through the pull-based operator pipeline

use crate::graph::{Node, NodeId, PropertyValue, Relationship, RelationshipId};
use rustc_hash::FxHashMap;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Value types that can be bound to variables or returned in a column
#[derive(Debug, Clone)]
pub enum Value {
    Node(Node),
    Relationship(Relationship),
    Property(PropertyValue),
    List(Vec<Value>),
    /// Missing property or unmatched optional branch
    Null,
}

// Nodes and relationships compare by id
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Node(a), Value::Node(b)) => a.id == b.id,
            (Value::Relationship(a), Value::Relationship(b)) => a.id == b.id,
            (Value::Property(a), Value::Property(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Null, Value::Null) => true,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Value::Node(node) => {
                0u8.hash(state);
                node.id.hash(state);
            }
            Value::Relationship(rel) => {
                1u8.hash(state);
                rel.id.hash(state);
            }
            Value::Property(p) => {
                2u8.hash(state);
                p.hash(state);
            }
            Value::List(items) => {
                3u8.hash(state);
                items.hash(state);
            }
            Value::Null => 4u8.hash(state),
        }
    }
}

impl Value {
    pub fn as_node(&self) -> Option<&Node> {
        match self {
            Value::Node(node) => Some(node),
            _ => None,
        }
    }

    pub fn as_relationship(&self) -> Option<&Relationship> {
        match self {
            Value::Relationship(rel) => Some(rel),
            _ => None,
        }
    }

    pub fn as_property(&self) -> Option<&PropertyValue> {
        match self {
            Value::Property(prop) => Some(prop),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_property().and_then(PropertyValue::as_string)
    }

    pub fn as_integer(&self) -> Option<i64> {
        self.as_property().and_then(PropertyValue::as_integer)
    }

    /// Numeric value, integers widened
    pub fn as_float(&self) -> Option<f64> {
        self.as_property().and_then(PropertyValue::as_float)
    }

    pub fn as_boolean(&self) -> Option<bool> {
        self.as_property().and_then(PropertyValue::as_boolean)
    }

    pub fn node_id(&self) -> Option<NodeId> {
        self.as_node().map(|node| node.id)
    }

    pub fn relationship_id(&self) -> Option<RelationshipId> {
        self.as_relationship().map(|rel| rel.id)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Ordering used by ORDER BY, MIN and MAX
    ///
    /// Numbers compare numerically across integer and float, strings
    /// lexically, booleans false first. Values of different kinds are
    /// ranked by kind; null sorts last.
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Property(a), Value::Property(b)) => compare_properties(a, b).unwrap_or_else(|| a.cmp(b)),
            (Value::Node(a), Value::Node(b)) => a.id.cmp(&b.id),
            (Value::Relationship(a), Value::Relationship(b)) => a.id.cmp(&b.id),
            (Value::List(a), Value::List(b)) => {
                for (x, y) in a.iter().zip(b) {
                    let ord = x.sort_cmp(y);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            _ => self.rank().cmp(&other.rank()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Property(_) => 0,
            Value::Node(_) => 1,
            Value::Relationship(_) => 2,
            Value::List(_) => 3,
            Value::Null => 4,
        }
    }
}

/// Order of two comparable property values; `None` when the types differ
pub(crate) fn compare_properties(a: &PropertyValue, b: &PropertyValue) -> Option<Ordering> {
    match (a, b) {
        (PropertyValue::Integer(x), PropertyValue::Integer(y)) => Some(x.cmp(y)),
        (PropertyValue::String(x), PropertyValue::String(y)) => Some(x.cmp(y)),
        (PropertyValue::Boolean(x), PropertyValue::Boolean(y)) => Some(x.cmp(y)),
        (x, y) if x.is_numeric() && y.is_numeric() => {
            let (x, y) = (x.as_float()?, y.as_float()?);
            Some(x.total_cmp(&y))
        }
        _ => None,
    }
}

impl From<PropertyValue> for Value {
    fn from(value: PropertyValue) -> Self {
        Value::Property(value)
    }
}

impl From<Option<PropertyValue>> for Value {
    fn from(value: Option<PropertyValue>) -> Self {
        value.map_or(Value::Null, Value::Property)
    }
}

fn write_properties(f: &mut fmt::Formatter<'_>, properties: &crate::graph::PropertyMap) -> fmt::Result {
    let mut keys: Vec<&String> = properties.keys().collect();
    keys.sort();
    write!(f, "{{")?;
    for (i, key) in keys.into_iter().enumerate() {
        if i > 0 {
            write!(f, ",")?;
        }
        write!(f, "{}:{}", key, properties[key])?;
    }
    write!(f, "}}")
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Node(node) => {
                write!(f, "{}", node.id)?;
                write_properties(f, &node.properties)
            }
            Value::Relationship(rel) => {
                write!(f, ":{}[{}]", rel.rel_type, rel.id.as_u64())?;
                write_properties(f, &rel.properties)
            }
            Value::Property(value) => write!(f, "{}", value),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Null => write!(f, "<null>"),
        }
    }
}

/// A single record flowing through the query pipeline
#[derive(Debug, Clone, Default)]
pub struct Record {
    /// Variable bindings (variable name -> value)
    bindings: FxHashMap<String, Value>,
    /// Relationships already matched in this row
    used_relationships: Vec<RelationshipId>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, variable: impl Into<String>, value: Value) {
        self.bindings.insert(variable.into(), value);
    }

    /// Bind a relationship walked by a `match` pattern; it cannot be walked
    /// again in this row
    pub fn bind_matched(&mut self, variable: impl Into<String>, rel: Relationship) {
        self.mark_matched(rel.id);
        self.bindings.insert(variable.into(), Value::Relationship(rel));
    }

    /// Record that an already bound relationship was walked by a pattern
    pub fn mark_matched(&mut self, rel: RelationshipId) {
        if !self.used_relationships.contains(&rel) {
            self.used_relationships.push(rel);
        }
    }

    pub fn get(&self, variable: &str) -> Option<&Value> {
        self.bindings.get(variable)
    }

    /// Whether `rel` already takes part in this row's match
    pub fn uses_relationship(&self, rel: RelationshipId) -> bool {
        self.used_relationships.contains(&rel)
    }

    /// Values of `columns`, null where unbound
    pub fn values(&self, columns: &[String]) -> Vec<Value> {
        columns
            .iter()
            .map(|column| self.bindings.get(column).cloned().unwrap_or(Value::Null))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_values_compare_by_id() {
        let mut a = Node::new(NodeId::new(1), 1, 0);
        let b = Node::new(NodeId::new(1), 2, 0);
        a.set_property("character", "Doctor");
        assert_eq!(Value::Node(a), Value::Node(b));
    }

    #[test]
    fn test_sort_order_mixes_numbers() {
        let one = Value::from(PropertyValue::Integer(1));
        let half = Value::from(PropertyValue::Float(1.5));
        assert_eq!(one.sort_cmp(&half), Ordering::Less);
        assert_eq!(half.sort_cmp(&Value::Null), Ordering::Less);
        assert_eq!(Value::Null.sort_cmp(&Value::Null), Ordering::Equal);
    }

    #[test]
    fn test_relationship_uniqueness_tracking() {
        let rel = Relationship::new(RelationshipId::new(7), NodeId::new(1), NodeId::new(2), "PLAYED", 1, 0);
        let mut record = Record::new();
        record.bind_matched("r", rel);
        assert!(record.uses_relationship(RelationshipId::new(7)));
        assert!(!record.uses_relationship(RelationshipId::new(8)));
    }

    #[test]
    fn test_plain_bind_does_not_claim_relationship() {
        let rel = Relationship::new(RelationshipId::new(7), NodeId::new(1), NodeId::new(2), "PLAYED", 1, 0);
        let mut record = Record::new();
        record.bind("r", Value::Relationship(rel));
        assert!(!record.uses_relationship(RelationshipId::new(7)));

        record.mark_matched(RelationshipId::new(7));
        record.mark_matched(RelationshipId::new(7));
        assert!(record.uses_relationship(RelationshipId::new(7)));
        assert_eq!(record.used_relationships.len(), 1);
    }

    #[test]
    fn test_display() {
        let mut node = Node::new(NodeId::new(3), 1, 0);
        node.set_property("character", "Rose Tyler");
        node.set_property("age", 19);
        assert_eq!(Value::Node(node).to_string(), "Node[3]{age:19,character:\"Rose Tyler\"}");
        let list = Value::List(vec![Value::from(PropertyValue::from("Rose")), Value::Null]);
        assert_eq!(list.to_string(), "[\"Rose\",<null>]");
    }
}

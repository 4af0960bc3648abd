//! Property value types for nodes and relationships

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Typed scalar stored under a property key
///
/// Equality is strict (an `Integer` never equals a `Float`), while ordering
/// compares numbers numerically across both variants and only falls back to
/// the variant to break ties. Cross-type ordering is numbers, then strings,
/// then booleans.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PropertyValue {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
}

impl PropertyValue {
    /// Get string value if this is a string
    pub fn as_string(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            PropertyValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view, widening integers
    pub fn as_float(&self) -> Option<f64> {
        match self {
            PropertyValue::Float(f) => Some(*f),
            PropertyValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            PropertyValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, PropertyValue::Integer(_) | PropertyValue::Float(_))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            PropertyValue::String(_) => "String",
            PropertyValue::Integer(_) => "Integer",
            PropertyValue::Float(_) => "Float",
            PropertyValue::Boolean(_) => "Boolean",
        }
    }

    /// The string an inverted index stores for this value
    pub fn index_term(&self) -> String {
        match self {
            PropertyValue::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            PropertyValue::Integer(_) | PropertyValue::Float(_) => 0,
            PropertyValue::String(_) => 1,
            PropertyValue::Boolean(_) => 2,
        }
    }

    fn variant(&self) -> u8 {
        match self {
            PropertyValue::Integer(_) => 0,
            PropertyValue::Float(_) => 1,
            PropertyValue::String(_) => 2,
            PropertyValue::Boolean(_) => 3,
        }
    }
}

impl PartialEq for PropertyValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (PropertyValue::String(a), PropertyValue::String(b)) => a == b,
            (PropertyValue::Integer(a), PropertyValue::Integer(b)) => a == b,
            (PropertyValue::Float(a), PropertyValue::Float(b)) => a.total_cmp(b) == Ordering::Equal,
            (PropertyValue::Boolean(a), PropertyValue::Boolean(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for PropertyValue {}

impl Hash for PropertyValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.variant().hash(state);
        match self {
            PropertyValue::String(s) => s.hash(state),
            PropertyValue::Integer(i) => i.hash(state),
            PropertyValue::Float(f) => f.to_bits().hash(state),
            PropertyValue::Boolean(b) => b.hash(state),
        }
    }
}

impl Ord for PropertyValue {
    fn cmp(&self, other: &Self) -> Ordering {
        let by_value = match (self, other) {
            (PropertyValue::Integer(a), PropertyValue::Integer(b)) => a.cmp(b),
            (PropertyValue::String(a), PropertyValue::String(b)) => a.cmp(b),
            (PropertyValue::Boolean(a), PropertyValue::Boolean(b)) => a.cmp(b),
            (a, b) if a.is_numeric() && b.is_numeric() => {
                let (x, y) = (a.as_float().unwrap_or_default(), b.as_float().unwrap_or_default());
                x.total_cmp(&y)
            }
            (a, b) => a.rank().cmp(&b.rank()),
        };
        by_value.then_with(|| self.variant().cmp(&other.variant()))
    }
}

impl PartialOrd for PropertyValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::String(s) => write!(f, "\"{}\"", s),
            PropertyValue::Integer(i) => write!(f, "{}", i),
            PropertyValue::Float(fl) => write!(f, "{}", fl),
            PropertyValue::Boolean(b) => write!(f, "{}", b),
        }
    }
}

// Convenience conversions
impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        PropertyValue::String(s)
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        PropertyValue::String(s.to_string())
    }
}

impl From<i64> for PropertyValue {
    fn from(i: i64) -> Self {
        PropertyValue::Integer(i)
    }
}

impl From<i32> for PropertyValue {
    fn from(i: i32) -> Self {
        PropertyValue::Integer(i as i64)
    }
}

impl From<f64> for PropertyValue {
    fn from(f: f64) -> Self {
        PropertyValue::Float(f)
    }
}

impl From<bool> for PropertyValue {
    fn from(b: bool) -> Self {
        PropertyValue::Boolean(b)
    }
}

/// Property map type
pub type PropertyMap = HashMap<String, PropertyValue>;

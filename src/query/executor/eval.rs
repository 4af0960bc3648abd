//! Expression evaluation over a record
//!
//! Logic is three-valued: comparisons against `Null` yield `Null`, and
//! `and`/`or`/`not` propagate it the usual way. A filter keeps a record only
//! when its predicate is true.

use crate::error::{GraphError, GraphResult};
use crate::graph::PropertyValue;
use crate::query::ast::{BinaryOp, Expression, PropertyMode};
use crate::query::executor::record::{compare_properties, Record, Value};
use regex::Regex;
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::cmp::Ordering;

/// Built-in scalar functions: (name, min args, max args)
const SCALAR_FUNCTIONS: &[(&str, usize, usize)] = &[("has", 1, 1), ("id", 1, 1), ("type", 1, 1), ("coalesce", 1, usize::MAX)];

/// Arity bounds of a scalar function, `None` when unknown
pub(crate) fn scalar_arity(name: &str) -> Option<(usize, usize)> {
    SCALAR_FUNCTIONS
        .iter()
        .find(|(function, _, _)| *function == name)
        .map(|(_, min, max)| (*min, *max))
}

/// Anchor a user pattern so that `=~` matches the whole string
pub(crate) fn compile_regex(pattern: &str) -> GraphResult<Regex> {
    Regex::new(&format!("^(?:{})$", pattern))
        .map_err(|e| GraphError::QuerySyntax(format!("invalid regular expression '{}': {}", pattern, e)))
}

/// Truth value of a predicate result; `None` for null
pub(crate) fn truth(value: &Value) -> Option<bool> {
    match value {
        Value::Null => None,
        Value::Property(PropertyValue::Boolean(b)) => Some(*b),
        // A present non-boolean value counts as true, so `where x.p` tests existence
        _ => Some(true),
    }
}

fn boolean(b: bool) -> Value {
    Value::Property(PropertyValue::Boolean(b))
}

fn from_truth(t: Option<bool>) -> Value {
    t.map_or(Value::Null, boolean)
}

/// Evaluates expressions; compiled regular expressions are cached per pattern
#[derive(Debug, Default)]
pub struct Evaluator {
    regexes: RefCell<FxHashMap<String, Regex>>,
}

impl Evaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn evaluate(&self, expr: &Expression, record: &Record) -> GraphResult<Value> {
        // Aggregates were computed upstream and bound under their canonical text
        if expr.aggregate().is_some() {
            let name = expr.to_string();
            return record
                .get(&name)
                .cloned()
                .ok_or_else(|| GraphError::QuerySyntax(format!("aggregate {} is only allowed in return", name)));
        }

        match expr {
            Expression::Literal(value) => Ok(Value::Property(value.clone())),
            Expression::Null => Ok(Value::Null),
            Expression::Variable(name) => record
                .get(name)
                .cloned()
                .ok_or_else(|| GraphError::UnboundVariable(name.clone())),
            Expression::Property { variable, key, .. } => self.property(record, variable, key),
            Expression::Function { name, args, .. } => self.function(name, args, record),
            Expression::CountStar => Err(GraphError::QuerySyntax("count(*) is only allowed in return".into())),
            Expression::Not(inner) => {
                let value = self.evaluate(inner, record)?;
                Ok(from_truth(truth(&value).map(|b| !b)))
            }
            Expression::Negate(inner) => match self.evaluate(inner, record)? {
                Value::Null => Ok(Value::Null),
                Value::Property(PropertyValue::Integer(i)) => i
                    .checked_neg()
                    .map(|n| Value::Property(PropertyValue::Integer(n)))
                    .ok_or_else(|| GraphError::TypeError(format!("integer overflow negating {}", i))),
                Value::Property(PropertyValue::Float(f)) => Ok(Value::Property(PropertyValue::Float(-f))),
                other => Err(GraphError::TypeError(format!("cannot negate {}", other))),
            },
            Expression::Binary { left, op, right } => self.binary(left, *op, right, record),
        }
    }

    /// Whether `predicate` holds for `record`
    pub fn matches(&self, predicate: &Expression, record: &Record) -> GraphResult<bool> {
        Ok(truth(&self.evaluate(predicate, record)?) == Some(true))
    }

    fn property(&self, record: &Record, variable: &str, key: &str) -> GraphResult<Value> {
        let bound = record
            .get(variable)
            .ok_or_else(|| GraphError::UnboundVariable(variable.to_string()))?;
        match bound {
            Value::Node(node) => Ok(node.get_property(key).cloned().into()),
            Value::Relationship(rel) => Ok(rel.get_property(key).cloned().into()),
            Value::Null => Ok(Value::Null),
            other => Err(GraphError::TypeError(format!(
                "cannot read property '{}' of {} ({} is not a node or relationship)",
                key, other, variable
            ))),
        }
    }

    fn function(&self, name: &str, args: &[Expression], record: &Record) -> GraphResult<Value> {
        match name {
            "has" => {
                let value = self.evaluate(&args[0], record)?;
                Ok(boolean(!value.is_null()))
            }
            "id" => match self.evaluate(&args[0], record)? {
                Value::Node(node) => Ok(Value::Property(PropertyValue::Integer(node.id.as_u64() as i64))),
                Value::Relationship(rel) => Ok(Value::Property(PropertyValue::Integer(rel.id.as_u64() as i64))),
                Value::Null => Ok(Value::Null),
                other => Err(GraphError::TypeError(format!("id() expects a node or relationship, got {}", other))),
            },
            "type" => match self.evaluate(&args[0], record)? {
                Value::Relationship(rel) => Ok(Value::Property(PropertyValue::String(rel.rel_type.name().to_string()))),
                Value::Null => Ok(Value::Null),
                other => Err(GraphError::TypeError(format!("type() expects a relationship, got {}", other))),
            },
            "coalesce" => {
                for arg in args {
                    let value = self.evaluate(arg, record)?;
                    if !value.is_null() {
                        return Ok(value);
                    }
                }
                Ok(Value::Null)
            }
            other => Err(GraphError::QuerySyntax(format!("unknown function '{}'", other))),
        }
    }

    fn binary(&self, left: &Expression, op: BinaryOp, right: &Expression, record: &Record) -> GraphResult<Value> {
        match op {
            BinaryOp::And => {
                let l = truth(&self.evaluate(left, record)?);
                if l == Some(false) {
                    return Ok(boolean(false));
                }
                let r = truth(&self.evaluate(right, record)?);
                Ok(match (l, r) {
                    (_, Some(false)) => boolean(false),
                    (Some(true), Some(true)) => boolean(true),
                    _ => Value::Null,
                })
            }
            BinaryOp::Or => {
                let l = truth(&self.evaluate(left, record)?);
                if l == Some(true) {
                    return Ok(boolean(true));
                }
                let r = truth(&self.evaluate(right, record)?);
                Ok(match (l, r) {
                    (_, Some(true)) => boolean(true),
                    (Some(false), Some(false)) => boolean(false),
                    _ => Value::Null,
                })
            }
            op if op.is_comparison() => {
                let l = self.evaluate(left, record)?;
                let r = self.evaluate(right, record)?;
                if let Some(forced) = missing_override(left, &l).or_else(|| missing_override(right, &r)) {
                    return Ok(boolean(forced));
                }
                self.compare(l, op, r)
            }
            op => {
                let l = self.evaluate(left, record)?;
                let r = self.evaluate(right, record)?;
                arithmetic(l, op, r)
            }
        }
    }

    fn compare(&self, left: Value, op: BinaryOp, right: Value) -> GraphResult<Value> {
        if left.is_null() || right.is_null() {
            return Ok(Value::Null);
        }
        match op {
            BinaryOp::Eq => Ok(boolean(values_equal(&left, &right))),
            BinaryOp::Ne => Ok(boolean(!values_equal(&left, &right))),
            BinaryOp::RegexMatch => {
                let (Some(text), Some(pattern)) = (left.as_str(), right.as_str()) else {
                    return Ok(Value::Null);
                };
                Ok(boolean(self.regex_match(text, pattern)?))
            }
            _ => {
                let ordering = match (left.as_property(), right.as_property()) {
                    (Some(a), Some(b)) => compare_properties(a, b),
                    _ => None,
                };
                Ok(from_truth(ordering.map(|ord| match op {
                    BinaryOp::Lt => ord == Ordering::Less,
                    BinaryOp::Le => ord != Ordering::Greater,
                    BinaryOp::Gt => ord == Ordering::Greater,
                    _ => ord != Ordering::Less,
                })))
            }
        }
    }

    fn regex_match(&self, text: &str, pattern: &str) -> GraphResult<bool> {
        let mut cache = self.regexes.borrow_mut();
        if let Some(regex) = cache.get(pattern) {
            return Ok(regex.is_match(text));
        }
        let regex = compile_regex(pattern)?;
        let matched = regex.is_match(text);
        cache.insert(pattern.to_string(), regex);
        Ok(matched)
    }
}

/// `x.p?` compares true and `x.p!` false when the property is missing
fn missing_override(expr: &Expression, value: &Value) -> Option<bool> {
    match (expr, value) {
        (Expression::Property { mode: PropertyMode::Nullable, .. }, Value::Null) => Some(true),
        (Expression::Property { mode: PropertyMode::Strict, .. }, Value::Null) => Some(false),
        _ => None,
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left.as_property(), right.as_property()) {
        (Some(a), Some(b)) if a.is_numeric() && b.is_numeric() => compare_properties(a, b) == Some(Ordering::Equal),
        _ => left == right,
    }
}

fn arithmetic(left: Value, op: BinaryOp, right: Value) -> GraphResult<Value> {
    use PropertyValue::{Float, Integer, String as Str};

    let (a, b) = match (left, right) {
        (Value::Null, _) | (_, Value::Null) => return Ok(Value::Null),
        (Value::Property(a), Value::Property(b)) => (a, b),
        (l, r) => return Err(GraphError::TypeError(format!("cannot apply arithmetic to {} and {}", l, r))),
    };

    let result = match (&a, &b) {
        (Str(x), other) if op == BinaryOp::Add => Str(format!("{}{}", x, other.index_term())),
        (other, Str(y)) if op == BinaryOp::Add => Str(format!("{}{}", other.index_term(), y)),
        (Integer(x), Integer(y)) => {
            let (x, y) = (*x, *y);
            let value = match op {
                BinaryOp::Add => x.checked_add(y),
                BinaryOp::Sub => x.checked_sub(y),
                BinaryOp::Mul => x.checked_mul(y),
                BinaryOp::Div => x.checked_div(y),
                _ => x.checked_rem(y),
            };
            Integer(value.ok_or_else(|| GraphError::TypeError(format!("integer overflow or division by zero in {} and {}", x, y)))?)
        }
        (x, y) if x.is_numeric() && y.is_numeric() => {
            let (x, y) = (x.as_float().unwrap_or_default(), y.as_float().unwrap_or_default());
            Float(match op {
                BinaryOp::Add => x + y,
                BinaryOp::Sub => x - y,
                BinaryOp::Mul => x * y,
                BinaryOp::Div => x / y,
                _ => x % y,
            })
        }
        (x, y) => {
            return Err(GraphError::TypeError(format!(
                "cannot apply arithmetic to {} and {}",
                x.type_name(),
                y.type_name()
            )))
        }
    };
    Ok(Value::Property(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Node, NodeId};
    use crate::query::parser::parse_query;

    fn predicate(text: &str) -> Expression {
        let query = parse_query(&format!("start n = node(*) where {} return n", text)).unwrap();
        query.predicate.unwrap()
    }

    fn record_with(properties: &[(&str, PropertyValue)]) -> Record {
        let mut node = Node::new(NodeId::new(1), 1, 0);
        for (key, value) in properties {
            node.set_property(*key, value.clone());
        }
        let mut record = Record::new();
        record.bind("n", Value::Node(node));
        record
    }

    #[test]
    fn test_missing_property_modes() {
        let eval = Evaluator::new();
        let record = record_with(&[("name", "Rose".into())]);
        assert!(!eval.matches(&predicate("n.age > 10"), &record).unwrap());
        assert!(eval.matches(&predicate("n.age? > 10"), &record).unwrap());
        assert!(!eval.matches(&predicate("n.age! > 10"), &record).unwrap());
        assert!(eval.matches(&predicate("n.name"), &record).unwrap());
        assert!(!eval.matches(&predicate("n.wikipedia"), &record).unwrap());
        assert!(eval.matches(&predicate("not has(n.wikipedia)"), &record).unwrap());
    }

    #[test]
    fn test_three_valued_logic() {
        let eval = Evaluator::new();
        let record = record_with(&[("year", 1963.into())]);
        assert!(eval.matches(&predicate("n.missing = 1 or n.year = 1963"), &record).unwrap());
        assert!(!eval.matches(&predicate("n.missing = 1 and n.year = 1963"), &record).unwrap());
        assert!(!eval.matches(&predicate("not(n.missing = 1)"), &record).unwrap());
    }

    #[test]
    fn test_numbers_compare_across_types() {
        let eval = Evaluator::new();
        let record = record_with(&[("salary", PropertyValue::Float(600000.0))]);
        assert!(eval.matches(&predicate("n.salary = 600000"), &record).unwrap());
        assert!(eval.matches(&predicate("n.salary >= 599999"), &record).unwrap());
        assert!(!eval.matches(&predicate("n.salary = '600000'"), &record).unwrap());
    }

    #[test]
    fn test_regex_is_anchored() {
        let eval = Evaluator::new();
        let record = record_with(&[("species", "Sontaran".into())]);
        assert!(eval.matches(&predicate("n.species =~ 'S.*n'"), &record).unwrap());
        assert!(!eval.matches(&predicate("n.species =~ 'Sont'"), &record).unwrap());
    }

    #[test]
    fn test_arithmetic() {
        let record = Record::new();
        let eval = Evaluator::new();
        let value = |text: &str| eval.evaluate(&predicate(text), &record);
        assert_eq!(value("7 / 2").unwrap().as_integer(), Some(3));
        assert_eq!(value("7 % 4 + 0.5").unwrap().as_float(), Some(3.5));
        assert_eq!(value("'Series ' + 4").unwrap().as_str(), Some("Series 4"));
        assert!(value("1 / 0").is_err());
        assert!(value("null + 1").unwrap().is_null());
    }
}

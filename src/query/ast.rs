//! Abstract syntax tree for queries
//!
//! `Display` on [`Expression`] renders the canonical text used as the
//! default column name of a return item, e.g. `count(episodes)` or
//! `avg(actor.salary?)`.

use crate::graph::{Direction, EntityClass, PropertyValue, RelationshipType};
use std::fmt;

/// A complete query
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    /// START bindings (cartesian product when several)
    pub start: Vec<StartItem>,
    /// MATCH paths
    pub paths: Vec<PathPattern>,
    /// WHERE predicate
    pub predicate: Option<Expression>,
    /// RETURN DISTINCT
    pub distinct: bool,
    /// RETURN items
    pub returns: Vec<ReturnItem>,
    /// ORDER BY items
    pub order_by: Vec<SortItem>,
    pub skip: Option<usize>,
    pub limit: Option<usize>,
}

/// `name = node:...` / `name = relationship:...`
#[derive(Debug, Clone, PartialEq)]
pub struct StartItem {
    pub variable: String,
    pub class: EntityClass,
    pub lookup: StartLookup,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StartLookup {
    /// `node:idx(key = 'value')`
    IndexExact {
        index: String,
        key: String,
        value: PropertyValue,
    },
    /// `node:idx('key:pattern')`
    IndexQuery { index: String, query: String },
    /// `node(1, 2)`
    Ids(Vec<u64>),
    /// `node(*)`
    All,
}

/// `(a)-[r:T]->(b)<--(c)`
#[derive(Debug, Clone, PartialEq)]
pub struct PathPattern {
    pub start: NodePattern,
    pub segments: Vec<PathSegment>,
}

impl PathPattern {
    /// Node patterns in path order
    pub fn nodes(&self) -> impl Iterator<Item = &NodePattern> {
        std::iter::once(&self.start).chain(self.segments.iter().map(|segment| &segment.node))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodePattern {
    pub variable: Option<String>,
}

/// One relationship hop and the node it leads to
#[derive(Debug, Clone, PartialEq)]
pub struct PathSegment {
    pub relationship: RelationshipPattern,
    pub node: NodePattern,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelationshipPattern {
    pub variable: Option<String>,
    /// Empty means any type
    pub types: Vec<RelationshipType>,
    /// Direction read left to right: `-->` outgoing, `<--` incoming, `--` both
    pub direction: Direction,
    /// `[?]`: the row survives without a match, with nulls bound
    pub optional: bool,
}

/// How a property reference treats a missing property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyMode {
    /// `x.p`: missing evaluates to null
    Plain,
    /// `x.p?`: comparisons against a missing property are true
    Nullable,
    /// `x.p!`: comparisons against a missing property are false
    Strict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    RegexMatch,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge | BinaryOp::RegexMatch
        )
    }

    fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Or => "or",
            BinaryOp::And => "and",
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::RegexMatch => "=~",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
        }
    }
}

/// Aggregate functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Aggregate {
    Count,
    Sum,
    Avg,
    Min,
    Max,
    Collect,
}

impl Aggregate {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "count" => Some(Aggregate::Count),
            "sum" => Some(Aggregate::Sum),
            "avg" => Some(Aggregate::Avg),
            "min" => Some(Aggregate::Min),
            "max" => Some(Aggregate::Max),
            "collect" => Some(Aggregate::Collect),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(PropertyValue),
    Null,
    Variable(String),
    Property {
        variable: String,
        key: String,
        mode: PropertyMode,
    },
    /// Function call; `name` is lower case
    Function {
        name: String,
        distinct: bool,
        args: Vec<Expression>,
    },
    /// `count(*)`
    CountStar,
    Not(Box<Expression>),
    Negate(Box<Expression>),
    Binary {
        left: Box<Expression>,
        op: BinaryOp,
        right: Box<Expression>,
    },
}

impl Expression {
    /// The aggregate this expression applies at its top level
    pub fn aggregate(&self) -> Option<Aggregate> {
        match self {
            Expression::CountStar => Some(Aggregate::Count),
            Expression::Function { name, .. } => Aggregate::from_name(name),
            _ => None,
        }
    }

    /// Whether any aggregate appears anywhere in this expression
    pub fn contains_aggregate(&self) -> bool {
        self.aggregate().is_some()
            || match self {
                Expression::Function { args, .. } => args.iter().any(Expression::contains_aggregate),
                Expression::Not(inner) | Expression::Negate(inner) => inner.contains_aggregate(),
                Expression::Binary { left, right, .. } => left.contains_aggregate() || right.contains_aggregate(),
                _ => false,
            }
    }

    /// Every variable this expression reads
    pub fn variables(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_variables(&mut out);
        out
    }

    fn collect_variables<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expression::Variable(name) => out.push(name),
            Expression::Property { variable, .. } => out.push(variable),
            Expression::Function { args, .. } => args.iter().for_each(|arg| arg.collect_variables(out)),
            Expression::Not(inner) | Expression::Negate(inner) => inner.collect_variables(out),
            Expression::Binary { left, right, .. } => {
                left.collect_variables(out);
                right.collect_variables(out);
            }
            Expression::Literal(_) | Expression::Null | Expression::CountStar => {}
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Literal(PropertyValue::String(s)) => write!(f, "'{}'", s),
            Expression::Literal(value) => write!(f, "{}", value),
            Expression::Null => write!(f, "null"),
            Expression::Variable(name) => write!(f, "{}", name),
            Expression::Property { variable, key, mode } => {
                write!(f, "{}.{}", variable, key)?;
                match mode {
                    PropertyMode::Plain => Ok(()),
                    PropertyMode::Nullable => write!(f, "?"),
                    PropertyMode::Strict => write!(f, "!"),
                }
            }
            Expression::Function { name, distinct, args } => {
                write!(f, "{}(", name)?;
                if *distinct {
                    write!(f, "distinct ")?;
                }
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
            Expression::CountStar => write!(f, "count(*)"),
            Expression::Not(inner) => write!(f, "not({})", inner),
            Expression::Negate(inner) => write!(f, "-{}", inner),
            Expression::Binary { left, op, right } => write!(f, "{} {} {}", left, op.symbol(), right),
        }
    }
}

/// `expression [as alias]`
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnItem {
    pub expression: Expression,
    pub alias: Option<String>,
}

impl ReturnItem {
    /// Alias if given, otherwise the canonical expression text
    pub fn column_name(&self) -> String {
        match &self.alias {
            Some(alias) => alias.clone(),
            None => self.expression.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortItem {
    pub expression: Expression,
    pub descending: bool,
}

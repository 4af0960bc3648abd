//! Query parser using Pest

use crate::error::GraphError;
use crate::graph::{Direction, EntityClass, PropertyValue, RelationshipType};
use crate::query::ast::*;
use pest::iterators::{Pair, Pairs};
use pest::pratt_parser::{Assoc, Op, PrattParser};
use pest::Parser;
use pest_derive::Parser;
use std::sync::LazyLock;
use thiserror::Error;

#[derive(Parser)]
#[grammar = "query/cypher.pest"]
struct CypherParser;

static PRATT_PARSER: LazyLock<PrattParser<Rule>> = LazyLock::new(|| {
    PrattParser::new()
        .op(Op::infix(Rule::or_op, Assoc::Left))
        .op(Op::infix(Rule::and_op, Assoc::Left))
        .op(Op::prefix(Rule::not_op))
        .op(Op::infix(Rule::eq_op, Assoc::Left)
            | Op::infix(Rule::ne_op, Assoc::Left)
            | Op::infix(Rule::lt_op, Assoc::Left)
            | Op::infix(Rule::le_op, Assoc::Left)
            | Op::infix(Rule::gt_op, Assoc::Left)
            | Op::infix(Rule::ge_op, Assoc::Left)
            | Op::infix(Rule::regex_op, Assoc::Left))
        .op(Op::infix(Rule::add_op, Assoc::Left) | Op::infix(Rule::sub_op, Assoc::Left))
        .op(Op::infix(Rule::mul_op, Assoc::Left)
            | Op::infix(Rule::div_op, Assoc::Left)
            | Op::infix(Rule::mod_op, Assoc::Left))
        .op(Op::prefix(Rule::neg_op))
});

/// Parser errors
#[derive(Error, Debug)]
pub enum ParseError {
    /// Pest parsing error
    #[error("{0}")]
    PestError(#[from] Box<pest::error::Error<Rule>>),

    /// Well-formed text with an invalid value
    #[error("{0}")]
    SemanticError(String),
}

impl From<ParseError> for GraphError {
    fn from(e: ParseError) -> Self {
        GraphError::QuerySyntax(e.to_string())
    }
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Parse query text into an AST
pub fn parse_query(input: &str) -> ParseResult<Query> {
    let mut pairs = CypherParser::parse(Rule::query, input).map_err(Box::new)?;
    let root = pairs
        .next()
        .ok_or_else(|| ParseError::SemanticError("empty query".to_string()))?;

    let mut query = Query {
        start: Vec::new(),
        paths: Vec::new(),
        predicate: None,
        distinct: false,
        returns: Vec::new(),
        order_by: Vec::new(),
        skip: None,
        limit: None,
    };

    for clause in root.into_inner() {
        match clause.as_rule() {
            Rule::start_clause => {
                for item in clause.into_inner().filter(|p| p.as_rule() == Rule::start_item) {
                    query.start.push(parse_start_item(item)?);
                }
            }
            Rule::match_clause => {
                for path in clause.into_inner().filter(|p| p.as_rule() == Rule::path) {
                    query.paths.push(parse_path(path)?);
                }
            }
            Rule::where_clause => {
                let expr = find(clause, Rule::expression)?;
                query.predicate = Some(parse_expression(expr.into_inner())?);
            }
            Rule::return_clause => {
                for inner in clause.into_inner() {
                    match inner.as_rule() {
                        Rule::distinct => query.distinct = true,
                        Rule::return_item => query.returns.push(parse_return_item(inner)?),
                        _ => {}
                    }
                }
            }
            Rule::order_clause => {
                for item in clause.into_inner().filter(|p| p.as_rule() == Rule::sort_item) {
                    query.order_by.push(parse_sort_item(item)?);
                }
            }
            Rule::skip_clause => query.skip = Some(parse_count(find(clause, Rule::integer)?)?),
            Rule::limit_clause => query.limit = Some(parse_count(find(clause, Rule::integer)?)?),
            _ => {}
        }
    }

    Ok(query)
}

/// First inner pair of the given rule
fn find(pair: Pair<'_, Rule>, rule: Rule) -> ParseResult<Pair<'_, Rule>> {
    let context = pair.as_str().to_string();
    pair.into_inner()
        .find(|p| p.as_rule() == rule)
        .ok_or_else(|| ParseError::SemanticError(format!("expected {:?} in '{}'", rule, context)))
}

fn parse_count(pair: Pair<Rule>) -> ParseResult<usize> {
    pair.as_str()
        .parse()
        .map_err(|_| ParseError::SemanticError(format!("invalid count '{}'", pair.as_str())))
}

/// Identifier text with backticks removed
fn name(pair: &Pair<Rule>) -> String {
    let text = pair.as_str();
    text.strip_prefix('`')
        .and_then(|t| t.strip_suffix('`'))
        .unwrap_or(text)
        .to_string()
}

fn parse_start_item(pair: Pair<Rule>) -> ParseResult<StartItem> {
    let mut inner = pair.into_inner();
    let variable = inner
        .next()
        .map(|p| name(&p))
        .ok_or_else(|| ParseError::SemanticError("start item without a name".to_string()))?;
    let lookup_pair = inner
        .next()
        .ok_or_else(|| ParseError::SemanticError(format!("start item '{}' without a lookup", variable)))?;

    let class = match lookup_pair.as_rule() {
        Rule::node_lookup => EntityClass::Node,
        _ => EntityClass::Relationship,
    };
    let body = lookup_pair
        .into_inner()
        .find(|p| matches!(p.as_rule(), Rule::index_lookup | Rule::id_lookup))
        .ok_or_else(|| ParseError::SemanticError(format!("start item '{}' without a lookup", variable)))?;

    let lookup = match body.as_rule() {
        Rule::index_lookup => {
            let mut parts = body.into_inner();
            let index = parts
                .next()
                .map(|p| name(&p))
                .ok_or_else(|| ParseError::SemanticError("index lookup without an index name".to_string()))?;
            let form = parts
                .next()
                .ok_or_else(|| ParseError::SemanticError(format!("empty lookup on index '{}'", index)))?;
            match form.as_rule() {
                Rule::index_exact => {
                    let mut kv = form.into_inner();
                    let key = kv
                        .next()
                        .map(|p| name(&p))
                        .ok_or_else(|| ParseError::SemanticError("index lookup without a key".to_string()))?;
                    let value = match kv.next() {
                        Some(p) => match parse_literal(p)? {
                            Expression::Literal(value) => value,
                            _ => return Err(ParseError::SemanticError("cannot look up null in an index".to_string())),
                        },
                        None => return Err(ParseError::SemanticError("index lookup without a value".to_string())),
                    };
                    StartLookup::IndexExact { index, key, value }
                }
                _ => {
                    let query = parse_string(find(form, Rule::string)?);
                    StartLookup::IndexQuery { index, query }
                }
            }
        }
        _ => {
            let ids = find(body, Rule::id_list).ok();
            match ids {
                None => StartLookup::All,
                Some(list) => StartLookup::Ids(
                    list.into_inner()
                        .map(|p| {
                            p.as_str()
                                .parse::<u64>()
                                .map_err(|_| ParseError::SemanticError(format!("invalid id '{}'", p.as_str())))
                        })
                        .collect::<ParseResult<Vec<_>>>()?,
                ),
            }
        }
    };

    Ok(StartItem { variable, class, lookup })
}

fn parse_path(pair: Pair<Rule>) -> ParseResult<PathPattern> {
    let mut inner = pair.into_inner();
    let start = inner
        .next()
        .map(parse_node_pattern)
        .ok_or_else(|| ParseError::SemanticError("empty path".to_string()))?;

    let mut segments = Vec::new();
    while let Some(rel) = inner.next() {
        let relationship = parse_rel_pattern(rel);
        let node = inner
            .next()
            .map(parse_node_pattern)
            .ok_or_else(|| ParseError::SemanticError("relationship without an end node".to_string()))?;
        segments.push(PathSegment { relationship, node });
    }
    Ok(PathPattern { start, segments })
}

fn parse_node_pattern(pair: Pair<Rule>) -> NodePattern {
    NodePattern {
        variable: pair.into_inner().next().map(|p| name(&p)),
    }
}

fn parse_rel_pattern(pair: Pair<Rule>) -> RelationshipPattern {
    let mut left = false;
    let mut right = false;
    let mut pattern = RelationshipPattern {
        variable: None,
        types: Vec::new(),
        direction: Direction::Both,
        optional: false,
    };

    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::left_arrow => left = true,
            Rule::right_arrow => right = true,
            Rule::rel_detail => {
                for part in inner.into_inner() {
                    match part.as_rule() {
                        Rule::variable => pattern.variable = Some(name(&part)),
                        Rule::optional => pattern.optional = true,
                        Rule::rel_types => {
                            pattern.types = part.into_inner().map(|t| RelationshipType::new(name(&t))).collect();
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }

    pattern.direction = match (left, right) {
        (false, true) => Direction::Outgoing,
        (true, false) => Direction::Incoming,
        _ => Direction::Both,
    };
    pattern
}

fn parse_return_item(pair: Pair<Rule>) -> ParseResult<ReturnItem> {
    let mut expression = None;
    let mut alias = None;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::expression => expression = Some(parse_expression(inner.into_inner())?),
            Rule::variable => alias = Some(name(&inner)),
            _ => {}
        }
    }
    Ok(ReturnItem {
        expression: expression.ok_or_else(|| ParseError::SemanticError("empty return item".to_string()))?,
        alias,
    })
}

fn parse_sort_item(pair: Pair<Rule>) -> ParseResult<SortItem> {
    let mut expression = None;
    let mut descending = false;
    for inner in pair.into_inner() {
        match inner.as_rule() {
            Rule::expression => expression = Some(parse_expression(inner.into_inner())?),
            Rule::descending => descending = true,
            _ => {}
        }
    }
    Ok(SortItem {
        expression: expression.ok_or_else(|| ParseError::SemanticError("empty order by item".to_string()))?,
        descending,
    })
}

fn parse_expression(pairs: Pairs<Rule>) -> ParseResult<Expression> {
    PRATT_PARSER
        .map_primary(parse_primary)
        .map_prefix(|op, operand| {
            let operand = Box::new(operand?);
            Ok(match op.as_rule() {
                Rule::not_op => Expression::Not(operand),
                _ => Expression::Negate(operand),
            })
        })
        .map_infix(|left, op, right| {
            let op = match op.as_rule() {
                Rule::or_op => BinaryOp::Or,
                Rule::and_op => BinaryOp::And,
                Rule::eq_op => BinaryOp::Eq,
                Rule::ne_op => BinaryOp::Ne,
                Rule::lt_op => BinaryOp::Lt,
                Rule::le_op => BinaryOp::Le,
                Rule::gt_op => BinaryOp::Gt,
                Rule::ge_op => BinaryOp::Ge,
                Rule::regex_op => BinaryOp::RegexMatch,
                Rule::add_op => BinaryOp::Add,
                Rule::sub_op => BinaryOp::Sub,
                Rule::mul_op => BinaryOp::Mul,
                Rule::div_op => BinaryOp::Div,
                Rule::mod_op => BinaryOp::Mod,
                other => return Err(ParseError::SemanticError(format!("unexpected operator {:?}", other))),
            };
            Ok(Expression::Binary {
                left: Box::new(left?),
                op,
                right: Box::new(right?),
            })
        })
        .parse(pairs)
}

fn parse_primary(pair: Pair<Rule>) -> ParseResult<Expression> {
    match pair.as_rule() {
        Rule::expression => parse_expression(pair.into_inner()),
        Rule::variable => Ok(Expression::Variable(name(&pair))),
        Rule::property => {
            let mut inner = pair.into_inner();
            let variable = inner.next().map(|p| name(&p)).unwrap_or_default();
            let key = inner.next().map(|p| name(&p)).unwrap_or_default();
            let mode = match inner.next().map(|p| p.as_rule()) {
                Some(Rule::nullable) => PropertyMode::Nullable,
                Some(Rule::strict) => PropertyMode::Strict,
                _ => PropertyMode::Plain,
            };
            Ok(Expression::Property { variable, key, mode })
        }
        Rule::function_call => {
            let mut inner = pair.into_inner();
            let function = inner
                .next()
                .map(|p| p.as_str().to_lowercase())
                .unwrap_or_default();
            let mut distinct = false;
            let mut args = Vec::new();
            for arg in inner {
                match arg.as_rule() {
                    Rule::count_star if function == "count" => return Ok(Expression::CountStar),
                    Rule::count_star => {
                        return Err(ParseError::SemanticError(format!("{}(*) is not supported", function)))
                    }
                    Rule::distinct => distinct = true,
                    Rule::expression => args.push(parse_expression(arg.into_inner())?),
                    _ => {}
                }
            }
            Ok(Expression::Function {
                name: function,
                distinct,
                args,
            })
        }
        _ => parse_literal(pair),
    }
}

fn parse_literal(pair: Pair<Rule>) -> ParseResult<Expression> {
    let text = pair.as_str();
    let value = match pair.as_rule() {
        Rule::string => PropertyValue::String(parse_string(pair)),
        Rule::integer => PropertyValue::Integer(
            text.parse()
                .map_err(|_| ParseError::SemanticError(format!("integer out of range: {}", text)))?,
        ),
        Rule::float => PropertyValue::Float(
            text.parse()
                .map_err(|_| ParseError::SemanticError(format!("invalid number: {}", text)))?,
        ),
        Rule::true_lit => PropertyValue::Boolean(true),
        Rule::false_lit => PropertyValue::Boolean(false),
        Rule::null_lit => return Ok(Expression::Null),
        other => return Err(ParseError::SemanticError(format!("unexpected {:?}: {}", other, text))),
    };
    Ok(Expression::Literal(value))
}

/// Contents of a string literal with escapes resolved
///
/// `\\`, `\'`, `\"`, `\n`, `\t` are unescaped; any other escape is kept as
/// written so regular expressions such as `'\d+'` survive.
fn parse_string(pair: Pair<Rule>) -> String {
    let raw = pair.into_inner().next().map(|p| p.as_str()).unwrap_or_default();
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('\'') => out.push('\''),
            Some('"') => out.push('"'),
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_index_start() {
        let query = parse_query("start doctor = node:characters(character = 'Doctor') return doctor").unwrap();
        assert_eq!(query.start.len(), 1);
        assert_eq!(query.start[0].variable, "doctor");
        assert_eq!(query.start[0].class, EntityClass::Node);
        assert_eq!(
            query.start[0].lookup,
            StartLookup::IndexExact {
                index: "characters".into(),
                key: "character".into(),
                value: "Doctor".into(),
            }
        );
        assert_eq!(query.returns[0].column_name(), "doctor");
    }

    #[test]
    fn test_parse_wildcard_and_id_starts() {
        let query = parse_query(
            "START species = node:species('species:S*n'), n = node(1, 2), r = rel(*) RETURN species",
        )
        .unwrap();
        assert_eq!(
            query.start[0].lookup,
            StartLookup::IndexQuery {
                index: "species".into(),
                query: "species:S*n".into(),
            }
        );
        assert_eq!(query.start[1].lookup, StartLookup::Ids(vec![1, 2]));
        assert_eq!(query.start[2].class, EntityClass::Relationship);
        assert_eq!(query.start[2].lookup, StartLookup::All);
    }

    #[test]
    fn test_parse_match_paths() {
        let query = parse_query(
            "start doctor = node(1) \
             match (doctor)<-[:PLAYED]-(actor)-[r?:REGENERATED_TO|:APPEARED_IN]->(), (doctor)--(other) \
             return actor",
        )
        .unwrap();
        assert_eq!(query.paths.len(), 2);

        let first = &query.paths[0];
        assert_eq!(first.start.variable.as_deref(), Some("doctor"));
        assert_eq!(first.segments.len(), 2);
        assert_eq!(first.segments[0].relationship.direction, Direction::Incoming);
        assert_eq!(first.segments[0].relationship.types, vec![RelationshipType::new("PLAYED")]);

        let second = &first.segments[1].relationship;
        assert_eq!(second.variable.as_deref(), Some("r"));
        assert!(second.optional);
        assert_eq!(second.direction, Direction::Outgoing);
        assert_eq!(second.types.len(), 2);
        assert_eq!(first.segments[1].node.variable, None);

        assert_eq!(query.paths[1].segments[0].relationship.direction, Direction::Both);
    }

    #[test]
    fn test_operator_precedence() {
        let query = parse_query("start n = node(*) where not n.a = 1 + 2 * 3 or n.b return n").unwrap();
        let predicate = query.predicate.unwrap();
        assert_eq!(predicate.to_string(), "not(n.a = 1 + 2 * 3) or n.b");
        match predicate {
            Expression::Binary { op: BinaryOp::Or, left, .. } => {
                assert!(matches!(*left, Expression::Not(_)));
            }
            other => panic!("unexpected predicate {:?}", other),
        }
    }

    #[test]
    fn test_property_suffixes() {
        let query = parse_query("start n = node(*) where n.salary? > 10 and n.name! <> 'x' return n").unwrap();
        let text = query.predicate.unwrap().to_string();
        assert_eq!(text, "n.salary? > 10 and n.name! <> 'x'");
    }

    #[test]
    fn test_return_order_skip_limit() {
        let query = parse_query(
            "start n = node(*) return distinct n.name as name, count(*), avg(n.salary?) \
             order by name desc, count(*) skip 1 limit 5",
        )
        .unwrap();
        assert!(query.distinct);
        let columns: Vec<String> = query.returns.iter().map(ReturnItem::column_name).collect();
        assert_eq!(columns, vec!["name", "count(*)", "avg(n.salary?)"]);
        assert!(query.order_by[0].descending);
        assert!(!query.order_by[1].descending);
        assert_eq!(query.skip, Some(1));
        assert_eq!(query.limit, Some(5));
    }

    #[test]
    fn test_string_escapes() {
        let query = parse_query(r"start n = node(*) where n.name =~ 'Rose\'s \d+' return n").unwrap();
        match query.predicate.unwrap() {
            Expression::Binary { right, .. } => {
                assert_eq!(*right, Expression::Literal(r"Rose's \d+".into()));
            }
            other => panic!("unexpected predicate {:?}", other),
        }
    }

    #[test]
    fn test_syntax_errors() {
        assert!(parse_query("start n = node(*)").is_err());
        assert!(parse_query("match (n) return n").is_err());
        assert!(parse_query("start n = node(*) return").is_err());
        let err: GraphError = parse_query("start n = nod(*) return n").unwrap_err().into();
        assert!(matches!(err, GraphError::QuerySyntax(_)));
    }
}

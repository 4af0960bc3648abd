//! Query planner - converts an AST into a tree of physical operators
//!
//! Planning also performs every compile-time check: unbound variables,
//! unknown functions, misplaced aggregates and malformed regular
//! expression literals are all reported here, before any traversal.

use crate::error::{GraphError, GraphResult};
use crate::graph::PropertyValue;
use crate::query::ast::{BinaryOp, Expression, PathPattern, Query, ReturnItem, StartItem, StartLookup};
use crate::query::executor::eval::{compile_regex, scalar_arity};
use crate::query::executor::operator::*;
use rustc_hash::FxHashSet;
use tracing::debug;

/// Operator tree plus the visible output columns
pub struct ExecutionPlan {
    pub root: OperatorBox,
    pub columns: Vec<String>,
}

/// Builds execution plans
#[derive(Debug, Default)]
pub struct QueryPlanner {
    /// Counter for names given to anonymous pattern elements
    anonymous: usize,
}

impl QueryPlanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plan(mut self, query: &Query) -> GraphResult<ExecutionPlan> {
        let mut bound: FxHashSet<String> = FxHashSet::default();
        let mut op: OperatorBox = Box::new(SingleRowOperator::new());

        for item in &query.start {
            op = self.plan_start(op, item, &mut bound)?;
        }
        for path in &query.paths {
            op = self.plan_path(op, path, &mut bound)?;
        }

        if let Some(predicate) = &query.predicate {
            validate(predicate, &bound, false)?;
            op = Box::new(FilterOperator::new(op, predicate.clone()));
        }

        let columns = return_columns(&query.returns)?;
        let aggregated = query.returns.iter().any(|item| item.expression.contains_aggregate());
        for item in &query.returns {
            validate(&item.expression, &bound, true)?;
        }

        // Sort keys either name a return column or become hidden columns
        let mut hidden = Vec::new();
        let mut sort_keys = Vec::new();
        for (i, sort) in query.order_by.iter().enumerate() {
            let text = sort.expression.to_string();
            if columns.contains(&text) {
                sort_keys.push((text, sort.descending));
                continue;
            }
            if aggregated || query.distinct {
                return Err(GraphError::QuerySyntax(format!(
                    "order by {} must refer to a returned column when using aggregation or distinct",
                    text
                )));
            }
            validate(&sort.expression, &bound, false)?;
            let column = format!("  order{}", i);
            hidden.push((sort.expression.clone(), column.clone()));
            sort_keys.push((column, sort.descending));
        }

        if aggregated {
            op = plan_aggregate(op, &query.returns)?;
        } else {
            let mut projections: Vec<(Expression, String)> = query
                .returns
                .iter()
                .map(|item| (item.expression.clone(), item.column_name()))
                .collect();
            projections.extend(hidden);
            op = Box::new(ProjectOperator::new(op, projections));
        }

        if query.distinct {
            op = Box::new(DistinctOperator::new(op, columns.clone()));
        }
        if !sort_keys.is_empty() {
            op = Box::new(SortOperator::new(op, sort_keys));
        }
        if let Some(skip) = query.skip {
            op = Box::new(SkipOperator::new(op, skip));
        }
        if let Some(limit) = query.limit {
            op = Box::new(LimitOperator::new(op, limit));
        }

        debug!(columns = ?columns, aggregated, "planned query");
        Ok(ExecutionPlan { root: op, columns })
    }

    fn plan_start(&mut self, input: OperatorBox, item: &StartItem, bound: &mut FxHashSet<String>) -> GraphResult<OperatorBox> {
        if !bound.insert(item.variable.clone()) {
            return Err(GraphError::QuerySyntax(format!(
                "variable '{}' is bound more than once in start",
                item.variable
            )));
        }
        let source = match &item.lookup {
            StartLookup::IndexExact { index, key, value } => StartSource::IndexExact {
                index: index.clone(),
                key: key.clone(),
                value: value.clone(),
            },
            StartLookup::IndexQuery { index, query } => StartSource::index_query(index, query)?,
            StartLookup::Ids(ids) => StartSource::Ids(ids.clone()),
            StartLookup::All => StartSource::All,
        };
        Ok(Box::new(StartOperator::new(input, item.variable.clone(), item.class, source)))
    }

    fn name_or_anonymous(&mut self, variable: &Option<String>, kind: &str) -> String {
        match variable {
            Some(name) => name.clone(),
            None => {
                self.anonymous += 1;
                format!("  {}{}", kind, self.anonymous)
            }
        }
    }

    /// Expand a path outward from its first bound element
    fn plan_path(&mut self, input: OperatorBox, path: &PathPattern, bound: &mut FxHashSet<String>) -> GraphResult<OperatorBox> {
        let nodes: Vec<String> = path
            .nodes()
            .map(|node| self.name_or_anonymous(&node.variable, "node"))
            .collect();
        let rels: Vec<String> = path
            .segments
            .iter()
            .map(|segment| self.name_or_anonymous(&segment.relationship.variable, "rel"))
            .collect();

        let mut op = input;
        let (left_of, right_of) = if let Some(anchor) = nodes.iter().position(|name| bound.contains(name)) {
            (anchor, anchor)
        } else if let Some(anchor) = rels.iter().position(|name| bound.contains(name)) {
            let segment = &path.segments[anchor].relationship;
            op = Box::new(EndpointsOperator::new(
                op,
                rels[anchor].clone(),
                nodes[anchor].clone(),
                nodes[anchor + 1].clone(),
                segment.types.clone(),
                segment.direction,
            ));
            bound.insert(nodes[anchor].clone());
            bound.insert(nodes[anchor + 1].clone());
            (anchor, anchor + 1)
        } else {
            let first_named = path
                .nodes()
                .filter_map(|node| node.variable.clone())
                .chain(path.segments.iter().filter_map(|s| s.relationship.variable.clone()))
                .next()
                .unwrap_or_else(|| "()".to_string());
            return Err(GraphError::UnboundVariable(first_named));
        };

        // Segment i joins nodes[i] and nodes[i + 1]
        for i in right_of..path.segments.len() {
            op = self.expand(op, path, i, &nodes[i], &rels[i], &nodes[i + 1], false, bound);
        }
        for i in (0..left_of).rev() {
            op = self.expand(op, path, i, &nodes[i + 1], &rels[i], &nodes[i], true, bound);
        }
        Ok(op)
    }

    #[allow(clippy::too_many_arguments)]
    fn expand(
        &mut self,
        input: OperatorBox,
        path: &PathPattern,
        segment: usize,
        from: &str,
        rel: &str,
        to: &str,
        reversed: bool,
        bound: &mut FxHashSet<String>,
    ) -> OperatorBox {
        let pattern = &path.segments[segment].relationship;
        let direction = if reversed { pattern.direction.reverse() } else { pattern.direction };
        let rel_bound = bound.contains(rel);
        let to_bound = bound.contains(to);
        bound.insert(rel.to_string());
        bound.insert(to.to_string());
        Box::new(ExpandOperator::new(
            input,
            from.to_string(),
            rel.to_string(),
            to.to_string(),
            pattern.types.clone(),
            direction,
            pattern.optional,
            rel_bound,
            to_bound,
        ))
    }
}

fn return_columns(returns: &[ReturnItem]) -> GraphResult<Vec<String>> {
    let mut columns: Vec<String> = Vec::with_capacity(returns.len());
    for item in returns {
        let column = item.column_name();
        if columns.contains(&column) {
            return Err(GraphError::QuerySyntax(format!("column '{}' is returned more than once", column)));
        }
        columns.push(column);
    }
    Ok(columns)
}

fn plan_aggregate(input: OperatorBox, returns: &[ReturnItem]) -> GraphResult<OperatorBox> {
    let mut group_by = Vec::new();
    let mut outputs = Vec::new();
    let mut calls: Vec<AggregateCall> = Vec::new();

    for item in returns {
        let column = item.column_name();
        if !item.expression.contains_aggregate() {
            group_by.push((item.expression.clone(), column));
            continue;
        }
        if let Some(variable) = variables_outside_aggregates(&item.expression).first() {
            return Err(GraphError::QuerySyntax(format!(
                "{} mixes '{}' with an aggregate; return it as a separate column",
                item.expression, variable
            )));
        }
        collect_aggregates(&item.expression, &mut calls);
        outputs.push((item.expression.clone(), column));
    }

    Ok(Box::new(AggregateOperator::new(input, group_by, calls, outputs)))
}

fn collect_aggregates(expr: &Expression, calls: &mut Vec<AggregateCall>) {
    if let Some(function) = expr.aggregate() {
        let name = expr.to_string();
        if calls.iter().all(|call| call.name != name) {
            let (argument, distinct) = match expr {
                Expression::Function { args, distinct, .. } => (args.first().cloned(), *distinct),
                _ => (None, false),
            };
            calls.push(AggregateCall {
                function,
                argument,
                distinct,
                name,
            });
        }
        return;
    }
    match expr {
        Expression::Function { args, .. } => args.iter().for_each(|arg| collect_aggregates(arg, calls)),
        Expression::Not(inner) | Expression::Negate(inner) => collect_aggregates(inner, calls),
        Expression::Binary { left, right, .. } => {
            collect_aggregates(left, calls);
            collect_aggregates(right, calls);
        }
        _ => {}
    }
}

fn variables_outside_aggregates(expr: &Expression) -> Vec<&str> {
    if expr.aggregate().is_some() {
        return Vec::new();
    }
    match expr {
        Expression::Variable(name) => vec![name.as_str()],
        Expression::Property { variable, .. } => vec![variable.as_str()],
        Expression::Function { args, .. } => args.iter().flat_map(variables_outside_aggregates).collect(),
        Expression::Not(inner) | Expression::Negate(inner) => variables_outside_aggregates(inner),
        Expression::Binary { left, right, .. } => {
            let mut out = variables_outside_aggregates(left);
            out.extend(variables_outside_aggregates(right));
            out
        }
        Expression::Literal(_) | Expression::Null | Expression::CountStar => Vec::new(),
    }
}

/// Compile-time checks on one expression
fn validate(expr: &Expression, bound: &FxHashSet<String>, allow_aggregate: bool) -> GraphResult<()> {
    match expr {
        Expression::Variable(name) | Expression::Property { variable: name, .. } => {
            if bound.contains(name) {
                Ok(())
            } else {
                Err(GraphError::UnboundVariable(name.clone()))
            }
        }
        Expression::CountStar if !allow_aggregate => {
            Err(GraphError::QuerySyntax("count(*) is only allowed in return".into()))
        }
        Expression::Function { name, distinct, args } => {
            if expr.aggregate().is_some() {
                if !allow_aggregate {
                    return Err(GraphError::QuerySyntax(format!(
                        "aggregate {} is not allowed here",
                        expr
                    )));
                }
                if args.len() != 1 {
                    return Err(GraphError::QuerySyntax(format!("{}() takes exactly one argument", name)));
                }
                // Arguments of an aggregate may not aggregate again
                return args.iter().try_for_each(|arg| validate(arg, bound, false));
            }
            let Some((min, max)) = scalar_arity(name) else {
                return Err(GraphError::QuerySyntax(format!("unknown function '{}'", name)));
            };
            if *distinct {
                return Err(GraphError::QuerySyntax(format!("distinct is not allowed in {}()", name)));
            }
            if args.len() < min || args.len() > max {
                return Err(GraphError::QuerySyntax(format!(
                    "{}() called with {} argument(s)",
                    name,
                    args.len()
                )));
            }
            args.iter().try_for_each(|arg| validate(arg, bound, allow_aggregate))
        }
        Expression::Not(inner) | Expression::Negate(inner) => validate(inner, bound, allow_aggregate),
        Expression::Binary { left, op, right } => {
            if let (BinaryOp::RegexMatch, Expression::Literal(PropertyValue::String(pattern))) = (op, right.as_ref()) {
                compile_regex(pattern)?;
            }
            validate(left, bound, allow_aggregate)?;
            validate(right, bound, allow_aggregate)
        }
        Expression::Literal(_) | Expression::Null | Expression::CountStar => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::query::parser::parse_query;

    fn plan(text: &str) -> GraphResult<ExecutionPlan> {
        QueryPlanner::new().plan(&parse_query(text).unwrap())
    }

    fn kind(text: &str) -> ErrorKind {
        match plan(text) {
            Ok(_) => panic!("expected {} to be rejected", text),
            Err(e) => e.kind(),
        }
    }

    #[test]
    fn test_columns() {
        let plan = plan("start d = node:characters(character = 'Doctor') match (d)<-[:PLAYED]-(actor) return actor.actor, count(*) as n").unwrap();
        assert_eq!(plan.columns, vec!["actor.actor".to_string(), "n".to_string()]);
    }

    #[test]
    fn test_unbound_variables() {
        assert_eq!(kind("start n = node(*) return m"), ErrorKind::UnboundVariable);
        assert_eq!(kind("start n = node(*) match (a)-->(b) return n"), ErrorKind::UnboundVariable);
        assert_eq!(kind("start n = node(*) where x.name = 'Rose' return n"), ErrorKind::UnboundVariable);
        assert_eq!(kind("start n = node(*) return n order by m.name"), ErrorKind::UnboundVariable);
    }

    #[test]
    fn test_path_may_chain_from_an_earlier_path() {
        assert!(plan("start n = node(1) match (n)-->(a), (a)-[r]->(b) return b").is_ok());
        assert!(plan("start r = rel(1) match (a)-[r]->(b)<--(c) return c").is_ok());
    }

    #[test]
    fn test_function_checks() {
        assert_eq!(kind("start n = node(*) return frobnicate(n)"), ErrorKind::QuerySyntax);
        assert_eq!(kind("start n = node(*) where count(n) > 1 return n"), ErrorKind::QuerySyntax);
        assert_eq!(kind("start n = node(*) return count(max(n.age))"), ErrorKind::QuerySyntax);
        assert_eq!(kind("start n = node(*) return n.name, count(*) + n.age"), ErrorKind::QuerySyntax);
        assert_eq!(kind("start n = node(*) where n.name =~ '(' return n"), ErrorKind::QuerySyntax);
    }

    #[test]
    fn test_order_by_with_aggregation_must_name_a_column() {
        assert!(plan("start n = node(*) return n.species, count(*) order by count(*) desc").is_ok());
        assert_eq!(
            kind("start n = node(*) return n.species, count(*) order by n.name"),
            ErrorKind::QuerySyntax
        );
        assert!(plan("start n = node(*) return n order by n.name").is_ok());
    }
}

//! Physical operators for query execution (Volcano iterator model)
//!
//! Each operator pulls records from its input on demand. Nothing holds a
//! store lock between pulls; every read goes through the result set's
//! snapshot, which pins the versions the traversal can see.

use crate::error::{GraphError, GraphResult};
use crate::graph::{Direction, EntityClass, EntityId, NodeId, PropertyValue, RelationshipType};
use crate::index::{split_query, WildcardPattern};
use crate::query::ast::{Aggregate, Expression};
use crate::query::executor::eval::Evaluator;
use crate::query::executor::record::{Record, Value};
use crate::transaction::snapshot::Lookup;
use crate::transaction::Snapshot;
use indexmap::IndexMap;
use rustc_hash::{FxBuildHasher, FxHashSet};
use std::cmp::Ordering;

/// Physical operator trait - all operators implement this
pub trait PhysicalOperator: Send {
    /// Get the next record from this operator
    fn next(&mut self, snapshot: &Snapshot) -> GraphResult<Option<Record>>;
}

pub type OperatorBox = Box<dyn PhysicalOperator>;

/// Yields a single empty record; the leaf under the first start binding
#[derive(Debug, Default)]
pub struct SingleRowOperator {
    done: bool,
}

impl SingleRowOperator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PhysicalOperator for SingleRowOperator {
    fn next(&mut self, _snapshot: &Snapshot) -> GraphResult<Option<Record>> {
        if self.done {
            return Ok(None);
        }
        self.done = true;
        Ok(Some(Record::new()))
    }
}

/// Where a start binding gets its entities from
#[derive(Debug, Clone)]
pub enum StartSource {
    IndexExact {
        index: String,
        key: String,
        value: PropertyValue,
    },
    IndexQuery {
        index: String,
        key: String,
        pattern: WildcardPattern,
    },
    Ids(Vec<u64>),
    All,
}

impl StartSource {
    /// Build from `index('key:pattern')` text
    pub fn index_query(index: &str, query: &str) -> GraphResult<Self> {
        let (key, pattern) = split_query(query)?;
        Ok(StartSource::IndexQuery {
            index: index.to_string(),
            key: key.to_string(),
            pattern: WildcardPattern::compile(pattern)?,
        })
    }
}

/// Start operator: `n = node:idx(...)`, `n = node(1, 2)`, `r = rel(*)`
///
/// Binds `variable` to every entity the source yields, once per input
/// record, which makes several start bindings a cartesian product.
pub struct StartOperator {
    input: OperatorBox,
    variable: String,
    class: EntityClass,
    source: StartSource,
    /// Resolved on first use and reused for every input record
    entities: Option<Vec<EntityId>>,
    current: Option<Record>,
    position: usize,
}

impl StartOperator {
    pub fn new(input: OperatorBox, variable: String, class: EntityClass, source: StartSource) -> Self {
        Self {
            input,
            variable,
            class,
            source,
            entities: None,
            current: None,
            position: 0,
        }
    }

    fn resolve(&self, snapshot: &Snapshot) -> GraphResult<Vec<EntityId>> {
        let class = self.class;
        let to_entity = |id: u64| match class {
            EntityClass::Node => EntityId::Node(id.into()),
            EntityClass::Relationship => EntityId::Relationship(id.into()),
        };
        match &self.source {
            StartSource::IndexExact { index, key, value } => {
                snapshot.index_lookup(class, index, key, Lookup::Exact(value))
            }
            StartSource::IndexQuery { index, key, pattern } => {
                snapshot.index_lookup(class, index, key, Lookup::Pattern(pattern))
            }
            StartSource::Ids(ids) => Ok(ids.iter().copied().map(to_entity).collect()),
            StartSource::All => Ok(match class {
                EntityClass::Node => snapshot.node_ids()?.into_iter().map(EntityId::Node).collect(),
                EntityClass::Relationship => snapshot
                    .relationship_ids()?
                    .into_iter()
                    .map(EntityId::Relationship)
                    .collect(),
            }),
        }
    }

    fn load(&self, entity: EntityId, snapshot: &Snapshot) -> GraphResult<Value> {
        let by_id = matches!(self.source, StartSource::Ids(_));
        match entity {
            EntityId::Node(id) => match snapshot.find_node(id)? {
                Some(node) => Ok(Value::Node(node)),
                None if by_id => Err(GraphError::NodeNotFound(id)),
                None => Err(GraphError::SnapshotTooOld(snapshot.version())),
            },
            EntityId::Relationship(id) => match snapshot.find_relationship(id)? {
                Some(rel) => Ok(Value::Relationship(rel)),
                None if by_id => Err(GraphError::RelationshipNotFound(id)),
                None => Err(GraphError::SnapshotTooOld(snapshot.version())),
            },
        }
    }
}

impl PhysicalOperator for StartOperator {
    fn next(&mut self, snapshot: &Snapshot) -> GraphResult<Option<Record>> {
        if self.entities.is_none() {
            self.entities = Some(self.resolve(snapshot)?);
        }
        loop {
            if let Some(record) = &self.current {
                let entity = self.entities.as_ref().and_then(|entities| entities.get(self.position).copied());
                if let Some(entity) = entity {
                    self.position += 1;
                    let mut record = record.clone();
                    record.bind(self.variable.clone(), self.load(entity, snapshot)?);
                    return Ok(Some(record));
                }
            }
            match self.input.next(snapshot)? {
                Some(record) => {
                    self.current = Some(record);
                    self.position = 0;
                }
                None => return Ok(None),
            }
        }
    }
}

/// Expand operator: `(from)-[rel:TYPE]->(to)`
pub struct ExpandOperator {
    input: OperatorBox,
    from: String,
    rel: String,
    to: String,
    types: Vec<RelationshipType>,
    direction: Direction,
    optional: bool,
    /// `rel` is bound before this step
    rel_bound: bool,
    /// `to` is bound before this step; the hop must end there
    to_bound: bool,
    pending: std::vec::IntoIter<Record>,
}

impl ExpandOperator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        input: OperatorBox,
        from: String,
        rel: String,
        to: String,
        types: Vec<RelationshipType>,
        direction: Direction,
        optional: bool,
        rel_bound: bool,
        to_bound: bool,
    ) -> Self {
        Self {
            input,
            from,
            rel,
            to,
            types,
            direction,
            optional,
            rel_bound,
            to_bound,
            pending: Vec::new().into_iter(),
        }
    }

    fn expand(&self, record: &Record, snapshot: &Snapshot) -> GraphResult<Vec<Record>> {
        let from = match record.get(&self.from) {
            Some(Value::Node(node)) => Some(node.id),
            Some(Value::Null) => None,
            Some(other) => {
                return Err(GraphError::TypeError(format!(
                    "{} is bound to {}, which is not a node",
                    self.from, other
                )))
            }
            None => return Err(GraphError::UnboundVariable(self.from.clone())),
        };

        let mut out = Vec::new();
        if let Some(from) = from {
            let target = self.target_constraint(record)?;
            for rel in snapshot.find_relationships(from, self.direction, &self.types)? {
                if self.rel_bound {
                    if record.get(&self.rel).and_then(Value::relationship_id) != Some(rel.id) {
                        continue;
                    }
                } else if record.uses_relationship(rel.id) {
                    continue;
                }
                let Some(other) = rel.other_node(from) else {
                    continue;
                };
                if let Some(target) = target {
                    if target != Some(other) {
                        continue;
                    }
                }
                let node = snapshot
                    .find_node(other)?
                    .ok_or(GraphError::SnapshotTooOld(snapshot.version()))?;

                let mut next = record.clone();
                if self.rel_bound {
                    next.mark_matched(rel.id);
                } else {
                    next.bind_matched(self.rel.clone(), rel);
                }
                if !self.to_bound {
                    next.bind(self.to.clone(), Value::Node(node));
                }
                out.push(next);
            }
        }

        if out.is_empty() && self.optional {
            let mut next = record.clone();
            if !self.rel_bound {
                next.bind(self.rel.clone(), Value::Null);
            }
            if !self.to_bound {
                next.bind(self.to.clone(), Value::Null);
            }
            out.push(next);
        }
        Ok(out)
    }

    /// `Some(None)` when the target is bound to null, which nothing matches
    fn target_constraint(&self, record: &Record) -> GraphResult<Option<Option<NodeId>>> {
        if !self.to_bound {
            return Ok(None);
        }
        match record.get(&self.to) {
            Some(Value::Node(node)) => Ok(Some(Some(node.id))),
            Some(Value::Null) => Ok(Some(None)),
            Some(other) => Err(GraphError::TypeError(format!(
                "{} is bound to {}, which is not a node",
                self.to, other
            ))),
            None => Err(GraphError::UnboundVariable(self.to.clone())),
        }
    }
}

impl PhysicalOperator for ExpandOperator {
    fn next(&mut self, snapshot: &Snapshot) -> GraphResult<Option<Record>> {
        loop {
            if let Some(record) = self.pending.next() {
                return Ok(Some(record));
            }
            match self.input.next(snapshot)? {
                Some(record) => self.pending = self.expand(&record, snapshot)?.into_iter(),
                None => return Ok(None),
            }
        }
    }
}

/// Binds both ends of a relationship bound by `start`
///
/// `left` and `right` are the node patterns on either side as written; with
/// an undirected pattern both orientations are tried.
pub struct EndpointsOperator {
    input: OperatorBox,
    rel: String,
    left: String,
    right: String,
    types: Vec<RelationshipType>,
    direction: Direction,
    pending: std::vec::IntoIter<Record>,
}

impl EndpointsOperator {
    pub fn new(
        input: OperatorBox,
        rel: String,
        left: String,
        right: String,
        types: Vec<RelationshipType>,
        direction: Direction,
    ) -> Self {
        Self {
            input,
            rel,
            left,
            right,
            types,
            direction,
            pending: Vec::new().into_iter(),
        }
    }

    fn bind_end(record: &mut Record, variable: &str, node: NodeId, snapshot: &Snapshot) -> GraphResult<bool> {
        match record.get(variable) {
            Some(bound) => Ok(bound.node_id() == Some(node)),
            None => {
                let loaded = snapshot
                    .find_node(node)?
                    .ok_or(GraphError::SnapshotTooOld(snapshot.version()))?;
                record.bind(variable.to_string(), Value::Node(loaded));
                Ok(true)
            }
        }
    }

    fn expand(&self, record: &Record, snapshot: &Snapshot) -> GraphResult<Vec<Record>> {
        let rel = match record.get(&self.rel) {
            Some(Value::Relationship(rel)) => rel.clone(),
            Some(Value::Null) => return Ok(Vec::new()),
            Some(other) => {
                return Err(GraphError::TypeError(format!(
                    "{} is bound to {}, which is not a relationship",
                    self.rel, other
                )))
            }
            None => return Err(GraphError::UnboundVariable(self.rel.clone())),
        };
        if !rel.matches_types(&self.types) {
            return Ok(Vec::new());
        }

        let forward = (rel.start_node(), rel.end_node());
        let backward = (rel.end_node(), rel.start_node());
        let orientations: Vec<(NodeId, NodeId)> = match self.direction {
            Direction::Outgoing => vec![forward],
            Direction::Incoming => vec![backward],
            Direction::Both if forward == backward => vec![forward],
            Direction::Both => vec![forward, backward],
        };

        let mut out = Vec::new();
        for (left, right) in orientations {
            let mut next = record.clone();
            next.mark_matched(rel.id);
            if Self::bind_end(&mut next, &self.left, left, snapshot)?
                && Self::bind_end(&mut next, &self.right, right, snapshot)?
            {
                out.push(next);
            }
        }
        Ok(out)
    }
}

impl PhysicalOperator for EndpointsOperator {
    fn next(&mut self, snapshot: &Snapshot) -> GraphResult<Option<Record>> {
        loop {
            if let Some(record) = self.pending.next() {
                return Ok(Some(record));
            }
            match self.input.next(snapshot)? {
                Some(record) => self.pending = self.expand(&record, snapshot)?.into_iter(),
                None => return Ok(None),
            }
        }
    }
}

/// Filter operator: WHERE n.age > 30
pub struct FilterOperator {
    input: OperatorBox,
    predicate: Expression,
    evaluator: Evaluator,
}

impl FilterOperator {
    pub fn new(input: OperatorBox, predicate: Expression) -> Self {
        Self {
            input,
            predicate,
            evaluator: Evaluator::new(),
        }
    }
}

impl PhysicalOperator for FilterOperator {
    fn next(&mut self, snapshot: &Snapshot) -> GraphResult<Option<Record>> {
        while let Some(record) = self.input.next(snapshot)? {
            if self.evaluator.matches(&self.predicate, &record)? {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }
}

/// Project operator: RETURN n.name, n.age
///
/// Output records hold only the named columns.
pub struct ProjectOperator {
    input: OperatorBox,
    projections: Vec<(Expression, String)>,
    evaluator: Evaluator,
}

impl ProjectOperator {
    pub fn new(input: OperatorBox, projections: Vec<(Expression, String)>) -> Self {
        Self {
            input,
            projections,
            evaluator: Evaluator::new(),
        }
    }
}

impl PhysicalOperator for ProjectOperator {
    fn next(&mut self, snapshot: &Snapshot) -> GraphResult<Option<Record>> {
        let Some(record) = self.input.next(snapshot)? else {
            return Ok(None);
        };
        let mut projected = Record::new();
        for (expr, column) in &self.projections {
            projected.bind(column.clone(), self.evaluator.evaluate(expr, &record)?);
        }
        Ok(Some(projected))
    }
}

/// An aggregate call found in a return item, e.g. `count(distinct e)`
#[derive(Debug, Clone)]
pub struct AggregateCall {
    pub function: Aggregate,
    /// `None` for `count(*)`
    pub argument: Option<Expression>,
    pub distinct: bool,
    /// Canonical text the result is bound under
    pub name: String,
}

/// Internal state for an aggregator
#[derive(Debug, Clone)]
enum AggregatorState {
    Count(i64),
    Sum { int: i64, float: f64, any_float: bool },
    Avg { sum: f64, count: i64 },
    Min(Option<Value>),
    Max(Option<Value>),
    Collect(Vec<Value>),
}

impl AggregatorState {
    fn new(function: Aggregate) -> Self {
        match function {
            Aggregate::Count => AggregatorState::Count(0),
            Aggregate::Sum => AggregatorState::Sum {
                int: 0,
                float: 0.0,
                any_float: false,
            },
            Aggregate::Avg => AggregatorState::Avg { sum: 0.0, count: 0 },
            Aggregate::Min => AggregatorState::Min(None),
            Aggregate::Max => AggregatorState::Max(None),
            Aggregate::Collect => AggregatorState::Collect(Vec::new()),
        }
    }

    fn update(&mut self, value: Value) -> GraphResult<()> {
        if let AggregatorState::Collect(items) = self {
            items.push(value);
            return Ok(());
        }
        if value.is_null() {
            return Ok(());
        }
        match self {
            AggregatorState::Count(c) => *c += 1,
            AggregatorState::Sum { int, float, any_float } => match value.as_property() {
                Some(PropertyValue::Integer(i)) => {
                    *int = int
                        .checked_add(*i)
                        .ok_or_else(|| GraphError::TypeError("integer overflow in sum()".into()))?;
                }
                Some(PropertyValue::Float(f)) => {
                    *float += f;
                    *any_float = true;
                }
                _ => return Err(GraphError::TypeError(format!("sum() expects numbers, got {}", value))),
            },
            AggregatorState::Avg { sum, count } => match value.as_float() {
                Some(f) => {
                    *sum += f;
                    *count += 1;
                }
                None => return Err(GraphError::TypeError(format!("avg() expects numbers, got {}", value))),
            },
            AggregatorState::Min(current) => {
                if current.as_ref().map_or(true, |c| value.sort_cmp(c) == Ordering::Less) {
                    *current = Some(value);
                }
            }
            AggregatorState::Max(current) => {
                if current.as_ref().map_or(true, |c| value.sort_cmp(c) == Ordering::Greater) {
                    *current = Some(value);
                }
            }
            AggregatorState::Collect(_) => {}
        }
        Ok(())
    }

    fn result(self) -> Value {
        match self {
            AggregatorState::Count(c) => Value::Property(PropertyValue::Integer(c)),
            AggregatorState::Sum { int, float, any_float } => Value::Property(if any_float {
                PropertyValue::Float(float + int as f64)
            } else {
                PropertyValue::Integer(int)
            }),
            AggregatorState::Avg { sum, count } => {
                if count == 0 {
                    Value::Null
                } else {
                    Value::Property(PropertyValue::Float(sum / count as f64))
                }
            }
            AggregatorState::Min(value) | AggregatorState::Max(value) => value.unwrap_or(Value::Null),
            AggregatorState::Collect(items) => Value::List(items),
        }
    }
}

/// One aggregate's running state plus the values already seen for `distinct`
struct Accumulator {
    state: AggregatorState,
    seen: Option<FxHashSet<Value>>,
}

/// Aggregate operator: implicit GROUP BY over the non-aggregated columns
///
/// Groups come out in the order their first record arrived.
pub struct AggregateOperator {
    input: OperatorBox,
    /// (expression, column) of the grouping keys
    group_by: Vec<(Expression, String)>,
    aggregates: Vec<AggregateCall>,
    /// (expression, column) of every column computed from aggregates
    outputs: Vec<(Expression, String)>,
    evaluator: Evaluator,
    results: std::vec::IntoIter<Record>,
    executed: bool,
}

impl AggregateOperator {
    pub fn new(
        input: OperatorBox,
        group_by: Vec<(Expression, String)>,
        aggregates: Vec<AggregateCall>,
        outputs: Vec<(Expression, String)>,
    ) -> Self {
        Self {
            input,
            group_by,
            aggregates,
            outputs,
            evaluator: Evaluator::new(),
            results: Vec::new().into_iter(),
            executed: false,
        }
    }

    fn accumulators(&self) -> Vec<Accumulator> {
        self.aggregates
            .iter()
            .map(|call| Accumulator {
                state: AggregatorState::new(call.function),
                seen: call.distinct.then(FxHashSet::default),
            })
            .collect()
    }

    fn execute(&mut self, snapshot: &Snapshot) -> GraphResult<Vec<Record>> {
        let mut groups: IndexMap<Vec<Value>, Vec<Accumulator>, FxBuildHasher> = IndexMap::default();

        while let Some(record) = self.input.next(snapshot)? {
            let key = self
                .group_by
                .iter()
                .map(|(expr, _)| self.evaluator.evaluate(expr, &record))
                .collect::<GraphResult<Vec<_>>>()?;

            if !groups.contains_key(&key) {
                groups.insert(key.clone(), self.accumulators());
            }
            let Some(accumulators) = groups.get_mut(&key) else {
                continue;
            };

            for (call, acc) in self.aggregates.iter().zip(accumulators.iter_mut()) {
                let value = match &call.argument {
                    Some(argument) => self.evaluator.evaluate(argument, &record)?,
                    None => Value::Property(PropertyValue::Boolean(true)),
                };
                if let Some(seen) = &mut acc.seen {
                    if !seen.insert(value.clone()) {
                        continue;
                    }
                }
                acc.state.update(value)?;
            }
        }

        // Without grouping keys, aggregating nothing still yields one row
        if groups.is_empty() && self.group_by.is_empty() {
            groups.insert(Vec::new(), self.accumulators());
        }

        let mut output = Vec::with_capacity(groups.len());
        for (key, accumulators) in groups {
            let mut computed = Record::new();
            for (call, acc) in self.aggregates.iter().zip(accumulators) {
                computed.bind(call.name.clone(), acc.state.result());
            }

            let mut record = Record::new();
            for ((_, column), value) in self.group_by.iter().zip(key) {
                record.bind(column.clone(), value);
            }
            for (expr, column) in &self.outputs {
                record.bind(column.clone(), self.evaluator.evaluate(expr, &computed)?);
            }
            output.push(record);
        }
        Ok(output)
    }
}

impl PhysicalOperator for AggregateOperator {
    fn next(&mut self, snapshot: &Snapshot) -> GraphResult<Option<Record>> {
        if !self.executed {
            self.results = self.execute(snapshot)?.into_iter();
            self.executed = true;
        }
        Ok(self.results.next())
    }
}

/// Distinct operator: RETURN DISTINCT
pub struct DistinctOperator {
    input: OperatorBox,
    columns: Vec<String>,
    seen: FxHashSet<Vec<Value>>,
}

impl DistinctOperator {
    pub fn new(input: OperatorBox, columns: Vec<String>) -> Self {
        Self {
            input,
            columns,
            seen: FxHashSet::default(),
        }
    }
}

impl PhysicalOperator for DistinctOperator {
    fn next(&mut self, snapshot: &Snapshot) -> GraphResult<Option<Record>> {
        while let Some(record) = self.input.next(snapshot)? {
            if self.seen.insert(record.values(&self.columns)) {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }
}

/// Sort operator: ORDER BY n.age DESC
///
/// Sorts on already projected columns; the sort is stable, so ties keep
/// traversal order.
pub struct SortOperator {
    input: OperatorBox,
    /// (column, descending)
    keys: Vec<(String, bool)>,
    results: std::vec::IntoIter<Record>,
    executed: bool,
}

impl SortOperator {
    pub fn new(input: OperatorBox, keys: Vec<(String, bool)>) -> Self {
        Self {
            input,
            keys,
            results: Vec::new().into_iter(),
            executed: false,
        }
    }
}

impl PhysicalOperator for SortOperator {
    fn next(&mut self, snapshot: &Snapshot) -> GraphResult<Option<Record>> {
        if !self.executed {
            let mut records = Vec::new();
            while let Some(record) = self.input.next(snapshot)? {
                records.push(record);
            }
            let keys = &self.keys;
            records.sort_by(|a, b| {
                for (column, descending) in keys {
                    let (x, y) = (a.get(column).unwrap_or(&Value::Null), b.get(column).unwrap_or(&Value::Null));
                    let ord = x.sort_cmp(y);
                    if ord != Ordering::Equal {
                        return if *descending { ord.reverse() } else { ord };
                    }
                }
                Ordering::Equal
            });
            self.results = records.into_iter();
            self.executed = true;
        }
        Ok(self.results.next())
    }
}

/// Skip operator: SKIP 5
pub struct SkipOperator {
    input: OperatorBox,
    skip: usize,
    skipped: usize,
}

impl SkipOperator {
    pub fn new(input: OperatorBox, skip: usize) -> Self {
        Self { input, skip, skipped: 0 }
    }
}

impl PhysicalOperator for SkipOperator {
    fn next(&mut self, snapshot: &Snapshot) -> GraphResult<Option<Record>> {
        while self.skipped < self.skip {
            if self.input.next(snapshot)?.is_none() {
                return Ok(None);
            }
            self.skipped += 1;
        }
        self.input.next(snapshot)
    }
}

/// Limit operator: LIMIT 10
pub struct LimitOperator {
    input: OperatorBox,
    limit: usize,
    count: usize,
}

impl LimitOperator {
    pub fn new(input: OperatorBox, limit: usize) -> Self {
        Self { input, limit, count: 0 }
    }
}

impl PhysicalOperator for LimitOperator {
    fn next(&mut self, snapshot: &Snapshot) -> GraphResult<Option<Record>> {
        if self.count >= self.limit {
            return Ok(None);
        }
        match self.input.next(snapshot)? {
            Some(record) => {
                self.count += 1;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }
}

//! Lazily evaluated query results
//!
//! A [`ResultSet`] owns the snapshot its query reads. Rows are produced one
//! at a time as the caller pulls them; dropping the result set early
//! releases the snapshot without finishing the traversal.

use crate::error::{GraphError, GraphResult};
use crate::query::executor::{ExecutionPlan, OperatorBox, Value};
use crate::transaction::Snapshot;
use indexmap::IndexMap;
use std::fmt::{self, Write as _};

/// One result row, columns in return order
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    values: IndexMap<String, Value>,
}

impl Row {
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(column, value)| (column.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values.into_values().collect()
    }
}

impl std::ops::Index<&str> for Row {
    type Output = Value;

    /// Panics if the column does not exist
    fn index(&self, column: &str) -> &Value {
        &self.values[column]
    }
}

/// Rows of an executed query; iterate to pull them
pub struct ResultSet {
    snapshot: Snapshot,
    root: OperatorBox,
    columns: Vec<String>,
    done: bool,
}

impl ResultSet {
    pub(crate) fn new(snapshot: Snapshot, plan: ExecutionPlan) -> Self {
        Self {
            snapshot,
            root: plan.root,
            columns: plan.columns,
            done: false,
        }
    }

    /// Column names in return order
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Version of the snapshot the query reads
    pub fn snapshot_version(&self) -> u64 {
        self.snapshot.version()
    }

    /// Iterate over a single column
    pub fn column_as(self, column: &str) -> GraphResult<ColumnIter> {
        let Some(position) = self.columns.iter().position(|c| c == column) else {
            return Err(GraphError::QuerySyntax(format!(
                "no column '{}' in result (columns: {})",
                column,
                self.columns.join(", ")
            )));
        };
        Ok(ColumnIter { rows: self, position })
    }

    /// Render the remaining rows as a bordered table with a row count
    pub fn dump_to_string(self) -> GraphResult<String> {
        let columns = self.columns.clone();
        let mut cells: Vec<Vec<String>> = Vec::new();
        for row in self {
            cells.push(row?.values.values().map(Value::to_string).collect());
        }

        let widths: Vec<usize> = columns
            .iter()
            .enumerate()
            .map(|(i, column)| {
                cells
                    .iter()
                    .map(|row| row[i].chars().count())
                    .chain(std::iter::once(column.chars().count()))
                    .max()
                    .unwrap_or(0)
            })
            .collect();
        let inner = widths.iter().map(|w| w + 2).sum::<usize>() + widths.len().saturating_sub(1);
        let border = format!("+{}+", "-".repeat(inner));

        let line = |values: &[String]| {
            let mut line = String::new();
            for (value, width) in values.iter().zip(&widths) {
                let pad = width - value.chars().count();
                let _ = write!(line, "| {}{} ", value, " ".repeat(pad));
            }
            line.push('|');
            line
        };

        let mut out = String::new();
        out.push_str(&border);
        out.push('\n');
        out.push_str(&line(&columns));
        out.push('\n');
        out.push_str(&border);
        out.push('\n');
        for row in &cells {
            out.push_str(&line(row));
            out.push('\n');
        }
        out.push_str(&border);
        out.push('\n');
        let count = cells.len();
        let _ = writeln!(out, "{} {}", count, if count == 1 { "row" } else { "rows" });
        Ok(out)
    }
}

impl Iterator for ResultSet {
    type Item = GraphResult<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.root.next(&self.snapshot) {
            Ok(Some(record)) => {
                let values = self
                    .columns
                    .iter()
                    .cloned()
                    .zip(record.values(&self.columns))
                    .collect();
                Some(Ok(Row { values }))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl fmt::Debug for ResultSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultSet")
            .field("columns", &self.columns)
            .field("snapshot", &self.snapshot.version())
            .field("done", &self.done)
            .finish()
    }
}

/// Values of one column, see [`ResultSet::column_as`]
#[derive(Debug)]
pub struct ColumnIter {
    rows: ResultSet,
    position: usize,
}

impl Iterator for ColumnIter {
    type Item = GraphResult<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        let position = self.position;
        self.rows
            .next()
            .map(|row| row.map(|row| row.into_values().swap_remove(position)))
    }
}

use async_trait::async_trait;
use dashboard_core::coerce::parse_timestamp;
use dashboard_core::{Filter, Row, RowQuery, RowStore, StoreError};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// In-memory row store. Evaluates the same filter/order/limit semantics as the
/// REST store and can inject table failures, missing columns or a full outage.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: HashMap<String, Vec<Row>>,
    failing: HashSet<String>,
    missing_columns: HashMap<String, HashSet<String>>,
    offline: bool,
    reads: Arc<Mutex<Vec<String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every read fails as if the store were unreachable.
    pub fn offline() -> Self {
        Self {
            offline: true,
            ..Self::default()
        }
    }

    /// Append rows to a table. Non-object values are ignored.
    pub fn with_rows(mut self, table: &str, rows: Vec<Value>) -> Self {
        let entry = self.tables.entry(table.to_string()).or_default();
        entry.extend(rows.into_iter().filter_map(|row| match row {
            Value::Object(map) => Some(map),
            _ => None,
        }));
        self
    }

    /// Reads against `table` fail with a server error.
    pub fn failing(mut self, table: &str) -> Self {
        self.failing.insert(table.to_string());
        self
    }

    /// Selecting any of `columns` from `table` fails as an undefined column.
    pub fn without_columns(mut self, table: &str, columns: &[&str]) -> Self {
        let entry = self.missing_columns.entry(table.to_string()).or_default();
        entry.extend(columns.iter().map(|c| c.to_string()));
        self
    }

    /// Table names in the order they were read.
    pub fn reads(&self) -> Vec<String> {
        self.reads.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn read_count(&self, table: &str) -> usize {
        self.reads().iter().filter(|t| t.as_str() == table).count()
    }

    fn record(&self, table: &str) {
        if let Ok(mut reads) = self.reads.lock() {
            reads.push(table.to_string());
        }
    }

    fn evaluate(&self, query: &RowQuery) -> Result<Vec<Row>, StoreError> {
        if self.offline {
            return Err(StoreError::Unavailable("store is offline".to_string()));
        }
        if self.failing.contains(&query.table) {
            return Err(StoreError::Status {
                status: 500,
                message: format!("read of {} failed", query.table),
            });
        }
        if let Some(missing) = self.missing_columns.get(&query.table) {
            if let Some(column) = query.columns.iter().find(|c| missing.contains(*c)) {
                return Err(StoreError::MissingColumn {
                    column: format!("{}.{}", query.table, column),
                });
            }
        }

        let Some(rows) = self.tables.get(&query.table) else {
            return Ok(Vec::new());
        };

        let mut matched: Vec<&Row> = rows
            .iter()
            .filter(|row| query.filters.iter().all(|filter| matches_filter(row, filter)))
            .collect();

        // Stable sort, last key first, so earlier keys take precedence.
        for order in query.order.iter().rev() {
            matched.sort_by(|a, b| {
                let ordering = compare_fields(a.get(&order.column), b.get(&order.column));
                if order.descending {
                    ordering.reverse()
                } else {
                    ordering
                }
            });
        }

        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(matched
            .into_iter()
            .take(limit)
            .map(|row| project(row, &query.columns))
            .collect())
    }
}

#[async_trait]
impl RowStore for MemoryStore {
    async fn select(&self, query: &RowQuery) -> Result<Vec<Row>, StoreError> {
        self.record(&query.table);
        self.evaluate(query)
    }
}

fn project(row: &Row, columns: &[String]) -> Row {
    if columns.is_empty() {
        return row.clone();
    }
    columns
        .iter()
        .filter_map(|c| row.get(c).map(|v| (c.clone(), v.clone())))
        .collect()
}

fn matches_filter(row: &Row, filter: &Filter) -> bool {
    match filter {
        Filter::Eq(column, expected) => row
            .get(column)
            .map(|actual| compare_values(actual, expected) == Some(Ordering::Equal))
            .unwrap_or(false),
        Filter::Gte(column, bound) => row
            .get(column)
            .and_then(|actual| compare_values(actual, bound))
            .map(|ordering| ordering != Ordering::Less)
            .unwrap_or(false),
        Filter::In(column, candidates) => row
            .get(column)
            .map(|actual| {
                candidates
                    .iter()
                    .any(|c| compare_values(actual, c) == Some(Ordering::Equal))
            })
            .unwrap_or(false),
    }
}

/// Nulls and missing fields sort after every value.
fn compare_fields(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    match (a, b) {
        (Some(a), Some(b)) => compare_values(a, b).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (as_number(a), as_number(b)) {
        return x.partial_cmp(&y);
    }
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::String(x), Value::String(y)) => {
            if let (Some(tx), Some(ty)) = (parse_timestamp(x), parse_timestamp(y)) {
                return Some(tx.cmp(&ty));
            }
            Some(x.cmp(y))
        }
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            // Timestamps like "2026" would otherwise compare as numbers.
            if s.contains('-') || s.contains(':') {
                None
            } else {
                s.trim().parse().ok()
            }
        }
        _ => None,
    }
}

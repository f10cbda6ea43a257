//! Collection read filters.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::Record;

/// Comparison applied by a [`Filter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    /// Field is greater than or equal to the value.
    Gte,
    /// Field is less than or equal to the value.
    Lte,
}

impl FilterOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Eq => "eq",
            FilterOp::Gte => "gte",
            FilterOp::Lte => "lte",
        }
    }
}

/// A predicate on one field.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Filter {
    /// Whether a raw row satisfies this predicate. A missing field reads as
    /// null, and null never satisfies a range.
    pub fn matches(&self, row: &Record) -> bool {
        let field = row.get(&self.field).unwrap_or(&Value::Null);
        match self.op {
            FilterOp::Eq => field == &self.value,
            FilterOp::Gte => !field.is_null() && compare(Some(field), Some(&self.value)).is_ge(),
            FilterOp::Lte => !field.is_null() && compare(Some(field), Some(&self.value)).is_le(),
        }
    }
}

/// Result ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub field: String,
    pub descending: bool,
}

/// Filters, ordering and limit for a collection read or bulk update.
///
/// # Example
///
/// ```rust
/// use mecanica_core::Query;
///
/// let newest_logs = Query::new().order_by("timestamp", true).limit(20);
/// let unread = Query::new().eq("receiver_id", "u1").eq("read", false);
/// let may = Query::new()
///     .gte("timestamp", "2024-05-01T00:00:00Z")
///     .lte("timestamp", "2024-05-31T23:59:59Z");
/// assert_eq!(unread.filters.len(), 2);
/// assert_eq!(may.filters.len(), 2);
/// assert_eq!(newest_logs.limit, Some(20));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filters: Vec<Filter>,
    pub order: Option<Order>,
    pub limit: Option<usize>,
}

impl Query {
    /// An unfiltered query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Query matching a single identifier.
    pub fn by_id(id: impl Into<String>) -> Self {
        let id: String = id.into();
        Self::new().eq("id", id)
    }

    fn filter(mut self, field: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            field: field.into(),
            op,
            value: value.into(),
        });
        self
    }

    /// Add an equality filter.
    pub fn eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(field, FilterOp::Eq, value)
    }

    /// Keep rows whose field is at or after `value`.
    pub fn gte(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(field, FilterOp::Gte, value)
    }

    /// Keep rows whose field is at or before `value`.
    pub fn lte(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(field, FilterOp::Lte, value)
    }

    /// Order results by a field.
    pub fn order_by(mut self, field: impl Into<String>, descending: bool) -> Self {
        self.order = Some(Order {
            field: field.into(),
            descending,
        });
        self
    }

    /// Cap the number of returned rows.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether a raw row satisfies every filter.
    pub fn matches(&self, row: &Record) -> bool {
        self.filters.iter().all(|f| f.matches(row))
    }

    /// Evaluate filters, ordering and limit over in-memory rows.
    pub fn apply<'a>(&self, rows: impl IntoIterator<Item = &'a Record>) -> Vec<Record> {
        let mut selected: Vec<Record> = rows
            .into_iter()
            .filter(|row| self.matches(row))
            .cloned()
            .collect();

        if let Some(order) = &self.order {
            selected.sort_by(|a, b| {
                let ord = compare(a.get(&order.field), b.get(&order.field));
                if order.descending {
                    ord.reverse()
                } else {
                    ord
                }
            });
        }

        if let Some(limit) = self.limit {
            selected.truncate(limit);
        }

        selected
    }
}

fn compare(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => {
            // Timestamps compare as instants whatever their offset spelling.
            match (
                DateTime::parse_from_rfc3339(x),
                DateTime::parse_from_rfc3339(y),
            ) {
                (Ok(a), Ok(b)) => a.with_timezone(&Utc).cmp(&b.with_timezone(&Utc)),
                _ => x.cmp(y),
            }
        }
        (Some(Value::Null) | None, Some(Value::Null) | None) => Ordering::Equal,
        (Some(Value::Null) | None, _) => Ordering::Less,
        (_, Some(Value::Null) | None) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows() -> Vec<Record> {
        vec![
            json!({ "id": "a", "timestamp": "2024-01-01T00:00:00Z", "read": false }),
            json!({ "id": "b", "timestamp": "2024-03-01T00:00:00Z", "read": true }),
            json!({ "id": "c", "timestamp": "2024-02-01T00:00:00Z", "read": false }),
        ]
        .into_iter()
        .map(|v| v.as_object().cloned().unwrap())
        .collect()
    }

    #[test]
    fn test_filter() {
        let data = rows();
        let unread = Query::new().eq("read", false).apply(&data);
        assert_eq!(unread.len(), 2);
    }

    #[test]
    fn test_order_and_limit() {
        let data = rows();
        let newest = Query::new().order_by("timestamp", true).limit(2).apply(&data);
        let ids: Vec<_> = newest.iter().map(|r| r["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[test]
    fn test_range_filters() {
        let data = rows();
        let february_on = Query::new()
            .gte("timestamp", "2024-02-01T00:00:00+00:00")
            .apply(&data);
        let ids: Vec<_> = february_on.iter().map(|r| r["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["b", "c"]);

        let until_february = Query::new()
            .lte("timestamp", "2024-02-01T00:00:00.000Z")
            .gte("timestamp", "2024-01-15T00:00:00Z")
            .apply(&data);
        assert_eq!(until_february.len(), 1);
        assert_eq!(until_february[0]["id"], json!("c"));
    }

    #[test]
    fn test_range_skips_missing_field() {
        let row = json!({ "id": "x" }).as_object().cloned().unwrap();
        assert!(!Query::new().lte("timestamp", "2024-01-01T00:00:00Z").matches(&row));
        assert!(Query::new().eq("timestamp", Value::Null).matches(&row));
    }

    #[test]
    fn test_by_id() {
        let data = rows();
        let found = Query::by_id("c").apply(&data);
        assert_eq!(found.len(), 1);
        assert!(Query::by_id("z").apply(&data).is_empty());
    }
}

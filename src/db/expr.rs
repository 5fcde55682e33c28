//! Filter and update expressions understood by every document store.
//!
//! Paths are dot separated (`status`, `audit.changedAt`). Stores evaluate
//! these server side; the in-process evaluator below is what
//! [`MemoryStore`](super::memory::MemoryStore) uses.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::{Map, Number, Value};

use super::Document;
use crate::error::Error;

/// Document predicate
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    /// `true` matches present fields (including `null`), `false` matches absent ones
    Exists(String, bool),
    In(String, Vec<Value>),
    Gte(String, Number),
    Lt(String, Number),
    And(Vec<Filter>),
}

impl Filter {
    /// Matches every document
    pub fn all() -> Self {
        Filter::And(Vec::new())
    }

    pub fn eq(path: &str, value: impl Into<Value>) -> Self {
        Filter::Eq(path.to_string(), value.into())
    }

    pub fn exists(path: &str) -> Self {
        Filter::Exists(path.to_string(), true)
    }

    pub fn missing(path: &str) -> Self {
        Filter::Exists(path.to_string(), false)
    }

    pub fn one_of<V: Into<Value>>(path: &str, values: impl IntoIterator<Item = V>) -> Self {
        Filter::In(path.to_string(), values.into_iter().map(Into::into).collect())
    }

    pub fn gte(path: &str, bound: impl Into<Number>) -> Self {
        Filter::Gte(path.to_string(), bound.into())
    }

    pub fn lt(path: &str, bound: impl Into<Number>) -> Self {
        Filter::Lt(path.to_string(), bound.into())
    }

    /// Half-open date range `[start, end)` over an epoch-millis field
    pub fn date_range(path: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Filter::And(vec![
            Filter::gte(path, start.timestamp_millis()),
            Filter::lt(path, end.timestamp_millis()),
        ])
    }

    /// Conjunction, flattening nested `And`s
    pub fn and(self, other: Filter) -> Self {
        let mut clauses = match self {
            Filter::And(clauses) => clauses,
            single => vec![single],
        };
        match other {
            Filter::And(more) => clauses.extend(more),
            single => clauses.push(single),
        }
        Filter::And(clauses)
    }

    /// Reject malformed expressions before they reach a store
    pub fn validate(&self) -> Result<()> {
        match self {
            Filter::Eq(path, _) | Filter::Exists(path, _) | Filter::In(path, _) => check_path(path),
            Filter::Gte(path, _) | Filter::Lt(path, _) => check_path(path),
            Filter::And(clauses) => clauses.iter().try_for_each(Filter::validate),
        }
    }

    pub fn matches(&self, document: &Document) -> bool {
        match self {
            Filter::Eq(path, Value::Null) => lookup(document, path).map_or(true, Value::is_null),
            Filter::Eq(path, expected) => lookup(document, path).map_or(false, |v| values_equal(v, expected)),
            Filter::Exists(path, present) => lookup(document, path).is_some() == *present,
            Filter::In(path, values) => {
                let found = lookup(document, path).unwrap_or(&Value::Null);
                values.iter().any(|v| values_equal(found, v))
            }
            Filter::Gte(path, bound) => compare(document, path, bound).map_or(false, |o| o.is_ge()),
            Filter::Lt(path, bound) => compare(document, path, bound).map_or(false, |o| o.is_lt()),
            Filter::And(clauses) => clauses.iter().all(|c| c.matches(document)),
        }
    }
}

/// One field mutation
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOp {
    Set(String, Value),
    Unset(String),
    /// Add to a numeric field; a missing field counts as zero
    Inc(String, Number),
}

/// Ordered list of mutations applied to each matched document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    pub ops: Vec<UpdateOp>,
}

impl Update {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, path: &str, value: impl Into<Value>) -> Self {
        self.ops.push(UpdateOp::Set(path.to_string(), value.into()));
        self
    }

    pub fn unset(mut self, path: &str) -> Self {
        self.ops.push(UpdateOp::Unset(path.to_string()));
        self
    }

    pub fn inc(mut self, path: &str, by: impl Into<Number>) -> Self {
        self.ops.push(UpdateOp::Inc(path.to_string(), by.into()));
        self
    }

    /// Field paths written or removed by this update
    pub fn paths(&self) -> impl Iterator<Item = &str> + '_ {
        self.ops.iter().map(|op| match op {
            UpdateOp::Set(path, _) | UpdateOp::Unset(path) | UpdateOp::Inc(path, _) => path.as_str(),
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.ops.is_empty() {
            return Err(Error::Operation("update has no operations".to_string()).into());
        }
        for op in &self.ops {
            match op {
                UpdateOp::Set(path, _) | UpdateOp::Unset(path) | UpdateOp::Inc(path, _) => check_path(path)?,
            }
        }
        Ok(())
    }

    /// Apply in place, returning whether the document changed
    pub fn apply(&self, document: &mut Document) -> Result<bool> {
        let before = document.clone();
        for op in &self.ops {
            match op {
                UpdateOp::Set(path, value) => {
                    *slot(document, path)? = value.clone();
                }
                UpdateOp::Unset(path) => {
                    remove(document, path);
                }
                UpdateOp::Inc(path, by) => {
                    let target = slot(document, path)?;
                    *target = add(target, by, path)?;
                }
            }
        }
        Ok(*document != before)
    }
}

fn check_path(path: &str) -> Result<()> {
    if path.is_empty() || path.split('.').any(str::is_empty) {
        return Err(Error::Operation(format!("invalid field path '{}'", path)).into());
    }
    Ok(())
}

/// Split a dotted path into its segments
pub fn segments(path: &str) -> Vec<String> {
    path.split('.').map(str::to_string).collect()
}

/// Resolve a dotted path; array elements are addressed by index
pub fn lookup<'a>(document: &'a Document, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = document.get(parts.next()?)?;
    for part in parts {
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Mutable slot for a path, creating missing parent objects
fn slot<'a>(document: &'a mut Document, path: &str) -> Result<&'a mut Value> {
    let parts: Vec<&str> = path.split('.').collect();
    let (last, parents) = parts
        .split_last()
        .ok_or_else(|| Error::Operation(format!("invalid field path '{}'", path)))?;

    let mut map: &mut Map<String, Value> = document;
    for part in parents {
        let entry = map
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        map = entry.as_object_mut().ok_or_else(|| {
            Error::Operation(format!("cannot descend into non-object at '{}' in '{}'", part, path))
        })?;
    }
    Ok(map.entry(last.to_string()).or_insert(Value::Null))
}

fn remove(document: &mut Document, path: &str) {
    let mut parts: Vec<&str> = path.split('.').collect();
    let Some(last) = parts.pop() else { return };

    let mut map: &mut Map<String, Value> = document;
    for part in parts {
        match map.get_mut(part).and_then(Value::as_object_mut) {
            Some(next) => map = next,
            None => return,
        }
    }
    map.remove(last);
}

fn add(current: &Value, by: &Number, path: &str) -> Result<Value> {
    let base = match current {
        // freshly created slot
        Value::Null => Number::from(0),
        Value::Number(n) => n.clone(),
        other => {
            return Err(Error::Operation(format!(
                "cannot increment non-numeric field '{}' ({})",
                path, other
            ))
            .into())
        }
    };

    if let (Some(a), Some(b)) = (base.as_i64(), by.as_i64()) {
        if let Some(sum) = a.checked_add(b) {
            return Ok(Value::from(sum));
        }
    }
    let sum = base.as_f64().unwrap_or_default() + by.as_f64().unwrap_or_default();
    Number::from_f64(sum)
        .map(Value::Number)
        .ok_or_else(|| Error::Operation(format!("increment of '{}' is not a finite number", path)).into())
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn compare(document: &Document, path: &str, bound: &Number) -> Option<std::cmp::Ordering> {
    let value = lookup(document, path)?.as_f64()?;
    value.partial_cmp(&bound.as_f64()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_exists_distinguishes_null_from_absent() {
        let with_null = doc(json!({"status": null}));
        let without = doc(json!({}));

        assert!(Filter::exists("status").matches(&with_null));
        assert!(!Filter::missing("status").matches(&with_null));
        assert!(Filter::missing("status").matches(&without));
    }

    #[test]
    fn test_range_is_half_open() {
        let filter = Filter::gte("n", 10).and(Filter::lt("n", 20));
        assert!(filter.matches(&doc(json!({"n": 10}))));
        assert!(filter.matches(&doc(json!({"n": 19.5}))));
        assert!(!filter.matches(&doc(json!({"n": 20}))));
        assert!(!filter.matches(&doc(json!({"n": "15"}))));
        assert!(!filter.matches(&doc(json!({}))));
    }

    #[test]
    fn test_in_and_nested_paths() {
        let d = doc(json!({"status": "returned", "audit": {"by": "ops"}}));
        assert!(Filter::one_of("status", ["returned", "wrongreturn"]).matches(&d));
        assert!(!Filter::one_of("status", ["completed"]).matches(&d));
        assert!(Filter::eq("audit.by", "ops").matches(&d));
    }

    #[test]
    fn test_and_flattens() {
        let f = Filter::eq("a", 1).and(Filter::eq("b", 2)).and(Filter::eq("c", 3));
        match f {
            Filter::And(clauses) => assert_eq!(clauses.len(), 3),
            other => panic!("unexpected filter {:?}", other),
        }
    }

    #[test]
    fn test_update_reports_change() -> Result<()> {
        let mut d = doc(json!({"status": "completed"}));
        assert!(!Update::new().set("status", "completed").apply(&mut d)?);
        assert!(Update::new().set("statusChangedBy", Value::Null).apply(&mut d)?);
        assert_eq!(d["statusChangedBy"], Value::Null);
        Ok(())
    }

    #[test]
    fn test_inc_integer_and_missing() -> Result<()> {
        let mut d = doc(json!({"returnDate": 1_769_594_400_000i64}));
        Update::new()
            .inc("returnDate", -86_400_000i64)
            .inc("retries", 1)
            .apply(&mut d)?;
        assert_eq!(d["returnDate"], json!(1_769_508_000_000i64));
        assert_eq!(d["retries"], json!(1));
        Ok(())
    }

    #[test]
    fn test_inc_rejects_strings() {
        let mut d = doc(json!({"returnDate": "2026-01-28"}));
        assert!(Update::new().inc("returnDate", 1).apply(&mut d).is_err());
    }

    #[test]
    fn test_set_creates_parents_and_unset_removes() -> Result<()> {
        let mut d = doc(json!({}));
        Update::new().set("audit.by", "ops").apply(&mut d)?;
        assert_eq!(d["audit"]["by"], json!("ops"));

        Update::new().unset("audit.by").apply(&mut d)?;
        assert_eq!(d["audit"], json!({}));
        Ok(())
    }

    #[test]
    fn test_validation_rejects_bad_paths() {
        assert!(Filter::eq("", 1).validate().is_err());
        assert!(Filter::all().and(Filter::exists("a..b")).validate().is_err());
        assert!(Update::new().validate().is_err());
        assert!(Update::new().set("ok", 1).validate().is_ok());
    }
}

//! Structural diff between two tree-shaped values.
//!
//! One algorithm serves both value encodings: it is written against the [TreeValue] capability,
//! which [Value](crate::value::Value) (compact binary form) and [serde_json::Value]
//! (human-readable form) implement.
//!
//! A diff is itself a tree value:
//!
//! - a scalar replaced by another scalar, or by a value of another kind, becomes
//!   `{"__old": old, "__new": new}`;
//! - two maps produce a map whose entries are `<key>__deleted` (value only in `old`),
//!   `<key>__added` (value only in `new`) or `<key>` (nested diff of a shared key);
//! - two lists produce a list of `[op, index, payload]` tuples where `op` is `"-"` (delete,
//!   payload is the removed element), `"~"` (modify, payload is the nested diff) or `"+"`
//!   (insert, payload is the new element).
//!
//! The list diff is positional and does not try to find a minimal edit script: an insertion at
//! the front rewrites every following position.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::value::Value;

pub const OLD_KEY: &str = "__old";
pub const NEW_KEY: &str = "__new";
pub const ADDED_SUFFIX: &str = "__added";
pub const DELETED_SUFFIX: &str = "__deleted";
pub const LIST_INSERT: &str = "+";
pub const LIST_DELETE: &str = "-";
pub const LIST_MODIFY: &str = "~";

#[derive(Error, Clone, PartialEq, Eq, Debug)]
pub enum DiffError {
    #[error("wrong diff format: {0}")]
    WrongFormat(&'static str),
    #[error("diff references key `{0}` absent from the base value")]
    MissingKey(String),
    #[error("diff references index {index} of a list of length {len}")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("unknown list diff operation `{0}`")]
    UnknownOp(String),
}

/// String-keyed map of a [TreeValue] encoding.
pub trait TreeMap<V>: Default + Clone {
    fn get(&self, key: &str) -> Option<&V>;
    fn insert(&mut self, key: String, value: V);
    fn remove(&mut self, key: &str) -> Option<V>;
    /// Keys in iteration order.
    fn keys(&self) -> Vec<&String>;
    fn len(&self) -> usize;

    fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The minimal capability the diff engine needs from a value encoding.
pub trait TreeValue: Clone + PartialEq + Sized {
    type Map: TreeMap<Self>;

    /// Anything that is neither a list nor a map.
    fn is_scalar(&self) -> bool;
    fn same_kind(&self, other: &Self) -> bool;
    fn as_map(&self) -> Option<&Self::Map>;
    fn as_list(&self) -> Option<&Vec<Self>>;
    fn from_map(map: Self::Map) -> Self;
    fn from_list(list: Vec<Self>) -> Self;
    fn as_text(&self) -> Option<&str>;
    fn from_text(text: &str) -> Self;
    fn as_index(&self) -> Option<usize>;
    fn from_index(index: usize) -> Self;
}

/// Result of [diff]: either "undefined" (nothing changed) or the diff value.
#[derive(Clone, PartialEq, Debug)]
pub struct DiffResult<V>(Option<V>);

impl<V> DiffResult<V> {
    pub fn undefined() -> Self {
        Self(None)
    }

    pub fn new(diff: V) -> Self {
        Self(Some(diff))
    }

    #[inline]
    pub fn is_undefined(&self) -> bool {
        self.0.is_none()
    }

    pub fn value(&self) -> Option<&V> {
        self.0.as_ref()
    }

    pub fn into_value(self) -> Option<V> {
        self.0
    }
}

impl<V> Default for DiffResult<V> {
    fn default() -> Self {
        Self::undefined()
    }
}

pub fn diff<V: TreeValue>(old: &V, new: &V) -> DiffResult<V> {
    DiffResult(diff_value(old, new))
}

/// Reconstruct the newer value from the older one.
pub fn patch<V: TreeValue>(old: &V, diff: &DiffResult<V>) -> Result<V, DiffError> {
    match diff.value() {
        None => Ok(old.clone()),
        Some(d) => patch_value(old, d),
    }
}

/// Reconstruct the older value from the newer one.
pub fn rollback<V: TreeValue>(
    new: &V, diff: &DiffResult<V>,
) -> Result<V, DiffError> {
    match diff.value() {
        None => Ok(new.clone()),
        Some(d) => rollback_value(new, d),
    }
}

fn replacement<V: TreeValue>(old: &V, new: &V) -> V {
    let mut m = V::Map::default();
    m.insert(OLD_KEY.into(), old.clone());
    m.insert(NEW_KEY.into(), new.clone());
    V::from_map(m)
}

/// Returns `(old, new)` if the diff has the whole-value replacement shape.
fn as_replacement<V: TreeValue>(diff: &V) -> Option<(&V, &V)> {
    let m = diff.as_map()?;
    if m.len() != 2 {
        return None
    }
    Some((m.get(OLD_KEY)?, m.get(NEW_KEY)?))
}

fn list_op<V: TreeValue>(op: &str, index: usize, payload: V) -> V {
    V::from_list(vec![V::from_text(op), V::from_index(index), payload])
}

fn parse_list_op<V: TreeValue>(
    entry: &V,
) -> Result<(&str, usize, &V), DiffError> {
    let t = entry
        .as_list()
        .ok_or(DiffError::WrongFormat("list diff entry is not a tuple"))?;
    if t.len() != 3 {
        return Err(DiffError::WrongFormat(
            "list diff entry must have 3 elements",
        ))
    }
    let op = t[0]
        .as_text()
        .ok_or(DiffError::WrongFormat("list diff op must be text"))?;
    let index = t[1]
        .as_index()
        .ok_or(DiffError::WrongFormat("list diff index must be an integer"))?;
    Ok((op, index, &t[2]))
}

fn diff_value<V: TreeValue>(old: &V, new: &V) -> Option<V> {
    if old.is_scalar() || !old.same_kind(new) {
        if old == new {
            return None
        }
        return Some(replacement(old, new))
    }
    if let (Some(om), Some(nm)) = (old.as_map(), new.as_map()) {
        let mut out = V::Map::default();
        for k in om.keys() {
            if !nm.contains_key(k) {
                let ov = om.get(k)?.clone();
                out.insert(format!("{}{}", k, DELETED_SUFFIX), ov);
            }
        }
        for k in om.keys() {
            if let (Some(ov), Some(nv)) = (om.get(k), nm.get(k)) {
                if let Some(d) = diff_value(ov, nv) {
                    out.insert(k.clone(), d);
                }
            }
        }
        for k in nm.keys() {
            if !om.contains_key(k) {
                let nv = nm.get(k)?.clone();
                out.insert(format!("{}{}", k, ADDED_SUFFIX), nv);
            }
        }
        return if out.is_empty() { None } else { Some(V::from_map(out)) }
    }
    let (ol, nl) = (old.as_list()?, new.as_list()?);
    let mut out = Vec::new();
    for (i, ov) in ol.iter().enumerate() {
        match nl.get(i) {
            None => out.push(list_op(LIST_DELETE, i, ov.clone())),
            Some(nv) => {
                if let Some(d) = diff_value(ov, nv) {
                    out.push(list_op(LIST_MODIFY, i, d))
                }
            }
        }
    }
    for (i, nv) in nl.iter().enumerate().skip(ol.len()) {
        out.push(list_op(LIST_INSERT, i, nv.clone()))
    }
    if out.is_empty() {
        None
    } else {
        Some(V::from_list(out))
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Direction {
    Patch,
    Rollback,
}

fn patch_value<V: TreeValue>(old: &V, diff: &V) -> Result<V, DiffError> {
    apply(old, diff, Direction::Patch)
}

fn rollback_value<V: TreeValue>(new: &V, diff: &V) -> Result<V, DiffError> {
    apply(new, diff, Direction::Rollback)
}

fn apply<V: TreeValue>(
    base: &V, diff: &V, dir: Direction,
) -> Result<V, DiffError> {
    if let Some((old, new)) = as_replacement(diff) {
        return Ok(match dir {
            Direction::Patch => new.clone(),
            Direction::Rollback => old.clone(),
        })
    }
    if base.is_scalar() {
        return Err(DiffError::WrongFormat(
            "scalar base requires an old/new replacement",
        ))
    }
    if let Some(bm) = base.as_map() {
        let dm = diff
            .as_map()
            .ok_or(DiffError::WrongFormat("map base requires a map diff"))?;
        return apply_map::<V>(bm, dm, dir).map(V::from_map)
    }
    let bl = base.as_list().ok_or(DiffError::WrongFormat("unknown base kind"))?;
    let dl = diff
        .as_list()
        .ok_or(DiffError::WrongFormat("list base requires a list diff"))?;
    apply_list(bl, dl, dir).map(V::from_list)
}

fn apply_map<V: TreeValue>(
    base: &V::Map, diff: &V::Map, dir: Direction,
) -> Result<V::Map, DiffError> {
    // patch removes `__deleted` keys and inserts `__added` ones, rollback does the opposite
    let (removing, inserting) = match dir {
        Direction::Patch => (DELETED_SUFFIX, ADDED_SUFFIX),
        Direction::Rollback => (ADDED_SUFFIX, DELETED_SUFFIX),
    };
    let mut out = base.clone();
    for k in diff.keys() {
        let dv = diff.get(k).ok_or_else(|| DiffError::MissingKey(k.clone()))?;
        if let Some(orig) = k.strip_suffix(removing) {
            if out.contains_key(orig) {
                out.remove(orig);
                continue
            }
        }
        if let Some(orig) = k.strip_suffix(inserting) {
            if !out.contains_key(orig) {
                out.insert(orig.to_string(), dv.clone());
                continue
            }
        }
        let prev = out.get(k).ok_or_else(|| DiffError::MissingKey(k.clone()))?;
        let next = apply(prev, dv, dir)?;
        out.insert(k.clone(), next);
    }
    Ok(out)
}

fn apply_list<V: TreeValue>(
    base: &[V], diff: &[V], dir: Direction,
) -> Result<Vec<V>, DiffError> {
    let mut out = base.to_vec();
    // number of elements removed so far; later tuples still carry their original positions
    let mut removed = 0;
    for entry in diff {
        let (op, index, payload) = parse_list_op(entry)?;
        let len = out.len();
        let at = index
            .checked_sub(removed)
            .ok_or(DiffError::IndexOutOfRange { index, len })?;
        let (removing, inserting) = match dir {
            Direction::Patch => (LIST_DELETE, LIST_INSERT),
            Direction::Rollback => (LIST_INSERT, LIST_DELETE),
        };
        if op == removing {
            if at >= len {
                return Err(DiffError::IndexOutOfRange { index, len })
            }
            out.remove(at);
            removed += 1;
        } else if op == inserting {
            if at > len {
                return Err(DiffError::IndexOutOfRange { index, len })
            }
            out.insert(at, payload.clone());
        } else if op == LIST_MODIFY {
            let prev = out
                .get(at)
                .ok_or(DiffError::IndexOutOfRange { index, len })?;
            let next = apply(prev, payload, dir)?;
            out[at] = next;
        } else {
            return Err(DiffError::UnknownOp(op.to_string()))
        }
    }
    Ok(out)
}

// encodings

impl TreeMap<Value> for BTreeMap<String, Value> {
    fn get(&self, key: &str) -> Option<&Value> {
        BTreeMap::get(self, key)
    }

    fn insert(&mut self, key: String, value: Value) {
        BTreeMap::insert(self, key, value);
    }

    fn remove(&mut self, key: &str) -> Option<Value> {
        BTreeMap::remove(self, key)
    }

    fn keys(&self) -> Vec<&String> {
        BTreeMap::keys(self).collect()
    }

    fn len(&self) -> usize {
        BTreeMap::len(self)
    }
}

impl TreeValue for Value {
    type Map = BTreeMap<String, Value>;

    fn is_scalar(&self) -> bool {
        Value::is_scalar(self)
    }

    fn same_kind(&self, other: &Self) -> bool {
        self.kind() == other.kind()
    }

    fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        Value::as_map(self)
    }

    fn as_list(&self) -> Option<&Vec<Self>> {
        Value::as_list(self)
    }

    fn from_map(map: BTreeMap<String, Value>) -> Self {
        Value::Map(map)
    }

    fn from_list(list: Vec<Self>) -> Self {
        Value::List(list)
    }

    fn as_text(&self) -> Option<&str> {
        self.as_str()
    }

    fn from_text(text: &str) -> Self {
        Value::Text(text.into())
    }

    fn as_index(&self) -> Option<usize> {
        self.as_int().and_then(|i| usize::try_from(i).ok())
    }

    fn from_index(index: usize) -> Self {
        Value::Int(index as i64)
    }
}

type JsonMap = serde_json::Map<String, serde_json::Value>;

impl TreeMap<serde_json::Value> for JsonMap {
    fn get(&self, key: &str) -> Option<&serde_json::Value> {
        JsonMap::get(self, key)
    }

    fn insert(&mut self, key: String, value: serde_json::Value) {
        JsonMap::insert(self, key, value);
    }

    fn remove(&mut self, key: &str) -> Option<serde_json::Value> {
        JsonMap::remove(self, key)
    }

    fn keys(&self) -> Vec<&String> {
        JsonMap::keys(self).collect()
    }

    fn len(&self) -> usize {
        JsonMap::len(self)
    }
}

impl TreeValue for serde_json::Value {
    type Map = JsonMap;

    fn is_scalar(&self) -> bool {
        !(self.is_array() || self.is_object())
    }

    fn same_kind(&self, other: &Self) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }

    fn as_map(&self) -> Option<&Self::Map> {
        self.as_object()
    }

    fn as_list(&self) -> Option<&Vec<Self>> {
        self.as_array()
    }

    fn from_map(map: Self::Map) -> Self {
        serde_json::Value::Object(map)
    }

    fn from_list(list: Vec<Self>) -> Self {
        serde_json::Value::Array(list)
    }

    fn as_text(&self) -> Option<&str> {
        self.as_str()
    }

    fn from_text(text: &str) -> Self {
        serde_json::Value::String(text.into())
    }

    fn as_index(&self) -> Option<usize> {
        self.as_u64().and_then(|i| usize::try_from(i).ok())
    }

    fn from_index(index: usize) -> Self {
        serde_json::Value::from(index as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn roundtrip<V: TreeValue + std::fmt::Debug>(a: &V, b: &V) -> DiffResult<V> {
        let d = diff(a, b);
        assert_eq!(&patch(a, &d).unwrap(), b);
        assert_eq!(&rollback(b, &d).unwrap(), a);
        d
    }

    #[test]
    fn test_same_is_undefined() {
        let a = json!({"a": [1, 2, {"b": null}], "c": "x"});
        assert!(diff(&a, &a).is_undefined());
        let v = Value::from(&a);
        assert!(diff(&v, &v).is_undefined());
    }

    #[test]
    fn test_map_keys() {
        let d = roundtrip(&json!({"x": 1}), &json!({"y": 1}));
        assert_eq!(d.value(), Some(&json!({"x__deleted": 1, "y__added": 1})));
        let d = roundtrip(
            &Value::from(&json!({"x": 1})),
            &Value::from(&json!({"y": 1})),
        );
        let m = d.value().unwrap().as_map().unwrap();
        assert_eq!(m.get("x__deleted"), Some(&Value::Int(1)));
        assert_eq!(m.get("y__added"), Some(&Value::Int(1)));
    }

    #[test]
    fn test_kind_change() {
        let a = json!([1, 2, 3, 4, 5, 6]);
        let b = json!({"a": [1, 2, 3]});
        let d = roundtrip(&a, &b);
        assert_eq!(d.value(), Some(&json!({"__old": a, "__new": b})));
    }

    #[test]
    fn test_list_tuples() {
        let a = json!([1, 2, 3, 4, 5, 6]);
        let b = json!([0, 1, 3, 4, 6, 7, 5]);
        let d = roundtrip(&a, &b);
        assert_eq!(
            d.value(),
            Some(&json!([
                ["~", 0, {"__old": 1, "__new": 0}],
                ["~", 1, {"__old": 2, "__new": 1}],
                ["~", 4, {"__old": 5, "__new": 6}],
                ["~", 5, {"__old": 6, "__new": 7}],
                ["+", 6, 5]
            ]))
        );
        // shrinking
        roundtrip(&json!([1, 2, 3, 4]), &json!([1, 9]));
        roundtrip(&json!([]), &json!([1, [2], {"a": 3}]));
        roundtrip(&json!([{"a": [1, 2]}, 5]), &json!([{"a": [2]}]));
    }

    #[test]
    fn test_structural_errors() {
        let d = diff(&json!({"x": {"y": 1}}), &json!({"x": {"y": 2}}));
        assert_eq!(
            patch(&json!({"z": 1}), &d),
            Err(DiffError::MissingKey("x".into()))
        );
        let d = diff(&json!([1, 2, 3]), &json!([1]));
        assert!(matches!(
            patch(&json!([]), &d),
            Err(DiffError::IndexOutOfRange { .. })
        ));
        let bad = DiffResult::new(json!([["?", 0, 1]]));
        assert_eq!(
            patch(&json!([1]), &bad),
            Err(DiffError::UnknownOp("?".into()))
        );
        let bad = DiffResult::new(json!([["~", 0]]));
        assert!(matches!(
            patch(&json!([1]), &bad),
            Err(DiffError::WrongFormat(_))
        ));
        let bad = DiffResult::new(json!({"a": 1}));
        assert!(matches!(patch(&json!(1), &bad), Err(DiffError::WrongFormat(_))));
    }
}

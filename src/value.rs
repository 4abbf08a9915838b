//! The Typed Value shared by contract storage and the structural diff engine.
//!
//! A [Value] has two encodings with identical semantics: the compact binary form used for
//! storage slots (canonical RLP, see [Value::encode]) and a human-readable form (JSON, through
//! serde).

use std::collections::BTreeMap;
use std::fmt;

use num_traits::FromPrimitive;
use serde::{
    de::{self, Deserialize, Deserializer, MapAccess, SeqAccess, Visitor},
    ser::{Serialize, SerializeMap, SerializeSeq, Serializer},
};

use crate::common::{Bytes, U256, U256RLP};
use crate::core::params::MAX_VALUE_DEPTH;

#[derive(Clone, Copy, PartialEq, Eq, Debug, FromPrimitive)]
pub enum ValueKind {
    Null = 0,
    Bool,
    Int,
    ExtInt,
    Float,
    Bytes,
    Text,
    List,
    Map,
    Tag,
}

/// Integer outside of the 64-bit signed range, stored as an explicit sign and a 256-bit
/// magnitude. Zero is never negative.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ExtInt {
    negative: bool,
    magnitude: U256,
}

#[derive(Clone, Debug)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    ExtInt(ExtInt),
    Float(f64),
    Bytes(Bytes),
    Text(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Tag(u64, Box<Value>),
}

// ExtInt

impl ExtInt {
    pub fn new(negative: bool, magnitude: U256) -> Self {
        Self {
            negative: negative && !magnitude.is_zero(),
            magnitude,
        }
    }

    #[inline(always)]
    pub fn is_negative(&self) -> bool {
        self.negative
    }

    #[inline(always)]
    pub fn magnitude(&self) -> &U256 {
        &self.magnitude
    }
}

impl From<U256> for ExtInt {
    fn from(u: U256) -> Self {
        Self::new(false, u)
    }
}

impl fmt::Display for ExtInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negative {
            f.write_str("-")?;
        }
        fmt::Display::fmt(&self.magnitude, f)
    }
}

// Value

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
            Value::ExtInt(_) => ValueKind::ExtInt,
            Value::Float(_) => ValueKind::Float,
            Value::Bytes(_) => ValueKind::Bytes,
            Value::Text(_) => ValueKind::Text,
            Value::List(_) => ValueKind::List,
            Value::Map(_) => ValueKind::Map,
            Value::Tag(..) => ValueKind::Tag,
        }
    }

    #[inline]
    pub fn is_scalar(&self) -> bool {
        !matches!(self, Value::List(_) | Value::Map(_))
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&Vec<Value>> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map().and_then(|m| m.get(key))
    }

    /// Canonical compact binary form.
    pub fn encode(&self) -> Vec<u8> {
        rlp::encode(self).to_vec()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, rlp::DecoderError> {
        rlp::decode(bytes)
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::ExtInt(a), Value::ExtInt(b)) => a == b,
            // bit-level comparison keeps equality byte-identical (NaN == NaN, 0.0 != -0.0)
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Tag(t1, a), Value::Tag(t2, b)) => t1 == t2 && a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<u64> for Value {
    fn from(u: u64) -> Self {
        if u <= i64::MAX as u64 {
            Value::Int(u as i64)
        } else {
            Value::ExtInt(U256::from(u).into())
        }
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<ExtInt> for Value {
    fn from(x: ExtInt) -> Self {
        Value::ExtInt(x)
    }
}

impl From<Bytes> for Value {
    fn from(b: Bytes) -> Self {
        Value::Bytes(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(l: Vec<Value>) -> Self {
        Value::List(l)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(m: BTreeMap<String, Value>) -> Self {
        Value::Map(m)
    }
}

impl From<&serde_json::Value> for Value {
    fn from(v: &serde_json::Value) -> Self {
        use serde_json::Value as J;
        match v {
            J::Null => Value::Null,
            J::Bool(b) => Value::Bool(*b),
            J::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if let Some(u) = n.as_u64() {
                    u.into()
                } else {
                    n.as_f64().map(Value::Float).unwrap_or(Value::Null)
                }
            }
            J::String(s) => Value::Text(s.clone()),
            J::Array(a) => Value::List(a.iter().map(Value::from).collect()),
            J::Object(o) => Value::Map(
                o.iter().map(|(k, v)| (k.clone(), Value::from(v))).collect(),
            ),
        }
    }
}

// compact binary encoding

#[inline(always)]
fn zigzag(i: i64) -> u64 {
    ((i << 1) ^ (i >> 63)) as u64
}

#[inline(always)]
fn unzigzag(u: u64) -> i64 {
    ((u >> 1) as i64) ^ -((u & 1) as i64)
}

impl rlp::Encodable for Value {
    fn rlp_append(&self, s: &mut rlp::RlpStream) {
        let kind = self.kind() as u8;
        match self {
            Value::Null => {
                s.begin_list(1).append(&kind);
            }
            Value::Bool(b) => {
                s.begin_list(2).append(&kind).append(&(*b as u8));
            }
            Value::Int(i) => {
                s.begin_list(2).append(&kind).append(&zigzag(*i));
            }
            Value::ExtInt(x) => {
                s.begin_list(3)
                    .append(&kind)
                    .append(&(x.negative as u8))
                    .append(&U256RLP(x.magnitude));
            }
            Value::Float(f) => {
                s.begin_list(2).append(&kind).append(&f.to_bits());
            }
            Value::Bytes(b) => {
                s.begin_list(2).append(&kind).append(b);
            }
            Value::Text(t) => {
                s.begin_list(2).append(&kind).append(t);
            }
            Value::List(items) => {
                s.begin_list(2).append(&kind);
                s.begin_list(items.len());
                for item in items {
                    s.append(item);
                }
            }
            Value::Map(entries) => {
                s.begin_list(2).append(&kind);
                s.begin_list(entries.len());
                for (k, v) in entries {
                    s.begin_list(2).append(k).append(v);
                }
            }
            Value::Tag(tag, inner) => {
                s.begin_list(3).append(&kind).append(tag).append(&**inner);
            }
        }
    }
}

impl rlp::Decodable for Value {
    fn decode(rlp: &rlp::Rlp) -> Result<Self, rlp::DecoderError> {
        decode_nested(rlp, 0)
    }
}

fn decode_nested(
    rlp: &rlp::Rlp, depth: usize,
) -> Result<Value, rlp::DecoderError> {
    if depth > MAX_VALUE_DEPTH {
        return Err(rlp::DecoderError::Custom("value nested too deep"))
    }
    let kind = ValueKind::from_u8(rlp.val_at(0)?)
        .ok_or(rlp::DecoderError::Custom("unknown value kind"))?;
    Ok(match kind {
        ValueKind::Null => Value::Null,
        ValueKind::Bool => Value::Bool(rlp.val_at::<u8>(1)? != 0),
        ValueKind::Int => Value::Int(unzigzag(rlp.val_at(1)?)),
        ValueKind::ExtInt => {
            let negative = rlp.val_at::<u8>(1)? != 0;
            let U256RLP(magnitude) = rlp.val_at(2)?;
            Value::ExtInt(ExtInt::new(negative, magnitude))
        }
        ValueKind::Float => Value::Float(f64::from_bits(rlp.val_at(1)?)),
        ValueKind::Bytes => Value::Bytes(rlp.val_at(1)?),
        ValueKind::Text => Value::Text(rlp.val_at(1)?),
        ValueKind::List => {
            let items = rlp.at(1)?;
            if !items.is_list() {
                return Err(rlp::DecoderError::RlpExpectedToBeList)
            }
            let mut out = Vec::with_capacity(items.item_count()?);
            for item in items.iter() {
                out.push(decode_nested(&item, depth + 1)?);
            }
            Value::List(out)
        }
        ValueKind::Map => {
            let mut entries = BTreeMap::new();
            for entry in rlp.at(1)?.iter() {
                entries.insert(
                    entry.val_at(0)?,
                    decode_nested(&entry.at(1)?, depth + 1)?,
                );
            }
            Value::Map(entries)
        }
        ValueKind::Tag => Value::Tag(
            rlp.val_at(1)?,
            Box::new(decode_nested(&rlp.at(2)?, depth + 1)?),
        ),
    })
}

// human-readable encoding

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::ExtInt(x) => serializer.serialize_str(&x.to_string()),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::Bytes(b) => b.serialize(serializer),
            Value::Text(t) => serializer.serialize_str(t),
            Value::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Map(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (k, v) in entries {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
            Value::Tag(_, inner) => inner.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(ValueVisitor)
    }
}

pub struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("any typed value")
    }

    fn visit_unit<E>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_none<E>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_some<D>(self, deserializer: D) -> Result<Value, D::Error>
    where
        D: Deserializer<'de>,
    {
        Value::deserialize(deserializer)
    }

    fn visit_bool<E>(self, b: bool) -> Result<Value, E> {
        Ok(Value::Bool(b))
    }

    fn visit_i64<E>(self, i: i64) -> Result<Value, E> {
        Ok(Value::Int(i))
    }

    fn visit_u64<E>(self, u: u64) -> Result<Value, E> {
        Ok(u.into())
    }

    fn visit_f64<E>(self, f: f64) -> Result<Value, E> {
        Ok(Value::Float(f))
    }

    fn visit_str<E>(self, s: &str) -> Result<Value, E>
    where
        E: de::Error,
    {
        Ok(Value::Text(s.into()))
    }

    fn visit_string<E>(self, s: String) -> Result<Value, E> {
        Ok(Value::Text(s))
    }

    fn visit_bytes<E>(self, b: &[u8]) -> Result<Value, E> {
        Ok(Value::Bytes(b.into()))
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let mut items = Vec::new();
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(Value::List(items))
    }

    fn visit_map<A>(self, mut map: A) -> Result<Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut entries = BTreeMap::new();
        while let Some((k, v)) = map.next_entry::<String, Value>()? {
            entries.insert(k, v);
        }
        Ok(Value::Map(entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Value {
        let mut m = BTreeMap::new();
        m.insert("name".to_string(), Value::from("token"));
        m.insert("supply".to_string(), Value::Int(-42));
        m.insert(
            "big".to_string(),
            Value::ExtInt(ExtInt::new(true, U256::MAX)),
        );
        m.insert(
            "list".to_string(),
            Value::List(vec![
                Value::Null,
                Value::Bool(true),
                Value::Float(1.5),
                Value::Bytes(vec![0u8, 1, 2].into()),
                Value::Tag(7, Box::new(Value::Int(0))),
            ]),
        );
        Value::Map(m)
    }

    #[test]
    fn test_compact_encoding() {
        let v = sample();
        let bytes = v.encode();
        assert_eq!(Value::decode(&bytes).unwrap(), v);
        // canonical: equal values encode to equal bytes
        assert_eq!(sample().encode(), bytes);
        assert_eq!(Value::decode(&Value::Null.encode()).unwrap(), Value::Null);
        assert!(Value::decode(&[0xc1, 0x7f]).is_err());
    }

    fn nested_list_bytes(depth: usize) -> Vec<u8> {
        let mut bytes = Value::Null.encode();
        for _ in 0..depth {
            let mut s = rlp::RlpStream::new_list(2);
            s.append(&(ValueKind::List as u8));
            s.begin_list(1);
            s.append_raw(&bytes, 1);
            bytes = s.out().to_vec();
        }
        bytes
    }

    #[test]
    fn test_nesting_limit() {
        let bytes = nested_list_bytes(MAX_VALUE_DEPTH);
        assert_eq!(Value::decode(&bytes).unwrap().encode(), bytes);
        for depth in [MAX_VALUE_DEPTH + 1, 5_000] {
            assert_eq!(
                Value::decode(&nested_list_bytes(depth)),
                Err(rlp::DecoderError::Custom("value nested too deep"))
            );
        }
    }

    #[test]
    fn test_zigzag() {
        for i in [0i64, 1, -1, i64::MAX, i64::MIN, 12345, -12345] {
            assert_eq!(unzigzag(zigzag(i)), i);
        }
        assert_eq!(zigzag(-1), 1);
        assert_eq!(zigzag(1), 2);
    }

    #[test]
    fn test_equality() {
        assert_eq!(Value::Float(f64::NAN), Value::Float(f64::NAN));
        assert_ne!(Value::Float(0.0), Value::Float(-0.0));
        assert_ne!(Value::Int(1), Value::Float(1.0));
        assert_eq!(
            ExtInt::new(true, U256::zero()),
            ExtInt::new(false, U256::zero())
        );
    }

    #[test]
    fn test_json() {
        let j: serde_json::Value =
            serde_json::from_str(r#"{"a":[1,2,{"b":null}],"c":"x","d":1.25}"#)
                .unwrap();
        let v = Value::from(&j);
        assert_eq!(v.get("c"), Some(&Value::from("x")));
        assert_eq!(v.to_json(), j);
        let v2: Value = serde_json::from_value(j.clone()).unwrap();
        assert_eq!(v, v2);
        assert_eq!(Value::from(u64::MAX).to_json(), "18446744073709551615");
    }
}

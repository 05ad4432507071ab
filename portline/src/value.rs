//! The dynamically-typed value domain carried by every message.
//!
//! A [`Message`](crate::packer::Message) is a sequence whose first element
//! names a handler; everything after it is an arbitrary argument tree built
//! from [`Value`]. `Value` is intentionally closed over the set both built-in
//! packers (`JsonPacker`, `BinaryPacker`) can round-trip losslessly: numbers,
//! strings, byte strings, lists, maps, and [`ProxyPackage`] (the RPC layer's
//! wire representation of a remote callable — see `portline-rpc`).
//!
//! `Value` is tagged (an ordinary `#[derive(Serialize, Deserialize)]` enum),
//! not an untagged JSON-Value lookalike: this crate fully controls both ends
//! of the wire, so there's no benefit to pretending the JSON packer produces
//! hand-authored JSON, and a tagged representation round-trips unambiguously
//! through both `serde_json` and `rmp-serde`.

use serde::{Deserialize, Serialize};

/// A remote-callable reference as it appears on the wire.
///
/// Positive `proxy_id` means "this callable lives on the sender's side of
/// the connection it arrived on"; negative means "this callable lives on
/// the receiver's side, referenced back by its own id" (the same-port
/// shortcut described in spec.md §4.9). Zero is never valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyPackage {
    pub proxy_id: i64,
    pub no_reply: bool,
}

/// The dynamically-typed value domain for message arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    /// An association list rather than a string-keyed map: the original
    /// message model (a Python dict) allows arbitrary hashable keys.
    Map(Vec<(Value, Value)>),
    Proxy(ProxyPackage),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::UInt(u) => i64::try_from(*u).ok(),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(v) => Some(v.as_slice()),
            _ => None,
        }
    }

    /// Walks `self` and every value reachable through `List`/`Map`,
    /// applying `f` to each node bottom-up. Used by the RPC layer to encode
    /// and decode argument trees without duplicating the traversal.
    pub fn map_tree(self, f: &mut impl FnMut(Value) -> Value) -> Value {
        let mapped = match self {
            Value::List(items) => {
                Value::List(items.into_iter().map(|v| v.map_tree(f)).collect())
            }
            Value::Map(entries) => Value::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.map_tree(f), v.map_tree(f)))
                    .collect(),
            ),
            other => other,
        };
        f(mapped)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_tree_visits_nested_values() {
        let tree = Value::List(vec![Value::Int(1), Value::Map(vec![(Value::Str("k".into()), Value::Int(2))])]);
        let mut seen = Vec::new();
        let _ = tree.map_tree(&mut |v| {
            if let Value::Int(i) = &v {
                seen.push(*i);
            }
            v
        });
        assert_eq!(seen, vec![1, 2]);
    }

    #[test]
    fn json_roundtrip() {
        let v = Value::List(vec![
            Value::Str("call".into()),
            Value::Int(-7),
            Value::Proxy(ProxyPackage { proxy_id: 3, no_reply: false }),
        ]);
        let s = serde_json::to_string(&v).unwrap();
        let back: Value = serde_json::from_str(&s).unwrap();
        assert_eq!(v, back);
    }
}

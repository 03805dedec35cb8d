// Copyright 2026 revenant Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A dynamic, loosely typed value with shallow-copy semantics.

use std::{collections::BTreeMap, fmt::Display, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::code::{Value, ValueKind};

/// Fields of an [`Object::Map`].
pub type Fields = BTreeMap<String, Object>;

/// A dynamic value.
///
/// Composite variants keep their contents behind an [`Arc`]. Cloning an [`Object`] never copies nested structure,
/// and [`Value::shadow_copy`] allocates a fresh top level that shares every nested composite with the original.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Object {
    /// Absence of a value.
    #[default]
    Null,
    /// Boolean.
    Bool(bool),
    /// Number.
    Number(f64),
    /// String.
    String(Arc<str>),
    /// Ordered list.
    Array(Arc<Vec<Object>>),
    /// Named fields.
    Map(Arc<Fields>),
}

impl Object {
    /// Build a map from `(name, value)` pairs.
    pub fn map<N, I>(fields: I) -> Self
    where
        N: Into<String>,
        I: IntoIterator<Item = (N, Object)>,
    {
        Self::Map(Arc::new(fields.into_iter().map(|(n, v)| (n.into(), v)).collect()))
    }

    /// Build an array from values.
    pub fn array<I>(items: I) -> Self
    where
        I: IntoIterator<Item = Object>,
    {
        Self::Array(Arc::new(items.into_iter().collect()))
    }

    /// Look up a field of a map.
    pub fn field(&self, name: &str) -> Option<&Object> {
        match self {
            Object::Map(fields) => fields.get(name),
            _ => None,
        }
    }

    /// Look up an element of an array.
    pub fn index(&self, index: usize) -> Option<&Object> {
        match self {
            Object::Array(items) => items.get(index),
            _ => None,
        }
    }

    /// Set a field of a map, copying the top level if it is shared.
    ///
    /// Returns `false` if `self` is not a map.
    pub fn set_field(&mut self, name: impl Into<String>, value: Object) -> bool {
        match self {
            Object::Map(fields) => {
                Arc::make_mut(fields).insert(name.into(), value);
                true
            }
            _ => false,
        }
    }

    /// The number, if `self` is one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Object::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// The string, if `self` is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Object::String(s) => Some(s),
            _ => None,
        }
    }

    /// The boolean, if `self` is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Object::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Check whether two objects are the same allocation.
    ///
    /// Primitives have no identity and never compare as shared.
    pub fn ptr_eq(&self, other: &Object) -> bool {
        match (self, other) {
            (Object::Array(a), Object::Array(b)) => Arc::ptr_eq(a, b),
            (Object::Map(a), Object::Map(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Value for Object {
    fn kind(&self) -> ValueKind {
        match self {
            Object::Array(_) | Object::Map(_) => ValueKind::Composite,
            _ => ValueKind::Primitive,
        }
    }

    fn shadow_copy(&self) -> Self {
        match self {
            Object::Array(items) => Object::Array(Arc::new(items.as_ref().clone())),
            Object::Map(fields) => Object::Map(Arc::new(fields.as_ref().clone())),
            other => other.clone(),
        }
    }
}

impl Display for Object {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Object::Null => write!(f, "null"),
            Object::Bool(b) => write!(f, "{b}"),
            Object::Number(n) => write!(f, "{n}"),
            Object::String(s) => write!(f, "{s:?}"),
            Object::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Object::Map(fields) => {
                write!(f, "{{")?;
                for (i, (name, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name}: {value}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<bool> for Object {
    fn from(v: bool) -> Self {
        Object::Bool(v)
    }
}

impl From<f64> for Object {
    fn from(v: f64) -> Self {
        Object::Number(v)
    }
}

impl From<i64> for Object {
    fn from(v: i64) -> Self {
        Object::Number(v as f64)
    }
}

impl From<i32> for Object {
    fn from(v: i32) -> Self {
        Object::Number(v as f64)
    }
}

impl From<&str> for Object {
    fn from(v: &str) -> Self {
        Object::String(v.into())
    }
}

impl From<String> for Object {
    fn from(v: String) -> Self {
        Object::String(v.into())
    }
}

impl From<Vec<Object>> for Object {
    fn from(v: Vec<Object>) -> Self {
        Object::Array(Arc::new(v))
    }
}

impl From<Fields> for Object {
    fn from(v: Fields) -> Self {
        Object::Map(Arc::new(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test]
    fn test_object_kind() {
        assert_eq!(Object::Null.kind(), ValueKind::Primitive);
        assert_eq!(Object::from(1).kind(), ValueKind::Primitive);
        assert_eq!(Object::from("a").kind(), ValueKind::Primitive);
        assert_eq!(Object::from(true).kind(), ValueKind::Primitive);
        assert_eq!(Object::array([]).kind(), ValueKind::Composite);
        assert_eq!(Object::map([("n", Object::from(1))]).kind(), ValueKind::Composite);
    }

    #[test_log::test]
    fn test_shadow_copy_is_shallow() {
        let inner = Object::map([("x", Object::from(1))]);
        let outer = Object::map([("n", Object::from(1)), ("inner", inner.clone())]);

        let copy = outer.shadow_copy();
        assert_eq!(copy, outer);
        // fresh top level
        assert!(!copy.ptr_eq(&outer));
        // shared nested level
        assert!(copy.field("inner").unwrap().ptr_eq(&inner));
    }

    #[test_log::test]
    fn test_set_field_does_not_leak_into_copies() {
        let mut a = Object::map([("n", Object::from(1))]);
        let b = a.clone();
        assert!(a.set_field("n", Object::from(2)));
        assert_eq!(a.field("n").and_then(Object::as_f64), Some(2.0));
        assert_eq!(b.field("n").and_then(Object::as_f64), Some(1.0));
        assert!(!Object::from(1).set_field("n", Object::Null));
    }

    #[test_log::test]
    fn test_json() {
        let o = Object::map([
            ("n", Object::from(1)),
            ("s", Object::from("x")),
            ("l", Object::array([Object::from(true), Object::Null])),
        ]);
        let json = serde_json::to_string(&o).unwrap();
        assert_eq!(json, r#"{"l":[true,null],"n":1.0,"s":"x"}"#);
        let back: Object = serde_json::from_str(&json).unwrap();
        assert_eq!(back, o);
        assert_eq!(o.to_string(), r#"{l: [true, null], n: 1, s: "x"}"#);
    }
}

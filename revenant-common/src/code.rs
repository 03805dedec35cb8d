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

//! Key and value traits shared by all revenant components.

use std::{
    collections::{BTreeMap, HashMap},
    fmt::{Debug, Display},
    hash::Hash,
};

use serde::{de::DeserializeOwned, Serialize};

/// Key trait for the in-memory registries.
pub trait Key: Send + Sync + 'static + Hash + Eq + Clone + Debug {}
impl<T: Send + Sync + 'static + std::hash::Hash + Eq + Clone + Debug> Key for T {}

/// Key trait for the durable store.
pub trait StorageKey: Key + Serialize + DeserializeOwned {}
impl<T> StorageKey for T where T: Key + Serialize + DeserializeOwned {}

/// Value trait for the durable store.
pub trait StorageValue: Send + Sync + 'static + Serialize + DeserializeOwned {}
impl<T> StorageValue for T where T: Send + Sync + 'static + Serialize + DeserializeOwned {}

/// The shape of a cacheable value.
///
/// Only composite values can be held weakly: a primitive has no identity of its own that could be observed to be
/// reclaimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// Scalars and strings.
    Primitive,
    /// Records, maps and lists.
    Composite,
}

impl Display for ValueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueKind::Primitive => write!(f, "primitive"),
            ValueKind::Composite => write!(f, "composite"),
        }
    }
}

/// Value trait for the in-memory registries.
pub trait Value: Send + Sync + 'static {
    /// The shape of the value. Composite unless overridden.
    fn kind(&self) -> ValueKind {
        ValueKind::Composite
    }

    /// Copy the top-level fields of the value.
    ///
    /// Fields held through shared pointers (`Arc`, or the composite variants of [`crate::object::Object`]) must keep
    /// pointing at the same allocation as in `self`. Owned fields are cloned. The copy must stay usable after every
    /// other reference to `self` is gone.
    fn shadow_copy(&self) -> Self
    where
        Self: Sized;
}

macro_rules! for_all_primitives {
    ($macro:ident) => {
        $macro! {
            bool, char,
            u8, u16, u32, u64, u128, usize,
            i8, i16, i32, i64, i128, isize,
            f32, f64,
            String,
        }
    };
}

macro_rules! impl_primitive_value {
    ($( $type:ty, )*) => {
        $(
            impl Value for $type {
                fn kind(&self) -> ValueKind {
                    ValueKind::Primitive
                }

                fn shadow_copy(&self) -> Self {
                    self.clone()
                }
            }
        )*
    };
}

for_all_primitives! { impl_primitive_value }

/// Clones the elements: nested structure is shared only for elements that are shared pointers, e.g. `Arc<_>` or
/// [`crate::object::Object`].
impl<T> Value for Vec<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn shadow_copy(&self) -> Self {
        self.clone()
    }
}

/// Clones the elements: nested structure is shared only for elements that are shared pointers, e.g. `Arc<_>` or
/// [`crate::object::Object`].
impl<T> Value for HashMap<String, T>
where
    T: Clone + Send + Sync + 'static,
{
    fn shadow_copy(&self) -> Self {
        self.clone()
    }
}

/// Clones the elements: nested structure is shared only for elements that are shared pointers, e.g. `Arc<_>` or
/// [`crate::object::Object`].
impl<T> Value for BTreeMap<String, T>
where
    T: Clone + Send + Sync + 'static,
{
    fn shadow_copy(&self) -> Self {
        self.clone()
    }
}

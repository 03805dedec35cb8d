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

use std::sync::Arc;

use crate::code::ValueKind;

/// Revenant error.
///
/// The error is cheap to clone so that one failure can be delivered to every caller waiting on the same in-flight
/// operation.
#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
    /// A value that cannot be held weakly was offered to a cache.
    #[error("can only cache composite values, but got a {kind} value for key {key}")]
    InvalidValueKind {
        /// Debug representation of the key.
        key: String,
        /// Kind of the rejected value.
        kind: ValueKind,
    },
    /// The population operation failed.
    #[error("population failed: {0}")]
    Population(Arc<anyhow::Error>),
    /// Config error.
    #[error("config error: {0}")]
    Config(String),
    /// I/O error.
    #[error("io error: {0}")]
    Io(Arc<std::io::Error>),
    /// Encoding or decoding error.
    #[error("codec error: {0}")]
    Codec(Arc<serde_json::Error>),
}

impl Error {
    /// Build an [`Error::InvalidValueKind`] for the given key.
    pub fn invalid_value_kind(key: &impl std::fmt::Debug, kind: ValueKind) -> Self {
        Self::InvalidValueKind {
            key: format!("{key:?}"),
            kind,
        }
    }

    /// Wrap an external error as a population failure.
    pub fn population(e: impl Into<anyhow::Error>) -> Self {
        Self::Population(Arc::new(e.into()))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(Arc::new(e))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Codec(Arc::new(e))
    }
}

/// Revenant result.
pub type Result<T> = std::result::Result<T, Error>;

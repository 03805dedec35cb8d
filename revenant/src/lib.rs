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

//! revenant - a keyed object cache that lets unused values be reclaimed, revives recently active ones from a shadow
//! copy for a grace window, and deduplicates concurrent population of the same key.
//!
//! See [`prelude`] for the public surface.

pub use revenant_common as common;
pub use revenant_memory as memory;
pub use revenant_storage as storage;

/// Everything needed to use revenant.
pub mod prelude;

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

//! In-memory components of revenant: the weak registry, the resilient cache and single-flight population.

mod dedup;
mod handle;
mod inflight;
mod populator;
mod registry;
mod resilient;

pub use dedup::Dedup;
pub use handle::{Handle, SubscriptionId, WeakHandle};
pub use inflight::{notify_all, Enqueue, InflightGuard, InflightMap, Notifier, Waiter};
pub use populator::{Populator, Registration};
pub use registry::{ReclaimCallback, WeakRegistry};
pub use resilient::{Activity, FinalizeCallback, ResilientCache, ResilientCacheBuilder, DEFAULT_GRACE_PERIOD};

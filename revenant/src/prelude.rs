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

pub use crate::{
    common::{
        code::{Key, StorageKey, StorageValue, Value, ValueKind},
        error::{Error, Result},
        object::{Fields, Object},
        spawn::{BackgroundShutdownRuntime, Spawner},
    },
    memory::{
        Activity, Dedup, FinalizeCallback, Handle, Populator, ReclaimCallback, Registration, ResilientCache,
        ResilientCacheBuilder, WeakHandle, WeakRegistry, DEFAULT_GRACE_PERIOD,
    },
    storage::{ExpiringStore, ExpiringStoreBuilder, DEFAULT_EXPIRE},
};

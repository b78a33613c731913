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

//! The channel registry: the `channels` map, the monotonic id counter, and
//! the shutdown barrier. A single shard-free concurrent map suffices here —
//! we use a `RwLock<HashMap<..>>` rather than a sharded structure, and keep
//! this lock entirely separate from any per-channel lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock, Weak};

use crate::channel::{ChannelHandle, ChannelId};
use crate::error::Error;

/// Shared state backing a [`ChannelRegistry`]. Kept as a distinct type so
/// [`ChannelHandle`] can hold a [`Weak`] back-reference to it without
/// creating a reference cycle: ownership of a channel is held exclusively
/// by the registry, and every other reference is a back-reference that
/// `unregister` invalidates.
pub(crate) struct Inner {
    channels: RwLock<HashMap<ChannelId, Arc<ChannelHandle>>>,
    next_id: AtomicU32,
    max_channels: u32,
    /// Flipped exactly once, under `channels`'s write lock, when the
    /// service begins shutting down.
    closing: std::sync::atomic::AtomicBool,
}

/// A cheaply-cloneable handle to the shared channel registry.
#[derive(Clone)]
pub struct ChannelRegistry {
    inner: Arc<Inner>,
}

impl ChannelRegistry {
    /// Build an empty registry enforcing `max_channels` concurrently
    /// registered channels.
    pub fn new(max_channels: u32) -> Self {
        ChannelRegistry {
            inner: Arc::new(Inner {
                channels: RwLock::new(HashMap::new()),
                next_id: AtomicU32::new(0),
                max_channels,
                closing: std::sync::atomic::AtomicBool::new(false),
            }),
        }
    }

    pub(crate) fn downgrade(&self) -> Weak<Inner> {
        Arc::downgrade(&self.inner)
    }

    /// Allocate the next monotonically-increasing local channel id. Ids are
    /// unique for the lifetime of the registry and never reused. Does not
    /// itself insert into the map.
    fn allocate_id(&self) -> ChannelId {
        ChannelId(self.inner.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Whether the service is closing. Registrations and inbound opens
    /// must be refused from this point on.
    pub fn is_closing(&self) -> bool {
        self.inner.closing.load(Ordering::SeqCst)
    }

    /// Latch `closing`. Idempotent: returns `true` the first time it takes
    /// effect, `false` on any subsequent call.
    pub(crate) fn begin_closing(&self) -> bool {
        !self.inner.closing.swap(true, Ordering::SeqCst)
    }

    /// How many channels are currently registered.
    pub fn channel_count(&self) -> usize {
        self.inner.channels.read().expect("registry lock poisoned").len()
    }

    /// Allocate an id, reserve a slot, and insert `build(id)`'s result
    /// under the shutdown barrier. `build` is given the allocated id so it
    /// can construct the [`ChannelHandle`] with it baked in.
    pub(crate) fn register(
        &self,
        build: impl FnOnce(ChannelId) -> Arc<ChannelHandle>,
    ) -> Result<Arc<ChannelHandle>, Error> {
        if self.channel_count() as u32 >= self.max_channels {
            return Err(Error::TooManyChannels);
        }
        let id = self.allocate_id();
        let handle = build(id);

        let mut channels = self.inner.channels.write().expect("registry lock poisoned");
        if self.inner.closing.load(Ordering::SeqCst) {
            return Err(Error::ServiceClosing);
        }
        channels.insert(id, handle.clone());
        log::debug!("registered channel {:?} ({})", id, handle.kind);
        Ok(handle)
    }

    /// Idempotent removal of a registered channel.
    pub(crate) fn unregister(&self, id: ChannelId) {
        let removed = self
            .inner
            .channels
            .write()
            .expect("registry lock poisoned")
            .remove(&id);
        if removed.is_some() {
            log::debug!("unregistered channel {:?}", id);
        }
    }

    /// Look up a registered channel by local id.
    pub(crate) fn get(&self, id: ChannelId) -> Option<Arc<ChannelHandle>> {
        self.inner
            .channels
            .read()
            .expect("registry lock poisoned")
            .get(&id)
            .cloned()
    }

    /// Snapshot of all currently registered channels, used by the close
    /// coordinator to fan work out across them.
    pub(crate) fn all(&self) -> Vec<Arc<ChannelHandle>> {
        self.inner
            .channels
            .read()
            .expect("registry lock poisoned")
            .values()
            .cloned()
            .collect()
    }
}

/// Remove `id` given only the weak-upgraded [`Inner`], used by
/// [`ChannelHandle`] itself (which only ever holds a `Weak<Inner>`, never a
/// full [`ChannelRegistry`], to avoid a reference cycle).
pub(crate) fn unregister_raw(inner: &Arc<Inner>, id: ChannelId) {
    let removed = inner.channels.write().expect("registry lock poisoned").remove(&id);
    if removed.is_some() {
        log::debug!("unregistered channel {:?}", id);
    }
}

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

//! The close coordinator: graceful vs. immediate shutdown, and the
//! ordering of sub-closeables (channels, then forwarders, then the
//! transport).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Mutex;

use crate::forward::Forwarder;
use crate::future::{self, CloseFuture};
use crate::registry::ChannelRegistry;

/// Drives a [`ChannelRegistry`] and a fixed set of [`Forwarder`]s through
/// graceful or immediate shutdown exactly once.
pub struct CloseCoordinator {
    registry: ChannelRegistry,
    forwarders: Vec<Arc<dyn Forwarder>>,
    started: AtomicBool,
    resolvers: Mutex<Vec<future::Resolver<()>>>,
    done: AtomicBool,
}

impl CloseCoordinator {
    pub(crate) fn new(registry: ChannelRegistry, forwarders: Vec<Arc<dyn Forwarder>>) -> Self {
        CloseCoordinator {
            registry,
            forwarders,
            started: AtomicBool::new(false),
            resolvers: Mutex::new(Vec::new()),
            done: AtomicBool::new(false),
        }
    }

    /// A future resolving once shutdown (of whichever mode was first
    /// requested) has fully completed. Safe to call any number of times
    /// before or after shutdown begins — every caller resolves the same
    /// close future exactly once.
    pub async fn close_future(&self) -> CloseFuture {
        let (resolver, fut) = future::pair();
        if self.done.load(Ordering::SeqCst) {
            resolver.resolve(());
        } else {
            self.resolvers.lock().await.push(resolver);
        }
        fut
    }

    fn take_started(&self) -> bool {
        !self.started.swap(true, Ordering::SeqCst)
    }

    async fn finish(&self) {
        self.done.store(true, Ordering::SeqCst);
        let resolvers = std::mem::take(&mut *self.resolvers.lock().await);
        for r in resolvers {
            r.resolve(());
        }
    }

    /// Graceful shutdown: refuse new registrations, let every existing
    /// channel drain (EOF, then CLOSE, then its pending writes), close
    /// sub-services in order, then the transport.
    pub async fn graceful(&self) {
        if !self.take_started() {
            return;
        }
        self.registry.begin_closing();
        log::info!("beginning graceful shutdown: draining {} channel(s)", self.registry.channel_count());

        for handle in self.registry.all() {
            let channel = crate::channel::Channel::new(handle.clone());
            if let Err(e) = channel.eof().await {
                log::debug!("channel {:?}: EOF during graceful close failed: {}", handle.local_id, e);
            }
            match channel.close().await {
                Ok(close_future) => {
                    if let Err(e) = close_future.wait_timeout(std::time::Duration::from_secs(30)).await {
                        log::warn!("channel {:?}: close did not complete in time: {}", handle.local_id, e);
                    }
                }
                Err(e) => log::debug!("channel {:?}: close during graceful shutdown failed: {}", handle.local_id, e),
            }
        }

        for forwarder in &self.forwarders {
            forwarder.shutdown().await;
        }
        self.finish().await;
        log::info!("graceful shutdown complete");
    }

    /// Immediate shutdown: mark every channel Closing, discard pending
    /// writes with `ClosedChannel`, and close sub-services concurrently
    /// rather than in sequence.
    pub async fn immediate(&self) {
        if !self.take_started() {
            return;
        }
        self.registry.begin_closing();
        log::info!("beginning immediate shutdown: {} channel(s)", self.registry.channel_count());

        for handle in self.registry.all() {
            handle.force_close().await;
        }

        join_all(self.forwarders.iter().map(|f| f.shutdown())).await;
        self.finish().await;
        log::info!("immediate shutdown complete");
    }
}

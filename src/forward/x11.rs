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

//! `x11Forward`: promotes externally accepted X11 client
//! connections into `"x11"` channels (RFC 4254 §6.3.2). The local X11
//! display socket and the accept loop that watches it are external
//! collaborators; this is the seam they call into.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

use crate::channel::{Channel, ChannelEvents, ChannelKind};
use crate::dispatcher::Dispatcher;
use crate::error::Error;
use crate::forward::Forwarder;
use crate::future::OpenFuture;

/// Fan-out service for `"x11"` channels.
pub struct X11Forwarder {
    dispatcher: Arc<Dispatcher>,
    shutdown: Notify,
    closed: AtomicBool,
}

impl X11Forwarder {
    pub(crate) fn new(dispatcher: Arc<Dispatcher>) -> Self {
        X11Forwarder {
            dispatcher,
            shutdown: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Resolves once [`Forwarder::shutdown`] has been called.
    pub async fn shutdown_signal(&self) {
        self.shutdown.notified().await;
    }

    /// An X11 client connected to our display socket is promoted to an
    /// `"x11"` channel offered to the peer.
    pub async fn open_x11(
        &self,
        originator_address: String,
        originator_port: u32,
    ) -> Result<(Channel, ChannelEvents, OpenFuture), Error> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ServiceClosing);
        }
        self.dispatcher
            .open_channel(ChannelKind::X11 {
                originator_address,
                originator_port,
            })
            .await
    }
}

#[async_trait::async_trait]
impl Forwarder for X11Forwarder {
    async fn shutdown(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.shutdown.notify_waiters();
            log::debug!("x11 forwarder shut down");
        }
    }
}

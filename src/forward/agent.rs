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

//! `agentForward`: promotes connections accepted on the forwarded agent socket into
//! `"auth-agent@openssh.com"` channels. The platform-native local socket
//! (a Unix domain socket, or a named pipe on Windows) is an external
//! collaborator entirely outside this core's concern.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

use crate::channel::{Channel, ChannelEvents, ChannelKind};
use crate::dispatcher::Dispatcher;
use crate::error::Error;
use crate::forward::Forwarder;
use crate::future::OpenFuture;

/// Fan-out service for `"auth-agent@openssh.com"` channels.
pub struct AgentForwarder {
    dispatcher: Arc<Dispatcher>,
    shutdown: Notify,
    closed: AtomicBool,
}

impl AgentForwarder {
    pub(crate) fn new(dispatcher: Arc<Dispatcher>) -> Self {
        AgentForwarder {
            dispatcher,
            shutdown: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Resolves once [`Forwarder::shutdown`] has been called.
    pub async fn shutdown_signal(&self) {
        self.shutdown.notified().await;
    }

    /// A connection accepted on the forwarded agent socket is promoted to
    /// an `"auth-agent@openssh.com"` channel offered to the peer.
    pub async fn open_agent_channel(&self) -> Result<(Channel, ChannelEvents, OpenFuture), Error> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ServiceClosing);
        }
        self.dispatcher.open_channel(ChannelKind::AuthAgent).await
    }
}

#[async_trait::async_trait]
impl Forwarder for AgentForwarder {
    async fn shutdown(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.shutdown.notify_waiters();
            log::debug!("agent forwarder shut down");
        }
    }
}

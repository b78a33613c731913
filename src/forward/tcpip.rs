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

//! `tcpipForwarder`: local (`direct-tcpip`) and remote
//! (`forwarded-tcpip`) TCP/IP forwarding. The bind sockets and the loop
//! that accepts connections on them are external collaborators;
//! this type is the seam they call into to turn an accepted connection
//! into a channel, and to ask the peer to open or cancel a remote forward.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

use crate::channel::{Channel, ChannelEvents, ChannelKind};
use crate::dispatcher::Dispatcher;
use crate::encoding::Encode;
use crate::error::Error;
use crate::forward::Forwarder;
use crate::future::{OpenFuture, RequestFuture};

/// Fan-out service for `direct-tcpip`/`forwarded-tcpip` channels.
pub struct TcpIpForwarder {
    dispatcher: Arc<Dispatcher>,
    shutdown: Notify,
    closed: AtomicBool,
}

impl TcpIpForwarder {
    pub(crate) fn new(dispatcher: Arc<Dispatcher>) -> Self {
        TcpIpForwarder {
            dispatcher,
            shutdown: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Resolves once [`Forwarder::shutdown`] has been called, so an
    /// external accept loop can select on it alongside `accept()`.
    pub async fn shutdown_signal(&self) {
        self.shutdown.notified().await;
    }

    /// A connection accepted on a socket we bound for the peer (remote
    /// forward) is promoted to a `forwarded-tcpip` channel.
    pub async fn open_forwarded(
        &self,
        connected_address: String,
        connected_port: u32,
        originator_address: String,
        originator_port: u32,
    ) -> Result<(Channel, ChannelEvents, OpenFuture), Error> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ServiceClosing);
        }
        self.dispatcher
            .open_channel(ChannelKind::ForwardedTcpIp {
                connected_address,
                connected_port,
                originator_address,
                originator_port,
            })
            .await
    }

    /// A locally accepted connection (e.g. a SOCKS/port-forward listener on
    /// our side) is promoted to a `direct-tcpip` channel.
    pub async fn open_direct(
        &self,
        host_to_connect: String,
        port_to_connect: u32,
        originator_address: String,
        originator_port: u32,
    ) -> Result<(Channel, ChannelEvents, OpenFuture), Error> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ServiceClosing);
        }
        self.dispatcher
            .open_channel(ChannelKind::DirectTcpIp {
                host_to_connect,
                port_to_connect,
                originator_address,
                originator_port,
            })
            .await
    }

    /// Ask the peer to start forwarding connections on `address:port` to us
    /// (RFC 4254 §7.1 `"tcpip-forward"`).
    pub async fn request_remote_forward(&self, address: &str, port: u32) -> Result<Option<RequestFuture>, Error> {
        let mut payload = Vec::new();
        payload.extend_ssh_string(address.as_bytes());
        payload.push_u32_be(port);
        self.dispatcher
            .router()
            .send_global_request(self.dispatcher.transport(), "tcpip-forward", true, &payload)
            .await
    }

    /// Ask the peer to stop forwarding `address:port` (`"cancel-tcpip-forward"`).
    pub async fn cancel_remote_forward(&self, address: &str, port: u32) -> Result<Option<RequestFuture>, Error> {
        let mut payload = Vec::new();
        payload.extend_ssh_string(address.as_bytes());
        payload.push_u32_be(port);
        self.dispatcher
            .router()
            .send_global_request(self.dispatcher.transport(), "cancel-tcpip-forward", true, &payload)
            .await
    }
}

#[async_trait::async_trait]
impl Forwarder for TcpIpForwarder {
    async fn shutdown(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.shutdown.notify_waiters();
            log::debug!("tcpip forwarder shut down");
        }
    }
}

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

//! [`ConnectionService`]: the top-level object a transport hands inbound
//! packets to and that user code drives channel opens, request handlers
//! and shutdown through.

use std::sync::Arc;

use crate::channel::{Channel, ChannelEvents, ChannelFactory, ChannelKind};
use crate::close::CloseCoordinator;
use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::error::Error;
use crate::forward::{AgentForwarder, Forwarder, TcpIpForwarder, X11Forwarder};
use crate::future::{CloseFuture, OpenResolution};
use crate::registry::ChannelRegistry;
use crate::request::{RequestHandler, RequestRouter};
use crate::transport::TransportEndpoint;

/// One SSH session's connection-service core: the channel registry,
/// dispatcher, request router, the three forwarders, and the close
/// coordinator, all bound to a single [`TransportEndpoint`].
pub struct ConnectionService {
    dispatcher: Arc<Dispatcher>,
    close: CloseCoordinator,
    tcpip_forwarder: Arc<TcpIpForwarder>,
    agent_forward: Arc<AgentForwarder>,
    x11_forward: Arc<X11Forwarder>,
}

impl ConnectionService {
    /// Build a new connection service over `transport`, configured per
    /// `config`.
    pub fn new(transport: Arc<dyn TransportEndpoint>, config: Config) -> Arc<Self> {
        let registry = ChannelRegistry::new(config.max_sshd_channels);
        let router = Arc::new(RequestRouter::new());
        let dispatcher = Arc::new(Dispatcher::new(registry.clone(), router, transport, config));

        let tcpip_forwarder = Arc::new(TcpIpForwarder::new(dispatcher.clone()));
        let agent_forward = Arc::new(AgentForwarder::new(dispatcher.clone()));
        let x11_forward = Arc::new(X11Forwarder::new(dispatcher.clone()));
        let forwarders: Vec<Arc<dyn Forwarder>> =
            vec![tcpip_forwarder.clone(), agent_forward.clone(), x11_forward.clone()];
        let close = CloseCoordinator::new(registry, forwarders);

        Arc::new(ConnectionService {
            dispatcher,
            close,
            tcpip_forwarder,
            agent_forward,
            x11_forward,
        })
    }

    /// Register the channel-type factory for inbound opens of `type_name`.
    pub async fn register_factory(&self, type_name: impl Into<String>, factory: Arc<dyn ChannelFactory>) {
        self.dispatcher.register_factory(type_name, factory).await;
    }

    /// Append a handler to the shared global/channel request chain.
    pub async fn push_request_handler(&self, handler: Arc<dyn RequestHandler>) {
        self.dispatcher.router().push_handler(handler).await;
    }

    /// Initiate an outbound channel open. Returns immediately with the
    /// channel handle, its event stream, and the raw open future — prefer
    /// [`ConnectionService::open_and_wait`] unless you need to race the
    /// open against other work.
    pub async fn open_channel(&self, kind: ChannelKind) -> Result<(Channel, ChannelEvents, crate::future::OpenFuture), Error> {
        self.dispatcher.open_channel(kind).await
    }

    /// Open a channel and wait for the handshake to resolve, bounded by
    /// `channel-open-timeout-ms`.
    pub async fn open_and_wait(&self, kind: ChannelKind) -> Result<(Channel, ChannelEvents), Error> {
        let (channel, events, open_future) = self.open_channel(kind).await?;
        let timeout = self.dispatcher.config().channel_open_timeout;
        match open_future.wait_timeout(timeout).await? {
            OpenResolution::Success { .. } => Ok((channel, events)),
            OpenResolution::Failure { reason, message } => Err(Error::OpenFailure { reason, message }),
        }
    }

    /// Feed one inbound message to the dispatcher.
    /// On a session-fatal protocol violation the service is torn down
    /// immediately before the error is returned.
    pub async fn process(&self, cmd: u8, payload: &[u8]) -> Result<(), Error> {
        let result = self.dispatcher.process(cmd, payload).await;
        if let Err(e) = &result {
            if e.is_session_fatal() {
                log::error!("session-fatal protocol violation, tearing down: {}", e);
                self.close.immediate().await;
            }
        }
        result
    }

    /// The local/remote TCP-IP forwarding fan-out service.
    pub fn tcpip_forwarder(&self) -> &Arc<TcpIpForwarder> {
        &self.tcpip_forwarder
    }

    /// The agent-forwarding fan-out service.
    pub fn agent_forward(&self) -> &Arc<AgentForwarder> {
        &self.agent_forward
    }

    /// The X11-forwarding fan-out service.
    pub fn x11_forward(&self) -> &Arc<X11Forwarder> {
        &self.x11_forward
    }

    /// How many channels are currently registered.
    pub fn channel_count(&self) -> usize {
        self.dispatcher.registry().channel_count()
    }

    /// Whether the service has begun or completed shutdown. Once true,
    /// every subsequent inbound open is refused.
    pub fn is_closing(&self) -> bool {
        self.dispatcher.registry().is_closing()
    }

    /// Whether inbound `"session"` channel opens are currently accepted.
    pub fn allow_more_sessions(&self) -> bool {
        self.dispatcher.allow_more_sessions()
    }

    /// Flip the `"session"`-open toggle at runtime. A [`RequestHandler`] for
    /// `"no-more-sessions@openssh.com"` calls this with `false` on receipt.
    pub fn set_allow_more_sessions(&self, allow: bool) {
        self.dispatcher.set_allow_more_sessions(allow);
    }

    /// Begin graceful shutdown.
    pub async fn close_graceful(&self) {
        self.close.graceful().await;
    }

    /// Begin immediate shutdown.
    pub async fn close_immediate(&self) {
        self.close.immediate().await;
    }

    /// A future resolving once whichever shutdown mode was first requested
    /// has completed. Safe to call repeatedly and from multiple callers;
    /// every waiter resolves exactly once.
    pub async fn closed(&self) -> CloseFuture {
        self.close.close_future().await
    }
}

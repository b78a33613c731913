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

//! The request router: an ordered chain of pluggable handlers shared by
//! `GLOBAL_REQUEST` and `CHANNEL_REQUEST`. The router itself never
//! interprets a request name — only its dispatch and reply.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use russh_cryptovec::CryptoVec;
use tokio::sync::{Mutex, RwLock};

use crate::channel::ChannelHandle;
use crate::encoding::Encode;
use crate::error::Error;
use crate::future::{self, RequestFuture, RequestOutcome};
use crate::msg;
use crate::transport::TransportEndpoint;

/// What a [`RequestHandler`] decided to do with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// The handler already sent the reply itself (typically via a
    /// [`ReplyToken`] it held onto past returning, to answer
    /// asynchronously without blocking the dispatcher).
    Replied,
    /// The router should send `SUCCESS` if `want_reply`.
    ReplySuccess,
    /// The router should send `FAILURE` if `want_reply`.
    ReplyFailure,
    /// This handler does not recognize the request name; try the next one.
    Unsupported,
}

/// Where a request originated: a specific channel, or session-scoped.
#[derive(Debug, Clone, Copy)]
pub enum RequestScope {
    /// A `CHANNEL_REQUEST` on the given channel.
    Channel(crate::channel::ChannelId),
    /// A `GLOBAL_REQUEST`.
    Global,
}

/// A pluggable request processor. Implementations are tried in registration order for every request name
/// until one returns other than `Unsupported`.
#[async_trait::async_trait]
pub trait RequestHandler: Send + Sync {
    /// Handle one request. Must not block; if real work is required,
    /// return [`HandlerOutcome::Replied`] and reply later via a
    /// [`ReplyToken`] captured before returning.
    async fn handle(&self, scope: RequestScope, name: &str, payload: &[u8]) -> HandlerOutcome;
}

/// A capability to answer a single request exactly once, handed to
/// handlers that return [`HandlerOutcome::Replied`] so they can complete
/// the reply asynchronously, off the dispatcher's call stack.
pub enum ReplyToken {
    /// Reply is a `CHANNEL_SUCCESS`/`CHANNEL_FAILURE` on this channel.
    Channel(Arc<ChannelHandle>),
    /// Reply is a `REQUEST_SUCCESS`/`REQUEST_FAILURE` on the session.
    Global(Arc<dyn TransportEndpoint>),
}

impl ReplyToken {
    pub(crate) fn channel(handle: Arc<ChannelHandle>) -> Self {
        ReplyToken::Channel(handle)
    }

    pub(crate) fn global(transport: Arc<dyn TransportEndpoint>) -> Self {
        ReplyToken::Global(transport)
    }

    /// Send the success reply.
    pub async fn success(self) -> Result<(), Error> {
        match self {
            ReplyToken::Channel(handle) => handle.send_success_reply().await,
            ReplyToken::Global(transport) => {
                let buf = transport.create_buffer(msg::REQUEST_SUCCESS, 0);
                transport.write_packet(buf).wait().await
            }
        }
    }

    /// Send the failure reply.
    pub async fn failure(self) -> Result<(), Error> {
        match self {
            ReplyToken::Channel(handle) => handle.send_failure_reply().await,
            ReplyToken::Global(transport) => {
                let buf = transport.create_buffer(msg::REQUEST_FAILURE, 0);
                transport.write_packet(buf).wait().await
            }
        }
    }
}

/// The ordered handler chain plus the session-level global-request FIFO.
pub struct RequestRouter {
    handlers: RwLock<Vec<Arc<dyn RequestHandler>>>,
    global_pending: Mutex<VecDeque<future::Resolver<RequestOutcome>>>,
}

impl RequestRouter {
    /// An empty router; handlers are added with [`RequestRouter::push_handler`].
    pub fn new() -> Self {
        RequestRouter {
            handlers: RwLock::new(Vec::new()),
            global_pending: Mutex::new(VecDeque::new()),
        }
    }

    /// Append a handler to the end of the chain.
    pub async fn push_handler(&self, handler: Arc<dyn RequestHandler>) {
        self.handlers.write().await.push(handler);
    }

    async fn run_chain(&self, scope: RequestScope, name: &str, payload: &[u8]) -> HandlerOutcome {
        let handlers = self.handlers.read().await.clone();
        for handler in handlers {
            let outcome = AssertUnwindSafe(handler.handle(scope, name, payload))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    log::warn!("request handler panicked while handling {:?} {:?}", scope, name);
                    HandlerOutcome::ReplyFailure
                });
            if !matches!(outcome, HandlerOutcome::Unsupported) {
                return outcome;
            }
        }
        log::warn!("no handler accepted request {:?} {:?}; replying failure", scope, name);
        HandlerOutcome::ReplyFailure
    }

    /// Dispatch an inbound `CHANNEL_REQUEST`.
    pub(crate) async fn dispatch_channel(
        &self,
        channel: &Arc<ChannelHandle>,
        name: String,
        want_reply: bool,
        payload: CryptoVec,
    ) {
        let scope = RequestScope::Channel(channel.local_id);
        channel.deliver_request(name.clone(), want_reply, CryptoVec::from_slice(&payload));
        let outcome = self.run_chain(scope, &name, &payload).await;
        match outcome {
            HandlerOutcome::Replied => {}
            HandlerOutcome::ReplySuccess if want_reply => {
                if let Err(e) = channel.send_success_reply().await {
                    log::debug!("failed to send CHANNEL_SUCCESS: {}", e);
                }
            }
            HandlerOutcome::ReplyFailure if want_reply => {
                if let Err(e) = channel.send_failure_reply().await {
                    log::debug!("failed to send CHANNEL_FAILURE: {}", e);
                }
            }
            HandlerOutcome::ReplySuccess | HandlerOutcome::ReplyFailure => {}
            HandlerOutcome::Unsupported => unreachable!("run_chain never returns Unsupported"),
        }
    }

    /// Dispatch an inbound `GLOBAL_REQUEST`.
    pub(crate) async fn dispatch_global(
        &self,
        transport: &Arc<dyn TransportEndpoint>,
        name: String,
        want_reply: bool,
        payload: CryptoVec,
    ) {
        let outcome = self.run_chain(RequestScope::Global, &name, &payload).await;
        let reply = match outcome {
            HandlerOutcome::Replied => return,
            HandlerOutcome::ReplySuccess => msg::REQUEST_SUCCESS,
            HandlerOutcome::ReplyFailure => msg::REQUEST_FAILURE,
            HandlerOutcome::Unsupported => unreachable!("run_chain never returns Unsupported"),
        };
        if want_reply {
            let buf = transport.create_buffer(reply, 0);
            if let Err(e) = transport.write_packet(buf).wait().await {
                log::debug!("failed to send global request reply: {}", e);
            }
        }
    }

    /// Send a `GLOBAL_REQUEST` on behalf of local code (e.g. a forwarder
    /// asking the peer for `"tcpip-forward"`). Mirrors `Channel::request`.
    pub async fn send_global_request(
        &self,
        transport: &Arc<dyn TransportEndpoint>,
        name: &'static str,
        want_reply: bool,
        payload: &[u8],
    ) -> Result<Option<RequestFuture>, Error> {
        let fut = if want_reply {
            let (resolver, fut) = future::pair();
            self.global_pending.lock().await.push_back(resolver);
            Some(fut)
        } else {
            None
        };
        let mut buf = transport.create_buffer(msg::GLOBAL_REQUEST, name.len() + payload.len() + 8);
        buf.extend_ssh_string(name.as_bytes());
        buf.push_bool(want_reply);
        buf.extend(payload);
        transport.write_packet(buf).wait().await?;
        Ok(fut)
    }

    /// `<REQUEST_SUCCESS`/`<REQUEST_FAILURE`: resolve the head of the
    /// global-request FIFO.
    pub(crate) async fn resolve_global_reply(&self, outcome: RequestOutcome) {
        let pending = self.global_pending.lock().await.pop_front();
        match pending {
            Some(resolver) => resolver.resolve(outcome),
            None => log::warn!("received a global request reply with no pending request"),
        }
    }
}

impl Default for RequestRouter {
    fn default() -> Self {
        Self::new()
    }
}

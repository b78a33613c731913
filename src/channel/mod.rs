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

//! The channel state machine and the handle user code drives it
//! through. `ChannelHandle` is the object the [`crate::registry::ChannelRegistry`]
//! owns exclusively; [`Channel`] is the cloneable, user-facing handle to it —
//! the split mirrors `russh`'s own `Channel`/`ChannelRef` pair.

pub mod kind;
pub mod state;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use russh_cryptovec::CryptoVec;
use tokio::sync::{mpsc, Mutex, Notify};

pub use kind::ChannelKind;
pub use state::{ChannelState, Phase};

use crate::encoding::Encode;
use crate::error::{Error, ProtocolViolation};
use crate::future::{self, CloseFuture, OpenResolution, RequestFuture, RequestOutcome};
use crate::msg;
use crate::registry;
use crate::request::ReplyToken;
use crate::transport::TransportEndpoint;
use crate::window::Window;

/// A channel's identifier on our side. 32-bit, allocated monotonically
/// from 0 and never reused within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub u32);

/// An outstanding outbound request awaiting `CHANNEL_SUCCESS`/`CHANNEL_FAILURE`,
/// FIFO-correlated per RFC 4254.
struct PendingRequest {
    name: &'static str,
    resolver: future::Resolver<RequestOutcome>,
}

/// Events delivered to whoever owns a channel's receiving end — either the
/// user code that opened it locally, or a [`ChannelSink`] installed by a
/// [`ChannelFactory`] for an inbound open.
#[derive(Debug)]
#[non_exhaustive]
pub enum ChannelEvent {
    /// `CHANNEL_DATA` payload.
    Data(CryptoVec),
    /// `CHANNEL_EXTENDED_DATA` payload (RFC 4254 §5.2; type 1 is stderr).
    ExtendedData {
        /// The extended-data type code.
        ext: u32,
        /// The payload.
        data: CryptoVec,
    },
    /// `CHANNEL_EOF` was received; no more data will arrive from the peer.
    Eof,
    /// `CHANNEL_REQUEST` was received. If `want_reply` is `true`, `reply`
    /// must eventually be used to answer it (the router answers
    /// automatically for `ReplySuccess`/`ReplyFailure`-returning handlers;
    /// this event only reaches the channel's own sink/owner when no
    /// registered handler claimed the request name).
    Request {
        /// The request name (e.g. `"exec"`, `"pty-req"`).
        name: String,
        /// Whether the peer expects `CHANNEL_SUCCESS`/`CHANNEL_FAILURE`.
        want_reply: bool,
        /// The request-specific payload.
        payload: CryptoVec,
    },
    /// The peer granted us more send window.
    WindowAdjusted {
        /// The new remote-window size after the adjustment.
        new_size: u32,
    },
    /// `CHANNEL_CLOSE` exchange completed; the channel has been unregistered.
    Closed,
}

/// Constructed by a [`ChannelFactory`] for an inbound `CHANNEL_OPEN`;
/// carries the type-specific fields the peer sent.
pub struct OpenContext {
    /// The channel kind and its type-specific open payload.
    pub kind: ChannelKind,
    /// The peer's advertised initial window size.
    pub peer_window_size: u32,
    /// The peer's advertised maximum packet size.
    pub peer_packet_size: u32,
}

/// The "channel type factory" contract: given an inbound `CHANNEL_OPEN`,
/// decide whether to accept it and, once accepted, take ownership of the
/// resulting [`Channel`] — a constructor that yields a channel
/// pre-configured for an inbound open. The dispatcher itself only ever
/// sees [`ChannelEvent`]s, never subsystem payloads.
#[async_trait::async_trait]
pub trait ChannelFactory: Send + Sync {
    /// Validate the inbound open's type-specific fields. Returning `Err`
    /// rejects it with `CHANNEL_OPEN_FAILURE` using the given reason/
    /// message; no channel is registered in that case.
    async fn open(&self, ctx: &OpenContext) -> Result<(), (crate::msg::OpenFailureReason, String)>;

    /// Called once after `CHANNEL_OPEN_CONFIRMATION` has been sent, handing
    /// ownership of the now-registered channel's handle and event stream to
    /// this factory (e.g. to spawn the task that drives a shell, an echo
    /// loop, or a forwarding pipe). Must not block the dispatcher — spawn if
    /// real work is needed.
    async fn attach(&self, channel: Channel, events: ChannelEvents);
}

/// Per-channel mutable state, guarded by `ChannelHandle::inner`'s own lock —
/// deliberately never the registry's lock.
struct Inner {
    remote_id: Option<u32>,
    state: ChannelState,
    local_window: Window,
    remote_window: Window,
    pending_requests: VecDeque<PendingRequest>,
    open_resolver: Option<future::Resolver<OpenResolution>>,
    close_resolvers: Vec<future::Resolver<()>>,
}

/// The object the registry owns exclusively. Holds everything needed to
/// drive the state machine and is reachable from both the dispatcher
/// (inbound) and the public [`Channel`] handle (outbound).
pub struct ChannelHandle {
    /// Our id for this channel.
    pub local_id: ChannelId,
    /// The channel's type and type-specific open fields.
    pub kind: ChannelKind,
    transport: Arc<dyn TransportEndpoint>,
    registry: Weak<registry::Inner>,
    inner: Mutex<Inner>,
    /// Serializes outbound wire operations (`data`/`eof`/`close`/`request`)
    /// for this channel. Acquiring it in FIFO order is what gives us the
    /// "A, B, C, then EOF, then CLOSE" ordering without a separate explicit
    /// write queue.
    send_lock: Mutex<()>,
    /// Woken whenever `remote_window` gains credit, so a fragmenter blocked
    /// on window exhaustion can retry.
    window_ready: Notify,
    events_tx: mpsc::UnboundedSender<ChannelEvent>,
    closed: AtomicBool,
}

impl ChannelHandle {
    pub(crate) fn new(
        local_id: ChannelId,
        kind: ChannelKind,
        local_window: Window,
        transport: Arc<dyn TransportEndpoint>,
        registry: Weak<registry::Inner>,
        events_tx: mpsc::UnboundedSender<ChannelEvent>,
        open_resolver: Option<future::Resolver<OpenResolution>>,
    ) -> Self {
        ChannelHandle {
            local_id,
            kind,
            transport,
            registry,
            inner: Mutex::new(Inner {
                remote_id: None,
                state: ChannelState::opening(),
                local_window,
                // Placeholder until the open handshake tells us the real
                // peer-advertised figures; nothing may be sent before then.
                remote_window: Window::new(0, 0),
                pending_requests: VecDeque::new(),
                open_resolver,
                close_resolvers: Vec::new(),
            }),
            send_lock: Mutex::new(()),
            window_ready: Notify::new(),
            events_tx,
            closed: AtomicBool::new(false),
        }
    }

    #[cfg(test)]
    pub(crate) fn new_for_test(id: ChannelId, kind: ChannelKind, window: Window) -> Self {
        let (tx, _rx) = mpsc::unbounded_channel();
        ChannelHandle::new(
            id,
            kind,
            window,
            Arc::new(crate::transport::tests::NullTransport),
            Weak::new(),
            tx,
            None,
        )
    }

    fn deliver(&self, event: ChannelEvent) {
        let _ = self.events_tx.send(event);
    }

    /// `<OPEN_CONFIRMATION`: set `remoteId`/`remoteWindow`,
    /// transition Opening -> Open, resolve the open future.
    pub(crate) async fn handle_open_success(&self, remote_id: u32, window_size: u32, packet_size: u32) {
        let mut inner = self.inner.lock().await;
        inner.remote_id = Some(remote_id);
        inner.remote_window = Window::new(window_size, packet_size);
        inner.state.phase = Phase::Open;
        if let Some(resolver) = inner.open_resolver.take() {
            resolver.resolve(OpenResolution::Success {
                remote_id,
                window_size,
                packet_size,
            });
        }
        log::debug!(
            "channel {:?} open confirmed: remote={} window={} packet={}",
            self.local_id,
            remote_id,
            window_size,
            packet_size
        );
    }

    /// `<OPEN_FAILURE`: resolve the open future with failure and
    /// remove from the registry.
    pub(crate) async fn handle_open_failure(&self, reason: crate::msg::OpenFailureReason, message: String) {
        {
            let mut inner = self.inner.lock().await;
            inner.state.phase = Phase::Closed;
            if let Some(resolver) = inner.open_resolver.take() {
                resolver.resolve(OpenResolution::Failure {
                    reason,
                    message: message.clone(),
                });
            }
        }
        log::debug!("channel {:?} open failed: {:?}: {}", self.local_id, reason, message);
        self.unregister();
    }

    fn unregister(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry::unregister_raw(&registry, self.local_id);
        }
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.deliver(ChannelEvent::Closed);
        }
        self.window_ready.notify_waiters();
    }

    /// `<DATA(d)`: enforce the local window, deliver, and emit
    /// a `WINDOW_ADJUST` if we have crossed the low-water mark.
    pub(crate) async fn handle_data(&self, data: CryptoVec) -> Result<(), ProtocolViolation> {
        self.handle_payload(None, data).await
    }

    /// `<EXTENDED_DATA(t,d)`: only `t = stderr` is accepted for
    /// client-to-server session channels.
    pub(crate) async fn handle_extended_data(&self, ext: u32, data: CryptoVec) -> Result<(), ProtocolViolation> {
        if ext != msg::EXTENDED_DATA_STDERR {
            return Err(ProtocolViolation::UnsupportedExtendedDataType(self.local_id, ext));
        }
        self.handle_payload(Some(ext), data).await
    }

    async fn handle_payload(&self, ext: Option<u32>, data: CryptoVec) -> Result<(), ProtocolViolation> {
        let adjustment = {
            let mut inner = self.inner.lock().await;
            if !inner.state.can_receive_data() {
                return Err(ProtocolViolation::UnexpectedMessage(
                    self.local_id,
                    ext.map(|_| msg::CHANNEL_EXTENDED_DATA).unwrap_or(msg::CHANNEL_DATA),
                    inner.state.label(),
                ));
            }
            inner.local_window.check_and_consume(data.len() as u32, self.local_id)?;
            inner.local_window.take_adjustment()
        };
        log::trace!("channel {:?}: {} bytes of {:?} data", self.local_id, data.len(), ext);
        match ext {
            Some(ext) => self.deliver(ChannelEvent::ExtendedData { ext, data }),
            None => self.deliver(ChannelEvent::Data(data)),
        }
        if let Some(n) = adjustment {
            self.send_window_adjust(n).await;
        }
        Ok(())
    }

    async fn send_window_adjust(&self, n: u32) {
        let recipient = match self.inner.lock().await.remote_id {
            Some(id) => id,
            None => return,
        };
        let mut buf = self.transport.create_buffer(msg::CHANNEL_WINDOW_ADJUST, 8);
        buf.push_u32_be(recipient);
        buf.push_u32_be(n);
        log::debug!("channel {:?}: sending window adjust of {} bytes", self.local_id, n);
        let _ = self.transport.write_packet(buf).wait().await;
    }

    /// `<WINDOW_ADJUST(n)`: expand `remoteWindow`, wake blocked writers.
    pub(crate) async fn handle_window_adjust(&self, n: u32) -> Result<(), ProtocolViolation> {
        let new_size = {
            let mut inner = self.inner.lock().await;
            inner.remote_window.expand(n, self.local_id)?;
            inner.remote_window.remaining()
        };
        self.deliver(ChannelEvent::WindowAdjusted { new_size });
        self.window_ready.notify_one();
        Ok(())
    }

    /// `<EOF`: latch `eof_received`, deliver to the sink.
    pub(crate) async fn handle_eof(&self) {
        {
            let mut inner = self.inner.lock().await;
            inner.state.eof_received = true;
        }
        self.deliver(ChannelEvent::Eof);
    }

    /// `<CLOSE`: send our own `CHANNEL_CLOSE` first if we have not already
    /// (the RFC 4254 §5.3 close tie-break), then finalize to Closed and
    /// unregister.
    pub(crate) async fn handle_close(&self) {
        {
            let mut inner = self.inner.lock().await;
            inner.state.close_received = true;
        }
        // Tie-break: <CLOSE may race >CLOSE. Ensure ours goes out exactly once.
        let _ = self.send_close_inner().await;
        self.unregister();
    }

    /// `<CHANNEL_SUCCESS`/`<CHANNEL_FAILURE`: dequeue the head
    /// of `pendingRequests` FIFO and resolve it.
    pub(crate) async fn handle_request_reply(&self, outcome: RequestOutcome) {
        let pending = self.inner.lock().await.pending_requests.pop_front();
        match pending {
            Some(p) => {
                log::debug!(
                    "channel {:?}: request {:?} resolved {:?}",
                    self.local_id,
                    p.name,
                    outcome
                );
                p.resolver.resolve(outcome);
            }
            None => log::warn!(
                "channel {:?}: received a reply with no pending request",
                self.local_id
            ),
        }
    }

    async fn remote_id(&self) -> Option<u32> {
        self.inner.lock().await.remote_id
    }

    /// Deliver a `CHANNEL_REQUEST` to this channel's own event stream, in
    /// addition to whatever the request router decided: the router only
    /// handles the reply, while the channel owner still observes the
    /// request itself, e.g. to act on `"exec"`/`"pty-req"`/`"shell"`.
    pub(crate) fn deliver_request(&self, name: String, want_reply: bool, payload: CryptoVec) {
        self.deliver(ChannelEvent::Request {
            name,
            want_reply,
            payload,
        });
    }

    /// Send `CHANNEL_SUCCESS` for a request this channel owns: the
    /// router-issued reply for an inbound `CHANNEL_REQUEST`.
    pub(crate) async fn send_success_reply(&self) -> Result<(), Error> {
        let recipient = self.remote_id().await.ok_or(Error::ClosedChannel)?;
        let mut buf = self.transport.create_buffer(msg::CHANNEL_SUCCESS, 4);
        buf.push_u32_be(recipient);
        self.transport.write_packet(buf).wait().await
    }

    /// Send `CHANNEL_FAILURE` for a request this channel owns.
    pub(crate) async fn send_failure_reply(&self) -> Result<(), Error> {
        let recipient = self.remote_id().await.ok_or(Error::ClosedChannel)?;
        let mut buf = self.transport.create_buffer(msg::CHANNEL_FAILURE, 4);
        buf.push_u32_be(recipient);
        self.transport.write_packet(buf).wait().await
    }

    /// Fragment and send a `CHANNEL_DATA`/`CHANNEL_EXTENDED_DATA` payload,
    /// respecting the remote packet size and blocking (a suspension point)
    /// on window exhaustion.
    async fn send_fragmented(&self, ext: Option<u32>, mut data: &[u8]) -> Result<(), Error> {
        let _order = self.send_lock.lock().await;
        if data.is_empty() {
            return self.write_fragment(ext, data).await;
        }
        while !data.is_empty() {
            let fragment_len = loop {
                let mut inner = self.inner.lock().await;
                if !inner.state.can_send_data() {
                    return Err(Error::ClosedChannel);
                }
                let budget = inner.remote_window.remaining().min(inner.remote_window.packet_size());
                if budget == 0 {
                    drop(inner);
                    self.window_ready.notified().await;
                    continue;
                }
                let len = budget.min(data.len() as u32);
                inner.remote_window.consume(len, self.local_id)?;
                break len as usize;
            };
            let (fragment, rest) = data.split_at(fragment_len);
            self.write_fragment(ext, fragment).await?;
            data = rest;
        }
        Ok(())
    }

    async fn write_fragment(&self, ext: Option<u32>, fragment: &[u8]) -> Result<(), Error> {
        let recipient = self.remote_id().await.ok_or(Error::ClosedChannel)?;
        let msg_code = if ext.is_some() { msg::CHANNEL_EXTENDED_DATA } else { msg::CHANNEL_DATA };
        let mut buf = self.transport.create_buffer(msg_code, fragment.len() + 16);
        buf.push_u32_be(recipient);
        if let Some(ext) = ext {
            buf.push_u32_be(ext);
        }
        buf.extend_ssh_string(fragment);
        self.transport.write_packet(buf).wait().await
    }

    async fn send_close_inner(&self) -> Result<(), Error> {
        let (recipient, already_sent, both_closed) = {
            let mut inner = self.inner.lock().await;
            let already_sent = inner.state.close_sent;
            if !already_sent {
                inner.state.close_sent = true;
                inner.state.phase = Phase::Closing;
            }
            (inner.remote_id, already_sent, inner.state.close_sent && inner.state.close_received)
        };
        if !already_sent {
            if let Some(recipient) = recipient {
                let mut buf = self.transport.create_buffer(msg::CHANNEL_CLOSE, 4);
                buf.push_u32_be(recipient);
                self.transport.write_packet(buf).wait().await?;
                log::debug!("channel {:?}: sent CHANNEL_CLOSE", self.local_id);
            }
        }
        if both_closed {
            let mut inner = self.inner.lock().await;
            inner.state.phase = Phase::Closed;
            let resolvers = std::mem::take(&mut inner.close_resolvers);
            drop(inner);
            for r in resolvers {
                r.resolve(());
            }
        }
        Ok(())
    }

    /// Discard any caller awaiting window/send progress and resolve the
    /// close future immediately, failing any pending writes/requests with
    /// [`Error::ClosedChannel`].
    pub(crate) async fn force_close(&self) {
        {
            let mut inner = self.inner.lock().await;
            inner.state.phase = Phase::Closed;
            let resolvers = std::mem::take(&mut inner.close_resolvers);
            let pending = std::mem::take(&mut inner.pending_requests);
            drop(inner);
            for r in resolvers {
                r.resolve(());
            }
            for p in pending {
                p.resolver.resolve(RequestOutcome::Failure);
            }
        }
        self.window_ready.notify_waiters();
        self.unregister();
    }
}

/// A cloneable, user-facing handle to one channel's outbound API. Inbound
/// events are read separately via [`ChannelEvents`], mirroring `russh`'s
/// split between a `Channel<S>`'s sender half and its `UnboundedReceiver`.
#[derive(Clone)]
pub struct Channel {
    handle: Arc<ChannelHandle>,
}

/// The receiving half of a channel's event stream: inbound data delivery
/// to the channel sink. Not `Clone` — exactly one reader per channel,
/// matching `mpsc::UnboundedReceiver`'s own semantics.
pub struct ChannelEvents {
    rx: mpsc::UnboundedReceiver<ChannelEvent>,
}

impl ChannelEvents {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<ChannelEvent>) -> Self {
        ChannelEvents { rx }
    }

    /// Wait for the next event. Returns `None` once the channel is fully
    /// closed and no further events will arrive.
    pub async fn next(&mut self) -> Option<ChannelEvent> {
        self.rx.recv().await
    }
}

impl Channel {
    pub(crate) fn new(handle: Arc<ChannelHandle>) -> Self {
        Channel { handle }
    }

    /// This channel's local id.
    pub fn id(&self) -> ChannelId {
        self.handle.local_id
    }

    /// This channel's type.
    pub fn kind(&self) -> &ChannelKind {
        &self.handle.kind
    }

    /// Bytes we may still send before blocking on the peer's window.
    pub async fn remote_window_remaining(&self) -> u32 {
        self.handle.inner.lock().await.remote_window.remaining()
    }

    /// Bytes the peer may still send us before we owe a `WINDOW_ADJUST`.
    pub async fn local_window_remaining(&self) -> u32 {
        self.handle.inner.lock().await.local_window.remaining()
    }

    /// Send data on the channel (`>DATA(d)`), fragmenting and
    /// blocking on window availability as needed.
    pub async fn data(&self, data: &[u8]) -> Result<(), Error> {
        self.handle.send_fragmented(None, data).await
    }

    /// Send extended data (e.g. stderr) on the channel.
    pub async fn extended_data(&self, ext: u32, data: &[u8]) -> Result<(), Error> {
        self.handle.send_fragmented(Some(ext), data).await
    }

    /// Send `CHANNEL_EOF` (`>EOF`). No further data may be sent
    /// afterwards.
    pub async fn eof(&self) -> Result<(), Error> {
        let _order = self.handle.send_lock.lock().await;
        let recipient = {
            let mut inner = self.handle.inner.lock().await;
            if inner.state.eof_sent {
                return Ok(());
            }
            inner.state.eof_sent = true;
            inner.remote_id
        };
        if let Some(recipient) = recipient {
            let mut buf = self.handle.transport.create_buffer(msg::CHANNEL_EOF, 4);
            buf.push_u32_be(recipient);
            self.handle.transport.write_packet(buf).wait().await?;
            log::debug!("channel {:?}: sent CHANNEL_EOF", self.handle.local_id);
        }
        Ok(())
    }

    /// Send `CHANNEL_CLOSE` if not already sent (`>CLOSE`), and
    /// return a future that resolves once both sides have closed.
    /// Idempotent: every waiter resolves the same future exactly once.
    pub async fn close(&self) -> Result<CloseFuture, Error> {
        let _order = self.handle.send_lock.lock().await;
        let fut = {
            let mut inner = self.handle.inner.lock().await;
            if matches!(inner.state.phase, Phase::Closed) {
                let (resolver, fut) = future::pair();
                resolver.resolve(());
                fut
            } else {
                let (resolver, fut) = future::pair();
                inner.close_resolvers.push(resolver);
                fut
            }
        };
        self.handle.send_close_inner().await?;
        Ok(fut)
    }

    /// Send a channel request (`>REQUEST`). Returns a
    /// [`RequestFuture`] when `want_reply` is set, enqueued FIFO onto
    /// `pendingRequests` before the packet is written so a reply that
    /// somehow races the write still correlates correctly.
    pub async fn request(
        &self,
        name: &'static str,
        want_reply: bool,
        payload: &[u8],
    ) -> Result<Option<RequestFuture>, Error> {
        let _order = self.handle.send_lock.lock().await;
        let (recipient, fut) = {
            let mut inner = self.handle.inner.lock().await;
            let recipient = inner.remote_id.ok_or(Error::ClosedChannel)?;
            let fut = if want_reply {
                let (resolver, fut) = future::pair();
                inner.pending_requests.push_back(PendingRequest { name, resolver });
                Some(fut)
            } else {
                None
            };
            (recipient, fut)
        };
        let mut buf = self
            .handle
            .transport
            .create_buffer(msg::CHANNEL_REQUEST, name.len() + payload.len() + 16);
        buf.push_u32_be(recipient);
        buf.extend_ssh_string(name.as_bytes());
        buf.push_bool(want_reply);
        buf.extend(payload);
        self.handle.transport.write_packet(buf).wait().await?;
        Ok(fut)
    }

    /// Reply to an inbound request this channel's sink chose to handle
    /// itself rather than through the handler chain.
    pub fn reply_token(&self) -> ReplyToken {
        ReplyToken::channel(self.handle.clone())
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel").field("id", &self.handle.local_id).finish()
    }
}

/// Open-handshake-only future wrapper so callers opening a channel get
/// back both the eventual `Channel` (on success) and its event stream.
pub(crate) fn split_for_open(
    handle: Arc<ChannelHandle>,
    events: mpsc::UnboundedReceiver<ChannelEvent>,
) -> (Channel, ChannelEvents) {
    (Channel::new(handle), ChannelEvents::new(events))
}

pub use crate::future::OpenFuture as ChannelOpenFuture;

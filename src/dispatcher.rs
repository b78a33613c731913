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

//! The dispatcher: a single entry point that demultiplexes inbound packets
//! by SSH message number and forwards them to the right channel, the
//! request router, or the channel-open negotiation path. At most one
//! `process()` call per session executes at a time — the caller (the
//! transport/session glue) is responsible for that serialization; this
//! type itself holds no such lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use russh_cryptovec::CryptoVec;
use tokio::sync::{mpsc, RwLock};

use crate::channel::{self, Channel, ChannelEvents, ChannelFactory, ChannelHandle, ChannelId, ChannelKind, OpenContext};
use crate::config::Config;
use crate::encoding::{take_bool, take_ssh_string, take_u32_be, Encode};
use crate::error::{Error, ProtocolViolation};
use crate::future::{self, OpenFuture, RequestOutcome};
use crate::msg;
use crate::registry::ChannelRegistry;
use crate::request::RequestRouter;
use crate::transport::TransportEndpoint;

/// Ties the registry, request router and channel-type factories to one
/// transport, and exposes the `process` entry point the transport drives.
pub struct Dispatcher {
    registry: ChannelRegistry,
    router: Arc<RequestRouter>,
    transport: Arc<dyn TransportEndpoint>,
    config: Config,
    allow_more_sessions: AtomicBool,
    factories: RwLock<HashMap<String, Arc<dyn ChannelFactory>>>,
}

impl Dispatcher {
    pub(crate) fn new(
        registry: ChannelRegistry,
        router: Arc<RequestRouter>,
        transport: Arc<dyn TransportEndpoint>,
        config: Config,
    ) -> Self {
        let allow_more_sessions = AtomicBool::new(config.allow_more_sessions);
        Dispatcher {
            registry,
            router,
            transport,
            config,
            allow_more_sessions,
            factories: RwLock::new(HashMap::new()),
        }
    }

    /// Current `"no-more-sessions@openssh.com"` toggle value.
    pub(crate) fn allow_more_sessions(&self) -> bool {
        self.allow_more_sessions.load(Ordering::SeqCst)
    }

    /// Flip the toggle at runtime, e.g. from a [`crate::request::RequestHandler`]
    /// for `"no-more-sessions@openssh.com"`.
    pub(crate) fn set_allow_more_sessions(&self, allow: bool) {
        self.allow_more_sessions.store(allow, Ordering::SeqCst);
    }

    /// Register the constructor invoked for inbound `CHANNEL_OPEN`s of
    /// `type_name`.
    pub async fn register_factory(&self, type_name: impl Into<String>, factory: Arc<dyn ChannelFactory>) {
        self.factories.write().await.insert(type_name.into(), factory);
    }

    /// Allocate and register a channel for a locally initiated open, send
    /// `CHANNEL_OPEN`, and return the handle plus its open/event streams.
    pub(crate) async fn open_channel(
        &self,
        kind: ChannelKind,
    ) -> Result<(Channel, ChannelEvents, OpenFuture), Error> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (open_resolver, open_future) = future::pair();
        let window_size = self.config.window_size;
        let packet_size = self.config.packet_size;
        let transport = self.transport.clone();
        let registry_weak = self.registry.downgrade();

        let handle = self.registry.register(move |id| {
            Arc::new(ChannelHandle::new(
                id,
                kind.clone(),
                crate::window::Window::new(window_size, packet_size),
                transport,
                registry_weak,
                events_tx,
                Some(open_resolver),
            ))
        })?;

        let mut buf = self.transport.create_buffer(msg::CHANNEL_OPEN, 64);
        buf.extend_ssh_string(handle.kind.type_name().as_bytes());
        buf.push_u32_be(handle.local_id.0);
        buf.push_u32_be(window_size);
        buf.push_u32_be(packet_size);
        self.transport.write_packet(buf).wait().await?;
        log::debug!("channel {:?}: sent CHANNEL_OPEN ({})", handle.local_id, handle.kind);

        let (channel, events) = channel::split_for_open(handle, events_rx);
        Ok((channel, events, open_future))
    }

    async fn lookup(&self, payload: &mut &[u8], cmd: u8) -> Result<Arc<ChannelHandle>, ProtocolViolation> {
        let id = take_u32_be(payload)
            .map(ChannelId)
            .ok_or(ProtocolViolation::UnsupportedMessage(cmd))?;
        self.registry.get(id).ok_or(ProtocolViolation::UnknownChannel(id, cmd))
    }

    /// The dispatch entry point. `cmd` is the SSH message number; `payload`
    /// is everything after it, already decrypted and demultiplexed by the
    /// transport.
    pub async fn process(&self, cmd: u8, payload: &[u8]) -> Result<(), Error> {
        let mut payload = payload;
        match cmd {
            msg::CHANNEL_OPEN => self.handle_channel_open(&mut payload).await,
            msg::CHANNEL_OPEN_CONFIRMATION => {
                let handle = self.lookup(&mut payload, cmd).await?;
                let sender = take_u32_be(&mut payload).ok_or(ProtocolViolation::UnsupportedMessage(cmd))?;
                let window = take_u32_be(&mut payload).ok_or(ProtocolViolation::UnsupportedMessage(cmd))?;
                let packet = take_u32_be(&mut payload).ok_or(ProtocolViolation::UnsupportedMessage(cmd))?;
                handle.handle_open_success(sender, window, packet).await;
                Ok(())
            }
            msg::CHANNEL_OPEN_FAILURE => {
                let handle = self.lookup(&mut payload, cmd).await?;
                let reason = take_u32_be(&mut payload).map(msg::OpenFailureReason::from_code).unwrap_or(msg::OpenFailureReason::Other(0));
                let message = take_ssh_string(&mut payload).map(|s| String::from_utf8_lossy(s).into_owned()).unwrap_or_default();
                handle.handle_open_failure(reason, message).await;
                Ok(())
            }
            msg::CHANNEL_DATA => {
                let handle = self.lookup(&mut payload, cmd).await?;
                let data = take_ssh_string(&mut payload).ok_or(ProtocolViolation::UnsupportedMessage(cmd))?;
                handle.handle_data(CryptoVec::from_slice(data)).await?;
                Ok(())
            }
            msg::CHANNEL_EXTENDED_DATA => {
                let handle = self.lookup(&mut payload, cmd).await?;
                let ext = take_u32_be(&mut payload).ok_or(ProtocolViolation::UnsupportedMessage(cmd))?;
                let data = take_ssh_string(&mut payload).ok_or(ProtocolViolation::UnsupportedMessage(cmd))?;
                handle.handle_extended_data(ext, CryptoVec::from_slice(data)).await?;
                Ok(())
            }
            msg::CHANNEL_WINDOW_ADJUST => {
                let handle = self.lookup(&mut payload, cmd).await?;
                let n = take_u32_be(&mut payload).ok_or(ProtocolViolation::UnsupportedMessage(cmd))?;
                handle.handle_window_adjust(n).await?;
                Ok(())
            }
            msg::CHANNEL_EOF => {
                let handle = self.lookup(&mut payload, cmd).await?;
                handle.handle_eof().await;
                Ok(())
            }
            msg::CHANNEL_CLOSE => {
                let handle = self.lookup(&mut payload, cmd).await?;
                handle.handle_close().await;
                Ok(())
            }
            msg::CHANNEL_REQUEST => {
                let handle = self.lookup(&mut payload, cmd).await?;
                let name = take_ssh_string(&mut payload)
                    .map(|s| String::from_utf8_lossy(s).into_owned())
                    .ok_or(ProtocolViolation::UnsupportedMessage(cmd))?;
                let want_reply = take_bool(&mut payload).unwrap_or(false);
                self.router.dispatch_channel(&handle, name, want_reply, CryptoVec::from_slice(payload)).await;
                Ok(())
            }
            msg::CHANNEL_SUCCESS => {
                let handle = self.lookup(&mut payload, cmd).await?;
                handle.handle_request_reply(RequestOutcome::Success).await;
                Ok(())
            }
            msg::CHANNEL_FAILURE => {
                let handle = self.lookup(&mut payload, cmd).await?;
                handle.handle_request_reply(RequestOutcome::Failure).await;
                Ok(())
            }
            msg::GLOBAL_REQUEST => {
                let name = take_ssh_string(&mut payload)
                    .map(|s| String::from_utf8_lossy(s).into_owned())
                    .ok_or(ProtocolViolation::UnsupportedMessage(cmd))?;
                let want_reply = take_bool(&mut payload).unwrap_or(false);
                self.router
                    .dispatch_global(&self.transport, name, want_reply, CryptoVec::from_slice(payload))
                    .await;
                Ok(())
            }
            msg::REQUEST_SUCCESS => {
                self.router.resolve_global_reply(RequestOutcome::Success).await;
                Ok(())
            }
            msg::REQUEST_FAILURE => {
                self.router.resolve_global_reply(RequestOutcome::Failure).await;
                Ok(())
            }
            other => Err(ProtocolViolation::UnsupportedMessage(other).into()),
        }
    }

    async fn handle_channel_open(&self, payload: &mut &[u8]) -> Result<(), Error> {
        let type_name = take_ssh_string(payload)
            .map(|s| String::from_utf8_lossy(s).into_owned())
            .ok_or(ProtocolViolation::UnsupportedMessage(msg::CHANNEL_OPEN))?;
        let sender = take_u32_be(payload).ok_or(ProtocolViolation::UnsupportedMessage(msg::CHANNEL_OPEN))?;
        let peer_window_size = take_u32_be(payload).ok_or(ProtocolViolation::UnsupportedMessage(msg::CHANNEL_OPEN))?;
        let peer_packet_size = take_u32_be(payload).ok_or(ProtocolViolation::UnsupportedMessage(msg::CHANNEL_OPEN))?;
        let kind = ChannelKind::parse_open_payload(&type_name, payload);

        if self.registry.is_closing() {
            return self.reject_open(sender, msg::OpenFailureReason::ConnectFailed, "service is closing").await;
        }
        if !self.allow_more_sessions() && kind.is_session() {
            return self
                .reject_open(sender, msg::OpenFailureReason::ConnectFailed, "no more sessions")
                .await;
        }
        let factory = self.factories.read().await.get(&type_name).cloned();
        let factory = match factory {
            Some(f) => f,
            None => {
                return self
                    .reject_open(
                        sender,
                        msg::OpenFailureReason::UnknownChannelType,
                        &format!("Unsupported channel type: {}", type_name),
                    )
                    .await
            }
        };

        let ctx = OpenContext {
            kind: kind.clone(),
            peer_window_size,
            peer_packet_size,
        };

        if let Err((reason, message)) = factory.open(&ctx).await {
            return self.reject_open(sender, reason, &message).await;
        }

        let window_size = self.config.window_size;
        let packet_size = self.config.packet_size;
        let transport = self.transport.clone();
        let registry_weak = self.registry.downgrade();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let handle = match self.registry.register(move |id| {
            Arc::new(ChannelHandle::new(
                id,
                kind,
                crate::window::Window::new(window_size, packet_size),
                transport,
                registry_weak,
                events_tx,
                None,
            ))
        }) {
            Ok(handle) => handle,
            Err(Error::TooManyChannels) => {
                return self
                    .reject_open(sender, msg::OpenFailureReason::ResourceShortage, "too many open channels")
                    .await
            }
            Err(Error::ServiceClosing) => {
                return self
                    .reject_open(sender, msg::OpenFailureReason::ConnectFailed, "service is closing")
                    .await
            }
            Err(e) => return Err(e),
        };
        handle.handle_open_success(sender, peer_window_size, peer_packet_size).await;
        let mut buf = self.transport.create_buffer(msg::CHANNEL_OPEN_CONFIRMATION, 16);
        buf.push_u32_be(sender);
        buf.push_u32_be(handle.local_id.0);
        buf.push_u32_be(window_size);
        buf.push_u32_be(packet_size);
        self.transport.write_packet(buf).wait().await?;
        log::info!("accepted inbound channel {:?} ({})", handle.local_id, handle.kind);
        let (channel, events) = channel::split_for_open(handle, events_rx);
        factory.attach(channel, events).await;
        Ok(())
    }

    async fn reject_open(&self, sender: u32, reason: msg::OpenFailureReason, message: &str) -> Result<(), Error> {
        log::debug!("refusing channel open from sender {}: {:?}: {}", sender, reason, message);
        let mut buf = self.transport.create_buffer(msg::CHANNEL_OPEN_FAILURE, message.len() + 16);
        buf.push_u32_be(sender);
        buf.push_u32_be(reason.code());
        buf.extend_ssh_string(message.as_bytes());
        buf.extend_ssh_string(b"");
        self.transport.write_packet(buf).wait().await
    }

    pub(crate) fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    pub(crate) fn router(&self) -> &Arc<RequestRouter> {
        &self.router
    }

    pub(crate) fn transport(&self) -> &Arc<dyn TransportEndpoint> {
        &self.transport
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }
}

// Copyright 2016 Pierre-Étienne Meunier
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! An RFC 4254 SSH connection-service core: channel lifecycle, per-direction
//! window flow control, request routing, and close coordination, on top of
//! an already-authenticated, encrypted transport.
//!
//! This crate does not speak the SSH wire format below the channel layer —
//! no key exchange, no cipher, no framing. It consumes a
//! [`transport::TransportEndpoint`] that already demultiplexes inbound
//! packets into `(message number, payload)` pairs and accepts outbound
//! payloads with guaranteed wire ordering. Everything above channels —
//! SFTP, shell/exec payloads, PTY mode encoding, authentication — is
//! likewise out of scope; this crate only specifies the [`channel::ChannelFactory`]
//! and [`request::RequestHandler`] seams those subsystems plug into.
//!
//! The entry point is [`session::ConnectionService`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod channel;
pub mod close;
pub mod config;
pub mod dispatcher;
pub mod encoding;
pub mod error;
pub mod forward;
pub mod future;
pub mod msg;
pub mod registry;
pub mod request;
pub mod session;
pub mod transport;
mod window;

pub use channel::{Channel, ChannelEvent, ChannelEvents, ChannelId, ChannelKind};
pub use config::Config;
pub use error::{Error, ProtocolViolation};
pub use session::ConnectionService;
pub use window::Window;

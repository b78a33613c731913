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

use thiserror::Error;

use crate::channel::ChannelId;

/// Errors raised by the connection service.
///
/// This is not the wire-level SSH error taxonomy (that belongs to the
/// transport layer below us); it is the set of ways the multiplexer itself
/// can fail.
#[derive(Debug, Error)]
pub enum Error {
    /// The peer violated RFC 4254 framing or state-machine invariants.
    /// Always session-fatal.
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),

    /// `registerChannel` was refused because `max-sshd-channels` was reached.
    #[error("too many open channels (limit reached)")]
    TooManyChannels,

    /// The connection service has begun or completed shutdown.
    #[error("connection service is closing")]
    ServiceClosing,

    /// An awaitable (open/close/request/write future) did not resolve in time.
    #[error("operation timed out")]
    Timeout,

    /// A write was abandoned because the channel or session already closed.
    #[error("channel closed")]
    ClosedChannel,

    /// A pending write was cancelled before it reached the wire.
    #[error("write cancelled")]
    Cancelled,

    /// The channel-open handshake failed with a peer-supplied reason.
    #[error("channel open failed: {reason:?}: {message}")]
    OpenFailure {
        /// RFC 4254 §5.1 failure reason code.
        reason: crate::msg::OpenFailureReason,
        /// Human-readable description, as sent by the peer (or by us).
        message: String,
    },

    /// The transport endpoint reported an I/O failure.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The transport's send queue is gone (peer disconnected, session torn down).
    #[error("transport send channel closed")]
    SendError,
}

/// The subset of [`Error`] that is always session-fatal: a peer behaving
/// this way cannot be recovered from locally.
#[derive(Debug, Error)]
pub enum ProtocolViolation {
    /// A channel-scoped message referenced a local id with no registered channel.
    #[error("channel {0:?} is not registered (message {1:#x})")]
    UnknownChannel(ChannelId, u8),

    /// Inbound `CHANNEL_DATA`/`CHANNEL_EXTENDED_DATA` exceeded the advertised window.
    #[error("channel {0:?}: peer sent more data than its window allowed")]
    WindowExhausted(ChannelId),

    /// A single inbound data message exceeded the negotiated max packet size.
    #[error("channel {0:?}: peer sent a packet larger than the negotiated maximum")]
    PacketTooLarge(ChannelId),

    /// `CHANNEL_WINDOW_ADJUST` would overflow the 32-bit window counter.
    #[error("channel {0:?}: window adjust overflowed")]
    WindowOverflow(ChannelId),

    /// An `EXTENDED_DATA` type other than `SSH_EXTENDED_DATA_STDERR` was
    /// received for a client-to-server session channel. Rejected rather
    /// than tolerated.
    #[error("channel {0:?}: unsupported extended data type {1}")]
    UnsupportedExtendedDataType(ChannelId, u32),

    /// A message arrived that is not legal for the channel's current state
    /// (e.g. `CHANNEL_DATA` before `CHANNEL_OPEN_CONFIRMATION`).
    #[error("channel {0:?}: message {1:#x} is not valid in state {2}")]
    UnexpectedMessage(ChannelId, u8, &'static str),

    /// The transport delivered a message number this service does not understand.
    #[error("unsupported message number {0:#x}")]
    UnsupportedMessage(u8),
}

impl Error {
    /// Whether this error must tear down the whole session rather than
    /// just fail the affected channel/request future.
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, Error::Protocol(_))
    }
}

impl From<ProtocolViolation> for std::io::Error {
    fn from(e: ProtocolViolation) -> Self {
        std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
    }
}

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

//! The channel state machine.

/// The lifecycle phase of a channel. `EofSent`/`EofReceived` are modeled as
/// independent latches on top of `Open`, not as separate phases — `Closing`
/// supersedes both — so both can be set simultaneously without a
/// combinatorial explosion of phase variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Local `CHANNEL_OPEN` sent (or inbound open received and being
    /// negotiated); `remoteId` not yet known to be valid on our side.
    Opening,
    /// Handshake complete; `remoteId` is set and data may flow both ways,
    /// subject to the `eof_sent`/`eof_received` latches below.
    Open,
    /// `CHANNEL_CLOSE` has been sent by us; supersedes EOF bookkeeping.
    Closing,
    /// Both sides have sent `CHANNEL_CLOSE`; the channel is being (or has
    /// been) removed from the registry.
    Closed,
}

/// Full channel state: phase plus the two independent EOF latches.
#[derive(Debug, Clone, Copy)]
pub struct ChannelState {
    /// Current lifecycle phase.
    pub phase: Phase,
    /// We have sent `CHANNEL_EOF`; no further data may be sent by us.
    pub eof_sent: bool,
    /// We have received `CHANNEL_EOF`; the peer will send no more data.
    pub eof_received: bool,
    /// We have sent `CHANNEL_CLOSE` (tracked so the close tie-break never
    /// sends it twice).
    pub close_sent: bool,
    /// We have received `CHANNEL_CLOSE`.
    pub close_received: bool,
}

impl ChannelState {
    /// The initial state for any channel, inbound or outbound: Opening,
    /// until the local factory has allocated the object and the open
    /// future resolves.
    pub fn opening() -> Self {
        ChannelState {
            phase: Phase::Opening,
            eof_sent: false,
            eof_received: false,
            close_sent: false,
            close_received: false,
        }
    }

    /// Whether the channel belongs in the registry: present iff state ∈
    /// {Opening, Open, EofSent, EofReceived, Closing}.
    pub fn is_registered(&self) -> bool {
        !matches!(self.phase, Phase::Closed)
    }

    /// A short, stable label for diagnostics and
    /// [`crate::error::ProtocolViolation::UnexpectedMessage`].
    pub fn label(&self) -> &'static str {
        match self.phase {
            Phase::Opening => "Opening",
            Phase::Open if self.eof_sent && self.eof_received => "EofSent+EofReceived",
            Phase::Open if self.eof_sent => "EofSent",
            Phase::Open if self.eof_received => "EofReceived",
            Phase::Open => "Open",
            Phase::Closing => "Closing",
            Phase::Closed => "Closed",
        }
    }

    /// Data may be accepted from the peer: channel is open and has not
    /// received EOF yet.
    pub fn can_receive_data(&self) -> bool {
        matches!(self.phase, Phase::Open) && !self.eof_received
    }

    /// Data may be sent to the peer: channel is open and we have not sent
    /// EOF yet.
    pub fn can_send_data(&self) -> bool {
        matches!(self.phase, Phase::Open) && !self.eof_sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opening_state_rejects_data_both_ways() {
        let s = ChannelState::opening();
        assert!(!s.can_receive_data());
        assert!(!s.can_send_data());
        assert!(s.is_registered());
    }

    #[test]
    fn eof_latches_are_independent() {
        let mut s = ChannelState::opening();
        s.phase = Phase::Open;
        assert!(s.can_receive_data());
        assert!(s.can_send_data());

        s.eof_sent = true;
        assert!(!s.can_send_data(), "sending is blocked once we sent EOF");
        assert!(s.can_receive_data(), "receiving is unaffected by our own EOF");

        s.eof_received = true;
        assert!(!s.can_receive_data(), "receiving is blocked once the peer sent EOF");
        assert_eq!(s.label(), "EofSent+EofReceived");
    }

    #[test]
    fn closed_state_is_not_registered() {
        let mut s = ChannelState::opening();
        s.phase = Phase::Closed;
        assert!(!s.is_registered());
        assert!(!s.can_send_data());
        assert!(!s.can_receive_data());
    }
}

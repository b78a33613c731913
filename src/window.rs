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

//! Per-direction flow-control window.
//!
//! A [`Window`] tracks one side of one channel's byte-credit accounting.
//! Each open channel owns two: `local_window` (what the peer may still send
//! us) and `remote_window` (what we may still send the peer).

use crate::error::ProtocolViolation;

/// Byte-credit accounting for one direction of one channel.
#[derive(Debug, Clone, Copy)]
pub struct Window {
    size: u32,
    max_size: u32,
    packet_size: u32,
}

impl Window {
    /// Build a window from the initial size/max-packet-size negotiated in a
    /// `CHANNEL_OPEN`/`CHANNEL_OPEN_CONFIRMATION` message.
    pub fn new(initial_size: u32, packet_size: u32) -> Self {
        Window {
            size: initial_size,
            max_size: initial_size,
            packet_size,
        }
    }

    /// Bytes currently available to send (if this is a remote window) or
    /// to receive before a `WINDOW_ADJUST` is due (if local).
    pub fn remaining(&self) -> u32 {
        self.size
    }

    /// The ceiling this window was initialized with. `WINDOW_ADJUST`s we
    /// emit top the window back up to this value.
    pub fn max(&self) -> u32 {
        self.max_size
    }

    /// Maximum size of a single `CHANNEL_DATA`/`CHANNEL_EXTENDED_DATA` payload.
    pub fn packet_size(&self) -> u32 {
        self.packet_size
    }

    /// Account for `n` bytes of data having been sent or received.
    ///
    /// Fails with [`ProtocolViolation::WindowExhausted`] if `n > size`.
    pub fn consume(&mut self, n: u32, channel: crate::channel::ChannelId) -> Result<(), ProtocolViolation> {
        if n > self.size {
            return Err(ProtocolViolation::WindowExhausted(channel));
        }
        self.size -= n;
        Ok(())
    }

    /// Account for a `CHANNEL_WINDOW_ADJUST(n)` credit.
    ///
    /// Fails with [`ProtocolViolation::WindowOverflow`] if the addition
    /// would exceed `max_size` or overflow `u32`. Never blocks.
    pub fn expand(&mut self, n: u32, channel: crate::channel::ChannelId) -> Result<(), ProtocolViolation> {
        let new_size = self
            .size
            .checked_add(n)
            .ok_or(ProtocolViolation::WindowOverflow(channel))?;
        if new_size > self.max_size {
            return Err(ProtocolViolation::WindowOverflow(channel));
        }
        self.size = new_size;
        Ok(())
    }

    /// Enforce both the single-packet and aggregate limits for an inbound
    /// `CHANNEL_DATA`/`CHANNEL_EXTENDED_DATA` payload of `len` bytes, then
    /// consume.
    pub fn check_and_consume(
        &mut self,
        len: u32,
        channel: crate::channel::ChannelId,
    ) -> Result<(), ProtocolViolation> {
        if len > self.packet_size {
            return Err(ProtocolViolation::PacketTooLarge(channel));
        }
        self.consume(len, channel)
    }

    /// Whether the window has fallen below the low-water mark
    /// (`max_size / 2`) and a local `WINDOW_ADJUST` is due.
    pub fn below_low_water_mark(&self) -> bool {
        self.size < self.max_size / 2
    }

    /// The amount to advertise in the `WINDOW_ADJUST` that refills this
    /// window back to `max_size`, and performs that refill locally.
    /// Returns `None` if no refill is needed.
    pub fn take_adjustment(&mut self) -> Option<u32> {
        if !self.below_low_water_mark() {
            return None;
        }
        let delta = self.max_size - self.size;
        self.size = self.max_size;
        Some(delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelId;

    fn id() -> ChannelId {
        ChannelId(0)
    }

    #[test]
    fn consume_within_budget_succeeds() {
        let mut w = Window::new(100, 32);
        assert!(w.consume(40, id()).is_ok());
        assert_eq!(w.remaining(), 60);
    }

    #[test]
    fn consume_beyond_budget_fails() {
        let mut w = Window::new(10, 32);
        assert!(w.consume(11, id()).is_err());
        assert_eq!(w.remaining(), 10, "failed consume must not mutate state");
    }

    #[test]
    fn expand_past_max_fails() {
        let mut w = Window::new(10, 32);
        w.consume(5, id()).unwrap();
        assert!(w.expand(u32::MAX, id()).is_err());
        // a valid expand back up to max succeeds
        assert!(w.expand(5, id()).is_ok());
        assert_eq!(w.remaining(), 10);
    }

    #[test]
    fn check_and_consume_rejects_oversize_packet() {
        let mut w = Window::new(1000, 32);
        assert!(w.check_and_consume(33, id()).is_err());
        assert!(w.check_and_consume(32, id()).is_ok());
    }

    #[test]
    fn low_water_mark_triggers_exactly_at_half() {
        let mut w = Window::new(100, 8);
        w.consume(51, id()).unwrap();
        assert!(w.below_low_water_mark());
        let adj = w.take_adjustment().unwrap();
        assert_eq!(adj, 51);
        assert_eq!(w.remaining(), 100);
    }

    #[test]
    fn no_adjustment_when_above_mark() {
        let mut w = Window::new(100, 8);
        w.consume(10, id()).unwrap();
        assert!(w.take_adjustment().is_none());
    }
}

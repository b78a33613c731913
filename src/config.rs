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

use std::time::Duration;

/// The default initial window size advertised for new channels: 2 MiB.
pub const DEFAULT_WINDOW_SIZE: u32 = 0x0020_0000;

/// The default maximum packet size advertised for new channels: 32 KiB.
pub const DEFAULT_PACKET_SIZE: u32 = 0x0000_8000;

/// Configuration properties consumed by the connection service.
///
/// `nio2_read_buffer_size` is accepted and stored only so configuration
/// blobs shared with the transport layer round-trip cleanly; this core
/// never reads it.
#[derive(Debug, Clone)]
pub struct Config {
    /// `max-sshd-channels`: upper bound on concurrently open channels per
    /// session, enforced by [`crate::registry::ChannelRegistry::register`].
    pub max_sshd_channels: u32,

    /// `window-size`: initial local window granted to new channels.
    pub window_size: u32,

    /// `packet-size`: maximum packet size advertised for new channels.
    pub packet_size: u32,

    /// `channel-open-timeout-ms`: bound on the channel-open future.
    pub channel_open_timeout: Duration,

    /// Whether inbound `"session"` channel opens are accepted at startup.
    /// [`crate::session::ConnectionService::set_allow_more_sessions`] flips
    /// this at runtime, e.g. from a `"no-more-sessions@openssh.com"` request
    /// handler. Applies to the `"session"` channel type only, not every
    /// channel type. Some peers expect the broader (all-types) reading;
    /// toggle at the integration layer if interoperating with one.
    pub allow_more_sessions: bool,

    /// Transport read-buffer-size hint. Not used by this core; carried
    /// through for configuration parity with the transport layer.
    pub nio2_read_buffer_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_sshd_channels: u32::MAX,
            window_size: DEFAULT_WINDOW_SIZE,
            packet_size: DEFAULT_PACKET_SIZE,
            channel_open_timeout: Duration::from_secs(30),
            allow_more_sessions: true,
            nio2_read_buffer_size: 32 * 1024,
        }
    }
}

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

//! SSH message numbers and wire constants from
//! [RFC 4254](https://datatracker.ietf.org/doc/html/rfc4254). The binary
//! packet layer (framing, MAC, cipher) lives below us and is out of scope;
//! these constants exist so the dispatcher can demultiplex on the message
//! number the transport hands it and so outbound messages are tagged
//! correctly.

#![allow(missing_docs)]

pub const GLOBAL_REQUEST: u8 = 80;
pub const REQUEST_SUCCESS: u8 = 81;
pub const REQUEST_FAILURE: u8 = 82;

pub const CHANNEL_OPEN: u8 = 90;
pub const CHANNEL_OPEN_CONFIRMATION: u8 = 91;
pub const CHANNEL_OPEN_FAILURE: u8 = 92;
pub const CHANNEL_WINDOW_ADJUST: u8 = 93;
pub const CHANNEL_DATA: u8 = 94;
pub const CHANNEL_EXTENDED_DATA: u8 = 95;
pub const CHANNEL_EOF: u8 = 96;
pub const CHANNEL_CLOSE: u8 = 97;
pub const CHANNEL_REQUEST: u8 = 98;
pub const CHANNEL_SUCCESS: u8 = 99;
pub const CHANNEL_FAILURE: u8 = 100;

/// `SSH_EXTENDED_DATA_STDERR`, the only extended-data type this core accepts
/// on client-to-server session channels (RFC 4254 §5.2).
pub const EXTENDED_DATA_STDERR: u32 = 1;

/// Reason codes for `SSH_MSG_CHANNEL_OPEN_FAILURE` (RFC 4254 §5.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenFailureReason {
    /// `SSH_OPEN_ADMINISTRATIVELY_PROHIBITED` (1).
    AdministrativelyProhibited,
    /// `SSH_OPEN_CONNECT_FAILED` (2).
    ConnectFailed,
    /// `SSH_OPEN_UNKNOWN_CHANNEL_TYPE` (3).
    UnknownChannelType,
    /// `SSH_OPEN_RESOURCE_SHORTAGE` (4).
    ResourceShortage,
    /// A non-standard reason code (private use range or peer extension).
    Other(u32),
}

impl OpenFailureReason {
    /// The wire-level `uint32` reason code.
    pub fn code(self) -> u32 {
        match self {
            OpenFailureReason::AdministrativelyProhibited => 1,
            OpenFailureReason::ConnectFailed => 2,
            OpenFailureReason::UnknownChannelType => 3,
            OpenFailureReason::ResourceShortage => 4,
            OpenFailureReason::Other(n) => n,
        }
    }

    /// Decode a wire-level reason code.
    pub fn from_code(code: u32) -> Self {
        match code {
            1 => OpenFailureReason::AdministrativelyProhibited,
            2 => OpenFailureReason::ConnectFailed,
            3 => OpenFailureReason::UnknownChannelType,
            4 => OpenFailureReason::ResourceShortage,
            n => OpenFailureReason::Other(n),
        }
    }
}

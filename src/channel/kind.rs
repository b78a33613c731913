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

//! Channel type tags and the type-specific payload carried on
//! `CHANNEL_OPEN`. Polymorphism across channel kinds collapses to this
//! tagged sum rather than a class hierarchy.

/// The `type` string of a channel, and any fields RFC 4254 attaches to its
/// `CHANNEL_OPEN` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelKind {
    /// `"session"` — shells, execs, subsystems. Carries no open payload.
    Session,

    /// `"direct-tcpip"` — a locally-initiated TCP/IP forward (RFC 4254 §7.2).
    DirectTcpIp {
        /// Host the client asked to be connected to.
        host_to_connect: String,
        /// Port the client asked to be connected to.
        port_to_connect: u32,
        /// Address of the connection that originated the request.
        originator_address: String,
        /// Port of the connection that originated the request.
        originator_port: u32,
    },

    /// `"forwarded-tcpip"` — a remotely-initiated TCP/IP forward (RFC 4254 §7.2).
    ForwardedTcpIp {
        /// Address that was bound on the forwarding side.
        connected_address: String,
        /// Port that was bound on the forwarding side.
        connected_port: u32,
        /// Address of the connection that originated the request.
        originator_address: String,
        /// Port of the connection that originated the request.
        originator_port: u32,
    },

    /// `"x11"` — an X11 forwarding channel (RFC 4254 §6.3.2).
    X11 {
        /// Address of the X client that originated the connection.
        originator_address: String,
        /// Port of the X client that originated the connection.
        originator_port: u32,
    },

    /// `"auth-agent@openssh.com"` — an agent-forwarding channel (OpenSSH extension).
    AuthAgent,

    /// Any other, unrecognized channel type. Carried so an unknown-type
    /// open still has a `type_name()` to log and to match factories
    /// against, before it is ultimately refused with
    /// `SSH_OPEN_UNKNOWN_CHANNEL_TYPE`.
    Other(String),
}

impl ChannelKind {
    /// The RFC 4254 wire type string for this channel.
    pub fn type_name(&self) -> &str {
        match self {
            ChannelKind::Session => "session",
            ChannelKind::DirectTcpIp { .. } => "direct-tcpip",
            ChannelKind::ForwardedTcpIp { .. } => "forwarded-tcpip",
            ChannelKind::X11 { .. } => "x11",
            ChannelKind::AuthAgent => "auth-agent@openssh.com",
            ChannelKind::Other(s) => s,
        }
    }

    /// Whether this is the RFC 4254 `"session"` channel type. Used by
    /// `allow_more_sessions` enforcement.
    pub fn is_session(&self) -> bool {
        matches!(self, ChannelKind::Session)
    }

    /// Decode the type-specific fields following `type`/`sender`/`initWin`/
    /// `maxPkt` in an inbound `CHANNEL_OPEN` (RFC 4254 §6.1/§7/§6.3.2).
    /// Fields that fail to decode are treated as empty/zero rather than a
    /// protocol violation — only the fixed-position header fields are
    /// security-relevant to this core; the rest are forwarded verbatim to
    /// whichever external collaborator owns the channel type.
    pub fn parse_open_payload(type_name: &str, payload: &mut &[u8]) -> ChannelKind {
        use crate::encoding::{take_ssh_string, take_u32_be};

        let string_field = |buf: &mut &[u8]| -> String {
            take_ssh_string(buf).map(|s| String::from_utf8_lossy(s).into_owned()).unwrap_or_default()
        };
        let u32_field = |buf: &mut &[u8]| -> u32 { take_u32_be(buf).unwrap_or(0) };

        match type_name {
            "session" => ChannelKind::Session,
            "direct-tcpip" => ChannelKind::DirectTcpIp {
                host_to_connect: string_field(payload),
                port_to_connect: u32_field(payload),
                originator_address: string_field(payload),
                originator_port: u32_field(payload),
            },
            "forwarded-tcpip" => ChannelKind::ForwardedTcpIp {
                connected_address: string_field(payload),
                connected_port: u32_field(payload),
                originator_address: string_field(payload),
                originator_port: u32_field(payload),
            },
            "x11" => ChannelKind::X11 {
                originator_address: string_field(payload),
                originator_port: u32_field(payload),
            },
            "auth-agent@openssh.com" => ChannelKind::AuthAgent,
            other => ChannelKind::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.type_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::Encode;

    #[test]
    fn session_has_no_open_payload() {
        let mut payload: &[u8] = &[];
        assert_eq!(ChannelKind::parse_open_payload("session", &mut payload), ChannelKind::Session);
        assert!(payload.is_empty());
    }

    #[test]
    fn direct_tcpip_decodes_all_four_fields() {
        let mut buf = Vec::new();
        buf.extend_ssh_string(b"example.com");
        buf.push_u32_be(22);
        buf.extend_ssh_string(b"10.0.0.1");
        buf.push_u32_be(54321);

        let mut cursor: &[u8] = &buf;
        let kind = ChannelKind::parse_open_payload("direct-tcpip", &mut cursor);
        assert_eq!(
            kind,
            ChannelKind::DirectTcpIp {
                host_to_connect: "example.com".to_string(),
                port_to_connect: 22,
                originator_address: "10.0.0.1".to_string(),
                originator_port: 54321,
            }
        );
        assert!(cursor.is_empty());
    }

    #[test]
    fn unknown_type_name_is_preserved_verbatim() {
        let mut payload: &[u8] = &[];
        let kind = ChannelKind::parse_open_payload("bogus", &mut payload);
        assert_eq!(kind.type_name(), "bogus");
        assert!(!kind.is_session());
    }

    #[test]
    fn truncated_payload_defaults_rather_than_panics() {
        // Only the host string, missing port/originator fields entirely.
        let mut buf = Vec::new();
        buf.extend_ssh_string(b"host");
        let mut cursor: &[u8] = &buf;
        let kind = ChannelKind::parse_open_payload("direct-tcpip", &mut cursor);
        assert_eq!(
            kind,
            ChannelKind::DirectTcpIp {
                host_to_connect: "host".to_string(),
                port_to_connect: 0,
                originator_address: String::new(),
                originator_port: 0,
            }
        );
    }
}

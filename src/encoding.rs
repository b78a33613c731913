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

//! Minimal SSH scalar/string encoding for buffers handed to us by the
//! transport (`createBuffer`/`prepareBuffer`). The binary packet
//! layer itself — framing, MAC, cipher — is out of scope; this is just the
//! handful of `uint32`/`string` field writers the connection service needs
//! to assemble its payloads, in the same spirit as
//! `russh`'s own `push_u32_be`/`extend_ssh_string` helpers.

use russh_cryptovec::CryptoVec;

/// Scalar and string encoders for the buffer types the transport hands us.
pub trait Encode {
    /// Append a single byte (typically a message number).
    fn push_u8(&mut self, v: u8);
    /// Append a big-endian `uint32`.
    fn push_u32_be(&mut self, v: u32);
    /// Append an SSH `string`: a big-endian length prefix followed by the bytes.
    fn extend_ssh_string(&mut self, s: &[u8]);
    /// Append an SSH `boolean`.
    fn push_bool(&mut self, v: bool) {
        self.push_u8(if v { 1 } else { 0 });
    }
}

impl Encode for CryptoVec {
    fn push_u8(&mut self, v: u8) {
        self.push(v);
    }

    fn push_u32_be(&mut self, v: u32) {
        self.extend(&v.to_be_bytes());
    }

    fn extend_ssh_string(&mut self, s: &[u8]) {
        self.push_u32_be(s.len() as u32);
        self.extend(s);
    }
}

impl Encode for Vec<u8> {
    fn push_u8(&mut self, v: u8) {
        self.push(v);
    }

    fn push_u32_be(&mut self, v: u32) {
        self.extend_from_slice(&v.to_be_bytes());
    }

    fn extend_ssh_string(&mut self, s: &[u8]) {
        self.push_u32_be(s.len() as u32);
        self.extend_from_slice(s);
    }
}

/// Read a big-endian `uint32` from the front of `buf`, advancing it past
/// the 4 consumed bytes. Returns `None` on short input — the transport is
/// assumed to have already validated message framing, so this only guards
/// against a malformed type-specific payload.
pub fn take_u32_be(buf: &mut &[u8]) -> Option<u32> {
    if buf.len() < 4 {
        return None;
    }
    let (head, tail) = buf.split_at(4);
    *buf = tail;
    Some(u32::from_be_bytes([head[0], head[1], head[2], head[3]]))
}

/// Read an SSH `string` (length-prefixed byte slice) from the front of
/// `buf`, advancing it past the consumed bytes.
pub fn take_ssh_string<'a>(buf: &mut &'a [u8]) -> Option<&'a [u8]> {
    let len = take_u32_be(buf)? as usize;
    if buf.len() < len {
        return None;
    }
    let (head, tail) = buf.split_at(len);
    *buf = tail;
    Some(head)
}

/// Read a single byte from the front of `buf`.
pub fn take_u8(buf: &mut &[u8]) -> Option<u8> {
    let (&first, tail) = buf.split_first()?;
    *buf = tail;
    Some(first)
}

/// Read an SSH `boolean` from the front of `buf`.
pub fn take_bool(buf: &mut &[u8]) -> Option<bool> {
    take_u8(buf).map(|b| b != 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_u32_and_string() {
        let mut buf = Vec::new();
        buf.push_u32_be(0x0102_0304);
        buf.extend_ssh_string(b"session");

        let mut cursor: &[u8] = &buf;
        assert_eq!(take_u32_be(&mut cursor), Some(0x0102_0304));
        assert_eq!(take_ssh_string(&mut cursor), Some(&b"session"[..]));
        assert!(cursor.is_empty());
    }
}

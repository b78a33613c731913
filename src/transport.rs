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

//! The transport endpoint contract: everything below us — packet
//! framing, MAC, cipher, key exchange, host-key verification — is an
//! external collaborator. This module only names the boundary.

use russh_cryptovec::CryptoVec;

use crate::future::WriteFuture;

/// What the connection service consumes from the transport layer.
///
/// A real implementation sits on top of the encrypted, authenticated
/// packet stream; it is responsible for sequence numbers, the cipher, the
/// MAC, and handing us already-decrypted, already-demultiplexed payloads.
/// We never see a raw byte off the wire.
pub trait TransportEndpoint: Send + Sync {
    /// Allocate a fresh buffer for an outbound message, with `msg` already
    /// written as its first byte and room reserved for roughly `hint`
    /// additional bytes.
    fn create_buffer(&self, msg: u8, hint: usize) -> CryptoVec;

    /// Reuse `existing` (typically just-flushed) for a new outbound message
    /// tagged `msg`, avoiding a fresh allocation on the hot path.
    fn prepare_buffer(&self, msg: u8, existing: CryptoVec) -> CryptoVec;

    /// Hand `buffer` to the transport's single-writer send queue. Returns
    /// immediately with a [`WriteFuture`] that resolves once the packet has
    /// actually gone out (or the queue is torn down).
    fn write_packet(&self, buffer: CryptoVec) -> WriteFuture;

    /// The current key-exchange session identifier `H`, exposed only for
    /// completeness of the boundary — not used inside this core.
    fn session_id(&self) -> &[u8];
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::future::{self, WriteFuture};

    /// A transport that accepts every write and resolves it immediately,
    /// for unit tests that only need a [`TransportEndpoint`] to exist.
    pub(crate) struct NullTransport;

    impl TransportEndpoint for NullTransport {
        fn create_buffer(&self, msg: u8, hint: usize) -> CryptoVec {
            let mut buf = CryptoVec::new();
            buf.push(msg);
            let _ = hint;
            buf
        }

        fn prepare_buffer(&self, msg: u8, mut existing: CryptoVec) -> CryptoVec {
            existing.clear();
            existing.push(msg);
            existing
        }

        fn write_packet(&self, _buffer: CryptoVec) -> WriteFuture {
            let (resolver, fut) = future::pair();
            resolver.resolve(Ok(()));
            fut
        }

        fn session_id(&self) -> &[u8] {
            b"test-session-id"
        }
    }
}

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

//! Explicit awaitable futures in place of listener chains: open, close,
//! write and request futures, all cancellable and all timeout-aware.

use std::time::Duration;

use tokio::sync::oneshot;

use crate::error::Error;

/// A one-shot awaitable that resolves exactly once. Every awaitable below
/// (open/close/write/request) is one of these with a different payload
/// type.
#[derive(Debug)]
pub struct Awaitable<T> {
    rx: oneshot::Receiver<T>,
}

/// The producer side, handed to whichever component resolves the awaitable.
#[derive(Debug)]
pub struct Resolver<T> {
    tx: oneshot::Sender<T>,
}

/// Build a connected `(Resolver, Awaitable)` pair.
pub fn pair<T>() -> (Resolver<T>, Awaitable<T>) {
    let (tx, rx) = oneshot::channel();
    (Resolver { tx }, Awaitable { rx })
}

impl<T> Resolver<T> {
    /// Resolve the awaitable. A closed receiver (awaitable dropped by the
    /// caller) is not an error — nothing was waiting.
    pub fn resolve(self, value: T) {
        let _ = self.tx.send(value);
    }
}

impl<T> Awaitable<T> {
    /// Wait for resolution with no deadline.
    pub async fn wait(self) -> Result<T, Error> {
        self.rx.await.map_err(|_| Error::Cancelled)
    }

    /// Wait for resolution, failing with [`Error::Timeout`] if `timeout`
    /// elapses first. The underlying operation is not reversed on timeout.
    pub async fn wait_timeout(self, timeout: Duration) -> Result<T, Error> {
        match tokio::time::timeout(timeout, self.rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(Error::Cancelled),
            Err(_) => Err(Error::Timeout),
        }
    }
}

/// Resolution of an outbound `CHANNEL_OPEN`.
#[derive(Debug)]
pub enum OpenResolution {
    /// `CHANNEL_OPEN_CONFIRMATION` was received.
    Success {
        /// The peer's channel id for this channel.
        remote_id: u32,
        /// The peer's advertised initial window size.
        window_size: u32,
        /// The peer's advertised maximum packet size.
        packet_size: u32,
    },
    /// `CHANNEL_OPEN_FAILURE` was received (or the open was refused locally).
    Failure {
        /// RFC 4254 §5.1 reason code.
        reason: crate::msg::OpenFailureReason,
        /// Human-readable description.
        message: String,
    },
}

/// Resolution of an outbound request with `want_reply = true`, correlated
/// request/response FIFO by `pendingRequests`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// `CHANNEL_SUCCESS`/`REQUEST_SUCCESS` was received.
    Success,
    /// `CHANNEL_FAILURE`/`REQUEST_FAILURE` was received.
    Failure,
}

/// Open awaitable.
pub type OpenFuture = Awaitable<OpenResolution>;
/// Close awaitable: idempotent, resolves once.
pub type CloseFuture = Awaitable<()>;
/// Outbound write awaitable.
pub type WriteFuture = Awaitable<Result<(), Error>>;
/// Outbound request-reply awaitable.
pub type RequestFuture = Awaitable<RequestOutcome>;

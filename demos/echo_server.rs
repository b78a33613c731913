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

//! A minimal stand-in for the binary packet layer: an in-process
//! [`TransportEndpoint`] connected to a peer of the same kind through a pair
//! of `tokio::sync::mpsc` channels, driving a [`ConnectionService`] on each
//! end. One side opens a `"session"` channel, sends a few lines of data, and
//! the other echoes them back until EOF.
//!
//! This exists to exercise the public API end to end without a real SSH
//! stack underneath it (which is out of scope for this crate) — run with
//! `cargo run --example echo_server`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use russh_connection::channel::{Channel, ChannelEvent, ChannelEvents, ChannelFactory, ChannelKind, OpenContext};
use russh_connection::msg::OpenFailureReason;
use russh_connection::transport::TransportEndpoint;
use russh_connection::{Config, ConnectionService};
use russh_cryptovec::CryptoVec;
use tokio::sync::mpsc;

/// One direction of an in-process wire: every outbound packet is tagged
/// with its message number and handed to the peer's inbox, skipping framing,
/// ciphers and sequence numbers entirely — this core never sees those.
struct LoopbackTransport {
    outbox: mpsc::UnboundedSender<(u8, Vec<u8>)>,
    session_id: Vec<u8>,
}

#[async_trait::async_trait]
impl TransportEndpoint for LoopbackTransport {
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

    fn write_packet(&self, buffer: CryptoVec) -> russh_connection::future::WriteFuture {
        let (resolver, fut) = russh_connection::future::pair();
        let bytes = buffer[..].to_vec();
        let cmd = bytes[0];
        let payload = bytes[1..].to_vec();
        let result = self
            .outbox
            .send((cmd, payload))
            .map_err(|_| russh_connection::Error::ServiceClosing);
        resolver.resolve(result);
        fut
    }

    fn session_id(&self) -> &[u8] {
        &self.session_id
    }
}

/// Accepts every inbound `"session"` channel open and spawns a task that
/// echoes `CHANNEL_DATA` back until `CHANNEL_EOF`, then closes.
struct EchoFactory;

#[async_trait::async_trait]
impl ChannelFactory for EchoFactory {
    async fn open(&self, _ctx: &OpenContext) -> Result<(), (OpenFailureReason, String)> {
        Ok(())
    }

    async fn attach(&self, channel: Channel, mut events: ChannelEvents) {
        tokio::spawn(async move {
            while let Some(event) = events.next().await {
                match event {
                    ChannelEvent::Data(data) => {
                        if let Err(e) = channel.data(&data).await {
                            eprintln!("echo write failed: {}", e);
                            break;
                        }
                    }
                    ChannelEvent::Eof => {
                        let _ = channel.eof().await;
                        let _ = channel.close().await;
                        break;
                    }
                    ChannelEvent::Closed => break,
                    _ => {}
                }
            }
        });
    }
}

async fn pump(
    mut inbox: mpsc::UnboundedReceiver<(u8, Vec<u8>)>,
    service: Arc<ConnectionService>,
    done: Arc<AtomicBool>,
) {
    while let Some((cmd, payload)) = inbox.recv().await {
        if let Err(e) = service.process(cmd, &payload).await {
            eprintln!("protocol violation: {}", e);
            break;
        }
        if done.load(Ordering::SeqCst) && service.channel_count() == 0 {
            break;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let (client_out, server_in) = mpsc::unbounded_channel();
    let (server_out, client_in) = mpsc::unbounded_channel();

    let client_transport: Arc<dyn TransportEndpoint> = Arc::new(LoopbackTransport {
        outbox: client_out,
        session_id: b"demo-session".to_vec(),
    });
    let server_transport: Arc<dyn TransportEndpoint> = Arc::new(LoopbackTransport {
        outbox: server_out,
        session_id: b"demo-session".to_vec(),
    });

    let client = ConnectionService::new(client_transport, Config::default());
    let server = ConnectionService::new(server_transport, Config::default());
    server.register_factory("session", Arc::new(EchoFactory)).await;

    let done = Arc::new(AtomicBool::new(false));
    let server_pump = tokio::spawn(pump(server_in, server.clone(), done.clone()));
    let client_pump = tokio::spawn(pump(client_in, client.clone(), done.clone()));

    let (channel, mut events) = client.open_and_wait(ChannelKind::Session).await?;
    channel.data(b"hello from the echo demo\n").await?;
    channel.eof().await?;

    while let Some(event) = events.next().await {
        match event {
            ChannelEvent::Data(data) => {
                print!("{}", String::from_utf8_lossy(&data));
            }
            ChannelEvent::Closed => break,
            _ => {}
        }
    }

    done.store(true, Ordering::SeqCst);
    client.close_graceful().await;
    server.close_graceful().await;
    let _ = tokio::join!(server_pump, client_pump);
    Ok(())
}

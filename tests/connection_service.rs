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

//! End-to-end scenarios against in-process transports, mirroring
//! `demos/echo_server.rs`'s `LoopbackTransport` but additionally recording
//! every outbound packet so a test can assert on exactly what went out on
//! the wire.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use russh_connection::channel::{Channel, ChannelEvent, ChannelEvents, ChannelFactory, ChannelKind, OpenContext};
use russh_connection::encoding::{take_u32_be, Encode};
use russh_connection::msg::{self, OpenFailureReason};
use russh_connection::request::{HandlerOutcome, RequestHandler, RequestScope};
use russh_connection::transport::TransportEndpoint;
use russh_connection::{Config, ConnectionService};
use russh_cryptovec::CryptoVec;
use tokio::sync::mpsc;

/// A transport that records everything it writes (for direct assertions) and
/// forwards each packet into a peer's inbox so two `ConnectionService`s can
/// be driven against each other without any real framing/cipher/MAC layer.
struct RecordingTransport {
    sent: Mutex<Vec<(u8, Vec<u8>)>>,
    peer: mpsc::UnboundedSender<(u8, Vec<u8>)>,
    session_id: Vec<u8>,
}

impl RecordingTransport {
    fn new(peer: mpsc::UnboundedSender<(u8, Vec<u8>)>) -> Arc<Self> {
        Arc::new(RecordingTransport {
            sent: Mutex::new(Vec::new()),
            peer,
            session_id: b"test-session".to_vec(),
        })
    }

    fn sent_log(&self) -> Vec<(u8, Vec<u8>)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl TransportEndpoint for RecordingTransport {
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
        self.sent.lock().unwrap().push((cmd, payload.clone()));
        let _ = self.peer.send((cmd, payload));
        resolver.resolve(Ok(()));
        fut
    }

    fn session_id(&self) -> &[u8] {
        &self.session_id
    }
}

/// A transport with nowhere to forward to, for single-sided dispatcher tests
/// (scenarios that only need to inspect replies, never a live peer).
struct SinkTransport {
    sent: Mutex<Vec<(u8, Vec<u8>)>>,
}

impl SinkTransport {
    fn new() -> Arc<Self> {
        Arc::new(SinkTransport { sent: Mutex::new(Vec::new()) })
    }

    fn sent_log(&self) -> Vec<(u8, Vec<u8>)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl TransportEndpoint for SinkTransport {
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
        self.sent.lock().unwrap().push((bytes[0], bytes[1..].to_vec()));
        resolver.resolve(Ok(()));
        fut
    }

    fn session_id(&self) -> &[u8] {
        b"sink-session"
    }
}

/// Accepts every inbound open unconditionally and echoes `CHANNEL_DATA`
/// straight back until `CHANNEL_EOF`, exactly like the demo's `EchoFactory`.
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
                        if channel.data(&data).await.is_err() {
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

/// Accepts every inbound open and does nothing further with it — used where
/// a test only cares that the open itself succeeded.
struct AcceptAll;

#[async_trait::async_trait]
impl ChannelFactory for AcceptAll {
    async fn open(&self, _ctx: &OpenContext) -> Result<(), (OpenFailureReason, String)> {
        Ok(())
    }

    async fn attach(&self, _channel: Channel, mut events: ChannelEvents) {
        tokio::spawn(async move { while events.next().await.is_some() {} });
    }
}

fn channel_open_payload(type_name: &str, sender: u32, window: u32, packet: u32) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_ssh_string(type_name.as_bytes());
    buf.push_u32_be(sender);
    buf.push_u32_be(window);
    buf.push_u32_be(packet);
    buf
}

async fn pump(mut inbox: mpsc::UnboundedReceiver<(u8, Vec<u8>)>, service: Arc<ConnectionService>) {
    while let Some((cmd, payload)) = inbox.recv().await {
        if service.process(cmd, &payload).await.is_err() {
            break;
        }
    }
}

fn small_window_config() -> Config {
    Config {
        window_size: 100,
        packet_size: 32,
        ..Config::default()
    }
}

/// A data stream large enough to cross the low-water mark produces at
/// least one `WINDOW_ADJUST` totalling >= the bytes sent.
#[tokio::test]
async fn crossing_low_water_mark_triggers_window_adjust() {
    let (to_server_tx, to_server_rx) = mpsc::unbounded_channel();
    let (to_client_tx, to_client_rx) = mpsc::unbounded_channel();

    let client_transport = RecordingTransport::new(to_server_tx);
    let server_transport = RecordingTransport::new(to_client_tx);

    let client = ConnectionService::new(client_transport.clone(), small_window_config());
    let server = ConnectionService::new(server_transport.clone(), small_window_config());
    server.register_factory("session", Arc::new(EchoFactory)).await;

    let server_pump = tokio::spawn(pump(to_server_rx, server.clone()));
    let client_pump = tokio::spawn(pump(to_client_rx, client.clone()));

    let (channel, mut events) = client.open_and_wait(ChannelKind::Session).await.expect("open");

    // 100-byte window, 32-byte packets: send enough data to cross 50 (the
    // low-water mark) so the server must adjust.
    channel.data(&[7u8; 60]).await.expect("send data");

    // Drain echoed data back so the exchange progresses and the server's
    // WINDOW_ADJUST has a chance to land.
    let mut received = 0usize;
    while received < 60 {
        match events.next().await {
            Some(ChannelEvent::Data(d)) => received += d.len(),
            Some(_) => {}
            None => break,
        }
    }

    channel.eof().await.expect("eof");
    let _ = channel.close().await;

    tokio::time::sleep(Duration::from_millis(20)).await;

    let adjust_total: u32 = server_transport
        .sent_log()
        .into_iter()
        .filter(|(cmd, _)| *cmd == msg::CHANNEL_WINDOW_ADJUST)
        .map(|(_, payload)| {
            let mut p: &[u8] = &payload;
            let _recipient = take_u32_be(&mut p).unwrap();
            take_u32_be(&mut p).unwrap()
        })
        .sum();
    assert!(adjust_total >= 60, "expected >= 60 bytes of window adjust, got {}", adjust_total);

    server.close_graceful().await;
    client.close_graceful().await;
    server_pump.abort();
    client_pump.abort();
}

/// An unknown channel type is refused with `OPEN_FAILURE(code=3)` and
/// never registered.
#[tokio::test]
async fn unknown_channel_type_is_refused() {
    let transport = SinkTransport::new();
    let server = ConnectionService::new(transport.clone(), Config::default());
    // No factories registered at all.

    let payload = channel_open_payload("bogus", 7, 0x0020_0000, 0x8000);
    server.process(msg::CHANNEL_OPEN, &payload).await.expect("process does not itself fail");

    assert_eq!(server.channel_count(), 0);
    let sent = transport.sent_log();
    assert_eq!(sent.len(), 1);
    let (cmd, body) = &sent[0];
    assert_eq!(*cmd, msg::CHANNEL_OPEN_FAILURE);
    let mut p: &[u8] = body;
    let recipient = take_u32_be(&mut p).unwrap();
    let reason = take_u32_be(&mut p).unwrap();
    assert_eq!(recipient, 7);
    assert_eq!(reason, OpenFailureReason::UnknownChannelType.code());
}

/// Once `max-sshd-channels` is reached, further opens are refused with
/// `OPEN_FAILURE(code=4)`.
#[tokio::test]
async fn too_many_channels_is_refused() {
    let transport = SinkTransport::new();
    let config = Config {
        max_sshd_channels: 2,
        ..Config::default()
    };
    let server = ConnectionService::new(transport.clone(), config);
    server.register_factory("session", Arc::new(AcceptAll)).await;

    for sender in 0..2u32 {
        let payload = channel_open_payload("session", sender, 0x0020_0000, 0x8000);
        server.process(msg::CHANNEL_OPEN, &payload).await.unwrap();
    }
    assert_eq!(server.channel_count(), 2);

    let payload = channel_open_payload("session", 2, 0x0020_0000, 0x8000);
    server.process(msg::CHANNEL_OPEN, &payload).await.unwrap();
    assert_eq!(server.channel_count(), 2, "third open must not be registered");

    let sent = transport.sent_log();
    let (cmd, body) = sent.last().unwrap();
    assert_eq!(*cmd, msg::CHANNEL_OPEN_FAILURE);
    let mut p: &[u8] = body;
    let _recipient = take_u32_be(&mut p).unwrap();
    let reason = take_u32_be(&mut p).unwrap();
    assert_eq!(reason, OpenFailureReason::ResourceShortage.code());
}

/// Once the service is closing, inbound opens are always refused.
#[tokio::test]
async fn opens_are_refused_once_closing() {
    let transport = SinkTransport::new();
    let server = ConnectionService::new(transport.clone(), Config::default());
    server.register_factory("session", Arc::new(AcceptAll)).await;
    server.close_immediate().await;

    let payload = channel_open_payload("session", 0, 0x0020_0000, 0x8000);
    server.process(msg::CHANNEL_OPEN, &payload).await.unwrap();

    let sent = transport.sent_log();
    let (cmd, body) = sent.last().unwrap();
    assert_eq!(*cmd, msg::CHANNEL_OPEN_FAILURE);
    let mut p: &[u8] = body;
    let _recipient = take_u32_be(&mut p).unwrap();
    let reason = take_u32_be(&mut p).unwrap();
    assert_eq!(reason, OpenFailureReason::ConnectFailed.code());
}

/// A handler that always returns `Unsupported`.
struct UnsupportedHandler;

#[async_trait::async_trait]
impl RequestHandler for UnsupportedHandler {
    async fn handle(&self, _scope: RequestScope, _name: &str, _payload: &[u8]) -> HandlerOutcome {
        HandlerOutcome::Unsupported
    }
}

/// A handler that accepts a specific request name and reports success.
struct AcceptNamed(&'static str);

#[async_trait::async_trait]
impl RequestHandler for AcceptNamed {
    async fn handle(&self, _scope: RequestScope, name: &str, _payload: &[u8]) -> HandlerOutcome {
        if name == self.0 {
            HandlerOutcome::ReplySuccess
        } else {
            HandlerOutcome::Unsupported
        }
    }
}

fn global_request_payload(name: &str, want_reply: bool) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_ssh_string(name.as_bytes());
    buf.push_bool(want_reply);
    buf
}

/// Handler chain `[A, B]`, A unsupported, B accepts.
/// Exactly one `REQUEST_SUCCESS` with `want_reply=true`; nothing with
/// `want_reply=false`.
#[tokio::test]
async fn global_request_routes_through_handler_chain() {
    let transport = SinkTransport::new();
    let server = ConnectionService::new(transport.clone(), Config::default());
    server.push_request_handler(Arc::new(UnsupportedHandler)).await;
    server.push_request_handler(Arc::new(AcceptNamed("tcpip-forward"))).await;

    let payload = global_request_payload("tcpip-forward", true);
    server.process(msg::GLOBAL_REQUEST, &payload).await.unwrap();
    let sent = transport.sent_log();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, msg::REQUEST_SUCCESS);
}

#[tokio::test]
async fn global_request_sends_nothing_when_reply_not_wanted() {
    let transport = SinkTransport::new();
    let server = ConnectionService::new(transport.clone(), Config::default());
    server.push_request_handler(Arc::new(AcceptNamed("tcpip-forward"))).await;

    let payload = global_request_payload("tcpip-forward", false);
    server.process(msg::GLOBAL_REQUEST, &payload).await.unwrap();
    assert!(transport.sent_log().is_empty());
}

/// If every handler returns `Unsupported`, the router replies failure iff
/// `want_reply`.
#[tokio::test]
async fn global_request_with_no_handler_replies_failure_iff_want_reply() {
    let transport = SinkTransport::new();
    let server = ConnectionService::new(transport.clone(), Config::default());
    server.push_request_handler(Arc::new(UnsupportedHandler)).await;

    let payload = global_request_payload("unknown-request", true);
    server.process(msg::GLOBAL_REQUEST, &payload).await.unwrap();
    let sent = transport.sent_log();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, msg::REQUEST_FAILURE);
}

/// A channel-scoped message referencing an unregistered channel is a
/// session-fatal protocol violation that tears the session down.
#[tokio::test]
async fn unknown_channel_reference_is_session_fatal() {
    let transport = SinkTransport::new();
    let server = ConnectionService::new(transport.clone(), Config::default());
    server.register_factory("session", Arc::new(AcceptAll)).await;

    // Register one real channel so we can observe it getting force-closed.
    let open_payload = channel_open_payload("session", 0, 0x0020_0000, 0x8000);
    server.process(msg::CHANNEL_OPEN, &open_payload).await.unwrap();
    assert_eq!(server.channel_count(), 1);

    let mut bogus = Vec::new();
    bogus.push_u32_be(42);
    bogus.extend_ssh_string(b"data for nobody");
    let result = server.process(msg::CHANNEL_DATA, &bogus).await;
    assert!(result.is_err(), "unknown channel reference must be reported as an error");

    // process() tears the session down on any session-fatal error.
    assert_eq!(server.channel_count(), 0, "all channels must be force-closed");
    assert!(server.is_closing());
}

/// Records the local id assigned to every channel it accepts.
struct RecordingFactory {
    ids: Mutex<Vec<u32>>,
}

impl RecordingFactory {
    fn new() -> Arc<Self> {
        Arc::new(RecordingFactory { ids: Mutex::new(Vec::new()) })
    }
}

#[async_trait::async_trait]
impl ChannelFactory for RecordingFactory {
    async fn open(&self, _ctx: &OpenContext) -> Result<(), (OpenFailureReason, String)> {
        Ok(())
    }

    async fn attach(&self, channel: Channel, mut events: ChannelEvents) {
        self.ids.lock().unwrap().push(channel.id().0);
        tokio::spawn(async move { while events.next().await.is_some() {} });
    }
}

/// Local channel ids are unique and allocated monotonically from 0,
/// regardless of how many inbound opens are refused along the way.
#[tokio::test]
async fn channel_ids_are_monotonic_across_refusals() {
    let transport = SinkTransport::new();
    let server = ConnectionService::new(transport.clone(), Config::default());
    let factory = RecordingFactory::new();
    server.register_factory("session", factory.clone()).await;

    // A refused open (unknown type) must not consume an id slot; the
    // accepted opens still get 0, 1, 2 in order.
    let bogus = channel_open_payload("bogus", 99, 0x1000, 0x100);
    server.process(msg::CHANNEL_OPEN, &bogus).await.unwrap();

    for sender in 0..3u32 {
        let payload = channel_open_payload("session", sender, 0x1000, 0x100);
        server.process(msg::CHANNEL_OPEN, &payload).await.unwrap();
    }
    assert_eq!(server.channel_count(), 3);
    assert_eq!(*factory.ids.lock().unwrap(), vec![0, 1, 2]);
}

/// `close()` invoked repeatedly resolves the same close future exactly
/// once, and is safe to call from multiple independent waiters.
#[tokio::test]
async fn close_future_resolves_once_for_every_waiter() {
    let transport = SinkTransport::new();
    let server = ConnectionService::new(transport.clone(), Config::default());

    let before = server.closed().await;
    server.close_immediate().await;
    server.close_immediate().await; // idempotent, must not panic or hang
    before.wait_timeout(Duration::from_secs(1)).await.expect("already-registered waiter resolves");

    let after = server.closed().await;
    after.wait_timeout(Duration::from_secs(1)).await.expect("post-close waiter resolves immediately");
}

/// Graceful close sends queued writes before EOF, and EOF before CLOSE,
/// on a given channel.
#[tokio::test]
async fn graceful_close_orders_writes_before_eof_before_close() {
    let (to_server_tx, to_server_rx) = mpsc::unbounded_channel();
    let (to_client_tx, to_client_rx) = mpsc::unbounded_channel();

    let client_transport = RecordingTransport::new(to_server_tx);
    let server_transport = RecordingTransport::new(to_client_tx);

    let client = ConnectionService::new(client_transport.clone(), Config::default());
    let server = ConnectionService::new(server_transport.clone(), Config::default());
    server.register_factory("session", Arc::new(AcceptAll)).await;

    let server_pump = tokio::spawn(pump(to_server_rx, server.clone()));
    let client_pump = tokio::spawn(pump(to_client_rx, client.clone()));

    let (channel, _events) = client.open_and_wait(ChannelKind::Session).await.expect("open");
    channel.data(b"A").await.unwrap();
    channel.data(b"B").await.unwrap();
    channel.data(b"C").await.unwrap();

    client.close_graceful().await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let sent = client_transport.sent_log();
    let codes: Vec<u8> = sent.iter().map(|(c, _)| *c).collect();
    let data_positions: Vec<usize> = codes
        .iter()
        .enumerate()
        .filter(|(_, c)| **c == msg::CHANNEL_DATA)
        .map(|(i, _)| i)
        .collect();
    let eof_pos = codes.iter().position(|c| *c == msg::CHANNEL_EOF);
    let close_pos = codes.iter().position(|c| *c == msg::CHANNEL_CLOSE);

    assert_eq!(data_positions.len(), 3, "all three writes must reach the wire");
    let eof_pos = eof_pos.expect("EOF must be sent");
    let close_pos = close_pos.expect("CLOSE must be sent");
    assert!(data_positions.iter().all(|&p| p < eof_pos), "every data write precedes EOF");
    assert!(eof_pos < close_pos, "EOF precedes CLOSE");

    server.close_graceful().await;
    server_pump.abort();
    client_pump.abort();
}

/// A channel sends `CHANNEL_CLOSE` at most once even when the peer's
/// `CHANNEL_CLOSE` arrives concurrently with (before) ours (the RFC 4254
/// §5.3 tie-break).
#[tokio::test]
async fn close_tie_break_sends_close_exactly_once() {
    let (to_server_tx, to_server_rx) = mpsc::unbounded_channel();
    let (to_client_tx, to_client_rx) = mpsc::unbounded_channel();

    let client_transport = RecordingTransport::new(to_server_tx);
    let server_transport = RecordingTransport::new(to_client_tx);

    let client = ConnectionService::new(client_transport.clone(), Config::default());
    let server = ConnectionService::new(server_transport.clone(), Config::default());
    server.register_factory("session", Arc::new(AcceptAll)).await;

    let server_pump = tokio::spawn(pump(to_server_rx, server.clone()));
    let client_pump = tokio::spawn(pump(to_client_rx, client.clone()));

    let (channel, _events) = client.open_and_wait(ChannelKind::Session).await.expect("open");

    // Server receives <CLOSE from the client before it ever calls >CLOSE
    // itself — handle_close() must still emit exactly one CHANNEL_CLOSE.
    let close_future = channel.close().await.unwrap();
    close_future.wait_timeout(Duration::from_secs(1)).await.expect("close completes");

    tokio::time::sleep(Duration::from_millis(20)).await;
    let server_closes = server_transport.sent_log().into_iter().filter(|(c, _)| *c == msg::CHANNEL_CLOSE).count();
    assert_eq!(server_closes, 1, "server must send CHANNEL_CLOSE exactly once");

    server_pump.abort();
    client_pump.abort();
}

use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use beam_protocol::control::{
    decode_message, encode_message, try_decode_frame, ControlMessage,
};

/// Heartbeat tuning: a ping every `interval`, dead after `timeout` with no
/// traffic at all (pong or otherwise).
#[derive(Debug, Clone, Copy)]
pub struct Heartbeat {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    Connecting,
    Connected,
    Disconnected,
}

/// Events surfaced to the session. Heartbeat ping/pong never appear here.
#[derive(Debug)]
pub enum ChannelEvent {
    Connected,
    Message(ControlMessage),
    Disconnected,
}

enum ConnectionSource {
    Connect(SocketAddr),
    Listen(TcpListener),
    Adopt(TcpStream),
}

/// One-shot, length-framed JSON message bus over a single TCP stream.
///
/// The channel goes `idle → connecting → connected → disconnected` and never
/// back; `send` on a channel that is not connected is silently dropped, and
/// any receive error is terminal. Either side may be the listener (first
/// established connection wins) or the connector; `adopt` wraps a connection
/// the discovery layer already accepted.
pub struct ControlChannel {
    outgoing: mpsc::Sender<ControlMessage>,
    state: watch::Receiver<ChannelState>,
    remote_host: Arc<Mutex<Option<IpAddr>>>,
    shutdown: Arc<Notify>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ControlChannel {
    /// Dial a peer's advertised control endpoint.
    pub fn connect(addr: SocketAddr, heartbeat: Heartbeat) -> (Self, mpsc::Receiver<ChannelEvent>) {
        Self::spawn(ConnectionSource::Connect(addr), heartbeat)
    }

    /// Accept the first connection on `listener`; later connections are
    /// refused once the listener is released.
    pub fn listen(listener: TcpListener, heartbeat: Heartbeat) -> (Self, mpsc::Receiver<ChannelEvent>) {
        Self::spawn(ConnectionSource::Listen(listener), heartbeat)
    }

    /// Wrap an already-accepted connection without changing behavior.
    pub fn adopt(stream: TcpStream, heartbeat: Heartbeat) -> (Self, mpsc::Receiver<ChannelEvent>) {
        Self::spawn(ConnectionSource::Adopt(stream), heartbeat)
    }

    fn spawn(source: ConnectionSource, heartbeat: Heartbeat) -> (Self, mpsc::Receiver<ChannelEvent>) {
        let (outgoing_tx, outgoing_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = mpsc::channel(64);
        let (state_tx, state_rx) = watch::channel(ChannelState::Idle);
        let remote_host = Arc::new(Mutex::new(None));
        let shutdown = Arc::new(Notify::new());

        let driver_host = remote_host.clone();
        let driver_shutdown = shutdown.clone();
        let handle = tokio::spawn(async move {
            drive(
                source,
                heartbeat,
                outgoing_rx,
                event_tx,
                state_tx,
                driver_host,
                driver_shutdown,
            )
            .await;
        });

        (
            Self {
                outgoing: outgoing_tx,
                state: state_rx,
                remote_host,
                shutdown,
                handle: Mutex::new(Some(handle)),
            },
            event_rx,
        )
    }

    /// Queue a message. Dropped silently unless the channel is connected.
    pub fn send(&self, msg: ControlMessage) {
        if self.state() != ChannelState::Connected {
            debug!(?msg, "dropping send on non-connected channel");
            return;
        }
        if self.outgoing.try_send(msg).is_err() {
            debug!("dropping send, outgoing queue full or closed");
        }
    }

    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    /// The peer's IP, once connected — the address UDP datagrams go to.
    pub fn remote_host(&self) -> Option<IpAddr> {
        *self.remote_host.lock().unwrap()
    }

    /// Flush queued messages and tear the connection down. Idempotent.
    pub async fn close(&self) {
        self.shutdown.notify_one();
        let handle = self.handle.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

async fn drive(
    source: ConnectionSource,
    heartbeat: Heartbeat,
    mut outgoing_rx: mpsc::Receiver<ControlMessage>,
    event_tx: mpsc::Sender<ChannelEvent>,
    state_tx: watch::Sender<ChannelState>,
    remote_host: Arc<Mutex<Option<IpAddr>>>,
    shutdown: Arc<Notify>,
) {
    let _ = state_tx.send(ChannelState::Connecting);

    let established = tokio::select! {
        _ = shutdown.notified() => None,
        result = establish(source) => match result {
            Ok(stream) => Some(stream),
            Err(e) => {
                warn!("control channel failed to establish: {e}");
                None
            }
        },
    };
    let Some(stream) = established else {
        let _ = state_tx.send(ChannelState::Disconnected);
        let _ = event_tx.send(ChannelEvent::Disconnected).await;
        return;
    };

    if let Ok(peer) = stream.peer_addr() {
        *remote_host.lock().unwrap() = Some(peer.ip());
        info!(peer = %peer, "control channel connected");
    }
    let _ = stream.set_nodelay(true);
    let _ = state_tx.send(ChannelState::Connected);
    let _ = event_tx.send(ChannelEvent::Connected).await;

    let (mut read_half, mut write_half) = stream.into_split();
    let mut buf = BytesMut::with_capacity(8192);
    let mut ping_timer = tokio::time::interval(heartbeat.interval);
    ping_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ping_timer.reset(); // first ping one interval after connect
    let mut last_traffic = Instant::now();

    let reason: &str = loop {
        tokio::select! {
            _ = shutdown.notified() => {
                // Flush anything the session queued before closing (beam_end).
                while let Ok(msg) = outgoing_rx.try_recv() {
                    if write_frame(&mut write_half, &msg).await.is_err() {
                        break;
                    }
                }
                break "closed locally";
            }
            _ = ping_timer.tick() => {
                if write_frame(&mut write_half, &ControlMessage::Ping).await.is_err() {
                    break "write failed";
                }
            }
            msg = outgoing_rx.recv() => {
                match msg {
                    Some(msg) => {
                        if write_frame(&mut write_half, &msg).await.is_err() {
                            break "write failed";
                        }
                    }
                    None => break "handle dropped",
                }
            }
            _ = tokio::time::sleep_until(last_traffic + heartbeat.timeout) => {
                break "heartbeat timeout";
            }
            result = read_half.read_buf(&mut buf) => {
                match result {
                    Ok(0) => break "peer closed",
                    Ok(_) => {
                        last_traffic = Instant::now();
                        match drain_frames(&mut buf, &mut write_half, &event_tx).await {
                            Ok(()) => {}
                            Err(reason) => break reason,
                        }
                    }
                    Err(e) => {
                        warn!("control channel read error: {e}");
                        break "read failed";
                    }
                }
            }
        }
    };

    info!(reason, "control channel disconnected");
    let _ = state_tx.send(ChannelState::Disconnected);
    let _ = event_tx.send(ChannelEvent::Disconnected).await;
}

async fn establish(source: ConnectionSource) -> std::io::Result<TcpStream> {
    match source {
        ConnectionSource::Connect(addr) => TcpStream::connect(addr).await,
        ConnectionSource::Listen(listener) => {
            let (stream, _) = listener.accept().await?;
            // Listener dropped here: the first connection won, the rest are refused.
            Ok(stream)
        }
        ConnectionSource::Adopt(stream) => Ok(stream),
    }
}

async fn write_frame(
    write_half: &mut OwnedWriteHalf,
    msg: &ControlMessage,
) -> Result<(), ()> {
    let frame = match encode_message(msg) {
        Ok(frame) => frame,
        Err(e) => {
            warn!("failed to encode control message: {e}");
            return Ok(()); // unencodable message is dropped, not fatal
        }
    };
    write_half.write_all(&frame).await.map_err(|e| {
        warn!("control channel write error: {e}");
    })
}

/// Process every complete frame in `buf`. A received ping is answered with a
/// pong immediately; ping/pong are consumed here, everything else goes to
/// the session. Oversized or malformed frames are terminal.
async fn drain_frames(
    buf: &mut BytesMut,
    write_half: &mut OwnedWriteHalf,
    event_tx: &mpsc::Sender<ChannelEvent>,
) -> Result<(), &'static str> {
    loop {
        match try_decode_frame(buf) {
            Ok(Some(payload)) => match decode_message(&payload) {
                Ok(ControlMessage::Ping) => {
                    if write_frame(write_half, &ControlMessage::Pong).await.is_err() {
                        return Err("write failed");
                    }
                }
                Ok(ControlMessage::Pong) => {}
                Ok(msg) => {
                    if event_tx.send(ChannelEvent::Message(msg)).await.is_err() {
                        return Err("event consumer gone");
                    }
                }
                Err(e) => {
                    warn!("malformed control message: {e}");
                    return Err("malformed message");
                }
            },
            Ok(None) => return Ok(()),
            Err(e) => {
                warn!("malformed control frame: {e}");
                return Err("malformed frame");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn fast_heartbeat() -> Heartbeat {
        Heartbeat {
            interval: Duration::from_millis(50),
            timeout: Duration::from_millis(250),
        }
    }

    async fn connected_pair() -> (
        ControlChannel,
        mpsc::Receiver<ChannelEvent>,
        ControlChannel,
        mpsc::Receiver<ChannelEvent>,
    ) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (server, mut server_rx) = ControlChannel::listen(listener, fast_heartbeat());
        let (client, mut client_rx) = ControlChannel::connect(addr, fast_heartbeat());

        for rx in [&mut server_rx, &mut client_rx] {
            match tokio::time::timeout(Duration::from_secs(2), rx.recv()).await {
                Ok(Some(ChannelEvent::Connected)) => {}
                other => panic!("expected Connected, got {other:?}"),
            }
        }
        (server, server_rx, client, client_rx)
    }

    async fn next_message(rx: &mut mpsc::Receiver<ChannelEvent>) -> ControlMessage {
        loop {
            match tokio::time::timeout(Duration::from_secs(2), rx.recv()).await {
                Ok(Some(ChannelEvent::Message(msg))) => return msg,
                Ok(Some(other)) => panic!("expected Message, got {other:?}"),
                other => panic!("channel dead: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn offer_accept_exchange() {
        let (server, mut server_rx, client, mut client_rx) = connected_pair().await;

        client.send(ControlMessage::BeamOffer {
            sender_name: "sender".into(),
            window_title: "Game".into(),
            width: 640,
            height: 480,
            has_audio: true,
            bundle_id: "com.example.game".into(),
        });
        let offer = next_message(&mut server_rx).await;
        assert!(matches!(offer, ControlMessage::BeamOffer { width: 640, .. }));

        server.send(ControlMessage::BeamAccept {
            video_port: 50000,
            audio_port: 50001,
        });
        let accept = next_message(&mut client_rx).await;
        assert_eq!(
            accept,
            ControlMessage::BeamAccept {
                video_port: 50000,
                audio_port: 50001,
            }
        );

        client.close().await;
        server.close().await;
    }

    #[tokio::test]
    async fn messages_arrive_in_send_order() {
        let (server, mut server_rx, client, _client_rx) = connected_pair().await;

        for _ in 0..3 {
            client.send(ControlMessage::KeyframeRequest);
            client.send(ControlMessage::CursorState { visible: true });
        }
        for _ in 0..3 {
            assert_eq!(next_message(&mut server_rx).await, ControlMessage::KeyframeRequest);
            assert_eq!(
                next_message(&mut server_rx).await,
                ControlMessage::CursorState { visible: true }
            );
        }

        client.close().await;
        server.close().await;
    }

    #[tokio::test]
    async fn heartbeat_keeps_idle_channel_alive() {
        let (server, mut server_rx, client, _client_rx) = connected_pair().await;

        // Several timeout periods with no application traffic: pings keep it up.
        tokio::time::sleep(Duration::from_millis(800)).await;
        assert_eq!(client.state(), ChannelState::Connected);
        assert_eq!(server.state(), ChannelState::Connected);

        client.send(ControlMessage::BeamEnd);
        assert_eq!(next_message(&mut server_rx).await, ControlMessage::BeamEnd);

        client.close().await;
        server.close().await;
    }

    #[tokio::test]
    async fn peer_close_disconnects() {
        let (server, _server_rx, client, mut client_rx) = connected_pair().await;

        server.close().await;

        loop {
            match tokio::time::timeout(Duration::from_secs(2), client_rx.recv()).await {
                Ok(Some(ChannelEvent::Disconnected)) => break,
                Ok(Some(_)) => continue,
                other => panic!("expected Disconnected, got {other:?}"),
            }
        }
        assert_eq!(client.state(), ChannelState::Disconnected);
        client.close().await;
    }

    #[tokio::test]
    async fn send_before_connect_is_dropped() {
        // Nothing is listening: the channel never reaches Connected.
        let (client, mut client_rx) = ControlChannel::connect(
            "127.0.0.1:1".parse().unwrap(),
            fast_heartbeat(),
        );
        client.send(ControlMessage::Ping);

        loop {
            match tokio::time::timeout(Duration::from_secs(2), client_rx.recv()).await {
                Ok(Some(ChannelEvent::Disconnected)) => break,
                Ok(Some(_)) => continue,
                other => panic!("expected Disconnected, got {other:?}"),
            }
        }
        client.close().await;
    }

    #[tokio::test]
    async fn remote_host_is_peer_ip() {
        let (server, _server_rx, client, _client_rx) = connected_pair().await;
        assert_eq!(
            client.remote_host(),
            Some("127.0.0.1".parse::<IpAddr>().unwrap())
        );
        client.close().await;
        server.close().await;
    }

    #[tokio::test]
    async fn adopt_behaves_like_accept() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (client, mut client_rx) = ControlChannel::connect(addr, fast_heartbeat());
        let (stream, _) = listener.accept().await.unwrap();
        let (adopted, mut adopted_rx) = ControlChannel::adopt(stream, fast_heartbeat());

        for rx in [&mut client_rx, &mut adopted_rx] {
            match tokio::time::timeout(Duration::from_secs(2), rx.recv()).await {
                Ok(Some(ChannelEvent::Connected)) => {}
                other => panic!("expected Connected, got {other:?}"),
            }
        }

        adopted.send(ControlMessage::CursorState { visible: false });
        assert_eq!(
            next_message(&mut client_rx).await,
            ControlMessage::CursorState { visible: false }
        );

        client.close().await;
        adopted.close().await;
    }
}

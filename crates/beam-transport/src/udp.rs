use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use beam_protocol::packet::{
    fragment_nal, AssembledNal, Reassembler, MAX_DATAGRAM, REASSEMBLY_GC_WINDOW,
};

use crate::error::TransportError;

/// Build a dual-stack UDP socket: IPv4 and IPv6 accepted on one socket
/// (`IPV6_V6ONLY=0`), `SO_REUSEPORT` set, 2 MB buffers to absorb video
/// bursts. Port 0 asks the system to choose.
fn dual_stack_socket(port: u16) -> Result<std::net::UdpSocket, TransportError> {
    let sock = socket2::Socket::new(
        socket2::Domain::IPV6,
        socket2::Type::DGRAM,
        Some(socket2::Protocol::UDP),
    )?;
    sock.set_only_v6(false)?;
    #[cfg(unix)]
    sock.set_reuse_port(true)?;
    let _ = sock.set_recv_buffer_size(2 * 1024 * 1024);
    let _ = sock.set_send_buffer_size(2 * 1024 * 1024);
    let addr: SocketAddr = (IpAddr::V6(Ipv6Addr::UNSPECIFIED), port).into();
    sock.bind(&addr.into())?;
    sock.set_nonblocking(true)?;
    Ok(sock.into())
}

/// Map an IPv4 destination into the v6-mapped form the dual-stack socket
/// expects; IPv6 destinations pass through.
fn to_dual_stack(addr: SocketAddr) -> SocketAddr {
    match addr {
        SocketAddr::V4(v4) => {
            SocketAddr::new(IpAddr::V6(v4.ip().to_ipv6_mapped()), v4.port())
        }
        SocketAddr::V6(_) => addr,
    }
}

#[derive(Debug, Default)]
pub struct SenderStats {
    pub datagrams_sent: AtomicU64,
    pub datagrams_dropped: AtomicU64,
    pub nals_sent: AtomicU64,
}

/// Best-effort media sender: fragments NAL-sized payloads and fires them at
/// one peer. `send_nal` never blocks and never fails the session — a datagram
/// the socket refuses is dropped, and the first refusal is logged once.
pub struct MediaSender {
    socket: UdpSocket,
    sequence: u16,
    error_logged: AtomicBool,
    stats: Arc<SenderStats>,
}

impl MediaSender {
    /// Bind an ephemeral local socket and direct it at `peer`.
    pub async fn connect(peer: SocketAddr) -> Result<Self, TransportError> {
        let socket = UdpSocket::from_std(dual_stack_socket(0)?)?;
        socket.connect(to_dual_stack(peer)).await?;
        Ok(Self {
            socket,
            sequence: 0,
            error_logged: AtomicBool::new(false),
            stats: Arc::new(SenderStats::default()),
        })
    }

    /// Fragment one NAL unit and send its datagrams in fragment-index order.
    pub fn send_nal(&mut self, nal: &[u8], is_keyframe: bool, timestamp: u32) {
        let datagrams = fragment_nal(nal, is_keyframe, timestamp, &mut self.sequence);
        for datagram in &datagrams {
            match self.socket.try_send(datagram) {
                Ok(_) => {
                    self.stats.datagrams_sent.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    self.stats.datagrams_dropped.fetch_add(1, Ordering::Relaxed);
                    if !self.error_logged.swap(true, Ordering::Relaxed) {
                        warn!("UDP send failed, dropping datagrams from now on silently: {e}");
                    }
                }
            }
        }
        self.stats.nals_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> Arc<SenderStats> {
        self.stats.clone()
    }

    pub fn local_port(&self) -> Result<u16, TransportError> {
        Ok(self.socket.local_addr()?.port())
    }
}

#[derive(Debug, Default)]
pub struct ReceiverStats {
    pub datagrams_received: AtomicU64,
    pub nals_emitted: AtomicU64,
}

/// Background UDP receive loop feeding a [`Reassembler`].
///
/// Completed NALs are emitted on the returned channel as soon as their last
/// fragment arrives; there is no cross-NAL reordering. `stop()` signals the
/// loop, wakes the blocked `recv`, and joins the task so no callback can
/// outlive the receiver.
pub struct MediaReceiver {
    port: u16,
    shutdown: Arc<Notify>,
    handle: JoinHandle<()>,
    stats: Arc<ReceiverStats>,
}

impl MediaReceiver {
    /// Bind a system-chosen port and start the receive loop.
    pub fn bind() -> Result<(Self, mpsc::Receiver<AssembledNal>), TransportError> {
        Self::bind_port(0, REASSEMBLY_GC_WINDOW)
    }

    pub fn bind_port(
        port: u16,
        gc_window: u32,
    ) -> Result<(Self, mpsc::Receiver<AssembledNal>), TransportError> {
        let socket = UdpSocket::from_std(dual_stack_socket(port)?)?;
        let port = socket.local_addr()?.port();
        let shutdown = Arc::new(Notify::new());
        let stats = Arc::new(ReceiverStats::default());
        let (tx, rx) = mpsc::channel(256);

        let loop_shutdown = shutdown.clone();
        let loop_stats = stats.clone();
        let handle = tokio::spawn(async move {
            receive_loop(socket, tx, loop_shutdown, loop_stats, gc_window).await;
        });

        Ok((
            Self {
                port,
                shutdown,
                handle,
                stats,
            },
            rx,
        ))
    }

    /// The bound local port, for the `beam_accept` reply.
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn stats(&self) -> Arc<ReceiverStats> {
        self.stats.clone()
    }

    /// Signal the loop and wait for it to exit.
    pub async fn stop(self) {
        self.shutdown.notify_one();
        let _ = self.handle.await;
    }
}

async fn receive_loop(
    socket: UdpSocket,
    tx: mpsc::Sender<AssembledNal>,
    shutdown: Arc<Notify>,
    stats: Arc<ReceiverStats>,
    gc_window: u32,
) {
    let mut reassembler = Reassembler::with_gc_window(gc_window);
    let mut buf = vec![0u8; MAX_DATAGRAM + 64];
    debug!(port = socket.local_addr().map(|a| a.port()).unwrap_or(0), "UDP receive loop started");

    loop {
        tokio::select! {
            _ = shutdown.notified() => break,
            result = socket.recv_from(&mut buf) => {
                let (len, _src) = match result {
                    Ok(r) => r,
                    Err(e) => {
                        warn!("UDP recv error: {e}");
                        continue;
                    }
                };
                stats.datagrams_received.fetch_add(1, Ordering::Relaxed);
                if let Some(nal) = reassembler.ingest(&buf[..len]) {
                    stats.nals_emitted.fetch_add(1, Ordering::Relaxed);
                    if tx.send(nal).await.is_err() {
                        trace!("NAL consumer gone, stopping receive loop");
                        break;
                    }
                }
            }
        }
    }
    debug!("UDP receive loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    async fn loopback_pair() -> (MediaSender, MediaReceiver, mpsc::Receiver<AssembledNal>) {
        let (receiver, rx) = MediaReceiver::bind().unwrap();
        let peer = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), receiver.port());
        let sender = MediaSender::connect(peer).await.unwrap();
        (sender, receiver, rx)
    }

    #[tokio::test]
    async fn single_packet_nal_roundtrip() {
        let (mut sender, receiver, mut rx) = loopback_pair().await;

        let nal = vec![0x65u8; 100];
        sender.send_nal(&nal, true, 42);

        let assembled = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out")
            .expect("channel closed");
        assert_eq!(assembled.data, nal);
        assert!(assembled.is_keyframe);
        assert_eq!(assembled.timestamp, 42);

        receiver.stop().await;
    }

    #[tokio::test]
    async fn fragmented_nal_roundtrip() {
        let (mut sender, receiver, mut rx) = loopback_pair().await;

        let nal: Vec<u8> = (0..10_000).map(|i| (i % 256) as u8).collect();
        sender.send_nal(&nal, false, 90_000);

        let assembled = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out")
            .expect("channel closed");
        assert_eq!(assembled.data, nal);
        assert!(!assembled.is_keyframe);
        assert_eq!(sender.stats().nals_sent.load(Ordering::Relaxed), 1);
        assert!(sender.stats().datagrams_sent.load(Ordering::Relaxed) >= 8);

        receiver.stop().await;
    }

    #[tokio::test]
    async fn stop_immediately_after_bind() {
        let (receiver, _rx) = MediaReceiver::bind().unwrap();
        receiver.stop().await;
    }

    #[tokio::test]
    async fn many_nals_arrive() {
        let (mut sender, receiver, mut rx) = loopback_pair().await;

        for i in 0..20u32 {
            sender.send_nal(&[i as u8; 64], i % 5 == 0, i * 3000);
        }

        let mut got = 0;
        while got < 20 {
            match tokio::time::timeout(Duration::from_secs(2), rx.recv()).await {
                Ok(Some(_)) => got += 1,
                _ => break,
            }
        }
        // Loop-back delivery is reliable in practice.
        assert_eq!(got, 20);

        receiver.stop().await;
    }
}

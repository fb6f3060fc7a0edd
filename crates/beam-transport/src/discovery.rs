use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use beam_protocol::types::Peer;
use beam_protocol::PROTOCOL_VERSION;

use crate::error::TransportError;

/// DNS-SD service type for beam peers.
pub const SERVICE_TYPE: &str = "_beam._tcp.local.";

/// Identity advertised in the TXT record.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Stable UUID string, persisted across runs.
    pub device_id: String,
    /// Human label shown in peer pickers.
    pub device_name: String,
    /// Platform tag, e.g. "mac" or "android".
    pub platform: String,
}

#[derive(Debug)]
pub enum DiscoveryEvent {
    /// The observed peer set changed. Sorted by name; never contains self.
    PeersChanged(Vec<Peer>),
    /// A peer dialed our advertised control port. The session layer wraps
    /// this in a pending control channel.
    IncomingConnection(TcpStream),
}

/// Book of currently-observed peers, keyed by deviceID.
///
/// Two advertisements with the same deviceID are the same peer; later ones
/// only overwrite name and endpoint. Advertisements without a deviceID, and
/// our own, are ignored.
struct PeerBook {
    own_device_id: String,
    peers: HashMap<String, Peer>,
    fullname_to_id: HashMap<String, String>,
}

impl PeerBook {
    fn new(own_device_id: String) -> Self {
        Self {
            own_device_id,
            peers: HashMap::new(),
            fullname_to_id: HashMap::new(),
        }
    }

    /// Returns true if the published list changed.
    fn upsert(&mut self, fullname: &str, peer: Peer) -> bool {
        if peer.id.is_empty() || peer.id == self.own_device_id {
            return false;
        }
        self.fullname_to_id
            .insert(fullname.to_owned(), peer.id.clone());
        match self.peers.insert(peer.id.clone(), peer.clone()) {
            Some(previous) => previous != peer,
            None => true,
        }
    }

    /// Returns true if the published list changed.
    fn remove(&mut self, fullname: &str) -> bool {
        match self.fullname_to_id.remove(fullname) {
            Some(id) => self.peers.remove(&id).is_some(),
            None => false,
        }
    }

    /// The published list, sorted by name for stability.
    fn sorted(&self) -> Vec<Peer> {
        let mut peers: Vec<Peer> = self.peers.values().cloned().collect();
        peers.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        peers
    }
}

/// Advertises this device as a `_beam._tcp.` service and browses for others.
///
/// Browsing acts only on resolved results (the TXT record is required to
/// identify a peer); unknown TXT keys are ignored. Inbound TCP connections
/// to the advertised port are handed to the session layer untouched.
pub struct Discovery {
    daemon: ServiceDaemon,
    fullname: String,
    port: u16,
    shutdown: watch::Sender<bool>,
    browse_handle: JoinHandle<()>,
    accept_handle: JoinHandle<()>,
}

impl Discovery {
    pub async fn start(
        config: DiscoveryConfig,
    ) -> Result<(Self, mpsc::Receiver<DiscoveryEvent>), TransportError> {
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        let port = listener.local_addr()?.port();

        let daemon = ServiceDaemon::new()?;

        let raw_host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "beam-device".to_owned());
        let host_label = format!("{raw_host}.local.");
        let host_ip = detect_local_ip();

        let mut properties = HashMap::new();
        properties.insert("version".to_owned(), PROTOCOL_VERSION.to_string());
        properties.insert("platform".to_owned(), config.platform.clone());
        properties.insert("deviceID".to_owned(), config.device_id.clone());
        properties.insert("name".to_owned(), config.device_name.clone());

        let service = ServiceInfo::new(
            SERVICE_TYPE,
            &config.device_name,
            &host_label,
            host_ip,
            port,
            Some(properties),
        )?;
        let fullname = service.get_fullname().to_owned();
        daemon.register(service)?;
        info!(name = %config.device_name, %host_ip, port, "advertising beam service");

        let (event_tx, event_rx) = mpsc::channel(32);
        let (shutdown, shutdown_rx) = watch::channel(false);

        let browser = daemon.browse(SERVICE_TYPE)?;
        let mut book = PeerBook::new(config.device_id.clone());
        let browse_tx = event_tx.clone();
        let mut browse_shutdown = shutdown_rx.clone();
        let browse_handle = tokio::spawn(async move {
            loop {
                if *browse_shutdown.borrow() {
                    break;
                }
                let event = tokio::select! {
                    changed = browse_shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        continue;
                    }
                    result = browser.recv_async() => match result {
                        Ok(event) => event,
                        Err(_) => break,
                    },
                };
                let changed = match event {
                    ServiceEvent::ServiceResolved(resolved) => {
                        match peer_from_service(&resolved) {
                            Some(peer) => {
                                debug!(id = %peer.id, name = %peer.name, "peer resolved");
                                book.upsert(resolved.get_fullname(), peer)
                            }
                            None => false,
                        }
                    }
                    ServiceEvent::ServiceRemoved(_, fullname) => {
                        debug!(%fullname, "peer gone");
                        book.remove(&fullname)
                    }
                    _ => false,
                };
                if changed {
                    if browse_tx
                        .send(DiscoveryEvent::PeersChanged(book.sorted()))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            }
        });

        let mut accept_shutdown = shutdown_rx;
        let accept_handle = tokio::spawn(async move {
            loop {
                if *accept_shutdown.borrow() {
                    break;
                }
                tokio::select! {
                    changed = accept_shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        continue;
                    }
                    result = listener.accept() => {
                        let (stream, peer_addr) = match result {
                            Ok(pair) => pair,
                            Err(e) => {
                                warn!("discovery accept error: {e}");
                                continue;
                            }
                        };
                        info!(peer = %peer_addr, "inbound control connection");
                        if event_tx
                            .send(DiscoveryEvent::IncomingConnection(stream))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                }
            }
        });

        Ok((
            Self {
                daemon,
                fullname,
                port,
                shutdown,
                browse_handle,
                accept_handle,
            },
            event_rx,
        ))
    }

    /// The advertised control-channel port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Withdraw the advertisement and stop browsing and accepting.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.daemon.unregister(&self.fullname) {
            warn!("failed to unregister mDNS service: {e}");
        }
        let _ = self.daemon.shutdown();
        let _ = self.browse_handle.await;
        let _ = self.accept_handle.await;
    }
}

/// Build a [`Peer`] from a resolved advertisement, or None when it has no
/// usable deviceID or address. Unknown TXT keys are ignored; a version other
/// than ours is kept but logged (new fields are added, never repurposed).
fn peer_from_service(info: &ServiceInfo) -> Option<Peer> {
    let device_id = info.get_property_val_str("deviceID")?.to_owned();
    if device_id.is_empty() {
        return None;
    }
    let version = info.get_property_val_str("version").unwrap_or("");
    if version != PROTOCOL_VERSION.to_string() {
        warn!(%device_id, version, "peer advertises a different protocol version");
    }
    let name = info
        .get_property_val_str("name")
        .unwrap_or(info.get_fullname())
        .to_owned();
    let platform = info
        .get_property_val_str("platform")
        .unwrap_or("unknown")
        .to_owned();
    let ip = *info.get_addresses().iter().next()?;
    Some(Peer {
        id: device_id,
        name,
        platform,
        endpoint: SocketAddr::new(ip.into(), info.get_port()),
    })
}

/// Detect the primary LAN address by probing the OS routing table; no
/// packets are sent.
pub fn detect_local_ip() -> IpAddr {
    std::net::UdpSocket::bind("0.0.0.0:0")
        .and_then(|s| {
            s.connect("8.8.8.8:80")?;
            s.local_addr()
        })
        .map(|a| a.ip())
        .unwrap_or_else(|_| IpAddr::V4(Ipv4Addr::LOCALHOST))
}

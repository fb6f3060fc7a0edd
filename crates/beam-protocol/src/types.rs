use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

/// A device observed via discovery.
///
/// Identity is the `id` (a stable UUID string from the TXT record); two
/// advertisements with the same id are the same peer, and later observations
/// only overwrite `name` and `endpoint`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub id: String,
    pub name: String,
    pub platform: String,
    /// Control-channel endpoint (the advertised TCP port).
    pub endpoint: SocketAddr,
}

/// An axis-aligned rectangle in screen points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }
}

/// Opaque reference to a capturable window, produced by the window picker.
///
/// The platform layer resolves this to a capture source and to an
/// accessibility-editable position; the core only carries it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowRef {
    pub pid: i32,
    pub window_id: u32,
    /// On-screen frame at pick time.
    pub frame: Rect,
}

/// Which end of the beam this session is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    Sender,
    Receiver,
}

/// Session lifecycle. Transitions are monotonic; once `Stopped` the session
/// is dead and `stop()` is a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Active,
    Stopping,
    Stopped,
}

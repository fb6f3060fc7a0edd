use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use beam_protocol::types::WindowRef;

use crate::error::VideoError;

/// One raw captured frame, tightly packed BGRA.
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
    /// Capture time in seconds on the source's clock.
    pub pts_seconds: f64,
}

/// What a running capture delivers to its sink.
pub enum CaptureEvent {
    Frame(RawFrame),
    /// The capture failed (the target window disappeared, permission was
    /// revoked). The session stops on this.
    Error(String),
}

/// A capturable window, as shown by the picker.
#[derive(Debug, Clone)]
pub struct WindowInfo {
    pub window: WindowRef,
    pub title: String,
    pub app_name: String,
    pub bundle_id: String,
}

/// The platform capture seam: delivers raw frames for one chosen window at
/// the configured rate.
///
/// `list_windows` returning an empty list with no titled windows available
/// is how a missing screen-capture permission surfaces; the picker shows a
/// one-shot error. A capture error after `start` ends the session.
pub trait FrameSource: Send {
    fn list_windows(&self) -> Result<Vec<WindowInfo>, VideoError>;

    /// Begin delivering frames for `window` to `sink` at up to `fps`.
    fn start(
        &mut self,
        window: WindowRef,
        fps: u32,
        sink: Box<dyn FnMut(CaptureEvent) + Send>,
    ) -> Result<(), VideoError>;

    fn stop(&mut self);
}

/// Enforces the minimum frame interval (`1/targetFps`) on a capture stream
/// that may deliver faster than requested.
pub struct FramePacer {
    min_interval: Duration,
    last_admitted: Option<Instant>,
}

impl FramePacer {
    pub fn new(fps: u32) -> Self {
        Self {
            min_interval: Duration::from_secs(1) / fps.max(1),
            last_admitted: None,
        }
    }

    /// Whether a frame arriving at `now` should be encoded.
    pub fn admit(&mut self, now: Instant) -> bool {
        match self.last_admitted {
            Some(last) if now.duration_since(last) < self.min_interval => false,
            _ => {
                self.last_admitted = Some(now);
                true
            }
        }
    }
}

/// Deterministic frame source for loop-back runs and tests: produces solid
/// frames with a moving gradient at the requested rate until stopped.
pub struct SyntheticSource {
    width: u32,
    height: u32,
    running: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }
}

impl FrameSource for SyntheticSource {
    fn list_windows(&self) -> Result<Vec<WindowInfo>, VideoError> {
        Ok(vec![WindowInfo {
            window: WindowRef {
                pid: 0,
                window_id: 1,
                frame: beam_protocol::Rect::new(0.0, 0.0, self.width as f64, self.height as f64),
            },
            title: "Synthetic".into(),
            app_name: "beam".into(),
            bundle_id: "dev.beam.synthetic".into(),
        }])
    }

    fn start(
        &mut self,
        _window: WindowRef,
        fps: u32,
        mut sink: Box<dyn FnMut(CaptureEvent) + Send>,
    ) -> Result<(), VideoError> {
        let running = self.running.clone();
        running.store(true, Ordering::SeqCst);
        let (width, height) = (self.width, self.height);
        let interval = Duration::from_secs(1) / fps.max(1);

        let thread = std::thread::Builder::new()
            .name("beam-synthetic-capture".into())
            .spawn(move || {
                let started = Instant::now();
                let mut index = 0u32;
                while running.load(Ordering::SeqCst) {
                    let shade = (index % 255) as u8;
                    let mut data = vec![0u8; (width * height * 4) as usize];
                    for pixel in data.chunks_exact_mut(4) {
                        pixel[0] = shade; // B
                        pixel[1] = 128; // G
                        pixel[2] = 255 - shade; // R
                        pixel[3] = 255; // A
                    }
                    sink(CaptureEvent::Frame(RawFrame {
                        width,
                        height,
                        data,
                        pts_seconds: started.elapsed().as_secs_f64(),
                    }));
                    index += 1;
                    std::thread::sleep(interval);
                }
            })
            .map_err(|e| VideoError::Capture(format!("capture thread: {e}")))?;
        self.thread = Some(thread);
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for SyntheticSource {
    fn drop(&mut self) {
        self.stop();
    }
}

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{debug, warn};

use crate::decoder::DecodedFrame;

/// The display-layer seam. Implemented by the platform shell; all calls
/// arrive on the renderer's dedicated surface thread.
pub trait VideoSurface: Send {
    /// Hand one frame with timing info to the display layer.
    fn enqueue(&mut self, frame: DecodedFrame);

    /// Discard pending frames. Must be called before the surface is torn
    /// down, or pending frames can crash the compositor.
    fn flush(&mut self);

    /// Whether the layer has entered a failed state and needs a flush.
    fn is_failed(&self) -> bool;
}

enum RenderCommand {
    Enqueue(DecodedFrame),
    Flush,
}

/// Hands decoded frames to a [`VideoSurface`] on its own thread.
///
/// `enqueue` may be called from any thread and never blocks the decoder's
/// completion callback. A surface that reports failure is flushed and the
/// next enqueue proceeds. Dropping the renderer flushes the surface before
/// the thread exits.
pub struct Renderer {
    tx: Option<mpsc::Sender<RenderCommand>>,
    thread: Option<JoinHandle<()>>,
    frames_enqueued: Arc<AtomicU64>,
}

impl Renderer {
    pub fn new(mut surface: Box<dyn VideoSurface>) -> Self {
        let (tx, rx) = mpsc::channel::<RenderCommand>();
        let frames_enqueued = Arc::new(AtomicU64::new(0));
        let counter = frames_enqueued.clone();

        let thread = std::thread::Builder::new()
            .name("beam-renderer".into())
            .spawn(move || {
                while let Ok(command) = rx.recv() {
                    match command {
                        RenderCommand::Enqueue(frame) => {
                            if surface.is_failed() {
                                debug!("surface failed, flushing before enqueue");
                                surface.flush();
                            }
                            surface.enqueue(frame);
                            counter.fetch_add(1, Ordering::Relaxed);
                        }
                        RenderCommand::Flush => surface.flush(),
                    }
                }
                // Channel closed: final flush before the surface drops.
                surface.flush();
            })
            .expect("failed to spawn renderer thread");

        Self {
            tx: Some(tx),
            thread: Some(thread),
            frames_enqueued,
        }
    }

    /// Post one frame to the surface thread. Never blocks.
    pub fn enqueue(&self, frame: DecodedFrame) {
        if let Some(tx) = &self.tx {
            if tx.send(RenderCommand::Enqueue(frame)).is_err() {
                warn!("renderer thread gone, dropping frame");
            }
        }
    }

    /// Ask the surface to discard pending frames.
    pub fn flush(&self) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(RenderCommand::Flush);
        }
    }

    /// Frames handed to the surface so far.
    pub fn frames_enqueued(&self) -> u64 {
        self.frames_enqueued.load(Ordering::Relaxed)
    }

    /// Shared counter behind [`Renderer::frames_enqueued`], for stats
    /// snapshots that outlive the renderer.
    pub fn frames_counter(&self) -> Arc<AtomicU64> {
        self.frames_enqueued.clone()
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        // Closing the channel makes the thread flush and exit; join so no
        // surface call can race the drop.
        self.tx.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

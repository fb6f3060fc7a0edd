use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::AudioError;
use crate::{AAC_FRAME_SIZE, SAMPLE_RATE};

/// The per-application audio seam.
///
/// The platform binding delivers interleaved f32 stereo PCM at 48 kHz from
/// the target application's output, in blocks of whatever size the OS hands
/// over. `mute_locally` asks for an OS-level process mute tap; the caller
/// gates it through [`crate::MuteBlacklist::should_mute`] first.
pub trait AudioTap: Send {
    fn start(
        &mut self,
        pid: i32,
        mute_locally: bool,
        sink: Box<dyn FnMut(&[f32]) + Send>,
    ) -> Result<(), AudioError>;

    fn stop(&mut self);
}

/// Deterministic tap for loop-back runs and tests: a 440 Hz stereo tone in
/// encoder-window-sized blocks at roughly real-time pacing.
pub struct TestToneTap {
    running: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl TestToneTap {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }
}

impl Default for TestToneTap {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioTap for TestToneTap {
    fn start(
        &mut self,
        _pid: i32,
        _mute_locally: bool,
        mut sink: Box<dyn FnMut(&[f32]) + Send>,
    ) -> Result<(), AudioError> {
        let running = self.running.clone();
        running.store(true, Ordering::SeqCst);

        let thread = std::thread::Builder::new()
            .name("beam-test-tone".into())
            .spawn(move || {
                let block_duration =
                    Duration::from_secs_f64(AAC_FRAME_SIZE as f64 / SAMPLE_RATE as f64);
                let mut phase = 0.0f32;
                let step = 440.0 * std::f32::consts::TAU / SAMPLE_RATE as f32;
                let mut block = vec![0.0f32; AAC_FRAME_SIZE * 2];
                while running.load(Ordering::SeqCst) {
                    for frame in block.chunks_exact_mut(2) {
                        let sample = phase.sin() * 0.2;
                        frame[0] = sample;
                        frame[1] = sample;
                        phase = (phase + step) % std::f32::consts::TAU;
                    }
                    sink(&block);
                    std::thread::sleep(block_duration);
                }
            })
            .map_err(|e| AudioError::Capture(format!("tone thread: {e}")))?;
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

impl Drop for TestToneTap {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tone_tap_delivers_stereo_blocks() {
        let mut tap = TestToneTap::new();
        let (tx, rx) = std::sync::mpsc::channel();
        tap.start(
            0,
            false,
            Box::new(move |pcm| {
                let _ = tx.send(pcm.len());
            }),
        )
        .unwrap();

        let len = rx
            .recv_timeout(Duration::from_secs(2))
            .expect("no audio block delivered");
        assert_eq!(len, AAC_FRAME_SIZE * 2);
        tap.stop();
    }

    #[test]
    fn stop_is_idempotent() {
        let mut tap = TestToneTap::new();
        tap.start(0, false, Box::new(|_| {})).unwrap();
        tap.stop();
        tap.stop();
    }
}

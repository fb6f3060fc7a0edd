use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use tracing::{error, info, warn};

use crate::error::AudioError;
use crate::SAMPLE_RATE;

/// Where decoded PCM goes. The production implementation is
/// [`AudioPlayback`]; tests substitute a counting sink.
pub trait AudioSink: Send + Sync {
    /// Schedule one interleaved buffer in arrival order.
    fn enqueue(&self, pcm: &[f32], channels: usize);

    /// Buffers scheduled so far.
    fn packets_scheduled(&self) -> u64;

    /// Stop the playback engine. Called during session teardown before the
    /// sink is dropped; after it returns no further samples are consumed
    /// and late `enqueue` calls are dropped. Idempotent.
    fn stop(&self);
}

/// Split an interleaved buffer into per-channel planes, as the playback
/// engine requires.
pub fn deinterleave(pcm: &[f32], channels: usize) -> Vec<Vec<f32>> {
    if channels == 0 {
        return Vec::new();
    }
    let frames = pcm.len() / channels;
    let mut planes = vec![Vec::with_capacity(frames); channels];
    for frame in pcm.chunks_exact(channels) {
        for (plane, &sample) in planes.iter_mut().zip(frame) {
            plane.push(sample);
        }
    }
    planes
}

/// ~200 ms of queue per channel at 48 kHz.
const CHANNEL_BUFFER_SIZE: usize = SAMPLE_RATE as usize / 5;

/// Queued stereo playback engine on the default output device.
///
/// Incoming interleaved buffers are deinterleaved into one ring per channel
/// and drained by the device callback in arrival order. There is no jitter
/// buffer beyond the rings themselves. An underrun fades the tail out over a
/// few samples to avoid a click, then plays silence.
pub struct AudioPlayback {
    stream: cpal::Stream,
    producers: Mutex<Vec<HeapProd<f32>>>,
    packets_scheduled: AtomicU64,
    frames_played: Arc<AtomicU64>,
    stopped: Arc<AtomicBool>,
}

// SAFETY: AudioPlayback only holds the cpal::Stream handle to keep it alive.
// We never call methods on it from multiple threads. The cpal Stream's
// !Send/!Sync markers are overly conservative for hold-only use.
unsafe impl Send for AudioPlayback {}
unsafe impl Sync for AudioPlayback {}

impl AudioPlayback {
    /// Open the default output device for stereo playback.
    pub fn new() -> Result<Self, AudioError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| AudioError::Playback("no output device".into()))?;
        let config = device
            .default_output_config()
            .map_err(|e| AudioError::Playback(format!("default config: {e}")))?;
        let device_channels = config.channels() as usize;

        if config.sample_format() != SampleFormat::F32 {
            return Err(AudioError::Playback(format!(
                "unsupported output sample format: {:?}",
                config.sample_format()
            )));
        }

        // Prefer 48 kHz to match the decoder; fall back to the device default.
        let stream_config = StreamConfig {
            channels: config.channels(),
            sample_rate: cpal::SampleRate(SAMPLE_RATE),
            buffer_size: cpal::BufferSize::Default,
        };
        if config.sample_rate().0 != SAMPLE_RATE {
            warn!(
                "output device default is {} Hz, requesting {} Hz",
                config.sample_rate().0,
                SAMPLE_RATE
            );
        }

        // One ring per source channel (stereo), drained non-interleaved.
        let mut producers = Vec::with_capacity(2);
        let mut consumers: Vec<HeapCons<f32>> = Vec::with_capacity(2);
        for _ in 0..2 {
            let (producer, consumer) = HeapRb::<f32>::new(CHANNEL_BUFFER_SIZE).split();
            producers.push(producer);
            consumers.push(consumer);
        }

        let frames_played = Arc::new(AtomicU64::new(0));
        let callback_frames = frames_played.clone();
        let stopped = Arc::new(AtomicBool::new(false));
        let callback_stopped = stopped.clone();
        let mut fade: [f32; 2] = [0.0, 0.0];

        let stream = device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    if callback_stopped.load(Ordering::SeqCst) {
                        data.fill(0.0);
                        return;
                    }
                    let mut frames = 0u64;
                    for frame in data.chunks_mut(device_channels) {
                        let left = consumers[0].try_pop();
                        let right = consumers[1].try_pop();
                        let (l, r) = match (left, right) {
                            (Some(l), Some(r)) => {
                                fade = [l, r];
                                frames += 1;
                                (l, r)
                            }
                            _ => {
                                // Underrun: decay the last samples to zero.
                                fade = [fade[0] * 0.9, fade[1] * 0.9];
                                (fade[0], fade[1])
                            }
                        };
                        for (i, out) in frame.iter_mut().enumerate() {
                            *out = match i {
                                0 => l,
                                1 => r,
                                _ => 0.0,
                            };
                        }
                        if device_channels == 1 {
                            frame[0] = (l + r) * 0.5;
                        }
                    }
                    callback_frames.fetch_add(frames, Ordering::Relaxed);
                },
                move |err| {
                    error!("audio playback error: {err}");
                },
                None,
            )
            .map_err(|e| AudioError::Playback(format!("build stream: {e}")))?;

        stream
            .play()
            .map_err(|e| AudioError::Playback(format!("play: {e}")))?;

        info!(channels = device_channels, "audio playback started");

        Ok(Self {
            stream,
            producers: Mutex::new(producers),
            packets_scheduled: AtomicU64::new(0),
            frames_played,
            stopped,
        })
    }

    /// PCM frames the device has actually consumed.
    pub fn frames_played(&self) -> u64 {
        self.frames_played.load(Ordering::Relaxed)
    }
}

impl AudioSink for AudioPlayback {
    fn enqueue(&self, pcm: &[f32], channels: usize) {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }
        let planes = deinterleave(pcm, channels);
        if planes.is_empty() {
            return;
        }
        let mut producers = self.producers.lock().unwrap();
        for (ring, plane) in producers.iter_mut().zip(planes.iter()) {
            let pushed = ring.push_slice(plane);
            if pushed < plane.len() {
                warn!("playback queue full, dropped {} samples", plane.len() - pushed);
            }
        }
        // Mono sources play on both channels.
        if channels == 1 {
            if let Some(right) = producers.get_mut(1) {
                let _ = right.push_slice(&planes[0]);
            }
        }
        self.packets_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    fn packets_scheduled(&self) -> u64 {
        self.packets_scheduled.load(Ordering::Relaxed)
    }

    fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        // The flag silences any callback already in flight; pausing then
        // parks the engine before the sink is dropped.
        if let Err(e) = self.stream.pause() {
            warn!("audio engine pause failed: {e}");
        }
    }
}

/// Sink that only counts, for sessions running without an audio device.
#[derive(Default)]
pub struct NullAudioSink {
    packets: AtomicU64,
}

impl AudioSink for NullAudioSink {
    fn enqueue(&self, _pcm: &[f32], _channels: usize) {
        self.packets.fetch_add(1, Ordering::Relaxed);
    }

    fn packets_scheduled(&self) -> u64 {
        self.packets.load(Ordering::Relaxed)
    }

    fn stop(&self) {}
}

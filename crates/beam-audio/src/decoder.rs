use fdk_aac::dec as aac;
use tracing::trace;

use crate::error::AudioError;

/// One decoded PCM buffer, interleaved f32.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub pcm: Vec<f32>,
    pub channels: usize,
    pub sample_rate: u32,
}

impl DecodedAudio {
    /// PCM frames in this buffer (samples per channel).
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.pcm.len() / self.channels
        }
    }
}

/// AAC-LC decoder for ADTS packets as they arrive off the wire.
///
/// Empty input produces no output; malformed input is swallowed (the stream
/// recovers at the next intact packet).
pub struct AudioDecoder {
    decoder: aac::Decoder,
}

// SAFETY: the fdk-aac handle is a raw pointer, but the decoder is only ever
// used from the single audio receive task.
unsafe impl Send for AudioDecoder {}

impl AudioDecoder {
    pub fn new() -> Self {
        Self {
            decoder: aac::Decoder::new(aac::Transport::Adts),
        }
    }

    /// Decode one received packet into zero or more PCM buffers.
    pub fn decode(&mut self, data: &[u8]) -> Result<Vec<DecodedAudio>, AudioError> {
        if data.is_empty() {
            return Ok(Vec::new());
        }

        if let Err(e) = self.decoder.fill(data) {
            trace!("AAC fill rejected packet: {e:?}");
            return Ok(Vec::new());
        }

        let mut out = Vec::new();
        loop {
            let mut pcm = vec![0i16; 2048 * 8];
            match self.decoder.decode_frame(&mut pcm) {
                Ok(()) => {
                    let info = self.decoder.stream_info();
                    let channels = info.numChannels.max(0) as usize;
                    let sample_rate = info.sampleRate.max(0) as u32;
                    let samples = self.decoder.decoded_frame_size();
                    if channels == 0 || samples == 0 || samples > pcm.len() {
                        break;
                    }
                    pcm.truncate(samples);
                    out.push(DecodedAudio {
                        pcm: pcm
                            .iter()
                            .map(|&s| s as f32 / i16::MAX as f32)
                            .collect(),
                        channels,
                        sample_rate,
                    });
                }
                Err(e) => {
                    // Out of bits, or garbage input: either way, no frame.
                    trace!("AAC decode_frame stopped: {e:?}");
                    break;
                }
            }
        }
        Ok(out)
    }
}

impl Default for AudioDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::AudioEncoder;
    use crate::{AAC_FRAME_SIZE, SAMPLE_RATE};

    fn sine_window(channels: usize) -> Vec<f32> {
        (0..AAC_FRAME_SIZE * channels)
            .map(|i| {
                let frame = (i / channels) as f32;
                (frame / AAC_FRAME_SIZE as f32 * 10.0 * std::f32::consts::TAU).sin() * 0.5
            })
            .collect()
    }

    /// Three 1024-frame windows in, decoded buffers of 1024 frames out, at
    /// the original rate and channel count.
    #[test]
    fn codec_roundtrip_preserves_shape() {
        let mut encoder = AudioEncoder::stereo().unwrap();
        let mut decoder = AudioDecoder::new();

        let mut decoded = Vec::new();
        for _ in 0..3 {
            for packet in encoder.encode(&sine_window(2)).unwrap() {
                decoded.extend(decoder.decode(&packet.data).unwrap());
            }
        }
        assert!(!decoded.is_empty(), "nothing decoded from three windows");
        for buffer in &decoded {
            assert_eq!(buffer.frames(), AAC_FRAME_SIZE);
            assert_eq!(buffer.channels, 2);
            assert_eq!(buffer.sample_rate, SAMPLE_RATE);
        }
    }

    #[test]
    fn empty_input_produces_no_output() {
        let mut decoder = AudioDecoder::new();
        assert!(decoder.decode(&[]).unwrap().is_empty());
    }

    #[test]
    fn random_bytes_do_not_panic() {
        let mut decoder = AudioDecoder::new();
        let result = decoder.decode(&[0xDE, 0xAD, 0xBE, 0xEF]);
        assert!(result.unwrap().is_empty());
    }

    #[test]
    fn decoder_recovers_after_garbage() {
        let mut encoder = AudioEncoder::stereo().unwrap();
        let mut decoder = AudioDecoder::new();

        let _ = decoder.decode(&[1, 2, 3, 4]);

        let mut decoded = Vec::new();
        for _ in 0..4 {
            for packet in encoder.encode(&sine_window(2)).unwrap() {
                decoded.extend(decoder.decode(&packet.data).unwrap());
            }
        }
        assert!(!decoded.is_empty(), "decoder did not recover after garbage");
    }

    #[test]
    fn mono_roundtrip() {
        let mut encoder = AudioEncoder::mono().unwrap();
        let mut decoder = AudioDecoder::new();

        let mut decoded = Vec::new();
        for _ in 0..4 {
            for packet in encoder.encode(&sine_window(1)).unwrap() {
                decoded.extend(decoder.decode(&packet.data).unwrap());
            }
        }
        assert!(!decoded.is_empty());
        for buffer in &decoded {
            assert_eq!(buffer.channels, 1);
            assert_eq!(buffer.frames(), AAC_FRAME_SIZE);
        }
    }
}

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};

use ffmpeg_next as ffmpeg;
use ffmpeg::codec::{self, encoder};
use ffmpeg::format::Pixel;
use ffmpeg::util::frame::video::Video;
use ffmpeg::{Dictionary, Rational};
use tracing::info;

use crate::error::VideoError;
use crate::nal::{is_keyframe_nal, nal_unit_type, split_annex_b, NAL_IDR, NAL_PPS, NAL_SPS};
use crate::RTP_CLOCK;

static FFMPEG_INIT: Once = Once::new();

pub(crate) fn init_ffmpeg() {
    FFMPEG_INIT.call_once(|| {
        ffmpeg::init().expect("failed to initialize FFmpeg");
    });
}

/// Hardware encoders tried before falling back to libx264 software encoding.
const HW_ENCODERS: &[(&str, &str)] = &[
    ("h264_nvenc", "NVIDIA NVENC"),
    ("h264_qsv", "Intel Quick Sync"),
    ("h264_amf", "AMD AMF"),
];

/// One encoded NAL unit, ready for fragmentation.
#[derive(Debug, Clone)]
pub struct EncodedNal {
    pub data: Vec<u8>,
    /// True for SPS, PPS, and IDR slices.
    pub is_keyframe: bool,
    /// Presentation time on the 90 kHz clock, truncated to 32 bits.
    pub rtp_timestamp: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct VideoEncoderConfig {
    pub width: u32,
    pub height: u32,
    /// Average bitrate in bits per second.
    pub bitrate: u32,
    pub fps: u32,
    /// Maximum frames between forced IDRs.
    pub keyframe_interval: u32,
}

impl Default for VideoEncoderConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            bitrate: 8_000_000,
            fps: 30,
            keyframe_interval: 60,
        }
    }
}

/// Cross-thread handle that makes the next encoded frame an IDR.
#[derive(Clone)]
pub struct KeyframeForcer(Arc<AtomicBool>);

impl KeyframeForcer {
    pub fn force(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Real-time H.264 encoder: Main profile, no frame reordering, zero delay.
///
/// Hardware encoders are tried first; libx264 with zerolatency tuning is the
/// fallback. Output is delivered as individual NAL units; every IDR is
/// preceded by the current SPS and PPS at the same timestamp so a receiver
/// can join or recover mid-stream.
pub struct VideoEncoder {
    encoder: encoder::Video,
    config: VideoEncoderConfig,
    frame_index: i64,
    force_keyframe: Arc<AtomicBool>,
    sps: Option<Vec<u8>>,
    pps: Option<Vec<u8>>,
}

// SAFETY: the FFmpeg encoder context holds raw pointers but is only ever
// used from the single encode thread.
unsafe impl Send for VideoEncoder {}

impl VideoEncoder {
    /// Create the compression context. Failure here is fatal for the session.
    pub fn new(config: VideoEncoderConfig) -> Result<Self, VideoError> {
        if config.width % 2 != 0 || config.height % 2 != 0 {
            return Err(VideoError::EncoderInit(
                "width and height must be divisible by 2".into(),
            ));
        }
        init_ffmpeg();

        for &(name, label) in HW_ENCODERS {
            if let Some(codec) = encoder::find_by_name(name) {
                match Self::try_open(codec, name, &config) {
                    Ok(encoder) => {
                        info!("H.264 encoder: using {label} hardware encoder ({name})");
                        return Ok(Self::wrap(encoder, config));
                    }
                    Err(e) => {
                        info!("H.264 encoder: {name} not usable: {e}");
                    }
                }
            }
        }

        let codec = encoder::find_by_name("libx264").ok_or_else(|| {
            VideoError::EncoderInit("libx264 not found (is FFmpeg built with x264?)".into())
        })?;
        let encoder = Self::try_open(codec, "libx264", &config)?;
        info!("H.264 encoder: using libx264 software encoder");
        Ok(Self::wrap(encoder, config))
    }

    fn wrap(encoder: encoder::Video, config: VideoEncoderConfig) -> Self {
        Self {
            encoder,
            config,
            frame_index: 0,
            force_keyframe: Arc::new(AtomicBool::new(false)),
            sps: None,
            pps: None,
        }
    }

    fn try_open(
        codec: ffmpeg::Codec,
        name: &str,
        config: &VideoEncoderConfig,
    ) -> Result<encoder::Video, VideoError> {
        let mut encoder = codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()
            .map_err(|e| VideoError::EncoderInit(format!("{name}: context: {e}")))?;

        encoder.set_width(config.width);
        encoder.set_height(config.height);
        encoder.set_format(Pixel::YUV420P);
        encoder.set_time_base(Rational::new(1, config.fps as i32));
        encoder.set_frame_rate(Some(Rational::new(config.fps as i32, 1)));
        encoder.set_bit_rate(config.bitrate as usize);
        encoder.set_max_b_frames(0);
        encoder.set_gop(config.keyframe_interval);

        let mut opts = Dictionary::new();
        opts.set("profile", "main");
        match name {
            "h264_nvenc" => {
                opts.set("preset", "p1");
                opts.set("tune", "ull");
                opts.set("rc", "cbr");
                opts.set("delay", "0");
                opts.set("zerolatency", "1");
            }
            "h264_qsv" => {
                opts.set("preset", "veryfast");
                opts.set("async_depth", "1");
                opts.set("low_power", "1");
            }
            "h264_amf" => {
                opts.set("usage", "ultralowlatency");
                opts.set("quality", "speed");
                opts.set("rc", "cbr");
            }
            "libx264" => {
                opts.set("preset", "ultrafast");
                opts.set("tune", "zerolatency");
                let x264_params = [
                    format!("keyint={}", config.keyframe_interval),
                    format!("min-keyint={}", config.keyframe_interval),
                    "scenecut=0".to_owned(),
                    "repeat-headers=1".to_owned(),
                ]
                .join(":");
                opts.set("x264-params", &x264_params);
            }
            _ => {}
        }

        encoder
            .open_with(opts)
            .map_err(|e| VideoError::EncoderInit(format!("{name}: open: {e}")))
    }

    /// Handle for requesting an IDR from another thread (the control plane).
    pub fn keyframe_forcer(&self) -> KeyframeForcer {
        KeyframeForcer(self.force_keyframe.clone())
    }

    /// Make the next encoded frame an IDR.
    pub fn force_keyframe(&self) {
        self.force_keyframe.store(true, Ordering::SeqCst);
    }

    /// Encode one YUV420P frame (from [`crate::FrameConverter`]).
    ///
    /// Returns zero or more NAL units in delivery order; parameter sets come
    /// before the IDR they belong to, at the IDR's timestamp.
    pub fn encode(&mut self, frame: &mut Video) -> Result<Vec<EncodedNal>, VideoError> {
        let pts = self.frame_index;
        frame.set_pts(Some(pts));

        if self.force_keyframe.swap(false, Ordering::SeqCst) {
            frame.set_kind(ffmpeg::picture::Type::I);
        } else {
            frame.set_kind(ffmpeg::picture::Type::None);
        }

        self.encoder
            .send_frame(frame)
            .map_err(|e| VideoError::Encode(format!("send_frame: {e}")))?;
        self.frame_index += 1;

        let mut nals = Vec::new();
        let mut packet = ffmpeg::Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {
            let data = packet.data().unwrap_or(&[]);
            let packet_pts = packet.pts().unwrap_or(pts);
            let rtp_timestamp =
                (packet_pts.wrapping_mul(RTP_CLOCK as i64) / self.config.fps as i64) as u32;
            self.collect_packet_nals(data, rtp_timestamp, &mut nals);
        }
        Ok(nals)
    }

    /// Split one encoder packet into NALs, caching parameter sets and
    /// replaying them ahead of an IDR the packet did not carry them with.
    fn collect_packet_nals(&mut self, data: &[u8], rtp_timestamp: u32, out: &mut Vec<EncodedNal>) {
        let units = split_annex_b(data);
        let has_sps = units
            .iter()
            .any(|n| nal_unit_type(n) == Some(NAL_SPS));
        let has_idr = units
            .iter()
            .any(|n| nal_unit_type(n) == Some(NAL_IDR));

        if has_idr && !has_sps {
            if let (Some(sps), Some(pps)) = (&self.sps, &self.pps) {
                out.push(EncodedNal {
                    data: sps.clone(),
                    is_keyframe: true,
                    rtp_timestamp,
                });
                out.push(EncodedNal {
                    data: pps.clone(),
                    is_keyframe: true,
                    rtp_timestamp,
                });
            }
        }

        for unit in units {
            let Some(nal_type) = nal_unit_type(unit) else {
                continue;
            };
            match nal_type {
                NAL_SPS => self.sps = Some(unit.to_vec()),
                NAL_PPS => self.pps = Some(unit.to_vec()),
                _ => {}
            }
            out.push(EncodedNal {
                data: unit.to_vec(),
                is_keyframe: is_keyframe_nal(nal_type),
                rtp_timestamp,
            });
        }
    }

    pub fn width(&self) -> u32 {
        self.config.width
    }

    pub fn height(&self) -> u32 {
        self.config.height
    }
}

impl Drop for VideoEncoder {
    fn drop(&mut self) {
        let _ = self.encoder.send_eof();
        let mut packet = ffmpeg::Packet::empty();
        while self.encoder.receive_packet(&mut packet).is_ok() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nal;

    fn gray_frame(width: u32, height: u32) -> Video {
        let mut frame = Video::new(Pixel::YUV420P, width, height);
        for plane in 0..3 {
            let fill = 128u8;
            for byte in frame.data_mut(plane) {
                *byte = fill;
            }
        }
        frame
    }

    fn encode_frames(encoder: &mut VideoEncoder, n: usize) -> Vec<EncodedNal> {
        let mut out = Vec::new();
        for _ in 0..n {
            let mut frame = gray_frame(encoder.width(), encoder.height());
            out.extend(encoder.encode(&mut frame).unwrap());
        }
        out
    }

    fn small_config() -> VideoEncoderConfig {
        VideoEncoderConfig {
            width: 64,
            height: 64,
            bitrate: 500_000,
            fps: 30,
            keyframe_interval: 60,
        }
    }

    #[test]
    fn encoder_odd_dimensions_fails() {
        let config = VideoEncoderConfig {
            width: 641,
            ..small_config()
        };
        assert!(VideoEncoder::new(config).is_err());
    }

    #[test]
    fn first_output_starts_with_parameter_sets() {
        let mut encoder = VideoEncoder::new(small_config()).unwrap();
        let nals = encode_frames(&mut encoder, 5);
        assert!(!nals.is_empty(), "5 frames should flush at least one packet");

        let types: Vec<u8> = nals
            .iter()
            .map(|n| nal::nal_unit_type(&n.data).unwrap())
            .collect();
        let sps_pos = types.iter().position(|&t| t == nal::NAL_SPS).unwrap();
        let pps_pos = types.iter().position(|&t| t == nal::NAL_PPS).unwrap();
        let idr_pos = types.iter().position(|&t| t == nal::NAL_IDR).unwrap();
        assert!(sps_pos < idr_pos, "SPS must precede the IDR");
        assert!(pps_pos < idr_pos, "PPS must precede the IDR");

        let idr = &nals[idr_pos];
        assert!(idr.is_keyframe);
        assert_eq!(nals[sps_pos].rtp_timestamp, idr.rtp_timestamp);
    }

    #[test]
    fn force_keyframe_produces_new_idr() {
        let mut encoder = VideoEncoder::new(small_config()).unwrap();
        // Flush the opening IDR.
        let _ = encode_frames(&mut encoder, 10);

        encoder.keyframe_forcer().force();
        let nals = encode_frames(&mut encoder, 5);
        assert!(
            nals.iter()
                .any(|n| nal::nal_unit_type(&n.data) == Some(nal::NAL_IDR)),
            "forced keyframe did not appear"
        );
    }

    #[test]
    fn rtp_timestamps_advance_at_90khz() {
        let mut encoder = VideoEncoder::new(small_config()).unwrap();
        let nals = encode_frames(&mut encoder, 10);
        let mut stamps: Vec<u32> = nals.iter().map(|n| n.rtp_timestamp).collect();
        stamps.dedup();
        assert!(stamps.len() >= 2, "expected several distinct timestamps");
        for pair in stamps.windows(2) {
            let delta = pair[1].wrapping_sub(pair[0]);
            assert_eq!(delta % (RTP_CLOCK / 30), 0, "non-integral frame step {delta}");
        }
    }
}

use ffmpeg_next as ffmpeg;
use ffmpeg::codec::{self, decoder};
use ffmpeg::format::Pixel;
use ffmpeg::util::frame::video::Video;
use tracing::{debug, trace, warn};

use crate::encoder::init_ffmpeg;
use crate::error::VideoError;
use crate::nal::{avcc_extradata, avcc_wrap, nal_unit_type, NAL_IDR, NAL_NON_IDR, NAL_PPS, NAL_SPS};
use crate::RTP_CLOCK;

/// A decoded frame in I420 layout with its presentation time.
#[derive(Clone)]
pub struct DecodedFrame {
    pub width: u32,
    pub height: u32,
    /// Y + U + V planes, `width*height*3/2` bytes.
    pub i420: Vec<u8>,
    /// Presentation time in seconds (90 kHz timestamp / 90000).
    pub pts_seconds: f64,
}

impl std::fmt::Debug for DecodedFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodedFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("pts_seconds", &self.pts_seconds)
            .finish()
    }
}

/// H.264 decoder consuming NAL units in arrival order.
///
/// SPS and PPS are cached; when both are present and differ from the pair
/// the active context was built from, the context is rebuilt around fresh
/// `avcC` extradata and the old one released. Slices are wrapped in AVCC
/// form (4-byte big-endian length) and submitted with their 90 kHz
/// timestamp; they are dropped while no context exists. NAL types other
/// than SPS/PPS/IDR/non-IDR are dropped.
pub struct VideoDecoder {
    context: Option<decoder::Video>,
    sps: Option<Vec<u8>>,
    pps: Option<Vec<u8>>,
    /// The (SPS, PPS) pair the active context was built from.
    active_params: Option<(Vec<u8>, Vec<u8>)>,
    fps: u32,
}

// SAFETY: the FFmpeg decoder context holds raw pointers but is only ever
// used from the single decode thread.
unsafe impl Send for VideoDecoder {}

impl VideoDecoder {
    pub fn new(fps: u32) -> Self {
        init_ffmpeg();
        Self {
            context: None,
            sps: None,
            pps: None,
            active_params: None,
            fps: fps.max(1),
        }
    }

    /// Feed one NAL unit.
    ///
    /// Returns any frames that completed decoding. `Err` means the decoder
    /// rejected a slice (missing reference after loss); the caller drops the
    /// slice and requests a keyframe.
    pub fn submit(
        &mut self,
        nal: &[u8],
        rtp_timestamp: u32,
    ) -> Result<Vec<DecodedFrame>, VideoError> {
        let Some(nal_type) = nal_unit_type(nal) else {
            return Ok(Vec::new());
        };
        match nal_type {
            NAL_SPS => {
                self.sps = Some(nal.to_vec());
                self.rebuild_if_needed()?;
                Ok(Vec::new())
            }
            NAL_PPS => {
                self.pps = Some(nal.to_vec());
                self.rebuild_if_needed()?;
                Ok(Vec::new())
            }
            NAL_IDR | NAL_NON_IDR => self.decode_slice(nal, rtp_timestamp),
            other => {
                trace!(nal_type = other, "dropping unrecognized NAL type");
                Ok(Vec::new())
            }
        }
    }

    /// Whether a decompression context currently exists.
    pub fn has_context(&self) -> bool {
        self.context.is_some()
    }

    /// Drain frames still buffered in the decoder. Call during teardown
    /// before dropping the owning object.
    pub fn flush(&mut self) -> Vec<DecodedFrame> {
        let Some(context) = self.context.as_mut() else {
            return Vec::new();
        };
        let _ = context.send_eof();
        let mut frames = Vec::new();
        let mut decoded = Video::empty();
        while context.receive_frame(&mut decoded).is_ok() {
            if let Some(frame) = extract_frame(&decoded) {
                frames.push(frame);
            }
        }
        self.context = None;
        self.active_params = None;
        frames
    }

    /// Rebuild the decompression context when the cached parameter sets
    /// differ from the pair the active context was built from.
    fn rebuild_if_needed(&mut self) -> Result<(), VideoError> {
        let (Some(sps), Some(pps)) = (&self.sps, &self.pps) else {
            return Ok(());
        };
        if self
            .active_params
            .as_ref()
            .is_some_and(|(active_sps, active_pps)| active_sps == sps && active_pps == pps)
        {
            return Ok(());
        }

        debug!("building decoder context from new parameter sets");
        // Release the previous context before building its replacement.
        self.context = None;

        let codec = decoder::find(codec::Id::H264)
            .ok_or_else(|| VideoError::DecoderInit("H.264 codec not found".into()))?;
        let mut context = codec::context::Context::new_with_codec(codec);

        let extradata = avcc_extradata(sps, pps);
        // SAFETY: the safe wrapper exposes no extradata setter. The buffer is
        // av_mallocz-allocated with the required input padding and ownership
        // passes to the codec context, which frees it on close.
        unsafe {
            let raw = context.as_mut_ptr();
            let size = extradata.len();
            let buf = ffmpeg::ffi::av_mallocz(size + ffmpeg::ffi::AV_INPUT_BUFFER_PADDING_SIZE as usize)
                as *mut u8;
            if buf.is_null() {
                return Err(VideoError::DecoderInit("extradata allocation failed".into()));
            }
            std::ptr::copy_nonoverlapping(extradata.as_ptr(), buf, size);
            (*raw).extradata = buf;
            (*raw).extradata_size = size as i32;
        }

        let opened = context
            .decoder()
            .open_as(codec)
            .map_err(|e| VideoError::DecoderInit(format!("open: {e}")))?
            .video()
            .map_err(|e| VideoError::DecoderInit(format!("video: {e}")))?;

        self.context = Some(opened);
        self.active_params = Some((sps.clone(), pps.clone()));
        Ok(())
    }

    fn decode_slice(
        &mut self,
        nal: &[u8],
        rtp_timestamp: u32,
    ) -> Result<Vec<DecodedFrame>, VideoError> {
        let Some(context) = self.context.as_mut() else {
            trace!("dropping slice, no decoder context yet");
            return Ok(Vec::new());
        };

        let avcc = avcc_wrap(nal);
        let mut packet = ffmpeg::Packet::copy(&avcc);
        packet.set_pts(Some(rtp_timestamp as i64));
        packet.set_duration((RTP_CLOCK / self.fps) as i64);

        context
            .send_packet(&packet)
            .map_err(|e| VideoError::Decode(format!("send_packet: {e}")))?;

        let mut frames = Vec::new();
        let mut decoded = Video::empty();
        while context.receive_frame(&mut decoded).is_ok() {
            if let Some(frame) = extract_frame(&decoded) {
                frames.push(frame);
            }
        }
        Ok(frames)
    }
}

fn extract_frame(decoded: &Video) -> Option<DecodedFrame> {
    let width = decoded.width();
    let height = decoded.height();
    if width == 0 || height == 0 {
        return None;
    }
    let i420 = if decoded.format() == Pixel::YUV420P {
        extract_i420(decoded)
    } else {
        match convert_to_i420(decoded) {
            Ok(data) => data,
            Err(e) => {
                warn!("decoded frame conversion failed: {e}");
                return None;
            }
        }
    };
    let pts_seconds = decoded.pts().unwrap_or(0) as f64 / RTP_CLOCK as f64;
    Some(DecodedFrame {
        width,
        height,
        i420,
        pts_seconds,
    })
}

/// Copy Y, U, V planes out of a YUV420P frame, stripping stride padding.
fn extract_i420(frame: &Video) -> Vec<u8> {
    let width = frame.width() as usize;
    let height = frame.height() as usize;
    let uv_width = width.div_ceil(2);
    let uv_height = height.div_ceil(2);

    let mut out = Vec::with_capacity(width * height + 2 * uv_width * uv_height);
    for (plane, rows, cols) in [
        (0, height, width),
        (1, uv_height, uv_width),
        (2, uv_height, uv_width),
    ] {
        let stride = frame.stride(plane);
        let data = frame.data(plane);
        for row in 0..rows {
            let start = row * stride;
            out.extend_from_slice(&data[start..start + cols]);
        }
    }
    out
}

fn convert_to_i420(frame: &Video) -> Result<Vec<u8>, VideoError> {
    let mut scaler = ffmpeg::software::scaling::Context::get(
        frame.format(),
        frame.width(),
        frame.height(),
        Pixel::YUV420P,
        frame.width(),
        frame.height(),
        ffmpeg::software::scaling::Flags::BILINEAR,
    )?;
    let mut converted = Video::empty();
    scaler.run(frame, &mut converted)?;
    Ok(extract_i420(&converted))
}

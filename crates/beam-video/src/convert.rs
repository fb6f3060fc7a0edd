use ffmpeg_next as ffmpeg;
use ffmpeg::software::scaling;
use ffmpeg::util::frame::video::Video;
pub use ffmpeg::format::Pixel;

use crate::error::VideoError;

/// BGRA → YUV420P converter using FFmpeg's SwsContext.
///
/// Uses FFmpeg's SIMD conversion path, which is an order of magnitude faster
/// than per-pixel scalar code, and scales in the same pass when the encoder
/// resolution differs from the capture resolution.
pub struct FrameConverter {
    scaler: scaling::Context,
    input_frame: Video,
    output_frame: Video,
    src_width: u32,
    src_height: u32,
}

// SAFETY: FrameConverter is used from a single thread (the encode thread).
// The FFmpeg SwsContext and frames are not Send by default due to raw pointers.
unsafe impl Send for FrameConverter {}

impl FrameConverter {
    /// `input_format` is the capture pixel layout, normally `Pixel::BGRA`.
    pub fn new(
        input_format: Pixel,
        src_width: u32,
        src_height: u32,
        dst_width: u32,
        dst_height: u32,
    ) -> Result<Self, VideoError> {
        let scaler = scaling::Context::get(
            input_format,
            src_width,
            src_height,
            Pixel::YUV420P,
            dst_width,
            dst_height,
            scaling::Flags::FAST_BILINEAR,
        )
        .map_err(|e| VideoError::EncoderInit(format!("SwsContext: {e}")))?;

        let input_frame = Video::new(input_format, src_width, src_height);
        let output_frame = Video::new(Pixel::YUV420P, dst_width, dst_height);

        Ok(Self {
            scaler,
            input_frame,
            output_frame,
            src_width,
            src_height,
        })
    }

    /// Convert one tightly-packed pixel buffer (4 bytes per pixel, no stride
    /// padding) into the internal YUV420P frame and return it, ready to pass
    /// to [`crate::VideoEncoder::encode`].
    pub fn convert(&mut self, pixel_data: &[u8]) -> Result<&mut Video, VideoError> {
        let expected = self.src_width as usize * self.src_height as usize * 4;
        if pixel_data.len() < expected {
            return Err(VideoError::Encode(format!(
                "pixel buffer too short: got {}, expected {}",
                pixel_data.len(),
                expected
            )));
        }

        let width = self.src_width as usize;
        let stride = self.input_frame.stride(0);
        let row_bytes = width * 4;
        let dst = self.input_frame.data_mut(0);
        for row in 0..self.src_height as usize {
            let src_off = row * row_bytes;
            let dst_off = row * stride;
            dst[dst_off..dst_off + row_bytes]
                .copy_from_slice(&pixel_data[src_off..src_off + row_bytes]);
        }

        self.scaler
            .run(&self.input_frame, &mut self.output_frame)
            .map_err(|e| VideoError::Encode(format!("pixel conversion: {e}")))?;
        Ok(&mut self.output_frame)
    }
}

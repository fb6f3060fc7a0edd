pub mod capture;
pub mod convert;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod nal;
pub mod renderer;

pub use capture::{CaptureEvent, FramePacer, FrameSource, RawFrame, SyntheticSource, WindowInfo};
pub use convert::FrameConverter;
pub use decoder::{DecodedFrame, VideoDecoder};
pub use encoder::{EncodedNal, KeyframeForcer, VideoEncoder, VideoEncoderConfig};
pub use error::VideoError;
pub use renderer::{Renderer, VideoSurface};

/// The RTP media clock all video timestamps run on.
pub const RTP_CLOCK: u32 = 90_000;

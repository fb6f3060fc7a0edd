//! End-to-end loop-back run: a sender with a synthetic window and test tone
//! beams to a receiver in the same process over 127.0.0.1, prints pipeline
//! stats for a few seconds, then tears down.
//!
//! ```sh
//! cargo run -p beam-session --example loopback
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use beam_audio::{NullAudioSink, TestToneTap};
use beam_input::{AccessibilityApi, EventPoster, InputError, MouseEventKind};
use beam_protocol::input::{Modifiers, MouseButton};
use beam_protocol::types::{Rect, SessionState, WindowRef};
use beam_session::{BeamConfig, BeamTarget, CursorApi, ReceiverPlatform, SenderPlatform, Session};
use beam_video::{DecodedFrame, SyntheticSource, VideoSurface};
use beam_window::{AxWindowHandle, DisplayHandle, VirtualDisplayApi, WindowControl, WindowError};

struct PrintingSurface {
    frames: u64,
}

impl VideoSurface for PrintingSurface {
    fn enqueue(&mut self, frame: DecodedFrame) {
        self.frames += 1;
        if self.frames % 30 == 0 {
            println!(
                "rendered {} frames, latest {}x{} @ {:.2}s",
                self.frames, frame.width, frame.height, frame.pts_seconds
            );
        }
    }

    fn flush(&mut self) {}

    fn is_failed(&self) -> bool {
        false
    }
}

struct NoopAx;

impl AccessibilityApi for NoopAx {
    fn press_at(&self, _pid: i32, _point: (f64, f64)) -> Result<(), InputError> {
        Ok(())
    }
    fn scroll_bar_value(&self, _pid: i32) -> Option<f64> {
        None
    }
    fn set_scroll_bar_value(&self, _pid: i32, _value: f64) -> Result<(), InputError> {
        Ok(())
    }
}

struct NoopPoster;

impl EventPoster for NoopPoster {
    fn post_mouse(
        &self,
        _pid: i32,
        _kind: MouseEventKind,
        _point: (f64, f64),
        _button: MouseButton,
        _deltas: (f64, f64),
    ) -> Result<(), InputError> {
        Ok(())
    }
    fn post_key(
        &self,
        _pid: i32,
        key_code: u16,
        down: bool,
        _modifiers: Modifiers,
        _text: Option<&str>,
    ) -> Result<(), InputError> {
        println!("injected key {} ({})", key_code, if down { "down" } else { "up" });
        Ok(())
    }
    fn cursor_position(&self) -> (f64, f64) {
        (0.0, 0.0)
    }
    fn warp_cursor(&self, _point: (f64, f64)) {}
    fn activate_app(&self, _pid: i32) {}
}

struct VisibleCursor;

impl CursorApi for VisibleCursor {
    fn is_visible(&self) -> bool {
        true
    }
    fn show(&self) {}
}

struct NoDisplay;

impl VirtualDisplayApi for NoDisplay {
    fn create(&self, _width: u32, _height: u32) -> Result<DisplayHandle, WindowError> {
        Err(WindowError::NotSupported)
    }
    fn resize(&self, _handle: DisplayHandle, _height: u32) -> Result<(), WindowError> {
        Ok(())
    }
    fn destroy(&self, _handle: DisplayHandle) {}
    fn bounds(&self, _handle: DisplayHandle) -> Rect {
        Rect::new(0.0, 0.0, 0.0, 0.0)
    }
}

struct NoWindows;

impl WindowControl for NoWindows {
    fn locate_window(&self, pid: i32, _title: Option<&str>) -> Result<AxWindowHandle, WindowError> {
        Err(WindowError::WindowNotFound { pid })
    }
    fn position(&self, _window: AxWindowHandle) -> Result<(f64, f64), WindowError> {
        Err(WindowError::NotSupported)
    }
    fn size(&self, _window: AxWindowHandle) -> Result<(f64, f64), WindowError> {
        Err(WindowError::NotSupported)
    }
    fn set_position(&self, _window: AxWindowHandle, _point: (f64, f64)) -> Result<(), WindowError> {
        Ok(())
    }
    fn raise(&self, _window: AxWindowHandle) -> Result<(), WindowError> {
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let endpoint = listener.local_addr()?;
    println!("receiver control endpoint: {endpoint}");

    let target = BeamTarget {
        window: WindowRef {
            pid: std::process::id() as i32,
            window_id: 1,
            frame: Rect::new(0.0, 0.0, 320.0, 240.0),
        },
        title: "Synthetic".into(),
        bundle_id: "dev.beam.synthetic".into(),
        total_app_windows: 1,
    };

    let (sender, _sender_events) = Session::start_sender(
        BeamConfig::default(),
        "loopback sender".into(),
        endpoint,
        target,
        SenderPlatform {
            frame_source: Box::new(SyntheticSource::new(320, 240)),
            audio_tap: Some(Box::new(TestToneTap::new())),
            accessibility: Box::new(NoopAx),
            poster: Box::new(NoopPoster),
            cursor: Box::new(VisibleCursor),
            display_api: Box::new(NoDisplay),
            window_control: Box::new(NoWindows),
        },
    );

    let (connection, _) = listener.accept().await?;
    let audio_sink = Arc::new(NullAudioSink::default());
    let (receiver, _receiver_events) = Session::adopt_receiver(
        BeamConfig::default(),
        connection,
        ReceiverPlatform {
            surface: Box::new(PrintingSurface { frames: 0 }),
            audio_sink,
        },
    );

    for _ in 0..50 {
        if sender.state() == SessionState::Active && receiver.state() == SessionState::Active {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    println!(
        "sender: {:?}, receiver: {:?}",
        sender.state(),
        receiver.state()
    );

    // Exercise the input backchannel once.
    receiver.send_input(beam_protocol::InputEvent::KeyDown {
        key_code: 36,
        modifiers: Modifiers::none(),
        text: Some("\r".into()),
    });

    for second in 1..=5 {
        tokio::time::sleep(Duration::from_secs(1)).await;
        let stats = receiver.stats();
        let sent = sender.stats();
        println!(
            "t={second}s sent {} NALs / {} datagrams; rendered {} frames; scheduled {} audio packets",
            sent.nals_sent, sent.datagrams_sent, stats.frames_rendered, stats.audio_packets
        );
    }

    receiver.stop().await;
    sender.stop().await;
    println!("stopped cleanly");
    Ok(())
}

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use beam_audio::{AudioDecoder, AudioEncoder, AudioSink, AudioTap};
use beam_input::{AccessibilityApi, EventPoster, InputInjector};
use beam_protocol::control::ControlMessage;
use beam_protocol::input::InputEvent;
use beam_protocol::types::{SessionRole, SessionState, WindowRef};
use beam_transport::{
    ChannelEvent, ControlChannel, MediaReceiver, MediaSender, SenderStats,
};
use beam_video::{
    CaptureEvent, FrameConverter, FramePacer, FrameSource, Renderer, VideoDecoder, VideoEncoder,
    VideoEncoderConfig, VideoSurface,
};
use beam_window::{VirtualDisplayApi, WindowControl, WindowError, WindowHider};

use crate::config::BeamConfig;

/// Local cursor visibility, polled at 3 Hz on the sender. The hiding APIs
/// have no observer, so this is a pollable signal, not an event stream.
pub trait CursorApi: Send {
    fn is_visible(&self) -> bool;

    /// Reverse a global cursor-hide the target app performed, so the
    /// sender's real cursor stays visible.
    fn show(&self);
}

const CURSOR_POLL_INTERVAL: Duration = Duration::from_millis(333);

/// Everything the platform shell provides to run the sender side.
pub struct SenderPlatform {
    pub frame_source: Box<dyn FrameSource>,
    /// None when the window has no audio to carry.
    pub audio_tap: Option<Box<dyn AudioTap>>,
    pub accessibility: Box<dyn AccessibilityApi>,
    pub poster: Box<dyn EventPoster>,
    pub cursor: Box<dyn CursorApi>,
    pub display_api: Box<dyn VirtualDisplayApi>,
    pub window_control: Box<dyn WindowControl>,
}

/// Everything the platform shell provides to run the receiver side.
pub struct ReceiverPlatform {
    pub surface: Box<dyn VideoSurface>,
    pub audio_sink: Arc<dyn AudioSink>,
}

/// What the window picker selected for beaming.
#[derive(Debug, Clone)]
pub struct BeamTarget {
    pub window: WindowRef,
    pub title: String,
    pub bundle_id: String,
    /// Open windows of the same bundle, for the mute-blacklist rule.
    pub total_app_windows: usize,
}

#[derive(Debug)]
pub enum SessionEvent {
    StateChanged(SessionState),
    /// Receiver side: the sender's cursor visibility changed; the shell
    /// enters or leaves cursor-capture mode.
    CursorStateChanged { visible: bool },
    /// One-shot user-visible failure description.
    Error(String),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SessionStats {
    /// Decoded frames handed to the renderer (receiver side).
    pub frames_rendered: u64,
    /// AAC packets scheduled on the player (receiver side).
    pub audio_packets: u64,
    /// NAL units put on the wire (sender side).
    pub nals_sent: u64,
    /// Datagrams put on the wire (sender side).
    pub datagrams_sent: u64,
}

#[derive(Default)]
struct StatsHub {
    video_sender: Mutex<Option<Arc<SenderStats>>>,
    frames_rendered: Mutex<Option<Arc<AtomicU64>>>,
    audio_sink: Mutex<Option<Arc<dyn AudioSink>>>,
}

impl StatsHub {
    fn snapshot(&self) -> SessionStats {
        let mut stats = SessionStats::default();
        if let Some(sender) = self.video_sender.lock().unwrap().as_ref() {
            stats.nals_sent = sender.nals_sent.load(Ordering::Relaxed);
            stats.datagrams_sent = sender.datagrams_sent.load(Ordering::Relaxed);
        }
        if let Some(frames) = self.frames_rendered.lock().unwrap().as_ref() {
            stats.frames_rendered = frames.load(Ordering::Relaxed);
        }
        if let Some(sink) = self.audio_sink.lock().unwrap().as_ref() {
            stats.audio_packets = sink.packets_scheduled();
        }
        stats
    }
}

/// One beam, from one side.
///
/// The session is the root of the component graph: it owns the control
/// channel and the media pipeline, and routes control messages to the
/// components. All state transitions happen on the session's driver task;
/// leaf components only hold channels installed at wiring time. The
/// lifecycle is monotonic — once stopped, the session is dead and `stop()`
/// is a no-op.
pub struct Session {
    role: SessionRole,
    state: watch::Receiver<SessionState>,
    channel: Arc<ControlChannel>,
    stop_tx: watch::Sender<bool>,
    driver: Mutex<Option<JoinHandle<()>>>,
    stats: Arc<StatsHub>,
    error: Arc<Mutex<Option<String>>>,
}

impl Session {
    /// Sender path: dial the peer's control endpoint, offer the window, and
    /// on acceptance run the full capture → encode → send pipeline plus
    /// input injection and window hiding.
    pub fn start_sender(
        config: BeamConfig,
        sender_name: String,
        peer_endpoint: SocketAddr,
        target: BeamTarget,
        platform: SenderPlatform,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<SessionEvent>) {
        let (channel, channel_events) = ControlChannel::connect(peer_endpoint, config.heartbeat);
        let channel = Arc::new(channel);
        let (session, events_rx, shared) = Self::build(SessionRole::Sender, channel.clone());

        let driver = tokio::spawn(run_sender(SenderCtx {
            config,
            sender_name,
            target,
            platform,
            channel,
            channel_events,
            shared,
        }));
        *session.driver.lock().unwrap() = Some(driver);
        (session, events_rx)
    }

    /// Receiver path: adopt an inbound connection from discovery and wait
    /// for the offer; on offer, bind media ports, reply `beam_accept`, and
    /// run the receive → decode → render/play pipeline.
    pub fn adopt_receiver(
        config: BeamConfig,
        connection: tokio::net::TcpStream,
        platform: ReceiverPlatform,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<SessionEvent>) {
        let (channel, channel_events) = ControlChannel::adopt(connection, config.heartbeat);
        let channel = Arc::new(channel);
        let (session, events_rx, shared) = Self::build(SessionRole::Receiver, channel.clone());

        let driver = tokio::spawn(run_receiver(ReceiverCtx {
            config,
            platform,
            channel,
            channel_events,
            shared,
        }));
        *session.driver.lock().unwrap() = Some(driver);
        (session, events_rx)
    }

    fn build(
        role: SessionRole,
        channel: Arc<ControlChannel>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<SessionEvent>, Shared) {
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);
        let (stop_tx, stop_rx) = watch::channel(false);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let stats = Arc::new(StatsHub::default());
        let error = Arc::new(Mutex::new(None));

        let session = Arc::new(Self {
            role,
            state: state_rx,
            channel,
            stop_tx,
            driver: Mutex::new(None),
            stats: stats.clone(),
            error: error.clone(),
        });
        let shared = Shared {
            state: state_tx,
            stop: stop_rx,
            events: events_tx,
            stats,
            error,
        };
        (session, events_rx, shared)
    }

    pub fn role(&self) -> SessionRole {
        self.role
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn stats(&self) -> SessionStats {
        self.stats.snapshot()
    }

    /// The one-shot failure description, if the session died on an error.
    pub fn error(&self) -> Option<String> {
        self.error.lock().unwrap().clone()
    }

    /// Receiver side: forward one normalized input event to the sender.
    pub fn send_input(&self, event: InputEvent) {
        if self.role == SessionRole::Receiver && self.state() == SessionState::Active {
            self.channel.send(ControlMessage::Input { event });
        }
    }

    /// Tear the session down. Idempotent; returns once teardown finished.
    pub async fn stop(&self) {
        let _ = self.stop_tx.send(true);
        let handle = self.driver.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        } else {
            // Another caller is (or was) driving teardown; wait it out.
            let mut state = self.state.clone();
            while *state.borrow() != SessionState::Stopped {
                if state.changed().await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Driver-side handles shared by both roles.
struct Shared {
    state: watch::Sender<SessionState>,
    stop: watch::Receiver<bool>,
    events: mpsc::UnboundedSender<SessionEvent>,
    stats: Arc<StatsHub>,
    error: Arc<Mutex<Option<String>>>,
}

impl Shared {
    fn set_state(&self, state: SessionState) {
        if *self.state.borrow() != state {
            let _ = self.state.send(state);
            let _ = self.events.send(SessionEvent::StateChanged(state));
        }
    }

    fn fail(&self, message: impl Into<String>) {
        let message = message.into();
        warn!(%message, "session failed");
        let mut slot = self.error.lock().unwrap();
        if slot.is_none() {
            *slot = Some(message.clone());
            let _ = self.events.send(SessionEvent::Error(message));
        }
    }

}

// ── Sender ────────────────────────────────────────────────────────────────

struct SenderCtx {
    config: BeamConfig,
    sender_name: String,
    target: BeamTarget,
    platform: SenderPlatform,
    channel: Arc<ControlChannel>,
    channel_events: mpsc::Receiver<ChannelEvent>,
    shared: Shared,
}

async fn run_sender(mut ctx: SenderCtx) {
    ctx.shared.set_state(SessionState::Connecting);

    // Wait for the control channel, then offer.
    if !wait_connected(&mut ctx.channel_events, &ctx.shared).await {
        ctx.shared.fail("control channel failed to connect");
        finish(&ctx.shared, &ctx.channel).await;
        return;
    }

    let width = (ctx.target.window.frame.width as u32) & !1;
    let height = (ctx.target.window.frame.height as u32) & !1;
    let has_audio = ctx.platform.audio_tap.is_some();
    ctx.channel.send(ControlMessage::BeamOffer {
        sender_name: ctx.sender_name.clone(),
        window_title: ctx.target.title.clone(),
        width,
        height,
        has_audio,
        bundle_id: ctx.target.bundle_id.clone(),
    });

    let Some((video_port, audio_port)) = wait_accept(&mut ctx.channel_events, &ctx.shared).await
    else {
        ctx.shared.fail("beam was not accepted");
        finish(&ctx.shared, &ctx.channel).await;
        return;
    };

    let Some(host) = ctx.channel.remote_host() else {
        ctx.shared.fail("peer address unknown");
        finish(&ctx.shared, &ctx.channel).await;
        return;
    };
    info!(%host, video_port, audio_port, "beam accepted, building sender pipeline");

    // Media senders.
    let mut video_sender = match MediaSender::connect(SocketAddr::new(host, video_port)).await {
        Ok(sender) => sender,
        Err(e) => {
            ctx.shared.fail(format!("video socket: {e}"));
            finish(&ctx.shared, &ctx.channel).await;
            return;
        }
    };
    *ctx.shared.stats.video_sender.lock().unwrap() = Some(video_sender.stats());
    let mut audio_sender = match MediaSender::connect(SocketAddr::new(host, audio_port)).await {
        Ok(sender) => sender,
        Err(e) => {
            ctx.shared.fail(format!("audio socket: {e}"));
            finish(&ctx.shared, &ctx.channel).await;
            return;
        }
    };

    // Encoder; creation failure is fatal for the session.
    let encoder = match VideoEncoder::new(VideoEncoderConfig {
        width,
        height,
        bitrate: ctx.config.video_bitrate,
        fps: ctx.config.target_fps,
        keyframe_interval: ctx.config.max_keyframe_interval,
    }) {
        Ok(encoder) => encoder,
        Err(e) => {
            ctx.shared.fail(format!("video encoder: {e}"));
            finish(&ctx.shared, &ctx.channel).await;
            return;
        }
    };
    let keyframe = encoder.keyframe_forcer();

    // Hide the window. "Not supported" means the beam runs unhidden.
    let mut hider = match WindowHider::new(ctx.platform.display_api, ctx.platform.window_control) {
        Ok(hider) => Some(hider),
        Err(WindowError::NotSupported) => {
            warn!("virtual display unavailable, beaming without hiding");
            None
        }
        Err(e) => {
            ctx.shared.fail(format!("virtual display: {e}"));
            finish(&ctx.shared, &ctx.channel).await;
            return;
        }
    };
    let mut injector_frame = ctx.target.window.frame;
    if let Some(hider) = hider.as_mut() {
        match hider.hide(ctx.target.window.pid, Some(&ctx.target.title)) {
            Ok(handle) => {
                if let Some(frame) = hider.frame(handle) {
                    injector_frame = frame;
                }
            }
            Err(e) => {
                ctx.shared.fail(format!("window hide: {e}"));
                finish(&ctx.shared, &ctx.channel).await;
                return;
            }
        }
    }
    let mut injector = InputInjector::new(
        ctx.platform.accessibility,
        ctx.platform.poster,
        ctx.target.window.pid,
        injector_frame,
    );

    // Capture → convert → encode → fragment/send, all on the capture thread.
    let (capture_error_tx, mut capture_error_rx) = mpsc::channel::<String>(1);
    {
        let mut pacer = FramePacer::new(ctx.config.target_fps);
        let mut converter: Option<FrameConverter> = None;
        let mut encoder = encoder;
        let sink = Box::new(move |event: CaptureEvent| match event {
            CaptureEvent::Frame(raw) => {
                if !pacer.admit(Instant::now()) {
                    return;
                }
                if converter.is_none() {
                    converter = FrameConverter::new(
                        beam_video::convert::Pixel::BGRA,
                        raw.width,
                        raw.height,
                        width,
                        height,
                    )
                    .map_err(|e| warn!("frame converter: {e}"))
                    .ok();
                }
                let Some(converter) = converter.as_mut() else {
                    return;
                };
                let frame = match converter.convert(&raw.data) {
                    Ok(frame) => frame,
                    Err(e) => {
                        debug!("dropping frame: {e}");
                        return;
                    }
                };
                match encoder.encode(frame) {
                    Ok(nals) => {
                        for nal in nals {
                            video_sender.send_nal(&nal.data, nal.is_keyframe, nal.rtp_timestamp);
                        }
                    }
                    Err(e) => debug!("dropping frame, encode failed: {e}"),
                }
            }
            CaptureEvent::Error(message) => {
                let _ = capture_error_tx.try_send(message);
            }
        });
        if let Err(e) = ctx
            .platform
            .frame_source
            .start(ctx.target.window, ctx.config.target_fps, sink)
        {
            ctx.shared.fail(format!("capture start: {e}"));
            if let Some(hider) = hider.as_mut() {
                hider.restore_all();
            }
            finish(&ctx.shared, &ctx.channel).await;
            return;
        }
    }

    // Audio capture → AAC → send, on the tap's thread.
    if let Some(tap) = ctx.platform.audio_tap.as_mut() {
        let mute = ctx.config.mute_blacklist.should_mute(
            &ctx.target.bundle_id,
            ctx.target.total_app_windows,
            1,
        );
        match AudioEncoder::new(true, ctx.config.audio_bitrate_stereo) {
            Ok(mut audio_encoder) => {
                let sink = Box::new(move |pcm: &[f32]| {
                    match audio_encoder.encode(pcm) {
                        Ok(packets) => {
                            for packet in packets {
                                audio_sender.send_nal(&packet.data, false, packet.timestamp);
                            }
                        }
                        Err(e) => debug!("audio encode failed: {e}"),
                    }
                });
                if let Err(e) = tap.start(ctx.target.window.pid, mute, sink) {
                    warn!("audio tap failed to start, beaming video only: {e}");
                }
            }
            Err(e) => warn!("audio encoder unavailable, beaming video only: {e}"),
        }
    }

    // Cursor visibility poll at 3 Hz.
    let cursor = ctx.platform.cursor;
    let cursor_channel = ctx.channel.clone();
    let mut cursor_stop = ctx.shared.stop.clone();
    let cursor_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(CURSOR_POLL_INTERVAL);
        let mut last_visible: Option<bool> = None;
        loop {
            if *cursor_stop.borrow() {
                break;
            }
            tokio::select! {
                _ = cursor_stop.changed() => break,
                _ = ticker.tick() => {
                    let visible = cursor.is_visible();
                    if !visible {
                        // Undo the app's global hide so the sender's own
                        // cursor stays usable.
                        cursor.show();
                    }
                    if last_visible != Some(visible) {
                        last_visible = Some(visible);
                        cursor_channel.send(ControlMessage::CursorState { visible });
                    }
                }
            }
        }
    });

    ctx.shared.set_state(SessionState::Active);

    // Control-plane loop.
    let mut stop = ctx.shared.stop.clone();
    loop {
        if *stop.borrow() {
            break;
        }
        tokio::select! {
            changed = stop.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            Some(message) = capture_error_rx.recv() => {
                ctx.shared.fail(format!("capture: {message}"));
                break;
            }
            event = ctx.channel_events.recv() => match event {
                Some(ChannelEvent::Message(ControlMessage::Input { event })) => {
                    injector.handle(event);
                }
                Some(ChannelEvent::Message(ControlMessage::KeyframeRequest)) => {
                    keyframe.force();
                }
                Some(ChannelEvent::Message(ControlMessage::BeamEnd))
                | Some(ChannelEvent::Disconnected)
                | None => break,
                Some(_) => {}
            }
        }
    }

    // Teardown. Channel callbacks are already quiet (the loop above is the
    // only consumer and it has exited); beam_end goes out before close.
    ctx.shared.set_state(SessionState::Stopping);
    drop(ctx.channel_events);
    ctx.channel.send(ControlMessage::BeamEnd);
    ctx.channel.close().await;

    let _ = cursor_task.await;
    ctx.platform.frame_source.stop();
    if let Some(tap) = ctx.platform.audio_tap.as_mut() {
        tap.stop();
    }
    drop(injector);
    if let Some(hider) = hider.as_mut() {
        hider.restore_all();
    }
    ctx.shared.set_state(SessionState::Stopped);
    info!("sender session stopped");
}

// ── Receiver ──────────────────────────────────────────────────────────────

struct ReceiverCtx {
    config: BeamConfig,
    platform: ReceiverPlatform,
    channel: Arc<ControlChannel>,
    channel_events: mpsc::Receiver<ChannelEvent>,
    shared: Shared,
}

async fn run_receiver(mut ctx: ReceiverCtx) {
    if !wait_connected(&mut ctx.channel_events, &ctx.shared).await {
        ctx.shared.fail("inbound connection dropped");
        finish(&ctx.shared, &ctx.channel).await;
        return;
    }

    // First message must be the offer.
    let mut stop = ctx.shared.stop.clone();
    let offer = loop {
        if *stop.borrow() {
            finish(&ctx.shared, &ctx.channel).await;
            return;
        }
        tokio::select! {
            changed = stop.changed() => {
                if changed.is_err() {
                    finish(&ctx.shared, &ctx.channel).await;
                    return;
                }
            }
            event = ctx.channel_events.recv() => match event {
                Some(ChannelEvent::Message(offer @ ControlMessage::BeamOffer { .. })) => {
                    break offer;
                }
                Some(ChannelEvent::Message(ControlMessage::BeamEnd))
                | Some(ChannelEvent::Disconnected)
                | None => {
                    ctx.shared.fail("peer ended before offering");
                    finish(&ctx.shared, &ctx.channel).await;
                    return;
                }
                Some(_) => {}
            }
        }
    };
    let ControlMessage::BeamOffer {
        sender_name,
        window_title,
        width,
        height,
        ..
    } = &offer
    else {
        unreachable!("loop breaks only on BeamOffer");
    };
    info!(%sender_name, %window_title, width, height, "beam offered");

    // Bind media receivers on system-chosen ports before accepting.
    let gc_window = ctx.config.reassembly_gc_window;
    let (video_receiver, mut video_rx) = match MediaReceiver::bind_port(0, gc_window) {
        Ok(pair) => pair,
        Err(e) => {
            ctx.shared.fail(format!("video receiver: {e}"));
            finish(&ctx.shared, &ctx.channel).await;
            return;
        }
    };
    let (audio_receiver, mut audio_rx) = match MediaReceiver::bind_port(0, gc_window) {
        Ok(pair) => pair,
        Err(e) => {
            ctx.shared.fail(format!("audio receiver: {e}"));
            video_receiver.stop().await;
            finish(&ctx.shared, &ctx.channel).await;
            return;
        }
    };

    let renderer = Renderer::new(ctx.platform.surface);
    *ctx.shared.stats.frames_rendered.lock().unwrap() = Some(renderer.frames_counter());
    *ctx.shared.stats.audio_sink.lock().unwrap() = Some(ctx.platform.audio_sink.clone());

    ctx.channel.send(ControlMessage::BeamAccept {
        video_port: video_receiver.port(),
        audio_port: audio_receiver.port(),
    });
    ctx.shared.set_state(SessionState::Active);

    // Video: reassembled NALs → decoder → renderer. Decode errors after
    // loss turn into keyframe requests.
    let video_channel = ctx.channel.clone();
    let fps = ctx.config.target_fps;
    let video_task = tokio::spawn(async move {
        let mut decoder = VideoDecoder::new(fps);
        while let Some(nal) = video_rx.recv().await {
            match decoder.submit(&nal.data, nal.timestamp) {
                Ok(frames) => {
                    for frame in frames {
                        renderer.enqueue(frame);
                    }
                }
                Err(e) => {
                    debug!("slice dropped, requesting keyframe: {e}");
                    video_channel.send(ControlMessage::KeyframeRequest);
                }
            }
        }
        // Drain in-flight decodes; the teardown path flushes the surface.
        for frame in decoder.flush() {
            renderer.enqueue(frame);
        }
        renderer
    });

    // Audio: packets → decoder → queued player, in arrival order.
    let audio_sink = ctx.platform.audio_sink.clone();
    let audio_task = tokio::spawn(async move {
        let mut decoder = AudioDecoder::new();
        while let Some(packet) = audio_rx.recv().await {
            match decoder.decode(&packet.data) {
                Ok(buffers) => {
                    for buffer in buffers {
                        audio_sink.enqueue(&buffer.pcm, buffer.channels);
                    }
                }
                Err(e) => debug!("audio packet dropped: {e}"),
            }
        }
    });

    // Control-plane loop.
    loop {
        if *stop.borrow() {
            break;
        }
        tokio::select! {
            changed = stop.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            event = ctx.channel_events.recv() => match event {
                Some(ChannelEvent::Message(ControlMessage::CursorState { visible })) => {
                    let _ = ctx
                        .shared
                        .events
                        .send(SessionEvent::CursorStateChanged { visible });
                }
                Some(ChannelEvent::Message(ControlMessage::BeamEnd))
                | Some(ChannelEvent::Disconnected)
                | None => break,
                Some(_) => {}
            }
        }
    }

    // Teardown, in dependency order: receive loops first (their channels
    // close), then the decode tasks drain, then the player engine stops
    // before the sink drops, then the renderer is flushed and dropped.
    ctx.shared.set_state(SessionState::Stopping);
    drop(ctx.channel_events);
    ctx.channel.send(ControlMessage::BeamEnd);
    ctx.channel.close().await;

    video_receiver.stop().await;
    audio_receiver.stop().await;
    let renderer = video_task.await.ok();
    let _ = audio_task.await;
    ctx.platform.audio_sink.stop();
    if let Some(renderer) = renderer {
        renderer.flush();
        drop(renderer);
    }
    ctx.shared.set_state(SessionState::Stopped);
    info!("receiver session stopped");
}

// ── Shared driver helpers ─────────────────────────────────────────────────

async fn wait_connected(events: &mut mpsc::Receiver<ChannelEvent>, shared: &Shared) -> bool {
    let mut stop = shared.stop.clone();
    loop {
        if *stop.borrow() {
            return false;
        }
        tokio::select! {
            changed = stop.changed() => {
                if changed.is_err() {
                    return false;
                }
            }
            event = events.recv() => match event {
                Some(ChannelEvent::Connected) => return true,
                Some(ChannelEvent::Disconnected) | None => return false,
                Some(_) => {}
            }
        }
    }
}

async fn wait_accept(
    events: &mut mpsc::Receiver<ChannelEvent>,
    shared: &Shared,
) -> Option<(u16, u16)> {
    let mut stop = shared.stop.clone();
    loop {
        if *stop.borrow() {
            return None;
        }
        tokio::select! {
            changed = stop.changed() => {
                if changed.is_err() {
                    return None;
                }
            }
            event = events.recv() => match event {
                Some(ChannelEvent::Message(ControlMessage::BeamAccept {
                    video_port,
                    audio_port,
                })) => return Some((video_port, audio_port)),
                Some(ChannelEvent::Message(ControlMessage::BeamEnd))
                | Some(ChannelEvent::Disconnected)
                | None => return None,
                Some(_) => {}
            }
        }
    }
}

/// Terminal transition for drivers that die before the pipeline exists.
async fn finish(shared: &Shared, channel: &ControlChannel) {
    shared.set_state(SessionState::Stopping);
    channel.send(ControlMessage::BeamEnd);
    channel.close().await;
    shared.set_state(SessionState::Stopped);
}

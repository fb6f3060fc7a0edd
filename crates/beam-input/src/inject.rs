use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use beam_protocol::input::{InputEvent, Modifiers, MouseButton};
use beam_protocol::types::Rect;

use crate::error::InputError;

/// Fallback scroll keys when the target window exposes no scroll bar.
pub const KEY_PAGE_DOWN: u16 = 121;
pub const KEY_PAGE_UP: u16 = 116;

/// A buffered down resolves as a click when the up lands within this radius
/// and delay; otherwise both are replayed as OS events.
const CLICK_MAX_DISTANCE: f64 = 10.0;
const CLICK_MAX_DELAY: Duration = Duration::from_millis(500);

/// Maximum element-tree depth searched for a scroll area.
pub const SCROLL_AREA_SEARCH_DEPTH: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseEventKind {
    Move,
    Down,
    Up,
    Drag,
}

/// Accessibility seam on the sender: cursor-free element actions inside the
/// hidden target window.
pub trait AccessibilityApi: Send {
    /// Press the element at `point` without moving the cursor.
    fn press_at(&self, pid: i32, point: (f64, f64)) -> Result<(), InputError>;

    /// Depth-first search (first scroll area wins, depth capped at
    /// [`SCROLL_AREA_SEARCH_DEPTH`]) for the window's vertical scroll bar;
    /// returns its current value in `0..=1` if one exists.
    fn scroll_bar_value(&self, pid: i32) -> Option<f64>;

    fn set_scroll_bar_value(&self, pid: i32, value: f64) -> Result<(), InputError>;
}

/// OS event seam on the sender: synthesized events posted directly to the
/// target process, never routed globally.
pub trait EventPoster: Send {
    fn post_mouse(
        &self,
        pid: i32,
        kind: MouseEventKind,
        point: (f64, f64),
        button: MouseButton,
        deltas: (f64, f64),
    ) -> Result<(), InputError>;

    fn post_key(
        &self,
        pid: i32,
        key_code: u16,
        down: bool,
        modifiers: Modifiers,
        text: Option<&str>,
    ) -> Result<(), InputError>;

    fn cursor_position(&self) -> (f64, f64);

    fn warp_cursor(&self, point: (f64, f64));

    /// Activate the target app once so posted pointer events count as input
    /// rather than as bring-to-front requests.
    fn activate_app(&self, pid: i32);
}

struct PendingDown {
    button: MouseButton,
    point: (f64, f64),
    at: Instant,
}

/// Pure click predicate: same button, short distance, short delay.
fn is_click(
    down_button: MouseButton,
    up_button: MouseButton,
    distance: f64,
    elapsed: Duration,
) -> bool {
    down_button == up_button && distance < CLICK_MAX_DISTANCE && elapsed < CLICK_MAX_DELAY
}

fn distance(a: (f64, f64), b: (f64, f64)) -> f64 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}

/// Delivers normalized input events into the hidden target window.
///
/// `mouseDown` is buffered and resolved on `mouseUp`: a quick, stationary
/// pair becomes an Accessibility press (no cursor movement); anything else
/// is replayed as OS events wrapped in a save/warp/restore of the local
/// cursor, because some apps ignore event coordinates. Scrolls prefer the
/// window's scroll bar via Accessibility with a Page-Up/Down fallback.
/// Unknown event types are dropped silently.
pub struct InputInjector {
    ax: Box<dyn AccessibilityApi>,
    poster: Box<dyn EventPoster>,
    pid: i32,
    frame: Rect,
    pending_down: Option<PendingDown>,
}

impl InputInjector {
    pub fn new(
        ax: Box<dyn AccessibilityApi>,
        poster: Box<dyn EventPoster>,
        pid: i32,
        frame: Rect,
    ) -> Self {
        poster.activate_app(pid);
        Self {
            ax,
            poster,
            pid,
            frame,
            pending_down: None,
        }
    }

    /// Update the hidden window's frame on the virtual display (after a
    /// stacking change).
    pub fn set_frame(&mut self, frame: Rect) {
        self.frame = frame;
    }

    /// `[0,1]²` → virtual-display points.
    fn denormalize(&self, x: f64, y: f64) -> (f64, f64) {
        (
            self.frame.x + x * self.frame.width,
            self.frame.y + y * self.frame.height,
        )
    }

    pub fn handle(&mut self, event: InputEvent) {
        match event {
            InputEvent::MouseMove {
                x,
                y,
                delta_x,
                delta_y,
            } => {
                let point = self.denormalize(x, y);
                if let Err(e) = self.poster.post_mouse(
                    self.pid,
                    MouseEventKind::Move,
                    point,
                    MouseButton::Left,
                    (delta_x, delta_y),
                ) {
                    trace!("mouse move post failed: {e}");
                }
            }

            InputEvent::MouseDown { x, y, button } => {
                self.pending_down = Some(PendingDown {
                    button,
                    point: self.denormalize(x, y),
                    at: Instant::now(),
                });
            }

            InputEvent::MouseDrag { x, y } => {
                let point = self.denormalize(x, y);
                if let Some(down) = self.pending_down.take() {
                    self.post_warped(MouseEventKind::Down, down.point, down.button);
                }
                self.post_warped(MouseEventKind::Drag, point, MouseButton::Left);
            }

            InputEvent::MouseUp { x, y, button } => {
                let up_point = self.denormalize(x, y);
                match self.pending_down.take() {
                    Some(down)
                        if is_click(
                            down.button,
                            button,
                            distance(down.point, up_point),
                            down.at.elapsed(),
                        ) =>
                    {
                        if let Err(e) = self.ax.press_at(self.pid, up_point) {
                            debug!("AX press failed, replaying as OS events: {e}");
                            self.post_warped(MouseEventKind::Down, down.point, down.button);
                            self.post_warped(MouseEventKind::Up, up_point, button);
                        }
                    }
                    Some(down) => {
                        self.post_warped(MouseEventKind::Down, down.point, down.button);
                        self.post_warped(MouseEventKind::Up, up_point, button);
                    }
                    None => {
                        self.post_warped(MouseEventKind::Up, up_point, button);
                    }
                }
            }

            InputEvent::Scroll { delta_y } => self.scroll(delta_y),

            InputEvent::KeyDown {
                key_code,
                modifiers,
                text,
            } => {
                if let Err(e) =
                    self.poster
                        .post_key(self.pid, key_code, true, modifiers, text.as_deref())
                {
                    warn!("key down post failed: {e}");
                }
            }

            InputEvent::KeyUp {
                key_code,
                modifiers,
            } => {
                if let Err(e) = self.poster.post_key(self.pid, key_code, false, modifiers, None) {
                    warn!("key up post failed: {e}");
                }
            }

            InputEvent::Unknown => {
                trace!("dropping unknown input event type");
            }
        }
    }

    /// Post one mouse event with the local cursor warped to the target point
    /// for its duration, then restored.
    fn post_warped(&self, kind: MouseEventKind, point: (f64, f64), button: MouseButton) {
        let saved = self.poster.cursor_position();
        self.poster.warp_cursor(point);
        if let Err(e) = self.poster.post_mouse(self.pid, kind, point, button, (0.0, 0.0)) {
            warn!("mouse post failed: {e}");
        }
        self.poster.warp_cursor(saved);
    }

    /// Preferred path: nudge the window's vertical scroll bar. Fallback:
    /// page keys, Page-Down for positive (content down) deltas.
    fn scroll(&mut self, delta_y: f64) {
        if let Some(value) = self.ax.scroll_bar_value(self.pid) {
            let target = (value + delta_y).clamp(0.0, 1.0);
            if let Err(e) = self.ax.set_scroll_bar_value(self.pid, target) {
                debug!("scroll bar update failed: {e}");
            }
            return;
        }

        let key = if delta_y > 0.0 { KEY_PAGE_DOWN } else { KEY_PAGE_UP };
        for down in [true, false] {
            if let Err(e) = self
                .poster
                .post_key(self.pid, key, down, Modifiers::none(), None)
            {
                warn!("page-scroll key post failed: {e}");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq)]
    enum Posted {
        Mouse {
            kind: MouseEventKind,
            point: (f64, f64),
            button: MouseButton,
            deltas: (f64, f64),
        },
        Key {
            key_code: u16,
            down: bool,
            command: bool,
            text: Option<String>,
        },
        Warp((f64, f64)),
        Activate(i32),
        AxPress((f64, f64)),
        AxScroll(f64),
    }

    #[derive(Default)]
    struct Shared {
        log: Mutex<Vec<Posted>>,
        ax_press_fails: bool,
        scroll_bar: Mutex<Option<f64>>,
    }

    struct MockAx(Arc<Shared>);

    impl AccessibilityApi for MockAx {
        fn press_at(&self, _pid: i32, point: (f64, f64)) -> Result<(), InputError> {
            if self.0.ax_press_fails {
                return Err(InputError::Accessibility("element lookup failed".into()));
            }
            self.0.log.lock().unwrap().push(Posted::AxPress(point));
            Ok(())
        }

        fn scroll_bar_value(&self, _pid: i32) -> Option<f64> {
            *self.0.scroll_bar.lock().unwrap()
        }

        fn set_scroll_bar_value(&self, _pid: i32, value: f64) -> Result<(), InputError> {
            *self.0.scroll_bar.lock().unwrap() = Some(value);
            self.0.log.lock().unwrap().push(Posted::AxScroll(value));
            Ok(())
        }
    }

    struct MockPoster(Arc<Shared>);

    impl EventPoster for MockPoster {
        fn post_mouse(
            &self,
            _pid: i32,
            kind: MouseEventKind,
            point: (f64, f64),
            button: MouseButton,
            deltas: (f64, f64),
        ) -> Result<(), InputError> {
            self.0.log.lock().unwrap().push(Posted::Mouse {
                kind,
                point,
                button,
                deltas,
            });
            Ok(())
        }

        fn post_key(
            &self,
            _pid: i32,
            key_code: u16,
            down: bool,
            modifiers: Modifiers,
            text: Option<&str>,
        ) -> Result<(), InputError> {
            self.0.log.lock().unwrap().push(Posted::Key {
                key_code,
                down,
                command: modifiers.command,
                text: text.map(str::to_owned),
            });
            Ok(())
        }

        fn cursor_position(&self) -> (f64, f64) {
            (7.0, 9.0)
        }

        fn warp_cursor(&self, point: (f64, f64)) {
            self.0.log.lock().unwrap().push(Posted::Warp(point));
        }

        fn activate_app(&self, pid: i32) {
            self.0.log.lock().unwrap().push(Posted::Activate(pid));
        }
    }

    fn injector(shared: &Arc<Shared>) -> InputInjector {
        InputInjector::new(
            Box::new(MockAx(shared.clone())),
            Box::new(MockPoster(shared.clone())),
            42,
            Rect::new(100.0, 200.0, 640.0, 480.0),
        )
    }

    fn log(shared: &Arc<Shared>) -> Vec<Posted> {
        shared.log.lock().unwrap().clone()
    }

    #[test]
    fn target_app_activated_once_at_setup() {
        let shared = Arc::new(Shared::default());
        let _injector = injector(&shared);
        assert_eq!(log(&shared), vec![Posted::Activate(42)]);
    }

    #[test]
    fn denormalization_against_window_frame() {
        let shared = Arc::new(Shared::default());
        let mut injector = injector(&shared);
        injector.handle(InputEvent::MouseMove {
            x: 0.5,
            y: 0.5,
            delta_x: 0.0,
            delta_y: 0.0,
        });
        assert!(log(&shared).contains(&Posted::Mouse {
            kind: MouseEventKind::Move,
            point: (420.0, 440.0),
            button: MouseButton::Left,
            deltas: (0.0, 0.0),
        }));
    }

    #[test]
    fn quick_stationary_click_goes_through_accessibility() {
        let shared = Arc::new(Shared::default());
        let mut injector = injector(&shared);

        injector.handle(InputEvent::MouseDown {
            x: 0.5,
            y: 0.5,
            button: MouseButton::Left,
        });
        // Down is buffered: nothing posted yet beyond activation.
        assert_eq!(log(&shared).len(), 1);

        injector.handle(InputEvent::MouseUp {
            x: 0.5,
            y: 0.5,
            button: MouseButton::Left,
        });
        let events = log(&shared);
        assert!(events.contains(&Posted::AxPress((420.0, 440.0))));
        assert!(
            !events.iter().any(|e| matches!(e, Posted::Mouse { .. })),
            "AX click must not post OS mouse events"
        );
        assert!(
            !events.iter().any(|e| matches!(e, Posted::Warp(_))),
            "AX click must not move the cursor"
        );
    }

    #[test]
    fn failed_ax_press_falls_back_to_warped_os_events() {
        let shared = Arc::new(Shared {
            ax_press_fails: true,
            ..Default::default()
        });
        let mut injector = injector(&shared);

        injector.handle(InputEvent::MouseDown {
            x: 0.0,
            y: 0.0,
            button: MouseButton::Left,
        });
        injector.handle(InputEvent::MouseUp {
            x: 0.0,
            y: 0.0,
            button: MouseButton::Left,
        });

        let events = log(&shared);
        let mouse_kinds: Vec<MouseEventKind> = events
            .iter()
            .filter_map(|e| match e {
                Posted::Mouse { kind, .. } => Some(*kind),
                _ => None,
            })
            .collect();
        assert_eq!(mouse_kinds, vec![MouseEventKind::Down, MouseEventKind::Up]);
        // Each posted event is wrapped warp-to-target / warp-back.
        let warps: Vec<(f64, f64)> = events
            .iter()
            .filter_map(|e| match e {
                Posted::Warp(p) => Some(*p),
                _ => None,
            })
            .collect();
        assert_eq!(warps, vec![(100.0, 200.0), (7.0, 9.0), (100.0, 200.0), (7.0, 9.0)]);
    }

    #[test]
    fn distant_up_is_not_a_click() {
        let shared = Arc::new(Shared::default());
        let mut injector = injector(&shared);

        injector.handle(InputEvent::MouseDown {
            x: 0.1,
            y: 0.1,
            button: MouseButton::Left,
        });
        injector.handle(InputEvent::MouseUp {
            x: 0.9,
            y: 0.9,
            button: MouseButton::Left,
        });

        let events = log(&shared);
        assert!(!events.iter().any(|e| matches!(e, Posted::AxPress(_))));
        assert!(events.iter().any(|e| matches!(
            e,
            Posted::Mouse { kind: MouseEventKind::Down, .. }
        )));
        assert!(events.iter().any(|e| matches!(
            e,
            Posted::Mouse { kind: MouseEventKind::Up, .. }
        )));
    }

    #[test]
    fn mismatched_buttons_are_not_a_click() {
        let shared = Arc::new(Shared::default());
        let mut injector = injector(&shared);

        injector.handle(InputEvent::MouseDown {
            x: 0.5,
            y: 0.5,
            button: MouseButton::Left,
        });
        injector.handle(InputEvent::MouseUp {
            x: 0.5,
            y: 0.5,
            button: MouseButton::Right,
        });
        assert!(!log(&shared).iter().any(|e| matches!(e, Posted::AxPress(_))));
    }

    #[test]
    fn drag_flushes_buffered_down_first() {
        let shared = Arc::new(Shared::default());
        let mut injector = injector(&shared);

        injector.handle(InputEvent::MouseDown {
            x: 0.2,
            y: 0.2,
            button: MouseButton::Left,
        });
        injector.handle(InputEvent::MouseDrag { x: 0.3, y: 0.3 });
        injector.handle(InputEvent::MouseDrag { x: 0.4, y: 0.4 });

        let kinds: Vec<MouseEventKind> = log(&shared)
            .iter()
            .filter_map(|e| match e {
                Posted::Mouse { kind, .. } => Some(*kind),
                _ => None,
            })
            .collect();
        assert_eq!(
            kinds,
            vec![MouseEventKind::Down, MouseEventKind::Drag, MouseEventKind::Drag]
        );
    }

    #[test]
    fn scroll_moves_the_scroll_bar_with_clamping() {
        let shared = Arc::new(Shared::default());
        *shared.scroll_bar.lock().unwrap() = Some(0.5);
        let mut injector = injector(&shared);

        injector.handle(InputEvent::Scroll { delta_y: 0.3 });
        assert_eq!(*shared.scroll_bar.lock().unwrap(), Some(0.8));

        injector.handle(InputEvent::Scroll { delta_y: 0.9 });
        assert_eq!(
            *shared.scroll_bar.lock().unwrap(),
            Some(1.0),
            "scroll bar value clamps at 1.0"
        );

        injector.handle(InputEvent::Scroll { delta_y: -3.0 });
        assert_eq!(*shared.scroll_bar.lock().unwrap(), Some(0.0));
    }

    #[test]
    fn scroll_without_scroll_bar_pages() {
        let shared = Arc::new(Shared::default());
        let mut injector = injector(&shared);

        injector.handle(InputEvent::Scroll { delta_y: 0.5 });
        injector.handle(InputEvent::Scroll { delta_y: -0.5 });

        let keys: Vec<(u16, bool)> = log(&shared)
            .iter()
            .filter_map(|e| match e {
                Posted::Key { key_code, down, .. } => Some((*key_code, *down)),
                _ => None,
            })
            .collect();
        assert_eq!(
            keys,
            vec![
                (KEY_PAGE_DOWN, true),
                (KEY_PAGE_DOWN, false),
                (KEY_PAGE_UP, true),
                (KEY_PAGE_UP, false),
            ]
        );
    }

    #[test]
    fn key_events_carry_modifiers_and_text() {
        let shared = Arc::new(Shared::default());
        let mut injector = injector(&shared);

        injector.handle(InputEvent::KeyDown {
            key_code: 0,
            modifiers: Modifiers {
                command: true,
                ..Modifiers::none()
            },
            text: Some("a".into()),
        });
        injector.handle(InputEvent::KeyUp {
            key_code: 0,
            modifiers: Modifiers::none(),
        });

        let events = log(&shared);
        assert!(events.contains(&Posted::Key {
            key_code: 0,
            down: true,
            command: true,
            text: Some("a".into()),
        }));
        assert!(events.contains(&Posted::Key {
            key_code: 0,
            down: false,
            command: false,
            text: None,
        }));
    }

    #[test]
    fn unknown_events_are_dropped() {
        let shared = Arc::new(Shared::default());
        let mut injector = injector(&shared);
        injector.handle(InputEvent::Unknown);
        assert_eq!(log(&shared).len(), 1); // activation only
    }

    #[test]
    fn click_predicate_rejects_slow_and_far() {
        assert!(is_click(
            MouseButton::Left,
            MouseButton::Left,
            5.0,
            Duration::from_millis(100)
        ));
        assert!(!is_click(
            MouseButton::Left,
            MouseButton::Left,
            15.0,
            Duration::from_millis(100)
        ));
        assert!(!is_click(
            MouseButton::Left,
            MouseButton::Left,
            5.0,
            Duration::from_millis(600)
        ));
        assert!(!is_click(
            MouseButton::Left,
            MouseButton::Right,
            5.0,
            Duration::from_millis(100)
        ));
    }
}

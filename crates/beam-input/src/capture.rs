use beam_protocol::input::{InputEvent, Modifiers, MouseButton};

/// Virtual key codes of the modifier keys, used when modifier-flag changes
/// are synthesized as key events.
pub const KEY_COMMAND: u16 = 55;
pub const KEY_SHIFT: u16 = 56;
pub const KEY_OPTION: u16 = 58;
pub const KEY_CONTROL: u16 = 59;

/// Escape releases cursor capture; the key is consumed, not forwarded.
pub const KEY_ESCAPE: u16 = 53;

/// Pointer events with `(x, y)` outside this band are off-surface drags and
/// are dropped.
const DROP_BAND: std::ops::RangeInclusive<f64> = -0.1..=1.1;

/// High-precision scroll deltas are divided by this.
const PRECISE_SCROLL_DIVISOR: f64 = 500.0;
/// Line-based scroll deltas are multiplied by this.
const LINE_SCROLL_FACTOR: f64 = 0.03;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerKind {
    Move,
    Drag,
    Down,
    Up,
}

/// Receiver-side event normalization.
///
/// View-space pointer positions (origin bottom-left, in points) become
/// `[0,1]²` with `y = 0` at the top. Scroll deltas are normalized and
/// sign-flipped so a positive wire delta always means "scroll the content
/// down". Modifier-flag changes are synthesized as key events. While the
/// cursor is captured, raw deltas are the authoritative motion and the
/// position field is pinned to the surface center.
///
/// Contract for the observing view: key events must not continue up the
/// responder chain (that triggers the OS "invalid key" beep), while pointer
/// events the surface does not handle must, so local window drags keep
/// working.
pub struct InputCapture {
    view_width: f64,
    view_height: f64,
    cursor_captured: bool,
    modifiers: Modifiers,
}

impl InputCapture {
    pub fn new(view_width: f64, view_height: f64) -> Self {
        Self {
            view_width,
            view_height,
            cursor_captured: false,
            modifiers: Modifiers::none(),
        }
    }

    pub fn set_view_size(&mut self, width: f64, height: f64) {
        self.view_width = width;
        self.view_height = height;
    }

    /// Whether the pointer is currently disassociated from the local cursor.
    pub fn cursor_captured(&self) -> bool {
        self.cursor_captured
    }

    /// Apply the sender's polled cursor visibility: an invisible sender
    /// cursor enters capture mode, a visible one releases it.
    pub fn apply_cursor_state(&mut self, visible: bool) {
        self.cursor_captured = !visible;
    }

    /// Normalize one pointer event. `u`/`v` are view-space points with the
    /// origin at the bottom-left; `delta` is the raw device motion.
    pub fn pointer_event(
        &mut self,
        kind: PointerKind,
        u: f64,
        v: f64,
        delta: (f64, f64),
        button: MouseButton,
    ) -> Option<InputEvent> {
        let (x, y) = if self.cursor_captured {
            // Position is meaningless while disassociated; deltas carry the
            // motion.
            (0.5, 0.5)
        } else {
            let x = u / self.view_width;
            let y = 1.0 - v / self.view_height;
            if !DROP_BAND.contains(&x) || !DROP_BAND.contains(&y) {
                return None;
            }
            (x, y)
        };

        Some(match kind {
            PointerKind::Move => InputEvent::MouseMove {
                x,
                y,
                delta_x: delta.0,
                delta_y: delta.1,
            },
            PointerKind::Drag => InputEvent::MouseDrag { x, y },
            PointerKind::Down => InputEvent::MouseDown { x, y, button },
            PointerKind::Up => InputEvent::MouseUp { x, y, button },
        })
    }

    /// Normalize one scroll event. `os_delta_y` is the OS-natural delta;
    /// `high_precision` distinguishes pixel-precise devices from line-based
    /// wheels. The sign is flipped to the wire convention here.
    pub fn scroll_event(&mut self, os_delta_y: f64, high_precision: bool) -> InputEvent {
        let scaled = if high_precision {
            os_delta_y / PRECISE_SCROLL_DIVISOR
        } else {
            os_delta_y * LINE_SCROLL_FACTOR
        };
        InputEvent::Scroll { delta_y: -scaled }
    }

    /// Normalize a key press. Returns None when the event is consumed
    /// locally (escape releasing cursor capture).
    pub fn key_down(
        &mut self,
        key_code: u16,
        modifiers: Modifiers,
        text: Option<String>,
    ) -> Option<InputEvent> {
        if self.cursor_captured && key_code == KEY_ESCAPE {
            self.cursor_captured = false;
            return None;
        }
        self.modifiers = modifiers;
        Some(InputEvent::KeyDown {
            key_code,
            modifiers,
            text,
        })
    }

    pub fn key_up(&mut self, key_code: u16, modifiers: Modifiers) -> InputEvent {
        self.modifiers = modifiers;
        InputEvent::KeyUp {
            key_code,
            modifiers,
        }
    }

    /// Turn a modifier-flag change into synthesized key events for every
    /// modifier whose state flipped.
    pub fn flags_changed(&mut self, new: Modifiers) -> Vec<InputEvent> {
        let old = self.modifiers;
        self.modifiers = new;

        let transitions = [
            (old.shift, new.shift, KEY_SHIFT),
            (old.control, new.control, KEY_CONTROL),
            (old.option, new.option, KEY_OPTION),
            (old.command, new.command, KEY_COMMAND),
        ];

        transitions
            .into_iter()
            .filter(|(was, is, _)| was != is)
            .map(|(_, is, key_code)| {
                if is {
                    InputEvent::KeyDown {
                        key_code,
                        modifiers: new,
                        text: None,
                    }
                } else {
                    InputEvent::KeyUp {
                        key_code,
                        modifiers: new,
                    }
                }
            })
            .collect()
    }
}

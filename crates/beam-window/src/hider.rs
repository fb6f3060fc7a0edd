use tracing::{debug, info, warn};

use beam_protocol::types::Rect;

use crate::error::WindowError;

/// Opaque id of a process-private virtual display.
pub type DisplayHandle = u32;

/// Opaque accessibility reference to one window.
pub type AxWindowHandle = u64;

/// Handle for one hide, used to query the window's slot and to restore it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HideHandle(u64);

/// The private virtual-display facility.
///
/// `create` places the display at the bottom-left corner of the existing
/// arrangement with exactly one pixel of overlap with the main display's
/// left edge, so the cursor cannot easily wander onto it. The configuration
/// is session-scoped: it disappears when the process exits. Platforms
/// without the facility return [`WindowError::NotSupported`] from `create`.
pub trait VirtualDisplayApi: Send {
    fn create(&self, width: u32, height: u32) -> Result<DisplayHandle, WindowError>;
    fn resize(&self, handle: DisplayHandle, height: u32) -> Result<(), WindowError>;
    fn destroy(&self, handle: DisplayHandle);
    fn bounds(&self, handle: DisplayHandle) -> Rect;
}

/// Accessibility control over application windows.
pub trait WindowControl: Send {
    /// Locate a window of `pid`, by title substring when given, else the
    /// first titled window.
    fn locate_window(
        &self,
        pid: i32,
        title: Option<&str>,
    ) -> Result<AxWindowHandle, WindowError>;

    fn position(&self, window: AxWindowHandle) -> Result<(f64, f64), WindowError>;
    fn size(&self, window: AxWindowHandle) -> Result<(f64, f64), WindowError>;
    fn set_position(&self, window: AxWindowHandle, point: (f64, f64)) -> Result<(), WindowError>;
    fn raise(&self, window: AxWindowHandle) -> Result<(), WindowError>;
}

pub const DISPLAY_WIDTH: u32 = 1920;
pub const DISPLAY_INITIAL_HEIGHT: u32 = 1080;
pub const DISPLAY_MAX_HEIGHT: u32 = 10_800;

/// Margin from the display corner and between stacked windows.
const STACK_MARGIN: f64 = 50.0;

struct HiddenEntry {
    id: u64,
    window: AxWindowHandle,
    original_position: (f64, f64),
    /// Assigned rectangle on the virtual display.
    slot: Rect,
}

/// Owns one process-private virtual display and the windows parked on it.
///
/// Hidden windows stack downward: the first at `(x+50, y+50)`, each next
/// one 50 points below the previous bottom edge, never overlapping. When a
/// slot would fall off the bottom, the display grows to the next height
/// multiple that fits, up to the cap. Restore puts a window back at its
/// recorded position and raises it; teardown restores everything in reverse
/// hide order and destroys the display.
pub struct WindowHider {
    display_api: Box<dyn VirtualDisplayApi>,
    windows: Box<dyn WindowControl>,
    display: DisplayHandle,
    display_height: u32,
    hidden: Vec<HiddenEntry>,
    next_id: u64,
}

impl WindowHider {
    /// Create the virtual display. A `NotSupported` error here means the
    /// session runs unhidden.
    pub fn new(
        display_api: Box<dyn VirtualDisplayApi>,
        windows: Box<dyn WindowControl>,
    ) -> Result<Self, WindowError> {
        let display_handle = display_api.create(DISPLAY_WIDTH, DISPLAY_INITIAL_HEIGHT)?;
        info!(display = display_handle, "virtual display created");
        Ok(Self {
            display_api,
            windows,
            display: display_handle,
            display_height: DISPLAY_INITIAL_HEIGHT,
            hidden: Vec::new(),
            next_id: 0,
        })
    }

    /// Move the target window onto the virtual display.
    pub fn hide(&mut self, pid: i32, title: Option<&str>) -> Result<HideHandle, WindowError> {
        let window = self.windows.locate_window(pid, title)?;
        let original_position = self.windows.position(window)?;
        let (width, height) = self.windows.size(window)?;

        let bounds = self.display_api.bounds(self.display);
        let slot_y = match self.hidden.last() {
            Some(previous) => previous.slot.bottom() + STACK_MARGIN,
            None => bounds.y + STACK_MARGIN,
        };
        let slot = Rect::new(bounds.x + STACK_MARGIN, slot_y, width, height);

        // Grow the display when the slot's bottom would fall off it.
        let needed = (slot.bottom() - bounds.y).ceil() as u32;
        if needed > self.display_height {
            let grown = needed.div_ceil(DISPLAY_INITIAL_HEIGHT) * DISPLAY_INITIAL_HEIGHT;
            if grown > DISPLAY_MAX_HEIGHT {
                return Err(WindowError::DisplayFull);
            }
            self.display_api.resize(self.display, grown)?;
            self.display_height = grown;
            debug!(height = grown, "virtual display resized");
        }

        debug_assert!(
            self.hidden.iter().all(|entry| !entry.slot.intersects(&slot)),
            "hidden window slots must not overlap"
        );

        self.windows.set_position(window, (slot.x, slot.y))?;

        let id = self.next_id;
        self.next_id += 1;
        self.hidden.push(HiddenEntry {
            id,
            window,
            original_position,
            slot,
        });
        info!(pid, ?slot, "window hidden");
        Ok(HideHandle(id))
    }

    /// The window's current rectangle on the virtual display, for input
    /// denormalization.
    pub fn frame(&self, handle: HideHandle) -> Option<Rect> {
        self.hidden
            .iter()
            .find(|entry| entry.id == handle.0)
            .map(|entry| entry.slot)
    }

    /// The accessibility handle of a hidden window, borrowed for the
    /// lifetime of the hide.
    pub fn ax_handle(&self, handle: HideHandle) -> Option<AxWindowHandle> {
        self.hidden
            .iter()
            .find(|entry| entry.id == handle.0)
            .map(|entry| entry.window)
    }

    /// Move one window back to its recorded position and raise it.
    pub fn restore(&mut self, handle: HideHandle) -> Result<(), WindowError> {
        let index = self
            .hidden
            .iter()
            .position(|entry| entry.id == handle.0)
            .ok_or(WindowError::Platform("unknown hide handle".into()))?;
        let entry = self.hidden.remove(index);
        self.windows.set_position(entry.window, entry.original_position)?;
        self.windows.raise(entry.window)?;
        Ok(())
    }

    /// Restore every hidden window in reverse hide order, then destroy the
    /// display.
    pub fn restore_all(&mut self) {
        while let Some(entry) = self.hidden.pop() {
            if let Err(e) = self.windows.set_position(entry.window, entry.original_position) {
                warn!("failed to restore window position: {e}");
            }
            if let Err(e) = self.windows.raise(entry.window) {
                warn!("failed to raise restored window: {e}");
            }
        }
        self.display_api.destroy(self.display);
    }

    pub fn hidden_count(&self) -> usize {
        self.hidden.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct MockState {
        display_height: Mutex<u32>,
        destroyed: Mutex<bool>,
        /// window handle → (position, size)
        windows: Mutex<std::collections::HashMap<AxWindowHandle, ((f64, f64), (f64, f64))>>,
        raised: Mutex<Vec<AxWindowHandle>>,
        create_fails: bool,
    }

    struct MockDisplay(Arc<MockState>);

    impl VirtualDisplayApi for MockDisplay {
        fn create(&self, _width: u32, height: u32) -> Result<DisplayHandle, WindowError> {
            if self.0.create_fails {
                return Err(WindowError::NotSupported);
            }
            *self.0.display_height.lock().unwrap() = height;
            Ok(7)
        }

        fn resize(&self, _handle: DisplayHandle, height: u32) -> Result<(), WindowError> {
            *self.0.display_height.lock().unwrap() = height;
            Ok(())
        }

        fn destroy(&self, _handle: DisplayHandle) {
            *self.0.destroyed.lock().unwrap() = true;
        }

        fn bounds(&self, _handle: DisplayHandle) -> Rect {
            // Bottom-left of the arrangement, one pixel into the main display.
            Rect::new(
                -(DISPLAY_WIDTH as f64) + 1.0,
                1080.0,
                DISPLAY_WIDTH as f64,
                *self.0.display_height.lock().unwrap() as f64,
            )
        }
    }

    struct MockWindows(Arc<MockState>);

    impl WindowControl for MockWindows {
        fn locate_window(
            &self,
            pid: i32,
            _title: Option<&str>,
        ) -> Result<AxWindowHandle, WindowError> {
            let handle = pid as AxWindowHandle;
            self.0
                .windows
                .lock()
                .unwrap()
                .entry(handle)
                .or_insert(((320.0, 240.0), (640.0, 480.0)));
            Ok(handle)
        }

        fn position(&self, window: AxWindowHandle) -> Result<(f64, f64), WindowError> {
            Ok(self.0.windows.lock().unwrap()[&window].0)
        }

        fn size(&self, window: AxWindowHandle) -> Result<(f64, f64), WindowError> {
            Ok(self.0.windows.lock().unwrap()[&window].1)
        }

        fn set_position(
            &self,
            window: AxWindowHandle,
            point: (f64, f64),
        ) -> Result<(), WindowError> {
            self.0.windows.lock().unwrap().get_mut(&window).unwrap().0 = point;
            Ok(())
        }

        fn raise(&self, window: AxWindowHandle) -> Result<(), WindowError> {
            self.0.raised.lock().unwrap().push(window);
            Ok(())
        }
    }

    fn hider(state: &Arc<MockState>) -> WindowHider {
        WindowHider::new(
            Box::new(MockDisplay(state.clone())),
            Box::new(MockWindows(state.clone())),
        )
        .unwrap()
    }

    fn set_window(state: &Arc<MockState>, pid: i32, size: (f64, f64)) {
        state
            .windows
            .lock()
            .unwrap()
            .insert(pid as AxWindowHandle, ((100.0, 100.0), size));
    }

    #[test]
    fn creation_failure_is_not_supported() {
        let state = Arc::new(MockState {
            create_fails: true,
            ..Default::default()
        });
        let result = WindowHider::new(
            Box::new(MockDisplay(state.clone())),
            Box::new(MockWindows(state)),
        );
        assert!(matches!(result, Err(WindowError::NotSupported)));
    }

    #[test]
    fn first_window_sits_fifty_points_in() {
        let state = Arc::new(MockState::default());
        let mut hider = hider(&state);

        let handle = hider.hide(1, None).unwrap();
        let slot = hider.frame(handle).unwrap();
        let bounds = Rect::new(-(DISPLAY_WIDTH as f64) + 1.0, 1080.0, 1920.0, 1080.0);
        assert_eq!(slot.x, bounds.x + 50.0);
        assert_eq!(slot.y, bounds.y + 50.0);

        // The window really moved there.
        let position = state.windows.lock().unwrap()[&1].0;
        assert_eq!(position, (slot.x, slot.y));
    }

    #[test]
    fn stacked_windows_do_not_overlap() {
        let state = Arc::new(MockState::default());
        let mut hider = hider(&state);
        set_window(&state, 1, (640.0, 480.0));
        set_window(&state, 2, (800.0, 300.0));

        let first = hider.hide(1, None).unwrap();
        let second = hider.hide(2, None).unwrap();
        let a = hider.frame(first).unwrap();
        let b = hider.frame(second).unwrap();

        assert!(!a.intersects(&b));
        assert_eq!(b.y, a.bottom() + 50.0, "second window 50 points below first");
    }

    #[test]
    fn display_grows_to_next_multiple() {
        let state = Arc::new(MockState::default());
        let mut hider = hider(&state);
        set_window(&state, 1, (600.0, 900.0));
        set_window(&state, 2, (600.0, 900.0));

        hider.hide(1, None).unwrap();
        // Second slot bottom: 50 + 900 + 50 + 900 = 1900 > 1080 → grow to 2160.
        hider.hide(2, None).unwrap();
        assert_eq!(*state.display_height.lock().unwrap(), 2160);
    }

    #[test]
    fn display_growth_is_capped() {
        let state = Arc::new(MockState::default());
        let mut hider = hider(&state);

        for pid in 0..11 {
            set_window(&state, pid, (600.0, 1000.0));
        }
        let mut result = Ok(());
        for pid in 0..11 {
            match hider.hide(pid, None) {
                Ok(_) => {}
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }
        assert!(
            matches!(result, Err(WindowError::DisplayFull)),
            "11 thousand-point windows cannot fit a 10800-point display"
        );
    }

    #[test]
    fn restore_returns_window_and_raises() {
        let state = Arc::new(MockState::default());
        let mut hider = hider(&state);
        set_window(&state, 1, (640.0, 480.0));

        let handle = hider.hide(1, None).unwrap();
        hider.restore(handle).unwrap();

        let position = state.windows.lock().unwrap()[&1].0;
        assert_eq!(position, (100.0, 100.0));
        assert_eq!(*state.raised.lock().unwrap(), vec![1]);
        assert_eq!(hider.hidden_count(), 0);
    }

    #[test]
    fn restore_all_reverses_hide_order_and_destroys_display() {
        let state = Arc::new(MockState::default());
        let mut hider = hider(&state);
        set_window(&state, 1, (640.0, 480.0));
        set_window(&state, 2, (640.0, 480.0));

        hider.hide(1, None).unwrap();
        hider.hide(2, None).unwrap();
        hider.restore_all();

        assert_eq!(
            *state.raised.lock().unwrap(),
            vec![2, 1],
            "restore order is the reverse of hide order"
        );
        assert!(*state.destroyed.lock().unwrap());
        assert_eq!(hider.hidden_count(), 0);
    }

    #[test]
    fn ax_handle_borrowable_while_hidden() {
        let state = Arc::new(MockState::default());
        let mut hider = hider(&state);
        let handle = hider.hide(1, None).unwrap();
        assert_eq!(hider.ax_handle(handle), Some(1));
        hider.restore(handle).unwrap();
        assert_eq!(hider.ax_handle(handle), None);
    }
}

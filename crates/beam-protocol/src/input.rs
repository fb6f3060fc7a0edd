use serde::{Deserialize, Serialize};

/// Pointer button carried in mouse events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    Left,
    Right,
}

/// Modifier flags attached to key events. Absent flags decode as false and
/// false flags are omitted on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Modifiers {
    #[serde(default, skip_serializing_if = "is_false")]
    pub shift: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub control: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub option: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub command: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl Modifiers {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        !(self.shift || self.control || self.option || self.command)
    }
}

/// One normalized input event, produced by the receiver's capture layer and
/// consumed exactly once by the sender's injector.
///
/// Pointer coordinates are in `[0,1]²` with `y = 0` at the top of the beamed
/// surface. A positive scroll `deltaY` means "scroll the content downward".
/// Event types this peer does not understand decode as [`InputEvent::Unknown`]
/// and are dropped by the injector rather than killing the channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum InputEvent {
    #[serde(rename = "mouseMove")]
    MouseMove {
        x: f64,
        y: f64,
        #[serde(rename = "deltaX", default)]
        delta_x: f64,
        #[serde(rename = "deltaY", default)]
        delta_y: f64,
    },

    #[serde(rename = "mouseDown")]
    MouseDown { x: f64, y: f64, button: MouseButton },

    #[serde(rename = "mouseUp")]
    MouseUp { x: f64, y: f64, button: MouseButton },

    #[serde(rename = "mouseDrag")]
    MouseDrag { x: f64, y: f64 },

    #[serde(rename = "scroll")]
    Scroll {
        #[serde(rename = "deltaY")]
        delta_y: f64,
    },

    #[serde(rename = "keyDown")]
    KeyDown {
        #[serde(rename = "keyCode")]
        key_code: u16,
        #[serde(flatten)]
        modifiers: Modifiers,
        /// Typed character string, attached when available so composed
        /// characters survive keymap differences.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },

    #[serde(rename = "keyUp")]
    KeyUp {
        #[serde(rename = "keyCode")]
        key_code: u16,
        #[serde(flatten)]
        modifiers: Modifiers,
    },

    #[serde(other)]
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(event: &InputEvent) -> InputEvent {
        let json = serde_json::to_string(event).unwrap();
        serde_json::from_str(&json).unwrap()
    }

    #[test]
    fn roundtrip_mouse_events() {
        let events = [
            InputEvent::MouseMove {
                x: 0.5,
                y: 0.25,
                delta_x: 3.0,
                delta_y: -2.0,
            },
            InputEvent::MouseDown {
                x: 0.0,
                y: 1.0,
                button: MouseButton::Left,
            },
            InputEvent::MouseUp {
                x: 0.0,
                y: 1.0,
                button: MouseButton::Right,
            },
            InputEvent::MouseDrag { x: 0.9, y: 0.1 },
            InputEvent::Scroll { delta_y: -0.06 },
        ];
        for event in events {
            assert_eq!(roundtrip(&event), event);
        }
    }

    #[test]
    fn wire_field_names() {
        let event = InputEvent::MouseMove {
            x: 0.5,
            y: 0.5,
            delta_x: 1.0,
            delta_y: 2.0,
        };
        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&event).unwrap()).unwrap();
        assert_eq!(json["type"], "mouseMove");
        assert_eq!(json["deltaX"], 1.0);
        assert_eq!(json["deltaY"], 2.0);

        let event = InputEvent::KeyDown {
            key_code: 36,
            modifiers: Modifiers {
                command: true,
                ..Modifiers::none()
            },
            text: Some("\r".into()),
        };
        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&event).unwrap()).unwrap();
        assert_eq!(json["type"], "keyDown");
        assert_eq!(json["keyCode"], 36);
        assert_eq!(json["command"], true);
        assert!(json.get("shift").is_none(), "false flags stay off the wire");
    }

    #[test]
    fn button_serializes_lowercase() {
        let json = serde_json::to_string(&MouseButton::Left).unwrap();
        assert_eq!(json, r#""left""#);
        let json = serde_json::to_string(&MouseButton::Right).unwrap();
        assert_eq!(json, r#""right""#);
    }

    #[test]
    fn missing_modifiers_default_to_false() {
        let event: InputEvent =
            serde_json::from_str(r#"{"type":"keyUp","keyCode":53}"#).unwrap();
        assert_eq!(
            event,
            InputEvent::KeyUp {
                key_code: 53,
                modifiers: Modifiers::none(),
            }
        );
    }

    #[test]
    fn missing_deltas_default_to_zero() {
        let event: InputEvent =
            serde_json::from_str(r#"{"type":"mouseMove","x":0.1,"y":0.2}"#).unwrap();
        assert_eq!(
            event,
            InputEvent::MouseMove {
                x: 0.1,
                y: 0.2,
                delta_x: 0.0,
                delta_y: 0.0,
            }
        );
    }

    #[test]
    fn unknown_event_type_decodes_to_unknown() {
        let event: InputEvent =
            serde_json::from_str(r#"{"type":"trackpadPressure","stage":2}"#).unwrap();
        assert_eq!(event, InputEvent::Unknown);
    }

    #[test]
    fn key_down_roundtrip_with_text() {
        let event = InputEvent::KeyDown {
            key_code: 0,
            modifiers: Modifiers {
                shift: true,
                option: true,
                ..Modifiers::none()
            },
            text: Some("å".into()),
        };
        assert_eq!(roundtrip(&event), event);
    }
}

//! Virtual keyboard/mouse device using evdev/uinput
//!
//! Creates one virtual device carrying both the key range and relative
//! pointer/scroll axes, so every synthesized action goes out through a
//! single uinput node.

use crate::mapping::{Action, Modifier, MouseButtonKind};
use crate::output::{OutputError, OutputSink};
use evdev::{
    uinput::{VirtualDevice, VirtualDeviceBuilder},
    AttributeSet, EventType, InputEvent, Key, RelativeAxisType,
};
use tracing::{debug, info, warn};

/// Fraction of a wheel detent accumulated per scroll unit.
const SCROLL_DETENT_SCALE: f64 = 1.0 / 24.0;

/// Virtual output device
pub struct VirtualOutputDevice {
    device: VirtualDevice,
    // Sub-pixel / sub-detent remainders carried between emissions
    cursor_remainder: (f64, f64),
    scroll_remainder: (f64, f64),
}

impl VirtualOutputDevice {
    /// Create the virtual device
    ///
    /// # Arguments
    /// * `name` - Device name (shown in `evtest` and input settings)
    pub fn new(name: &str) -> Result<Self, OutputError> {
        let mut keys = AttributeSet::<Key>::new();
        for key in SUPPORTED_KEYS {
            keys.insert(*key);
        }
        keys.insert(Key::BTN_LEFT);
        keys.insert(Key::BTN_RIGHT);
        keys.insert(Key::BTN_MIDDLE);

        let mut axes = AttributeSet::<RelativeAxisType>::new();
        axes.insert(RelativeAxisType::REL_X);
        axes.insert(RelativeAxisType::REL_Y);
        axes.insert(RelativeAxisType::REL_WHEEL);
        axes.insert(RelativeAxisType::REL_HWHEEL);

        let device = VirtualDeviceBuilder::new()
            .map_err(OutputError::CreateDevice)?
            .name(name)
            .with_keys(&keys)
            .map_err(OutputError::CreateDevice)?
            .with_relative_axes(&axes)
            .map_err(OutputError::CreateDevice)?
            .build()
            .map_err(OutputError::CreateDevice)?;

        info!("Virtual output device '{}' created", name);
        Ok(Self {
            device,
            cursor_remainder: (0.0, 0.0),
            scroll_remainder: (0.0, 0.0),
        })
    }

    fn emit(&mut self, events: &[InputEvent]) -> Result<(), OutputError> {
        self.device.emit(events).map_err(OutputError::EmitEvent)
    }

    fn key_event(key: Key, pressed: bool) -> InputEvent {
        InputEvent::new_now(EventType::KEY, key.code(), i32::from(pressed))
    }

    fn press_events(key: Key, modifiers: &[Modifier], pressed: bool) -> Vec<InputEvent> {
        let mut events = Vec::with_capacity(modifiers.len() + 1);
        if pressed {
            for modifier in modifiers {
                events.push(Self::key_event(modifier_key(*modifier), true));
            }
            events.push(Self::key_event(key, true));
        } else {
            events.push(Self::key_event(key, false));
            for modifier in modifiers.iter().rev() {
                events.push(Self::key_event(modifier_key(*modifier), false));
            }
        }
        events
    }

    fn tap_key(&mut self, key: Key, modifiers: &[Modifier]) -> Result<(), OutputError> {
        self.emit(&Self::press_events(key, modifiers, true))?;
        self.emit(&Self::press_events(key, modifiers, false))
    }

    fn apply(&mut self, action: &Action, pressed: Option<bool>) -> Result<(), OutputError> {
        match action {
            Action::Key { key, modifiers } => {
                let key = key_from_name(key)?;
                match pressed {
                    None => self.tap_key(key, modifiers),
                    Some(state) => self.emit(&Self::press_events(key, modifiers, state)),
                }
            }
            Action::MouseButton { button } => {
                let key = mouse_button_key(*button);
                match pressed {
                    None => {
                        self.emit(&[Self::key_event(key, true)])?;
                        self.emit(&[Self::key_event(key, false)])
                    }
                    Some(state) => self.emit(&[Self::key_event(key, state)]),
                }
            }
            Action::Macro { steps } => {
                for step in steps {
                    self.tap_key(key_from_name(step)?, &[])?;
                }
                Ok(())
            }
            Action::SystemCommand { command } => {
                // Handed to the shell; the engine stays oblivious.
                info!("Executing system command: {}", command);
                match std::process::Command::new("sh").arg("-c").arg(command).spawn() {
                    Ok(_) => Ok(()),
                    Err(e) => {
                        warn!("System command failed to spawn: {}", e);
                        Ok(())
                    }
                }
            }
            Action::Script { script } => {
                // Scripting sandbox is an external collaborator.
                warn!("No scripting sandbox attached, dropping script action '{}'", script);
                Ok(())
            }
        }
    }
}

impl OutputSink for VirtualOutputDevice {
    fn execute(&mut self, action: &Action) -> Result<(), OutputError> {
        self.apply(action, None)
    }

    fn start_hold(&mut self, action: &Action) -> Result<(), OutputError> {
        self.apply(action, Some(true))
    }

    fn stop_hold(&mut self, action: &Action) -> Result<(), OutputError> {
        self.apply(action, Some(false))
    }

    fn move_cursor(&mut self, dx: f64, dy: f64) -> Result<(), OutputError> {
        let x = self.cursor_remainder.0 + dx;
        let y = self.cursor_remainder.1 + dy;
        let (xi, yi) = (x.trunc() as i32, y.trunc() as i32);
        self.cursor_remainder = (x.fract(), y.fract());

        if xi == 0 && yi == 0 {
            return Ok(());
        }
        let mut events = Vec::with_capacity(2);
        if xi != 0 {
            events.push(InputEvent::new_now(
                EventType::RELATIVE,
                RelativeAxisType::REL_X.0,
                xi,
            ));
        }
        if yi != 0 {
            events.push(InputEvent::new_now(
                EventType::RELATIVE,
                RelativeAxisType::REL_Y.0,
                yi,
            ));
        }
        self.emit(&events)
    }

    fn scroll(&mut self, dx: f64, dy: f64, momentum: bool) -> Result<(), OutputError> {
        let x = self.scroll_remainder.0 + dx * SCROLL_DETENT_SCALE;
        let y = self.scroll_remainder.1 + dy * SCROLL_DETENT_SCALE;
        let (xi, yi) = (x.trunc() as i32, y.trunc() as i32);
        self.scroll_remainder = (x.fract(), y.fract());

        if xi == 0 && yi == 0 {
            return Ok(());
        }
        debug!("Scroll {} detents h / {} detents v (momentum={})", xi, yi, momentum);
        let mut events = Vec::with_capacity(2);
        if xi != 0 {
            events.push(InputEvent::new_now(
                EventType::RELATIVE,
                RelativeAxisType::REL_HWHEEL.0,
                xi,
            ));
        }
        if yi != 0 {
            // Wheel is positive-up, screen coordinates are positive-down.
            events.push(InputEvent::new_now(
                EventType::RELATIVE,
                RelativeAxisType::REL_WHEEL.0,
                -yi,
            ));
        }
        self.emit(&events)
    }
}

fn mouse_button_key(button: MouseButtonKind) -> Key {
    match button {
        MouseButtonKind::Left => Key::BTN_LEFT,
        MouseButtonKind::Right => Key::BTN_RIGHT,
        MouseButtonKind::Middle => Key::BTN_MIDDLE,
    }
}

fn modifier_key(modifier: Modifier) -> Key {
    match modifier {
        Modifier::Shift => Key::KEY_LEFTSHIFT,
        Modifier::Ctrl => Key::KEY_LEFTCTRL,
        Modifier::Alt => Key::KEY_LEFTALT,
        Modifier::Meta => Key::KEY_LEFTMETA,
    }
}

/// Keys addressable from profile files.
const SUPPORTED_KEYS: &[Key] = &[
    Key::KEY_A,
    Key::KEY_B,
    Key::KEY_C,
    Key::KEY_D,
    Key::KEY_E,
    Key::KEY_F,
    Key::KEY_G,
    Key::KEY_H,
    Key::KEY_I,
    Key::KEY_J,
    Key::KEY_K,
    Key::KEY_L,
    Key::KEY_M,
    Key::KEY_N,
    Key::KEY_O,
    Key::KEY_P,
    Key::KEY_Q,
    Key::KEY_R,
    Key::KEY_S,
    Key::KEY_T,
    Key::KEY_U,
    Key::KEY_V,
    Key::KEY_W,
    Key::KEY_X,
    Key::KEY_Y,
    Key::KEY_Z,
    Key::KEY_0,
    Key::KEY_1,
    Key::KEY_2,
    Key::KEY_3,
    Key::KEY_4,
    Key::KEY_5,
    Key::KEY_6,
    Key::KEY_7,
    Key::KEY_8,
    Key::KEY_9,
    Key::KEY_ENTER,
    Key::KEY_ESC,
    Key::KEY_SPACE,
    Key::KEY_TAB,
    Key::KEY_BACKSPACE,
    Key::KEY_UP,
    Key::KEY_DOWN,
    Key::KEY_LEFT,
    Key::KEY_RIGHT,
    Key::KEY_PAGEUP,
    Key::KEY_PAGEDOWN,
    Key::KEY_HOME,
    Key::KEY_END,
    Key::KEY_EQUAL,
    Key::KEY_MINUS,
    Key::KEY_CAPSLOCK,
    Key::KEY_LEFTSHIFT,
    Key::KEY_LEFTCTRL,
    Key::KEY_LEFTALT,
    Key::KEY_LEFTMETA,
    Key::KEY_F1,
    Key::KEY_F2,
    Key::KEY_F3,
    Key::KEY_F4,
    Key::KEY_F5,
    Key::KEY_F6,
    Key::KEY_F7,
    Key::KEY_F8,
    Key::KEY_F9,
    Key::KEY_F10,
    Key::KEY_F11,
    Key::KEY_F12,
];

/// Resolves a profile key name to an evdev key.
fn key_from_name(name: &str) -> Result<Key, OutputError> {
    let key = match name {
        "a" => Key::KEY_A,
        "b" => Key::KEY_B,
        "c" => Key::KEY_C,
        "d" => Key::KEY_D,
        "e" => Key::KEY_E,
        "f" => Key::KEY_F,
        "g" => Key::KEY_G,
        "h" => Key::KEY_H,
        "i" => Key::KEY_I,
        "j" => Key::KEY_J,
        "k" => Key::KEY_K,
        "l" => Key::KEY_L,
        "m" => Key::KEY_M,
        "n" => Key::KEY_N,
        "o" => Key::KEY_O,
        "p" => Key::KEY_P,
        "q" => Key::KEY_Q,
        "r" => Key::KEY_R,
        "s" => Key::KEY_S,
        "t" => Key::KEY_T,
        "u" => Key::KEY_U,
        "v" => Key::KEY_V,
        "w" => Key::KEY_W,
        "x" => Key::KEY_X,
        "y" => Key::KEY_Y,
        "z" => Key::KEY_Z,
        "0" => Key::KEY_0,
        "1" => Key::KEY_1,
        "2" => Key::KEY_2,
        "3" => Key::KEY_3,
        "4" => Key::KEY_4,
        "5" => Key::KEY_5,
        "6" => Key::KEY_6,
        "7" => Key::KEY_7,
        "8" => Key::KEY_8,
        "9" => Key::KEY_9,
        "enter" => Key::KEY_ENTER,
        "esc" => Key::KEY_ESC,
        "space" => Key::KEY_SPACE,
        "tab" => Key::KEY_TAB,
        "backspace" => Key::KEY_BACKSPACE,
        "up" => Key::KEY_UP,
        "down" => Key::KEY_DOWN,
        "left" => Key::KEY_LEFT,
        "right" => Key::KEY_RIGHT,
        "pageup" => Key::KEY_PAGEUP,
        "pagedown" => Key::KEY_PAGEDOWN,
        "home" => Key::KEY_HOME,
        "end" => Key::KEY_END,
        "equal" => Key::KEY_EQUAL,
        "minus" => Key::KEY_MINUS,
        "capslock" => Key::KEY_CAPSLOCK,
        "leftshift" => Key::KEY_LEFTSHIFT,
        "leftctrl" => Key::KEY_LEFTCTRL,
        "leftalt" => Key::KEY_LEFTALT,
        "leftmeta" => Key::KEY_LEFTMETA,
        "f1" => Key::KEY_F1,
        "f2" => Key::KEY_F2,
        "f3" => Key::KEY_F3,
        "f4" => Key::KEY_F4,
        "f5" => Key::KEY_F5,
        "f6" => Key::KEY_F6,
        "f7" => Key::KEY_F7,
        "f8" => Key::KEY_F8,
        "f9" => Key::KEY_F9,
        "f10" => Key::KEY_F10,
        "f11" => Key::KEY_F11,
        "f12" => Key::KEY_F12,
        _ => return Err(OutputError::UnknownKey(name.to_string())),
    };
    Ok(key)
}

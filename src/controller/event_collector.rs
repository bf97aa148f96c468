use chrono::Local;
use gilrs::{Axis, Button, Event, EventType, Gamepad, GamepadId, Gilrs};
use statum::{machine, state};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

// Physical button identity. The set is closed and the derived ordering is
// stable; chord keys are canonicalized by sorting on it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ButtonId {
    A,
    B,
    X,
    Y,
    Start,
    Select,
    LeftBumper,
    RightBumper,
    LeftStick,
    RightStick,
    DPadUp,
    DPadDown,
    DPadLeft,
    DPadRight,
    Guide,
}

impl ButtonId {
    /// Parses the name used in profile files.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "a" => Some(Self::A),
            "b" => Some(Self::B),
            "x" => Some(Self::X),
            "y" => Some(Self::Y),
            "start" => Some(Self::Start),
            "select" => Some(Self::Select),
            "left_bumper" => Some(Self::LeftBumper),
            "right_bumper" => Some(Self::RightBumper),
            "left_stick" => Some(Self::LeftStick),
            "right_stick" => Some(Self::RightStick),
            "dpad_up" => Some(Self::DPadUp),
            "dpad_down" => Some(Self::DPadDown),
            "dpad_left" => Some(Self::DPadLeft),
            "dpad_right" => Some(Self::DPadRight),
            "guide" => Some(Self::Guide),
            _ => None,
        }
    }
}

// Touchpad finger slot; at most two concurrent touches are tracked.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TouchSlot {
    Primary,
    Secondary,
}

impl TouchSlot {
    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(Self::Primary),
            1 => Some(Self::Secondary),
            _ => None,
        }
    }
}

// Normalized input event with a monotonic timestamp, as consumed by the
// classification engine. Touch events enter through the same type; their
// transport is an external collaborator.
#[derive(Debug, Clone)]
pub enum RawInputEvent {
    ButtonPressed {
        button: ButtonId,
        timestamp: Instant,
    },
    ButtonReleased {
        button: ButtonId,
        held: Duration,
        timestamp: Instant,
    },
    TouchDown {
        slot: TouchSlot,
        x: f64,
        y: f64,
        timestamp: Instant,
    },
    TouchMoved {
        slot: TouchSlot,
        x: f64,
        y: f64,
        timestamp: Instant,
    },
    TouchUp {
        slot: TouchSlot,
        x: f64,
        y: f64,
        timestamp: Instant,
    },
    Disconnected,
}

// Latest stick positions, deadzone already applied. Published through a
// watch channel for the polling loop.
#[derive(Clone, Copy, Debug, Default)]
pub struct StickSnapshot {
    pub left_x: f32,
    pub left_y: f32,
    pub right_x: f32,
    pub right_y: f32,
}

// Collector settings
#[derive(Clone, Debug)]
pub struct CollectorSettings {
    pub joystick_deadzone: f32,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            joystick_deadzone: 0.05,
        }
    }
}

// Collector errors
#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    #[error("Failed to initialize collector: {0}")]
    InitializationError(String),

    #[error("Failed to send event: {0}")]
    EventSendError(String),
}

// Define collector states using statum's state macro
#[state]
#[derive(Debug, Clone)]
pub enum CollectionState {
    Initializing,
    Collecting,
}

#[machine]
#[derive(Debug)]
pub struct EventCollector<S: CollectionState> {
    // Gilrs context
    gilrs: Gilrs,

    // Active gamepad
    active_gamepad: Option<GamepadId>,

    // Collector settings
    settings: CollectorSettings,

    // Channel for sending normalized events to the engine
    event_sender: mpsc::Sender<RawInputEvent>,

    // Stick snapshot publisher for the polling loop
    stick_sender: watch::Sender<StickSnapshot>,

    // Press instants, used to compute the held duration at release
    press_instants: HashMap<ButtonId, Instant>,

    // Current snapshot (axes arrive one at a time)
    snapshot: StickSnapshot,
}

// Implementation of methods available in all states
impl<S: CollectionState> EventCollector<S> {
    pub fn settings(&self) -> &CollectorSettings {
        &self.settings
    }
}

// Implementation for Initializing state
impl EventCollector<Initializing> {
    pub fn create(
        settings: Option<CollectorSettings>,
        event_sender: mpsc::Sender<RawInputEvent>,
        stick_sender: watch::Sender<StickSnapshot>,
    ) -> Result<Self, CollectorError> {
        let settings = settings.unwrap_or_default();
        debug!("Creating Event Collector with settings: {:?}", settings);

        info!("Initializing gilrs controller interface");
        let gilrs = match Gilrs::new() {
            Ok(g) => {
                info!("Successfully initialized gilrs");
                g
            }
            Err(e) => {
                error!("Failed to initialize gilrs: {}", e);
                return Err(CollectorError::InitializationError(e.to_string()));
            }
        };

        Ok(Self::new(
            gilrs,
            None,
            settings,
            event_sender,
            stick_sender,
            HashMap::new(),
            StickSnapshot::default(),
        ))
    }

    // Select a gamepad and transition to Collecting state
    pub fn initialize(mut self) -> Result<EventCollector<Collecting>, CollectorError> {
        info!(
            "Initializing Event Collector with deadzone: {}",
            self.settings.joystick_deadzone
        );

        let gamepads: Vec<(GamepadId, Gamepad<'_>)> = self.gilrs.gamepads().collect();

        if gamepads.is_empty() {
            warn!("No gamepad connected, continuing in idle mode");
        } else {
            info!("Found {} gamepads:", gamepads.len());
            for (idx, (id, gamepad)) in gamepads.iter().enumerate() {
                info!("  [{}] ID: {}, Name: {}", idx, id, gamepad.name());
            }
            let (id, gamepad) = &gamepads[0];
            self.active_gamepad = Some(*id);
            info!("Selected gamepad: {} ({})", gamepad.name(), id);
        }

        info!("Event Collector initialized, transitioning to Collecting state");
        Ok(self.transition())
    }
}

// Implementation for Collecting state
impl EventCollector<Collecting> {
    // Drain one gilrs event, normalize it, and forward it
    pub fn collect_next_event(&mut self) -> Result<(), CollectorError> {
        if let Some(Event {
            id, event, time, ..
        }) = self.gilrs.next_event()
        {
            if let Some(active_id) = self.active_gamepad {
                if id != active_id {
                    debug!("Skipping event from non-active gamepad: {:?}", id);
                    return Ok(());
                }
            }

            debug!("Processing gilrs event: {:?} at time: {:?}", event, time);

            if let Some(raw_event) = self.convert_gilrs_event(event) {
                match &raw_event {
                    RawInputEvent::ButtonPressed { button, .. } => {
                        info!(
                            "Button pressed: {:?} at {}",
                            button,
                            Local::now().format("%H:%M:%S.%3f")
                        );
                    }
                    RawInputEvent::ButtonReleased { button, held, .. } => {
                        info!("Button released: {:?} after {:.0?}", button, held);
                    }
                    _ => debug!("Captured event: {:?}", raw_event),
                }

                match self.event_sender.try_send(raw_event) {
                    Ok(_) => debug!("Event sent to engine queue"),
                    Err(e) => {
                        error!("Failed to send event to engine: {}", e);
                        return Err(CollectorError::EventSendError(e.to_string()));
                    }
                }
            }
        }

        Ok(())
    }

    // Run the collector in a loop until cancelled
    pub fn run_collection_loop(&mut self, shutdown: CancellationToken) {
        info!("Starting Event Collector loop");

        // For performance monitoring
        let mut event_count = 0;
        let mut last_log_time = Local::now();
        let log_interval = chrono::Duration::seconds(10);

        while !shutdown.is_cancelled() {
            if let Err(e) = self.collect_next_event() {
                error!("Error collecting event: {}", e);
                // Continue despite errors to maintain the loop
            } else {
                event_count += 1;
            }

            let now = Local::now();
            if now - last_log_time > log_interval {
                info!(
                    "Event Collector stats: {} poll cycles in last {} seconds",
                    event_count,
                    log_interval.num_seconds()
                );
                event_count = 0;
                last_log_time = now;
            }

            // Small sleep to prevent 100% CPU usage
            std::thread::sleep(std::time::Duration::from_micros(100));
        }

        info!("Event Collector loop cancelled");
    }

    // Normalize a gilrs event; axis changes update the shared snapshot
    // instead of producing a discrete event.
    fn convert_gilrs_event(&mut self, event: EventType) -> Option<RawInputEvent> {
        let now = Instant::now();

        match event {
            EventType::AxisChanged(axis, value, _) => {
                let value = apply_deadzone(value, self.settings.joystick_deadzone);
                match axis {
                    Axis::LeftStickX => self.snapshot.left_x = value,
                    Axis::LeftStickY => self.snapshot.left_y = value,
                    Axis::RightStickX => self.snapshot.right_x = value,
                    Axis::RightStickY => self.snapshot.right_y = value,
                    _ => {
                        debug!("Ignoring unsupported axis: {:?}", axis);
                        return None;
                    }
                }
                if self.stick_sender.send(self.snapshot).is_err() {
                    debug!("No polling loop subscribed to stick snapshot");
                }
                None
            }
            EventType::ButtonPressed(button, _) => map_button(button).map(|button| {
                self.press_instants.insert(button, now);
                RawInputEvent::ButtonPressed {
                    button,
                    timestamp: now,
                }
            }),
            EventType::ButtonReleased(button, _) => map_button(button).map(|button| {
                let held = self
                    .press_instants
                    .remove(&button)
                    .map(|pressed_at| now.duration_since(pressed_at))
                    .unwrap_or_default();
                RawInputEvent::ButtonReleased {
                    button,
                    held,
                    timestamp: now,
                }
            }),
            EventType::ButtonRepeated(button, _) => {
                debug!("Button repeat ignored: {:?}", button);
                None
            }
            EventType::Connected => {
                info!("Controller connected event detected");
                None
            }
            EventType::Disconnected => {
                warn!("Controller disconnected, resetting engine state");
                self.press_instants.clear();
                self.snapshot = StickSnapshot::default();
                let _ = self.stick_sender.send(self.snapshot);
                Some(RawInputEvent::Disconnected)
            }
            _ => {
                debug!("Unhandled event type: {:?}", event);
                None
            }
        }
    }
}

// Public interface for spawning and running the collector
pub struct CollectorHandle {
    stick_receiver: watch::Receiver<StickSnapshot>,
}

impl CollectorHandle {
    // Create a new collector and spawn its blocking loop
    pub fn spawn(
        settings: Option<CollectorSettings>,
        event_sender: mpsc::Sender<RawInputEvent>,
        shutdown: CancellationToken,
    ) -> Result<Self, CollectorError> {
        info!("Spawning Event Collector with settings: {:?}", settings);

        let (stick_sender, stick_receiver) = watch::channel(StickSnapshot::default());

        let collector = EventCollector::create(settings, event_sender, stick_sender)?;
        info!("Successfully created EventCollector instance");

        // The gilrs poll loop blocks, so it gets a dedicated blocking thread.
        let task_handle = tokio::task::spawn_blocking(move || match collector.initialize() {
            Ok(mut collecting_state) => {
                info!("Event Collector initialization successful, starting collection loop");
                collecting_state.run_collection_loop(shutdown);
            }
            Err(e) => {
                error!("Failed to initialize Event Collector: {}", e);
            }
        });

        debug!("Blocking task spawned with handle: {:?}", task_handle);
        info!("Event Collector successfully started");

        Ok(Self { stick_receiver })
    }

    // Get a receiver for the stick snapshot
    pub fn stick_receiver(&self) -> watch::Receiver<StickSnapshot> {
        self.stick_receiver.clone()
    }
}

// Helper function to map gilrs Button to our ButtonId
fn map_button(button: Button) -> Option<ButtonId> {
    match button {
        Button::South => Some(ButtonId::A),
        Button::East => Some(ButtonId::B),
        Button::West => Some(ButtonId::Y),
        Button::North => Some(ButtonId::X),
        Button::Start => Some(ButtonId::Start),
        Button::Select => Some(ButtonId::Select),
        Button::LeftTrigger => Some(ButtonId::LeftBumper),
        Button::RightTrigger => Some(ButtonId::RightBumper),
        Button::LeftThumb => Some(ButtonId::LeftStick),
        Button::RightThumb => Some(ButtonId::RightStick),
        Button::DPadUp => Some(ButtonId::DPadUp),
        Button::DPadDown => Some(ButtonId::DPadDown),
        Button::DPadLeft => Some(ButtonId::DPadLeft),
        Button::DPadRight => Some(ButtonId::DPadRight),
        Button::Mode => Some(ButtonId::Guide),
        _ => None,
    }
}

// Helper function to apply deadzone to analog stick values
fn apply_deadzone(value: f32, deadzone: f32) -> f32 {
    if value.abs() < deadzone {
        0.0
    } else {
        // Rescale the value to the range outside the deadzone
        let sign = if value < 0.0 { -1.0 } else { 1.0 };
        sign * (value.abs() - deadzone) / (1.0 - deadzone)
    }
}

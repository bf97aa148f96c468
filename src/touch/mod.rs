//! Touchpad gesture recognition
//!
//! Per-finger lifecycle (settle, move, tap/long-tap windows), two-finger
//! pan/pinch disambiguation and post-lift momentum. All state in here is
//! owned by the engine's serial context; timers re-enter through the
//! engine's registry.

pub mod momentum;
pub mod recognizer;

pub use momentum::{Momentum, MomentumTick};
pub use recognizer::{TouchContext, TouchRecognizer};

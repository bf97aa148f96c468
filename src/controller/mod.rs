//! Controller subsystem for gamepad input handling
//!
//! Two independent producers feed the classification engine:
//!
//! 1. [`event_collector`] - Raw gamepad input, normalized to button
//!    press/release events with monotonic timestamps; stick positions are
//!    published as a shared snapshot.
//! 2. [`polling`] - Fixed-rate (120 Hz) sampler that turns the stick
//!    snapshot into continuous pointer/scroll output.
//!
//! # Architecture
//!
//! ```text
//! Gamepad ──► Collector ──► Engine ingress (discrete events)
//!                 │
//!                 └──watch──► Polling Loop ──► Output Sink (motion)
//! ```
//!
//! The collector runs on a blocking thread; the polling loop is a tokio
//! task with its own filter state, disjoint from everything the engine owns.

pub mod event_collector;
pub mod polling;

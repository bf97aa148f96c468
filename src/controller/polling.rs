//! Fixed-rate joystick polling loop
//!
//! Samples the latest stick snapshot at 120 Hz and drives the sole source
//! of continuous pointer/scroll output while no gesture is in progress.
//! Each stick owns its pair of motion filter instances; this state is
//! strictly disjoint from everything the engine owns, so the loop runs on
//! its own cadence without marshaling.

use crate::config::Tunables;
use crate::controller::event_collector::StickSnapshot;
use crate::engine::RoutingState;
use crate::filter::MotionFilter;
use crate::mapping::profile::{Profile, StickMode};
use crate::mapping::Action;
use crate::output::{Dispatcher, OutputCommand};
use chrono::Local;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum StickDirection {
    Up,
    Down,
    Left,
    Right,
}

/// Per-stick filter pair and directional-repeat bookkeeping.
struct StickChannel {
    filter_x: MotionFilter,
    filter_y: MotionFilter,
    direction: Option<StickDirection>,
    last_repeat: Instant,
}

impl StickChannel {
    fn new(tunables: &Tunables) -> Self {
        Self {
            filter_x: MotionFilter::new(tunables.pointer_filter),
            filter_y: MotionFilter::new(tunables.pointer_filter),
            direction: None,
            last_repeat: Instant::now(),
        }
    }

    fn drive(
        &mut self,
        mode: &StickMode,
        x: f32,
        y: f32,
        dt: f64,
        now: Instant,
        tunables: &Tunables,
        out: &Dispatcher,
    ) {
        match mode {
            StickMode::Pointer => {
                let fx = self.filter_x.filter(f64::from(x), dt);
                let fy = self.filter_y.filter(f64::from(y), dt);
                let dx = fx * tunables.stick_pointer_speed * dt;
                // Stick Y is positive-up, screen Y is positive-down.
                let dy = -fy * tunables.stick_pointer_speed * dt;
                if dx.abs() > 1e-9 || dy.abs() > 1e-9 {
                    out.send(OutputCommand::MoveCursor { dx, dy });
                }
            }
            StickMode::Scroll => {
                let fx = self.filter_x.filter(f64::from(x), dt);
                let fy = self.filter_y.filter(f64::from(y), dt);
                let dx = fx * tunables.stick_scroll_speed * dt;
                let dy = -fy * tunables.stick_scroll_speed * dt;
                if dx.abs() > 1e-9 || dy.abs() > 1e-9 {
                    out.send(OutputCommand::Scroll {
                        dx,
                        dy,
                        momentum: false,
                    });
                }
            }
            StickMode::DirectionalKeys {
                up,
                down,
                left,
                right,
            } => {
                let direction = dominant_direction(x, y, tunables.stick_direction_threshold);
                match (self.direction, direction) {
                    (_, None) => self.direction = None,
                    (Some(current), Some(next)) if current == next => {
                        if now.duration_since(self.last_repeat) >= tunables.stick_direction_repeat {
                            out.send(OutputCommand::Execute(
                                direction_action(next, up, down, left, right).clone(),
                            ));
                            self.last_repeat = now;
                        }
                    }
                    (_, Some(next)) => {
                        out.send(OutputCommand::Execute(
                            direction_action(next, up, down, left, right).clone(),
                        ));
                        self.direction = Some(next);
                        self.last_repeat = now;
                    }
                }
            }
            StickMode::Disabled => {}
        }
    }
}

/// Dominant axis wins; below the threshold the stick is centered.
fn dominant_direction(x: f32, y: f32, threshold: f32) -> Option<StickDirection> {
    if x.abs() < threshold && y.abs() < threshold {
        return None;
    }
    if x.abs() >= y.abs() {
        Some(if x > 0.0 {
            StickDirection::Right
        } else {
            StickDirection::Left
        })
    } else {
        Some(if y > 0.0 {
            StickDirection::Up
        } else {
            StickDirection::Down
        })
    }
}

fn direction_action<'a>(
    direction: StickDirection,
    up: &'a Action,
    down: &'a Action,
    left: &'a Action,
    right: &'a Action,
) -> &'a Action {
    match direction {
        StickDirection::Up => up,
        StickDirection::Down => down,
        StickDirection::Left => left,
        StickDirection::Right => right,
    }
}

/// Spawns the polling task. `captured_right_stick` receives raw right-stick
/// samples whenever the routing state marks the stick as captured by the
/// command wheel or an active gesture.
pub fn spawn_polling_loop(
    tunables: Tunables,
    profile_receiver: watch::Receiver<Arc<Profile>>,
    stick_receiver: watch::Receiver<StickSnapshot>,
    routing_receiver: watch::Receiver<RoutingState>,
    out: Dispatcher,
    captured_right_stick: Option<mpsc::Sender<(f32, f32)>>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    info!(
        "Spawning joystick polling loop at {:.0} Hz",
        1.0 / tunables.poll_interval.as_secs_f64()
    );
    tokio::spawn(run_polling_loop(
        tunables,
        profile_receiver,
        stick_receiver,
        routing_receiver,
        out,
        captured_right_stick,
        shutdown,
    ))
}

async fn run_polling_loop(
    tunables: Tunables,
    profile_receiver: watch::Receiver<Arc<Profile>>,
    stick_receiver: watch::Receiver<StickSnapshot>,
    routing_receiver: watch::Receiver<RoutingState>,
    out: Dispatcher,
    captured_right_stick: Option<mpsc::Sender<(f32, f32)>>,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(tunables.poll_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let mut left = StickChannel::new(&tunables);
    let mut right = StickChannel::new(&tunables);
    let mut last_tick = Instant::now();

    // For performance monitoring
    let mut ticks = 0u64;
    let mut last_log_time = Local::now();
    let log_interval = chrono::Duration::seconds(30);

    info!("Polling loop started");
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.cancelled() => {
                info!("Polling loop cancelled");
                break;
            }
        }

        let now = Instant::now();
        let dt = now.duration_since(last_tick).as_secs_f64();
        last_tick = now;

        let snapshot = *stick_receiver.borrow();
        let routing = *routing_receiver.borrow();
        let profile = profile_receiver.borrow().clone();

        left.drive(
            &profile.left_stick,
            snapshot.left_x,
            snapshot.left_y,
            dt,
            now,
            &tunables,
            &out,
        );

        // Routing is decided once per tick: while a two-finger gesture or
        // the command wheel is engaged, the right stick feeds that mode
        // instead of its normal mapping.
        if routing.right_stick_captured() {
            if let Some(capture) = &captured_right_stick {
                let _ = capture.try_send((snapshot.right_x, snapshot.right_y));
            }
        } else {
            right.drive(
                &profile.right_stick,
                snapshot.right_x,
                snapshot.right_y,
                dt,
                now,
                &tunables,
                &out,
            );
        }

        ticks += 1;
        let log_now = Local::now();
        if log_now - last_log_time > log_interval {
            debug!(
                "Polling loop stats: {} ticks in last {} seconds",
                ticks,
                log_interval.num_seconds()
            );
            ticks = 0;
            last_log_time = log_now;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn centered_stick_has_no_direction() {
        assert_eq!(dominant_direction(0.0, 0.0, 0.6), None);
        assert_eq!(dominant_direction(0.5, 0.5, 0.6), None);
    }

    #[test]
    fn dominant_axis_wins() {
        assert_eq!(
            dominant_direction(0.9, 0.2, 0.6),
            Some(StickDirection::Right)
        );
        assert_eq!(
            dominant_direction(-0.9, 0.3, 0.6),
            Some(StickDirection::Left)
        );
        assert_eq!(dominant_direction(0.1, 0.95, 0.6), Some(StickDirection::Up));
        assert_eq!(
            dominant_direction(0.2, -0.8, 0.6),
            Some(StickDirection::Down)
        );
    }
}

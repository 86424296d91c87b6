use std::time::{Duration, Instant};

/// Length of a measurement window
pub const REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Below this fraction of the target rate the pacer throttles
pub const THROTTLE_BELOW: f64 = 0.7;
/// Above this fraction of the target rate the pacer recovers
pub const RECOVER_ABOVE: f64 = 1.2;

const DECAY: f64 = 0.9;
const GROWTH: f64 = 1.05;
pub const MIN_SCALE: f64 = 0.5;
pub const MAX_SCALE: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacerState {
    Normal,
    Throttled,
}

/// Snapshot of the pacer's measurements
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerformanceState {
    pub target_fps: u32,
    /// Admitted frames in the last complete window
    pub measured_fps: u32,
    /// Working resolution ratio in [0.5, 1.0]
    pub scale_factor: f64,
    pub state: PacerState,
}

/// Admission control and adaptive resolution
///
/// Admits at most one cycle per `1 / target_fps` and, once per window,
/// shrinks the working resolution when the achieved rate falls well below
/// target and grows it back slowly when the rate is comfortably above it.
/// State transitions happen only at window boundaries.
#[derive(Debug)]
pub struct FramePacer {
    frame_interval: Duration,
    last_admitted: Option<Instant>,
    frame_counter: u32,
    last_report: Option<Instant>,
    perf: PerformanceState,
}

impl FramePacer {
    pub fn new(target_fps: u32) -> Self {
        let target_fps = target_fps.max(1);
        Self {
            frame_interval: Duration::from_secs(1) / target_fps,
            last_admitted: None,
            frame_counter: 0,
            last_report: None,
            perf: PerformanceState {
                target_fps,
                measured_fps: 0,
                scale_factor: MAX_SCALE,
                state: PacerState::Normal,
            },
        }
    }

    /// Whether a cycle may run at `now`; counts the frame when admitted
    pub fn should_admit(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last_admitted {
            if now.saturating_duration_since(last) < self.frame_interval {
                return false;
            }
        }

        self.last_admitted = Some(now);
        self.frame_counter += 1;
        true
    }

    /// Close the measurement window if a full interval has passed
    ///
    /// The first call only starts the report clock. Returns the new state when
    /// a window was closed.
    pub fn report(&mut self, now: Instant) -> Option<PerformanceState> {
        let Some(last) = self.last_report else {
            self.last_report = Some(now);
            return None;
        };

        if now.saturating_duration_since(last) < REPORT_INTERVAL {
            return None;
        }

        self.last_report = Some(now);
        self.perf.measured_fps = self.frame_counter;
        self.frame_counter = 0;
        self.adjust_quality();

        Some(self.perf)
    }

    fn adjust_quality(&mut self) {
        let measured = self.perf.measured_fps as f64;
        let target = self.perf.target_fps as f64;
        let previous = self.perf.state;

        if measured < target * THROTTLE_BELOW {
            self.perf.state = PacerState::Throttled;
            self.perf.scale_factor = (self.perf.scale_factor * DECAY).max(MIN_SCALE);
        } else if measured > target * RECOVER_ABOVE {
            self.perf.state = PacerState::Normal;
            self.perf.scale_factor = (self.perf.scale_factor * GROWTH).min(MAX_SCALE);
        }

        if self.perf.state != previous {
            tracing::info!(
                "Pacer {:?} -> {:?} at {} fps (target {}), scale {:.2}",
                previous,
                self.perf.state,
                self.perf.measured_fps,
                self.perf.target_fps,
                self.perf.scale_factor
            );
        } else {
            tracing::debug!(
                "Pacer window: {} fps, scale {:.2}",
                self.perf.measured_fps,
                self.perf.scale_factor
            );
        }
    }

    /// Working resolution for a source of `width`x`height`
    pub fn optimized_dimensions(&self, width: u32, height: u32) -> (u32, u32) {
        let scale = self.perf.scale_factor;
        (
            ((width as f64 * scale).round() as u32).max(1),
            ((height as f64 * scale).round() as u32).max(1),
        )
    }

    pub fn measured_fps(&self) -> u32 {
        self.perf.measured_fps
    }

    pub fn scale_factor(&self) -> f64 {
        self.perf.scale_factor
    }

    pub fn is_throttled(&self) -> bool {
        self.perf.state == PacerState::Throttled
    }

    pub fn state(&self) -> PerformanceState {
        self.perf
    }

    #[cfg(test)]
    fn frame_interval(&self) -> Duration {
        self.frame_interval
    }
}

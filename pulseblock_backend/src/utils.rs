// The "utils" module holds float-grid helpers and the tick timer used for timing logs
use std::time::Instant;

use ndarray::Array1;

/// Relative tolerance (in units of one grid step) used when converting times to grid indices.
///
/// Times such as `20e-9 + 10e-9` are not exact multiples of `1e-9` in binary floating point, so a
/// plain `floor(t / t_step)` would sometimes land one sample early.
pub const GRID_TOL: f64 = 1e-6;

/// Returns `floor(t / t_step)`, tolerant to float round-off just below an integer.
///
/// Negative times map to step 0. Returns `None` if the step count does not fit into `usize`.
pub fn floor_steps(t: f64, t_step: f64) -> Option<usize> {
    let steps = (t / t_step + GRID_TOL).floor();
    if steps.is_nan() || steps >= usize::MAX as f64 {
        None
    } else if steps <= 0. {
        Some(0)
    } else {
        Some(steps as usize)
    }
}

/// Ascending time grid of `n_pts` points, uniformly spaced by `t_step`, starting at 0.
pub fn time_grid(n_pts: usize, t_step: f64) -> Array1<f64> {
    Array1::from_shape_fn(n_pts, |i| i as f64 * t_step)
}

// Utility class for time-tracking
pub struct TickTimer {
    last: Instant,
}

impl Default for TickTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl TickTimer {
    pub fn new() -> Self {
        Self {
            last: Instant::now(),
        }
    }

    /// Milliseconds elapsed since the previous tick (or construction)
    pub fn tick(&mut self) -> f64 {
        let now = Instant::now();
        let diff = now.duration_since(self.last).as_secs_f64() * 1e3;
        self.last = now;
        diff
    }

    pub fn tick_log(&mut self, msg: &str) -> f64 {
        let diff = self.tick();
        log::debug!("{}: {:.3} ms", msg, diff);
        diff
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn floor_steps_tolerates_roundoff() {
        let t_step = 1. / 1e9;
        // 30e-9 / 1e-9 evaluates to 29.999999999999996
        assert_eq!(floor_steps(30e-9, t_step), Some(30));
        assert_eq!(floor_steps(20e-9 + 10e-9, t_step), Some(30));
        assert_eq!(floor_steps(0.5e-9, t_step), Some(0));
        assert_eq!(floor_steps(0., t_step), Some(0));
        assert_eq!(floor_steps(-2., 1.), Some(0));
    }

    #[test]
    fn floor_steps_out_of_range() {
        assert_eq!(floor_steps(1e20, 1.), None);
        assert_eq!(floor_steps(f64::INFINITY, 1.), None);
        assert_eq!(floor_steps(f64::NAN, 1.), None);
        assert_eq!(floor_steps(1e15, 1.), Some(1_000_000_000_000_000));
    }

    #[test]
    fn grid() {
        let t = time_grid(4, 0.5);
        assert_eq!(t.to_vec(), vec![0., 0.5, 1., 1.5]);
        assert!(time_grid(0, 1.).is_empty());
    }

    #[test]
    fn tick_is_monotone() {
        let mut timer = TickTimer::new();
        assert!(timer.tick() >= 0.);
        assert!(timer.tick_log("noop") >= 0.);
    }
}

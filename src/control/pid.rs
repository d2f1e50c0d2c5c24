//! PID controller for boiler temperature
//!
//! Output is a heating power fraction in 0.0–1.0.  The integral
//! accumulates the raw error once per call and is clamped (anti-windup)
//! before scaling.  The derivative acts on the measurement rather than
//! the error, so a target change produces no output kick.

use crate::config::PidGains;

/// PID controller
#[derive(Debug, Clone)]
pub struct PidController {
    gains: PidGains,
    i_min: f64,
    i_max: f64,
    i_state: f64,
    prev_measurement: Option<f64>,
}

impl PidController {
    pub fn new(gains: PidGains, i_min: f64, i_max: f64) -> Self {
        Self {
            gains,
            i_min,
            i_max,
            i_state: 0.0,
            prev_measurement: None,
        }
    }

    pub fn gains(&self) -> PidGains {
        self.gains
    }

    /// Swap gains without touching the accumulated state.
    pub fn set_gains(&mut self, gains: PidGains) {
        self.gains = gains;
    }

    /// Compute output for one period.
    pub fn compute(&mut self, target: f64, measurement: f64) -> f64 {
        let error = target - measurement;

        // Proportional
        let p = self.gains.p * error;

        // Integral (clamped accumulator)
        self.i_state = (self.i_state + error).clamp(self.i_min, self.i_max);
        let i = self.gains.i * self.i_state;

        // Derivative on measurement; zero on the first sample
        let prev = self.prev_measurement.unwrap_or(measurement);
        let d = self.gains.d * (prev - measurement);
        self.prev_measurement = Some(measurement);

        (p + i + d).clamp(0.0, 1.0)
    }

    pub fn integral(&self) -> f64 {
        self.i_state
    }

    /// Reset controller state
    pub fn reset(&mut self) {
        self.i_state = 0.0;
        self.prev_measurement = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid() -> PidController {
        PidController::new(PidGains::new(0.07, 0.05, 0.90), 0.0, 1.0)
    }

    #[test]
    fn cold_boiler_saturates_high() {
        let mut c = pid();
        assert_eq!(c.compute(93.0, 20.0), 1.0);
    }

    #[test]
    fn overshoot_saturates_low() {
        let mut c = pid();
        assert_eq!(c.compute(93.0, 110.0), 0.0);
        assert_eq!(c.integral(), 0.0);
    }

    #[test]
    fn integral_is_clamped() {
        let mut c = pid();
        for _ in 0..100 {
            c.compute(93.0, 90.0);
        }
        assert_eq!(c.integral(), 1.0);
    }

    #[test]
    fn derivative_opposes_rising_temperature() {
        let mut c = PidController::new(PidGains::new(0.0, 0.0, 1.0), 0.0, 1.0);
        assert_eq!(c.compute(93.0, 90.0), 0.0);
        // Falling measurement pushes output up.
        assert!((c.compute(93.0, 89.5) - 0.5).abs() < 1e-12);
        // Rising measurement pulls it down (clamped at 0).
        assert_eq!(c.compute(93.0, 91.0), 0.0);
    }

    #[test]
    fn target_change_does_not_kick_derivative() {
        let mut c = PidController::new(PidGains::new(0.0, 0.0, 1.0), 0.0, 1.0);
        c.compute(93.0, 92.0);
        assert_eq!(c.compute(125.0, 92.0), 0.0);
    }

    #[test]
    fn near_target_output_is_proportional_plus_integral() {
        let mut c = pid();
        let out = c.compute(93.0, 92.0);
        // p = 0.07, i = 0.05 * 1.0, d = 0 on first sample
        assert!((out - 0.12).abs() < 1e-12, "{out}");
    }

    #[test]
    fn reset_clears_state() {
        let mut c = pid();
        c.compute(93.0, 92.0);
        c.reset();
        assert_eq!(c.integral(), 0.0);
        let mut fresh = pid();
        assert_eq!(c.compute(93.0, 80.0), fresh.compute(93.0, 80.0));
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn integral_and_output_stay_bounded(
            p in 0.0f64..5.0,
            i in 0.0f64..5.0,
            d in 0.0f64..5.0,
            i_min in -2.0f64..0.0,
            i_span in 0.0f64..3.0,
            target in 20.0f64..130.0,
            readings in proptest::collection::vec(0.5f64..150.0, 1..60),
        ) {
            let i_max = i_min + i_span;
            let mut c = PidController::new(PidGains::new(p, i, d), i_min, i_max);
            for m in readings {
                let out = c.compute(target, m);
                prop_assert!((0.0..=1.0).contains(&out));
                prop_assert!(c.integral() >= i_min && c.integral() <= i_max);
            }
        }
    }
}

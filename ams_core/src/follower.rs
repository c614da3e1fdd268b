//! Closed-loop follower control.
//!
//! The follower motor holds buffer pressure inside the bound sensor's
//! [lower, upper] band; the PID target is the band midpoint. The
//! computation is pure and cannot fail — the engine disables it (by not
//! applying its output) when the hub has no fed lane or a fault is
//! latched, rather than the controller failing itself.

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PidGains {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
}

/// Band-midpoint PID producing normalized follower current in [0, 1].
///
/// Proportional term dominates in practice; ki/kd default to 0 but are
/// supported. The integral is clamped so its contribution alone can
/// never exceed the output range (anti-windup).
#[derive(Debug, Clone)]
pub struct FollowerPid {
    gains: PidGains,
    lower: f32,
    upper: f32,
    integral: f32,
    prev_err: Option<f32>,
}

impl FollowerPid {
    pub fn new(gains: PidGains, lower: f32, upper: f32) -> Self {
        Self {
            gains,
            lower,
            upper,
            integral: 0.0,
            prev_err: None,
        }
    }

    /// Band midpoint the controller regulates toward.
    #[inline]
    pub fn target(&self) -> f32 {
        (self.lower + self.upper) / 2.0
    }

    /// Pressure band bounds.
    #[inline]
    pub fn band(&self) -> (f32, f32) {
        (self.lower, self.upper)
    }

    /// Whether `pressure` sits inside the target band.
    #[inline]
    pub fn in_band(&self, pressure: f32) -> bool {
        (self.lower..=self.upper).contains(&pressure)
    }

    /// One controller update. `dt_ms` is the time since the previous
    /// update; a zero dt skips the integral/derivative terms.
    pub fn update(&mut self, pressure: f32, dt_ms: u64) -> f32 {
        // Pressure below target means the buffer is starved: feed more.
        let err = self.target() - pressure;
        let dt_s = (dt_ms as f32) / 1000.0;

        let mut out = self.gains.kp * err;

        if self.gains.ki > 0.0 && dt_s > 0.0 {
            self.integral += err * dt_s;
            let limit = 1.0 / self.gains.ki;
            self.integral = self.integral.clamp(-limit, limit);
            out += self.gains.ki * self.integral;
        }

        if self.gains.kd > 0.0 && dt_s > 0.0 {
            if let Some(prev) = self.prev_err {
                out += self.gains.kd * (err - prev) / dt_s;
            }
        }
        self.prev_err = Some(err);

        out.clamp(0.0, 1.0)
    }

    /// Clear integral and derivative history (fresh engagement).
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.prev_err = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(kp: f32, ki: f32, kd: f32) -> FollowerPid {
        FollowerPid::new(PidGains { kp, ki, kd }, 0.35, 0.65)
    }

    #[test]
    fn target_is_band_midpoint() {
        assert!((pid(6.0, 0.0, 0.0).target() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn starved_buffer_commands_feeding() {
        let mut p = pid(6.0, 0.0, 0.0);
        let out = p.update(0.2, 1000);
        assert!(out > 0.0);
        // kp * (0.5 - 0.2) = 1.8 -> clamped
        assert_eq!(out, 1.0);
    }

    #[test]
    fn pressure_at_target_commands_nothing() {
        let mut p = pid(6.0, 0.0, 0.0);
        assert_eq!(p.update(0.5, 1000), 0.0);
    }

    #[test]
    fn over_pressure_clamps_to_zero() {
        let mut p = pid(6.0, 0.0, 0.0);
        assert_eq!(p.update(0.9, 1000), 0.0);
    }

    #[test]
    fn integral_is_bounded() {
        let mut p = pid(0.0, 0.5, 0.0);
        // Persistent error must not wind the integral past the output range.
        for _ in 0..10_000 {
            let out = p.update(0.0, 1000);
            assert!((0.0..=1.0).contains(&out));
        }
    }

    #[test]
    fn reset_clears_history() {
        let mut p = pid(1.0, 0.5, 0.2);
        p.update(0.2, 1000);
        p.update(0.3, 1000);
        p.reset();
        let a = p.update(0.4, 1000);
        let mut fresh = pid(1.0, 0.5, 0.2);
        let b = fresh.update(0.4, 1000);
        assert!((a - b).abs() < 1e-6);
    }

    #[test]
    fn in_band_check() {
        let p = pid(6.0, 0.0, 0.0);
        assert!(p.in_band(0.5));
        assert!(p.in_band(0.35));
        assert!(!p.in_band(0.34));
        assert!(!p.in_band(0.66));
    }
}

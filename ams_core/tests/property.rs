//! Property-based checks for the pure pieces of the engine.

use ams_config::RetryCfg;
use ams_core::follower::{FollowerPid, PidGains};
use ams_core::orchestrate::RetrySchedule;
use proptest::prelude::*;

fn retry_cfg(backoff_ms: u64, max_backoff_ms: u64, max_attempts: u32) -> RetryCfg {
    RetryCfg {
        max_attempts,
        backoff_ms,
        max_backoff_ms,
        ..RetryCfg::default()
    }
}

proptest! {
    /// Backoff delays never decrease with the attempt number and never
    /// exceed the configured cap.
    #[test]
    fn backoff_is_monotone_and_capped(
        backoff in 0u64..10_000,
        extra in 0u64..10_000,
        attempts in 1u32..16,
    ) {
        let cap = backoff + extra;
        let s = RetrySchedule::new(&retry_cfg(backoff, cap, attempts));
        let mut prev = 0u64;
        for attempt in 1..=attempts + 4 {
            let d = s.delay_before(attempt);
            prop_assert!(d >= prev, "delay shrank at attempt {attempt}");
            prop_assert!(d <= cap);
            prev = d;
        }
    }

    /// The follower PID output is always a valid normalized current,
    /// whatever the pressure history looks like.
    #[test]
    fn pid_output_stays_normalized(
        kp in 0.0f32..20.0,
        ki in 0.0f32..2.0,
        kd in 0.0f32..2.0,
        pressures in proptest::collection::vec(0.0f32..=1.0, 1..64),
    ) {
        let mut pid = FollowerPid::new(PidGains { kp, ki, kd }, 0.35, 0.65);
        for p in pressures {
            let out = pid.update(p, 1000);
            prop_assert!((0.0..=1.0).contains(&out), "duty {out} for pressure {p}");
        }
    }

    /// Pressure pinned at the band midpoint commands no current.
    #[test]
    fn pid_is_quiet_at_target(kp in 0.0f32..20.0) {
        let mut pid = FollowerPid::new(PidGains { kp, ki: 0.0, kd: 0.0 }, 0.35, 0.65);
        for _ in 0..8 {
            prop_assert_eq!(pid.update(0.5, 1000), 0.0);
        }
    }
}

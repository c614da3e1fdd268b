//! Load/unload move supervision.
//!
//! A hub move (feeding a lane forward or retracting it) runs in the
//! hub firmware; the engine supervises it from samples: an encoder
//! guard proves filament is actually moving, a settle window proves a
//! load finished cleanly, and a retry schedule spaces out repeat
//! attempts after a failure.

use std::collections::VecDeque;

/// Consecutive encoder readings compared per guard check.
pub const ENCODER_SAMPLES: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardVerdict {
    /// Not enough data yet (grace period or window not full).
    Pending,
    Moving,
    Stalled,
}

/// Watches the hub encoder during a move. Checks start only after a
/// grace period (the motor needs time to tension the filament) and
/// then compare readings one guard period apart; a window whose spread
/// is below the minimum advance means the filament is not moving.
#[derive(Debug)]
pub struct EncoderGuard {
    started_ms: u64,
    guard_after_ms: u64,
    guard_period_ms: u64,
    min_diff: i32,
    last_sample_ms: Option<u64>,
    window: VecDeque<i32>,
}

impl EncoderGuard {
    pub fn new(cfg: &ams_config::RetryCfg, started_ms: u64) -> Self {
        Self {
            started_ms,
            guard_after_ms: cfg.guard_after_ms,
            guard_period_ms: cfg.guard_period_ms,
            min_diff: cfg.min_encoder_diff,
            last_sample_ms: None,
            window: VecDeque::with_capacity(ENCODER_SAMPLES),
        }
    }

    pub fn observe(&mut self, now_ms: u64, clicks: i32) -> GuardVerdict {
        if now_ms < self.started_ms + self.guard_after_ms {
            return GuardVerdict::Pending;
        }
        let due = match self.last_sample_ms {
            None => true,
            Some(last) => now_ms.saturating_sub(last) >= self.guard_period_ms,
        };
        if due {
            if self.window.len() == ENCODER_SAMPLES {
                self.window.pop_front();
            }
            self.window.push_back(clicks);
            self.last_sample_ms = Some(now_ms);
        }
        if self.window.len() < ENCODER_SAMPLES {
            return GuardVerdict::Pending;
        }
        let lo = self.window.iter().copied().min().unwrap_or(0);
        let hi = self.window.iter().copied().max().unwrap_or(0);
        if hi - lo >= self.min_diff {
            GuardVerdict::Moving
        } else {
            GuardVerdict::Stalled
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveKind {
    Load { lane: usize },
    Unload { lane: usize },
}

impl MoveKind {
    pub fn lane(self) -> usize {
        match self {
            Self::Load { lane } | Self::Unload { lane } => lane,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Load { .. } => "load",
            Self::Unload { .. } => "unload",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveFailure {
    Timeout,
    EncoderStalled,
}

impl MoveFailure {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::EncoderStalled => "encoder_stalled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveProgress {
    InFlight,
    Complete,
    Failed(MoveFailure),
}

/// One in-flight load or unload, assessed once per tick.
#[derive(Debug)]
pub struct ActiveMove {
    pub kind: MoveKind,
    pub attempt: u32,
    started_ms: u64,
    move_timeout_ms: u64,
    settle_ms: u64,
    guard: EncoderGuard,
    settle_since: Option<u64>,
}

impl ActiveMove {
    pub fn new(kind: MoveKind, attempt: u32, cfg: &ams_config::RetryCfg, now_ms: u64) -> Self {
        Self {
            kind,
            attempt,
            started_ms: now_ms,
            move_timeout_ms: cfg.move_timeout_ms,
            settle_ms: cfg.settle_ms,
            guard: EncoderGuard::new(cfg, now_ms),
            settle_since: None,
        }
    }

    /// Assess the move against the current sample.
    ///
    /// A load completes when the lane's hub-inlet HES reads present and
    /// pressure has held inside the follower band for the settle
    /// window. An unload completes when the inlet HES clears. A stale
    /// sample keeps the move in flight without restarting the settle
    /// window; the timeout still applies.
    pub fn assess(
        &mut self,
        now_ms: u64,
        encoder_clicks: i32,
        hub_present: bool,
        in_band: bool,
        stale: bool,
    ) -> MoveProgress {
        if now_ms.saturating_sub(self.started_ms) >= self.move_timeout_ms {
            return MoveProgress::Failed(MoveFailure::Timeout);
        }
        if stale {
            return MoveProgress::InFlight;
        }
        match self.kind {
            MoveKind::Load { .. } => {
                if hub_present && in_band {
                    let since = *self.settle_since.get_or_insert(now_ms);
                    if now_ms.saturating_sub(since) >= self.settle_ms {
                        return MoveProgress::Complete;
                    }
                } else {
                    self.settle_since = None;
                }
            }
            MoveKind::Unload { .. } => {
                if !hub_present {
                    return MoveProgress::Complete;
                }
            }
        }
        match self.guard.observe(now_ms, encoder_clicks) {
            GuardVerdict::Stalled => MoveProgress::Failed(MoveFailure::EncoderStalled),
            _ => MoveProgress::InFlight,
        }
    }
}

/// Linear backoff schedule for repeat attempts.
#[derive(Debug, Clone, Copy)]
pub struct RetrySchedule {
    pub max_attempts: u32,
    backoff_ms: u64,
    max_backoff_ms: u64,
}

impl RetrySchedule {
    pub fn new(cfg: &ams_config::RetryCfg) -> Self {
        Self {
            max_attempts: cfg.max_attempts,
            backoff_ms: cfg.backoff_ms,
            max_backoff_ms: cfg.max_backoff_ms,
        }
    }

    /// Delay before attempt number `attempt` (1-based; the first
    /// attempt runs immediately).
    pub fn delay_before(&self, attempt: u32) -> u64 {
        if attempt <= 1 {
            return 0;
        }
        self.backoff_ms
            .saturating_mul(u64::from(attempt - 1))
            .min(self.max_backoff_ms)
    }
}

/// A failed move waiting out its backoff before the next attempt.
#[derive(Debug, Clone, Copy)]
pub struct PendingRetry {
    pub kind: MoveKind,
    /// Attempt number the retry will run as.
    pub attempt: u32,
    pub due_at_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ams_config::RetryCfg;

    fn cfg() -> RetryCfg {
        RetryCfg::default()
    }

    #[test]
    fn guard_waits_out_the_grace_period() {
        let mut g = EncoderGuard::new(&cfg(), 1000);
        assert_eq!(g.observe(1000, 0), GuardVerdict::Pending);
        assert_eq!(g.observe(2000, 0), GuardVerdict::Pending);
        // grace ends at 3000; first window fills one period later
        assert_eq!(g.observe(3000, 10), GuardVerdict::Pending);
        assert_eq!(g.observe(5000, 14), GuardVerdict::Moving);
    }

    #[test]
    fn guard_flags_a_stalled_encoder() {
        let mut g = EncoderGuard::new(&cfg(), 0);
        assert_eq!(g.observe(2000, 42), GuardVerdict::Pending);
        assert_eq!(g.observe(4000, 42), GuardVerdict::Stalled);
    }

    #[test]
    fn guard_samples_on_the_period_only() {
        let mut g = EncoderGuard::new(&cfg(), 0);
        assert_eq!(g.observe(2000, 0), GuardVerdict::Pending);
        // 500ms later: off-period, reading ignored
        assert_eq!(g.observe(2500, 100), GuardVerdict::Pending);
        assert_eq!(g.observe(4000, 0), GuardVerdict::Stalled);
    }

    #[test]
    fn load_completes_after_settle() {
        let mut m = ActiveMove::new(MoveKind::Load { lane: 0 }, 1, &cfg(), 0);
        assert_eq!(m.assess(1000, 5, false, false, false), MoveProgress::InFlight);
        // inlet made, band reached at t=1500
        assert_eq!(m.assess(1500, 9, true, true, false), MoveProgress::InFlight);
        assert_eq!(m.assess(2000, 12, true, true, false), MoveProgress::Complete);
    }

    #[test]
    fn settle_restarts_on_band_exit() {
        let mut m = ActiveMove::new(MoveKind::Load { lane: 0 }, 1, &cfg(), 0);
        assert_eq!(m.assess(1000, 5, true, true, false), MoveProgress::InFlight);
        assert_eq!(m.assess(1300, 9, true, false, false), MoveProgress::InFlight);
        // band regained: the 500ms settle starts over
        assert_eq!(m.assess(1400, 12, true, true, false), MoveProgress::InFlight);
        assert_eq!(m.assess(1900, 15, true, true, false), MoveProgress::Complete);
    }

    #[test]
    fn unload_completes_when_inlet_clears() {
        let mut m = ActiveMove::new(MoveKind::Unload { lane: 2 }, 1, &cfg(), 0);
        assert_eq!(m.assess(1000, -5, true, false, false), MoveProgress::InFlight);
        assert_eq!(m.assess(1500, -9, false, false, false), MoveProgress::Complete);
    }

    #[test]
    fn move_times_out() {
        let mut m = ActiveMove::new(MoveKind::Load { lane: 0 }, 1, &cfg(), 0);
        assert_eq!(
            m.assess(30_000, 0, false, false, false),
            MoveProgress::Failed(MoveFailure::Timeout)
        );
    }

    #[test]
    fn stalled_encoder_fails_the_move() {
        let mut m = ActiveMove::new(MoveKind::Load { lane: 0 }, 1, &cfg(), 0);
        assert_eq!(m.assess(2500, 7, false, false, false), MoveProgress::InFlight);
        assert_eq!(
            m.assess(4500, 7, false, false, false),
            MoveProgress::Failed(MoveFailure::EncoderStalled)
        );
    }

    #[test]
    fn backoff_is_linear_and_capped() {
        let s = RetrySchedule::new(&cfg());
        assert_eq!(s.delay_before(1), 0);
        assert_eq!(s.delay_before(2), 2000);
        assert_eq!(s.delay_before(3), 4000);
        assert_eq!(s.delay_before(10), 8000);
    }
}

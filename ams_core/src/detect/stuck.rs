//! Stuck-spool detection.
//!
//! A jammed spool starves the buffer: the follower cannot rewind or
//! feed, so pressure collapses and stays low while the extruder keeps
//! consuming. The monitor accumulates continuous low-pressure time and
//! latches once the dwell is reached. Any recovery sample resets the
//! dwell to zero; a brief dip never latches.

#[derive(Debug)]
pub struct StuckSpoolMonitor {
    enabled: bool,
    low_pressure: f32,
    dwell_ms: u64,
    /// Accumulated continuous low-pressure time.
    low_accum_ms: u64,
    /// Engine time of the last fresh low sample, None when the clock
    /// is stopped (recovered, idle, or frozen on stale input).
    last_low_at: Option<u64>,
}

impl StuckSpoolMonitor {
    pub fn new(cfg: &ams_config::StuckSpoolCfg) -> Self {
        Self {
            enabled: cfg.enabled,
            low_pressure: cfg.low_pressure,
            dwell_ms: cfg.dwell_ms,
            low_accum_ms: 0,
            last_low_at: None,
        }
    }

    /// Feed one tick. Returns true when the dwell is satisfied and the
    /// fault should latch.
    ///
    /// A stale sample carries no new information: the dwell neither
    /// advances nor resets, it freezes until fresh samples resume.
    pub fn update(&mut self, now_ms: u64, pressure: f32, extruding: bool, stale: bool) -> bool {
        if !self.enabled {
            return false;
        }
        if stale {
            self.last_low_at = None;
            return false;
        }
        if !extruding || pressure >= self.low_pressure {
            self.reset();
            return false;
        }
        if let Some(prev) = self.last_low_at {
            self.low_accum_ms += now_ms.saturating_sub(prev);
        }
        self.last_low_at = Some(now_ms);
        self.low_accum_ms >= self.dwell_ms
    }

    pub fn reset(&mut self) {
        self.low_accum_ms = 0;
        self.last_low_at = None;
    }

    #[cfg(test)]
    fn accumulated_ms(&self) -> u64 {
        self.low_accum_ms
    }
}

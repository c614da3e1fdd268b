//! Runout monitoring.
//!
//! When the spool bay reads empty while its lane is feeding a print,
//! the tail of the filament is still usable: it keeps feeding for a
//! grace distance, then the follower is coasted and the remaining
//! length of the supply line is consumed. Only when the tail is nearly
//! drained does the engine hand over to a group peer (or pause).
//!
//! The monitor tracks extruder consumption, not wall time, so pause
//! and resume of the print cost nothing.

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RunoutState {
    /// Spool present; watching the bay sensor.
    Armed,
    /// Bay empty; still feeding the tail. Holds the extruder position
    /// at detection.
    Detected { detect_pos_mm: f64 },
    /// Follower coasted; draining the supply line. Holds the extruder
    /// position at coast start.
    Coasting { coast_pos_mm: f64 },
}

/// What the engine must do this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunoutAction {
    None,
    /// Disable the follower; the tail has cleared the hub.
    CoastFollower,
    /// The tail is nearly drained: load the next spool now.
    StartReload,
}

/// Tolerance on the coast-budget comparison. The budget comes out of a
/// division, so an exactly-drained tail can otherwise miss the boundary
/// by one ULP.
const COAST_SLOP_MM: f64 = 1e-6;

#[derive(Debug)]
pub struct RunoutMonitor {
    pause_distance_mm: f64,
    /// Usable supply-line length while coasting.
    coast_budget_mm: f64,
    state: RunoutState,
}

impl RunoutMonitor {
    pub fn new(cfg: &ams_config::RunoutCfg, path_length_mm: f64, reload_margin_mm: f64) -> Self {
        let coast_budget_mm =
            (path_length_mm / cfg.path_length_factor - reload_margin_mm).max(0.0);
        Self {
            pause_distance_mm: cfg.pause_distance_mm,
            coast_budget_mm,
            state: RunoutState::Armed,
        }
    }

    pub fn state(&self) -> RunoutState {
        self.state
    }

    /// Feed one tick while the lane is tool-loaded and printing.
    ///
    /// `bay_empty` comes from the hub sample; a stale sample suppresses
    /// new detection but never un-detects, and consumption progress
    /// keeps counting because extruder position comes from the job
    /// port, not the hub.
    pub fn update(&mut self, extruder_pos_mm: f64, bay_empty: bool, stale: bool) -> RunoutAction {
        match self.state {
            RunoutState::Armed => {
                if bay_empty && !stale {
                    self.state = RunoutState::Detected {
                        detect_pos_mm: extruder_pos_mm,
                    };
                }
                RunoutAction::None
            }
            RunoutState::Detected { detect_pos_mm } => {
                if extruder_pos_mm - detect_pos_mm >= self.pause_distance_mm {
                    self.state = RunoutState::Coasting {
                        coast_pos_mm: extruder_pos_mm,
                    };
                    RunoutAction::CoastFollower
                } else {
                    RunoutAction::None
                }
            }
            RunoutState::Coasting { coast_pos_mm } => {
                if extruder_pos_mm - coast_pos_mm >= self.coast_budget_mm - COAST_SLOP_MM {
                    RunoutAction::StartReload
                } else {
                    RunoutAction::None
                }
            }
        }
    }

    /// Back to watching the bay sensor, e.g. after a completed handoff.
    pub fn reset(&mut self) {
        self.state = RunoutState::Armed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ams_config::RunoutCfg;

    fn monitor() -> RunoutMonitor {
        // 1140mm line / 1.14 = 1000mm coast budget, no margin
        RunoutMonitor::new(&RunoutCfg::default(), 1140.0, 0.0)
    }

    #[test]
    fn full_sequence_by_consumption() {
        let mut m = monitor();
        assert_eq!(m.update(500.0, false, false), RunoutAction::None);
        // bay goes empty at 500mm
        assert_eq!(m.update(500.0, true, false), RunoutAction::None);
        assert!(matches!(m.state(), RunoutState::Detected { .. }));
        // tail keeps feeding for the 60mm grace distance
        assert_eq!(m.update(559.0, true, false), RunoutAction::None);
        assert_eq!(m.update(560.0, true, false), RunoutAction::CoastFollower);
        assert!(matches!(m.state(), RunoutState::Coasting { .. }));
        // drain the 1000mm coast budget
        assert_eq!(m.update(1559.0, true, false), RunoutAction::None);
        assert_eq!(m.update(1560.0, true, false), RunoutAction::StartReload);
        // reload keeps being requested until the engine acts
        assert_eq!(m.update(1561.0, true, false), RunoutAction::StartReload);
    }

    #[test]
    fn reload_margin_shrinks_the_coast() {
        let mut m = RunoutMonitor::new(&RunoutCfg::default(), 1140.0, 100.0);
        m.update(0.0, true, false);
        assert_eq!(m.update(60.0, true, false), RunoutAction::CoastFollower);
        assert_eq!(m.update(959.0, true, false), RunoutAction::None);
        assert_eq!(m.update(960.0, true, false), RunoutAction::StartReload);
    }

    #[test]
    fn stale_sample_cannot_arm_detection() {
        let mut m = monitor();
        assert_eq!(m.update(0.0, true, true), RunoutAction::None);
        assert_eq!(m.state(), RunoutState::Armed);
        assert_eq!(m.update(1.0, true, false), RunoutAction::None);
        assert!(matches!(m.state(), RunoutState::Detected { .. }));
    }

    #[test]
    fn detection_is_sticky() {
        let mut m = monitor();
        m.update(0.0, true, false);
        // bay flickers back to present; the tail is already past it
        m.update(10.0, false, false);
        assert!(matches!(m.state(), RunoutState::Detected { .. }));
        m.reset();
        assert_eq!(m.state(), RunoutState::Armed);
    }
}

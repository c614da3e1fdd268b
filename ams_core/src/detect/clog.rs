//! Clog detection.
//!
//! A downstream blockage shows up as sustained extruder consumption
//! with no matching filament movement through the hub encoder, while
//! the buffer pressure sits outside its target band. The monitor
//! anchors a window at an (extruder position, encoder count) pair and
//! re-anchors on any sign of health; if the window survives for the
//! configured consumed distance, the fault latches.

use ams_config::ClogParams;

#[derive(Debug, Clone, Copy)]
struct Window {
    start_pos_mm: f64,
    start_clicks: i32,
}

#[derive(Debug)]
pub struct ClogMonitor {
    params: ClogParams,
    window: Option<Window>,
}

impl ClogMonitor {
    pub fn new(params: ClogParams) -> Self {
        Self {
            params,
            window: None,
        }
    }

    /// Feed one tick while a lane is tool-loaded and printing. Returns
    /// true when the clog condition has held for a full window.
    pub fn update(
        &mut self,
        extruder_pos_mm: f64,
        encoder_clicks: i32,
        pressure: f32,
        target: f32,
        stale: bool,
    ) -> bool {
        if stale {
            return false;
        }

        let w = match self.window {
            Some(w) => w,
            None => {
                self.anchor(extruder_pos_mm, encoder_clicks);
                return false;
            }
        };

        // retract: consumption estimate is void, start over
        if extruder_pos_mm < w.start_pos_mm {
            self.anchor(extruder_pos_mm, encoder_clicks);
            return false;
        }
        // filament moving through the hub: healthy
        if (encoder_clicks - w.start_clicks).abs() > self.params.slack_clicks {
            self.anchor(extruder_pos_mm, encoder_clicks);
            return false;
        }
        // buffer holding its band: the follower is keeping up
        if (pressure - target).abs() <= self.params.pressure_band {
            self.anchor(extruder_pos_mm, encoder_clicks);
            return false;
        }

        extruder_pos_mm - w.start_pos_mm >= self.params.window_mm
    }

    fn anchor(&mut self, pos_mm: f64, clicks: i32) {
        self.window = Some(Window {
            start_pos_mm: pos_mm,
            start_clicks: clicks,
        });
    }

    pub fn reset(&mut self) {
        self.window = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ClogParams {
        ClogParams {
            window_mm: 64.0,
            slack_clicks: 5,
            pressure_band: 0.12,
        }
    }

    #[test]
    fn latches_when_consumption_outruns_encoder() {
        let mut m = ClogMonitor::new(params());
        // stuck encoder, pressure pinned high above target band
        assert!(!m.update(0.0, 100, 0.80, 0.50, false));
        assert!(!m.update(30.0, 101, 0.80, 0.50, false));
        assert!(!m.update(63.0, 102, 0.80, 0.50, false));
        assert!(m.update(64.0, 103, 0.80, 0.50, false));
    }

    #[test]
    fn encoder_movement_re_anchors() {
        let mut m = ClogMonitor::new(params());
        assert!(!m.update(0.0, 100, 0.80, 0.50, false));
        assert!(!m.update(40.0, 100, 0.80, 0.50, false));
        // 6 clicks of advance > 5 slack: window restarts at 50mm
        assert!(!m.update(50.0, 106, 0.80, 0.50, false));
        assert!(!m.update(100.0, 107, 0.80, 0.50, false));
        assert!(m.update(114.0, 108, 0.80, 0.50, false));
    }

    #[test]
    fn in_band_pressure_re_anchors() {
        let mut m = ClogMonitor::new(params());
        assert!(!m.update(0.0, 0, 0.80, 0.50, false));
        assert!(!m.update(40.0, 0, 0.55, 0.50, false));
        assert!(!m.update(64.0, 0, 0.80, 0.50, false));
        assert!(m.update(104.0, 0, 0.80, 0.50, false));
    }

    #[test]
    fn retract_re_anchors() {
        let mut m = ClogMonitor::new(params());
        assert!(!m.update(100.0, 0, 0.80, 0.50, false));
        assert!(!m.update(90.0, 0, 0.80, 0.50, false));
        assert!(!m.update(120.0, 0, 0.80, 0.50, false));
        assert!(m.update(154.0, 0, 0.80, 0.50, false));
    }

    #[test]
    fn stale_samples_do_not_advance_the_window() {
        let mut m = ClogMonitor::new(params());
        assert!(!m.update(0.0, 0, 0.80, 0.50, false));
        assert!(!m.update(200.0, 0, 0.80, 0.50, true));
        assert!(m.update(64.0, 0, 0.80, 0.50, false));
    }
}

//! Raw-frame normalization for the sensor sampler.
//!
//! A [`RawHubSample`] carries uncorrected sensor values; the
//! [`SampleNormalizer`] applies polarity, clamps pressure into [0, 1],
//! and resolves the analog HES channels against their configured
//! trigger levels. Non-finite pressure readings are forced stale so
//! detectors treat them as "no new information".

use ams_config::HubCfg;
use ams_traits::{LANES_PER_HUB, RawHubSample};

/// One normalized telemetry frame for a hub.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HubSample {
    /// Polarity-corrected buffer pressure in [0.0, 1.0].
    pub pressure: f32,
    /// Cumulative follower encoder clicks.
    pub encoder_clicks: i32,
    /// Spool present in bay (per lane).
    pub lane_present: [bool; LANES_PER_HUB],
    /// Filament present at the hub inlet (per lane).
    pub hub_present: [bool; LANES_PER_HUB],
    /// True when this frame carries no new information.
    pub stale: bool,
}

/// Stateless raw→normalized converter, built once per hub from config.
#[derive(Debug, Clone)]
pub struct SampleNormalizer {
    is_reversed: bool,
    lane_on: [f32; LANES_PER_HUB],
    lane_is_above: bool,
    hub_on: [f32; LANES_PER_HUB],
    hub_is_above: bool,
}

impl SampleNormalizer {
    pub fn from_cfg(cfg: &HubCfg) -> Self {
        Self {
            is_reversed: cfg.is_reversed,
            lane_on: cfg.lane_hes_on,
            lane_is_above: cfg.lane_hes_is_above,
            hub_on: cfg.hub_hes_on,
            hub_is_above: cfg.hub_hes_is_above,
        }
    }

    pub fn normalize(&self, raw: &RawHubSample, stale: bool) -> HubSample {
        let (pressure, stale) = if raw.pressure.is_finite() {
            let p = raw.pressure.clamp(0.0, 1.0);
            let p = if self.is_reversed { 1.0 - p } else { p };
            (p, stale)
        } else {
            (0.0, true)
        };

        let mut lane_present = [false; LANES_PER_HUB];
        let mut hub_present = [false; LANES_PER_HUB];
        for i in 0..LANES_PER_HUB {
            lane_present[i] = resolve_hes(raw.lane_hes[i], self.lane_on[i], self.lane_is_above);
            hub_present[i] = resolve_hes(raw.hub_hes[i], self.hub_on[i], self.hub_is_above);
        }

        HubSample {
            pressure,
            encoder_clicks: raw.encoder_clicks,
            lane_present,
            hub_present,
            stale,
        }
    }
}

#[inline]
fn resolve_hes(value: f32, on_level: f32, is_above: bool) -> bool {
    if !value.is_finite() {
        return false;
    }
    if is_above {
        value >= on_level
    } else {
        value <= on_level
    }
}

#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schema for the filament supply monitoring engine.
//!
//! - `Config` and sub-structs are deserialized from TOML and validated.
//! - All hardware description (hub thresholds, HES levels, PID gains,
//!   supply-line geometry) is read once at startup; the engine never
//!   mutates the key space at runtime.

use serde::Deserialize;

/// Number of spool lanes per hub; fixed by the hub mainboard.
pub use ams_traits::LANES_PER_HUB;

/// One supply hub (OAMS-style unit): four lanes, one follower motor,
/// one encoder, one bound pressure sensor.
#[derive(Debug, Deserialize, Clone)]
pub struct HubCfg {
    pub name: String,
    /// Name of the pressure sensor this hub's follower serves (1:1).
    pub fps: String,
    /// Pressure band the follower holds, normalized 0.0–1.0.
    pub upper_threshold: f32,
    pub lower_threshold: f32,
    /// Sensor polarity: when true the raw reading is mirrored (1.0 - x).
    #[serde(default)]
    pub is_reversed: bool,
    /// Per-lane spool-bay HES trigger levels.
    #[serde(default = "default_hes_levels")]
    pub lane_hes_on: [f32; LANES_PER_HUB],
    /// Whether a bay reads "present" above (true) or below the level.
    #[serde(default = "default_true")]
    pub lane_hes_is_above: bool,
    /// Per-lane hub-inlet HES trigger levels.
    #[serde(default = "default_hes_levels")]
    pub hub_hes_on: [f32; LANES_PER_HUB],
    #[serde(default = "default_true")]
    pub hub_hes_is_above: bool,
    /// Supply line (PTFE) length from hub to toolhead, millimeters.
    pub path_length_mm: f64,
    /// Rewind/follower PID gains; proportional-dominant by default.
    #[serde(default = "default_kp")]
    pub kp: f32,
    #[serde(default)]
    pub ki: f32,
    #[serde(default)]
    pub kd: f32,
}

fn default_true() -> bool {
    true
}

fn default_hes_levels() -> [f32; LANES_PER_HUB] {
    [0.5; LANES_PER_HUB]
}

fn default_kp() -> f32 {
    6.0
}

/// One filament pressure sensor, bound 1:1 to an extruder and a hub.
#[derive(Debug, Deserialize, Clone)]
pub struct FpsCfg {
    pub name: String,
    /// Extruder whose consumption this sensor's buffer feeds.
    pub extruder: String,
    /// Reload this far (mm) before the supply line is fully drained.
    #[serde(default)]
    pub reload_margin_mm: f64,
}

/// A material group: ordered list of (hub, lane) pairs that carry the
/// same filament. Runout handoff walks this list in order.
#[derive(Debug, Deserialize, Clone)]
pub struct GroupCfg {
    pub name: String,
    /// Entries are `[hub_name, lane_index]`.
    pub lanes: Vec<(String, usize)>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EngineCfg {
    /// Monitoring tick interval per hub, milliseconds.
    pub tick_ms: u64,
    /// Sample older than this is treated as stale (no new information).
    pub stale_after_ms: u64,
    /// Per-sample read timeout against the hub port, milliseconds.
    pub sample_timeout_ms: u64,
}

impl Default for EngineCfg {
    fn default() -> Self {
        Self {
            tick_ms: 1000,
            stale_after_ms: 3000,
            sample_timeout_ms: 150,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RunoutCfg {
    /// Extruder-consumed distance to keep feeding after the bay reads
    /// empty, before the follower is coasted.
    pub pause_distance_mm: f64,
    /// Divisor applied to `path_length_mm` when estimating usable line
    /// length during coasting.
    pub path_length_factor: f64,
}

impl Default for RunoutCfg {
    fn default() -> Self {
        Self {
            pause_distance_mm: 60.0,
            path_length_factor: 1.14,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StuckSpoolCfg {
    pub enabled: bool,
    /// Pressure below this while extruding counts toward the dwell.
    pub low_pressure: f32,
    /// Continuous low-pressure time required to latch, milliseconds.
    pub dwell_ms: u64,
}

impl Default for StuckSpoolCfg {
    fn default() -> Self {
        Self {
            enabled: true,
            low_pressure: 0.08,
            dwell_ms: 8000,
        }
    }
}

/// Detection-latency / false-positive trade-off presets for the clog
/// monitor. Numeric boundaries are deployment-tunable via `[clog]`
/// overrides; these are the defaults per preset.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ClogSensitivity {
    Low,
    #[default]
    Medium,
    High,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ClogCfg {
    pub enabled: bool,
    pub sensitivity: ClogSensitivity,
    /// Override the preset's consumed-distance window (mm).
    pub window_mm: Option<f64>,
    /// Override the preset's allowed encoder slack (clicks).
    pub slack_clicks: Option<i32>,
    /// Override the preset's pressure band half-width around target.
    pub pressure_band: Option<f32>,
}

impl Default for ClogCfg {
    fn default() -> Self {
        Self {
            enabled: false,
            sensitivity: ClogSensitivity::Medium,
            window_mm: None,
            slack_clicks: None,
            pressure_band: None,
        }
    }
}

/// Effective clog-monitor parameters after preset + overrides.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClogParams {
    pub window_mm: f64,
    pub slack_clicks: i32,
    pub pressure_band: f32,
}

impl ClogCfg {
    pub fn params(&self) -> ClogParams {
        let preset = match self.sensitivity {
            ClogSensitivity::Low => ClogParams {
                window_mm: 120.0,
                slack_clicks: 8,
                pressure_band: 0.15,
            },
            ClogSensitivity::Medium => ClogParams {
                window_mm: 64.0,
                slack_clicks: 5,
                pressure_band: 0.12,
            },
            ClogSensitivity::High => ClogParams {
                window_mm: 32.0,
                slack_clicks: 3,
                pressure_band: 0.10,
            },
        };
        ClogParams {
            window_mm: self.window_mm.unwrap_or(preset.window_mm),
            slack_clicks: self.slack_clicks.unwrap_or(preset.slack_clicks),
            pressure_band: self.pressure_band.unwrap_or(preset.pressure_band),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetryCfg {
    /// Load/unload attempts before escalating to a fault.
    pub max_attempts: u32,
    /// Fixed delay before each retry, milliseconds.
    pub backoff_ms: u64,
    /// Upper bound on the total per-attempt delay (linear, not
    /// exponential).
    pub max_backoff_ms: u64,
    /// Abort a single load/unload move after this long, milliseconds.
    pub move_timeout_ms: u64,
    /// Encoder-advance guard starts this long after the move begins.
    pub guard_after_ms: u64,
    /// Guard sampling period, milliseconds.
    pub guard_period_ms: u64,
    /// Minimum encoder advance (clicks) per guard window.
    pub min_encoder_diff: i32,
    /// Pressure must hold inside the target band this long before a
    /// load is considered complete.
    pub settle_ms: u64,
}

impl Default for RetryCfg {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 2000,
            max_backoff_ms: 8000,
            move_timeout_ms: 30_000,
            guard_after_ms: 2000,
            guard_period_ms: 2000,
            min_encoder_diff: 1,
            settle_ms: 500,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineCfg,
    #[serde(rename = "hub")]
    pub hubs: Vec<HubCfg>,
    #[serde(rename = "fps")]
    pub fps: Vec<FpsCfg>,
    #[serde(rename = "group", default)]
    pub groups: Vec<GroupCfg>,
    #[serde(default)]
    pub runout: RunoutCfg,
    #[serde(default)]
    pub stuck_spool: StuckSpoolCfg,
    #[serde(default)]
    pub clog: ClogCfg,
    #[serde(default)]
    pub retry: RetryCfg,
    #[serde(default)]
    pub logging: Logging,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

impl Config {
    /// Structural validation; returns the first violation found.
    ///
    /// Never panics, including on adversarial input (fuzzed).
    pub fn validate(&self) -> eyre::Result<()> {
        if self.hubs.is_empty() {
            eyre::bail!("at least one [[hub]] is required");
        }
        if self.fps.is_empty() {
            eyre::bail!("at least one [[fps]] is required");
        }

        let mut fps_names = std::collections::HashSet::new();
        for f in &self.fps {
            if f.name.is_empty() {
                eyre::bail!("fps name must not be empty");
            }
            if !fps_names.insert(f.name.as_str()) {
                eyre::bail!("duplicate fps name {:?}", f.name);
            }
            if f.extruder.is_empty() {
                eyre::bail!("fps {:?} has no extruder", f.name);
            }
            if !f.reload_margin_mm.is_finite() || f.reload_margin_mm < 0.0 {
                eyre::bail!("fps {:?}: reload_margin_mm must be >= 0", f.name);
            }
        }

        let mut hub_names = std::collections::HashSet::new();
        let mut bound_fps = std::collections::HashSet::new();
        for h in &self.hubs {
            if h.name.is_empty() {
                eyre::bail!("hub name must not be empty");
            }
            if !hub_names.insert(h.name.as_str()) {
                eyre::bail!("duplicate hub name {:?}", h.name);
            }
            if !fps_names.contains(h.fps.as_str()) {
                eyre::bail!("hub {:?} references unknown fps {:?}", h.name, h.fps);
            }
            if !bound_fps.insert(h.fps.as_str()) {
                eyre::bail!("fps {:?} is bound to more than one hub", h.fps);
            }
            for v in [h.lower_threshold, h.upper_threshold] {
                if !v.is_finite() || !(0.0..=1.0).contains(&v) {
                    eyre::bail!("hub {:?}: pressure thresholds must be in [0, 1]", h.name);
                }
            }
            if h.lower_threshold >= h.upper_threshold {
                eyre::bail!(
                    "hub {:?}: lower_threshold must be below upper_threshold",
                    h.name
                );
            }
            if !h.path_length_mm.is_finite() || h.path_length_mm <= 0.0 {
                eyre::bail!("hub {:?}: path_length_mm must be > 0", h.name);
            }
            for g in [h.kp, h.ki, h.kd] {
                if !g.is_finite() || g < 0.0 {
                    eyre::bail!("hub {:?}: PID gains must be finite and >= 0", h.name);
                }
            }
            for v in h.lane_hes_on.iter().chain(h.hub_hes_on.iter()) {
                if !v.is_finite() {
                    eyre::bail!("hub {:?}: HES levels must be finite", h.name);
                }
            }
        }

        let mut group_names = std::collections::HashSet::new();
        for g in &self.groups {
            if g.name.is_empty() {
                eyre::bail!("group name must not be empty");
            }
            if !group_names.insert(g.name.as_str()) {
                eyre::bail!("duplicate group name {:?}", g.name);
            }
            if g.lanes.is_empty() {
                eyre::bail!("group {:?} has no lanes", g.name);
            }
            for (hub, lane) in &g.lanes {
                if !hub_names.contains(hub.as_str()) {
                    eyre::bail!("group {:?} references unknown hub {:?}", g.name, hub);
                }
                if *lane >= LANES_PER_HUB {
                    eyre::bail!(
                        "group {:?}: lane index {} out of range (0..{})",
                        g.name,
                        lane,
                        LANES_PER_HUB
                    );
                }
            }
        }

        if self.engine.tick_ms == 0 {
            eyre::bail!("engine.tick_ms must be >= 1");
        }
        if self.engine.sample_timeout_ms == 0 {
            eyre::bail!("engine.sample_timeout_ms must be >= 1");
        }
        if self.engine.stale_after_ms < self.engine.tick_ms {
            eyre::bail!("engine.stale_after_ms must be at least one tick");
        }

        if !self.runout.pause_distance_mm.is_finite() || self.runout.pause_distance_mm < 0.0 {
            eyre::bail!("runout.pause_distance_mm must be >= 0");
        }
        if !self.runout.path_length_factor.is_finite() || self.runout.path_length_factor < 1.0 {
            eyre::bail!("runout.path_length_factor must be >= 1");
        }

        if !self.stuck_spool.low_pressure.is_finite()
            || !(0.0..=1.0).contains(&self.stuck_spool.low_pressure)
        {
            eyre::bail!("stuck_spool.low_pressure must be in [0, 1]");
        }
        if self.stuck_spool.enabled && self.stuck_spool.dwell_ms == 0 {
            eyre::bail!("stuck_spool.dwell_ms must be >= 1 when enabled");
        }

        let clog = self.clog.params();
        if !clog.window_mm.is_finite() || clog.window_mm <= 0.0 {
            eyre::bail!("clog window_mm must be > 0");
        }
        if clog.slack_clicks < 0 {
            eyre::bail!("clog slack_clicks must be >= 0");
        }
        if !clog.pressure_band.is_finite() || clog.pressure_band <= 0.0 {
            eyre::bail!("clog pressure_band must be > 0");
        }

        if self.retry.max_attempts == 0 {
            eyre::bail!("retry.max_attempts must be >= 1");
        }
        if self.retry.backoff_ms > self.retry.max_backoff_ms {
            eyre::bail!("retry.backoff_ms must not exceed retry.max_backoff_ms");
        }
        if self.retry.move_timeout_ms == 0 {
            eyre::bail!("retry.move_timeout_ms must be >= 1");
        }
        if self.retry.guard_period_ms == 0 {
            eyre::bail!("retry.guard_period_ms must be >= 1");
        }
        if self.retry.min_encoder_diff < 0 {
            eyre::bail!("retry.min_encoder_diff must be >= 0");
        }

        if let Some(r) = &self.logging.rotation {
            if !matches!(r.as_str(), "never" | "daily" | "hourly") {
                eyre::bail!(
                    "logging.rotation must be \"never\", \"daily\" or \"hourly\", got {r:?}"
                );
            }
        }

        Ok(())
    }
}

//! Host-side port implementations.
//!
//! The monitoring engine reaches hardware only through the
//! `ams_traits::HubIo` / `ams_traits::JobPort` seams. This crate carries
//! the simulated implementations used by the CLI and by integration
//! tests; a production deployment substitutes ports that speak to the
//! real hub mainboard and host motion layer.

pub mod error;

use ams_traits::{FollowerDirection, HubIo, JobPort, LANES_PER_HUB, PortError, RawHubSample};
pub use error::HostError;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Motion currently scripted on a simulated hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimMotion {
    Load(usize),
    Unload,
}

#[derive(Debug)]
struct SimHubState {
    pressure: f32,
    encoder_clicks: i32,
    lane_hes: [f32; LANES_PER_HUB],
    hub_hes: [f32; LANES_PER_HUB],
    follower_enabled: bool,
    follower_direction: FollowerDirection,
    follower_current: f32,
    motion: Option<SimMotion>,
    error_led: [bool; LANES_PER_HUB],
    fail_next_sample: bool,
}

impl Default for SimHubState {
    fn default() -> Self {
        Self {
            pressure: 0.5,
            encoder_clicks: 0,
            lane_hes: [0.0; LANES_PER_HUB],
            hub_hes: [0.0; LANES_PER_HUB],
            follower_enabled: false,
            follower_direction: FollowerDirection::Forward,
            follower_current: 0.0,
            motion: None,
            error_led: [false; LANES_PER_HUB],
            fail_next_sample: false,
        }
    }
}

/// Simulated supply hub. The paired [`SimHubHandle`] scripts sensor
/// values and inspects commanded outputs from outside the engine.
pub struct SimHub {
    name: String,
    state: Arc<Mutex<SimHubState>>,
}

/// Scripting/inspection handle onto a [`SimHub`].
#[derive(Clone)]
pub struct SimHubHandle {
    state: Arc<Mutex<SimHubState>>,
}

impl SimHub {
    pub fn new(name: impl Into<String>) -> (Self, SimHubHandle) {
        let state = Arc::new(Mutex::new(SimHubState::default()));
        let handle = SimHubHandle {
            state: state.clone(),
        };
        (
            Self {
                name: name.into(),
                state,
            },
            handle,
        )
    }

    fn lock(&self) -> Result<MutexGuard<'_, SimHubState>, PortError> {
        self.state
            .lock()
            .map_err(|_| Box::new(HostError::Transport("sim hub state poisoned".into())) as PortError)
    }
}

impl SimHubHandle {
    fn with<R>(&self, f: impl FnOnce(&mut SimHubState) -> R) -> R {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    pub fn set_pressure(&self, v: f32) {
        self.with(|s| s.pressure = v);
    }

    pub fn add_encoder_clicks(&self, delta: i32) {
        self.with(|s| s.encoder_clicks = s.encoder_clicks.saturating_add(delta));
    }

    /// Script a bay presence sensor; uses 1.0/0.0 against the default
    /// "above 0.5" HES thresholds.
    pub fn set_lane_present(&self, lane: usize, present: bool) {
        self.with(|s| s.lane_hes[lane] = if present { 1.0 } else { 0.0 });
    }

    pub fn set_hub_present(&self, lane: usize, present: bool) {
        self.with(|s| s.hub_hes[lane] = if present { 1.0 } else { 0.0 });
    }

    pub fn set_lane_hes(&self, lane: usize, v: f32) {
        self.with(|s| s.lane_hes[lane] = v);
    }

    /// Make the next `sample()` call fail with a timeout.
    pub fn fail_next_sample(&self) {
        self.with(|s| s.fail_next_sample = true);
    }

    pub fn follower(&self) -> (bool, FollowerDirection) {
        self.with(|s| (s.follower_enabled, s.follower_direction))
    }

    pub fn follower_current(&self) -> f32 {
        self.with(|s| s.follower_current)
    }

    pub fn motion(&self) -> Option<SimMotion> {
        self.with(|s| s.motion)
    }

    pub fn error_led(&self, lane: usize) -> bool {
        self.with(|s| s.error_led[lane])
    }
}

impl HubIo for SimHub {
    fn sample(&mut self, _timeout: Duration) -> Result<RawHubSample, PortError> {
        let mut s = self.lock()?;
        if s.fail_next_sample {
            s.fail_next_sample = false;
            return Err(Box::new(HostError::Timeout));
        }
        Ok(RawHubSample {
            pressure: s.pressure,
            encoder_clicks: s.encoder_clicks,
            lane_hes: s.lane_hes,
            hub_hes: s.hub_hes,
        })
    }

    fn set_follower(
        &mut self,
        enable: bool,
        direction: FollowerDirection,
    ) -> Result<(), PortError> {
        let mut s = self.lock()?;
        s.follower_enabled = enable;
        s.follower_direction = direction;
        if !enable {
            s.follower_current = 0.0;
        }
        tracing::debug!(hub = %self.name, enable, ?direction, "sim follower");
        Ok(())
    }

    fn set_follower_current(&mut self, duty: f32) -> Result<(), PortError> {
        let mut s = self.lock()?;
        s.follower_current = duty.clamp(0.0, 1.0);
        Ok(())
    }

    fn begin_load(&mut self, lane: usize) -> Result<(), PortError> {
        if lane >= LANES_PER_HUB {
            return Err(Box::new(HostError::Transport(format!(
                "lane index {lane} out of range"
            ))));
        }
        let mut s = self.lock()?;
        s.motion = Some(SimMotion::Load(lane));
        tracing::debug!(hub = %self.name, lane, "sim load started");
        Ok(())
    }

    fn begin_unload(&mut self) -> Result<(), PortError> {
        let mut s = self.lock()?;
        s.motion = Some(SimMotion::Unload);
        tracing::debug!(hub = %self.name, "sim unload started");
        Ok(())
    }

    fn halt(&mut self) -> Result<(), PortError> {
        let mut s = self.lock()?;
        s.motion = None;
        s.follower_enabled = false;
        s.follower_current = 0.0;
        tracing::debug!(hub = %self.name, "sim halt");
        Ok(())
    }

    fn set_error_led(&mut self, lane: usize, on: bool) -> Result<(), PortError> {
        if lane >= LANES_PER_HUB {
            return Err(Box::new(HostError::Transport(format!(
                "lane index {lane} out of range"
            ))));
        }
        let mut s = self.lock()?;
        s.error_led[lane] = on;
        tracing::debug!(hub = %self.name, lane, on, "sim error led");
        Ok(())
    }
}

#[derive(Debug, Default)]
struct SimJobState {
    positions_mm: std::collections::HashMap<String, f64>,
    printing: bool,
    pauses: Vec<String>,
}

/// Simulated host motion layer: an extruder odometer, a printing flag,
/// and a record of requested pauses.
pub struct SimJob {
    state: Arc<Mutex<SimJobState>>,
}

#[derive(Clone)]
pub struct SimJobHandle {
    state: Arc<Mutex<SimJobState>>,
}

impl SimJob {
    pub fn new() -> (Self, SimJobHandle) {
        let state = Arc::new(Mutex::new(SimJobState::default()));
        let handle = SimJobHandle {
            state: state.clone(),
        };
        (Self { state }, handle)
    }
}

impl SimJobHandle {
    fn with<R>(&self, f: impl FnOnce(&mut SimJobState) -> R) -> R {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    pub fn set_printing(&self, printing: bool) {
        self.with(|s| s.printing = printing);
    }

    pub fn extrude_mm(&self, extruder: &str, mm: f64) {
        self.with(|s| *s.positions_mm.entry(extruder.to_string()).or_default() += mm);
    }

    pub fn pauses(&self) -> Vec<String> {
        self.with(|s| s.pauses.clone())
    }
}

impl JobPort for SimJob {
    fn extruder_position_mm(&mut self, extruder: &str) -> Result<f64, PortError> {
        let s = self
            .state
            .lock()
            .map_err(|_| Box::new(HostError::Transport("sim job state poisoned".into())) as PortError)?;
        Ok(s.positions_mm.get(extruder).copied().unwrap_or(0.0))
    }

    fn is_printing(&mut self) -> Result<bool, PortError> {
        let s = self
            .state
            .lock()
            .map_err(|_| Box::new(HostError::Transport("sim job state poisoned".into())) as PortError)?;
        Ok(s.printing)
    }

    fn request_pause(&mut self, message: &str) -> Result<(), PortError> {
        let mut s = self
            .state
            .lock()
            .map_err(|_| Box::new(HostError::Transport("sim job state poisoned".into())) as PortError)?;
        tracing::warn!(message, "sim job pause requested");
        s.pauses.push(message.to_string());
        s.printing = false;
        Ok(())
    }
}

//! The monitoring engine.
//!
//! One `Engine` owns every hub runtime, the event log and the job
//! port. All work happens inside [`Engine::tick`], which is called on a
//! periodic schedule and returns the delay until the next wake; no
//! method ever sleeps. Within one hub and one tick the order is fixed:
//! detectors run first, then the follower controller, then state
//! transitions, so a fault latched this tick already suppresses this
//! tick's motor output.

use std::time::Duration;

use ams_config::{Config, LANES_PER_HUB, RetryCfg};
use ams_traits::{FollowerDirection, HubIo, JobPort};
use tracing::{debug, info, warn};

use crate::detect::{ClogMonitor, FaultKind, RunoutAction, RunoutMonitor, StuckSpoolMonitor};
use crate::error::{BuildError, EngineError};
use crate::events::{EventLog, PauseEvent};
use crate::follower::{FollowerPid, PidGains};
use crate::lane::{FaultSlot, HubState, LaneStatus};
use crate::orchestrate::{
    ActiveMove, MoveFailure, MoveKind, MoveProgress, PendingRetry, RetrySchedule,
};
use crate::registry::{FpsId, GroupId, HubId, LaneId, Registry};
use crate::sample::{HubSample, SampleNormalizer};

/// Why a move was started; decides how an exhausted retry surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MoveReason {
    /// Host command (`load`/`unload`/diagnostic).
    Commanded,
    /// Automatic runout handoff to a group peer.
    Handoff,
}

struct HubRuntime<H> {
    id: HubId,
    fps: FpsId,
    /// Extruder bound to `fps`; this hub's consumption odometer.
    extruder: String,
    port: H,
    normalizer: SampleNormalizer,
    pid: FollowerPid,
    state: HubState,
    stuck: StuckSpoolMonitor,
    clog: Option<ClogMonitor>,
    runout: RunoutMonitor,
    active: Option<(ActiveMove, MoveReason)>,
    pending: Option<(PendingRetry, MoveReason)>,
    last_failure: Option<MoveFailure>,
    /// Engine wants the follower driven under PID.
    follower_engaged: bool,
    /// Diagnostic override; suppresses the PID entirely while set.
    manual_follower: Option<(bool, FollowerDirection)>,
    last_sample: Option<HubSample>,
    last_fresh_ms: Option<u64>,
    last_controller_ms: Option<u64>,
}

impl<H: HubIo> HubRuntime<H> {
    /// Pull the newest frame from the port, falling back to the last
    /// valid sample with a staleness flag when the read fails.
    fn refresh_sample(&mut self, now_ms: u64, stale_after_ms: u64, timeout: Duration) -> HubSample {
        match self.port.sample(timeout) {
            Ok(raw) => {
                let s = self.normalizer.normalize(&raw, false);
                if !s.stale {
                    self.last_fresh_ms = Some(now_ms);
                }
                self.last_sample = Some(s);
                s
            }
            Err(e) => {
                debug!(hub = self.id.0, error = %e, "hub sample read failed");
                let stale = self
                    .last_fresh_ms
                    .is_none_or(|t| now_ms.saturating_sub(t) >= stale_after_ms);
                match self.last_sample {
                    Some(mut s) => {
                        s.stale = s.stale || stale;
                        s
                    }
                    None => HubSample {
                        pressure: 0.0,
                        encoder_clicks: 0,
                        lane_present: [false; LANES_PER_HUB],
                        hub_present: [false; LANES_PER_HUB],
                        stale: true,
                    },
                }
            }
        }
    }

    /// Issue one load/unload attempt to the hub and begin supervising
    /// it. Port errors are logged; the guard/timeout machinery catches
    /// a move that never actually started.
    fn start_attempt(
        &mut self,
        kind: MoveKind,
        attempt: u32,
        reason: MoveReason,
        cfg: &RetryCfg,
        now_ms: u64,
    ) {
        let lane = kind.lane();
        match kind {
            MoveKind::Load { .. } => {
                self.state.lanes[lane].status = LaneStatus::Loading;
                if let Err(e) = self.port.begin_load(lane) {
                    warn!(hub = self.id.0, lane, error = %e, "begin_load failed");
                }
                if let Err(e) = self.port.set_follower(true, FollowerDirection::Forward) {
                    warn!(hub = self.id.0, error = %e, "follower enable failed");
                }
                self.follower_engaged = true;
            }
            MoveKind::Unload { .. } => {
                self.state.lanes[lane].status = LaneStatus::Unloading;
                self.follower_engaged = false;
                if let Err(e) = self.port.set_follower(true, FollowerDirection::Reverse) {
                    warn!(hub = self.id.0, error = %e, "follower reverse failed");
                }
                if let Err(e) = self.port.begin_unload() {
                    warn!(hub = self.id.0, lane, error = %e, "begin_unload failed");
                }
            }
        }
        debug!(
            hub = self.id.0,
            lane,
            kind = kind.as_str(),
            attempt,
            "move attempt started"
        );
        self.active = Some((ActiveMove::new(kind, attempt, cfg, now_ms), reason));
    }

    /// Cancel any in-flight or scheduled move and coast the hub.
    fn cancel_motion(&mut self) {
        if self.active.is_some() || self.pending.is_some() {
            let _ = self.port.halt();
        }
        self.active = None;
        self.pending = None;
    }

    fn reset_detectors(&mut self) {
        self.stuck.reset();
        self.runout.reset();
        if let Some(c) = self.clog.as_mut() {
            c.reset();
        }
    }

    /// Return a non-feeding, non-faulted lane to the status its
    /// presence sensors imply.
    fn settle_idle(&mut self, lane: usize) {
        let l = &mut self.state.lanes[lane];
        l.status = HubState::idle_status_from_presence(l);
    }
}

/// Aggregate snapshot for front ends; built on demand, never cached.
#[derive(Debug, Clone)]
pub struct EngineStatus {
    pub hubs: Vec<HubSnapshot>,
    pub active_events: Vec<PauseEvent>,
}

#[derive(Debug, Clone)]
pub struct HubSnapshot {
    pub name: String,
    pub fps: String,
    pub pressure: Option<f32>,
    pub stale: bool,
    pub follower_engaged: bool,
    pub fault: Option<FaultSnapshot>,
    /// Failure reason of the most recent unsuccessful move attempt.
    pub last_failure: Option<&'static str>,
    pub lanes: Vec<LaneSnapshot>,
}

#[derive(Debug, Clone)]
pub struct FaultSnapshot {
    pub kind: FaultKind,
    pub lane: String,
    pub event_id: u64,
}

#[derive(Debug, Clone)]
pub struct LaneSnapshot {
    pub name: String,
    pub status: LaneStatus,
    pub spool_present: bool,
    pub hub_present: bool,
}

pub struct Engine<H: HubIo, J: JobPort> {
    registry: Registry,
    job: J,
    hubs: Vec<HubRuntime<H>>,
    events: EventLog,
    tick_ms: u64,
    stale_after_ms: u64,
    sample_timeout: Duration,
    retry_cfg: RetryCfg,
    schedule: RetrySchedule,
}

impl<H: HubIo, J: JobPort> Engine<H, J> {
    /// Build the engine from validated configuration. `ports` must be
    /// in `[[hub]]` declaration order.
    pub fn from_config(cfg: &Config, ports: Vec<H>, job: J) -> Result<Self, BuildError> {
        if ports.len() != cfg.hubs.len() {
            return Err(BuildError::PortCountMismatch {
                got: ports.len(),
                want: cfg.hubs.len(),
            });
        }
        cfg.validate()
            .map_err(|_| BuildError::InvalidConfig("configuration failed validation"))?;
        let registry = Registry::from_config(cfg);

        let mut hubs = Vec::with_capacity(cfg.hubs.len());
        for (i, (hcfg, port)) in cfg.hubs.iter().zip(ports).enumerate() {
            let fps = registry
                .fps(&hcfg.fps)
                .ok_or(BuildError::InvalidConfig("hub references unknown fps"))?;
            let margin = cfg.fps[fps.0].reload_margin_mm;
            hubs.push(HubRuntime {
                id: HubId(i),
                fps,
                extruder: cfg.fps[fps.0].extruder.clone(),
                port,
                normalizer: SampleNormalizer::from_cfg(hcfg),
                pid: FollowerPid::new(
                    PidGains {
                        kp: hcfg.kp,
                        ki: hcfg.ki,
                        kd: hcfg.kd,
                    },
                    hcfg.lower_threshold,
                    hcfg.upper_threshold,
                ),
                state: HubState::new(),
                stuck: StuckSpoolMonitor::new(&cfg.stuck_spool),
                clog: cfg.clog.enabled.then(|| ClogMonitor::new(cfg.clog.params())),
                runout: RunoutMonitor::new(&cfg.runout, hcfg.path_length_mm, margin),
                active: None,
                pending: None,
                last_failure: None,
                follower_engaged: false,
                manual_follower: None,
                last_sample: None,
                last_fresh_ms: None,
                last_controller_ms: None,
            });
        }

        Ok(Self {
            registry,
            job,
            hubs,
            events: EventLog::new(),
            tick_ms: cfg.engine.tick_ms,
            stale_after_ms: cfg.engine.stale_after_ms,
            sample_timeout: Duration::from_millis(cfg.engine.sample_timeout_ms),
            retry_cfg: cfg.retry.clone(),
            schedule: RetrySchedule::new(&cfg.retry),
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// Derive lane statuses from a fresh sample of each hub; called
    /// once at startup. A lane whose hub-inlet HES already reads
    /// present is considered `Loaded` (filament survives restarts);
    /// everything else settles by bay presence.
    pub fn determine_state(&mut self, now_ms: u64) {
        for hub in &mut self.hubs {
            let s = hub.refresh_sample(now_ms, self.stale_after_ms, self.sample_timeout);
            if s.stale {
                warn!(
                    hub = %self.registry.hub_name(hub.id),
                    "no fresh sample at startup; lanes left empty until one arrives"
                );
                continue;
            }
            let fed = s.hub_present.iter().position(|p| *p);
            if s.hub_present.iter().filter(|p| **p).count() > 1 {
                warn!(
                    hub = %self.registry.hub_name(hub.id),
                    "multiple lanes read present at the hub inlet; keeping the first"
                );
            }
            for i in 0..LANES_PER_HUB {
                let lane = &mut hub.state.lanes[i];
                lane.spool_present = s.lane_present[i];
                lane.hub_present = s.hub_present[i];
                lane.status = if fed == Some(i) {
                    LaneStatus::Loaded
                } else {
                    HubState::idle_status_from_presence(lane)
                };
            }
            if let Some(i) = fed {
                info!(
                    lane = %self.registry.lane_name(LaneId { hub: hub.id, index: i }),
                    "loaded lane detected at startup"
                );
                hub.follower_engaged = true;
                if let Err(e) = hub.port.set_follower(true, FollowerDirection::Forward) {
                    warn!(hub = %self.registry.hub_name(hub.id), error = %e, "follower enable failed");
                }
            }
        }
    }

    /// One scheduler tick. Returns the delay in milliseconds until the
    /// engine next needs to run (at most the configured tick interval,
    /// earlier when a retry backoff expires sooner).
    pub fn tick(&mut self, now_ms: u64) -> u64 {
        let printing = match self.job.is_printing() {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "print state query failed");
                false
            }
        };

        let mut next_wake = self.tick_ms;
        let mut reloads: Vec<HubId> = Vec::new();

        let registry = &self.registry;
        let events = &mut self.events;
        let job = &mut self.job;

        for hub in &mut self.hubs {
            // each hub counts its own toolhead's consumption
            let pos = match job.extruder_position_mm(&hub.extruder) {
                Ok(p) if p.is_finite() => Some(p),
                Ok(_) => None,
                Err(e) => {
                    warn!(hub = hub.id.0, extruder = %hub.extruder, error = %e, "extruder position query failed");
                    None
                }
            };
            let consuming = printing && pos.is_some();
            let pos_mm = pos.unwrap_or(0.0);

            let s = hub.refresh_sample(now_ms, self.stale_after_ms, self.sample_timeout);

            // -- detectors --
            if hub.state.fault.is_none() {
                let feeding = hub.state.feeding_lane();
                let watched = feeding.filter(|i| {
                    consuming
                        && matches!(
                            hub.state.lanes[*i].status,
                            LaneStatus::Loaded | LaneStatus::ToolLoaded
                        )
                });
                match watched {
                    Some(i) => {
                        if hub.stuck.update(now_ms, s.pressure, true, s.stale) {
                            latch_fault(
                                hub,
                                registry,
                                events,
                                job,
                                FaultKind::StuckSpool,
                                i,
                                now_ms,
                                format!("buffer pressure {:.2} stayed below threshold", s.pressure),
                            );
                        }
                        if hub.state.fault.is_none()
                            && hub.state.lanes[i].status == LaneStatus::ToolLoaded
                        {
                            let target = hub.pid.target();
                            if let Some(clog) = hub.clog.as_mut() {
                                if clog.update(pos_mm, s.encoder_clicks, s.pressure, target, s.stale)
                                {
                                    latch_fault(
                                        hub,
                                        registry,
                                        events,
                                        job,
                                        FaultKind::Clog,
                                        i,
                                        now_ms,
                                        "extrusion advanced with no matching supply movement"
                                            .to_string(),
                                    );
                                }
                            }
                        }
                        if hub.state.fault.is_none()
                            && hub.state.lanes[i].status == LaneStatus::ToolLoaded
                        {
                            match hub.runout.update(pos_mm, !s.lane_present[i], s.stale) {
                                RunoutAction::None => {}
                                RunoutAction::CoastFollower => {
                                    info!(
                                        lane = %registry.lane_name(LaneId { hub: hub.id, index: i }),
                                        "spool tail cleared the bay; coasting follower"
                                    );
                                    hub.follower_engaged = false;
                                    if let Err(e) =
                                        hub.port.set_follower(false, FollowerDirection::Forward)
                                    {
                                        warn!(hub = hub.id.0, error = %e, "follower coast failed");
                                    }
                                }
                                RunoutAction::StartReload => reloads.push(hub.id),
                            }
                        }
                    }
                    None => hub.stuck.reset(),
                }
            }

            // presence bookkeeping: idle lanes follow their sensors
            if !s.stale {
                for i in 0..LANES_PER_HUB {
                    let lane = &mut hub.state.lanes[i];
                    lane.spool_present = s.lane_present[i];
                    lane.hub_present = s.hub_present[i];
                    if matches!(lane.status, LaneStatus::Empty | LaneStatus::Ready) {
                        lane.status = HubState::idle_status_from_presence(lane);
                    }
                }
            }

            // -- follower controller --
            if hub.manual_follower.is_none()
                && hub.state.fault.is_none()
                && hub.follower_engaged
                && !s.stale
                && hub.state.feeding_lane().is_some()
            {
                let dt = hub
                    .last_controller_ms
                    .map_or(0, |t| now_ms.saturating_sub(t));
                let duty = hub.pid.update(s.pressure, dt);
                hub.last_controller_ms = Some(now_ms);
                if let Err(e) = hub.port.set_follower_current(duty) {
                    warn!(hub = hub.id.0, error = %e, "follower current command failed");
                }
            }

            // -- state transitions --
            if hub.state.fault.is_some() {
                continue;
            }

            if let Some((p, reason)) = hub.pending {
                if now_ms >= p.due_at_ms {
                    hub.pending = None;
                    hub.start_attempt(p.kind, p.attempt, reason, &self.retry_cfg, now_ms);
                } else {
                    next_wake = next_wake.min(p.due_at_ms - now_ms);
                }
            }

            let step = {
                let in_band = hub.pid.in_band(s.pressure);
                hub.active.as_mut().map(|(mv, reason)| {
                    let lane = mv.kind.lane();
                    (
                        mv.kind,
                        *reason,
                        mv.attempt,
                        mv.assess(now_ms, s.encoder_clicks, s.hub_present[lane], in_band, s.stale),
                    )
                })
            };
            match step {
                None | Some((_, _, _, MoveProgress::InFlight)) => {}
                Some((kind, reason, _, MoveProgress::Complete)) => {
                    hub.active = None;
                    hub.last_failure = None;
                    let lane = kind.lane();
                    match kind {
                        MoveKind::Load { .. } => {
                            let status = if reason == MoveReason::Handoff && consuming {
                                LaneStatus::ToolLoaded
                            } else {
                                LaneStatus::Loaded
                            };
                            hub.state.lanes[lane].status = status;
                            hub.pid.reset();
                            hub.reset_detectors();
                            hub.follower_engaged = true;
                            info!(
                                lane = %registry.lane_name(LaneId { hub: hub.id, index: lane }),
                                status = status.as_str(),
                                "load complete"
                            );
                        }
                        MoveKind::Unload { .. } => {
                            hub.settle_idle(lane);
                            hub.follower_engaged = false;
                            if let Err(e) =
                                hub.port.set_follower(false, FollowerDirection::Forward)
                            {
                                warn!(hub = hub.id.0, error = %e, "follower coast failed");
                            }
                            hub.pid.reset();
                            hub.reset_detectors();
                            info!(
                                lane = %registry.lane_name(LaneId { hub: hub.id, index: lane }),
                                "unload complete"
                            );
                        }
                    }
                }
                Some((kind, reason, attempt, MoveProgress::Failed(failure))) => {
                    hub.active = None;
                    hub.last_failure = Some(failure);
                    let _ = hub.port.halt();
                    let lane = kind.lane();
                    if attempt < self.schedule.max_attempts {
                        let next = attempt + 1;
                        let due = now_ms + self.schedule.delay_before(next);
                        if matches!(kind, MoveKind::Load { .. }) {
                            hub.state.lanes[lane].status = LaneStatus::Ready;
                        }
                        hub.pending = Some((
                            PendingRetry {
                                kind,
                                attempt: next,
                                due_at_ms: due,
                            },
                            reason,
                        ));
                        next_wake = next_wake.min(due - now_ms);
                        warn!(
                            lane = %registry.lane_name(LaneId { hub: hub.id, index: lane }),
                            kind = kind.as_str(),
                            attempt,
                            failure = ?failure,
                            retry_at_ms = due,
                            "move failed; retry scheduled"
                        );
                    } else {
                        // supply-side failure when commanded; a drained
                        // group when this was a runout handoff
                        let fault = match reason {
                            MoveReason::Commanded => FaultKind::StuckSpool,
                            MoveReason::Handoff => FaultKind::Runout,
                        };
                        latch_fault(
                            hub,
                            registry,
                            events,
                            job,
                            fault,
                            lane,
                            now_ms,
                            format!(
                                "{} failed after {attempt} attempts ({failure:?})",
                                kind.as_str()
                            ),
                        );
                    }
                }
            }
        }

        for hub in reloads {
            self.begin_handoff(hub, now_ms);
        }

        next_wake
    }

    /// Drained-tail handoff: retire the running lane and start loading
    /// the next ready lane of the same material group on the same hub,
    /// or surface a runout fault if none exists.
    fn begin_handoff(&mut self, hub_id: HubId, now_ms: u64) {
        let Some(lane_idx) = self.hubs[hub_id.0].state.feeding_lane() else {
            return;
        };
        let from = LaneId {
            hub: hub_id,
            index: lane_idx,
        };
        // the spent tail has drained past the hub: retire the lane
        // first so a peer on the same hub sees a free feed path
        {
            let h = &mut self.hubs[hub_id.0];
            h.state.lanes[lane_idx].status = LaneStatus::Empty;
            h.follower_engaged = false;
            let _ = h.port.set_follower(false, FollowerDirection::Forward);
            h.reset_detectors();
        }
        let candidate = self
            .registry
            .group_for_lane(from)
            .and_then(|g| self.find_ready_peer(g, from));

        match candidate {
            None => {
                let Engine {
                    hubs,
                    registry,
                    events,
                    job,
                    ..
                } = self;
                latch_fault(
                    &mut hubs[hub_id.0],
                    registry,
                    events,
                    job,
                    FaultKind::Runout,
                    lane_idx,
                    now_ms,
                    "supply line drained and no ready group lane on this hub".to_string(),
                );
            }
            Some(to) => {
                info!(
                    from = %self.registry.lane_name(from),
                    to = %self.registry.lane_name(to),
                    "runout handoff"
                );
                let th = &mut self.hubs[to.hub.0];
                th.start_attempt(
                    MoveKind::Load { lane: to.index },
                    1,
                    MoveReason::Handoff,
                    &self.retry_cfg,
                    now_ms,
                );
            }
        }
    }

    /// Next ready lane in group order after `from`, wrapping, on the
    /// same hub. Group entries on another hub feed a different pressure
    /// sensor and extruder, so reaching them takes a tool change; the
    /// engine surfaces a runout pause instead of loading them.
    fn find_ready_peer(&self, group: GroupId, from: LaneId) -> Option<LaneId> {
        let order = self.registry.group_lanes(group);
        let start = order.iter().position(|l| *l == from).map_or(0, |i| i + 1);
        (0..order.len())
            .map(|off| order[(start + off) % order.len()])
            .filter(|l| *l != from && l.hub == from.hub)
            .find(|l| self.lane_loadable(*l))
    }

    fn lane_loadable(&self, lane: LaneId) -> bool {
        let hub = &self.hubs[lane.hub.0];
        hub.state.fault.is_none()
            && hub.active.is_none()
            && hub.pending.is_none()
            && hub.state.lanes[lane.index].status == LaneStatus::Ready
            && hub.state.feed_path_free_for(lane.index)
    }

    /// `load(group)`: pick the first ready lane of the group and begin
    /// loading it.
    pub fn load_group(&mut self, group: &str, now_ms: u64) -> Result<LaneId, EngineError> {
        let gid = self
            .registry
            .group(group)
            .ok_or_else(|| EngineError::UnknownGroup(group.to_string()))?;
        let pick = self
            .registry
            .group_lanes(gid)
            .iter()
            .copied()
            .find(|l| self.lane_loadable(*l))
            .ok_or_else(|| EngineError::NoReadyLane(group.to_string()))?;
        self.hubs[pick.hub.0].start_attempt(
            MoveKind::Load { lane: pick.index },
            1,
            MoveReason::Commanded,
            &self.retry_cfg,
            now_ms,
        );
        Ok(pick)
    }

    /// Diagnostic direct load of one specific lane.
    pub fn load_lane(&mut self, hub: &str, lane: usize, now_ms: u64) -> Result<(), EngineError> {
        let hub_id = self
            .registry
            .hub(hub)
            .ok_or_else(|| EngineError::UnknownHub(hub.to_string()))?;
        if lane >= LANES_PER_HUB {
            return Err(EngineError::State(format!(
                "lane index {lane} out of range (0..{LANES_PER_HUB})"
            )));
        }
        let h = &self.hubs[hub_id.0];
        if let Some(f) = &h.state.fault {
            return Err(EngineError::FaultLatched {
                hub: hub.to_string(),
                kind: f.kind,
            });
        }
        if h.active.is_some() || h.pending.is_some() || !h.state.feed_path_free_for(lane) {
            let busy = h
                .state
                .feeding_lane()
                .or_else(|| h.active.as_ref().map(|(m, _)| m.kind.lane()))
                .unwrap_or(lane);
            return Err(EngineError::HubBusy {
                hub: hub.to_string(),
                lane: self.registry.lane_name(LaneId {
                    hub: hub_id,
                    index: busy,
                }),
                status: h.state.lanes[busy].status.as_str(),
            });
        }
        if h.state.lanes[lane].status != LaneStatus::Ready {
            return Err(EngineError::State(format!(
                "lane {} is {}, not ready",
                self.registry.lane_name(LaneId {
                    hub: hub_id,
                    index: lane
                }),
                h.state.lanes[lane].status.as_str()
            )));
        }
        self.hubs[hub_id.0].start_attempt(
            MoveKind::Load { lane },
            1,
            MoveReason::Commanded,
            &self.retry_cfg,
            now_ms,
        );
        Ok(())
    }

    /// `unload(fps)`: retract the lane currently feeding the given
    /// pressure sensor's hub.
    pub fn unload(&mut self, fps: &str, now_ms: u64) -> Result<LaneId, EngineError> {
        let fps_id = self
            .registry
            .fps(fps)
            .ok_or_else(|| EngineError::UnknownFps(fps.to_string()))?;
        let hub_id = self.registry.hub_for_fps(fps_id);
        let h = &self.hubs[hub_id.0];
        if let Some(f) = &h.state.fault {
            return Err(EngineError::FaultLatched {
                hub: self.registry.hub_name(hub_id).to_string(),
                kind: f.kind,
            });
        }
        if h.active.is_some() || h.pending.is_some() {
            let busy = h
                .active
                .as_ref()
                .map(|(m, _)| m.kind.lane())
                .or_else(|| h.pending.as_ref().map(|(p, _)| p.kind.lane()))
                .unwrap_or(0);
            return Err(EngineError::HubBusy {
                hub: self.registry.hub_name(hub_id).to_string(),
                lane: self.registry.lane_name(LaneId {
                    hub: hub_id,
                    index: busy,
                }),
                status: h.state.lanes[busy].status.as_str(),
            });
        }
        let lane = h
            .state
            .feeding_lane()
            .filter(|i| {
                matches!(
                    h.state.lanes[*i].status,
                    LaneStatus::Loaded | LaneStatus::ToolLoaded
                )
            })
            .ok_or_else(|| EngineError::NothingLoaded(fps.to_string()))?;
        self.hubs[hub_id.0].start_attempt(
            MoveKind::Unload { lane },
            1,
            MoveReason::Commanded,
            &self.retry_cfg,
            now_ms,
        );
        Ok(LaneId {
            hub: hub_id,
            index: lane,
        })
    }

    /// Manual follower override for diagnostics; suppresses the PID
    /// until cleared by `clear_errors`.
    pub fn set_follower(
        &mut self,
        fps: &str,
        enable: bool,
        direction: FollowerDirection,
    ) -> Result<(), EngineError> {
        let fps_id = self
            .registry
            .fps(fps)
            .ok_or_else(|| EngineError::UnknownFps(fps.to_string()))?;
        let hub_id = self.registry.hub_for_fps(fps_id);
        let h = &mut self.hubs[hub_id.0];
        if let Some(f) = &h.state.fault {
            return Err(EngineError::FaultLatched {
                hub: self.registry.hub_name(hub_id).to_string(),
                kind: f.kind,
            });
        }
        h.manual_follower = Some((enable, direction));
        h.port
            .set_follower(enable, direction)
            .map_err(crate::error::map_port_error)?;
        info!(
            hub = %self.registry.hub_name(hub_id),
            enable,
            ?direction,
            "manual follower override"
        );
        Ok(())
    }

    /// `clear_errors()`: system-wide fault, retry and override reset.
    /// A hub with nothing latched and nothing in flight is untouched.
    pub fn clear_errors(&mut self, _now_ms: u64) {
        let Engine { hubs, events, .. } = self;
        for hub in hubs.iter_mut() {
            let had_motion = hub.active.is_some() || hub.pending.is_some();
            if had_motion {
                let cancelled = hub
                    .active
                    .as_ref()
                    .map(|(m, _)| m.kind)
                    .or_else(|| hub.pending.as_ref().map(|(p, _)| p.kind));
                hub.cancel_motion();
                if let Some(kind) = cancelled {
                    hub.settle_idle(kind.lane());
                }
                hub.follower_engaged = false;
                let _ = hub.port.set_follower(false, FollowerDirection::Forward);
            }
            hub.last_failure = None;
            hub.manual_follower = None;
            if let Some(fault) = hub.state.fault.take() {
                let _ = events.acknowledge(fault.event_id);
                let _ = hub.port.set_error_led(fault.lane.index, false);
                hub.settle_idle(fault.lane.index);
                hub.reset_detectors();
                info!(hub = hub.id.0, kind = %fault.kind, "fault cleared");
            }
        }
    }

    /// Clear the fault behind one pause event. Idempotent for an
    /// already-cleared event; unknown ids are rejected.
    pub fn acknowledge(&mut self, event_id: u64) -> Result<(), EngineError> {
        self.events.acknowledge(event_id)?;
        if let Some(hub) = self
            .hubs
            .iter_mut()
            .find(|h| h.state.fault.is_some_and(|f| f.event_id == event_id))
        {
            let fault = hub.state.fault.take().unwrap_or_else(|| unreachable!());
            let _ = hub.port.set_error_led(fault.lane.index, false);
            hub.cancel_motion();
            hub.settle_idle(fault.lane.index);
            hub.reset_detectors();
            info!(hub = hub.id.0, kind = %fault.kind, event_id, "fault acknowledged");
        }
        Ok(())
    }

    /// Acknowledge a stuck-spool event and re-engage the follower with
    /// the lane restored to its pre-fault status. The filament path is
    /// still intact after a freed jam, so no fresh load is needed.
    pub fn resume_follower(&mut self, event_id: u64) -> Result<(), EngineError> {
        let hub = self
            .hubs
            .iter_mut()
            .find(|h| h.state.fault.is_some_and(|f| f.event_id == event_id));
        let Some(hub) = hub else {
            // no latched fault for this id: fall back to a plain ack
            return self.acknowledge(event_id);
        };
        let fault = match &hub.state.fault {
            Some(f) if f.kind == FaultKind::StuckSpool => *f,
            Some(f) => {
                return Err(EngineError::State(format!(
                    "resume_follower applies to stuck_spool faults, event {event_id} is {}",
                    f.kind
                )));
            }
            None => unreachable!(),
        };
        self.events.acknowledge(event_id)?;
        hub.state.fault = None;
        let _ = hub.port.set_error_led(fault.lane.index, false);
        hub.state.lanes[fault.lane.index].status = fault.prior;
        hub.reset_detectors();
        hub.pid.reset();
        hub.follower_engaged = true;
        hub.port
            .set_follower(true, FollowerDirection::Forward)
            .map_err(crate::error::map_port_error)?;
        info!(hub = hub.id.0, event_id, "follower resumed after stuck spool");
        Ok(())
    }

    /// Tool-change controller committed the loaded filament into the
    /// extruder gears.
    pub fn note_tool_loaded(&mut self, fps: &str) -> Result<(), EngineError> {
        self.shift_tool_state(fps, LaneStatus::Loaded, LaneStatus::ToolLoaded)
    }

    /// Tool-change controller released the filament from the extruder.
    pub fn note_tool_unloaded(&mut self, fps: &str) -> Result<(), EngineError> {
        self.shift_tool_state(fps, LaneStatus::ToolLoaded, LaneStatus::Loaded)
    }

    fn shift_tool_state(
        &mut self,
        fps: &str,
        from: LaneStatus,
        to: LaneStatus,
    ) -> Result<(), EngineError> {
        let fps_id = self
            .registry
            .fps(fps)
            .ok_or_else(|| EngineError::UnknownFps(fps.to_string()))?;
        let hub_id = self.registry.hub_for_fps(fps_id);
        let h = &mut self.hubs[hub_id.0];
        let lane = h
            .state
            .feeding_lane()
            .filter(|i| h.state.lanes[*i].status == from)
            .ok_or_else(|| {
                EngineError::State(format!(
                    "no lane in state {} on fps {fps}",
                    from.as_str()
                ))
            })?;
        h.state.lanes[lane].status = to;
        if to == LaneStatus::ToolLoaded {
            h.runout.reset();
        }
        debug!(
            lane = %self.registry.lane_name(LaneId { hub: hub_id, index: lane }),
            status = to.as_str(),
            "tool state updated"
        );
        Ok(())
    }

    pub fn status(&self) -> EngineStatus {
        let hubs = self
            .hubs
            .iter()
            .map(|h| HubSnapshot {
                name: self.registry.hub_name(h.id).to_string(),
                fps: self.registry.fps_name(h.fps).to_string(),
                pressure: h.last_sample.map(|s| s.pressure),
                stale: h.last_sample.is_none_or(|s| s.stale),
                follower_engaged: h.follower_engaged,
                fault: h.state.fault.map(|f| FaultSnapshot {
                    kind: f.kind,
                    lane: self.registry.lane_name(f.lane),
                    event_id: f.event_id,
                }),
                last_failure: h.last_failure.map(MoveFailure::as_str),
                lanes: h
                    .state
                    .lanes
                    .iter()
                    .enumerate()
                    .map(|(i, l)| LaneSnapshot {
                        name: self.registry.lane_name(LaneId {
                            hub: h.id,
                            index: i,
                        }),
                        status: l.status,
                        spool_present: l.spool_present,
                        hub_present: l.hub_present,
                    })
                    .collect(),
            })
            .collect();
        EngineStatus {
            hubs,
            active_events: self.events.active().cloned().collect(),
        }
    }
}

/// Latch the hub's single fault slot: coast everything, light the lane
/// LED, publish the pause event and ask the host to pause the job.
fn latch_fault<H: HubIo, J: JobPort>(
    hub: &mut HubRuntime<H>,
    registry: &Registry,
    events: &mut EventLog,
    job: &mut J,
    kind: FaultKind,
    lane_idx: usize,
    now_ms: u64,
    details: String,
) {
    let lane = LaneId {
        hub: hub.id,
        index: lane_idx,
    };
    let prior = hub.state.lanes[lane_idx].status;
    hub.state.lanes[lane_idx].status = LaneStatus::Error;
    hub.cancel_motion();
    hub.follower_engaged = false;
    let _ = hub.port.halt();
    let _ = hub.port.set_follower(false, FollowerDirection::Forward);
    let _ = hub.port.set_error_led(lane_idx, true);

    let what = match kind {
        FaultKind::Runout => "filament runout",
        FaultKind::Clog => "filament clog",
        FaultKind::StuckSpool => "stuck spool",
    };
    let message = format!("{what} on lane {}", registry.lane_name(lane));
    let event_id = events.publish(kind, lane, hub.fps, now_ms, message.clone(), details);
    hub.state.fault = Some(FaultSlot {
        kind,
        lane,
        at_ms: now_ms,
        event_id,
        prior,
    });
    warn!(
        lane = %registry.lane_name(lane),
        kind = %kind,
        event_id,
        "fault latched; requesting job pause"
    );
    if let Err(e) = job.request_pause(&message) {
        warn!(error = %e, "job pause request failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{IdleJob, NoopHub};
    use ams_config::load_toml;

    fn config() -> Config {
        load_toml(
            r#"
            [[hub]]
            name = "hub0"
            fps = "fps0"
            upper_threshold = 0.65
            lower_threshold = 0.35
            lane_hes_on = [0.5, 0.5, 0.5, 0.5]
            hub_hes_on = [0.5, 0.5, 0.5, 0.5]
            path_length_mm = 1140.0

            [[fps]]
            name = "fps0"
            extruder = "extruder"

            [[group]]
            name = "PLA"
            lanes = [["hub0", 0], ["hub0", 1]]
            "#,
        )
        .expect("parse")
    }

    #[test]
    fn port_count_must_match_hubs() {
        let Err(err) = Engine::from_config(&config(), Vec::<NoopHub>::new(), IdleJob) else {
            panic!("zero ports for one hub must be rejected");
        };
        assert!(matches!(
            err,
            BuildError::PortCountMismatch { got: 0, want: 1 }
        ));
    }

    #[test]
    fn unknown_names_are_rejected() {
        let mut e = Engine::from_config(&config(), vec![NoopHub], IdleJob).unwrap();
        assert!(matches!(
            e.load_group("ABS", 0),
            Err(EngineError::UnknownGroup(_))
        ));
        assert!(matches!(
            e.unload("fps9", 0),
            Err(EngineError::UnknownFps(_))
        ));
        assert!(matches!(
            e.load_lane("hub9", 0, 0),
            Err(EngineError::UnknownHub(_))
        ));
    }

    #[test]
    fn load_requires_a_ready_lane() {
        // NoopHub never produces samples, so every lane stays Empty
        let mut e = Engine::from_config(&config(), vec![NoopHub], IdleJob).unwrap();
        assert!(matches!(
            e.load_group("PLA", 0),
            Err(EngineError::NoReadyLane(_))
        ));
        assert!(matches!(e.load_lane("hub0", 0, 0), Err(EngineError::State(_))));
    }

    #[test]
    fn unload_with_nothing_loaded_is_rejected() {
        let mut e = Engine::from_config(&config(), vec![NoopHub], IdleJob).unwrap();
        assert!(matches!(
            e.unload("fps0", 0),
            Err(EngineError::NothingLoaded(_))
        ));
    }

    #[test]
    fn tick_on_stale_ports_is_inert() {
        let mut e = Engine::from_config(&config(), vec![NoopHub], IdleJob).unwrap();
        e.determine_state(0);
        for t in 0..10 {
            let wake = e.tick(t * 1000);
            assert_eq!(wake, 1000);
        }
        assert_eq!(e.events().history().len(), 0);
        let st = e.status();
        assert!(st.hubs[0].stale);
        assert!(st.hubs[0].fault.is_none());
    }

    #[test]
    fn clear_errors_without_faults_is_a_no_op() {
        let mut e = Engine::from_config(&config(), vec![NoopHub], IdleJob).unwrap();
        e.clear_errors(0);
        assert_eq!(e.events().history().len(), 0);
    }
}

//! Simulated-hub scenario runner.
//!
//! Builds the engine against `ams_host` sim ports and drives it through
//! a scripted sensor timeline in virtual time: the loop advances the
//! clock by whatever `tick` asks for, so a two-minute scenario finishes
//! in milliseconds and the output is fully deterministic.

use ams_config::Config;
use ams_core::engine::Engine;
use ams_core::{EngineStatus, LaneStatus};
use ams_host::{SimHub, SimHubHandle, SimJob, SimJobHandle};
use eyre::{WrapErr, bail};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

use crate::cli::Scenario;

struct SimRig {
    engine: Engine<SimHub, SimJob>,
    hub: SimHubHandle,
    job: SimJobHandle,
    fps: String,
    extruder: String,
    mid_pressure: f32,
}

fn build_rig(cfg: &Config) -> eyre::Result<SimRig> {
    let mut ports = Vec::with_capacity(cfg.hubs.len());
    let mut handles = Vec::with_capacity(cfg.hubs.len());
    for h in &cfg.hubs {
        let (port, handle) = SimHub::new(h.name.clone());
        ports.push(port);
        handles.push(handle);
    }
    let (job, job_handle) = SimJob::new();
    let engine = Engine::from_config(cfg, ports, job).wrap_err("engine construction failed")?;
    let first = &cfg.hubs[0];
    let extruder = cfg
        .fps
        .iter()
        .find(|f| f.name == first.fps)
        .map(|f| f.extruder.clone())
        .ok_or_else(|| eyre::eyre!("hub {:?} references unknown fps {:?}", first.name, first.fps))?;
    Ok(SimRig {
        engine,
        hub: handles.swap_remove(0),
        job: job_handle,
        fps: first.fps.clone(),
        extruder,
        mid_pressure: (first.lower_threshold + first.upper_threshold) / 2.0,
    })
}

/// Execute `scenario` for up to `ticks` one-second steps and return a
/// JSON report of the final engine state and all published events.
pub fn run_scenario(
    cfg: &Config,
    scenario: Scenario,
    ticks: u64,
    shutdown: &Arc<AtomicBool>,
) -> eyre::Result<serde_json::Value> {
    if cfg.hubs.is_empty() {
        bail!("scenario runner needs at least one [[hub]]");
    }
    let mut rig = build_rig(cfg)?;

    // common starting point: a spool in lane 0, a spare in lane 1
    rig.hub.set_lane_present(0, true);
    rig.hub.set_lane_present(1, true);
    rig.hub.set_pressure(rig.mid_pressure);

    match scenario {
        Scenario::Retry => {
            rig.engine.determine_state(0);
            rig.engine
                .load_lane(&cfg.hubs[0].name, 0, 0)
                .wrap_err("scripted load failed to start")?;
        }
        _ => {
            rig.hub.set_hub_present(0, true);
            rig.engine.determine_state(0);
            rig.job.set_printing(true);
            rig.engine
                .note_tool_loaded(&rig.fps)
                .wrap_err("scripted tool load rejected")?;
        }
    }

    let mut now_ms = 0u64;
    let mut executed = 0u64;
    for tick in 0..ticks {
        if shutdown.load(Ordering::Relaxed) {
            info!(tick, "interrupted; reporting partial scenario");
            break;
        }
        script_tick(&rig, scenario, tick);
        let wake = rig.engine.tick(now_ms);
        now_ms += wake.max(1);
        executed += 1;
    }

    Ok(report(scenario, executed, rig.engine.status(), &rig.job))
}

fn script_tick(rig: &SimRig, scenario: Scenario, tick: u64) {
    match scenario {
        Scenario::Clean => {
            rig.job.extrude_mm(&rig.extruder, 20.0);
            rig.hub.add_encoder_clicks(5);
        }
        Scenario::Stuck => {
            rig.job.extrude_mm(&rig.extruder, 20.0);
            // feed keeps jerking through the hub, so the clog window
            // re-anchors; only the starved buffer gives the jam away
            rig.hub.add_encoder_clicks(7);
            if tick >= 10 {
                rig.hub.set_pressure(0.02);
            }
        }
        Scenario::Runout => {
            rig.job.extrude_mm(&rig.extruder, 30.0);
            rig.hub.add_encoder_clicks(7);
            if tick == 5 {
                rig.hub.set_lane_present(0, false);
            }
            // once the handoff load starts, let the replacement arrive
            if rig.engine.status().hubs[0].lanes[1].status == LaneStatus::Loading {
                rig.hub.set_hub_present(1, true);
                rig.hub.set_pressure(rig.mid_pressure);
            }
        }
        Scenario::Retry => {
            // encoder never advances: every attempt stalls
        }
    }
}

fn report(
    scenario: Scenario,
    ticks: u64,
    status: EngineStatus,
    job: &SimJobHandle,
) -> serde_json::Value {
    let hubs: Vec<_> = status
        .hubs
        .iter()
        .map(|h| {
            json!({
                "name": h.name,
                "fps": h.fps,
                "pressure": h.pressure,
                "stale": h.stale,
                "follower_engaged": h.follower_engaged,
                "last_failure": h.last_failure,
                "fault": h.fault.as_ref().map(|f| json!({
                    "kind": f.kind.as_str(),
                    "lane": f.lane,
                    "event_id": f.event_id,
                })),
                "lanes": h.lanes.iter().map(|l| json!({
                    "name": l.name,
                    "status": l.status.as_str(),
                    "spool_present": l.spool_present,
                    "hub_present": l.hub_present,
                })).collect::<Vec<_>>(),
            })
        })
        .collect();
    let events: Vec<_> = status
        .active_events
        .iter()
        .map(|e| {
            json!({
                "event_id": e.id,
                "reason": e.reason.as_str(),
                "lane": format!("{}:{}", e.lane.hub.0, e.lane.index),
                "message": e.message,
                "details": e.details,
                "requires_ack": e.requires_ack,
                "at_ms": e.at_ms,
            })
        })
        .collect();
    json!({
        "scenario": scenario.as_str(),
        "ticks": ticks,
        "hubs": hubs,
        "events": events,
        "pauses": job.pauses(),
    })
}

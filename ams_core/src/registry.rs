//! Owned-by-configuration lookup registry.
//!
//! All name→handle resolution happens here, once, at startup. The tick
//! path works exclusively with the index handles below; there are no
//! string-keyed lookups while monitoring.

use ams_config::{Config, LANES_PER_HUB};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HubId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FpsId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupId(pub usize);

/// One spool slot, addressed by owning hub and bay index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LaneId {
    pub hub: HubId,
    pub index: usize,
}

#[derive(Debug)]
pub struct Registry {
    hub_names: Vec<String>,
    fps_names: Vec<String>,
    group_names: Vec<String>,
    hub_by_name: HashMap<String, HubId>,
    fps_by_name: HashMap<String, FpsId>,
    group_by_name: HashMap<String, GroupId>,
    /// FpsId -> the hub whose follower serves it (1:1).
    hub_for_fps: Vec<HubId>,
    /// HubId -> bound fps.
    fps_for_hub: Vec<FpsId>,
    /// GroupId -> ordered member lanes (handoff walks this order).
    group_lanes: Vec<Vec<LaneId>>,
    /// LaneId -> owning group, if any.
    group_for_lane: HashMap<LaneId, GroupId>,
}

impl Registry {
    /// Build from validated configuration. Assumes `cfg.validate()`
    /// passed; violations here indicate a config-crate bug.
    pub fn from_config(cfg: &Config) -> Self {
        let fps_names: Vec<String> = cfg.fps.iter().map(|f| f.name.clone()).collect();
        let fps_by_name: HashMap<String, FpsId> = fps_names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.clone(), FpsId(i)))
            .collect();

        let hub_names: Vec<String> = cfg.hubs.iter().map(|h| h.name.clone()).collect();
        let hub_by_name: HashMap<String, HubId> = hub_names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.clone(), HubId(i)))
            .collect();

        let fps_for_hub: Vec<FpsId> = cfg.hubs.iter().map(|h| fps_by_name[&h.fps]).collect();
        let mut hub_for_fps = vec![HubId(0); fps_names.len()];
        for (hub_idx, fps) in fps_for_hub.iter().enumerate() {
            hub_for_fps[fps.0] = HubId(hub_idx);
        }

        let group_names: Vec<String> = cfg.groups.iter().map(|g| g.name.clone()).collect();
        let group_by_name: HashMap<String, GroupId> = group_names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.clone(), GroupId(i)))
            .collect();

        let mut group_lanes = Vec::with_capacity(cfg.groups.len());
        let mut group_for_lane = HashMap::new();
        for (gi, g) in cfg.groups.iter().enumerate() {
            let lanes: Vec<LaneId> = g
                .lanes
                .iter()
                .map(|(hub, index)| {
                    debug_assert!(*index < LANES_PER_HUB);
                    LaneId {
                        hub: hub_by_name[hub],
                        index: *index,
                    }
                })
                .collect();
            for lane in &lanes {
                group_for_lane.insert(*lane, GroupId(gi));
            }
            group_lanes.push(lanes);
        }

        Self {
            hub_names,
            fps_names,
            group_names,
            hub_by_name,
            fps_by_name,
            group_by_name,
            hub_for_fps,
            fps_for_hub,
            group_lanes,
            group_for_lane,
        }
    }

    pub fn hub_count(&self) -> usize {
        self.hub_names.len()
    }

    pub fn hub_name(&self, id: HubId) -> &str {
        &self.hub_names[id.0]
    }

    pub fn fps_name(&self, id: FpsId) -> &str {
        &self.fps_names[id.0]
    }

    pub fn group_name(&self, id: GroupId) -> &str {
        &self.group_names[id.0]
    }

    pub fn hub(&self, name: &str) -> Option<HubId> {
        self.hub_by_name.get(name).copied()
    }

    pub fn fps(&self, name: &str) -> Option<FpsId> {
        self.fps_by_name.get(name).copied()
    }

    pub fn group(&self, name: &str) -> Option<GroupId> {
        self.group_by_name.get(name).copied()
    }

    pub fn hub_for_fps(&self, id: FpsId) -> HubId {
        self.hub_for_fps[id.0]
    }

    pub fn fps_for_hub(&self, id: HubId) -> FpsId {
        self.fps_for_hub[id.0]
    }

    pub fn group_lanes(&self, id: GroupId) -> &[LaneId] {
        &self.group_lanes[id.0]
    }

    pub fn group_for_lane(&self, lane: LaneId) -> Option<GroupId> {
        self.group_for_lane.get(&lane).copied()
    }

    /// Human-readable lane name, e.g. "hub0:2".
    pub fn lane_name(&self, lane: LaneId) -> String {
        format!("{}:{}", self.hub_name(lane.hub), lane.index)
    }
}

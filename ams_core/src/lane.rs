//! Lane and hub state, with the single-feed-path invariant.

use crate::detect::FaultKind;
use crate::registry::LaneId;

/// Lifecycle of a spool lane.
///
/// `Loading`, `Loaded` and `ToolLoaded` all occupy the hub's merged
/// output path; at most one lane per hub may be in one of those states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaneStatus {
    /// No spool in the bay.
    Empty,
    /// Spool present, filament parked at the hub inlet.
    Ready,
    /// Feeding filament toward the toolhead.
    Loading,
    /// Filament fills the supply line up to the toolhead.
    Loaded,
    /// Filament committed into the extruder gears.
    ToolLoaded,
    /// Retracting filament back to the hub inlet.
    Unloading,
    /// Latched fault; ignores sensor transitions until cleared.
    Error,
}

impl LaneStatus {
    /// Whether this status occupies the hub's shared feed path.
    pub fn is_feeding(self) -> bool {
        matches!(self, Self::Loading | Self::Loaded | Self::ToolLoaded)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Ready => "ready",
            Self::Loading => "loading",
            Self::Loaded => "loaded",
            Self::ToolLoaded => "tool_loaded",
            Self::Unloading => "unloading",
            Self::Error => "error",
        }
    }
}

/// Latched fault for a hub. One slot per hub: while occupied, further
/// detection on that hub is suppressed, so a single root cause never
/// fans out into a burst of pause requests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaultSlot {
    pub kind: FaultKind,
    pub lane: LaneId,
    /// Engine time when the fault latched.
    pub at_ms: u64,
    /// Pause event published for this fault.
    pub event_id: u64,
    /// Lane status the fault interrupted; restored on resume where the
    /// filament path is still intact (stuck spool only).
    pub prior: LaneStatus,
}

#[derive(Debug, Clone, Copy)]
pub struct Lane {
    pub status: LaneStatus,
    /// Bay HES: spool present in the bay.
    pub spool_present: bool,
    /// Hub-inlet HES: filament parked at or past the hub inlet.
    pub hub_present: bool,
}

impl Lane {
    pub fn new() -> Self {
        Self {
            status: LaneStatus::Empty,
            spool_present: false,
            hub_present: false,
        }
    }
}

impl Default for Lane {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct HubState {
    pub lanes: [Lane; ams_config::LANES_PER_HUB],
    pub fault: Option<FaultSlot>,
}

impl HubState {
    pub fn new() -> Self {
        Self {
            lanes: [Lane::new(); ams_config::LANES_PER_HUB],
            fault: None,
        }
    }

    /// The lane currently occupying the feed path, if any.
    pub fn feeding_lane(&self) -> Option<usize> {
        self.lanes.iter().position(|l| l.status.is_feeding())
    }

    /// True when `lane` may start feeding without violating the
    /// single-feed-path invariant.
    pub fn feed_path_free_for(&self, lane: usize) -> bool {
        match self.feeding_lane() {
            None => true,
            Some(i) => i == lane,
        }
    }

    /// Resolve a lane that is neither feeding nor faulted to the status
    /// its presence sensors imply.
    pub fn idle_status_from_presence(lane: &Lane) -> LaneStatus {
        if lane.spool_present {
            LaneStatus::Ready
        } else {
            LaneStatus::Empty
        }
    }
}

impl Default for HubState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feeding_states() {
        assert!(LaneStatus::Loading.is_feeding());
        assert!(LaneStatus::Loaded.is_feeding());
        assert!(LaneStatus::ToolLoaded.is_feeding());
        assert!(!LaneStatus::Ready.is_feeding());
        assert!(!LaneStatus::Unloading.is_feeding());
        assert!(!LaneStatus::Error.is_feeding());
    }

    #[test]
    fn single_feed_path_check() {
        let mut hub = HubState::new();
        assert!(hub.feed_path_free_for(2));
        hub.lanes[1].status = LaneStatus::Loaded;
        assert_eq!(hub.feeding_lane(), Some(1));
        assert!(hub.feed_path_free_for(1));
        assert!(!hub.feed_path_free_for(2));
    }

    #[test]
    fn presence_maps_to_idle_status() {
        let mut lane = Lane::new();
        assert_eq!(
            HubState::idle_status_from_presence(&lane),
            LaneStatus::Empty
        );
        lane.spool_present = true;
        assert_eq!(
            HubState::idle_status_from_presence(&lane),
            LaneStatus::Ready
        );
    }
}

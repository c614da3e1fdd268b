//! Pause events.
//!
//! Every print pause the engine requests is recorded as a structured
//! event with a stable id. The front end acknowledges events after the
//! operator has intervened; history is retained for diagnostics.

use crate::detect::FaultKind;
use crate::error::EngineError;
use crate::registry::{FpsId, LaneId};

#[derive(Debug, Clone, PartialEq)]
pub struct PauseEvent {
    pub id: u64,
    pub reason: FaultKind,
    pub lane: LaneId,
    pub fps: FpsId,
    /// Engine time when the event was published.
    pub at_ms: u64,
    /// Operator-facing message, also passed to the pause request.
    pub message: String,
    /// Machine-oriented detail (dwell reached, window spans, attempts).
    pub details: String,
    /// Always true today: no pause auto-clears.
    pub requires_ack: bool,
    pub acknowledged: bool,
}

#[derive(Debug, Default)]
pub struct EventLog {
    next_id: u64,
    events: Vec<PauseEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            events: Vec::new(),
        }
    }

    pub fn publish(
        &mut self,
        reason: FaultKind,
        lane: LaneId,
        fps: FpsId,
        at_ms: u64,
        message: String,
        details: String,
    ) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.events.push(PauseEvent {
            id,
            reason,
            lane,
            fps,
            at_ms,
            message,
            details,
            requires_ack: true,
            acknowledged: false,
        });
        id
    }

    /// Idempotent: acknowledging an already-acknowledged event is a
    /// no-op, an unknown id is an error.
    pub fn acknowledge(&mut self, id: u64) -> Result<(), EngineError> {
        match self.events.iter_mut().find(|e| e.id == id) {
            Some(e) => {
                e.acknowledged = true;
                Ok(())
            }
            None => Err(EngineError::UnknownEvent(id)),
        }
    }

    pub fn active(&self) -> impl Iterator<Item = &PauseEvent> {
        self.events.iter().filter(|e| !e.acknowledged)
    }

    pub fn history(&self) -> &[PauseEvent] {
        &self.events
    }

    pub fn get(&self, id: u64) -> Option<&PauseEvent> {
        self.events.iter().find(|e| e.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{FpsId, HubId, LaneId};

    fn lane() -> LaneId {
        LaneId {
            hub: HubId(0),
            index: 1,
        }
    }

    fn publish(log: &mut EventLog, reason: FaultKind, at_ms: u64) -> u64 {
        log.publish(reason, lane(), FpsId(0), at_ms, "msg".into(), String::new())
    }

    #[test]
    fn ids_are_stable_and_ascending() {
        let mut log = EventLog::new();
        let a = publish(&mut log, FaultKind::StuckSpool, 100);
        let b = publish(&mut log, FaultKind::Clog, 200);
        assert!(b > a);
        assert_eq!(log.get(a).unwrap().reason, FaultKind::StuckSpool);
        assert!(log.get(a).unwrap().requires_ack);
    }

    #[test]
    fn acknowledge_is_idempotent() {
        let mut log = EventLog::new();
        let id = publish(&mut log, FaultKind::Runout, 0);
        assert_eq!(log.active().count(), 1);
        log.acknowledge(id).unwrap();
        log.acknowledge(id).unwrap();
        assert_eq!(log.active().count(), 0);
        assert_eq!(log.history().len(), 1);
    }

    #[test]
    fn unknown_id_is_rejected() {
        let mut log = EventLog::new();
        assert!(matches!(
            log.acknowledge(99),
            Err(EngineError::UnknownEvent(99))
        ));
    }
}

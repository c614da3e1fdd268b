//! Fault detectors.
//!
//! Each monitor is a pure windowed state machine: it is fed one
//! normalized sample per tick and reports whether its condition holds.
//! Detectors never touch hardware or lane state; the engine translates
//! a latched detection into commands and a pause event.

pub mod clog;
pub mod runout;
pub mod stuck;

pub use clog::ClogMonitor;
pub use runout::{RunoutAction, RunoutMonitor, RunoutState};
pub use stuck::StuckSpoolMonitor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Spool ran out and no group peer could take over.
    Runout,
    /// Filament not moving despite sustained extrusion.
    Clog,
    /// Spool jammed in the bay; buffer starved while extruding.
    StuckSpool,
}

impl FaultKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Runout => "runout",
            Self::Clog => "clog",
            Self::StuckSpool => "stuck_spool",
        }
    }
}

impl std::fmt::Display for FaultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

use crate::detect::FaultKind;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    #[error("hub {hub} busy: lane {lane} is {status}")]
    HubBusy {
        hub: String,
        lane: String,
        status: &'static str,
    },
    #[error("fault latched on hub {hub} ({kind}); acknowledge before new operations")]
    FaultLatched { hub: String, kind: FaultKind },
    #[error("no ready lane for group {0}")]
    NoReadyLane(String),
    #[error("unknown group {0}")]
    UnknownGroup(String),
    #[error("unknown fps {0}")]
    UnknownFps(String),
    #[error("unknown hub {0}")]
    UnknownHub(String),
    #[error("unknown event id {0}")]
    UnknownEvent(u64),
    #[error("nothing loaded on fps {0}")]
    NothingLoaded(String),
    #[error("host port error: {0}")]
    Port(String),
    #[error("timeout waiting for hub sample")]
    Timeout,
    #[error("invalid state: {0}")]
    State(String),
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("missing hub port for {0}")]
    MissingPort(String),
    #[error("port count {got} does not match configured hubs {want}")]
    PortCountMismatch { got: usize, want: usize },
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;

/// Map a boxed port error into an [`EngineError`].
///
/// With the `host-errors` feature the concrete host error type is
/// downcast so a transport timeout keeps its identity instead of
/// collapsing into a string.
pub fn map_port_error(e: ams_traits::PortError) -> EngineError {
    #[cfg(feature = "host-errors")]
    if let Some(he) = e.downcast_ref::<ams_host::HostError>() {
        return match he {
            ams_host::HostError::Timeout => EngineError::Timeout,
            other => EngineError::Port(other.to_string()),
        };
    }
    EngineError::Port(e.to_string())
}

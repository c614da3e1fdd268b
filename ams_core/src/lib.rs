#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Supply-unit monitoring and fault-detection engine (hardware-agnostic).
//!
//! All hardware interactions go through `ams_traits::HubIo` and
//! `ams_traits::JobPort`; everything in here is driven by periodic calls
//! to [`Engine::tick`] and is deterministic given the sample stream.
//!
//! ## Architecture
//!
//! - **Sampling**: raw frame normalization with staleness tracking
//!   (`sample`)
//! - **Control**: band-midpoint PID for the follower motor (`follower`)
//! - **Detection**: runout, clog and stuck-spool monitors (`detect`)
//! - **Orchestration**: move supervision with encoder guards and
//!   bounded retries (`orchestrate`)
//! - **State**: lane/hub state machines and the fault latch (`lane`),
//!   tied together by the per-tick `engine`
//! - **Events**: structured pause events with acknowledge (`events`)

pub mod detect;
pub mod engine;
pub mod error;
pub mod events;
pub mod follower;
pub mod lane;
pub mod mocks;
pub mod orchestrate;
pub mod registry;
pub mod sample;

pub use detect::FaultKind;
pub use engine::{Engine, EngineStatus, HubSnapshot, LaneSnapshot};
pub use error::{BuildError, EngineError};
pub use events::{EventLog, PauseEvent};
pub use lane::LaneStatus;
pub use registry::{FpsId, GroupId, HubId, LaneId, Registry};
pub use sample::HubSample;

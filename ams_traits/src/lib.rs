use std::time::Duration;

/// Number of spool lanes hosted by one supply hub.
pub const LANES_PER_HUB: usize = 4;

/// Boxed error type returned by all host-port trait methods.
pub type PortError = Box<dyn std::error::Error + Send + Sync>;

/// Direction the follower motor advances filament.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowerDirection {
    /// Toward the extruder.
    Forward,
    /// Back toward the spool.
    Reverse,
}

/// One raw telemetry frame from a supply hub.
///
/// Values are uncorrected: pressure carries the sensor's native polarity
/// and the hall-effect (HES) channels are raw analog readings. The engine
/// normalizes them against configured thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawHubSample {
    /// Buffer pressure reading, nominally 0.0–1.0, polarity uncorrected.
    pub pressure: f32,
    /// Cumulative follower encoder clicks since hub power-on.
    pub encoder_clicks: i32,
    /// Per-lane spool-bay HES readings.
    pub lane_hes: [f32; LANES_PER_HUB],
    /// Per-lane hub-inlet HES readings.
    pub hub_hes: [f32; LANES_PER_HUB],
}

/// Motion and telemetry primitives of one supply hub.
///
/// Implementations talk to the hub mainboard (or a simulation). All methods
/// are expected to be fast; the engine never holds a tick open on a port
/// call beyond the sample timeout.
pub trait HubIo {
    /// Read the latest telemetry frame, waiting at most `timeout`.
    fn sample(&mut self, timeout: Duration) -> Result<RawHubSample, PortError>;

    /// Enable or coast the follower motor in the given direction.
    fn set_follower(&mut self, enable: bool, direction: FollowerDirection)
    -> Result<(), PortError>;

    /// Command normalized follower current in [0.0, 1.0].
    fn set_follower_current(&mut self, duty: f32) -> Result<(), PortError>;

    /// Start feeding filament from the given lane toward the hub outlet.
    fn begin_load(&mut self, lane: usize) -> Result<(), PortError>;

    /// Start retracting the currently fed filament back to its lane.
    fn begin_unload(&mut self) -> Result<(), PortError>;

    /// Halt any in-progress load/unload motion and coast the follower.
    fn halt(&mut self) -> Result<(), PortError>;

    /// Drive the per-lane error indicator.
    fn set_error_led(&mut self, lane: usize, on: bool) -> Result<(), PortError>;
}

/// Narrow view of the host motion layer needed by the monitoring engine.
pub trait JobPort {
    /// Cumulative position of the named extruder in millimeters. Each
    /// pressure sensor binds to one extruder; its hub's detectors only
    /// count that toolhead's consumption.
    fn extruder_position_mm(&mut self, extruder: &str) -> Result<f64, PortError>;

    /// Whether a job is actively printing (detectors only run while true).
    fn is_printing(&mut self) -> Result<bool, PortError>;

    /// Ask the host to pause the running job with a human-readable reason.
    fn request_pause(&mut self, message: &str) -> Result<(), PortError>;
}

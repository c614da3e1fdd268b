//! Test and helper mocks for ams_core

use ams_traits::{FollowerDirection, HubIo, JobPort, RawHubSample};

/// A hub port that always errors on sample and accepts every command;
/// useful for exercising staleness handling and pure-state paths.
pub struct NoopHub;

impl HubIo for NoopHub {
    fn sample(
        &mut self,
        _timeout: std::time::Duration,
    ) -> Result<RawHubSample, ams_traits::PortError> {
        Err(Box::new(std::io::Error::other("noop hub")))
    }

    fn set_follower(
        &mut self,
        _enable: bool,
        _direction: FollowerDirection,
    ) -> Result<(), ams_traits::PortError> {
        Ok(())
    }

    fn set_follower_current(&mut self, _duty: f32) -> Result<(), ams_traits::PortError> {
        Ok(())
    }

    fn begin_load(&mut self, _lane: usize) -> Result<(), ams_traits::PortError> {
        Ok(())
    }

    fn begin_unload(&mut self) -> Result<(), ams_traits::PortError> {
        Ok(())
    }

    fn halt(&mut self) -> Result<(), ams_traits::PortError> {
        Ok(())
    }

    fn set_error_led(&mut self, _lane: usize, _on: bool) -> Result<(), ams_traits::PortError> {
        Ok(())
    }
}

/// A job port representing an idle printer at position zero.
pub struct IdleJob;

impl JobPort for IdleJob {
    fn extruder_position_mm(&mut self, _extruder: &str) -> Result<f64, ams_traits::PortError> {
        Ok(0.0)
    }

    fn is_printing(&mut self) -> Result<bool, ams_traits::PortError> {
        Ok(false)
    }

    fn request_pause(&mut self, _message: &str) -> Result<(), ams_traits::PortError> {
        Ok(())
    }
}

//! Boundary to the vendor SDK.
//!
//! Everything the node needs from the hardware goes through [`DeviceDriver`].
//! Implementations are plain blocking calls; exclusion and state tracking are
//! the camera controller's job, never the driver's.

pub mod simulated;

use crate::error::DriverError;
use crate::frame::FrameData;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub use simulated::{SimulatedCamera, SimulatedHandle, SimulationSettings};

/// Scalar acquisition parameters the device exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParameterKind {
    /// Exposure time in microseconds
    Exposure,
    /// Gain in percent of the supported range
    Gain,
    /// Gamma correction value
    Gamma,
}

impl fmt::Display for ParameterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterKind::Exposure => write!(f, "exposure"),
            ParameterKind::Gain => write!(f, "gain"),
            ParameterKind::Gamma => write!(f, "gamma"),
        }
    }
}

/// Inclusive range supported by the device for one parameter
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterRange {
    pub min: f64,
    pub max: f64,
}

impl ParameterRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.max(self.min).min(self.max)
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    pub fn span(&self) -> f64 {
        self.max - self.min
    }

    pub fn midpoint(&self) -> f64 {
        (self.min + self.max) / 2.0
    }
}

/// Brightness interval inside which the hardware's own auto functions converge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrightnessRange {
    pub low: u8,
    pub high: u8,
}

impl BrightnessRange {
    pub fn new(low: u8, high: u8) -> Self {
        Self { low, high }
    }

    pub fn contains(&self, brightness: u8) -> bool {
        brightness >= self.low && brightness <= self.high
    }
}

impl Default for BrightnessRange {
    fn default() -> Self {
        Self { low: 50, high: 205 }
    }
}

/// Blocking interface to a single physical camera.
///
/// Calls may take as long as the hardware needs; `grab_one` must return no
/// later than `timeout` after it is called.
pub trait DeviceDriver: Send {
    fn open(&mut self) -> Result<(), DriverError>;

    fn close(&mut self);

    fn start_stream(&mut self) -> Result<(), DriverError>;

    fn stop_stream(&mut self) -> Result<(), DriverError>;

    /// Retrieve the next frame. The frame id is assigned by the caller.
    fn grab_one(&mut self, timeout: Duration) -> Result<FrameData, DriverError>;

    /// Write a parameter and return the value the device actually applied
    fn set_parameter(&mut self, kind: ParameterKind, value: f64) -> Result<f64, DriverError>;

    /// Read back the currently applied value
    fn parameter(&self, kind: ParameterKind) -> Result<f64, DriverError>;

    fn parameter_range(&self, kind: ParameterKind) -> ParameterRange;

    fn native_auto_range(&self) -> BrightnessRange;

    /// Target mean brightness used by the hardware auto functions
    fn set_auto_brightness_target(&mut self, target: u8) -> Result<(), DriverError>;

    fn set_auto_exposure(&mut self, enabled: bool) -> Result<(), DriverError>;

    fn set_auto_gain(&mut self, enabled: bool) -> Result<(), DriverError>;

    /// Whether `kind` may be written while frames are streaming
    fn can_change_while_streaming(&self, _kind: ParameterKind) -> bool {
        true
    }

    fn is_ready(&self) -> bool;

    fn enter_sleep(&mut self) -> Result<(), DriverError>;

    fn wake(&mut self) -> Result<(), DriverError>;

    fn set_digital_output(&mut self, output_id: u8, on: bool) -> Result<(), DriverError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_range_clamp() {
        let range = ParameterRange::new(100.0, 50000.0);
        assert_eq!(range.clamp(10.0), 100.0);
        assert_eq!(range.clamp(60000.0), 50000.0);
        assert_eq!(range.clamp(2500.0), 2500.0);
        assert_eq!(range.midpoint(), 25050.0);
        assert!(range.contains(100.0));
        assert!(!range.contains(99.9));
    }

    #[test]
    fn test_native_range_bounds_are_inclusive() {
        let range = BrightnessRange::default();
        assert!(range.contains(50));
        assert!(range.contains(205));
        assert!(!range.contains(49));
        assert!(!range.contains(206));
    }
}

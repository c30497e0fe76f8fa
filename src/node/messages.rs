use crate::brightness::{BrightnessReport, SearchMode};
use crate::parameter::ParameterResult;
use serde::{Deserialize, Serialize};

/// Reply to an exposure, gain or gamma request
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SetParameterResponse {
    pub reached: f64,
    pub within_tolerance: bool,
    /// True when the reached value is within tolerance of the request
    pub success: bool,
}

impl From<ParameterResult> for SetParameterResponse {
    fn from(result: ParameterResult) -> Self {
        Self {
            reached: result.reached_value,
            within_tolerance: result.within_tolerance,
            success: result.converged,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SetBrightnessResponse {
    pub reached_brightness: f64,
    pub success: bool,
    pub mode: SearchMode,
    pub iterations: u32,
}

impl From<&BrightnessReport> for SetBrightnessResponse {
    fn from(report: &BrightnessReport) -> Self {
        Self {
            reached_brightness: report.reached_brightness,
            success: report.converged,
            mode: report.mode,
            iterations: report.iterations,
        }
    }
}

/// Why the node stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    Signal(String),
    Requested,
}

use crate::driver::ParameterKind;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CamnodeError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("Camera error: {0}")]
    Camera(#[from] CameraError),

    #[error("Grab error: {0}")]
    Grab(#[from] GrabError),

    #[error("Parameter error: {0}")]
    Parameter(#[from] ParameterError),

    #[error("Brightness error: {0}")]
    Brightness(#[from] BrightnessError),

    #[error("Acquisition error: {0}")]
    Acquisition(#[from] AcquisitionError),

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

impl CamnodeError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn component<S: Into<String>>(component: S, message: S) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }
}

/// Errors reported by a device driver implementation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DriverError {
    #[error("Device is not open")]
    NotOpen,

    #[error("No frame within {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("Device rejected {kind} value {value}")]
    Rejected { kind: ParameterKind, value: f64 },

    #[error("Driver failure: {details}")]
    Failure { details: String },
}

impl DriverError {
    pub fn failure<S: Into<String>>(details: S) -> Self {
        Self::Failure {
            details: details.into(),
        }
    }
}

/// Device state errors raised by the camera controller
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CameraError {
    #[error("Camera is sleeping")]
    Sleeping,

    #[error("Camera is not ready")]
    NotReady,

    #[error("Camera is not grabbing")]
    NotGrabbing,

    #[error("Camera is busy with another acquisition")]
    Busy,

    #[error("Camera driver error: {0}")]
    Driver(#[from] DriverError),
}

impl CameraError {
    /// The device session stays usable after these errors
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CameraError::Sleeping | CameraError::NotReady | CameraError::Busy
        )
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GrabError {
    #[error("Grab timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("Driver failure while grabbing: {details}")]
    DriverFailure { details: String },

    #[error(transparent)]
    Camera(#[from] CameraError),
}

impl GrabError {
    pub fn is_recoverable(&self) -> bool {
        match self {
            GrabError::Timeout { .. } => true,
            GrabError::DriverFailure { .. } => false,
            GrabError::Camera(err) => err.is_recoverable(),
        }
    }
}

impl From<DriverError> for GrabError {
    fn from(err: DriverError) -> Self {
        match err {
            DriverError::Timeout { timeout } => GrabError::Timeout { timeout },
            other => GrabError::DriverFailure {
                details: other.to_string(),
            },
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParameterError {
    #[error("Device rejected {kind} value {value}")]
    OutOfRange { kind: ParameterKind, value: f64 },

    #[error("{kind} cannot be changed while an acquisition is streaming")]
    DeviceBusy { kind: ParameterKind },

    #[error("Driver failure while setting {kind}: {details}")]
    Driver { kind: ParameterKind, details: String },

    #[error(transparent)]
    Camera(#[from] CameraError),
}

impl ParameterError {
    pub(crate) fn from_driver(kind: ParameterKind, err: DriverError) -> Self {
        match err {
            DriverError::Rejected { value, .. } => ParameterError::OutOfRange { kind, value },
            other => ParameterError::Driver {
                kind,
                details: other.to_string(),
            },
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BrightnessError {
    #[error("Target brightness {target} is outside [1, 255]")]
    InvalidTarget { target: i32 },

    #[error("Target {target} is outside the native auto range and neither exposure nor gain may be adjusted")]
    NoControllableParameter { target: u8 },

    #[error("Grab failed during brightness search: {0}")]
    GrabFailed(#[from] GrabError),

    #[error("Parameter update failed during brightness search: {0}")]
    Parameter(#[from] ParameterError),

    #[error("Brightness {reached:.1} did not converge to {target}")]
    NotConverged { target: u8, reached: f64 },

    #[error(transparent)]
    Camera(#[from] CameraError),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AcquisitionError {
    #[error("Invalid acquisition goal: {details}")]
    InvalidGoal { details: String },

    #[error("Acquisition task failed: {details}")]
    TaskFailed { details: String },

    #[error("Image grab failed: {0}")]
    Grab(#[from] GrabError),

    #[error("Per-image parameter failed: {0}")]
    Parameter(#[from] ParameterError),

    #[error("Per-image brightness failed: {0}")]
    Brightness(#[from] BrightnessError),

    #[error(transparent)]
    Camera(#[from] CameraError),
}

impl AcquisitionError {
    pub fn invalid_goal<S: Into<String>>(details: S) -> Self {
        Self::InvalidGoal {
            details: details.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CamnodeError>;

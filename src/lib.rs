pub mod acquisition;
pub mod brightness;
pub mod camera;
pub mod config;
pub mod driver;
pub mod error;
pub mod frame;
pub mod node;
pub mod parameter;
pub mod publisher;

#[cfg(test)]
mod testing;

pub use acquisition::{
    AcquisitionExecutor, AcquisitionHandle, ActionOutcome, FeedbackSink, GrabFeedback,
    GrabRequest, GrabResult, ParameterSchedule, ReachedValues,
};
pub use brightness::{BrightnessReport, BrightnessSearchEngine, SearchMode};
pub use camera::{CameraController, CameraControllerBuilder, CameraState};
pub use config::CamnodeConfig;
pub use driver::{DeviceDriver, ParameterKind, SimulatedCamera, SimulatedHandle, SimulationSettings};
pub use error::{
    AcquisitionError, BrightnessError, CameraError, CamnodeError, DriverError, GrabError,
    ParameterError, Result,
};
pub use frame::{FrameData, FrameFormat, FramePostProcessor, Rotation, RotationProcessor};
pub use node::{CameraNode, SetBrightnessResponse, SetParameterResponse, ShutdownReason};
pub use parameter::{ParameterAdjuster, ParameterResult, ParameterTarget, TargetKind, Tolerances};
pub use publisher::ImagePublisher;

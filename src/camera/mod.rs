mod builder;
mod controller;

pub use builder::CameraControllerBuilder;
pub use controller::{AcquisitionLease, CameraController, CameraState, DeviceSession};

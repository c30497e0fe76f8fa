//! Fixtures shared by unit tests.

use crate::camera::{CameraController, CameraControllerBuilder};
use crate::config::{BrightnessConfig, CameraConfig, ParameterConfig};
use crate::driver::{SimulatedCamera, SimulatedHandle, SimulationSettings};
use crate::parameter::Tolerances;
use std::sync::Arc;

pub(crate) fn test_camera_config() -> CameraConfig {
    CameraConfig {
        device_user_id: "sim".to_string(),
        camera_frame: "sim_camera".to_string(),
        frame_rate: 50.0,
        grab_timeout_ms: 200,
        ready_poll_ms: 5,
        startup_timeout_ms: 500,
        rotation: None,
    }
}

pub(crate) fn test_tolerances() -> Tolerances {
    Tolerances::from_config(&ParameterConfig {
        exposure_abs_tolerance_us: 1.0,
        exposure_rel_tolerance: 0.01,
        gain_tolerance: 0.5,
        gamma_tolerance: 0.01,
    })
}

pub(crate) fn test_brightness_config() -> BrightnessConfig {
    BrightnessConfig {
        tolerance: 2.0,
        max_iterations: 20,
    }
}

/// Opened controller around a simulated camera, not yet grabbing
pub(crate) fn opened_controller(
    camera: SimulatedCamera,
) -> (Arc<CameraController>, SimulatedHandle) {
    let handle = camera.handle();
    let controller = CameraControllerBuilder::new()
        .driver(Box::new(camera))
        .config(test_camera_config())
        .build()
        .unwrap();
    controller.open().unwrap();
    (Arc::new(controller), handle)
}

/// Opened and streaming controller with the given simulation settings
pub(crate) fn grabbing_controller(
    settings: SimulationSettings,
) -> (Arc<CameraController>, SimulatedHandle) {
    let (controller, handle) = opened_controller(SimulatedCamera::new(settings));
    assert!(controller.start_grabbing());
    (controller, handle)
}

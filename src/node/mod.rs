//! Control surface of the camera node.
//!
//! Every request is served on a blocking worker so the async side never
//! waits on the device lock.

mod messages;
mod runtime;
#[cfg(test)]
mod tests;

pub use messages::{SetBrightnessResponse, SetParameterResponse, ShutdownReason};

use crate::acquisition::{AcquisitionExecutor, AcquisitionHandle, GrabRequest};
use crate::brightness::BrightnessSearchEngine;
use crate::camera::{CameraController, CameraControllerBuilder};
use crate::config::CamnodeConfig;
use crate::driver::{DeviceDriver, ParameterKind, SimulatedCamera, SimulatedHandle};
use crate::error::{
    AcquisitionError, BrightnessError, CameraError, DriverError, ParameterError, Result,
};
use crate::parameter::{ParameterAdjuster, Tolerances};
use crate::publisher::ImagePublisher;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const PUBLISH_CAPACITY: usize = 16;

#[derive(Clone)]
pub struct CameraNode {
    config: CamnodeConfig,
    controller: Arc<CameraController>,
    adjuster: ParameterAdjuster,
    brightness: BrightnessSearchEngine,
    executor: AcquisitionExecutor,
    publisher: ImagePublisher,
    cancellation_token: CancellationToken,
}

/// Run a blocking device call off the async runtime
async fn blocking<T, E, F>(f: F) -> std::result::Result<T, E>
where
    F: FnOnce() -> std::result::Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: From<CameraError> + Send + 'static,
{
    tokio::task::spawn_blocking(f).await.unwrap_or_else(|e| {
        Err(CameraError::Driver(DriverError::failure(format!("worker task failed: {}", e))).into())
    })
}

impl CameraNode {
    pub fn new(config: CamnodeConfig, driver: Box<dyn DeviceDriver>) -> Result<Self> {
        let controller = Arc::new(
            CameraControllerBuilder::new()
                .driver(driver)
                .config(config.camera.clone())
                .build()?,
        );
        let adjuster = ParameterAdjuster::new(
            Arc::clone(&controller),
            Tolerances::from_config(&config.parameters),
        );
        let brightness =
            BrightnessSearchEngine::new(Arc::clone(&controller), adjuster.clone(), &config.brightness);
        let publisher = ImagePublisher::new(PUBLISH_CAPACITY);
        let executor = AcquisitionExecutor::new(
            Arc::clone(&controller),
            adjuster.clone(),
            brightness.clone(),
            config.acquisition.clone(),
        )
        .with_publisher(publisher.clone());

        info!(
            "Camera node created for device '{}'",
            config.camera.device_user_id
        );

        Ok(Self {
            config,
            controller,
            adjuster,
            brightness,
            executor,
            publisher,
            cancellation_token: CancellationToken::new(),
        })
    }

    /// Node backed by the simulated camera described in the configuration
    pub fn simulated(config: CamnodeConfig) -> Result<(Self, SimulatedHandle)> {
        let camera = SimulatedCamera::new(config.simulation.settings());
        let handle = camera.handle();
        let node = Self::new(config, Box::new(camera))?;
        Ok((node, handle))
    }

    pub fn config(&self) -> &CamnodeConfig {
        &self.config
    }

    pub fn controller(&self) -> &Arc<CameraController> {
        &self.controller
    }

    pub fn publisher(&self) -> &ImagePublisher {
        &self.publisher
    }

    pub async fn set_exposure(
        &self,
        target_us: f64,
    ) -> std::result::Result<SetParameterResponse, ParameterError> {
        self.set_parameter(ParameterKind::Exposure, target_us).await
    }

    pub async fn set_gain(
        &self,
        target_pct: f64,
    ) -> std::result::Result<SetParameterResponse, ParameterError> {
        self.set_parameter(ParameterKind::Gain, target_pct).await
    }

    pub async fn set_gamma(
        &self,
        target: f64,
    ) -> std::result::Result<SetParameterResponse, ParameterError> {
        self.set_parameter(ParameterKind::Gamma, target).await
    }

    async fn set_parameter(
        &self,
        kind: ParameterKind,
        value: f64,
    ) -> std::result::Result<SetParameterResponse, ParameterError> {
        let adjuster = self.adjuster.clone();
        let result = blocking(move || adjuster.set_parameter(kind, value)).await?;
        Ok(result.into())
    }

    pub async fn set_brightness(
        &self,
        target: i32,
        exposure_auto: bool,
        gain_auto: bool,
    ) -> std::result::Result<SetBrightnessResponse, BrightnessError> {
        let engine = self.brightness.clone();
        let report =
            blocking(move || engine.set_brightness(target, exposure_auto, gain_auto)).await?;
        Ok(SetBrightnessResponse::from(&report))
    }

    /// Put the camera to sleep or wake it; false when the device refused
    pub async fn set_sleeping(&self, sleep: bool) -> bool {
        let controller = Arc::clone(&self.controller);
        let outcome = blocking(move || {
            if sleep {
                controller.enter_sleep()
            } else {
                controller.wake()
            }
        })
        .await;

        match outcome {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to set sleeping={}: {}", sleep, e);
                false
            }
        }
    }

    pub async fn set_digital_output(&self, output_id: u8, on: bool) -> bool {
        let controller = Arc::clone(&self.controller);
        match blocking(move || controller.set_digital_output(output_id, on)).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to set digital output {}: {}", output_id, e);
                false
            }
        }
    }

    /// Start a multi-image acquisition goal
    pub fn grab_images(
        &self,
        request: GrabRequest,
    ) -> std::result::Result<AcquisitionHandle, AcquisitionError> {
        self.executor.submit(request)
    }

    /// Ask a running node to shut down
    pub fn request_shutdown(&self) {
        info!("Shutdown requested");
        self.cancellation_token.cancel();
    }
}

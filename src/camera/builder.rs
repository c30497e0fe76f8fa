use super::controller::CameraController;
use crate::config::CameraConfig;
use crate::driver::DeviceDriver;
use crate::error::{CamnodeError, Result};
use crate::frame::{FramePostProcessor, RotationProcessor};
use std::sync::Arc;

/// Builder for the camera controller
pub struct CameraControllerBuilder {
    driver: Option<Box<dyn DeviceDriver>>,
    config: Option<CameraConfig>,
    post_processors: Vec<Arc<dyn FramePostProcessor>>,
}

impl CameraControllerBuilder {
    pub fn new() -> Self {
        Self {
            driver: None,
            config: None,
            post_processors: Vec::new(),
        }
    }

    pub fn driver(mut self, driver: Box<dyn DeviceDriver>) -> Self {
        self.driver = Some(driver);
        self
    }

    pub fn config(mut self, config: CameraConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Append a post-capture transform; transforms run in insertion order
    pub fn post_processor(mut self, processor: Arc<dyn FramePostProcessor>) -> Self {
        self.post_processors.push(processor);
        self
    }

    pub fn build(self) -> Result<CameraController> {
        let driver = self
            .driver
            .ok_or_else(|| CamnodeError::system("Camera driver must be specified"))?;
        let config = self
            .config
            .ok_or_else(|| CamnodeError::system("Camera configuration must be specified"))?;

        let mut post_processors = self.post_processors;
        if let Some(rotation) = config.rotation {
            post_processors.insert(0, Arc::new(RotationProcessor::new(rotation)));
        }

        Ok(CameraController::new(driver, &config, post_processors))
    }
}

impl Default for CameraControllerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

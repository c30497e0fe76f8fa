use super::{blocking, CameraNode, ShutdownReason};
use crate::error::{CameraError, CamnodeError, Result};
use std::sync::Arc;
use tokio::signal;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

impl CameraNode {
    /// Open the device, wait until it is ready, start grabbing and apply the
    /// configured startup parameters.
    pub async fn start(&self) -> Result<()> {
        info!("Starting camera node");
        let controller = Arc::clone(&self.controller);
        let startup_timeout = self.config.camera.startup_timeout();

        blocking(move || {
            controller.open()?;
            if !controller.wait_for_camera(startup_timeout) {
                return Err(CameraError::NotReady);
            }
            if !controller.start_grabbing() {
                return Err(CameraError::NotGrabbing);
            }
            Ok(())
        })
        .await?;

        self.apply_startup_parameters().await;
        info!("Camera node started");
        Ok(())
    }

    async fn apply_startup_parameters(&self) {
        let startup = self.config.startup.clone();

        if let Some(value) = startup.exposure {
            match self.set_exposure(value).await {
                Ok(response) => info!("Startup exposure {} -> {}", value, response.reached),
                Err(e) => warn!("Startup exposure {} failed: {}", value, e),
            }
        }
        if let Some(value) = startup.gain {
            match self.set_gain(value).await {
                Ok(response) => info!("Startup gain {} -> {}", value, response.reached),
                Err(e) => warn!("Startup gain {} failed: {}", value, e),
            }
        }
        if let Some(value) = startup.gamma {
            match self.set_gamma(value).await {
                Ok(response) => info!("Startup gamma {} -> {}", value, response.reached),
                Err(e) => warn!("Startup gamma {} failed: {}", value, e),
            }
        }
        if let Some(target) = startup.brightness {
            match self
                .set_brightness(i32::from(target), startup.exposure_auto, startup.gain_auto)
                .await
            {
                Ok(response) if response.success => {
                    info!(
                        "Startup brightness {} -> {:.1}",
                        target, response.reached_brightness
                    )
                }
                Ok(response) => warn!(
                    "Startup brightness {} not reached, got {:.1}",
                    target, response.reached_brightness
                ),
                Err(e) => warn!("Startup brightness {} failed: {}", target, e),
            }
        }
    }

    /// Grab and publish at the configured frame rate until cancelled.
    ///
    /// Nothing is grabbed while nobody subscribes, the camera sleeps or an
    /// acquisition goal owns the stream.
    pub async fn spin(&self, cancel: CancellationToken) {
        let mut ticker = interval(self.config.camera.frame_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            "Streaming loop running at {:.1} fps",
            self.config.camera.frame_rate
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Streaming loop stopped");
                    break;
                }
                _ = ticker.tick() => {}
            }

            if !self.publisher.has_subscribers()
                || !self.controller.is_grabbing()
                || self.controller.acquisition_active()
            {
                continue;
            }

            let controller = Arc::clone(&self.controller);
            match blocking(move || controller.grab_image()).await {
                Ok(frame) => {
                    self.publisher.publish(frame);
                }
                Err(e) if e.is_recoverable() => debug!("Streaming grab skipped: {}", e),
                Err(e) => warn!("Streaming grab failed: {}", e),
            }
        }
    }

    /// Run until SIGINT, SIGTERM or [`CameraNode::request_shutdown`].
    /// Returns the process exit code.
    pub async fn run(&self) -> Result<i32> {
        self.start().await?;

        let spinner = {
            let node = self.clone();
            let token = self.cancellation_token.child_token();
            tokio::spawn(async move { node.spin(token).await })
        };

        let reason = self.wait_for_shutdown().await;
        info!("Shutdown initiated: {:?}", reason);

        let exit_code = self.shutdown().await;
        spinner
            .await
            .map_err(|e| CamnodeError::component("streaming".to_string(), e.to_string()))?;

        info!("Camera node shutdown complete");
        Ok(exit_code)
    }

    async fn wait_for_shutdown(&self) -> ShutdownReason {
        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(e) => {
                    warn!("Failed to register SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = self.cancellation_token.cancelled() => ShutdownReason::Requested,
            result = signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!("Ctrl+C handler failed: {}", e);
                }
                info!("Received SIGINT signal (Ctrl+C)");
                ShutdownReason::Signal("SIGINT".to_string())
            }
            _ = terminate => {
                info!("Received SIGTERM signal");
                ShutdownReason::Signal("SIGTERM".to_string())
            }
        }
    }

    /// Stop streaming and close the device; returns the exit code
    pub async fn shutdown(&self) -> i32 {
        info!("Beginning graceful shutdown");
        self.cancellation_token.cancel();

        let controller = Arc::clone(&self.controller);
        let outcome = blocking(move || {
            let stopped = controller.stop_grabbing();
            controller.close();
            stopped
        })
        .await;

        match outcome {
            Ok(()) => 0,
            Err(e) => {
                error!("Error stopping camera: {}", e);
                1
            }
        }
    }
}

use super::types::{
    ActionOutcome, FeedbackSink, GrabFeedback, GrabRequest, GrabResult, ReachedValues,
};
use crate::brightness::{calc_current_brightness, BrightnessSearchEngine};
use crate::camera::CameraController;
use crate::config::AcquisitionConfig;
use crate::driver::ParameterKind;
use crate::error::{AcquisitionError, CameraError};
use crate::frame::FrameData;
use crate::parameter::ParameterAdjuster;
use crate::publisher::ImagePublisher;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Runs acquisition goals against the shared camera controller
#[derive(Clone)]
pub struct AcquisitionExecutor {
    controller: Arc<CameraController>,
    adjuster: ParameterAdjuster,
    brightness: BrightnessSearchEngine,
    config: AcquisitionConfig,
    publisher: Option<ImagePublisher>,
}

/// Client side of an accepted goal
pub struct AcquisitionHandle {
    goal_id: Uuid,
    feedback: mpsc::UnboundedReceiver<GrabFeedback>,
    cancellation_token: CancellationToken,
    task: JoinHandle<Result<GrabResult, AcquisitionError>>,
}

impl AcquisitionHandle {
    pub fn goal_id(&self) -> Uuid {
        self.goal_id
    }

    /// Next feedback message; `None` once the goal has finished and every
    /// message has been received
    pub async fn next_feedback(&mut self) -> Option<GrabFeedback> {
        self.feedback.recv().await
    }

    /// Ask the goal to stop before its next image
    pub fn cancel(&self) {
        debug!("Cancellation requested for acquisition {}", self.goal_id);
        self.cancellation_token.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Wait for the terminal result
    pub async fn result(self) -> Result<GrabResult, AcquisitionError> {
        self.task.await.map_err(|e| AcquisitionError::TaskFailed {
            details: e.to_string(),
        })?
    }
}

impl AcquisitionExecutor {
    pub fn new(
        controller: Arc<CameraController>,
        adjuster: ParameterAdjuster,
        brightness: BrightnessSearchEngine,
        config: AcquisitionConfig,
    ) -> Self {
        Self {
            controller,
            adjuster,
            brightness,
            config,
            publisher: None,
        }
    }

    /// Also publish every captured image, ahead of its feedback
    pub fn with_publisher(mut self, publisher: ImagePublisher) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn validate(&self, request: &GrabRequest) -> Result<(), AcquisitionError> {
        if request.count == 0 {
            return Err(AcquisitionError::invalid_goal("image count must be at least 1"));
        }
        if request.count > self.config.max_images {
            return Err(AcquisitionError::invalid_goal(format!(
                "image count {} exceeds the limit of {}",
                request.count, self.config.max_images
            )));
        }
        if request.timeout_per_image == Some(Duration::ZERO) {
            return Err(AcquisitionError::invalid_goal(
                "timeout per image must be greater than 0",
            ));
        }
        request.exposure.validate("exposure", request.count)?;
        request.gain.validate("gain", request.count)?;
        request.gamma.validate("gamma", request.count)?;
        request.brightness.validate("brightness", request.count)?;
        Ok(())
    }

    /// Accept a goal and start it on a blocking worker.
    ///
    /// Must be called from within a tokio runtime. A sleeping camera, an
    /// invalid goal or an acquisition already in progress are rejected here
    /// without touching the device.
    pub fn submit(&self, request: GrabRequest) -> Result<AcquisitionHandle, AcquisitionError> {
        self.controller.ensure_awake()?;
        self.validate(&request)?;
        if self.controller.acquisition_active() {
            return Err(CameraError::Busy.into());
        }

        let goal_id = Uuid::new_v4();
        let (feedback_tx, feedback_rx) = mpsc::unbounded_channel();
        let cancellation_token = CancellationToken::new();

        info!(
            "Accepted acquisition goal {} for {} image(s)",
            goal_id, request.count
        );

        let executor = self.clone();
        let token = cancellation_token.clone();
        let task = tokio::task::spawn_blocking(move || {
            let mut sink = feedback_tx;
            executor.run_blocking(goal_id, &request, &token, &mut sink)
        });

        Ok(AcquisitionHandle {
            goal_id,
            feedback: feedback_rx,
            cancellation_token,
            task,
        })
    }

    /// Run a goal to completion on the calling thread.
    ///
    /// Cancellation is checked before every image, never during a grab. The
    /// exclusion domain is taken and released once per image so other
    /// requests can interleave between images.
    pub fn run_blocking(
        &self,
        goal_id: Uuid,
        request: &GrabRequest,
        cancel: &CancellationToken,
        sink: &mut dyn FeedbackSink,
    ) -> Result<GrabResult, AcquisitionError> {
        self.controller.ensure_awake()?;
        self.validate(request)?;
        let _lease = self.controller.begin_acquisition()?;

        if !self.controller.is_grabbing() && !self.controller.start_grabbing() {
            return Err(CameraError::NotGrabbing.into());
        }

        let timeout = request
            .timeout_per_image
            .unwrap_or_else(|| self.config.default_timeout_per_image());
        let mut result = GrabResult::new(goal_id, request.count);

        for index in 0..request.count as usize {
            if cancel.is_cancelled() {
                info!(
                    "Acquisition {} preempted after {}/{} image(s)",
                    goal_id, result.success_count, request.count
                );
                return Ok(result.finish(ActionOutcome::Preempted));
            }

            match self.acquire_one(request, index, timeout) {
                Ok((frame, reached)) => {
                    let frame_id = frame.id;
                    if let Some(publisher) = &self.publisher {
                        publisher.publish(frame.clone());
                    }
                    result.push(frame, reached);
                    debug!(
                        "Acquisition {}: image {}/{} (frame {}, brightness {:.1})",
                        goal_id, result.success_count, request.count, frame_id, reached.brightness
                    );
                    sink.publish(GrabFeedback {
                        goal_id,
                        images_completed: result.success_count,
                        frame_id,
                        reached,
                    });
                }
                Err(e) => {
                    warn!(
                        "Acquisition {} aborted at image {}/{}: {}",
                        goal_id,
                        index + 1,
                        request.count,
                        e
                    );
                    return Ok(result.abort(e));
                }
            }
        }

        info!(
            "Acquisition {} succeeded with {} image(s)",
            goal_id, result.success_count
        );
        Ok(result.finish(ActionOutcome::Succeeded))
    }

    fn acquire_one(
        &self,
        request: &GrabRequest,
        index: usize,
        timeout: Duration,
    ) -> Result<(FrameData, ReachedValues), AcquisitionError> {
        let _session = self.controller.session();

        if let Some(value) = request.exposure.value_for(index) {
            self.adjuster.set_exposure(value)?;
        }
        if let Some(value) = request.gain.value_for(index) {
            self.adjuster.set_gain(value)?;
        }
        if let Some(value) = request.gamma.value_for(index) {
            self.adjuster.set_gamma(value)?;
        }
        if let Some(target) = request.brightness.value_for(index) {
            let report = self.brightness.set_brightness(
                target.round() as i32,
                request.exposure_auto,
                request.gain_auto,
            )?;
            if !report.converged {
                debug!(
                    "Image {} taken at brightness {:.1} instead of {}",
                    index + 1,
                    report.reached_brightness,
                    report.target
                );
            }
        }

        let frame = self.controller.grab_image_with_timeout(timeout)?;
        let reached = ReachedValues {
            exposure: self.adjuster.current(ParameterKind::Exposure).ok(),
            gain: self.adjuster.current(ParameterKind::Gain).ok(),
            gamma: self.adjuster.current(ParameterKind::Gamma).ok(),
            brightness: calc_current_brightness(&frame),
        };
        Ok((frame, reached))
    }
}

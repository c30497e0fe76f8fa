use crate::error::AcquisitionError;
use crate::frame::FrameData;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::trace;
use uuid::Uuid;

/// Per-image value of one parameter in a goal
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum ParameterSchedule {
    /// Leave the parameter as it is
    #[default]
    Unchanged,
    /// Same value before every image
    Fixed(f64),
    /// One value per image, in acquisition order
    PerImage(Vec<f64>),
}

impl ParameterSchedule {
    pub fn value_for(&self, index: usize) -> Option<f64> {
        match self {
            ParameterSchedule::Unchanged => None,
            ParameterSchedule::Fixed(value) => Some(*value),
            ParameterSchedule::PerImage(values) => values.get(index).copied(),
        }
    }

    pub fn is_unchanged(&self) -> bool {
        matches!(self, ParameterSchedule::Unchanged)
    }

    pub(crate) fn validate(&self, name: &str, count: u32) -> Result<(), AcquisitionError> {
        match self {
            ParameterSchedule::PerImage(values) if values.len() != count as usize => {
                Err(AcquisitionError::invalid_goal(format!(
                    "{} schedule has {} value(s) for {} image(s)",
                    name,
                    values.len(),
                    count
                )))
            }
            ParameterSchedule::Fixed(value) if !value.is_finite() => Err(
                AcquisitionError::invalid_goal(format!("{} value {} is not finite", name, value)),
            ),
            ParameterSchedule::PerImage(values) if values.iter().any(|v| !v.is_finite()) => Err(
                AcquisitionError::invalid_goal(format!("{} schedule contains a non-finite value", name)),
            ),
            _ => Ok(()),
        }
    }
}

/// Acquisition goal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrabRequest {
    pub count: u32,
    #[serde(default)]
    pub exposure: ParameterSchedule,
    #[serde(default)]
    pub gain: ParameterSchedule,
    #[serde(default)]
    pub gamma: ParameterSchedule,
    /// Target mean brightness, searched before each image
    #[serde(default)]
    pub brightness: ParameterSchedule,
    #[serde(default)]
    pub exposure_auto: bool,
    #[serde(default)]
    pub gain_auto: bool,
    /// Falls back to the configured default when absent
    #[serde(default)]
    pub timeout_per_image: Option<Duration>,
}

impl GrabRequest {
    pub fn new(count: u32) -> Self {
        Self {
            count,
            exposure: ParameterSchedule::Unchanged,
            gain: ParameterSchedule::Unchanged,
            gamma: ParameterSchedule::Unchanged,
            brightness: ParameterSchedule::Unchanged,
            exposure_auto: true,
            gain_auto: true,
            timeout_per_image: None,
        }
    }

    pub fn with_exposure(mut self, schedule: ParameterSchedule) -> Self {
        self.exposure = schedule;
        self
    }

    pub fn with_gain(mut self, schedule: ParameterSchedule) -> Self {
        self.gain = schedule;
        self
    }

    pub fn with_gamma(mut self, schedule: ParameterSchedule) -> Self {
        self.gamma = schedule;
        self
    }

    pub fn with_brightness(mut self, schedule: ParameterSchedule) -> Self {
        self.brightness = schedule;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_per_image = Some(timeout);
        self
    }
}

/// Parameter values in effect when an image was captured
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ReachedValues {
    pub exposure: Option<f64>,
    pub gain: Option<f64>,
    pub gamma: Option<f64>,
    /// Mean brightness of the captured frame
    pub brightness: f64,
}

/// Progress report, published once per captured image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrabFeedback {
    pub goal_id: Uuid,
    pub images_completed: u32,
    pub frame_id: u64,
    pub reached: ReachedValues,
}

/// Terminal state of a goal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionOutcome {
    Succeeded,
    Preempted,
    Aborted,
}

#[derive(Debug, Clone)]
pub struct GrabResult {
    pub goal_id: Uuid,
    /// Captured frames in acquisition order
    pub images: Vec<FrameData>,
    pub success_count: u32,
    pub reached_all_requested: bool,
    /// Reached values per captured image
    pub reached: Vec<ReachedValues>,
    pub outcome: ActionOutcome,
    /// Failure that aborted the goal
    pub error: Option<AcquisitionError>,
    requested: u32,
}

impl GrabResult {
    pub(crate) fn new(goal_id: Uuid, requested: u32) -> Self {
        Self {
            goal_id,
            images: Vec::with_capacity(requested as usize),
            success_count: 0,
            reached_all_requested: false,
            reached: Vec::with_capacity(requested as usize),
            outcome: ActionOutcome::Aborted,
            error: None,
            requested,
        }
    }

    pub fn requested(&self) -> u32 {
        self.requested
    }

    pub(crate) fn push(&mut self, frame: FrameData, reached: ReachedValues) {
        self.images.push(frame);
        self.reached.push(reached);
        self.success_count += 1;
    }

    pub(crate) fn finish(mut self, outcome: ActionOutcome) -> Self {
        self.reached_all_requested =
            outcome == ActionOutcome::Succeeded && self.success_count == self.requested;
        self.outcome = outcome;
        self
    }

    pub(crate) fn abort(mut self, error: AcquisitionError) -> Self {
        self.error = Some(error);
        self.finish(ActionOutcome::Aborted)
    }
}

/// Receives feedback from a running goal
pub trait FeedbackSink: Send {
    fn publish(&mut self, feedback: GrabFeedback);
}

impl FeedbackSink for mpsc::UnboundedSender<GrabFeedback> {
    fn publish(&mut self, feedback: GrabFeedback) {
        if self.send(feedback).is_err() {
            trace!("Feedback receiver dropped, continuing without progress reports");
        }
    }
}

impl FeedbackSink for Vec<GrabFeedback> {
    fn publish(&mut self, feedback: GrabFeedback) {
        self.push(feedback);
    }
}

//! Cancellable multi-image acquisition.
//!
//! A goal runs on a blocking worker, reports feedback once per captured image
//! and always returns whatever it captured, whether it succeeded, was
//! preempted or aborted.

mod executor;
mod types;
#[cfg(test)]
mod tests;

pub use executor::{AcquisitionExecutor, AcquisitionHandle};
pub use types::{
    ActionOutcome, FeedbackSink, GrabFeedback, GrabRequest, GrabResult, ParameterSchedule,
    ReachedValues,
};

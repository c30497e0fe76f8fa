use crate::config::CameraConfig;
use crate::driver::{BrightnessRange, DeviceDriver, ParameterKind, ParameterRange};
use crate::error::{CameraError, GrabError};
use crate::frame::{FrameData, FramePostProcessor};
use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

type DeviceCell = RefCell<Box<dyn DeviceDriver>>;

/// Device lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CameraState {
    Stopped,
    Grabbing,
    Sleeping,
}

impl fmt::Display for CameraState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraState::Stopped => write!(f, "stopped"),
            CameraState::Grabbing => write!(f, "grabbing"),
            CameraState::Sleeping => write!(f, "sleeping"),
        }
    }
}

/// Exclusive hold on the device.
///
/// The hold is re-entrant: the thread holding a session may keep calling any
/// controller method, and nested calls re-enter the same exclusion domain.
/// Other threads queue until the session is dropped, and are let in in the
/// order they arrived.
pub struct DeviceSession<'a> {
    guard: Option<ReentrantMutexGuard<'a, DeviceCell>>,
}

impl Drop for DeviceSession<'_> {
    fn drop(&mut self) {
        if let Some(guard) = self.guard.take() {
            // Longest waiter goes next
            ReentrantMutexGuard::unlock_fair(guard);
        }
    }
}

/// Marks the calling thread as the owner of the running acquisition
pub struct AcquisitionLease<'a> {
    controller: &'a CameraController,
}

impl Drop for AcquisitionLease<'_> {
    fn drop(&mut self) {
        *self.controller.acquisition_owner.lock() = None;
        debug!("Acquisition lease released");
    }
}

/// Owner of the single hardware handle.
///
/// Every driver call goes through one re-entrant lock, so no two
/// device-touching operations ever overlap. The lock is held per call, never
/// across a whole batch.
pub struct CameraController {
    device: ReentrantMutex<DeviceCell>,
    state: Mutex<CameraState>,
    resume_after_wake: AtomicBool,
    acquisition_owner: Mutex<Option<ThreadId>>,
    post_processors: Vec<Arc<dyn FramePostProcessor>>,
    camera_frame: Arc<str>,
    grab_timeout: Duration,
    ready_poll_interval: Duration,
    frame_counter: AtomicU64,
}

impl CameraController {
    /// Create a controller around an unopened driver
    pub fn new(
        driver: Box<dyn DeviceDriver>,
        config: &CameraConfig,
        post_processors: Vec<Arc<dyn FramePostProcessor>>,
    ) -> Self {
        info!(
            "Initializing camera controller (grab timeout {:?}, {} post-processor(s))",
            config.grab_timeout(),
            post_processors.len()
        );

        Self {
            device: ReentrantMutex::new(RefCell::new(driver)),
            state: Mutex::new(CameraState::Stopped),
            resume_after_wake: AtomicBool::new(false),
            acquisition_owner: Mutex::new(None),
            post_processors,
            camera_frame: Arc::from(config.camera_frame.as_str()),
            grab_timeout: config.grab_timeout(),
            ready_poll_interval: config.ready_poll_interval(),
            frame_counter: AtomicU64::new(0),
        }
    }

    /// Enter the exclusion domain for the lifetime of the returned session
    pub fn session(&self) -> DeviceSession<'_> {
        DeviceSession {
            guard: Some(self.device.lock()),
        }
    }

    /// Run one driver call inside the exclusion domain.
    ///
    /// `f` must not call back into the controller.
    pub(crate) fn with_device<R>(&self, f: impl FnOnce(&mut dyn DeviceDriver) -> R) -> R {
        let guard = self.device.lock();
        let result = {
            let mut device = guard.borrow_mut();
            f(&mut **device)
        };
        ReentrantMutexGuard::unlock_fair(guard);
        result
    }

    pub fn state(&self) -> CameraState {
        *self.state.lock()
    }

    pub fn is_sleeping(&self) -> bool {
        self.state() == CameraState::Sleeping
    }

    pub fn is_grabbing(&self) -> bool {
        self.state() == CameraState::Grabbing
    }

    fn set_state(&self, next: CameraState) {
        let mut state = self.state.lock();
        if *state != next {
            info!("Camera state changed: {} -> {}", *state, next);
            *state = next;
        }
    }

    /// Fail fast instead of waiting for a sleeping device
    pub fn ensure_awake(&self) -> Result<(), CameraError> {
        if self.is_sleeping() {
            return Err(CameraError::Sleeping);
        }
        Ok(())
    }

    pub fn open(&self) -> Result<(), CameraError> {
        let _session = self.session();
        self.with_device(|device| device.open())?;
        info!("Camera device opened");
        Ok(())
    }

    pub fn close(&self) {
        let _session = self.session();
        if self.is_grabbing() {
            if let Err(e) = self.with_device(|device| device.stop_stream()) {
                warn!("Failed to stop streaming before close: {}", e);
            }
        }
        self.with_device(|device| device.close());
        self.resume_after_wake.store(false, Ordering::Relaxed);
        self.set_state(CameraState::Stopped);
        info!("Camera device closed");
    }

    /// Stopped -> Grabbing. Returns false without a state change when the
    /// device is sleeping or the driver refuses to stream.
    pub fn start_grabbing(&self) -> bool {
        let _session = self.session();
        match self.state() {
            CameraState::Grabbing => return true,
            CameraState::Sleeping => {
                warn!("Refusing to start grabbing while the camera is sleeping");
                return false;
            }
            CameraState::Stopped => {}
        }

        match self.with_device(|device| device.start_stream()) {
            Ok(()) => {
                self.set_state(CameraState::Grabbing);
                true
            }
            Err(e) => {
                error!("Failed to start grabbing: {}", e);
                false
            }
        }
    }

    pub fn stop_grabbing(&self) -> Result<(), CameraError> {
        let _session = self.session();
        if !self.is_grabbing() {
            debug!("Camera is not grabbing");
            return Ok(());
        }
        self.with_device(|device| device.stop_stream())?;
        self.set_state(CameraState::Stopped);
        Ok(())
    }

    /// Grab one frame with the configured timeout
    pub fn grab_image(&self) -> Result<FrameData, GrabError> {
        self.grab_image_with_timeout(self.grab_timeout)
    }

    /// Grab one frame, blocking until it arrives or `timeout` elapses.
    ///
    /// A timeout leaves the state untouched; the session stays usable.
    pub fn grab_image_with_timeout(&self, timeout: Duration) -> Result<FrameData, GrabError> {
        let raw = {
            let _session = self.session();
            match self.state() {
                CameraState::Sleeping => return Err(CameraError::Sleeping.into()),
                CameraState::Stopped => return Err(CameraError::NotGrabbing.into()),
                CameraState::Grabbing => {}
            }
            self.with_device(|device| device.grab_one(timeout))
                .map_err(|e| {
                    let err = GrabError::from(e);
                    warn!("Frame grab failed: {}", err);
                    err
                })?
        };

        let id = self.frame_counter.fetch_add(1, Ordering::Relaxed) + 1;
        let mut frame = FrameData {
            id,
            camera_frame: Arc::clone(&self.camera_frame),
            ..raw
        };
        for processor in &self.post_processors {
            trace!("Applying post-processor '{}' to frame {}", processor.name(), id);
            frame = processor.process(frame);
        }

        trace!(
            "Grabbed frame {} ({}x{}, {} bytes)",
            frame.id,
            frame.width,
            frame.height,
            frame.data.len()
        );
        Ok(frame)
    }

    /// Poll readiness until true or `timeout` elapses.
    ///
    /// The exclusion domain is held only for each poll, so pending operations
    /// interleave with the wait. Callers must re-check state afterwards.
    pub fn wait_for_camera(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.with_device(|device| device.is_ready()) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                warn!("Camera not ready after {:?}", timeout);
                return false;
            }
            thread::sleep(self.ready_poll_interval.min(deadline - now));
        }
    }

    pub fn enter_sleep(&self) -> Result<(), CameraError> {
        let _session = self.session();
        let was_grabbing = match self.state() {
            CameraState::Sleeping => return Ok(()),
            CameraState::Grabbing => true,
            CameraState::Stopped => false,
        };

        if was_grabbing {
            self.with_device(|device| device.stop_stream())?;
            self.set_state(CameraState::Stopped);
        }
        self.with_device(|device| device.enter_sleep())?;

        self.resume_after_wake.store(was_grabbing, Ordering::Relaxed);
        self.set_state(CameraState::Sleeping);
        Ok(())
    }

    /// Leave sleep; resumes streaming if the camera was grabbing before
    pub fn wake(&self) -> Result<(), CameraError> {
        let _session = self.session();
        if !self.is_sleeping() {
            return Ok(());
        }

        self.with_device(|device| device.wake())?;
        self.set_state(CameraState::Stopped);

        if self.resume_after_wake.swap(false, Ordering::Relaxed) && !self.start_grabbing() {
            warn!("Camera woke up but streaming could not be resumed");
        }
        Ok(())
    }

    pub fn parameter_range(&self, kind: ParameterKind) -> ParameterRange {
        self.with_device(|device| device.parameter_range(kind))
    }

    pub fn native_auto_range(&self) -> BrightnessRange {
        self.with_device(|device| device.native_auto_range())
    }

    pub fn set_digital_output(&self, output_id: u8, on: bool) -> Result<(), CameraError> {
        self.ensure_awake()?;
        self.with_device(|device| device.set_digital_output(output_id, on))?;
        debug!("Digital output {} set to {}", output_id, on);
        Ok(())
    }

    /// Claim the device for a batch acquisition on the calling thread
    pub fn begin_acquisition(&self) -> Result<AcquisitionLease<'_>, CameraError> {
        let mut owner = self.acquisition_owner.lock();
        if owner.is_some() {
            return Err(CameraError::Busy);
        }
        *owner = Some(thread::current().id());
        debug!("Acquisition lease taken");
        Ok(AcquisitionLease { controller: self })
    }

    pub fn acquisition_active(&self) -> bool {
        self.acquisition_owner.lock().is_some()
    }

    /// True when an acquisition runs on a thread other than the caller's
    pub fn acquisition_active_elsewhere(&self) -> bool {
        matches!(*self.acquisition_owner.lock(), Some(owner) if owner != thread::current().id())
    }

    /// Number of frames delivered so far
    pub fn frame_count(&self) -> u64 {
        self.frame_counter.load(Ordering::Relaxed)
    }
}

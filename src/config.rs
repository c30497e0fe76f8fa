use crate::driver::{BrightnessRange, ParameterRange, SimulationSettings};
use crate::frame::Rotation;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

const MAX_FRAME_RATE_HZ: f64 = 1000.0;
const MIN_FRAME_INTERVAL: Duration = Duration::from_millis(1);
const MAX_FRAME_INTERVAL: Duration = Duration::from_secs(3600);

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CamnodeConfig {
    pub camera: CameraConfig,
    pub parameters: ParameterConfig,
    pub brightness: BrightnessConfig,
    pub acquisition: AcquisitionConfig,
    pub startup: StartupConfig,
    pub simulation: SimulationConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CameraConfig {
    /// User-assigned device id to open ("" opens the first device found)
    #[serde(default = "default_device_user_id")]
    pub device_user_id: String,

    /// Frame id stamped on every published image
    #[serde(default = "default_camera_frame")]
    pub camera_frame: String,

    /// Streaming rate of the spin loop in Hz, at most 1000
    #[serde(default = "default_frame_rate")]
    pub frame_rate: f64,

    /// Upper bound for a single frame retrieval
    #[serde(default = "default_grab_timeout_ms")]
    pub grab_timeout_ms: u64,

    /// Polling interval while waiting for the device to become ready
    #[serde(default = "default_ready_poll_ms")]
    pub ready_poll_ms: u64,

    /// How long startup waits for the device to become ready
    #[serde(default = "default_startup_timeout_ms")]
    pub startup_timeout_ms: u64,

    /// Rotation applied to every grabbed frame
    pub rotation: Option<Rotation>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ParameterConfig {
    /// Absolute exposure tolerance in microseconds
    #[serde(default = "default_exposure_abs_tolerance")]
    pub exposure_abs_tolerance_us: f64,

    /// Exposure tolerance relative to the target, used when larger than the absolute one
    #[serde(default = "default_exposure_rel_tolerance")]
    pub exposure_rel_tolerance: f64,

    /// Gain tolerance in percent
    #[serde(default = "default_gain_tolerance")]
    pub gain_tolerance: f64,

    #[serde(default = "default_gamma_tolerance")]
    pub gamma_tolerance: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BrightnessConfig {
    /// Accepted distance between reached and target mean brightness
    #[serde(default = "default_brightness_tolerance")]
    pub tolerance: f64,

    /// Upper bound on probes across all phases of the extended search
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AcquisitionConfig {
    /// Per-image timeout used when a goal does not specify one
    #[serde(default = "default_timeout_per_image_ms")]
    pub default_timeout_per_image_ms: u64,

    /// Largest image count accepted in a single goal
    #[serde(default = "default_max_images")]
    pub max_images: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct StartupConfig {
    pub exposure: Option<f64>,
    pub gain: Option<f64>,
    pub gamma: Option<f64>,
    pub brightness: Option<u8>,

    #[serde(default = "default_true")]
    pub exposure_auto: bool,

    #[serde(default = "default_true")]
    pub gain_auto: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SimulationConfig {
    #[serde(default = "default_sim_width")]
    pub width: u32,

    #[serde(default = "default_sim_height")]
    pub height: u32,

    /// Brightness gained per microsecond of exposure at zero gain
    #[serde(default = "default_scene_radiance")]
    pub scene_radiance: f64,

    #[serde(default = "default_exposure_range")]
    pub exposure_range: (f64, f64),

    #[serde(default = "default_gain_range")]
    pub gain_range: (f64, f64),

    #[serde(default = "default_gamma_range")]
    pub gamma_range: (f64, f64),

    #[serde(default = "default_native_auto_range")]
    pub native_auto_range: (u8, u8),

    #[serde(default)]
    pub grab_delay_ms: u64,
}

impl CameraConfig {
    pub fn grab_timeout(&self) -> Duration {
        Duration::from_millis(self.grab_timeout_ms)
    }

    pub fn ready_poll_interval(&self) -> Duration {
        Duration::from_millis(self.ready_poll_ms)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    /// Spin period, kept within [1 ms, 1 h] whatever the configured rate
    pub fn frame_interval(&self) -> Duration {
        Duration::try_from_secs_f64(1.0 / self.frame_rate)
            .unwrap_or(MAX_FRAME_INTERVAL)
            .clamp(MIN_FRAME_INTERVAL, MAX_FRAME_INTERVAL)
    }
}

impl AcquisitionConfig {
    pub fn default_timeout_per_image(&self) -> Duration {
        Duration::from_millis(self.default_timeout_per_image_ms)
    }
}

impl SimulationConfig {
    pub fn settings(&self) -> SimulationSettings {
        SimulationSettings {
            width: self.width,
            height: self.height,
            scene_radiance: self.scene_radiance,
            exposure_range: ParameterRange::new(self.exposure_range.0, self.exposure_range.1),
            gain_range: ParameterRange::new(self.gain_range.0, self.gain_range.1),
            gamma_range: ParameterRange::new(self.gamma_range.0, self.gamma_range.1),
            native_auto_range: BrightnessRange::new(
                self.native_auto_range.0,
                self.native_auto_range.1,
            ),
            grab_delay: Duration::from_millis(self.grab_delay_ms),
            ..SimulationSettings::default()
        }
    }
}

impl CamnodeConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("camnode.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            // Start with default values
            .set_default("camera.device_user_id", default_device_user_id())?
            .set_default("camera.camera_frame", default_camera_frame())?
            .set_default("camera.frame_rate", default_frame_rate())?
            .set_default("camera.grab_timeout_ms", default_grab_timeout_ms())?
            .set_default("camera.ready_poll_ms", default_ready_poll_ms())?
            .set_default("camera.startup_timeout_ms", default_startup_timeout_ms())?
            .set_default(
                "parameters.exposure_abs_tolerance_us",
                default_exposure_abs_tolerance(),
            )?
            .set_default(
                "parameters.exposure_rel_tolerance",
                default_exposure_rel_tolerance(),
            )?
            .set_default("parameters.gain_tolerance", default_gain_tolerance())?
            .set_default("parameters.gamma_tolerance", default_gamma_tolerance())?
            .set_default("brightness.tolerance", default_brightness_tolerance())?
            .set_default("brightness.max_iterations", default_max_iterations())?
            .set_default(
                "acquisition.default_timeout_per_image_ms",
                default_timeout_per_image_ms(),
            )?
            .set_default("acquisition.max_images", default_max_images())?
            .set_default("startup.exposure_auto", default_true())?
            .set_default("startup.gain_auto", default_true())?
            .set_default("simulation.width", default_sim_width())?
            .set_default("simulation.height", default_sim_height())?
            .set_default("simulation.scene_radiance", default_scene_radiance())?
            .set_default(
                "simulation.exposure_range",
                vec![default_exposure_range().0, default_exposure_range().1],
            )?
            .set_default(
                "simulation.gain_range",
                vec![default_gain_range().0, default_gain_range().1],
            )?
            .set_default(
                "simulation.gamma_range",
                vec![default_gamma_range().0, default_gamma_range().1],
            )?
            .set_default(
                "simulation.native_auto_range",
                vec![
                    default_native_auto_range().0 as i64,
                    default_native_auto_range().1 as i64,
                ],
            )?
            .set_default("simulation.grab_delay_ms", 0)?
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // Environment variables, e.g. CAMNODE__CAMERA__FRAME_RATE=10
            .add_source(Environment::with_prefix("CAMNODE").separator("__"))
            .build()?;

        let config: CamnodeConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.camera.frame_rate.is_nan()
            || self.camera.frame_rate <= 0.0
            || self.camera.frame_rate > MAX_FRAME_RATE_HZ
        {
            return Err(ConfigError::Message(format!(
                "Camera frame_rate must be in (0, {}]",
                MAX_FRAME_RATE_HZ
            )));
        }

        if self.camera.camera_frame.is_empty() {
            return Err(ConfigError::Message(
                "Camera camera_frame must not be empty".to_string(),
            ));
        }

        if self.camera.grab_timeout_ms == 0 || self.camera.ready_poll_ms == 0 {
            return Err(ConfigError::Message(
                "Camera grab_timeout_ms and ready_poll_ms must be greater than 0".to_string(),
            ));
        }

        if self.parameters.exposure_abs_tolerance_us <= 0.0
            || self.parameters.exposure_rel_tolerance < 0.0
            || self.parameters.gain_tolerance <= 0.0
            || self.parameters.gamma_tolerance <= 0.0
        {
            return Err(ConfigError::Message(
                "Parameter tolerances must be positive".to_string(),
            ));
        }

        if self.brightness.tolerance <= 0.0 {
            return Err(ConfigError::Message(
                "Brightness tolerance must be greater than 0".to_string(),
            ));
        }

        if self.brightness.max_iterations == 0 {
            return Err(ConfigError::Message(
                "Brightness max_iterations must be greater than 0".to_string(),
            ));
        }

        if self.acquisition.default_timeout_per_image_ms == 0 || self.acquisition.max_images == 0 {
            return Err(ConfigError::Message(
                "Acquisition timeout and max_images must be greater than 0".to_string(),
            ));
        }

        if let Some(brightness) = self.startup.brightness {
            if brightness == 0 {
                return Err(ConfigError::Message(
                    "Startup brightness must be in [1, 255]".to_string(),
                ));
            }
        }

        let sim = &self.simulation;
        if sim.width == 0 || sim.height == 0 {
            return Err(ConfigError::Message(
                "Simulated frame size must be greater than 0".to_string(),
            ));
        }

        let ranges = [sim.exposure_range, sim.gain_range, sim.gamma_range];
        if ranges.iter().any(|(min, max)| min > max)
            || sim.native_auto_range.0 > sim.native_auto_range.1
        {
            return Err(ConfigError::Message(
                "Simulated ranges must not be inverted".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for CamnodeConfig {
    fn default() -> Self {
        Self {
            camera: CameraConfig {
                device_user_id: default_device_user_id(),
                camera_frame: default_camera_frame(),
                frame_rate: default_frame_rate(),
                grab_timeout_ms: default_grab_timeout_ms(),
                ready_poll_ms: default_ready_poll_ms(),
                startup_timeout_ms: default_startup_timeout_ms(),
                rotation: None,
            },
            parameters: ParameterConfig {
                exposure_abs_tolerance_us: default_exposure_abs_tolerance(),
                exposure_rel_tolerance: default_exposure_rel_tolerance(),
                gain_tolerance: default_gain_tolerance(),
                gamma_tolerance: default_gamma_tolerance(),
            },
            brightness: BrightnessConfig {
                tolerance: default_brightness_tolerance(),
                max_iterations: default_max_iterations(),
            },
            acquisition: AcquisitionConfig {
                default_timeout_per_image_ms: default_timeout_per_image_ms(),
                max_images: default_max_images(),
            },
            startup: StartupConfig {
                exposure_auto: default_true(),
                gain_auto: default_true(),
                ..StartupConfig::default()
            },
            simulation: SimulationConfig {
                width: default_sim_width(),
                height: default_sim_height(),
                scene_radiance: default_scene_radiance(),
                exposure_range: default_exposure_range(),
                gain_range: default_gain_range(),
                gamma_range: default_gamma_range(),
                native_auto_range: default_native_auto_range(),
                grab_delay_ms: 0,
            },
        }
    }
}

// Default value functions
fn default_device_user_id() -> String {
    String::new()
}
fn default_camera_frame() -> String {
    "camera".to_string()
}
fn default_frame_rate() -> f64 {
    5.0
}
fn default_grab_timeout_ms() -> u64 {
    500
}
fn default_ready_poll_ms() -> u64 {
    50
}
fn default_startup_timeout_ms() -> u64 {
    5000
}

fn default_exposure_abs_tolerance() -> f64 {
    1.0
}
fn default_exposure_rel_tolerance() -> f64 {
    0.01
}
fn default_gain_tolerance() -> f64 {
    0.5
}
fn default_gamma_tolerance() -> f64 {
    0.01
}

fn default_brightness_tolerance() -> f64 {
    2.0
}
fn default_max_iterations() -> u32 {
    20
}

fn default_timeout_per_image_ms() -> u64 {
    1000
}
fn default_max_images() -> u32 {
    1000
}

fn default_true() -> bool {
    true
}

fn default_sim_width() -> u32 {
    64
}
fn default_sim_height() -> u32 {
    48
}
fn default_scene_radiance() -> f64 {
    0.004
}
fn default_exposure_range() -> (f64, f64) {
    (100.0, 50000.0)
}
fn default_gain_range() -> (f64, f64) {
    (0.0, 100.0)
}
fn default_gamma_range() -> (f64, f64) {
    (0.25, 4.0)
}
fn default_native_auto_range() -> (u8, u8) {
    (50, 205)
}

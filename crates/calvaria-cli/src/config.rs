//! TOML configuration deserialisation for planning jobs.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use calvaria_core::report::{ActFormat, Delimiter};
use calvaria_core::PlanParams;
use calvaria_geometry::rasterise::PhantomLayer;
use calvaria_materials::MaterialError;

/// Top-level job configuration.
#[derive(Debug, Deserialize)]
pub struct JobConfig {
    pub volume: VolumeConfig,
    pub transducer: TransducerConfig,
    #[serde(default)]
    pub target: TargetConfig,
    #[serde(default)]
    pub params: PlanParams,
    #[serde(default)]
    pub envelope: EnvelopeConfig,
    #[serde(default)]
    pub compute: ComputeConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Synthetic phantom volume.
#[derive(Debug, Deserialize)]
pub struct VolumeConfig {
    pub dims: [usize; 3],
    #[serde(default = "default_spacing")]
    pub spacing: [f64; 3],
    /// HU outside every layer (default: 40, soft tissue).
    #[serde(default = "default_background")]
    pub background_hu: f32,
    /// Painted in order; later layers overwrite earlier ones.
    #[serde(default, rename = "layer")]
    pub layers: Vec<PhantomLayer>,
}

fn default_spacing() -> [f64; 3] {
    [1.0; 3]
}
fn default_background() -> f32 {
    40.0
}

/// Transducer element source: either a generated cap or an element file.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ElementSource {
    Hemisphere {
        radius_mm: f64,
        elements: usize,
        #[serde(default = "default_aperture")]
        aperture_deg: f64,
    },
    File {
        element_file: PathBuf,
    },
}

fn default_aperture() -> f64 {
    120.0
}

#[derive(Debug, Deserialize)]
pub struct TransducerConfig {
    #[serde(flatten)]
    pub source: ElementSource,
    #[serde(default)]
    pub tilt_x_deg: f64,
    #[serde(default)]
    pub tilt_y_deg: f64,
}

#[derive(Debug, Default, Deserialize)]
pub struct TargetConfig {
    #[serde(default)]
    pub natural_focus: [f64; 3],
    #[serde(default)]
    pub steering: [f64; 3],
}

/// Envelope grid selection.
#[derive(Debug, Deserialize)]
pub struct EnvelopeConfig {
    /// "interactive", "export" or "slice" (default: "interactive").
    #[serde(default = "default_envelope_mode")]
    pub mode: String,
    /// Half-width of a slice (mm).
    #[serde(default = "default_slice_half")]
    pub slice_half_extent_mm: f64,
    #[serde(default = "default_slice_points")]
    pub slice_points: usize,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for EnvelopeConfig {
    fn default() -> Self {
        Self {
            mode: default_envelope_mode(),
            slice_half_extent_mm: default_slice_half(),
            slice_points: default_slice_points(),
            enabled: true,
        }
    }
}

fn default_envelope_mode() -> String {
    "interactive".into()
}
fn default_slice_half() -> f64 {
    15.0
}
fn default_slice_points() -> usize {
    61
}

#[derive(Debug, Deserialize)]
pub struct ComputeConfig {
    /// Compute backend: "serial" or "cpu". Default: "serial".
    #[serde(default = "default_backend")]
    pub backend: String,
    /// Worker threads for the CPU backend (default: Rayon's choice).
    #[serde(default)]
    pub threads: Option<usize>,
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            threads: None,
        }
    }
}

fn default_backend() -> String {
    "serial".into()
}

/// Output configuration.
#[derive(Debug, Deserialize)]
pub struct OutputConfig {
    /// Output directory (default: "./output").
    #[serde(default = "default_output_dir")]
    pub directory: String,
    #[serde(default)]
    pub delimiter: Delimiter,
    #[serde(default)]
    pub act_format: ActFormat,
    /// Whether to save the JSON summary (default: true).
    #[serde(default = "default_true")]
    pub save_json: bool,
    /// Whether to save the beam-path table (default: true).
    #[serde(default = "default_true")]
    pub save_beam_paths: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_output_dir(),
            delimiter: Delimiter::default(),
            act_format: ActFormat::default(),
            save_json: true,
            save_beam_paths: true,
        }
    }
}

fn default_output_dir() -> String {
    "./output".into()
}
fn default_true() -> bool {
    true
}

impl JobConfig {
    /// Reject settings the engine cannot run with; warn on unusual ones.
    pub fn validate(&self) -> Result<()> {
        if self.volume.dims.iter().any(|&n| n == 0) {
            anyhow::bail!("volume.dims must be positive, got {:?}", self.volume.dims);
        }
        if !self.volume.spacing.iter().all(|s| s.is_finite() && *s > 0.0) {
            anyhow::bail!("volume.spacing must be positive, got {:?}", self.volume.spacing);
        }
        self.params.validate().context("Invalid [params]")?;
        if let Err(e) = in_user_range(&self.params) {
            eprintln!("Warning: {}", e);
        }
        match self.compute.backend.as_str() {
            "serial" | "cpu" => {}
            other => anyhow::bail!("Unknown compute backend '{}'. Valid backends: serial, cpu", other),
        }
        match self.envelope.mode.as_str() {
            "interactive" | "export" | "slice" => {}
            other => anyhow::bail!("Unknown envelope mode '{}'. Valid modes: interactive, export, slice", other),
        }
        Ok(())
    }
}

fn in_user_range(params: &PlanParams) -> std::result::Result<(), MaterialError> {
    use calvaria_materials::bone::{MAX_FREQUENCY_HZ, MAX_USER_SPEED, MIN_FREQUENCY_HZ, MIN_USER_SPEED};
    let speeds = &params.bone_speeds;
    if let Some(&speed) = [speeds.bone_speed, speeds.refraction_speed]
        .iter()
        .find(|c| !(MIN_USER_SPEED..=MAX_USER_SPEED).contains(*c))
    {
        return Err(MaterialError::InvalidSpeed(speed));
    }
    if !(MIN_FREQUENCY_HZ..=MAX_FREQUENCY_HZ).contains(&params.frequency_hz) {
        return Err(MaterialError::InvalidFrequency(params.frequency_hz));
    }
    Ok(())
}

/// Parse a TOML job configuration.
pub fn parse_config(content: &str) -> Result<JobConfig> {
    let config: JobConfig = toml::from_str(content).context("Invalid job configuration")?;
    config.validate()?;
    Ok(config)
}

/// Load and parse a TOML job configuration file.
pub fn load_config(path: &Path) -> Result<JobConfig> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Cannot read {}", path.display()))?;
    let mut config = parse_config(&content)?;
    // Element files are resolved relative to the job file.
    if let ElementSource::File { element_file } = &mut config.transducer.source {
        if element_file.is_relative() {
            if let Some(dir) = path.parent() {
                *element_file = dir.join(&*element_file);
            }
        }
    }
    Ok(config)
}

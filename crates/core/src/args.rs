//! Command-line construction for the image-generation executable.
//!
//! Job parameters arrive as structured objects ([`GenerateParams`],
//! [`ConvertParams`]) and leave as a flat argument vector plus the output
//! path the executable will write to ([`Invocation`]).
//!
//! Policies applied by [`ArgBuilder`]:
//!
//! - optional strings are emitted only when non-empty after trimming;
//! - optional numbers are emitted only when present, clamped to their
//!   [`NumericRange`] range and truncated to its precision;
//! - boolean switches are emitted (without a value) only when `true`;
//! - file references are resolved against their per-kind directory in
//!   [`ResourceDirs`] and never passed as bare names;
//! - the output pair `-o <path>` always comes last.

use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Prompt marker that references a LoRA, e.g. `<lora:style:0.8>`.
pub const LORA_MARKER: &str = "<lora:";

/// Prompt marker that references a textual-inversion embedding.
pub const EMBEDDING_MARKER: &str = "embedding:";

/// File extension of generated images.
pub const IMAGE_EXTENSION: &str = "png";

/// File extension of converted models.
pub const MODEL_EXTENSION: &str = "gguf";

// ---------------------------------------------------------------------------
// Resource directories
// ---------------------------------------------------------------------------

/// Base directories that file-reference parameters are resolved against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDirs {
    pub checkpoints: PathBuf,
    pub vae: PathBuf,
    pub text_encoders: PathBuf,
    pub loras: PathBuf,
    pub embeddings: PathBuf,
    pub inputs: PathBuf,
}

impl ResourceDirs {
    /// Standard layout below a single models root.
    pub fn under(root: &Path) -> Self {
        Self {
            checkpoints: root.join("checkpoints"),
            vae: root.join("vae"),
            text_encoders: root.join("text_encoders"),
            loras: root.join("loras"),
            embeddings: root.join("embeddings"),
            inputs: root.join("inputs"),
        }
    }
}

/// Join `name` onto `base`, refusing anything that could escape `base`.
///
/// Returns `Ok(None)` for a blank name so optional references can be passed
/// straight through.
fn resolve(base: &Path, name: Option<&str>, what: &str) -> Result<Option<PathBuf>, CoreError> {
    let Some(name) = name.map(str::trim).filter(|n| !n.is_empty()) else {
        return Ok(None);
    };

    let relative = Path::new(name);
    let escapes = relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(CoreError::Validation(format!(
            "{what} must be a file name inside its resource directory, got '{name}'"
        )));
    }

    Ok(Some(base.join(relative)))
}

/// Unique output file name: UTC timestamp plus a random suffix.
pub fn output_file_name(now: DateTime<Utc>, extension: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "{}-{}.{extension}",
        now.format("%Y%m%d-%H%M%S%3f"),
        &suffix[..8]
    )
}

// ---------------------------------------------------------------------------
// Numeric parameters
// ---------------------------------------------------------------------------

/// Declared range and precision of a numeric flag.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NumericRange {
    pub flag: &'static str,
    pub min: Option<f64>,
    pub max: Option<f64>,
    /// Number of fractional digits kept; extra digits are truncated.
    pub precision: u32,
}

impl NumericRange {
    /// Clamp to the declared bounds, then truncate to `precision` digits.
    pub fn normalize(&self, value: f64) -> f64 {
        let mut v = value;
        if let Some(min) = self.min {
            v = v.max(min);
        }
        if let Some(max) = self.max {
            v = v.min(max);
        }
        // Cut the decimal rendering rather than scaling the binary value:
        // 0.29 * 100 is 28.999... and would lose a digit.
        const GUARD: usize = 6;
        let rendered = format!("{:.*}", self.precision as usize + GUARD, v);
        let keep = rendered.len() - GUARD - usize::from(self.precision == 0);
        rendered[..keep].parse().unwrap_or_else(|_| v.trunc())
    }

    /// Render a normalized value the way the executable expects it.
    pub fn format(&self, value: f64) -> String {
        let v = self.normalize(value);
        if self.precision == 0 {
            format!("{}", v as i64)
        } else {
            format!("{v}")
        }
    }
}

pub const WIDTH: NumericRange = NumericRange { flag: "-W", min: Some(64.0), max: Some(4096.0), precision: 0 };
pub const HEIGHT: NumericRange = NumericRange { flag: "-H", min: Some(64.0), max: Some(4096.0), precision: 0 };
pub const STEPS: NumericRange = NumericRange { flag: "--steps", min: Some(1.0), max: Some(150.0), precision: 0 };
pub const CFG_SCALE: NumericRange = NumericRange { flag: "--cfg-scale", min: Some(1.0), max: Some(30.0), precision: 1 };
pub const STRENGTH: NumericRange = NumericRange { flag: "--strength", min: Some(0.0), max: Some(1.0), precision: 2 };
pub const SEED: NumericRange = NumericRange { flag: "-s", min: Some(-1.0), max: Some(4_294_967_295.0), precision: 0 };
pub const BATCH_COUNT: NumericRange = NumericRange { flag: "-b", min: Some(1.0), max: Some(16.0), precision: 0 };
pub const CLIP_SKIP: NumericRange = NumericRange { flag: "--clip-skip", min: Some(-1.0), max: Some(12.0), precision: 0 };
pub const THREADS: NumericRange = NumericRange { flag: "-t", min: Some(-1.0), max: None, precision: 0 };

// ---------------------------------------------------------------------------
// ArgBuilder
// ---------------------------------------------------------------------------

/// Accumulates arguments while enforcing the inclusion policies.
#[derive(Debug, Default)]
pub struct ArgBuilder {
    args: Vec<String>,
}

impl ArgBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a flag and its value unconditionally.
    pub fn pair(&mut self, flag: &str, value: impl Into<String>) -> &mut Self {
        self.args.push(flag.to_string());
        self.args.push(value.into());
        self
    }

    /// Append `flag` alone when `enabled`.
    pub fn switch(&mut self, flag: &str, enabled: bool) -> &mut Self {
        if enabled {
            self.args.push(flag.to_string());
        }
        self
    }

    /// Append `flag value` when the trimmed value is non-empty.
    pub fn text(&mut self, flag: &str, value: Option<&str>) -> &mut Self {
        if let Some(v) = value.map(str::trim).filter(|v| !v.is_empty()) {
            self.pair(flag, v);
        }
        self
    }

    /// Append a clamped and truncated number when present.
    pub fn number(&mut self, spec: &NumericRange, value: Option<f64>) -> &mut Self {
        if let Some(v) = value {
            self.pair(spec.flag, spec.format(v));
        }
        self
    }

    /// Append `flag path` for a resolved file reference.
    pub fn path(&mut self, flag: &str, path: Option<&Path>) -> &mut Self {
        if let Some(p) = path {
            self.pair(flag, p.to_string_lossy());
        }
        self
    }

    /// Terminate with the output pair and return the full vector.
    pub fn finish(mut self, output: &Path) -> Vec<String> {
        self.pair("-o", output.to_string_lossy());
        self.args
    }
}

/// Fully built command line for one job.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub args: Vec<String>,
    pub output_path: PathBuf,
}

fn require(value: &str, field: &str) -> Result<(), CoreError> {
    if value.trim().is_empty() {
        return Err(CoreError::Validation(format!("{field} is required")));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Generate
// ---------------------------------------------------------------------------

/// Parameters of a `generate` job (text-to-image or image-to-image).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GenerateParams {
    /// Checkpoint file name inside the checkpoints directory.
    pub model: String,
    pub vae: Option<String>,
    pub clip_l: Option<String>,
    pub clip_g: Option<String>,
    pub t5xxl: Option<String>,
    pub prompt: String,
    pub negative_prompt: Option<String>,
    /// Source image inside the inputs directory; enables image-to-image.
    pub init_image: Option<String>,
    pub sampling_method: Option<String>,
    pub schedule: Option<String>,
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub steps: Option<f64>,
    pub cfg_scale: Option<f64>,
    pub strength: Option<f64>,
    pub seed: Option<f64>,
    pub batch_count: Option<f64>,
    pub clip_skip: Option<f64>,
    pub threads: Option<f64>,
    pub vae_tiling: bool,
    pub vae_on_cpu: bool,
    pub clip_on_cpu: bool,
    pub flash_attention: bool,
    pub verbose: bool,
}

impl GenerateParams {
    /// Check required fields without touching the filesystem.
    pub fn validate(&self) -> Result<(), CoreError> {
        require(&self.model, "model")?;
        require(&self.prompt, "prompt")
    }

    /// Prompt and negative prompt joined, used for marker detection.
    fn combined_prompt(&self) -> String {
        match self.negative_prompt.as_deref() {
            Some(negative) => format!("{} {negative}", self.prompt),
            None => self.prompt.clone(),
        }
    }

    /// Build the argument vector, writing the image into `output_dir`.
    pub fn to_invocation(
        &self,
        dirs: &ResourceDirs,
        output_dir: &Path,
        now: DateTime<Utc>,
    ) -> Result<Invocation, CoreError> {
        self.validate()?;

        let model = resolve(&dirs.checkpoints, Some(self.model.as_str()), "model")?;
        let vae = resolve(&dirs.vae, self.vae.as_deref(), "vae")?;
        let clip_l = resolve(&dirs.text_encoders, self.clip_l.as_deref(), "clipL")?;
        let clip_g = resolve(&dirs.text_encoders, self.clip_g.as_deref(), "clipG")?;
        let t5xxl = resolve(&dirs.text_encoders, self.t5xxl.as_deref(), "t5xxl")?;
        let init_image = resolve(&dirs.inputs, self.init_image.as_deref(), "initImage")?;

        let mut b = ArgBuilder::new();
        b.path("-m", model.as_deref())
            .path("--vae", vae.as_deref())
            .path("--clip_l", clip_l.as_deref())
            .path("--clip_g", clip_g.as_deref())
            .path("--t5xxl", t5xxl.as_deref())
            .path("-i", init_image.as_deref())
            .text("-p", Some(self.prompt.as_str()))
            .text("-n", self.negative_prompt.as_deref())
            .text("--sampling-method", self.sampling_method.as_deref())
            .text("--schedule", self.schedule.as_deref())
            .number(&WIDTH, self.width)
            .number(&HEIGHT, self.height)
            .number(&STEPS, self.steps)
            .number(&CFG_SCALE, self.cfg_scale)
            .number(&STRENGTH, self.strength)
            .number(&SEED, self.seed)
            .number(&BATCH_COUNT, self.batch_count)
            .number(&CLIP_SKIP, self.clip_skip)
            .number(&THREADS, self.threads)
            .switch("--vae-tiling", self.vae_tiling)
            .switch("--vae-on-cpu", self.vae_on_cpu)
            .switch("--clip-on-cpu", self.clip_on_cpu)
            .switch("--diffusion-fa", self.flash_attention)
            .switch("-v", self.verbose);

        let prompt = self.combined_prompt();
        if prompt.contains(LORA_MARKER) {
            b.path("--lora-model-dir", Some(dirs.loras.as_path()));
        }
        if prompt.contains(EMBEDDING_MARKER) {
            b.path("--embd-dir", Some(dirs.embeddings.as_path()));
        }

        let output_path = output_dir.join(output_file_name(now, IMAGE_EXTENSION));
        Ok(Invocation {
            args: b.finish(&output_path),
            output_path,
        })
    }

    /// Result payload stored for a completed generation.
    pub fn artifact_reference(&self, output_path: &Path) -> serde_json::Value {
        serde_json::json!({
            "output": output_path.to_string_lossy(),
            "prompt": self.prompt,
            "negativePrompt": self.negative_prompt,
            "seed": self.seed.map(|s| SEED.normalize(s) as i64),
            "width": self.width.map(|w| WIDTH.normalize(w) as i64),
            "height": self.height.map(|h| HEIGHT.normalize(h) as i64),
        })
    }
}

// ---------------------------------------------------------------------------
// Convert
// ---------------------------------------------------------------------------

/// Parameters of a `convert` job (model quantization).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConvertParams {
    /// Source checkpoint file name inside the checkpoints directory.
    pub model: String,
    /// Optional VAE baked into the converted file.
    pub vae: Option<String>,
    /// Target weight type, e.g. `q8_0`, `q4_k`, `f16`.
    pub quantization: String,
    pub verbose: bool,
}

impl ConvertParams {
    pub fn validate(&self) -> Result<(), CoreError> {
        require(&self.model, "model")?;
        require(&self.quantization, "quantization")
    }

    /// Build the argument vector; the converted model lands next to the
    /// other checkpoints so it can be selected afterwards.
    pub fn to_invocation(&self, dirs: &ResourceDirs, now: DateTime<Utc>) -> Result<Invocation, CoreError> {
        self.validate()?;

        let model = resolve(&dirs.checkpoints, Some(self.model.as_str()), "model")?;
        let vae = resolve(&dirs.vae, self.vae.as_deref(), "vae")?;

        let mut b = ArgBuilder::new();
        b.pair("-M", "convert")
            .path("-m", model.as_deref())
            .path("--vae", vae.as_deref())
            .text("--type", Some(self.quantization.as_str()))
            .switch("-v", self.verbose);

        let output_path = dirs
            .checkpoints
            .join(output_file_name(now, MODEL_EXTENSION));
        Ok(Invocation {
            args: b.finish(&output_path),
            output_path,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

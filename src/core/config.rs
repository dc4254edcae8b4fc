use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::engine::minimizer::FireParams;
use crate::error::{NebError, Result};

// --- Interpolation ---

/// How the initial chain is built between two endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum InterpolationScheme {
    Linear,
    /// Image-dependent pair potential.
    Idpp,
    /// External geometry tool, carrying the tool's scheme flag.
    External(String),
}

impl FromStr for InterpolationScheme {
    type Err = NebError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "linear" => Ok(InterpolationScheme::Linear),
            "idpp" => Ok(InterpolationScheme::Idpp),
            // rxview presets
            "boc" => Ok(InterpolationScheme::External("-b".into())),
            "lst" => Ok(InterpolationScheme::External("--single".into())),
            other => match other.strip_prefix("external:") {
                Some(flag) if !flag.is_empty() => Ok(InterpolationScheme::External(flag.to_string())),
                _ => Err(NebError::Configuration(format!(
                    "unknown interpolation scheme: {:?}",
                    s
                ))),
            },
        }
    }
}

impl fmt::Display for InterpolationScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterpolationScheme::Linear => write!(f, "linear"),
            InterpolationScheme::Idpp => write!(f, "idpp"),
            InterpolationScheme::External(flag) => write!(f, "external:{}", flag),
        }
    }
}

impl TryFrom<String> for InterpolationScheme {
    type Error = NebError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<InterpolationScheme> for String {
    fn from(s: InterpolationScheme) -> String {
        s.to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpolationConfig {
    pub scheme: InterpolationScheme,
    /// Executable used by external schemes.
    pub geometry_tool: String,
    pub idpp_fmax: f64,
    pub idpp_max_steps: usize,
}

impl Default for InterpolationConfig {
    fn default() -> Self {
        Self {
            scheme: InterpolationScheme::Idpp,
            geometry_tool: "rxview".to_string(),
            idpp_fmax: 0.1,
            idpp_max_steps: 100,
        }
    }
}

// --- Evaluator selection ---

/// Potential-energy backend, resolved once at workflow start.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EvaluatorConfig {
    LennardJones {
        epsilon: f64,
        sigma: f64,
    },
    /// External program speaking the `@model_properties` text protocol.
    External {
        /// Shell command; `{input}` is replaced by the input file path.
        command: String,
        #[serde(default)]
        scratch_root: Option<PathBuf>,
    },
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        EvaluatorConfig::LennardJones {
            epsilon: 1.0,
            sigma: 1.0,
        }
    }
}

// --- Scheduler ---

/// Convergence threshold and step budget of one relaxation stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StageSettings {
    pub fmax: f64,
    pub max_steps: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NebConfig {
    /// Total number of images, endpoints included.
    pub nimages: usize,
    pub interpolation: InterpolationConfig,
    pub evaluator: EvaluatorConfig,
    /// Evaluate all stale images in one evaluator call.
    pub batch: bool,
    /// Derive per-link spring constants from the initial spacing.
    pub keep_image_distance: bool,
    /// Re-interpolate through the highest-energy image before relaxing.
    pub refine_through_waypoint: bool,

    /// Target max per-atom NEB force for the full chain.
    pub fmax: f64,
    pub max_cycles: usize,
    pub pairwise: StageSettings,
    pub ts_only: StageSettings,
    pub full_max_steps: usize,

    /// Atom indices fixed in every image for the whole run.
    pub fixed_atoms: Vec<usize>,
    pub fire: FireParams,
    pub output_dir: Option<PathBuf>,
}

impl Default for NebConfig {
    fn default() -> Self {
        Self {
            nimages: 11,
            interpolation: InterpolationConfig::default(),
            evaluator: EvaluatorConfig::default(),
            batch: false,
            keep_image_distance: false,
            refine_through_waypoint: true,
            fmax: 0.1,
            max_cycles: 10,
            pairwise: StageSettings {
                fmax: 0.5,
                max_steps: 10,
            },
            ts_only: StageSettings {
                fmax: 0.2,
                max_steps: 5,
            },
            full_max_steps: 5,
            fixed_atoms: Vec::new(),
            fire: FireParams::default(),
            output_dir: None,
        }
    }
}

impl NebConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let txt = std::fs::read_to_string(path.as_ref())?;
        let config: NebConfig = serde_json::from_str(&txt)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.nimages < 3 {
            return Err(NebError::Configuration(format!(
                "nimages must be >= 3, got {}",
                self.nimages
            )));
        }
        for (name, v) in [
            ("fmax", self.fmax),
            ("pairwise.fmax", self.pairwise.fmax),
            ("ts_only.fmax", self.ts_only.fmax),
            ("interpolation.idpp_fmax", self.interpolation.idpp_fmax),
        ] {
            if !(v > 0.0 && v.is_finite()) {
                return Err(NebError::Configuration(format!(
                    "{} must be a positive number, got {}",
                    name, v
                )));
            }
        }
        if self.max_cycles == 0 {
            return Err(NebError::Configuration("max_cycles must be >= 1".into()));
        }
        if let EvaluatorConfig::External { command, .. } = &self.evaluator {
            if command.trim().is_empty() {
                return Err(NebError::Configuration("external evaluator command is empty".into()));
            }
        }
        Ok(())
    }
}

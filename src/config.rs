// src/config.rs

//! Configuration for compilation and optimization.
//!
//! Every struct deserializes from JSON with per-field defaults, so a config
//! file only needs to name what it changes. The process-wide [`CONFIG`] is
//! read once from the file named by `GRADJIT_CONFIG`.

use std::path::PathBuf;

use log::{info, warn};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::jit::Backend;
use crate::optimize::{Algorithm, Direction};

/// Environment variable naming a JSON config file.
pub const CONFIG_ENV: &str = "GRADJIT_CONFIG";

/// Lazily loaded process configuration.
pub static CONFIG: Lazy<Config> = Lazy::new(Config::load_or_default);

// --- Top-Level Configuration Structure ---

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub jit: JitConfig,
    pub optimizer: OptimizerConfig,
}

impl Config {
    /// Reads `$GRADJIT_CONFIG`, falling back to defaults when it is unset or
    /// unusable.
    pub fn load_or_default() -> Self {
        let Some(path) = std::env::var_os(CONFIG_ENV).map(PathBuf::from) else {
            return Config::default();
        };
        match Self::load(&path) {
            Ok(config) => {
                info!("Configuration loaded from {}", path.display());
                config
            }
            Err(err) => {
                warn!("Ignoring {}: {err}; using defaults", path.display());
                Config::default()
            }
        }
    }

    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

// --- JIT Configuration ---

/// Backend choice and toolchain command lines.
///
/// Command lines are argument vectors where `{src}`, `{obj}` and `{lib}`
/// expand to paths inside a temporary directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JitConfig {
    /// `None` evaluates graphs directly instead of compiling them.
    pub backend: Option<Backend>,
    /// Parent for compilation directories; the system temp dir if unset.
    pub work_dir: Option<PathBuf>,
    pub nasm: Vec<Vec<String>>,
    pub gnu_as: Vec<Vec<String>>,
    pub clang: Vec<Vec<String>>,
}

fn command(args: &[&str]) -> Vec<String> {
    args.iter().map(|arg| arg.to_string()).collect()
}

impl JitConfig {
    /// Command lines run, in order, to build a library with `backend`.
    pub fn commands(&self, backend: Backend) -> &[Vec<String>] {
        match backend {
            Backend::Nasm => &self.nasm,
            Backend::GnuAs => &self.gnu_as,
            Backend::Clang => &self.clang,
            Backend::X64Native => &[],
        }
    }
}

impl Default for JitConfig {
    fn default() -> Self {
        JitConfig {
            backend: if cfg!(all(target_arch = "x86_64", unix)) {
                Some(Backend::X64Native)
            } else {
                None
            },
            work_dir: None,
            nasm: vec![
                command(&["nasm", "-O0", "-f", "elf64", "{src}", "-o", "{obj}"]),
                command(&["ld", "-shared", "-o", "{lib}", "{obj}", "-lm"]),
            ],
            gnu_as: vec![command(&["gcc", "-O0", "-shared", "{src}", "-o", "{lib}", "-lm"])],
            clang: vec![command(&[
                "clang",
                "-O0",
                "-fPIC",
                "-shared",
                "-nostartfiles",
                "{src}",
                "-o",
                "{lib}",
                "-lm",
            ])],
        }
    }
}

// --- Optimizer Configuration ---

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub algorithm: Algorithm,
    pub direction: Direction,
    /// Record per-iteration values in the result.
    pub track_progress: bool,
    pub gradient_descent: GradientDescentConfig,
    pub backtracking: BacktrackingConfig,
    pub conjugate_gradient: BacktrackingConfig,
    pub line_search: LineSearchConfig,
    pub stopping: StoppingConfig,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        OptimizerConfig {
            algorithm: Algorithm::default(),
            direction: Direction::Minimize,
            track_progress: false,
            gradient_descent: GradientDescentConfig::default(),
            backtracking: BacktrackingConfig::default(),
            conjugate_gradient: BacktrackingConfig::default(),
            line_search: LineSearchConfig::default(),
            stopping: StoppingConfig::default(),
        }
    }
}

/// Fixed-step gradient descent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GradientDescentConfig {
    pub max_steps: usize,
    /// Candidate step sizes tried along `-gradient` each iteration.
    pub step_sizes: Vec<f64>,
}

impl Default for GradientDescentConfig {
    fn default() -> Self {
        GradientDescentConfig {
            max_steps: 2500,
            step_sizes: vec![0.01, 0.05, 0.2],
        }
    }
}

/// Outer loop of the line-search based methods.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktrackingConfig {
    /// Iterations run before the gradient-norm test may stop the loop.
    pub min_steps: usize,
    pub max_steps: usize,
    /// Stop when the direction norm falls below this.
    pub grad_eps: f64,
}

impl Default for BacktrackingConfig {
    fn default() -> Self {
        BacktrackingConfig {
            min_steps: 3,
            max_steps: 250,
            grad_eps: 1e-8,
        }
    }
}

/// Armijo backtracking line search.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LineSearchConfig {
    /// Sufficient decrease factor.
    pub alpha: f64,
    /// Step shrink factor.
    pub beta: f64,
    pub max_steps: usize,
}

impl Default for LineSearchConfig {
    fn default() -> Self {
        LineSearchConfig {
            alpha: 0.5,
            beta: 0.8,
            max_steps: 100,
        }
    }
}

/// Termination on lack of progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoppingConfig {
    pub min_absolute_per_step_improvement: f64,
    pub min_relative_per_step_improvement: f64,
    /// Consecutive non-improving iterations that end the run.
    pub no_improvement_steps_to_terminate: usize,
}

impl Default for StoppingConfig {
    fn default() -> Self {
        StoppingConfig {
            min_absolute_per_step_improvement: 1e-25,
            min_relative_per_step_improvement: 1e-25,
            no_improvement_steps_to_terminate: 2,
        }
    }
}

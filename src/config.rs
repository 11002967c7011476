//! Backend and shading configuration.
//!
//! Resolution order for [`RtConfig::load`]:
//! 1. file named by `RTCORE_CONFIG`
//! 2. `<config_dir>/rtcore/config.json`
//! 3. built-in defaults
//!
//! then `RTCORE_BACKEND` (comma-separated names) replaces the backend
//! preference.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::accel::ShadingMode;
use crate::backend::BackendKind;
use crate::util::{Error, Result};
use rt_shaders::ShadingUniforms;

/// Environment variable naming a config file.
pub const CONFIG_ENV: &str = "RTCORE_CONFIG";
/// Environment variable overriding the backend preference.
pub const BACKEND_ENV: &str = "RTCORE_BACKEND";

/// Hit and miss colouring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadingConfig {
    pub mode: ShadingMode,
    /// Miss colour looking straight down.
    pub sky_bottom: [f32; 3],
    /// Miss colour looking straight up.
    pub sky_top: [f32; 3],
    /// Instance palette, indexed by `instance_id % 4`.
    pub palette: [[f32; 3]; 4],
    /// Direction towards the light in `InstancePalette` mode.
    pub light_dir: [f32; 3],
}

impl Default for ShadingConfig {
    fn default() -> Self {
        Self {
            mode: ShadingMode::Barycentric,
            sky_bottom: [1.0, 1.0, 1.0],
            sky_top: [0.5, 0.7, 1.0],
            palette: [
                [0.85, 0.25, 0.2],  // red
                [0.25, 0.75, 0.3],  // green
                [0.25, 0.4, 0.9],   // blue
                [0.9, 0.8, 0.25],   // yellow
            ],
            light_dir: [0.3, 0.8, 0.5],
        }
    }
}

/// Subsystem configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RtConfig {
    /// Candidates to try, in order. `None` uses the platform order.
    pub backend_preference: Option<Vec<BackendKind>>,
    /// Accept software (CPU-emulated) GPU adapters.
    pub allow_software_adapter: bool,
    pub shading: ShadingConfig,
    /// Ray interval start.
    pub t_min: f32,
    /// Ray interval end.
    pub t_max: f32,
}

impl Default for RtConfig {
    fn default() -> Self {
        Self {
            backend_preference: None,
            allow_software_adapter: false,
            shading: ShadingConfig::default(),
            t_min: 0.001,
            t_max: 10000.0,
        }
    }
}

impl RtConfig {
    /// Default config file location.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|mut p| {
            p.push("rtcore");
            p.push("config.json");
            p
        })
    }

    /// Load from the usual places; never fails.
    pub fn load() -> Self {
        let explicit = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        let mut config = match explicit.or_else(Self::default_path) {
            Some(path) if path.exists() => Self::load_from(&path).unwrap_or_else(|e| {
                warn!("{}; using defaults", e);
                Self::default()
            }),
            _ => Self::default(),
        };
        config.apply_env();
        config
    }

    /// Read a config file.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| Error::Config {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Write as pretty JSON, creating parent directories.
    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Apply `RTCORE_BACKEND` if set.
    pub fn apply_env(&mut self) {
        if let Ok(value) = std::env::var(BACKEND_ENV) {
            self.apply_backend_override(&value);
        }
    }

    /// Replace the backend preference with a comma-separated list.
    pub fn apply_backend_override(&mut self, value: &str) {
        let kinds = BackendKind::parse_list(value);
        if kinds.is_empty() {
            warn!("{}='{}' names no known backend; ignored", BACKEND_ENV, value);
        } else {
            self.backend_preference = Some(kinds);
        }
    }

    /// Candidates in the order the negotiator should try them.
    pub fn candidates(&self) -> Vec<BackendKind> {
        match &self.backend_preference {
            Some(list) if !list.is_empty() => list.clone(),
            _ => BackendKind::platform_order().to_vec(),
        }
    }

    /// Uniform block for the kernel and the host reference.
    pub fn shading_uniforms(&self) -> ShadingUniforms {
        let s = &self.shading;
        let rgb = |c: [f32; 3], a: f32| [c[0], c[1], c[2], a];
        ShadingUniforms {
            sky_bottom: rgb(s.sky_bottom, 0.0),
            sky_top: rgb(s.sky_top, 0.0),
            palette: s.palette.map(|c| rgb(c, 1.0)),
            light_dir: rgb(s.light_dir, 0.0),
            mode: s.mode.raw(),
            t_min: self.t_min,
            t_max: self.t_max,
            _pad: 0,
        }
    }
}

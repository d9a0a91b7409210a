//! Orchestrator configuration.
//!
//! Everything environment- or file-sourced is loaded here once, into
//! [`CabinetConfig`], and handed to [`Cabinet::new`](crate::Cabinet::new).
//! Nothing downstream reads the environment.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::router::{ModelRouter, DEFAULT_MODEL};

/// Broadly available models tried after the routed and default models.
pub const FALLBACK_MODELS: [&str; 3] = [
    "gpt-4o-mini",
    "claude-3-haiku-20240307",
    "gemini-1.5-flash-8b",
];

pub const ENV_MODEL_MAP: &str = "CABINET_MODEL_MAP";
pub const ENV_AVAILABLE_MODELS: &str = "CABINET_AVAILABLE_MODELS";
pub const ENV_AVAILABLE_MODELS_FILE: &str = "CABINET_AVAILABLE_MODELS_FILE";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid JSON in {origin}: {source}")]
    Json {
        origin: String,
        source: serde_json::Error,
    },
    #[error("invalid value for {field}: {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },
}

// =============================================================================
// Routing goal
// =============================================================================

/// Preference handed to the decider. Changes prompt content only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingGoal {
    #[default]
    Balanced,
    Quality,
    Speed,
}

impl RoutingGoal {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingGoal::Balanced => "balanced",
            RoutingGoal::Quality => "quality",
            RoutingGoal::Speed => "speed",
        }
    }
}

impl fmt::Display for RoutingGoal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoutingGoal {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "balanced" => Ok(RoutingGoal::Balanced),
            "quality" => Ok(RoutingGoal::Quality),
            "speed" => Ok(RoutingGoal::Speed),
            other => Err(ConfigError::Invalid {
                field: "routing_goal",
                message: format!("expected balanced|quality|speed, got {other:?}"),
            }),
        }
    }
}

// =============================================================================
// Config
// =============================================================================

#[derive(Debug, Clone)]
pub struct CabinetConfig {
    /// Model used when no mapping applies.
    pub default_model: String,
    /// Role→model maps in increasing precedence (e.g. env, then file).
    pub role_maps: Vec<BTreeMap<String, String>>,
    /// Explicit per-role choices; outrank role maps and the decider.
    pub role_overrides: BTreeMap<String, String>,
    /// Step id→model choices; outrank everything for that step.
    pub step_models: BTreeMap<String, String>,
    /// Models the decider may choose from. Empty disables the decider.
    pub available_models: Vec<String>,
    /// Model that makes the routing decision (default model when unset).
    pub decider_model: Option<String>,
    pub routing_goal: RoutingGoal,
    /// Run plan steps concurrently.
    pub parallel: bool,
    /// Upper bound on synthesis iterations (1 = draft only).
    pub max_iterations: u32,
    /// Upper bound on concurrently running steps.
    pub max_workers: usize,
    /// Models appended to every candidate chain.
    pub fallback_models: Vec<String>,
    /// Sampling temperature for every call.
    pub temperature: f32,
}

impl Default for CabinetConfig {
    fn default() -> Self {
        Self {
            default_model: DEFAULT_MODEL.to_string(),
            role_maps: Vec::new(),
            role_overrides: BTreeMap::new(),
            step_models: BTreeMap::new(),
            available_models: Vec::new(),
            decider_model: None,
            routing_goal: RoutingGoal::Balanced,
            parallel: true,
            max_iterations: 2,
            max_workers: 4,
            fallback_models: FALLBACK_MODELS.iter().map(|m| m.to_string()).collect(),
            temperature: 0.7,
        }
    }
}

impl CabinetConfig {
    /// Defaults plus `CABINET_MODEL_MAP` and the available-model env vars.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let env_map = load_role_map_env()?;
        if !env_map.is_empty() {
            config.role_maps.push(env_map);
        }
        config.available_models = load_available_models(None, None)?;
        Ok(config)
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    pub fn with_role_map(mut self, map: BTreeMap<String, String>) -> Self {
        self.role_maps.push(map);
        self
    }

    pub fn with_role_override(mut self, role: impl Into<String>, model: impl Into<String>) -> Self {
        self.role_overrides.insert(role.into(), model.into());
        self
    }

    pub fn with_step_model(mut self, step_id: impl Into<String>, model: impl Into<String>) -> Self {
        self.step_models.insert(step_id.into(), model.into());
        self
    }

    pub fn with_available_models(mut self, models: Vec<String>) -> Self {
        self.available_models = models;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_max_iterations(mut self, n: u32) -> Self {
        self.max_iterations = n;
        self
    }

    pub fn with_max_workers(mut self, n: usize) -> Self {
        self.max_workers = n;
        self
    }

    /// Router built from the static layers. The decider adjusts a copy of
    /// this per answer.
    pub fn router(&self) -> ModelRouter {
        let mut router = ModelRouter::from_layers(
            self.default_model.clone(),
            self.role_maps.iter().cloned(),
            &self.role_overrides,
        );
        router.apply_step_map(&self.step_models);
        router
    }

    /// `max_iterations` clamped to at least 1.
    pub fn iterations_bound(&self) -> u32 {
        self.max_iterations.max(1)
    }

    /// `max_workers` clamped to at least 1.
    pub fn workers_bound(&self) -> usize {
        self.max_workers.max(1)
    }
}

// =============================================================================
// Loaders
// =============================================================================

/// Role map from `CABINET_MODEL_MAP` (inline JSON object). Unset is empty.
pub fn load_role_map_env() -> Result<BTreeMap<String, String>, ConfigError> {
    match std::env::var(ENV_MODEL_MAP) {
        Ok(raw) if !raw.trim().is_empty() => parse_role_map(&raw, ENV_MODEL_MAP),
        _ => Ok(BTreeMap::new()),
    }
}

/// Role map from a JSON file shaped `{"role": "model", ...}`.
pub fn load_role_map_file(path: &Path) -> Result<BTreeMap<String, String>, ConfigError> {
    let raw = read_file(path)?;
    parse_role_map(&raw, &path.display().to_string())
}

pub fn parse_role_map(raw: &str, origin: &str) -> Result<BTreeMap<String, String>, ConfigError> {
    let map: BTreeMap<String, String> =
        serde_json::from_str(raw).map_err(|source| ConfigError::Json {
            origin: origin.to_string(),
            source,
        })?;
    Ok(map
        .into_iter()
        .map(|(k, v)| (k.trim().to_lowercase(), v.trim().to_string()))
        .filter(|(k, v)| !k.is_empty() && !v.is_empty())
        .collect())
}

/// Allowed models, first non-empty source wins: `inline` (comma list or
/// JSON array), `file`, `CABINET_AVAILABLE_MODELS_FILE`,
/// `CABINET_AVAILABLE_MODELS`.
pub fn load_available_models(
    inline: Option<&str>,
    file: Option<&Path>,
) -> Result<Vec<String>, ConfigError> {
    if let Some(inline) = inline.filter(|s| !s.trim().is_empty()) {
        return parse_model_list(inline, "--available-models");
    }
    if let Some(path) = file {
        return load_model_list_file(path);
    }
    if let Ok(path) = std::env::var(ENV_AVAILABLE_MODELS_FILE) {
        if !path.trim().is_empty() {
            return load_model_list_file(Path::new(path.trim()));
        }
    }
    if let Ok(raw) = std::env::var(ENV_AVAILABLE_MODELS) {
        if !raw.trim().is_empty() {
            return parse_model_list(&raw, ENV_AVAILABLE_MODELS);
        }
    }
    Ok(Vec::new())
}

/// Comma-separated list or JSON array.
pub fn parse_model_list(raw: &str, origin: &str) -> Result<Vec<String>, ConfigError> {
    let trimmed = raw.trim();
    let models: Vec<String> = if trimmed.starts_with('[') {
        serde_json::from_str(trimmed).map_err(|source| ConfigError::Json {
            origin: origin.to_string(),
            source,
        })?
    } else {
        trimmed.split(',').map(str::to_string).collect()
    };
    Ok(clean_models(models))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ModelListFile {
    List(Vec<String>),
    Wrapped { models: Vec<String> },
}

/// JSON file holding an array or `{"models": [...]}`.
pub fn load_model_list_file(path: &Path) -> Result<Vec<String>, ConfigError> {
    let raw = read_file(path)?;
    let parsed: ModelListFile =
        serde_json::from_str(&raw).map_err(|source| ConfigError::Json {
            origin: path.display().to_string(),
            source,
        })?;
    let models = match parsed {
        ModelListFile::List(models) => models,
        ModelListFile::Wrapped { models } => models,
    };
    Ok(clean_models(models))
}

fn clean_models(models: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(models.len());
    for m in models {
        let m = m.trim();
        if !m.is_empty() && !out.iter().any(|seen| seen == m) {
            out.push(m.to_string());
        }
    }
    out
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

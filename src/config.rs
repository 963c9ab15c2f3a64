use std::fs;

use camino::Utf8Path;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::{SetupSelection, axes_for_rank};
use crate::error::DenoiseError;
use crate::model::TrainingParams;

/// Training project file as written by the project tooling.
#[derive(Debug, Deserialize, Serialize)]
pub struct ProjectConfig {
    pub name: String,
    pub n_patches_per_image: usize,
    pub patch_size: Vec<usize>,
    pub train_steps_per_epoch: usize,
    pub train_epochs: usize,
    pub train_batch_size: usize,
    #[serde(default)]
    pub train_loss: Option<String>,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolvedConfig {
    pub name: String,
    pub n_patches_per_image: usize,
    pub patch_size: Vec<usize>,
    pub train_steps_per_epoch: usize,
    pub train_epochs: usize,
    pub train_batch_size: usize,
    pub train_loss: String,
    pub seed: Option<u64>,
    pub extra: Map<String, Value>,
}

impl ResolvedConfig {
    /// `<name>_s<selection>` with `:` replaced by `-`, e.g. `nuclei_s0-4`.
    pub fn model_name(&self, selection: &SetupSelection) -> String {
        format!("{}_s{}", self.name, selection.as_str().replace(':', "-"))
    }

    pub fn training_params(&self, selection: &SetupSelection) -> Result<TrainingParams, DenoiseError> {
        Ok(TrainingParams {
            model_name: self.model_name(selection),
            axes: axes_for_rank(self.patch_size.len())?.to_string(),
            train_steps_per_epoch: self.train_steps_per_epoch,
            train_epochs: self.train_epochs,
            train_batch_size: self.train_batch_size,
            train_loss: self.train_loss.clone(),
            extra: self.extra.clone(),
        })
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: &Utf8Path) -> Result<ResolvedConfig, DenoiseError> {
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|_| DenoiseError::ConfigRead(path.to_path_buf()))?;
        let config: ProjectConfig = serde_json::from_str(&content)
            .map_err(|err| DenoiseError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: ProjectConfig) -> Result<ResolvedConfig, DenoiseError> {
        if config.name.trim().is_empty() {
            return Err(DenoiseError::InvalidConfig("name must not be empty".to_string()));
        }
        if !matches!(config.patch_size.len(), 2 | 3) || config.patch_size.contains(&0) {
            return Err(DenoiseError::InvalidConfig(format!(
                "patch_size must hold 2 or 3 positive sizes, got {:?}",
                config.patch_size
            )));
        }
        let counts = [
            ("n_patches_per_image", config.n_patches_per_image),
            ("train_steps_per_epoch", config.train_steps_per_epoch),
            ("train_epochs", config.train_epochs),
            ("train_batch_size", config.train_batch_size),
        ];
        if let Some((key, _)) = counts.iter().find(|(_, value)| *value == 0) {
            return Err(DenoiseError::InvalidConfig(format!("{key} must be positive")));
        }

        Ok(ResolvedConfig {
            name: config.name,
            n_patches_per_image: config.n_patches_per_image,
            patch_size: config.patch_size,
            train_steps_per_epoch: config.train_steps_per_epoch,
            train_epochs: config.train_epochs,
            train_batch_size: config.train_batch_size,
            train_loss: config.train_loss.unwrap_or_else(default_train_loss),
            seed: config.seed,
            extra: config.extra,
        })
    }
}

pub fn default_train_loss() -> String {
    "mse".to_string()
}

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use camino::{Utf8Path, Utf8PathBuf};
use ndarray::{ArrayD, ArrayViewD};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::{Compression, DataType};
use crate::error::DenoiseError;
use crate::fs_util::{find_in_path, read_json_optional, write_json_atomic};
use crate::store::{ChunkedStore, DatasetAttributes, N5Store, OpenMode};

pub const DEFAULT_RUNNER: &str = "n2v-runner";

/// Inference side of a denoising model.
pub trait Denoiser {
    /// Denoises `volume` whose axes are labelled by `axes` (a suffix of `ZYX`).
    ///
    /// The result must have the same shape as `volume`. `n_tiles` holds one
    /// count per axis and is only meaningful when [`Denoiser::tiles_internally`]
    /// returns true; otherwise the caller already tiled the volume.
    fn predict(
        &self,
        volume: ArrayViewD<'_, f64>,
        axes: &str,
        n_tiles: &[usize],
    ) -> Result<ArrayD<f64>, DenoiseError>;

    fn tiles_internally(&self) -> bool {
        false
    }
}

/// Training side of a denoising model.
pub trait Trainer {
    /// Trains on patch stacks shaped `(n, spatial..., 1)`.
    fn train(
        &mut self,
        train: ArrayViewD<'_, f64>,
        validation: ArrayViewD<'_, f64>,
        params: &TrainingParams,
    ) -> Result<TrainingHistory, DenoiseError>;
}

#[derive(Debug, Clone, Serialize)]
pub struct TrainingParams {
    pub model_name: String,
    pub axes: String,
    pub train_steps_per_epoch: usize,
    pub train_epochs: usize,
    pub train_batch_size: usize,
    pub train_loss: String,
    /// Project keys not interpreted here, forwarded verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Per-epoch metric values keyed by metric name (`loss`, `val_loss`, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrainingHistory(pub BTreeMap<String, Vec<f64>>);

impl TrainingHistory {
    pub fn epochs(&self) -> usize {
        self.0.values().map(Vec::len).max().unwrap_or(0)
    }

    pub fn metric(&self, name: &str) -> Option<&[f64]> {
        self.0.get(name).map(Vec::as_slice)
    }
}

/// A model driven through an external runner executable.
///
/// Arrays are exchanged through a scratch N5 container; the runner is
/// invoked as `<runner> predict ...` or `<runner> train ...`.
#[derive(Debug, Clone)]
pub struct ExternalModel {
    runner: PathBuf,
    model_dir: Utf8PathBuf,
}

impl ExternalModel {
    /// Locates the runner: explicit path first, then `n2v-runner` on `PATH`.
    pub fn resolve_runner(explicit: Option<&Path>) -> Result<PathBuf, DenoiseError> {
        match explicit {
            Some(path) if path.exists() => Ok(path.to_path_buf()),
            Some(path) => find_in_path(&path.to_string_lossy())
                .ok_or_else(|| DenoiseError::MissingTool(path.display().to_string())),
            None => find_in_path(DEFAULT_RUNNER)
                .ok_or_else(|| DenoiseError::MissingTool(DEFAULT_RUNNER.to_string())),
        }
    }

    /// Model used for prediction; the model directory must already exist.
    pub fn open(runner: PathBuf, model_dir: Utf8PathBuf) -> Result<Self, DenoiseError> {
        if !model_dir.as_std_path().exists() {
            return Err(DenoiseError::MissingPath(model_dir));
        }
        Ok(Self { runner, model_dir })
    }

    /// Model to be trained into `model_dir`.
    pub fn create(runner: PathBuf, model_dir: Utf8PathBuf) -> Self {
        Self { runner, model_dir }
    }

    pub fn model_dir(&self) -> &Utf8Path {
        &self.model_dir
    }

    fn run(&self, args: &[String]) -> Result<(), DenoiseError> {
        tracing::debug!(runner = %self.runner.display(), ?args, "invoking model runner");
        let output = Command::new(&self.runner)
            .args(args)
            .output()
            .map_err(|err| DenoiseError::Model(format!("{}: {err}", self.runner.display())))?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let message = if stderr.is_empty() {
            format!("command failed: {} ({})", self.runner.display(), output.status)
        } else {
            stderr
        };
        Err(DenoiseError::Model(message))
    }
}

fn scratch_container() -> Result<(tempfile::TempDir, N5Store), DenoiseError> {
    let temp_dir = tempfile::Builder::new()
        .prefix("n5-denoise-exchange")
        .tempdir()
        .map_err(|err| DenoiseError::Filesystem(err.to_string()))?;
    let root = Utf8PathBuf::from_path_buf(temp_dir.path().join("exchange.n5"))
        .map_err(|_| DenoiseError::Filesystem("non-utf8 temp path".to_string()))?;
    let store = N5Store::open(root, OpenMode::Append)?;
    Ok((temp_dir, store))
}

fn put_array(store: &N5Store, key: &str, data: ArrayViewD<'_, f64>) -> Result<(), DenoiseError> {
    store.create_dataset(
        key,
        &DatasetAttributes {
            shape: data.shape().to_vec(),
            chunks: data.shape().iter().map(|len| (*len).max(1)).collect(),
            data_type: DataType::Float32,
            compression: Compression::Raw,
        },
    )?;
    store.write(key, data, 1)
}

fn join_counts(values: &[usize]) -> String {
    values
        .iter()
        .map(usize::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

impl Denoiser for ExternalModel {
    fn predict(
        &self,
        volume: ArrayViewD<'_, f64>,
        axes: &str,
        n_tiles: &[usize],
    ) -> Result<ArrayD<f64>, DenoiseError> {
        let (_temp_dir, store) = scratch_container()?;
        put_array(&store, "input", volume.view())?;

        self.run(&[
            "predict".to_string(),
            "--model".to_string(),
            self.model_dir.to_string(),
            "--container".to_string(),
            store.root().to_string(),
            "--input".to_string(),
            "input".to_string(),
            "--output".to_string(),
            "output".to_string(),
            "--axes".to_string(),
            axes.to_string(),
            "--n-tiles".to_string(),
            join_counts(n_tiles),
        ])?;

        let prediction = store.read("output")?;
        if prediction.shape() != volume.shape() {
            return Err(DenoiseError::ShapeMismatch {
                expected: volume.shape().to_vec(),
                actual: prediction.shape().to_vec(),
            });
        }
        Ok(prediction)
    }

    fn tiles_internally(&self) -> bool {
        true
    }
}

impl Trainer for ExternalModel {
    fn train(
        &mut self,
        train: ArrayViewD<'_, f64>,
        validation: ArrayViewD<'_, f64>,
        params: &TrainingParams,
    ) -> Result<TrainingHistory, DenoiseError> {
        let (temp_dir, store) = scratch_container()?;
        put_array(&store, "train", train)?;
        put_array(&store, "validation", validation)?;

        let scratch = Utf8PathBuf::from_path_buf(temp_dir.path().to_path_buf())
            .map_err(|_| DenoiseError::Filesystem("non-utf8 temp path".to_string()))?;
        let params_path = scratch.join("params.json");
        let history_path = scratch.join("history.json");
        write_json_atomic(&params_path, params)?;

        self.run(&[
            "train".to_string(),
            "--model".to_string(),
            self.model_dir.to_string(),
            "--container".to_string(),
            store.root().to_string(),
            "--train".to_string(),
            "train".to_string(),
            "--validation".to_string(),
            "validation".to_string(),
            "--params".to_string(),
            params_path.to_string(),
            "--history".to_string(),
            history_path.to_string(),
        ])?;

        read_json_optional(&history_path)?
            .ok_or_else(|| DenoiseError::Model("runner did not write a training history".into()))
    }
}

use camino::{Utf8Path, Utf8PathBuf};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;

use crate::config::ResolvedConfig;
use crate::domain::{BASE_LEVEL, SetupId, SetupSelection, axes_for_rank};
use crate::error::DenoiseError;
use crate::fs_util::write_json_atomic;
use crate::lazy_view::{LazyView, StoreVolume};
use crate::model::{Denoiser, Trainer, TrainingHistory};
use crate::patches::{PatchRequest, RandomPatchGenerator, harvest};
use crate::pyramid::{copy_attributes, reconstruct_pyramid};
use crate::store::{ChunkedStore, N5Store, OpenMode, list_setups};
use crate::tiling::{InferenceOptions, denoise_volume};

#[derive(Debug, Clone)]
pub struct PredictRequest {
    pub input: Utf8PathBuf,
    pub out_dir: Option<Utf8PathBuf>,
    pub setups: Vec<SetupId>,
    pub options: InferenceOptions,
    /// Worker threads for the base-level write.
    pub n_threads: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PredictResult {
    pub input: Utf8PathBuf,
    pub output: Utf8PathBuf,
    pub options: InferenceOptions,
    pub setups: Vec<SetupSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SetupSummary {
    pub setup: SetupId,
    pub levels: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct TrainRequest {
    pub input: Utf8PathBuf,
    pub config: ResolvedConfig,
    pub selection: SetupSelection,
    pub history_path: Option<Utf8PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrainResult {
    pub model_name: String,
    pub setups: Vec<SetupId>,
    pub train_patches: usize,
    pub validation_patches: usize,
    pub history_path: Utf8PathBuf,
    pub history: TrainingHistory,
}

#[derive(Debug, Clone)]
pub enum ProgressEvent {
    SetupStarted {
        setup: SetupId,
    },
    BaseDenoised {
        setup: SetupId,
        shape: Vec<usize>,
    },
    LevelWritten {
        setup: SetupId,
        level: String,
        shape: Vec<usize>,
    },
    AttributesCopied {
        setup: SetupId,
        scope: String,
        keys: usize,
    },
    SetupFinished {
        setup: SetupId,
        levels: usize,
    },
    PatchesHarvested {
        setups: usize,
        train: usize,
        validation: usize,
    },
    TrainingFinished {
        model_name: String,
        epochs: usize,
    },
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub struct App<M> {
    model: M,
}

impl<M> App<M> {
    pub fn new(model: M) -> Self {
        Self { model }
    }

    pub fn model(&self) -> &M {
        &self.model
    }
}

impl<M: Denoiser> App<M> {
    pub fn predict(
        &self,
        request: &PredictRequest,
        sink: &dyn ProgressSink,
    ) -> Result<PredictResult, DenoiseError> {
        check_input(&request.input)?;
        let output = output_path(&request.input, request.out_dir.as_deref())?;

        let source = N5Store::open(request.input.clone(), OpenMode::Read)?;
        let destination = N5Store::open(output.clone(), OpenMode::Append)?;
        let setups = self.predict_setups(&source, &destination, request, sink)?;

        Ok(PredictResult {
            input: request.input.clone(),
            output,
            options: request.options.clone(),
            setups,
        })
    }

    /// Denoises every requested setup of `source` into `destination`, in request order.
    pub fn predict_setups<S, T>(
        &self,
        source: &S,
        destination: &T,
        request: &PredictRequest,
        sink: &dyn ProgressSink,
    ) -> Result<Vec<SetupSummary>, DenoiseError>
    where
        S: ChunkedStore + ?Sized,
        T: ChunkedStore + ?Sized,
    {
        request
            .setups
            .iter()
            .map(|setup| {
                self.predict_setup(
                    source,
                    destination,
                    *setup,
                    &request.options,
                    request.n_threads,
                    sink,
                )
            })
            .collect()
    }

    fn predict_setup<S, T>(
        &self,
        source: &S,
        destination: &T,
        setup: SetupId,
        options: &InferenceOptions,
        n_threads: usize,
        sink: &dyn ProgressSink,
    ) -> Result<SetupSummary, DenoiseError>
    where
        S: ChunkedStore + ?Sized,
        T: ChunkedStore + ?Sized,
    {
        sink.event(ProgressEvent::SetupStarted { setup });

        let key = setup.level(BASE_LEVEL);
        let attrs = source.dataset(&key)?;
        axes_for_rank(attrs.ndim())?;
        if options.invert && !attrs.data_type.is_integer() {
            return Err(DenoiseError::InvertUnsupported(attrs.data_type));
        }

        let volume = source.read(&key)?;
        let denoised = denoise_volume(&self.model, volume.view(), attrs.data_type, options)?;
        sink.event(ProgressEvent::BaseDenoised {
            setup,
            shape: denoised.shape().to_vec(),
        });

        destination.create_dataset(&key, &attrs)?;
        destination.write(&key, denoised.view(), n_threads)?;

        let mut levels = vec![BASE_LEVEL.to_string()];
        levels.extend(reconstruct_pyramid(source, destination, setup, denoised, sink)?);

        for scope in [setup.group(), setup.timepoint()] {
            let keys = copy_attributes(source, destination, &scope)?;
            sink.event(ProgressEvent::AttributesCopied { setup, scope, keys });
        }

        sink.event(ProgressEvent::SetupFinished {
            setup,
            levels: levels.len(),
        });
        Ok(SetupSummary { setup, levels })
    }
}

impl<M: Trainer> App<M> {
    pub fn train(
        &mut self,
        request: &TrainRequest,
        sink: &dyn ProgressSink,
    ) -> Result<TrainResult, DenoiseError> {
        check_input(&request.input)?;
        let store = N5Store::open(request.input.clone(), OpenMode::Read)?;
        let mut rng = match request.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        self.train_from_store(&store, request, &mut rng, sink)
    }

    /// Harvests patches lazily from the selected setups of `store` and trains on them.
    pub fn train_from_store<S: ChunkedStore + ?Sized>(
        &mut self,
        store: &S,
        request: &TrainRequest,
        rng: &mut StdRng,
        sink: &dyn ProgressSink,
    ) -> Result<TrainResult, DenoiseError> {
        let config = &request.config;
        let params = config.training_params(&request.selection)?;

        let available = list_setups(store)?;
        let setups = request.selection.apply(&available);
        if setups.is_empty() {
            return Err(DenoiseError::NoSetups(format!(
                "selection {} over {} setups",
                request.selection,
                available.len()
            )));
        }

        let volumes = setups
            .iter()
            .map(|setup| StoreVolume::open(store, &setup.level(BASE_LEVEL)))
            .collect::<Result<Vec<_>, _>>()?;
        let views = volumes.iter().map(LazyView::new).collect::<Vec<_>>();

        let mut generator = RandomPatchGenerator::new(StdRng::from_rng(&mut *rng));
        let patch_request = PatchRequest {
            patches_per_image: config.n_patches_per_image,
            shape: config.patch_size.clone(),
        };
        let patches = harvest(&mut generator, &views, &patch_request, rng)?;
        sink.event(ProgressEvent::PatchesHarvested {
            setups: setups.len(),
            train: patches.train_len(),
            validation: patches.validation_len(),
        });

        let history = self
            .model
            .train(patches.train.view(), patches.validation.view(), &params)?;

        let history_path = request
            .history_path
            .clone()
            .unwrap_or_else(|| default_history_path(&params.model_name));
        write_json_atomic(&history_path, &history)?;
        sink.event(ProgressEvent::TrainingFinished {
            model_name: params.model_name.clone(),
            epochs: history.epochs(),
        });

        Ok(TrainResult {
            model_name: params.model_name,
            setups,
            train_patches: patches.train_len(),
            validation_patches: patches.validation_len(),
            history_path,
            history,
        })
    }
}

pub fn default_history_path(model_name: &str) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("{model_name}_history.json"))
}

/// `<input minus .n5>_n2v.n5`, placed in `out_dir` when given.
pub fn output_path(input: &Utf8Path, out_dir: Option<&Utf8Path>) -> Result<Utf8PathBuf, DenoiseError> {
    let stem = input
        .as_str()
        .trim_end_matches('/')
        .strip_suffix(".n5")
        .ok_or_else(|| DenoiseError::NotN5(input.to_string()))?;
    let output = Utf8PathBuf::from(format!("{stem}_n2v.n5"));
    match out_dir {
        None => Ok(output),
        Some(dir) => {
            let name = output
                .file_name()
                .ok_or_else(|| DenoiseError::NotN5(input.to_string()))?;
            Ok(dir.join(name))
        }
    }
}

pub fn check_input(input: &Utf8Path) -> Result<(), DenoiseError> {
    if !input.as_std_path().exists() {
        return Err(DenoiseError::MissingPath(input.to_path_buf()));
    }
    if !input.as_str().trim_end_matches('/').ends_with(".n5") {
        return Err(DenoiseError::NotN5(input.to_string()));
    }
    Ok(())
}

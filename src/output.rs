use std::io::{self, Write};

use serde::Serialize;
use tracing::info;

use crate::app::{PredictResult, ProgressEvent, ProgressSink, TrainResult};

/// Forwards progress events to `tracing` as structured fields.
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn event(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::SetupStarted { setup } => {
                info!(%setup, "denoising setup");
            }
            ProgressEvent::BaseDenoised { setup, shape } => {
                info!(%setup, ?shape, "base level denoised");
            }
            ProgressEvent::LevelWritten {
                setup,
                level,
                shape,
            } => {
                info!(%setup, %level, ?shape, "pyramid level written");
            }
            ProgressEvent::AttributesCopied { setup, scope, keys } => {
                info!(%setup, %scope, keys, "attributes copied");
            }
            ProgressEvent::SetupFinished { setup, levels } => {
                info!(%setup, levels, "setup finished");
            }
            ProgressEvent::PatchesHarvested {
                setups,
                train,
                validation,
            } => {
                info!(setups, train, validation, "patches harvested");
            }
            ProgressEvent::TrainingFinished { model_name, epochs } => {
                info!(%model_name, epochs, "training finished");
            }
        }
    }
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_predict(result: &PredictResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_train(result: &TrainResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

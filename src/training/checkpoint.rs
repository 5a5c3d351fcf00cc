//! Checkpoint persistence: one burn record per model plus a JSON progress sidecar.
//!
//! Records are written with `NamedMpkFileRecorder` at full precision, so a checkpoint
//! named `nn_vocoder` lives at `<models>/nn_vocoder.mpk` next to
//! `<models>/nn_vocoder.progress.json`.

use crate::error::{Result, TtsError};
use burn::module::Module;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder};
use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Encoder checkpoint name.
pub const ENCODER_CHECKPOINT: &str = "rnn_encoder";
/// Autoregressive vocoder checkpoint name.
pub const VOCODER_CHECKPOINT: &str = "nn_vocoder";
/// Parallel vocoder checkpoint name.
pub const PARALLEL_VOCODER_CHECKPOINT: &str = "pnn_vocoder";

const RECORD_EXTENSION: &str = "mpk";

/// Where training stood when a checkpoint was written.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrainingProgress {
    /// Completed epochs.
    pub epoch: usize,
    /// Training files consumed so far, across epochs.
    pub files_processed: usize,
    /// Sparsity level in percent (autoregressive vocoder only).
    pub sparsity: f32,
    /// Lowest dev loss seen at an epoch boundary.
    pub best_dev_loss: Option<f32>,
}

/// Checkpoint directory.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of a record file, including its extension.
    pub fn record_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.{RECORD_EXTENSION}"))
    }

    fn progress_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.progress.json"))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.record_path(name).exists()
    }

    /// Write the record and its progress sidecar.
    pub fn save<B: Backend, M: Module<B>>(
        &self,
        name: &str,
        model: &M,
        progress: &TrainingProgress,
    ) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        // the recorder appends the extension itself
        model.clone().save_file(self.dir.join(name), &recorder)?;
        fs::write(self.progress_path(name), serde_json::to_string_pretty(progress)?)?;
        tracing::debug!(checkpoint = name, epoch = progress.epoch, "checkpoint saved");
        Ok(())
    }

    /// Load a record into `model`, whose layout must match the saved one.
    pub fn load<B: Backend, M: Module<B>>(&self, name: &str, model: M, device: &B::Device) -> Result<M> {
        let path = self.record_path(name);
        if !path.exists() {
            return Err(TtsError::ModelLoad(format!(
                "checkpoint not found at {}",
                path.display()
            )));
        }
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        let model = model.load_file(self.dir.join(name), &recorder, device)?;
        Ok(model)
    }

    /// Progress sidecar; a checkpoint without one counts as fresh progress.
    pub fn load_progress(&self, name: &str) -> Result<TrainingProgress> {
        let path = self.progress_path(name);
        if !path.exists() {
            return Ok(TrainingProgress::default());
        }
        let data = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VocoderConfig;
    use crate::model::vocoder::{Vocoder, VocoderModelConfig};
    use crate::modules::sparsity::measure_sparsity;
    use burn_ndarray::{NdArray, NdArrayDevice};
    use tempfile::tempdir;

    type B = NdArray<f32>;

    fn tiny(device: &NdArrayDevice) -> Vocoder<B> {
        let config = VocoderConfig {
            cond_dim: 2,
            hidden_size: 4,
            ..VocoderConfig::default()
        };
        VocoderModelConfig::new(&config, 3, 4).init(device)
    }

    #[test]
    fn save_and_load_restore_weights_and_progress() {
        let dir = tempdir().expect("tempdir");
        let device = NdArrayDevice::default();
        let store = CheckpointStore::new(dir.path());
        let model = tiny(&device).prune(0.5);
        let progress = TrainingProgress {
            epoch: 3,
            files_processed: 420,
            sparsity: 50.0,
            best_dev_loss: Some(1.25),
        };
        store.save(VOCODER_CHECKPOINT, &model, &progress).expect("save");
        assert!(store.exists(VOCODER_CHECKPOINT));

        let loaded = store
            .load(VOCODER_CHECKPOINT, tiny(&device), &device)
            .expect("load");
        let sparsity = measure_sparsity(loaded.rnn.recurrent.weight.val());
        assert!((sparsity - 0.5).abs() < 1e-6);
        assert_eq!(store.load_progress(VOCODER_CHECKPOINT).expect("progress"), progress);
    }

    #[test]
    fn missing_record_is_model_load_error() {
        let dir = tempdir().expect("tempdir");
        let device = NdArrayDevice::default();
        let err = CheckpointStore::new(dir.path())
            .load(PARALLEL_VOCODER_CHECKPOINT, tiny(&device), &device)
            .unwrap_err();
        assert_eq!(err.exit_code(), 5);
    }
}

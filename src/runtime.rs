//! High-level runtime wrapper for synthesis bootstrapping.
//!
//! Loads the effective configuration, vocabulary and checkpoints from a model
//! directory and writes synthesis results to disk.

use crate::audio::io::WavIo;
use crate::audio::render::{save_png, RenderScale};
use crate::config::{load_config, Config};
use crate::encodings::{Encodings, ENCODINGS_FILE};
use crate::error::{Result, TtsError};
use crate::model::encoder::Seq2SpecConfig;
use crate::model::parallel_vocoder::ParallelVocoderModelConfig;
use crate::model::tts::{Synthesis, SynthesisOptions, SynthesisVocoder, TtsModel};
use crate::model::vocoder::VocoderModelConfig;
use crate::perf::{self, Metric};
use crate::training::checkpoint::{
    CheckpointStore, ENCODER_CHECKPOINT, PARALLEL_VOCODER_CHECKPOINT, VOCODER_CHECKPOINT,
};
use burn::tensor::backend::Backend;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::{Path, PathBuf};

/// File name of the effective configuration inside the model directory.
pub const CONFIG_FILE: &str = "config.yaml";

/// Seed used when none is given.
pub const DEFAULT_SEED: u64 = 9;

/// Parameters used when building a runtime.
#[derive(Debug, Clone)]
pub struct RuntimeParams {
    /// Explicit configuration file; defaults to `<model_dir>/config.yaml`.
    pub config_path: Option<PathBuf>,
    /// Feature order override.
    pub mgc_order: Option<usize>,
    /// Sample rate override.
    pub sample_rate: Option<u32>,
    pub options: SynthesisOptions,
    pub seed: u64,
}

impl Default for RuntimeParams {
    fn default() -> Self {
        Self {
            config_path: None,
            mgc_order: None,
            sample_rate: None,
            options: SynthesisOptions::default(),
            seed: DEFAULT_SEED,
        }
    }
}

/// Resolve the configuration for a model directory.
///
/// An explicit path must exist; otherwise `<model_dir>/config.yaml` is used when present
/// and defaults apply when it is not. Overrides are applied last.
pub fn resolve_config(
    model_dir: &Path,
    config_path: Option<&Path>,
    mgc_order: Option<usize>,
    sample_rate: Option<u32>,
) -> Result<Config> {
    let mut config = match config_path {
        Some(path) => load_config(path)?,
        None => {
            let default_path = model_dir.join(CONFIG_FILE);
            if default_path.exists() {
                load_config(default_path)?
            } else {
                Config::default()
            }
        }
    };
    if let Some(order) = mgc_order {
        config = config.with_mgc_order(order);
    }
    if let Some(rate) = sample_rate {
        config = config.with_sample_rate(rate);
    }
    config.validate()?;
    Ok(config)
}

/// High-level runtime that owns the model and its sampling state.
#[derive(Debug)]
pub struct TtsRuntime<B: Backend> {
    model: TtsModel<B>,
    options: SynthesisOptions,
    rng: StdRng,
    device: B::Device,
}

impl<B: Backend> TtsRuntime<B> {
    /// Load encodings, encoder and the best available vocoder from `model_dir`.
    ///
    /// The parallel vocoder is preferred; the autoregressive one is used when no
    /// parallel checkpoint exists.
    pub fn from_model_dir(model_dir: impl AsRef<Path>, params: RuntimeParams, device: &B::Device) -> Result<Self> {
        let _span = perf::span(Metric::RuntimeLoad);
        let model_dir = model_dir.as_ref();
        if !model_dir.is_dir() {
            return Err(TtsError::MissingPath(model_dir.to_path_buf()));
        }
        let config = resolve_config(
            model_dir,
            params.config_path.as_deref(),
            params.mgc_order,
            params.sample_rate,
        )?;
        let encodings = Encodings::load(model_dir.join(ENCODINGS_FILE))?;
        let store = CheckpointStore::new(model_dir);
        let order = config.audio.mgc_order;
        let hop = config.audio.hop_length;

        let encoder = store.load(
            ENCODER_CHECKPOINT,
            Seq2SpecConfig::new(&config.encoder, order, &encodings).init::<B>(device),
            device,
        )?;

        let vocoder = if store.exists(PARALLEL_VOCODER_CHECKPOINT) {
            let model = ParallelVocoderModelConfig::new(&config.parallel_vocoder, order, hop).init(device);
            SynthesisVocoder::Parallel(store.load(PARALLEL_VOCODER_CHECKPOINT, model, device)?)
        } else if store.exists(VOCODER_CHECKPOINT) {
            tracing::warn!("no parallel vocoder checkpoint; falling back to the autoregressive vocoder");
            let model = VocoderModelConfig::new(&config.vocoder, order, hop).init(device);
            SynthesisVocoder::Autoregressive(store.load(VOCODER_CHECKPOINT, model, device)?)
        } else {
            return Err(TtsError::ModelLoad(format!(
                "no vocoder checkpoint in {}",
                model_dir.display()
            )));
        };
        tracing::info!(vocoder = vocoder.name(), "models loaded");

        Ok(Self {
            model: TtsModel::new(config, encodings, encoder, vocoder),
            options: params.options,
            rng: StdRng::seed_from_u64(params.seed),
            device: device.clone(),
        })
    }

    /// Wrap an in-memory model.
    pub fn from_model(model: TtsModel<B>, options: SynthesisOptions, seed: u64, device: &B::Device) -> Self {
        Self {
            model,
            options,
            rng: StdRng::seed_from_u64(seed),
            device: device.clone(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.model.config
    }

    pub fn model(&self) -> &TtsModel<B> {
        &self.model
    }

    /// Synthesize one utterance in memory.
    pub fn synthesize(&mut self, text: &str, speaker: &str) -> Result<Synthesis> {
        self.model
            .synthesize(text, speaker, self.options, &mut self.rng, &self.device)
    }

    /// Synthesize several utterances in memory, in input order.
    pub fn synthesize_batch(&mut self, texts: &[&str], speaker: &str) -> Result<Vec<Synthesis>> {
        self.model
            .synthesize_batch(texts, speaker, self.options, &mut self.rng, &self.device)
    }

    /// Synthesize and write `<output>` (16-bit WAV) plus `<output>.png` (spectrogram).
    pub fn synthesize_to_file(&mut self, text: &str, speaker: &str, output: impl AsRef<Path>) -> Result<Synthesis> {
        let output = output.as_ref();
        let synthesis = self.synthesize(text, speaker)?;
        WavIo::write_pcm_scaled(output, &synthesis.waveform, self.config().audio.sample_rate)?;
        save_png(png_path(output), &synthesis.features.rows(), RenderScale::Clip)?;
        Ok(synthesis)
    }
}

/// `<output>.png` next to a waveform file.
pub fn png_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_owned();
    name.push(".png");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn png_sits_next_to_output() {
        assert_eq!(png_path(Path::new("out/test.wav")), PathBuf::from("out/test.wav.png"));
    }

    #[test]
    fn overrides_apply_on_top_of_defaults() {
        let dir = tempdir().expect("tempdir");
        let config = resolve_config(dir.path(), None, Some(40), Some(16000)).expect("config");
        assert_eq!(config.audio.mgc_order, 40);
        assert_eq!(config.audio.sample_rate, 16000);
    }

    #[test]
    fn explicit_missing_config_is_missing_path() {
        let dir = tempdir().expect("tempdir");
        let err = resolve_config(dir.path(), Some(Path::new("nope.yaml")), None, None).unwrap_err();
        assert_eq!(err.exit_code(), 8);
    }

    #[test]
    fn empty_model_dir_fails_to_load() {
        let dir = tempdir().expect("tempdir");
        let err = TtsRuntime::<burn_ndarray::NdArray<f32>>::from_model_dir(
            dir.path(),
            RuntimeParams::default(),
            &Default::default(),
        )
        .unwrap_err();
        assert_eq!(err.exit_code(), 5);
    }
}

//! Configuration types for model architecture and audio analysis.
//!
//! Configurations are typically loaded from YAML files using [`load_config`].
//! Every section is defaulted, so a partial file (or none at all) is valid.

use crate::error::{Result, TtsError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
/// Audio analysis settings shared by corpus preparation and the vocoders.
pub struct AudioConfig {
    /// Target sample rate in Hz; corpus audio is resampled to it.
    pub sample_rate: u32,
    /// Number of mel bands per acoustic frame (the MGC order).
    pub mgc_order: usize,
    /// FFT size.
    pub n_fft: usize,
    /// Analysis window length in samples.
    pub win_length: usize,
    /// Samples between consecutive frames.
    pub hop_length: usize,
    /// Lowest mel filter frequency.
    pub f_min: f32,
    /// Highest mel filter frequency (Nyquist when unset).
    pub f_max: Option<f32>,
    /// Reference level subtracted from the dB spectrum.
    pub ref_level_db: f32,
    /// Floor of the dB range mapped to 0.0.
    pub min_level_db: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 24000,
            mgc_order: 80,
            n_fft: 2048,
            win_length: 1200,
            hop_length: 300,
            f_min: 0.0,
            f_max: None,
            ref_level_db: 20.0,
            min_level_db: -100.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
/// Sequence-to-spectrogram encoder hyperparameters.
pub struct EncoderConfig {
    /// Character and context-tag embedding size.
    pub embedding_dim: usize,
    /// Global speaker embedding size.
    pub speaker_dim: usize,
    /// Hidden size of each direction of the bidirectional encoder.
    pub encoder_hidden: usize,
    /// Additive attention projection size.
    pub attention_dim: usize,
    /// Prenet width applied to the previous frame.
    pub prenet_dim: usize,
    /// Hidden size of the attention and decoder recurrences.
    pub decoder_hidden: usize,
    /// Width of the guided-attention diagonal band.
    pub guided_attention_sigma: f32,
    /// Decode steps allowed per input token under the fixed bound.
    pub frames_per_token: f32,
    /// Stop probability above which the learned stop signal fires.
    pub stop_threshold: f32,
    /// Hard ceiling on decode steps when the fixed bound is disabled.
    pub max_decode_steps: usize,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            embedding_dim: 100,
            speaker_dim: 32,
            encoder_hidden: 200,
            attention_dim: 128,
            prenet_dim: 100,
            decoder_hidden: 256,
            guided_attention_sigma: 0.2,
            frames_per_token: 7.0,
            stop_threshold: 0.5,
            max_decode_steps: 3000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
/// Autoregressive vocoder hyperparameters.
pub struct VocoderConfig {
    /// Conditioning channels after projecting the acoustic frames.
    pub cond_dim: usize,
    /// Recurrent state size.
    pub hidden_size: usize,
    /// Lower bound of the predicted log-scale.
    pub log_scale_min: f32,
    /// Frames per random training crop.
    pub segment_frames: usize,
}

impl Default for VocoderConfig {
    fn default() -> Self {
        Self {
            cond_dim: 64,
            hidden_size: 256,
            log_scale_min: -7.0,
            segment_frames: 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
/// Distilled parallel vocoder hyperparameters.
pub struct ParallelVocoderConfig {
    /// Conditioning channels after projecting the acoustic frames.
    pub cond_dim: usize,
    /// Residual channels inside each flow.
    pub channels: usize,
    /// Convolution kernel size.
    pub kernel_size: usize,
    /// Dilation of each causal convolution layer in a flow.
    pub dilations: Vec<usize>,
    /// Number of stacked affine flows.
    pub num_flows: usize,
    /// Lower bound of the predicted log-scale.
    pub log_scale_min: f32,
}

impl Default for ParallelVocoderConfig {
    fn default() -> Self {
        Self {
            cond_dim: 64,
            channels: 64,
            kernel_size: 3,
            dilations: vec![1, 2, 4, 8, 16, 32],
            num_flows: 2,
            log_scale_min: -7.0,
        }
    }
}

/// Top-level model configuration.
///
/// # Example YAML
///
/// ```yaml
/// audio:
///   sample_rate: 24000
///   mgc_order: 80
/// encoder:
///   decoder_hidden: 256
/// vocoder:
///   hidden_size: 256
/// parallel_vocoder:
///   num_flows: 2
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    /// Audio analysis settings.
    pub audio: AudioConfig,
    /// Encoder architecture.
    pub encoder: EncoderConfig,
    /// Autoregressive vocoder architecture.
    pub vocoder: VocoderConfig,
    /// Parallel vocoder architecture.
    pub parallel_vocoder: ParallelVocoderConfig,
}

impl Config {
    /// Override the acoustic feature order.
    pub fn with_mgc_order(mut self, mgc_order: usize) -> Self {
        self.audio.mgc_order = mgc_order;
        self
    }

    /// Override the target sample rate.
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.audio.sample_rate = sample_rate;
        self
    }

    /// Reject settings no model can be built from.
    pub fn validate(&self) -> Result<()> {
        if self.audio.mgc_order == 0 {
            return Err(TtsError::Configuration("mgc_order must be at least 1".into()));
        }
        if self.audio.hop_length == 0 || self.audio.win_length > self.audio.n_fft {
            return Err(TtsError::Configuration(format!(
                "invalid STFT geometry: n_fft={} win_length={} hop_length={}",
                self.audio.n_fft, self.audio.win_length, self.audio.hop_length
            )));
        }
        if self.vocoder.segment_frames == 0 {
            return Err(TtsError::Configuration("segment_frames must be at least 1".into()));
        }
        if self.parallel_vocoder.num_flows == 0 || self.parallel_vocoder.dilations.is_empty() {
            return Err(TtsError::Configuration(
                "parallel vocoder needs at least one flow and one layer".into(),
            ));
        }
        Ok(())
    }
}

/// Load a model configuration from a YAML file.
///
/// # Errors
///
/// Returns [`TtsError::MissingPath`] if the file doesn't exist, or a YAML error
/// if it does not parse.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(TtsError::MissingPath(path.to_path_buf()));
    }

    let data = fs::read_to_string(path)?;
    let config: Config = serde_yaml::from_str(&data)?;
    config.validate()?;
    Ok(config)
}

/// Write a configuration next to the checkpoints it describes.
pub fn save_config(config: &Config, path: impl AsRef<Path>) -> Result<()> {
    let data = serde_yaml::to_string(config)?;
    fs::write(path, data)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{load_config, save_config, Config};
    use crate::error::TtsError;
    use tempfile::tempdir;

    #[test]
    fn partial_yaml_fills_defaults() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "audio:\n  mgc_order: 4\n").expect("write config");

        let config = load_config(&path).expect("load config");
        assert_eq!(config.audio.mgc_order, 4);
        assert_eq!(config.audio.sample_rate, 24000);
        assert_eq!(config.encoder, Default::default());
    }

    #[test]
    fn save_then_load_is_identity() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("config.yaml");
        let config = Config::default().with_mgc_order(40).with_sample_rate(16000);
        save_config(&config, &path).expect("save config");
        assert_eq!(load_config(&path).expect("load config"), config);
    }

    #[test]
    fn missing_file_is_missing_path() {
        let err = load_config("does/not/exist.yaml").unwrap_err();
        assert!(matches!(err, TtsError::MissingPath(_)));
    }

    #[test]
    fn zero_order_is_rejected() {
        let err = Config::default().with_mgc_order(0).validate().unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}

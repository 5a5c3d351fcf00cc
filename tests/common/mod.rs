//! Shared test utilities: tiny model configurations, synthetic corpora and tensor checks.

#![allow(dead_code)]

use burn::tensor::TensorData;
use burn_ndarray::NdArray;
use std::fs;
use std::path::Path;
use vocalis::audio::io::WavIo;
use vocalis::config::{
    AudioConfig, Config, EncoderConfig, ParallelVocoderConfig, VocoderConfig,
};

pub type TestBackend = NdArray<f32>;

/// Assert two tensor data slices are element-wise close within tolerance.
pub fn assert_close(a: &TensorData, b: &TensorData, tol: f32) {
    let a_values: Vec<f32> = a.iter::<f32>().collect();
    let b_values: Vec<f32> = b.iter::<f32>().collect();
    assert_eq!(
        a_values.len(),
        b_values.len(),
        "tensor length mismatch: {} vs {}",
        a_values.len(),
        b_values.len()
    );
    for (idx, (x, y)) in a_values.iter().zip(b_values.iter()).enumerate() {
        if (x - y).abs() > tol {
            panic!(
                "mismatch at {idx}: {x} vs {y} (diff: {}, tol: {tol})",
                (x - y).abs()
            );
        }
    }
}

/// Small enough to train for an epoch inside a test.
pub fn tiny_config() -> Config {
    Config {
        audio: AudioConfig {
            sample_rate: 8000,
            mgc_order: 8,
            n_fft: 256,
            win_length: 200,
            hop_length: 80,
            ..AudioConfig::default()
        },
        encoder: EncoderConfig {
            embedding_dim: 8,
            speaker_dim: 4,
            encoder_hidden: 8,
            attention_dim: 8,
            prenet_dim: 8,
            decoder_hidden: 12,
            max_decode_steps: 64,
            ..EncoderConfig::default()
        },
        vocoder: VocoderConfig {
            cond_dim: 4,
            hidden_size: 8,
            segment_frames: 2,
            ..VocoderConfig::default()
        },
        parallel_vocoder: ParallelVocoderConfig {
            cond_dim: 4,
            channels: 4,
            dilations: vec![1, 2],
            ..ParallelVocoderConfig::default()
        },
    }
}

/// A quiet sine sweep of `len` samples.
pub fn tone(len: usize, pitch: f32) -> Vec<f32> {
    (0..len)
        .map(|i| (i as f32 * pitch).sin() * 0.25)
        .collect()
}

/// Write `<name>.txt` + `<name>.wav` pairs into `dir`.
pub fn write_raw_pairs(dir: &Path, pairs: &[(&str, &str)], sample_rate: u32) {
    fs::create_dir_all(dir).expect("create raw dir");
    for (idx, (name, text)) in pairs.iter().enumerate() {
        fs::write(dir.join(format!("{name}.txt")), text).expect("write text");
        let samples = tone(sample_rate as usize / 5, 0.03 + idx as f32 * 0.01);
        WavIo::write_wav(dir.join(format!("{name}.wav")), &[samples], sample_rate)
            .expect("write wav");
    }
}

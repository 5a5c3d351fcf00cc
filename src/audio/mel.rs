//! Normalized log-mel analysis producing the acoustic feature frames.
//!
//! - Window: Hann of `win_length`, zero-padded to `n_fft`, centered
//! - Padding: reflect by `n_fft / 2` on both sides, so frame `t` is centered on sample `t * hop`
//! - Mel scale: Slaney, triangular filters
//! - Compression: `20 log10(max(mel, 1e-5)) - ref_level_db`, mapped from
//!   `[min_level_db, 0]` onto `[0, 1]` and clipped
//!
//! A signal of `n` samples yields `ceil(n / hop)` frames.

use crate::config::AudioConfig;
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;
use std::sync::Arc;

/// Mel spectrogram processor.
///
/// Pre-computes the window, FFT plan and filterbank on construction.
pub struct MelSpectrogram {
    config: AudioConfig,
    window: Vec<f64>,
    filterbank: Vec<Vec<f64>>,
    fft: Arc<dyn rustfft::Fft<f64>>,
}

impl std::fmt::Debug for MelSpectrogram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MelSpectrogram")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl MelSpectrogram {
    pub fn new(config: &AudioConfig) -> Self {
        let window = padded_hann_window(config.win_length, config.n_fft);
        let f_max = config
            .f_max
            .unwrap_or(config.sample_rate as f32 / 2.0) as f64;
        let filterbank = mel_filterbank(
            config.n_fft,
            config.mgc_order,
            config.sample_rate,
            config.f_min as f64,
            f_max,
        );
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(config.n_fft);

        Self {
            config: config.clone(),
            window,
            filterbank,
            fft,
        }
    }

    /// Number of frames produced for `num_samples` input samples.
    pub fn num_frames(&self, num_samples: usize) -> usize {
        num_samples.div_ceil(self.config.hop_length)
    }

    /// Compute normalized frames, row-major `[frames][mgc_order]`, values in `[0, 1]`.
    pub fn process(&self, samples: &[f32]) -> Vec<Vec<f32>> {
        let n_fft = self.config.n_fft;
        let hop = self.config.hop_length;
        let num_frames = self.num_frames(samples.len());
        if num_frames == 0 {
            return Vec::new();
        }

        let pad = n_fft / 2;
        let num_bins = n_fft / 2 + 1;
        let mut frames = Vec::with_capacity(num_frames);
        let mut buffer = vec![Complex::new(0.0, 0.0); n_fft];
        let mut magnitudes = vec![0.0f64; num_bins];

        for frame_idx in 0..num_frames {
            let start = (frame_idx * hop) as isize - pad as isize;
            for (i, slot) in buffer.iter_mut().enumerate() {
                let value = reflect_sample(samples, start + i as isize) as f64;
                *slot = Complex::new(value * self.window[i], 0.0);
            }
            self.fft.process(&mut buffer);
            for (bin, magnitude) in magnitudes.iter_mut().enumerate() {
                *magnitude = buffer[bin].norm();
            }

            let frame: Vec<f32> = self
                .filterbank
                .iter()
                .map(|filter| {
                    let energy: f64 = filter
                        .iter()
                        .zip(magnitudes.iter())
                        .filter(|(weight, _)| **weight > 0.0)
                        .map(|(weight, magnitude)| weight * magnitude)
                        .sum();
                    self.normalize(energy)
                })
                .collect();
            frames.push(frame);
        }

        frames
    }

    fn normalize(&self, energy: f64) -> f32 {
        let db = 20.0 * energy.max(1e-5).log10() - self.config.ref_level_db as f64;
        let min_level = self.config.min_level_db as f64;
        ((db - min_level) / -min_level).clamp(0.0, 1.0) as f32
    }
}

/// Sample at a possibly out-of-range index, mirroring at both edges.
fn reflect_sample(signal: &[f32], idx: isize) -> f32 {
    let len = signal.len() as isize;
    if len == 0 {
        return 0.0;
    }
    if len == 1 {
        return signal[0];
    }
    let period = 2 * (len - 1);
    let mut idx = idx.rem_euclid(period);
    if idx >= len {
        idx = period - idx;
    }
    signal[idx as usize]
}

/// Hann window of `win_length` centered inside `n_fft` zeros.
fn padded_hann_window(win_length: usize, n_fft: usize) -> Vec<f64> {
    let offset = (n_fft - win_length) / 2;
    let mut window = vec![0.0; n_fft];
    for i in 0..win_length {
        let phase = 2.0 * std::f64::consts::PI * i as f64 / win_length as f64;
        window[offset + i] = 0.5 * (1.0 - phase.cos());
    }
    window
}

/// Build a Slaney-normalized mel filterbank of `n_mels` filters over `n_fft/2 + 1` bins.
fn mel_filterbank(
    n_fft: usize,
    n_mels: usize,
    sample_rate: u32,
    f_min: f64,
    f_max: f64,
) -> Vec<Vec<f64>> {
    let num_bins = n_fft / 2 + 1;
    let sr = sample_rate as f64;

    let mel_min = hz_to_mel_slaney(f_min);
    let mel_max = hz_to_mel_slaney(f_max);
    let hz_points: Vec<f64> = (0..=(n_mels + 1))
        .map(|i| mel_min + (mel_max - mel_min) * i as f64 / (n_mels + 1) as f64)
        .map(mel_to_hz_slaney)
        .collect();
    let bin_freqs: Vec<f64> = (0..num_bins)
        .map(|i| sr * i as f64 / n_fft as f64)
        .collect();

    (0..n_mels)
        .map(|i| {
            let (f_left, f_center, f_right) = (hz_points[i], hz_points[i + 1], hz_points[i + 2]);
            let norm = 2.0 / (f_right - f_left);
            bin_freqs
                .iter()
                .map(|&f| {
                    if f < f_left || f > f_right {
                        0.0
                    } else if f <= f_center {
                        norm * (f - f_left) / (f_center - f_left)
                    } else {
                        norm * (f_right - f) / (f_right - f_center)
                    }
                })
                .collect()
        })
        .collect()
}

fn hz_to_mel_slaney(hz: f64) -> f64 {
    if hz < 1000.0 {
        3.0 * hz / 200.0
    } else {
        15.0 + 27.0 * (hz / 1000.0).ln() / (6.4_f64).ln()
    }
}

fn mel_to_hz_slaney(mel: f64) -> f64 {
    if mel < 15.0 {
        200.0 * mel / 3.0
    } else {
        1000.0 * ((mel - 15.0) * (6.4_f64).ln() / 27.0).exp()
    }
}
